use crate::error::{Result, SwitchyardError};
use rayon::ThreadPool;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Shared thread pool for blocking handler work.
///
/// Composed handlers may block (database calls, template rendering), so they
/// never run on a runtime thread that drives I/O.
#[derive(Clone)]
pub struct WorkerPool {
    pool: Arc<ThreadPool>,
}

impl WorkerPool {
    pub fn new(num_threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("switchyard-worker-{i}"))
            .build()
            .map_err(|e| SwitchyardError::Worker(e.to_string()))?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Execute a blocking task in the pool and return its result asynchronously.
    ///
    /// A panic inside the task is reported as [`SwitchyardError::Worker`].
    pub async fn execute<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.pool.spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(f)).map_err(panic_message);
            let _ = tx.send(result);
        });

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(SwitchyardError::Worker(message)),
            Err(_) => Err(SwitchyardError::Worker("worker dropped the task".to_string())),
        }
    }
}

/// Run a task on the calling thread, reporting a panic the same way
/// [`WorkerPool::execute`] does.
pub fn run_contained<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> R,
{
    catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| SwitchyardError::Worker(panic_message(payload)))
}

/// True when the current thread belongs to an async runtime and must not block.
pub fn on_io_thread() -> bool {
    tokio::runtime::Handle::try_current().is_ok()
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_leaves_the_runtime() {
        assert!(on_io_thread());
        let pool = WorkerPool::new(2).unwrap();
        let on_runtime = pool.execute(on_io_thread).await.unwrap();
        assert!(!on_runtime);
    }

    #[test]
    fn test_inline_panic_is_contained() {
        match run_contained(|| -> u8 { panic!("inline boom") }) {
            Err(SwitchyardError::Worker(message)) => assert_eq!(message, "inline boom"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
        assert_eq!(run_contained(|| 3).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        let pool = WorkerPool::new(1).unwrap();
        let result = pool.execute(|| -> u8 { panic!("boom") }).await;
        match result {
            Err(SwitchyardError::Worker(message)) => assert_eq!(message, "boom"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
        // the pool survives
        assert_eq!(pool.execute(|| 7).await.unwrap(), 7);
    }
}
