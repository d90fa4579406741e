//! Predicate-gated wrappers around composed handlers.
//!
//! Wrappers registered through the DSL are folded around every route in
//! registration order: each one wraps everything composed before it, so the
//! most recently registered wrapper runs first. [`HandlerWrapper`]s from the
//! builder are applied outside all of them.

mod logging;

pub use logging::LoggingWrapper;

use crate::context::RequestContext;
use crate::handler::WrapperFn;
use crate::inject::Injections;
use crate::predicate::Predicate;
use std::sync::Arc;

pub type HandlerFn = dyn Fn(&mut RequestContext) -> anyhow::Result<()> + Send + Sync;

/// A fully composed request handler.
pub type Handler = Arc<HandlerFn>;

/// The rest of the chain, handed to a wrapper.
///
/// A wrapper that never calls [`Next::run`] short-circuits: nothing inside it
/// runs for that request.
pub struct Next<'a> {
    handler: &'a HandlerFn,
}

impl<'a> Next<'a> {
    pub fn new(handler: &'a HandlerFn) -> Self {
        Self { handler }
    }

    /// Execute the next handler
    pub fn run(self, ctx: &mut RequestContext) -> anyhow::Result<()> {
        (self.handler)(ctx)
    }
}

/// Wraps composed handlers after the DSL wrappers, e.g. for logging.
pub trait HandlerWrapper: Send + Sync + 'static {
    fn wrap(&self, handler: Handler) -> Handler;
}

/// One `wrapper(..)` registration.
#[derive(Clone)]
pub struct WrapperEntry {
    predicate: Option<Arc<dyn Predicate>>,
    injections: Injections,
    function: Arc<WrapperFn>,
}

impl WrapperEntry {
    pub(crate) fn new(
        predicate: Option<Arc<dyn Predicate>>,
        injections: Injections,
        function: Arc<WrapperFn>,
    ) -> Self {
        Self {
            predicate,
            injections,
            function,
        }
    }

    /// Wrap `next`. When the predicate rejects a request it flows straight on.
    pub fn wrap(&self, next: Handler) -> Handler {
        let entry = self.clone();
        Arc::new(move |ctx: &mut RequestContext| {
            if let Some(predicate) = &entry.predicate {
                if !predicate.matches(ctx) {
                    return next(ctx);
                }
            }
            let values = entry.injections.resolve(Some(&*ctx))?;
            (entry.function)(ctx, Next::new(next.as_ref()), &values)
        })
    }
}

/// Thread `terminal` through every wrapper.
pub fn compose_chain(
    terminal: Handler,
    wrappers: &[WrapperEntry],
    handler_wrappers: &[Arc<dyn HandlerWrapper>],
) -> Handler {
    let chained = wrappers
        .iter()
        .fold(terminal, |handler, wrapper| wrapper.wrap(handler));
    handler_wrappers
        .iter()
        .fold(chained, |handler, wrapper| wrapper.wrap(handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_context;
    use crate::handler::{HandlerSpec, wrapper, wrapper_with};
    use crate::inject::{Injector, ProviderFn};
    use crate::predicate::PredicateSource;
    use crate::value::Injected;
    use axum::http::{Method, StatusCode};
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn entry(injector: &Injector, predicate: Option<PredicateSource>, spec: HandlerSpec<WrapperFn>) -> WrapperEntry {
        WrapperEntry::new(
            predicate.map(|p| p.compile(None).unwrap()),
            injector.bind(spec.specifiers()),
            spec.function().clone(),
        )
    }

    fn recording(log: &Log, name: &'static str) -> HandlerSpec<WrapperFn> {
        let log = log.clone();
        wrapper(move |ctx, next, _| {
            log.lock().unwrap().push(format!("{name}:before"));
            next.run(ctx)?;
            log.lock().unwrap().push(format!("{name}:after"));
            Ok(())
        })
    }

    fn terminal(log: &Log) -> Handler {
        let log = log.clone();
        Arc::new(move |ctx: &mut RequestContext| {
            log.lock().unwrap().push("terminal".to_string());
            ctx.send("done");
            Ok(())
        })
    }

    #[test]
    fn test_last_registered_runs_first() {
        let injector = Injector::new(Vec::new(), Vec::new());
        let log: Log = Arc::default();
        let wrappers = vec![
            entry(&injector, None, recording(&log, "first")),
            entry(&injector, None, recording(&log, "second")),
        ];
        let chain = compose_chain(terminal(&log), &wrappers, &[]);
        chain(&mut test_context(Method::GET, "/")).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            [
                "second:before",
                "first:before",
                "terminal",
                "first:after",
                "second:after"
            ]
        );
    }

    #[test]
    fn test_short_circuit_stops_inner_handlers() {
        let injector = Injector::new(Vec::new(), Vec::new());
        let log: Log = Arc::default();
        let deny = wrapper(|ctx, _next, _| {
            ctx.send_with_status(StatusCode::FORBIDDEN, "denied");
            Ok(())
        });
        let wrappers = vec![
            entry(&injector, None, recording(&log, "inner")),
            entry(&injector, None, deny),
        ];
        let chain = compose_chain(terminal(&log), &wrappers, &[]);
        let mut ctx = test_context(Method::GET, "/");
        chain(&mut ctx).unwrap();
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(ctx.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_predicate_gates_wrapper() {
        let injector = Injector::new(Vec::new(), Vec::new());
        let log: Log = Arc::default();
        let secure = PredicateSource::from_fn(|ctx: &RequestContext| ctx.path() == "/secure");
        let check = wrapper(|ctx, next, _| {
            if ctx.request_header("x-token") == Some("ok") {
                next.run(ctx)
            } else {
                ctx.send_with_status(StatusCode::FORBIDDEN, "no token");
                Ok(())
            }
        });
        let wrappers = vec![entry(&injector, Some(secure), check)];
        let chain = compose_chain(terminal(&log), &wrappers, &[]);

        let mut blocked = test_context(Method::GET, "/secure");
        chain(&mut blocked).unwrap();
        assert_eq!(blocked.status(), StatusCode::FORBIDDEN);

        let mut open = test_context(Method::GET, "/other");
        chain(&mut open).unwrap();
        assert_eq!(open.status(), StatusCode::OK);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_wrapper_receives_injections() {
        let provider = ProviderFn::new("test", |name: &str| Injected::new(format!("INJECTED:{name}")));
        let injector = Injector::new(vec![Arc::new(provider)], Vec::new());
        let header = wrapper_with(["test:wrapped"], |ctx, next, values| {
            let value = values[0].as_str().unwrap_or_default().to_string();
            ctx.set_response_header("x-injected", &value)?;
            next.run(ctx)
        });
        let log: Log = Arc::default();
        let chain = compose_chain(terminal(&log), &[entry(&injector, None, header)], &[]);
        let mut ctx = test_context(Method::GET, "/");
        chain(&mut ctx).unwrap();
        assert_eq!(ctx.response_header("x-injected"), Some("INJECTED:wrapped"));
    }

    struct Tagging(&'static str);

    impl HandlerWrapper for Tagging {
        fn wrap(&self, handler: Handler) -> Handler {
            let tag = self.0;
            Arc::new(move |ctx: &mut RequestContext| {
                ctx.append_response_header("x-tag", tag)?;
                handler(ctx)
            })
        }
    }

    #[test]
    fn test_handler_wrappers_run_outside_dsl_wrappers() {
        let injector = Injector::new(Vec::new(), Vec::new());
        let log: Log = Arc::default();
        let dsl = wrapper(|ctx, next, _| {
            ctx.append_response_header("x-tag", "dsl")?;
            next.run(ctx)
        });
        let late: Vec<Arc<dyn HandlerWrapper>> = vec![Arc::new(Tagging("late"))];
        let chain = compose_chain(terminal(&log), &[entry(&injector, None, dsl)], &late);
        let mut ctx = test_context(Method::GET, "/");
        chain(&mut ctx).unwrap();
        let tags: Vec<&str> = ctx
            .response_headers()
            .get_all("x-tag")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(tags, ["late", "dsl"]);
    }
}
