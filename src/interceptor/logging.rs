use crate::context::RequestContext;
use crate::interceptor::{Handler, HandlerWrapper};
use std::sync::Arc;
use std::time::Instant;

/// Logs method, path, status and timing of every composed handler.
#[derive(Clone, Default)]
pub struct LoggingWrapper;

impl HandlerWrapper for LoggingWrapper {
    fn wrap(&self, handler: Handler) -> Handler {
        Arc::new(move |ctx: &mut RequestContext| {
            let start = Instant::now();
            let result = handler(ctx);
            let elapsed = start.elapsed();
            match &result {
                Ok(()) => tracing::info!(
                    method = %ctx.method(),
                    path = %ctx.path(),
                    status = ctx.status().as_u16(),
                    elapsed = ?elapsed,
                    "Request handled"
                ),
                Err(e) => tracing::warn!(
                    method = %ctx.method(),
                    path = %ctx.path(),
                    error = %e,
                    elapsed = ?elapsed,
                    "Request failed"
                ),
            }
            result
        })
    }
}
