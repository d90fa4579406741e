//! Request dispatch over the frozen route table.
//!
//! For each request the first route whose method, path and predicate all
//! match runs its composed handler on the worker pool. Requests nothing
//! matches are handed back so an outer service can answer them.

mod body;
mod layer;

pub use layer::{DispatchLayer, DispatchService};

use crate::channel::{ChannelRoute, serve_channel};
use crate::config::Settings;
use crate::context::{RequestContext, SessionStore};
use crate::error::{SwitchyardError, error_response};
use crate::interceptor::Handler;
use crate::routing::RouteEntry;
use crate::template::TemplateProvider;
use crate::value::Serializer;
use crate::worker::{WorkerPool, on_io_thread, run_contained};
use axum::{
    Router,
    body::Body,
    extract::{FromRequestParts, ws::WebSocketUpgrade},
    http::{Method, Request, header, request::Parts},
    response::{IntoResponse, Response},
};
use std::convert::Infallible;
use std::sync::Arc;
use tower::Layer;
use tracing::{debug, error, info};

/// Everything dispatch reads. Immutable once built.
pub(crate) struct DispatchState {
    pub(crate) routes: Vec<RouteEntry>,
    pub(crate) channels: Vec<Arc<ChannelRoute>>,
    pub(crate) pool: WorkerPool,
    pub(crate) sessions: SessionStore,
    pub(crate) settings: Settings,
    pub(crate) serializer: Arc<dyn Serializer>,
    pub(crate) template_providers: Vec<Arc<dyn TemplateProvider>>,
}

#[derive(Clone)]
pub struct Dispatcher {
    state: Arc<DispatchState>,
}

impl Dispatcher {
    pub(crate) fn new(state: DispatchState) -> Self {
        info!(
            routes = state.routes.len(),
            channels = state.channels.len(),
            workers = state.pool.num_threads(),
            "Dispatcher ready"
        );
        Self {
            state: Arc::new(state),
        }
    }

    pub fn routes(&self) -> &[RouteEntry] {
        &self.state.routes
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.state.sessions
    }

    /// A tower layer dispatching before the wrapped service.
    pub fn layer(&self) -> DispatchLayer {
        DispatchLayer::new(self.clone())
    }

    /// A router answering every request, 404 when nothing matches.
    pub fn into_router(self) -> Router {
        let service = self.layer().layer(tower::service_fn(not_found));
        Router::new().fallback_service(service)
    }

    /// Release template engines. Call once after the server stopped.
    pub fn stop(&self) {
        for provider in &self.state.template_providers {
            provider.cleanup();
        }
        info!("Dispatcher stopped");
    }

    /// Dispatch one request, or hand it back when no route matches.
    pub async fn dispatch(&self, request: Request<Body>) -> Result<Response, Request<Body>> {
        let (parts, body) = request.into_parts();

        if is_websocket_upgrade(&parts) {
            if let Some((route, params)) = self.find_channel(parts.uri.path()) {
                return Ok(self.upgrade(parts, route, params).await);
            }
        }

        let mut ctx = RequestContext::new(parts, self.state.sessions.clone());
        let Some(handler) = self.find_route(&mut ctx) else {
            return Err(Request::from_parts(ctx.into_parts(), body));
        };

        let content_type = ctx
            .request_header(header::CONTENT_TYPE.as_str())
            .map(str::to_string);
        match body::read_entity(body, content_type, self.state.settings.max_body_bytes).await {
            Ok(entity) => ctx.set_entity(entity),
            Err(e) => {
                debug!(path = %ctx.path(), error = %e, "Request entity rejected");
                return Ok(e.into_response());
            }
        }

        Ok(self.execute(handler, ctx).await)
    }

    fn find_route(&self, ctx: &mut RequestContext) -> Option<Handler> {
        for route in &self.state.routes {
            let Some(params) = route.matches_path(ctx.method(), ctx.path()) else {
                continue;
            };
            ctx.set_path_params(params);
            if route.accepts(ctx) {
                return Some(route.handler.clone());
            }
        }
        None
    }

    fn find_channel(&self, path: &str) -> Option<(Arc<ChannelRoute>, Vec<(String, String)>)> {
        self.state
            .channels
            .iter()
            .find_map(|route| Some((route.clone(), route.pattern.matches(path)?)))
    }

    /// Run a composed handler off the I/O threads, handing off exactly once.
    async fn execute(&self, handler: Handler, mut ctx: RequestContext) -> Response {
        let method = ctx.method().clone();
        let path = ctx.path().to_string();
        let run = move || {
            let result = handler(&mut ctx);
            (ctx, result)
        };

        let outcome = if on_io_thread() {
            self.state.pool.execute(run).await
        } else {
            run_contained(run)
        };

        match outcome {
            Ok((ctx, Ok(()))) => ctx.into_response(),
            Ok((_, Err(e))) => {
                error!(%method, %path, error = %e, "Handler failed");
                error_response(&e)
            }
            Err(e) => {
                error!(%method, %path, error = %e, "Handler panicked");
                error_response(&anyhow::Error::new(e))
            }
        }
    }

    async fn upgrade(
        &self,
        mut parts: Parts,
        route: Arc<ChannelRoute>,
        params: Vec<(String, String)>,
    ) -> Response {
        let path = parts.uri.path().to_string();
        match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(ws) => {
                debug!(%path, "Upgrading to channel");
                let pool = self.state.pool.clone();
                let serializer = self.state.serializer.clone();
                ws.on_upgrade(move |socket| {
                    serve_channel(socket, route, path, params, pool, serializer)
                })
            }
            Err(rejection) => rejection.into_response(),
        }
    }
}

fn is_websocket_upgrade(parts: &Parts) -> bool {
    parts.method == Method::GET
        && parts
            .headers
            .get(header::UPGRADE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

async fn not_found(request: Request<Body>) -> Result<Response, Infallible> {
    Ok(SwitchyardError::NotFound {
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
    }
    .into_response())
}
