use crate::dispatch::Dispatcher;
use axum::{body::Body, http::Request, response::Response};
use futures::future::BoxFuture;
use std::convert::Infallible;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer putting a [`Dispatcher`] in front of another service.
///
/// Matched requests are answered by the dispatcher; the rest reach the
/// inner service unchanged.
#[derive(Clone)]
pub struct DispatchLayer {
    dispatcher: Dispatcher,
}

impl DispatchLayer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

impl<S> Layer<S> for DispatchLayer {
    type Service = DispatchService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DispatchService {
            inner,
            dispatcher: self.dispatcher.clone(),
        }
    }
}

#[derive(Clone)]
pub struct DispatchService<S> {
    inner: S,
    dispatcher: Dispatcher,
}

impl<S> Service<Request<Body>> for DispatchService<S>
where
    S: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        // Take the service that was driven to readiness, leave a clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let dispatcher = self.dispatcher.clone();

        Box::pin(async move {
            match dispatcher.dispatch(request).await {
                Ok(response) => Ok(response),
                Err(request) => inner.call(request).await,
            }
        })
    }
}
