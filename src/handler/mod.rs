//! Handler specs and the per-route composer.
//!
//! A [`HandlerSpec`] is a terminal function, optionally preceded by injection
//! specifiers whose values are passed positionally after the context:
//!
//! ```rust,ignore
//! let spec = route_with(["$entity:json", "named:db"], |ctx, args| {
//!     let body = args[0].as_json();
//!     let db = args[1].get::<SqlTemplate>();
//!     Ok("stored")
//! });
//! ```

use crate::channel::ChannelSession;
use crate::context::RequestContext;
use crate::guard::{Authentication, Authenticator, RolesAllowed};
use crate::inject::Injections;
use crate::interceptor::{Handler, Next};
use crate::template::Template;
use crate::transactional::{TransactionManager, TransactionOptions, in_transaction};
use crate::value::{HandlerResult, Injected, Serializer, to_template_data};
use axum::http::{HeaderName, HeaderValue, StatusCode, header::CONTENT_TYPE};
use serde_json::Value;
use std::sync::Arc;

pub type RouteFn =
    dyn Fn(&mut RequestContext, &[Injected]) -> anyhow::Result<HandlerResult> + Send + Sync;

pub type WrapperFn =
    dyn Fn(&mut RequestContext, Next<'_>, &[Injected]) -> anyhow::Result<()> + Send + Sync;

pub type ChannelFn = dyn Fn(&mut ChannelSession, &[Injected]) -> anyhow::Result<()> + Send + Sync;

/// A terminal function with the injection specifiers it declares.
pub enum HandlerSpec<F: ?Sized> {
    Terminal(Arc<F>),
    WithInjections(Vec<String>, Arc<F>),
}

impl<F: ?Sized> HandlerSpec<F> {
    pub fn specifiers(&self) -> &[String] {
        match self {
            HandlerSpec::Terminal(_) => &[],
            HandlerSpec::WithInjections(specifiers, _) => specifiers,
        }
    }

    pub fn function(&self) -> &Arc<F> {
        match self {
            HandlerSpec::Terminal(f) | HandlerSpec::WithInjections(_, f) => f,
        }
    }
}

impl<F: ?Sized> Clone for HandlerSpec<F> {
    fn clone(&self) -> Self {
        match self {
            HandlerSpec::Terminal(f) => HandlerSpec::Terminal(f.clone()),
            HandlerSpec::WithInjections(s, f) => HandlerSpec::WithInjections(s.clone(), f.clone()),
        }
    }
}

fn specifiers<I, S>(specs: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    specs.into_iter().map(Into::into).collect()
}

/// A route handler taking no injections.
pub fn route<F, R>(f: F) -> HandlerSpec<RouteFn>
where
    F: Fn(&mut RequestContext, &[Injected]) -> anyhow::Result<R> + Send + Sync + 'static,
    R: Into<HandlerResult>,
{
    HandlerSpec::Terminal(Arc::new(move |ctx: &mut RequestContext, args: &[Injected]| -> anyhow::Result<HandlerResult> {
        f(ctx, args).map(Into::into)
    }))
}

pub fn route_with<I, S, F, R>(specs: I, f: F) -> HandlerSpec<RouteFn>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
    F: Fn(&mut RequestContext, &[Injected]) -> anyhow::Result<R> + Send + Sync + 'static,
    R: Into<HandlerResult>,
{
    HandlerSpec::WithInjections(
        specifiers(specs),
        Arc::new(move |ctx: &mut RequestContext, args: &[Injected]| -> anyhow::Result<HandlerResult> {
            f(ctx, args).map(Into::into)
        }),
    )
}

pub fn wrapper<F>(f: F) -> HandlerSpec<WrapperFn>
where
    F: Fn(&mut RequestContext, Next<'_>, &[Injected]) -> anyhow::Result<()> + Send + Sync + 'static,
{
    HandlerSpec::Terminal(Arc::new(f))
}

pub fn wrapper_with<I, S, F>(specs: I, f: F) -> HandlerSpec<WrapperFn>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
    F: Fn(&mut RequestContext, Next<'_>, &[Injected]) -> anyhow::Result<()> + Send + Sync + 'static,
{
    HandlerSpec::WithInjections(specifiers(specs), Arc::new(f))
}

pub fn channel<F>(f: F) -> HandlerSpec<ChannelFn>
where
    F: Fn(&mut ChannelSession, &[Injected]) -> anyhow::Result<()> + Send + Sync + 'static,
{
    HandlerSpec::Terminal(Arc::new(f))
}

pub fn channel_with<I, S, F>(specs: I, f: F) -> HandlerSpec<ChannelFn>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
    F: Fn(&mut ChannelSession, &[Injected]) -> anyhow::Result<()> + Send + Sync + 'static,
{
    HandlerSpec::WithInjections(specifiers(specs), Arc::new(f))
}

/// The terminal handler of one route with its validated configuration.
pub(crate) struct RouteHandler {
    pub(crate) function: Arc<RouteFn>,
    pub(crate) injections: Injections,
    pub(crate) template: Option<Arc<dyn Template>>,
    pub(crate) headers: Vec<(HeaderName, HeaderValue)>,
    /// Content-Type a handler result may replace, if the route did not pin one.
    pub(crate) default_content_type: Option<HeaderValue>,
    pub(crate) roles: RolesAllowed,
    pub(crate) authenticator: Option<Arc<dyn Authenticator>>,
    pub(crate) transactions: Option<(Arc<dyn TransactionManager>, TransactionOptions)>,
    pub(crate) serializer: Arc<dyn Serializer>,
}

impl RouteHandler {
    pub(crate) fn into_handler(self) -> Handler {
        let route = Arc::new(self);
        Arc::new(move |ctx: &mut RequestContext| route.handle(ctx))
    }

    fn handle(&self, ctx: &mut RequestContext) -> anyhow::Result<()> {
        if !self.authorize(ctx) {
            return Ok(());
        }

        for (name, value) in &self.headers {
            ctx.response_headers_mut().insert(name.clone(), value.clone());
        }

        let result = match &self.transactions {
            Some((manager, options)) => {
                in_transaction(manager.as_ref(), options.clone(), || {
                    self.invoke(ctx)
                })?
            }
            None => self.invoke(ctx)?,
        };

        self.respond(ctx, result)
    }

    /// False when the exchange was answered here and must not go further.
    fn authorize(&self, ctx: &mut RequestContext) -> bool {
        if self.roles.is_empty() {
            return true;
        }
        let Some(authenticator) = &self.authenticator else {
            // registration refuses roles without an authenticator
            ctx.set_status(StatusCode::FORBIDDEN);
            ctx.end_exchange();
            return false;
        };
        match authenticator.authenticate(ctx) {
            Authentication::NotAuthenticated => {
                ctx.end_exchange();
                false
            }
            Authentication::Authenticated(principal) => {
                ctx.set_principal(principal);
                match self.roles.check(ctx.principal()) {
                    Ok(()) => true,
                    Err(denied) => {
                        tracing::debug!(path = %ctx.path(), reason = %denied, "Access denied");
                        ctx.set_status(StatusCode::FORBIDDEN);
                        ctx.end_exchange();
                        false
                    }
                }
            }
        }
    }

    fn invoke(&self, ctx: &mut RequestContext) -> anyhow::Result<HandlerResult> {
        let values = self.injections.resolve(Some(&*ctx))?;
        (self.function)(ctx, &values)
    }

    fn respond(&self, ctx: &mut RequestContext, result: HandlerResult) -> anyhow::Result<()> {
        if result.is_empty() || ctx.is_ended() {
            return Ok(());
        }

        if let Some(template) = &self.template {
            let value = match result {
                HandlerResult::Text(text) => Value::String(text),
                HandlerResult::Structured(value) => value,
                HandlerResult::Empty => Value::Null,
            };
            let body = template.apply(&to_template_data(&value))?;
            ctx.send(body);
            return Ok(());
        }

        match result {
            HandlerResult::Text(text) => ctx.send(text),
            HandlerResult::Structured(value) => {
                let body = self.serializer.serialize(&value)?;
                self.replace_default_content_type(ctx, self.serializer.content_type());
                ctx.send(body);
            }
            HandlerResult::Empty => {}
        }
        Ok(())
    }

    fn replace_default_content_type(&self, ctx: &mut RequestContext, content_type: &str) {
        let Some(default) = &self.default_content_type else {
            return;
        };
        // the handler may have chosen its own
        if ctx.response_headers().get(CONTENT_TYPE) != Some(default) {
            return;
        }
        if let Ok(value) = HeaderValue::from_str(content_type) {
            ctx.response_headers_mut().insert(CONTENT_TYPE, value);
        }
    }
}
