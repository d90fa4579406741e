//! # Switchyard
//!
//! Declarative request handling on top of axum.
//!
//! Routes and wrappers are registered with short declarative specs. Each
//! registration becomes one composed handler that injects its arguments,
//! checks roles, runs inside a transaction when asked to, and renders or
//! serializes whatever the terminal function returns. Predicate-gated
//! wrappers are threaded around every route.
//!
//! ## Features
//!
//! - **Injection specifiers**: `$entity:json`, `named:db` or a bare alias,
//!   resolved once at registration
//! - **First-match dispatch**: routes sharing a path act as fallbacks for each
//!   other, gated by predicates
//! - **Wrappers**: middleware that can short-circuit by not calling `next`
//! - **Per-route options**: templates, headers, `roles_allowed`,
//!   `transactional`, validated at registration
//! - **Channels**: websocket handlers using the same injection mechanism
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use switchyard::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut sy = Switchyard::builder().build()?;
//!
//!     sy.on_get("/hello/{name}", route(|ctx, _| {
//!         Ok(format!("Hello, {}!", ctx.param("name").unwrap_or("world")))
//!     }))?
//!     .on_post("/echo", route_with(["$entity:json"], |_, args| {
//!         Ok(args[0].as_json().cloned())
//!     }))?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     serve(listener, sy.into_dispatcher()).await?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod guard;
pub mod handler;
pub mod inject;
pub mod interceptor;
pub mod lifecycle;
pub mod options;
pub mod predicate;
pub mod registry;
pub mod routing;
pub mod sql;
pub mod template;
pub mod transactional;
pub mod value;
pub mod worker;

// Re-export core types
pub use config::Settings;
pub use context::RequestContext;
pub use dispatch::Dispatcher;
pub use error::{Result, SwitchyardError};
pub use registry::{Switchyard, SwitchyardBuilder};

// Re-export commonly used types from dependencies
pub use axum;

/// Prelude module for convenient imports
///
/// ```
/// use switchyard::prelude::*;
/// ```
pub mod prelude {
    pub use crate::channel::{ChannelEvent, ChannelPayload, ChannelSession, CloseReason};
    pub use crate::config::Settings;
    pub use crate::context::{RequestContext, Session, SessionStore};
    pub use crate::dispatch::{DispatchLayer, Dispatcher};
    pub use crate::error::{Result, SwitchyardError};
    pub use crate::guard::{
        ANY_ROLE, Authentication, Authenticator, BasicAuthenticator, Principal, RolesAllowed,
    };
    pub use crate::handler::{channel, channel_with, route, route_with, wrapper, wrapper_with};
    pub use crate::inject::{Entity, FormData, InjectionProvider, NamedInstances, ProviderFn};
    pub use crate::interceptor::{HandlerWrapper, LoggingWrapper, Next};
    pub use crate::lifecycle::{serve, shutdown_signal};
    pub use crate::options::{OptionValue, Options};
    pub use crate::predicate::{Predicate, PredicateParser, PredicateSource};
    pub use crate::registry::{Switchyard, SwitchyardBuilder};
    pub use crate::sql::{ConnectionFactory, Row, SqlTemplate};
    pub use crate::template::{
        MustacheTemplateProvider, Template, TemplateProvider, TeraTemplateProvider,
    };
    pub use crate::transactional::{
        IsolationLevel, Transaction, TransactionManager, TransactionOptions,
    };
    pub use crate::value::{HandlerResult, Injected, JsonSerializer, Serializer};
    pub use crate::worker::WorkerPool;
    pub use axum::http::{Method, StatusCode};
    pub use std::sync::Arc;
}
