use crate::context::RequestContext;
use crate::error::{Result, SwitchyardError};
use std::fmt;
use std::sync::Arc;

/// A boolean guard evaluated against a request.
///
/// Gates a route or a wrapper. Any `Fn(&RequestContext) -> bool` closure is a
/// predicate.
pub trait Predicate: Send + Sync + 'static {
    fn matches(&self, ctx: &RequestContext) -> bool;
}

impl<F> Predicate for F
where
    F: Fn(&RequestContext) -> bool + Send + Sync + 'static,
{
    fn matches(&self, ctx: &RequestContext) -> bool {
        self(ctx)
    }
}

/// Compiles predicate expressions written in an external grammar.
///
/// Switchyard does not ship a grammar; string predicates require a parser
/// registered on the builder.
pub trait PredicateParser: Send + Sync + 'static {
    fn parse(&self, expression: &str) -> anyhow::Result<Arc<dyn Predicate>>;
}

/// A predicate as written at registration: either an expression for the
/// registered [`PredicateParser`], or an already compiled predicate.
#[derive(Clone)]
pub enum PredicateSource {
    Expression(String),
    Compiled(Arc<dyn Predicate>),
}

impl PredicateSource {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&RequestContext) -> bool + Send + Sync + 'static,
    {
        PredicateSource::Compiled(Arc::new(f))
    }

    pub fn compile(&self, parser: Option<&dyn PredicateParser>) -> Result<Arc<dyn Predicate>> {
        match self {
            PredicateSource::Compiled(predicate) => Ok(predicate.clone()),
            PredicateSource::Expression(expression) => {
                let parser = parser.ok_or_else(|| SwitchyardError::InvalidPredicate {
                    expression: expression.clone(),
                    message: "no predicate parser registered".to_string(),
                })?;
                parser
                    .parse(expression)
                    .map_err(|e| SwitchyardError::InvalidPredicate {
                        expression: expression.clone(),
                        message: e.to_string(),
                    })
            }
        }
    }
}

impl fmt::Debug for PredicateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredicateSource::Expression(expression) => {
                f.debug_tuple("Expression").field(expression).finish()
            }
            PredicateSource::Compiled(_) => f.write_str("Compiled(..)"),
        }
    }
}

impl From<&str> for PredicateSource {
    fn from(expression: &str) -> Self {
        PredicateSource::Expression(expression.to_string())
    }
}

impl From<String> for PredicateSource {
    fn from(expression: String) -> Self {
        PredicateSource::Expression(expression)
    }
}

impl From<Arc<dyn Predicate>> for PredicateSource {
    fn from(predicate: Arc<dyn Predicate>) -> Self {
        PredicateSource::Compiled(predicate)
    }
}
