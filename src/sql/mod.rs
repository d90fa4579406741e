//! Thin query helper over an external connection factory.

use crate::error::SwitchyardError;
use crate::inject::PostProcessor;
use crate::value::Injected;
use serde_json::{Map, Value};
use std::sync::Arc;

/// One result row, column name to value.
pub type Row = Map<String, Value>;

/// The database driver boundary.
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Run a statement and return the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> anyhow::Result<u64>;

    fn query(&self, sql: &str, params: &[Value]) -> anyhow::Result<Vec<Row>>;
}

/// Query-capable view of a [`ConnectionFactory`].
///
/// Injected in place of any `Arc<dyn ConnectionFactory>` by the default
/// post-processor.
#[derive(Clone)]
pub struct SqlTemplate {
    factory: Arc<dyn ConnectionFactory>,
}

impl SqlTemplate {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self { factory }
    }

    pub fn query(&self, sql: &str, params: &[Value]) -> anyhow::Result<u64> {
        tracing::trace!(sql, "execute");
        self.factory.execute(sql, params)
    }

    pub fn select(&self, sql: &str, params: &[Value]) -> anyhow::Result<Vec<Row>> {
        tracing::trace!(sql, "select");
        self.factory.query(sql, params)
    }

    /// At most one row; more than one is [`SwitchyardError::MultipleResults`].
    pub fn select_one(&self, sql: &str, params: &[Value]) -> anyhow::Result<Option<Row>> {
        let mut rows = self.select(sql, params)?;
        match rows.len() {
            0 | 1 => Ok(rows.pop()),
            _ => Err(SwitchyardError::MultipleResults.into()),
        }
    }
}

/// Turns injected connection factories into [`SqlTemplate`]s.
pub fn sql_post_processor() -> PostProcessor {
    Arc::new(|value: Injected| match value.get::<Arc<dyn ConnectionFactory>>() {
        Some(factory) => Injected::new(SqlTemplate::new(factory.as_ref().clone())),
        None => value,
    })
}
