//! Demo server: a small customer service wired through switchyard.
//!
//! ```text
//! curl localhost:3000/customers
//! curl localhost:3000/customers/1
//! curl -u admin:admin -H 'content-type: application/json' \
//!      -d '{"name":"Grace"}' localhost:3000/customers
//! websocat ws://localhost:3000/chat/lobby
//! ```

use serde_json::{Value, json};
use std::sync::Mutex;
use switchyard::prelude::*;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Stands in for a database driver; ignores the SQL text.
struct CustomerTable {
    rows: Mutex<Vec<Row>>,
}

impl CustomerTable {
    fn seeded() -> Self {
        let rows = [(1, "Ada"), (2, "Linus")]
            .into_iter()
            .filter_map(|(id, name)| match json!({ "id": id, "name": name }) {
                Value::Object(row) => Some(row),
                _ => None,
            })
            .collect();
        Self {
            rows: Mutex::new(rows),
        }
    }
}

impl ConnectionFactory for CustomerTable {
    fn execute(&self, _sql: &str, params: &[Value]) -> anyhow::Result<u64> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| anyhow::anyhow!("customer table poisoned"))?;
        let id = rows.len() as u64 + 1;
        let name = params.first().cloned().unwrap_or(Value::Null);
        if let Value::Object(row) = json!({ "id": id, "name": name }) {
            rows.push(row);
        }
        Ok(1)
    }

    fn query(&self, _sql: &str, params: &[Value]) -> anyhow::Result<Vec<Row>> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| anyhow::anyhow!("customer table poisoned"))?;
        Ok(rows
            .iter()
            .filter(|row| params.first().is_none_or(|id| row.get("id") == Some(id)))
            .cloned()
            .collect())
    }
}

/// Logs transaction boundaries instead of talking to a database.
struct LoggingTransactions;

struct LoggedTransaction;

impl Transaction for LoggedTransaction {
    fn commit(&mut self) -> switchyard::Result<()> {
        tracing::info!("commit");
        Ok(())
    }

    fn rollback(&mut self) -> switchyard::Result<()> {
        tracing::warn!("rollback");
        Ok(())
    }
}

impl TransactionManager for LoggingTransactions {
    fn begin(&self, options: TransactionOptions) -> switchyard::Result<Box<dyn Transaction>> {
        tracing::info!(?options, "begin");
        Ok(Box::new(LoggedTransaction))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,switchyard=debug")),
        )
        .init();

    let settings = Settings::from_env()?;
    let names = NamedInstances::default();
    let table: Arc<dyn ConnectionFactory> = Arc::new(CustomerTable::seeded());
    names.register("customers", table);

    let templates = TeraTemplateProvider::from_glob(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/templates/**/*.html"
    ))?;

    let mut sy = Switchyard::builder()
        .settings(settings)
        .provider(names)
        .template_provider(templates)
        .authenticator(BasicAuthenticator::new("demo").with_user("admin", "admin", ["admin"]))
        .transaction_manager(LoggingTransactions)
        .handler_wrapper(LoggingWrapper)
        .build()?;

    sy.set_default("template_type", TeraTemplateProvider::NAME)?
        .alias("db", "named:customers")?
        .wrapper(wrapper(|ctx, next, _| {
            ctx.set_response_header("x-powered-by", "switchyard")?;
            next.run(ctx)
        }))?
        .on_get(
            "/customers",
            route_with(["db"], |_, args| {
                let db = args[0]
                    .get::<SqlTemplate>()
                    .ok_or_else(|| anyhow::anyhow!("no database"))?;
                let rows = db.select("SELECT * FROM customers", &[])?;
                Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
            }),
        )?
        .on_get_with(
            "/customers/{id}",
            Options::new().template("customer.html"),
            route_with(["db"], |ctx, args| {
                let db = args[0]
                    .get::<SqlTemplate>()
                    .ok_or_else(|| anyhow::anyhow!("no database"))?;
                let id: u64 = ctx.param("id").unwrap_or_default().parse()?;
                match db.select_one("SELECT * FROM customers WHERE id = ?", &[json!(id)])? {
                    Some(row) => Ok(Some(Value::Object(row))),
                    None => {
                        ctx.send_with_status(StatusCode::NOT_FOUND, "no such customer");
                        Ok(None)
                    }
                }
            }),
        )?
        .on_post_with(
            "/customers",
            Options::new().roles_allowed(["admin"]).transactional(true),
            route_with(["$entity:json", "db"], |ctx, args| {
                let name = args[0]
                    .as_json()
                    .and_then(|body| body.get("name"))
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("name is required"))?;
                let db = args[1]
                    .get::<SqlTemplate>()
                    .ok_or_else(|| anyhow::anyhow!("no database"))?;
                db.query("INSERT INTO customers (name) VALUES (?)", &[name])?;
                ctx.set_status(StatusCode::CREATED);
                Ok("created")
            }),
        )?
        .on_get(
            "/visits",
            route(|ctx, _| {
                let session = ctx.session();
                let visits = session.get("visits").and_then(|v| v.as_u64()).unwrap_or(0) + 1;
                session.set("visits", visits);
                Ok(format!("visit #{visits}"))
            }),
        )?
        .websocket(
            "/chat/{room}",
            channel(|session, _| {
                let room = session.param("room").unwrap_or("lobby").to_string();
                session.send(format!("welcome to {room}"))?;
                session.on_text(move |_, text| Ok(format!("[{room}] {text}")));
                session.on_close(|session, reason| {
                    tracing::info!(channel = %session.id(), ?reason, "Chat left");
                });
                Ok(())
            }),
        )?;

    let dispatcher = sy.into_dispatcher();
    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    serve(listener, dispatcher).await?;
    Ok(())
}
