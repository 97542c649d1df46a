// Embedded relational fixture
//
// Both relational kinds share this engine. The database is file-backed inside
// the workspace so subprocess candidates can open the descriptor directly.

use crate::workspace::Workspace;
use anyhow::{anyhow, bail, Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::debug;
use verdict_common::types::{DatabaseKind, RelationalSeed};

pub struct RelationalFixture {
    kind: DatabaseKind,
    path: PathBuf,
    connection: String,
    handle: Option<Connection>,
}

impl RelationalFixture {
    pub async fn start(kind: DatabaseKind, seed: Option<&Value>, workspace: &Workspace) -> Result<Self> {
        let seed = parse_seed(seed)?;
        let dir = workspace.ensure_internal_dir().await?;
        let path = dir.join(format!("{}-fixture.db", kind.scheme()));

        let db_path = path.clone();
        let handle = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&db_path)
                .with_context(|| format!("Failed to open {}", db_path.display()))?;
            apply_seed(&conn, &seed)?;
            Ok(conn)
        })
        .await
        .context("Seeding task panicked")??;

        let connection = descriptor(kind, &path);
        debug!(kind = %kind, connection = %connection, "Relational fixture ready");

        Ok(Self {
            kind,
            path,
            connection,
            handle: Some(handle),
        })
    }

    pub fn kind(&self) -> DatabaseKind {
        self.kind
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn teardown(mut self) -> Result<()> {
        if let Some(conn) = self.handle.take() {
            conn.close()
                .map_err(|(_, e)| e)
                .context("Failed to close relational fixture")?;
        }
        Ok(())
    }
}

/// `sqlite:///abs/path/to.db` or `mysql:///abs/path/to.db`
pub fn descriptor(kind: DatabaseKind, path: &Path) -> String {
    format!("{}://{}", kind.scheme(), path.display())
}

fn parse_seed(seed: Option<&Value>) -> Result<RelationalSeed> {
    match seed {
        None | Some(Value::Null) => Ok(RelationalSeed::default()),
        Some(value @ Value::Object(_)) => serde_json::from_value(value.clone())
            .context("Relational seed must look like { schema: string, rows: [string] }"),
        Some(_) => bail!("Relational seed must be an object with schema and rows"),
    }
}

/// Schema first, then each row statement in the order given
pub fn apply_seed(conn: &Connection, seed: &RelationalSeed) -> Result<()> {
    if let Some(schema) = seed.schema.as_deref().filter(|s| !s.trim().is_empty()) {
        conn.execute_batch(schema).context("Schema statement failed")?;
    }

    for (idx, row) in seed.rows.iter().enumerate() {
        conn.execute_batch(row)
            .with_context(|| format!("Row statement {} failed", idx + 1))?;
    }

    Ok(())
}

/// SQLite virtual-machine steps between deadline checks
const PROGRESS_CHECK_OPS: i32 = 1000;

/// Run one statement and render the result as JSON text
///
/// Queries yield an array of row objects keyed by column name; other
/// statements yield `{"changes": n}`. With a `deadline`, SQLite aborts the
/// statement once it passes.
pub fn run_statement(path: &Path, sql: &str, deadline: Option<Instant>) -> Result<String> {
    let conn = Connection::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    if let Some(deadline) = deadline {
        conn.progress_handler(PROGRESS_CHECK_OPS, Some(move || Instant::now() >= deadline));
    }

    render_statement(&conn, sql).map_err(|e| match deadline {
        Some(deadline) if Instant::now() >= deadline => anyhow!("Query exceeded the time limit"),
        _ => e,
    })
}

fn render_statement(conn: &Connection, sql: &str) -> Result<String> {
    let mut stmt = conn.prepare(sql)?;

    if stmt.column_count() == 0 {
        let changes = stmt.execute([])?;
        return Ok(serde_json::json!({ "changes": changes }).to_string());
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();

    while let Some(row) = rows.next()? {
        let mut object = Map::new();
        for (idx, column) in columns.iter().enumerate() {
            object.insert(column.clone(), to_json(row.get_ref(idx)?));
        }
        out.push(Value::Object(object));
    }

    Ok(Value::Array(out).to_string())
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
