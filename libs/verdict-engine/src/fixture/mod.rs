//! Ephemeral data fixtures
//!
//! A request may ask for a throwaway data store. The provider stands it up,
//! loads seed data and hands back a connection descriptor; the orchestrator
//! tears it down exactly once after the last test case.

mod document;
mod relational;

pub use document::{DocumentFixture, SEED_COLLECTION, SEED_DATABASE};
pub use relational::{run_statement, RelationalFixture};

use crate::config::EngineSettings;
use crate::error::ExecutionError;
use crate::workspace::Workspace;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use verdict_common::types::DatabaseKind;

/// A live fixture owned by one request
pub enum Fixture {
    Document(DocumentFixture),
    Relational(RelationalFixture),
}

impl Fixture {
    pub fn connection(&self) -> &str {
        match self {
            Fixture::Document(f) => f.connection(),
            Fixture::Relational(f) => f.connection(),
        }
    }

    pub fn kind(&self) -> DatabaseKind {
        match self {
            Fixture::Document(_) => DatabaseKind::MongoDb,
            Fixture::Relational(f) => f.kind(),
        }
    }

    /// Database file backing a relational fixture
    pub fn relational_path(&self) -> Option<&Path> {
        match self {
            Fixture::Relational(f) => Some(f.path()),
            Fixture::Document(_) => None,
        }
    }

    /// Stop the store. Failures are logged, never propagated.
    pub async fn teardown(self) {
        let kind = self.kind();
        let result = match self {
            Fixture::Document(f) => f.teardown().await,
            Fixture::Relational(f) => f.teardown(),
        };

        match result {
            Ok(()) => info!(kind = %kind, "Fixture torn down"),
            Err(e) => warn!(kind = %kind, error = %format!("{:#}", e), "Fixture teardown failed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FixtureProvider {
    mongod_bin: String,
    startup_timeout: Duration,
}

impl FixtureProvider {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            mongod_bin: settings.mongod_bin.clone(),
            startup_timeout: settings.fixture_startup_timeout,
        }
    }

    /// Resolve a requested kind name
    pub fn parse_kind(kind: &str) -> Result<DatabaseKind, ExecutionError> {
        DatabaseKind::from_str(kind).ok_or_else(|| ExecutionError::UnsupportedDatabaseKind {
            kind: kind.to_string(),
        })
    }

    /// Stand up and seed a fixture of `kind` inside `workspace`
    pub async fn provision(
        &self,
        kind: DatabaseKind,
        seed: Option<&Value>,
        workspace: &Workspace,
    ) -> Result<Fixture, ExecutionError> {
        info!(workspace_id = %workspace.id(), kind = %kind, seeded = seed.is_some(), "Provisioning fixture");

        let result = match kind {
            DatabaseKind::MongoDb => {
                DocumentFixture::start(&self.mongod_bin, self.startup_timeout, seed, workspace)
                    .await
                    .map(Fixture::Document)
            }
            DatabaseKind::Sqlite | DatabaseKind::MySql => RelationalFixture::start(kind, seed, workspace)
                .await
                .map(Fixture::Relational),
        };

        result.map_err(|source| ExecutionError::FixtureSetup {
            kind: kind.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::ScratchRoot;
    use serde_json::json;

    #[test]
    fn test_parse_kind() {
        assert_eq!(FixtureProvider::parse_kind("sqlite").unwrap(), DatabaseKind::Sqlite);
        let err = FixtureProvider::parse_kind("cassandra").unwrap_err();
        assert!(matches!(err, ExecutionError::UnsupportedDatabaseKind { ref kind } if kind == "cassandra"));
    }

    #[tokio::test]
    async fn test_bad_seed_is_fixture_failure() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchRoot::init(dir.path()).unwrap();
        let workspace = scratch.create().await.unwrap();
        let provider = FixtureProvider::new(&EngineSettings::default());

        let seed = json!({ "schema": "CREATE TABLE", "rows": [] });
        let err = provider
            .provision(DatabaseKind::Sqlite, Some(&seed), &workspace)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ExecutionError::FixtureSetup { .. }));

        workspace.destroy().await;
    }

    #[tokio::test]
    async fn test_relational_kinds_share_engine() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchRoot::init(dir.path()).unwrap();
        let workspace = scratch.create().await.unwrap();
        let provider = FixtureProvider::new(&EngineSettings::default());
        let seed = json!({ "schema": "CREATE TABLE t(x INT)", "rows": ["INSERT INTO t VALUES (7)"] });

        for kind in [DatabaseKind::Sqlite, DatabaseKind::MySql] {
            let fixture = provider.provision(kind, Some(&seed), &workspace).await.unwrap();
            assert!(fixture.connection().starts_with(kind.scheme()));
            let rows = run_statement(fixture.relational_path().unwrap(), "SELECT x FROM t", None).unwrap();
            assert_eq!(rows, r#"[{"x":7}]"#);
            fixture.teardown().await;
        }

        workspace.destroy().await;
    }
}
