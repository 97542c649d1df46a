// Document-store fixture backed by a throwaway mongod process

use crate::workspace::Workspace;
use anyhow::{anyhow, bail, Context, Result};
use mongodb::bson::{doc, Document};
use mongodb::options::ClientOptions;
use mongodb::Client;
use serde_json::Value;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Database and collection that seed documents are inserted into
pub const SEED_DATABASE: &str = "test";
pub const SEED_COLLECTION: &str = "data";

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const PING_TIMEOUT: Duration = Duration::from_millis(500);
const LAUNCH_ATTEMPTS: u32 = 3;

pub struct DocumentFixture {
    child: Child,
    connection: String,
}

impl DocumentFixture {
    pub async fn start(
        mongod_bin: &str,
        startup_timeout: Duration,
        seed: Option<&Value>,
        workspace: &Workspace,
    ) -> Result<Self> {
        let documents = parse_seed(seed)?;
        let internal = workspace.ensure_internal_dir().await?;

        // The reserved port is released before mongod binds it, so another
        // process can take it in between; a fresh port is tried in that case
        let mut attempt = 1;
        loop {
            let data_dir = internal.join(format!("mongo-{}", attempt));
            tokio::fs::create_dir_all(&data_dir)
                .await
                .context("Failed to create mongod data directory")?;

            let port = free_port()?;
            let mut fixture = Self::launch(mongod_bin, port, &data_dir)?;
            info!(port = port, pid = ?fixture.child.id(), attempt = attempt, "mongod fixture starting");

            let client = match fixture.wait_until_ready(startup_timeout).await {
                Ok(client) => client,
                Err(StartupFailure::Exited(status)) if attempt < LAUNCH_ATTEMPTS => {
                    warn!(port = port, attempt = attempt, %status, "mongod exited during startup, retrying");
                    attempt += 1;
                    continue;
                }
                Err(failure) => {
                    fixture.stop().await;
                    return Err(failure.into_error());
                }
            };

            if let Err(e) = seed_documents(&client, documents).await {
                fixture.stop().await;
                return Err(e);
            }
            client.shutdown().await;

            return Ok(fixture);
        }
    }

    fn launch(mongod_bin: &str, port: u16, data_dir: &Path) -> Result<Self> {
        let child = Command::new(mongod_bin)
            .arg("--port")
            .arg(port.to_string())
            .arg("--bind_ip")
            .arg("127.0.0.1")
            .arg("--dbpath")
            .arg(data_dir)
            .arg("--quiet")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to launch {}", mongod_bin))?;

        Ok(Self {
            child,
            connection: format!("mongodb://127.0.0.1:{}/", port),
        })
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    async fn wait_until_ready(&mut self, startup_timeout: Duration) -> Result<Client, StartupFailure> {
        let deadline = Instant::now() + startup_timeout;

        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => return Err(StartupFailure::Exited(status)),
                Ok(None) => {}
                Err(e) => return Err(StartupFailure::Other(e.into())),
            }

            match ping(&self.connection).await {
                Ok(client) => return Ok(client),
                Err(e) if Instant::now() >= deadline => {
                    return Err(StartupFailure::Other(e.context(format!(
                        "mongod not ready after {}ms",
                        startup_timeout.as_millis()
                    ))));
                }
                Err(_) => tokio::time::sleep(READY_POLL_INTERVAL).await,
            }
        }
    }

    async fn stop(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "Failed to stop mongod fixture");
        }
    }

    pub async fn teardown(mut self) -> Result<()> {
        self.child.kill().await.context("Failed to stop mongod fixture")
    }
}

/// Why a launched mongod never became ready
enum StartupFailure {
    /// The process died, typically because its port was taken
    Exited(ExitStatus),
    Other(anyhow::Error),
}

impl StartupFailure {
    fn into_error(self) -> anyhow::Error {
        match self {
            StartupFailure::Exited(status) => anyhow!("mongod exited during startup with {}", status),
            StartupFailure::Other(e) => e,
        }
    }
}

async fn seed_documents(client: &Client, documents: Vec<Document>) -> Result<()> {
    if documents.is_empty() {
        return Ok(());
    }

    let count = documents.len();
    client
        .database(SEED_DATABASE)
        .collection::<Document>(SEED_COLLECTION)
        .insert_many(documents)
        .await
        .context("Failed to insert seed documents")?;
    debug!(documents = count, "Document fixture seeded");
    Ok(())
}

async fn ping(uri: &str) -> Result<Client> {
    let mut options = ClientOptions::parse(uri).await?;
    options.server_selection_timeout = Some(PING_TIMEOUT);
    options.direct_connection = Some(true);

    let client = Client::with_options(options)?;
    client.database("admin").run_command(doc! { "ping": 1 }).await?;
    Ok(client)
}

fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).context("Failed to reserve a port")?;
    Ok(listener.local_addr()?.port())
}

/// Seed data must be an array of JSON objects
fn parse_seed(seed: Option<&Value>) -> Result<Vec<Document>> {
    match seed {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                if !item.is_object() {
                    bail!("Seed document {} is not an object", idx + 1);
                }
                mongodb::bson::to_document(item)
                    .with_context(|| format!("Seed document {} cannot be stored", idx + 1))
            })
            .collect(),
        Some(_) => bail!("Document seed must be an array of documents"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::ScratchRoot;
    use serde_json::json;

    #[test]
    fn test_parse_seed() {
        assert!(parse_seed(None).unwrap().is_empty());

        let docs = parse_seed(Some(&json!([{ "name": "ada", "age": 36 }, { "name": "alan" }]))).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].get_str("name").unwrap(), "ada");

        assert!(parse_seed(Some(&json!({ "name": "ada" }))).is_err());
        assert!(parse_seed(Some(&json!([1, 2]))).is_err());
    }

    #[test]
    fn test_free_port_is_nonzero() {
        assert_ne!(free_port().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_binary_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchRoot::init(dir.path()).unwrap();
        let workspace = scratch.create().await.unwrap();

        let result = DocumentFixture::start(
            "/nonexistent/mongod",
            Duration::from_millis(200),
            None,
            &workspace,
        )
        .await;
        assert!(result.is_err());

        workspace.destroy().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_retries_when_mongod_exits_early() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let calls = dir.path().join("calls");
        let bin = dir.path().join("fake-mongod");
        std::fs::write(&bin, format!("#!/bin/sh\necho \"$2\" >> {}\nexit 48\n", calls.display())).unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let scratch = ScratchRoot::init(dir.path().join("scratch")).unwrap();
        let workspace = scratch.create().await.unwrap();

        let result = DocumentFixture::start(bin.to_str().unwrap(), Duration::from_secs(5), None, &workspace).await;
        let err = result.err().unwrap();
        assert!(err.to_string().contains("exited during startup"), "{}", err);

        let ports = std::fs::read_to_string(&calls).unwrap();
        assert_eq!(ports.lines().count(), LAUNCH_ATTEMPTS as usize);
        assert!(ports.lines().all(|port| port.parse::<u16>().is_ok()));

        workspace.destroy().await;
    }

    #[tokio::test]
    #[ignore] // Requires mongod on PATH
    async fn test_mongod_fixture_seeds_documents() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchRoot::init(dir.path()).unwrap();
        let workspace = scratch.create().await.unwrap();

        let seed = json!([{ "sku": "a" }, { "sku": "b" }]);
        let fixture = DocumentFixture::start("mongod", Duration::from_secs(20), Some(&seed), &workspace)
            .await
            .unwrap();

        let client = Client::with_uri_str(fixture.connection()).await.unwrap();
        let count = client
            .database(SEED_DATABASE)
            .collection::<Document>(SEED_COLLECTION)
            .count_documents(doc! {})
            .await
            .unwrap();
        assert_eq!(count, 2);
        client.shutdown().await;

        fixture.teardown().await.unwrap();
        workspace.destroy().await;
    }
}
