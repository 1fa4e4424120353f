//! Docker container management for backend testing

use crate::connection::MySqlBackend;
use crate::endpoint::BackendEndpoint;
use anyhow::{Context, Result};
use shadow_core::Backend;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const TEST_PASSWORD: &str = "testpass";
const TEST_DATABASE: &str = "testdb";

/// A throwaway MySQL-protocol server running in Docker
pub struct DatabaseContainer {
    /// Container name
    pub container_name: String,
    /// Host port to bind to
    pub host_port: u16,
    /// Image name
    pub image_name: String,
    /// Port the server listens on inside the container
    container_port: u16,
    /// `-e` environment settings passed to `docker run`
    env: Vec<String>,
    /// Credentials and database the container is reachable with
    endpoint: BackendEndpoint,
}

impl DatabaseContainer {
    /// MySQL 8 with a `testdb` database and a root password
    pub fn mysql(container_name: &str, host_port: u16) -> Self {
        Self {
            container_name: container_name.to_string(),
            host_port,
            image_name: "mysql:8.0".to_string(),
            container_port: 3306,
            env: vec![
                format!("MYSQL_ROOT_PASSWORD={TEST_PASSWORD}"),
                format!("MYSQL_DATABASE={TEST_DATABASE}"),
            ],
            endpoint: endpoint(host_port, TEST_PASSWORD, TEST_DATABASE),
        }
    }

    /// MariaDB, useful as a candidate that diverges from MySQL in places
    pub fn mariadb(container_name: &str, host_port: u16) -> Self {
        Self {
            container_name: container_name.to_string(),
            host_port,
            image_name: "mariadb:11".to_string(),
            container_port: 3306,
            env: vec![
                format!("MARIADB_ROOT_PASSWORD={TEST_PASSWORD}"),
                format!("MARIADB_DATABASE={TEST_DATABASE}"),
            ],
            endpoint: endpoint(host_port, TEST_PASSWORD, TEST_DATABASE),
        }
    }

    /// Endpoint for connecting to the container
    pub fn endpoint(&self) -> BackendEndpoint {
        self.endpoint.clone()
    }

    /// Starts the container, replacing any stale one with the same name
    pub fn start(&self) -> Result<()> {
        info!(
            "Starting {} container: {}",
            self.image_name, self.container_name
        );
        self.remove_quietly();

        let port_mapping = format!("{}:{}", self.host_port, self.container_port);
        let mut args = vec!["run", "--name", self.container_name.as_str()];
        for setting in &self.env {
            args.push("-e");
            args.push(setting.as_str());
        }
        args.extend(["-p", port_mapping.as_str(), "-d", self.image_name.as_str()]);

        let output = Command::new("docker")
            .args(&args)
            .output()
            .context("Failed to start Docker container")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to start container: {stderr}");
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("Started container: {}", container_id);
        Ok(())
    }

    /// Waits until the server accepts connections and answers `SELECT 1`
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        info!("Waiting for {} to be ready...", self.container_name);
        let start = Instant::now();

        while start.elapsed() < timeout {
            match self.check_ready().await {
                Ok(()) => {
                    info!("{} is ready", self.container_name);
                    return Ok(());
                }
                Err(e) => {
                    debug!("Connection attempt failed: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        anyhow::bail!(
            "{} did not become ready within {:?}",
            self.container_name,
            timeout
        )
    }

    async fn check_ready(&self) -> Result<()> {
        let mut backend = MySqlBackend::new(self.endpoint(), Duration::from_secs(5));
        backend.connect().await.context("Failed to connect")?;
        let outcome = backend
            .query("SELECT 1")
            .await
            .context("Failed to execute readiness query")?;
        backend.close().await.ok();
        if let Some(failure) = outcome.as_failure() {
            anyhow::bail!("Probe query failed: {failure}");
        }
        Ok(())
    }

    /// Stops and removes the container
    pub fn stop(&self) -> Result<()> {
        info!("Stopping container: {}", self.container_name);

        for action in ["stop", "rm"] {
            let output = Command::new("docker")
                .args([action, self.container_name.as_str()])
                .output()
                .with_context(|| format!("Failed to {action} container"))?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                debug!("docker {} failed (may not exist): {}", action, stderr);
            }
        }

        info!("Container stopped and removed");
        Ok(())
    }

    fn remove_quietly(&self) {
        for action in ["stop", "rm"] {
            let _ = Command::new("docker")
                .args([action, self.container_name.as_str()])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }

    /// Gets logs from the container
    pub fn logs(&self) -> Result<String> {
        let output = Command::new("docker")
            .args(["logs", &self.container_name])
            .output()
            .context("Failed to get container logs")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(format!("STDOUT:\n{stdout}\n\nSTDERR:\n{stderr}"))
    }
}

fn endpoint(port: u16, pass: &str, database: &str) -> BackendEndpoint {
    BackendEndpoint {
        host: "127.0.0.1".to_string(),
        port,
        user: "root".to_string(),
        pass: pass.to_string(),
        database: database.to_string(),
        options: "charset=utf8mb4".to_string(),
    }
}

impl Drop for DatabaseContainer {
    fn drop(&mut self) {
        // Best effort cleanup
        let _ = self.stop();
    }
}
