//! Long-running model server processes.

use crate::config::ServeConfig;
use crate::error::{NidamError, Result};
use crate::platform;
use crate::process::CommandSpec;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Grace period between SIGINT and kill.
const STOP_GRACE: Duration = Duration::from_secs(30);

/// A spawned model server.
///
/// Output is always drained so the child never blocks on a full pipe. Lines
/// go to the debug log until [`ServerProcess::echo_output`] is switched on.
pub struct ServerProcess {
    child: Child,
    port: u16,
    echo: Arc<AtomicBool>,
    drains: Vec<JoinHandle<()>>,
}

impl ServerProcess {
    /// Spawn `spec` as a server expected to listen on `port`.
    pub fn spawn(spec: &CommandSpec, port: u16) -> Result<Self> {
        info!("$ {}", spec.display());
        let mut cmd = spec.to_command();
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| NidamError::Other(format!("Failed to start {}: {}", spec.program, e)))?;
        info!("Model server started (pid {:?})", child.id());

        let echo = Arc::new(AtomicBool::new(false));
        let mut drains = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            drains.push(tokio::spawn(drain(stdout, "stdout", echo.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(tokio::spawn(drain(stderr, "stderr", echo.clone())));
        }

        Ok(Self {
            child,
            port,
            echo,
            drains,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Forward server output to the info log.
    pub fn echo_output(&self, on: bool) {
        self.echo.store(on, Ordering::Relaxed);
    }

    /// Poll the readiness endpoint once per interval, at most `attempts` times.
    ///
    /// Output is echoed once [`ServeConfig::STREAM_OUTPUT_AFTER`] has passed
    /// without success and silenced again when the server becomes ready.
    pub async fn wait_until_ready(&mut self, client: &reqwest::Client, attempts: u32) -> Result<()> {
        let url = format!("{}{}", self.base_url(), ServeConfig::READY_PATH);
        let started = Instant::now();

        for attempt in 0..attempts {
            if let Some(status) = self.child.try_wait()? {
                return Err(NidamError::CommandFailed {
                    program: "model server".to_string(),
                    status: status.to_string(),
                    stderr: String::new(),
                });
            }

            if probe_ready(client, &url).await {
                debug!("Server ready after {} attempt(s)", attempt + 1);
                self.echo_output(false);
                return Ok(());
            }

            if started.elapsed() > ServeConfig::STREAM_OUTPUT_AFTER {
                self.echo_output(true);
            }
            tokio::time::sleep(ServeConfig::READY_POLL_INTERVAL).await;
        }

        Err(NidamError::ServerNotReady { port: self.port })
    }

    /// Interrupt the server and wait for it to exit.
    pub async fn stop(mut self) -> Result<()> {
        info!("Stopping model server...");
        platform::interrupt_child(&mut self.child, STOP_GRACE).await?;
        for handle in self.drains.drain(..) {
            handle.abort();
        }
        info!("Stopped model server");
        Ok(())
    }

    /// Wait for the server to exit on its own.
    pub async fn wait(mut self) -> Result<std::process::ExitStatus> {
        Ok(self.child.wait().await?)
    }
}

/// One readiness probe. Any transport error counts as "not yet".
pub async fn probe_ready(client: &reqwest::Client, url: &str) -> bool {
    match client
        .get(url)
        .timeout(ServeConfig::HEALTH_REQUEST_TIMEOUT)
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            debug!("Readiness probe failed: {}", e);
            false
        }
    }
}

async fn drain<R>(stream: R, name: &'static str, echo: Arc<AtomicBool>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if echo.load(Ordering::Relaxed) {
                    info!(target: "nidam::server", "[{}] {}", name, line);
                } else {
                    debug!(target: "nidam::server", "[{}] {}", name, line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read server {}: {}", name, e);
                break;
            }
        }
    }
}
