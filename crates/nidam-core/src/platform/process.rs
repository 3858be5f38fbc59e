//! Platform-specific process control.

use crate::error::{NidamError, Result};
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, warn};

/// Ask a child to stop the way a terminal Ctrl-C would, then wait for it.
///
/// # Platform Behavior
/// - **Linux/macOS**: Sends SIGINT and waits up to `grace`, then kills
/// - **Windows**: No console signal can be targeted, so the child is killed
pub async fn interrupt_child(child: &mut Child, grace: Duration) -> Result<()> {
    let Some(pid) = child.id() else {
        debug!("Child already exited");
        return Ok(());
    };

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        debug!("Sending SIGINT to process {}", pid);
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
            if e != nix::errno::Errno::ESRCH {
                warn!("Failed to send SIGINT to {}: {}", pid, e);
            }
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!("Process {} exited with {}", pid, status);
                return Ok(());
            }
            Err(_) => {
                warn!("Process {} ignored SIGINT for {:?}, killing", pid, grace);
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = grace;
        debug!("Killing process {}", pid);
    }

    child
        .kill()
        .await
        .map_err(|e| NidamError::Other(format!("Failed to kill process {}: {}", pid, e)))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_interrupt_stops_sleeping_child() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();

        interrupt_child(&mut child, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(child.try_wait().unwrap().is_some());
    }
}
