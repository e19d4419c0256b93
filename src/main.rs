use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use llmc::application::application::Application;
use llmc::application::config::configuration::Configuration;
use llmc::daemon::{Daemon, RepoContext};
use llmc::db::SqlDb;
use tracing::{info, warn};

/// Lowers this process's scheduling priority (spec §4.8 step 1: "nice
/// +10"). Failure is ignored — unprivileged containers and some CI
/// sandboxes disallow it, and the daemon is still correct, just not as
/// considerate a neighbor.
#[cfg(unix)]
fn lower_process_priority(nice_level: i32) {
    // SAFETY: nice(2) has no preconditions beyond a valid delta; a
    // negative return only means the call failed, which we deliberately
    // ignore per spec.
    let result = unsafe { libc::nice(nice_level as libc::c_int) };
    if result == -1 {
        warn!(nice_level, "failed to lower process priority, continuing at current niceness");
    }
}

#[cfg(not(unix))]
fn lower_process_priority(_nice_level: i32) {}

fn install_signal_handlers(running: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        info!("shutdown signal received");
        running.store(false, Ordering::Relaxed);
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Configuration::default();
    Application::install_logging(&config);
    let _app = Application::initialize(config.clone()).await;

    lower_process_priority(config.daemon.nice_level);

    let repo_roots: Vec<_> = std::env::args().skip(1).map(std::path::PathBuf::from).collect();
    let repo_roots = if repo_roots.is_empty() {
        vec![std::env::current_dir()?]
    } else {
        repo_roots
    };

    let mut daemon = Daemon::new(config.clone(), Default::default(), Default::default());
    let locks = daemon.locks();

    let mut repos = Vec::with_capacity(repo_roots.len());
    for root in repo_roots {
        let root = std::fs::canonicalize(&root)?;
        let logical_name = root.to_string_lossy().to_string();
        let db_path = root.join(".llmc").join("rag").join("rag.db");
        let db = SqlDb::connect(&db_path, &logical_name, Arc::clone(&locks)).await?;
        repos.push(RepoContext::new(root, Arc::new(db), &config));
    }

    let running = Arc::new(AtomicBool::new(true));
    install_signal_handlers(Arc::clone(&running));

    info!(repos = repos.len(), "daemon starting");
    daemon.run(&repos, running).await;
    info!("daemon stopped");

    Ok(())
}
