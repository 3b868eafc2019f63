//! Background sweep loop, run every five seconds on the misc pool.
//! Grounded on `redis_node/src/cluster/hilo_ping_pong.rs`'s
//! spawn/loop/sleep/sweep shape, adapted to the async runtime this node
//! already shares with the HTTP surface.

use crate::node::Node;
use crate::put::PendingPipelines;
use crate::routing::checksum_path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const GC_INTERVAL: Duration = Duration::from_secs(5);
const TEMPFILE_GRACE: Duration = Duration::from_secs(60);

/// Spawns the GC loop on the current tokio runtime, supervised so that a
/// panic inside any sweep takes the whole process down: Tokio's task
/// executor catches unwinds around a task's poll, so an unsupervised loop
/// would just stop ticking forever while the process kept serving requests.
/// A storage node is not allowed to silently leak.
pub fn spawn(node: Arc<Node>, pipelines: Arc<PendingPipelines>) -> tokio::task::JoinHandle<()> {
    let logger = node.logger.clone();
    let loop_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(GC_INTERVAL);
        loop {
            ticker.tick().await;
            run_once(&node, &pipelines);
        }
    });
    tokio::spawn(supervise(loop_handle, logger))
}

/// Awaits the GC loop's `JoinHandle`; the loop itself never returns, so
/// reaching here means it panicked. Logs the panic and aborts the process
/// rather than letting the panic be swallowed.
async fn supervise(loop_handle: tokio::task::JoinHandle<()>, logger: logger::logger::Logger) {
    if let Err(e) = loop_handle.await {
        logger.error(&format!("gc loop panicked, aborting process: {e}"), "gc");
        std::process::abort();
    }
}

fn run_once(node: &Node, pipelines: &PendingPipelines) {
    sweep_expired_jobs(node, pipelines);
    sweep_stale_dir(&node.tempfiles_dir(), node.timeout, false);
    sweep_stale_dir(&node.tempdirs_dir(), node.timeout, true);
}

fn sweep_expired_jobs(node: &Node, pipelines: &PendingPipelines) {
    for job in node.jobs.expired(node.timeout.as_secs()) {
        node.logger.warn(&format!("gc reclaiming abandoned job '{}'", job.id), "gc");
        node.jobs.remove(job.id);
        let _ = pipelines.take(job.id);
        if let Some(port) = job.port {
            node.ports.release(port);
        }
        if let Some(tempfile) = job.tempfile_path {
            let _ = std::fs::remove_file(&tempfile);
            let _ = std::fs::remove_file(checksum_path(&tempfile));
        }
    }
}

fn sweep_stale_dir(dir: &std::path::Path, timeout: Duration, is_tempdirs: bool) {
    let bound = timeout * 2 + TEMPFILE_GRACE;
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in read_dir.flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let age = SystemTime::now().duration_since(modified).unwrap_or(Duration::ZERO);
        if age <= bound {
            continue;
        }
        let path = entry.path();
        if is_tempdirs {
            let _ = std::fs::remove_dir_all(&path);
        } else {
            let _ = std::fs::remove_file(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolSizes, Roster};
    use logger::logger::Logger;

    fn test_node(dir: &std::path::Path, timeout: Duration) -> Arc<Node> {
        let roster = Roster::from_entries(vec![("0.0.0.0".to_string(), 8000)]);
        Node::new(
            dir.to_path_buf(),
            roster,
            PoolSizes {
                io_send: 1,
                io_recv: 1,
                compute: 1,
                misc: 1,
                single_writer: 1,
            },
            timeout,
            Logger::null(),
        )
    }

    #[test]
    fn sweeps_stale_tempfiles_past_the_grace_bound() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path(), Duration::from_secs(0));
        node.ensure_work_dirs().unwrap();
        let stale = node.tempfiles_dir().join("old");
        std::fs::write(&stale, b"x").unwrap();

        let old_time = SystemTime::now() - Duration::from_secs(600);
        filetime::set_file_mtime(&stale, filetime::FileTime::from_system_time(old_time)).unwrap();

        sweep_stale_dir(&node.tempfiles_dir(), node.timeout, false);
        assert!(!stale.exists());
    }

    #[test]
    fn leaves_fresh_tempfiles_alone() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path(), Duration::from_secs(300));
        node.ensure_work_dirs().unwrap();
        let fresh = node.tempfiles_dir().join("fresh");
        std::fs::write(&fresh, b"x").unwrap();

        sweep_stale_dir(&node.tempfiles_dir(), node.timeout, false);
        assert!(fresh.exists());
    }
}
