//! The two-phase PUT protocol: `prepare_put` allocates a receive port and
//! spawns `recv <port> | hash --stream > <tempfile>` under start-countdown
//! admission; `confirm_put` awaits that pipeline, verifies the checksum, and
//! atomically publishes the blob. Grounded on `s4/server.py`'s
//! `prepare_put_handler`/`confirm_put_handler`.

use crate::error::S4Error;
use crate::jobs::{Direction, JobId};
use crate::node::Node;
use crate::pipeline::{run_shell_blocking, PipelineOutcome};
use crate::pool::PoolHandle;
use crate::routing;
use std::sync::Mutex;

/// Pending pipeline handles, keyed by job id, so `confirm_put`/`confirm_get`
/// can await the result of the pipeline `prepare_put`/`prepare_get` admitted
/// earlier. Lives alongside the job table; both are mutated only from
/// request-handling tasks.
#[derive(Default)]
pub struct PendingPipelines {
    handles: Mutex<std::collections::HashMap<JobId, PoolHandle<PipelineOutcome>>>,
}

impl PendingPipelines {
    pub fn new() -> PendingPipelines {
        PendingPipelines::default()
    }

    pub fn insert(&self, id: JobId, handle: PoolHandle<PipelineOutcome>) {
        self.handles.lock().expect("pending pipelines lock poisoned").insert(id, handle);
    }

    pub fn take(&self, id: JobId) -> Option<PoolHandle<PipelineOutcome>> {
        self.handles.lock().expect("pending pipelines lock poisoned").remove(&id)
    }
}

pub struct PreparePutResult {
    pub job_id: JobId,
    pub port: u16,
}

/// `prepare_put(key)`: reject non-local/malformed keys, verify the key does
/// not already exist (on the single-writer pool), allocate a port and
/// tempfile, and submit the receive pipeline to the IO-recv pool.
pub async fn prepare_put(node: &Node, pipelines: &PendingPipelines, key: &str) -> Result<PreparePutResult, S4Error> {
    let _ = routing::validate_key(key)?;
    if !routing::is_local(key, &node.roster)? {
        return Err(S4Error::malformed(format!("key '{key}' is not owned by this node"), "put"));
    }

    let on_disk_path = routing::on_disk_path(&node.data_root, key)?;
    let checksum_path = routing::checksum_path(&on_disk_path);

    {
        let data_path = on_disk_path.clone();
        let sidecar_path = checksum_path.clone();
        let exists = node
            .pools
            .single_writer
            .submit(node.timeout, move |started| {
                started.signal();
                data_path.exists() || sidecar_path.exists()
            })
            .await?
            .join()
            .await?;
        if exists {
            return Err(S4Error::already_exists(format!("key '{key}' already exists"), "put"));
        }
    }

    node.ensure_work_dirs()?;
    let port = node.ports.allocate()?;
    let tempfile_path = node.new_temp_path();

    let cmd = format!("recv {port} | hash --stream > {}", tempfile_path.display());
    let handle = match node.pools.io_recv.submit(node.timeout, move |started| run_shell_blocking(&cmd, started)).await {
        Ok(handle) => handle,
        Err(e) => {
            node.ports.release(port);
            let _ = std::fs::remove_file(&tempfile_path);
            return Err(e);
        }
    };

    let job_id = node.jobs.insert_with_port(Direction::Put, key.to_string(), on_disk_path, Some(tempfile_path), Some(port));
    pipelines.insert(job_id, handle);

    Ok(PreparePutResult { job_id, port })
}

/// `confirm_put(job_id, client_checksum)`: awaits the receive pipeline,
/// asserts the checksums agree, and on the single-writer pool re-verifies
/// the key is still absent, writes the sidecar, and renames the tempfile
/// into place.
pub async fn confirm_put(node: &Node, pipelines: &PendingPipelines, job_id: JobId, client_checksum: &str) -> Result<(), S4Error> {
    let job = node
        .jobs
        .get(job_id)
        .ok_or_else(|| S4Error::malformed(format!("unknown job id '{job_id}'"), "put"))?;
    if job.direction != Direction::Put {
        return Err(S4Error::malformed(format!("job '{job_id}' is not a PUT job"), "put"));
    }
    let tempfile_path = job
        .tempfile_path
        .clone()
        .ok_or_else(|| S4Error::internal("PUT job missing tempfile path", "put"))?;

    let handle = pipelines
        .take(job_id)
        .ok_or_else(|| S4Error::internal(format!("no pending pipeline for job '{job_id}'"), "put"))?;
    let outcome = handle.join().await?;

    let cleanup = |path: &std::path::Path, sidecar: &std::path::Path, temp: &std::path::Path| {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(sidecar);
        let _ = std::fs::remove_file(temp);
    };

    if let Some(port) = job.port {
        node.ports.release(port);
    }
    node.jobs.remove(job_id);

    let sidecar_path = routing::checksum_path(&job.on_disk_path);

    if !outcome.success {
        cleanup(&job.on_disk_path, &sidecar_path, &tempfile_path);
        return Err(S4Error::integrity(
            format!("receive pipeline exited {}: {}", outcome.exit_code, outcome.stderr),
            "put",
        ));
    }
    if outcome.checksum != client_checksum {
        cleanup(&job.on_disk_path, &sidecar_path, &tempfile_path);
        return Err(S4Error::integrity(
            format!("checksum mismatch: server={} client={}", outcome.checksum, client_checksum),
            "put",
        ));
    }

    let data_path = job.on_disk_path.clone();
    let sidecar_for_write = sidecar_path.clone();
    let checksum = outcome.checksum.clone();
    let tempfile_for_rename = tempfile_path.clone();

    let result: Result<(), S4Error> = node
        .pools
        .single_writer
        .submit(node.timeout, move |started| {
            started.signal();
            publish_blob(&tempfile_for_rename, &data_path, &sidecar_for_write, &checksum)
        })
        .await?
        .join()
        .await?;

    if let Err(ref e) = result {
        // The pre-write check found the key now exists: someone else's blob
        // and sidecar are the ones visible now, only our tempfile is ours
        // to reclaim.
        if matches!(e.kind, crate::error::S4ErrorKind::AlreadyExists) {
            let _ = std::fs::remove_file(&tempfile_path);
        } else {
            cleanup(&job.on_disk_path, &sidecar_path, &tempfile_path);
        }
    }
    result
}

/// Publishes an already-on-disk file (a `map`/`map_to_n`/`map_from_n`
/// scratch output) to `out_key` via the same create-only, single-writer
/// discipline `confirm_put` uses, without the job table or a network
/// pipeline since the bytes already live on this node's filesystem.
pub async fn publish_local_file(node: &Node, out_key: &str, source_path: &std::path::Path) -> Result<(), S4Error> {
    let data_path = routing::on_disk_path(&node.data_root, out_key)?;
    let sidecar_path = routing::checksum_path(&data_path);
    let checksum = crate::checksum::hash_bytes(&std::fs::read(source_path)?);
    let source = source_path.to_path_buf();

    node.pools
        .single_writer
        .submit(node.timeout, move |started| {
            started.signal();
            publish_blob(&source, &data_path, &sidecar_path, &checksum)
        })
        .await?
        .join()
        .await?
}

fn publish_blob(tempfile: &std::path::Path, data_path: &std::path::Path, sidecar_path: &std::path::Path, checksum: &str) -> Result<(), S4Error> {
    if data_path.exists() {
        return Err(S4Error::already_exists("key appeared during confirm", "put"));
    }
    if let Some(parent) = data_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| S4Error::internal(e.to_string(), "put"))?;
    }
    std::fs::write(sidecar_path, checksum).map_err(|e| S4Error::internal(e.to_string(), "put"))?;
    std::fs::rename(tempfile, data_path).map_err(|e| S4Error::internal(e.to_string(), "put"))?;

    let mut perms = std::fs::metadata(data_path).map_err(|e| S4Error::internal(e.to_string(), "put"))?.permissions();
    perms.set_readonly(true);
    let _ = std::fs::set_permissions(data_path, perms);

    let mut sidecar_perms = std::fs::metadata(sidecar_path).map_err(|e| S4Error::internal(e.to_string(), "put"))?.permissions();
    sidecar_perms.set_readonly(true);
    let _ = std::fs::set_permissions(sidecar_path, sidecar_perms);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolSizes, Roster};
    use logger::logger::Logger;
    use std::time::Duration;

    fn test_node(dir: &std::path::Path) -> std::sync::Arc<Node> {
        let roster = Roster::from_entries(vec![("0.0.0.0".to_string(), 8000)]);
        Node::new(
            dir.to_path_buf(),
            roster,
            PoolSizes {
                io_send: 2,
                io_recv: 2,
                compute: 2,
                misc: 2,
                single_writer: 1,
            },
            Duration::from_secs(5),
            Logger::null(),
        )
    }

    #[tokio::test]
    async fn prepare_put_rejects_malformed_key() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path());
        let pipelines = PendingPipelines::new();
        let err = prepare_put(&node, &pipelines, "not-a-key").await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn prepare_put_rejects_existing_key() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path());
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("b/f.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("b/f.txt.xxh3"), b"deadbeefdeadbeef").unwrap();
        let pipelines = PendingPipelines::new();
        let err = prepare_put(&node, &pipelines, "s4://b/f.txt").await.unwrap_err();
        assert_eq!(err.status_code(), 409);
    }
}
