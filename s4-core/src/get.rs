//! The two-phase GET protocol, mirror of PUT: `prepare_get` verifies the
//! blob exists and spawns `hash --stream < <path> | send <addr> <port>`
//! under start-countdown admission; `confirm_get` awaits the pipeline and
//! asserts all three checksums (sidecar, server-computed, client-presented)
//! agree.

use crate::error::S4Error;
use crate::jobs::{Direction, JobId};
use crate::node::Node;
use crate::pipeline::run_shell_blocking;
use crate::put::PendingPipelines;
use crate::routing;

/// `prepare_get(key, client_address, client_port)`: reject non-local keys
/// or missing blobs, read the sidecar checksum, and submit the send
/// pipeline to the IO-send pool.
pub async fn prepare_get(node: &Node, pipelines: &PendingPipelines, key: &str, client_address: &str, client_port: u16) -> Result<JobId, S4Error> {
    let _ = routing::validate_key(key)?;
    if !routing::is_local(key, &node.roster)? {
        return Err(S4Error::malformed(format!("key '{key}' is not owned by this node"), "get"));
    }

    let on_disk_path = routing::on_disk_path(&node.data_root, key)?;
    let sidecar_path = routing::checksum_path(&on_disk_path);

    if !on_disk_path.exists() || !sidecar_path.exists() {
        return Err(S4Error::not_found(format!("key '{key}' not found"), "get"));
    }
    let disk_checksum = std::fs::read_to_string(&sidecar_path).map_err(|e| S4Error::internal(e.to_string(), "get"))?;
    let disk_checksum = disk_checksum.trim().to_string();

    let cmd = format!("hash --stream < {} | send {client_address} {client_port}", on_disk_path.display());
    let handle = node.pools.io_send.submit(node.timeout, move |started| run_shell_blocking(&cmd, started)).await?;

    let job_id = node.jobs.insert(Direction::Get, key.to_string(), on_disk_path, None);
    node.jobs.set_disk_checksum(job_id, disk_checksum);
    pipelines.insert(job_id, handle);

    Ok(job_id)
}

/// `confirm_get(job_id, client_checksum)`: awaits the send pipeline,
/// requires a zero exit and that the server-computed checksum equals both
/// the sidecar's recorded checksum and the checksum the client presents.
pub async fn confirm_get(node: &Node, pipelines: &PendingPipelines, job_id: JobId, client_checksum: &str) -> Result<(), S4Error> {
    let job = node
        .jobs
        .get(job_id)
        .ok_or_else(|| S4Error::malformed(format!("unknown job id '{job_id}'"), "get"))?;
    if job.direction != Direction::Get {
        return Err(S4Error::malformed(format!("job '{job_id}' is not a GET job"), "get"));
    }
    let disk_checksum = job
        .disk_checksum
        .clone()
        .ok_or_else(|| S4Error::internal("GET job missing disk checksum", "get"))?;

    let handle = pipelines
        .take(job_id)
        .ok_or_else(|| S4Error::internal(format!("no pending pipeline for job '{job_id}'"), "get"))?;
    let outcome = handle.join().await?;

    node.jobs.remove(job_id);

    if !outcome.success {
        return Err(S4Error::integrity(
            format!("send pipeline exited {}: {}", outcome.exit_code, outcome.stderr),
            "get",
        ));
    }
    if outcome.checksum != disk_checksum || outcome.checksum != client_checksum {
        return Err(S4Error::integrity(
            format!(
                "checksum mismatch: disk={disk_checksum} server={} client={client_checksum}",
                outcome.checksum
            ),
            "get",
        ));
    }

    Ok(())
}
