//! The transfer job table: in-memory state for in-flight PUT/GET transfers.
//! Job ids are 128-bit random values, hex-encoded, following the same
//! random-id-then-hex-encode shape as the teacher's node identifiers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId([u8; 16]);

impl JobId {
    pub fn new() -> JobId {
        let mut bytes = [0u8; 16];
        rand::fill(&mut bytes);
        JobId(bytes)
    }

    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<JobId> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 16] = bytes.try_into().ok()?;
        Some(JobId(arr))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Put,
    Get,
}

/// In-memory record for an in-flight transfer. `tempfile_path` and `port`
/// are only meaningful for PUT; `disk_checksum` only for GET.
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub id: JobId,
    pub created_at: u64,
    pub direction: Direction,
    pub key: String,
    pub on_disk_path: PathBuf,
    pub tempfile_path: Option<PathBuf>,
    pub disk_checksum: Option<String>,
    pub port: Option<u16>,
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// The process-wide job table. Mutated only from request-handling tasks and
/// the GC loop; every other piece of shared state lives on the filesystem,
/// mediated by the single-writer pool.
#[derive(Default)]
pub struct JobTable {
    jobs: RwLock<HashMap<JobId, TransferJob>>,
}

impl JobTable {
    pub fn new() -> JobTable {
        JobTable {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(
        &self,
        direction: Direction,
        key: String,
        on_disk_path: PathBuf,
        tempfile_path: Option<PathBuf>,
    ) -> JobId {
        self.insert_with_port(direction, key, on_disk_path, tempfile_path, None)
    }

    pub fn insert_with_port(
        &self,
        direction: Direction,
        key: String,
        on_disk_path: PathBuf,
        tempfile_path: Option<PathBuf>,
        port: Option<u16>,
    ) -> JobId {
        let job = TransferJob {
            id: JobId::new(),
            created_at: now_secs(),
            direction,
            key,
            on_disk_path,
            tempfile_path,
            disk_checksum: None,
            port,
        };
        let id = job.id;
        self.jobs.write().expect("job table lock poisoned").insert(id, job);
        id
    }

    pub fn get(&self, id: JobId) -> Option<TransferJob> {
        self.jobs.read().expect("job table lock poisoned").get(&id).cloned()
    }

    pub fn remove(&self, id: JobId) -> Option<TransferJob> {
        self.jobs.write().expect("job table lock poisoned").remove(&id)
    }

    pub fn set_disk_checksum(&self, id: JobId, checksum: String) {
        if let Some(job) = self.jobs.write().expect("job table lock poisoned").get_mut(&id) {
            job.disk_checksum = Some(checksum);
        }
    }

    /// Jobs whose creation timestamp is older than `max_age_secs`, for the
    /// GC loop's first sweep.
    pub fn expired(&self, max_age_secs: u64) -> Vec<TransferJob> {
        let now = now_secs();
        self.jobs
            .read()
            .expect("job table lock poisoned")
            .values()
            .filter(|j| now.saturating_sub(j.created_at) > max_age_secs)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().expect("job table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A set of TCP ports currently allocated to transfers, guarded by a mutex
/// since it's mutated only from the event-loop thread alongside the job
/// table per spec.md §5.
#[derive(Default)]
pub struct PortSet {
    in_use: Mutex<std::collections::HashSet<u16>>,
}

impl PortSet {
    pub fn new() -> PortSet {
        PortSet::default()
    }

    /// Binds an OS-assigned ephemeral port and records it as in use.
    pub fn allocate(&self) -> std::io::Result<u16> {
        let listener = std::net::TcpListener::bind("0.0.0.0:0")?;
        let port = listener.local_addr()?.port();
        drop(listener);
        self.in_use.lock().expect("port set lock poisoned").insert(port);
        Ok(port)
    }

    pub fn release(&self, port: u16) {
        self.in_use.lock().expect("port set lock poisoned").remove(&port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_unique() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn hex_roundtrip() {
        let id = JobId::new();
        let hex = id.as_hex();
        assert_eq!(JobId::from_hex(&hex), Some(id));
    }

    #[test]
    fn insert_get_remove() {
        let table = JobTable::new();
        let id = table.insert(Direction::Put, "s4://b/f".to_string(), PathBuf::from("/data/b/f"), Some(PathBuf::from("/tmp/x")));
        assert!(table.get(id).is_some());
        assert_eq!(table.len(), 1);
        let removed = table.remove(id);
        assert!(removed.is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn port_allocation_and_release() {
        let ports = PortSet::new();
        let p = ports.allocate().unwrap();
        assert!(p > 0);
        ports.release(p);
    }
}
