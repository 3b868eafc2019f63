//! Loads the roster file and the environment-tunable knobs: pool sizes and
//! the transfer timeout. Read once per process, never hot-reloaded.

use crate::error::S4Error;
use std::fs;
use std::path::{Path, PathBuf};

/// An ordered list of `address:port` pairs. The entry for this node's own
/// address is rewritten to the loopback sentinel `0.0.0.0` at load time, so
/// that "is this my key" degenerates to a string comparison at every call
/// site instead of a per-request interface lookup.
#[derive(Debug, Clone)]
pub struct Roster {
    entries: Vec<(String, u16)>,
}

impl Roster {
    pub fn from_entries(entries: Vec<(String, u16)>) -> Self {
        Roster { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn address_at(&self, idx: usize) -> String {
        let (addr, port) = &self.entries[idx];
        format!("{addr}:{port}")
    }

    /// Index of the entry matching the loopback sentinel, if any local entry
    /// was found during load.
    pub fn local_index(&self) -> Option<usize> {
        self.entries.iter().position(|(addr, _)| addr == "0.0.0.0")
    }

    pub fn local_port(&self) -> Option<u16> {
        self.local_index().map(|i| self.entries[i].1)
    }

    /// Loads one `address:port` per non-blank line from `path`, rewriting
    /// whichever line matches a local interface address to `0.0.0.0`.
    ///
    /// Mirrors `s4/__init__.py`'s `servers()`: the config file is identical
    /// on every node and each node recognizes "itself" by checking its own
    /// local addresses against each line.
    pub fn load(path: &Path, local_addresses: &[String]) -> Result<Roster, S4Error> {
        let contents = fs::read_to_string(path).map_err(|e| {
            S4Error::internal(format!("failed to read roster file {path:?}: {e}"), "config")
        })?;

        let mut entries = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (address, port) = line.split_once(':').ok_or_else(|| {
                S4Error::internal(format!("malformed roster line: {line}"), "config")
            })?;
            let port: u16 = port
                .parse()
                .map_err(|_| S4Error::internal(format!("malformed port in roster line: {line}"), "config"))?;

            let address = if local_addresses.iter().any(|a| a == address) {
                "0.0.0.0".to_string()
            } else {
                address.to_string()
            };
            entries.push((address, port));
        }

        if entries.is_empty() {
            return Err(S4Error::internal("roster file is empty", "config"));
        }

        Ok(Roster { entries })
    }
}

/// Default roster file path: `$S4_CONF_PATH`, falling back to `~/.s4.conf`.
pub fn default_conf_path() -> PathBuf {
    if let Ok(p) = std::env::var("S4_CONF_PATH") {
        return PathBuf::from(p);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".s4.conf")
}

/// Pool sizes and the transfer timeout, CPU-derived by default and
/// overridable per spec.md §4.2 / §6.
#[derive(Debug, Clone, Copy)]
pub struct PoolSizes {
    pub io_send: usize,
    pub io_recv: usize,
    pub compute: usize,
    pub misc: usize,
    pub single_writer: usize,
}

impl PoolSizes {
    pub fn from_env_or_defaults() -> PoolSizes {
        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        PoolSizes {
            io_send: env_usize("S4_IO_POOL_SIZE", cores * 4),
            io_recv: env_usize("S4_IO_POOL_SIZE", cores * 4),
            compute: env_usize("S4_COMPUTE_POOL_SIZE", cores + 2),
            misc: env_usize("S4_MISC_POOL_SIZE", cores + 2),
            single_writer: 1,
        }
    }
}

fn env_usize(var: &str, default: usize) -> usize {
    std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Transfer timeout in seconds, default 300 matching `s4/__init__.py`'s
/// `S4_TIMEOUT` default of `60 * 5`.
pub fn transfer_timeout_secs() -> u64 {
    env_usize("S4_TIMEOUT", 60 * 5) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_roster_and_rewrites_local_entry() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "10.0.0.1:8000").unwrap();
        writeln!(f, "10.0.0.2:8001").unwrap();
        writeln!(f, "10.0.0.3:8002").unwrap();
        f.flush().unwrap();

        let local = vec!["10.0.0.2".to_string()];
        let roster = Roster::load(f.path(), &local).unwrap();
        assert_eq!(roster.len(), 3);
        assert_eq!(roster.local_index(), Some(1));
        assert_eq!(roster.address_at(1), "0.0.0.0:8001");
        assert_eq!(roster.address_at(0), "10.0.0.1:8000");
    }

    #[test]
    fn rejects_malformed_line() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "not-a-valid-line").unwrap();
        f.flush().unwrap();
        assert!(Roster::load(f.path(), &[]).is_err());
    }

    #[test]
    fn skips_blank_lines() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "10.0.0.1:8000").unwrap();
        writeln!(f).unwrap();
        writeln!(f, "10.0.0.2:8001").unwrap();
        f.flush().unwrap();
        let roster = Roster::load(f.path(), &[]).unwrap();
        assert_eq!(roster.len(), 2);
    }
}
