//! The long-lived service object a process constructs once at startup: data
//! root, roster, job table, port set, the five admission pools, and the
//! logger. Grounded on the teacher's `Node` (`Arc`-based construction, one
//! `Logger` per node, background threads spawned at startup).

use crate::config::{PoolSizes, Roster};
use crate::jobs::{JobTable, PortSet};
use crate::pool::Pool;
use logger::logger::Logger;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct Pools {
    pub io_send: Pool,
    pub io_recv: Pool,
    pub compute: Pool,
    pub misc: Pool,
    pub single_writer: Pool,
}

impl Pools {
    pub fn new(sizes: PoolSizes, logger: Logger) -> Pools {
        Pools {
            io_send: Pool::new("io-send", sizes.io_send, logger.clone()),
            io_recv: Pool::new("io-recv", sizes.io_recv, logger.clone()),
            compute: Pool::new("compute", sizes.compute, logger.clone()),
            misc: Pool::new("misc", sizes.misc, logger.clone()),
            single_writer: Pool::new("single-writer", sizes.single_writer, logger),
        }
    }
}

pub struct Node {
    pub data_root: PathBuf,
    pub roster: Roster,
    pub jobs: JobTable,
    pub ports: PortSet,
    pub pools: Pools,
    pub logger: Logger,
    pub timeout: Duration,
    pub http_client: reqwest::Client,
}

impl Node {
    pub fn new(data_root: PathBuf, roster: Roster, pool_sizes: PoolSizes, timeout: Duration, logger: Logger) -> Arc<Node> {
        Arc::new(Node {
            pools: Pools::new(pool_sizes, logger.clone()),
            data_root,
            roster,
            jobs: JobTable::new(),
            ports: PortSet::new(),
            logger,
            timeout,
            http_client: reqwest::Client::new(),
        })
    }

    pub fn tempfiles_dir(&self) -> PathBuf {
        self.data_root.join("_tempfiles")
    }

    pub fn tempdirs_dir(&self) -> PathBuf {
        self.data_root.join("_tempdirs")
    }

    pub fn ensure_work_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.tempfiles_dir())?;
        std::fs::create_dir_all(self.tempdirs_dir())?;
        Ok(())
    }

    pub fn new_temp_path(&self) -> PathBuf {
        self.tempfiles_dir().join(uuid_like())
    }

    pub fn new_temp_dir(&self) -> PathBuf {
        self.tempdirs_dir().join(uuid_like())
    }
}

/// A random hex identifier, used for tempfile/tempdir names. Same
/// random-then-hex shape as `jobs::JobId`, just wider, so collisions across
/// concurrent map tasks are effectively impossible.
fn uuid_like() -> String {
    let mut bytes = [0u8; 16];
    rand::fill(&mut bytes);
    hex::encode(bytes)
}
