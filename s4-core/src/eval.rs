//! `eval(key, cmd)`: reads a blob through a user-supplied pipeline and
//! returns its standard output. Runs on the compute pool, bounded by the
//! transfer timeout.

use crate::error::S4Error;
use crate::node::Node;
use crate::pipeline::run_shell_blocking;
use crate::routing;

pub async fn eval(node: &Node, key: &str, cmd: &str) -> Result<String, S4Error> {
    let on_disk_path = routing::on_disk_path(&node.data_root, key)?;
    if !on_disk_path.exists() {
        return Err(S4Error::not_found(format!("key '{key}' not found"), "eval"));
    }

    let full_cmd = format!("{cmd} < {}", on_disk_path.display());
    let outcome = node
        .pools
        .compute
        .submit(node.timeout, move |started| run_shell_blocking(&full_cmd, started))
        .await?
        .join()
        .await?;

    if !outcome.success {
        return Err(S4Error::cmd_failure(outcome.stdout, outcome.stderr, outcome.exit_code, "eval"));
    }
    Ok(outcome.stdout)
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
                io_send: 1,
                io_recv: 1,
                compute: 2,
                misc: 1,
                single_writer: 1,
            },
            Duration::from_secs(5),
            Logger::null(),
        )
    }

    #[tokio::test]
    async fn eval_runs_pipeline_against_blob() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("b/f.txt"), b"hello\n").unwrap();
        let node = test_node(dir.path());
        let out = eval(&node, "s4://b/f.txt", "wc -l").await.unwrap();
        assert_eq!(out.trim(), "1");
    }

    #[tokio::test]
    async fn eval_not_found_for_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path());
        let err = eval(&node, "s4://b/missing.txt", "cat").await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
