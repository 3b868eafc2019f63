//! Binary entry point: loads the roster and pool/timeout configuration,
//! constructs the `Node`, starts the GC loop, and serves the HTTP control
//! endpoint described in spec.md §6.

mod response;
mod routes;

use logger::logger::Logger;
use s4_core::config::{default_conf_path, transfer_timeout_secs, PoolSizes, Roster};
use s4_core::node::Node;
use s4_core::put::PendingPipelines;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn local_addresses() -> Vec<String> {
    let mut addrs = vec!["0.0.0.0".to_string(), "127.0.0.1".to_string(), "localhost".to_string()];
    if let Ok(output) = std::process::Command::new("hostname").arg("-I").output() {
        if let Ok(text) = String::from_utf8(output.stdout) {
            addrs.extend(text.split_whitespace().map(|s| s.to_string()));
        }
    }
    addrs
}

#[rocket::main]
async fn main() {
    let log_path = std::env::var("S4_LOG_PATH").unwrap_or_else(|_| "s4-node.log".to_string());
    let logger = Logger::new(&log_path);

    let conf_path = default_conf_path();
    let roster = Roster::load(&conf_path, &local_addresses()).unwrap_or_else(|e| {
        panic!("failed to load roster from {conf_path:?}: {e}");
    });

    let data_root = std::env::var("S4_DATA_ROOT").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./data"));
    let pool_sizes = PoolSizes::from_env_or_defaults();
    let timeout = Duration::from_secs(transfer_timeout_secs());

    logger.info(&format!("starting node, data_root={data_root:?}, roster_size={}", roster.len()), "main");

    let node = Node::new(data_root, roster, pool_sizes, timeout, logger.clone());
    node.ensure_work_dirs().expect("failed to create work directories");

    let pipelines = Arc::new(PendingPipelines::new());
    s4_core::gc::spawn(Arc::clone(&node), Arc::clone(&pipelines));

    let port = node.roster.local_port().unwrap_or(8000);

    let figment = rocket::Config::figment()
        .merge(("port", port))
        .merge(("address", "0.0.0.0"))
        .merge(("ident", false));

    let result = rocket::custom(figment)
        .manage(node)
        .manage(pipelines)
        .mount("/", routes::routes())
        .launch()
        .await;

    if let Err(e) = result {
        logger.error(&format!("server exited with error: {e}"), "main");
    }
}
