//! Cluster-level integration tests exercising the seed scenarios: full
//! PUT/GET round trips, create-only semantics, integrity rejection, and the
//! map/map-to-n/map-from-n shuffle. Runs as a single-node "cluster" (a
//! roster of one, local-to-itself); routing colocation across a
//! multi-entry roster is covered by `s4_core::routing`'s unit tests, and
//! the peer-put half of a real multi-node shuffle belongs to `s4-server`'s
//! HTTP surface rather than `s4-core` alone.
//!
//! These tests shell out to the `recv`/`send`/`hash` helper binaries built
//! by the `s4-helpers` package, located by walking up from this crate's
//! manifest directory to the workspace's `target/<profile>` directory and
//! prepending it to `PATH`.

use logger::logger::Logger;
use s4_core::config::{PoolSizes, Roster};
use s4_core::get::{confirm_get, prepare_get};
use s4_core::jobs::JobId;
use s4_core::listing::list;
use s4_core::map::{map, map_from_n, map_to_n};
use s4_core::node::Node;
use s4_core::put::{confirm_put, prepare_put, PendingPipelines};
use std::net::TcpListener;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

fn prepend_helper_bins_to_path() {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let workspace_root = manifest_dir.parent().expect("s4-core has a workspace parent");
    let profile = if cfg!(debug_assertions) { "debug" } else { "release" };
    let bin_dir = workspace_root.join("target").join(profile);

    let existing = std::env::var_os("PATH").unwrap_or_default();
    let mut paths = vec![bin_dir];
    paths.extend(std::env::split_paths(&existing));
    let joined = std::env::join_paths(paths).expect("PATH components are valid");
    std::env::set_var("PATH", joined);
}

fn single_node_cluster(dir: &Path) -> Arc<Node> {
    prepend_helper_bins_to_path();
    let roster = Roster::from_entries(vec![("0.0.0.0".to_string(), 8000)]);
    let node = Node::new(
        dir.to_path_buf(),
        roster,
        PoolSizes { io_send: 4, io_recv: 4, compute: 4, misc: 4, single_writer: 1 },
        Duration::from_secs(5),
        Logger::null(),
    );
    node.ensure_work_dirs().unwrap();
    node
}

fn allocate_client_port() -> u16 {
    TcpListener::bind(("0.0.0.0", 0)).unwrap().local_addr().unwrap().port()
}

/// Runs `hash --stream < source | send 127.0.0.1 <port>`, returning the
/// digest `hash` printed to stderr once the upload completes.
fn put_over_wire(source: &Path, port: u16) -> String {
    let cmd = format!("hash --stream < {} | send 127.0.0.1 {port}", source.display());
    let output = Command::new("sh").arg("-c").arg(&cmd).output().expect("upload pipeline spawns");
    assert!(output.status.success(), "upload pipeline failed: {}", String::from_utf8_lossy(&output.stderr));
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Spawns `recv <port> | hash --stream > dest` in the background, to be
/// joined after `prepare_get` has dialed it.
fn spawn_download_listener(port: u16, dest: &Path) -> std::process::Child {
    let cmd = format!("recv {port} | hash --stream > {}", dest.display());
    Command::new("sh").arg("-c").arg(&cmd).stderr(std::process::Stdio::piped()).spawn().expect("download listener spawns")
}

async fn put_key(node: &Arc<Node>, key: &str, contents: &[u8]) -> Result<(), s4_core::error::S4Error> {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("payload");
    std::fs::write(&source, contents).unwrap();

    let pipelines = PendingPipelines::new();
    let prepared = prepare_put(node, &pipelines, key).await?;
    let checksum = put_over_wire(&source, prepared.port);
    confirm_put(node, &pipelines, prepared.job_id, &checksum).await
}

async fn get_key(node: &Arc<Node>, key: &str) -> Result<Vec<u8>, s4_core::error::S4Error> {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("downloaded");
    let port = allocate_client_port();
    let mut listener = spawn_download_listener(port, &dest);

    let pipelines = PendingPipelines::new();
    let job_id: JobId = prepare_get(node, &pipelines, key, "127.0.0.1", port).await?;

    let output = listener.wait_with_output().expect("download listener exits");
    assert!(output.status.success(), "download pipeline failed: {}", String::from_utf8_lossy(&output.stderr));
    let checksum = String::from_utf8_lossy(&output.stderr).trim().to_string();

    confirm_get(node, &pipelines, job_id, &checksum).await?;
    Ok(std::fs::read(&dest).unwrap())
}

#[tokio::test]
async fn seed_scenario_1_put_get_round_trip_and_listing() {
    let dir = tempfile::tempdir().unwrap();
    let node = single_node_cluster(dir.path());

    put_key(&node, "s4://b/f.txt", b"123").await.unwrap();

    let contents = get_key(&node, "s4://b/f.txt").await.unwrap();
    assert_eq!(contents, b"123");

    let entries = list(&node.data_root, "b/", false).unwrap();
    assert!(entries.iter().any(|e| e.path == "b/f.txt"));
}

#[tokio::test]
async fn seed_scenario_2_ten_keys_round_trip_under_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    let node = single_node_cluster(dir.path());

    for i in 0..10 {
        let key = format!("s4://b/dir/key{i}.txt");
        let body = format!("data{i}");
        put_key(&node, &key, body.as_bytes()).await.unwrap();
    }

    let entries = list(&node.data_root, "b/dir/", true).unwrap();
    assert_eq!(entries.len(), 10);

    for i in 0..10 {
        let key = format!("s4://b/dir/key{i}.txt");
        let contents = get_key(&node, &key).await.unwrap();
        assert_eq!(contents, format!("data{i}").into_bytes());
    }
}

#[tokio::test]
async fn seed_scenario_4_put_is_create_only() {
    let dir = tempfile::tempdir().unwrap();
    let node = single_node_cluster(dir.path());

    put_key(&node, "s4://b/once.txt", b"first").await.unwrap();
    let err = put_key(&node, "s4://b/once.txt", b"second").await.unwrap_err();
    assert_eq!(err.status_code(), 409);

    let contents = get_key(&node, "s4://b/once.txt").await.unwrap();
    assert_eq!(contents, b"first");
}

#[tokio::test]
async fn seed_scenario_5_checksum_mismatch_is_reclaimed_and_key_stays_absent() {
    let dir = tempfile::tempdir().unwrap();
    let node = single_node_cluster(dir.path());

    let source_dir = tempfile::tempdir().unwrap();
    let source = source_dir.path().join("payload");
    std::fs::write(&source, b"hello").unwrap();

    let pipelines = PendingPipelines::new();
    let prepared = prepare_put(&node, &pipelines, "s4://b/flaky.txt").await.unwrap();
    let _real_checksum = put_over_wire(&source, prepared.port);

    let err = confirm_put(&node, &pipelines, prepared.job_id, "0000000000000000").await.unwrap_err();
    assert_eq!(err.status_code(), 500);
    assert!(err.is_retryable());

    assert!(!routing_disk_path(&node, "s4://b/flaky.txt").exists());
    let tempfiles: Vec<_> = std::fs::read_dir(node.tempfiles_dir()).unwrap().collect();
    assert!(tempfiles.is_empty(), "the tempfile should have been reclaimed on integrity failure");

    put_key(&node, "s4://b/flaky.txt", b"hello").await.unwrap();
    assert_eq!(get_key(&node, "s4://b/flaky.txt").await.unwrap(), b"hello");
}

fn routing_disk_path(node: &Node, key: &str) -> std::path::PathBuf {
    s4_core::routing::on_disk_path(&node.data_root, key).unwrap()
}

#[tokio::test]
async fn seed_scenario_6_map_shuffle_preserves_the_word_multiset() {
    let dir = tempfile::tempdir().unwrap();
    let node = single_node_cluster(dir.path());

    let words: Vec<String> = (0..18).map(|i| format!("WORD{i}")).collect();
    let chunk_size = 3;
    for (chunk_idx, chunk) in words.chunks(chunk_size).enumerate() {
        let body = chunk.join("\n");
        put_key(&node, &format!("s4://in/chunk{chunk_idx}.txt"), body.as_bytes()).await.unwrap();
    }

    let lower_pairs: Vec<(String, String)> = (0..words.len().div_ceil(chunk_size))
        .map(|i| (format!("s4://in/chunk{i}.txt"), format!("s4://lower/chunk{i}.txt")))
        .collect();
    let outcome = map(&node, lower_pairs, "tr 'A-Z' 'a-z'").await.unwrap();
    assert_eq!(outcome.completed, lower_pairs_len(words.len(), chunk_size));

    let to_n_pairs: Vec<(String, String)> = (0..words.len().div_ceil(chunk_size))
        .map(|i| (format!("s4://lower/chunk{i}.txt"), "s4://shuffled/".to_string()))
        .collect();
    let bucket_script = "awk '{ n = length($0) % 3; print $0 > n }' \"$filename\" && ls";
    let outcome = map_to_n(&node, to_n_pairs, bucket_script).await.unwrap();
    assert!(outcome.completed > 0);

    let entries = list(&node.data_root, "shuffled/", true).unwrap();
    let mut by_bucket: std::collections::HashMap<String, Vec<String>> = std::collections::HashMap::new();
    for entry in &entries {
        let key = format!("s4://{}", entry.path);
        let bucket = s4_core::routing::bucket_segment(&key).unwrap();
        by_bucket.entry(bucket).or_default().push(key);
    }
    let groups: Vec<Vec<String>> = by_bucket.into_values().collect();

    let reduce_outcome = map_from_n(&node, "s4://reduced", groups, "xargs cat").await.unwrap();
    assert!(reduce_outcome.completed > 0);

    let reduced_entries = list(&node.data_root, "reduced/", true).unwrap();
    let mut seen_words = std::collections::HashSet::new();
    for entry in reduced_entries {
        let key = format!("s4://{}", entry.path);
        let contents = get_key(&node, &key).await.unwrap();
        for line in String::from_utf8(contents).unwrap().lines() {
            seen_words.insert(line.to_lowercase());
        }
    }
    let expected: std::collections::HashSet<String> = words.iter().map(|w| w.to_lowercase()).collect();
    assert_eq!(seen_words, expected);
}

fn lower_pairs_len(total_words: usize, chunk_size: usize) -> usize {
    total_words.div_ceil(chunk_size)
}
