//! The shuffle engine: `map`, `map_to_n`, `map_from_n`. Correctness rests
//! entirely on the routing invariant that keys sharing a numeric bucket
//! segment colocate on one node (see `routing::routing_token`).
//!
//! Every pair/group in a request is submitted to the compute pool
//! concurrently; `Pool::submit`'s own admission bound is what throttles how
//! many actually run at once, not the driver loop. Partial failure: the
//! first task to fail in a group flips a shared `AtomicBool` that every
//! other task checks right before running its subprocess, so any sibling
//! still queued (not yet admitted) bails out immediately; tasks already
//! running to completion are not interrupted, and already-uploaded outputs
//! from earlier tasks are not rolled back.

use crate::error::S4Error;
use crate::node::Node;
use crate::pipeline::run_shell_blocking;
use crate::put::publish_local_file;
use crate::routing;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct MapArgs {
    pub cmd: String,
    pub args: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
pub struct MapToNArgs {
    pub cmd: String,
    pub args: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
pub struct MapFromNArgs {
    pub cmd: String,
    pub args: Vec<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct MapOutcome {
    pub completed: usize,
}

/// `map(in_dir, out_dir, cmd)`'s node-side half: `pairs` are
/// `(in_key, out_key)` already routed to this node by the client.
pub async fn map(node: &Node, pairs: Vec<(String, String)>, cmd: &str) -> Result<MapOutcome, S4Error> {
    let aborted = Arc::new(AtomicBool::new(false));

    let tasks = pairs.into_iter().map(|(in_key, out_key)| {
        let aborted = Arc::clone(&aborted);
        async move {
            let result = run_one_map_task(node, &in_key, &out_key, cmd, Arc::clone(&aborted)).await;
            if result.is_err() {
                aborted.store(true, Ordering::SeqCst);
            }
            result
        }
    });

    let mut completed = 0usize;
    let mut first_error = None;
    for result in join_all(tasks).await {
        match result {
            Ok(()) => completed += 1,
            Err(e) if first_error.is_none() => first_error = Some(e),
            Err(_) => {}
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    Ok(MapOutcome { completed })
}

async fn run_one_map_task(node: &Node, in_key: &str, out_key: &str, cmd: &str, aborted: Arc<AtomicBool>) -> Result<(), S4Error> {
    let in_path = routing::on_disk_path(&node.data_root, in_key)?;
    if !in_path.exists() {
        return Err(S4Error::not_found(format!("key '{in_key}' not found"), "map"));
    }

    node.ensure_work_dirs()?;
    let scratch = node.new_temp_dir();
    std::fs::create_dir_all(&scratch)?;
    let output_path = scratch.join("output");

    let full_cmd = format!("< {} {cmd} > {}", in_path.display(), output_path.display());
    let filename = in_path.display().to_string();

    let outcome = node
        .pools
        .compute
        .submit(node.timeout, move |started| {
            if aborted.load(Ordering::SeqCst) {
                started.signal();
                return crate::pipeline::PipelineOutcome {
                    success: false,
                    checksum: String::new(),
                    stdout: String::new(),
                    stderr: "sibling task aborted this group".to_string(),
                    exit_code: -1,
                };
            }
            run_shell_with_env(&full_cmd, &filename, started)
        })
        .await?
        .join()
        .await?;

    let result = if outcome.success {
        publish_local_file(node, out_key, &output_path).await
    } else {
        Err(S4Error::cmd_failure(outcome.stdout, outcome.stderr, outcome.exit_code, "map"))
    };

    let _ = std::fs::remove_dir_all(&scratch);
    result
}

fn run_shell_with_env(cmd: &str, filename: &str, started: &mut crate::pool::Started) -> crate::pipeline::PipelineOutcome {
    // `export filename=...;` rather than a `filename=... cmd` prefix: a
    // prefix assignment isn't visible to `$filename` expanded later in the
    // same simple command (the classic `FOO=bar echo $FOO` gotcha), but an
    // `export` statement followed by `;` makes it a real shell variable for
    // everything that follows, including `cmd` itself.
    let prefixed = format!("export filename={}; {cmd}", shell_quote(filename));
    run_shell_blocking(&prefixed, started)
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// `map_to_n(in_dir, out_dir, cmd)`'s node-side half. `cmd` emits a
/// newline-separated list of filenames it wrote into its scratch
/// directory; each becomes `out_dir + basename(in_path) + "/" + basename(file)`,
/// stored locally or relayed to the owning peer.
pub async fn map_to_n(node: &Node, pairs: Vec<(String, String)>, cmd: &str) -> Result<MapOutcome, S4Error> {
    let aborted = Arc::new(AtomicBool::new(false));

    let tasks = pairs.into_iter().map(|(in_key, out_dir)| {
        let aborted = Arc::clone(&aborted);
        async move {
            let result = run_one_map_to_n_task(node, &in_key, &out_dir, cmd, Arc::clone(&aborted)).await;
            if result.is_err() {
                aborted.store(true, Ordering::SeqCst);
            }
            result
        }
    });

    let mut completed = 0usize;
    let mut first_error = None;
    for result in join_all(tasks).await {
        match result {
            Ok(()) => completed += 1,
            Err(e) if first_error.is_none() => first_error = Some(e),
            Err(_) => {}
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    Ok(MapOutcome { completed })
}

async fn run_one_map_to_n_task(node: &Node, in_key: &str, out_dir: &str, cmd: &str, aborted: Arc<AtomicBool>) -> Result<(), S4Error> {
    let in_path = routing::on_disk_path(&node.data_root, in_key)?;
    if !in_path.exists() {
        return Err(S4Error::not_found(format!("key '{in_key}' not found"), "map_to_n"));
    }

    node.ensure_work_dirs()?;
    let scratch = node.new_temp_dir();
    std::fs::create_dir_all(&scratch)?;

    let full_cmd = format!("< {} {cmd}", in_path.display());
    let filename = in_path.display().to_string();
    let scratch_for_job = scratch.clone();

    let outcome = node
        .pools
        .compute
        .submit(node.timeout, move |started| {
            if aborted.load(Ordering::SeqCst) {
                started.signal();
                return crate::pipeline::PipelineOutcome {
                    success: false,
                    checksum: String::new(),
                    stdout: String::new(),
                    stderr: "sibling task aborted this group".to_string(),
                    exit_code: -1,
                };
            }
            let prefixed = format!("cd {} && export filename={}; {cmd}", scratch_for_job.display(), shell_quote(&filename));
            run_shell_blocking(&prefixed, started)
        })
        .await?
        .join()
        .await?;

    if !outcome.success {
        let _ = std::fs::remove_dir_all(&scratch);
        return Err(S4Error::cmd_failure(outcome.stdout, outcome.stderr, outcome.exit_code, "map_to_n"));
    }

    let in_basename = file_stem_of(&in_path);
    let result = upload_emitted_files(node, &scratch, out_dir, &in_basename, &outcome.stdout).await;
    let _ = std::fs::remove_dir_all(&scratch);
    result
}

async fn upload_emitted_files(node: &Node, scratch: &std::path::Path, out_dir: &str, in_basename: &str, emitted_stdout: &str) -> Result<(), S4Error> {
    for line in emitted_stdout.lines() {
        let name = line.trim();
        if name.is_empty() {
            continue;
        }
        let source = scratch.join(name);
        if !source.exists() {
            return Err(S4Error::internal(format!("emitted filename '{name}' not found in scratch dir"), "map_to_n"));
        }
        let out_key = format!("{}{}/{}", ensure_trailing_slash(out_dir), in_basename, name);

        if routing::is_local(&out_key, &node.roster)? {
            publish_local_file(node, &out_key, &source).await?;
        } else {
            peer_put_with_retry(node, &out_key, &source).await?;
        }
    }
    Ok(())
}

fn ensure_trailing_slash(s: &str) -> String {
    if s.ends_with('/') {
        s.to_string()
    } else {
        format!("{s}/")
    }
}

fn file_stem_of(path: &std::path::Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
}

/// Re-enters the PUT protocol as a client against the peer that owns
/// `out_key`, retrying 429/500 with capped backoff but treating 404/409 as
/// terminal, per spec.md §9's "intra-cluster put inside map_to_n" note.
async fn peer_put_with_retry(node: &Node, out_key: &str, source: &std::path::Path) -> Result<(), S4Error> {
    let peer = routing::owner(out_key, &node.roster)?;
    let data = std::fs::read(source)?;
    let checksum = crate::checksum::hash_bytes(&data);

    let mut delay = std::time::Duration::from_millis(100);
    let max_delay = std::time::Duration::from_secs(5);

    loop {
        match try_peer_put(node, &peer, out_key, &data, &checksum).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() => {
                node.logger.warn(&format!("peer put to {peer} for '{out_key}' failed retryably: {e}"), "map_to_n");
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, max_delay);
            }
            Err(e) => return Err(e),
        }
    }
}

async fn try_peer_put(node: &Node, peer: &str, out_key: &str, data: &[u8], checksum: &str) -> Result<(), S4Error> {
    let client = &node.http_client;
    let prepare_url = format!("http://{peer}/prepare_put?key={}", urlencode(out_key));
    let resp = client
        .post(&prepare_url)
        .send()
        .await
        .map_err(|e| S4Error::internal(e.to_string(), "map_to_n"))?;
    let status = resp.status().as_u16();
    if status != 200 {
        return Err(status_to_error(status, "peer prepare_put"));
    }
    let body: (String, u16) = resp.json().await.map_err(|e| S4Error::internal(e.to_string(), "map_to_n"))?;
    let (job_id, port) = body;

    let peer_host = peer.split(':').next().unwrap_or(peer);
    let mut stream = std::net::TcpStream::connect((peer_host, port)).map_err(|e| S4Error::internal(e.to_string(), "map_to_n"))?;
    stream.write_all(data).map_err(|e| S4Error::internal(e.to_string(), "map_to_n"))?;
    drop(stream);

    let confirm_url = format!(
        "http://{peer}/confirm_put?uuid={}&checksum={}",
        urlencode(&job_id),
        urlencode(checksum)
    );
    let resp = client
        .post(&confirm_url)
        .send()
        .await
        .map_err(|e| S4Error::internal(e.to_string(), "map_to_n"))?;
    let status = resp.status().as_u16();
    if status != 200 {
        return Err(status_to_error(status, "peer confirm_put"));
    }
    Ok(())
}

fn status_to_error(status: u16, module: &'static str) -> S4Error {
    match status {
        404 => S4Error::not_found(format!("{module} returned 404"), module),
        409 => S4Error::already_exists(format!("{module} returned 409"), module),
        429 => S4Error::busy(format!("{module} returned 429"), module),
        _ => S4Error::internal(format!("{module} returned {status}"), module),
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// `map_from_n(out_dir, cmd)`'s node-side half: `groups` are already
/// colocated by bucket number; each group's absolute input paths are fed
/// on the command's standard input.
pub async fn map_from_n(node: &Node, out_dir: &str, groups: Vec<Vec<String>>, cmd: &str) -> Result<MapOutcome, S4Error> {
    let aborted = Arc::new(AtomicBool::new(false));

    let tasks = groups.into_iter().map(|group| {
        let aborted = Arc::clone(&aborted);
        async move {
            let result = run_one_map_from_n_group(node, out_dir, &group, cmd, Arc::clone(&aborted)).await;
            if result.is_err() {
                aborted.store(true, Ordering::SeqCst);
            }
            result
        }
    });

    let mut completed = 0usize;
    let mut first_error = None;
    for result in join_all(tasks).await {
        match result {
            Ok(()) => completed += 1,
            Err(e) if first_error.is_none() => first_error = Some(e),
            Err(_) => {}
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    Ok(MapOutcome { completed })
}

async fn run_one_map_from_n_group(node: &Node, out_dir: &str, group: &[String], cmd: &str, aborted: Arc<AtomicBool>) -> Result<(), S4Error> {
    let mut input_paths = Vec::with_capacity(group.len());
    for key in group {
        let path = routing::on_disk_path(&node.data_root, key)?;
        if !path.exists() {
            return Err(S4Error::not_found(format!("key '{key}' not found"), "map_from_n"));
        }
        input_paths.push(path);
    }
    let (bucket_number, suffix) = bucket_number_and_suffix(group)?;

    node.ensure_work_dirs()?;
    let scratch = node.new_temp_dir();
    std::fs::create_dir_all(&scratch)?;
    let output_path = scratch.join("output");

    let stdin_payload = input_paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n");

    let full_cmd = format!("{cmd} > {}", output_path.display());

    let outcome = node
        .pools
        .compute
        .submit(node.timeout, move |started| {
            if aborted.load(Ordering::SeqCst) {
                started.signal();
                return crate::pipeline::PipelineOutcome {
                    success: false,
                    checksum: String::new(),
                    stdout: String::new(),
                    stderr: "sibling task aborted this group".to_string(),
                    exit_code: -1,
                };
            }
            run_shell_with_stdin(&full_cmd, &stdin_payload, started)
        })
        .await?
        .join()
        .await?;

    let result = if outcome.success {
        let out_key = format!("{}{}{}", ensure_trailing_slash(out_dir), bucket_number, suffix);
        publish_local_file(node, &out_key, &output_path).await
    } else {
        Err(S4Error::cmd_failure(outcome.stdout, outcome.stderr, outcome.exit_code, "map_from_n"))
    };

    let _ = std::fs::remove_dir_all(&scratch);
    result
}

fn run_shell_with_stdin(cmd: &str, stdin_payload: &str, started: &mut crate::pool::Started) -> crate::pipeline::PipelineOutcome {
    use std::process::Stdio;
    let child = std::process::Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = match child {
        Ok(c) => {
            started.signal();
            c
        }
        Err(e) => {
            started.signal();
            return crate::pipeline::PipelineOutcome {
                success: false,
                checksum: String::new(),
                stdout: String::new(),
                stderr: format!("failed to spawn: {e}"),
                exit_code: -1,
            };
        }
    };

    if let Some(stdin) = child.stdin.take() {
        let mut stdin = stdin;
        let _ = stdin.write_all(stdin_payload.as_bytes());
    }

    match child.wait_with_output() {
        Ok(out) => crate::pipeline::PipelineOutcome {
            success: out.status.success(),
            checksum: String::new(),
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            exit_code: out.status.code().unwrap_or(-1),
        },
        Err(e) => crate::pipeline::PipelineOutcome {
            success: false,
            checksum: String::new(),
            stdout: String::new(),
            stderr: format!("failed to wait: {e}"),
            exit_code: -1,
        },
    }
}

/// The numeric bucket segment shared by every key in the group, plus the
/// common non-numeric tail of their last path segments when one exists.
fn bucket_number_and_suffix(keys: &[String]) -> Result<(String, String), S4Error> {
    let mut bucket_number: Option<String> = None;
    let mut tails = Vec::with_capacity(keys.len());

    for key in keys {
        let rest = routing::strip_scheme(key)?;
        let last = rest.rsplit('/').next().unwrap_or(rest);
        let digit_len = last.bytes().take_while(|b| b.is_ascii_digit()).count();
        let (num, tail) = last.split_at(digit_len);
        match &bucket_number {
            None => bucket_number = Some(num.to_string()),
            Some(n) if n == num => {}
            Some(_) => return Err(S4Error::malformed("keys in a map_from_n group do not share a bucket number", "map_from_n")),
        }
        tails.push(tail.to_string());
    }

    let suffix = if !tails.is_empty() && tails.iter().all(|t| t == &tails[0]) {
        tails[0].clone()
    } else {
        String::new()
    };

    Ok((bucket_number.unwrap_or_default(), suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_number_and_suffix_agree_on_same_tail() {
        let keys = vec!["s4://b/000_a".to_string(), "s4://b/000_a".to_string()];
        let (num, suffix) = bucket_number_and_suffix(&keys).unwrap();
        assert_eq!(num, "000");
        assert_eq!(suffix, "_a");
    }

    #[test]
    fn bucket_number_and_suffix_empty_when_tails_disagree() {
        let keys = vec!["s4://b/000_a".to_string(), "s4://b/000_b".to_string()];
        let (num, suffix) = bucket_number_and_suffix(&keys).unwrap();
        assert_eq!(num, "000");
        assert_eq!(suffix, "");
    }

    #[test]
    fn bucket_number_mismatch_is_malformed() {
        let keys = vec!["s4://b/000_a".to_string(), "s4://b/001_a".to_string()];
        assert!(bucket_number_and_suffix(&keys).is_err());
    }
}
