//! The thin HTTP + shell-pipeline client side of the two-phase transfer
//! protocol. Mirrors what `s4-core::put`/`s4-core::get` do on the node side,
//! but from a process that never joins the roster.

use s4_core::config::Roster;
use s4_core::routing;
use serde::Deserialize;
use std::net::TcpListener;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;

#[derive(Debug)]
pub struct CliError {
    pub message: String,
    retryable: bool,
}

impl CliError {
    pub fn terminal(message: impl Into<String>) -> Self {
        CliError { message: message.into(), retryable: false }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        CliError { message: message.into(), retryable: true }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Retries `f` with exponential backoff (100ms up to 5s) as long as it
/// reports a retryable failure (busy or server-side integrity/internal
/// errors); 404/409-shaped failures are expected to come back terminal and
/// propagate on the first attempt.
pub fn with_retry<T>(mut f: impl FnMut() -> Result<T, CliError>) -> Result<T, CliError> {
    let mut backoff = Duration::from_millis(100);
    let max_backoff = Duration::from_secs(5);
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if e.retryable => {
                eprintln!("retrying after: {}", e.message);
                thread::sleep(backoff);
                backoff = std::cmp::min(backoff * 2, max_backoff);
            }
            Err(e) => return Err(e),
        }
    }
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> CliError {
    match status.as_u16() {
        429 | 500 => CliError::retryable(format!("{status}: {body}")),
        _ => CliError::terminal(format!("{status}: {body}")),
    }
}

pub fn load_roster() -> Result<Roster, CliError> {
    let path = s4_core::config::default_conf_path();
    Roster::load(&path, &[]).map_err(|e| CliError::terminal(e.message))
}

pub fn owner_address(key: &str, roster: &Roster) -> Result<String, CliError> {
    routing::owner(key, roster).map_err(|e| CliError::terminal(e.message))
}

/// Allocates a free TCP port on this host by binding to port 0 and
/// immediately dropping the listener, the same trick `s4_core::jobs::PortSet`
/// uses on the node side.
fn allocate_local_port() -> Result<u16, CliError> {
    let listener = TcpListener::bind(("0.0.0.0", 0)).map_err(|e| CliError::terminal(e.to_string()))?;
    listener.local_addr().map(|a| a.port()).map_err(|e| CliError::terminal(e.to_string()))
}

#[derive(Deserialize)]
struct PreparePutBody(String, u16);

/// Uploads `local_path` to `key`, picking the owning node from `roster`,
/// running the prepare/confirm handshake and the `hash | send` pipeline in
/// between.
pub fn put(client: &reqwest::blocking::Client, roster: &Roster, local_path: &Path, key: &str) -> Result<(), CliError> {
    let owner = owner_address(key, roster)?;
    let owner_host = owner.split(':').next().unwrap_or(&owner).to_string();

    let prepared: PreparePutBody = with_retry(|| {
        let resp = client
            .post(format!("http://{owner}/prepare_put"))
            .query(&[("key", key)])
            .send()
            .map_err(|e| CliError::retryable(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }
        serde_json::from_str(&text).map_err(|e| CliError::terminal(e.to_string()))
    })?;
    let PreparePutBody(uuid, port) = prepared;

    let local_path_str = local_path.display().to_string();
    let cmd = format!(
        "hash --stream < {} | send {} {}",
        shell_quote(&local_path_str),
        shell_quote(&owner_host),
        port
    );
    let output = Command::new("sh")
        .arg("-c")
        .arg(&cmd)
        .output()
        .map_err(|e| CliError::terminal(format!("failed to run upload pipeline: {e}")))?;
    if !output.status.success() {
        return Err(CliError::terminal(format!(
            "upload pipeline failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    let checksum = String::from_utf8_lossy(&output.stderr).trim().to_string();

    with_retry(|| {
        let resp = client
            .post(format!("http://{owner}/confirm_put"))
            .query(&[("uuid", uuid.as_str()), ("checksum", checksum.as_str())])
            .send()
            .map_err(|e| CliError::retryable(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }
        Ok(())
    })
}

/// Downloads `key` from its owning node to `local_path`.
pub fn get(client: &reqwest::blocking::Client, roster: &Roster, key: &str, local_path: &Path) -> Result<(), CliError> {
    let owner = owner_address(key, roster)?;

    let port = allocate_local_port()?;
    let local_path_str = local_path.display().to_string();
    let recv_cmd = format!("recv {} | hash --stream > {}", port, shell_quote(&local_path_str));
    let mut recv_child = Command::new("sh")
        .arg("-c")
        .arg(&recv_cmd)
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| CliError::terminal(format!("failed to start download listener: {e}")))?;

    let uuid: String = with_retry(|| {
        let resp = client
            .post(format!("http://{owner}/prepare_get"))
            .query(&[("key", key), ("port", &port.to_string())])
            .send()
            .map_err(|e| CliError::retryable(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }
        serde_json::from_str(&text).map_err(|e| CliError::terminal(e.to_string()))
    })?;

    let output = recv_child
        .wait_with_output()
        .map_err(|e| CliError::terminal(format!("download listener failed: {e}")))?;
    if !output.status.success() {
        return Err(CliError::terminal(format!(
            "download pipeline failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    let checksum = String::from_utf8_lossy(&output.stderr).trim().to_string();

    with_retry(|| {
        let resp = client
            .post(format!("http://{owner}/confirm_get"))
            .query(&[("uuid", uuid.as_str()), ("checksum", checksum.as_str())])
            .send()
            .map_err(|e| CliError::retryable(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }
        Ok(())
    })
}

/// Queries every node's `/list` and merges the results, since a prefix can
/// straddle several buckets that route to different owners.
pub fn list_all(client: &reqwest::blocking::Client, roster: &Roster, prefix: &str, recursive: bool) -> Result<Vec<s4_core::listing::ListEntry>, CliError> {
    let mut entries = Vec::new();
    for idx in 0..roster.len() {
        let address = roster.address_at(idx);
        let resp = client
            .get(format!("http://{address}/list"))
            .query(&[("prefix", prefix), ("recursive", if recursive { "true" } else { "false" })])
            .send()
            .map_err(|e| CliError::terminal(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }
        let mut page: Vec<s4_core::listing::ListEntry> = serde_json::from_str(&text).map_err(|e| CliError::terminal(e.to_string()))?;
        entries.append(&mut page);
    }
    entries.sort();
    entries.dedup();
    Ok(entries)
}

/// Queries every node's `/list_buckets` and merges the results into one
/// sorted, deduplicated list.
pub fn list_buckets_all(client: &reqwest::blocking::Client, roster: &Roster) -> Result<Vec<String>, CliError> {
    let mut buckets = Vec::new();
    for idx in 0..roster.len() {
        let address = roster.address_at(idx);
        let resp = client
            .get(format!("http://{address}/list_buckets"))
            .send()
            .map_err(|e| CliError::terminal(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }
        let mut page: Vec<String> = serde_json::from_str(&text).map_err(|e| CliError::terminal(e.to_string()))?;
        buckets.append(&mut page);
    }
    buckets.sort();
    buckets.dedup();
    Ok(buckets)
}

/// Broadcasts a delete to every node; each node only removes what it owns.
pub fn delete_all(client: &reqwest::blocking::Client, roster: &Roster, prefix: &str, recursive: bool) -> Result<(), CliError> {
    for idx in 0..roster.len() {
        let address = roster.address_at(idx);
        with_retry(|| {
            let resp = client
                .post(format!("http://{address}/delete"))
                .query(&[("prefix", prefix), ("recursive", if recursive { "true" } else { "false" })])
                .send()
                .map_err(|e| CliError::retryable(e.to_string()))?;
            let status = resp.status();
            let text = resp.text().unwrap_or_default();
            if !status.is_success() {
                return Err(classify_status(status, &text));
            }
            Ok(())
        })?;
    }
    Ok(())
}

pub fn eval(client: &reqwest::blocking::Client, roster: &Roster, key: &str, cmd: &str) -> Result<String, CliError> {
    let owner = owner_address(key, roster)?;
    with_retry(|| {
        let resp = client
            .post(format!("http://{owner}/eval"))
            .query(&[("key", key)])
            .body(cmd.to_string())
            .send()
            .map_err(|e| CliError::retryable(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }
        Ok(text)
    })
}

/// Groups `(in_key, out_key)` pairs by owner of `in_key` and dispatches each
/// group's `/map` request to that owner, summing completion counts.
pub fn map(client: &reqwest::blocking::Client, roster: &Roster, pairs: Vec<(String, String)>, cmd: &str) -> Result<usize, CliError> {
    dispatch_grouped(client, roster, pairs, "map", cmd)
}

pub fn map_to_n(client: &reqwest::blocking::Client, roster: &Roster, pairs: Vec<(String, String)>, cmd: &str) -> Result<usize, CliError> {
    dispatch_grouped(client, roster, pairs, "map_to_n", cmd)
}

fn dispatch_grouped(
    client: &reqwest::blocking::Client,
    roster: &Roster,
    pairs: Vec<(String, String)>,
    route: &str,
    cmd: &str,
) -> Result<usize, CliError> {
    use std::collections::HashMap;
    let mut groups: HashMap<String, Vec<(String, String)>> = HashMap::new();
    for pair in pairs {
        let owner = owner_address(&pair.0, roster)?;
        groups.entry(owner).or_default().push(pair);
    }

    let mut total = 0usize;
    for (owner, args) in groups {
        let body = serde_json::json!({ "cmd": cmd, "args": args });
        let completed: usize = with_retry(|| {
            let resp = client
                .post(format!("http://{owner}/{route}"))
                .json(&body)
                .send()
                .map_err(|e| CliError::retryable(e.to_string()))?;
            let status = resp.status();
            let text = resp.text().unwrap_or_default();
            if !status.is_success() {
                return Err(classify_status(status, &text));
            }
            let outcome: serde_json::Value = serde_json::from_str(&text).map_err(|e| CliError::terminal(e.to_string()))?;
            Ok(outcome["completed"].as_u64().unwrap_or(0) as usize)
        })?;
        total += completed;
    }
    Ok(total)
}

/// Groups each key-list's members by the owner of its first key (the
/// colocation invariant guarantees every member of a group shares an owner)
/// and dispatches each owner's groups in one `/map_from_n` request.
pub fn map_from_n(client: &reqwest::blocking::Client, roster: &Roster, groups: Vec<Vec<String>>, out_dir: &str, cmd: &str) -> Result<usize, CliError> {
    use std::collections::HashMap;
    let mut by_owner: HashMap<String, Vec<Vec<String>>> = HashMap::new();
    for group in groups {
        let first = group.first().ok_or_else(|| CliError::terminal("empty map_from_n group"))?;
        let owner = owner_address(first, roster)?;
        by_owner.entry(owner).or_default().push(group);
    }

    let mut total = 0usize;
    for (owner, args) in by_owner {
        let body = serde_json::json!({ "cmd": cmd, "args": args });
        let completed: usize = with_retry(|| {
            let resp = client
                .post(format!("http://{owner}/map_from_n"))
                .query(&[("outdir", out_dir)])
                .json(&body)
                .send()
                .map_err(|e| CliError::retryable(e.to_string()))?;
            let status = resp.status();
            let text = resp.text().unwrap_or_default();
            if !status.is_success() {
                return Err(classify_status(status, &text));
            }
            let outcome: serde_json::Value = serde_json::from_str(&text).map_err(|e| CliError::terminal(e.to_string()))?;
            Ok(outcome["completed"].as_u64().unwrap_or(0) as usize)
        })?;
        total += completed;
    }
    Ok(total)
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("a'b"), "'a'\\''b'");
    }

    #[test]
    fn allocate_local_port_returns_nonzero() {
        assert_ne!(allocate_local_port().unwrap(), 0);
    }
}
