//! Maps keys to owning nodes and derives on-disk layout.
//!
//! The "hash only the digit prefix" rule is the sole mechanism by which
//! `map_from_n` is correct: two keys whose last path segment shares a
//! leading digit run always route to the same node. See
//! [`bucket_segment`] and [`routing_token`].

use crate::config::Roster;
use crate::error::S4Error;
use std::path::PathBuf;

pub const SCHEME: &str = "s4://";

/// Strips the `s4://` scheme, failing with `Malformed` if the key does not
/// start with it.
pub fn strip_scheme(key: &str) -> Result<&str, S4Error> {
    key.strip_prefix(SCHEME)
        .ok_or_else(|| S4Error::malformed(format!("key missing s4:// scheme: {key}"), "routing"))
}

/// Validates a key: must start with `s4://`, must not contain a space, and
/// must not name a bucket starting with `_` (reserved for node-local scratch
/// space).
pub fn validate_key(key: &str) -> Result<&str, S4Error> {
    let rest = strip_scheme(key)?;
    if rest.contains(' ') {
        return Err(S4Error::malformed(format!("key contains a space: {key}"), "routing"));
    }
    let bucket = rest.split('/').next().unwrap_or("");
    if bucket.starts_with('_') {
        return Err(S4Error::malformed(
            format!("bucket '{bucket}' is reserved"),
            "routing",
        ));
    }
    Ok(rest)
}

/// The leading `_`-separated run of the key's last path segment.
pub fn bucket_segment(key: &str) -> Result<String, S4Error> {
    let rest = strip_scheme(key)?;
    let last = rest.rsplit('/').next().unwrap_or(rest);
    let segment = last.split('_').next().unwrap_or(last);
    Ok(segment.to_string())
}

/// `true` if the bucket segment is a non-empty run of ASCII digits, making
/// it the routing token for the whole key.
fn is_numeric_segment(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// The string hashed to determine ownership: the numeric bucket segment
/// when present, otherwise the whole scheme-stripped key.
pub fn routing_token(key: &str) -> Result<String, S4Error> {
    let rest = strip_scheme(key)?;
    let segment = bucket_segment(key)?;
    if is_numeric_segment(&segment) {
        Ok(segment)
    } else {
        Ok(rest.to_string())
    }
}

fn hash64(token: &str) -> u64 {
    xxhash_rust::xxh3::xxh3_64(token.as_bytes())
}

/// The node index that owns `key`, per `index = hash64(routing_token) mod
/// |roster|`.
pub fn owner_index(key: &str, roster: &Roster) -> Result<usize, S4Error> {
    let token = routing_token(key)?;
    let len = roster.len();
    if len == 0 {
        return Err(S4Error::internal("roster is empty", "routing"));
    }
    Ok((hash64(&token) % len as u64) as usize)
}

/// The `address:port` of the node that owns `key`.
pub fn owner(key: &str, roster: &Roster) -> Result<String, S4Error> {
    let idx = owner_index(key, roster)?;
    Ok(roster.address_at(idx))
}

/// `true` if this process is the owner of `key`, i.e. the owning roster
/// entry was rewritten to the loopback sentinel at load time.
pub fn is_local(key: &str, roster: &Roster) -> Result<bool, S4Error> {
    Ok(owner(key, roster)?.starts_with("0.0.0.0:"))
}

/// The on-disk path for a key's blob: the data root joined with the key
/// minus its scheme.
pub fn on_disk_path(data_root: &std::path::Path, key: &str) -> Result<PathBuf, S4Error> {
    let rest = validate_key(key)?;
    Ok(data_root.join(rest))
}

/// The sidecar checksum path for a blob path.
pub fn checksum_path(path: &std::path::Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".xxh3");
    PathBuf::from(s)
}
