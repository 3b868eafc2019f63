//! Directory listing, bucket listing, and delete. Delete runs on the
//! single-writer pool since it mutates the on-disk layout; listing is
//! read-only and runs inline (it's bounded by directory size, not subject
//! to admission control in the original design).

use crate::error::S4Error;
use crate::node::Node;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

#[derive(Debug, Clone, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ListEntry {
    pub date: String,
    pub time: String,
    pub size: String,
    pub path: String,
}

const SIDECAR_EXT: &str = "xxh3";

fn format_entry(relative_path: &str, metadata: &fs::Metadata, is_dir: bool) -> ListEntry {
    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let dt: DateTime<Local> = modified.into();
    ListEntry {
        date: dt.format("%Y-%m-%d").to_string(),
        time: dt.format("%H:%M:%S").to_string(),
        size: if is_dir { "PRE".to_string() } else { metadata.len().to_string() },
        path: relative_path.to_string(),
    }
}

/// `list(prefix, recursive)`: walks the filesystem under `prefix`, filtering
/// out sidecar files. Non-recursive yields files and directories exactly
/// one level deep; recursive yields every file under the prefix.
pub fn list(data_root: &Path, prefix: &str, recursive: bool) -> Result<Vec<ListEntry>, S4Error> {
    let base = data_root.join(prefix.trim_start_matches('/'));
    let (walk_root, name_prefix) = if base.is_dir() {
        (base.clone(), String::new())
    } else {
        let parent = base.parent().unwrap_or(data_root).to_path_buf();
        let stem = base.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        (parent, stem)
    };

    if !walk_root.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    walk(&walk_root, data_root, &name_prefix, recursive, &mut entries)?;
    entries.sort();
    Ok(entries)
}

fn walk(dir: &Path, data_root: &Path, name_prefix: &str, recursive: bool, out: &mut Vec<ListEntry>) -> Result<(), S4Error> {
    let read_dir = fs::read_dir(dir).map_err(|e| S4Error::internal(e.to_string(), "listing"))?;
    for entry in read_dir {
        let entry = entry.map_err(|e| S4Error::internal(e.to_string(), "listing"))?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        if !name_prefix.is_empty() && !file_name.starts_with(name_prefix) {
            continue;
        }
        let path = entry.path();
        let metadata = entry.metadata().map_err(|e| S4Error::internal(e.to_string(), "listing"))?;
        let relative = path
            .strip_prefix(data_root)
            .unwrap_or(&path)
            .to_string_lossy()
            .to_string();

        if metadata.is_dir() {
            if recursive {
                walk(&path, data_root, "", true, out)?;
            } else {
                out.push(format_entry(&relative, &metadata, true));
            }
            continue;
        }

        if path.extension().and_then(|e| e.to_str()) == Some(SIDECAR_EXT) {
            continue;
        }
        out.push(format_entry(&relative, &metadata, false));
    }
    Ok(())
}

/// `list_buckets()`: immediate children of the data root that are
/// directories and do not begin with `_`.
pub fn list_buckets(data_root: &Path) -> Result<Vec<String>, S4Error> {
    if !data_root.exists() {
        return Ok(Vec::new());
    }
    let mut buckets = Vec::new();
    for entry in fs::read_dir(data_root).map_err(|e| S4Error::internal(e.to_string(), "listing"))? {
        let entry = entry.map_err(|e| S4Error::internal(e.to_string(), "listing"))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('_') {
            continue;
        }
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            buckets.push(name);
        }
    }
    buckets.sort();
    Ok(buckets)
}

/// `delete(prefix, recursive)`: non-recursive removes the exact data file
/// and its sidecar; recursive removes everything matching the prefix glob,
/// sidecars included.
pub async fn delete(node: &Node, prefix: &str, recursive: bool) -> Result<(), S4Error> {
    let data_root = node.data_root.clone();
    let prefix = prefix.to_string();
    node.pools
        .single_writer
        .submit(node.timeout, move |started| {
            started.signal();
            delete_blocking(&data_root, &prefix, recursive)
        })
        .await?
        .join()
        .await?
}

fn delete_blocking(data_root: &Path, prefix: &str, recursive: bool) -> Result<(), S4Error> {
    let base = data_root.join(prefix.trim_start_matches('/'));

    if !recursive {
        let sidecar = crate::routing::checksum_path(&base);
        let _ = fs::remove_file(&base);
        let _ = fs::remove_file(&sidecar);
        return Ok(());
    }

    let pattern = format!("{}*", base.display());
    for entry in glob::glob(&pattern).map_err(|e| S4Error::internal(e.to_string(), "listing"))? {
        let path = entry.map_err(|e| S4Error::internal(e.to_string(), "listing"))?;
        if path.is_dir() {
            let _ = fs::remove_dir_all(&path);
        } else {
            let _ = fs::remove_file(&path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_files_and_directories_at_one_depth() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b/dir")).unwrap();
        fs::write(root.join("b/f.txt"), b"hi").unwrap();
        fs::write(root.join("b/f.txt.xxh3"), b"deadbeef").unwrap();

        let entries = list(root, "b/", false).unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.clone()).collect();
        assert!(paths.contains(&"b/f.txt".to_string()));
        assert!(paths.contains(&"b/dir".to_string()));
        assert!(!paths.iter().any(|p| p.ends_with(".xxh3")));
    }

    #[test]
    fn list_buckets_excludes_reserved() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b")).unwrap();
        fs::create_dir_all(root.join("_tempfiles")).unwrap();
        let buckets = list_buckets(root).unwrap();
        assert_eq!(buckets, vec!["b".to_string()]);
    }
}
