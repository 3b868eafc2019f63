//! `s4`: a thin command-line front end to the object store. Every
//! subcommand resolves the owning node(s) from the roster file and talks
//! HTTP plus the `send`/`recv`/`hash` helper pipeline to them; it never
//! touches the data directory directly.

mod client;

use client::CliError;
use s4_core::config::Roster;
use s4_core::routing;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::process::exit;

fn usage() -> ! {
    eprintln!(
        "usage:\n\
         \u{20}\u{20}s4 cp <src> <dst> [--recursive]\n\
         \u{20}\u{20}s4 ls <prefix> [--recursive]\n\
         \u{20}\u{20}s4 rm <prefix> [--recursive]\n\
         \u{20}\u{20}s4 buckets\n\
         \u{20}\u{20}s4 eval <key> <cmd>\n\
         \u{20}\u{20}s4 map <in_dir> <out_dir> <cmd>\n\
         \u{20}\u{20}s4 map-to-n <in_dir> <out_dir> <cmd>\n\
         \u{20}\u{20}s4 map-from-n <in_dir> <out_dir> <cmd>"
    );
    exit(2);
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        usage();
    }

    let result = match args[0].as_str() {
        "cp" => run_cp(&args[1..]),
        "ls" => run_ls(&args[1..]),
        "rm" => run_rm(&args[1..]),
        "buckets" => run_buckets(),
        "eval" => run_eval(&args[1..]),
        "map" => run_map(&args[1..]),
        "map-to-n" => run_map_to_n(&args[1..]),
        "map-from-n" => run_map_from_n(&args[1..]),
        _ => usage(),
    };

    if let Err(e) = result {
        eprintln!("s4: {e}");
        exit(1);
    }
}

fn http_client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::new()
}

fn is_remote(arg: &str) -> bool {
    arg.starts_with(routing::SCHEME)
}

fn run_cp(args: &[String]) -> Result<(), CliError> {
    let recursive = args.iter().any(|a| a == "--recursive");
    let positional: Vec<&str> = args.iter().map(String::as_str).filter(|a| *a != "--recursive").collect();
    if positional.len() != 2 {
        return Err(CliError::terminal("cp takes exactly <src> <dst>"));
    }
    let (src, dst) = (positional[0], positional[1]);

    let roster = client::load_roster()?;
    let http = http_client();

    match (is_remote(src), is_remote(dst)) {
        (false, true) if !recursive => client::put(&http, &roster, Path::new(src), dst),
        (true, false) if !recursive => client::get(&http, &roster, src, Path::new(dst)),
        (false, true) => put_tree(&http, &roster, Path::new(src), dst),
        (true, false) => get_tree(&http, &roster, src, Path::new(dst)),
        (true, true) => Err(CliError::terminal("s4-to-s4 copy is not supported; copy through a local path")),
        (false, false) => Err(CliError::terminal("at least one of <src>/<dst> must be an s4:// key")),
    }
}

fn put_tree(http: &reqwest::blocking::Client, roster: &Roster, src_dir: &Path, dst_prefix: &str) -> Result<(), CliError> {
    let dst_prefix = dst_prefix.trim_end_matches('/');
    for entry in walk_local(src_dir)? {
        let relative = entry.strip_prefix(src_dir).unwrap_or(&entry).to_string_lossy().replace('\\', "/");
        let key = format!("{dst_prefix}/{relative}");
        client::put(http, roster, &entry, &key)?;
    }
    Ok(())
}

fn get_tree(http: &reqwest::blocking::Client, roster: &Roster, src_prefix: &str, dst_dir: &Path) -> Result<(), CliError> {
    let src_prefix = src_prefix.strip_prefix(routing::SCHEME).unwrap_or(src_prefix);
    let entries = client::list_all(http, roster, src_prefix, true)?;
    for entry in entries {
        let relative = entry.path.trim_start_matches(src_prefix.trim_start_matches('/')).trim_start_matches('/');
        let local_path = dst_dir.join(relative);
        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CliError::terminal(e.to_string()))?;
        }
        let key = format!("{}{}", routing::SCHEME, entry.path);
        client::get(http, roster, &key, &local_path)?;
    }
    Ok(())
}

fn walk_local(dir: &Path) -> Result<Vec<PathBuf>, CliError> {
    let mut out = Vec::new();
    let read_dir = std::fs::read_dir(dir).map_err(|e| CliError::terminal(e.to_string()))?;
    for entry in read_dir {
        let entry = entry.map_err(|e| CliError::terminal(e.to_string()))?;
        let path = entry.path();
        if path.is_dir() {
            out.extend(walk_local(&path)?);
        } else {
            out.push(path);
        }
    }
    Ok(out)
}

fn run_ls(args: &[String]) -> Result<(), CliError> {
    let recursive = args.iter().any(|a| a == "--recursive");
    let prefix = args.iter().find(|a| a.as_str() != "--recursive").cloned().unwrap_or_default();
    let prefix = prefix.strip_prefix(routing::SCHEME).unwrap_or(&prefix).to_string();

    let roster = client::load_roster()?;
    let http = http_client();
    let entries = client::list_all(&http, &roster, &prefix, recursive)?;
    for entry in entries {
        println!("{} {} {:>10} {}", entry.date, entry.time, entry.size, entry.path);
    }
    Ok(())
}

fn run_rm(args: &[String]) -> Result<(), CliError> {
    let recursive = args.iter().any(|a| a == "--recursive");
    let prefix = args.iter().find(|a| a.as_str() != "--recursive").cloned().unwrap_or_default();
    let prefix = prefix.strip_prefix(routing::SCHEME).unwrap_or(&prefix).to_string();

    let roster = client::load_roster()?;
    let http = http_client();
    client::delete_all(&http, &roster, &prefix, recursive)
}

fn run_buckets() -> Result<(), CliError> {
    let roster = client::load_roster()?;
    let http = http_client();
    for bucket in client::list_buckets_all(&http, &roster)? {
        println!("{bucket}");
    }
    Ok(())
}

fn run_eval(args: &[String]) -> Result<(), CliError> {
    let [key, cmd] = args else {
        return Err(CliError::terminal("eval takes exactly <key> <cmd>"));
    };
    let roster = client::load_roster()?;
    let http = http_client();
    let stdout = client::eval(&http, &roster, key, cmd)?;
    print!("{stdout}");
    Ok(())
}

/// Enumerates `in_dir` and pairs each key with its namesake under `out_dir`.
fn pair_keys(http: &reqwest::blocking::Client, roster: &Roster, in_dir: &str, out_dir: &str) -> Result<Vec<(String, String)>, CliError> {
    let in_prefix = in_dir.strip_prefix(routing::SCHEME).unwrap_or(in_dir.as_str());
    let entries = client::list_all(http, roster, in_prefix, true)?;
    let out_dir = out_dir.trim_end_matches('/');
    let mut pairs = Vec::new();
    for entry in entries {
        let relative = entry.path.trim_start_matches(in_prefix.trim_start_matches('/')).trim_start_matches('/');
        pairs.push((format!("{}{}", routing::SCHEME, entry.path), format!("{out_dir}/{relative}")));
    }
    Ok(pairs)
}

fn run_map(args: &[String]) -> Result<(), CliError> {
    let [in_dir, out_dir, cmd] = args else {
        return Err(CliError::terminal("map takes exactly <in_dir> <out_dir> <cmd>"));
    };
    let roster = client::load_roster()?;
    let http = http_client();
    let pairs = pair_keys(&http, &roster, in_dir, out_dir)?;
    let completed = client::map(&http, &roster, pairs, cmd)?;
    println!("completed {completed}");
    Ok(())
}

fn run_map_to_n(args: &[String]) -> Result<(), CliError> {
    let [in_dir, out_dir, cmd] = args else {
        return Err(CliError::terminal("map-to-n takes exactly <in_dir> <out_dir> <cmd>"));
    };
    let roster = client::load_roster()?;
    let http = http_client();
    let in_prefix = in_dir.strip_prefix(routing::SCHEME).unwrap_or(in_dir.as_str());
    let entries = client::list_all(&http, &roster, in_prefix, true)?;
    let pairs: Vec<(String, String)> = entries
        .into_iter()
        .map(|entry| (format!("{}{}", routing::SCHEME, entry.path), out_dir.clone()))
        .collect();
    let completed = client::map_to_n(&http, &roster, pairs, cmd)?;
    println!("completed {completed}");
    Ok(())
}

fn run_map_from_n(args: &[String]) -> Result<(), CliError> {
    let [in_dir, out_dir, cmd] = args else {
        return Err(CliError::terminal("map-from-n takes exactly <in_dir> <out_dir> <cmd>"));
    };
    let roster = client::load_roster()?;
    let http = http_client();
    let in_prefix = in_dir.strip_prefix(routing::SCHEME).unwrap_or(in_dir.as_str());
    let entries = client::list_all(&http, &roster, in_prefix, true)?;

    let mut groups: HashMap<String, Vec<String>> = HashMap::new();
    for entry in entries {
        let key = format!("{}{}", routing::SCHEME, entry.path);
        let bucket = routing::bucket_segment(&key).map_err(|e| CliError::terminal(e.message))?;
        groups.entry(bucket).or_default().push(key);
    }
    let groups: Vec<Vec<String>> = groups.into_values().collect();

    let completed = client::map_from_n(&http, &roster, groups, out_dir, cmd)?;
    println!("completed {completed}");
    Ok(())
}
