//! `hash --stream`: a transparent pass-through from standard input to
//! standard output that emits the streaming xxh3-64 digest, lowercase hex,
//! on standard error once the input is exhausted.

use std::io;
use std::process::exit;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) != Some("--stream") {
        eprintln!("usage: hash --stream");
        exit(2);
    }

    let stdin = io::stdin();
    let stdout = io::stdout();
    match s4_core::checksum::hash_stream(stdin.lock(), stdout.lock()) {
        Ok(digest) => eprint!("{digest}"),
        Err(e) => {
            eprintln!("hash failed: {e}");
            exit(1);
        }
    }
}
