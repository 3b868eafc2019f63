//! `recv <port>`: listens on the given port, accepts exactly one
//! connection, streams its bytes to standard output, then closes.

use std::io;
use std::net::TcpListener;
use std::process::exit;

fn main() {
    let mut args = std::env::args().skip(1);
    let Some(port) = args.next() else {
        eprintln!("usage: recv <port>");
        exit(2);
    };
    let port: u16 = match port.parse() {
        Ok(p) => p,
        Err(_) => {
            eprintln!("invalid port: {port}");
            exit(2);
        }
    };

    let listener = match TcpListener::bind(("0.0.0.0", port)) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("failed to bind 0.0.0.0:{port}: {e}");
            exit(1);
        }
    };

    let (mut stream, _) = match listener.accept() {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("failed to accept connection: {e}");
            exit(1);
        }
    };

    let mut stdout = io::stdout();
    if let Err(e) = io::copy(&mut stream, &mut stdout) {
        eprintln!("recv failed: {e}");
        exit(1);
    }
}
