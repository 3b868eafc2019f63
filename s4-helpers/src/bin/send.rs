//! `send <address> <port>`: connects to the peer on the given port and
//! streams standard input to it, then closes. Node-side mirror of `recv`.

use std::io;
use std::net::TcpStream;
use std::process::exit;

fn main() {
    let mut args = std::env::args().skip(1);
    let (Some(address), Some(port)) = (args.next(), args.next()) else {
        eprintln!("usage: send <address> <port>");
        exit(2);
    };
    let port: u16 = match port.parse() {
        Ok(p) => p,
        Err(_) => {
            eprintln!("invalid port: {port}");
            exit(2);
        }
    };

    let mut stream = match TcpStream::connect((address.as_str(), port)) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to connect to {address}:{port}: {e}");
            exit(1);
        }
    };

    let mut stdin = io::stdin();
    if let Err(e) = io::copy(&mut stdin, &mut stream) {
        eprintln!("send failed: {e}");
        exit(1);
    }
}
