//! Streaming xxh3-64 helper shared by the `hash` binary and by tests.
//! Produces the same lowercase 16-hex-digit form the sidecar file stores.

use xxhash_rust::xxh3::Xxh3;

pub fn hex_digest(hasher: &Xxh3) -> String {
    format!("{:016x}", hasher.digest())
}

/// Hashes a byte slice in one shot, mainly useful in tests.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Xxh3::new();
    hasher.update(data);
    hex_digest(&hasher)
}

/// Streams `reader` through the hasher, writing every chunk to `writer` as
/// it's read, and returns the final digest. This is the in-process
/// equivalent of `hash --stream`'s pass-through behavior.
pub fn hash_stream<R: std::io::Read, W: std::io::Write>(
    mut reader: R,
    mut writer: W,
) -> std::io::Result<String> {
    let mut hasher = Xxh3::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n])?;
    }
    Ok(hex_digest(&hasher))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_bytes_is_deterministic() {
        let a = hash_bytes(b"123");
        let b = hash_bytes(b"123");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn different_input_different_hash() {
        assert_ne!(hash_bytes(b"123"), hash_bytes(b"456"));
    }

    #[test]
    fn hash_stream_passes_bytes_through_unchanged() {
        let input = b"hello world".to_vec();
        let mut out = Vec::new();
        let digest = hash_stream(&input[..], &mut out).unwrap();
        assert_eq!(out, input);
        assert_eq!(digest, hash_bytes(&input));
    }
}
