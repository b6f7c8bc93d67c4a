//! SHA-256 checksum helpers shared by artifact collection and restore-time
//! verification.

use std::collections::BTreeMap;
use std::io::{self, Read};

use sha2::{Digest, Sha256};

/// Relative file path (as `./dir/file`) to lowercase SHA-256 hex digest.
pub type Checksums = BTreeMap<String, String>;

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Compute a SHA-256 hex digest by streaming `reader` to the end.
pub fn sha256_hex_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Normalize a relative archive path to the `./path` form used as a key.
pub fn checksum_key(relative: &str) -> String {
    let trimmed = relative.trim_start_matches("./").trim_start_matches('/');
    format!("./{trimmed}")
}

/// Human-readable differences between recorded and actual checksums.
///
/// Empty when the two maps are identical.
pub fn checksum_mismatches(expected: &Checksums, actual: &Checksums) -> Vec<String> {
    let mut problems = Vec::new();
    for (path, digest) in expected {
        match actual.get(path) {
            None => problems.push(format!("{path} is missing")),
            Some(found) if found != digest => problems.push(format!("{path} has changed")),
            Some(_) => {}
        }
    }
    for path in actual.keys().filter(|p| !expected.contains_key(*p)) {
        problems.push(format!("{path} is unexpected"));
    }
    problems
}
