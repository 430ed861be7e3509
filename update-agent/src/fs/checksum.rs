//! SHA-256 of local files.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

const READ_BUFFER: usize = 64 * 1024;

/// Lowercase hex SHA-256 of a file, streamed in fixed-size chunks.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::with_capacity(READ_BUFFER, File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUFFER];

    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// [`sha256_file`] on the blocking pool.
pub async fn sha256_file_async(path: PathBuf) -> io::Result<String> {
    tokio::task::spawn_blocking(move || sha256_file(&path))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

/// Case-insensitive hex comparison.
pub fn checksums_match(expected: &str, actual: &str) -> bool {
    expected.eq_ignore_ascii_case(actual)
}

pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    // sha256("hello world")
    const HELLO: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_sha256_file() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("hello.txt");
        fs::write(&path, b"hello world")?;

        assert_eq!(sha256_file(&path)?, HELLO);
        assert_eq!(sha256_bytes(b"hello world"), HELLO);
        Ok(())
    }

    #[test]
    fn test_mixed_case_comparison() {
        assert!(checksums_match(&HELLO.to_ascii_uppercase(), HELLO));
        assert!(!checksums_match(HELLO, &sha256_bytes(b"other")));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = sha256_file_async(temp_dir.path().join("absent")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
