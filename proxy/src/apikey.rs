use anyhow::{Context, Result};
use rand::RngCore;
use std::io::Write;
use std::path::Path;

/// Generates the 32-byte ingestion key, hex-encoded.
pub(crate) fn generate() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Writes the key where the watcher expects it, readable only inside the pod.
pub(crate) fn write_file(path: &Path, key: &str) -> Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("failed to open API key file {}", path.display()))?;
    file.write_all(key.as_bytes())
        .with_context(|| format!("failed to write API key file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_64_hex_chars_and_unique() {
        let a = generate();
        let b = generate();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("api.key");
        let key = generate();
        write_file(&path, &key).expect("write");

        assert_eq!(std::fs::read_to_string(&path).expect("read"), key);
        let mode = std::fs::metadata(&path).expect("stat").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
