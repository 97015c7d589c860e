//! Release fetcher (C13): version discovery, artifact download, checksum
//! verification, and atomic binary replacement. Pure helpers with no
//! workflow-level policy — `upgrade` (C12) decides what to fetch and
//! where to put it.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, serde::Deserialize)]
struct LatestRelease {
    tag_name: String,
}

/// Queries the releases API for the latest published tag, stripping a
/// leading `v` if present.
pub fn latest_version(api_url: &str) -> Result<String> {
    let response = ureq::get(api_url)
        .timeout(DOWNLOAD_TIMEOUT)
        .set("User-Agent", "hopbox")
        .call()
        .map_err(|err| Error::other(format!("failed to query latest release: {err}")))?;
    let release: LatestRelease = response
        .into_json()
        .map_err(|err| Error::other(format!("malformed release API response: {err}")))?;
    Ok(release.tag_name.trim_start_matches('v').to_string())
}

/// HTTP GET with a timeout, returning the full response body.
pub fn download(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url)
        .timeout(DOWNLOAD_TIMEOUT)
        .call()
        .map_err(|err| Error::other(format!("failed to download {url}: {err}")))?;
    let mut buf = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut buf)
        .map_err(|source| Error::Io {
            path: std::path::PathBuf::from(url),
            source,
        })?;
    Ok(buf)
}

/// Parses a `checksums.txt` body: one line per artifact, `<hex>  <filename>`.
pub fn parse_checksums(body: &str) -> HashMap<String, String> {
    body.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let hex = parts.next()?;
            let filename = parts.next()?;
            Some((filename.to_string(), hex.to_lowercase()))
        })
        .collect()
}

/// Computes the lowercase hex SHA-256 digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verifies that `data`'s digest matches the entry for `artifact` in
/// `checksums`. Distinct error kinds for "missing entry" vs "mismatch".
pub fn verify_checksum(checksums: &HashMap<String, String>, artifact: &str, data: &[u8]) -> Result<()> {
    let expected = checksums
        .get(artifact)
        .ok_or_else(|| Error::ChecksumMissing {
            artifact: artifact.to_string(),
        })?;
    let actual = sha256_hex(data);
    if &actual != expected {
        return Err(Error::ChecksumMismatch {
            artifact: artifact.to_string(),
            expected: expected.clone(),
            actual,
        });
    }
    Ok(())
}

/// Writes `data` to `<path>.new` with the given mode, then renames it onto
/// `path`. On any error the temp file is removed so a failed upgrade never
/// leaves a partial file where a whole one would be expected.
pub fn atomic_replace(path: &Path, data: &[u8], mode: u32) -> Result<()> {
    let tmp_path = path.with_extension("new");
    let result = (|| -> Result<()> {
        let mut file = fs::File::create(&tmp_path).map_err(|source| Error::Io {
            path: tmp_path.clone(),
            source,
        })?;
        file.write_all(data).map_err(|source| Error::Io { path: tmp_path.clone(), source })?;
        file.set_permissions(fs::Permissions::from_mode(mode))
            .map_err(|source| Error::Io { path: tmp_path.clone(), source })?;
        drop(file);
        fs::rename(&tmp_path, path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// The conventional artifact filename for a release, e.g.
/// `hop_1.2.3_linux_x86_64`.
pub fn artifact_name(binary: &str, version: &str, os: &str, arch: &str) -> String {
    format!("{binary}_{version}_{os}_{arch}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_checksums_reads_hex_and_filename() {
        let body = "deadbeef  hop_1.0.0_linux_x86_64\ncafef00d  checksums_other\n";
        let parsed = parse_checksums(body);
        assert_eq!(
            parsed.get("hop_1.0.0_linux_x86_64"),
            Some(&"deadbeef".to_string())
        );
    }

    #[test]
    fn verify_checksum_detects_mismatch() {
        let mut checksums = HashMap::new();
        checksums.insert("artifact".to_string(), "0".repeat(64));
        let err = verify_checksum(&checksums, "artifact", b"data").unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn verify_checksum_accepts_matching_digest() {
        let data = b"hello world";
        let mut checksums = HashMap::new();
        checksums.insert("artifact".to_string(), sha256_hex(data));
        assert!(verify_checksum(&checksums, "artifact", data).is_ok());
    }

    #[test]
    fn verify_checksum_missing_entry_is_distinct_error() {
        let checksums = HashMap::new();
        let err = verify_checksum(&checksums, "ghost", b"data").unwrap_err();
        assert!(matches!(err, Error::ChecksumMissing { .. }));
    }

    #[test]
    fn atomic_replace_cleans_up_temp_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        // Target a directory that does not exist so rename fails.
        let bogus = dir.path().join("missing-subdir").join("hop");
        let err = atomic_replace(&bogus, b"data", 0o755);
        assert!(err.is_err());
        assert!(!bogus.with_extension("new").exists());
    }

    #[test]
    fn atomic_replace_writes_executable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hop");
        atomic_replace(&path, b"binary-data", 0o755).unwrap();
        let metadata = fs::metadata(&path).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o755);
    }
}
