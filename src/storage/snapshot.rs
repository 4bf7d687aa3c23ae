// src/storage/snapshot.rs
//! Snapshot and append-only file primitives.
//!
//! - Snapshots are JSON arrays, gzip-compressed on disk (`*.json.gz`).
//!   Writes go through a temp file and an atomic rename so a crash leaves
//!   either the old snapshot or the new one, never a torn file.
//! - Reads accept an uncompressed `*.json` as a fallback for stores written
//!   before compression; [`migrate_to_compressed`] upgrades such a file.
//! - Logs are JSONL: one record per line, append-only, malformed lines are
//!   skipped with a warning rather than poisoning the whole log.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// The on-disk compressed twin of a logical `*.json` path.
pub fn gz_path(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|ext| ext == "gz") {
        return path.to_path_buf();
    }
    let mut name = path.as_os_str().to_os_string();
    name.push(".gz");
    PathBuf::from(name)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    Ok(())
}

/// Write bytes through a temp file and rename into place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent(path)?;
    let tmp = path.with_extension("tmp");
    {
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("create temp file {}", tmp.display()))?;
        f.write_all(bytes)
            .with_context(|| format!("write temp file {}", tmp.display()))?;
        f.sync_all().ok();
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

/// Read a snapshot at the logical `path`: compressed form first, plain JSON
/// as a fallback, empty collection when neither exists.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let gz = gz_path(path);
    if gz.exists() {
        let raw = fs::read(&gz).with_context(|| format!("read snapshot {}", gz.display()))?;
        let mut decoder = GzDecoder::new(&raw[..]);
        let mut json = String::new();
        decoder
            .read_to_string(&mut json)
            .with_context(|| format!("decompress snapshot {}", gz.display()))?;
        return serde_json::from_str(&json)
            .with_context(|| format!("parse snapshot {}", gz.display()));
    }
    if path.exists() {
        let json =
            fs::read_to_string(path).with_context(|| format!("read snapshot {}", path.display()))?;
        return serde_json::from_str(&json)
            .with_context(|| format!("parse snapshot {}", path.display()));
    }
    Ok(Vec::new())
}

/// Serialize records and write the compressed snapshot atomically.
pub fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let json = serde_json::to_vec(records).context("serialize snapshot")?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .context("compress snapshot")?;
    let bytes = encoder.finish().context("finish snapshot compression")?;
    write_atomic(&gz_path(path), &bytes)
}

/// Upgrade a plain `*.json` snapshot to the compressed form.
///
/// Returns `true` when a migration happened. No-op when the compressed file
/// already exists or there is nothing to migrate. The plain file is removed
/// only after the compressed snapshot is safely in place.
pub fn migrate_to_compressed(path: &Path) -> Result<bool> {
    let gz = gz_path(path);
    if gz.exists() || !path.exists() {
        return Ok(false);
    }
    let json =
        fs::read_to_string(path).with_context(|| format!("read snapshot {}", path.display()))?;
    // Refuse to migrate a file that is not valid JSON.
    let _: serde_json::Value = serde_json::from_str(&json)
        .with_context(|| format!("parse snapshot {}", path.display()))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(json.as_bytes()).context("compress snapshot")?;
    let bytes = encoder.finish().context("finish snapshot compression")?;
    write_atomic(&gz, &bytes)?;
    fs::remove_file(path)
        .with_context(|| format!("remove migrated snapshot {}", path.display()))?;
    tracing::debug!(path = %path.display(), "migrated snapshot to compressed form");
    Ok(true)
}

/// Append one record as a JSON line.
pub fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    ensure_parent(path)?;
    let line = serde_json::to_string(record).context("serialize log record")?;
    let mut f = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log {}", path.display()))?;
    writeln!(f, "{line}").with_context(|| format!("append log {}", path.display()))?;
    Ok(())
}

/// Read every parseable record from a JSONL file, in file order.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("read log {}", path.display()))?;
    let mut records = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(record) => records.push(record),
            Err(err) => {
                tracing::warn!(path = %path.display(), line = idx + 1, %err, "skipping malformed log line");
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gz_path_appends_suffix_once() {
        assert_eq!(gz_path(Path::new("a/core.json")), PathBuf::from("a/core.json.gz"));
        assert_eq!(
            gz_path(Path::new("a/core.json.gz")),
            PathBuf::from("a/core.json.gz")
        );
    }

    #[test]
    fn snapshot_round_trips_compressed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("items.json");
        write_records(&path, &[1u32, 2, 3]).expect("write");
        assert!(gz_path(&path).exists());
        assert!(!path.exists());
        let back: Vec<u32> = read_records(&path).expect("read");
        assert_eq!(back, vec![1, 2, 3]);
    }

    #[test]
    fn read_falls_back_to_plain_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("items.json");
        fs::write(&path, "[7,8]").expect("seed plain file");
        let back: Vec<u32> = read_records(&path).expect("read");
        assert_eq!(back, vec![7, 8]);
    }

    #[test]
    fn migrate_compresses_and_removes_plain() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("items.json");
        fs::write(&path, "[1]").expect("seed plain file");
        assert!(migrate_to_compressed(&path).expect("migrate"));
        assert!(!path.exists());
        assert!(gz_path(&path).exists());
        // Second call is a no-op.
        assert!(!migrate_to_compressed(&path).expect("migrate again"));
        let back: Vec<u32> = read_records(&path).expect("read");
        assert_eq!(back, vec![1]);
    }

    #[test]
    fn jsonl_skips_malformed_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log.jsonl");
        append_jsonl(&path, &serde_json::json!({"n": 1})).expect("append");
        fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "not json"))
            .expect("corrupt line");
        append_jsonl(&path, &serde_json::json!({"n": 2})).expect("append");
        let back: Vec<serde_json::Value> = read_jsonl(&path).expect("read");
        assert_eq!(back.len(), 2);
        assert_eq!(back[1]["n"], 2);
    }
}
