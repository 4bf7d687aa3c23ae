// src/storage/lock.rs
//! Single-writer exclusive lock.
//!
//! Mutating command sequences (intake, maintenance, aggregation, principle
//! edits) run under one lockfile created with `O_EXCL`. Readers never take
//! the lock. Acquisition retries briefly for a contended lock, and a
//! lockfile left behind by a dead process is taken over once it is older
//! than the stale window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::errors::{EngineError, Result};

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for the writer lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    /// Acquire the lock at `path`, waiting up to `wait` for a live holder
    /// and taking over a lockfile older than `stale_after`.
    pub fn acquire(path: &Path, wait: Duration, stale_after: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| anyhow::Error::new(err).context("create lock directory"))?;
        }
        let deadline = Instant::now() + wait;
        loop {
            match fs::OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut f) => {
                    let info = LockInfo {
                        pid: std::process::id(),
                        acquired_at: Utc::now(),
                    };
                    if let Ok(line) = serde_json::to_string(&info) {
                        let _ = f.write_all(line.as_bytes());
                        let _ = f.sync_all();
                    }
                    tracing::debug!(path = %path.display(), "writer lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(path, stale_after) {
                        tracing::info!(path = %path.display(), "taking over stale writer lock");
                        match fs::remove_file(path) {
                            Ok(()) => continue,
                            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                            Err(err) => {
                                return Err(EngineError::Storage(
                                    anyhow::Error::new(err).context("remove stale lock"),
                                ))
                            }
                        }
                    }
                    if Instant::now() >= deadline {
                        return Err(EngineError::Locked(format!(
                            "{} ({})",
                            path.display(),
                            describe_holder(path)
                        )));
                    }
                    std::thread::sleep(RETRY_INTERVAL);
                }
                Err(err) => {
                    return Err(EngineError::Storage(
                        anyhow::Error::new(err)
                            .context(format!("create lock {}", path.display())),
                    ))
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), %err, "failed to release writer lock");
            }
        }
    }
}

fn lock_age(path: &Path) -> Option<chrono::Duration> {
    if let Ok(raw) = fs::read_to_string(path) {
        if let Ok(info) = serde_json::from_str::<LockInfo>(&raw) {
            return Some(Utc::now() - info.acquired_at);
        }
    }
    // Half-written lockfile: fall back to the file clock.
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let age = std::time::SystemTime::now().duration_since(modified).ok()?;
    chrono::Duration::from_std(age).ok()
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    match (lock_age(path), chrono::Duration::from_std(stale_after)) {
        (Some(age), Ok(window)) => age > window,
        _ => false,
    }
}

fn describe_holder(path: &Path) -> String {
    match fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<LockInfo>(&raw).ok())
    {
        Some(info) => format!(
            "held by pid {} since {}",
            info.pid,
            info.acquired_at.to_rfc3339()
        ),
        None => "holder unknown".to_string(),
    }
}
