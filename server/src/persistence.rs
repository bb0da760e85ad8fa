//! Durable JSON tables and the debounce that bounds how often they are written.

use crate::error::StorageError;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Coalesces bursts of "dirty" marks into one write per window.
///
/// The window opens on the first mark and is not pushed back by later marks,
/// so a constant stream of changes still flushes once per `delay`.
#[derive(Debug)]
pub struct Debounce {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn mark(&mut self, now: Instant) {
        if self.deadline.is_none() {
            self.deadline = Some(now + self.delay);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_dirty(&self) -> bool {
        self.deadline.is_some()
    }

    /// Returns true and resets when the window has elapsed.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.deadline = None;
    }
}

/// Sleep until `deadline`, or forever when there is none.
pub async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Read a flat `key -> record` JSON table. A missing file is an empty table.
pub fn read_table(path: &Path) -> Result<Map<String, Value>, StorageError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_str::<Value>(&text)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Write via a sibling temp file and rename, so readers never see a torn file.
pub async fn write_table(path: &Path, bytes: Vec<u8>) -> Result<(), StorageError> {
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Blocking variant for the shutdown path.
pub fn write_table_sync(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let tmp = tmp_path(path);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// One durable table with at most one background write in flight.
pub struct TableWriter {
    name: &'static str,
    path: PathBuf,
    in_flight: Option<JoinHandle<()>>,
}

impl TableWriter {
    pub fn new(name: &'static str, path: PathBuf) -> Self {
        Self {
            name,
            path,
            in_flight: None,
        }
    }

    /// Start an asynchronous write. Waits for the previous one first so two
    /// writes never race on the temp file.
    pub async fn write(&mut self, bytes: Vec<u8>) {
        self.settle().await;
        let path = self.path.clone();
        let name = self.name;
        self.in_flight = Some(tokio::spawn(async move {
            match write_table(&path, bytes).await {
                Ok(()) => tracing::debug!("Saved {} to {}", name, path.display()),
                Err(e) => tracing::warn!("Failed to save {}: {}", name, e),
            }
        }));
    }

    /// Final synchronous write used on shutdown.
    pub async fn write_final(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        self.settle().await;
        write_table_sync(&self.path, bytes)
    }

    async fn settle(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            if let Err(e) = handle.await {
                tracing::warn!("Background {} save task failed: {}", self.name, e);
            }
        }
    }
}
