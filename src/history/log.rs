//! Append-only durable log of encoded sample records.
//!
//! One log file per resource identity. Records are framed with a u32
//! little-endian length prefix so a single bad record never poisons the
//! frames after it. Loading is forgiving in exactly the ways the operator
//! wants: a missing file means empty history, an unsupported-version frame
//! is skipped, and framing corruption truncates the remainder instead of
//! hiding the whole file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::error::{DecodeError, PersistenceResult};
use super::record::{MetricPayload, ResultRecord};
use crate::history::codec::WireReader;

/// Upper bound on a single frame; anything larger is framing corruption.
const MAX_FRAME_LEN: usize = 1 << 20;

/// Append handle for one resource's history log.
pub struct HistoryLog {
    path: PathBuf,
    /// Dropped after a write error and reopened on the next append, so a
    /// transient failure does not wedge the log forever.
    file: Option<File>,
}

impl HistoryLog {
    /// Open (creating if necessary) the log for appending.
    pub async fn open(path: PathBuf) -> PersistenceResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one already-encoded record as a length-prefixed frame.
    pub async fn append(&mut self, record: &[u8]) -> PersistenceResult<()> {
        if self.file.is_none() {
            self.file = Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .await?,
            );
        }

        // one buffer, one write: keeps a partial frame the least likely outcome
        let mut frame = Vec::with_capacity(4 + record.len());
        frame.extend_from_slice(&(record.len() as u32).to_le_bytes());
        frame.extend_from_slice(record);

        let result = async {
            let file = self.file.as_mut().ok_or_else(|| {
                std::io::Error::new(ErrorKind::Other, "log file unavailable")
            })?;
            file.write_all(&frame).await?;
            file.flush().await
        }
        .await;

        if result.is_err() {
            self.file = None;
        }
        result.map_err(Into::into)
    }

    /// Reconstruct the most recent `capacity` records from disk.
    ///
    /// Never fails: every problem degrades to "less history" with a log
    /// line, because refusing to monitor a resource over a damaged history
    /// file would be the wrong trade.
    pub async fn load<P: MetricPayload>(path: &Path, capacity: usize) -> Vec<ResultRecord<P>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                warn!("cannot read history log {}: {}", path.display(), err);
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        let mut pos = 0usize;

        while pos + 4 <= bytes.len() {
            let len = u32::from_le_bytes([
                bytes[pos],
                bytes[pos + 1],
                bytes[pos + 2],
                bytes[pos + 3],
            ]) as usize;

            if len > MAX_FRAME_LEN {
                warn!(
                    "history log {} corrupt at offset {}: frame length {} — truncating remainder",
                    path.display(),
                    pos,
                    len
                );
                break;
            }

            let start = pos + 4;
            let end = start + len;
            if end > bytes.len() {
                warn!(
                    "history log {} ends mid-frame at offset {} — truncating remainder",
                    path.display(),
                    pos
                );
                break;
            }

            match ResultRecord::<P>::decode(&mut WireReader::new(&bytes[start..end])) {
                Ok(record) => records.push(record),
                Err(DecodeError::UnsupportedVersion(version)) => {
                    // written by a newer build; skip the frame, keep reading
                    debug!(
                        "history log {}: skipping record with unsupported version {}",
                        path.display(),
                        version
                    );
                }
                Err(err) => {
                    warn!(
                        "history log {} corrupt at offset {}: {} — truncating remainder",
                        path.display(),
                        pos,
                        err
                    );
                    break;
                }
            }

            pos = end;
        }

        if records.len() > capacity {
            records.drain(..records.len() - capacity);
        }
        records
    }
}
