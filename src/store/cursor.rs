use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::messages_epoch_now;

/// Persists the timestamp of the newest consumed message.
///
/// The file holds a single base-10 integer in the Messages epoch. Writes
/// replace the whole file, never append.
#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted cursor.
    /// A missing or unparsable file starts from "now" so history is never replayed.
    pub fn load(&self) -> i64 {
        match fs::read_to_string(&self.path) {
            Ok(content) => match content.trim().parse::<i64>() {
                Ok(ts) => {
                    info!("Starting from last timestamp: {}", ts);
                    ts
                }
                Err(e) => {
                    warn!(
                        "Cursor file {} is unparsable ({}), starting from now",
                        self.path.display(),
                        e
                    );
                    messages_epoch_now()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No previous timestamp found, starting from now");
                messages_epoch_now()
            }
            Err(e) => {
                warn!(
                    "Failed to read cursor file {} ({}), starting from now",
                    self.path.display(),
                    e
                );
                messages_epoch_now()
            }
        }
    }

    /// Overwrite the cursor file with `timestamp`.
    ///
    /// Goes through a synced sibling temp file and a rename, so a crash leaves
    /// either the old value or the new one.
    pub fn save(&self, timestamp: i64) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)
                .with_context(|| format!("Failed to create {}", tmp.display()))?;
            file.write_all(timestamp.to_string().as_bytes())
                .with_context(|| format!("Failed to write {}", tmp.display()))?;
            file.sync_all()
                .with_context(|| format!("Failed to sync {}", tmp.display()))?;
        }
        fs::rename(&tmp, &self.path).with_context(|| {
            format!(
                "Failed to move {} over {}",
                tmp.display(),
                self.path.display()
            )
        })?;
        debug!("Cursor persisted: {}", timestamp);
        Ok(())
    }
}
