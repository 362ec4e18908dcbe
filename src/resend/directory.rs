//! Durable, directory-backed resend queue.
//!
//! One file per queued item. The filename is the formatted not-before
//! timestamp (`MM-dd-yy-HH-mm-ss`, with a numeric suffix on collision), so a
//! lexical directory listing yields due items first. The file content is the
//! JSON-encoded `(action, retries, message)` tuple.
//!
//! Atomicity comes from filesystem rename instead of a lock: claiming a due
//! item renames it into the `inflight/` subdirectory first, so concurrent
//! scanners can never both pick it up — the loser's rename fails and it
//! moves on. Failed items are renamed into `error/`.
//!
//! A filename whose timestamp fails to parse is treated as **immediately
//! due** rather than skipped: fail-open, so a corrupted name delays a
//! message instead of losing it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::message::Message;
use crate::resend::{ResendError, ResendItem, ResendQueue};

/// Timestamp pattern used for queue filenames. The month-first pattern is
/// the historical one; within a calendar year a lexical listing yields
/// earliest-due-first, and the scan parses every name rather than trusting
/// the order across year boundaries.
const FILENAME_FORMAT: &str = "%m-%d-%y-%H-%M-%S";
/// Length of a formatted `FILENAME_FORMAT` timestamp.
const FILENAME_STAMP_LEN: usize = 17;

const INFLIGHT_DIR: &str = "inflight";
const ERROR_DIR: &str = "error";

/// On-disk encoding of one queued item. The retries counter is kept as a
/// string so operators can read and edit queue files directly.
#[derive(Serialize, Deserialize)]
struct StoredItem {
    action: String,
    retries: String,
    message: Message,
}

/// Durable resend queue that survives restarts.
///
/// Clones share the same directory.
#[derive(Clone)]
pub struct DirectoryResendQueue {
    base: PathBuf,
    delay: Duration,
}

impl DirectoryResendQueue {
    /// Open (and create if needed) the queue rooted at `base`.
    ///
    /// Items left in `inflight/` by a previous crash are swept back into the
    /// queue so they are re-scanned rather than stranded.
    pub async fn open(base: impl Into<PathBuf>, delay: Duration) -> Result<Self, ResendError> {
        let base = base.into();
        fs::create_dir_all(&base).await?;
        fs::create_dir_all(base.join(INFLIGHT_DIR)).await?;
        fs::create_dir_all(base.join(ERROR_DIR)).await?;

        let queue = Self { base, delay };
        queue.recover_inflight().await?;
        Ok(queue)
    }

    async fn recover_inflight(&self) -> Result<(), ResendError> {
        let inflight = self.base.join(INFLIGHT_DIR);
        let mut entries = fs::read_dir(&inflight).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let target = unique_path(&self.base, &entry.file_name().to_string_lossy()).await?;
            fs::rename(entry.path(), &target).await?;
            info!(file = %target.display(), "recovered in-flight resend item");
        }
        Ok(())
    }

    /// Pending (unclaimed) filenames in lexical order. Test/operator helper.
    pub async fn pending(&self) -> Result<Vec<String>, ResendError> {
        Ok(sorted_file_names(&self.base).await?)
    }

    async fn claim(&self, name: &str) -> Option<PathBuf> {
        let from = self.base.join(name);
        let to = self.base.join(INFLIGHT_DIR).join(name);
        match fs::rename(&from, &to).await {
            Ok(()) => Some(to),
            Err(err) => {
                // Lost the race to a concurrent scanner, or the file is gone.
                debug!(file = name, error = %err, "claim failed, skipping");
                None
            }
        }
    }

    async fn read_item(&self, path: &Path, due_at: DateTime<Utc>) -> Result<ResendItem, ResendError> {
        let bytes = fs::read(path).await?;
        let stored: StoredItem = serde_json::from_slice(&bytes)?;
        let retries = stored.retries.parse().unwrap_or(0);
        Ok(ResendItem {
            action: stored.action,
            retries,
            not_before: due_at,
            message: stored.message,
        })
    }

    async fn quarantine_file(&self, path: &Path, reason: &str) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_owned());
        let descriptive = format!("{}_{}", name, sanitize(reason));
        match unique_path(&self.base.join(ERROR_DIR), &descriptive).await {
            Ok(target) => {
                if let Err(err) = fs::rename(path, &target).await {
                    warn!(file = %path.display(), error = %err, "failed to quarantine file");
                } else {
                    warn!(file = %target.display(), reason, "quarantined resend file");
                }
            }
            Err(err) => warn!(file = %path.display(), error = %err, "failed to quarantine file"),
        }
    }
}

#[async_trait]
impl ResendQueue for DirectoryResendQueue {
    #[instrument(skip(self, message), fields(message_id = %message.message_id()))]
    async fn submit(
        &self,
        action: &str,
        message: Message,
        retries: u32,
    ) -> Result<(), ResendError> {
        let not_before = Utc::now() + self.delay;
        let stamp = not_before.format(FILENAME_FORMAT).to_string();

        let stored = StoredItem {
            action: action.to_owned(),
            retries: retries.to_string(),
            message,
        };
        let bytes = serde_json::to_vec(&stored)?;

        let path = unique_path(&self.base, &stamp).await?;
        fs::write(&path, &bytes).await?;
        debug!(file = %path.display(), action, retries, "queued resend item");
        Ok(())
    }

    async fn scan_due(&self, now: DateTime<Utc>) -> Result<Vec<ResendItem>, ResendError> {
        let mut due = Vec::new();
        for name in sorted_file_names(&self.base).await? {
            let due_at = parse_stamp(&name).unwrap_or_else(|| {
                // Fail-open: an unparseable name is due now, not lost.
                warn!(file = %name, "unparseable queue filename, treating as due");
                now
            });
            if due_at > now {
                continue;
            }

            let Some(claimed) = self.claim(&name).await else {
                continue;
            };
            match self.read_item(&claimed, due_at).await {
                Ok(item) => {
                    if let Err(err) = fs::remove_file(&claimed).await {
                        warn!(file = %claimed.display(), error = %err, "failed to remove claimed file");
                    }
                    due.push(item);
                }
                Err(err) => {
                    // One bad item never stops the scan.
                    self.quarantine_file(&claimed, &err.to_string()).await;
                }
            }
        }
        Ok(due)
    }

    async fn quarantine(&self, item: &ResendItem, reason: &str) -> Result<(), ResendError> {
        let stored = StoredItem {
            action: item.action.clone(),
            retries: item.retries.to_string(),
            message: item.message.clone(),
        };
        let bytes = serde_json::to_vec(&stored)?;

        let descriptive = format!(
            "{}_{}_{}",
            item.not_before.format(FILENAME_FORMAT),
            sanitize(item.message.message_id()),
            sanitize(reason),
        );
        let path = unique_path(&self.base.join(ERROR_DIR), &descriptive).await?;
        fs::write(&path, &bytes).await?;
        warn!(
            file = %path.display(),
            action = %item.action,
            reason,
            "quarantined resend item"
        );
        Ok(())
    }
}

/// Parse the leading timestamp of a queue filename, ignoring any collision
/// suffix.
fn parse_stamp(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.get(..FILENAME_STAMP_LEN)?;
    let naive = NaiveDateTime::parse_from_str(stamp, FILENAME_FORMAT).ok()?;
    Some(naive.and_utc())
}

/// File names directly under `dir`, lexically sorted.
async fn sorted_file_names(dir: &Path) -> Result<Vec<String>, std::io::Error> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Resolve `dir/name`, appending `.1`, `.2`, ... on collision.
async fn unique_path(dir: &Path, name: &str) -> Result<PathBuf, std::io::Error> {
    let candidate = dir.join(name);
    if !fs::try_exists(&candidate).await? {
        return Ok(candidate);
    }
    for suffix in 1u32.. {
        let candidate = dir.join(format!("{name}.{suffix}"));
        if !fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    unreachable!("suffix space exhausted");
}

fn sanitize(raw: &str) -> String {
    let mut cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    cleaned.truncate(64);
    cleaned
}
