use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::config::loader::get_data_dir;
use crate::error::{PlayletError, Result};
use crate::sandbox::GuestLanguage;

/// Slot used when a code block is sent to the playground
pub const PLAYGROUND_SLOT: &str = "playground";

/// Code waiting to be picked up by the playground.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handoff {
    pub code: String,
    pub language: GuestLanguage,
    pub created_at: DateTime<Utc>,
}

impl Handoff {
    /// Normalize a code block for handoff: aliases resolve to their canonical
    /// language and the block's trailing newline is dropped.
    pub fn new(code: &str, language: &str) -> Self {
        let code = code
            .strip_suffix("\r\n")
            .or_else(|| code.strip_suffix('\n'))
            .unwrap_or(code);
        Self {
            code: code.to_string(),
            language: GuestLanguage::parse(language),
            created_at: Utc::now(),
        }
    }
}

/// Transient store for handing code from a source browser to the playground.
///
/// Each slot holds at most one entry and `take` consumes it.
pub struct HandoffStore {
    dir: PathBuf,
}

impl Default for HandoffStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HandoffStore {
    pub fn new() -> Self {
        Self::with_dir(get_data_dir().join("handoff"))
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn slot_path(&self, slot: &str) -> PathBuf {
        self.dir.join(format!("{}.json", slot))
    }

    /// Store an entry, replacing anything left in the slot.
    pub async fn put(&self, slot: &str, handoff: &Handoff) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.slot_path(slot);
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_string_pretty(handoff)?).await?;
        fs::rename(&staging, &path).await?;
        info!(slot = %slot, language = %handoff.language, "Code handed off");
        Ok(path)
    }

    /// Consume the entry in a slot. Two concurrent takers never both get it.
    pub async fn take(&self, slot: &str) -> Result<Handoff> {
        let path = self.slot_path(slot);
        let claimed = self
            .dir
            .join(format!("{}.{}.claimed", slot, uuid::Uuid::new_v4()));

        if let Err(e) = fs::rename(&path, &claimed).await {
            if e.kind() == std::io::ErrorKind::NotFound {
                return Err(PlayletError::HandoffEmpty {
                    slot: slot.to_string(),
                });
            }
            return Err(e.into());
        }

        let content = fs::read_to_string(&claimed).await;
        let _ = fs::remove_file(&claimed).await;
        let handoff: Handoff = serde_json::from_str(&content?)?;
        debug!(slot = %slot, bytes = handoff.code.len(), "Handoff consumed");
        Ok(handoff)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_normalizes_block() {
        let handoff = Handoff::new("print('hi')\n", "py");
        assert_eq!(handoff.code, "print('hi')");
        assert_eq!(handoff.language, GuestLanguage::Python);

        let inner = Handoff::new("a\n\nb\r\n", "JS");
        assert_eq!(inner.code, "a\n\nb");
        assert_eq!(inner.language, GuestLanguage::JavaScript);
    }

    #[tokio::test]
    async fn test_take_consumes_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = HandoffStore::with_dir(dir.path());
        let handoff = Handoff::new("<p>x</p>\n", "html");

        store.put(PLAYGROUND_SLOT, &handoff).await.unwrap();
        let taken = store.take(PLAYGROUND_SLOT).await.unwrap();
        assert_eq!(taken, handoff);

        let err = store.take(PLAYGROUND_SLOT).await.unwrap_err();
        assert!(matches!(err, PlayletError::HandoffEmpty { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_put_replaces_previous_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = HandoffStore::with_dir(dir.path().join("nested"));

        store.put(PLAYGROUND_SLOT, &Handoff::new("1", "js")).await.unwrap();
        store.put(PLAYGROUND_SLOT, &Handoff::new("2", "js")).await.unwrap();

        assert_eq!(store.take(PLAYGROUND_SLOT).await.unwrap().code, "2");
    }

    #[tokio::test]
    async fn test_empty_slot() {
        let dir = tempfile::tempdir().unwrap();
        let store = HandoffStore::with_dir(dir.path());
        assert!(matches!(
            store.take("other").await,
            Err(PlayletError::HandoffEmpty { .. })
        ));
    }
}
