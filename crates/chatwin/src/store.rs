//! Conversation persistence.
//!
//! The manager reads the full conversation map, mutates a copy and writes
//! the full map back. A store does not serialize writers itself; one
//! [`HistoryManager`](crate::context::HistoryManager) holds a write lock
//! across each load and save. Separate processes sharing a file remain
//! last-writer-wins.

use crate::{Conversation, ConversationMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Backing store for conversations.
pub trait ConversationStore {
    /// Read every stored conversation.
    fn load(&self) -> Result<ConversationMap, String>;

    /// Replace the stored conversations with `conversations`.
    fn save(&self, conversations: &ConversationMap) -> Result<(), String>;

    /// Read a single conversation. `Ok(None)` when the id is unknown.
    fn get(&self, id: &str) -> Result<Option<Conversation>, String> {
        Ok(self.load()?.remove(id))
    }
}

impl<T: ConversationStore + ?Sized> ConversationStore for &T {
    fn load(&self) -> Result<ConversationMap, String> {
        (**self).load()
    }

    fn save(&self, conversations: &ConversationMap) -> Result<(), String> {
        (**self).save(conversations)
    }

    fn get(&self, id: &str) -> Result<Option<Conversation>, String> {
        (**self).get(id)
    }
}

impl<T: ConversationStore + ?Sized> ConversationStore for Arc<T> {
    fn load(&self) -> Result<ConversationMap, String> {
        (**self).load()
    }

    fn save(&self, conversations: &ConversationMap) -> Result<(), String> {
        (**self).save(conversations)
    }

    fn get(&self, id: &str) -> Result<Option<Conversation>, String> {
        (**self).get(id)
    }
}

// ── In-memory ──────────────────────────────────────────────────────

/// A store held entirely in memory. Useful for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    conversations: Mutex<ConversationMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `conversations`.
    pub fn with_conversations(conversations: impl IntoIterator<Item = Conversation>) -> Self {
        let map = conversations
            .into_iter()
            .map(|conv| (conv.id.clone(), conv))
            .collect();
        Self {
            conversations: Mutex::new(map),
        }
    }
}

impl ConversationStore for MemoryStore {
    fn load(&self) -> Result<ConversationMap, String> {
        self.conversations
            .lock()
            .map(|map| map.clone())
            .map_err(|e| format!("Failed to lock memory store: {e}"))
    }

    fn save(&self, conversations: &ConversationMap) -> Result<(), String> {
        let mut map = self
            .conversations
            .lock()
            .map_err(|e| format!("Failed to lock memory store: {e}"))?;
        *map = conversations.clone();
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Conversation>, String> {
        self.conversations
            .lock()
            .map(|map| map.get(id).cloned())
            .map_err(|e| format!("Failed to lock memory store: {e}"))
    }
}

// ── JSON file ──────────────────────────────────────────────────────

/// A store backed by a single JSON file: one object keyed by conversation id.
///
/// A missing file reads as an empty store. Writes go to a sibling temp file
/// that is renamed into place, so readers never observe a partial file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConversationStore for JsonFileStore {
    fn load(&self) -> Result<ConversationMap, String> {
        if !self.path.exists() {
            return Ok(ConversationMap::new());
        }
        let json = std::fs::read_to_string(&self.path)
            .map_err(|e| format!("Failed to read store {}: {e}", self.path.display()))?;
        if json.trim().is_empty() {
            return Ok(ConversationMap::new());
        }
        serde_json::from_str(&json)
            .map_err(|e| format!("Failed to parse store {}: {e}", self.path.display()))
    }

    /// Atomic write: serialize to a uniquely named temp file in the same
    /// directory, then rename it into place.
    fn save(&self, conversations: &ConversationMap) -> Result<(), String> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| format!("Failed to create store dir: {e}"))?;

        let json = serde_json::to_string_pretty(conversations)
            .map_err(|e| format!("Failed to serialize conversations: {e}"))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| format!("Failed to create temp store: {e}"))?;
        tmp.write_all(json.as_bytes())
            .map_err(|e| format!("Failed to write temp store: {e}"))?;
        tmp.persist(&self.path)
            .map_err(|e| format!("Failed to rename store: {e}"))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    fn sample(id: &str) -> Conversation {
        Conversation::new(id)
            .with_messages(vec![Message::user("hi"), Message::assistant_text("hello")])
            .with_updated_at("2026-01-01T00:00:00+00:00")
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.load().unwrap().is_empty());

        let mut map = ConversationMap::new();
        map.insert("c1".into(), sample("c1"));
        store.save(&map).unwrap();

        assert_eq!(store.load().unwrap(), map);
        assert_eq!(store.get("c1").unwrap().unwrap().messages.len(), 2);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn memory_store_with_conversations_keys_by_id() {
        let store = MemoryStore::with_conversations([sample("a"), sample("b")]);
        let ids: Vec<String> = store.load().unwrap().into_keys().collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn blanket_impls_delegate() {
        let store = Arc::new(MemoryStore::with_conversations([sample("a")]));
        let by_ref: &MemoryStore = &store;
        assert!(by_ref.get("a").unwrap().is_some());
        let dynamic: Arc<dyn ConversationStore + Send + Sync> = store.clone();
        assert_eq!(dynamic.load().unwrap().len(), 1);
    }

    #[test]
    fn missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nope.json"));
        assert!(store.load().unwrap().is_empty());
        assert!(store.get("x").unwrap().is_none());
    }

    #[test]
    fn file_store_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("history").join("conversations.json"));

        let mut map = ConversationMap::new();
        map.insert("c1".into(), sample("c1"));
        map.insert("c2".into(), sample("c2"));
        store.save(&map).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, map);
    }

    #[test]
    fn atomic_write_no_temp_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.json");
        let store = JsonFileStore::new(&path);
        store.save(&ConversationMap::new()).unwrap();

        assert!(path.exists());
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn concurrent_saves_leave_a_readable_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("conversations.json"));

        std::thread::scope(|scope| {
            for t in 0..8 {
                let store = &store;
                scope.spawn(move || {
                    for _ in 0..20 {
                        let mut map = ConversationMap::new();
                        map.insert(format!("c{t}"), sample(&format!("c{t}")));
                        store.save(&map).unwrap();
                    }
                });
            }
        });

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = JsonFileStore::new(&path).load().unwrap_err();
        assert!(err.contains("Failed to parse store"));
    }
}
