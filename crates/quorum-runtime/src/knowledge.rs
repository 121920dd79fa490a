use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use tracing::debug;

use quorum_core::{KnowledgeEntry, QuorumError, Result, timestamp_ms};

/// Invoked once per subscriber after a put, outside the base's lock, so
/// subscribers may call back into the runtime.
pub type UpdateHook = Box<dyn Fn(&str, &KnowledgeEntry) + Send + Sync>;

struct Inner {
    entries: HashMap<String, Vec<KnowledgeEntry>>,
    key_subscribers: HashMap<String, BTreeSet<String>>,
    tag_subscribers: HashMap<String, BTreeSet<String>>,
}

/// Shared, versioned key→value knowledge with tag queries and subscriber
/// fan-out. Read-heavy, so entries sit behind a readers/writer lock.
pub struct KnowledgeBase {
    inner: RwLock<Inner>,
    hook: RwLock<Option<UpdateHook>>,
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                key_subscribers: HashMap::new(),
                tag_subscribers: HashMap::new(),
            }),
            hook: RwLock::new(None),
        }
    }

    /// Store a new version (previous version + 1, starting at 1) and fan
    /// out to key- and tag-subscribers. Returns the stored entry.
    pub fn put(
        &self,
        key: &str,
        value: &str,
        contributor_id: &str,
        tags: Vec<String>,
    ) -> KnowledgeEntry {
        let (entry, subscribers) = {
            let mut inner = self.inner.write();
            let versions = inner.entries.entry(key.to_string()).or_default();
            let version = versions.last().map(|e| e.version + 1).unwrap_or(1);
            let entry = KnowledgeEntry {
                key: key.to_string(),
                value: value.to_string(),
                contributor_id: contributor_id.to_string(),
                timestamp: timestamp_ms(),
                version,
                tags,
            };
            versions.push(entry.clone());

            let mut subscribers: BTreeSet<String> = inner
                .key_subscribers
                .get(key)
                .cloned()
                .unwrap_or_default();
            for tag in &entry.tags {
                if let Some(subs) = inner.tag_subscribers.get(tag) {
                    subscribers.extend(subs.iter().cloned());
                }
            }
            (entry, subscribers)
        };

        debug!(key, version = entry.version, "knowledge stored");
        if !subscribers.is_empty() {
            let hook = self.hook.read();
            if let Some(hook) = hook.as_ref() {
                for subscriber in &subscribers {
                    hook(subscriber, &entry);
                }
            }
        }
        entry
    }

    /// Latest version of a key.
    pub fn get(&self, key: &str) -> Option<KnowledgeEntry> {
        self.inner
            .read()
            .entries
            .get(key)
            .and_then(|versions| versions.last().cloned())
    }

    /// Every version of a key, oldest first.
    pub fn history(&self, key: &str) -> Vec<KnowledgeEntry> {
        self.inner
            .read()
            .entries
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Latest entries carrying every requested tag, sorted by key.
    pub fn query(&self, tags: &[String]) -> Vec<KnowledgeEntry> {
        let inner = self.inner.read();
        let mut results: Vec<KnowledgeEntry> = inner
            .entries
            .values()
            .filter_map(|versions| versions.last())
            .filter(|entry| tags.iter().all(|tag| entry.has_tag(tag)))
            .cloned()
            .collect();
        results.sort_by(|a, b| a.key.cmp(&b.key));
        results
    }

    pub fn subscribe(&self, key: &str, agent_id: &str) {
        self.inner
            .write()
            .key_subscribers
            .entry(key.to_string())
            .or_default()
            .insert(agent_id.to_string());
    }

    pub fn unsubscribe(&self, key: &str, agent_id: &str) {
        if let Some(subs) = self.inner.write().key_subscribers.get_mut(key) {
            subs.remove(agent_id);
        }
    }

    pub fn subscribe_tag(&self, tag: &str, agent_id: &str) {
        self.inner
            .write()
            .tag_subscribers
            .entry(tag.to_string())
            .or_default()
            .insert(agent_id.to_string());
    }

    pub fn unsubscribe_tag(&self, tag: &str, agent_id: &str) {
        if let Some(subs) = self.inner.write().tag_subscribers.get_mut(tag) {
            subs.remove(agent_id);
        }
    }

    pub fn set_update_hook(&self, hook: UpdateHook) {
        *self.hook.write() = Some(hook);
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.read().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.key_subscribers.clear();
        inner.tag_subscribers.clear();
    }

    /// Every version of every key as a JSON array.
    pub fn export(&self) -> serde_json::Value {
        let inner = self.inner.read();
        let mut keys: Vec<&String> = inner.entries.keys().collect();
        keys.sort();
        let all: Vec<&KnowledgeEntry> = keys
            .into_iter()
            .flat_map(|key| inner.entries[key].iter())
            .collect();
        serde_json::to_value(all).unwrap_or(serde_json::Value::Array(Vec::new()))
    }

    /// Replace the contents from an exported JSON array. Returns how many
    /// entries were loaded.
    pub fn import(&self, value: &serde_json::Value) -> Result<usize> {
        let entries: Vec<KnowledgeEntry> = serde_json::from_value(value.clone())
            .map_err(QuorumError::Serialization)?;
        let mut inner = self.inner.write();
        inner.entries.clear();
        let count = entries.len();
        for entry in entries {
            inner.entries.entry(entry.key.clone()).or_default().push(entry);
        }
        Ok(count)
    }
}
