use serde::{Deserialize, Serialize};

/// One version of a shared knowledge item. Versions per key are strictly
/// increasing by one, starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub contributor_id: String,
    pub timestamp: i64,
    pub version: u32,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl KnowledgeEntry {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
