use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a ballot is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusRule {
    /// Winner needs strictly more than 50% of the total weight.
    SimpleMajority,
    /// Winner needs at least 66% of the total weight.
    Supermajority,
    /// Winner needs 100% of the total weight.
    Unanimous,
    /// Highest weighted count wins unconditionally.
    Weighted,
}

/// A multi-agent decision in progress. Once `finalized`, further casts fail
/// and `result` is fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ballot {
    pub vote_id: String,
    pub question: String,
    pub options: Vec<String>,
    pub rule: ConsensusRule,
    /// 0 = no deadline.
    #[serde(default)]
    pub deadline: i64,
    /// agent id → chosen option. Recasting overwrites.
    #[serde(default)]
    pub votes: BTreeMap<String, String>,
    /// agent id → weight (consulted only under the weighted rule).
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub finalized: bool,
}

impl Ballot {
    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }
}
