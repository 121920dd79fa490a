use std::collections::{BTreeMap, HashMap};

use parking_lot::{Mutex, RwLock};
use tracing::info;

use quorum_core::{Ballot, ConsensusRule, QuorumError, Result, new_id, timestamp_ms};

/// Invoked after a ballot is finalized, outside the ballot lock, so the
/// hook may call back into the manager.
pub type FinalizeHook = Box<dyn Fn(&Ballot) + Send + Sync>;

/// Ballot lifecycle for multi-agent decisions: create, cast (recasting
/// overwrites), finalize once.
pub struct ConsensusManager {
    ballots: Mutex<HashMap<String, Ballot>>,
    hook: RwLock<Option<FinalizeHook>>,
}

impl Default for ConsensusManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsensusManager {
    pub fn new() -> Self {
        Self {
            ballots: Mutex::new(HashMap::new()),
            hook: RwLock::new(None),
        }
    }

    /// Open a ballot. `deadline_ms` of 0 means no deadline; otherwise the
    /// stored deadline is an absolute timestamp.
    pub fn create_ballot(
        &self,
        question: &str,
        options: Vec<String>,
        rule: ConsensusRule,
        deadline_ms: i64,
    ) -> String {
        let vote_id = format!("vote-{}", new_id());
        let ballot = Ballot {
            vote_id: vote_id.clone(),
            question: question.to_string(),
            options,
            rule,
            deadline: if deadline_ms > 0 {
                timestamp_ms() + deadline_ms
            } else {
                0
            },
            votes: BTreeMap::new(),
            weights: BTreeMap::new(),
            result: String::new(),
            finalized: false,
        };
        self.ballots.lock().insert(vote_id.clone(), ballot);
        info!(vote_id = %vote_id, question, "ballot created");
        vote_id
    }

    /// Record (or overwrite) an agent's vote. Fails when the ballot is
    /// missing or finalized, or the option is not on the ballot.
    pub fn cast(&self, vote_id: &str, agent_id: &str, option: &str, weight: f64) -> Result<()> {
        let mut ballots = self.ballots.lock();
        let ballot = ballots
            .get_mut(vote_id)
            .ok_or_else(|| QuorumError::VoteNotFound(vote_id.to_string()))?;
        if ballot.finalized {
            return Err(QuorumError::VoteFinalized(vote_id.to_string()));
        }
        if !ballot.has_option(option) {
            return Err(QuorumError::InvalidOption(option.to_string()));
        }
        ballot.votes.insert(agent_id.to_string(), option.to_string());
        ballot.weights.insert(agent_id.to_string(), weight);
        Ok(())
    }

    pub fn ballot(&self, vote_id: &str) -> Option<Ballot> {
        self.ballots.lock().get(vote_id).cloned()
    }

    pub fn is_finalized(&self, vote_id: &str) -> bool {
        self.ballots
            .lock()
            .get(vote_id)
            .is_some_and(|b| b.finalized)
    }

    /// Compute the result and seal the ballot. Irreversible; finalizing
    /// twice fails. The denominator is the total weight actually cast.
    pub fn finalize(&self, vote_id: &str) -> Result<Ballot> {
        let ballot = {
            let mut ballots = self.ballots.lock();
            let ballot = ballots
                .get_mut(vote_id)
                .ok_or_else(|| QuorumError::VoteNotFound(vote_id.to_string()))?;
            if ballot.finalized {
                return Err(QuorumError::VoteFinalized(vote_id.to_string()));
            }
            ballot.result = Self::tally(ballot);
            ballot.finalized = true;
            ballot.clone()
        };
        info!(vote_id, result = %ballot.result, "ballot finalized");
        let hook = self.hook.read();
        if let Some(hook) = hook.as_ref() {
            hook(&ballot);
        }
        Ok(ballot)
    }

    pub fn set_finalize_hook(&self, hook: FinalizeHook) {
        *self.hook.write() = Some(hook);
    }

    pub fn all_ballots(&self) -> Vec<Ballot> {
        let ballots = self.ballots.lock();
        let mut ballots: Vec<Ballot> = ballots.values().cloned().collect();
        ballots.sort_by(|a, b| a.vote_id.cmp(&b.vote_id));
        ballots
    }

    /// Weighted tally. Ties break toward the lexicographically smallest
    /// option. Thresholds: simple majority > 0.5, supermajority ≥ 0.66,
    /// unanimous = 1.0; the weighted rule takes the winner unconditionally.
    fn tally(ballot: &Ballot) -> String {
        if ballot.votes.is_empty() {
            return String::new();
        }

        let mut counts: BTreeMap<&str, f64> = BTreeMap::new();
        let mut total_weight = 0.0;
        for (agent_id, option) in &ballot.votes {
            let weight = if ballot.rule == ConsensusRule::Weighted {
                ballot.weights.get(agent_id).copied().unwrap_or(1.0)
            } else {
                1.0
            };
            *counts.entry(option.as_str()).or_insert(0.0) += weight;
            total_weight += weight;
        }

        let mut winner: &str = "";
        let mut max_weight = 0.0;
        for (&option, &weight) in &counts {
            if weight > max_weight {
                max_weight = weight;
                winner = option;
            }
        }

        let percentage = if total_weight > 0.0 {
            max_weight / total_weight
        } else {
            0.0
        };

        let passed = match ballot.rule {
            ConsensusRule::SimpleMajority => percentage > 0.5,
            ConsensusRule::Supermajority => percentage >= 0.66,
            ConsensusRule::Unanimous => percentage >= 1.0,
            ConsensusRule::Weighted => true,
        };
        if passed {
            winner.to_string()
        } else {
            String::new()
        }
    }
}
