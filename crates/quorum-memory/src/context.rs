//! Token-budgeted reconstruction of conversation history.
//!
//! Files and turns are collected newest-first so that a tight budget keeps
//! the most recent material, then presented chronologically.

use std::fmt::Write as _;

use quorum_core::Request;

use crate::estimator;
use crate::store::ConversationStore;
use crate::thread::ConversationTurn;

/// Output of a context rebuild.
#[derive(Debug, Clone, Default)]
pub struct ReconstructedContext {
    pub full_context: String,
    pub tokens_used: i64,
    pub turns_included: usize,
    pub files_included: Vec<String>,
    pub truncated: bool,
}

impl ConversationStore {
    /// Rebuild the conversation history of `thread_id` as LLM-ready text.
    ///
    /// `max_tokens` of 0 means unlimited. When files are included they may
    /// consume at most half the budget; the first file that would exceed
    /// that half marks the result truncated and stops file inclusion.
    /// A missing or expired thread yields an empty, non-truncated result.
    pub fn build_context(
        &self,
        thread_id: &str,
        max_tokens: i64,
        include_files: bool,
    ) -> ReconstructedContext {
        let Some(thread) = self.get_thread(thread_id) else {
            return ReconstructedContext::default();
        };

        let mut out = String::new();
        let mut total_tokens: i64 = 0;
        let mut files_included = Vec::new();
        let mut truncated = false;

        let _ = write!(
            out,
            "=== Conversation Thread: {} ===\nInitiated by: {}\nCreated: {}\n\n",
            thread.thread_id, thread.initiating_agent, thread.created_at
        );

        if !thread.context.is_empty() {
            out.push_str("Initial Context:\n");
            for (key, value) in &thread.context {
                let _ = writeln!(out, "  {key}: {value}");
            }
            out.push('\n');
        }

        // Files referenced anywhere in the thread, newest turn first,
        // first occurrence wins.
        let mut all_files: Vec<&str> = Vec::new();
        for turn in thread.turns.iter().rev() {
            for file in &turn.files {
                if !all_files.contains(&file.as_str()) {
                    all_files.push(file);
                }
            }
        }

        let mut file_tokens: i64 = 0;
        if include_files && !all_files.is_empty() {
            out.push_str("Referenced Files:\n");
            for file in all_files {
                let estimate = estimator::estimate_file(file);
                if max_tokens > 0 && file_tokens + estimate > max_tokens / 2 {
                    truncated = true;
                    break;
                }
                let Ok(contents) = std::fs::read_to_string(file) else {
                    continue;
                };
                let _ = write!(out, "\n--- File: {file} ---\n{contents}\n--- End File ---\n");
                files_included.push(file.to_string());
                file_tokens += estimate;
            }
            out.push('\n');
        }
        total_tokens += file_tokens;

        out.push_str("Conversation History:\n");

        // Collect newest-first under the remaining budget.
        let mut included: Vec<&ConversationTurn> = Vec::new();
        for turn in thread.turns.iter().rev() {
            let turn_tokens = turn.estimate_tokens();
            if max_tokens > 0 && total_tokens + turn_tokens > max_tokens {
                truncated = true;
                break;
            }
            included.push(turn);
            total_tokens += turn_tokens;
        }
        let turns_included = included.len();

        // Present chronologically.
        included.reverse();
        for turn in included {
            let _ = write!(out, "\n[{}]", turn.role.as_str());
            if !turn.agent_id.is_empty() {
                let _ = write!(out, " (agent: {})", turn.agent_id);
            }
            if !turn.model.is_empty() {
                let _ = write!(out, " (model: {})", turn.model);
            }
            let _ = write!(out, ":\n{}\n", turn.content);
            if !turn.files.is_empty() {
                let _ = writeln!(out, "  Files: {}", turn.files.join(", "));
            }
        }

        if truncated {
            out.push_str("\n[Note: Context was truncated due to token budget]\n");
        }

        ReconstructedContext {
            full_context: out,
            tokens_used: total_tokens,
            turns_included,
            files_included,
            truncated,
        }
    }

    /// Rebuild a continuation request: prior context is prepended to the
    /// prompt (with half the request's token budget) and any files the
    /// context pulled in are unioned into the request's file list.
    pub fn reconstruct_request(&self, request: &Request) -> Request {
        if request.thread_id.is_empty() {
            return request.clone();
        }

        let budget = if request.max_tokens > 0 {
            i64::from(request.max_tokens) / 2
        } else {
            0
        };
        let context = self.build_context(&request.thread_id, budget, true);

        let mut reconstructed = request.clone();
        if !context.full_context.is_empty() {
            reconstructed.prompt = format!(
                "{}\n\n[Current Request]:\n{}",
                context.full_context, request.prompt
            );
        }
        for file in context.files_included {
            if !reconstructed.files.contains(&file) {
                reconstructed.files.push(file);
            }
        }
        reconstructed
    }
}
