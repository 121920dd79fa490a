//! Linear token estimation used only for context budgeting, not a
//! tokenizer. Roughly four characters per token for English text, plus a
//! small per-turn overhead for role framing.

use crate::thread::ConversationTurn;

const TURN_OVERHEAD_TOKENS: i64 = 10;

pub fn estimate_text(text: &str) -> i64 {
    (text.len() / 4) as i64
}

/// Reads the file to size it; unreadable files estimate to 0.
pub fn estimate_file(path: &str) -> i64 {
    std::fs::read_to_string(path)
        .map(|contents| estimate_text(&contents))
        .unwrap_or(0)
}

pub fn estimate_turn(turn: &ConversationTurn) -> i64 {
    estimate_text(&turn.content) + estimate_text(turn.role.as_str()) + TURN_OVERHEAD_TOKENS
}
