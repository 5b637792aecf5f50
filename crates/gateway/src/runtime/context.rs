//! Model context assembly: the trailing window of a transcript, trimmed to
//! a token budget.

use ava_domain::turn::{Role, Turn};

/// Rough token estimate: four characters per token, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Keep the last `max_turns` turns, then drop the oldest non-system turns
/// until the estimate fits `token_budget`. The most recent user turn is
/// never dropped, even if it alone exceeds the budget.
pub fn build_context(transcript: &[Turn], max_turns: usize, token_budget: usize) -> Vec<Turn> {
    let start = transcript.len().saturating_sub(max_turns);
    let mut window: Vec<Turn> = transcript[start..].to_vec();

    let latest_user = window.iter().rposition(|t| t.role == Role::User);
    let mut keep = vec![true; window.len()];
    let mut total: usize = window.iter().map(|t| estimate_tokens(&t.text)).sum();

    for (i, turn) in window.iter().enumerate() {
        if total <= token_budget {
            break;
        }
        if turn.role == Role::System || Some(i) == latest_user {
            continue;
        }
        keep[i] = false;
        total -= estimate_tokens(&turn.text);
    }

    let mut kept = keep.into_iter();
    window.retain(|_| kept.next().unwrap_or(true));
    window
}
