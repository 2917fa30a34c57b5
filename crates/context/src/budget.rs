//! Priority-based trimming of context items under a token ceiling.
//!
//! Token counts are taken over the rendered content (items joined with
//! newlines). Optional items are evicted lowest priority first; among equal
//! priorities the item added last goes first. Required items are never
//! evicted: if they alone exceed the ceiling the outcome is flagged, or
//! rejected under [`BudgetPolicy::Strict`].

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::ContextError;
use crate::model::ContextItem;
use crate::token::TokenCounter;

/// What to do when required items alone exceed the budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPolicy {
    /// Keep the required items and flag `budget_exceeded`.
    #[default]
    Graceful,
    /// Fail with [`ContextError::BudgetExceeded`].
    Strict,
}

impl FromStr for BudgetPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "graceful" => Ok(Self::Graceful),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown budget policy '{other}'")),
        }
    }
}

/// Result of trimming.
#[derive(Debug, Clone, PartialEq)]
pub struct TrimOutcome {
    /// Surviving items in their original order.
    pub items: Vec<ContextItem>,
    /// Surviving items joined with `\n`.
    pub content: String,
    pub dropped_items: usize,
    /// Tokens in `content`.
    pub token_usage: usize,
    pub budget_exceeded: bool,
}

/// Join item contents the way they are rendered.
pub fn render(items: &[ContextItem]) -> String {
    items
        .iter()
        .map(|i| i.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_kept(items: &[ContextItem], evicted: &[bool]) -> String {
    items
        .iter()
        .zip(evicted)
        .filter(|(_, gone)| !**gone)
        .map(|(item, _)| item.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Trim `items` so their rendered content fits in `max_tokens`.
pub fn trim_to_budget(
    items: Vec<ContextItem>,
    max_tokens: usize,
    counter: &dyn TokenCounter,
    policy: BudgetPolicy,
) -> Result<TrimOutcome, ContextError> {
    let total = counter.count(&render(&items));
    if total <= max_tokens {
        return Ok(TrimOutcome {
            content: render(&items),
            items,
            dropped_items: 0,
            token_usage: total,
            budget_exceeded: false,
        });
    }

    info!(total, limit = max_tokens, "Context over token budget, trimming");

    let mut candidates: Vec<usize> = (0..items.len()).filter(|&i| !items[i].required).collect();
    candidates.sort_by(|&a, &b| items[a].priority.cmp(&items[b].priority).then(b.cmp(&a)));

    let mut evicted = vec![false; items.len()];
    let mut running = total;
    for idx in candidates {
        if running <= max_tokens {
            break;
        }
        evicted[idx] = true;
        // Recount the rendered survivors: separators and tokenizer merges
        // make per-item counts non-additive.
        running = counter.count(&render_kept(&items, &evicted));
    }

    let dropped_items = evicted.iter().filter(|gone| **gone).count();
    let kept: Vec<ContextItem> = items
        .into_iter()
        .zip(evicted)
        .filter(|(_, gone)| !gone)
        .map(|(item, _)| item)
        .collect();
    let content = render(&kept);
    let token_usage = running;
    let budget_exceeded = token_usage > max_tokens;

    if budget_exceeded {
        warn!(
            tokens = token_usage,
            limit = max_tokens,
            "Required context items alone exceed the token budget"
        );
        if policy == BudgetPolicy::Strict {
            return Err(ContextError::BudgetExceeded {
                max_tokens,
                actual: token_usage,
            });
        }
    }

    Ok(TrimOutcome {
        items: kept,
        content,
        dropped_items,
        token_usage,
        budget_exceeded,
    })
}
