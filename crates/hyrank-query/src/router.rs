//! Strategy routing.
//!
//! Decides which strategies a query can use before anything is fetched.

use std::collections::BTreeMap;

use hyrank_core::{Query, SkipReason, StrategyKind};

/// The strategies to dispatch for one query, and why the others are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePlan {
    dispatch: Vec<StrategyKind>,
    skipped: BTreeMap<StrategyKind, SkipReason>,
}

impl RoutePlan {
    /// Strategies to invoke, in `StrategyKind::ALL` order.
    pub fn dispatched(&self) -> &[StrategyKind] {
        &self.dispatch
    }

    pub fn skipped(&self) -> &BTreeMap<StrategyKind, SkipReason> {
        &self.skipped
    }

    pub fn contains(&self, kind: StrategyKind) -> bool {
        self.dispatch.contains(&kind)
    }

    /// Nothing to dispatch; the query yields an empty result.
    pub fn is_empty(&self) -> bool {
        self.dispatch.is_empty()
    }
}

/// Whether text contains at least one token the text strategies can match.
pub fn has_matchable_text(text: &str) -> bool {
    text.chars().any(char::is_alphanumeric)
}

/// Route a query to the strategies whose inputs are present.
///
/// Keyword and fuzzy need text with at least one alphanumeric token,
/// semantic needs a non-empty vector, and a zero-weight strategy cannot
/// contribute so it is not dispatched.
pub fn route(query: &Query) -> RoutePlan {
    let text_ok = query.trimmed_text().is_some_and(has_matchable_text);
    let vector_ok = query.non_empty_vector().is_some();

    let mut dispatch = Vec::with_capacity(StrategyKind::ALL.len());
    let mut skipped = BTreeMap::new();

    for kind in StrategyKind::ALL {
        let input_ok = match kind {
            StrategyKind::Keyword | StrategyKind::Fuzzy => text_ok,
            StrategyKind::Semantic => vector_ok,
        };

        if !input_ok {
            let reason = match kind {
                StrategyKind::Semantic => SkipReason::NoVector,
                _ => SkipReason::NoText,
            };
            skipped.insert(kind, reason);
        } else if query.weights.get(kind) <= 0.0 {
            skipped.insert(kind, SkipReason::ZeroWeight);
        } else {
            dispatch.push(kind);
        }
    }

    RoutePlan { dispatch, skipped }
}
