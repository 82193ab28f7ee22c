//! Per-session token accounting.

use dashmap::DashMap;

use crate::engine::Usage;

/// Running token totals for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenTotals {
    pub prompt: u64,
    pub completion: u64,
}

/// Concurrent map of session id to running token totals.
///
/// A session's bucket exists only between [`TokenLedger::init`] and the
/// [`TokenLedger::take`] that flushes it. Adds against a missing bucket are
/// dropped, so late step reports after a flush cannot resurrect totals.
#[derive(Debug, Default)]
pub struct TokenLedger {
    totals: DashMap<String, TokenTotals>,
}

impl TokenLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or zero) the bucket for a session.
    pub fn init(&self, session_id: &str) {
        self.totals
            .insert(session_id.to_string(), TokenTotals::default());
    }

    /// Add usage to a session's bucket. No-op when the bucket is absent.
    pub fn add(&self, session_id: &str, usage: Usage) {
        if let Some(mut entry) = self.totals.get_mut(session_id) {
            entry.prompt += usage.prompt_tokens;
            entry.completion += usage.completion_tokens;
        }
    }

    /// Remove and return a session's totals.
    ///
    /// Removal is the read: concurrent callers see the totals exactly once.
    pub fn take(&self, session_id: &str) -> Option<TokenTotals> {
        self.totals.remove(session_id).map(|(_, totals)| totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: u64, completion: u64) -> Usage {
        Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
        }
    }

    #[test]
    fn add_without_init_is_dropped() {
        let ledger = TokenLedger::new();
        ledger.add("missing", usage(100, 100));
        assert_eq!(ledger.take("missing"), None);
    }

    #[test]
    fn take_clears_the_bucket() {
        let ledger = TokenLedger::new();
        ledger.init("s1");
        ledger.add("s1", usage(7, 3));

        assert_eq!(
            ledger.take("s1"),
            Some(TokenTotals {
                prompt: 7,
                completion: 3
            })
        );
        assert_eq!(ledger.take("s1"), None);

        // Post-flush adds are dropped, not re-accumulated.
        ledger.add("s1", usage(1, 1));
        assert_eq!(ledger.take("s1"), None);
    }

    #[test]
    fn init_zeroes_an_existing_bucket() {
        let ledger = TokenLedger::new();
        ledger.init("s1");
        ledger.add("s1", usage(5, 5));
        ledger.init("s1");
        assert_eq!(ledger.take("s1"), Some(TokenTotals::default()));
    }
}
