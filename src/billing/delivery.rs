use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use teloxide::types::MessageId;
use url::Url;

/// Ways of getting an artifact into the chat, tried in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStrategy {
    /// Hand the artifact URL to Telegram and let it fetch the file.
    DirectReference,
    /// Download the artifact ourselves and upload the bytes.
    Reupload,
}

impl DeliveryStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStrategy::DirectReference => "direct_reference",
            DeliveryStrategy::Reupload => "reupload",
        }
    }

    /// Strategies applicable to a reference; inline `data:` payloads can only be re-uploaded.
    pub fn chain_for(reference: &str) -> Vec<(DeliveryStrategy, Option<Url>)> {
        let direct = Url::parse(reference)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"));
        let mut chain = Vec::with_capacity(2);
        if let Some(url) = direct {
            chain.push((DeliveryStrategy::DirectReference, Some(url)));
        }
        chain.push((DeliveryStrategy::Reupload, None));
        chain
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LedgerState {
    InProgress,
    Delivered(MessageId),
    Abandoned,
}

#[derive(Debug)]
struct LedgerEntry {
    state: LedgerState,
    touched_at: Instant,
}

/// In-process record of which correlation ids already went through delivery.
/// A correlation id can be claimed once; later claims are duplicates.
pub struct DeliveryLedger {
    retention: Duration,
    entries: Mutex<HashMap<String, LedgerEntry>>,
}

impl DeliveryLedger {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn claim(&self, correlation_id: &str) -> bool {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let retention = self.retention;
        entries.retain(|_, entry| {
            entry.state == LedgerState::InProgress || now.duration_since(entry.touched_at) < retention
        });
        if entries.contains_key(correlation_id) {
            return false;
        }
        entries.insert(
            correlation_id.to_string(),
            LedgerEntry {
                state: LedgerState::InProgress,
                touched_at: now,
            },
        );
        true
    }

    pub fn complete(&self, correlation_id: &str, message_id: MessageId) {
        self.set(correlation_id, LedgerState::Delivered(message_id));
    }

    pub fn abandon(&self, correlation_id: &str) {
        self.set(correlation_id, LedgerState::Abandoned);
    }

    pub fn delivered_message(&self, correlation_id: &str) -> Option<MessageId> {
        match self.entries.lock().get(correlation_id).map(|entry| entry.state) {
            Some(LedgerState::Delivered(message_id)) => Some(message_id),
            _ => None,
        }
    }

    fn set(&self, correlation_id: &str, state: LedgerState) {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(correlation_id.to_string())
            .or_insert(LedgerEntry {
                state,
                touched_at: Instant::now(),
            });
        entry.state = state;
        entry.touched_at = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_reference_tries_direct_then_reupload() {
        let chain = DeliveryStrategy::chain_for("https://cdn.test/a.png");
        let strategies: Vec<_> = chain.iter().map(|(strategy, _)| *strategy).collect();
        assert_eq!(
            strategies,
            vec![DeliveryStrategy::DirectReference, DeliveryStrategy::Reupload]
        );
    }

    #[test]
    fn inline_reference_only_reuploads() {
        let chain = DeliveryStrategy::chain_for("data:image/png;base64,AAAA");
        assert_eq!(chain, vec![(DeliveryStrategy::Reupload, None)]);
    }

    #[test]
    fn correlation_id_is_claimed_once() {
        let ledger = DeliveryLedger::new(Duration::from_secs(60));
        assert!(ledger.claim("c1"));
        assert!(!ledger.claim("c1"));
        ledger.complete("c1", MessageId(4));
        assert!(!ledger.claim("c1"));
        assert_eq!(ledger.delivered_message("c1"), Some(MessageId(4)));
    }

    #[test]
    fn abandoned_delivery_stays_claimed() {
        let ledger = DeliveryLedger::new(Duration::from_secs(60));
        assert!(ledger.claim("c2"));
        ledger.abandon("c2");
        assert!(!ledger.claim("c2"));
        assert_eq!(ledger.delivered_message("c2"), None);
    }

    #[test]
    fn resolved_entries_expire_after_retention() {
        let ledger = DeliveryLedger::new(Duration::ZERO);
        assert!(ledger.claim("c3"));
        ledger.complete("c3", MessageId(1));
        assert!(ledger.claim("c3"));
    }
}
