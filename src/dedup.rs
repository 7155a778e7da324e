use sha2::{Digest, Sha256};

use crate::tmux::PromptEvent;

type Fingerprint = [u8; 32];

/// Remembers the last notification sent so unchanged screens are not re-sent
#[derive(Debug, Default)]
pub struct DedupGuard {
    last_sent: Option<Fingerprint>,
}

impl DedupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// True, and remembered, only if `event` differs from the last one sent
    pub fn should_send(&mut self, event: &PromptEvent) -> bool {
        self.should_send_text(&event.render())
    }

    pub fn should_send_text(&mut self, content: &str) -> bool {
        let fingerprint = fingerprint(content);
        if self.last_sent == Some(fingerprint) {
            return false;
        }
        self.last_sent = Some(fingerprint);
        true
    }

    /// Forget the last fingerprint, so the next event is always sent
    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}

/// SHA-256 over whitespace-normalized text; redraw jitter must not change it
fn fingerprint(content: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    for (i, word) in content.split_whitespace().enumerate() {
        if i > 0 {
            hasher.update(b" ");
        }
        hasher.update(word.as_bytes());
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::heuristics::PromptOption;

    fn event(question: &str, labels: &[&str]) -> PromptEvent {
        PromptEvent {
            question: question.to_string(),
            options: labels
                .iter()
                .enumerate()
                .map(|(i, label)| PromptOption {
                    number: i as u32 + 1,
                    label: label.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_repeat_is_suppressed() {
        let mut guard = DedupGuard::new();
        let prompt = event("Proceed?", &["Yes", "No"]);
        assert!(guard.should_send(&prompt));
        for _ in 0..5 {
            assert!(!guard.should_send(&prompt));
        }
    }

    #[test]
    fn test_distinct_events_both_sent() {
        let mut guard = DedupGuard::new();
        let first = event("Edit main.rs?", &["Yes", "No"]);
        let second = event("Edit lib.rs?", &["Yes", "No"]);
        assert!(guard.should_send(&first));
        assert!(guard.should_send(&second));
        assert!(guard.should_send(&first));
    }

    #[test]
    fn test_whitespace_jitter_is_same_fingerprint() {
        let mut guard = DedupGuard::new();
        assert!(guard.should_send_text("Run  tests?\n1. Yes"));
        assert!(!guard.should_send_text("Run tests?  \n 1. Yes "));
    }

    #[test]
    fn test_reset_rearms() {
        let mut guard = DedupGuard::new();
        let prompt = event("Proceed?", &["Yes"]);
        assert!(guard.should_send(&prompt));
        guard.reset();
        assert!(guard.should_send(&prompt));
    }
}
