//! Single-writer election outcome shared by the store and its sidecar.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether this process may touch the shared snapshot file.
///
/// Clones observe the same flag; once revoked a token never becomes held again.
#[derive(Debug, Clone)]
pub struct LeadershipToken {
    held: Arc<AtomicBool>,
}

impl LeadershipToken {
    pub fn granted() -> Self {
        Self {
            held: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn denied() -> Self {
        Self {
            held: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Give up leadership; returns true if it was held.
    pub fn revoke(&self) -> bool {
        self.held.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revoke_is_visible_through_clones() {
        let token = LeadershipToken::granted();
        let clone = token.clone();
        assert!(clone.is_held());
        assert!(token.revoke());
        assert!(!clone.is_held());
        assert!(!clone.revoke());
    }

    #[test]
    fn denied_token_is_never_held() {
        assert!(!LeadershipToken::denied().is_held());
    }
}
