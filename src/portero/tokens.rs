use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};
use uuid::Uuid;

/// How long an issued token stays redeemable.
pub const TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

/// Outcome of a redemption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redemption {
    /// The token was present and fresh; this caller owns it now.
    Redeemed,
    /// Never issued, or already consumed by an earlier caller.
    Unknown,
    /// Issued, but older than [`TOKEN_TTL`].
    Expired,
}

/// Process-wide set of one-time verification tokens awaiting redemption.
///
/// `consume` is an atomic check-and-remove: when two callbacks race on the
/// same token, exactly one observes [`Redemption::Redeemed`]. The lock is
/// never held across I/O.
#[derive(Debug, Default)]
pub struct PendingTokens {
    issued: Mutex<HashMap<String, Instant>>,
}

impl PendingTokens {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh token and make it redeemable.
    ///
    /// Abandoned tokens are swept here, so the pending set stays bounded by
    /// the number of visits within one [`TOKEN_TTL`] window.
    pub fn issue(&self) -> String {
        let token = Uuid::new_v4().to_string();
        let mut issued = self
            .issued
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        issued.retain(|_, at| at.elapsed() <= TOKEN_TTL);
        issued.insert(token.clone(), Instant::now());
        token
    }

    /// Atomically check and remove `token`.
    ///
    /// Expired tokens are removed on observation; redeeming them again
    /// reports [`Redemption::Unknown`].
    pub fn consume(&self, token: &str) -> Redemption {
        let issued_at = self
            .issued
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(token);

        match issued_at {
            None => Redemption::Unknown,
            Some(at) if at.elapsed() > TOKEN_TTL => Redemption::Expired,
            Some(_) => Redemption::Redeemed,
        }
    }

    #[cfg(test)]
    fn insert_at(&self, token: &str, issued_at: Instant) {
        self.issued
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(token.to_string(), issued_at);
    }
}
