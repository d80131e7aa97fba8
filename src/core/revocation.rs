//! Logged-out tokens, remembered until they would have expired anyway.
use chrono::Utc;
use scc::HashMap;

use crate::metrics;

/// Tokens invalidated by logout, keyed by `(subject, issued_at)`.
///
/// An entry is only needed until the token it revokes would have expired on its own, so
/// every `invalidate` also drops entries whose expiry has passed. Timestamps are Unix
/// seconds, the same unit JWT `iat`/`exp` claims use.
#[derive(Debug, Default)]
pub struct RevocationLedger {
    revoked: HashMap<(u64, i64), i64>,
}

impl RevocationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Revoke the token `(subject, issued_at)` until `expires_at`. Idempotent.
    pub async fn invalidate(&self, subject: u64, issued_at: i64, expires_at: i64) {
        if self
            .revoked
            .insert_async((subject, issued_at), expires_at)
            .await
            .is_ok()
        {
            tracing::debug!(subject, issued_at, "Token revoked");
        }

        self.collect_expired(Utc::now().timestamp()).await;
        metrics::set_revoked_tokens(self.revoked.len());
    }

    pub async fn is_revoked(&self, subject: u64, issued_at: i64) -> bool {
        self.revoked.get_async(&(subject, issued_at)).await.is_some()
    }

    /// Drop every entry that expired strictly before `now`.
    pub async fn collect_expired(&self, now: i64) {
        self.revoked
            .retain_async(|_, expires_at| *expires_at >= now)
            .await;
    }

    pub fn len(&self) -> usize {
        self.revoked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
