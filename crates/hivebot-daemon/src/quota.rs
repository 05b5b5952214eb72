//! Active-subbot quota enforcement.
//!
//! Two independent ceilings: a global cap and a per-owner cap, both read
//! from the persisted table so they survive supervisor restarts. The
//! check-then-insert window under concurrent launches is narrow but real:
//! two launches can both pass before either row lands. The daemon is the
//! sole writer, so the overshoot is bounded by the number of launches in
//! flight at the same await point; this is accepted rather than paid for
//! with a transaction.

use crate::storage::Database;
use crate::supervisor::SubbotError;

/// Quota ceilings, plain integers.
#[derive(Debug, Clone, Copy)]
pub struct QuotaConfig {
    /// Maximum simultaneously active subbots across all owners.
    pub max_active: u32,
    /// Maximum simultaneously active subbots per owner.
    pub max_per_owner: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_active: 50,
            max_per_owner: 5,
        }
    }
}

/// Enforces quota ceilings against the persisted store.
pub struct QuotaEnforcer {
    db: Database,
    config: QuotaConfig,
}

impl QuotaEnforcer {
    pub const fn new(db: Database, config: QuotaConfig) -> Self {
        Self { db, config }
    }

    /// Check both ceilings for a prospective launch by `owner_id`.
    pub async fn check(&self, owner_id: &str) -> Result<(), SubbotError> {
        let active = self.db.count_active().await?;
        if active >= i64::from(self.config.max_active) {
            return Err(SubbotError::QuotaExceeded {
                scope: "global",
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                current: active as u32,
                max: self.config.max_active,
            });
        }

        let owned = self.db.count_active_for_owner(owner_id).await?;
        if owned >= i64::from(self.config.max_per_owner) {
            return Err(SubbotError::QuotaExceeded {
                scope: "owner",
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                current: owned as u32,
                max: self.config.max_per_owner,
            });
        }

        Ok(())
    }
}
