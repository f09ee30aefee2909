//! Cooldown and caller guard: default-to-deny checks in front of every
//! state-changing entry point.
//!
//! Operator actions (engage, disengage, setters) require the operator
//! address. Rebalance and iterate require an allow-listed caller unless the
//! list has been opened to everyone. Ripcord is permissionless. Any
//! internal failure (poisoned lock) blocks the call.

use std::collections::HashSet;
use std::sync::RwLock;

use alloy::primitives::Address;
use tracing::{info, warn};

use crate::errors::StrategyError;

/// Callers permitted to trigger ordinary rebalances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessList {
    allowed: HashSet<Address>,
    anyone_callable: bool,
}

impl AccessList {
    pub fn new(allowed: impl IntoIterator<Item = Address>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
            anyone_callable: false,
        }
    }

    pub fn is_allowed(&self, caller: Address) -> bool {
        self.anyone_callable || self.allowed.contains(&caller)
    }

    pub fn anyone_callable(&self) -> bool {
        self.anyone_callable
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

/// Who may call what.
pub struct CallerGuard {
    operator: Address,
    access: RwLock<AccessList>,
}

impl CallerGuard {
    pub fn new(operator: Address, access: AccessList) -> Self {
        Self {
            operator,
            access: RwLock::new(access),
        }
    }

    pub fn operator(&self) -> Address {
        self.operator
    }

    pub fn require_operator(
        &self,
        caller: Address,
        action: &'static str,
    ) -> Result<(), StrategyError> {
        if caller != self.operator {
            warn!(%caller, action, "operator-only call rejected");
            return Err(StrategyError::Unauthorized { caller, action });
        }
        Ok(())
    }

    pub fn require_allowed(
        &self,
        caller: Address,
        action: &'static str,
    ) -> Result<(), StrategyError> {
        let access = self
            .access
            .read()
            .map_err(|_| StrategyError::LockPoisoned("access list"))?;
        if !access.is_allowed(caller) {
            warn!(%caller, action, "caller not on allow-list");
            return Err(StrategyError::Unauthorized { caller, action });
        }
        Ok(())
    }

    /// Add or remove `account` from the allow-list. Operator only.
    pub fn set_caller_status(
        &self,
        caller: Address,
        account: Address,
        allowed: bool,
    ) -> Result<(), StrategyError> {
        self.require_operator(caller, "update allow-list")?;
        let mut access = self
            .access
            .write()
            .map_err(|_| StrategyError::LockPoisoned("access list"))?;
        if allowed {
            access.allowed.insert(account);
        } else {
            access.allowed.remove(&account);
        }
        info!(%account, allowed, "allow-list updated");
        Ok(())
    }

    /// Open (or close) rebalance/iterate to every caller. Operator only.
    pub fn set_anyone_callable(&self, caller: Address, open: bool) -> Result<(), StrategyError> {
        self.require_operator(caller, "toggle anyone-callable")?;
        let mut access = self
            .access
            .write()
            .map_err(|_| StrategyError::LockPoisoned("access list"))?;
        access.anyone_callable = open;
        info!(open, "anyone-callable updated");
        Ok(())
    }

    pub fn access_list(&self) -> Result<AccessList, StrategyError> {
        self.access
            .read()
            .map(|a| a.clone())
            .map_err(|_| StrategyError::LockPoisoned("access list"))
    }
}

// ---------------------------------------------------------------------------
// Cooldowns
// ---------------------------------------------------------------------------

/// Seconds left before `last + cooldown`; zero once elapsed.
pub fn cooldown_remaining(last: u64, cooldown: u64, now: u64) -> u64 {
    last.saturating_add(cooldown).saturating_sub(now)
}

pub fn cooldown_elapsed(last: u64, cooldown: u64, now: u64) -> bool {
    cooldown_remaining(last, cooldown, now) == 0
}

/// Fail with `CooldownActive` unless `now >= last + cooldown`.
pub fn require_cooldown_elapsed(
    venue: &str,
    last: u64,
    cooldown: u64,
    now: u64,
) -> Result<(), StrategyError> {
    let remaining = cooldown_remaining(last, cooldown, now);
    if remaining > 0 {
        return Err(StrategyError::CooldownActive {
            venue: venue.to_string(),
            remaining_seconds: remaining,
        });
    }
    Ok(())
}
