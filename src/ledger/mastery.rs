//! Mastery: the single privileged role of a ledger.
//!
//! The master controls supply, metadata and the reclamation whitelist and has
//! no rights over other accounts' balances or allowances. The ledger's own
//! address passes the supply gate as well, for reclamation.

use super::Ledger;
use crate::address::Address;
use crate::error::{CallError, CallResult, Role};

impl Ledger {
    pub(crate) fn ensure_master(&self, caller: &Address) -> CallResult<()> {
        if caller != &self.master {
            return Err(CallError::Unauthorized {
                caller: caller.clone(),
                role: Role::Master,
            });
        }
        Ok(())
    }

    pub(crate) fn ensure_supply_authority(&self, caller: &Address) -> CallResult<()> {
        if caller == &self.address {
            return Ok(());
        }
        self.ensure_master(caller)
    }

    /// Hands mastery to `new_master` immediately.
    pub(crate) fn change_mastery(&mut self, caller: &Address, new_master: &Address) -> CallResult<()> {
        self.ensure_master(caller)?;
        self.master = new_master.clone();
        Ok(())
    }

    pub(crate) fn change_name(&mut self, caller: &Address, name: &str) -> CallResult<()> {
        self.ensure_master(caller)?;
        self.name = name.to_string();
        Ok(())
    }

    pub(crate) fn change_symbol(&mut self, caller: &Address, symbol: &str) -> CallResult<()> {
        self.ensure_master(caller)?;
        self.symbol = symbol.to_string();
        Ok(())
    }

    pub(crate) fn whitelist_for_reclamation(
        &mut self,
        caller: &Address,
        old_ledger: &Address,
    ) -> CallResult<()> {
        self.ensure_master(caller)?;
        self.reclamation_whitelist.insert(old_ledger.clone());
        Ok(())
    }

    pub(crate) fn ensure_whitelisted(&self, old_ledger: &Address) -> CallResult<()> {
        if !self.is_whitelisted(old_ledger) {
            return Err(CallError::NotWhitelisted {
                ledger: old_ledger.clone(),
            });
        }
        Ok(())
    }
}
