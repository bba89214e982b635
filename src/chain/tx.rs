use std::collections::BTreeMap;

use crate::address::Address;
use crate::error::{CallError, CallResult};
use crate::ledger::{Emitted, Ledger};
use crate::stimulus::Stimulus;

use super::World;

/// Copy-on-write view of the world for the duration of one call.
///
/// The first touch of an instance stages a clone of it; all operations run
/// against the staged copies. Dropping the transaction discards everything,
/// [`Transaction::into_effects`] hands the staged state to the world for an
/// all-or-nothing commit.
pub(crate) struct Transaction<'w> {
    world: &'w World,
    ledgers: BTreeMap<Address, Ledger>,
    stimuli: BTreeMap<Address, Stimulus>,
    emitted: Emitted,
}

/// Staged state of a transaction that finished without error.
pub(crate) struct Effects {
    pub(crate) ledgers: BTreeMap<Address, Ledger>,
    pub(crate) stimuli: BTreeMap<Address, Stimulus>,
    pub(crate) emitted: Emitted,
}

fn unknown(kind: &'static str, address: &Address) -> CallError {
    CallError::UnknownInstance {
        kind,
        address: address.clone(),
    }
}

impl<'w> Transaction<'w> {
    pub(crate) fn new(world: &'w World) -> Self {
        Self {
            world,
            ledgers: BTreeMap::new(),
            stimuli: BTreeMap::new(),
            emitted: Emitted::new(),
        }
    }

    fn stage_ledger(&mut self, address: &Address) -> CallResult<()> {
        if !self.ledgers.contains_key(address) {
            let ledger = self
                .world
                .ledgers
                .get(address)
                .ok_or_else(|| unknown("ledger", address))?;
            self.ledgers.insert(address.clone(), ledger.clone());
        }
        Ok(())
    }

    fn stage_stimulus(&mut self, address: &Address) -> CallResult<()> {
        if !self.stimuli.contains_key(address) {
            let stimulus = self
                .world
                .stimuli
                .get(address)
                .ok_or_else(|| unknown("stimulus", address))?;
            self.stimuli.insert(address.clone(), stimulus.clone());
        }
        Ok(())
    }

    pub(crate) fn ledger(&mut self, address: &Address) -> CallResult<(&mut Ledger, &mut Emitted)> {
        self.stage_ledger(address)?;
        let ledger = self
            .ledgers
            .get_mut(address)
            .ok_or_else(|| unknown("ledger", address))?;
        Ok((ledger, &mut self.emitted))
    }

    pub(crate) fn stimulus(
        &mut self,
        address: &Address,
    ) -> CallResult<(&mut Stimulus, &mut Emitted)> {
        self.stage_stimulus(address)?;
        let stimulus = self
            .stimuli
            .get_mut(address)
            .ok_or_else(|| unknown("stimulus", address))?;
        Ok((stimulus, &mut self.emitted))
    }

    /// Stages a stimulus together with the ledger it pays from.
    pub(crate) fn stimulus_with_ledger(
        &mut self,
        address: &Address,
    ) -> CallResult<(&mut Stimulus, &mut Ledger, &mut Emitted)> {
        self.stage_stimulus(address)?;
        let ledger_address = self
            .stimuli
            .get(address)
            .map(|s| s.ledger().clone())
            .ok_or_else(|| unknown("stimulus", address))?;
        self.stage_ledger(&ledger_address)?;
        let stimulus = self
            .stimuli
            .get_mut(address)
            .ok_or_else(|| unknown("stimulus", address))?;
        let ledger = self
            .ledgers
            .get_mut(&ledger_address)
            .ok_or_else(|| unknown("ledger", &ledger_address))?;
        Ok((stimulus, ledger, &mut self.emitted))
    }

    pub(crate) fn into_effects(self) -> Effects {
        Effects {
            ledgers: self.ledgers,
            stimuli: self.stimuli,
            emitted: self.emitted,
        }
    }
}
