//! Host execution environment for ledgers and stimuli.
//!
//! All instances live in one [`World`] behind a single mutex, so every call is
//! totally ordered against every other call. Each mutating call runs in a
//! [`Transaction`]; a call that returns `Ok` commits its staged instances and
//! events as one block, a call that returns `Err` commits nothing.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::address::{Address, Amount};
use crate::config::{read_json, write_json, LedgerConfig, StimulusConfig};
use crate::error::{CallError, CallResult, StoreError};
use crate::events::{EventFilter, EventLog, EventRecord};
use crate::ledger::{Ledger, LedgerSnapshot};
use crate::stimulus::{ParticipantStatus, Stimulus};

mod tx;

use tx::{Effects, Transaction};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct World {
    height: u64,
    deploy_nonce: u64,
    ledgers: BTreeMap<Address, Ledger>,
    stimuli: BTreeMap<Address, Stimulus>,
    log: EventLog,
}

impl World {
    fn commit(&mut self, effects: Effects) -> u64 {
        self.height += 1;
        self.ledgers.extend(effects.ledgers);
        self.stimuli.extend(effects.stimuli);
        self.log.append_block(self.height, effects.emitted);
        self.height
    }

    fn next_address(&mut self, kind: &str, creator: &Address) -> Address {
        let address = Address::derive(kind, creator, self.deploy_nonce);
        self.deploy_nonce += 1;
        address
    }
}

#[derive(Debug, Default)]
pub struct Chain {
    world: Mutex<World>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens persisted chain state; a missing file yields an empty chain.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no state file, starting empty chain");
            return Ok(Self::new());
        }
        let world: World = read_json(path)?;
        Ok(Self {
            world: Mutex::new(world),
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let world = self.world.lock();
        write_json(path.as_ref(), &*world)
    }

    /// Height of the last committed block.
    pub fn height(&self) -> u64 {
        self.world.lock().height
    }

    pub fn events(&self, filter: &EventFilter) -> Vec<EventRecord> {
        self.world.lock().log.query(filter)
    }

    pub fn ledgers(&self) -> Vec<Address> {
        self.world.lock().ledgers.keys().cloned().collect()
    }

    pub fn stimuli(&self) -> Vec<Address> {
        self.world.lock().stimuli.keys().cloned().collect()
    }

    pub fn deploy_ledger(&self, creator: &Address, config: &LedgerConfig) -> Address {
        let mut world = self.world.lock();
        let address = world.next_address("ledger", creator);
        let ledger = Ledger::deploy(address.clone(), creator, config);
        let mut effects = Effects {
            ledgers: BTreeMap::new(),
            stimuli: BTreeMap::new(),
            emitted: Vec::new(),
        };
        effects.ledgers.insert(address.clone(), ledger);
        let block = world.commit(effects);
        info!(
            block,
            ledger = %address,
            master = %creator,
            symbol = %config.symbol,
            initial_supply = %config.initial_supply,
            "ledger deployed"
        );
        address
    }

    pub fn deploy_stimulus(
        &self,
        creator: &Address,
        ledger: &Address,
        config: &StimulusConfig,
    ) -> CallResult<Address> {
        let mut world = self.world.lock();
        if !world.ledgers.contains_key(ledger) {
            let err = CallError::UnknownInstance {
                kind: "ledger",
                address: ledger.clone(),
            };
            warn!(op = "deploy_stimulus", kind = %err.kind(), error = %err, "call rejected");
            return Err(err);
        }
        let address = world.next_address("stimulus", creator);
        let stimulus = Stimulus::deploy(address.clone(), creator, ledger, config);
        let mut effects = Effects {
            ledgers: BTreeMap::new(),
            stimuli: BTreeMap::new(),
            emitted: Vec::new(),
        };
        effects.stimuli.insert(address.clone(), stimulus);
        let block = world.commit(effects);
        info!(block, stimulus = %address, ledger = %ledger, pi = %creator, "stimulus deployed");
        Ok(address)
    }

    /// Runs `call` in a transaction and commits it iff it succeeds.
    fn execute<T>(
        &self,
        op: &'static str,
        target: &Address,
        call: impl FnOnce(&mut Transaction<'_>) -> CallResult<T>,
    ) -> CallResult<T> {
        let mut world = self.world.lock();
        let outcome = {
            let mut tx = Transaction::new(&world);
            call(&mut tx).map(|value| (value, tx.into_effects()))
        };
        match outcome {
            Ok((value, effects)) => {
                let events = effects.emitted.len();
                let block = world.commit(effects);
                debug!(block, op, target = %target, events, "call committed");
                Ok(value)
            }
            Err(err) => {
                warn!(op, target = %target, kind = %err.kind(), error = %err, "call rejected");
                Err(err)
            }
        }
    }

    fn read_ledger<T>(&self, address: &Address, view: impl FnOnce(&Ledger) -> T) -> CallResult<T> {
        let world = self.world.lock();
        world
            .ledgers
            .get(address)
            .map(view)
            .ok_or_else(|| CallError::UnknownInstance {
                kind: "ledger",
                address: address.clone(),
            })
    }

    fn read_stimulus<T>(
        &self,
        address: &Address,
        view: impl FnOnce(&Stimulus) -> T,
    ) -> CallResult<T> {
        let world = self.world.lock();
        world
            .stimuli
            .get(address)
            .map(view)
            .ok_or_else(|| CallError::UnknownInstance {
                kind: "stimulus",
                address: address.clone(),
            })
    }

    // ---- ledger views ----

    /// Owned copy of a ledger's current state.
    pub fn ledger(&self, ledger: &Address) -> CallResult<Ledger> {
        self.read_ledger(ledger, Ledger::clone)
    }

    pub fn balance_of(&self, ledger: &Address, account: &Address) -> CallResult<Amount> {
        self.read_ledger(ledger, |l| l.balance_of(account))
    }

    pub fn allowance(
        &self,
        ledger: &Address,
        owner: &Address,
        spender: &Address,
    ) -> CallResult<Amount> {
        self.read_ledger(ledger, |l| l.allowance(owner, spender))
    }

    pub fn total_supply(&self, ledger: &Address) -> CallResult<Amount> {
        self.read_ledger(ledger, Ledger::total_supply)
    }

    pub fn master(&self, ledger: &Address) -> CallResult<Address> {
        self.read_ledger(ledger, |l| l.master().clone())
    }

    pub fn name(&self, ledger: &Address) -> CallResult<String> {
        self.read_ledger(ledger, |l| l.name().to_string())
    }

    pub fn symbol(&self, ledger: &Address) -> CallResult<String> {
        self.read_ledger(ledger, |l| l.symbol().to_string())
    }

    pub fn is_whitelisted(&self, ledger: &Address, old_ledger: &Address) -> CallResult<bool> {
        self.read_ledger(ledger, |l| l.is_whitelisted(old_ledger))
    }

    pub fn ledger_snapshot(&self, ledger: &Address) -> CallResult<LedgerSnapshot> {
        self.read_ledger(ledger, Ledger::snapshot)
    }

    // ---- ledger operations ----

    pub fn approve(
        &self,
        ledger: &Address,
        caller: &Address,
        spender: &Address,
        amount: Amount,
    ) -> CallResult<()> {
        self.execute("approve", ledger, |tx| {
            let (l, emitted) = tx.ledger(ledger)?;
            l.approve(caller, spender, amount, emitted)
        })
    }

    pub fn transfer(
        &self,
        ledger: &Address,
        caller: &Address,
        to: &Address,
        amount: Amount,
    ) -> CallResult<()> {
        self.execute("transfer", ledger, |tx| {
            let (l, emitted) = tx.ledger(ledger)?;
            l.transfer(caller, to, amount, emitted)
        })
    }

    pub fn transfer_from(
        &self,
        ledger: &Address,
        caller: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> CallResult<()> {
        self.execute("transfer_from", ledger, |tx| {
            let (l, emitted) = tx.ledger(ledger)?;
            l.transfer_from(caller, from, to, amount, emitted)
        })
    }

    pub fn increase_supply(&self, ledger: &Address, caller: &Address, amount: Amount) -> CallResult<()> {
        self.execute("increase_supply", ledger, |tx| {
            tx.ledger(ledger)?.0.increase_supply(caller, amount)
        })
    }

    pub fn decrease_supply(&self, ledger: &Address, caller: &Address, amount: Amount) -> CallResult<()> {
        self.execute("decrease_supply", ledger, |tx| {
            tx.ledger(ledger)?.0.decrease_supply(caller, amount)
        })
    }

    pub fn change_mastery(
        &self,
        ledger: &Address,
        caller: &Address,
        new_master: &Address,
    ) -> CallResult<()> {
        self.execute("change_mastery", ledger, |tx| {
            tx.ledger(ledger)?.0.change_mastery(caller, new_master)
        })
    }

    pub fn change_name(&self, ledger: &Address, caller: &Address, name: &str) -> CallResult<()> {
        self.execute("change_name", ledger, |tx| {
            tx.ledger(ledger)?.0.change_name(caller, name)
        })
    }

    pub fn change_symbol(&self, ledger: &Address, caller: &Address, symbol: &str) -> CallResult<()> {
        self.execute("change_symbol", ledger, |tx| {
            tx.ledger(ledger)?.0.change_symbol(caller, symbol)
        })
    }

    pub fn whitelist_for_reclamation(
        &self,
        ledger: &Address,
        caller: &Address,
        old_ledger: &Address,
    ) -> CallResult<()> {
        self.execute("whitelist_for_reclamation", ledger, |tx| {
            tx.ledger(ledger)?
                .0
                .whitelist_for_reclamation(caller, old_ledger)
        })
    }

    /// Migrates `amount` of `account`'s balance from `old_ledger` into
    /// `ledger`.
    ///
    /// `account` must have approved `ledger` as a spender on `old_ledger`.
    /// The old tokens move to `ledger`'s own account there, the same amount is
    /// minted on `ledger` and transferred to `account`. Supply is minted on
    /// every reclamation, so the combined supply of both ledgers grows.
    pub fn reclaim_balance_from(
        &self,
        ledger: &Address,
        caller: &Address,
        old_ledger: &Address,
        account: &Address,
        amount: Amount,
    ) -> CallResult<()> {
        self.execute("reclaim_balance_from", ledger, |tx| {
            tx.ledger(ledger)?.0.ensure_whitelisted(old_ledger)?;

            let (old, emitted) = tx.ledger(old_ledger)?;
            old.transfer_from(ledger, account, ledger, amount, emitted)?;

            let (new, emitted) = tx.ledger(ledger)?;
            new.increase_supply(ledger, amount)?;
            new.transfer(ledger, account, amount, emitted)?;
            debug!(caller = %caller, account = %account, old_ledger = %old_ledger, amount = %amount, "balance reclaimed");
            Ok(())
        })
    }

    // ---- stimulus views ----

    /// Owned copy of a stimulus instance's current state.
    pub fn stimulus(&self, stimulus: &Address) -> CallResult<Stimulus> {
        self.read_stimulus(stimulus, Stimulus::clone)
    }

    pub fn status(&self, stimulus: &Address, account: &Address) -> CallResult<ParticipantStatus> {
        self.read_stimulus(stimulus, |s| s.status(account))
    }

    pub fn rewards(&self, stimulus: &Address) -> CallResult<[Amount; 5]> {
        self.read_stimulus(stimulus, |s| *s.rewards())
    }

    pub fn principal_investigator(&self, stimulus: &Address) -> CallResult<Address> {
        self.read_stimulus(stimulus, |s| s.principal_investigator().clone())
    }

    // ---- stimulus operations ----

    pub fn enroll(&self, stimulus: &Address, caller: &Address, submission_id: u64) -> CallResult<()> {
        self.execute("enroll", stimulus, |tx| {
            let (s, emitted) = tx.stimulus(stimulus)?;
            s.enroll(caller, submission_id, emitted)
        })
    }

    pub fn respond_to_enrollment(
        &self,
        stimulus: &Address,
        caller: &Address,
        candidate: &Address,
        submission_id: u64,
        accept: bool,
    ) -> CallResult<()> {
        self.execute("respond_to_enrollment", stimulus, |tx| {
            let (s, ledger, emitted) = tx.stimulus_with_ledger(stimulus)?;
            s.respond_to_enrollment(caller, candidate, submission_id, accept, ledger, emitted)
        })
    }

    pub fn submit(
        &self,
        stimulus: &Address,
        caller: &Address,
        stimulus_type: u8,
        submission_id: u64,
    ) -> CallResult<()> {
        self.execute("submit", stimulus, |tx| {
            let (s, emitted) = tx.stimulus(stimulus)?;
            s.submit(caller, stimulus_type, submission_id, emitted)
        })
    }

    pub fn respond(
        &self,
        stimulus: &Address,
        caller: &Address,
        candidate: &Address,
        stimulus_type: u8,
        submission_id: u64,
        accept: bool,
    ) -> CallResult<()> {
        self.execute("respond", stimulus, |tx| {
            let (s, ledger, emitted) = tx.stimulus_with_ledger(stimulus)?;
            s.respond(caller, candidate, stimulus_type, submission_id, accept, ledger, emitted)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::events::EventKind;

    fn token(chain: &Chain, creator: &Address, supply: Amount) -> Address {
        chain.deploy_ledger(
            creator,
            &LedgerConfig {
                name: "Trial Token".into(),
                symbol: "TT".into(),
                initial_supply: supply,
            },
        )
    }

    #[test]
    fn failed_call_commits_nothing() {
        let chain = Chain::new();
        let d = Address::from("d");
        let ledger = token(&chain, &d, 100);
        let height = chain.height();

        let err = chain
            .transfer(&ledger, &d, &"a".into(), 500)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientBalance);
        assert_eq!(chain.height(), height);
        assert!(chain.events(&EventFilter::new()).is_empty());
        assert_eq!(chain.balance_of(&ledger, &d).unwrap(), 100);
    }

    #[test]
    fn each_committed_call_is_one_block() {
        let chain = Chain::new();
        let d = Address::from("d");
        let ledger = token(&chain, &d, 100);
        chain.transfer(&ledger, &d, &"a".into(), 1).unwrap();
        chain.transfer(&ledger, &d, &"b".into(), 2).unwrap();
        let records = chain.events(&EventFilter::new().kind(EventKind::Transfer));
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].block, records[0].block + 1);
        assert_eq!(records[0].emitter, ledger);
        assert_eq!(chain.height(), records[1].block);
    }

    #[test]
    fn unknown_instances_are_reported() {
        let chain = Chain::new();
        let ghost = Address::from("ghost");
        let err = chain.balance_of(&ghost, &"a".into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownInstance);
        let err = chain.enroll(&ghost, &"a".into(), 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownInstance);
        let err = chain
            .deploy_stimulus(&"pi".into(), &ghost, &StimulusConfig { rewards: [0; 5] })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownInstance);
    }

    #[test]
    fn reclamation_rolls_back_when_old_ledger_refuses() {
        let chain = Chain::new();
        let (m, h) = (Address::from("m"), Address::from("h"));
        let old = token(&chain, &h, 100);
        let new = token(&chain, &m, 0);
        chain.whitelist_for_reclamation(&new, &m, &old).unwrap();

        // no approval of `new` on `old`
        let err = chain
            .reclaim_balance_from(&new, &h, &old, &h, 40)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert_eq!(chain.balance_of(&old, &h).unwrap(), 100);
        assert_eq!(chain.total_supply(&new).unwrap(), 0);
        assert_eq!(chain.balance_of(&new, &h).unwrap(), 0);
    }

    #[test]
    fn reclamation_rolls_back_when_mint_overflows() {
        let chain = Chain::new();
        let (m, h) = (Address::from("m"), Address::from("h"));
        let old = token(&chain, &h, 100);
        let new = token(&chain, &m, Amount::MAX - 10);
        chain.whitelist_for_reclamation(&new, &m, &old).unwrap();
        chain.approve(&old, &h, &new, 40).unwrap();
        let height = chain.height();

        let err = chain
            .reclaim_balance_from(&new, &h, &old, &h, 40)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SupplyBounds);
        // the first sub-step on the old ledger is undone as well
        assert_eq!(chain.balance_of(&old, &h).unwrap(), 100);
        assert_eq!(chain.balance_of(&old, &new).unwrap(), 0);
        assert_eq!(chain.allowance(&old, &h, &new).unwrap(), 40);
        assert_eq!(chain.height(), height);
    }

    #[test]
    fn state_survives_save_and_load() {
        let dir = std::env::temp_dir().join(format!("stimulus-chain-{}", std::process::id()));
        let path = dir.join("state.json");
        let chain = Chain::new();
        let d = Address::from("d");
        let ledger = token(&chain, &d, 100);
        chain.transfer(&ledger, &d, &"a".into(), 10).unwrap();
        chain.save(&path).unwrap();

        let reloaded = Chain::load(&path).unwrap();
        assert_eq!(reloaded.height(), chain.height());
        assert_eq!(reloaded.balance_of(&ledger, &"a".into()).unwrap(), 10);
        assert_eq!(
            reloaded.ledger(&ledger).unwrap().state_root(),
            chain.ledger(&ledger).unwrap().state_root()
        );
        assert_eq!(reloaded.events(&EventFilter::new()).len(), 1);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn concurrent_callers_are_serialized() {
        let chain = Chain::new();
        let d = Address::from("d");
        let ledger = token(&chain, &d, 1_000);
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let (chain, ledger, d) = (&chain, &ledger, &d);
                scope.spawn(move || {
                    let to = Address::from(format!("w{worker}"));
                    for _ in 0..50 {
                        chain.transfer(ledger, d, &to, 1).unwrap();
                    }
                });
            }
        });
        let state = chain.ledger(&ledger).unwrap();
        assert_eq!(state.balance_of(&d), 800);
        assert_eq!(state.balance_sum(), state.total_supply());
        assert_eq!(chain.events(&EventFilter::new()).len(), 200);
        assert_eq!(chain.height(), 201);
    }

    #[test]
    fn missing_state_file_yields_empty_chain() {
        let chain = Chain::load("/nonexistent/stimulus-state.json").unwrap();
        assert_eq!(chain.height(), 0);
        assert!(chain.ledgers().is_empty());
    }
}
