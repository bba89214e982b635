use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::address::{Address, Amount};
use crate::config::LedgerConfig;
use crate::error::{CallError, CallResult, Role};
use crate::events::LedgerEvent;

mod mastery;

/// Events staged by a call, tagged with the emitting instance.
pub(crate) type Emitted = Vec<(Address, LedgerEvent)>;

/// Token ledger. Fields are private: every mutation goes through an
/// operation that checks all of its preconditions before touching state, so
/// a failed operation leaves the ledger exactly as it found it.
///
/// Zero balances and zero allowances are not stored, which keeps
/// [`Ledger::state_root`] independent of history.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ledger {
    address: Address,
    master: Address,
    name: String,
    symbol: String,
    total_supply: Amount,
    balances: BTreeMap<Address, Amount>,
    allowances: BTreeMap<Address, BTreeMap<Address, Amount>>,
    reclamation_whitelist: BTreeSet<Address>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub address: Address,
    pub master: Address,
    pub name: String,
    pub symbol: String,
    pub total_supply: Amount,
    pub holders: usize,
    pub whitelist: Vec<Address>,
    pub state_root: String,
}

impl Ledger {
    /// Credits the whole initial supply to `creator`, who becomes master.
    pub(crate) fn deploy(address: Address, creator: &Address, config: &LedgerConfig) -> Self {
        let mut balances = BTreeMap::new();
        if config.initial_supply > 0 {
            balances.insert(creator.clone(), config.initial_supply);
        }
        Self {
            address,
            master: creator.clone(),
            name: config.name.clone(),
            symbol: config.symbol.clone(),
            total_supply: config.initial_supply,
            balances,
            allowances: BTreeMap::new(),
            reclamation_whitelist: BTreeSet::new(),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn master(&self) -> &Address {
        &self.master
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.allowances
            .get(owner)
            .and_then(|spenders| spenders.get(spender))
            .copied()
            .unwrap_or(0)
    }

    pub fn is_whitelisted(&self, ledger: &Address) -> bool {
        self.reclamation_whitelist.contains(ledger)
    }

    /// Sum of all stored balances; equals `total_supply` in every committed state.
    pub fn balance_sum(&self) -> Amount {
        self.balances.values().sum()
    }

    pub(crate) fn approve(
        &mut self,
        caller: &Address,
        spender: &Address,
        amount: Amount,
        emitted: &mut Emitted,
    ) -> CallResult<()> {
        let current = self.allowance(caller, spender);
        if amount != 0 && current != 0 {
            return Err(CallError::InvalidAllowanceTransition {
                owner: caller.clone(),
                spender: spender.clone(),
                current,
                requested: amount,
            });
        }
        self.set_allowance(caller, spender, amount);
        emitted.push((
            self.address.clone(),
            LedgerEvent::Approval {
                owner: caller.clone(),
                spender: spender.clone(),
                amount,
            },
        ));
        Ok(())
    }

    pub(crate) fn transfer(
        &mut self,
        caller: &Address,
        to: &Address,
        amount: Amount,
        emitted: &mut Emitted,
    ) -> CallResult<()> {
        self.change_hands(caller, caller, to, amount, emitted)
    }

    pub(crate) fn transfer_from(
        &mut self,
        caller: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
        emitted: &mut Emitted,
    ) -> CallResult<()> {
        self.change_hands(caller, from, to, amount, emitted)
    }

    fn change_hands(
        &mut self,
        caller: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
        emitted: &mut Emitted,
    ) -> CallResult<()> {
        let available = self.balance_of(from);
        if amount > available {
            return Err(CallError::InsufficientBalance {
                account: from.clone(),
                available,
                requested: amount,
            });
        }
        let spending_allowance = caller != from;
        let allowed = self.allowance(from, caller);
        if spending_allowance && allowed < amount {
            return Err(if allowed == 0 {
                CallError::Unauthorized {
                    caller: caller.clone(),
                    role: Role::Spender,
                }
            } else {
                CallError::InsufficientAllowance {
                    owner: from.clone(),
                    spender: caller.clone(),
                    allowed,
                    requested: amount,
                }
            });
        }

        if spending_allowance {
            self.set_allowance(from, caller, allowed - amount);
        }
        self.set_balance(from, available - amount);
        // Cannot overflow: every balance is bounded by total_supply.
        let credited = self.balance_of(to) + amount;
        self.set_balance(to, credited);
        emitted.push((
            self.address.clone(),
            LedgerEvent::Transfer {
                from: from.clone(),
                to: to.clone(),
                amount,
            },
        ));
        Ok(())
    }

    pub(crate) fn increase_supply(&mut self, caller: &Address, amount: Amount) -> CallResult<()> {
        self.ensure_supply_authority(caller)?;
        let total_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(CallError::SupplyBounds {
                total_supply: self.total_supply,
                amount,
            })?;
        let credited = self.balance_of(caller) + amount;
        self.total_supply = total_supply;
        self.set_balance(caller, credited);
        Ok(())
    }

    pub(crate) fn decrease_supply(&mut self, caller: &Address, amount: Amount) -> CallResult<()> {
        self.ensure_supply_authority(caller)?;
        let available = self.balance_of(caller);
        if available < amount {
            return Err(CallError::InsufficientBalance {
                account: caller.clone(),
                available,
                requested: amount,
            });
        }
        let total_supply = self
            .total_supply
            .checked_sub(amount)
            .ok_or(CallError::SupplyBounds {
                total_supply: self.total_supply,
                amount,
            })?;
        self.total_supply = total_supply;
        self.set_balance(caller, available - amount);
        Ok(())
    }

    fn set_balance(&mut self, account: &Address, amount: Amount) {
        if amount == 0 {
            self.balances.remove(account);
        } else {
            self.balances.insert(account.clone(), amount);
        }
    }

    fn set_allowance(&mut self, owner: &Address, spender: &Address, amount: Amount) {
        if amount == 0 {
            if let Some(spenders) = self.allowances.get_mut(owner) {
                spenders.remove(spender);
                if spenders.is_empty() {
                    self.allowances.remove(owner);
                }
            }
        } else {
            self.allowances
                .entry(owner.clone())
                .or_default()
                .insert(spender.clone(), amount);
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            address: self.address.clone(),
            master: self.master.clone(),
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            total_supply: self.total_supply,
            holders: self.balances.len(),
            whitelist: self.reclamation_whitelist.iter().cloned().collect(),
            state_root: hex::encode(self.state_root()),
        }
    }

    /// Merkle commitment over metadata, balances, allowances and whitelist.
    pub fn state_root(&self) -> [u8; 32] {
        let supply = self.total_supply.to_be_bytes();
        let mut leaves = vec![leaf(
            b"meta",
            &[
                self.master.as_str().as_bytes(),
                self.name.as_bytes(),
                self.symbol.as_bytes(),
                &supply,
            ],
        )];

        for (account, balance) in &self.balances {
            leaves.push(leaf(
                b"balance",
                &[account.as_str().as_bytes(), &balance.to_be_bytes()],
            ));
        }
        for (owner, spenders) in &self.allowances {
            for (spender, amount) in spenders {
                leaves.push(leaf(
                    b"allowance",
                    &[
                        owner.as_str().as_bytes(),
                        spender.as_str().as_bytes(),
                        &amount.to_be_bytes(),
                    ],
                ));
            }
        }
        for ledger in &self.reclamation_whitelist {
            leaves.push(leaf(b"reclaimable", &[ledger.as_str().as_bytes()]));
        }
        fold_root(leaves)
    }
}

const ROOT_DOMAIN: &[u8] = b"stimulus-ledger/v1/";

/// Hashes one tagged record. Fields are length-prefixed so neighbouring
/// addresses cannot run together.
fn leaf(tag: &[u8], fields: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(ROOT_DOMAIN);
    hasher.update(tag);
    for field in fields {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field);
    }
    hasher.finalize().into()
}

/// Pairs nodes level by level; an unpaired node moves up unchanged.
fn fold_root(mut level: Vec<[u8; 32]>) -> [u8; 32] {
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => {
                    let mut hasher = Sha256::new();
                    hasher.update(ROOT_DOMAIN);
                    hasher.update(b"pair");
                    hasher.update(left);
                    hasher.update(right);
                    let node: [u8; 32] = hasher.finalize().into();
                    node
                }
                _ => pair[0],
            })
            .collect();
    }
    // `state_root` always contributes the metadata leaf.
    level.first().copied().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployed(supply: Amount) -> (Ledger, Address) {
        let d = Address::from("d");
        let config = LedgerConfig {
            name: "Trial Token".into(),
            symbol: "TT".into(),
            initial_supply: supply,
        };
        (Ledger::deploy("token".into(), &d, &config), d)
    }

    #[test]
    fn deploy_credits_creator() {
        let (ledger, d) = deployed(100);
        assert_eq!(ledger.master(), &d);
        assert_eq!(ledger.balance_of(&d), 100);
        assert_eq!(ledger.total_supply(), 100);
        assert_eq!(ledger.balance_sum(), 100);
    }

    #[test]
    fn transfer_moves_funds_and_emits() {
        let (mut ledger, d) = deployed(100);
        let a = Address::from("a");
        let mut emitted = Emitted::new();
        ledger.transfer(&d, &a, 10, &mut emitted).unwrap();
        assert_eq!(ledger.balance_of(&d), 90);
        assert_eq!(ledger.balance_of(&a), 10);
        assert_eq!(
            emitted,
            vec![(
                Address::from("token"),
                LedgerEvent::Transfer {
                    from: d,
                    to: a,
                    amount: 10
                }
            )]
        );
    }

    #[test]
    fn overdraft_is_rejected_without_change() {
        let (mut ledger, d) = deployed(100);
        let before = ledger.clone();
        let mut emitted = Emitted::new();
        let err = ledger
            .transfer(&d, &"a".into(), 101, &mut emitted)
            .unwrap_err();
        assert!(matches!(
            err,
            CallError::InsufficientBalance {
                available: 100,
                requested: 101,
                ..
            }
        ));
        assert_eq!(ledger, before);
        assert!(emitted.is_empty());
    }

    #[test]
    fn transfer_from_spends_allowance() {
        let (mut ledger, d) = deployed(100);
        let (a, b) = (Address::from("a"), Address::from("b"));
        let mut emitted = Emitted::new();
        ledger.approve(&d, &a, 10, &mut emitted).unwrap();
        ledger.transfer_from(&a, &d, &b, 7, &mut emitted).unwrap();
        assert_eq!(ledger.allowance(&d, &a), 3);
        assert_eq!(ledger.balance_of(&d), 93);
        assert_eq!(ledger.balance_of(&b), 7);

        let err = ledger
            .transfer_from(&a, &d, &b, 4, &mut emitted)
            .unwrap_err();
        assert!(matches!(err, CallError::InsufficientAllowance { allowed: 3, .. }));
    }

    #[test]
    fn transfer_from_without_allowance_is_unauthorized() {
        let (mut ledger, d) = deployed(100);
        let mut emitted = Emitted::new();
        let err = ledger
            .transfer_from(&"a".into(), &d, &"b".into(), 1, &mut emitted)
            .unwrap_err();
        assert!(matches!(
            err,
            CallError::Unauthorized {
                role: Role::Spender,
                ..
            }
        ));
    }

    #[test]
    fn owner_moving_own_funds_skips_allowance() {
        let (mut ledger, d) = deployed(100);
        let a = Address::from("a");
        let mut emitted = Emitted::new();
        ledger.approve(&d, &d, 5, &mut emitted).unwrap();
        ledger.transfer_from(&d, &d, &a, 20, &mut emitted).unwrap();
        assert_eq!(ledger.allowance(&d, &d), 5);
        assert_eq!(ledger.balance_of(&a), 20);
    }

    #[test]
    fn approve_requires_reset_between_nonzero_values() {
        let (mut ledger, d) = deployed(100);
        let a = Address::from("a");
        let mut emitted = Emitted::new();
        ledger.approve(&d, &a, 10, &mut emitted).unwrap();
        let err = ledger.approve(&d, &a, 20, &mut emitted).unwrap_err();
        assert!(matches!(
            err,
            CallError::InvalidAllowanceTransition {
                current: 10,
                requested: 20,
                ..
            }
        ));
        ledger.approve(&d, &a, 0, &mut emitted).unwrap();
        ledger.approve(&d, &a, 20, &mut emitted).unwrap();
        assert_eq!(ledger.allowance(&d, &a), 20);
        assert_eq!(emitted.len(), 3);
    }

    #[test]
    fn supply_changes_keep_sum_invariant() {
        let (mut ledger, d) = deployed(100);
        ledger.increase_supply(&d, 17).unwrap();
        assert_eq!(ledger.total_supply(), 117);
        assert_eq!(ledger.balance_of(&d), 117);
        ledger.decrease_supply(&d, 50).unwrap();
        assert_eq!(ledger.total_supply(), 67);
        assert_eq!(ledger.balance_sum(), ledger.total_supply());
    }

    #[test]
    fn supply_overflow_is_rejected() {
        let (mut ledger, d) = deployed(Amount::MAX - 1);
        let err = ledger.increase_supply(&d, 2).unwrap_err();
        assert!(matches!(err, CallError::SupplyBounds { .. }));
        assert_eq!(ledger.total_supply(), Amount::MAX - 1);
    }

    #[test]
    fn decrease_beyond_balance_is_rejected() {
        let (mut ledger, d) = deployed(100);
        ledger
            .transfer(&d, &"a".into(), 60, &mut Emitted::new())
            .unwrap();
        let err = ledger.decrease_supply(&d, 50).unwrap_err();
        assert!(matches!(err, CallError::InsufficientBalance { .. }));
        assert_eq!(ledger.total_supply(), 100);
    }

    #[test]
    fn ledger_itself_may_mint() {
        let (mut ledger, _) = deployed(100);
        let own = ledger.address().clone();
        ledger.increase_supply(&own, 5).unwrap();
        assert_eq!(ledger.balance_of(&own), 5);
        assert_eq!(ledger.total_supply(), 105);
    }

    #[test]
    fn state_root_tracks_state_not_history() {
        let (mut ledger, d) = deployed(100);
        let a = Address::from("a");
        let root = ledger.state_root();
        assert_eq!(root, ledger.state_root());

        let mut emitted = Emitted::new();
        ledger.transfer(&d, &a, 10, &mut emitted).unwrap();
        assert_ne!(root, ledger.state_root());
        ledger.transfer(&a, &d, 10, &mut emitted).unwrap();
        assert_eq!(root, ledger.state_root());
        assert_eq!(ledger.snapshot().state_root, hex::encode(root));
    }

    #[test]
    fn state_root_separates_adjacent_addresses() {
        let (mut left, _) = deployed(100);
        let (mut right, _) = deployed(100);
        let mut emitted = Emitted::new();
        left.approve(&"ab".into(), &"c".into(), 5, &mut emitted)
            .unwrap();
        right
            .approve(&"a".into(), &"bc".into(), 5, &mut emitted)
            .unwrap();
        assert_ne!(left.state_root(), right.state_root());
    }

    #[test]
    fn fold_root_promotes_unpaired_node() {
        let a = leaf(b"t", &[b"a"]);
        let b = leaf(b"t", &[b"b"]);
        let c = leaf(b"t", &[b"c"]);
        assert_eq!(fold_root(vec![a]), a);
        let ab = fold_root(vec![a, b]);
        assert_ne!(ab, a);
        assert_eq!(fold_root(vec![a, b, c]), fold_root(vec![ab, c]));
    }
}
