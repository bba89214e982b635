//! Property-based tests for supply conservation and participant lifecycle.

use proptest::prelude::*;

use stimulus_ledger::{
    Address, Amount, Chain, ErrorKind, LedgerConfig, ParticipantStatus, StimulusConfig,
};

const ACCOUNTS: [&str; 4] = ["m", "a", "b", "c"];

#[derive(Clone, Debug)]
enum Op {
    Transfer { caller: usize, to: usize, amount: Amount },
    TransferFrom { caller: usize, from: usize, to: usize, amount: Amount },
    Approve { caller: usize, spender: usize, amount: Amount },
    Increase { caller: usize, amount: Amount },
    Decrease { caller: usize, amount: Amount },
}

fn account() -> impl Strategy<Value = usize> {
    0..ACCOUNTS.len()
}

fn amount() -> impl Strategy<Value = Amount> {
    prop_oneof![0u128..200, Just(0u128), 1_000u128..10_000]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (account(), account(), amount()).prop_map(|(caller, to, amount)| Op::Transfer {
            caller,
            to,
            amount
        }),
        (account(), account(), account(), amount()).prop_map(|(caller, from, to, amount)| {
            Op::TransferFrom {
                caller,
                from,
                to,
                amount,
            }
        }),
        (account(), account(), amount()).prop_map(|(caller, spender, amount)| Op::Approve {
            caller,
            spender,
            amount
        }),
        (account(), amount()).prop_map(|(caller, amount)| Op::Increase { caller, amount }),
        (account(), amount()).prop_map(|(caller, amount)| Op::Decrease { caller, amount }),
    ]
}

fn addr(idx: usize) -> Address {
    Address::from(ACCOUNTS[idx])
}

proptest! {
    /// Property: total supply equals the sum of balances after any sequence
    /// of calls, and a failed call changes nothing.
    #[test]
    fn prop_supply_equals_sum_of_balances(ops in prop::collection::vec(op(), 0..40)) {
        let chain = Chain::new();
        let ledger = chain.deploy_ledger(
            &addr(0),
            &LedgerConfig { name: "Trial Token".into(), symbol: "TT".into(), initial_supply: 1_000 },
        );

        for op in ops {
            let before = chain.ledger(&ledger).unwrap();
            let result = match &op {
                Op::Transfer { caller, to, amount } => {
                    chain.transfer(&ledger, &addr(*caller), &addr(*to), *amount)
                }
                Op::TransferFrom { caller, from, to, amount } => {
                    chain.transfer_from(&ledger, &addr(*caller), &addr(*from), &addr(*to), *amount)
                }
                Op::Approve { caller, spender, amount } => {
                    chain.approve(&ledger, &addr(*caller), &addr(*spender), *amount)
                }
                Op::Increase { caller, amount } => {
                    chain.increase_supply(&ledger, &addr(*caller), *amount)
                }
                Op::Decrease { caller, amount } => {
                    chain.decrease_supply(&ledger, &addr(*caller), *amount)
                }
            };

            let after = chain.ledger(&ledger).unwrap();
            prop_assert_eq!(after.total_supply(), after.balance_sum());
            match result {
                Err(err) => {
                    prop_assert_eq!(&after, &before);
                    if let Op::Transfer { caller, amount, .. } = &op {
                        if *amount > before.balance_of(&addr(*caller)) {
                            prop_assert_eq!(err.kind(), ErrorKind::InsufficientBalance);
                        }
                    }
                }
                Ok(()) => {
                    if let Op::Approve { caller, spender, amount } = &op {
                        let prior = before.allowance(&addr(*caller), &addr(*spender));
                        prop_assert!(*amount == 0 || prior == 0);
                    }
                }
            }
        }
    }

    /// Property: once rejected, no sequence of enrollments or responses
    /// makes a participant anything but rejected.
    #[test]
    fn prop_rejection_is_terminal(steps in prop::collection::vec((0u8..5, any::<bool>()), 0..20)) {
        let chain = Chain::new();
        let pi = Address::from("pi");
        let c = Address::from("c");
        let ledger = chain.deploy_ledger(
            &pi,
            &LedgerConfig { name: "Trial Token".into(), symbol: "TT".into(), initial_supply: 1_000_000 },
        );
        let stimulus = chain
            .deploy_stimulus(&pi, &ledger, &StimulusConfig { rewards: [5, 1, 2, 3, 4] })
            .unwrap();
        chain.approve(&ledger, &pi, &stimulus, 1_000_000).unwrap();
        chain.enroll(&stimulus, &c, 0).unwrap();
        chain.respond_to_enrollment(&stimulus, &pi, &c, 0, false).unwrap();

        for (step, flag) in steps {
            let submission = u64::from(step);
            let balances = (
                chain.balance_of(&ledger, &pi).unwrap(),
                chain.balance_of(&ledger, &c).unwrap(),
            );
            let result = match step {
                0 => chain.enroll(&stimulus, &c, submission),
                1 => chain.submit(&stimulus, &c, 1, submission),
                2 => chain.respond(&stimulus, &pi, &c, 1, submission, flag),
                3 => chain.respond_to_enrollment(&stimulus, &pi, &c, submission, flag),
                _ => chain.status(&stimulus, &c).map(|_| ()),
            };
            if step < 2 || (step == 3 && flag) {
                prop_assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidState);
            }
            if step == 3 {
                prop_assert_eq!(
                    (
                        chain.balance_of(&ledger, &pi).unwrap(),
                        chain.balance_of(&ledger, &c).unwrap(),
                    ),
                    balances
                );
            }
            prop_assert_eq!(chain.status(&stimulus, &c).unwrap(), ParticipantStatus::Rejected);
        }
    }
}
