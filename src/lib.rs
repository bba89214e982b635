//! Token ledger and stimulus reward engine.
//!
//! * [`ledger`]: balances, allowances and supply of one token, guarded by a
//!   single master, plus migration of balances from whitelisted older ledgers.
//! * [`stimulus`]: enrollment and reward payout for a data trial, paying
//!   participants out of the principal investigator's ledger balance.
//! * [`chain`]: the host that owns every instance, serializes calls and
//!   commits each call's effects across instances all at once, or not at all.
//! * [`events`]: the append-only log of transfers, approvals and stimulus
//!   requests/responses, queryable by kind, address and block range.
//!
//! Every operation takes the caller's identity explicitly and returns a typed
//! [`CallError`] on failure.

pub mod address;
pub mod chain;
pub mod config;
pub mod events;
pub mod ledger;
pub mod stimulus;

mod error;

pub use address::{Address, Amount};
pub use chain::Chain;
pub use config::{LedgerConfig, StimulusConfig};
pub use error::{CallError, CallResult, ErrorKind, Role, StoreError};
pub use events::{EventFilter, EventKind, EventRecord, LedgerEvent};
pub use ledger::{Ledger, LedgerSnapshot};
pub use stimulus::{ParticipantStatus, Stimulus};
