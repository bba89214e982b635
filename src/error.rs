use std::fmt;

use thiserror::Error;

use crate::address::{Address, Amount};
use crate::stimulus::ParticipantStatus;

/// Role a caller failed to hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Master,
    PrincipalInvestigator,
    Spender,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Master => "master",
            Role::PrincipalInvestigator => "principal investigator",
            Role::Spender => "authorized spender",
        })
    }
}

/// Failure of a single call. Any variant means the call committed nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("{caller} is not the {role}")]
    Unauthorized { caller: Address, role: Role },

    #[error("insufficient balance in {account}: have {available}, need {requested}")]
    InsufficientBalance {
        account: Address,
        available: Amount,
        requested: Amount,
    },

    #[error("allowance of {spender} over {owner} is {allowed}, need {requested}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        allowed: Amount,
        requested: Amount,
    },

    #[error("supply change of {amount} out of bounds for total supply {total_supply}")]
    SupplyBounds { total_supply: Amount, amount: Amount },

    #[error("allowance of {spender} over {owner} is {current}; reset to 0 before approving {requested}")]
    InvalidAllowanceTransition {
        owner: Address,
        spender: Address,
        current: Amount,
        requested: Amount,
    },

    #[error("participant {participant} is {status}, operation requires {required}")]
    InvalidStatus {
        participant: Address,
        status: ParticipantStatus,
        required: &'static str,
    },

    #[error("stimulus type {stimulus_type} outside 1..=4")]
    InvalidStimulusType { stimulus_type: u8 },

    #[error("ledger {ledger} is not whitelisted for reclamation")]
    NotWhitelisted { ledger: Address },

    #[error("no {kind} deployed at {address}")]
    UnknownInstance { kind: &'static str, address: Address },
}

/// Coarse classification of a [`CallError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Authorization,
    InsufficientBalance,
    InsufficientAllowance,
    SupplyBounds,
    InvalidAllowanceTransition,
    InvalidState,
    NotWhitelisted,
    UnknownInstance,
}

impl CallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::Unauthorized { .. } => ErrorKind::Authorization,
            CallError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            CallError::InsufficientAllowance { .. } => ErrorKind::InsufficientAllowance,
            CallError::SupplyBounds { .. } => ErrorKind::SupplyBounds,
            CallError::InvalidAllowanceTransition { .. } => ErrorKind::InvalidAllowanceTransition,
            CallError::InvalidStatus { .. } | CallError::InvalidStimulusType { .. } => {
                ErrorKind::InvalidState
            }
            CallError::NotWhitelisted { .. } => ErrorKind::NotWhitelisted,
            CallError::UnknownInstance { .. } => ErrorKind::UnknownInstance,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Authorization => "authorization",
            ErrorKind::InsufficientBalance => "insufficient_balance",
            ErrorKind::InsufficientAllowance => "insufficient_allowance",
            ErrorKind::SupplyBounds => "supply_bounds",
            ErrorKind::InvalidAllowanceTransition => "invalid_allowance_transition",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::NotWhitelisted => "not_whitelisted",
            ErrorKind::UnknownInstance => "unknown_instance",
        })
    }
}

/// Failures loading or saving chain state and configuration files.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed json in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type CallResult<T> = Result<T, CallError>;
