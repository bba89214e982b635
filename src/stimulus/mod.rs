//! Stimulus: enrollment and reward payout for one data trial.
//!
//! Participants move `Unset -> Pending -> Accepted | Rejected`. `Rejected` is
//! terminal. Rewards are paid out of the principal investigator's balance on
//! the bound ledger, with the stimulus instance acting as the approved
//! spender.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::{Address, Amount};
use crate::config::StimulusConfig;
use crate::error::{CallError, CallResult, Role};
use crate::events::LedgerEvent;
use crate::ledger::{Emitted, Ledger};

/// Stimulus type of an enrollment request/response.
pub const ENROLLMENT: u8 = 0;
/// Number of reward slots: enrollment plus four submission types.
pub const REWARD_SLOTS: usize = 5;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ParticipantStatus {
    #[default]
    Unset = 0,
    Pending = 1,
    Rejected = 2,
    Accepted = 3,
}

impl ParticipantStatus {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParticipantStatus::Unset => "unset",
            ParticipantStatus::Pending => "pending",
            ParticipantStatus::Rejected => "rejected",
            ParticipantStatus::Accepted => "accepted",
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stimulus {
    address: Address,
    ledger: Address,
    principal_investigator: Address,
    rewards: [Amount; REWARD_SLOTS],
    participants: BTreeMap<Address, ParticipantStatus>,
}

impl Stimulus {
    pub(crate) fn deploy(
        address: Address,
        creator: &Address,
        ledger: &Address,
        config: &StimulusConfig,
    ) -> Self {
        Self {
            address,
            ledger: ledger.clone(),
            principal_investigator: creator.clone(),
            rewards: config.rewards,
            participants: BTreeMap::new(),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn ledger(&self) -> &Address {
        &self.ledger
    }

    pub fn principal_investigator(&self) -> &Address {
        &self.principal_investigator
    }

    pub fn rewards(&self) -> &[Amount; REWARD_SLOTS] {
        &self.rewards
    }

    pub fn status(&self, account: &Address) -> ParticipantStatus {
        self.participants.get(account).copied().unwrap_or_default()
    }

    /// Every participant that has ever enrolled, in address order.
    pub fn participants(&self) -> impl Iterator<Item = (&Address, ParticipantStatus)> {
        self.participants.iter().map(|(a, s)| (a, *s))
    }

    pub(crate) fn enroll(
        &mut self,
        caller: &Address,
        submission_id: u64,
        emitted: &mut Emitted,
    ) -> CallResult<()> {
        let status = self.status(caller);
        if status == ParticipantStatus::Rejected {
            return Err(CallError::InvalidStatus {
                participant: caller.clone(),
                status,
                required: "not rejected",
            });
        }
        self.participants
            .insert(caller.clone(), ParticipantStatus::Pending);
        self.emit_request(caller, ENROLLMENT, submission_id, emitted);
        Ok(())
    }

    pub(crate) fn respond_to_enrollment(
        &mut self,
        caller: &Address,
        candidate: &Address,
        submission_id: u64,
        accept: bool,
        ledger: &mut Ledger,
        emitted: &mut Emitted,
    ) -> CallResult<()> {
        self.ensure_principal_investigator(caller)?;
        let status = if accept {
            let current = self.status(candidate);
            if current == ParticipantStatus::Rejected {
                return Err(CallError::InvalidStatus {
                    participant: candidate.clone(),
                    status: current,
                    required: "not rejected",
                });
            }
            self.pay(candidate, usize::from(ENROLLMENT), ledger, emitted)?;
            ParticipantStatus::Accepted
        } else {
            ParticipantStatus::Rejected
        };
        self.participants.insert(candidate.clone(), status);
        self.emit_response(candidate, ENROLLMENT, submission_id, accept, emitted);
        Ok(())
    }

    pub(crate) fn submit(
        &mut self,
        caller: &Address,
        stimulus_type: u8,
        submission_id: u64,
        emitted: &mut Emitted,
    ) -> CallResult<()> {
        let status = self.status(caller);
        if status != ParticipantStatus::Accepted {
            return Err(CallError::InvalidStatus {
                participant: caller.clone(),
                status,
                required: "accepted",
            });
        }
        submission_slot(stimulus_type)?;
        self.emit_request(caller, stimulus_type, submission_id, emitted);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn respond(
        &mut self,
        caller: &Address,
        candidate: &Address,
        stimulus_type: u8,
        submission_id: u64,
        accept: bool,
        ledger: &mut Ledger,
        emitted: &mut Emitted,
    ) -> CallResult<()> {
        self.ensure_principal_investigator(caller)?;
        let slot = submission_slot(stimulus_type)?;
        if accept {
            self.pay(candidate, slot, ledger, emitted)?;
        }
        self.emit_response(candidate, stimulus_type, submission_id, accept, emitted);
        Ok(())
    }

    fn ensure_principal_investigator(&self, caller: &Address) -> CallResult<()> {
        if caller != &self.principal_investigator {
            return Err(CallError::Unauthorized {
                caller: caller.clone(),
                role: Role::PrincipalInvestigator,
            });
        }
        Ok(())
    }

    /// Pulls `rewards[slot]` from the PI to `candidate` using this instance's
    /// allowance on the ledger.
    fn pay(
        &self,
        candidate: &Address,
        slot: usize,
        ledger: &mut Ledger,
        emitted: &mut Emitted,
    ) -> CallResult<()> {
        ledger.transfer_from(
            &self.address,
            &self.principal_investigator,
            candidate,
            self.rewards[slot],
            emitted,
        )
    }

    fn emit_request(
        &self,
        candidate: &Address,
        stimulus_type: u8,
        submission_id: u64,
        emitted: &mut Emitted,
    ) {
        emitted.push((
            self.address.clone(),
            LedgerEvent::StimulusRequest {
                candidate: candidate.clone(),
                stimulus_type,
                submission_id,
            },
        ));
    }

    fn emit_response(
        &self,
        candidate: &Address,
        stimulus_type: u8,
        submission_id: u64,
        accepted: bool,
        emitted: &mut Emitted,
    ) {
        emitted.push((
            self.address.clone(),
            LedgerEvent::StimulusResponse {
                candidate: candidate.clone(),
                stimulus_type,
                submission_id,
                accepted,
            },
        ));
    }
}

fn submission_slot(stimulus_type: u8) -> CallResult<usize> {
    match stimulus_type {
        1..=4 => Ok(usize::from(stimulus_type)),
        _ => Err(CallError::InvalidStimulusType { stimulus_type }),
    }
}
