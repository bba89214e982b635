//! Append-only event log.
//!
//! Events are staged inside a call's transaction and only reach the log when
//! the call commits, so the log never shows effects of a failed call.

use serde::{Deserialize, Serialize};

use crate::address::{Address, Amount};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Transfer {
        from: Address,
        to: Address,
        #[serde(with = "amount_string")]
        amount: Amount,
    },
    Approval {
        owner: Address,
        spender: Address,
        #[serde(with = "amount_string")]
        amount: Amount,
    },
    StimulusRequest {
        candidate: Address,
        stimulus_type: u8,
        submission_id: u64,
    },
    StimulusResponse {
        candidate: Address,
        stimulus_type: u8,
        submission_id: u64,
        accepted: bool,
    },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Transfer,
    Approval,
    StimulusRequest,
    StimulusResponse,
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transfer" => Ok(EventKind::Transfer),
            "approval" => Ok(EventKind::Approval),
            "stimulus_request" => Ok(EventKind::StimulusRequest),
            "stimulus_response" => Ok(EventKind::StimulusResponse),
            other => Err(format!("unknown event kind {other}")),
        }
    }
}

impl LedgerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LedgerEvent::Transfer { .. } => EventKind::Transfer,
            LedgerEvent::Approval { .. } => EventKind::Approval,
            LedgerEvent::StimulusRequest { .. } => EventKind::StimulusRequest,
            LedgerEvent::StimulusResponse { .. } => EventKind::StimulusResponse,
        }
    }

    /// Whether any address field of the event equals `address`.
    pub fn involves(&self, address: &Address) -> bool {
        match self {
            LedgerEvent::Transfer { from, to, .. } => from == address || to == address,
            LedgerEvent::Approval { owner, spender, .. } => owner == address || spender == address,
            LedgerEvent::StimulusRequest { candidate, .. }
            | LedgerEvent::StimulusResponse { candidate, .. } => candidate == address,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventRecord {
    pub block: u64,
    pub log_index: u64,
    pub emitter: Address,
    pub event: LedgerEvent,
}

/// Query over the event log. Unset fields match everything; the block range
/// is inclusive on both ends.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    pub kind: Option<EventKind>,
    pub emitter: Option<Address>,
    pub involving: Option<Address>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn emitter(mut self, emitter: Address) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn involving(mut self, address: Address) -> Self {
        self.involving = Some(address);
        self
    }

    pub fn blocks(mut self, from: u64, to: u64) -> Self {
        self.from_block = Some(from);
        self.to_block = Some(to);
        self
    }

    pub fn matches(&self, record: &EventRecord) -> bool {
        if let Some(kind) = self.kind {
            if record.event.kind() != kind {
                return false;
            }
        }
        if let Some(emitter) = &self.emitter {
            if &record.emitter != emitter {
                return false;
            }
        }
        if let Some(address) = &self.involving {
            if !record.event.involves(address) {
                return false;
            }
        }
        if self.from_block.is_some_and(|from| record.block < from) {
            return false;
        }
        if self.to_block.is_some_and(|to| record.block > to) {
            return false;
        }
        true
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventLog {
    records: Vec<EventRecord>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends every staged event of one committed call under `block`.
    pub(crate) fn append_block(&mut self, block: u64, staged: Vec<(Address, LedgerEvent)>) {
        for (emitter, event) in staged {
            let log_index = self.records.len() as u64;
            self.records.push(EventRecord {
                block,
                log_index,
                emitter,
                event,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn query(&self, filter: &EventFilter) -> Vec<EventRecord> {
        // Records are appended in block order, so the range bounds can be
        // found by binary search before filtering the rest.
        let start = match filter.from_block {
            Some(from) => self.records.partition_point(|r| r.block < from),
            None => 0,
        };
        let end = match filter.to_block {
            Some(to) => self.records.partition_point(|r| r.block <= to),
            None => self.records.len(),
        };
        if start >= end {
            return Vec::new();
        }
        self.records[start..end]
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }
}

// Internally tagged enums buffer their content, and the buffer cannot hold
// integers above u64::MAX, so amounts travel as decimal strings.
mod amount_string {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::address::Amount;

    pub fn serialize<S>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}
