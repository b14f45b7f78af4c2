//! Shared types for the Tether exchange.
//!
//! This crate holds the small enums that every other crate in the workspace
//! needs to agree on: which side of a handshake a connection request record
//! represents, where that record is in its lifecycle, and the direction and
//! status of the streams an accepted connection unlocks.
//!
//! Every enum serializes to the same lowercase snake-case string on the wire
//! (via `serde`) and in storage (via `Display`/`FromStr`), so a value read
//! back from SQLite compares equal to the one a partner instance sent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which side of a handshake a connection request record represents on this
/// instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestDirection {
    /// The partner sent this request to us; we decide on it.
    Incoming,
    /// We sent this request to the partner; the partner decides on it.
    Submitted,
}

impl fmt::Display for RequestDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestDirection::Incoming => write!(f, "incoming"),
            RequestDirection::Submitted => write!(f, "submitted"),
        }
    }
}

impl FromStr for RequestDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incoming" => Ok(RequestDirection::Incoming),
            "submitted" => Ok(RequestDirection::Submitted),
            _ => Err(format!("unknown request direction: {}", s)),
        }
    }
}

/// Lifecycle status of a connection request record.
///
/// ```text
/// incoming:  created -> accepted_pending -> accepted
///            created -> rejected_pending -> rejected
/// submitted: created -> accepted | rejected
/// ```
///
/// The `_pending` markers mean the decision was made locally but the partner
/// has not confirmed it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Recorded and waiting for a decision.
    Created,
    /// Waiting on the partner. Stored and parsed, never entered by the
    /// handshake itself.
    Pending,
    /// Accepted locally, partner not yet notified successfully.
    AcceptedPending,
    /// Rejected locally, partner not yet notified successfully.
    RejectedPending,
    /// Accepted on both sides; streams exist.
    Accepted,
    /// Rejected on both sides.
    Rejected,
    /// Withdrawn. Terminal.
    Canceled,
}

impl RequestStatus {
    /// Returns `true` for statuses no operation can leave.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Accepted | RequestStatus::Rejected | RequestStatus::Canceled
        )
    }

    /// The in-flight marker for a local decision.
    pub fn pending_for(accepted: bool) -> Self {
        if accepted {
            RequestStatus::AcceptedPending
        } else {
            RequestStatus::RejectedPending
        }
    }

    /// The terminal status a decision resolves to.
    pub fn terminal_for(accepted: bool) -> Self {
        if accepted {
            RequestStatus::Accepted
        } else {
            RequestStatus::Rejected
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Created => "created",
            RequestStatus::Pending => "pending",
            RequestStatus::AcceptedPending => "accepted_pending",
            RequestStatus::RejectedPending => "rejected_pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(RequestStatus::Created),
            "pending" => Ok(RequestStatus::Pending),
            "accepted_pending" => Ok(RequestStatus::AcceptedPending),
            "rejected_pending" => Ok(RequestStatus::RejectedPending),
            "accepted" => Ok(RequestStatus::Accepted),
            "rejected" => Ok(RequestStatus::Rejected),
            "canceled" => Ok(RequestStatus::Canceled),
            _ => Err(format!("unknown request status: {}", s)),
        }
    }
}

/// Direction of a stream relative to the instance that owns the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamDirection {
    /// Data flows from the partner into this instance.
    Input,
    /// Data flows from this instance to the partner.
    Output,
}

impl StreamDirection {
    /// Both directions, in the order streams are created.
    pub const ALL: [StreamDirection; 2] = [StreamDirection::Input, StreamDirection::Output];

    /// The partner's view of the same stream: our output is their input.
    pub fn opposite(self) -> Self {
        match self {
            StreamDirection::Input => StreamDirection::Output,
            StreamDirection::Output => StreamDirection::Input,
        }
    }
}

impl fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamDirection::Input => write!(f, "input"),
            StreamDirection::Output => write!(f, "output"),
        }
    }
}

impl FromStr for StreamDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input" => Ok(StreamDirection::Input),
            "output" => Ok(StreamDirection::Output),
            _ => Err(format!("unknown stream direction: {}", s)),
        }
    }
}

/// Activation status of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    /// The stream may carry traffic.
    Active,
    /// Paused by an operator on this instance.
    Paused,
    /// Paused by the partner instance. Only the partner can lift it.
    PausedExternal,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamStatus::Active => write!(f, "active"),
            StreamStatus::Paused => write!(f, "paused"),
            StreamStatus::PausedExternal => write!(f, "paused_external"),
        }
    }
}

impl FromStr for StreamStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(StreamStatus::Active),
            "paused" => Ok(StreamStatus::Paused),
            "paused_external" => Ok(StreamStatus::PausedExternal),
            _ => Err(format!("unknown stream status: {}", s)),
        }
    }
}
