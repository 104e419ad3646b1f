//! On-chain access for the dust-attack trap.
//!
//! Subscribes to the trap's logs over WebSocket RPC and reads its status
//! through view calls:
//! 1. TransactionRecorded / DustLogged: every logged (dust) transaction
//! 2. DustAttackDetected / DustAttackAlert: the trap tripped
//! 3. EmergencyPause: the responder paused the protected system
//! 4. getStatus(): authoritative (dustCount, threshold, wouldTrigger)
//!
//! Architecture:
//! - `ChainClient`: owns the node connection; runs the log subscription with
//!   automatic reconnection and serves bounded-time contract calls
//! - `decode`: turns raw logs into typed `ChainEvent`s against the ABI in `abi`
//! - Raw logs are pushed into the monitor channel as `MonitorInput::Log`

pub mod abi;
pub mod client;
pub mod decode;
pub mod reconnect;
pub mod types;

pub use client::{ChainClient, ContractReader, EventSource};
pub use decode::{decode, DecodeError};
pub use reconnect::BackoffPolicy;
pub use types::{ChainEvent, RawEvent, StatusReading, StatusSnapshot};

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("{method} timed out after {timeout:?}")]
    Timeout {
        method: &'static str,
        timeout: Duration,
    },
    #[error("failed to decode {method} return data: {reason}")]
    Decode { method: &'static str, reason: String },
    #[error("reconnect budget exhausted after {attempts} attempts (last error: {last})")]
    Exhausted { attempts: u32, last: String },
}

impl ChainError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChainError::Exhausted { .. })
    }
}
