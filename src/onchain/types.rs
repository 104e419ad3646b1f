//! Typed values flowing out of the on-chain layer.

use alloy::primitives::{utils::format_ether, Address, LogData, B256, U256};
use alloy::rpc::types::Log;
use chrono::{DateTime, Utc};

/// A log exactly as the node delivered it, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub address: Address,
    pub data: LogData,
    pub block_number: Option<u64>,
    pub tx_hash: Option<B256>,
}

impl RawEvent {
    pub fn from_rpc(log: &Log) -> Self {
        Self {
            address: log.address(),
            data: log.data().clone(),
            block_number: log.block_number,
            tx_hash: log.transaction_hash,
        }
    }
}

/// Where a decoded event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogMeta {
    pub contract: Address,
    pub block_number: Option<u64>,
    pub tx_hash: Option<B256>,
}

/// A decoded event emitted by the recorder, trap or responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// A transaction was logged by the recorder (or a legacy DustLogged).
    TransactionRecorded {
        meta: LogMeta,
        from: Address,
        amount: U256,
        block_number: u64,
    },

    /// The trap crossed its dust threshold.
    DustAttackDetected {
        meta: LogMeta,
        total_dust: U256,
        block_number: u64,
        message: String,
    },

    /// Richer detection alert with sender diversity.
    DustAttackAlert {
        meta: LogMeta,
        dust_count: U256,
        unique_senders: U256,
        block_number: u64,
        alert_type: String,
        timestamp: u64,
    },

    /// The responder paused the protected system.
    EmergencyPause {
        meta: LogMeta,
        reason: String,
        timestamp: u64,
    },
}

impl ChainEvent {
    pub fn meta(&self) -> &LogMeta {
        match self {
            Self::TransactionRecorded { meta, .. }
            | Self::DustAttackDetected { meta, .. }
            | Self::DustAttackAlert { meta, .. }
            | Self::EmergencyPause { meta, .. } => meta,
        }
    }

    /// Block the event refers to. Pauses carry no block field, so the log's
    /// own block is used.
    pub fn block_number(&self) -> u64 {
        match self {
            Self::TransactionRecorded { block_number, .. }
            | Self::DustAttackDetected { block_number, .. }
            | Self::DustAttackAlert { block_number, .. } => *block_number,
            Self::EmergencyPause { meta, .. } => meta.block_number.unwrap_or(0),
        }
    }

    pub fn is_detection(&self) -> bool {
        matches!(
            self,
            Self::DustAttackDetected { .. } | Self::DustAttackAlert { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TransactionRecorded { .. } => "TransactionRecorded",
            Self::DustAttackDetected { .. } => "DustAttackDetected",
            Self::DustAttackAlert { .. } => "DustAttackAlert",
            Self::EmergencyPause { .. } => "EmergencyPause",
        }
    }
}

impl std::fmt::Display for ChainEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransactionRecorded { from, amount, block_number, .. } => {
                write!(f, "TransactionRecorded(from={from}, amount={amount}, block={block_number})")
            }
            Self::DustAttackDetected { total_dust, block_number, .. } => {
                write!(f, "DustAttackDetected(dust={total_dust}, block={block_number})")
            }
            Self::DustAttackAlert { dust_count, unique_senders, alert_type, .. } => write!(
                f,
                "DustAttackAlert(type={alert_type}, dust={dust_count}, senders={unique_senders})"
            ),
            Self::EmergencyPause { reason, .. } => write!(f, "EmergencyPause({reason})"),
        }
    }
}

/// Raw result of one getStatus() poll, stamped with the head block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReading {
    pub dust_count: U256,
    pub threshold: U256,
    pub would_trigger: bool,
    pub block_number: u64,
}

/// Authoritative status observed by one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub dust_count: U256,
    pub threshold: U256,
    pub would_trigger: bool,
    pub observed_at_block: u64,
    pub observed_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn new(reading: StatusReading, observed_at: DateTime<Utc>) -> Self {
        Self {
            dust_count: reading.dust_count,
            threshold: reading.threshold,
            would_trigger: reading.would_trigger,
            observed_at_block: reading.block_number,
            observed_at,
        }
    }
}

/// Trap constants reported at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapSettings {
    /// Largest value (wei) still counted as dust.
    pub dust_threshold_wei: U256,
    pub count_threshold: U256,
    pub block_window: U256,
}

impl std::fmt::Display for TrapSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "dust threshold {} ETH, count threshold {} transactions, window {} blocks",
            format_ether(self.dust_threshold_wei),
            self.count_threshold,
            self.block_window
        )
    }
}

/// One entry of the recorder's transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedTx {
    pub sender: Address,
    pub amount: U256,
    pub block_number: U256,
}
