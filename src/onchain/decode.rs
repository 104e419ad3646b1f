//! Raw log → `ChainEvent` decoding.
//!
//! Every watched event has a statically declared shape in [`abi`]; a log is
//! decoded against the shape selected by its topic0 and rejected outright if
//! it does not match. Nothing here touches monitor state.

use crate::onchain::abi::{self, EventKind};
use crate::onchain::types::{ChainEvent, LogMeta, RawEvent};

use alloy::primitives::U256;
use alloy::sol_types::SolEvent;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("log has no topic0")]
    MissingTopic,
    #[error("unknown event topic {0}")]
    UnknownEvent(alloy::primitives::B256),
    #[error("malformed {kind} payload: {reason}")]
    Malformed { kind: EventKind, reason: String },
    #[error("{kind}.{field} does not fit in u64: {value}")]
    OutOfRange {
        kind: EventKind,
        field: &'static str,
        value: U256,
    },
}

/// Decode a raw log into a typed event.
pub fn decode(raw: &RawEvent) -> Result<ChainEvent, DecodeError> {
    let topic0 = raw.data.topics().first().ok_or(DecodeError::MissingTopic)?;
    let kind = EventKind::from_topic(topic0).ok_or(DecodeError::UnknownEvent(*topic0))?;

    let meta = LogMeta {
        contract: raw.address,
        block_number: raw.block_number,
        tx_hash: raw.tx_hash,
    };

    let event = match kind {
        EventKind::TransactionRecorded => {
            let ev = decode_shape::<abi::TransactionRecorded>(kind, raw)?;
            ChainEvent::TransactionRecorded {
                meta,
                from: ev.from,
                amount: ev.amount,
                block_number: to_u64(kind, "blockNumber", ev.blockNumber)?,
            }
        }
        EventKind::DustLogged => {
            let ev = decode_shape::<abi::DustLogged>(kind, raw)?;
            ChainEvent::TransactionRecorded {
                meta,
                from: ev.sender,
                amount: ev.value,
                block_number: to_u64(kind, "block", ev.blockNumber)?,
            }
        }
        EventKind::DustAttackDetected => {
            let ev = decode_shape::<abi::DustAttackDetected>(kind, raw)?;
            ChainEvent::DustAttackDetected {
                meta,
                total_dust: ev.totalDust,
                block_number: to_u64(kind, "blockNumber", ev.blockNumber)?,
                message: ev.message,
            }
        }
        EventKind::DustAttackAlert => {
            let ev = decode_shape::<abi::DustAttackAlert>(kind, raw)?;
            ChainEvent::DustAttackAlert {
                meta,
                dust_count: ev.dustCount,
                unique_senders: ev.uniqueSenders,
                block_number: to_u64(kind, "blockNumber", ev.blockNumber)?,
                alert_type: ev.alertType,
                timestamp: to_u64(kind, "timestamp", ev.timestamp)?,
            }
        }
        EventKind::EmergencyPause => {
            let ev = decode_shape::<abi::EmergencyPause>(kind, raw)?;
            ChainEvent::EmergencyPause {
                meta,
                reason: ev.reason,
                timestamp: to_u64(kind, "timestamp", ev.timestamp)?,
            }
        }
    };

    Ok(event)
}

fn decode_shape<E: SolEvent>(kind: EventKind, raw: &RawEvent) -> Result<E, DecodeError> {
    E::decode_log_data(&raw.data).map_err(|e| DecodeError::Malformed {
        kind,
        reason: e.to_string(),
    })
}

fn to_u64(kind: EventKind, field: &'static str, value: U256) -> Result<u64, DecodeError> {
    u64::try_from(value).map_err(|_| DecodeError::OutOfRange { kind, field, value })
}
