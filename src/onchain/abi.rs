//! Contract event and read-method ABI definitions.
//!
//! We declare minimal ABIs covering just the events and view functions the
//! monitor needs. Topic0 hashes come from the generated `SIGNATURE_HASH`
//! constants and are used in the eth_subscribe log filter.

use alloy::primitives::B256;
use alloy::sol;
use alloy::sol_types::SolEvent;

sol! {
    /// Emitted by the recorder for every incoming transaction.
    #[derive(Debug, PartialEq, Eq)]
    event TransactionRecorded(address indexed from, uint256 amount, uint256 blockNumber);

    /// Older trap deployments log dust transfers under this name.
    #[derive(Debug, PartialEq, Eq)]
    event DustLogged(address sender, uint256 value, uint256 blockNumber);

    #[derive(Debug, PartialEq, Eq)]
    event DustAttackDetected(uint256 totalDust, uint256 blockNumber, string message);

    #[derive(Debug, PartialEq, Eq)]
    event DustAttackAlert(
        uint256 dustCount,
        uint256 uniqueSenders,
        uint256 blockNumber,
        string alertType,
        uint256 timestamp
    );

    #[derive(Debug, PartialEq, Eq)]
    event EmergencyPause(string reason, uint256 timestamp);

    /// Read-only surface of the trap contract.
    interface IDustTrap {
        function getStatus() external view returns (uint256 dustCount, uint256 threshold, bool wouldTrigger);
        function DUST_THRESHOLD() external view returns (uint256);
        function COUNT_THRESHOLD() external view returns (uint256);
        function BLOCK_WINDOW() external view returns (uint256);
    }

    /// Read-only surface of the transaction recorder.
    interface IDustRecorder {
        struct TxRecord {
            address sender;
            uint256 amount;
            uint256 blockNumber;
        }

        function getEntryCount() external view returns (uint256);
        function getLast(uint256 k) external view returns (TxRecord[] memory);
    }
}

/// Event kinds the monitor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TransactionRecorded,
    DustLogged,
    DustAttackDetected,
    DustAttackAlert,
    EmergencyPause,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::TransactionRecorded,
        EventKind::DustLogged,
        EventKind::DustAttackDetected,
        EventKind::DustAttackAlert,
        EventKind::EmergencyPause,
    ];

    pub fn topic(self) -> B256 {
        match self {
            EventKind::TransactionRecorded => TransactionRecorded::SIGNATURE_HASH,
            EventKind::DustLogged => DustLogged::SIGNATURE_HASH,
            EventKind::DustAttackDetected => DustAttackDetected::SIGNATURE_HASH,
            EventKind::DustAttackAlert => DustAttackAlert::SIGNATURE_HASH,
            EventKind::EmergencyPause => EmergencyPause::SIGNATURE_HASH,
        }
    }

    pub fn signature(self) -> &'static str {
        match self {
            EventKind::TransactionRecorded => TransactionRecorded::SIGNATURE,
            EventKind::DustLogged => DustLogged::SIGNATURE,
            EventKind::DustAttackDetected => DustAttackDetected::SIGNATURE,
            EventKind::DustAttackAlert => DustAttackAlert::SIGNATURE,
            EventKind::EmergencyPause => EmergencyPause::SIGNATURE,
        }
    }

    pub fn from_topic(topic: &B256) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.topic() == *topic)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::TransactionRecorded => write!(f, "TransactionRecorded"),
            EventKind::DustLogged => write!(f, "DustLogged"),
            EventKind::DustAttackDetected => write!(f, "DustAttackDetected"),
            EventKind::DustAttackAlert => write!(f, "DustAttackAlert"),
            EventKind::EmergencyPause => write!(f, "EmergencyPause"),
        }
    }
}

/// Topic0 values for the log subscription filter.
pub fn watched_topics() -> Vec<B256> {
    EventKind::ALL.iter().map(|k| k.topic()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::keccak256;

    #[test]
    fn test_topic_hashes_match_signatures() {
        for kind in EventKind::ALL {
            assert_eq!(kind.topic(), keccak256(kind.signature().as_bytes()), "{kind}");
        }
        assert_eq!(
            EventKind::DustAttackDetected.signature(),
            "DustAttackDetected(uint256,uint256,string)"
        );
        assert_eq!(
            EventKind::DustLogged.signature(),
            "DustLogged(address,uint256,uint256)"
        );
    }

    #[test]
    fn test_topics_are_unique() {
        let topics = watched_topics();
        for (i, a) in topics.iter().enumerate() {
            for b in &topics[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_from_topic_round_trip() {
        assert_eq!(
            EventKind::from_topic(&EventKind::EmergencyPause.topic()),
            Some(EventKind::EmergencyPause)
        );
        assert_eq!(EventKind::from_topic(&B256::ZERO), None);
    }
}
