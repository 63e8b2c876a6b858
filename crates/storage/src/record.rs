//! Record lifecycle states.
//!
//! Every physical row slot carries a 2-byte state that is rewritten in place:
//!
//! ```text
//! Uncommitted ──commit──▶ CommittedAdded ──commit(remove)──▶ CommittedRemoved ──gc──▶ Reclaimed
//!      └───────────────rollback───────────────────────────────────▲
//! ```

use keel_core::{Error, Result};

/// State of one physical record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordState {
    /// Written by an open transaction, invisible to everyone else.
    Uncommitted,
    /// Part of the committed table.
    CommittedAdded,
    /// Removed by a committed transaction or rolled back; awaiting collection.
    CommittedRemoved,
    /// Physically free; the row index may be reused.
    Reclaimed,
}

impl RecordState {
    /// Returns the on-disk code.
    pub fn code(&self) -> u16 {
        match self {
            RecordState::Uncommitted => 0x0001,
            RecordState::CommittedAdded => 0x0010,
            RecordState::CommittedRemoved => 0x0020,
            RecordState::Reclaimed => 0x0040,
        }
    }

    /// Resolves an on-disk code.
    pub fn from_code(code: u16) -> Result<Self> {
        match code {
            0x0001 => Ok(RecordState::Uncommitted),
            0x0010 => Ok(RecordState::CommittedAdded),
            0x0020 => Ok(RecordState::CommittedRemoved),
            0x0040 => Ok(RecordState::Reclaimed),
            other => Err(Error::format(format!("unknown record state {:#06x}", other))),
        }
    }

    /// Returns true if the transition `self → next` is legal.
    pub fn can_become(&self, next: RecordState) -> bool {
        matches!(
            (self, next),
            (RecordState::Uncommitted, RecordState::CommittedAdded)
                | (RecordState::Uncommitted, RecordState::CommittedRemoved)
                | (RecordState::CommittedAdded, RecordState::CommittedRemoved)
                | (RecordState::CommittedRemoved, RecordState::Reclaimed)
                | (RecordState::Reclaimed, RecordState::Uncommitted)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip() {
        for state in [
            RecordState::Uncommitted,
            RecordState::CommittedAdded,
            RecordState::CommittedRemoved,
            RecordState::Reclaimed,
        ] {
            assert_eq!(RecordState::from_code(state.code()).unwrap(), state);
        }
        assert!(RecordState::from_code(0x7777).is_err());
    }

    #[test]
    fn test_transitions() {
        assert!(RecordState::Uncommitted.can_become(RecordState::CommittedAdded));
        assert!(RecordState::Uncommitted.can_become(RecordState::CommittedRemoved));
        assert!(RecordState::CommittedAdded.can_become(RecordState::CommittedRemoved));
        assert!(!RecordState::CommittedAdded.can_become(RecordState::Reclaimed));
        assert!(!RecordState::CommittedRemoved.can_become(RecordState::CommittedAdded));
        assert!(RecordState::Reclaimed.can_become(RecordState::Uncommitted));
    }
}
