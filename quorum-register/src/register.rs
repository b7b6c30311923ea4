//! Replica-side storage slot.
//!
//! Each replica owns exactly one [`Register`]. Quorum clients read it and
//! write to it through the replica service; nothing else touches it.

use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Opaque register payload. Conflict resolution never looks inside it.
pub type Value = Vec<u8>;

/// Logical write version. Zero means "never written".
pub type Timestamp = u64;

/// A payload tagged with the timestamp of the write that produced it.
///
/// Versioned values are ordered by timestamp alone: two values carrying the
/// same timestamp are treated as the same write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedValue {
    pub value: Option<Value>,
    pub timestamp: Timestamp,
}

impl VersionedValue {
    pub fn new(value: impl Into<Value>, timestamp: Timestamp) -> Self {
        Self {
            value: Some(value.into()),
            timestamp,
        }
    }
}

/// Thread-safe `(value, timestamp)` slot with a last-writer-wins rule.
///
/// Reads share the lock; writes take it exclusively. Every critical section
/// is a single clone or assignment.
#[derive(Debug, Default)]
pub struct Register {
    slot: RwLock<VersionedValue>,
}

impl Register {
    /// Creates a register holding `(nil, 0)`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the current value and timestamp.
    pub fn read(&self) -> VersionedValue {
        // A poisoned lock still guards a whole value: assignments never tear.
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Installs `incoming` only if its timestamp is newer than the stored one.
    ///
    /// Older or equal timestamps are ignored, so the first value to arrive at
    /// a timestamp is kept and replaying a write changes nothing. Returns
    /// whether the slot changed.
    pub fn write(&self, incoming: VersionedValue) -> bool {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if incoming.timestamp > slot.timestamp {
            *slot = incoming;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty_at_zero() {
        let register = Register::new();
        assert_eq!(register.read(), VersionedValue { value: None, timestamp: 0 });
    }

    #[test]
    fn newer_timestamp_replaces_value() {
        let register = Register::new();
        assert!(register.write(VersionedValue::new("a", 1)));
        assert!(register.write(VersionedValue::new("b", 2)));
        assert_eq!(register.read(), VersionedValue::new("b", 2));
    }

    #[test]
    fn write_is_idempotent() {
        let once = Register::new();
        once.write(VersionedValue::new("x", 3));

        let twice = Register::new();
        twice.write(VersionedValue::new("x", 3));
        assert!(!twice.write(VersionedValue::new("x", 3)));

        assert_eq!(once.read(), twice.read());
    }

    #[test]
    fn older_timestamp_is_ignored() {
        let register = Register::new();
        register.write(VersionedValue::new("new", 7));
        assert!(!register.write(VersionedValue::new("old", 4)));
        assert_eq!(register.read(), VersionedValue::new("new", 7));
    }

    #[test]
    fn first_value_at_a_timestamp_wins() {
        let register = Register::new();
        register.write(VersionedValue::new("first", 5));
        assert!(!register.write(VersionedValue::new("second", 5)));
        assert_eq!(register.read().value.as_deref(), Some(&b"first"[..]));
    }

    #[test]
    fn concurrent_writers_keep_the_highest_timestamp() {
        let register = std::sync::Arc::new(Register::new());
        let handles: Vec<_> = (1..=16u64)
            .map(|ts| {
                let register = std::sync::Arc::clone(&register);
                std::thread::spawn(move || {
                    register.write(VersionedValue::new(ts.to_string(), ts));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(register.read(), VersionedValue::new("16", 16));
    }
}
