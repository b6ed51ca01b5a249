use std::fmt;

use crate::error::{LockError, LockResult};

/// Canonical identity of a transaction lock: the sorted, deduplicated list
/// of participant identifiers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey {
    participants: Vec<String>,
}

impl LockKey {
    /// Build a key from participants in any order, with or without repeats.
    ///
    /// ```
    /// use coffer_lock::LockKey;
    ///
    /// let a = LockKey::new(["bob", "alice"]).unwrap();
    /// let b = LockKey::new(["alice", "bob", "alice"]).unwrap();
    /// assert_eq!(a, b);
    /// assert_eq!(a.to_string(), "alice:bob");
    /// ```
    pub fn new<I, S>(participants: I) -> LockResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut participants: Vec<String> = participants
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .collect();
        if participants.is_empty() {
            return Err(LockError::EmptyParticipants);
        }
        if participants.iter().any(|p| p.is_empty()) {
            return Err(LockError::EmptyParticipantId);
        }
        participants.sort();
        participants.dedup();
        Ok(Self { participants })
    }

    pub fn participants(&self) -> &[String] {
        &self.participants
    }

    /// Whether `participant` is part of this key.
    pub fn contains(&self, participant: &str) -> bool {
        self.participants
            .binary_search_by(|p| p.as_str().cmp(participant))
            .is_ok()
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.participants.join(":"))
    }
}
