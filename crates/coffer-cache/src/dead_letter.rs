use std::time::SystemTime;

use coffer_store::DocumentName;
use serde::Serialize;
use serde_json::Value;

/// A dirty entry whose write-back has failed repeatedly.
///
/// Dead letters are an observability record: the entry itself stays dirty in
/// the cache and is still retried, but once it lands here the value it was
/// trying to persist is visible to operators even if the process dies.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeadLetter {
    pub namespace: String,
    pub document: DocumentName,
    pub key: String,
    pub value: Value,
    /// Consecutive failed attempts at the time of recording.
    pub attempts: u32,
    pub error: String,
    pub recorded_at: SystemTime,
}
