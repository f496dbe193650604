// Source - content-addressed, write-once poll result

use crate::domain::digest::sha256_hex;
use crate::domain::pollable::PollableRef;
use serde::{Deserialize, Serialize};

/// Content hash; doubles as the primary key of a source
pub type Fingerprint = String;

/// Meta data row of stored content. The bytes live in the blob store,
/// addressed by `fingerprint`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub fingerprint: Fingerprint,
    pub pollable: PollableRef,
    pub created_at: i64,
}

impl Source {
    /// Build the row for `content`, fingerprinting it
    pub fn for_content(pollable: PollableRef, content: &[u8], now_millis: i64) -> Self {
        Self {
            fingerprint: fingerprint(content),
            pollable,
            created_at: now_millis,
        }
    }
}

/// Deterministic digest over raw content
pub fn fingerprint(content: &[u8]) -> Fingerprint {
    sha256_hex(content)
}
