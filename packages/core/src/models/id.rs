//! Node Id Generation
//!
//! Snowflake-style 64-bit ids: millisecond timestamp in the high bits, a
//! per-millisecond sequence in the low 16. Ids are roughly monotonic, which
//! keeps the `id` primary key append-friendly. Callers that already own an id
//! space can bypass this entirely by supplying ids on their drafts.

use chrono::Utc;
use std::sync::Mutex;

const SEQUENCE_BITS: u64 = 16;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Generates unique, roughly monotonic 64-bit node ids.
///
/// Thread-safe; clone-free sharing via `Arc` is expected.
#[derive(Debug)]
pub struct NodeIdGenerator {
    state: Mutex<GeneratorState>,
}

#[derive(Debug)]
struct GeneratorState {
    last_millis: u64,
    sequence: u64,
}

impl NodeIdGenerator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GeneratorState {
                last_millis: 0,
                sequence: 0,
            }),
        }
    }

    /// Next unique id. Never returns 0.
    pub fn next_id(&self) -> u64 {
        let now = Utc::now().timestamp_millis() as u64;
        let mut state = self.state.lock().expect("id generator lock poisoned");

        if now > state.last_millis {
            state.last_millis = now;
            state.sequence = 0;
        } else {
            state.sequence += 1;
            if state.sequence > SEQUENCE_MASK {
                // Sequence exhausted within one millisecond: borrow from the
                // next tick rather than spinning.
                state.last_millis += 1;
                state.sequence = 0;
            }
        }

        (state.last_millis << SEQUENCE_BITS) | state.sequence
    }
}

impl Default for NodeIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
