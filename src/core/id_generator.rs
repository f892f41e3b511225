// Vertex ID Generator - Snowflake-like IDs with embedded shard information
// 64-bit ID format: [timestamp:42][shard_id:10][sequence:12]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::models::VertexId;

const SEQUENCE_BITS: u64 = 12;
const SHARD_BITS: u64 = 10;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const TIMESTAMP_MASK: u64 = 0x3FF_FFFF_FFFF;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Graph stores use this to assign vertex ids on creation.
/// This allows for 1024 shards and 4096 IDs per millisecond per shard.
#[derive(Debug)]
pub struct VertexIdGenerator {
    shard_id: u16,
    /// Packed `[timestamp:52][sequence:12]` of the last issued id.
    state: AtomicU64,
}

impl VertexIdGenerator {
    /// Create new ID generator for given shard
    pub fn new(shard_id: u16) -> Self {
        assert!(shard_id < 1024, "Shard ID must be less than 1024");

        Self {
            shard_id,
            state: AtomicU64::new(0),
        }
    }

    /// Generate next unique ID with embedded shard information
    pub fn next_id(&self) -> VertexId {
        loop {
            let previous = self.state.load(Ordering::Acquire);
            let last_ts = previous >> SEQUENCE_BITS;
            let last_seq = previous & SEQUENCE_MASK;
            let now = now_millis().max(last_ts);

            let (timestamp, sequence) = if now == last_ts {
                if last_seq == SEQUENCE_MASK {
                    // Sequence exhausted for this millisecond, borrow the next one
                    (last_ts + 1, 0)
                } else {
                    (last_ts, last_seq + 1)
                }
            } else {
                (now, 0)
            };

            let next = (timestamp << SEQUENCE_BITS) | sequence;
            if self
                .state
                .compare_exchange(previous, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let id = ((timestamp & TIMESTAMP_MASK) << (SHARD_BITS + SEQUENCE_BITS))
                    | ((self.shard_id as u64) << SEQUENCE_BITS)
                    | sequence;
                return id as VertexId;
            }
        }
    }

    /// Extract shard ID from a vertex ID
    pub fn extract_shard_id(id: VertexId) -> u16 {
        ((id as u64) >> SEQUENCE_BITS & 0x3FF) as u16
    }
}
