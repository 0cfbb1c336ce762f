use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use crate::error::{RagError, RagResult};

/// 2010-11-04T01:42:54.657Z, the customary Snowflake epoch.
pub const DEFAULT_EPOCH_MS: i64 = 1_288_834_974_657;
/// Instance id used when none is configured.
pub const DEFAULT_INSTANCE_ID: u16 = 42;

const INSTANCE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_INSTANCE_ID: u16 = (1 << INSTANCE_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Source of globally unique, roughly time-ordered integer ids.
pub trait IdGenerator: Send + Sync {
    /// Returns the next id. Never returns the same value twice.
    fn next_id(&self) -> u64;

    /// Returns `count` fresh ids in issue order.
    fn generate_batch(&self, count: usize) -> Vec<u64> {
        (0..count).map(|_| self.next_id()).collect()
    }
}

/// Components of a decoded Snowflake id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnowflakeParts {
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: i64,
    /// Instance that issued the id.
    pub instance_id: u16,
    /// Per-millisecond sequence number.
    pub sequence: u16,
}

impl SnowflakeParts {
    /// Issue time as a UTC datetime.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp_ms).single()
    }
}

struct SnowflakeState {
    last_ms: i64,
    sequence: u64,
}

/// Snowflake id generator: 41-bit millisecond timestamp, 10-bit instance id,
/// 12-bit sequence.
pub struct SnowflakeGenerator {
    instance_id: u16,
    epoch_ms: i64,
    state: Mutex<SnowflakeState>,
}

impl SnowflakeGenerator {
    /// Creates a generator for `instance_id` (0..=1023) with the default epoch.
    pub fn new(instance_id: u16) -> RagResult<Self> {
        Self::with_epoch(instance_id, DEFAULT_EPOCH_MS)
    }

    /// Creates a generator with a custom epoch in Unix milliseconds.
    pub fn with_epoch(instance_id: u16, epoch_ms: i64) -> RagResult<Self> {
        if instance_id > MAX_INSTANCE_ID {
            return Err(RagError::Config(format!(
                "snowflake instance id {instance_id} out of range 0..={MAX_INSTANCE_ID}"
            )));
        }
        if epoch_ms > Utc::now().timestamp_millis() {
            return Err(RagError::Config(
                "snowflake epoch lies in the future".to_string(),
            ));
        }
        Ok(Self {
            instance_id,
            epoch_ms,
            state: Mutex::new(SnowflakeState {
                last_ms: 0,
                sequence: 0,
            }),
        })
    }

    /// Instance id embedded in every issued id.
    pub fn instance_id(&self) -> u16 {
        self.instance_id
    }

    /// Decodes an id issued by a generator with the same epoch.
    pub fn parse(&self, id: u64) -> SnowflakeParts {
        let elapsed = (id >> (INSTANCE_BITS + SEQUENCE_BITS)) as i64;
        SnowflakeParts {
            timestamp_ms: elapsed + self.epoch_ms,
            instance_id: ((id >> SEQUENCE_BITS) & u64::from(MAX_INSTANCE_ID)) as u16,
            sequence: (id & SEQUENCE_MASK) as u16,
        }
    }

    fn elapsed_ms(&self) -> i64 {
        (Utc::now().timestamp_millis() - self.epoch_ms).max(0)
    }
}

impl Default for SnowflakeGenerator {
    fn default() -> Self {
        Self {
            instance_id: DEFAULT_INSTANCE_ID,
            epoch_ms: DEFAULT_EPOCH_MS,
            state: Mutex::new(SnowflakeState {
                last_ms: 0,
                sequence: 0,
            }),
        }
    }
}

impl SnowflakeGenerator {
    /// Issues the id for wall-clock reading `elapsed` (ms since the epoch).
    ///
    /// When the clock lags behind `last_ms`, or the sequence for the current
    /// millisecond runs out, the id is taken from `last_ms` or the millisecond
    /// after it instead of waiting for the clock, so the lock is never held
    /// across a wait.
    fn issue(&self, state: &mut SnowflakeState, elapsed: i64) -> u64 {
        if elapsed > state.last_ms {
            state.last_ms = elapsed;
            state.sequence = 0;
        } else {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                state.last_ms += 1;
            }
        }

        ((state.last_ms as u64) << (INSTANCE_BITS + SEQUENCE_BITS))
            | (u64::from(self.instance_id) << SEQUENCE_BITS)
            | state.sequence
    }
}

impl IdGenerator for SnowflakeGenerator {
    fn next_id(&self) -> u64 {
        let elapsed = self.elapsed_ms();
        let mut state = self.state.lock();
        self.issue(&mut state, elapsed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let gen = SnowflakeGenerator::default();
        let ids = gen.generate_batch(10_000);
        let unique: HashSet<u64> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len());
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_parse_roundtrip() {
        let gen = SnowflakeGenerator::new(7).unwrap();
        let before = Utc::now().timestamp_millis();
        let id = gen.next_id();
        let parts = gen.parse(id);
        assert_eq!(parts.instance_id, 7);
        assert!(parts.timestamp_ms >= before - 1);
        assert!(parts.datetime().is_some());
    }

    #[test]
    fn test_exhausted_sequence_moves_to_next_millisecond() {
        let gen = SnowflakeGenerator::default();
        let mut state = SnowflakeState {
            last_ms: 500,
            sequence: SEQUENCE_MASK,
        };

        let parts = gen.parse(gen.issue(&mut state, 500));
        assert_eq!(parts.timestamp_ms - DEFAULT_EPOCH_MS, 501);
        assert_eq!(parts.sequence, 0);

        // The clock has not caught up yet; keep counting on the claimed ms.
        let parts = gen.parse(gen.issue(&mut state, 500));
        assert_eq!(parts.timestamp_ms - DEFAULT_EPOCH_MS, 501);
        assert_eq!(parts.sequence, 1);

        let parts = gen.parse(gen.issue(&mut state, 502));
        assert_eq!(parts.timestamp_ms - DEFAULT_EPOCH_MS, 502);
        assert_eq!(parts.sequence, 0);
    }

    #[test]
    fn test_backwards_clock_keeps_ids_increasing() {
        let gen = SnowflakeGenerator::default();
        let mut state = SnowflakeState {
            last_ms: 0,
            sequence: 0,
        };
        let first = gen.issue(&mut state, 1_000);
        let second = gen.issue(&mut state, 400);
        assert!(second > first);
        assert_eq!(gen.parse(second).timestamp_ms - DEFAULT_EPOCH_MS, 1_000);
    }

    #[test]
    fn test_instance_id_out_of_range() {
        assert!(matches!(
            SnowflakeGenerator::new(1024),
            Err(RagError::Config(_))
        ));
    }

    #[test]
    fn test_concurrent_generation_has_no_duplicates() {
        let gen = Arc::new(SnowflakeGenerator::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gen = Arc::clone(&gen);
                std::thread::spawn(move || gen.generate_batch(2_000))
            })
            .collect();
        let mut all = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(all.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(all.len(), 8_000);
    }
}
