//! Id Generator
#[cfg(any(feature = "testing", test))]
pub use increment::IncrementIdGenerator;

use ddtrace::{SpanId, TraceId};
use rand::{rngs, Rng, SeedableRng};
use std::cell::RefCell;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Interface for generating IDs
///
/// Implementations are shared by every thread using the tracer and must be
/// safe to call concurrently without external locking. Generated ids are
/// never zero.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Generate a new `TraceId`
    fn new_trace_id(&self) -> TraceId;

    /// Generate a new `SpanId`
    fn new_span_id(&self) -> SpanId;
}

/// Default [`IdGenerator`] implementation.
///
/// Generates ids from a per-thread random number generator seeded from the
/// operating system. When 128-bit trace ids are enabled, the upper 64 bits
/// hold the creation time in seconds followed by 32 zero bits, so backends can
/// tell when the trace started.
///
/// # Panics
///
/// Seeding panics if the operating system cannot provide entropy.
#[derive(Clone, Debug, Default)]
pub struct RandomIdGenerator {
    trace_id_128_bit: bool,
}

impl RandomIdGenerator {
    /// Creates a generator producing 64-bit trace ids.
    pub fn new() -> Self {
        RandomIdGenerator::default()
    }

    /// Creates a generator producing 128-bit trace ids.
    pub fn with_128_bit_trace_ids() -> Self {
        RandomIdGenerator {
            trace_id_128_bit: true,
        }
    }
}

impl IdGenerator for RandomIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        let low = next_non_zero();
        if self.trace_id_128_bit {
            let seconds = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            TraceId::from_parts((seconds & 0xffff_ffff) << 32, low)
        } else {
            TraceId::from(low as u128)
        }
    }

    fn new_span_id(&self) -> SpanId {
        SpanId::from(next_non_zero())
    }
}

fn next_non_zero() -> u64 {
    CURRENT_RNG.with(|rng| {
        let mut rng = rng.borrow_mut();
        loop {
            let value = rng.random::<u64>();
            if value != 0 {
                return value;
            }
        }
    })
}

thread_local! {
    /// Store random number generator for each thread
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_os_rng());
}

#[cfg(any(feature = "testing", test))]
mod increment {
    use crate::trace::IdGenerator;
    use ddtrace::{SpanId, TraceId};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// [`IdGenerator`] implementation that increments a counter for each new ID. This helps produce
    /// predictable IDs for testing.
    ///
    /// Trace ids and span ids come from separate counters, both starting at 1.
    #[derive(Clone, Debug)]
    pub struct IncrementIdGenerator {
        traces: Arc<AtomicU64>,
        spans: Arc<AtomicU64>,
    }

    impl IncrementIdGenerator {
        /// Create a new [`IncrementIdGenerator`]
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Default for IncrementIdGenerator {
        fn default() -> Self {
            IncrementIdGenerator {
                traces: Arc::new(AtomicU64::new(1)),
                spans: Arc::new(AtomicU64::new(1)),
            }
        }
    }

    impl IdGenerator for IncrementIdGenerator {
        fn new_trace_id(&self) -> TraceId {
            TraceId::from(self.traces.fetch_add(1, Ordering::SeqCst) as u128)
        }

        fn new_span_id(&self) -> SpanId {
            SpanId::from(self.spans.fetch_add(1, Ordering::SeqCst))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn random_ids_are_valid_and_distinct() {
        let generator = RandomIdGenerator::new();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let span_id = generator.new_span_id();
            assert!(span_id.is_valid());
            assert!(seen.insert(span_id));

            let trace_id = generator.new_trace_id();
            assert!(trace_id.is_valid());
            assert!(!trace_id.is_128_bit());
        }
    }

    #[test]
    fn trace_id_128_bit_carries_timestamp() {
        let before = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let trace_id = RandomIdGenerator::with_128_bit_trace_ids().new_trace_id();

        assert!(trace_id.is_128_bit());
        assert_eq!(trace_id.high() & 0xffff_ffff, 0);
        let seconds = trace_id.high() >> 32;
        assert!(seconds >= (before & 0xffff_ffff));
        assert!(seconds <= (before & 0xffff_ffff) + 5);
    }

    #[test]
    fn concurrent_generation() {
        let generator = Arc::new(RandomIdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = Arc::clone(&generator);
                thread::spawn(move || {
                    (0..1_000)
                        .map(|_| generator.new_span_id())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(id.is_valid());
                assert!(all.insert(id));
            }
        }
        assert_eq!(all.len(), 4_000);
    }

    #[test]
    fn increment_ids_are_predictable() {
        let generator = IncrementIdGenerator::new();
        assert_eq!(generator.new_trace_id(), TraceId::from(1u128));
        assert_eq!(generator.new_span_id(), SpanId::from(1));
        assert_eq!(generator.new_span_id(), SpanId::from(2));
        assert_eq!(generator.new_trace_id(), TraceId::from(2u128));
    }
}
