//! Time-ordered 64-bit request identifiers.
//!
//! Layout:
//! ```text
//! ┌───────────────────────────┬──────────────┬─────────────┐
//! │ unix millis               │ machine id   │ sequence    │
//! │ bits 22..64               │ bits 12..22  │ bits 0..12  │
//! └───────────────────────────┴──────────────┴─────────────┘
//! ```
//!
//! Ids from one generator are strictly increasing. Because the timestamp sits in
//! the high bits, "older than T" is a plain integer comparison against
//! [`id_floor`]`(T)`, which is how the pending-call sweeper finds expired calls.
//!
//! Two generators with the same machine id produce the same first id when they
//! start in the same millisecond. Nodes that leave the machine id unset get one
//! from [`auto_machine_id`].

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Bit offset of the millisecond timestamp.
pub const TIMESTAMP_SHIFT: u32 = 22;

/// Bit offset of the machine id.
pub const MACHINE_SHIFT: u32 = 12;

/// Largest valid machine id.
pub const MAX_MACHINE_ID: u16 = 0x3FF;

/// Largest sequence number within one millisecond.
pub const MAX_SEQUENCE: u64 = 0xFFF;

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Machine id for a node that was not given one.
///
/// Starts at a random id and steps by one per call, so nodes in one process
/// get distinct ids until all 1024 are taken.
pub fn auto_machine_id() -> u16 {
    static NEXT: OnceLock<AtomicU16> = OnceLock::new();
    let next = NEXT.get_or_init(|| AtomicU16::new(rand::random::<u16>() & MAX_MACHINE_ID));
    next.fetch_add(1, Ordering::Relaxed) & MAX_MACHINE_ID
}

/// Millisecond timestamp embedded in an id.
#[inline]
pub fn timestamp_of(id: u64) -> u64 {
    id >> TIMESTAMP_SHIFT
}

/// Smallest id that could have been generated at `millis`.
#[inline]
pub fn id_floor(millis: u64) -> u64 {
    millis << TIMESTAMP_SHIFT
}

/// Snowflake-style id generator.
///
/// Not synchronized: one instance belongs to one scheduler thread. The
/// sequence-overflow wait spins without yielding, so no other task can observe
/// the generator mid-update.
#[derive(Debug)]
pub struct IdGenerator {
    machine_id: u64,
    sequence: u64,
    last_millis: u64,
    clock: fn() -> u64,
}

impl IdGenerator {
    /// Create a generator reading the system clock.
    ///
    /// `machine_id` is masked to 10 bits.
    pub fn new(machine_id: u16) -> Self {
        Self::with_clock(machine_id, now_millis)
    }

    /// Create a generator with a custom millisecond clock.
    pub fn with_clock(machine_id: u16, clock: fn() -> u64) -> Self {
        Self {
            machine_id: u64::from(machine_id & MAX_MACHINE_ID),
            sequence: 0,
            last_millis: 0,
            clock,
        }
    }

    /// Timestamp of the last id issued.
    pub fn last_millis(&self) -> u64 {
        self.last_millis
    }

    /// Machine id this generator embeds.
    pub fn machine_id(&self) -> u16 {
        self.machine_id as u16
    }

    /// Produce the next id.
    ///
    /// A clock that moves backwards is clamped to the last timestamp issued, so
    /// the output stays monotonic. Ids issued while clamped carry a timestamp
    /// ahead of the clock, by the rollback plus one millisecond per 4096 ids,
    /// and the sweeper expires them that much later. The lead shrinks as the
    /// clock catches up and is gone once it passes [`last_millis`](Self::last_millis).
    pub fn generate(&mut self) -> u64 {
        let mut millis = (self.clock)().max(self.last_millis);

        if millis == self.last_millis {
            self.sequence += 1;
            if self.sequence > MAX_SEQUENCE {
                millis = self.next_millis();
                self.sequence = 0;
            }
        } else {
            self.sequence = 0;
        }

        self.last_millis = millis;
        id_floor(millis) | (self.machine_id << MACHINE_SHIFT) | self.sequence
    }

    /// Wait for the clock to pass `last_millis`.
    ///
    /// While the clock is behind (rolled back), borrow the next millisecond
    /// instead of spinning for an unbounded time.
    fn next_millis(&self) -> u64 {
        loop {
            let now = (self.clock)();
            if now > self.last_millis {
                return now;
            }
            if now < self.last_millis {
                return self.last_millis + 1;
            }
            std::hint::spin_loop();
        }
    }
}
