//! Hybrid Logical Clock
//!
//! A 64-bit timestamp: upper 48 bits are physical wall time in
//! milliseconds since the Unix epoch, lower 16 bits are a logical
//! counter. Unsigned comparison gives a strict total order that stays
//! close to real time. One clock instance per gateway session is the
//! single mutator; all timestamps it returns are strictly monotonic.

use crate::constants::MAX_DRIFT_MS;
use crate::types::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of bits reserved for the logical counter.
const COUNTER_BITS: u32 = 16;

/// Mask selecting the logical counter out of an encoded timestamp.
const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;

/// Largest wall value representable in 48 bits.
pub const MAX_WALL_MS: u64 = (1 << 48) - 1;

/// Largest counter value representable in 16 bits.
pub const MAX_COUNTER: u16 = u16::MAX;

/// An encoded hybrid logical timestamp.
///
/// Ordering is plain unsigned comparison of the packed value. On
/// human-readable formats (JSON) the timestamp serialises as a decimal
/// string so 64-bit precision survives transports without big-integer
/// support; binary formats carry the raw `u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hlc(u64);

impl Hlc {
    /// The zero timestamp, earlier than every real observation.
    pub const ZERO: Hlc = Hlc(0);

    /// Pack a wall-millisecond value and a counter into a timestamp.
    pub fn encode(wall_ms: u64, counter: u16) -> Hlc {
        Hlc(((wall_ms & MAX_WALL_MS) << COUNTER_BITS) | counter as u64)
    }

    /// Unpack into `(wall_ms, counter)`.
    pub fn decode(self) -> (u64, u16) {
        (self.0 >> COUNTER_BITS, (self.0 & COUNTER_MASK) as u16)
    }

    /// Physical component in milliseconds since the Unix epoch.
    pub fn wall_ms(self) -> u64 {
        self.0 >> COUNTER_BITS
    }

    /// Logical counter component.
    pub fn counter(self) -> u16 {
        (self.0 & COUNTER_MASK) as u16
    }

    /// Raw packed representation.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Build from a raw packed representation.
    pub fn from_u64(raw: u64) -> Hlc {
        Hlc(raw)
    }
}

impl fmt::Display for Hlc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Hlc {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u64>()
            .map(Hlc)
            .map_err(|_| Error::validation(format!("invalid HLC value: {s:?}")))
    }
}

impl Serialize for Hlc {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.0.to_string())
        } else {
            serializer.serialize_u64(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Hlc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        use serde::de::Error as DeError;
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse::<u64>()
                .map(Hlc)
                .map_err(|_| DeError::custom(format!("invalid HLC string: {s:?}")))
        } else {
            u64::deserialize(deserializer).map(Hlc)
        }
    }
}

/// Mutable clock state guarded by the instance mutex.
#[derive(Debug, Clone, Copy)]
struct ClockState {
    wall: u64,
    counter: u16,
}

/// A hybrid logical clock instance.
///
/// `now` stamps local events; `recv` folds a remote timestamp in while
/// enforcing the drift bound. Both hold the internal lock only for the
/// few instructions of the update.
pub struct HlcClock {
    state: Mutex<ClockState>,
}

impl HlcClock {
    /// Create a clock starting at the zero state.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClockState { wall: 0, counter: 0 }),
        }
    }

    /// Current physical time in milliseconds since the Unix epoch.
    fn physical_now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Stamp a local event.
    pub fn now(&self) -> Hlc {
        self.now_at(Self::physical_now())
    }

    /// Fold in a remote timestamp, failing on excessive forward drift.
    pub fn recv(&self, remote: Hlc) -> Result<Hlc> {
        self.recv_at(remote, Self::physical_now())
    }

    /// `now` against an explicit physical reading. Exposed for
    /// deterministic tests; production callers use [`HlcClock::now`].
    pub fn now_at(&self, physical_ms: u64) -> Hlc {
        let mut state = self.state.lock();
        let wall = physical_ms.max(state.wall);
        if wall == state.wall {
            if state.counter == MAX_COUNTER {
                state.wall = wall + 1;
                state.counter = 0;
            } else {
                state.counter += 1;
            }
        } else {
            state.wall = wall;
            state.counter = 0;
        }
        Hlc::encode(state.wall, state.counter)
    }

    /// `recv` against an explicit physical reading. Exposed for
    /// deterministic tests; production callers use [`HlcClock::recv`].
    pub fn recv_at(&self, remote: Hlc, physical_ms: u64) -> Result<Hlc> {
        let (remote_wall, remote_counter) = remote.decode();
        if remote_wall.saturating_sub(physical_ms) > MAX_DRIFT_MS {
            return Err(Error::clock_drift(format!(
                "remote wall {}ms ahead of local clock (max {}ms)",
                remote_wall - physical_ms,
                MAX_DRIFT_MS
            )));
        }

        let mut state = self.state.lock();
        let wall = physical_ms.max(state.wall);
        if remote_wall > wall {
            state.wall = remote_wall;
            let next = bump(remote_counter, &mut state.wall);
            state.counter = next;
        } else if remote_wall == wall {
            state.wall = wall;
            let base = state.counter.max(remote_counter);
            let next = bump(base, &mut state.wall);
            state.counter = next;
        } else {
            let prev = state.counter;
            state.wall = wall;
            let next = bump(prev, &mut state.wall);
            state.counter = next;
        }
        Ok(Hlc::encode(state.wall, state.counter))
    }

}

impl Default for HlcClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Increment a counter, spilling into the wall on overflow.
fn bump(counter: u16, wall: &mut u64) -> u16 {
    if counter == MAX_COUNTER {
        *wall += 1;
        0
    } else {
        counter + 1
    }
}
