//! Bit error counters
//!
//! A DUT reports counters either as a plain (compared, errored) pair or split
//! by polarity into ones and zeros. Counters from successive polls are deltas;
//! [`BerAccumulator`] folds them into a running total for the current
//! measurement session.
//!
//! All arithmetic saturates at `u64::MAX`. A wrapped counter would silently
//! turn hours of measurement into garbage, a pinned one is at least visible.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;
use uuid::Uuid;

use crate::protocol::ProtocolError;

/// Aggregate compared / errored bit counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimpleCounts {
    /// Bits compared against the expected pattern
    pub compared_bits: u64,
    /// Bits that did not match
    pub errored_bits: u64,
}

impl Add for SimpleCounts {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            compared_bits: self.compared_bits.saturating_add(rhs.compared_bits),
            errored_bits: self.errored_bits.saturating_add(rhs.errored_bits),
        }
    }
}

/// Counts split by the polarity of the expected bit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SplitCounts {
    /// Compared bits where a one was expected
    pub compared_ones: u64,
    /// Compared bits where a zero was expected
    pub compared_zeros: u64,
    /// Errored bits where a one was expected
    pub errored_ones: u64,
    /// Errored bits where a zero was expected
    pub errored_zeros: u64,
    /// Bits merged in from unsplit counters. They count towards the aggregate
    /// view only; no polarity is invented for them.
    #[serde(default)]
    pub unattributed: SimpleCounts,
}

impl Add for SplitCounts {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            compared_ones: self.compared_ones.saturating_add(rhs.compared_ones),
            compared_zeros: self.compared_zeros.saturating_add(rhs.compared_zeros),
            errored_ones: self.errored_ones.saturating_add(rhs.errored_ones),
            errored_zeros: self.errored_zeros.saturating_add(rhs.errored_zeros),
            unattributed: self.unattributed + rhs.unattributed,
        }
    }
}

/// Bit error counter in one of the two shapes a DUT can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum BitErrorCounter {
    /// Compared / errored pair
    Simple(SimpleCounts),
    /// Ones / zeros split
    Split(SplitCounts),
}

impl Default for BitErrorCounter {
    fn default() -> Self {
        Self::empty()
    }
}

impl BitErrorCounter {
    /// The zero counter: no data yet, or an invalid location was queried
    pub const fn empty() -> Self {
        Self::Simple(SimpleCounts {
            compared_bits: 0,
            errored_bits: 0,
        })
    }

    /// Simple-shape counter
    pub fn simple(compared_bits: u64, errored_bits: u64) -> Self {
        Self::Simple(SimpleCounts {
            compared_bits,
            errored_bits,
        })
    }

    /// Polarity-split counter
    pub fn split(compared_ones: u64, compared_zeros: u64, errored_ones: u64, errored_zeros: u64) -> Self {
        Self::Split(SplitCounts {
            compared_ones,
            compared_zeros,
            errored_ones,
            errored_zeros,
            unattributed: SimpleCounts::default(),
        })
    }

    /// Parse the payload of a `DUT_getBER` response.
    ///
    /// Two fields are `compared:errored`, four are
    /// `compared_ones:compared_zeros:errored_ones:errored_zeros`.
    pub fn from_params(params: &[String]) -> Result<Self, ProtocolError> {
        let values = params
            .iter()
            .map(|p| {
                p.trim().parse::<u64>().map_err(|e| {
                    ProtocolError::InvalidResponse(format!("counter value {:?}: {}", p, e))
                })
            })
            .collect::<Result<Vec<u64>, _>>()?;

        match values.as_slice() {
            [compared, errored] => Ok(Self::simple(*compared, *errored)),
            [c1, c0, e1, e0] => Ok(Self::split(*c1, *c0, *e1, *e0)),
            other => Err(ProtocolError::InvalidResponse(format!(
                "expected 2 or 4 counter values, got {}",
                other.len()
            ))),
        }
    }

    /// Total compared bits, whatever the shape
    pub fn compared_bits(&self) -> u64 {
        match self {
            Self::Simple(c) => c.compared_bits,
            Self::Split(s) => s
                .compared_ones
                .saturating_add(s.compared_zeros)
                .saturating_add(s.unattributed.compared_bits),
        }
    }

    /// Total errored bits, whatever the shape
    pub fn errored_bits(&self) -> u64 {
        match self {
            Self::Simple(c) => c.errored_bits,
            Self::Split(s) => s
                .errored_ones
                .saturating_add(s.errored_zeros)
                .saturating_add(s.unattributed.errored_bits),
        }
    }

    /// Errored / compared, `None` before any bit was compared
    pub fn error_ratio(&self) -> Option<f64> {
        match self.compared_bits() {
            0 => None,
            compared => Some(self.errored_bits() as f64 / compared as f64),
        }
    }

    /// Whether every field is zero
    pub fn is_zero(&self) -> bool {
        self.compared_bits() == 0 && self.errored_bits() == 0
    }

    /// Whether the counter carries a polarity split
    pub fn is_split(&self) -> bool {
        matches!(self, Self::Split(_))
    }

    /// View as a split counter. A simple counter keeps its bits in
    /// `unattributed` with zero ones/zeros.
    pub fn promote(self) -> SplitCounts {
        match self {
            Self::Split(s) => s,
            Self::Simple(c) => SplitCounts {
                unattributed: c,
                ..SplitCounts::default()
            },
        }
    }

    /// Saturating field-wise sum. Mixed shapes are promoted to split first.
    pub fn merge(self, delta: Self) -> Self {
        match (self, delta) {
            (Self::Simple(a), Self::Simple(b)) => Self::Simple(a + b),
            (a, b) => Self::Split(a.promote() + b.promote()),
        }
    }
}

impl Add for BitErrorCounter {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.merge(rhs)
    }
}

impl fmt::Display for BitErrorCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(c) => write!(f, "{} errors / {} bits", c.errored_bits, c.compared_bits),
            Self::Split(s) => write!(
                f,
                "{} errors / {} bits (ones {}/{}, zeros {}/{})",
                self.errored_bits(),
                self.compared_bits(),
                s.errored_ones,
                s.compared_ones,
                s.errored_zeros,
                s.compared_zeros
            ),
        }
    }
}

/// Saturating sum of `current` and `delta`
pub fn merge(current: BitErrorCounter, delta: BitErrorCounter) -> BitErrorCounter {
    current.merge(delta)
}

/// One poll: the delta the DUT reported and the running total after it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BerReading {
    /// Measurement session the reading belongs to
    pub session: Uuid,
    /// Location that was polled
    pub location: String,
    /// Counter reported by this poll
    pub delta: BitErrorCounter,
    /// Running total including this poll
    pub total: BitErrorCounter,
    /// When the reading was taken
    pub timestamp: DateTime<Utc>,
}

/// Running total for one measurement session
#[derive(Debug, Clone)]
pub struct BerAccumulator {
    session: Uuid,
    started: DateTime<Utc>,
    total: BitErrorCounter,
    polls: u64,
}

impl Default for BerAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl BerAccumulator {
    /// Start a new session at the zero counter
    pub fn new() -> Self {
        Self {
            session: Uuid::new_v4(),
            started: Utc::now(),
            total: BitErrorCounter::empty(),
            polls: 0,
        }
    }

    /// Fold `delta` into the total
    pub fn record(&mut self, location: &str, delta: BitErrorCounter) -> BerReading {
        self.total = self.total.merge(delta);
        self.polls += 1;
        BerReading {
            session: self.session,
            location: location.to_string(),
            delta,
            total: self.total,
            timestamp: Utc::now(),
        }
    }

    /// Start a new measurement session
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Running total
    pub fn total(&self) -> BitErrorCounter {
        self.total
    }

    /// Session id
    pub fn session(&self) -> Uuid {
        self.session
    }

    /// Session start time
    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }

    /// Number of deltas recorded this session
    pub fn polls(&self) -> u64 {
        self.polls
    }
}
