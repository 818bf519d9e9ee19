// SPDX-License-Identifier: GPL-2.0-or-later

//! Time types. `PgsTick`/`PgsDuration` give the PGS 90 kHz clock (§4.D) the
//! same treatment the originating codebase gives its H.264 90 kHz clock:
//! a newtype over `i64` ticks plus a `nano_to_timescale` conversion helper,
//! rather than a bare integer threaded through every signature.

use std::ops::Deref;

pub const NANOSECOND: i64 = 1;
pub const MICROSECOND: i64 = NANOSECOND * 1000;
pub const MILLISECOND: i64 = MICROSECOND * 1000;
pub const SECOND: i64 = MILLISECOND * 1000;

/// Ticks per second of the PGS presentation-time clock (§4.D: "PTS ticks at
/// 90 kHz").
pub const PGS_TIMESCALE: u32 = 90_000;

/// A PGS presentation timestamp, in 90 kHz ticks.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct PgsTick(i64);

impl PgsTick {
    #[must_use]
    pub const fn new(ticks: i64) -> Self {
        Self(ticks)
    }

    #[must_use]
    pub fn from_secs_f64(secs: f64) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        Self((secs * f64::from(PGS_TIMESCALE)) as i64)
    }

    #[must_use]
    pub fn checked_add(&self, rhs: PgsDuration) -> Option<Self> {
        Some(Self(self.0.checked_add(rhs.0)?))
    }

    #[must_use]
    pub fn checked_sub(&self, other: Self) -> Option<PgsDuration> {
        Some(PgsDuration(self.0.checked_sub(other.0)?))
    }

    #[must_use]
    pub fn as_nanos(&self) -> i64 {
        timescale_to_nano(self.0, i64::from(PGS_TIMESCALE))
    }
}

impl From<u32> for PgsTick {
    fn from(v: u32) -> Self {
        Self(i64::from(v))
    }
}

impl Deref for PgsTick {
    type Target = i64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A duration expressed in PGS 90 kHz ticks.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct PgsDuration(i64);

impl PgsDuration {
    #[must_use]
    pub const fn new(ticks: i64) -> Self {
        Self(ticks)
    }

    #[must_use]
    pub fn from_secs(secs: u32) -> Self {
        Self(i64::from(secs) * i64::from(PGS_TIMESCALE))
    }
}

impl Deref for PgsDuration {
    type Target = i64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Converts a nanosecond value into a different timescale (ticks/sec).
#[must_use]
pub fn nano_to_timescale(value: i64, timescale: i64) -> i64 {
    let secs = value / SECOND;
    let dec = value % SECOND;
    (secs * timescale) + (dec * timescale / SECOND)
}

/// Converts a value in the given timescale (ticks/sec) into nanoseconds.
#[must_use]
pub fn timescale_to_nano(value: i64, timescale: i64) -> i64 {
    if timescale == 0 {
        return 0;
    }
    let secs = value / timescale;
    let dec = value % timescale;
    (secs * SECOND) + ((dec * SECOND) / timescale)
}
