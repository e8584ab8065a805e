//! Integer currency amounts
//!
//! Budgets and session prices are configured in dollars but every comparison
//! and counter in the engine runs on whole micro-dollars so that cache
//! increments stay exact.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

const MICROS_PER_USD: f64 = 1_000_000.0;

/// Amount of money in millionths of a US dollar.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MicroUsd(u64);

impl MicroUsd {
    /// Zero dollars
    pub const ZERO: Self = Self(0);

    /// Wrap a raw micro-dollar count
    pub const fn new(micros: u64) -> Self {
        Self(micros)
    }

    /// Convert a dollar amount, rounding to the nearest micro-dollar.
    ///
    /// Negative and non-finite inputs clamp to zero.
    pub fn from_usd(usd: f64) -> Self {
        if !usd.is_finite() || usd <= 0.0 {
            return Self::ZERO;
        }
        Self((usd * MICROS_PER_USD).round() as u64)
    }

    /// Raw micro-dollar count
    pub const fn micros(self) -> u64 {
        self.0
    }

    /// Dollar value, for display only
    pub fn as_usd(self) -> f64 {
        self.0 as f64 / MICROS_PER_USD
    }

    /// Add, clamping at `u64::MAX`
    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Subtract, clamping at zero
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Multiply by a whole count, clamping at `u64::MAX`
    pub fn saturating_mul(self, count: u64) -> Self {
        Self(self.0.saturating_mul(count))
    }

    /// How many whole `unit`s fit in this amount. Zero when `unit` is zero.
    pub fn whole_units_of(self, unit: Self) -> u64 {
        self.0.checked_div(unit.0).unwrap_or(0)
    }
}

impl Add for MicroUsd {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        self.saturating_add(other)
    }
}

impl Sub for MicroUsd {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        self.saturating_sub(other)
    }
}

impl fmt::Display for MicroUsd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.3}", self.as_usd())
    }
}
