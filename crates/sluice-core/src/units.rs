//! Compile-time unit safety for hydraulic quantities.
//!
//! Prevents mixing incompatible units like water levels (m MSL) and flows
//! (m3/s), or rai and square meters, without runtime overhead: every wrapper
//! is `#[repr(transparent)]` over `f64`.
//!
//! Model structs carry these wrappers; solver internals extract raw `f64`
//! values into their own working structs at the boundary.
//!
//! ```
//! use sluice_core::units::{CubicMetersPerSecond, Meters};
//!
//! let head = Meters(221.0) - Meters(219.0);
//! let q = CubicMetersPerSecond(4.5) * 2.0;
//! // Meters + CubicMetersPerSecond does not compile.
//! ```

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Macro to implement common arithmetic operations for unit types
macro_rules! impl_unit_ops {
    ($type:ty, $unit_name:literal) => {
        impl Add for $type {
            type Output = Self;
            fn add(self, rhs: Self) -> Self::Output {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $type {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self::Output {
                Self(self.0 - rhs.0)
            }
        }

        impl Neg for $type {
            type Output = Self;
            fn neg(self) -> Self::Output {
                Self(-self.0)
            }
        }

        impl Mul<f64> for $type {
            type Output = Self;
            fn mul(self, rhs: f64) -> Self::Output {
                Self(self.0 * rhs)
            }
        }

        impl Mul<$type> for f64 {
            type Output = $type;
            fn mul(self, rhs: $type) -> Self::Output {
                <$type>::new(self * rhs.0)
            }
        }

        impl Div<f64> for $type {
            type Output = Self;
            fn div(self, rhs: f64) -> Self::Output {
                Self(self.0 / rhs)
            }
        }

        impl Div<$type> for $type {
            type Output = f64;
            fn div(self, rhs: $type) -> Self::Output {
                self.0 / rhs.0
            }
        }

        impl std::fmt::Display for $type {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:.3} {}", self.0, $unit_name)
            }
        }

        impl $type {
            /// Create a new value
            #[inline]
            pub const fn new(value: f64) -> Self {
                Self(value)
            }

            /// Get the raw numeric value
            #[inline]
            pub const fn value(self) -> f64 {
                self.0
            }

            /// Absolute value
            #[inline]
            pub fn abs(self) -> Self {
                Self(self.0.abs())
            }

            /// Clamp into `[lo, hi]`
            #[inline]
            pub fn clamp(self, lo: Self, hi: Self) -> Self {
                Self(self.0.clamp(lo.0, hi.0))
            }
        }
    };
}

/// Length / elevation / water level (meters, levels as m MSL)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Meters(pub f64);
impl_unit_ops!(Meters, "m");

/// Storage surface area (square meters)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct SquareMeters(pub f64);
impl_unit_ops!(SquareMeters, "m2");

/// Water volume (cubic meters)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct CubicMeters(pub f64);
impl_unit_ops!(CubicMeters, "m3");

/// Flow rate (cubic meters per second)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct CubicMetersPerSecond(pub f64);
impl_unit_ops!(CubicMetersPerSecond, "m3/s");

/// Travel distance (kilometers)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Kilometers(pub f64);
impl_unit_ops!(Kilometers, "km");

/// Cultivated area in rai (1 hectare = 6.25 rai)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Rai(pub f64);
impl_unit_ops!(Rai, "rai");

impl Rai {
    /// Convert to hectares.
    pub fn to_hectares(self) -> f64 {
        self.0 / 6.25
    }
}

impl CubicMeters {
    /// Volume delivered by `flow` over `seconds`.
    pub fn from_flow(flow: CubicMetersPerSecond, seconds: f64) -> Self {
        CubicMeters(flow.value() * seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic() {
        let head = Meters(221.0) - Meters(219.0);
        assert!((head.value() - 2.0).abs() < 1e-12);
        assert!((Meters(1.5) * 2.0).value() == 3.0);
        assert!((CubicMetersPerSecond(6.0) / CubicMetersPerSecond(3.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_clamp() {
        let level = Meters(12.0).clamp(Meters(0.1), Meters(5.0));
        assert_eq!(level, Meters(5.0));
    }

    #[test]
    fn test_rai_conversion() {
        assert!((Rai(6.25).to_hectares() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_volume_from_flow() {
        let v = CubicMeters::from_flow(CubicMetersPerSecond(2.0), 3600.0);
        assert!((v.value() - 7200.0).abs() < 1e-9);
    }
}
