//! # Memory Size
//!
//! A signed 64-bit byte count with decimal (KB/MB/GB, ×1000) and binary
//! (KiB/MiB/GiB, ×1024) units.
//!
//! Arithmetic is unclamped: `5_i64.kb() - 8_i64.kb()` is a negative
//! size. Heaps only accept sizes through [`MemorySize::to_usize`], which
//! rejects negative values, so an underflow is caught at the first heap it
//! reaches instead of silently wrapping.
//!
//! ```rust,ignore
//! use stratum_memory::{MemorySize, SizeLiteral};
//!
//! assert_eq!(1_i64.mb().size_in_kb(), 1000);
//! assert_eq!(1_i64.mib().size_in_kib(), 1024);
//! assert_eq!((5_i64.kb() - 2_i64.kb()).size_in_bytes(), 3000);
//! ```

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

use crate::error::{MemoryError, MemoryResult};

const KB: i64 = 1000;
const MB: i64 = KB * 1000;
const GB: i64 = MB * 1000;
const KIB: i64 = 1024;
const MIB: i64 = KIB * 1024;
const GIB: i64 = MIB * 1024;

/// An immutable byte count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemorySize(i64);

impl MemorySize {
    /// Zero bytes.
    pub const ZERO: Self = Self(0);

    /// Creates a size from a raw byte count.
    #[inline]
    #[must_use]
    pub const fn bytes(bytes: i64) -> Self {
        Self(bytes)
    }

    /// Creates a size of `kb` decimal kilobytes.
    #[inline]
    #[must_use]
    pub const fn kilobytes(kb: i64) -> Self {
        Self(kb * KB)
    }

    /// Creates a size of `mb` decimal megabytes.
    #[inline]
    #[must_use]
    pub const fn megabytes(mb: i64) -> Self {
        Self(mb * MB)
    }

    /// Creates a size of `gb` decimal gigabytes.
    #[inline]
    #[must_use]
    pub const fn gigabytes(gb: i64) -> Self {
        Self(gb * GB)
    }

    /// Creates a size of `kib` kibibytes.
    #[inline]
    #[must_use]
    pub const fn kibibytes(kib: i64) -> Self {
        Self(kib * KIB)
    }

    /// Creates a size of `mib` mebibytes.
    #[inline]
    #[must_use]
    pub const fn mebibytes(mib: i64) -> Self {
        Self(mib * MIB)
    }

    /// Creates a size of `gib` gibibytes.
    #[inline]
    #[must_use]
    pub const fn gibibytes(gib: i64) -> Self {
        Self(gib * GIB)
    }

    /// Creates a size from an in-memory length.
    #[inline]
    #[must_use]
    pub const fn from_usize(bytes: usize) -> Self {
        Self(bytes as i64)
    }

    /// Returns the raw byte count.
    #[inline]
    #[must_use]
    pub const fn size_in_bytes(self) -> i64 {
        self.0
    }

    /// Whole decimal kilobytes.
    #[inline]
    #[must_use]
    pub const fn size_in_kb(self) -> i64 {
        self.0 / KB
    }

    /// Whole decimal megabytes.
    #[inline]
    #[must_use]
    pub const fn size_in_mb(self) -> i64 {
        self.0 / MB
    }

    /// Whole decimal gigabytes.
    #[inline]
    #[must_use]
    pub const fn size_in_gb(self) -> i64 {
        self.0 / GB
    }

    /// Whole kibibytes.
    #[inline]
    #[must_use]
    pub const fn size_in_kib(self) -> i64 {
        self.0 / KIB
    }

    /// Whole mebibytes.
    #[inline]
    #[must_use]
    pub const fn size_in_mib(self) -> i64 {
        self.0 / MIB
    }

    /// Whole gibibytes.
    #[inline]
    #[must_use]
    pub const fn size_in_gib(self) -> i64 {
        self.0 / GIB
    }

    /// Returns true for sizes below zero (an underflowed subtraction).
    #[inline]
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Subtraction that returns `None` instead of going below zero.
    #[inline]
    #[must_use]
    pub const fn checked_sub(self, rhs: Self) -> Option<Self> {
        if rhs.0 > self.0 {
            None
        } else {
            Some(Self(self.0 - rhs.0))
        }
    }

    /// Subtraction clamped at zero.
    #[inline]
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        if rhs.0 > self.0 {
            Self::ZERO
        } else {
            Self(self.0 - rhs.0)
        }
    }

    /// Converts to an in-memory length.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NegativeSize`] for negative sizes and
    /// [`MemoryError::SizeOverflow`] when the count does not fit `usize`.
    pub fn to_usize(self) -> MemoryResult<usize> {
        if self.0 < 0 {
            return Err(MemoryError::NegativeSize(self.0));
        }
        usize::try_from(self.0).map_err(|_| MemoryError::SizeOverflow)
    }
}

impl Add for MemorySize {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for MemorySize {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for MemorySize {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for MemorySize {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Mul<i64> for MemorySize {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: i64) -> Self {
        Self(self.0 * rhs)
    }
}

impl Sum for MemorySize {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        let magnitude = bytes.unsigned_abs();
        if magnitude >= GIB as u64 {
            write!(f, "{:.2} GiB", bytes as f64 / GIB as f64)
        } else if magnitude >= MIB as u64 {
            write!(f, "{:.2} MiB", bytes as f64 / MIB as f64)
        } else if magnitude >= KIB as u64 {
            write!(f, "{:.2} KiB", bytes as f64 / KIB as f64)
        } else {
            write!(f, "{bytes} B")
        }
    }
}

/// Literal-style constructors on integers: `64_i64.kib()`, `2_i64.mb()`.
pub trait SizeLiteral {
    /// Raw bytes.
    fn bytes(self) -> MemorySize;
    /// Decimal kilobytes.
    fn kb(self) -> MemorySize;
    /// Decimal megabytes.
    fn mb(self) -> MemorySize;
    /// Decimal gigabytes.
    fn gb(self) -> MemorySize;
    /// Kibibytes.
    fn kib(self) -> MemorySize;
    /// Mebibytes.
    fn mib(self) -> MemorySize;
    /// Gibibytes.
    fn gib(self) -> MemorySize;
}

impl SizeLiteral for i64 {
    fn bytes(self) -> MemorySize {
        MemorySize::bytes(self)
    }
    fn kb(self) -> MemorySize {
        MemorySize::kilobytes(self)
    }
    fn mb(self) -> MemorySize {
        MemorySize::megabytes(self)
    }
    fn gb(self) -> MemorySize {
        MemorySize::gigabytes(self)
    }
    fn kib(self) -> MemorySize {
        MemorySize::kibibytes(self)
    }
    fn mib(self) -> MemorySize {
        MemorySize::mebibytes(self)
    }
    fn gib(self) -> MemorySize {
        MemorySize::gibibytes(self)
    }
}
