//! Filepath: src/key.rs
//!
//! Key abstraction for the tree.
//!
//! Keys are totally-ordered fixed-width unsigned integers. Because node
//! contents are read optimistically while a writer may be shifting entries,
//! every key slot is an atomic cell; this trait ties each key type to its
//! atomic counterpart so nodes can be generic over the key width.

use std::fmt;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};

/// A fixed-width unsigned integer key.
///
/// Implemented for `u16`, `u32` and `u64`. Implementations for other
/// unsigned widths only need an atomic cell of matching width.
pub trait Key: Copy + Ord + fmt::Debug + Send + Sync + 'static {
    /// Atomic cell capable of holding this key type.
    type Atomic: Send + Sync;

    /// The smallest key value. Initial `high_key` of empty nodes.
    const ZERO: Self;

    /// Create an atomic cell holding `value`.
    fn atomic_new(value: Self) -> Self::Atomic;

    /// Atomically load a key from `cell`.
    fn atomic_load(cell: &Self::Atomic, order: Ordering) -> Self;

    /// Atomically store `value` into `cell`.
    fn atomic_store(cell: &Self::Atomic, value: Self, order: Ordering);
}

macro_rules! impl_key {
    ($key:ty, $atomic:ty) => {
        impl Key for $key {
            type Atomic = $atomic;

            const ZERO: Self = 0;

            #[inline]
            fn atomic_new(value: Self) -> Self::Atomic {
                <$atomic>::new(value)
            }

            #[inline]
            fn atomic_load(cell: &Self::Atomic, order: Ordering) -> Self {
                cell.load(order)
            }

            #[inline]
            fn atomic_store(cell: &Self::Atomic, value: Self, order: Ordering) {
                cell.store(value, order);
            }
        }
    };
}

impl_key!(u16, AtomicU16);
impl_key!(u32, AtomicU32);
impl_key!(u64, AtomicU64);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordering::{READ_ORD, WRITE_ORD};

    fn roundtrip<K: Key>(value: K) {
        let cell: K::Atomic = K::atomic_new(K::ZERO);
        assert_eq!(K::atomic_load(&cell, READ_ORD), K::ZERO);

        K::atomic_store(&cell, value, WRITE_ORD);
        assert_eq!(K::atomic_load(&cell, READ_ORD), value);
    }

    #[test]
    fn test_atomic_roundtrip_all_widths() {
        roundtrip::<u16>(0xBEEF);
        roundtrip::<u32>(0xDEAD_BEEF);
        roundtrip::<u64>(0xDEAD_BEEF_CAFE_F00D);
    }

    #[test]
    fn test_zero_is_minimum() {
        assert_eq!(u16::ZERO, u16::MIN);
        assert_eq!(u32::ZERO, u32::MIN);
        assert_eq!(u64::ZERO, u64::MIN);
    }
}
