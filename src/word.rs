//! The flash word abstraction.
//!
//! A flash word is the native programmable unit of the target part: 4, 8,
//! or 16 bytes. The engine is generic over it so a single implementation
//! serves every supported geometry; callers pick the width by choosing
//! `u32`, `u64`, or `u128` as the `W` parameter of [`crate::store::Store`].

/// A flash word: the unit in which the flash driver reads, writes, and
/// compares.
///
/// Implemented for `u32` (4-byte word), `u64` (8-byte word), and `u128`
/// (16-byte word). Not meant to be implemented outside this crate; the bit
/// layout in [`crate::codec`] assumes these exact widths.
pub trait Word: Copy + Clone + PartialEq + Eq + core::fmt::Debug + Send + Sync + 'static {
    /// Width of this word, in bytes. One of 4, 8, 16.
    const BYTES: usize;

    /// The erased value of a word: all bits set.
    const MAX: Self;

    /// The all-zero value, used as the tombstone marker.
    const ZERO: Self;

    /// `Self::MAX - 1`: the last counter value before rollover. The counter
    /// never advances to `Self::MAX` itself, since that value is reserved
    /// to mean "erased, never written" (see [`crate::scan::SlotState::Free`]).
    const MAX_MINUS_ONE: Self;

    /// `0xDEADBEEF` repeated to fill the word.
    const SIGNATURE: Self;

    /// Construct a word from its little-endian byte representation.
    /// Only the first `Self::BYTES` entries of `bytes` are read.
    fn from_le_bytes(bytes: &[u8; 16]) -> Self;

    /// Write this word's little-endian byte representation into the first
    /// `Self::BYTES` entries of `out`; the rest are left untouched.
    fn write_le_bytes(self, out: &mut [u8; 16]);

    /// `self + 1`, saturating at `Self::MAX`. The rollover-to-zero rule at
    /// `Self::MAX - 1` is handled by the caller ([`crate::engine`]), not here.
    fn add_one_saturating(self) -> Self;

    /// Low bits as a `u64`, used for numeric value decode/encode (every
    /// supported numeric type is at most 64 bits wide).
    fn to_u64(self) -> u64;
    fn from_u64(value: u64) -> Self;
}

macro_rules! impl_word {
    ($ty:ty, $bytes:expr) => {
        impl Word for $ty {
            const BYTES: usize = $bytes;
            const MAX: Self = <$ty>::MAX;
            const ZERO: Self = 0;
            const MAX_MINUS_ONE: Self = <$ty>::MAX - 1;
            const SIGNATURE: Self = {
                // Repeat 0xDEADBEEF across the word width.
                let mut v: $ty = 0;
                let mut shift = 0usize;
                while shift < $bytes * 8 {
                    v |= (0xDEADBEEFu32 as $ty) << shift;
                    shift += 32;
                }
                v
            };

            fn from_le_bytes(bytes: &[u8; 16]) -> Self {
                let mut buf = [0u8; $bytes];
                buf.copy_from_slice(&bytes[..$bytes]);
                <$ty>::from_le_bytes(buf)
            }

            fn write_le_bytes(self, out: &mut [u8; 16]) {
                out[..$bytes].copy_from_slice(&self.to_le_bytes());
            }

            fn add_one_saturating(self) -> Self {
                self.saturating_add(1)
            }

            fn to_u64(self) -> u64 {
                self as u64
            }

            fn from_u64(value: u64) -> Self {
                value as $ty
            }
        }
    };
}

impl_word!(u32, 4);
impl_word!(u64, 8);
impl_word!(u128, 16);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_for_every_width() {
        assert_eq!(u32::SIGNATURE, 0xDEADBEEFu32);
        assert_eq!(u64::SIGNATURE, 0xDEADBEEF_DEADBEEFu64);
        assert_eq!(u128::SIGNATURE, 0xDEADBEEF_DEADBEEF_DEADBEEF_DEADBEEFu128);
    }

    #[test]
    fn byte_roundtrip() {
        let mut buf = [0u8; 16];
        let w: u32 = 0x1122_3344;
        w.write_le_bytes(&mut buf);
        assert_eq!(&buf[..4], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(u32::from_le_bytes(&buf), w);
    }

    #[test]
    fn max_and_zero() {
        assert_eq!(u32::MAX, 0xFFFF_FFFF);
        assert_eq!(u32::ZERO, 0);
        assert_eq!(u64::MAX, u64::MAX);
    }
}
