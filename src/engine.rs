//! The write protocol and sector-switch (compaction) algorithm.
//!
//! Every mutation funnels through here so the on-flash word ordering that
//! makes torn writes detectable is enforced in one place: the value word
//! always lands before the key word, and for a sector switch the new
//! sector's counter lands before its signature, which lands before the old
//! sector's signature is cleared.

use crate::codec;
use crate::error::Error;
use crate::flash::{FlashWords, Sector};
use crate::scan::{self, SlotState, ENTRY_WORDS};
use crate::word::Word;

/// `current + 1`, wrapping to `0` at `W::MAX_MINUS_ONE` rather than letting
/// the counter reach `W::MAX` (reserved for "erased, never written").
pub fn next_generation<W: Word>(current: W) -> W {
    if current == W::MAX_MINUS_ONE {
        W::ZERO
    } else {
        current.add_one_saturating()
    }
}

/// Append one entry at `index` in `sector`: value word, then key word.
/// `index` must name a `Free` slot; this is the caller's responsibility
/// (typically the first free index a prior scan found).
pub fn append_entry<W, F>(
    flash: &mut F,
    sector: Sector,
    index: usize,
    key_word: W,
    value_word: W,
) -> Result<(), F::Error>
where
    W: Word,
    F: FlashWords<W>,
{
    flash.write_word(sector, index + 1, value_word)?;
    flash.write_word(sector, index, key_word)?;
    Ok(())
}

/// Tombstone the entry at `index`: overwrite its key word with `W::ZERO`.
/// Legal from any slot state, since zero only ever clears bits.
pub fn tombstone<W, F>(flash: &mut F, sector: Sector, index: usize) -> Result<(), F::Error>
where
    W: Word,
    F: FlashWords<W>,
{
    flash.write_word(sector, index, W::ZERO)
}

/// Switch the active sector from `from` to `from.other()`, copying every
/// live entry across and optionally folding one pending write into the
/// copy so it never needs a second, separate append.
///
/// `pending`, if given, is `(key_word, value_word)` for an insert-or-
/// replace: if a live entry with the same key bytes is encountered during
/// the copy, `pending`'s value is written in its place; if no such entry
/// exists, `pending` is appended after every live entry has been copied.
///
/// Write order, matching the data model's crash-safety laws: every copied
/// entry's value word before its key word; the destination's counter word
/// before its signature word; the destination's signature before the
/// source's signature is cleared. A crash at any point during the copy
/// leaves the destination mid-formation (no valid signature yet) and the
/// source still fully valid, so the next boot's Pass A simply repeats the
/// switch from the same starting point.
///
/// Returns the new active sector and the word index of its first free slot.
pub fn switch_sector<W, F>(
    flash: &mut F,
    from: Sector,
    next_counter: W,
    pending: Option<(W, W)>,
) -> Result<(Sector, usize), Error<F::Error>>
where
    W: Word,
    F: FlashWords<W>,
{
    let to = from.other();
    let bounds = scan::scan_sector::<W, F>(flash, from)?;
    #[cfg(feature = "defmt")]
    defmt::debug!(
        "engine: sector switch triggered, {} live entries, new generation {}",
        bounds.stats.used,
        next_counter.to_u64()
    );
    flash.erase_sector(to)?;

    let mut dest_index = bounds.first_index;
    let mut pending_applied = pending.is_none();

    let mut index = bounds.first_index;
    while index <= bounds.last_index {
        let key_word = flash.read_word(from, index)?;
        if SlotState::classify::<W>(key_word) == SlotState::Used {
            let value_word = flash.read_word(from, index + 1)?;
            let (out_key, out_value) = match pending {
                Some((pk, pv)) if codec::key_bytes_eq::<W>(key_word, pk) => {
                    pending_applied = true;
                    (pk, pv)
                }
                _ => (key_word, value_word),
            };
            if dest_index > bounds.last_index {
                return Err(Error::OutOfSpace);
            }
            append_entry::<W, F>(flash, to, dest_index, out_key, out_value)?;
            dest_index += ENTRY_WORDS;
        }
        index += ENTRY_WORDS;
    }

    if let Some((pk, pv)) = pending {
        if !pending_applied {
            if dest_index > bounds.last_index {
                return Err(Error::OutOfSpace);
            }
            append_entry::<W, F>(flash, to, dest_index, pk, pv)?;
            dest_index += ENTRY_WORDS;
        }
    }

    flash.write_word(to, 1, next_counter)?;
    flash.write_word(to, 0, W::SIGNATURE)?;
    flash.write_word(from, 0, W::ZERO)?;

    Ok((to, dest_index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DataType;
    use crate::testing::MemoryFlash;

    fn formatted() -> MemoryFlash<u32> {
        let mut flash = MemoryFlash::new(64);
        flash.write_word(Sector::A, 1, 0).unwrap();
        flash.write_word(Sector::A, 0, u32::SIGNATURE).unwrap();
        flash
    }

    #[test]
    fn rollover_at_max_minus_one() {
        assert_eq!(next_generation(u32::MAX_MINUS_ONE), 0);
        assert_eq!(next_generation(0u32), 1);
    }

    #[test]
    fn switch_copies_live_entries_and_applies_pending() {
        let mut flash = formatted();
        let k1: u32 = codec::encode_key("c1", DataType::U8).unwrap();
        let k2: u32 = codec::encode_key("c2", DataType::U8).unwrap();
        append_entry(&mut flash, Sector::A, 2, k1, 10).unwrap();
        append_entry(&mut flash, Sector::A, 4, k2, 20).unwrap();

        let pending_value: u32 = 99;
        let (active, next_free) =
            switch_sector(&mut flash, Sector::A, 1, Some((k1, pending_value))).unwrap();

        assert_eq!(active, Sector::B);
        assert_eq!(flash.read_word(Sector::B, 0).unwrap(), u32::SIGNATURE);
        assert_eq!(flash.read_word(Sector::B, 1).unwrap(), 1);
        assert_eq!(flash.read_word(Sector::A, 0).unwrap(), 0);

        assert_eq!(flash.read_word(Sector::B, 2).unwrap(), k1);
        assert_eq!(flash.read_word(Sector::B, 3).unwrap(), pending_value);
        assert_eq!(flash.read_word(Sector::B, 4).unwrap(), k2);
        assert_eq!(flash.read_word(Sector::B, 5).unwrap(), 20);
        assert_eq!(next_free, 6);
    }

    #[test]
    fn switch_appends_pending_when_key_is_new() {
        let mut flash = formatted();
        let k1: u32 = codec::encode_key("c1", DataType::U8).unwrap();
        append_entry(&mut flash, Sector::A, 2, k1, 10).unwrap();

        let k2: u32 = codec::encode_key("c2", DataType::U8).unwrap();
        let (_, next_free) = switch_sector(&mut flash, Sector::A, 1, Some((k2, 42))).unwrap();

        assert_eq!(flash.read_word(Sector::B, 2).unwrap(), k1);
        assert_eq!(flash.read_word(Sector::B, 4).unwrap(), k2);
        assert_eq!(flash.read_word(Sector::B, 5).unwrap(), 42);
        assert_eq!(next_free, 6);
    }

    #[test]
    fn switch_drops_deleted_entries() {
        let mut flash = formatted();
        let k1: u32 = codec::encode_key("c1", DataType::U8).unwrap();
        append_entry(&mut flash, Sector::A, 2, k1, 10).unwrap();
        tombstone(&mut flash, Sector::A, 2).unwrap();

        let (_, next_free) = switch_sector::<u32, _>(&mut flash, Sector::A, 1, None).unwrap();
        assert_eq!(next_free, 2);
    }
}
