//! Crash recovery: sector selection (Pass A) and intra-sector scrubbing
//! (Pass B), run once at `init`/`format` before any other operation is
//! permitted.

use crate::codec;
use crate::flash::{FlashWords, Sector};
use crate::scan::{ScanResult, SlotState};
use crate::word::Word;

/// Pass A: decide which of the two sectors is active.
///
/// Reads only the two header words of each sector (signature, generation
/// counter), never the entry region. Returns the active sector and leaves
/// the loser, if any, with its signature word cleared (`Deleted`), so a
/// crash between this write and the caller's next step cannot resurrect it
/// on the following boot.
///
/// - Neither sector carries a valid signature: freshly erase `Sector::A`,
///   write counter `0`, then the signature, and select it. This is the
///   very first boot.
/// - Exactly one sector carries a valid signature: select it; the other is
///   presumed mid-switch-or-never-initialized and is left alone (erasing it
///   here would destroy the only copy of the data if this guess is wrong).
/// - Both carry a valid signature: the one with the higher generation
///   counter wins, with the wraparound special case (one counter at
///   `W::MAX_MINUS_ONE`, the other at `W::ZERO`) treating the zero side as
///   newer. Equal counters on two valid sectors cannot happen in correct
///   operation; this is treated as corruption and `Sector::A` wins
///   deterministically.
pub fn select_sector<W, F>(flash: &mut F) -> Result<Sector, F::Error>
where
    W: Word,
    F: FlashWords<W>,
{
    let sig_a = flash.read_word(Sector::A, 0)?;
    let sig_b = flash.read_word(Sector::B, 0)?;
    let valid_a = sig_a == W::SIGNATURE;
    let valid_b = sig_b == W::SIGNATURE;

    if !valid_a && !valid_b {
        #[cfg(feature = "defmt")]
        defmt::debug!("recovery: no valid signature in either sector, formatting A");
        flash.erase_sector(Sector::A)?;
        flash.write_word(Sector::A, 1, W::ZERO)?;
        flash.write_word(Sector::A, 0, W::SIGNATURE)?;
        return Ok(Sector::A);
    }
    if valid_a && !valid_b {
        #[cfg(feature = "defmt")]
        defmt::trace!("recovery: only A has a valid signature");
        return Ok(Sector::A);
    }
    if valid_b && !valid_a {
        #[cfg(feature = "defmt")]
        defmt::trace!("recovery: only B has a valid signature");
        return Ok(Sector::B);
    }

    let cnt_a = flash.read_word(Sector::A, 1)?;
    let cnt_b = flash.read_word(Sector::B, 1)?;
    match resolve_generation::<W>(cnt_a, cnt_b) {
        GenerationOutcome::BothCorrupt => {
            #[cfg(feature = "defmt")]
            defmt::debug!(
                "recovery: both sectors' counters are corrupt (MAX), reformatting A"
            );
            flash.erase_sector(Sector::A)?;
            flash.write_word(Sector::A, 1, W::ZERO)?;
            flash.write_word(Sector::A, 0, W::SIGNATURE)?;
            flash.write_word(Sector::B, 0, W::ZERO)?;
            Ok(Sector::A)
        }
        GenerationOutcome::Winner(winner) => {
            let loser = winner.other();
            #[cfg(feature = "defmt")]
            defmt::debug!(
                "recovery: both sectors signed, counters {}/{}, picked {}",
                cnt_a.to_u64(),
                cnt_b.to_u64(),
                if winner == Sector::A { "A" } else { "B" }
            );
            flash.write_word(loser, 0, W::ZERO)?;
            Ok(winner)
        }
    }
}

/// The result of comparing two signed sectors' generation counters.
enum GenerationOutcome {
    Winner(Sector),
    /// Both counters read `W::MAX`, which a valid counter can never reach
    /// (it is the erased value); neither sector can be trusted.
    BothCorrupt,
}

/// Which sector's generation counter is newer, accounting for wraparound and
/// for a counter stuck at `W::MAX` (a value no legitimate write ever
/// produces, since the erased word itself already reads `W::MAX`).
fn resolve_generation<W: Word>(cnt_a: W, cnt_b: W) -> GenerationOutcome {
    if cnt_a == W::MAX_MINUS_ONE && cnt_b == W::ZERO {
        #[cfg(feature = "defmt")]
        defmt::trace!("recovery: counter rollover, B is newer");
        return GenerationOutcome::Winner(Sector::B);
    }
    if cnt_b == W::MAX_MINUS_ONE && cnt_a == W::ZERO {
        #[cfg(feature = "defmt")]
        defmt::trace!("recovery: counter rollover, A is newer");
        return GenerationOutcome::Winner(Sector::A);
    }
    if cnt_a == W::MAX && cnt_b == W::MAX {
        return GenerationOutcome::BothCorrupt;
    }
    if cnt_a == W::MAX {
        #[cfg(feature = "defmt")]
        defmt::debug!("recovery: A's counter is corrupt (MAX), B wins");
        return GenerationOutcome::Winner(Sector::B);
    }
    if cnt_b == W::MAX {
        #[cfg(feature = "defmt")]
        defmt::debug!("recovery: B's counter is corrupt (MAX), A wins");
        return GenerationOutcome::Winner(Sector::A);
    }
    if cnt_b.to_u64() > cnt_a.to_u64() {
        GenerationOutcome::Winner(Sector::B)
    } else {
        GenerationOutcome::Winner(Sector::A)
    }
}

/// Pass B: scrub `sector`'s entry region in place, using the stats already
/// gathered by [`crate::scan::scan_sector`].
///
/// Two defects are corrected, both by tombstoning the offending slot (its
/// key word is overwritten with `W::ZERO`, which only clears bits and so is
/// always a legal NOR-flash write regardless of the slot's current state):
///
/// - A torn write: the key word reads `Free` but its paired value word does
///   not, meaning the value half of a new entry committed before the key
///   half did. The slot can never be legitimately reused as free space
///   (its value word is no longer all-ones), so it is retired instead.
/// - A duplicate key: two `Used` slots carry the same key bytes. The write
///   protocol always appends the replacement before invalidating the
///   original, so of any such pair the one at the lower index is the stale
///   one and is retired.
///
/// An `Invalid` slot (key word decodes to no known type) is also retired;
/// a sector that has been through this pass never contains one afterward.
pub fn scrub<W, F>(flash: &mut F, sector: Sector, scan: &ScanResult) -> Result<(), F::Error>
where
    W: Word,
    F: FlashWords<W>,
{
    let mut index = scan.first_index;
    while index <= scan.last_index {
        let key_word = flash.read_word(sector, index)?;
        match SlotState::classify::<W>(key_word) {
            SlotState::Free => {
                let value_word = flash.read_word(sector, index + 1)?;
                if value_word != W::MAX {
                    #[cfg(feature = "defmt")]
                    defmt::debug!("recovery: tombstoning torn write at word {}", index);
                    flash.write_word(sector, index, W::ZERO)?;
                }
            }
            SlotState::Used => {
                if is_superseded::<W, F>(flash, sector, key_word, index, scan.last_index)? {
                    #[cfg(feature = "defmt")]
                    defmt::debug!("recovery: tombstoning superseded duplicate at word {}", index);
                    flash.write_word(sector, index, W::ZERO)?;
                }
            }
            SlotState::Invalid => {
                #[cfg(feature = "defmt")]
                defmt::debug!("recovery: tombstoning invalid slot at word {}", index);
                flash.write_word(sector, index, W::ZERO)?;
            }
            SlotState::Deleted => {}
        }
        index += crate::scan::ENTRY_WORDS;
    }
    Ok(())
}

/// Does some later `Used` slot in `sector` carry the same key as `key_word`?
fn is_superseded<W, F>(
    flash: &mut F,
    sector: Sector,
    key_word: W,
    after_index: usize,
    last_index: usize,
) -> Result<bool, F::Error>
where
    W: Word,
    F: FlashWords<W>,
{
    let mut j = after_index + crate::scan::ENTRY_WORDS;
    while j <= last_index {
        let later_key = flash.read_word(sector, j)?;
        if SlotState::classify::<W>(later_key) == SlotState::Used
            && codec::key_bytes_eq::<W>(later_key, key_word)
        {
            return Ok(true);
        }
        j += crate::scan::ENTRY_WORDS;
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan;
    use crate::testing::MemoryFlash;

    fn fresh() -> MemoryFlash<u32> {
        MemoryFlash::new(64)
    }

    #[test]
    fn first_boot_selects_and_formats_a() {
        let mut flash = fresh();
        let sector = select_sector::<u32, _>(&mut flash).unwrap();
        assert_eq!(sector, Sector::A);
        assert_eq!(flash.read_word(Sector::A, 0).unwrap(), u32::SIGNATURE);
        assert_eq!(flash.read_word(Sector::A, 1).unwrap(), 0);
    }

    #[test]
    fn higher_counter_wins() {
        let mut flash = fresh();
        flash.write_word(Sector::A, 1, 0).unwrap();
        flash.write_word(Sector::A, 0, u32::SIGNATURE).unwrap();
        flash.write_word(Sector::B, 1, 5).unwrap();
        flash.write_word(Sector::B, 0, u32::SIGNATURE).unwrap();

        let sector = select_sector::<u32, _>(&mut flash).unwrap();
        assert_eq!(sector, Sector::B);
        assert_eq!(flash.read_word(Sector::A, 0).unwrap(), 0);
    }

    #[test]
    fn corrupt_counter_loses_to_a_valid_one() {
        let mut flash = fresh();
        flash.write_word(Sector::A, 1, u32::MAX).unwrap();
        flash.write_word(Sector::A, 0, u32::SIGNATURE).unwrap();
        flash.write_word(Sector::B, 1, 5).unwrap();
        flash.write_word(Sector::B, 0, u32::SIGNATURE).unwrap();

        let sector = select_sector::<u32, _>(&mut flash).unwrap();
        assert_eq!(sector, Sector::B);
        assert_eq!(flash.read_word(Sector::A, 0).unwrap(), 0);
    }

    #[test]
    fn both_counters_corrupt_reformats_a() {
        let mut flash = fresh();
        flash.write_word(Sector::A, 1, u32::MAX).unwrap();
        flash.write_word(Sector::A, 0, u32::SIGNATURE).unwrap();
        flash.write_word(Sector::B, 1, u32::MAX).unwrap();
        flash.write_word(Sector::B, 0, u32::SIGNATURE).unwrap();

        let sector = select_sector::<u32, _>(&mut flash).unwrap();
        assert_eq!(sector, Sector::A);
        assert_eq!(flash.read_word(Sector::A, 0).unwrap(), u32::SIGNATURE);
        assert_eq!(flash.read_word(Sector::A, 1).unwrap(), 0);
        assert_eq!(flash.read_word(Sector::B, 0).unwrap(), 0);
    }

    #[test]
    fn rollover_prefers_zero_over_max_minus_one() {
        let mut flash = fresh();
        flash.write_word(Sector::A, 1, u32::MAX_MINUS_ONE).unwrap();
        flash.write_word(Sector::A, 0, u32::SIGNATURE).unwrap();
        flash.write_word(Sector::B, 1, 0).unwrap();
        flash.write_word(Sector::B, 0, u32::SIGNATURE).unwrap();

        let sector = select_sector::<u32, _>(&mut flash).unwrap();
        assert_eq!(sector, Sector::B);
    }

    #[test]
    fn torn_write_is_tombstoned() {
        let mut flash = fresh();
        flash.erase_sector(Sector::A).unwrap();
        flash.write_word(Sector::A, 1, 0).unwrap();
        flash.write_word(Sector::A, 0, u32::SIGNATURE).unwrap();
        // Value half committed, key half never written.
        flash.write_word(Sector::A, 3, 0x1234).unwrap();

        let scan = scan::scan_sector::<u32, _>(&mut flash, Sector::A).unwrap();
        scrub::<u32, _>(&mut flash, Sector::A, &scan).unwrap();

        assert_eq!(flash.read_word(Sector::A, 2).unwrap(), 0);
    }

    #[test]
    fn duplicate_key_keeps_later_entry() {
        let mut flash = fresh();
        flash.erase_sector(Sector::A).unwrap();
        flash.write_word(Sector::A, 1, 0).unwrap();
        flash.write_word(Sector::A, 0, u32::SIGNATURE).unwrap();

        let key: u32 = codec::encode_key("c1", crate::record::DataType::U8).unwrap();
        flash.write_word(Sector::A, 3, 1).unwrap();
        flash.write_word(Sector::A, 2, key).unwrap();
        flash.write_word(Sector::A, 5, 2).unwrap();
        flash.write_word(Sector::A, 4, key).unwrap();

        let scan = scan::scan_sector::<u32, _>(&mut flash, Sector::A).unwrap();
        scrub::<u32, _>(&mut flash, Sector::A, &scan).unwrap();

        assert_eq!(flash.read_word(Sector::A, 2).unwrap(), 0);
        assert_eq!(flash.read_word(Sector::A, 4).unwrap(), key);
    }
}
