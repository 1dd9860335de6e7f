//! Walking a sector: per-slot classification and aggregate statistics.

use crate::codec;
use crate::flash::{FlashWords, Sector};
use crate::word::Word;

/// The number of words in a header (signature + generation counter).
pub const HEADER_WORDS: usize = 2;
/// The number of words in one entry (key + value).
pub const ENTRY_WORDS: usize = 2;

/// Classification of a single key-word slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotState {
    /// A live record: the header byte has a recognized type nibble and a
    /// nonzero size.
    Used,
    /// Tombstoned: the entire key word is zero.
    Deleted,
    /// Erased, never written (or reclaimed by the last compaction): the
    /// entire key word is all-ones.
    Free,
    /// Anything else: a key word whose header byte does not decode to a
    /// known type. Recovery (§4.3) treats this as requiring a scrub; a
    /// quiescent, recovered sector never contains one.
    Invalid,
}

impl SlotState {
    /// Classify a key word per the data model's sentinel rules.
    pub fn classify<W: Word>(key_word: W) -> SlotState {
        if key_word == W::ZERO {
            SlotState::Deleted
        } else if key_word == W::MAX {
            SlotState::Free
        } else if codec::decode_key::<W>(key_word).is_some() {
            SlotState::Used
        } else {
            SlotState::Invalid
        }
    }
}

/// Aggregate counts over the entry region of one sector.
/// `used + deleted + free + invalid == total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SectorStats {
    pub total: usize,
    pub used: usize,
    pub deleted: usize,
    pub free: usize,
    pub invalid: usize,
}

/// The word-index bounds and statistics produced by a full sector scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanResult {
    pub first_index: usize,
    pub last_index: usize,
    /// Word index of the first `Free` slot, or `first_index` if none is
    /// free (an exhausted sector has no free index to speak of; callers
    /// compare against `stats.free == 0` rather than relying on this).
    pub first_free_index: usize,
    pub stats: SectorStats,
}

/// `first_index`/`last_index` (word units) for a sector of `sector_bytes`
/// bytes at word width `W`.
pub fn entry_bounds<W: Word>(sector_bytes: usize) -> (usize, usize) {
    let total_words = sector_bytes / W::BYTES;
    (HEADER_WORDS, total_words - HEADER_WORDS)
}

/// Walk every entry slot in `sector`, classifying it and accumulating
/// statistics. O(sector_size / W::BYTES). Performed at `init`, after a
/// sector switch, and after `format`.
pub fn scan_sector<W, F>(flash: &mut F, sector: Sector) -> Result<ScanResult, F::Error>
where
    W: Word,
    F: FlashWords<W>,
{
    let (first_index, last_index) = entry_bounds::<W>(flash.sector_size());
    let mut stats = SectorStats::default();
    let mut first_free_index = first_index;
    let mut seen_free = false;

    let mut index = first_index;
    while index <= last_index {
        let key_word = flash.read_word(sector, index)?;
        match SlotState::classify::<W>(key_word) {
            SlotState::Deleted => stats.deleted += 1,
            SlotState::Free => {
                stats.free += 1;
                if !seen_free {
                    first_free_index = index;
                    seen_free = true;
                }
            }
            SlotState::Used => stats.used += 1,
            SlotState::Invalid => stats.invalid += 1,
        }
        stats.total += 1;
        index += ENTRY_WORDS;
    }

    Ok(ScanResult {
        first_index,
        last_index,
        first_free_index,
        stats,
    })
}

/// The word index of the first `Used` slot in `sector`, in ascending
/// (write) order, or `None` if the sector holds no live entries.
pub fn first_used_index<W, F>(
    flash: &mut F,
    sector: Sector,
    first_index: usize,
    last_index: usize,
) -> Result<Option<usize>, F::Error>
where
    W: Word,
    F: FlashWords<W>,
{
    next_used_index::<W, F>(flash, sector, first_index.wrapping_sub(ENTRY_WORDS), last_index)
}

/// The word index of the first `Used` slot strictly after `after_index`, in
/// ascending order, or `None` if there is none. Used to walk the live
/// entries of a sector in logical order without holding an index list.
pub fn next_used_index<W, F>(
    flash: &mut F,
    sector: Sector,
    after_index: usize,
    last_index: usize,
) -> Result<Option<usize>, F::Error>
where
    W: Word,
    F: FlashWords<W>,
{
    let mut index = after_index.wrapping_add(ENTRY_WORDS);
    while index <= last_index {
        let key_word = flash.read_word(sector, index)?;
        if SlotState::classify::<W>(key_word) == SlotState::Used {
            return Ok(Some(index));
        }
        index += ENTRY_WORDS;
    }
    Ok(None)
}

/// Linear scan of `sector` for the first `Used` slot whose key bytes match
/// `key_word` (compared with [`codec::key_bytes_eq`], ignoring the header
/// byte). Ties are impossible once invariant 2 holds (recovery guarantees
/// this before any `write`/`read`/`delete` runs).
pub fn find_key<W, F>(
    flash: &mut F,
    sector: Sector,
    key_word: W,
    first_index: usize,
    last_index: usize,
) -> Result<Option<usize>, F::Error>
where
    W: Word,
    F: FlashWords<W>,
{
    let mut index = first_index;
    while index <= last_index {
        let candidate = flash.read_word(sector, index)?;
        if SlotState::classify::<W>(candidate) == SlotState::Used
            && codec::key_bytes_eq::<W>(candidate, key_word)
        {
            return Ok(Some(index));
        }
        index += ENTRY_WORDS;
    }
    Ok(None)
}
