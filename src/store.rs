//! The public key/value API: [`Store`].
//!
//! Every method takes `&mut self` and wraps its flash access in
//! [`critical_section::with`], so a `Store` shared behind a single global
//! (the usual embedded pattern: one flash part, one owner, accessed from
//! both thread and interrupt context) never races a write against a
//! concurrent read or another write.

use crate::codec;
use crate::engine;
use crate::error::Error;
use crate::flash::{FlashWords, Sector};
use crate::record::{DataType, Record, Value};
use crate::scan::{self, ScanResult};
use crate::word::Word;

struct State<W> {
    active: Sector,
    counter: W,
    scan: ScanResult,
}

/// A power-loss-safe key/value store over two flash sectors.
///
/// `W` is the flash word width (`u32`, `u64`, or `u128`); `F` is the flash
/// driver, anything implementing [`FlashWords<W>`]. Must be [`init`] or
/// [`format`]ed before any other method succeeds.
///
/// [`init`]: Store::init
/// [`format`]: Store::format
pub struct Store<W, F> {
    flash: F,
    state: Option<State<W>>,
}

impl<W, F> Store<W, F>
where
    W: Word,
    F: FlashWords<W>,
{
    /// Wrap a flash driver. Does not touch the flash; call [`init`](Self::init)
    /// or [`format`](Self::format) next.
    pub fn new(flash: F) -> Self {
        Store { flash, state: None }
    }

    /// Release the flash driver back to the caller.
    pub fn into_inner(self) -> F {
        self.flash
    }

    fn bounds(&self) -> (usize, usize) {
        scan::entry_bounds::<W>(self.flash.sector_size())
    }

    /// Validated without touching `entry_bounds` directly, since a sector
    /// too small even for one entry would make that function's internal
    /// subtraction underflow.
    fn check_geometry(&self) -> Result<(), Error<F::Error>> {
        let total_words = self.flash.sector_size() / W::BYTES;
        if total_words < scan::HEADER_WORDS + scan::ENTRY_WORDS {
            return Err(Error::InvalidGeometry);
        }
        if (total_words - scan::HEADER_WORDS) % scan::ENTRY_WORDS != 0 {
            return Err(Error::InvalidGeometry);
        }
        Ok(())
    }

    /// Run crash recovery: select the active sector (Pass A), scrub it
    /// (Pass B), then scan it fresh. Idempotent; always safe to call again
    /// (e.g. the board's startup sequence already called it once).
    pub fn init(&mut self) -> Result<(), Error<F::Error>> {
        self.check_geometry()?;
        let state = critical_section::with(|_| -> Result<State<W>, Error<F::Error>> {
            let active = crate::recovery::select_sector::<W, F>(&mut self.flash)?;
            let (first, last) = self.bounds();
            let pre_scrub = scan::scan_sector::<W, F>(&mut self.flash, active)?;
            crate::recovery::scrub::<W, F>(&mut self.flash, active, &pre_scrub)?;
            let scan = scan::scan_sector::<W, F>(&mut self.flash, active)?;
            debug_assert_eq!((scan.first_index, scan.last_index), (first, last));
            let counter = self.flash.read_word(active, 1)?;
            Ok(State { active, counter, scan })
        })?;
        self.state = Some(state);
        Ok(())
    }

    /// Unconditionally erase both sectors and start empty on `Sector::A`.
    /// Unlike [`init`](Self::init), this discards any existing data.
    pub fn format(&mut self) -> Result<(), Error<F::Error>> {
        self.check_geometry()?;
        let state = critical_section::with(|_| -> Result<State<W>, Error<F::Error>> {
            self.flash.erase_sector(Sector::A)?;
            self.flash.erase_sector(Sector::B)?;
            self.flash.write_word(Sector::A, 1, W::ZERO)?;
            self.flash.write_word(Sector::A, 0, W::SIGNATURE)?;
            let scan = scan::scan_sector::<W, F>(&mut self.flash, Sector::A)?;
            Ok(State {
                active: Sector::A,
                counter: W::ZERO,
                scan,
            })
        })?;
        self.state = Some(state);
        Ok(())
    }

    fn state(&self) -> Result<&State<W>, Error<F::Error>> {
        self.state.as_ref().ok_or(Error::NotStarted)
    }

    /// A search-only key word: the header bits never participate in
    /// matching ([`codec::key_bytes_eq`]), so any type that always fits
    /// (`U8` never needs a wide word) is safe to build it with.
    fn search_word(key: &str) -> Option<W> {
        codec::encode_key::<W>(key, DataType::U8)
    }

    /// Store `value` under `key`, replacing any existing value for that
    /// key. If the active sector has no free slot, triggers a sector
    /// switch that folds this write into the compaction so it never costs
    /// more than one extra erase.
    pub fn write(&mut self, key: &str, value: Value) -> Result<(), Error<F::Error>> {
        self.state()?;
        let ty = value.data_type();
        if let Value::Str(s) = &value {
            if s.as_bytes().len() > ty.value_size(W::BYTES) {
                return Err(Error::InvalidArgument);
            }
        }
        let key_word = codec::encode_key::<W>(key, ty).ok_or(Error::InvalidArgument)?;
        let value_word = codec::value_to_word::<W>(&value);

        let result = critical_section::with(|_| -> Result<(), Error<F::Error>> {
            let st = self.state.as_ref().ok_or(Error::NotStarted)?;
            let active = st.active;
            let scan = st.scan;
            let counter = st.counter;
            let existing =
                scan::find_key::<W, F>(&mut self.flash, active, key_word, scan.first_index, scan.last_index)?;

            if let Some(old_index) = existing {
                let stored_value = self.flash.read_word(active, old_index + 1)?;
                if stored_value == value_word {
                    return Ok(());
                }
            }

            if scan.stats.free == 0 {
                let next_counter = engine::next_generation(counter);
                let (new_active, _next_free) =
                    engine::switch_sector::<W, F>(&mut self.flash, active, next_counter, Some((key_word, value_word)))?;
                let new_scan = scan::scan_sector::<W, F>(&mut self.flash, new_active)?;
                self.state = Some(State {
                    active: new_active,
                    counter: next_counter,
                    scan: new_scan,
                });
                return Ok(());
            }

            let write_index = scan.first_free_index;
            engine::append_entry::<W, F>(&mut self.flash, active, write_index, key_word, value_word)?;
            let mut new_stats = scan.stats;
            new_stats.free -= 1;
            new_stats.used += 1;
            if let Some(old_index) = existing {
                engine::tombstone::<W, F>(&mut self.flash, active, old_index)?;
                new_stats.used -= 1;
                new_stats.deleted += 1;
            }
            let next_free_index = write_index + scan::ENTRY_WORDS;
            self.state = Some(State {
                active,
                counter,
                scan: ScanResult {
                    first_free_index: next_free_index,
                    stats: new_stats,
                    ..scan
                },
            });
            Ok(())
        });
        #[cfg(feature = "defmt")]
        if let Err(Error::OutOfSpace) = &result {
            defmt::warn!("store: write({=str}) failed, no space left even after a switch", key);
        }
        result
    }

    /// Look up `key`, decoding its stored type and value.
    pub fn read(&mut self, key: &str) -> Result<Value, Error<F::Error>> {
        let st = self.state()?;
        let active = st.active;
        let (first, last) = (st.scan.first_index, st.scan.last_index);
        let key_word = Self::search_word(key).ok_or(Error::InvalidArgument)?;

        let result = critical_section::with(|_| -> Result<Value, Error<F::Error>> {
            let index =
                scan::find_key::<W, F>(&mut self.flash, active, key_word, first, last)?.ok_or(Error::NotFound)?;
            let stored_key = self.flash.read_word(active, index)?;
            let (ty, _) = codec::decode_key::<W>(stored_key).ok_or(Error::NotFound)?;
            let value_word = self.flash.read_word(active, index + 1)?;
            Ok(codec::word_to_value::<W>(ty, value_word))
        });
        #[cfg(feature = "defmt")]
        if let Err(Error::NotFound) = &result {
            defmt::warn!("store: read({=str}) found no matching entry", key);
        }
        result
    }

    /// Remove `key`. Errs with [`Error::NotFound`] if it is not present.
    pub fn delete(&mut self, key: &str) -> Result<(), Error<F::Error>> {
        self.state()?;
        let key_word = Self::search_word(key).ok_or(Error::InvalidArgument)?;

        let result = critical_section::with(|_| -> Result<(), Error<F::Error>> {
            let st = self.state.as_ref().ok_or(Error::NotStarted)?;
            let active = st.active;
            let scan = st.scan;
            let counter = st.counter;
            let index = scan::find_key::<W, F>(&mut self.flash, active, key_word, scan.first_index, scan.last_index)?
                .ok_or(Error::NotFound)?;
            engine::tombstone::<W, F>(&mut self.flash, active, index)?;
            let mut new_stats = scan.stats;
            new_stats.used -= 1;
            new_stats.deleted += 1;
            self.state = Some(State {
                active,
                counter,
                scan: ScanResult { stats: new_stats, ..scan },
            });
            Ok(())
        });
        #[cfg(feature = "defmt")]
        if let Err(Error::NotFound) = &result {
            defmt::warn!("store: delete({=str}) found no matching entry", key);
        }
        result
    }

    /// Read the `n`th live record, in ascending on-flash order. Stable
    /// across reads as long as no intervening `write`/`delete` changes
    /// which slots are live.
    pub fn read_by_index(&mut self, n: usize) -> Result<Record, Error<F::Error>> {
        let st = self.state()?;
        let active = st.active;
        let (first, last) = (st.scan.first_index, st.scan.last_index);

        critical_section::with(|_| -> Result<Record, Error<F::Error>> {
            let mut index = scan::first_used_index::<W, F>(&mut self.flash, active, first, last)?;
            for _ in 0..n {
                let at = index.ok_or(Error::NotFound)?;
                index = scan::next_used_index::<W, F>(&mut self.flash, active, at, last)?;
            }
            let at = index.ok_or(Error::NotFound)?;
            let key_word = self.flash.read_word(active, at)?;
            let (ty, key) = codec::decode_key::<W>(key_word).ok_or(Error::NotFound)?;
            let value_word = self.flash.read_word(active, at + 1)?;
            let value = codec::word_to_value::<W>(ty, value_word);
            Record::new(&key, value).map_err(|_| Error::NotFound)
        })
    }

    /// Call `f` with every live record's key and value, in ascending
    /// on-flash order.
    pub fn dump<E2>(&mut self, mut f: impl FnMut(&str, &Value) -> Result<(), E2>) -> Result<(), Error<F::Error>>
    where
        E2: Into<Error<F::Error>>,
    {
        let st = self.state()?;
        let active = st.active;
        let (first, last) = (st.scan.first_index, st.scan.last_index);

        critical_section::with(|_| -> Result<(), Error<F::Error>> {
            let mut index = scan::first_used_index::<W, F>(&mut self.flash, active, first, last)?;
            while let Some(at) = index {
                let key_word = self.flash.read_word(active, at)?;
                if let Some((ty, key)) = codec::decode_key::<W>(key_word) {
                    let value_word = self.flash.read_word(active, at + 1)?;
                    let value = codec::word_to_value::<W>(ty, value_word);
                    f(&key, &value).map_err(Into::into)?;
                }
                index = scan::next_used_index::<W, F>(&mut self.flash, active, at, last)?;
            }
            Ok(())
        })
    }

    /// Number of live entries in the active sector.
    pub fn used_entries(&self) -> Result<usize, Error<F::Error>> {
        Ok(self.state()?.scan.stats.used)
    }

    /// Number of erased, never-written slots in the active sector.
    pub fn free_entries(&self) -> Result<usize, Error<F::Error>> {
        Ok(self.state()?.scan.stats.free)
    }

    /// Total entry slots in the active sector: `used + deleted + free`
    /// (an `invalid` slot cannot survive `init`'s scrub pass).
    pub fn total_entries(&self) -> Result<usize, Error<F::Error>> {
        Ok(self.state()?.scan.stats.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryFlash;

    fn store() -> Store<u32, MemoryFlash<u32>> {
        Store::new(MemoryFlash::new(64))
    }

    #[test]
    fn format_then_roundtrip() {
        let mut s = store();
        s.format().unwrap();
        s.write("c1", Value::U32(42)).unwrap();
        assert_eq!(s.read("c1").unwrap(), Value::U32(42));
    }

    #[test]
    fn read_missing_key_errs() {
        let mut s = store();
        s.format().unwrap();
        assert_eq!(s.read("nope"), Err(Error::NotFound));
    }

    #[test]
    fn overwrite_same_key() {
        let mut s = store();
        s.format().unwrap();
        s.write("c1", Value::U32(1)).unwrap();
        s.write("c1", Value::U32(2)).unwrap();
        assert_eq!(s.read("c1").unwrap(), Value::U32(2));
        assert_eq!(s.used_entries().unwrap(), 1);
    }

    #[test]
    fn identical_rewrite_is_a_true_no_op() {
        let mut s = store();
        s.format().unwrap();
        s.write("c1", Value::U32(1)).unwrap();
        let free_before = s.free_entries().unwrap();
        let used_before = s.used_entries().unwrap();
        s.write("c1", Value::U32(1)).unwrap();
        assert_eq!(s.free_entries().unwrap(), free_before);
        assert_eq!(s.used_entries().unwrap(), used_before);
        assert_eq!(s.read("c1").unwrap(), Value::U32(1));
    }

    #[test]
    fn string_longer_than_the_word_is_rejected() {
        let mut s = store();
        s.format().unwrap();
        let mut too_long = heapless::String::<16>::new();
        too_long.push_str("hello").unwrap(); // w = 4, so at most 4 bytes fit
        assert_eq!(s.write("c1", Value::Str(too_long)), Err(Error::InvalidArgument));
        assert_eq!(s.used_entries().unwrap(), 0);
    }

    #[test]
    fn delete_then_read_errs() {
        let mut s = store();
        s.format().unwrap();
        s.write("c1", Value::U32(1)).unwrap();
        s.delete("c1").unwrap();
        assert_eq!(s.read("c1"), Err(Error::NotFound));
    }

    #[test]
    fn sector_switch_on_exhaustion() {
        let mut s = store();
        s.format().unwrap();
        // w=4, S=64 -> 16 words total, 2 header, 14 entry words, 7 slots.
        for (i, key) in ["a", "b", "c", "d", "e", "f", "g"].iter().enumerate() {
            s.write(key, Value::U8(i as u8)).unwrap();
        }
        // All seven slots are live: no room to switch into for a new key.
        assert!(s.write("nw", Value::U8(99)).is_err());

        s.delete("g").unwrap();
        assert_eq!(s.free_entries().unwrap(), 0);
        s.write("nw", Value::U8(99)).unwrap();
        assert_eq!(s.read("nw").unwrap(), Value::U8(99));
        assert_eq!(s.read("g"), Err(Error::NotFound));
    }

    #[test]
    fn operations_before_init_are_rejected() {
        let mut s = store();
        assert_eq!(s.read("c1"), Err(Error::NotStarted));
    }
}
