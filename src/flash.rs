//! The flash driver interface consumed by this crate.
//!
//! Everything in this module is the "external collaborator" side of the
//! design: the engine never talks to a register block directly, only to
//! this trait. A real MCU board crate implements [`FlashWords`] against its
//! own flash controller (erase/read/write a single word in a named
//! sector); [`crate::testing::MemoryFlash`] implements it over plain RAM
//! for hosted tests.

/// One of the two fixed flash sectors this crate manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Sector {
    A,
    B,
}

impl Sector {
    /// The other sector: `A.other() == B` and vice versa.
    pub fn other(self) -> Sector {
        match self {
            Sector::A => Sector::B,
            Sector::B => Sector::A,
        }
    }
}

/// Word-oriented access to the two flash sectors.
///
/// `sector_size` must report the same size for both sectors; this crate
/// does not support asymmetric sectors. All indices are word indices, not
/// byte offsets: `word_index` ranges over `0..sector_size()/W::BYTES`.
pub trait FlashWords<W> {
    /// The driver's own error type, preserved (not discarded) in
    /// [`crate::error::Error::Flash`].
    type Error: core::fmt::Debug;

    /// Size of each sector, in bytes. Must be identical for `Sector::A` and
    /// `Sector::B`.
    fn sector_size(&self) -> usize;

    /// Erase `sector` in its entirety (every word becomes `W::MAX`).
    fn erase_sector(&mut self, sector: Sector) -> Result<(), Self::Error>;

    /// Read the word at `word_index` within `sector`.
    fn read_word(&mut self, sector: Sector, word_index: usize) -> Result<W, Self::Error>;

    /// Write `word` at `word_index` within `sector`. The caller guarantees
    /// this only ever clears bits that are currently set (NOR-flash write
    /// semantics); it is a logic error, not a recoverable one, to call this
    /// on a word that has not been erased since its last write.
    fn write_word(&mut self, sector: Sector, word_index: usize, word: W) -> Result<(), Self::Error>;
}

/// Adapts a byte-oriented [`embedded_storage`] NOR flash device into two
/// word-oriented [`FlashWords`] sectors of equal size, split as the lower
/// and upper half of the device.
///
/// This is the integration point for boards that already expose an
/// `embedded-storage` driver (as this crate's own flash HAL does) rather
/// than a bespoke word-indexed one.
pub struct NorFlashSectors<F> {
    flash: F,
    sector_bytes: u32,
}

impl<F> NorFlashSectors<F> {
    /// `sector_bytes` is the size of each half; the wrapped device must be
    /// at least `2 * sector_bytes` long.
    pub fn new(flash: F, sector_bytes: u32) -> Self {
        NorFlashSectors { flash, sector_bytes }
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    fn base_offset(&self, sector: Sector) -> u32 {
        match sector {
            Sector::A => 0,
            Sector::B => self.sector_bytes,
        }
    }
}

impl<W, F> FlashWords<W> for NorFlashSectors<F>
where
    W: crate::word::Word,
    F: embedded_storage::nor_flash::ReadNorFlash + embedded_storage::nor_flash::NorFlash,
{
    type Error = F::Error;

    fn sector_size(&self) -> usize {
        self.sector_bytes as usize
    }

    fn erase_sector(&mut self, sector: Sector) -> Result<(), Self::Error> {
        let base = self.base_offset(sector);
        self.flash.erase(base, base + self.sector_bytes)
    }

    fn read_word(&mut self, sector: Sector, word_index: usize) -> Result<W, Self::Error> {
        let offset = self.base_offset(sector) + (word_index * W::BYTES) as u32;
        let mut buf = [0u8; 16];
        self.flash.read(offset, &mut buf[..W::BYTES])?;
        Ok(W::from_le_bytes(&buf))
    }

    fn write_word(&mut self, sector: Sector, word_index: usize, word: W) -> Result<(), Self::Error> {
        let offset = self.base_offset(sector) + (word_index * W::BYTES) as u32;
        let mut buf = [0u8; 16];
        word.write_le_bytes(&mut buf);
        self.flash.write(offset, &buf[..W::BYTES])
    }
}
