//! A power-loss-safe key/value store for on-chip NOR flash.
//!
//! Two equally-sized flash sectors are used as a double buffer: one is
//! active and holds a log of appended entries, the other stands by erased.
//! When the active sector runs out of room, its live entries are copied
//! ("switched") into the standby sector, which then becomes active. Every
//! write orders its flash words so that a power loss at any point leaves
//! the store in a state [`Store::init`] can recover without data loss
//! beyond the one write in flight.
//!
//! ```ignore
//! use flashkv::{Store, Value};
//! use flashkv::testing::MemoryFlash;
//!
//! let mut store: Store<u32, _> = Store::new(MemoryFlash::new(4096));
//! store.format().unwrap();
//! store.write("boot_count", Value::U32(1)).unwrap();
//! assert_eq!(store.read("boot_count").unwrap(), Value::U32(1));
//! ```

#![cfg_attr(not(test), no_std)]

#[cfg(feature = "std")]
extern crate std;

mod codec;
mod engine;
mod recovery;
mod scan;

pub mod error;
pub mod flash;
pub mod record;
pub mod store;
pub mod word;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::Error;
pub use flash::{FlashWords, NorFlashSectors, Sector};
pub use record::{DataType, Key, Record, Value};
pub use store::Store;
pub use word::Word;
