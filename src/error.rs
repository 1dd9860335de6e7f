//! The typed, non-panicking error surface for every public operation.

/// Errors a [`crate::store::Store`] operation can return.
///
/// Generic over `E`, the flash driver's own error type (the associated
/// error of whatever [`crate::flash::FlashWords`] implementation is in
/// use), so a driver fault is never silently swallowed or converted to a
/// generic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// A public call was made before `init`/`format` succeeded.
    NotStarted,
    /// Key empty, key too long for this word width, or a type that needs a
    /// wider word than the store was built with.
    InvalidArgument,
    /// The flash driver's reported sector size does not yield an even
    /// entry-word count of at least 4 for this word width.
    InvalidGeometry,
    /// `read`/`read_by_index`/`delete` found no matching, used slot.
    NotFound,
    /// Every slot in the active sector is genuinely `Used`; a sector switch
    /// cannot create room because there is nothing to reclaim.
    OutOfSpace,
    /// The flash driver itself reported a failure. Durability is restored
    /// by the next successful `init`, per the crash-recovery pass; this
    /// crate does not retry or roll back automatically.
    Flash(E),
}

impl<E> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Error::Flash(e)
    }
}

impl<E: core::fmt::Debug> core::fmt::Display for Error<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::NotStarted => write!(f, "store not started; call init() or format() first"),
            Error::InvalidArgument => write!(f, "invalid key or value type for this word width"),
            Error::InvalidGeometry => write!(f, "flash sector size is incompatible with this word width"),
            Error::NotFound => write!(f, "key not found"),
            Error::OutOfSpace => write!(f, "no free or reclaimable space in either sector"),
            Error::Flash(e) => write!(f, "flash driver error: {:?}", e),
        }
    }
}

#[cfg(feature = "std")]
impl<E: core::fmt::Debug> std::error::Error for Error<E> {}
