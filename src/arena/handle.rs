//! Opaque value handles.
//!
//! A `Handle` is the only reference a host ever holds into a context's value
//! storage. It packs the owning context's tag, the slot generation and the
//! slot index into a single non-zero integer, so a freed, recycled or
//! foreign handle is always detected instead of dereferencing stale memory.

use std::fmt;
use std::num::NonZeroU64;

use thiserror::Error;

/// Errors raised by handle validation and promise settlement.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandleError {
    /// The handle was minted by a different context.
    #[error("handle {0:#x} does not belong to this context")]
    ForeignContext(u64),
    /// The slot was freed (or freed and recycled) since the handle was minted.
    #[error("handle {0:#x} refers to a freed slot")]
    Stale(u64),
    /// The caller released this handle already; remaining references belong
    /// to containers or the context, not to the caller.
    #[error("handle {0:#x} was already released")]
    AlreadyReleased(u64),
    /// The slot index is outside the context's slot table.
    #[error("handle {0:#x} is out of range for this context")]
    OutOfRange(u64),
    /// A promise operation was applied to a non-promise value.
    #[error("handle {0:#x} is not a promise")]
    NotAPromise(u64),
    /// The promise behind the handle was already resolved or rejected.
    #[error("promise {0:#x} was already settled")]
    AlreadySettled(u64),
}

/// Result alias for handle operations.
pub type HandleResult<T> = Result<T, HandleError>;

/// Opaque reference to one interpreter-owned value.
///
/// Layout: `[context tag: 16][generation: 16][slot index + 1: 32]`. The low
/// word stores `index + 1` so the packed integer is never zero; the zero
/// value is reserved for "null/absent" and is expressed as `Option<Handle>`
/// being `None` throughout the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(NonZeroU64);

impl Handle {
    /// Pack a context tag, generation and slot index into a handle.
    ///
    /// `index` must be below `u32::MAX`; the store never hands out the last
    /// index, which keeps the low word non-zero.
    pub(crate) fn pack(
        context: u16,
        generation: u16,
        index: u32,
    ) -> Self {
        debug_assert!(index < u32::MAX);
        let raw =
            (u64::from(context) << 48) | (u64::from(generation) << 32) | (u64::from(index) + 1);
        match NonZeroU64::new(raw) {
            Some(inner) => Self(inner),
            None => unreachable!("packed handle is non-zero by construction"),
        }
    }

    /// Context tag the handle was minted under.
    #[inline]
    pub(crate) fn context(&self) -> u16 {
        (self.0.get() >> 48) as u16
    }

    /// Slot generation recorded at mint time.
    #[inline]
    pub(crate) fn generation(&self) -> u16 {
        (self.0.get() >> 32) as u16
    }

    /// Slot index within the owning context.
    #[inline]
    pub(crate) fn index(&self) -> u32 {
        (self.0.get() as u32) - 1
    }

    /// The raw integer form, as it would cross an FFI boundary.
    #[inline]
    pub fn raw(&self) -> u64 {
        self.0.get()
    }

    /// Rebuild a handle from its raw integer form.
    ///
    /// Returns `None` for zero (the null/absent encoding). A non-zero value
    /// that was never minted by the target context is caught later, at
    /// dereference time.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }
}

impl fmt::Display for Handle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Handle({:#x})", self.0.get())
    }
}
