//! Text and buffer marshaling.
//!
//! Text goes to the engine as null-terminated bytes ([`CText`]). Buffers the
//! engine writes into are owned by the layer as [`Pinned`] regions whose
//! address never changes, with a separately pinned [`SizeCell`] the engine
//! updates with the number of bytes it produced.

use crate::datatype::{as_bytes, Element};
use crate::error::{Error, Result};
use std::cell::UnsafeCell;
use std::ffi::{c_char, c_void, CStr, CString};
use std::fmt;

/// Null-terminated text handed to the engine.
#[derive(Clone, PartialEq, Eq)]
pub struct CText(CString);

impl CText {
    /// Marshals metadata text (names, keys). Only ASCII is accepted.
    pub fn ascii(text: &str) -> Result<Self> {
        if !text.is_ascii() {
            return Err(Error::marshal(format!("'{text}' is not ASCII")));
        }
        Self::utf8(text)
    }

    /// Marshals arbitrary UTF-8 text.
    pub fn utf8(text: &str) -> Result<Self> {
        CString::new(text)
            .map(Self)
            .map_err(|_| Error::marshal(format!("'{}' contains a NUL byte", text.escape_debug())))
    }

    /// Pointer valid for as long as `self` lives.
    pub fn as_ptr(&self) -> *const c_char {
        self.0.as_ptr()
    }

    /// Text without the terminator.
    pub fn as_str(&self) -> &str {
        // Constructed from a &str, so always UTF-8.
        self.0.to_str().unwrap_or_default()
    }
}

impl fmt::Debug for CText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

/// Copies a string returned by the engine.
///
/// # Safety
///
/// `ptr` must be null or point to a null-terminated string that stays valid
/// for the duration of the call.
pub(crate) unsafe fn text_from_ptr(ptr: *const c_char) -> Result<String> {
    if ptr.is_null() {
        return Err(Error::marshal("engine returned a null string"));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(str::to_owned)
        .map_err(|e| Error::marshal(format!("engine returned invalid UTF-8: {e}")))
}

/// A caller buffer owned by the layer while the engine may touch it.
pub trait Region: Send + 'static {
    /// Start of the region.
    fn as_mut_ptr(&mut self) -> *mut c_void;

    /// Capacity in bytes.
    fn byte_len(&self) -> usize;

    /// Contents as bytes.
    fn as_bytes(&self) -> &[u8];

    /// Size of one element.
    fn element_size(&self) -> usize;

    /// A zeroed region of the same element type holding at least `bytes` bytes.
    fn grown(&self, bytes: usize) -> Box<dyn Region>;
}

/// A fixed-size, heap-allocated buffer whose address never moves.
pub struct Pinned<T: Element> {
    data: Box<[T]>,
}

impl<T: Element> Pinned<T> {
    /// Takes ownership of `data`.
    pub fn new(data: Vec<T>) -> Self {
        Self {
            data: data.into_boxed_slice(),
        }
    }

    /// A zeroed buffer of `len` elements.
    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![T::default(); len])
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true when the buffer holds no element.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl<T: Element> Region for Pinned<T> {
    fn as_mut_ptr(&mut self) -> *mut c_void {
        self.data.as_mut_ptr().cast()
    }

    fn byte_len(&self) -> usize {
        std::mem::size_of_val(&*self.data)
    }

    fn as_bytes(&self) -> &[u8] {
        as_bytes(&self.data)
    }

    fn element_size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    fn grown(&self, bytes: usize) -> Box<dyn Region> {
        let len = bytes.div_ceil(std::mem::size_of::<T>());
        Box::new(Self::zeroed(len))
    }
}

impl<T: Element> fmt::Debug for Pinned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pinned")
            .field("elements", &self.data.len())
            .field("bytes", &self.byte_len())
            .finish()
    }
}

/// A pinned byte count the engine reads and writes through a pointer.
///
/// Not `Sync`: the query registry that owns it sits behind a mutex.
pub struct SizeCell(Box<UnsafeCell<u64>>);

impl SizeCell {
    /// A cell holding `bytes`.
    pub fn new(bytes: u64) -> Self {
        Self(Box::new(UnsafeCell::new(bytes)))
    }

    /// Current value.
    pub fn get(&self) -> u64 {
        // SAFETY: the query refuses registry access while a submission is in
        // flight, so the engine never writes the cell during this read.
        unsafe { *self.0.get() }
    }

    /// Overwrites the value.
    pub fn set(&self, bytes: u64) {
        // SAFETY: see `get`.
        unsafe { *self.0.get() = bytes }
    }

    /// Address handed to the engine.
    pub fn as_mut_ptr(&self) -> *mut u64 {
        self.0.get()
    }
}

impl fmt::Debug for SizeCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SizeCell").field(&self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_rejects_non_ascii() {
        assert!(CText::ascii("a1").is_ok());
        let err = CText::ascii("größe").unwrap_err();
        assert!(matches!(err, Error::Marshal { .. }));
        assert!(CText::utf8("größe").is_ok());
    }

    #[test]
    fn interior_nul_rejected() {
        assert!(CText::utf8("a\0b").is_err());
    }

    #[test]
    fn text_round_trip() {
        let text = CText::ascii("rows").unwrap();
        let back = unsafe { text_from_ptr(text.as_ptr()) }.unwrap();
        assert_eq!(back, "rows");
        assert!(unsafe { text_from_ptr(std::ptr::null()) }.is_err());
    }

    #[test]
    fn pinned_address_is_stable() {
        let mut region = Pinned::new(vec![1u64, 2, 3]);
        let before = region.as_mut_ptr();
        let moved = Box::new(region);
        let mut region = *moved;
        assert_eq!(region.as_mut_ptr(), before);
        assert_eq!(region.byte_len(), 24);
        assert_eq!(region.element_size(), 8);
    }

    #[test]
    fn grown_rounds_up_to_elements() {
        let region = Pinned::new(vec![0i32; 2]);
        let bigger = region.grown(10);
        assert_eq!(bigger.byte_len(), 12);
        assert!(bigger.as_bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn size_cell_through_pointer() {
        let cell = SizeCell::new(16);
        unsafe { *cell.as_mut_ptr() = 4 };
        assert_eq!(cell.get(), 4);
        cell.set(32);
        assert_eq!(cell.get(), 32);
    }
}
