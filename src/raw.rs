//! Byte-level views of plain-old-data values.
//!
//! The trace container and the shader cache index both store arrays of small
//! fixed-layout structs. Rather than serialize those field by field, we write
//! out and read back their in-memory representation directly.

use std::io::{self, Read};
use std::mem;

/// A marker trait for types that can be treated as blocks of bytes.
///
/// When `Self` implements `Simple`, that means:
///
/// - It can be written in one process and read back in another simply by
///   copying its bytes.
///
/// - Every bit pattern of the right size is a valid `Self`. This is what lets
///   `read_vec` fill values straight from a file, so `bool`, `char` and enums
///   must never implement it.
///
/// - It has no padding: every byte of its representation is a field byte.
pub unsafe trait Simple: Copy + 'static {}

/// Given a reference, return a byte slice of the value's representation.
pub fn as_bytes<T: Simple>(r: &T) -> &[u8] {
    slice_as_bytes(std::slice::from_ref(r))
}

/// Given a slice, return a byte slice of its contents.
pub fn slice_as_bytes<T: Simple>(r: &[T]) -> &[u8] {
    // Safe because `T: Simple` has no padding.
    unsafe { std::slice::from_raw_parts(r.as_ptr() as *const u8, mem::size_of_val(r)) }
}

/// Given a mutable slice, return a mutable byte slice of its contents.
pub fn slice_as_bytes_mut<T: Simple>(r: &mut [T]) -> &mut [u8] {
    // Safe because any bytes written are a valid `[T]`.
    unsafe { std::slice::from_raw_parts_mut(r.as_mut_ptr() as *mut u8, mem::size_of_val(r)) }
}

/// Read a single `T` from `reader`.
pub fn read_value<T: Simple + Default, R: Read>(reader: &mut R) -> io::Result<T> {
    let mut value = T::default();
    reader.read_exact(slice_as_bytes_mut(std::slice::from_mut(&mut value)))?;
    Ok(value)
}

/// Read exactly `bytes` bytes from `reader` as a `Vec<T>`. `what` names the
/// data for error messages.
pub fn read_vec<T: Simple + Default, R: Read>(
    reader: &mut R,
    bytes: usize,
    what: &str,
) -> io::Result<Vec<T>> {
    // Make sure the data has the size of a whole number of `T` values.
    if bytes % mem::size_of::<T>() != 0 {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!(
                "{} is {} bytes long, not a whole number of {}-byte entries",
                what,
                bytes,
                mem::size_of::<T>()
            ),
        ));
    }

    let mut vec = vec![T::default(); bytes / mem::size_of::<T>()];
    reader.read_exact(slice_as_bytes_mut(&mut vec))?;
    Ok(vec)
}

macro_rules! implement_simple {
    ( $( $type:ty ),* ) => {
        $(
            unsafe impl Simple for $type { }
        )*
    }
}

implement_simple!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

#[test]
fn test_read_vec() {
    let values: [u32; 3] = [1, 0xdead_beef, 7];
    let bytes = slice_as_bytes(&values).to_vec();
    assert_eq!(bytes.len(), 12);

    let back: Vec<u32> = read_vec(&mut &bytes[..], bytes.len(), "values").unwrap();
    assert_eq!(back, values);

    let err = read_vec::<u32, _>(&mut &bytes[..], 10, "values").unwrap_err();
    assert!(err.to_string().contains("whole number"));

    let first: u32 = read_value(&mut &bytes[..]).unwrap();
    assert_eq!(first, 1);
}
