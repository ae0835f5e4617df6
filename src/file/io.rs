//! Endian-aware primitive IO shared by the reader and the writer.
//!
//! Everything in an ECMA-335 image is little-endian, so the reading side only
//! needs bounds-checked `read_le_at`, and the writing side appends to a growable
//! `Vec<u8>` or patches previously reserved space in it.
//!
//! The compressed integer encodings of ECMA-335 II.23.2 live here as well,
//! because both the signature codec and the heap builders need them.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::file::io::{read_le_at, write_compressed_uint};
//!
//! let mut buffer = Vec::new();
//! write_compressed_uint(0x3FFF, &mut buffer);
//! assert_eq!(buffer, [0xBF, 0xFF]);
//!
//! let mut offset = 0;
//! let value: u16 = read_le_at(&[0x34, 0x12], &mut offset)?;
//! assert_eq!(value, 0x1234);
//! assert_eq!(offset, 2);
//! # Ok::<(), cilweave::Error>(())
//! ```

use crate::{Error::OutOfBounds, Result};

/// Trait for primitive types that can be moved to and from little-endian bytes.
///
/// Implemented for every integer and float width that occurs in PE headers,
/// metadata tables, signatures and instruction operands.
pub trait CilIO: Sized + Copy {
    /// Fixed-size byte array that holds one value of this type
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Build the value from little-endian bytes
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Convert the value into little-endian bytes
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $len:expr),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io! {
    u8 => 1, i8 => 1,
    u16 => 2, i16 => 2,
    u32 => 4, i32 => 4,
    u64 => 8, i64 => 8,
    f32 => 4, f64 => 8,
}

/// Read a `T` from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than `T`.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Read a `T` at `offset` and advance `offset` past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the read would cross the end of `data`.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;
    Ok(T::from_le_bytes(read))
}

/// Read a 2- or 4-byte index, as used by heap and table index columns.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the read would cross the end of `data`.
pub fn read_le_at_dyn(data: &[u8], offset: &mut usize, is_large: bool) -> Result<u32> {
    if is_large {
        read_le_at::<u32>(data, offset)
    } else {
        Ok(u32::from(read_le_at::<u16>(data, offset)?))
    }
}

/// Append `value` in little-endian order.
pub fn write_le<T: CilIO>(buffer: &mut Vec<u8>, value: T) {
    buffer.extend_from_slice(value.to_le_bytes().as_ref());
}

/// Overwrite the bytes at `offset` with `value`, advancing `offset`.
///
/// Used to back-patch sizes and RVAs once they are known.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the value does not fit inside `data`.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let bytes = value.to_le_bytes();
    let bytes = bytes.as_ref();
    let Some(end) = offset.checked_add(bytes.len()) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(bytes);
    *offset = end;
    Ok(())
}

/// Append a 2- or 4-byte index.
///
/// The caller guarantees that `value` fits into two bytes when `is_large` is false;
/// the table sizing logic only selects small indices when every possible value fits.
pub fn write_le_dyn(buffer: &mut Vec<u8>, value: u32, is_large: bool) {
    if is_large {
        write_le(buffer, value);
    } else {
        #[allow(clippy::cast_possible_truncation)]
        write_le(buffer, value as u16);
    }
}

/// Append `value` as an ECMA-335 compressed unsigned integer.
///
/// Values up to `0x7F` take one byte, up to `0x3FFF` two bytes, and up to
/// `0x1FFF_FFFF` four bytes. Larger values cannot be represented; callers validate
/// them beforehand with [`compressed_uint_fits`].
#[allow(clippy::cast_possible_truncation)]
pub fn write_compressed_uint(value: u32, buffer: &mut Vec<u8>) {
    if value <= 0x7F {
        buffer.push(value as u8);
    } else if value <= 0x3FFF {
        buffer.push(((value >> 8) as u8) | 0x80);
        buffer.push(value as u8);
    } else {
        buffer.push(((value >> 24) as u8 & 0x1F) | 0xC0);
        buffer.push((value >> 16) as u8);
        buffer.push((value >> 8) as u8);
        buffer.push(value as u8);
    }
}

/// Whether `value` can be stored as a compressed unsigned integer.
#[must_use]
pub fn compressed_uint_fits(value: u32) -> bool {
    value <= 0x1FFF_FFFF
}

/// Number of bytes [`write_compressed_uint`] produces for `value`.
#[must_use]
pub fn compressed_uint_size(value: u32) -> usize {
    if value <= 0x7F {
        1
    } else if value <= 0x3FFF {
        2
    } else {
        4
    }
}

/// Append `value` as an ECMA-335 compressed signed integer.
///
/// The value is rotated so that the sign ends up in bit 0, then stored with the
/// width that can hold it: 7, 14 or 29 bits. The width is picked from the signed
/// range, not from the rotated value, so `-8192` still takes two bytes.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
pub fn write_compressed_int(value: i32, buffer: &mut Vec<u8>) {
    let sign = u32::from(value < 0);
    let rotated = ((value as u32) << 1) | sign;

    if (-0x40..=0x3F).contains(&value) {
        buffer.push((rotated & 0x7F) as u8);
    } else if (-0x2000..=0x1FFF).contains(&value) {
        let rotated = rotated & 0x3FFF;
        buffer.push(((rotated >> 8) as u8) | 0x80);
        buffer.push(rotated as u8);
    } else {
        let rotated = rotated & 0x1FFF_FFFF;
        buffer.push(((rotated >> 24) as u8) | 0xC0);
        buffer.push((rotated >> 16) as u8);
        buffer.push((rotated >> 8) as u8);
        buffer.push(rotated as u8);
    }
}

/// Pad `buffer` with zero bytes until its length is a multiple of `alignment`.
pub fn pad_to(buffer: &mut Vec<u8>, alignment: usize) {
    let padding = (alignment - (buffer.len() % alignment)) % alignment;
    buffer.resize(buffer.len() + padding, 0);
}

/// Round `value` up to the next multiple of `alignment` (a power of two).
#[must_use]
pub const fn align_up(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) & !(alignment - 1)
}
