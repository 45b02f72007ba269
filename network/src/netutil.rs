use byteorder::{BigEndian, ByteOrder};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    io,
    ops::Index,
    slice::SliceIndex,
    str,
};
use uuid::Uuid;

/// The longest string, in bytes, accepted from the wire.
pub const MAX_STRING_LENGTH: usize = 32767;

/// A wrapper around a vec used for reading and writing packet data with a cursor.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PacketBuffer {
    inner: Vec<u8>,
    cursor: usize,
}

impl From<&[u8]> for PacketBuffer {
    fn from(bytes: &[u8]) -> Self {
        PacketBuffer {
            inner: Vec::from(bytes),
            cursor: 0,
        }
    }
}

impl From<Vec<u8>> for PacketBuffer {
    fn from(inner: Vec<u8>) -> Self {
        PacketBuffer { inner, cursor: 0 }
    }
}

impl<Idx> Index<Idx> for PacketBuffer
where Idx: SliceIndex<[u8]>
{
    type Output = Idx::Output;

    fn index(&self, index: Idx) -> &Self::Output {
        &self.inner[index]
    }
}

impl Display for PacketBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:X?}", self.inner)
    }
}

impl fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "PacketBuffer(cursor: {}, {:X?})", self.cursor, self.inner)
    }
}

impl PacketBuffer {
    /// Creates a new packet buffer with the given initial capacity.
    pub fn new(initial_size: usize) -> Self {
        PacketBuffer {
            inner: Vec::with_capacity(initial_size),
            cursor: 0,
        }
    }

    /// Returns the length of this buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns whether or not this buffer holds any bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the position of the cursor in the buffer.
    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Sets this buffer's cursor to the beginning of the buffer.
    #[inline]
    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    /// Returns the number of bytes remaining after the cursor.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.inner.len() - self.cursor
    }

    /// Clears the contents of this buffer and resets the cursor to the beginning of the buffer.
    #[inline]
    pub fn clear(&mut self) {
        self.inner.clear();
        self.cursor = 0;
    }

    /// Returns the bytes of this buffer, ignoring the cursor.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.inner
    }

    /// Consumes this buffer, returning the inner vec.
    #[inline]
    pub fn into_inner(self) -> Vec<u8> {
        self.inner
    }

    /// Reads a single byte.
    #[inline]
    pub fn read_one(&mut self) -> Result<u8, PacketSerdeError> {
        let byte = *self
            .inner
            .get(self.cursor)
            .ok_or(PacketSerdeError::EndOfBuffer)?;
        self.cursor += 1;
        Ok(byte)
    }

    /// Reads the given number of bytes, advancing the cursor past them.
    #[inline]
    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8], PacketSerdeError> {
        if len > self.remaining() {
            return Err(PacketSerdeError::EndOfBuffer);
        }

        let start = self.cursor;
        self.cursor += len;
        Ok(&self.inner[start .. self.cursor])
    }

    /// Appends the given bytes to the end of this buffer.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.inner.extend_from_slice(bytes);
    }

    /// Appends a single byte to the end of this buffer.
    #[inline]
    pub fn write_one(&mut self, byte: u8) {
        self.inner.push(byte);
    }

    /// Reads a value of the given type from the buffer.
    #[inline]
    pub fn read<T: ReadFromPacket>(&mut self) -> Result<T, PacketSerdeError> {
        T::read_from(self)
    }

    /// Writes the given value to the end of the buffer.
    #[inline]
    pub fn write<T: WriteToPacket + ?Sized>(&mut self, value: &T) {
        value.write_to(self);
    }

    /// Reads a variable-length encoded integer.
    #[inline]
    pub fn read_varying<T: Varying>(&mut self) -> Result<T, PacketSerdeError> {
        T::read_varying_from(self)
    }

    /// Writes the given integer in its variable-length encoding.
    #[inline]
    pub fn write_varying<T: Varying>(&mut self, value: &T) {
        value.write_varying_to(self);
    }

    /// Reads a varint length prefix and validates it against the bytes left in the buffer, where
    /// each element occupies at least `min_element_size` bytes.
    pub fn read_len(&mut self, min_element_size: usize) -> Result<usize, PacketSerdeError> {
        let len = self.read_varying::<i32>()?;
        if len < 0 {
            return Err(PacketSerdeError::Internal("Negative length prefix"));
        }

        let len = len as usize;
        if len.saturating_mul(min_element_size) > self.remaining() {
            return Err(PacketSerdeError::EndOfBuffer);
        }

        Ok(len)
    }

    /// Reads a length-prefixed array.
    pub fn read_array<T: ReadFromPacket>(&mut self) -> Result<Vec<T>, PacketSerdeError> {
        let len = self.read_len(1)?;
        (0 .. len).map(|_| self.read::<T>()).collect()
    }

    /// Writes a length-prefixed array.
    pub fn write_array<T: WriteToPacket>(&mut self, values: &[T]) {
        self.write_varying(&(values.len() as i32));
        for value in values {
            self.write(value);
        }
    }

    /// Returns the number of bytes the given value occupies as a varint.
    pub fn varint_size(mut value: i32) -> usize {
        let mut size = 1;
        while value & !0x7F != 0 {
            value = ((value as u32) >> 7) as i32;
            size += 1;
        }
        size
    }
}

/// Types which can be deserialized from a packet buffer.
pub trait ReadFromPacket: Sized {
    /// Reads a value of this type from the given buffer.
    fn read_from(buffer: &mut PacketBuffer) -> Result<Self, PacketSerdeError>;
}

/// Types which can be serialized into a packet buffer.
pub trait WriteToPacket {
    /// Writes this value to the end of the given buffer.
    fn write_to(&self, buffer: &mut PacketBuffer);
}

/// Integers with a variable-length (LEB128 over the two's complement bits) encoding.
pub trait Varying: Sized {
    /// Reads the variable-length form of this integer.
    fn read_varying_from(buffer: &mut PacketBuffer) -> Result<Self, PacketSerdeError>;

    /// Writes the variable-length form of this integer.
    fn write_varying_to(&self, buffer: &mut PacketBuffer);
}

macro_rules! impl_varying {
    ($($signed:ty, $unsigned:ty, $max_bytes:literal);*) => {$(
        impl Varying for $unsigned {
            fn read_varying_from(buffer: &mut PacketBuffer) -> Result<Self, PacketSerdeError> {
                let mut result: $unsigned = 0;

                for i in 0 .. $max_bytes {
                    let byte = buffer.read_one()?;
                    result |= ((byte & 0x7F) as $unsigned) << (7 * i);

                    if byte & 0x80 == 0 {
                        return Ok(result);
                    }
                }

                Err(PacketSerdeError::VarIntOverflow)
            }

            fn write_varying_to(&self, buffer: &mut PacketBuffer) {
                let mut value = *self;

                loop {
                    if value & !0x7F == 0 {
                        buffer.write_one(value as u8);
                        return;
                    }

                    buffer.write_one((value as u8 & 0x7F) | 0x80);
                    value >>= 7;
                }
            }
        }

        impl Varying for $signed {
            #[inline]
            fn read_varying_from(buffer: &mut PacketBuffer) -> Result<Self, PacketSerdeError> {
                <$unsigned>::read_varying_from(buffer).map(|value| value as $signed)
            }

            #[inline]
            fn write_varying_to(&self, buffer: &mut PacketBuffer) {
                (*self as $unsigned).write_varying_to(buffer);
            }
        }
    )*};
}

impl_varying!(i32, u32, 5; i64, u64, 10);

macro_rules! impl_primitive {
    ($($ty:ty, $size:literal, $read:expr, $write:expr);*) => {$(
        impl ReadFromPacket for $ty {
            #[inline]
            fn read_from(buffer: &mut PacketBuffer) -> Result<Self, PacketSerdeError> {
                buffer.read_bytes($size).map($read)
            }
        }

        impl WriteToPacket for $ty {
            #[inline]
            fn write_to(&self, buffer: &mut PacketBuffer) {
                let mut bytes = [0u8; $size];
                $write(&mut bytes, *self);
                buffer.write_bytes(&bytes);
            }
        }
    )*};
}

impl_primitive!(
    u16, 2, BigEndian::read_u16, BigEndian::write_u16;
    i16, 2, BigEndian::read_i16, BigEndian::write_i16;
    u32, 4, BigEndian::read_u32, BigEndian::write_u32;
    i32, 4, BigEndian::read_i32, BigEndian::write_i32;
    u64, 8, BigEndian::read_u64, BigEndian::write_u64;
    i64, 8, BigEndian::read_i64, BigEndian::write_i64;
    f32, 4, BigEndian::read_f32, BigEndian::write_f32;
    f64, 8, BigEndian::read_f64, BigEndian::write_f64;
    u128, 16, BigEndian::read_u128, BigEndian::write_u128
);

impl ReadFromPacket for u8 {
    #[inline]
    fn read_from(buffer: &mut PacketBuffer) -> Result<Self, PacketSerdeError> {
        buffer.read_one()
    }
}

impl WriteToPacket for u8 {
    #[inline]
    fn write_to(&self, buffer: &mut PacketBuffer) {
        buffer.write_one(*self);
    }
}

impl ReadFromPacket for i8 {
    #[inline]
    fn read_from(buffer: &mut PacketBuffer) -> Result<Self, PacketSerdeError> {
        buffer.read_one().map(|byte| byte as i8)
    }
}

impl WriteToPacket for i8 {
    #[inline]
    fn write_to(&self, buffer: &mut PacketBuffer) {
        buffer.write_one(*self as u8);
    }
}

impl ReadFromPacket for bool {
    #[inline]
    fn read_from(buffer: &mut PacketBuffer) -> Result<Self, PacketSerdeError> {
        match buffer.read_one()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(PacketSerdeError::Internal("Invalid boolean byte")),
        }
    }
}

impl WriteToPacket for bool {
    #[inline]
    fn write_to(&self, buffer: &mut PacketBuffer) {
        buffer.write_one(*self as u8);
    }
}

impl ReadFromPacket for String {
    fn read_from(buffer: &mut PacketBuffer) -> Result<Self, PacketSerdeError> {
        let len = buffer.read_len(1)?;
        if len > MAX_STRING_LENGTH {
            return Err(PacketSerdeError::Internal("String exceeds maximum length"));
        }

        let bytes = buffer.read_bytes(len)?;
        str::from_utf8(bytes)
            .map(ToOwned::to_owned)
            .map_err(|_| PacketSerdeError::InvalidUtf8)
    }
}

impl WriteToPacket for str {
    fn write_to(&self, buffer: &mut PacketBuffer) {
        buffer.write_varying(&(self.len() as i32));
        buffer.write_bytes(self.as_bytes());
    }
}

impl WriteToPacket for String {
    #[inline]
    fn write_to(&self, buffer: &mut PacketBuffer) {
        self.as_str().write_to(buffer);
    }
}

impl ReadFromPacket for Uuid {
    #[inline]
    fn read_from(buffer: &mut PacketBuffer) -> Result<Self, PacketSerdeError> {
        buffer.read::<u128>().map(Uuid::from_u128)
    }
}

impl WriteToPacket for Uuid {
    #[inline]
    fn write_to(&self, buffer: &mut PacketBuffer) {
        buffer.write(&self.as_u128());
    }
}

impl<T: ReadFromPacket> ReadFromPacket for Option<T> {
    fn read_from(buffer: &mut PacketBuffer) -> Result<Self, PacketSerdeError> {
        if buffer.read::<bool>()? {
            buffer.read::<T>().map(Some)
        } else {
            Ok(None)
        }
    }
}

impl<T: WriteToPacket> WriteToPacket for Option<T> {
    fn write_to(&self, buffer: &mut PacketBuffer) {
        match self {
            Some(value) => {
                buffer.write(&true);
                buffer.write(value);
            }
            None => buffer.write(&false),
        }
    }
}

/// An error produced while reading or writing packet data.
#[derive(Debug)]
pub enum PacketSerdeError {
    /// The buffer ended before the value was complete.
    EndOfBuffer,
    /// A varint ran past its maximum encoded size.
    VarIntOverflow,
    /// A packet id with no packet behind it in the current mapping.
    InvalidId(i32),
    /// A string was not valid UTF-8.
    InvalidUtf8,
    /// Bytes were left over after a packet body was fully read.
    TrailingBytes(usize),
    /// Any other malformed value.
    Internal(&'static str),
    /// The underlying transport failed.
    Io(io::Error),
}

impl Display for PacketSerdeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PacketSerdeError::EndOfBuffer => write!(f, "Unexpected end of packet buffer"),
            PacketSerdeError::VarIntOverflow => write!(f, "Variable-length integer is too long"),
            PacketSerdeError::InvalidId(id) => write!(f, "Invalid packet id: {:#04X}", id),
            PacketSerdeError::InvalidUtf8 => write!(f, "String is not valid UTF-8"),
            PacketSerdeError::TrailingBytes(count) =>
                write!(f, "{} unread bytes after packet body", count),
            PacketSerdeError::Internal(msg) => f.write_str(msg),
            PacketSerdeError::Io(error) => Display::fmt(error, f),
        }
    }
}

impl Error for PacketSerdeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PacketSerdeError::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for PacketSerdeError {
    fn from(error: io::Error) -> Self {
        PacketSerdeError::Io(error)
    }
}
