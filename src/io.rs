use std::{convert::TryInto, io::Read, mem::size_of};

use bit_vec::BitVec;

use crate::utils::ceil_div;

pub trait Encodeable {
    fn to_bytes(&self) -> Vec<u8>;
}

pub trait Decodeable {
    fn read_from<R: Read>(reader: &mut R) -> Self;
}

/// Encode/decode with the help of an external reference, e.g. the declared
/// type of a column, which is not part of the serialized payload itself.
pub trait Serializeable: Sized {
    type Reference;

    fn encode(&self, writer: &mut ByteWriter, reference: &Self::Reference);
    fn decode<R: Read>(reader: &mut R, reference: &Self::Reference) -> Self;
}

pub fn read_exact<R: Read>(reader: &mut R, bytes_count: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; bytes_count];
    reader
        .read_exact(&mut buffer)
        .expect(&format!("io error, expect {} bytes", bytes_count));
    buffer
}

pub fn read_into<T: Decodeable, R: Read>(reader: &mut R) -> T {
    T::read_from(reader)
}

/// An in-memory byte sink used by the page codecs.
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write<T: Encodeable>(&mut self, obj: &T) {
        self.buf.extend_from_slice(obj.to_bytes().as_slice());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.buf.clone()
    }

    /// Return the content padded with zeros to the given size. Panics if the
    /// content is already larger than the size, since that means the codec
    /// produced more bytes than a page can hold.
    pub fn to_padded_bytes(&self, size: usize) -> Vec<u8> {
        let mut buf = self.buf.clone();
        if buf.len() > size {
            panic!(
                "buffer size is larger than the given size: {} > {}",
                buf.len(),
                size
            );
        }
        buf.resize(size, 0);
        buf
    }
}

/// Read a slot bitmap of `slot_count` bits. Bit i lives in byte i/8 at
/// position i%8 (LSB first within a byte).
pub fn read_bitmap<R: Read>(reader: &mut R, slot_count: usize) -> BitVec {
    let bytes = read_exact(reader, ceil_div(slot_count, 8));
    let mut bits = BitVec::from_elem(slot_count, false);
    for i in 0..slot_count {
        if bytes[i / 8] >> (i % 8) & 1 == 1 {
            bits.set(i, true);
        }
    }
    bits
}

/// Write a slot bitmap, LSB first within a byte.
pub fn write_bitmap(writer: &mut ByteWriter, bits: &BitVec) {
    let mut bytes = vec![0u8; ceil_div(bits.len(), 8)];
    for i in 0..bits.len() {
        if bits[i] {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    writer.write_bytes(&bytes);
}

macro_rules! impl_serialization {
    (for $($t:ty),+) => {
        $(
            impl Encodeable for $t {
                fn to_bytes(&self) -> Vec<u8> {
                    self.to_be_bytes().to_vec()
                }
            }

            impl Decodeable for $t {
                fn read_from<R: Read>(reader: &mut R) -> Self {
                    let bytes = read_exact(reader, size_of::<Self>());
                    Self::from_be_bytes(bytes.try_into().unwrap())
                }
            }
        )*
    }
}

impl_serialization!(for u8, u16, u32, u64, i8, i16, i32, i64);
