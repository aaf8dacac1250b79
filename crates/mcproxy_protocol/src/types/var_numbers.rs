use bytes::{BufMut, BytesMut};
use std::io::{self, Read, Write};

use crate::types::traits::{ProtocolRead, ProtocolWrite};

const SEGMENT_BITS: u32 = 0x7F;
const CONTINUE_BIT: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarInt(pub i32);

impl VarInt {
    /// Encoded size in bytes (1..=5)
    pub fn len(&self) -> usize {
        let mut value = self.0 as u32;
        let mut size = 1;
        while value & !SEGMENT_BITS != 0 {
            value >>= 7;
            size += 1;
        }
        size
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buffer = BytesMut::with_capacity(5);
        let mut value = self.0 as u32;

        loop {
            let mut byte = (value & SEGMENT_BITS) as u8;
            value >>= 7;

            if value != 0 {
                byte |= CONTINUE_BIT;
            }

            buffer.put_u8(byte);

            if value == 0 {
                break;
            }
        }

        buffer
    }
}

impl ProtocolWrite for VarInt {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<usize> {
        let bytes = self.to_bytes();
        writer.write_all(&bytes)?;
        Ok(bytes.len())
    }
}

impl ProtocolRead for VarInt {
    fn read_from<R: Read>(reader: &mut R) -> io::Result<(Self, usize)> {
        let mut value: u32 = 0;
        let mut position = 0;
        let mut bytes_read = 0;

        loop {
            if bytes_read >= 5 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "VarInt too long (>5 bytes)",
                ));
            }

            let mut buf = [0u8; 1];
            reader.read_exact(&mut buf)?;
            bytes_read += 1;

            let byte = buf[0];
            value |= ((byte as u32) & SEGMENT_BITS) << position;

            if byte & CONTINUE_BIT == 0 {
                break;
            }

            position += 7;
        }

        Ok((VarInt(value as i32), bytes_read))
    }
}
