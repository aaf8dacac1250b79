use std::io::{self, Read, Write};

/// Reads a value in the wire encoding, returning it with the number of
/// bytes consumed.
pub trait ProtocolRead: Sized {
    fn read_from<R: Read>(reader: &mut R) -> io::Result<(Self, usize)>;
}

/// Writes a value in the wire encoding, returning the number of bytes
/// written.
pub trait ProtocolWrite {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<usize>;
}

impl ProtocolRead for u8 {
    fn read_from<R: Read>(reader: &mut R) -> io::Result<(Self, usize)> {
        let mut buf = [0u8; 1];
        reader.read_exact(&mut buf)?;
        Ok((buf[0], 1))
    }
}

impl ProtocolWrite for u8 {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<usize> {
        writer.write_all(&[*self])?;
        Ok(1)
    }
}
