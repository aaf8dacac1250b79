use std::io::{self, Cursor};

use bytes::Bytes;
use mcproxy_protocol::{ProtocolRead, VarInt};

use super::ChunkError;

pub const SECTION_COUNT: usize = 16;

const LIGHT_BYTES: usize = 2048;
const BIOME_BYTES: usize = 256;

/// Slices a 1.12.2 `map_chunk` payload into its sections.
///
/// Each present section is
/// `u8 bits_per_block | VarInt palette_len | VarInt*palette_len | VarInt long_count | i64*long_count | block light | sky light?`.
/// The 256 biome bytes follow the last section when `ground_up` is set.
pub fn read_sections(
    data: &[u8],
    mask: u16,
    sky_light: bool,
    ground_up: bool,
) -> Result<([Option<Bytes>; SECTION_COUNT], Option<Bytes>), ChunkError> {
    let source = Bytes::copy_from_slice(data);
    let mut cursor = Cursor::new(data);
    let mut sections: [Option<Bytes>; SECTION_COUNT] = Default::default();

    for (index, slot) in sections.iter_mut().enumerate() {
        if mask & (1 << index) == 0 {
            continue;
        }
        let start = cursor.position() as usize;
        skip_section(&mut cursor, sky_light)
            .map_err(|source| ChunkError::Truncated { section: index, source })?;
        let end = cursor.position() as usize;
        *slot = Some(source.slice(start..end));
    }

    let rest = cursor.position() as usize;
    let biomes = if ground_up {
        if data.len() < rest + BIOME_BYTES {
            return Err(ChunkError::Invalid(format!(
                "expected {} biome bytes, found {}",
                BIOME_BYTES,
                data.len() - rest
            )));
        }
        Some(source.slice(rest..rest + BIOME_BYTES))
    } else {
        None
    };

    Ok((sections, biomes))
}

fn skip_section(cursor: &mut Cursor<&[u8]>, sky_light: bool) -> io::Result<()> {
    let (_bits_per_block, _) = u8::read_from(cursor)?;

    let (VarInt(palette_len), _) = VarInt::read_from(cursor)?;
    for _ in 0..non_negative(palette_len)? {
        VarInt::read_from(cursor)?;
    }

    let (VarInt(long_count), _) = VarInt::read_from(cursor)?;
    skip(cursor, non_negative(long_count)? * 8)?;

    skip(cursor, LIGHT_BYTES)?;
    if sky_light {
        skip(cursor, LIGHT_BYTES)?;
    }
    Ok(())
}

fn non_negative(len: i32) -> io::Result<usize> {
    usize::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "negative length prefix"))
}

fn skip(cursor: &mut Cursor<&[u8]>, count: usize) -> io::Result<()> {
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    if count as u64 > remaining {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("needed {} bytes, found {}", count, remaining),
        ));
    }
    cursor.set_position(cursor.position() + count as u64);
    Ok(())
}
