use bytes::{Bytes, BytesMut};
use mcproxy_protocol::{FieldValue, Fields, Packet};

use super::{ChunkColumn, ColumnData};
use crate::transform::Translation;

/// Turns a column into `map_chunk` packets whose `chunkData` stays within
/// `threshold` bytes.
///
/// Sections are packed in index order and a packet is flushed before a
/// section would overflow it. Only the first packet carries `groundUp`,
/// the biomes and the block entities; when the first section does not fit
/// next to the biomes, the first packet carries no sections at all. A single
/// section larger than the threshold is emitted on its own.
pub fn split_column(
    column: &ChunkColumn,
    translation: Option<&Translation>,
    threshold: usize,
) -> Vec<Packet> {
    let t = translation.copied().unwrap_or_default();
    let chunk_x = column.chunk_x as i64 - t.chunk_x();
    let chunk_z = column.chunk_z as i64 - t.chunk_z();
    let block_entities: Vec<FieldValue> = match &column.data {
        ColumnData::Sectioned { .. } => column
            .block_entities
            .iter()
            .map(|be| t.block_entity(be))
            .collect(),
        ColumnData::Packed { .. } => column.block_entities.clone(),
    };

    let (sections, biomes) = match &column.data {
        ColumnData::Packed { chunk_data, extra } => {
            let mut fields = extra.clone();
            fields.insert("x", chunk_x);
            fields.insert("z", chunk_z);
            fields.insert("chunkData", chunk_data.clone());
            fields.insert("blockEntities", block_entities);
            return vec![Packet::new("map_chunk", fields)];
        }
        ColumnData::Sectioned { sections, biomes } => (sections, biomes),
    };

    let mut builder = SplitBuilder {
        chunk_x,
        chunk_z,
        ground_up: column.ground_up,
        biomes: biomes.as_ref(),
        block_entities: Some(block_entities),
        buffer: BytesMut::new(),
        mask: 0,
        packets: Vec::new(),
    };

    for (index, section) in sections.iter().enumerate() {
        let Some(data) = section else {
            continue;
        };
        let budget = builder.budget(threshold);
        let overflows = builder.buffer.len() + data.len() > budget;
        if overflows && (builder.mask != 0 || budget < threshold) {
            builder.flush();
        }
        builder.buffer.extend_from_slice(data);
        builder.mask |= 1 << index;
    }

    if builder.mask != 0 || builder.packets.is_empty() {
        builder.flush();
    }
    builder.packets
}

struct SplitBuilder<'a> {
    chunk_x: i64,
    chunk_z: i64,
    ground_up: bool,
    biomes: Option<&'a Bytes>,
    /// Taken by the first flushed packet
    block_entities: Option<Vec<FieldValue>>,
    buffer: BytesMut,
    mask: u16,
    packets: Vec<Packet>,
}

impl SplitBuilder<'_> {
    fn is_first(&self) -> bool {
        self.packets.is_empty()
    }

    /// Section bytes the current packet may hold
    fn budget(&self, threshold: usize) -> usize {
        match (self.is_first() && self.ground_up, self.biomes) {
            (true, Some(biomes)) => threshold.saturating_sub(biomes.len()),
            _ => threshold,
        }
    }

    fn flush(&mut self) {
        let first = self.is_first();
        let mut data = std::mem::take(&mut self.buffer);
        if first && self.ground_up {
            if let Some(biomes) = self.biomes {
                data.extend_from_slice(biomes);
            }
        }

        let fields = Fields::new()
            .with("x", self.chunk_x)
            .with("z", self.chunk_z)
            .with("groundUp", first && self.ground_up)
            .with("bitMap", self.mask as i64)
            .with("chunkData", data.freeze())
            .with(
                "blockEntities",
                self.block_entities.take().unwrap_or_default(),
            );
        self.packets.push(Packet::new("map_chunk", fields));
        self.mask = 0;
    }
}
