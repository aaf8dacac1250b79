//! Chunk column model, the 1.12.2 section walker and column splitting

mod section;
mod split;

use std::io;

use bytes::Bytes;
use mcproxy_protocol::{FieldValue, Fields};
use thiserror::Error;

pub use section::{SECTION_COUNT, read_sections};
pub use split::split_column;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("Truncated chunk data in section {section}: {source}")]
    Truncated {
        section: usize,
        #[source]
        source: io::Error,
    },

    #[error("Invalid chunk data: {0}")]
    Invalid(String),

    #[error("Missing chunk field '{0}'")]
    MissingField(&'static str),
}

/// Section payloads of one column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    /// Pre-1.14 layout: each present section is serialized on its own and
    /// the column carries a 16 bit section mask.
    Sectioned {
        sections: [Option<Bytes>; SECTION_COUNT],
        biomes: Option<Bytes>,
    },
    /// Newer layout without a section mask. `extra` holds the remaining
    /// packet fields (light data, heightmaps) verbatim.
    Packed { chunk_data: Bytes, extra: Fields },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkColumn {
    pub chunk_x: i32,
    pub chunk_z: i32,
    /// The column replaces whatever the client had at these coordinates
    pub ground_up: bool,
    pub data: ColumnData,
    /// Block entity NBT compounds. Sectioned columns use absolute
    /// coordinates, packed columns chunk-relative ones.
    pub block_entities: Vec<FieldValue>,
}

impl ChunkColumn {
    pub fn sectioned(
        chunk_x: i32,
        chunk_z: i32,
        sections: [Option<Bytes>; SECTION_COUNT],
        biomes: Option<Bytes>,
    ) -> Self {
        Self {
            chunk_x,
            chunk_z,
            ground_up: true,
            data: ColumnData::Sectioned { sections, biomes },
            block_entities: Vec::new(),
        }
    }

    pub fn with_block_entities(mut self, block_entities: Vec<FieldValue>) -> Self {
        self.block_entities = block_entities;
        self
    }

    /// Section mask of a sectioned column, `None` for the packed layout
    pub fn mask(&self) -> Option<u16> {
        match &self.data {
            ColumnData::Sectioned { sections, .. } => Some(
                sections
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.is_some())
                    .fold(0u16, |mask, (i, _)| mask | (1 << i)),
            ),
            ColumnData::Packed { .. } => None,
        }
    }
}
