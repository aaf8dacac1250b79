//! World coordinate translation between the server and a shifted client view

use std::sync::Arc;

use mcproxy_config::{LogType, OffsetConfig};
use mcproxy_protocol::{FieldValue, Fields, Packet};
use tracing::warn;

use crate::chunk::{self, ChunkColumn, ColumnData};
use crate::game::Vec3;

const CHUNK_SIZE: i64 = 16;
/// Sound positions are fixed-point with three fractional bits
const SOUND_SCALE: i64 = 8;

/// Horizontal world shift, aligned to chunk boundaries. The vertical
/// component is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoordinateOffset {
    chunk_x: i64,
    chunk_z: i64,
}

impl CoordinateOffset {
    /// Floors `x` and `z` to the chunk grid and drops `y`.
    pub fn new(x: f64, _y: f64, z: f64) -> Self {
        Self {
            chunk_x: (x / CHUNK_SIZE as f64).floor() as i64,
            chunk_z: (z / CHUNK_SIZE as f64).floor() as i64,
        }
    }

    pub const fn from_chunks(chunk_x: i64, chunk_z: i64) -> Self {
        Self { chunk_x, chunk_z }
    }

    pub const fn x(&self) -> i64 {
        self.chunk_x * CHUNK_SIZE
    }

    pub const fn z(&self) -> i64 {
        self.chunk_z * CHUNK_SIZE
    }

    pub const fn chunk_x(&self) -> i64 {
        self.chunk_x
    }

    pub const fn chunk_z(&self) -> i64 {
        self.chunk_z
    }
}

impl From<&OffsetConfig> for CoordinateOffset {
    fn from(config: &OffsetConfig) -> Self {
        CoordinateOffset::new(config.x, config.y, config.z)
    }
}

/// One direction of a [`CoordinateOffset`]: every world coordinate has
/// `block_*` subtracted from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Translation {
    chunk_x: i64,
    chunk_z: i64,
}

impl Translation {
    pub fn server_to_client(offset: &CoordinateOffset) -> Self {
        Self {
            chunk_x: offset.chunk_x,
            chunk_z: offset.chunk_z,
        }
    }

    pub fn client_to_server(offset: &CoordinateOffset) -> Self {
        Self::server_to_client(offset).inverse()
    }

    pub fn inverse(&self) -> Self {
        Self {
            chunk_x: -self.chunk_x,
            chunk_z: -self.chunk_z,
        }
    }

    pub fn chunk_x(&self) -> i64 {
        self.chunk_x
    }

    pub fn chunk_z(&self) -> i64 {
        self.chunk_z
    }

    pub fn block_x(&self) -> i64 {
        self.chunk_x * CHUNK_SIZE
    }

    pub fn block_z(&self) -> i64 {
        self.chunk_z * CHUNK_SIZE
    }

    pub fn position(&self, position: Vec3) -> Vec3 {
        Vec3 {
            x: position.x - self.block_x() as f64,
            y: position.y,
            z: position.z - self.block_z() as f64,
        }
    }

    /// Shifts top-level `x`/`z` block coordinates
    pub fn blocks(&self, fields: &mut Fields) -> bool {
        let x = fields.shift("x", self.block_x());
        let z = fields.shift("z", self.block_z());
        x || z
    }

    /// Shifts the `x`/`z` of a nested position compound such as `location`
    pub fn nested(&self, fields: &mut Fields, key: &str) -> bool {
        match fields.get_mut(key).and_then(FieldValue::as_compound_mut) {
            Some(inner) => self.blocks(inner),
            None => false,
        }
    }

    pub fn sound(&self, fields: &mut Fields) -> bool {
        let x = fields.shift("x", self.block_x() * SOUND_SCALE);
        let z = fields.shift("z", self.block_z() * SOUND_SCALE);
        x || z
    }

    pub fn chunks(&self, fields: &mut Fields, x_key: &str, z_key: &str) -> bool {
        let x = fields.shift(x_key, self.chunk_x);
        let z = fields.shift(z_key, self.chunk_z);
        x || z
    }

    /// Position packets flag relative axes with bits 0x01 (x), 0x02 (y)
    /// and 0x04 (z). Relative axes are left untouched.
    pub fn teleport(&self, fields: &mut Fields) -> bool {
        let flags = fields.get_i64("flags").unwrap_or(0);
        let mut changed = false;
        if flags & 0x01 == 0 {
            changed |= fields.shift("x", self.block_x());
        }
        if flags & 0x04 == 0 {
            changed |= fields.shift("z", self.block_z());
        }
        changed
    }

    /// Translates a block entity NBT compound carrying absolute coordinates.
    pub fn block_entity(&self, value: &FieldValue) -> FieldValue {
        let mut value = value.clone();
        if let Some(nbt) = value.as_compound_mut() {
            self.blocks(nbt);
        }
        value
    }
}

/// Outcome of running a packet through a [`PositionTransformer`]
#[derive(Debug, Clone, PartialEq)]
pub enum Rewrite {
    Unchanged,
    Drop,
    Replace(Fields),
    /// The packet is replaced by several packets, written in order
    Split(Vec<Packet>),
}

/// What the transformer needs to know about the receiving client when
/// rewriting chunk data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    /// The client speaks the sectioned 1.12.2 chunk format
    pub legacy: bool,
    /// The current dimension carries sky light in each section
    pub sky_light: bool,
    pub split_threshold: usize,
}

pub trait PositionTransformer: Send + Sync {
    fn on_server_to_client(&self, name: &str, fields: &Fields, layout: &ChunkLayout) -> Rewrite;

    fn on_client_to_server(&self, name: &str, fields: &Fields) -> Rewrite;

    /// Maps a server-space position into the client's view
    fn position_to_client(&self, position: Vec3) -> Vec3;

    /// Emits a stored column as `map_chunk` packets in client space
    fn column_to_client(&self, column: &ChunkColumn, split_threshold: usize) -> Vec<Packet>;
}

/// Fixed-offset transformer
#[derive(Debug, Clone, Copy)]
pub struct SimplePositionTransformer {
    offset: CoordinateOffset,
    to_client: Translation,
    to_server: Translation,
}

impl SimplePositionTransformer {
    pub fn new(offset: CoordinateOffset) -> Self {
        Self {
            offset,
            to_client: Translation::server_to_client(&offset),
            to_server: Translation::client_to_server(&offset),
        }
    }

    pub fn shared(offset: CoordinateOffset) -> Arc<dyn PositionTransformer> {
        Arc::new(Self::new(offset))
    }

    pub fn offset(&self) -> CoordinateOffset {
        self.offset
    }

    fn map_chunk(&self, fields: &Fields, layout: &ChunkLayout) -> Rewrite {
        let t = &self.to_client;
        let mask = match fields.get_i64("bitMap") {
            Some(mask) if layout.legacy => mask as u16,
            _ => {
                // Block entities in the packed layout are chunk-relative, so
                // a chunk aligned shift only moves the column itself.
                let mut fields = fields.clone();
                t.chunks(&mut fields, "x", "z");
                return Rewrite::Replace(fields);
            }
        };

        match column_from_fields(fields, mask, layout.sky_light) {
            Ok(column) => Rewrite::Split(chunk::split_column(
                &column,
                Some(t),
                layout.split_threshold,
            )),
            Err(e) => {
                warn!(
                    log_type = LogType::Transform.as_str(),
                    "Cannot split map_chunk, translating coordinates only: {}", e
                );
                let mut fields = fields.clone();
                t.chunks(&mut fields, "x", "z");
                Rewrite::Replace(fields)
            }
        }
    }
}

fn column_from_fields(
    fields: &Fields,
    mask: u16,
    sky_light: bool,
) -> Result<ChunkColumn, chunk::ChunkError> {
    let chunk_x = fields
        .get_i64("x")
        .ok_or(chunk::ChunkError::MissingField("x"))?;
    let chunk_z = fields
        .get_i64("z")
        .ok_or(chunk::ChunkError::MissingField("z"))?;
    let data = fields
        .get_bytes("chunkData")
        .ok_or(chunk::ChunkError::MissingField("chunkData"))?;
    let ground_up = fields.get_bool("groundUp").unwrap_or(false);
    let (sections, biomes) = chunk::read_sections(data, mask, sky_light, ground_up)?;

    Ok(ChunkColumn {
        chunk_x: chunk_x as i32,
        chunk_z: chunk_z as i32,
        ground_up,
        data: ColumnData::Sectioned { sections, biomes },
        block_entities: fields
            .get_list("blockEntities")
            .map(<[FieldValue]>::to_vec)
            .unwrap_or_default(),
    })
}

fn replace_if(changed: bool, fields: Fields) -> Rewrite {
    if changed {
        Rewrite::Replace(fields)
    } else {
        Rewrite::Unchanged
    }
}

impl PositionTransformer for SimplePositionTransformer {
    fn on_server_to_client(&self, name: &str, fields: &Fields, layout: &ChunkLayout) -> Rewrite {
        let t = &self.to_client;
        match name {
            "explosion" => return Rewrite::Drop,
            "map_chunk" => return self.map_chunk(fields, layout),
            _ => {}
        }

        let mut fields = fields.clone();
        let mut changed = t.nested(&mut fields, "location");
        changed |= match name {
            "sound_effect" | "named_sound_effect" => t.sound(&mut fields),
            "unload_chunk" => t.chunks(&mut fields, "chunkX", "chunkZ"),
            "update_view_position" => t.chunks(&mut fields, "chunkX", "chunkZ"),
            "multi_block_change" => {
                let legacy = t.chunks(&mut fields, "chunkX", "chunkZ");
                let section = match fields
                    .get_mut("chunkCoordinates")
                    .and_then(FieldValue::as_compound_mut)
                {
                    Some(coords) => t.chunks(coords, "x", "z"),
                    None => false,
                };
                legacy || section
            }
            "spawn_entity_living"
            | "spawn_entity_weather"
            | "spawn_entity_experience_orb"
            | "spawn_entity"
            | "spawn_entity_painting"
            | "entity_teleport"
            | "vehicle_move"
            | "world_particles"
            | "named_entity_spawn" => t.blocks(&mut fields),
            "position" => t.teleport(&mut fields),
            "tile_entity_data" => t.nested(&mut fields, "nbtData"),
            _ => false,
        };
        replace_if(changed, fields)
    }

    fn on_client_to_server(&self, name: &str, fields: &Fields) -> Rewrite {
        let t = &self.to_server;
        let mut fields = fields.clone();
        let mut changed = t.nested(&mut fields, "location");
        changed |= match name {
            "vehicle_move" | "use_entity" | "position_look" | "position" => t.blocks(&mut fields),
            _ => false,
        };
        replace_if(changed, fields)
    }

    fn position_to_client(&self, position: Vec3) -> Vec3 {
        self.to_client.position(position)
    }

    fn column_to_client(&self, column: &ChunkColumn, split_threshold: usize) -> Vec<Packet> {
        chunk::split_column(column, Some(&self.to_client), split_threshold)
    }
}
