//! Catch-up sequence for freshly attached clients
//!
//! Replays the login sequence a vanilla server would send, built from the
//! bot's current view of the world, plus two trailing packets (gamemode and
//! health) that correct drift.

use std::f64::consts::PI;

use mcproxy_config::LogType;
use mcproxy_protocol::{FieldValue, Fields, Packet, Version};
use tracing::warn;

use crate::chunk::{self, ChunkColumn};
use crate::error::CatchUpError;
use crate::game::{EntityKind, EntitySnapshot, GameSnapshot, Vec3};
use crate::session::SessionState;
use crate::transform::{ChunkLayout, PositionTransformer, Rewrite};

/// Teleport id carried by the synthetic `position` packet
pub const CATCH_UP_TELEPORT_ID: i32 = 1;

const PLAYER_INFO_ALL_ACTIONS: i32 = 63;
const ENTITY_STATUS_OP_LEVEL_4: i32 = 28;
const GAME_STATE_RAIN_LEVEL: i32 = 7;
const GAME_STATE_THUNDER_LEVEL: i32 = 8;
const GAME_STATE_CHANGE_GAMEMODE: i32 = 3;

/// Entity yaw in radians to the protocol's 256-step angle
pub fn yaw_to_angle(yaw: f64) -> i64 {
    127 - (((yaw / PI) * 128.0 + 255.0) % 256.0).floor() as i64
}

/// Entity pitch in radians to the protocol's 256-step angle
pub fn pitch_to_angle(pitch: f64) -> i64 {
    -(((pitch / PI) * 128.0) % 256.0).floor() as i64
}

pub fn yaw_to_degrees(yaw: f64) -> f64 {
    180.0 - (yaw * 180.0) / PI
}

pub fn pitch_to_degrees(pitch: f64) -> f64 {
    -(pitch * 180.0) / PI
}

/// Ordered packet list, rewritten into client space as it is built
struct Sequence<'a> {
    packets: Vec<Packet>,
    transformer: Option<&'a dyn PositionTransformer>,
    layout: ChunkLayout,
}

impl Sequence<'_> {
    fn push(&mut self, name: &str, fields: Fields) {
        let Some(transformer) = self.transformer else {
            self.packets.push(Packet::new(name, fields));
            return;
        };
        match transformer.on_server_to_client(name, &fields, &self.layout) {
            Rewrite::Unchanged => self.packets.push(Packet::new(name, fields)),
            Rewrite::Replace(fields) => self.packets.push(Packet::new(name, fields)),
            Rewrite::Split(packets) => self.packets.extend(packets),
            Rewrite::Drop => {}
        }
    }

    fn push_column(&mut self, column: &ChunkColumn) {
        let threshold = self.layout.split_threshold;
        let packets = match self.transformer {
            Some(transformer) => transformer.column_to_client(column, threshold),
            None => chunk::split_column(column, None, threshold),
        };
        self.packets.extend(packets);
    }
}

fn xyz(position: Vec3) -> Fields {
    Fields::new()
        .with("x", position.x)
        .with("y", position.y)
        .with("z", position.z)
}

/// Builds the full catch-up sequence.
///
/// Recipes, unlock recipes, tags and commands the bot has not seen yet are
/// left out with a warning rather than replaced by placeholders.
pub fn generate_packets(
    snapshot: &GameSnapshot,
    session: &SessionState,
    client_version: Version,
    transformer: Option<&dyn PositionTransformer>,
    split_threshold: usize,
) -> Result<Vec<Packet>, CatchUpError> {
    let login = session.raw_login().ok_or(CatchUpError::MissingLogin)?;
    let player = &snapshot.player;
    let world = &snapshot.world;
    let legacy = client_version.is_legacy();

    let mut seq = Sequence {
        packets: Vec::new(),
        transformer,
        layout: ChunkLayout {
            legacy,
            sky_light: session.has_sky_light(),
            split_threshold,
        },
    };

    seq.push("login", login.clone());
    seq.push(
        "feature_flags",
        Fields::new().with("features", vec![FieldValue::from("minecraft:vanilla")]),
    );
    seq.push(
        "difficulty",
        Fields::new()
            .with("difficulty", world.difficulty)
            .with("difficultyLocked", false),
    );

    let mut ability_flags = 0i32;
    if player.physics_enabled && !player.on_ground {
        ability_flags |= 0b10;
    }
    if matches!(player.gamemode, 1 | 3) {
        ability_flags |= 0b100;
    }
    if player.gamemode == 1 {
        ability_flags |= 0b1000;
    }
    seq.push(
        "abilities",
        Fields::new()
            .with("flags", ability_flags)
            .with("flyingSpeed", 0.05f64)
            .with("walkingSpeed", 0.1f64),
    );
    seq.push(
        "held_item_slot",
        Fields::new().with("slot", player.quick_bar_slot),
    );

    match session.raw_recipes() {
        Some(recipes) => seq.push("declare_recipes", recipes.clone()),
        None => warn!(
            log_type = LogType::CatchUp.as_str(),
            "No recipes observed yet, skipping declare_recipes"
        ),
    }
    match session.raw_tags() {
        Some(tags) => seq.push("tags", tags.clone()),
        None => warn!(
            log_type = LogType::CatchUp.as_str(),
            "No tags observed yet, skipping tags"
        ),
    }
    seq.push(
        "entity_status",
        Fields::new()
            .with("entityId", player.entity_id)
            .with("entityStatus", ENTITY_STATUS_OP_LEVEL_4),
    );
    match session.raw_commands() {
        Some(commands) => seq.push("declare_commands", commands.clone()),
        None => warn!(
            log_type = LogType::CatchUp.as_str(),
            "No command tree observed yet, skipping declare_commands"
        ),
    }
    match session.raw_unlock_recipes() {
        Some(unlock) => seq.push("unlock_recipes", unlock.clone()),
        None => warn!(
            log_type = LogType::CatchUp.as_str(),
            "No unlocked recipes observed yet, skipping unlock_recipes"
        ),
    }

    seq.push(
        "position",
        xyz(player.position)
            .with("yaw", yaw_to_degrees(player.yaw))
            .with("pitch", pitch_to_degrees(player.pitch))
            .with("flags", 0i32)
            .with("teleportId", CATCH_UP_TELEPORT_ID),
    );

    if !legacy {
        seq.push(
            "server_data",
            Fields::new()
                .with("motd", world.motd.as_str())
                .with("enforcesSecureChat", world.enforces_secure_chat),
        );
    }

    seq.push(
        "player_info",
        Fields::new()
            .with("action", PLAYER_INFO_ALL_ACTIONS)
            .with("data", Vec::<FieldValue>::new()),
    );
    for info in &snapshot.players {
        let entry = Fields::new()
            .with("uuid", info.uuid.to_string())
            .with(
                "player",
                Fields::new()
                    .with("name", info.name.as_str())
                    .with("properties", Vec::<FieldValue>::new()),
            )
            .with("gamemode", info.gamemode)
            .with("latency", info.ping)
            .with("listed", true);
        seq.push(
            "player_info",
            Fields::new()
                .with("action", PLAYER_INFO_ALL_ACTIONS)
                .with("data", vec![FieldValue::Compound(entry)]),
        );

        if info.uuid == player.uuid {
            continue;
        }
        if let Some(entity) = &info.entity {
            seq.push(
                "named_entity_spawn",
                xyz(entity.position)
                    .with("entityId", entity.id)
                    .with("playerUUID", info.uuid.to_string())
                    .with("yaw", yaw_to_angle(entity.yaw))
                    .with("pitch", pitch_to_angle(entity.pitch))
                    .with("metadata", entity.metadata.clone()),
            );
            if let Some(head_yaw) = entity.head_yaw {
                seq.push(
                    "entity_head_rotation",
                    Fields::new()
                        .with("entityId", entity.id)
                        .with("headYaw", yaw_to_angle(head_yaw)),
                );
            }
        }
    }

    seq.push(
        "initialize_world_border",
        Fields::new()
            .with("x", 0.0f64)
            .with("z", 0.0f64)
            .with("oldDiameter", 59_999_968.0f64)
            .with("newDiameter", 59_999_968.0f64)
            .with("speed", 0i32)
            .with("portalTeleportBoundary", 29_999_984i32)
            .with("warningBlocks", 5i32)
            .with("warningTime", 15i32),
    );
    seq.push(
        "update_time",
        Fields::new().with("age", world.age).with("time", world.time),
    );
    seq.push(
        "spawn_position",
        Fields::new()
            .with(
                "location",
                Fields::new().with("x", 0i32).with("y", 73i32).with("z", -64i32),
            )
            .with("angle", 0.0f64),
    );

    if !legacy {
        seq.push(
            "update_view_position",
            Fields::new()
                .with("chunkX", (player.position.x.floor() as i64) >> 4)
                .with("chunkZ", (player.position.z.floor() as i64) >> 4),
        );
    }

    let health = Fields::new()
        .with("health", player.health.health)
        .with("food", player.health.food)
        .with("foodSaturation", player.health.saturation);
    seq.push("update_health", health.clone());

    for column in &snapshot.columns {
        seq.push_column(column);
    }

    seq.push(
        "window_items",
        Fields::new()
            .with("windowId", 0i32)
            .with("statId", 1i32)
            .with("items", snapshot.inventory.clone())
            .with("carriedItem", Fields::new().with("present", false)),
    );

    for entity in &snapshot.entities {
        spawn_entity(&mut seq, entity);
    }

    if world.rain_state != 0.0 {
        seq.push(
            "game_state_change",
            Fields::new()
                .with("reason", GAME_STATE_RAIN_LEVEL)
                .with("gameMode", world.rain_state),
        );
    }
    if world.thunder_state != 0.0 {
        seq.push(
            "game_state_change",
            Fields::new()
                .with("reason", GAME_STATE_THUNDER_LEVEL)
                .with("gameMode", world.thunder_state),
        );
    }

    // Not part of the vanilla login, resyncs anything that drifted above
    seq.push(
        "game_state_change",
        Fields::new()
            .with("reason", GAME_STATE_CHANGE_GAMEMODE)
            .with("gameMode", player.gamemode),
    );
    seq.push("update_health", health);

    Ok(seq.packets)
}

fn velocity(fields: Fields, velocity: Vec3) -> Fields {
    fields
        .with("velocityX", velocity.x)
        .with("velocityY", velocity.y)
        .with("velocityZ", velocity.z)
}

fn spawn_entity(seq: &mut Sequence<'_>, entity: &EntitySnapshot) {
    let uuid = entity.uuid.map(|u| u.to_string()).unwrap_or_default();
    match &entity.kind {
        EntityKind::Orb { count } => seq.push(
            "spawn_entity_experience_orb",
            xyz(entity.position)
                .with("entityId", entity.id)
                .with("count", *count),
        ),
        EntityKind::Mob => {
            let spawn = xyz(entity.position)
                .with("entityId", entity.id)
                .with("entityUUID", uuid)
                .with("type", entity.type_id)
                .with("yaw", yaw_to_angle(entity.yaw))
                .with("pitch", pitch_to_angle(entity.pitch))
                .with("headPitch", pitch_to_angle(entity.head_pitch))
                .with("metadata", entity.metadata.clone());
            seq.push("spawn_entity_living", velocity(spawn, entity.velocity));
            for (slot, item) in entity.equipment.iter().enumerate() {
                if let Some(item) = item {
                    seq.push(
                        "entity_equipment",
                        Fields::new()
                            .with("entityId", entity.id)
                            .with("slot", slot as i64)
                            .with("item", item.clone()),
                    );
                }
            }
        }
        EntityKind::Object { object_data } => {
            let spawn = xyz(entity.position)
                .with("entityId", entity.id)
                .with("objectUUID", uuid)
                .with("type", entity.type_id)
                .with("yaw", yaw_to_angle(entity.yaw))
                .with("pitch", pitch_to_angle(entity.pitch))
                .with("objectData", *object_data);
            seq.push("spawn_entity", velocity(spawn, entity.velocity));
        }
        EntityKind::Player | EntityKind::Other => {}
    }

    if !entity.metadata.is_empty() {
        seq.push(
            "entity_metadata",
            Fields::new()
                .with("entityId", entity.id)
                .with("metadata", entity.metadata.clone()),
        );
    }
}
