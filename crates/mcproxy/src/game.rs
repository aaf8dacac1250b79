//! Read-only view of the proxy's own game client
//!
//! The world model (entities, chunk storage, inventory, player list) lives
//! outside this crate. The hub only needs a consistent snapshot for catch-up
//! and a few write-backs when a linked client moves the bot around.

use mcproxy_protocol::FieldValue;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::chunk::ChunkColumn;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Health {
    pub health: f32,
    pub food: i32,
    pub saturation: f32,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            health: 20.0,
            food: 20,
            saturation: 5.0,
        }
    }
}

/// The bot's own player entity. Angles are radians in the bot's convention.
#[derive(Debug, Clone, PartialEq)]
pub struct SelfPlayer {
    pub entity_id: i32,
    pub uuid: Uuid,
    pub position: Vec3,
    pub yaw: f64,
    pub pitch: f64,
    pub on_ground: bool,
    pub quick_bar_slot: u8,
    pub gamemode: i32,
    pub physics_enabled: bool,
    pub health: Health,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    Orb { count: i32 },
    Mob,
    Object { object_data: i32 },
    Player,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    pub id: i32,
    pub uuid: Option<Uuid>,
    pub kind: EntityKind,
    pub type_id: i32,
    pub position: Vec3,
    pub velocity: Vec3,
    pub yaw: f64,
    pub pitch: f64,
    pub head_pitch: f64,
    pub head_yaw: Option<f64>,
    /// Equipment slots in protocol order, already in wire item form
    pub equipment: Vec<Option<FieldValue>>,
    /// Raw entity metadata entries as last received
    pub metadata: Vec<FieldValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerInfo {
    pub uuid: Uuid,
    pub name: String,
    pub gamemode: i32,
    pub ping: i32,
    pub entity: Option<EntitySnapshot>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorldInfo {
    pub age: i64,
    pub time: i64,
    pub difficulty: i32,
    pub rain_state: f32,
    pub thunder_state: f32,
    pub motd: String,
    pub enforces_secure_chat: bool,
}

impl Default for WorldInfo {
    fn default() -> Self {
        Self {
            age: 0,
            time: 0,
            difficulty: 2,
            rain_state: 0.0,
            thunder_state: 0.0,
            motd: r#"{"text":""}"#.to_string(),
            enforces_secure_chat: false,
        }
    }
}

/// Everything catch-up needs, captured at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct GameSnapshot {
    pub player: SelfPlayer,
    pub world: WorldInfo,
    pub players: Vec<PlayerInfo>,
    /// Non-player entities. Players are spawned from `players`.
    pub entities: Vec<EntitySnapshot>,
    pub columns: Vec<ChunkColumn>,
    /// Inventory slots in wire item form
    pub inventory: Vec<FieldValue>,
}

/// Position and look update coming from a linked client.
/// Angles are already converted to the bot's radian convention.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Movement {
    pub position: Option<Vec3>,
    pub look: Option<(f64, f64)>,
    pub on_ground: Option<bool>,
}

pub trait GameState: Send + Sync {
    /// `None` until the bot has spawned
    fn snapshot(&self) -> Option<GameSnapshot>;

    /// The bot's own player without cloning the rest of the world
    fn player(&self) -> Option<SelfPlayer>;

    fn set_physics_enabled(&self, enabled: bool);

    fn apply_movement(&self, movement: Movement);

    fn set_quick_bar_slot(&self, slot: u8);
}

/// In-memory [`GameState`] fed by whoever owns the game client
#[derive(Debug, Default)]
pub struct SharedGameState {
    inner: RwLock<Option<GameSnapshot>>,
}

impl SharedGameState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawned(snapshot: GameSnapshot) -> Self {
        Self {
            inner: RwLock::new(Some(snapshot)),
        }
    }

    pub fn replace(&self, snapshot: Option<GameSnapshot>) {
        *self.inner.write() = snapshot;
    }

    /// Runs `f` on the current snapshot, if any
    pub fn update<F: FnOnce(&mut GameSnapshot)>(&self, f: F) {
        if let Some(snapshot) = self.inner.write().as_mut() {
            f(snapshot);
        }
    }
}

impl GameState for SharedGameState {
    fn snapshot(&self) -> Option<GameSnapshot> {
        self.inner.read().clone()
    }

    fn player(&self) -> Option<SelfPlayer> {
        self.inner.read().as_ref().map(|s| s.player.clone())
    }

    fn set_physics_enabled(&self, enabled: bool) {
        self.update(|s| s.player.physics_enabled = enabled);
    }

    fn apply_movement(&self, movement: Movement) {
        self.update(|s| {
            if let Some(position) = movement.position {
                s.player.position = position;
            }
            if let Some((yaw, pitch)) = movement.look {
                s.player.yaw = yaw;
                s.player.pitch = pitch;
            }
            if let Some(on_ground) = movement.on_ground {
                s.player.on_ground = on_ground;
            }
        });
    }

    fn set_quick_bar_slot(&self, slot: u8) {
        self.update(|s| s.player.quick_bar_slot = slot);
    }
}
