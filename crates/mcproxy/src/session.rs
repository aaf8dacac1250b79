//! Server-asserted facts kept around to replay to late joiners

use std::f64::consts::PI;

use mcproxy_config::LogType;
use mcproxy_protocol::{FieldValue, Fields};
use tracing::debug;

use crate::conn::DownstreamClient;
use crate::game::{GameState, Movement, Vec3};

/// Side effect of a linked client's packet the hub has to announce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEffect {
    HeldItemSlot(u8),
}

/// Replayable session facts. Each raw packet is replaced wholesale, never
/// merged, so catch-up only ever replays a state the server really sent.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    raw_login: Option<Fields>,
    raw_commands: Option<Fields>,
    raw_tags: Option<Fields>,
    raw_recipes: Option<Fields>,
    raw_unlock_recipes: Option<Fields>,
    /// Dimension from the last login or respawn
    dimension: Option<FieldValue>,
    flying: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upstream packets [`observe_upstream`](Self::observe_upstream) cares about
    pub fn tracks_upstream(name: &str) -> bool {
        matches!(
            name,
            "login" | "declare_commands" | "tags" | "declare_recipes" | "unlock_recipes" | "respawn"
        )
    }

    /// Client packets [`apply_client_packet`](Self::apply_client_packet) cares about
    pub fn tracks_client(name: &str) -> bool {
        matches!(
            name,
            "position" | "position_look" | "look" | "held_item_slot" | "abilities" | "login"
        )
    }

    /// Passive update from an upstream packet. Returns whether anything
    /// was recorded.
    pub fn observe_upstream(&mut self, name: &str, fields: &Fields) -> bool {
        let slot = match name {
            "login" => {
                self.dimension = fields.get("dimension").cloned();
                &mut self.raw_login
            }
            "respawn" => {
                self.dimension = fields.get("dimension").cloned();
                return true;
            }
            "declare_commands" => &mut self.raw_commands,
            "tags" => &mut self.raw_tags,
            "declare_recipes" => &mut self.raw_recipes,
            "unlock_recipes" => &mut self.raw_unlock_recipes,
            _ => return false,
        };
        *slot = Some(fields.clone());
        debug!(
            log_type = LogType::Session.as_str(),
            "Recorded upstream {} packet", name
        );
        true
    }

    /// Records the flight bit of an `abilities` packet (0x02 is "flying").
    pub fn observe_abilities(&mut self, flags: i64) {
        self.flying = flags & 0b10 != 0;
    }

    /// Keeps the bot in step with what the linked client is doing.
    ///
    /// The first position packet a non-legacy client sends after being
    /// attached only echoes the server's initial teleport and is skipped.
    pub fn apply_client_packet(
        &mut self,
        name: &str,
        fields: &Fields,
        client: &DownstreamClient,
        game: &dyn GameState,
    ) -> Option<ClientEffect> {
        let is_position = matches!(name, "position" | "position_look");
        if is_position && !client.is_legacy() && client.position_packets_sent() == 0 {
            client.note_position_packet();
            debug!(
                log_type = LogType::Session.as_str(),
                client = %client.peer(),
                "Ignoring initial position echo"
            );
            return None;
        }
        if name == "login" {
            client.reset_position_packets();
        }

        match name {
            "position" => {
                game.apply_movement(Movement {
                    position: read_position(fields),
                    look: None,
                    on_ground: fields.get_bool("onGround"),
                });
                None
            }
            "position_look" | "look" => {
                let position = if name == "position_look" {
                    read_position(fields)
                } else {
                    None
                };
                game.apply_movement(Movement {
                    position,
                    look: read_look(fields),
                    on_ground: fields.get_bool("onGround"),
                });
                None
            }
            "held_item_slot" => {
                // Client to server uses slotId, server to client slot
                let slot = fields.get_i64("slotId")?;
                let slot = u8::try_from(slot).ok()?;
                game.set_quick_bar_slot(slot);
                Some(ClientEffect::HeldItemSlot(slot))
            }
            "abilities" => {
                self.observe_abilities(fields.get_i64("flags").unwrap_or(0));
                None
            }
            _ => None,
        }
    }

    pub fn raw_login(&self) -> Option<&Fields> {
        self.raw_login.as_ref()
    }

    pub fn raw_commands(&self) -> Option<&Fields> {
        self.raw_commands.as_ref()
    }

    pub fn raw_tags(&self) -> Option<&Fields> {
        self.raw_tags.as_ref()
    }

    pub fn raw_recipes(&self) -> Option<&Fields> {
        self.raw_recipes.as_ref()
    }

    pub fn raw_unlock_recipes(&self) -> Option<&Fields> {
        self.raw_unlock_recipes.as_ref()
    }

    pub fn is_flying(&self) -> bool {
        self.flying
    }

    /// Whether chunk sections of the current dimension carry sky light.
    /// Only the overworld does; unknown dimensions are assumed to.
    pub fn has_sky_light(&self) -> bool {
        match &self.dimension {
            Some(FieldValue::Int(id)) => *id == 0,
            Some(FieldValue::String(name)) => name.ends_with("overworld"),
            _ => true,
        }
    }
}

fn read_position(fields: &Fields) -> Option<Vec3> {
    Some(Vec3::new(
        fields.get_f64("x")?,
        fields.get_f64("y")?,
        fields.get_f64("z")?,
    ))
}

/// Protocol degrees to the bot's radians
fn read_look(fields: &Fields) -> Option<(f64, f64)> {
    let yaw = fields.get_f64("yaw")?;
    let pitch = fields.get_f64("pitch")?;
    Some((((180.0 - yaw) * PI) / 180.0, -(pitch * PI) / 180.0))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mcproxy_protocol::Version;
    use mcproxy_protocol::mock::RecordingSocket;

    use super::*;
    use crate::game::{SharedGameState, fixtures};

    fn client(version: Version) -> DownstreamClient {
        DownstreamClient::new(Arc::new(RecordingSocket::new("test", version)))
    }

    #[test]
    fn test_observe_replaces_wholesale() {
        let mut state = SessionState::new();
        assert!(state.observe_upstream("tags", &Fields::new().with("a", 1i32)));
        assert!(state.observe_upstream("tags", &Fields::new().with("b", 2i32)));
        let tags = state.raw_tags().unwrap();
        assert!(tags.get("a").is_none());
        assert_eq!(tags.get_i64("b"), Some(2));

        assert!(!state.observe_upstream("chat", &Fields::new()));
        assert!(state.raw_recipes().is_none());
        assert!(state.raw_unlock_recipes().is_none());
    }

    #[test]
    fn test_sky_light_follows_dimension() {
        let mut state = SessionState::new();
        assert!(state.has_sky_light());
        state.observe_upstream("login", &Fields::new().with("dimension", -1i32));
        assert!(!state.has_sky_light());
        state.observe_upstream("respawn", &Fields::new().with("dimension", 0i32));
        assert!(state.has_sky_light());
        state.observe_upstream("respawn", &Fields::new().with("dimension", "minecraft:the_end"));
        assert!(!state.has_sky_light());
        assert!(state.raw_login().is_some());
    }

    #[test]
    fn test_first_position_echo_is_ignored() {
        let game = SharedGameState::spawned(fixtures::snapshot());
        let mut state = SessionState::new();
        let modern = client(Version::V1_19_4);
        let packet = Fields::new()
            .with("x", 1.0)
            .with("y", 2.0)
            .with("z", 3.0)
            .with("onGround", false);

        state.apply_client_packet("position", &packet, &modern, &game);
        assert_eq!(modern.position_packets_sent(), 1);
        assert_eq!(game.player().unwrap().position, fixtures::self_player().position);

        state.apply_client_packet("position", &packet, &modern, &game);
        assert_eq!(game.player().unwrap().position, Vec3::new(1.0, 2.0, 3.0));
        assert!(!game.player().unwrap().on_ground);

        state.apply_client_packet("login", &Fields::new(), &modern, &game);
        assert_eq!(modern.position_packets_sent(), 0);
    }

    #[test]
    fn test_legacy_client_position_applies_immediately() {
        let game = SharedGameState::spawned(fixtures::snapshot());
        let mut state = SessionState::new();
        let legacy = client(Version::V1_12_2);
        let packet = Fields::new()
            .with("x", 5.0)
            .with("y", 70.0)
            .with("z", 5.0)
            .with("yaw", 90.0)
            .with("pitch", 45.0)
            .with("onGround", true);
        state.apply_client_packet("position_look", &packet, &legacy, &game);

        let player = game.player().unwrap();
        assert_eq!(player.position, Vec3::new(5.0, 70.0, 5.0));
        assert!((player.yaw - PI / 2.0).abs() < 1e-9);
        assert!((player.pitch + PI / 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_held_item_and_abilities() {
        let game = SharedGameState::spawned(fixtures::snapshot());
        let mut state = SessionState::new();
        let linked = client(Version::V1_19_4);

        let effect = state.apply_client_packet(
            "held_item_slot",
            &Fields::new().with("slotId", 7i32),
            &linked,
            &game,
        );
        assert_eq!(effect, Some(ClientEffect::HeldItemSlot(7)));
        assert_eq!(game.player().unwrap().quick_bar_slot, 7);

        state.apply_client_packet("abilities", &Fields::new().with("flags", 0b10), &linked, &game);
        assert!(state.is_flying());
        state.apply_client_packet("abilities", &Fields::new().with("flags", 0), &linked, &game);
        assert!(!state.is_flying());
    }
}
