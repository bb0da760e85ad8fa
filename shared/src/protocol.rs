use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::appearance::{Appearance, HexColor};

/// Protocol version - increment when making breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Connection identifier assigned by the server.
pub type ConnId = u32;

// === Server -> Client ===

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMsg {
    AuthAck(AuthAckMsg),
    Init(InitMsg),
    PlayerJoined(PlayerWire),
    PlayerLeft(IdMsg),
    PlayerMoved(PlayerMovedMsg),
    InteractableUpdated(InteractableWire),
    Chat(ChatMsg),
    CustomizeAck(CustomizeAckMsg),
    PlayerCustomized(PlayerCustomizedMsg),
    PlayerEmote(PlayerEmoteMsg),
    VoicePeers(VoicePeersMsg),
    VoicePeerJoined(IdMsg),
    VoicePeerLeft(IdMsg),
    VoiceOffer(VoiceRelayMsg),
    VoiceAnswer(VoiceRelayMsg),
    VoiceIce(VoiceRelayMsg),
    SessionEnded(SessionEndedMsg),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
#[serde(rename_all = "lowercase")]
pub enum AuthAction {
    Register,
    Login,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
pub struct AuthAckMsg {
    pub action: AuthAction,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
#[serde(rename_all = "camelCase")]
pub struct InitMsg {
    pub protocol_version: u32,
    pub id: ConnId,
    pub player_data: PlayerWire,
    /// Everyone else currently in the world
    pub players: Vec<PlayerWire>,
    pub world_limit: f64,
    pub interactables: Vec<InteractableWire>,
}

/// Full public snapshot of a player, sent on join only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
pub struct PlayerWire {
    pub id: ConnId,
    pub name: String,
    pub color: HexColor,
    pub appearance: Appearance,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
pub struct IdMsg {
    pub id: ConnId,
}

/// Steady-state movement delta. Never carries appearance or name.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
#[serde(rename_all = "camelCase")]
pub struct PlayerMovedMsg {
    pub id: ConnId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
    pub is_swimming: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
#[serde(rename_all = "camelCase")]
pub struct InteractableWire {
    pub id: String,
    pub x: f64,
    pub z: f64,
    pub active: bool,
    pub last_actor_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
#[serde(rename_all = "camelCase")]
pub struct ChatMsg {
    /// `None` for system lines
    pub from_id: Option<ConnId>,
    pub from_name: String,
    pub text: String,
    /// Unix epoch milliseconds
    pub sent_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
pub struct CustomizeAckMsg {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<HexColor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appearance: Option<Appearance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
pub struct PlayerCustomizedMsg {
    pub id: ConnId,
    pub name: String,
    pub color: HexColor,
    pub appearance: Appearance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
#[serde(rename_all = "lowercase")]
pub enum Emote {
    Wave,
    Dance,
    Cheer,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
#[serde(rename_all = "camelCase")]
pub struct PlayerEmoteMsg {
    pub id: ConnId,
    pub emote: Emote,
    pub sent_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
pub struct VoicePeersMsg {
    pub peers: Vec<ConnId>,
}

/// Signalling payload forwarded verbatim between two peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
pub struct VoiceRelayMsg {
    pub from: ConnId,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
pub struct SessionEndedMsg {
    pub reason: String,
}

// === Client -> Server ===
//
// Client payloads are untrusted. Scalar fields use lenient decoders so a
// wrongly typed field degrades to `None` instead of rejecting the frame.

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMsg {
    Register(CredentialsCmd),
    Login(CredentialsCmd),
    Logout,
    Move(MoveCmd),
    Interact(InteractCmd),
    Chat(ChatCmd),
    Customize(CustomizeCmd),
    Emote(EmoteCmd),
    Save(SaveCmd),
    VoiceJoin,
    VoiceLeave,
    VoiceOffer(VoiceSignalCmd),
    VoiceAnswer(VoiceSignalCmd),
    VoiceIce(VoiceSignalCmd),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
pub struct CredentialsCmd {
    #[serde(default, deserialize_with = "lenient::string")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
#[serde(rename_all = "camelCase")]
pub struct MoveCmd {
    #[serde(default, deserialize_with = "lenient::number")]
    pub x: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub y: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub z: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub yaw: Option<f64>,
    #[serde(default, deserialize_with = "lenient::truthy")]
    pub is_swimming: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
pub struct InteractCmd {
    #[serde(default, deserialize_with = "lenient::string")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
pub struct ChatCmd {
    #[serde(default, deserialize_with = "lenient::string")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
pub struct CustomizeCmd {
    #[serde(default, deserialize_with = "lenient::string")]
    pub name: Option<String>,
    /// Sanitised field by field on the server
    #[serde(default)]
    pub appearance: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
pub struct EmoteCmd {
    #[serde(default, deserialize_with = "lenient::string")]
    pub emote: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
pub struct SaveCmd {
    #[serde(default, deserialize_with = "lenient::number")]
    pub x: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub y: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub z: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
pub struct VoiceSignalCmd {
    #[serde(default, deserialize_with = "lenient::conn_id")]
    pub to: Option<ConnId>,
    #[serde(default)]
    pub payload: Value,
}

impl Emote {
    pub fn parse(raw: &str) -> Option<Self> {
        Self::deserialize(Value::String(raw.to_string())).ok()
    }
}

/// Coercing field decoders for untrusted client input.
pub mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// Finite number, or a string holding one.
    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        let v = Value::deserialize(d)?;
        let n = match &v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        Ok(n.filter(|n| n.is_finite()))
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        match Value::deserialize(d)? {
            Value::String(s) => Ok(Some(s)),
            _ => Ok(None),
        }
    }

    /// JavaScript-style truthiness
    pub fn truthy<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Null => false,
            Value::Bool(b) => b,
            Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        })
    }

    pub fn conn_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }
}
