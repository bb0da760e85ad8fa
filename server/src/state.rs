use crate::config::ServerConfig;
use crate::profiles::ProfileStore;
use crate::session::Session;
use island_shared::appearance::{sanitize_appearance, sanitize_name};
use island_shared::config::WorldConfig;
use island_shared::protocol::{
    ChatCmd, ChatMsg, ClientMsg, ConnId, CustomizeAckMsg, CustomizeCmd, Emote, EmoteCmd, IdMsg,
    InitMsg, InteractCmd, InteractableWire, MoveCmd, PlayerCustomizedMsg, PlayerEmoteMsg, SaveCmd,
    ServerMsg, SessionEndedMsg, VoicePeersMsg, VoiceRelayMsg, VoiceSignalCmd, PROTOCOL_VERSION,
};
use island_shared::world::{clamp_height, clamp_to_playable, distance};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

pub const BEACON_ID: &str = "beacon";
const SYSTEM_NAME: &str = "System";
const EVICTED_REASON: &str = "Signed in from another connection.";

/// Who a server message is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    All,
    AllExcept(ConnId),
    Only(ConnId),
    Many(Vec<ConnId>),
}

impl Audience {
    pub fn includes(&self, id: ConnId) -> bool {
        match self {
            Audience::All => true,
            Audience::AllExcept(excluded) => *excluded != id,
            Audience::Only(target) => *target == id,
            Audience::Many(targets) => targets.contains(&id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Outbound {
    pub audience: Audience,
    pub msg: ServerMsg,
}

impl Outbound {
    fn new(audience: Audience, msg: ServerMsg) -> Self {
        Self { audience, msg }
    }
}

/// Which voice signal is being relayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    Ice,
}

/// The single shared world toggle.
#[derive(Debug, Clone, PartialEq)]
pub struct Beacon {
    pub x: f64,
    pub z: f64,
    pub active: bool,
    pub last_actor_name: Option<String>,
}

impl Beacon {
    pub fn to_wire(&self) -> InteractableWire {
        InteractableWire {
            id: BEACON_ID.to_string(),
            x: self.x,
            z: self.z,
            active: self.active,
            last_actor_name: self.last_actor_name.clone(),
        }
    }
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn system_chat(text: String) -> ServerMsg {
    ServerMsg::Chat(ChatMsg {
        from_id: None,
        from_name: SYSTEM_NAME.to_string(),
        text,
        sent_at: unix_millis(),
    })
}

/// Authoritative world state, owned by the game loop task.
///
/// Every handler takes the sender's connection id, treats a missing session as
/// a no-op, and returns the messages to fan out.
pub struct WorldState {
    sessions: HashMap<ConnId, Session>,
    profiles: ProfileStore,
    beacon: Beacon,
    voice: BTreeSet<ConnId>,
    world: WorldConfig,
    move_rate: Duration,
    chat_max_len: usize,
    name_max_len: usize,
    rng: ChaCha8Rng,
    profiles_dirty: bool,
}

impl WorldState {
    pub fn new(config: &ServerConfig, profiles: ProfileStore) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            sessions: HashMap::new(),
            profiles,
            beacon: Beacon {
                x: config.world.beacon_position[0],
                z: config.world.beacon_position[1],
                active: false,
                last_actor_name: None,
            },
            voice: BTreeSet::new(),
            world: config.world,
            move_rate: config.move_rate(),
            chat_max_len: config.chat_max_len,
            name_max_len: config.name_max_len,
            rng,
            profiles_dirty: false,
        }
    }

    pub fn session(&self, id: ConnId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn beacon(&self) -> &Beacon {
        &self.beacon
    }

    pub fn voice_participants(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.voice.iter().copied()
    }

    /// Returns and clears the "profiles changed since last write" flag.
    pub fn take_profiles_dirty(&mut self) -> bool {
        std::mem::take(&mut self.profiles_dirty)
    }

    /// Create the session for a freshly authenticated connection.
    ///
    /// A new account gets a starter profile. If the profile is already live on
    /// another connection, that older session is ended first so its latest
    /// position carries over.
    pub fn spawn(
        &mut self,
        id: ConnId,
        profile_id: &str,
        username: &str,
        provision: bool,
    ) -> (InitMsg, Vec<Outbound>) {
        let mut out = self.remove_session(id);

        let evicted: Vec<ConnId> = self
            .sessions
            .values()
            .filter(|s| s.profile_id == profile_id)
            .map(|s| s.id)
            .collect();
        for old in evicted {
            tracing::info!("Evicting connection {} (profile {} signed in again)", old, profile_id);
            out.extend(self.remove_session(old));
            out.push(Outbound::new(
                Audience::Only(old),
                ServerMsg::SessionEnded(SessionEndedMsg {
                    reason: EVICTED_REASON.to_string(),
                }),
            ));
        }

        if provision && self.profiles.provision(profile_id, username, &mut self.rng) {
            self.profiles_dirty = true;
        }

        let session = Session::spawn(
            id,
            profile_id,
            self.profiles.load(profile_id),
            username,
            &self.world,
            &mut self.rng,
        );
        let wire = session.to_wire();
        self.sessions.insert(id, session);

        let init = InitMsg {
            protocol_version: PROTOCOL_VERSION,
            id,
            player_data: wire.clone(),
            players: self
                .sessions
                .values()
                .filter(|s| s.id != id)
                .map(Session::to_wire)
                .collect(),
            world_limit: self.world.world_limit,
            interactables: vec![self.beacon.to_wire()],
        };
        out.push(Outbound::new(
            Audience::AllExcept(id),
            ServerMsg::PlayerJoined(wire),
        ));
        (init, out)
    }

    /// Flush and drop a session (logout, disconnect, eviction).
    pub fn remove_session(&mut self, id: ConnId) -> Vec<Outbound> {
        let Some(session) = self.sessions.remove(&id) else {
            return Vec::new();
        };
        self.profiles.upsert_from_session(&session);
        self.profiles_dirty = true;

        let mut out = self.voice_leave(id);
        out.push(Outbound::new(
            Audience::AllExcept(id),
            ServerMsg::PlayerLeft(IdMsg { id }),
        ));
        out
    }

    /// Copy every live session into its profile. Returns how many were copied.
    pub fn flush_all_sessions(&mut self) -> usize {
        for session in self.sessions.values() {
            self.profiles.upsert_from_session(session);
        }
        let n = self.sessions.len();
        if n > 0 {
            self.profiles_dirty = true;
        }
        n
    }

    /// Dispatch one decoded client message.
    pub fn handle(&mut self, id: ConnId, msg: ClientMsg, now: Instant) -> Vec<Outbound> {
        match msg {
            // Authentication is resolved by the transport before it gets here
            ClientMsg::Register(_) | ClientMsg::Login(_) => Vec::new(),
            ClientMsg::Logout => self.remove_session(id),
            ClientMsg::Move(cmd) => self.handle_move(id, cmd, now).into_iter().collect(),
            ClientMsg::Interact(cmd) => self.handle_interact(id, cmd),
            ClientMsg::Chat(cmd) => self.handle_chat(id, cmd).into_iter().collect(),
            ClientMsg::Customize(cmd) => self.handle_customize(id, cmd),
            ClientMsg::Emote(cmd) => self.handle_emote(id, cmd).into_iter().collect(),
            ClientMsg::Save(cmd) => {
                self.handle_save(id, cmd);
                Vec::new()
            }
            ClientMsg::VoiceJoin => self.voice_join(id),
            ClientMsg::VoiceLeave => self.voice_leave(id),
            ClientMsg::VoiceOffer(cmd) => {
                self.voice_relay(id, SignalKind::Offer, cmd).into_iter().collect()
            }
            ClientMsg::VoiceAnswer(cmd) => {
                self.voice_relay(id, SignalKind::Answer, cmd).into_iter().collect()
            }
            ClientMsg::VoiceIce(cmd) => {
                self.voice_relay(id, SignalKind::Ice, cmd).into_iter().collect()
            }
        }
    }

    /// Rate-limited, clamped movement. Broadcasts position only.
    pub fn handle_move(&mut self, id: ConnId, cmd: MoveCmd, now: Instant) -> Option<Outbound> {
        let session = self.sessions.get_mut(&id)?;
        if !session.try_accept_move(now, self.move_rate) {
            return None;
        }

        let (x, z) = clamp_to_playable(
            &self.world,
            cmd.x.unwrap_or(session.x),
            cmd.z.unwrap_or(session.z),
        );
        session.x = x;
        session.z = z;
        session.y = clamp_height(&self.world, cmd.y.unwrap_or(session.y));
        if let Some(yaw) = cmd.yaw {
            session.yaw = yaw;
        }
        session.is_swimming = cmd.is_swimming;

        Some(Outbound::new(
            Audience::AllExcept(id),
            ServerMsg::PlayerMoved(session.moved_msg()),
        ))
    }

    pub fn handle_interact(&mut self, id: ConnId, cmd: InteractCmd) -> Vec<Outbound> {
        let Some(actor) = self.sessions.get(&id) else {
            return Vec::new();
        };
        if cmd.id.as_deref() != Some(BEACON_ID) {
            return Vec::new();
        }
        if distance(actor.x, actor.z, self.beacon.x, self.beacon.z) > self.world.interact_range {
            return Vec::new();
        }

        self.beacon.active = !self.beacon.active;
        self.beacon.last_actor_name = Some(actor.name.clone());
        let line = if self.beacon.active {
            format!("{} activated the island beacon.", actor.name)
        } else {
            format!("{} cooled the island beacon.", actor.name)
        };
        vec![
            Outbound::new(
                Audience::All,
                ServerMsg::InteractableUpdated(self.beacon.to_wire()),
            ),
            Outbound::new(Audience::All, system_chat(line)),
        ]
    }

    pub fn handle_chat(&mut self, id: ConnId, cmd: ChatCmd) -> Option<Outbound> {
        let sender = self.sessions.get(&id)?;
        let text: String = cmd
            .text
            .as_deref()
            .unwrap_or("")
            .trim()
            .chars()
            .take(self.chat_max_len)
            .collect();
        if text.is_empty() {
            return None;
        }
        Some(Outbound::new(
            Audience::All,
            ServerMsg::Chat(ChatMsg {
                from_id: Some(id),
                from_name: sender.name.clone(),
                text,
                sent_at: unix_millis(),
            }),
        ))
    }

    pub fn handle_customize(&mut self, id: ConnId, cmd: CustomizeCmd) -> Vec<Outbound> {
        let Some(session) = self.sessions.get_mut(&id) else {
            return vec![Outbound::new(
                Audience::Only(id),
                ServerMsg::CustomizeAck(CustomizeAckMsg {
                    ok: false,
                    name: None,
                    color: None,
                    appearance: None,
                }),
            )];
        };

        let prev_name = session.name.clone();
        session.name = sanitize_name(cmd.name.as_deref(), self.name_max_len, &prev_name);
        session.appearance = sanitize_appearance(&cmd.appearance, &session.appearance);

        self.profiles.upsert_from_session(session);
        self.profiles_dirty = true;

        let mut out = vec![
            Outbound::new(
                Audience::All,
                ServerMsg::PlayerCustomized(PlayerCustomizedMsg {
                    id,
                    name: session.name.clone(),
                    color: session.color().clone(),
                    appearance: session.appearance.clone(),
                }),
            ),
            Outbound::new(
                Audience::Only(id),
                ServerMsg::CustomizeAck(CustomizeAckMsg {
                    ok: true,
                    name: Some(session.name.clone()),
                    color: Some(session.color().clone()),
                    appearance: Some(session.appearance.clone()),
                }),
            ),
        ];
        if prev_name != session.name {
            out.push(Outbound::new(
                Audience::All,
                system_chat(format!("{} is now known as {}.", prev_name, session.name)),
            ));
        }
        out
    }

    /// Cosmetic only. The sender plays it locally, so it is not echoed back.
    pub fn handle_emote(&mut self, id: ConnId, cmd: EmoteCmd) -> Option<Outbound> {
        self.sessions.get(&id)?;
        let emote = cmd.emote.as_deref().and_then(Emote::parse)?;
        Some(Outbound::new(
            Audience::AllExcept(id),
            ServerMsg::PlayerEmote(PlayerEmoteMsg {
                id,
                emote,
                sent_at: unix_millis(),
            }),
        ))
    }

    /// Explicit save, with an optional position override held to the same
    /// bounds as movement.
    pub fn handle_save(&mut self, id: ConnId, cmd: SaveCmd) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if cmd.x.is_some() || cmd.z.is_some() {
            let (x, z) = clamp_to_playable(
                &self.world,
                cmd.x.unwrap_or(session.x),
                cmd.z.unwrap_or(session.z),
            );
            session.x = x;
            session.z = z;
        }
        if let Some(y) = cmd.y {
            session.y = clamp_height(&self.world, y);
        }
        self.profiles.upsert_from_session(session);
        self.profiles_dirty = true;
    }

    pub fn voice_join(&mut self, id: ConnId) -> Vec<Outbound> {
        if !self.sessions.contains_key(&id) {
            return Vec::new();
        }
        let others: Vec<ConnId> = self.voice.iter().copied().filter(|p| *p != id).collect();
        let newly_joined = self.voice.insert(id);

        let mut out = vec![Outbound::new(
            Audience::Only(id),
            ServerMsg::VoicePeers(VoicePeersMsg {
                peers: others.clone(),
            }),
        )];
        if newly_joined && !others.is_empty() {
            out.push(Outbound::new(
                Audience::Many(others),
                ServerMsg::VoicePeerJoined(IdMsg { id }),
            ));
        }
        out
    }

    pub fn voice_leave(&mut self, id: ConnId) -> Vec<Outbound> {
        if !self.voice.remove(&id) || self.voice.is_empty() {
            return Vec::new();
        }
        vec![Outbound::new(
            Audience::Many(self.voice.iter().copied().collect()),
            ServerMsg::VoicePeerLeft(IdMsg { id }),
        )]
    }

    /// Forward a signalling payload untouched. Both ends must be signed in.
    pub fn voice_relay(
        &mut self,
        id: ConnId,
        kind: SignalKind,
        cmd: VoiceSignalCmd,
    ) -> Option<Outbound> {
        let to = cmd.to?;
        if to == id
            || cmd.payload == Value::Null
            || !self.sessions.contains_key(&id)
            || !self.sessions.contains_key(&to)
        {
            return None;
        }
        let relay = VoiceRelayMsg {
            from: id,
            payload: cmd.payload,
        };
        let msg = match kind {
            SignalKind::Offer => ServerMsg::VoiceOffer(relay),
            SignalKind::Answer => ServerMsg::VoiceAnswer(relay),
            SignalKind::Ice => ServerMsg::VoiceIce(relay),
        };
        Some(Outbound::new(Audience::Only(to), msg))
    }
}
