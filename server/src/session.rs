use crate::profiles::Profile;
use island_shared::appearance::{Appearance, HexColor};
use island_shared::config::WorldConfig;
use island_shared::protocol::{ConnId, PlayerMovedMsg, PlayerWire};
use island_shared::world::{clamp_height, clamp_to_playable};
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// Live, in-memory player state for one authenticated connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: ConnId,
    pub profile_id: String,
    pub name: String,
    pub appearance: Appearance,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
    pub is_swimming: bool,
    /// Never moves backwards
    last_move_accepted_at: Option<Instant>,
}

/// Uniform random point inside a disk around the origin.
pub fn random_spawn(radius: f64, rng: &mut impl Rng) -> (f64, f64) {
    let angle = rng.gen::<f64>() * std::f64::consts::TAU;
    let r = rng.gen::<f64>().sqrt() * radius;
    (angle.cos() * r, angle.sin() * r)
}

impl Session {
    /// Spawn at the profile's last position (re-clamped, since the world may
    /// have changed shape) or at a random point on the main island.
    pub fn spawn(
        id: ConnId,
        profile_id: &str,
        profile: Option<&Profile>,
        fallback_name: &str,
        world: &WorldConfig,
        rng: &mut impl Rng,
    ) -> Self {
        let (x, y, z) = match profile.and_then(|p| p.last_position) {
            Some([x, y, z]) => {
                let (x, z) = clamp_to_playable(world, x, z);
                (x, clamp_height(world, y), z)
            }
            None => {
                let (x, z) = random_spawn(world.spawn_radius, rng);
                (x, world.island_surface_y, z)
            }
        };

        let name = profile
            .map(|p| p.display_name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| fallback_name.to_string());
        let appearance = profile.map(|p| p.appearance.clone()).unwrap_or_default();

        Self {
            id,
            profile_id: profile_id.to_string(),
            name,
            appearance,
            x,
            y,
            z,
            yaw: 0.0,
            is_swimming: false,
            last_move_accepted_at: None,
        }
    }

    pub fn color(&self) -> &HexColor {
        &self.appearance.shirt
    }

    /// Rate limiter for movement. Accepts and records `now` only if at least
    /// `min_gap` has passed since the last accepted move.
    pub fn try_accept_move(&mut self, now: Instant, min_gap: Duration) -> bool {
        if let Some(last) = self.last_move_accepted_at {
            if now.saturating_duration_since(last) < min_gap {
                return false;
            }
            self.last_move_accepted_at = Some(last.max(now));
        } else {
            self.last_move_accepted_at = Some(now);
        }
        true
    }

    pub fn last_move_accepted_at(&self) -> Option<Instant> {
        self.last_move_accepted_at
    }

    pub fn to_wire(&self) -> PlayerWire {
        PlayerWire {
            id: self.id,
            name: self.name.clone(),
            color: self.color().clone(),
            appearance: self.appearance.clone(),
            x: self.x,
            y: self.y,
            z: self.z,
            yaw: self.yaw,
        }
    }

    pub fn moved_msg(&self) -> PlayerMovedMsg {
        PlayerMovedMsg {
            id: self.id,
            x: self.x,
            y: self.y,
            z: self.z,
            yaw: self.yaw,
            is_swimming: self.is_swimming,
        }
    }
}
