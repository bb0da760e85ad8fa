/// Island world layout. Shared so the client can predict the same clamping
/// the server applies.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export, export_to = "../../public/generated/")]
#[serde(rename_all = "camelCase")]
pub struct WorldConfig {
    /// Nominal island radius, used by the client for terrain scale
    pub world_limit: f64,
    /// Height of the island surface, used for fresh spawns
    pub island_surface_y: f64,
    /// Radius of the walkable main island disk
    pub main_radius: f64,
    pub lighthouse_center: [f64; 2],
    pub lighthouse_radius: f64,
    /// Center of the lighthouse interior. Lives far away from the island and is
    /// only reachable through the client-side door teleport.
    pub interior_center: [f64; 2],
    pub interior_radius: f64,
    /// Inner edge of the open water ring around the main island
    pub swim_min_radius: f64,
    /// Outer edge of the open water ring
    pub swim_max_radius: f64,
    pub swim_min_y: f64,
    pub max_y: f64,
    /// Coarse per-axis bound applied before the region clamp. Must contain
    /// every region.
    pub playable_bound: f64,
    pub beacon_position: [f64; 2],
    /// Maximum horizontal distance for beacon interaction
    pub interact_range: f64,
    /// Fresh profiles spawn uniformly inside this radius
    pub spawn_radius: f64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        let world_limit = 40.0;
        Self {
            world_limit,
            island_surface_y: 1.35,
            main_radius: world_limit * 1.14,
            lighthouse_center: [world_limit * 1.65, -world_limit * 1.85],
            lighthouse_radius: 11.7,
            interior_center: [-130.0, 210.0],
            interior_radius: 11.2,
            swim_min_radius: world_limit + 0.6,
            swim_max_radius: world_limit * 3.9,
            swim_min_y: -0.15,
            max_y: 30.0,
            playable_bound: 260.0,
            beacon_position: [0.0, 0.0],
            interact_range: 4.5,
            spawn_radius: world_limit * 0.65,
        }
    }
}

impl WorldConfig {
    /// Smallest per-axis bound that still contains every region.
    pub fn region_extent(&self) -> f64 {
        let disk = |center: [f64; 2], radius: f64| center[0].abs().max(center[1].abs()) + radius;
        self.main_radius
            .max(self.swim_max_radius)
            .max(disk(self.lighthouse_center, self.lighthouse_radius))
            .max(disk(self.interior_center, self.interior_radius))
    }

    pub fn validate(&self) -> Result<(), String> {
        let radii = [
            ("main_radius", self.main_radius),
            ("lighthouse_radius", self.lighthouse_radius),
            ("interior_radius", self.interior_radius),
            ("swim_min_radius", self.swim_min_radius),
        ];
        for (name, r) in radii {
            if !r.is_finite() || r <= 0.0 {
                return Err(format!("{} must be finite and > 0", name));
            }
        }
        if !self.swim_max_radius.is_finite() || self.swim_max_radius < self.swim_min_radius {
            return Err("swim_max_radius must be finite and >= swim_min_radius".to_string());
        }
        if !self.max_y.is_finite() || self.max_y < self.swim_min_y {
            return Err("max_y must be finite and >= swim_min_y".to_string());
        }
        if !self.playable_bound.is_finite() || self.playable_bound < self.region_extent() {
            return Err(format!(
                "playable_bound must be finite and >= {} to contain every region",
                self.region_extent()
            ));
        }
        if !self.interact_range.is_finite() || self.interact_range < 0.0 {
            return Err("interact_range must be finite and >= 0".to_string());
        }
        if !self.spawn_radius.is_finite() || self.spawn_radius > self.main_radius {
            return Err("spawn_radius must be finite and inside the main island".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_world_config_is_valid() {
        assert!(WorldConfig::default().validate().is_ok());
    }

    #[test]
    fn inverted_swim_ring_invalid() {
        let config = WorldConfig {
            swim_min_radius: 100.0,
            swim_max_radius: 50.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_bound_contains_every_region() {
        let config = WorldConfig::default();
        assert!(config.playable_bound >= config.region_extent());
        // Interior is the farthest region: 210 + 11.2
        assert!((config.region_extent() - 221.2).abs() < 1e-9);
    }

    #[test]
    fn bound_that_cuts_off_the_interior_invalid() {
        let config = WorldConfig {
            playable_bound: 164.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn spawn_outside_main_island_invalid() {
        let config = WorldConfig {
            spawn_radius: 200.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
