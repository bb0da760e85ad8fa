/// Playable-area geometry on the horizontal (x, z) plane.
///
/// The world is a union of disks and one ring. A candidate position outside
/// every region is projected onto the closest region edge, so a clamp only ever
/// nudges a player instead of relocating them.
use crate::config::WorldConfig;

/// Slack for boundary points produced by a previous projection.
const EDGE_EPSILON: f64 = 1e-9;

/// One legal area of the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Region {
    Disk { center: [f64; 2], radius: f64 },
    Ring { min_radius: f64, max_radius: f64 },
}

impl Region {
    pub fn contains(&self, x: f64, z: f64) -> bool {
        match *self {
            Region::Disk { center, radius } => {
                distance(x, z, center[0], center[1]) <= radius + EDGE_EPSILON
            }
            Region::Ring {
                min_radius,
                max_radius,
            } => {
                let r = x.hypot(z);
                r >= min_radius - EDGE_EPSILON && r <= max_radius + EDGE_EPSILON
            }
        }
    }

    /// Closest point of this region's boundary to (x, z).
    pub fn nearest_edge(&self, x: f64, z: f64) -> (f64, f64) {
        match *self {
            Region::Disk { center, radius } => project_radial(x, z, center, radius),
            Region::Ring {
                min_radius,
                max_radius,
            } => {
                let target = if x.hypot(z) < min_radius {
                    min_radius
                } else {
                    max_radius
                };
                project_radial(x, z, [0.0, 0.0], target)
            }
        }
    }
}

/// Ordered region set. Order doubles as tie-break priority.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayableArea {
    regions: [Region; 4],
}

impl PlayableArea {
    pub fn new(config: &WorldConfig) -> Self {
        Self {
            regions: [
                Region::Disk {
                    center: [0.0, 0.0],
                    radius: config.main_radius,
                },
                Region::Disk {
                    center: config.lighthouse_center,
                    radius: config.lighthouse_radius,
                },
                Region::Disk {
                    center: config.interior_center,
                    radius: config.interior_radius,
                },
                Region::Ring {
                    min_radius: config.swim_min_radius,
                    max_radius: config.swim_max_radius,
                },
            ],
        }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn contains(&self, x: f64, z: f64) -> bool {
        self.regions.iter().any(|r| r.contains(x, z))
    }

    /// Snap (x, z) to the nearest legal point. Legal input is returned as-is.
    pub fn clamp(&self, x: f64, z: f64) -> (f64, f64) {
        if self.contains(x, z) {
            return (x, z);
        }

        let mut best = self.regions[0].nearest_edge(x, z);
        let mut best_dist = distance(x, z, best.0, best.1);
        for region in &self.regions[1..] {
            let candidate = region.nearest_edge(x, z);
            let d = distance(x, z, candidate.0, candidate.1);
            // Strict comparison keeps the earlier region on ties
            if d < best_dist {
                best = candidate;
                best_dist = d;
            }
        }
        best
    }
}

/// Full horizontal clamp applied to untrusted input: per-axis bound, then
/// region snap.
pub fn clamp_to_playable(config: &WorldConfig, x: f64, z: f64) -> (f64, f64) {
    let bound = config.playable_bound;
    PlayableArea::new(config).clamp(x.clamp(-bound, bound), z.clamp(-bound, bound))
}

/// Vertical coordinate is trusted within a fixed band only.
pub fn clamp_height(config: &WorldConfig, y: f64) -> f64 {
    y.clamp(config.swim_min_y, config.max_y)
}

/// Horizontal distance between two points
pub fn distance(ax: f64, az: f64, bx: f64, bz: f64) -> f64 {
    (ax - bx).hypot(az - bz)
}

fn project_radial(x: f64, z: f64, center: [f64; 2], radius: f64) -> (f64, f64) {
    let dx = x - center[0];
    let dz = z - center[1];
    let len = dx.hypot(dz);
    // Any direction is equally close from the exact center
    let (ux, uz) = if len < 1e-12 {
        (1.0, 0.0)
    } else {
        (dx / len, dz / len)
    };
    (center[0] + ux * radius, center[1] + uz * radius)
}
