//! Durable player profiles, independent of live connections.

use crate::error::StorageError;
use crate::persistence::read_table;
use crate::session::Session;
use island_shared::appearance::{
    sanitize_appearance, sanitize_color, sanitize_name, Appearance, HexColor,
};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub profile_id: String,
    pub display_name: String,
    pub appearance: Appearance,
    /// `None` until the player has been seen in the world
    pub last_position: Option<[f64; 3]>,
}

/// On-disk record. `color` mirrors `appearance.shirt`.
#[derive(Serialize)]
struct ProfileRecord<'a> {
    name: &'a str,
    color: &'a HexColor,
    appearance: &'a Appearance,
    x: Option<f64>,
    y: Option<f64>,
    z: Option<f64>,
}

/// Profile id for an account.
pub fn profile_id_for(username: &str) -> String {
    format!("acct-{}", username)
}

/// Lowercased id if it matches `^[a-z0-9-]{8,64}$`.
pub fn sanitize_profile_id(value: Option<&str>) -> Option<String> {
    let raw: String = value?.trim().to_lowercase().chars().take(64).collect();
    let valid = raw.len() >= 8
        && raw
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    valid.then_some(raw)
}

pub fn random_hex_color(rng: &mut impl Rng) -> HexColor {
    HexColor::from_rgb(rng.gen_range(0..0xff_ffff))
}

#[derive(Debug, Default)]
pub struct ProfileStore {
    profiles: HashMap<String, Profile>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load profiles from disk. Records that fail validation are dropped and
    /// behave as new; an unreadable file starts the store empty.
    pub fn open(path: &Path, name_max_len: usize, rng: &mut impl Rng) -> Self {
        let table = match read_table(path) {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!("Ignoring unreadable profiles file {}: {}", path.display(), e);
                Default::default()
            }
        };

        let total = table.len();
        let mut profiles = HashMap::new();
        for (key, record) in table {
            if let Some(profile) = Self::sanitize_record(&key, &record, name_max_len, rng) {
                profiles.insert(profile.profile_id.clone(), profile);
            }
        }
        if profiles.len() < total {
            tracing::warn!("Dropped {} invalid profile records", total - profiles.len());
        }
        tracing::info!("Loaded {} profiles", profiles.len());
        Self { profiles }
    }

    fn sanitize_record(
        key: &str,
        record: &Value,
        name_max_len: usize,
        rng: &mut impl Rng,
    ) -> Option<Profile> {
        let profile_id = sanitize_profile_id(Some(key))?;
        let record = record.as_object()?;

        let fallback_name = format!("Player-{}", &profile_id[..4]);
        let display_name = sanitize_name(
            record.get("name").and_then(Value::as_str),
            name_max_len,
            &fallback_name,
        );
        let color = sanitize_color(record.get("color"), &random_hex_color(rng));
        let appearance = sanitize_appearance(
            record.get("appearance").unwrap_or(&Value::Null),
            &Appearance::with_shirt(color),
        );

        let coord = |name: &str| record.get(name).and_then(Value::as_f64).filter(|v| v.is_finite());
        let last_position = match (coord("x"), coord("y"), coord("z")) {
            (Some(x), Some(y), Some(z)) => Some([x, y, z]),
            _ => None,
        };

        Some(Profile {
            profile_id,
            display_name,
            appearance,
            last_position,
        })
    }

    pub fn load(&self, profile_id: &str) -> Option<&Profile> {
        self.profiles.get(profile_id)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Create a starter profile unless one exists. Returns true if created.
    pub fn provision(&mut self, profile_id: &str, display_name: &str, rng: &mut impl Rng) -> bool {
        if self.profiles.contains_key(profile_id) {
            return false;
        }
        self.profiles.insert(
            profile_id.to_string(),
            Profile {
                profile_id: profile_id.to_string(),
                display_name: display_name.to_string(),
                appearance: Appearance::with_shirt(random_hex_color(rng)),
                last_position: None,
            },
        );
        true
    }

    /// Overwrite name, appearance and position from a live session.
    pub fn upsert_from_session(&mut self, session: &Session) {
        self.profiles.insert(
            session.profile_id.clone(),
            Profile {
                profile_id: session.profile_id.clone(),
                display_name: session.name.clone(),
                appearance: session.appearance.clone(),
                last_position: Some([session.x, session.y, session.z]),
            },
        );
    }

    /// Serialised profiles table, ordered by profile id.
    pub fn to_table_bytes(&self) -> Result<Vec<u8>, StorageError> {
        let table: BTreeMap<&str, ProfileRecord<'_>> = self
            .profiles
            .values()
            .map(|p| {
                let pos = p.last_position;
                (
                    p.profile_id.as_str(),
                    ProfileRecord {
                        name: &p.display_name,
                        color: &p.appearance.shirt,
                        appearance: &p.appearance,
                        x: pos.map(|p| p[0]),
                        y: pos.map(|p| p[1]),
                        z: pos.map(|p| p[2]),
                    },
                )
            })
            .collect();
        Ok(serde_json::to_vec_pretty(&table)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use island_shared::appearance::HairStyle;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(7)
    }

    #[test]
    fn profile_id_rules() {
        assert_eq!(sanitize_profile_id(Some("acct-ada")), Some("acct-ada".to_string()));
        assert_eq!(sanitize_profile_id(Some("ACCT-ADA")), Some("acct-ada".to_string()));
        assert_eq!(sanitize_profile_id(Some("short")), None);
        assert_eq!(sanitize_profile_id(Some("acct_underscore")), None);
        assert_eq!(sanitize_profile_id(None), None);
    }

    #[test]
    fn provision_only_creates_once() {
        let mut store = ProfileStore::new();
        let mut rng = rng();
        assert!(store.provision("acct-ada", "ada", &mut rng));
        let first = store.load("acct-ada").cloned().unwrap();
        assert!(!store.provision("acct-ada", "someone", &mut rng));
        assert_eq!(store.load("acct-ada"), Some(&first));
        assert_eq!(first.display_name, "ada");
        assert!(first.last_position.is_none());
    }

    #[test]
    fn corrupt_records_are_dropped_individually() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        std::fs::write(
            &path,
            json!({
                "acct-ada": {
                    "name": "Ada",
                    "color": "#112233",
                    "appearance": {"hairStyle": "bob", "shirt": "nope"},
                    "x": 1.5, "y": 1.35, "z": -2.0
                },
                "acct-grace": {"name": 42, "x": null, "y": 1.0, "z": 2.0},
                "bad id!": {"name": "x"},
                "acct-numbers": 17
            })
            .to_string(),
        )
        .unwrap();

        let store = ProfileStore::open(&path, 18, &mut rng());
        assert_eq!(store.len(), 2);

        let ada = store.load("acct-ada").unwrap();
        assert_eq!(ada.display_name, "Ada");
        assert_eq!(ada.appearance.shirt.as_str(), "#112233");
        assert_eq!(ada.appearance.hair_style, HairStyle::Bob);
        assert_eq!(ada.last_position, Some([1.5, 1.35, -2.0]));

        let grace = store.load("acct-grace").unwrap();
        assert_eq!(grace.display_name, "Player-acct");
        assert!(grace.last_position.is_none());
    }

    #[test]
    fn unreadable_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        std::fs::write(&path, "{{{{").unwrap();
        assert!(ProfileStore::open(&path, 18, &mut rng()).is_empty());
    }

    #[test]
    fn table_roundtrip_preserves_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        let mut rng = rng();

        let mut store = ProfileStore::new();
        store.provision("acct-ada", "ada", &mut rng);
        store.provision("acct-grace", "grace", &mut rng);
        std::fs::write(&path, store.to_table_bytes().unwrap()).unwrap();

        let written: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["acct-ada"]["x"], Value::Null);
        assert_eq!(written["acct-ada"]["color"], written["acct-ada"]["appearance"]["shirt"]);

        let reloaded = ProfileStore::open(&path, 18, &mut rng);
        assert_eq!(reloaded.load("acct-ada"), store.load("acct-ada"));
        assert_eq!(reloaded.load("acct-grace"), store.load("acct-grace"));
    }
}
