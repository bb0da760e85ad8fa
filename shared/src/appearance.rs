//! Avatar appearance and display-name sanitisation.
//!
//! Every field is validated on its own. Anything unrecognised falls back to
//! the previous value, never to an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use ts_rs::TS;

/// `#rrggbb` colour string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
#[serde(try_from = "String", into = "String")]
pub struct HexColor(String);

impl HexColor {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let digits = raw.strip_prefix('#')?;
        if digits.len() == 6 && digits.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }

    pub fn from_rgb(rgb: u32) -> Self {
        Self(format!("#{:06x}", rgb & 0xff_ffff))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for HexColor {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid hex colour: {:?}", value))
    }
}

impl From<HexColor> for String {
    fn from(value: HexColor) -> Self {
        value.0
    }
}

impl fmt::Display for HexColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
#[serde(rename_all = "lowercase")]
pub enum HairStyle {
    None,
    Short,
    SidePart,
    Spiky,
    Long,
    Ponytail,
    Bob,
    Wavy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
#[serde(rename_all = "lowercase")]
pub enum FaceStyle {
    Smile,
    Serious,
    Grin,
    Wink,
    LashesSmile,
    Soft,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export, export_to = "../../public/generated/")]
#[serde(rename_all = "lowercase")]
pub enum Accessory {
    Hat,
    Glasses,
    Backpack,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../public/generated/")]
#[serde(rename_all = "camelCase")]
pub struct Appearance {
    pub skin: HexColor,
    pub shirt: HexColor,
    pub pants: HexColor,
    pub shoes: HexColor,
    pub hair_style: HairStyle,
    pub hair_color: HexColor,
    pub face_style: FaceStyle,
    pub accessories: BTreeSet<Accessory>,
}

impl Default for Appearance {
    fn default() -> Self {
        Self {
            skin: HexColor("#f3cfb3".to_string()),
            shirt: HexColor("#5a8ef2".to_string()),
            pants: HexColor("#334155".to_string()),
            shoes: HexColor("#111827".to_string()),
            hair_style: HairStyle::Short,
            hair_color: HexColor("#2b211c".to_string()),
            face_style: FaceStyle::Smile,
            accessories: BTreeSet::new(),
        }
    }
}

impl Appearance {
    /// Default look with the given shirt colour.
    pub fn with_shirt(shirt: HexColor) -> Self {
        Self {
            shirt,
            ..Self::default()
        }
    }
}

/// Parse a colour field, keeping `fallback` for anything that is not `#rrggbb`.
pub fn sanitize_color(value: Option<&Value>, fallback: &HexColor) -> HexColor {
    value
        .and_then(Value::as_str)
        .and_then(HexColor::parse)
        .unwrap_or_else(|| fallback.clone())
}

fn sanitize_enum<T: for<'de> Deserialize<'de>>(value: Option<&Value>, fallback: T) -> T {
    match value {
        Some(v @ Value::String(_)) => T::deserialize(v).unwrap_or(fallback),
        _ => fallback,
    }
}

/// Merge an untrusted appearance payload over `base`, field by field.
///
/// `color` is accepted as an alias for `shirt`. A non-array `accessories`
/// keeps the base set; an array keeps only known accessories, deduplicated.
pub fn sanitize_appearance(input: &Value, base: &Appearance) -> Appearance {
    let field = |name: &str| input.as_object().and_then(|o| o.get(name));

    let accessories = match field("accessories") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| sanitize_enum(Some(item), None::<Accessory>))
            .collect(),
        _ => base.accessories.clone(),
    };

    let shirt = match field("shirt") {
        Some(Value::Null) | None => field("color"),
        other => other,
    };

    Appearance {
        skin: sanitize_color(field("skin"), &base.skin),
        shirt: sanitize_color(shirt, &base.shirt),
        pants: sanitize_color(field("pants"), &base.pants),
        shoes: sanitize_color(field("shoes"), &base.shoes),
        hair_style: sanitize_enum(field("hairStyle"), base.hair_style),
        hair_color: sanitize_color(field("hairColor"), &base.hair_color),
        face_style: sanitize_enum(field("faceStyle"), base.face_style),
        accessories,
    }
}

/// Collapse whitespace, cap at `max_len` characters and strip control
/// characters and angle brackets. Falls back when nothing usable is left.
pub fn sanitize_name(value: Option<&str>, max_len: usize, fallback: &str) -> String {
    let collapsed = value
        .unwrap_or("")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let safe: String = collapsed
        .chars()
        .take(max_len)
        .filter(|c| !c.is_control() && *c != '<' && *c != '>')
        .collect();
    if safe.is_empty() {
        fallback.to_string()
    } else {
        safe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hex_color_accepts_only_six_digits() {
        assert!(HexColor::parse("#a1B2c3").is_some());
        assert!(HexColor::parse("  #ffffff ").is_some());
        assert!(HexColor::parse("ffffff").is_none());
        assert!(HexColor::parse("#fff").is_none());
        assert!(HexColor::parse("#gggggg").is_none());
        assert!(HexColor::parse("red").is_none());
    }

    #[test]
    fn from_rgb_pads_to_six_digits() {
        assert_eq!(HexColor::from_rgb(0xff).as_str(), "#0000ff");
    }

    #[test]
    fn unknown_values_fall_back_to_defaults() {
        let defaults = Appearance::default();
        let raw = json!({"hairStyle": "not-a-style", "shirt": "red"});
        let out = sanitize_appearance(&raw, &defaults);
        assert_eq!(out.hair_style, defaults.hair_style);
        assert_eq!(out.shirt, defaults.shirt);
        assert_eq!(out, defaults);
    }

    #[test]
    fn valid_fields_override_base() {
        let base = Appearance::default();
        let out = sanitize_appearance(
            &json!({
                "skin": "#000000",
                "hairStyle": "ponytail",
                "faceStyle": "lashessmile",
                "accessories": ["hat", "cape", "hat", "glasses"]
            }),
            &base,
        );
        assert_eq!(out.skin.as_str(), "#000000");
        assert_eq!(out.hair_style, HairStyle::Ponytail);
        assert_eq!(out.face_style, FaceStyle::LashesSmile);
        assert_eq!(
            out.accessories.into_iter().collect::<Vec<_>>(),
            vec![Accessory::Hat, Accessory::Glasses]
        );
        assert_eq!(out.pants, base.pants);
    }

    #[test]
    fn color_is_an_alias_for_shirt() {
        let out = sanitize_appearance(&json!({"color": "#123456"}), &Appearance::default());
        assert_eq!(out.shirt.as_str(), "#123456");
    }

    #[test]
    fn non_object_payload_keeps_base() {
        let mut base = Appearance::default();
        base.accessories.insert(Accessory::Backpack);
        for payload in [json!(null), json!(42), json!("hat"), json!([1, 2])] {
            assert_eq!(sanitize_appearance(&payload, &base), base);
        }
    }

    #[test]
    fn wrongly_typed_fields_are_ignored() {
        let base = Appearance::default();
        let out = sanitize_appearance(
            &json!({"skin": 5, "hairStyle": ["long"], "accessories": "hat"}),
            &base,
        );
        assert_eq!(out, base);
    }

    #[test]
    fn name_is_collapsed_capped_and_filtered() {
        assert_eq!(sanitize_name(Some("  Ada   \t Lovelace "), 18, "x"), "Ada Lovelace");
        assert_eq!(sanitize_name(Some("<b>bold</b>"), 18, "x"), "bbold/b");
        assert_eq!(sanitize_name(Some("abcdefghijklmnopqrstuvwxyz"), 18, "x").chars().count(), 18);
        assert_eq!(sanitize_name(Some("   "), 18, "fallback"), "fallback");
        assert_eq!(sanitize_name(None, 18, "fallback"), "fallback");
        assert_eq!(sanitize_name(Some("<>"), 18, "fallback"), "fallback");
    }
}
