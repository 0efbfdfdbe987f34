use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the epoch, used for time-based ids.
pub fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

pub type DialogueId = String;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DialogueType {
    Speech,
    Sfx,
}

/// Bubble anchor inside a panel, expressed as percentages of the panel bounds.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// Every interactive update goes through here so stored positions stay in range.
    pub fn clamped(x: f64, y: f64) -> Self {
        Self {
            x: x.clamp(0.0, 100.0),
            y: y.clamp(0.0, 100.0),
        }
    }

    pub fn center() -> Self {
        Self { x: 50.0, y: 50.0 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DialogueLine {
    pub id: DialogueId,
    /// Speaker name; empty for sfx bubbles.
    pub character: String,
    pub line: String,
    pub position: Position,
    #[serde(rename = "type")]
    pub kind: DialogueType,
}

pub fn generated_dialogue_id(index: usize) -> DialogueId {
    format!("dialogue-{}-{}", now_millis(), index)
}

pub fn user_dialogue_id() -> DialogueId {
    format!("bubble-{}", now_millis())
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Character {
    pub name: String,
    /// Visual description (hair, eyes, clothes, accessories).
    pub description: String,
    /// Optional reference image as a data URI, used to bias panel generation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Character {
    /// Cross-chapter gallery identity: lowercased name plus the first 15
    /// characters of the description. Not a stable id.
    pub fn gallery_key(&self) -> String {
        let prefix: String = self.description.chars().take(15).collect();
        format!("{}-{}", self.name.to_lowercase(), prefix)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Panel {
    pub id: String,
    /// The storyline line this panel was generated from.
    pub prompt: String,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
    pub dialogue: Vec<DialogueLine>,
}

/// Panel ids are fixed at creation: chapter id plus storyline index.
pub fn panel_id(chapter_id: &str, index: usize) -> String {
    format!("{}-panel-{}", chapter_id, index)
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArtStyle {
    #[default]
    ModernAction,
    Romance,
    Fantasy,
    Horror,
    SliceOfLife,
    Mature,
}

impl ArtStyle {
    pub const ALL: [ArtStyle; 6] = [
        ArtStyle::ModernAction,
        ArtStyle::Romance,
        ArtStyle::Fantasy,
        ArtStyle::Horror,
        ArtStyle::SliceOfLife,
        ArtStyle::Mature,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ArtStyle::ModernAction => "Modern Action",
            ArtStyle::Romance => "Romance",
            ArtStyle::Fantasy => "Fantasy",
            ArtStyle::Horror => "Horror",
            ArtStyle::SliceOfLife => "Slice of Life",
            ArtStyle::Mature => "Mature",
        }
    }

    /// Fixed style directive prepended to every image prompt of a chapter.
    pub fn directive(&self) -> &'static str {
        match self {
            ArtStyle::ModernAction => {
                "Style: Modern Action Manhwa (Solo Leveling style). Details: High contrast, \
                 sharp digital linework, dynamic cinematic lighting, glowing magical effects, \
                 vibrant colors, 8k resolution, masterpiece."
            }
            ArtStyle::Romance => {
                "Style: Modern Romance Webtoon (True Beauty style). Details: Soft and dreamy \
                 lighting, pastel color palette, delicate linework, highly detailed eyes and \
                 hair, fashion-focused, emotional atmosphere, sparkling effects."
            }
            ArtStyle::Fantasy => {
                "Style: High Fantasy Manhwa. Details: Epic scale, intricate armor and costume \
                 designs, painting-like backgrounds, atmospheric lighting, magical aura, \
                 detailed textures, cinematic composition."
            }
            ArtStyle::Horror => {
                "Style: Horror/Thriller Webtoon. Details: Gritty texture, deep shadows, muted \
                 and desaturated colors, high contrast, psychological horror atmosphere, \
                 intense and unsettling expressions."
            }
            ArtStyle::SliceOfLife => {
                "Style: Slice of Life Webtoon. Details: Clean and simple lines, bright and \
                 cheerful flat colors, relatable character designs, cozy atmosphere, clear \
                 visual storytelling."
            }
            ArtStyle::Mature => {
                "Style: Adult Manhwa (Seinen/Josei). Details: Mature themes, gritty realism, \
                 expressive anatomy, dramatic and moody lighting, intense emotional \
                 atmosphere, high detail, cinematic framing, racy but tasteful."
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Chapter {
    pub id: String,
    pub title: String,
    pub panels: Vec<Panel>,
    #[serde(default)]
    pub characters: Vec<Character>,
    #[serde(default)]
    pub style: ArtStyle,
}

impl Chapter {
    /// A chapter exists before any panel does; panels are appended in
    /// storyline order as generation progresses.
    pub fn new(title: &str, characters: Vec<Character>, style: ArtStyle) -> Self {
        Self {
            id: now_millis().to_string(),
            title: title.to_string(),
            panels: Vec::new(),
            characters,
            style,
        }
    }

    pub fn panel(&self, panel_id: &str) -> Option<&Panel> {
        self.panels.iter().find(|p| p.id == panel_id)
    }

    pub fn panel_mut(&mut self, panel_id: &str) -> Option<&mut Panel> {
        self.panels.iter_mut().find(|p| p.id == panel_id)
    }
}

/// Chapter title reduced to a filesystem-safe name for export targets.
pub fn sanitize_title(title: &str) -> String {
    let sanitized: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    let trimmed = sanitized.trim_matches('_');
    if trimmed.is_empty() {
        "chapter".to_string()
    } else {
        trimmed.to_string()
    }
}

// --- Data URIs ---
//
// Generated images and character reference images travel as
// `data:<mime>;base64,<payload>` strings so chapters stay self-contained
// when serialized to the library.

#[derive(Debug, Clone, PartialEq)]
pub struct DataUri {
    pub mime_type: String,
    pub data: Vec<u8>,
}

pub fn parse_data_uri(uri: &str) -> Result<DataUri> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| anyhow!("not a data URI"))?;
    let (mime_type, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| anyhow!("data URI is not base64-encoded"))?;
    if mime_type.is_empty() {
        return Err(anyhow!("data URI has no mime type"));
    }
    let data = general_purpose::STANDARD.decode(payload)?;
    Ok(DataUri {
        mime_type: mime_type.to_string(),
        data,
    })
}

pub fn to_data_uri(mime_type: &str, data: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime_type,
        general_purpose::STANDARD.encode(data)
    )
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_clamped() {
        let p = Position::clamped(-3.0, 120.5);
        assert_eq!(p.x, 0.0);
        assert_eq!(p.y, 100.0);

        // In-range values round-trip exactly.
        let q = Position::clamped(42.25, 99.9);
        assert_eq!(q.x, 42.25);
        assert_eq!(q.y, 99.9);
    }

    #[test]
    fn test_gallery_key_uses_description_prefix() {
        let a = Character {
            name: "Aria".to_string(),
            description: "Tall warrior with silver hair".to_string(),
            image: None,
        };
        let b = Character {
            name: "ARIA".to_string(),
            description: "Tall warrior with a completely different backstory".to_string(),
            image: None,
        };
        // Same name (case-insensitive) and same first 15 chars of description.
        assert_eq!(a.gallery_key(), b.gallery_key());

        let c = Character {
            name: "Aria".to_string(),
            description: "Short mage".to_string(),
            image: None,
        };
        assert_ne!(a.gallery_key(), c.gallery_key());
    }

    #[test]
    fn test_panel_id_is_deterministic() {
        assert_eq!(panel_id("1700000000000", 3), "1700000000000-panel-3");
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("My Chapter: Part 2!"), "My_Chapter__Part_2");
        assert_eq!(sanitize_title("???"), "chapter");
        assert_eq!(sanitize_title(""), "chapter");
    }

    #[test]
    fn test_art_style_serializes_snake_case() {
        let v = serde_json::to_string(&ArtStyle::SliceOfLife).unwrap();
        assert_eq!(v, "\"slice_of_life\"");
        let s: ArtStyle = serde_json::from_str("\"modern_action\"").unwrap();
        assert_eq!(s, ArtStyle::ModernAction);
    }

    #[test]
    fn test_dialogue_type_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&DialogueType::Sfx).unwrap(), "\"sfx\"");
        assert_eq!(
            serde_json::to_string(&DialogueType::Speech).unwrap(),
            "\"speech\""
        );
    }

    #[test]
    fn test_data_uri_round_trip() {
        let uri = to_data_uri("image/png", b"fake png bytes");
        let parsed = parse_data_uri(&uri).unwrap();
        assert_eq!(parsed.mime_type, "image/png");
        assert_eq!(parsed.data, b"fake png bytes");
    }

    #[test]
    fn test_parse_data_uri_rejects_garbage() {
        assert!(parse_data_uri("http://example.com/a.png").is_err());
        assert!(parse_data_uri("data:image/png,rawdata").is_err());
    }

    #[test]
    fn test_chapter_starts_empty() {
        let chapter = Chapter::new("Test", vec![], ArtStyle::Fantasy);
        assert!(chapter.panels.is_empty());
        assert!(!chapter.id.is_empty());
        assert_eq!(chapter.style, ArtStyle::Fantasy);
    }
}
