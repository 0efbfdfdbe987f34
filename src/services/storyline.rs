use crate::core::model::Character;
use crate::services::genai::{GenAiClient, TextRequest};
use crate::services::retry::{with_retry, RetryPolicy};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;

const STORYLINE_SYSTEM_PROMPT: &str = "You are a master webtoon writer and director.\n\
    1. **Characters**: Create 1-3 main characters with DISTINCT visual features (Hair color, eye color, clothing style).\n\
    2. **Story**: Create a 6-8 panel vertical storyline description based on the user's idea.\n\
    3. **Cinematography**: For EACH panel, explicitly specify a dynamic camera angle or composition to enhance the storytelling.\n\
       - MANDATORY: Use variety such as \"Extreme Close-up\", \"Low Angle looking up\", \"High Angle\", \"Dutch Angle\", \"Over-the-shoulder\", \"Wide Shot\".\n\
       - Focus on visual impact and emotional framing (e.g., close-up on eyes for shock, low angle for power).\n\
    4. **Format**: Return JSON.";

/// Ordered panel prompts plus the character roster, held for user review
/// before panel generation is approved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorylineDraft {
    pub storyline: Vec<String>,
    pub characters: Vec<Character>,
}

impl StorylineDraft {
    pub fn update_prompt(&mut self, index: usize, prompt: &str) -> bool {
        match self.storyline.get_mut(index) {
            Some(slot) => {
                *slot = prompt.to_string();
                true
            }
            None => false,
        }
    }

    pub fn update_character(&mut self, index: usize, character: Character) -> bool {
        match self.characters.get_mut(index) {
            Some(slot) => {
                *slot = character;
                true
            }
            None => false,
        }
    }
}

fn storyline_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "characters": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "name": { "type": "STRING" },
                        "description": {
                            "type": "STRING",
                            "description": "Detailed visual description (Hair, Eyes, Clothes, Accessories)"
                        }
                    },
                    "required": ["name", "description"]
                }
            },
            "storyline": {
                "type": "ARRAY",
                "items": { "type": "STRING" }
            }
        },
        "required": ["storyline", "characters"]
    })
}

/// Turn a free-text premise into a reviewed-before-approval storyline draft.
/// Unparsable output is a hard failure; there is no partial recovery here.
pub async fn generate_storyline(
    client: &dyn GenAiClient,
    policy: RetryPolicy,
    premise: &str,
    dialogue_focus: &str,
) -> Result<StorylineDraft> {
    request_storyline(client, policy, premise, dialogue_focus)
        .await
        .context("Storyline generation failed")
}

async fn request_storyline(
    client: &dyn GenAiClient,
    policy: RetryPolicy,
    premise: &str,
    dialogue_focus: &str,
) -> Result<StorylineDraft> {
    let mut prompt = format!(
        "Create a Webtoon storyline and character profiles from this idea: \"{}\"",
        premise
    );
    if !dialogue_focus.trim().is_empty() {
        prompt.push_str(&format!(
            "\n\nCritical Instruction: Ensure the scene descriptions heavily prioritize \
             the following character interactions and dialogue themes: \"{}\"",
            dialogue_focus
        ));
    }

    let raw = with_retry(policy, || {
        client.generate_json(TextRequest {
            system: STORYLINE_SYSTEM_PROMPT.to_string(),
            prompt: prompt.clone(),
            schema: storyline_schema(),
        })
    })
    .await?;

    parse_storyline(&raw)
}

fn parse_storyline(raw: &str) -> Result<StorylineDraft> {
    #[derive(Deserialize)]
    struct RawDraft {
        #[serde(default)]
        storyline: Vec<String>,
        #[serde(default)]
        characters: Vec<RawCharacter>,
    }

    #[derive(Deserialize)]
    struct RawCharacter {
        name: String,
        description: String,
    }

    let clean = strip_code_blocks(raw);
    let parsed: RawDraft = serde_json::from_str(&clean)
        .with_context(|| format!("Failed to parse storyline data: {}", clean))?;

    Ok(StorylineDraft {
        storyline: parsed.storyline,
        characters: parsed
            .characters
            .into_iter()
            .map(|c| Character {
                name: c.name,
                description: c.description,
                image: None,
            })
            .collect(),
    })
}

/// Models sometimes fence strict-JSON output in markdown anyway.
pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("json"), "json");
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("  ```json  \n  {}  \n  ```  "), "{}");
    }

    #[test]
    fn test_parse_storyline_success() {
        let raw = r#"{
            "storyline": ["Wide Shot: a ruined temple", "Extreme Close-up: her eyes"],
            "characters": [
                { "name": "Aria", "description": "Silver hair, red cloak" }
            ]
        }"#;
        let draft = parse_storyline(raw).unwrap();
        assert_eq!(draft.storyline.len(), 2);
        assert_eq!(draft.characters.len(), 1);
        assert_eq!(draft.characters[0].name, "Aria");
        assert!(draft.characters[0].image.is_none());
    }

    #[test]
    fn test_parse_storyline_defaults_missing_arrays() {
        let draft = parse_storyline("{}").unwrap();
        assert!(draft.storyline.is_empty());
        assert!(draft.characters.is_empty());
    }

    #[test]
    fn test_parse_storyline_rejects_garbage() {
        assert!(parse_storyline("not json at all").is_err());
    }

    #[test]
    fn test_draft_review_edits() {
        let mut draft = StorylineDraft {
            storyline: vec!["a".to_string(), "b".to_string()],
            characters: vec![Character {
                name: "Aria".to_string(),
                description: "old".to_string(),
                image: None,
            }],
        };

        assert!(draft.update_prompt(1, "b revised"));
        assert_eq!(draft.storyline[1], "b revised");
        assert!(!draft.update_prompt(5, "out of range"));

        assert!(draft.update_character(
            0,
            Character {
                name: "Aria".to_string(),
                description: "new".to_string(),
                image: Some("data:image/png;base64,AA==".to_string()),
            }
        ));
        assert_eq!(draft.characters[0].description, "new");
        assert!(!draft.update_character(3, draft.characters[0].clone()));
    }
}
