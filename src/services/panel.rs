use crate::core::model::{
    generated_dialogue_id, parse_data_uri, ArtStyle, Character, DialogueLine, DialogueType, Panel,
    Position,
};
use crate::services::genai::{GenAiClient, GenAiError, ImageRequest, ReferenceImage, TextRequest};
use crate::services::retry::{with_retry, RetryPolicy};
use crate::services::storyline::strip_code_blocks;
use anyhow::Result;
use serde::Deserialize;
use serde_json::json;

const DIALOGUE_SYSTEM_PROMPT: &str =
    "Generate 1-3 speech bubbles for a webtoon panel. Return JSON.";

const IMAGE_PROMPT_SUFFIX: &str =
    "(Vertical panel, 9:16 aspect ratio, full color, cel-shaded, dynamic camera angle, \
     cinematic composition)";

/// Character roster rendered into prompt context so the service keeps
/// visuals consistent across panels.
pub fn character_context(characters: &[Character]) -> String {
    characters
        .iter()
        .map(|c| format!("[Character: {}, Visuals: {}]", c.name, c.description))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Generate one panel: the image request and the dialogue request are issued
/// concurrently and joined. A failure in either fails the whole panel; no
/// partial panel is ever returned.
pub async fn generate_panel(
    client: &dyn GenAiClient,
    text_policy: RetryPolicy,
    image_policy: RetryPolicy,
    panel_id: &str,
    prompt: &str,
    characters: &[Character],
    style: ArtStyle,
) -> Result<Panel> {
    let context = character_context(characters);
    let full_prompt = format!("CHARACTERS: {} \n\nSCENE ACTION: {}", context, prompt);

    let (image, dialogue) = tokio::try_join!(
        request_image(client, image_policy, &full_prompt, style, characters),
        generate_dialogue(client, text_policy, &full_prompt),
    )?;

    Ok(Panel {
        id: panel_id.to_string(),
        prompt: prompt.to_string(),
        image_url: image.to_data_uri(),
        dialogue,
    })
}

async fn request_image(
    client: &dyn GenAiClient,
    policy: RetryPolicy,
    scene_prompt: &str,
    style: ArtStyle,
    characters: &[Character],
) -> Result<crate::services::genai::ImagePayload> {
    let mut prompt = format!(
        "{} \n\n{} \n\n{}",
        style.directive(),
        scene_prompt,
        IMAGE_PROMPT_SUFFIX
    );

    let references = collect_references(characters);
    if !references.is_empty() {
        prompt.push_str(
            "\n\nSTRICT VISUAL CONSISTENCY REQUIRED. Use the provided reference images \
             for character designs:",
        );
        for (index, reference) in references.iter().enumerate() {
            prompt.push_str(&format!(
                "\n- Reference Image {} represents the character \"{}\".",
                index + 1,
                reference.name
            ));
        }
    }

    let image = with_retry(policy, || {
        client.generate_image(ImageRequest {
            prompt: prompt.clone(),
            references: collect_references(characters),
        })
    })
    .await?;

    Ok(image)
}

/// Dialogue synthesis for one scene prompt. Service-level transport failures
/// propagate; an empty or blocked response, or output that fails to parse,
/// degrades to an empty dialogue list instead.
pub async fn generate_dialogue(
    client: &dyn GenAiClient,
    policy: RetryPolicy,
    scene_prompt: &str,
) -> Result<Vec<DialogueLine>> {
    let raw = match with_retry(policy, || {
        client.generate_json(TextRequest {
            system: DIALOGUE_SYSTEM_PROMPT.to_string(),
            prompt: format!("Scene Description: {}", scene_prompt),
            schema: dialogue_schema(),
        })
    })
    .await
    {
        Ok(raw) => raw,
        Err(GenAiError::EmptyResponse) => return Ok(Vec::new()),
        Err(GenAiError::Blocked { reason }) => {
            log::warn!("dialogue synthesis blocked ({}), using empty list", reason);
            return Ok(Vec::new());
        }
        Err(err) => return Err(err.into()),
    };

    Ok(parse_dialogue(&raw))
}

fn dialogue_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "dialogues": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "character": { "type": "STRING" },
                        "line": { "type": "STRING" },
                        "position": {
                            "type": "OBJECT",
                            "properties": {
                                "x": { "type": "NUMBER" },
                                "y": { "type": "NUMBER" }
                            },
                            "required": ["x", "y"]
                        }
                    },
                    "required": ["character", "line", "position"]
                }
            }
        },
        "required": ["dialogues"]
    })
}

fn parse_dialogue(raw: &str) -> Vec<DialogueLine> {
    #[derive(Deserialize)]
    struct RawDialogues {
        #[serde(default)]
        dialogues: Vec<RawDialogue>,
    }

    #[derive(Deserialize)]
    struct RawDialogue {
        character: String,
        line: String,
        position: RawPosition,
    }

    #[derive(Deserialize)]
    struct RawPosition {
        x: f64,
        y: f64,
    }

    let clean = strip_code_blocks(raw);
    let parsed: RawDialogues = match serde_json::from_str(&clean) {
        Ok(parsed) => parsed,
        Err(err) => {
            log::warn!("failed to parse dialogue response, using empty list: {}", err);
            return Vec::new();
        }
    };

    parsed
        .dialogues
        .into_iter()
        .enumerate()
        .map(|(index, d)| DialogueLine {
            id: generated_dialogue_id(index),
            character: d.character,
            line: d.line,
            position: Position::clamped(d.position.x, d.position.y),
            kind: DialogueType::Speech,
        })
        .collect()
}

fn collect_references(characters: &[Character]) -> Vec<ReferenceImage> {
    characters
        .iter()
        .filter_map(|c| {
            let image = c.image.as_deref()?;
            if !image.starts_with("data:image") {
                return None;
            }
            match parse_data_uri(image) {
                Ok(parsed) => Some(ReferenceImage {
                    name: c.name.clone(),
                    mime_type: parsed.mime_type,
                    data: parsed.data,
                }),
                Err(err) => {
                    log::warn!("failed to parse reference image for {}: {}", c.name, err);
                    None
                }
            }
        })
        .collect()
}
