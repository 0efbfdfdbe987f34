use crate::core::config::{Config, GenerationConfig};
use crate::core::model::{panel_id, ArtStyle, Chapter, Character};
use crate::services::board::ChapterBoard;
use crate::services::genai::GenAiClient;
use crate::services::panel::{character_context, generate_dialogue, generate_panel};
use crate::services::retry::RetryPolicy;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

/// Drives panel generation across an approved storyline, and dialogue-only
/// regeneration across an existing chapter. Both run strictly sequentially
/// with a fixed pacing delay between calls, publishing the updated chapter to
/// the board after every step so partial chapters are always visible. A
/// failure aborts the remaining steps; everything committed before it stays.
pub struct GenerationWorkflow {
    generation: GenerationConfig,
    client: Arc<dyn GenAiClient>,
    board: Arc<ChapterBoard>,
}

impl GenerationWorkflow {
    pub fn new(config: &Config, client: Arc<dyn GenAiClient>, board: Arc<ChapterBoard>) -> Self {
        Self {
            generation: config.generation.clone(),
            client,
            board,
        }
    }

    fn text_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.generation.max_attempts,
            Duration::from_millis(self.generation.retry_delay_ms),
        )
    }

    fn image_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.generation.max_attempts,
            Duration::from_millis(self.generation.image_retry_delay_ms),
        )
    }

    fn pacing(&self) -> Duration {
        Duration::from_secs(self.generation.pacing_seconds)
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }

    /// Generate a full chapter from an approved storyline. The chapter record
    /// is published before any panel exists; panels are appended in storyline
    /// order as they complete.
    pub async fn generate_chapter(
        &self,
        title: &str,
        storyline: &[String],
        characters: &[Character],
        style: ArtStyle,
    ) -> Result<Chapter> {
        let chapter = Chapter::new(title, characters.to_vec(), style);
        let chapter_id = chapter.id.clone();
        self.board.publish(chapter);

        log::info!(
            "generating chapter {} ({} panels)",
            chapter_id,
            storyline.len()
        );
        let pb = self.progress_bar(storyline.len());

        for (index, prompt) in storyline.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.pacing()).await;
            }

            let panel = generate_panel(
                self.client.as_ref(),
                self.text_policy(),
                self.image_policy(),
                &panel_id(&chapter_id, index),
                prompt,
                characters,
                style,
            )
            .await
            .context("Panel generation failed")?;

            self.board.append_panel(panel);
            pb.inc(1);
            log::info!("panel {}/{} complete", index + 1, storyline.len());
        }

        pb.finish_with_message("chapter complete");
        self.board
            .snapshot()
            .context("chapter disappeared from the board during generation")
    }

    /// Regenerate dialogue for every panel of the current chapter, in order,
    /// leaving images untouched. Shares the pacing and partial-result
    /// semantics of chapter generation.
    pub async fn auto_layout(&self) -> Result<Chapter> {
        let chapter = self
            .board
            .snapshot()
            .context("Auto-layout failed: no chapter to lay out")?;
        self.board.clear_undo();

        let context = character_context(&chapter.characters);
        log::info!(
            "auto-layout over chapter {} ({} panels)",
            chapter.id,
            chapter.panels.len()
        );
        let pb = self.progress_bar(chapter.panels.len());

        for (index, panel) in chapter.panels.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.pacing()).await;
            }

            let scene_prompt = format!("{} \n\nScene: {}", context, panel.prompt);
            let dialogue =
                generate_dialogue(self.client.as_ref(), self.text_policy(), &scene_prompt)
                    .await
                    .context("Auto-layout failed")?;

            self.board.replace_dialogue(&panel.id, dialogue);
            pb.inc(1);
        }

        pb.finish_with_message("auto-layout complete");
        self.board
            .snapshot()
            .context("chapter disappeared from the board during auto-layout")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::GeminiConfig;
    use crate::core::model::{DialogueLine, DialogueType, Panel, Position};
    use crate::services::genai::{GenAiError, ImagePayload, ImageRequest, TextRequest};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::time::Instant;

    const DIALOGUE_JSON: &str = r#"{
        "dialogues": [
            { "character": "Aria", "line": "Generated!", "position": { "x": 20.0, "y": 30.0 } }
        ]
    }"#;

    const STORYLINE_JSON: &str = r#"{
        "storyline": ["p0", "p1", "p2", "p3", "p4", "p5"],
        "characters": [
            { "name": "Aria", "description": "Silver hair" },
            { "name": "Bram", "description": "Black armor" }
        ]
    }"#;

    #[derive(Debug, Clone, PartialEq)]
    enum CallKind {
        Json,
        Image,
    }

    #[derive(Debug)]
    struct Call {
        kind: CallKind,
        prompt: String,
        at: Instant,
    }

    #[derive(Debug, Default)]
    struct MockService {
        calls: Mutex<Vec<Call>>,
        /// Fail the nth image call (0-based) with a terminal error.
        fail_image_at: Option<usize>,
        /// Fail the nth dialogue call (0-based) with a terminal error.
        fail_dialogue_at: Option<usize>,
    }

    impl MockService {
        fn calls_of(&self, kind: CallKind) -> Vec<(String, Instant)> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.kind == kind)
                .map(|c| (c.prompt.clone(), c.at))
                .collect()
        }
    }

    #[async_trait]
    impl GenAiClient for MockService {
        async fn generate_json(&self, request: TextRequest) -> Result<String, GenAiError> {
            let dialogue_index = {
                let mut calls = self.calls.lock().unwrap();
                let index = calls
                    .iter()
                    .filter(|c| {
                        c.kind == CallKind::Json && c.prompt.starts_with("Scene Description:")
                    })
                    .count();
                calls.push(Call {
                    kind: CallKind::Json,
                    prompt: request.prompt.clone(),
                    at: Instant::now(),
                });
                index
            };

            if request.prompt.starts_with("Create a Webtoon storyline") {
                return Ok(STORYLINE_JSON.to_string());
            }

            if self.fail_dialogue_at == Some(dialogue_index) {
                return Err(GenAiError::Api {
                    status: 400,
                    message: "dialogue rejected".to_string(),
                });
            }
            Ok(DIALOGUE_JSON.to_string())
        }

        async fn generate_image(&self, request: ImageRequest) -> Result<ImagePayload, GenAiError> {
            let index = {
                let mut calls = self.calls.lock().unwrap();
                let index = calls.iter().filter(|c| c.kind == CallKind::Image).count();
                calls.push(Call {
                    kind: CallKind::Image,
                    prompt: request.prompt.clone(),
                    at: Instant::now(),
                });
                index
            };

            if self.fail_image_at == Some(index) {
                return Err(GenAiError::Api {
                    status: 400,
                    message: "image rejected".to_string(),
                });
            }
            Ok(ImagePayload {
                mime_type: "image/png".to_string(),
                data: format!("image-{}", index).into_bytes(),
            })
        }
    }

    fn test_config() -> Config {
        Config {
            library_file: "library/chapters.json".to_string(),
            export_folder: "export".to_string(),
            generation: GenerationConfig::default(),
            gemini: GeminiConfig {
                api_key: "test".to_string(),
                text_model: "text-model".to_string(),
                image_model: "image-model".to_string(),
            },
        }
    }

    fn workflow_with(mock: Arc<MockService>) -> (GenerationWorkflow, Arc<ChapterBoard>) {
        let board = Arc::new(ChapterBoard::new());
        let workflow = GenerationWorkflow::new(&test_config(), mock, board.clone());
        (workflow, board)
    }

    fn characters() -> Vec<Character> {
        vec![Character {
            name: "Aria".to_string(),
            description: "Silver hair".to_string(),
            image: None,
        }]
    }

    fn prompts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("scene prompt {}", i)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_chapter_appends_in_order() {
        let mock = Arc::new(MockService::default());
        let (workflow, board) = workflow_with(mock.clone());

        let chapter = workflow
            .generate_chapter("My Chapter", &prompts(3), &characters(), ArtStyle::Fantasy)
            .await
            .unwrap();

        assert_eq!(chapter.title, "My Chapter");
        assert_eq!(chapter.style, ArtStyle::Fantasy);
        assert_eq!(chapter.panels.len(), 3);
        for (i, panel) in chapter.panels.iter().enumerate() {
            assert_eq!(panel.id, format!("{}-panel-{}", chapter.id, i));
            assert_eq!(panel.prompt, format!("scene prompt {}", i));
            assert!(panel.image_url.starts_with("data:image/png;base64,"));
            assert_eq!(panel.dialogue.len(), 1);
        }
        assert_eq!(board.snapshot().unwrap(), chapter);
        assert_eq!(mock.calls_of(CallKind::Image).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_is_sequential_and_paced() {
        let mock = Arc::new(MockService::default());
        let (workflow, _board) = workflow_with(mock.clone());

        let start = Instant::now();
        workflow
            .generate_chapter("T", &prompts(4), &characters(), ArtStyle::ModernAction)
            .await
            .unwrap();

        let images = mock.calls_of(CallKind::Image);
        assert_eq!(images.len(), 4);

        // Panel i+1 is issued a full pacing delay after panel i resolved.
        for window in images.windows(2) {
            assert_eq!(window[1].1 - window[0].1, Duration::from_secs(15));
        }
        // N-1 pacing delays total; no delay after the last panel.
        assert_eq!(Instant::now() - start, Duration::from_secs(45));

        // Calls arrive grouped per panel, in storyline order.
        let all_calls = mock.calls.lock().unwrap();
        for (i, chunk) in all_calls.chunks(2).enumerate() {
            for call in chunk {
                assert!(
                    call.prompt.contains(&format!("scene prompt {}", i)),
                    "call for panel {} out of order: {}",
                    i,
                    call.prompt
                );
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_preserves_completed_panels() {
        let mock = Arc::new(MockService {
            fail_image_at: Some(2),
            ..Default::default()
        });
        let (workflow, board) = workflow_with(mock.clone());

        let err = workflow
            .generate_chapter("T", &prompts(5), &characters(), ArtStyle::Horror)
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).starts_with("Panel generation failed"));

        // Panels 0 and 1 survive; 2 failed; 3 and 4 were never attempted.
        let snapshot = board.snapshot().unwrap();
        assert_eq!(snapshot.panels.len(), 2);
        assert_eq!(snapshot.panels[0].prompt, "scene prompt 0");
        assert_eq!(snapshot.panels[1].prompt, "scene prompt 1");
        assert_eq!(mock.calls_of(CallKind::Image).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_image_failure_exhausts_into_busy() {
        #[derive(Debug, Default)]
        struct AlwaysRateLimited {
            image_calls: Mutex<u32>,
        }

        #[async_trait]
        impl GenAiClient for AlwaysRateLimited {
            async fn generate_json(&self, _request: TextRequest) -> Result<String, GenAiError> {
                Ok(DIALOGUE_JSON.to_string())
            }
            async fn generate_image(
                &self,
                _request: ImageRequest,
            ) -> Result<ImagePayload, GenAiError> {
                *self.image_calls.lock().unwrap() += 1;
                Err(GenAiError::RateLimited("quota".to_string()))
            }
        }

        let mock = Arc::new(AlwaysRateLimited::default());
        let board = Arc::new(ChapterBoard::new());
        let workflow = GenerationWorkflow::new(&test_config(), mock.clone(), board.clone());

        let err = workflow
            .generate_chapter("T", &prompts(1), &characters(), ArtStyle::Romance)
            .await
            .unwrap_err();

        assert_eq!(*mock.image_calls.lock().unwrap(), 3);
        let rendered = format!("{:#}", err);
        assert!(rendered.starts_with("Panel generation failed"));
        assert!(rendered.contains("API busy or quota exceeded"));
        assert!(board.snapshot().unwrap().panels.is_empty());
    }

    fn seeded_board(panel_count: usize) -> (Arc<ChapterBoard>, Chapter) {
        let board = Arc::new(ChapterBoard::new());
        let mut chapter = Chapter::new("Seeded", characters(), ArtStyle::Fantasy);
        for i in 0..panel_count {
            chapter.panels.push(Panel {
                id: panel_id(&chapter.id, i),
                prompt: format!("stored prompt {}", i),
                image_url: format!("data:image/png;base64,b2xk{}", i),
                dialogue: vec![DialogueLine {
                    id: format!("old-{}", i),
                    character: "Aria".to_string(),
                    line: "old line".to_string(),
                    position: Position::center(),
                    kind: DialogueType::Speech,
                }],
            });
        }
        board.publish(chapter.clone());
        (board, chapter)
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_layout_replaces_dialogue_only() {
        let mock = Arc::new(MockService::default());
        let (board, before) = seeded_board(3);
        let workflow = GenerationWorkflow::new(&test_config(), mock.clone(), board.clone());

        let start = Instant::now();
        let after = workflow.auto_layout().await.unwrap();

        assert_eq!(after.panels.len(), 3);
        for (i, panel) in after.panels.iter().enumerate() {
            // Images are never regenerated.
            assert_eq!(panel.image_url, before.panels[i].image_url);
            assert_eq!(panel.dialogue.len(), 1);
            assert_eq!(panel.dialogue[0].line, "Generated!");
            assert_ne!(panel.dialogue[0].id, format!("old-{}", i));
        }

        // Dialogue-only: no image calls, one json call per panel, N-1 delays.
        assert!(mock.calls_of(CallKind::Image).is_empty());
        assert_eq!(mock.calls_of(CallKind::Json).len(), 3);
        assert_eq!(Instant::now() - start, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_layout_failure_keeps_earlier_updates() {
        let mock = Arc::new(MockService {
            fail_dialogue_at: Some(1),
            ..Default::default()
        });
        let (board, _before) = seeded_board(3);
        let workflow = GenerationWorkflow::new(&test_config(), mock, board.clone());

        let err = workflow.auto_layout().await.unwrap_err();
        assert!(format!("{:#}", err).starts_with("Auto-layout failed"));

        let snapshot = board.snapshot().unwrap();
        assert_eq!(snapshot.panels[0].dialogue[0].line, "Generated!");
        // The failing panel and the one after it keep their old dialogue.
        assert_eq!(snapshot.panels[1].dialogue[0].line, "old line");
        assert_eq!(snapshot.panels[2].dialogue[0].line, "old line");
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_layout_clears_undo() {
        let mock = Arc::new(MockService::default());
        let (board, before) = seeded_board(2);
        let workflow = GenerationWorkflow::new(&test_config(), mock, board.clone());

        board.delete_dialogue(&before.panels[0].id, "old-0");
        assert!(board.has_undo());

        workflow.auto_layout().await.unwrap();
        assert!(!board.has_undo());
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_premise_to_saved_chapter() {
        use crate::core::io::NativeStorage;
        use crate::services::library::ChapterLibrary;
        use crate::services::storyline::generate_storyline;

        let mock = Arc::new(MockService::default());
        let (workflow, _board) = workflow_with(mock.clone());

        let draft = generate_storyline(
            mock.as_ref(),
            RetryPolicy::default(),
            "A swordsman seeks revenge",
            "",
        )
        .await
        .unwrap();
        assert_eq!(draft.storyline.len(), 6);
        assert_eq!(draft.characters.len(), 2);

        let chapter = workflow
            .generate_chapter(
                "Revenge",
                &draft.storyline,
                &draft.characters,
                ArtStyle::ModernAction,
            )
            .await
            .unwrap();

        assert_eq!(chapter.panels.len(), 6);
        for (i, panel) in chapter.panels.iter().enumerate() {
            assert_eq!(panel.prompt, format!("p{}", i));
            assert!(!panel.image_url.is_empty());
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("chapters.json")
            .to_string_lossy()
            .to_string();
        let library = ChapterLibrary::new(Arc::new(NativeStorage::new()), &path);
        library.save_chapter(&chapter).await.unwrap();

        let loaded = library.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, chapter.id);
        assert_eq!(loaded[0].panels.len(), 6);
        let order: Vec<String> = loaded[0].panels.iter().map(|p| p.id.clone()).collect();
        let expected: Vec<String> = chapter.panels.iter().map(|p| p.id.clone()).collect();
        assert_eq!(order, expected);
    }
}
