use crate::core::config::Config;
use crate::core::io::Storage;
use crate::core::model::{to_data_uri, ArtStyle, Chapter, Character, DialogueType, Position};
use crate::services::board::{ChapterBoard, DialogueUpdate};
use crate::services::export::export_chapter;
use crate::services::genai::GenAiClient;
use crate::services::library::ChapterLibrary;
use crate::services::retry::RetryPolicy;
use crate::services::storyline::{generate_storyline, StorylineDraft};
use crate::services::workflow::GenerationWorkflow;
use anyhow::Result;
use inquire::{Confirm, Select, Text};
use std::sync::Arc;
use std::time::Duration;

/// The interactive surface: submit a premise, review the storyline, approve
/// panel generation, then edit, save and export. Every failed operation
/// prints exactly one error line and drops back to a menu, so the user can
/// always retry; partial chapters stay on the board.
pub struct Session {
    config: Config,
    client: Arc<dyn GenAiClient>,
    storage: Arc<dyn Storage>,
    board: Arc<ChapterBoard>,
    library: ChapterLibrary,
    chapters: Vec<Chapter>,
}

impl Session {
    pub async fn new(
        config: Config,
        client: Arc<dyn GenAiClient>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        let library = ChapterLibrary::new(storage.clone(), &config.library_file);
        let chapters = library.load().await?;
        Ok(Self {
            config,
            client,
            storage,
            board: Arc::new(ChapterBoard::new()),
            library,
            chapters,
        })
    }

    fn workflow(&self) -> GenerationWorkflow {
        GenerationWorkflow::new(&self.config, self.client.clone(), self.board.clone())
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.config.generation.max_attempts,
            Duration::from_millis(self.config.generation.retry_delay_ms),
        )
    }

    pub async fn run(&mut self) -> Result<()> {
        loop {
            let choice = Select::new(
                "Manhwa Maker:",
                vec![
                    "New chapter",
                    "Open saved chapter",
                    "Delete saved chapter",
                    "Quit",
                ],
            )
            .prompt()?;

            match choice {
                "New chapter" => self.new_chapter().await?,
                "Open saved chapter" => self.open_chapter().await?,
                "Delete saved chapter" => self.delete_chapter().await?,
                _ => return Ok(()),
            }
        }
    }

    async fn new_chapter(&mut self) -> Result<()> {
        let title = Text::new("Chapter title:").prompt()?;
        let premise = Text::new("Story premise:").prompt()?;
        let focus = Text::new("Dialogue focus (optional):")
            .with_help_message("Interactions or themes the scenes should prioritize")
            .prompt()?;

        let labels: Vec<&str> = ArtStyle::ALL.iter().map(|s| s.label()).collect();
        let style_choice = Select::new("Art style:", labels).raw_prompt()?;
        let style = ArtStyle::ALL[style_choice.index];

        println!("Generating storyline...");
        let mut draft = match generate_storyline(
            self.client.as_ref(),
            self.retry_policy(),
            &premise,
            &focus,
        )
        .await
        {
            Ok(draft) => draft,
            Err(err) => {
                println!("Error: {:#}", err);
                return Ok(());
            }
        };

        if !self.review_storyline(&mut draft).await? {
            return Ok(());
        }

        let workflow = self.workflow();
        println!(
            "Generating {} panels (about {}s between panels)...",
            draft.storyline.len(),
            self.config.generation.pacing_seconds
        );
        match workflow
            .generate_chapter(&title, &draft.storyline, &draft.characters, style)
            .await
        {
            Ok(_) => println!("Chapter complete."),
            // Panels generated before the failure stay on the board.
            Err(err) => println!("Error: {:#}", err),
        }

        if self.board.snapshot().is_some() {
            self.chapter_menu().await?;
        }
        Ok(())
    }

    async fn review_storyline(&mut self, draft: &mut StorylineDraft) -> Result<bool> {
        loop {
            println!("\nStoryline:");
            for (i, prompt) in draft.storyline.iter().enumerate() {
                println!("  {}. {}", i + 1, prompt);
            }
            println!("Characters:");
            for character in &draft.characters {
                let marker = if character.image.is_some() { " [ref]" } else { "" };
                println!("  - {}{}: {}", character.name, marker, character.description);
            }

            let choice = Select::new(
                "Review:",
                vec![
                    "Approve and generate panels",
                    "Edit a panel prompt",
                    "Edit a character",
                    "Attach reference image",
                    "Discard",
                ],
            )
            .prompt()?;

            match choice {
                "Approve and generate panels" => return Ok(true),
                "Edit a panel prompt" => {
                    let options: Vec<String> = draft
                        .storyline
                        .iter()
                        .enumerate()
                        .map(|(i, p)| format!("{}. {}", i + 1, p))
                        .collect();
                    let picked = Select::new("Panel to edit:", options).raw_prompt()?;
                    let updated = Text::new("New prompt:")
                        .with_initial_value(&draft.storyline[picked.index])
                        .prompt()?;
                    draft.update_prompt(picked.index, &updated);
                }
                "Edit a character" => {
                    let options: Vec<String> =
                        draft.characters.iter().map(|c| c.name.clone()).collect();
                    if options.is_empty() {
                        println!("No characters to edit.");
                        continue;
                    }
                    let picked = Select::new("Character:", options).raw_prompt()?;
                    let current = draft.characters[picked.index].clone();
                    let name = Text::new("Name:").with_initial_value(&current.name).prompt()?;
                    let description = Text::new("Visual description:")
                        .with_initial_value(&current.description)
                        .prompt()?;
                    draft.update_character(
                        picked.index,
                        Character {
                            name,
                            description,
                            image: current.image,
                        },
                    );
                }
                "Attach reference image" => {
                    if let Err(err) = self.attach_reference(draft).await {
                        println!("Error: {:#}", err);
                    }
                }
                _ => return Ok(false),
            }
        }
    }

    /// Attach a reference image to a roster character, from the cross-chapter
    /// gallery or from a local file.
    async fn attach_reference(&self, draft: &mut StorylineDraft) -> Result<()> {
        if draft.characters.is_empty() {
            println!("No characters to attach to.");
            return Ok(());
        }
        let options: Vec<String> = draft.characters.iter().map(|c| c.name.clone()).collect();
        let picked = Select::new("Attach to:", options).raw_prompt()?;

        let gallery: Vec<Character> = ChapterLibrary::character_gallery(&self.chapters)
            .into_iter()
            .filter(|c| c.image.is_some())
            .collect();

        let source = if gallery.is_empty() {
            "Local image file"
        } else {
            Select::new(
                "Image source:",
                vec!["Character gallery", "Local image file"],
            )
            .prompt()?
        };

        let image = match source {
            "Character gallery" => {
                let names: Vec<String> = gallery.iter().map(|c| c.name.clone()).collect();
                let chosen = Select::new("Gallery character:", names).raw_prompt()?;
                gallery[chosen.index].image.clone()
            }
            _ => {
                let path = Text::new("Image path:").prompt()?;
                let bytes = tokio::fs::read(&path).await?;
                Some(to_data_uri(mime_for_path(&path), &bytes))
            }
        };

        let mut character = draft.characters[picked.index].clone();
        character.image = image;
        draft.update_character(picked.index, character);
        Ok(())
    }

    async fn chapter_menu(&mut self) -> Result<()> {
        loop {
            let Some(chapter) = self.board.snapshot() else {
                return Ok(());
            };
            println!(
                "\nChapter \"{}\": {} panels",
                chapter.title,
                chapter.panels.len()
            );

            let mut options = vec![
                "Save chapter",
                "Auto-layout dialogue",
                "Edit dialogue",
                "Export panels",
            ];
            if self.board.has_undo() {
                options.push("Undo last delete");
            }
            options.push("Back");

            match Select::new("Chapter:", options).prompt()? {
                "Save chapter" => {
                    self.chapters = self.library.save_chapter(&chapter).await?;
                    println!("Saved.");
                }
                "Auto-layout dialogue" => {
                    println!("Regenerating dialogue for every panel...");
                    match self.workflow().auto_layout().await {
                        Ok(_) => println!("Auto-layout complete."),
                        // Panels updated before the failure keep their new dialogue.
                        Err(err) => println!("Error: {:#}", err),
                    }
                }
                "Edit dialogue" => self.edit_dialogue(&chapter)?,
                "Export panels" => {
                    match export_chapter(self.storage.as_ref(), &self.config.export_folder, &chapter)
                        .await
                    {
                        Ok(written) => println!("Exported {} panels.", written.len()),
                        Err(err) => println!("Error: Export failed: {:#}", err),
                    }
                }
                "Undo last delete" => {
                    self.board.undo_delete();
                }
                _ => return Ok(()),
            }
        }
    }

    fn edit_dialogue(&self, chapter: &Chapter) -> Result<()> {
        if chapter.panels.is_empty() {
            println!("No panels yet.");
            return Ok(());
        }
        let options: Vec<String> = chapter
            .panels
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. {}", i + 1, truncate(&p.prompt, 60)))
            .collect();
        let picked = Select::new("Panel:", options).raw_prompt()?;
        let panel_id = chapter.panels[picked.index].id.clone();

        loop {
            let Some(snapshot) = self.board.snapshot() else {
                return Ok(());
            };
            let Some(panel) = snapshot.panel(&panel_id) else {
                return Ok(());
            };

            for line in &panel.dialogue {
                match line.kind {
                    DialogueType::Speech => {
                        println!("  [{}] {}: {}", line.id, line.character, line.line)
                    }
                    DialogueType::Sfx => println!("  [{}] (sfx) {}", line.id, line.line),
                }
            }

            let mut options = vec!["Add speech bubble", "Add sfx"];
            if !panel.dialogue.is_empty() {
                options.extend(["Edit a bubble", "Move a bubble", "Delete a bubble"]);
            }
            if self.board.has_undo() {
                options.push("Undo last delete");
            }
            options.push("Done");

            match Select::new("Dialogue:", options).prompt()? {
                "Add speech bubble" => {
                    self.board.add_element(&panel_id, DialogueType::Speech);
                }
                "Add sfx" => {
                    self.board.add_element(&panel_id, DialogueType::Sfx);
                }
                "Edit a bubble" => {
                    let Some(dialogue_id) = pick_line(panel)? else {
                        continue;
                    };
                    let line = panel.dialogue.iter().find(|d| d.id == dialogue_id);
                    let Some(line) = line else { continue };
                    let character = Text::new("Speaker:")
                        .with_initial_value(&line.character)
                        .prompt()?;
                    let text = Text::new("Line:").with_initial_value(&line.line).prompt()?;
                    self.board.update_dialogue(
                        &panel_id,
                        &dialogue_id,
                        DialogueUpdate {
                            character: Some(character),
                            line: Some(text),
                            position: None,
                        },
                    );
                }
                "Move a bubble" => {
                    let Some(dialogue_id) = pick_line(panel)? else {
                        continue;
                    };
                    let x = Text::new("X (0-100):").prompt()?;
                    let y = Text::new("Y (0-100):").prompt()?;
                    let (Ok(x), Ok(y)) = (x.trim().parse::<f64>(), y.trim().parse::<f64>()) else {
                        println!("Positions must be numbers.");
                        continue;
                    };
                    self.board.update_dialogue(
                        &panel_id,
                        &dialogue_id,
                        DialogueUpdate {
                            position: Some(Position::clamped(x, y)),
                            ..Default::default()
                        },
                    );
                }
                "Delete a bubble" => {
                    let Some(dialogue_id) = pick_line(panel)? else {
                        continue;
                    };
                    self.board.delete_dialogue(&panel_id, &dialogue_id);
                }
                "Undo last delete" => {
                    self.board.undo_delete();
                }
                _ => return Ok(()),
            }
        }
    }

    async fn open_chapter(&mut self) -> Result<()> {
        if self.chapters.is_empty() {
            println!("No saved chapters.");
            return Ok(());
        }
        let options: Vec<String> = self
            .chapters
            .iter()
            .map(|c| format!("{} ({} panels)", c.title, c.panels.len()))
            .collect();
        let picked = Select::new("Open:", options).raw_prompt()?;
        self.board.publish(self.chapters[picked.index].clone());
        self.chapter_menu().await
    }

    async fn delete_chapter(&mut self) -> Result<()> {
        if self.chapters.is_empty() {
            println!("No saved chapters.");
            return Ok(());
        }
        let options: Vec<String> = self.chapters.iter().map(|c| c.title.clone()).collect();
        let picked = Select::new("Delete:", options).raw_prompt()?;
        let chapter_id = self.chapters[picked.index].id.clone();

        let confirmed = Confirm::new("Really delete this chapter?")
            .with_default(false)
            .prompt()?;
        if confirmed {
            self.chapters = self.library.delete_chapter(&chapter_id).await?;
            println!("Deleted.");
        }
        Ok(())
    }
}

fn pick_line(panel: &crate::core::model::Panel) -> Result<Option<String>> {
    if panel.dialogue.is_empty() {
        return Ok(None);
    }
    let options: Vec<String> = panel
        .dialogue
        .iter()
        .map(|d| match d.kind {
            DialogueType::Speech => format!("{}: {}", d.character, truncate(&d.line, 40)),
            DialogueType::Sfx => format!("(sfx) {}", truncate(&d.line, 40)),
        })
        .collect();
    let picked = Select::new("Bubble:", options).raw_prompt()?;
    Ok(Some(panel.dialogue[picked.index].id.clone()))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{}...", head)
    }
}

fn mime_for_path(path: &str) -> &'static str {
    let lower = path.to_lowercase();
    if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else {
        "image/png"
    }
}
