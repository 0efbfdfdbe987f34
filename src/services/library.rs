use crate::core::io::Storage;
use crate::core::model::{Chapter, Character};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// Saved chapters, kept as a single serialized list: read once at startup,
/// rewritten wholesale on every save or delete. Most recently saved first.
pub struct ChapterLibrary {
    storage: Arc<dyn Storage>,
    path: String,
}

impl ChapterLibrary {
    pub fn new(storage: Arc<dyn Storage>, path: &str) -> Self {
        Self {
            storage,
            path: path.to_string(),
        }
    }

    pub async fn load(&self) -> Result<Vec<Chapter>> {
        if !self.storage.exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let bytes = self.storage.read(&self.path).await?;
        let content = String::from_utf8(bytes)?;
        serde_json::from_str(&content).context("Failed to parse chapter library")
    }

    /// Upsert by chapter id; the saved chapter moves to the front of the list.
    pub async fn save_chapter(&self, chapter: &Chapter) -> Result<Vec<Chapter>> {
        let existing = self.load().await?;
        let mut chapters = vec![chapter.clone()];
        chapters.extend(existing.into_iter().filter(|c| c.id != chapter.id));
        self.write(&chapters).await?;
        Ok(chapters)
    }

    pub async fn delete_chapter(&self, chapter_id: &str) -> Result<Vec<Chapter>> {
        let chapters: Vec<Chapter> = self
            .load()
            .await?
            .into_iter()
            .filter(|c| c.id != chapter_id)
            .collect();
        self.write(&chapters).await?;
        Ok(chapters)
    }

    async fn write(&self, chapters: &[Chapter]) -> Result<()> {
        let content = serde_json::to_string_pretty(chapters)?;
        self.storage.write(&self.path, content.as_bytes()).await
    }

    /// Unique characters across all saved chapters, first occurrence wins,
    /// keyed by name plus description prefix. Feeds the reference-image
    /// gallery shown during storyline review.
    pub fn character_gallery(chapters: &[Chapter]) -> Vec<Character> {
        let mut seen = HashSet::new();
        let mut gallery = Vec::new();
        for chapter in chapters {
            for character in &chapter.characters {
                if seen.insert(character.gallery_key()) {
                    gallery.push(character.clone());
                }
            }
        }
        gallery
    }
}
