use crate::core::model::{
    user_dialogue_id, Chapter, DialogueLine, DialogueType, Panel, Position,
};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Single-slot undo buffer entry: the deleted line and where it sat.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedBubble {
    pub panel_id: String,
    pub line: DialogueLine,
    pub index: usize,
}

/// Partial update merged into an existing dialogue line.
#[derive(Debug, Default, Clone)]
pub struct DialogueUpdate {
    pub character: Option<String>,
    pub line: Option<String>,
    pub position: Option<Position>,
}

#[derive(Default)]
struct BoardState {
    chapter: Option<Chapter>,
    undo: Option<DeletedBubble>,
}

/// The chapter-in-progress shared between the orchestrators and interactive
/// edits. Orchestrators commit whole panels or dialogue lists; edits address
/// panels and lines by id only, never by position, so they interleave safely
/// with generation running on other panels. Last write wins.
#[derive(Default)]
pub struct ChapterBoard {
    state: RwLock<BoardState>,
}

impl ChapterBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BoardState> {
        self.state.read().expect("board lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, BoardState> {
        self.state.write().expect("board lock poisoned")
    }

    /// Replace the current chapter snapshot. Switching chapters invalidates
    /// the undo buffer.
    pub fn publish(&self, chapter: Chapter) {
        let mut state = self.write();
        state.undo = None;
        state.chapter = Some(chapter);
    }

    pub fn clear(&self) {
        let mut state = self.write();
        state.chapter = None;
        state.undo = None;
    }

    pub fn snapshot(&self) -> Option<Chapter> {
        self.read().chapter.clone()
    }

    pub fn has_undo(&self) -> bool {
        self.read().undo.is_some()
    }

    pub fn clear_undo(&self) {
        self.write().undo = None;
    }

    /// Orchestrator commit: panels arrive in storyline order.
    pub fn append_panel(&self, panel: Panel) -> bool {
        let mut state = self.write();
        match state.chapter.as_mut() {
            Some(chapter) => {
                chapter.panels.push(panel);
                true
            }
            None => false,
        }
    }

    /// Orchestrator commit for auto-layout: swap a panel's whole dialogue list.
    pub fn replace_dialogue(&self, panel_id: &str, dialogue: Vec<DialogueLine>) -> bool {
        let mut state = self.write();
        let Some(panel) = state.chapter.as_mut().and_then(|c| c.panel_mut(panel_id)) else {
            return false;
        };
        panel.dialogue = dialogue;
        true
    }

    /// Append a defaulted bubble to a panel. Clears the undo buffer.
    pub fn add_element(&self, panel_id: &str, kind: DialogueType) -> Option<String> {
        let element = DialogueLine {
            id: user_dialogue_id(),
            character: match kind {
                DialogueType::Speech => "Character".to_string(),
                DialogueType::Sfx => String::new(),
            },
            line: match kind {
                DialogueType::Speech => "New dialogue...".to_string(),
                DialogueType::Sfx => "SFX!".to_string(),
            },
            position: Position::center(),
            kind,
        };

        let mut state = self.write();
        state.undo = None;
        let panel = state.chapter.as_mut().and_then(|c| c.panel_mut(panel_id))?;
        let id = element.id.clone();
        panel.dialogue.push(element);
        Some(id)
    }

    /// Remove a dialogue line by id, capturing it and its index so a single
    /// prior deletion can be undone.
    pub fn delete_dialogue(&self, panel_id: &str, dialogue_id: &str) -> bool {
        let mut state = self.write();
        let Some(panel) = state.chapter.as_mut().and_then(|c| c.panel_mut(panel_id)) else {
            return false;
        };
        let Some(index) = panel.dialogue.iter().position(|d| d.id == dialogue_id) else {
            return false;
        };
        let line = panel.dialogue.remove(index);
        state.undo = Some(DeletedBubble {
            panel_id: panel_id.to_string(),
            line,
            index,
        });
        true
    }

    pub fn update_dialogue(
        &self,
        panel_id: &str,
        dialogue_id: &str,
        update: DialogueUpdate,
    ) -> bool {
        let mut state = self.write();
        let Some(panel) = state.chapter.as_mut().and_then(|c| c.panel_mut(panel_id)) else {
            return false;
        };
        let Some(line) = panel.dialogue.iter_mut().find(|d| d.id == dialogue_id) else {
            return false;
        };
        if let Some(character) = update.character {
            line.character = character;
        }
        if let Some(text) = update.line {
            line.line = text;
        }
        if let Some(position) = update.position {
            line.position = Position::clamped(position.x, position.y);
        }
        true
    }

    /// Reinsert the captured line at its captured index (clamped to the
    /// current list length), then clear the buffer. The index is not
    /// re-validated against structural edits made since the deletion.
    pub fn undo_delete(&self) -> bool {
        let mut state = self.write();
        let Some(deleted) = state.undo.take() else {
            return false;
        };
        let Some(panel) = state
            .chapter
            .as_mut()
            .and_then(|c| c.panel_mut(&deleted.panel_id))
        else {
            return false;
        };
        let index = deleted.index.min(panel.dialogue.len());
        panel.dialogue.insert(index, deleted.line);
        true
    }
}
