pub mod board;
pub mod export;
pub mod genai;
pub mod library;
pub mod panel;
pub mod retry;
pub mod session;
pub mod storyline;
pub mod workflow;
