//! Training Mode: explicit, multi-turn teaching of phrases, routines and
//! context rules. Sessions are drafted to disk after every step so an
//! interrupted session can be resumed on the next start.

pub mod draft;
pub mod mode;
pub mod parser;
pub mod session;

pub use draft::{DraftStore, FileDraftStore, InMemoryDraftStore};
pub use mode::{TrainingError, TrainingMode};
pub use session::{SessionType, TrainingSession, TrainingState};
