// src/history/mod.rs

//! Transition history: what gets recorded, where it goes, and how a run is
//! rebuilt from it.

mod reader;
mod record;
mod recovery;
mod sink;

pub use reader::{parse_history, read_history};
pub use recovery::latest_unfinished_dag;
pub use record::TransitionRecord;
pub use sink::{HistorySink, JsonLinesHistory, MemoryHistory, NoopHistory};
