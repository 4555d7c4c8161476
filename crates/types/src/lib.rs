//! Strongly typed document and execution models shared by the Folio engine and CLI.
//!
//! Documents decompose into ordered [`Section`]s of typed [`RuntimeBlock`]s. Every
//! executor answers with an [`ExecutorResult`], and a run finishes with a [`RunReport`].

pub mod document;
pub mod result;
pub mod run;
pub mod value;

pub use document::{BlockKind, Document, RuntimeBlock, Section, UnknownBlockKind};
pub use result::{BlockOutcome, BlockPayload, ExecutorResult, FormField, MapConfig, MapSprite, NavChoice, Viewport};
pub use run::{BlockRecord, DocumentRunControl, DocumentRunEvent, DocumentRunPhase, RunReport, RunStatus};
pub use value::{RuntimeValue, format_number, number_to_json};
