//! Bilibili stage-drama ingestion: discover videos, fetch their metadata,
//! extract competition/group/work mentions with an LLM, resolve them to
//! canonical entities, and upsert a canonical video record.

pub mod composer;
pub mod detail;
pub mod discovery;
pub mod extractor;
pub mod pipeline;
pub mod resolver;
pub mod state;
pub mod traits;
pub mod upsert;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use pipeline::{BatchRequest, BatchRun, ItemReport, Pipeline, PipelineDeps, Timeouts};
pub use state::{ItemState, Stage, Terminal};
