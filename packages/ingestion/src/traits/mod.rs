//! Core trait abstractions.
//!
//! The pipeline is written against these seams; production backends and
//! in-memory test doubles plug in behind them.

pub mod llm;
pub mod ocr;
pub mod store;

pub use llm::{CallOptions, LlmClient, LlmError, LlmResponse};
pub use ocr::{OcrEngine, OcrError};
pub use store::{ObjectStore, ObjectStoreExt, StoreError};
