pub mod document_ctx;
pub mod extraction_flow;

pub use document_ctx::DocumentCtx;
pub use extraction_flow::{ExtractionFlow, ScoredField};
