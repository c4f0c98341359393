pub mod aggregator;
pub mod context_validator;
pub mod page_router;
pub mod pattern_validator;
pub mod preprocessor;
pub mod recognition;
pub mod structuring;

pub use aggregator::ConfidenceAggregator;
pub use context_validator::{ContextScores, ContextValidator};
pub use page_router::PageRouter;
pub use pattern_validator::PatternValidator;
pub use preprocessor::Preprocessor;
pub use recognition::RecognitionService;
pub use structuring::StructuringService;
