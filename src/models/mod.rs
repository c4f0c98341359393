pub mod document;
pub mod field;
pub mod page_image;
pub mod loaders;
pub mod outcome;
pub mod recognition;
pub mod record;
pub mod schema;

pub use document::{Document, MediaType, Page, PageRoute};
pub use field::{
    AbsentReason, ConfidenceComponents, DraftField, Field, FieldPath, FieldType, FieldValue, Value,
};
pub use page_image::{ImageEncoding, PreprocessStep, PreprocessedImage};
pub use loaders::{load_all_documents, load_document};
pub use outcome::{BatchReport, OutcomeReport, PipelineOutcome, PipelineStage, StageWarning, Timing};
pub use recognition::{BoundingBox, DocumentText, RawRecognitionResult, RecognizedToken};
pub use record::{
    CandidateDetails, DocumentInfo, ExtractionDraft, ExtractionRecord, OverallResult, SubjectEntry,
};
pub use schema::{ExtractionSchema, FieldSpec, SectionSchema};
