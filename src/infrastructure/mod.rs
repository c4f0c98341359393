//! 基础设施层
//!
//! 持有外部资源（识别服务、LLM 客户端）并以 trait 的形式暴露能力；
//! 上层只依赖 `Recognizer` / `Structurer`，测试中可以替换为内存实现。

pub mod pdf;
pub mod recognizer;
pub mod structurer;

pub use recognizer::{HttpRecognizer, Recognizer};
pub use structurer::{OpenAiStructurer, RawField, StructuredFields, Structurer, StructuringRequest};
