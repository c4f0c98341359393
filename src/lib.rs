//! # Marksheet Extract
//!
//! 一个从成绩单扫描件 / PDF 中抽取结构化数据并给出字段置信度的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有外部资源，只暴露能力
//! - `Recognizer` / `HttpRecognizer` - 文字识别后端
//! - `Structurer` / `OpenAiStructurer` - 结构化（LLM）后端
//! - `pdf` - PDF 内嵌文本与页面图像读取
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，每个服务只关心一件事
//! - `PageRouter` - 页面路由（内嵌文本 / 需要识别）
//! - `Preprocessor` - 图像预处理
//! - `RecognitionService` / `StructuringService` - 后端适配（超时、重试、token 归属）
//! - `PatternValidator` / `ContextValidator` - 格式校验与字段间一致性校验
//! - `ConfidenceAggregator` - 四路信号融合
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一份文档"的完整处理流程
//! - `DocumentCtx` - 上下文封装（document_id + 批次位置）
//! - `ExtractionFlow` - 状态机（Intake → … → Done）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 应用入口，管理资源与输出
//! - `orchestrator/batch_coordinator` - 批次调度，控制并发与取消
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::{ConfidenceConfig, Config, PipelineConfig};
pub use error::{AppError, AppResult, ErrorKind};
pub use infrastructure::{Recognizer, Structurer};
pub use models::{Document, ExtractionRecord, PipelineOutcome, PipelineStage};
pub use orchestrator::{App, BatchCoordinator};
pub use workflow::{DocumentCtx, ExtractionFlow};
