//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和并发调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 应用入口
//! - 管理应用生命周期（初始化、运行）
//! - 批量加载文档（Vec<Document>）
//! - 监听 Ctrl-C 并取消批次
//! - 写出批次报告、输出全局统计
//!
//! ### `batch_coordinator` - 批次调度
//! - 控制并发数量（Semaphore）
//! - 每份文档一个任务，互不影响
//! - 按输入顺序收集结果
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (App)
//!     ↓
//! batch_coordinator (处理 Vec<Document>)
//!     ↓
//! workflow::ExtractionFlow (处理单个 Document)
//!     ↓
//! services (能力层：路由 / 预处理 / 识别 / 结构化 / 校验 / 聚合)
//!     ↓
//! infrastructure (基础设施：Recognizer / Structurer / PDF)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：batch_processor 管生命周期，batch_coordinator 管并发
//! 2. **资源隔离**：只有编排层创建外部后端
//! 3. **向下依赖**：编排层 → workflow → services → infrastructure
//! 4. **无业务逻辑**：只做调度和统计，不做具体业务判断

pub mod batch_coordinator;
pub mod batch_processor;

pub use batch_coordinator::BatchCoordinator;
pub use batch_processor::App;
