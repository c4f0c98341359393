//! 批量文档处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责批量文档的处理和资源管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：加载配置、创建识别与结构化后端、检查后端状态
//! 2. **批量加载**：扫描并加载输入目录中的所有文档（`Vec<Document>`）
//! 3. **并发处理**：交给 `BatchCoordinator`，受最大并发数限制
//! 4. **中断处理**：Ctrl-C 取消尚未开始的文档
//! 5. **结果输出**：把批次报告写成 JSON，并输出全局统计

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::infrastructure::{HttpRecognizer, OpenAiStructurer};
use crate::models::document::Document;
use crate::models::outcome::BatchReport;
use crate::orchestrator::batch_coordinator::BatchCoordinator;
use crate::utils::logging;
use crate::workflow::ExtractionFlow;

/// 应用主结构
pub struct App {
    config: Config,
    coordinator: BatchCoordinator,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        logging::log_startup(&config);

        let pipeline = config.pipeline().context("加载流水线配置失败")?;
        let recognizer = Arc::new(HttpRecognizer::new(&config).context("创建识别客户端失败")?);
        let structurer = Arc::new(OpenAiStructurer::new(&config));
        let flow = Arc::new(ExtractionFlow::new(pipeline, recognizer, structurer)?);

        let (recognizer_ok, structurer_ok) = flow.health_check().await;
        logging::log_backend_health(recognizer_ok, structurer_ok);

        let coordinator = BatchCoordinator::new(flow, config.max_concurrent_documents);
        Ok(Self { config, coordinator })
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<()> {
        let documents = self.load_documents().await?;

        if documents.is_empty() {
            warn!("⚠️ 没有找到待处理的文档，程序结束");
            return Ok(());
        }

        logging::log_documents_loaded(documents.len(), self.config.max_concurrent_documents);
        logging::log_batch_start(documents.len());

        let cancel = CancellationToken::new();
        let listener = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("⏹️ 收到中断信号，取消尚未开始的文档");
                    cancel.cancel();
                }
            }
        });

        let started = Instant::now();
        let outcomes = self.coordinator.run(documents, cancel).await;
        listener.abort();

        let report = BatchReport::new(&outcomes, started.elapsed().as_millis() as u64);
        self.write_report(&report).await?;

        logging::print_final_stats(
            report.successful,
            report.partial,
            report.failed,
            report.total_files,
            &self.config.output_file,
        );

        Ok(())
    }

    /// 加载文档
    async fn load_documents(&self) -> Result<Vec<Document>> {
        info!("\n📁 正在扫描待处理的文档...");
        crate::models::load_all_documents(&self.config.input_folder, self.config.max_file_size).await
    }

    /// 写出批次报告
    async fn write_report(&self, report: &BatchReport<'_>) -> Result<()> {
        let json = serde_json::to_string_pretty(report)?;
        tokio::fs::write(&self.config.output_file, json)
            .await
            .with_context(|| format!("无法写入结果文件: {}", self.config.output_file))?;
        Ok(())
    }
}
