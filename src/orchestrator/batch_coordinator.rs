//! 批次调度 - 编排层
//!
//! 并发运行多份文档的处理流程：
//! - 用 Semaphore 限制同时处理的文档数
//! - 每份文档一个独立任务，任务 panic 只影响它自己的结果
//! - 取消时尚未开始的文档立即返回 Cancelled，已开始的继续完成
//! - 输出顺序与输入顺序一致

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::ErrorKind;
use crate::models::document::Document;
use crate::models::outcome::{PipelineOutcome, PipelineStage, Timing};
use crate::workflow::{DocumentCtx, ExtractionFlow};

/// 批次调度器
#[derive(Clone)]
pub struct BatchCoordinator {
    flow: Arc<ExtractionFlow>,
    max_concurrency: usize,
}

impl BatchCoordinator {
    pub fn new(flow: Arc<ExtractionFlow>, max_concurrency: usize) -> Self {
        Self {
            flow,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// 处理一批文档，每份文档对应一个结果，顺序与输入一致
    pub async fn run(&self, documents: Vec<Document>, cancel: CancellationToken) -> Vec<PipelineOutcome> {
        let total = documents.len();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut ids = Vec::with_capacity(total);
        let mut handles = Vec::with_capacity(total);

        for (idx, document) in documents.into_iter().enumerate() {
            let ctx = DocumentCtx::new(document.id.clone(), idx + 1, total);
            ids.push(document.id.clone());

            let flow = self.flow.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    warn!("{} ⏹️ 批次已取消，跳过", ctx);
                    return cancelled(&ctx.document_id);
                };
                flow.run(document, &ctx).await
            }));
        }

        let results = join_all(handles).await;
        let outcomes: Vec<PipelineOutcome> = ids
            .into_iter()
            .zip(results)
            .enumerate()
            .map(|(idx, (document_id, result))| match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("[文档 {}/{} {}] ❌ 任务异常退出: {}", idx + 1, total, document_id, e);
                    PipelineOutcome::Failure {
                        document_id,
                        kind: ErrorKind::Internal,
                        stage: PipelineStage::Intake,
                        message: format!("任务异常退出: {}", e),
                        timing: Timing::default(),
                    }
                }
            })
            .collect();

        let failed = outcomes.iter().filter(|o| o.is_failure()).count();
        info!("✓ 批次完成: {} 个文档，失败 {}", total, failed);
        outcomes
    }
}

/// 未开始就被取消的文档
fn cancelled(document_id: &str) -> PipelineOutcome {
    PipelineOutcome::Failure {
        document_id: document_id.to_string(),
        kind: ErrorKind::Cancelled,
        stage: PipelineStage::Intake,
        message: "批次已取消，文档未开始处理".to_string(),
        timing: Timing::default(),
    }
}
