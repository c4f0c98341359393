//! 流水线结果

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;

use crate::error::ErrorKind;
use crate::models::record::ExtractionRecord;

/// 流水线阶段，顺序即状态机的前进方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PipelineStage {
    Intake,
    Preprocessing,
    Recognizing,
    Structuring,
    Validating,
    Aggregating,
    Done,
}

impl Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineStage::Intake => "Intake",
            PipelineStage::Preprocessing => "Preprocessing",
            PipelineStage::Recognizing => "Recognizing",
            PipelineStage::Structuring => "Structuring",
            PipelineStage::Validating => "Validating",
            PipelineStage::Aggregating => "Aggregating",
            PipelineStage::Done => "Done",
        };
        f.write_str(name)
    }
}

/// 阶段警告：某一步降级但没有中断流水线
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageWarning {
    pub stage: PipelineStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    pub message: String,
}

impl StageWarning {
    pub fn new(stage: PipelineStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            page: None,
            message: message.into(),
        }
    }

    pub fn on_page(stage: PipelineStage, page: usize, message: impl Into<String>) -> Self {
        Self {
            stage,
            page: Some(page),
            message: message.into(),
        }
    }
}

impl Display for StageWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.page {
            Some(page) => write!(f, "[{}] 第 {} 页: {}", self.stage, page + 1, self.message),
            None => write!(f, "[{}] {}", self.stage, self.message),
        }
    }
}

/// 各阶段耗时
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Timing {
    pub total_ms: u64,
    pub stages: BTreeMap<PipelineStage, u64>,
}

/// 单份文档的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Success {
        document_id: String,
        record: ExtractionRecord,
        timing: Timing,
        model_used: String,
    },
    PartialSuccess {
        document_id: String,
        record: ExtractionRecord,
        warnings: Vec<StageWarning>,
        timing: Timing,
        model_used: String,
    },
    Failure {
        document_id: String,
        kind: ErrorKind,
        stage: PipelineStage,
        message: String,
        timing: Timing,
    },
}

impl PipelineOutcome {
    pub fn document_id(&self) -> &str {
        match self {
            PipelineOutcome::Success { document_id, .. }
            | PipelineOutcome::PartialSuccess { document_id, .. }
            | PipelineOutcome::Failure { document_id, .. } => document_id,
        }
    }

    pub fn record(&self) -> Option<&ExtractionRecord> {
        match self {
            PipelineOutcome::Success { record, .. } | PipelineOutcome::PartialSuccess { record, .. } => Some(record),
            PipelineOutcome::Failure { .. } => None,
        }
    }

    pub fn warnings(&self) -> &[StageWarning] {
        match self {
            PipelineOutcome::PartialSuccess { warnings, .. } => warnings,
            _ => &[],
        }
    }

    pub fn timing(&self) -> &Timing {
        match self {
            PipelineOutcome::Success { timing, .. }
            | PipelineOutcome::PartialSuccess { timing, .. }
            | PipelineOutcome::Failure { timing, .. } => timing,
        }
    }

    pub fn status(&self) -> OutcomeStatus {
        match self {
            PipelineOutcome::Success { .. } => OutcomeStatus::Success,
            PipelineOutcome::PartialSuccess { .. } => OutcomeStatus::PartialSuccess,
            PipelineOutcome::Failure { .. } => OutcomeStatus::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PipelineOutcome::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, PipelineOutcome::Failure { .. })
    }

    /// 失败时的错误分类
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            PipelineOutcome::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// 带阶段标注的说明
    pub fn explanation(&self) -> String {
        match self {
            PipelineOutcome::Success { .. } => "[Done] 全部阶段完成".to_string(),
            PipelineOutcome::PartialSuccess { warnings, .. } => warnings
                .iter()
                .map(|w| w.to_string())
                .collect::<Vec<_>>()
                .join("; "),
            PipelineOutcome::Failure {
                kind, stage, message, ..
            } => format!("[{}] {}: {}", stage, kind, message),
        }
    }

    /// 转为对外输出的报告
    pub fn to_report(&self) -> OutcomeReport<'_> {
        let (error, model_used) = match self {
            PipelineOutcome::Success { model_used, .. }
            | PipelineOutcome::PartialSuccess { model_used, .. } => (None, Some(model_used.as_str())),
            PipelineOutcome::Failure {
                kind, stage, message, ..
            } => (
                Some(ErrorReport {
                    kind: *kind,
                    stage: *stage,
                    message,
                }),
                None,
            ),
        };
        OutcomeReport {
            document_id: self.document_id(),
            status: self.status(),
            explanation: self.explanation(),
            data: self.record(),
            confidence_summary: self.record().map(|r| r.confidence_summary()),
            warnings: self.warnings(),
            error,
            processing_time_ms: self.timing().total_ms,
            stage_timings_ms: &self.timing().stages,
            model_used,
        }
    }
}

/// 结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    PartialSuccess,
    Failure,
}

/// 失败详情
#[derive(Debug, Serialize)]
pub struct ErrorReport<'a> {
    pub kind: ErrorKind,
    pub stage: PipelineStage,
    pub message: &'a str,
}

/// 单份文档的输出报告
#[derive(Debug, Serialize)]
pub struct OutcomeReport<'a> {
    pub document_id: &'a str,
    pub status: OutcomeStatus,
    pub explanation: String,
    pub data: Option<&'a ExtractionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_summary: Option<BTreeMap<&'static str, f64>>,
    #[serde(skip_serializing_if = "no_warnings")]
    pub warnings: &'a [StageWarning],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport<'a>>,
    pub processing_time_ms: u64,
    pub stage_timings_ms: &'a BTreeMap<PipelineStage, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<&'a str>,
}

fn no_warnings(warnings: &&[StageWarning]) -> bool {
    warnings.is_empty()
}

/// 整个批次的输出报告
#[derive(Debug, Serialize)]
pub struct BatchReport<'a> {
    pub total_files: usize,
    pub successful: usize,
    pub partial: usize,
    pub failed: usize,
    pub processing_time_ms: u64,
    pub results: Vec<OutcomeReport<'a>>,
}

impl<'a> BatchReport<'a> {
    pub fn new(outcomes: &'a [PipelineOutcome], processing_time_ms: u64) -> Self {
        let count = |status: OutcomeStatus| outcomes.iter().filter(|o| o.status() == status).count();
        Self {
            total_files: outcomes.len(),
            successful: count(OutcomeStatus::Success),
            partial: count(OutcomeStatus::PartialSuccess),
            failed: count(OutcomeStatus::Failure),
            processing_time_ms,
            results: outcomes.iter().map(|o| o.to_report()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(stage: PipelineStage) -> PipelineOutcome {
        PipelineOutcome::Failure {
            document_id: "doc-1".into(),
            kind: ErrorKind::StructuringError,
            stage,
            message: "backend unavailable".into(),
            timing: Timing::default(),
        }
    }

    #[test]
    fn test_stage_order() {
        assert!(PipelineStage::Intake < PipelineStage::Preprocessing);
        assert!(PipelineStage::Aggregating < PipelineStage::Done);
    }

    #[test]
    fn test_failure_explanation_names_stage() {
        let outcome = failure(PipelineStage::Structuring);
        assert_eq!(
            outcome.explanation(),
            "[Structuring] StructuringError: backend unavailable"
        );
        assert_eq!(outcome.error_kind(), Some(ErrorKind::StructuringError));
    }

    #[test]
    fn test_failure_report_serialization() {
        let outcome = failure(PipelineStage::Structuring);
        let json = serde_json::to_value(outcome.to_report()).unwrap();
        assert_eq!(json["status"], "failure");
        assert!(json["data"].is_null());
        assert_eq!(json["error"]["stage"], "Structuring");
        assert!(json.get("warnings").is_none());
    }

    #[test]
    fn test_batch_report_counts() {
        let outcomes = vec![failure(PipelineStage::Intake), failure(PipelineStage::Recognizing)];
        let report = BatchReport::new(&outcomes, 120);
        assert_eq!(report.total_files, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.successful, 0);
    }

    #[test]
    fn test_warning_display() {
        let warning = StageWarning::on_page(PipelineStage::Recognizing, 1, "识别服务不可用");
        assert_eq!(warning.to_string(), "[Recognizing] 第 2 页: 识别服务不可用");
    }
}
