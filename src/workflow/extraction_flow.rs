//! 单份文档处理流程 - 流程层
//!
//! 核心职责：定义"一份成绩单"的完整处理流程
//!
//! 状态只能向前推进：
//! Intake → Preprocessing → Recognizing → Structuring → Validating → Aggregating → Done
//!
//! 失败策略：
//! 1. 单页预处理失败：记录警告，原图直接送去识别
//!    单页识别失败：该页文本视为空，记录警告后继续
//! 2. 所有页面都没有文本：RecognitionError，整份失败
//! 3. 结构化重试后仍失败：StructuringError，整份失败
//! 4. 字段缺失不算失败，只在必填字段缺失或置信度过低时降级为部分成功

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{AggregationError, ConfigError, ErrorKind, RoutingError};
use crate::infrastructure::recognizer::Recognizer;
use crate::infrastructure::structurer::Structurer;
use crate::models::document::{Document, Page, PageRoute};
use crate::models::field::{ConfidenceComponents, DraftField, Field, FieldValue, Value};
use crate::models::outcome::{PipelineOutcome, PipelineStage, StageWarning, Timing};
use crate::models::page_image::PreprocessedImage;
use crate::models::recognition::{DocumentText, RawRecognitionResult};
use crate::models::record::{ExtractionDraft, ExtractionRecord};
use crate::services::recognition::ocr_confidence;
use crate::services::{
    ConfidenceAggregator, ContextValidator, PageRouter, PatternValidator, Preprocessor,
    RecognitionService, StructuringService,
};
use crate::workflow::document_ctx::DocumentCtx;

/// 校验阶段的产物：取值加四路信号
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredField {
    pub value: Value,
    pub components: ConfidenceComponents,
}

/// 预处理之后、识别之前的页面输入
enum PageInput {
    Embedded(String),
    Image(PreprocessedImage),
    /// 页面既没有文本也没有图像
    Unavailable,
}

/// 记录当前阶段与各阶段耗时
struct StageClock {
    document_id: String,
    stage: PipelineStage,
    started: Instant,
    stage_started: Instant,
    timing: Timing,
    warnings: Vec<StageWarning>,
}

impl StageClock {
    fn start(document_id: &str) -> Self {
        let now = Instant::now();
        Self {
            document_id: document_id.to_string(),
            stage: PipelineStage::Intake,
            started: now,
            stage_started: now,
            timing: Timing::default(),
            warnings: Vec::new(),
        }
    }

    /// 进入下一阶段，并记下上一阶段的耗时
    fn enter(&mut self, next: PipelineStage) {
        debug_assert!(next > self.stage, "阶段只能向前推进");
        let now = Instant::now();
        self.timing
            .stages
            .insert(self.stage, (now - self.stage_started).as_millis() as u64);
        self.stage = next;
        self.stage_started = now;
    }

    fn warn(&mut self, warning: StageWarning) {
        self.warnings.push(warning);
    }

    fn close(&mut self) -> Timing {
        let now = Instant::now();
        self.timing
            .stages
            .insert(self.stage, (now - self.stage_started).as_millis() as u64);
        self.timing.total_ms = (now - self.started).as_millis() as u64;
        std::mem::take(&mut self.timing)
    }

    fn fail(mut self, kind: ErrorKind, message: impl Into<String>) -> PipelineOutcome {
        let timing = self.close();
        PipelineOutcome::Failure {
            document_id: self.document_id,
            kind,
            stage: self.stage,
            message: message.into(),
            timing,
        }
    }

    fn finish(mut self, record: ExtractionRecord, model_used: String) -> PipelineOutcome {
        self.enter(PipelineStage::Done);
        let timing = self.close();
        if self.warnings.is_empty() {
            PipelineOutcome::Success {
                document_id: self.document_id,
                record,
                timing,
                model_used,
            }
        } else {
            PipelineOutcome::PartialSuccess {
                document_id: self.document_id,
                record,
                warnings: self.warnings,
                timing,
                model_used,
            }
        }
    }
}

/// 文档处理流程
///
/// - 编排单份文档从页面到字段置信度的完整流程
/// - 决定哪些错误降级为警告、哪些直接失败
/// - 只依赖业务能力（services），不持有批次状态
pub struct ExtractionFlow {
    router: PageRouter,
    preprocessor: Arc<Preprocessor>,
    recognition: RecognitionService,
    structuring: StructuringService,
    patterns: PatternValidator,
    context: ContextValidator,
    aggregator: ConfidenceAggregator,
    embedded_text_confidence: f64,
}

impl ExtractionFlow {
    /// 创建新的文档处理流程
    pub fn new(
        config: PipelineConfig,
        recognizer: Arc<dyn Recognizer>,
        structurer: Arc<dyn Structurer>,
    ) -> Result<Self, ConfigError> {
        config.confidence.validate()?;
        Ok(Self {
            router: PageRouter::new(config.min_embedded_text_chars),
            preprocessor: Arc::new(Preprocessor::new(config.preprocess)),
            recognition: RecognitionService::new(recognizer),
            structuring: StructuringService::new(
                structurer,
                config.structuring_timeout,
                config.structuring_attempts,
                config.max_subjects,
            ),
            patterns: PatternValidator::new(&config.confidence.pattern)?,
            context: ContextValidator::new(config.confidence.context.clone()),
            aggregator: ConfidenceAggregator::new(config.confidence),
            embedded_text_confidence: config.embedded_text_confidence,
        })
    }

    /// 两个外部后端是否可用 (识别, 结构化)
    pub async fn health_check(&self) -> (bool, bool) {
        tokio::join!(self.recognition.health_check(), self.structuring.health_check())
    }

    pub fn model_id(&self) -> String {
        self.structuring.model_id()
    }

    /// 处理单份文档，任何情况下都返回一个结果
    pub async fn run(&self, document: Document, ctx: &DocumentCtx) -> PipelineOutcome {
        let mut clock = StageClock::start(&document.id);
        info!("{} 📄 开始处理 ({} 字节)", ctx, document.bytes.len());

        // ========== Intake: 页面路由 ==========
        let pages = match self.router.route(&document) {
            Ok(pages) if pages.is_empty() => {
                return clock.fail(ErrorKind::ValidationError, RoutingError::NoPages.to_string())
            }
            Ok(pages) => pages,
            Err(e) => {
                error!("{} ❌ 页面路由失败: {}", ctx, e);
                return clock.fail(ErrorKind::ValidationError, e.to_string());
            }
        };
        drop(document);
        let embedded = pages.iter().filter(|p| p.route == PageRoute::EmbeddedText).count();
        info!(
            "{} ✓ 路由完成: {} 页 (内嵌文本 {}，需识别 {})",
            ctx,
            pages.len(),
            embedded,
            pages.len() - embedded
        );

        // ========== Preprocessing ==========
        clock.enter(PipelineStage::Preprocessing);
        let inputs = self.preprocess_pages(pages, &mut clock, ctx).await;

        // ========== Recognizing ==========
        clock.enter(PipelineStage::Recognizing);
        let text = self.recognize_pages(inputs, &mut clock, ctx).await;
        if text.is_empty() {
            error!("{} ❌ 所有页面都没有可用文本", ctx);
            return clock.fail(ErrorKind::RecognitionError, "所有页面都没有识别出文本");
        }
        debug!("{} 全文 {} 字符，{} 个 token", ctx, text.text.len(), text.tokens.len());

        // ========== Structuring ==========
        clock.enter(PipelineStage::Structuring);
        info!("{} 🤖 正在结构化...", ctx);
        let draft = match self.structuring.structure(&text).await {
            Ok(draft) => draft,
            Err(e) => {
                error!("{} ❌ 结构化失败: {}", ctx, e);
                return clock.fail(ErrorKind::StructuringError, e.to_string());
            }
        };
        info!("{} ✓ 结构化完成，{} 个科目", ctx, draft.subjects.len());

        // ========== Validating ==========
        clock.enter(PipelineStage::Validating);
        let scored = self.score_fields(draft, &text);

        // ========== Aggregating ==========
        clock.enter(PipelineStage::Aggregating);
        let record = match self.aggregate_fields(scored) {
            Ok(record) => record,
            Err(e) => {
                error!("{} ❌ 置信度聚合失败: {}", ctx, e);
                return clock.fail(ErrorKind::AggregationError, e.to_string());
            }
        };
        for warning in required_field_warnings(&record, &self.aggregator) {
            warn!("{} ⚠️ {}", ctx, warning.message);
            clock.warn(warning);
        }
        debug!("{} 置信度摘要: {:?}", ctx, record.confidence_summary());

        let outcome = clock.finish(record, self.structuring.model_id());
        match &outcome {
            PipelineOutcome::Success { .. } => info!("{} ✅ 处理成功", ctx),
            _ => warn!("{} ⚠️ 部分成功，{} 条警告", ctx, outcome.warnings().len()),
        }
        outcome
    }

    /// 逐页预处理，CPU 密集部分放到阻塞线程池
    ///
    /// 预处理失败只降级：记录警告后把原图直接交给识别后端。
    async fn preprocess_pages(
        &self,
        pages: Vec<Page>,
        clock: &mut StageClock,
        ctx: &DocumentCtx,
    ) -> Vec<(usize, PageInput)> {
        let mut inputs = Vec::with_capacity(pages.len());
        for page in pages {
            let input = match (page.route, page.embedded_text, page.image) {
                (PageRoute::EmbeddedText, Some(text), _) => PageInput::Embedded(text),
                (_, _, Some(image)) => {
                    let bytes = Arc::new(image);
                    let preprocessor = Arc::clone(&self.preprocessor);
                    let job = Arc::clone(&bytes);
                    let result = tokio::task::spawn_blocking(move || preprocessor.process(&job))
                        .await
                        .map_err(|e| format!("预处理任务异常退出: {}", e))
                        .and_then(|r| r.map_err(|e| e.to_string()));
                    match result {
                        Ok(processed) => {
                            for message in &processed.warnings {
                                clock.warn(StageWarning::on_page(PipelineStage::Preprocessing, page.index, message));
                            }
                            PageInput::Image(processed)
                        }
                        Err(message) => {
                            warn!("{} ⚠️ 第 {} 页预处理失败，改用原图: {}", ctx, page.index + 1, message);
                            clock.warn(StageWarning::on_page(PipelineStage::Preprocessing, page.index, message));
                            let original = Arc::try_unwrap(bytes).unwrap_or_else(|shared| (*shared).clone());
                            PageInput::Image(PreprocessedImage::passthrough(original))
                        }
                    }
                }
                _ => {
                    warn!("{} ⚠️ 第 {} 页没有文本也没有图像", ctx, page.index + 1);
                    clock.warn(StageWarning::on_page(
                        PipelineStage::Preprocessing,
                        page.index,
                        "页面没有可识别的图像",
                    ));
                    PageInput::Unavailable
                }
            };
            inputs.push((page.index, input));
        }
        inputs
    }

    async fn recognize_pages(
        &self,
        inputs: Vec<(usize, PageInput)>,
        clock: &mut StageClock,
        ctx: &DocumentCtx,
    ) -> DocumentText {
        let mut results = Vec::with_capacity(inputs.len());
        for (index, input) in inputs {
            let result = match input {
                PageInput::Embedded(text) => {
                    RawRecognitionResult::from_embedded_text(&text, index, self.embedded_text_confidence)
                }
                PageInput::Image(image) => match self.recognition.recognize_page(index, &image).await {
                    Ok(result) => {
                        debug!("{} 第 {} 页识别出 {} 个 token", ctx, index + 1, result.tokens.len());
                        result
                    }
                    Err(e) => {
                        warn!("{} ⚠️ 第 {} 页识别失败: {}", ctx, index + 1, e);
                        clock.warn(StageWarning::on_page(PipelineStage::Recognizing, index, e.to_string()));
                        RawRecognitionResult::default()
                    }
                },
                PageInput::Unavailable => RawRecognitionResult::default(),
            };
            results.push(result);
        }
        DocumentText::merge(results)
    }

    /// 为每个字段计算四路信号
    fn score_fields(&self, draft: ExtractionDraft, text: &DocumentText) -> ExtractionRecord<ScoredField> {
        let context = self.context.validate(&draft);
        draft.map(|path, spec, field| match field {
            Field::Present(DraftField {
                raw,
                value,
                model_confidence,
                token_indices,
            }) => Field::Present(ScoredField {
                components: ConfidenceComponents::new(
                    ocr_confidence(&text.tokens, &token_indices),
                    self.patterns.validate_field(spec, &raw),
                    model_confidence,
                    context.score(path),
                ),
                value,
            }),
            Field::Absent(reason) => Field::Absent(reason),
        })
    }

    /// 融合信号，得到最终记录
    fn aggregate_fields(
        &self,
        scored: ExtractionRecord<ScoredField>,
    ) -> Result<ExtractionRecord, AggregationError> {
        scored.try_map(|_, spec, field| match field {
            Field::Present(ScoredField { value, components }) => {
                let confidence = self.aggregator.aggregate(spec.field_type, &components)?;
                Ok(Field::Present(FieldValue {
                    value,
                    confidence,
                    low_confidence: self.aggregator.is_low(confidence),
                }))
            }
            Field::Absent(reason) => Ok(Field::Absent(reason)),
        })
    }
}

/// 必填字段缺失或置信度过低时生成的警告
fn required_field_warnings(record: &ExtractionRecord, aggregator: &ConfidenceAggregator) -> Vec<StageWarning> {
    let mut warnings = Vec::new();
    if record.subjects.is_empty() {
        warnings.push(StageWarning::new(PipelineStage::Aggregating, "没有识别出任何科目"));
    }
    for (path, spec, field) in record.fields() {
        if !spec.required {
            continue;
        }
        match field {
            Field::Absent(_) => {
                warnings.push(StageWarning::new(
                    PipelineStage::Aggregating,
                    format!("必填字段 {} 缺失", path),
                ));
            }
            Field::Present(v) if aggregator.is_low(v.confidence) => {
                warnings.push(StageWarning::new(
                    PipelineStage::Aggregating,
                    format!("必填字段 {} 置信度过低 ({:.2})", path, v.confidence),
                ));
            }
            Field::Present(_) => {}
        }
    }
    warnings
}
