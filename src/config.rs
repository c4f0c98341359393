use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::field::FieldType;

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    /// 同时处理的文档数量
    pub max_concurrent_documents: usize,
    /// 待处理文档所在目录
    pub input_folder: String,
    /// 结果 JSON 输出文件
    pub output_file: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 单个文件大小上限（字节）
    pub max_file_size: u64,
    // --- 结构化（LLM）配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    pub structuring_timeout_secs: u64,
    // --- 文字识别服务配置 ---
    pub recognition_api_url: String,
    pub recognition_timeout_secs: u64,
    // --- 流水线配置 ---
    /// 内嵌文本至少多少个非空白字符才视为可信
    pub min_embedded_text_chars: usize,
    pub enable_preprocessing: bool,
    /// 一份成绩单最多接受的科目数
    pub max_subjects: usize,
    /// 置信度配置文件（TOML），为空时使用默认值
    pub confidence_config_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_documents: 4,
            input_folder: "input".to_string(),
            output_file: "results.json".to_string(),
            verbose_logging: false,
            max_file_size: 10 * 1024 * 1024,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            llm_temperature: 0.1,
            llm_max_tokens: 4000,
            structuring_timeout_secs: 60,
            recognition_api_url: "http://127.0.0.1:8866/ocr".to_string(),
            recognition_timeout_secs: 30,
            min_embedded_text_chars: 20,
            enable_preprocessing: true,
            max_subjects: 20,
            confidence_config_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_concurrent_documents: std::env::var("MAX_CONCURRENT_DOCUMENTS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_concurrent_documents),
            input_folder: std::env::var("INPUT_FOLDER").unwrap_or(default.input_folder),
            output_file: std::env::var("OUTPUT_FILE").unwrap_or(default.output_file),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            max_file_size: std::env::var("MAX_FILE_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_file_size),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            llm_temperature: std::env::var("LLM_TEMPERATURE").ok().and_then(|v| v.parse().ok()).unwrap_or(default.llm_temperature),
            llm_max_tokens: std::env::var("LLM_MAX_TOKENS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.llm_max_tokens),
            structuring_timeout_secs: std::env::var("STRUCTURING_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.structuring_timeout_secs),
            recognition_api_url: std::env::var("RECOGNITION_API_URL").unwrap_or(default.recognition_api_url),
            recognition_timeout_secs: std::env::var("RECOGNITION_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.recognition_timeout_secs),
            min_embedded_text_chars: std::env::var("MIN_EMBEDDED_TEXT_CHARS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.min_embedded_text_chars),
            enable_preprocessing: std::env::var("ENABLE_PREPROCESSING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.enable_preprocessing),
            max_subjects: std::env::var("MAX_SUBJECTS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_subjects),
            confidence_config_file: std::env::var("CONFIDENCE_CONFIG_FILE").ok().filter(|v| !v.is_empty()),
        }
    }

    /// 组装单个文档流水线所需的配置
    pub fn pipeline(&self) -> Result<PipelineConfig, ConfigError> {
        let confidence = match &self.confidence_config_file {
            Some(path) => ConfidenceConfig::from_toml_file(Path::new(path))?,
            None => ConfidenceConfig::default(),
        };
        let preprocess = if self.enable_preprocessing {
            PreprocessConfig::default()
        } else {
            PreprocessConfig::disabled()
        };
        Ok(PipelineConfig {
            preprocess,
            min_embedded_text_chars: self.min_embedded_text_chars,
            structuring_timeout: Duration::from_secs(self.structuring_timeout_secs),
            max_subjects: self.max_subjects,
            ..PipelineConfig::default()
        }
        .with_confidence(confidence))
    }
}

/// 单个文档流水线的配置
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub preprocess: PreprocessConfig,
    pub min_embedded_text_chars: usize,
    /// 内嵌文本 token 的识别置信度
    pub embedded_text_confidence: f64,
    /// 单次结构化调用的超时
    pub structuring_timeout: Duration,
    /// 结构化调用的总尝试次数（首次 + 重试）
    pub structuring_attempts: u32,
    /// 接受的科目下标上限，超出的行被忽略
    pub max_subjects: usize,
    pub confidence: ConfidenceConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            preprocess: PreprocessConfig::default(),
            min_embedded_text_chars: 20,
            embedded_text_confidence: 0.95,
            structuring_timeout: Duration::from_secs(60),
            structuring_attempts: 2,
            max_subjects: 20,
            confidence: ConfidenceConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn with_confidence(mut self, confidence: ConfidenceConfig) -> Self {
        self.confidence = confidence;
        self
    }
}

/// 图像预处理配置，每一步都可以单独开关
#[derive(Clone, Debug, PartialEq)]
pub struct PreprocessConfig {
    pub grayscale: bool,
    pub contrast: bool,
    pub denoise: bool,
    pub deskew: bool,
    pub binarize: bool,
    /// CLAHE 裁剪系数
    pub clahe_clip_limit: f32,
    /// CLAHE 网格数（每个方向）
    pub clahe_grid: u32,
    /// 双边滤波窗口边长
    pub bilateral_window: u32,
    pub bilateral_sigma_color: f32,
    pub bilateral_sigma_space: f32,
    /// 倾斜小于该角度（度）时不旋转
    pub deskew_min_angle: f32,
    /// 倾斜搜索范围（正负，度）
    pub deskew_max_angle: f32,
    /// 自适应阈值的邻域半径，窗口为 `2r+1`
    pub threshold_block_radius: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            grayscale: true,
            contrast: true,
            denoise: true,
            deskew: true,
            binarize: true,
            clahe_clip_limit: 2.0,
            clahe_grid: 8,
            bilateral_window: 9,
            bilateral_sigma_color: 75.0,
            bilateral_sigma_space: 75.0,
            deskew_min_angle: 0.5,
            deskew_max_angle: 5.0,
            threshold_block_radius: 5,
        }
    }
}

impl PreprocessConfig {
    /// 所有步骤关闭，原图直接透传
    pub fn disabled() -> Self {
        Self {
            grayscale: false,
            contrast: false,
            denoise: false,
            deskew: false,
            binarize: false,
            ..Self::default()
        }
    }

    pub fn any_enabled(&self) -> bool {
        self.grayscale || self.contrast || self.denoise || self.deskew || self.binarize
    }
}

/// 融合权重
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub ocr: f64,
    pub pattern: f64,
    pub model: f64,
    pub context: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            ocr: 0.3,
            pattern: 0.2,
            model: 0.4,
            context: 0.1,
        }
    }
}

/// 置信度合理区间
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeRange {
    pub min: f64,
    pub max: f64,
}

/// 格式校验参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// 近似匹配（分隔符错误、多余空白）的得分
    pub near_miss_score: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self { near_miss_score: 0.5 }
    }
}

/// 上下文一致性校验参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// 百分比允许偏差（百分点）
    pub percentage_tolerance: f64,
    /// 超出容差后，偏差达到该值时置信度降为 0
    pub percentage_deviation_scale: f64,
    /// 总分允许的相对偏差
    pub total_marks_tolerance: f64,
    /// 颁发时考生的最小合理年龄
    pub min_candidate_age_years: f64,
    /// 科目数量每偏离一个的扣分
    pub subject_count_penalty: f64,
    /// 科目数量规则的最低分（软信号）
    pub subject_count_floor: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            percentage_tolerance: 1.0,
            percentage_deviation_scale: 25.0,
            total_marks_tolerance: 0.01,
            min_candidate_age_years: 10.0,
            subject_count_penalty: 0.15,
            subject_count_floor: 0.5,
        }
    }
}

impl ContextConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let values = [
            ("percentage_tolerance", self.percentage_tolerance),
            ("percentage_deviation_scale", self.percentage_deviation_scale),
            ("total_marks_tolerance", self.total_marks_tolerance),
            ("min_candidate_age_years", self.min_candidate_age_years),
            ("subject_count_penalty", self.subject_count_penalty),
            ("subject_count_floor", self.subject_count_floor),
        ];
        if let Some((name, value)) = values.iter().find(|(_, v)| !v.is_finite() || *v < 0.0) {
            return Err(ConfigError::Invalid(format!("{} 必须是非负有限数: {}", name, value)));
        }
        if self.percentage_deviation_scale == 0.0 {
            return Err(ConfigError::Invalid("percentage_deviation_scale 必须大于 0".to_string()));
        }
        if self.subject_count_floor > 1.0 {
            return Err(ConfigError::Invalid("subject_count_floor 必须在 [0,1] 内".to_string()));
        }
        Ok(())
    }
}

/// 置信度配置（带版本号）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    pub version: u32,
    pub weights: Weights,
    /// 各字段类型的最终置信度区间
    pub ranges: BTreeMap<FieldType, TypeRange>,
    /// 低于该值的字段标记为低置信度
    pub low_confidence_threshold: f64,
    pub pattern: PatternConfig,
    pub context: ContextConfig,
}

pub const CONFIDENCE_CONFIG_VERSION: u32 = 1;

impl Default for ConfidenceConfig {
    fn default() -> Self {
        let ranges = FieldType::ALL
            .iter()
            .map(|t| {
                let max = match t {
                    FieldType::Name | FieldType::Freeform => 0.95,
                    _ => 1.0,
                };
                (*t, TypeRange { min: 0.0, max })
            })
            .collect();
        Self {
            version: CONFIDENCE_CONFIG_VERSION,
            weights: Weights::default(),
            ranges,
            low_confidence_threshold: 0.5,
            pattern: PatternConfig::default(),
            context: ContextConfig::default(),
        }
    }
}

impl ConfidenceConfig {
    /// 从 TOML 文件加载并校验
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: ConfidenceConfig =
            toml::from_str(content).map_err(|source| ConfigError::Parse {
                path: "<inline>".to_string(),
                source,
            })?;
        // 文件里没写到的类型沿用默认区间
        for (field_type, range) in ConfidenceConfig::default().ranges {
            config.ranges.entry(field_type).or_insert(range);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != CONFIDENCE_CONFIG_VERSION {
            return Err(ConfigError::Invalid(format!(
                "不支持的置信度配置版本 {}（当前 {}）",
                self.version, CONFIDENCE_CONFIG_VERSION
            )));
        }
        let w = &self.weights;
        let weights = [w.ocr, w.pattern, w.model, w.context];
        if weights.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(ConfigError::Invalid("权重必须是非负有限数".to_string()));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(ConfigError::Invalid("权重之和必须大于 0".to_string()));
        }
        for (field_type, range) in &self.ranges {
            if !(0.0..=1.0).contains(&range.min) || !(0.0..=1.0).contains(&range.max) || range.min > range.max {
                return Err(ConfigError::Invalid(format!(
                    "{:?} 的置信度区间不合法: [{}, {}]",
                    field_type, range.min, range.max
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.pattern.near_miss_score) {
            return Err(ConfigError::Invalid("near_miss_score 必须在 [0,1] 内".to_string()));
        }
        if !(0.0..=1.0).contains(&self.low_confidence_threshold) {
            return Err(ConfigError::Invalid("low_confidence_threshold 必须在 [0,1] 内".to_string()));
        }
        self.context.validate()
    }

    pub fn range_for(&self, field_type: FieldType) -> TypeRange {
        self.ranges
            .get(&field_type)
            .copied()
            .unwrap_or(TypeRange { min: 0.0, max: 1.0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_confidence_config_is_valid() {
        let config = ConfidenceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.range_for(FieldType::Name).max, 0.95);
        assert_eq!(config.range_for(FieldType::Numeric).max, 1.0);
        let w = config.weights;
        assert!((w.ocr + w.pattern + w.model + w.context - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_config_from_toml() {
        let content = r#"
            version = 1
            low_confidence_threshold = 0.6

            [weights]
            ocr = 0.25
            pattern = 0.25
            model = 0.4
            context = 0.1

            [ranges.identifier]
            min = 0.0
            max = 0.9
        "#;
        let config = ConfidenceConfig::from_toml_str(content).unwrap();
        assert_eq!(config.low_confidence_threshold, 0.6);
        assert_eq!(config.weights.ocr, 0.25);
        assert_eq!(config.range_for(FieldType::Identifier).max, 0.9);
        // 未配置的类型使用默认区间
        assert_eq!(config.range_for(FieldType::Name).max, 0.95);
        assert_eq!(config.pattern.near_miss_score, 0.5);
    }

    #[test]
    fn test_confidence_config_rejects_bad_weights() {
        let content = r#"
            [weights]
            ocr = -0.1
            pattern = 0.2
            model = 0.4
            context = 0.1
        "#;
        assert!(matches!(
            ConfidenceConfig::from_toml_str(content),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_confidence_config_rejects_unknown_version() {
        assert!(ConfidenceConfig::from_toml_str("version = 7").is_err());
    }

    #[test]
    fn test_confidence_config_rejects_bad_context_tolerances() {
        for content in [
            "[context]\npercentage_tolerance = -1.0",
            "[context]\ntotal_marks_tolerance = nan",
            "[context]\npercentage_deviation_scale = 0.0",
            "[context]\nsubject_count_floor = 1.5",
        ] {
            assert!(
                matches!(ConfidenceConfig::from_toml_str(content), Err(ConfigError::Invalid(_))),
                "accepted: {}",
                content
            );
        }
        let mut config = ConfidenceConfig::default();
        config.context.min_candidate_age_years = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_preprocess_disabled() {
        assert!(!PreprocessConfig::disabled().any_enabled());
        assert!(PreprocessConfig::default().any_enabled());
    }
}
