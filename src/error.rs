//! 错误类型定义
//!
//! 按流水线阶段划分错误：每个阶段有自己的错误枚举，
//! `AppError` 负责把它们汇总到库的统一出口。

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 文档校验错误（上游输入不合格）
    #[error("文档校验错误: {0}")]
    Validation(String),
    /// 页面路由错误
    #[error("页面路由错误: {0}")]
    Routing(#[from] RoutingError),
    /// 图像预处理错误
    #[error("预处理错误: {0}")]
    Preprocess(#[from] PreprocessError),
    /// 文字识别错误
    #[error("识别错误: {0}")]
    Recognition(#[from] RecognitionError),
    /// 结构化抽取错误
    #[error("结构化错误: {0}")]
    Structuring(#[from] StructuringError),
    /// 置信度聚合错误
    #[error("聚合错误: {0}")]
    Aggregation(#[from] AggregationError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 文件读写错误
    #[error("文件错误: {0}")]
    Io(#[from] std::io::Error),
    /// JSON 序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),
}

/// 页面路由错误
#[derive(Debug, Error)]
pub enum RoutingError {
    /// 文档内容为空
    #[error("文档内容为空")]
    EmptyDocument,
    /// PDF 无法解析
    #[error("PDF 解析失败: {0}")]
    PdfParse(String),
    /// 文档中没有任何页面
    #[error("文档中没有页面")]
    NoPages,
}

/// 图像预处理错误
#[derive(Debug, Error)]
pub enum PreprocessError {
    /// 图像解码失败
    #[error("图像解码失败: {0}")]
    Decode(String),
    /// 图像编码失败
    #[error("图像编码失败: {0}")]
    Encode(String),
}

/// 文字识别错误（页面级，可恢复）
#[derive(Debug, Error)]
pub enum RecognitionError {
    /// 识别服务不可用
    #[error("识别服务不可用 ({endpoint}): {message}")]
    Unavailable { endpoint: String, message: String },
    /// 输入图像无法识别
    #[error("图像无法识别: {0}")]
    UnreadableInput(String),
    /// 识别服务返回了无法解析的内容
    #[error("识别响应解析失败: {0}")]
    MalformedResponse(String),
}

/// 结构化抽取错误（重试后仍失败则为致命错误）
#[derive(Debug, Error)]
pub enum StructuringError {
    /// 调用超时
    #[error("结构化调用超时 ({}ms)", .after.as_millis())]
    Timeout { after: Duration },
    /// 被后端限流
    #[error("结构化服务限流: {0}")]
    RateLimited(String),
    /// 后端调用失败
    #[error("结构化服务调用失败: {0}")]
    Backend(String),
    /// 模型返回了无法解析的内容
    #[error("结构化响应无法解析: {0}")]
    MalformedResponse(String),
}

/// 置信度聚合错误（只在输入本身不合法时出现）
#[derive(Debug, Error, PartialEq)]
pub enum AggregationError {
    /// 没有任何可用信号
    #[error("没有可用的置信度信号")]
    NoSignals,
    /// 信号值不是有限数
    #[error("置信度信号 {name} 的值无效: {value}")]
    InvalidComponent { name: &'static str, value: f64 },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置文件读取失败
    #[error("无法读取配置文件 {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 配置文件解析失败
    #[error("无法解析配置文件 {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    /// 配置值不合法
    #[error("配置值不合法: {0}")]
    Invalid(String),
}

/// 对外暴露的错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    ValidationError,
    RecognitionError,
    StructuringError,
    AggregationError,
    /// 批次被取消，文档未开始处理
    Cancelled,
    /// 文档任务异常退出
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::RecognitionError => "RecognitionError",
            ErrorKind::StructuringError => "StructuringError",
            ErrorKind::AggregationError => "AggregationError",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(name)
    }
}

impl AppError {
    /// 获取错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) | AppError::Routing(_) => ErrorKind::ValidationError,
            AppError::Preprocess(_) | AppError::Recognition(_) => ErrorKind::RecognitionError,
            AppError::Structuring(_) => ErrorKind::StructuringError,
            AppError::Aggregation(_) => ErrorKind::AggregationError,
            AppError::Config(_) | AppError::Io(_) | AppError::Json(_) => ErrorKind::Internal,
        }
    }

    /// 创建文档校验错误
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }
}

/// Result 类型别名
pub type AppResult<T> = std::result::Result<T, AppError>;
