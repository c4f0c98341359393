//! 文档处理上下文
//!
//! 封装"我正在处理批次中的第几份文档"这一信息

use std::fmt::Display;

/// 文档处理上下文
#[derive(Debug, Clone)]
pub struct DocumentCtx {
    /// 文档ID（通常为文件名）
    pub document_id: String,

    /// 文档在批次中的位置（从1开始，仅用于日志显示）
    pub document_index: usize,

    /// 批次中的文档总数
    pub total: usize,
}

impl DocumentCtx {
    pub fn new(document_id: impl Into<String>, document_index: usize, total: usize) -> Self {
        Self {
            document_id: document_id.into(),
            document_index,
            total,
        }
    }
}

impl Display for DocumentCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[文档 {}/{} {}]",
            self.document_index, self.total, self.document_id
        )
    }
}
