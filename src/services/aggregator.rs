//! 置信度聚合 - 业务能力层
//!
//! 把四路信号（ocr / pattern / model / context）按权重融合成
//! 每个字段一个最终置信度。未定义的信号不参与计算，它的权重按
//! 比例分给其余信号；结果再限制到字段类型对应的区间。
//!
//! 纯函数，无副作用。

use crate::config::{ConfidenceConfig, Weights};
use crate::error::AggregationError;
use crate::models::field::{ConfidenceComponents, FieldType};

/// 实际使用的权重，未定义的信号为 `None`
pub type EffectiveWeights = [(&'static str, Option<f64>); 4];

/// 置信度聚合器
#[derive(Debug, Clone)]
pub struct ConfidenceAggregator {
    config: ConfidenceConfig,
}

impl ConfidenceAggregator {
    pub fn new(config: ConfidenceConfig) -> Self {
        Self { config }
    }

    /// 计算实际使用的权重，已定义信号的权重之和为 1
    ///
    /// 已定义信号的配置权重之和为 0 时，改为平均分配。
    pub fn effective_weights(
        &self,
        components: &ConfidenceComponents,
    ) -> Result<EffectiveWeights, AggregationError> {
        let configured = weight_list(&self.config.weights);
        let signals = components.signals();

        let mut defined = 0usize;
        let mut total = 0.0;
        for ((name, value), weight) in signals.iter().zip(configured) {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(AggregationError::InvalidComponent { name: *name, value: *v });
                }
                defined += 1;
                total += weight;
            }
        }
        if defined == 0 {
            return Err(AggregationError::NoSignals);
        }

        let mut out: EffectiveWeights = [("ocr", None), ("pattern", None), ("model", None), ("context", None)];
        for (i, ((name, value), weight)) in signals.iter().zip(configured).enumerate() {
            let used = value.map(|_| {
                if total > 0.0 {
                    weight / total
                } else {
                    1.0 / defined as f64
                }
            });
            out[i] = (*name, used);
        }
        Ok(out)
    }

    /// 融合一个字段的四路信号
    pub fn aggregate(
        &self,
        field_type: FieldType,
        components: &ConfidenceComponents,
    ) -> Result<f64, AggregationError> {
        let weights = self.effective_weights(components)?;
        let fused: f64 = components
            .signals()
            .iter()
            .zip(weights.iter())
            .filter_map(|((_, value), (_, weight))| match (value, weight) {
                (Some(v), Some(w)) => Some(v.clamp(0.0, 1.0) * w),
                _ => None,
            })
            .sum();

        let range = self.config.range_for(field_type);
        Ok(fused.clamp(range.min, range.max).clamp(0.0, 1.0))
    }

    /// 是否低于低置信度阈值
    pub fn is_low(&self, confidence: f64) -> bool {
        confidence < self.config.low_confidence_threshold
    }
}

fn weight_list(weights: &Weights) -> [f64; 4] {
    [weights.ocr, weights.pattern, weights.model, weights.context]
}
