//! 上下文一致性校验 - 业务能力层
//!
//! 检查字段之间是否自洽：百分比与分数、总分与科目分、
//! 出生日期与颁发日期、科目数量与学段。没有规则命中的字段得 1.0；
//! 同一字段命中多条规则时取最低分。

use chrono::NaiveDate;
use phf::phf_map;
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::ContextConfig;
use crate::models::field::{DraftField, Field, FieldPath};
use crate::models::record::{
    candidate_details, document_info, overall_result, subject_entry, ExtractionDraft, SubjectEntry,
};
use crate::models::schema::SUBJECTS_KEY;

/// 学段对科目的要求
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelRule {
    pub min_subjects: usize,
    pub max_subjects: usize,
    /// 按学分计分的学段
    pub credit_based: bool,
}

static EDUCATION_LEVELS: phf::Map<&'static str, LevelRule> = phf_map! {
    "secondary" => LevelRule { min_subjects: 5, max_subjects: 7, credit_based: false },
    "ssc" => LevelRule { min_subjects: 5, max_subjects: 7, credit_based: false },
    "10th" => LevelRule { min_subjects: 5, max_subjects: 7, credit_based: false },
    "matriculation" => LevelRule { min_subjects: 5, max_subjects: 7, credit_based: false },
    "higher_secondary" => LevelRule { min_subjects: 4, max_subjects: 6, credit_based: false },
    "hsc" => LevelRule { min_subjects: 4, max_subjects: 6, credit_based: false },
    "12th" => LevelRule { min_subjects: 4, max_subjects: 6, credit_based: false },
    "intermediate" => LevelRule { min_subjects: 4, max_subjects: 6, credit_based: false },
    "undergraduate" => LevelRule { min_subjects: 4, max_subjects: 10, credit_based: true },
    "semester" => LevelRule { min_subjects: 4, max_subjects: 10, credit_based: true },
};

/// 学分制科目缺少学分时的得分
const CREDITS_MISSING_SCORE: f64 = 0.8;

/// 只有考试年份时用年中作为参考日期
const EXAM_YEAR_MONTH: u32 = 6;

/// 按学段名称查找科目要求
///
/// 先精确匹配，再取名称中包含的最长学段关键字。
pub fn lookup_level(level: &str) -> Option<LevelRule> {
    let key = level
        .trim()
        .to_lowercase()
        .replace([' ', '-'], "_");
    if let Some(rule) = EDUCATION_LEVELS.get(key.as_str()) {
        return Some(*rule);
    }
    let words: Vec<&str> = key.split('_').collect();
    EDUCATION_LEVELS
        .entries()
        .filter(|(name, _)| {
            let parts: Vec<&str> = name.split('_').collect();
            words.windows(parts.len()).any(|w| w == parts.as_slice())
        })
        .max_by_key(|(name, _)| name.len())
        .map(|(_, rule)| *rule)
}

/// 各字段的上下文得分
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextScores(BTreeMap<FieldPath, f64>);

impl ContextScores {
    /// 记录一条规则的得分，同一字段保留最低分
    fn record(&mut self, path: FieldPath, score: f64) {
        let score = score.clamp(0.0, 1.0);
        self.0
            .entry(path)
            .and_modify(|s| *s = s.min(score))
            .or_insert(score);
    }

    /// 字段得分，没有规则命中时为 1.0
    pub fn score(&self, path: &FieldPath) -> f64 {
        self.0.get(path).copied().unwrap_or(1.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldPath, &f64)> {
        self.0.iter()
    }
}

fn number(field: &Field<DraftField>) -> Option<f64> {
    field.present().and_then(|d| d.value.as_number())
}

fn date(field: &Field<DraftField>) -> Option<NaiveDate> {
    field.present().and_then(|d| d.value.as_date())
}

fn subject_path(index: usize, field: &str) -> FieldPath {
    FieldPath::indexed(SUBJECTS_KEY, index, field)
}

/// 上下文校验器
#[derive(Debug, Clone)]
pub struct ContextValidator {
    config: ContextConfig,
}

impl ContextValidator {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    /// 对整份草稿运行所有规则
    pub fn validate(&self, draft: &ExtractionDraft) -> ContextScores {
        let mut scores = ContextScores::default();
        self.check_percentage(draft, &mut scores);
        self.check_total_marks(draft, &mut scores);
        self.check_marks_within_max(draft, &mut scores);
        self.check_candidate_age(draft, &mut scores);
        self.check_subject_count(draft, &mut scores);
        if !scores.is_empty() {
            debug!("上下文规则命中 {} 个字段", scores.0.len());
        }
        scores
    }

    /// 百分比应等于 得分之和 / 满分之和 × 100
    fn check_percentage(&self, draft: &ExtractionDraft, scores: &mut ContextScores) {
        let Some(percentage) = number(&draft.overall_result.percentage) else {
            return;
        };

        let graded: Vec<_> = draft
            .subjects
            .iter()
            .filter_map(|s| number(&s.obtained_marks).map(|o| (o, number(&s.max_marks))))
            .collect();

        let obtained = if graded.is_empty() {
            number(&draft.overall_result.total_marks)
        } else {
            Some(graded.iter().map(|(o, _)| o).sum::<f64>())
        };
        let subject_max: Option<f64> = if graded.is_empty() {
            None
        } else {
            graded.iter().map(|(_, m)| *m).sum::<Option<f64>>()
        };
        let max = subject_max.or_else(|| number(&draft.overall_result.max_total_marks));

        let (Some(obtained), Some(max)) = (obtained, max) else {
            return;
        };
        if max <= 0.0 {
            return;
        }

        let expected = obtained / max * 100.0;
        let deviation = (percentage - expected).abs();
        let score = if deviation <= self.config.percentage_tolerance {
            1.0
        } else {
            1.0 - (deviation - self.config.percentage_tolerance) / self.config.percentage_deviation_scale
        };
        scores.record(FieldPath::new(overall_result::KEY, overall_result::percentage.name), score);
    }

    /// 总分应等于各科得分之和
    fn check_total_marks(&self, draft: &ExtractionDraft, scores: &mut ContextScores) {
        let Some(total) = number(&draft.overall_result.total_marks) else {
            return;
        };
        let obtained: Vec<f64> = draft.subjects.iter().filter_map(|s| number(&s.obtained_marks)).collect();
        if obtained.is_empty() {
            return;
        }

        let sum: f64 = obtained.iter().sum();
        let relative = (total - sum).abs() / sum.max(1.0);
        let score = if relative <= self.config.total_marks_tolerance {
            1.0
        } else {
            1.0 - relative
        };
        scores.record(FieldPath::new(overall_result::KEY, overall_result::total_marks.name), score);
    }

    /// 得分不能超过满分
    fn check_marks_within_max(&self, draft: &ExtractionDraft, scores: &mut ContextScores) {
        for (i, subject) in draft.subjects.iter().enumerate() {
            if let (Some(obtained), Some(max)) = (number(&subject.obtained_marks), number(&subject.max_marks)) {
                if obtained > max {
                    scores.record(subject_path(i, subject_entry::obtained_marks.name), 0.0);
                }
            }
            if let (Some(obtained), Some(max)) =
                (number(&subject.obtained_credits), number(&subject.max_credits))
            {
                if obtained > max {
                    scores.record(subject_path(i, subject_entry::obtained_credits.name), 0.0);
                }
            }
        }

        let overall = &draft.overall_result;
        if let (Some(total), Some(max)) = (number(&overall.total_marks), number(&overall.max_total_marks)) {
            if total > max {
                scores.record(FieldPath::new(overall_result::KEY, overall_result::total_marks.name), 0.0);
            }
        }
    }

    /// 出生日期到颁发日期（或考试年份）之间应有合理年龄差
    fn check_candidate_age(&self, draft: &ExtractionDraft, scores: &mut ContextScores) {
        let Some(dob) = date(&draft.candidate_details.dob) else {
            return;
        };

        let reference = date(&draft.document_info.issue_date)
            .map(|d| (d, FieldPath::new(document_info::KEY, document_info::issue_date.name)))
            .or_else(|| {
                let year = number(&draft.candidate_details.exam_year)?;
                let d = NaiveDate::from_ymd_opt(year.round() as i32, EXAM_YEAR_MONTH, 30)?;
                Some((d, FieldPath::new(candidate_details::KEY, candidate_details::exam_year.name)))
            });
        let Some((reference, reference_path)) = reference else {
            return;
        };

        let gap_years = (reference - dob).num_days() as f64 / 365.25;
        let min_age = self.config.min_candidate_age_years;
        let score = if gap_years >= min_age {
            1.0
        } else {
            gap_years / min_age
        };
        if score < 1.0 {
            debug!(
                "出生日期 {} 与参考日期 {} 相差 {:.1} 年",
                dob,
                reference,
                gap_years
            );
        }
        scores.record(FieldPath::new(candidate_details::KEY, candidate_details::dob.name), score);
        scores.record(reference_path, score);
    }

    /// 科目数量应符合学段；学分制学段的科目应带学分
    fn check_subject_count(&self, draft: &ExtractionDraft, scores: &mut ContextScores) {
        let Some(level) = draft
            .document_info
            .education_level
            .present()
            .and_then(|d| lookup_level(&d.raw))
        else {
            return;
        };

        let count = draft.subjects.len();
        let deviation = if count < level.min_subjects {
            level.min_subjects - count
        } else {
            count.saturating_sub(level.max_subjects)
        };
        let count_score = (1.0 - self.config.subject_count_penalty * deviation as f64)
            .max(self.config.subject_count_floor);

        scores.record(
            FieldPath::new(document_info::KEY, document_info::education_level.name),
            count_score,
        );
        for i in 0..count {
            scores.record(subject_path(i, subject_entry::subject.name), count_score);
        }

        if level.credit_based {
            let has_credits = |s: &SubjectEntry<DraftField>| {
                !s.obtained_credits.is_absent() || !s.max_credits.is_absent()
            };
            if draft.subjects.iter().any(|s| has_credits(s)) {
                for (i, subject) in draft.subjects.iter().enumerate() {
                    if !has_credits(subject) {
                        scores.record(subject_path(i, subject_entry::subject.name), CREDITS_MISSING_SCORE);
                    }
                }
            }
        }
    }
}
