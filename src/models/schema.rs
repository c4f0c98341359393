//! 抽取模式
//!
//! 描述结构化阶段要填写的所有分区和字段。字段定义本身由
//! `record.rs` 中的 `section!` 宏生成，这里只负责把它们组织成
//! 可以交给结构化后端的描述。

use crate::models::field::FieldType;
use crate::models::record::{candidate_details, document_info, overall_result, subject_entry};

/// 单个字段的定义
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    /// 缺失或低置信度时整份结果降级为部分成功
    pub required: bool,
    /// 数值字段的合理取值范围（闭区间）
    pub bounds: Option<(f64, f64)>,
}

/// 分区定义
#[derive(Debug, Clone, Copy)]
pub struct SectionSchema {
    pub key: &'static str,
    /// 是否为列表（每项一行科目）
    pub repeated: bool,
    pub fields: &'static [FieldSpec],
}

/// 成绩单抽取模式
#[derive(Debug, Clone)]
pub struct ExtractionSchema {
    pub sections: Vec<SectionSchema>,
}

/// 科目列表在记录中的键名
pub const SUBJECTS_KEY: &str = "subjects";

impl ExtractionSchema {
    pub fn marksheet() -> Self {
        Self {
            sections: vec![
                SectionSchema {
                    key: candidate_details::KEY,
                    repeated: false,
                    fields: candidate_details::FIELDS,
                },
                SectionSchema {
                    key: SUBJECTS_KEY,
                    repeated: true,
                    fields: subject_entry::FIELDS,
                },
                SectionSchema {
                    key: overall_result::KEY,
                    repeated: false,
                    fields: overall_result::FIELDS,
                },
                SectionSchema {
                    key: document_info::KEY,
                    repeated: false,
                    fields: document_info::FIELDS,
                },
            ],
        }
    }

    /// 生成给结构化后端的字段清单，每行一个字段路径
    ///
    /// 列表分区用 `<i>` 表示下标，例如 `subjects[<i>].grade`。
    pub fn describe(&self) -> String {
        let mut lines = Vec::new();
        for section in &self.sections {
            for spec in section.fields {
                let path = if section.repeated {
                    format!("{}[<i>].{}", section.key, spec.name)
                } else {
                    format!("{}.{}", section.key, spec.name)
                };
                let mut line = format!("- {} ({})", path, type_hint(spec.field_type));
                if let Some((lo, hi)) = spec.bounds {
                    line.push_str(&format!(", range {}..{}", lo, hi));
                }
                if spec.required {
                    line.push_str(", required");
                }
                lines.push(line);
            }
        }
        lines.join("\n")
    }

    /// 字段路径是否属于本模式，列表分区必须带数字下标
    pub fn contains_path(&self, path: &str) -> bool {
        let Some((head, field)) = path.split_once('.') else {
            return false;
        };
        self.sections.iter().any(|section| {
            let key_matches = if section.repeated {
                subject_index_of(head, section.key).is_some()
            } else {
                head == section.key
            };
            key_matches && section.fields.iter().any(|spec| spec.name == field)
        })
    }
}

/// 从 `subjects[3].grade` 这样的路径中取出列表下标
pub fn subject_index(path: &str) -> Option<usize> {
    let (head, _) = path.split_once('.')?;
    subject_index_of(head, SUBJECTS_KEY)
}

fn subject_index_of(head: &str, key: &str) -> Option<usize> {
    head.strip_prefix(key)?
        .strip_prefix('[')?
        .strip_suffix(']')?
        .parse()
        .ok()
}

impl Default for ExtractionSchema {
    fn default() -> Self {
        Self::marksheet()
    }
}

fn type_hint(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Name => "person name",
        FieldType::Identifier => "identifier, keep exactly as printed",
        FieldType::Date => "date, YYYY-MM-DD if possible",
        FieldType::Numeric => "number",
        FieldType::Grade => "grade or division",
        FieldType::Freeform => "text",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marksheet_schema_sections() {
        let schema = ExtractionSchema::marksheet();
        let keys: Vec<_> = schema.sections.iter().map(|s| s.key).collect();
        assert_eq!(
            keys,
            vec!["candidate_details", "subjects", "overall_result", "document_info"]
        );
        assert!(schema.sections[1].repeated);
    }

    #[test]
    fn test_describe_lists_required_and_bounds() {
        let text = ExtractionSchema::marksheet().describe();
        assert!(text.contains("- candidate_details.name (person name, required)"));
        assert!(text.contains("subjects[<i>].obtained_marks"));
        assert!(text.contains("overall_result.percentage (number, range 0..100)"));
    }

    #[test]
    fn test_contains_path() {
        let schema = ExtractionSchema::marksheet();
        assert!(schema.contains_path("candidate_details.roll_no"));
        assert!(schema.contains_path("subjects[12].grade"));
        assert!(!schema.contains_path("subjects.grade"));
        assert!(!schema.contains_path("subjects[x].grade"));
        assert!(!schema.contains_path("candidate_details.favourite_colour"));
        assert!(!schema.contains_path("answer"));
    }

    #[test]
    fn test_subject_index() {
        assert_eq!(subject_index("subjects[4].subject"), Some(4));
        assert_eq!(subject_index("subjects[18446744073709551615].subject"), Some(usize::MAX));
        assert_eq!(subject_index("subjects[99999999999999999999999].subject"), None);
        assert_eq!(subject_index("overall_result.grade"), None);
    }
}
