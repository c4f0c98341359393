//! 抽取记录
//!
//! 每个分区都是一个固定字段的结构体，字段类型为 `Field<T>`：
//! 结构化阶段用 `T = DraftField`，聚合完成后用 `T = FieldValue`。

use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;

use crate::models::field::{DraftField, Field, FieldPath, FieldValue};
use crate::models::schema::{FieldSpec, SUBJECTS_KEY};

/// 定义一个分区：生成字段定义模块和对应的泛型结构体
macro_rules! section {
    (@required) => { false };
    (@required required) => { true };
    (@bounds) => { None };
    (@bounds $lo:literal, $hi:literal) => { Some(($lo, $hi)) };
    (
        $(#[$meta:meta])*
        $name:ident, $key:ident {
            $( $field:ident : $ty:ident $(in $lo:literal ..= $hi:literal)? $([$req:ident])? ),* $(,)?
        }
    ) => {
        /// 分区字段定义
        #[allow(non_upper_case_globals)]
        pub mod $key {
            use crate::models::field::FieldType;
            use crate::models::schema::FieldSpec;

            pub const KEY: &str = stringify!($key);

            $(
                pub const $field: FieldSpec = FieldSpec {
                    name: stringify!($field),
                    field_type: FieldType::$ty,
                    required: section!(@required $($req)?),
                    bounds: section!(@bounds $($lo, $hi)?),
                };
            )*

            pub const FIELDS: &[FieldSpec] = &[$($field),*];
        }

        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize)]
        pub struct $name<T = FieldValue> {
            $( pub $field: Field<T>, )*
        }

        impl<T> $name<T> {
            /// 按定义顺序列出字段
            pub fn fields(&self) -> Vec<(&'static FieldSpec, &Field<T>)> {
                vec![$( (&$key::$field, &self.$field) ),*]
            }

            /// 逐字段构造
            pub fn build(mut f: impl FnMut(&'static FieldSpec) -> Field<T>) -> Self {
                Self { $( $field: f(&$key::$field), )* }
            }

            /// 逐字段转换，任一字段出错即停止
            pub fn try_map<U, E>(
                self,
                mut f: impl FnMut(&'static FieldSpec, Field<T>) -> Result<Field<U>, E>,
            ) -> Result<$name<U>, E> {
                Ok($name { $( $field: f(&$key::$field, self.$field)?, )* })
            }
        }
    };
}

section! {
    /// 考生信息
    CandidateDetails, candidate_details {
        name: Name [required],
        father_name: Name,
        mother_name: Name,
        roll_no: Identifier [required],
        registration_no: Identifier,
        dob: Date,
        exam_year: Numeric in 1950.0 ..= 2100.0,
        board_university: Freeform,
        institution: Freeform,
    }
}

section! {
    /// 单个科目成绩
    SubjectEntry, subject_entry {
        subject: Freeform [required],
        max_marks: Numeric in 0.0 ..= 1000.0,
        obtained_marks: Numeric in 0.0 ..= 1000.0 [required],
        max_credits: Numeric in 0.0 ..= 50.0,
        obtained_credits: Numeric in 0.0 ..= 50.0,
        grade: Grade,
    }
}

section! {
    /// 总成绩
    OverallResult, overall_result {
        result: Grade,
        grade: Grade,
        percentage: Numeric in 0.0 ..= 100.0,
        cgpa: Numeric in 0.0 ..= 10.0,
        total_marks: Numeric in 0.0 ..= 10000.0,
        max_total_marks: Numeric in 0.0 ..= 10000.0,
    }
}

section! {
    /// 证书信息
    DocumentInfo, document_info {
        issue_date: Date,
        issue_place: Freeform,
        document_type: Freeform,
        serial_number: Identifier,
        education_level: Freeform,
    }
}

/// 一份成绩单的完整抽取结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionRecord<T = FieldValue> {
    pub candidate_details: CandidateDetails<T>,
    pub subjects: Vec<SubjectEntry<T>>,
    pub overall_result: OverallResult<T>,
    pub document_info: DocumentInfo<T>,
}

/// 结构化阶段产出的草稿
pub type ExtractionDraft = ExtractionRecord<DraftField>;

impl<T> ExtractionRecord<T> {
    /// 列出所有字段及其路径
    pub fn fields(&self) -> Vec<(FieldPath, &'static FieldSpec, &Field<T>)> {
        let mut out = Vec::new();
        for (spec, field) in self.candidate_details.fields() {
            out.push((FieldPath::new(candidate_details::KEY, spec.name), spec, field));
        }
        for (i, entry) in self.subjects.iter().enumerate() {
            for (spec, field) in entry.fields() {
                out.push((FieldPath::indexed(SUBJECTS_KEY, i, spec.name), spec, field));
            }
        }
        for (spec, field) in self.overall_result.fields() {
            out.push((FieldPath::new(overall_result::KEY, spec.name), spec, field));
        }
        for (spec, field) in self.document_info.fields() {
            out.push((FieldPath::new(document_info::KEY, spec.name), spec, field));
        }
        out
    }

    /// 按路径逐字段转换
    pub fn try_map<U, E>(
        self,
        mut f: impl FnMut(&FieldPath, &'static FieldSpec, Field<T>) -> Result<Field<U>, E>,
    ) -> Result<ExtractionRecord<U>, E> {
        let candidate_details = self.candidate_details.try_map(|spec, field| {
            f(&FieldPath::new(candidate_details::KEY, spec.name), spec, field)
        })?;
        let mut subjects = Vec::with_capacity(self.subjects.len());
        for (i, entry) in self.subjects.into_iter().enumerate() {
            subjects.push(entry.try_map(|spec, field| {
                f(&FieldPath::indexed(SUBJECTS_KEY, i, spec.name), spec, field)
            })?);
        }
        let overall_result = self.overall_result.try_map(|spec, field| {
            f(&FieldPath::new(overall_result::KEY, spec.name), spec, field)
        })?;
        let document_info = self.document_info.try_map(|spec, field| {
            f(&FieldPath::new(document_info::KEY, spec.name), spec, field)
        })?;
        Ok(ExtractionRecord {
            candidate_details,
            subjects,
            overall_result,
            document_info,
        })
    }

    /// 按路径逐字段转换（不会失败）
    pub fn map<U>(
        self,
        mut f: impl FnMut(&FieldPath, &'static FieldSpec, Field<T>) -> Field<U>,
    ) -> ExtractionRecord<U> {
        match self.try_map(|path, spec, field| Ok::<_, Infallible>(f(path, spec, field))) {
            Ok(record) => record,
            Err(never) => match never {},
        }
    }
}

impl ExtractionRecord<FieldValue> {
    /// 关键字段的置信度摘要（姓名、考号、科目平均、结果）
    pub fn confidence_summary(&self) -> BTreeMap<&'static str, f64> {
        let mut scores = BTreeMap::new();
        if let Some(v) = self.candidate_details.name.present() {
            scores.insert("name", v.confidence);
        }
        if let Some(v) = self.candidate_details.roll_no.present() {
            scores.insert("roll_no", v.confidence);
        }
        let subject_confidences: Vec<f64> = self
            .subjects
            .iter()
            .filter_map(|s| s.subject.present().map(|v| v.confidence))
            .collect();
        if !subject_confidences.is_empty() {
            let avg = subject_confidences.iter().sum::<f64>() / subject_confidences.len() as f64;
            scores.insert("subjects_avg", avg);
        }
        if let Some(v) = self.overall_result.result.present() {
            scores.insert("result", v.confidence);
        }
        scores
    }
}
