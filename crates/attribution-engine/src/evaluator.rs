//! 条件评估器
//!
//! 纯函数：对单个条件与文档视图求值，返回匹配结果与诊断信息。
//! 不做任何 I/O，文档的标签与自定义字段由文档存储预先装配到视图上。
//!
//! 操作符语义刻意保持宽容：类型不符、正则非法、操作数缺失
//! 一律视为不匹配，绝不抛错中断规则评估。

use crate::fields::{FieldType, Operator};
use crate::models::{Condition, ConditionOutcome, DocumentView};
use regex::Regex;
use serde_json::Value;

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估一个条件
    pub fn evaluate(condition: &Condition, document: &DocumentView) -> ConditionOutcome {
        let document_value =
            Self::resolve_field(condition.field_type, condition.field_name.as_deref(), document);
        let condition_value = &condition.value;

        let matched = Self::apply_operator(condition.operator, &document_value, condition_value);

        let reason = if matched {
            format!(
                "Match: {} {} {}",
                condition.field_type, condition.operator, condition_value
            )
        } else {
            format!(
                "No match: {}={} {} {}",
                condition.field_type, document_value, condition.operator, condition_value
            )
        };

        ConditionOutcome {
            matched,
            field_type: condition.field_type,
            operator: condition.operator,
            document_value,
            condition_value: condition_value.clone(),
            reason,
        }
    }

    /// 按字段类型从文档视图解析取值
    fn resolve_field(
        field_type: FieldType,
        field_name: Option<&str>,
        document: &DocumentView,
    ) -> Value {
        match field_type {
            FieldType::Correspondent => document
                .correspondent_id
                .map(Value::from)
                .unwrap_or(Value::Null),

            FieldType::DocumentType => document
                .document_type_id
                .map(Value::from)
                .unwrap_or(Value::Null),

            FieldType::Tag => serde_json::to_value(&document.tags).unwrap_or(Value::Null),

            FieldType::Amount => document
                .amount
                .and_then(|a| serde_json::Number::from_f64(a).map(Value::Number))
                .unwrap_or(Value::Null),

            // OCR 文本优先，缺失时回退到原始正文
            FieldType::Content => Value::String(
                document
                    .ocr_content
                    .clone()
                    .or_else(|| document.content.clone())
                    .unwrap_or_default(),
            ),

            // 文档日期缺失时回退到创建时间
            FieldType::Date => document
                .doc_date
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                .or_else(|| document.created_at.map(|t| Value::String(t.to_rfc3339())))
                .unwrap_or(Value::Null),

            FieldType::CustomField => match field_name {
                // 先查文档上的归类字段列，再查自定义字段存储
                Some("compte_comptable") => Self::opt_string(&document.compte_comptable),
                Some("centre_cout") => Self::opt_string(&document.centre_cout),
                Some("projet") => Self::opt_string(&document.projet),
                Some(name) => document
                    .custom_fields
                    .get(name)
                    .cloned()
                    .unwrap_or(Value::Null),
                None => Value::Null,
            },
        }
    }

    fn opt_string(value: &Option<String>) -> Value {
        value
            .as_ref()
            .map(|s| Value::String(s.clone()))
            .unwrap_or(Value::Null)
    }

    /// 应用操作符
    fn apply_operator(operator: Operator, document: &Value, condition: &Value) -> bool {
        match operator {
            Operator::Equals => Self::equals(document, condition),
            Operator::NotEquals => !Self::equals(document, condition),
            Operator::Contains => Self::contains(document, condition),
            Operator::NotContains => !Self::contains(document, condition),
            Operator::StartsWith => Self::starts_with(document, condition),
            Operator::EndsWith => Self::ends_with(document, condition),
            Operator::GreaterThan => Self::numeric_compare(document, condition, |a, b| a > b),
            Operator::LessThan => Self::numeric_compare(document, condition, |a, b| a < b),
            Operator::Between => Self::between(document, condition),
            Operator::In => Self::in_list(document, condition),
            Operator::NotIn => !Self::in_list(document, condition),
            Operator::IsEmpty => Self::is_empty(document),
            Operator::IsNotEmpty => !Self::is_empty(document),
            Operator::Regex => Self::regex_match(document, condition),
        }
    }

    /// 相等比较（处理标签数组）
    fn equals(document: &Value, condition: &Value) -> bool {
        // 标签数组：按标签 id 做成员检查
        if let Some(tag_ids) = Self::tag_ids(document) {
            return Self::as_f64(condition)
                .map(|c| tag_ids.iter().any(|&id| (id as f64 - c).abs() < f64::EPSILON))
                .unwrap_or(false);
        }

        // 两边都像数值时统一转浮点比较，避免 100 与 "100" 比较失败
        if let (Some(a), Some(b)) = (Self::as_f64(document), Self::as_f64(condition)) {
            return (a - b).abs() < f64::EPSILON;
        }

        // 字符串不区分大小写
        if let (Value::String(a), Value::String(b)) = (document, condition) {
            return a.eq_ignore_ascii_case(b);
        }

        document == condition
    }

    /// 包含检查（标签按 id 或名称，字符串按子串）
    fn contains(document: &Value, condition: &Value) -> bool {
        if let Some(tag_ids) = Self::tag_ids(document) {
            // 数值条件按 id 匹配，否则按名称（不区分大小写）匹配
            if let Some(c) = Self::as_f64(condition) {
                return tag_ids.iter().any(|&id| (id as f64 - c).abs() < f64::EPSILON);
            }
            if let Value::String(name) = condition {
                let names = Self::tag_names(document);
                return names.iter().any(|n| n.eq_ignore_ascii_case(name));
            }
            return false;
        }

        if let (Value::String(haystack), Value::String(needle)) = (document, condition) {
            return haystack.to_lowercase().contains(&needle.to_lowercase());
        }

        false
    }

    /// 字符串前缀检查（不区分大小写）
    fn starts_with(document: &Value, condition: &Value) -> bool {
        match (document, condition) {
            (Value::String(s), Value::String(prefix)) => {
                s.to_lowercase().starts_with(&prefix.to_lowercase())
            }
            _ => false,
        }
    }

    /// 字符串后缀检查（不区分大小写）
    fn ends_with(document: &Value, condition: &Value) -> bool {
        match (document, condition) {
            (Value::String(s), Value::String(suffix)) => {
                s.to_lowercase().ends_with(&suffix.to_lowercase())
            }
            _ => false,
        }
    }

    /// 数值比较，任一操作数不是数值即不匹配
    fn numeric_compare<F>(document: &Value, condition: &Value, cmp: F) -> bool
    where
        F: Fn(f64, f64) -> bool,
    {
        match (Self::as_f64(document), Self::as_f64(condition)) {
            (Some(a), Some(b)) => cmp(a, b),
            _ => false,
        }
    }

    /// 范围比较，条件值须为 [min, max] 数组（含边界）
    fn between(document: &Value, condition: &Value) -> bool {
        let Some(bounds) = condition.as_array() else {
            return false;
        };
        if bounds.len() < 2 {
            return false;
        }

        match (
            Self::as_f64(document),
            Self::as_f64(&bounds[0]),
            Self::as_f64(&bounds[1]),
        ) {
            (Some(v), Some(lo), Some(hi)) => v >= lo && v <= hi,
            _ => false,
        }
    }

    /// 列表成员检查
    ///
    /// 条件值非数组时视为单元素列表。标签数组按 id 求交集，
    /// 数值文档值按整数强转后比较。
    fn in_list(document: &Value, condition: &Value) -> bool {
        let single;
        let list: &[Value] = match condition.as_array() {
            Some(arr) => arr,
            None => {
                single = [condition.clone()];
                &single
            }
        };

        if let Some(tag_ids) = Self::tag_ids(document) {
            return list.iter().any(|item| {
                Self::as_f64(item)
                    .map(|c| tag_ids.iter().any(|&id| (id as f64 - c).abs() < f64::EPSILON))
                    .unwrap_or(false)
            });
        }

        if let Some(v) = Self::as_f64(document) {
            let v = v as i64;
            return list
                .iter()
                .filter_map(Self::as_f64)
                .any(|item| item as i64 == v);
        }

        list.iter().any(|item| Self::equals(document, item))
    }

    /// 空值检查：null、空字符串、空数组为“空”；0 和 "0" 不是
    fn is_empty(value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(arr) => arr.is_empty(),
            _ => false,
        }
    }

    /// 正则匹配，仅对字符串文档值生效；非法模式视为不匹配
    fn regex_match(document: &Value, condition: &Value) -> bool {
        let (Value::String(s), Value::String(pattern)) = (document, condition) else {
            return false;
        };

        match Regex::new(pattern) {
            Ok(re) => re.is_match(s),
            Err(_) => false,
        }
    }

    /// 识别标签数组（`[{id, name}, ...]`），返回其中的 id 列表
    fn tag_ids(value: &Value) -> Option<Vec<i64>> {
        let arr = value.as_array()?;
        let first = arr.first()?;
        first.get("id")?;

        Some(
            arr.iter()
                .filter_map(|t| t.get("id").and_then(Value::as_i64))
                .collect(),
        )
    }

    /// 标签数组中的名称列表
    fn tag_names(value: &Value) -> Vec<String> {
        value
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|t| t.get("name").and_then(Value::as_str))
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 尝试将 Value 解析为 f64（数字或数字形态的字符串）
    fn as_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}
