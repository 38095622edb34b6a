//! 归类引擎领域模型
//!
//! 规则、条件、动作以及评估/执行结果的数据结构。
//! 规则由管理端维护，引擎侧只读。

use crate::fields::{ActionType, FieldType, Operator};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// 解析存储的条件/动作值
///
/// 数据库中以文本存储，可能是合法 JSON（数组、对象、数字），
/// 也可能是裸字符串。加载时解析一次，之后不再重复解析。
pub fn parse_stored_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// 将动作值转成文本形态，用于与数据库中的文本列比较及审计存档
///
/// Null 视为无值，字符串原样保留，其余类型按 JSON 文本化。
pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// 文档标签
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentTag {
    pub id: i64,
    pub name: String,
}

/// 文档读取视图
///
/// 由文档存储拼装的扁平投影（含关联的正文、标签和自定义字段），
/// 在一次评估期间视为不可变快照。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentView {
    pub id: i64,
    pub title: Option<String>,
    pub correspondent_id: Option<i64>,
    pub correspondent_name: Option<String>,
    pub document_type_id: Option<i64>,
    pub document_type_label: Option<String>,
    pub amount: Option<f64>,
    pub content: Option<String>,
    pub ocr_content: Option<String>,
    pub doc_date: Option<NaiveDate>,
    pub created_at: Option<DateTime<Utc>>,
    pub logical_folder_id: Option<i64>,
    pub compte_comptable: Option<String>,
    pub centre_cout: Option<String>,
    pub projet: Option<String>,
    pub tags: Vec<DocumentTag>,
    pub custom_fields: HashMap<String, Value>,
}

/// 归类规则（SI/ALORS）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// 数值越大越先评估
    pub priority: i32,
    pub is_active: bool,
    /// 匹配后是否停止评估后续规则
    pub stop_on_match: bool,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
}

/// 规则条件
///
/// 同一 condition_group 内的条件是 AND 关系，组与组之间是 OR 关系。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub rule_id: i64,
    pub condition_group: i32,
    pub field_type: FieldType,
    /// 仅 custom_field 类型需要
    pub field_name: Option<String>,
    pub operator: Operator,
    pub value: Value,
}

/// 规则动作
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub rule_id: i64,
    pub action_type: ActionType,
    pub field_name: Option<String>,
    pub value: Value,
}

/// 单个条件的评估结果
#[derive(Debug, Clone, Serialize)]
pub struct ConditionOutcome {
    pub matched: bool,
    pub field_type: FieldType,
    pub operator: Operator,
    pub document_value: Value,
    pub condition_value: Value,
    /// 审计展示用诊断信息，不参与控制流
    pub reason: String,
}

/// 条件组的评估结果
#[derive(Debug, Clone, Serialize)]
pub struct GroupOutcome {
    pub group: i32,
    pub matched: bool,
    pub conditions: Vec<ConditionOutcome>,
}

/// 一条规则对一个文档的评估结果
#[derive(Debug, Clone, Serialize)]
pub struct RuleEvaluation {
    pub matched: bool,
    pub groups: Vec<GroupOutcome>,
}

/// 待应用的动作（来自匹配规则，按优先级顺序）
#[derive(Debug, Clone, Serialize)]
pub struct PlannedAction {
    pub rule_id: i64,
    pub rule_name: String,
    pub action_type: ActionType,
    pub field_name: Option<String>,
    pub value: Value,
}

/// 单条规则的执行日志摘要（evaluate 返回值的一部分）
#[derive(Debug, Clone, Serialize)]
pub struct RuleLogSummary {
    pub rule_id: i64,
    pub rule_name: String,
    pub matched: bool,
    pub conditions_evaluated: Vec<GroupOutcome>,
    pub execution_time_ms: i64,
}

/// 规则引擎评估结果
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResult {
    pub success: bool,
    pub error: Option<String>,
    pub document_id: i64,
    pub rules_evaluated: u32,
    pub rules_matched: u32,
    pub actions: Vec<PlannedAction>,
    pub logs: Vec<RuleLogSummary>,
    pub execution_time_ms: i64,
}

impl EvaluationResult {
    /// 文档不存在时的结构化失败结果
    pub fn document_not_found(document_id: i64) -> Self {
        Self {
            success: false,
            error: Some("Document not found".to_string()),
            document_id,
            rules_evaluated: 0,
            rules_matched: 0,
            actions: Vec::new(),
            logs: Vec::new(),
            execution_time_ms: 0,
        }
    }
}

/// 规则试运行：单个文档的结果
#[derive(Debug, Clone, Serialize)]
pub struct RuleTestOutcome {
    pub document_id: i64,
    pub document_title: Option<String>,
    pub matched: bool,
    pub conditions: Vec<GroupOutcome>,
    /// 若匹配，将会应用的动作
    pub would_apply: Vec<Action>,
    pub error: Option<String>,
}

/// 规则试运行汇总
#[derive(Debug, Clone, Serialize)]
pub struct RuleTestSummary {
    pub total: usize,
    pub matched: usize,
    pub not_matched: usize,
    pub errors: usize,
}

/// 规则试运行报告
#[derive(Debug, Clone, Serialize)]
pub struct RuleTestReport {
    pub rule_id: i64,
    pub rule_name: String,
    pub conditions_count: usize,
    pub actions_count: usize,
    pub results: Vec<RuleTestOutcome>,
    pub summary: RuleTestSummary,
}

/// 操作者上下文（用户与来源 IP），贯穿 process 流程用于审计
#[derive(Debug, Clone, Default)]
pub struct ActorContext {
    pub user_id: Option<i64>,
    pub ip: Option<String>,
}

impl ActorContext {
    pub fn new(user_id: Option<i64>, ip: Option<String>) -> Self {
        Self { user_id, ip }
    }

    /// 系统自动执行（无用户、无来源 IP）
    pub fn system() -> Self {
        Self::default()
    }
}

/// 单个动作的应用结果
#[derive(Debug, Clone, Serialize)]
pub struct ChangeResult {
    pub action_type: ActionType,
    pub field_name: Option<String>,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub applied: bool,
    pub simulation: bool,
    pub reason: Option<String>,
    pub error: Option<String>,
    pub rule_id: Option<i64>,
}

impl ChangeResult {
    /// 模拟模式下的计划变更（不产生任何副作用）
    pub fn simulated(action: &PlannedAction) -> Self {
        Self {
            action_type: action.action_type,
            field_name: action.field_name.clone(),
            old_value: None,
            new_value: Some(action.value.clone()),
            applied: false,
            simulation: true,
            reason: None,
            error: None,
            rule_id: Some(action.rule_id),
        }
    }
}

/// 文档处理结果
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub success: bool,
    pub error: Option<String>,
    pub document_id: i64,
    pub rules_evaluated: u32,
    pub rules_matched: u32,
    pub actions_planned: usize,
    pub actions_applied: usize,
    pub changes: Vec<ChangeResult>,
    pub logs: Vec<RuleLogSummary>,
}

/// 批量处理汇总
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub total: usize,
    pub processed: usize,
    /// rules_matched > 0 的文档数
    pub with_matches: usize,
    /// actions_applied > 0 的文档数
    pub with_changes: usize,
    pub results: Vec<ProcessResult>,
}

/// 规则执行日志（读取侧，附带关联名称）
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionLogRecord {
    pub id: i64,
    pub rule_id: i64,
    pub rule_name: Option<String>,
    pub document_id: i64,
    pub document_title: Option<String>,
    pub matched: bool,
    pub conditions_evaluated: Value,
    pub actions_applied: Value,
    pub execution_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// 归类审计日志条目（读取侧）
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationAuditRecord {
    pub id: i64,
    pub document_id: i64,
    pub field_code: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub change_source: String,
    pub change_reason: Option<String>,
    pub rule_id: Option<i64>,
    pub user_id: Option<i64>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 写入审计日志的新条目
#[derive(Debug, Clone)]
pub struct ClassificationAuditEntry {
    pub document_id: i64,
    pub field_code: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub change_source: String,
    pub change_reason: Option<String>,
    pub rule_id: Option<i64>,
    pub user_id: Option<i64>,
    pub ip_address: Option<String>,
}
