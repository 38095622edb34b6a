//! 归档服务
//!
//! 引擎之上的编排层：评估规则、按模拟或应用模式处理计划动作、
//! 写入归类审计、维护文档的最近归类标记。同一文档的处理经由
//! 文档级互斥锁串行化，避免并发应用互相覆盖。
//!
//! 动作逐条应用，单个动作失败不回滚已成功的动作，失败信息
//! 记录在对应的变更结果里。

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::engine::RuleEngine;
use crate::error::Result;
use crate::fields::{ALLOWED_SET_FIELDS, ActionType};
use crate::models::{
    ActorContext, BatchResult, ChangeResult, ClassificationAuditEntry, PlannedAction,
    ProcessResult, value_as_text,
};
use crate::repository::{AuditLog, DocumentStore, RuleStore};

/// 归档服务
pub struct AttributionService<D, R, A>
where
    D: DocumentStore,
    R: RuleStore,
    A: AuditLog,
{
    engine: RuleEngine<D, R, A>,
    docs: Arc<D>,
    audit: Arc<A>,
    /// 文档级互斥锁，键为文档 ID
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl<D, R, A> AttributionService<D, R, A>
where
    D: DocumentStore,
    R: RuleStore,
    A: AuditLog,
{
    pub fn new(docs: Arc<D>, rules: Arc<R>, audit: Arc<A>) -> Self {
        Self {
            engine: RuleEngine::new(docs.clone(), rules.clone(), audit.clone()),
            docs,
            audit,
            locks: DashMap::new(),
        }
    }

    pub fn engine(&self) -> &RuleEngine<D, R, A> {
        &self.engine
    }

    /// 处理单个文档
    ///
    /// apply=false 时为模拟模式：评估规则并列出计划变更，
    /// 不写文档、不写审计。
    #[instrument(skip(self, actor), fields(document_id = document_id, apply = apply))]
    pub async fn process(
        &self,
        document_id: i64,
        apply: bool,
        actor: &ActorContext,
    ) -> Result<ProcessResult> {
        let lock = self
            .locks
            .entry(document_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock().await;
            self.process_locked(document_id, apply, actor).await
        };
        drop(lock);

        // 无其他持有者时回收锁条目，锁表不随处理过的文档数增长。
        // remove_if 在分片锁内执行判断，与 entry() 的克隆互斥。
        self.locks
            .remove_if(&document_id, |_, l| Arc::strong_count(l) == 1);

        result
    }

    async fn process_locked(
        &self,
        document_id: i64,
        apply: bool,
        actor: &ActorContext,
    ) -> Result<ProcessResult> {
        let evaluation = self.engine.evaluate(document_id).await?;

        if !evaluation.success {
            return Ok(ProcessResult {
                success: false,
                error: evaluation.error,
                document_id,
                rules_evaluated: evaluation.rules_evaluated,
                rules_matched: evaluation.rules_matched,
                actions_planned: 0,
                actions_applied: 0,
                changes: Vec::new(),
                logs: evaluation.logs,
            });
        }

        if evaluation.actions.is_empty() {
            debug!(document_id, "无计划动作");
            return Ok(ProcessResult {
                success: true,
                error: None,
                document_id,
                rules_evaluated: evaluation.rules_evaluated,
                rules_matched: evaluation.rules_matched,
                actions_planned: 0,
                actions_applied: 0,
                changes: Vec::new(),
                logs: evaluation.logs,
            });
        }

        let actions_planned = evaluation.actions.len();
        let mut changes: Vec<ChangeResult> = Vec::with_capacity(actions_planned);
        let mut actions_applied = 0usize;

        if apply {
            for action in &evaluation.actions {
                let change = self.apply_action(document_id, action, actor).await;
                if change.applied {
                    actions_applied += 1;
                }
                if let Some(error) = &change.error {
                    warn!(document_id, rule_id = action.rule_id, %error, "动作应用失败");
                }
                changes.push(change);
            }

            self.docs.stamp_classification(document_id, "rules").await?;
            info!(document_id, actions_planned, actions_applied, "动作应用完成");
        } else {
            for action in &evaluation.actions {
                changes.push(ChangeResult::simulated(action));
            }
            debug!(document_id, actions_planned, "模拟模式，仅列出计划变更");
        }

        Ok(ProcessResult {
            success: true,
            error: None,
            document_id,
            rules_evaluated: evaluation.rules_evaluated,
            rules_matched: evaluation.rules_matched,
            actions_planned,
            actions_applied,
            changes,
            logs: evaluation.logs,
        })
    }

    /// 批量处理，逐个文档顺序执行
    ///
    /// 单个文档的业务失败（如文档不存在）记录在其结果里，
    /// 基础设施错误则中断整批。
    #[instrument(skip(self, document_ids, actor), fields(total = document_ids.len(), apply = apply))]
    pub async fn process_batch(
        &self,
        document_ids: &[i64],
        apply: bool,
        actor: &ActorContext,
    ) -> Result<BatchResult> {
        let mut results: Vec<ProcessResult> = Vec::with_capacity(document_ids.len());

        for &document_id in document_ids {
            let result = self.process(document_id, apply, actor).await?;
            results.push(result);
        }

        let with_matches = results.iter().filter(|r| r.rules_matched > 0).count();
        let with_changes = results.iter().filter(|r| r.actions_applied > 0).count();

        info!(
            total = document_ids.len(),
            with_matches, with_changes, "批量处理完成"
        );

        Ok(BatchResult {
            total: document_ids.len(),
            processed: results.len(),
            with_matches,
            with_changes,
            results,
        })
    }

    /// 应用单个动作，任何失败都收敛为变更结果里的错误信息
    async fn apply_action(
        &self,
        document_id: i64,
        action: &PlannedAction,
        actor: &ActorContext,
    ) -> ChangeResult {
        let outcome = match action.action_type {
            ActionType::SetField => self.apply_set_field(document_id, action, actor).await,
            ActionType::AddTag => self.apply_add_tag(document_id, action, actor).await,
            ActionType::RemoveTag => self.apply_remove_tag(document_id, action, actor).await,
            ActionType::MoveToFolder => self.apply_move_to_folder(document_id, action, actor).await,
            ActionType::SetCorrespondent => {
                self.apply_set_correspondent(document_id, action, actor).await
            }
            ActionType::SetDocumentType => {
                self.apply_set_document_type(document_id, action, actor).await
            }
        };

        match outcome {
            Ok(change) => change,
            Err(e) => ChangeResult {
                action_type: action.action_type,
                field_name: action.field_name.clone(),
                old_value: None,
                new_value: Some(action.value.clone()),
                applied: false,
                simulation: false,
                reason: None,
                error: Some(e.to_string()),
                rule_id: Some(action.rule_id),
            },
        }
    }

    async fn apply_set_field(
        &self,
        document_id: i64,
        action: &PlannedAction,
        actor: &ActorContext,
    ) -> Result<ChangeResult> {
        let mut change = ChangeResult {
            action_type: ActionType::SetField,
            field_name: action.field_name.clone(),
            old_value: None,
            new_value: Some(action.value.clone()),
            applied: false,
            simulation: false,
            reason: None,
            error: None,
            rule_id: Some(action.rule_id),
        };

        let Some(field_name) = action.field_name.as_deref() else {
            change.error = Some("Field not allowed: <missing>".to_string());
            return Ok(change);
        };
        if !ALLOWED_SET_FIELDS.contains(&field_name) {
            change.error = Some(format!("Field not allowed: {field_name}"));
            return Ok(change);
        }

        let old_value = self
            .docs
            .get_classification_field(document_id, field_name)
            .await?;
        let new_value = value_as_text(&action.value);

        change.old_value = old_value.clone().map(Value::String);

        if old_value == new_value {
            change.reason = Some("Value unchanged".to_string());
            return Ok(change);
        }

        self.docs
            .set_classification_field(document_id, field_name, new_value.clone())
            .await?;

        self.audit
            .append_classification_audit(&ClassificationAuditEntry {
                document_id,
                field_code: field_name.to_string(),
                old_value: old_value.map(Value::String),
                new_value: new_value.map(Value::String),
                change_source: "rules".to_string(),
                change_reason: None,
                rule_id: Some(action.rule_id),
                user_id: actor.user_id,
                ip_address: actor.ip.clone(),
            })
            .await?;

        change.applied = true;
        Ok(change)
    }

    async fn apply_add_tag(
        &self,
        document_id: i64,
        action: &PlannedAction,
        actor: &ActorContext,
    ) -> Result<ChangeResult> {
        let tag_id = extract_id(&action.value)?;

        self.docs.add_tag(document_id, tag_id).await?;

        self.audit
            .append_classification_audit(&ClassificationAuditEntry {
                document_id,
                field_code: "tag".to_string(),
                old_value: None,
                new_value: Some(Value::from(tag_id)),
                change_source: "rules".to_string(),
                change_reason: Some("Tag added by rule".to_string()),
                rule_id: Some(action.rule_id),
                user_id: actor.user_id,
                ip_address: actor.ip.clone(),
            })
            .await?;

        Ok(ChangeResult {
            action_type: ActionType::AddTag,
            field_name: None,
            old_value: None,
            new_value: Some(Value::from(tag_id)),
            applied: true,
            simulation: false,
            reason: None,
            error: None,
            rule_id: Some(action.rule_id),
        })
    }

    async fn apply_remove_tag(
        &self,
        document_id: i64,
        action: &PlannedAction,
        actor: &ActorContext,
    ) -> Result<ChangeResult> {
        let tag_id = extract_id(&action.value)?;

        self.docs.remove_tag(document_id, tag_id).await?;

        self.audit
            .append_classification_audit(&ClassificationAuditEntry {
                document_id,
                field_code: "tag".to_string(),
                old_value: Some(Value::from(tag_id)),
                new_value: None,
                change_source: "rules".to_string(),
                change_reason: Some("Tag removed by rule".to_string()),
                rule_id: Some(action.rule_id),
                user_id: actor.user_id,
                ip_address: actor.ip.clone(),
            })
            .await?;

        Ok(ChangeResult {
            action_type: ActionType::RemoveTag,
            field_name: None,
            old_value: Some(Value::from(tag_id)),
            new_value: None,
            applied: true,
            simulation: false,
            reason: None,
            error: None,
            rule_id: Some(action.rule_id),
        })
    }

    async fn apply_move_to_folder(
        &self,
        document_id: i64,
        action: &PlannedAction,
        actor: &ActorContext,
    ) -> Result<ChangeResult> {
        let folder_id = extract_id(&action.value)?;

        let old_folder = self.docs.get_folder(document_id).await?;

        let mut change = ChangeResult {
            action_type: ActionType::MoveToFolder,
            field_name: None,
            old_value: old_folder.map(Value::from),
            new_value: Some(Value::from(folder_id)),
            applied: false,
            simulation: false,
            reason: None,
            error: None,
            rule_id: Some(action.rule_id),
        };

        if old_folder == Some(folder_id) {
            change.reason = Some("Already in folder".to_string());
            return Ok(change);
        }

        self.docs.move_to_folder(document_id, folder_id).await?;

        self.audit
            .append_classification_audit(&ClassificationAuditEntry {
                document_id,
                field_code: "logical_folder_id".to_string(),
                old_value: old_folder.map(Value::from),
                new_value: Some(Value::from(folder_id)),
                change_source: "rules".to_string(),
                change_reason: None,
                rule_id: Some(action.rule_id),
                user_id: actor.user_id,
                ip_address: actor.ip.clone(),
            })
            .await?;

        change.applied = true;
        Ok(change)
    }

    async fn apply_set_correspondent(
        &self,
        document_id: i64,
        action: &PlannedAction,
        actor: &ActorContext,
    ) -> Result<ChangeResult> {
        let correspondent_id = extract_id(&action.value)?;

        let old_value = self.docs.get_correspondent(document_id).await?;

        let mut change = ChangeResult {
            action_type: ActionType::SetCorrespondent,
            field_name: None,
            old_value: old_value.map(Value::from),
            new_value: Some(Value::from(correspondent_id)),
            applied: false,
            simulation: false,
            reason: None,
            error: None,
            rule_id: Some(action.rule_id),
        };

        if old_value == Some(correspondent_id) {
            change.reason = Some("Value unchanged".to_string());
            return Ok(change);
        }

        self.docs
            .set_correspondent(document_id, correspondent_id)
            .await?;

        self.audit
            .append_classification_audit(&ClassificationAuditEntry {
                document_id,
                field_code: "correspondent_id".to_string(),
                old_value: old_value.map(Value::from),
                new_value: Some(Value::from(correspondent_id)),
                change_source: "rules".to_string(),
                change_reason: None,
                rule_id: Some(action.rule_id),
                user_id: actor.user_id,
                ip_address: actor.ip.clone(),
            })
            .await?;

        change.applied = true;
        Ok(change)
    }

    async fn apply_set_document_type(
        &self,
        document_id: i64,
        action: &PlannedAction,
        actor: &ActorContext,
    ) -> Result<ChangeResult> {
        let document_type_id = extract_id(&action.value)?;

        let old_value = self.docs.get_document_type(document_id).await?;

        let mut change = ChangeResult {
            action_type: ActionType::SetDocumentType,
            field_name: None,
            old_value: old_value.map(Value::from),
            new_value: Some(Value::from(document_type_id)),
            applied: false,
            simulation: false,
            reason: None,
            error: None,
            rule_id: Some(action.rule_id),
        };

        if old_value == Some(document_type_id) {
            change.reason = Some("Value unchanged".to_string());
            return Ok(change);
        }

        self.docs
            .set_document_type(document_id, document_type_id)
            .await?;

        self.audit
            .append_classification_audit(&ClassificationAuditEntry {
                document_id,
                field_code: "document_type_id".to_string(),
                old_value: old_value.map(Value::from),
                new_value: Some(Value::from(document_type_id)),
                change_source: "rules".to_string(),
                change_reason: None,
                rule_id: Some(action.rule_id),
                user_id: actor.user_id,
                ip_address: actor.ip.clone(),
            })
            .await?;

        change.applied = true;
        Ok(change)
    }
}

/// 从动作值里提取实体 ID
///
/// 兼容四种形态：整数、可解析为整数的字符串、{"id": ...} 对象、
/// 以及取首元素的数组。
fn extract_id(value: &Value) -> Result<i64> {
    let candidate = match value {
        Value::Object(map) => map.get("id").unwrap_or(value),
        Value::Array(items) => items
            .first()
            .ok_or_else(|| crate::error::AttributionError::RuleDataInvalid(
                "动作值为空数组".to_string(),
            ))?,
        other => other,
    };

    // 数组首元素本身也可能是 {"id": ...} 对象
    let candidate = match candidate {
        Value::Object(map) => map.get("id").unwrap_or(candidate),
        other => other,
    };

    match candidate {
        Value::Number(n) => n.as_i64().ok_or_else(|| {
            crate::error::AttributionError::RuleDataInvalid(format!("动作值不是整数: {n}"))
        }),
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| {
            crate::error::AttributionError::RuleDataInvalid(format!("动作值不是整数: {s}"))
        }),
        other => Err(crate::error::AttributionError::RuleDataInvalid(format!(
            "动作值无法解析为 ID: {other}"
        ))),
    }
}
