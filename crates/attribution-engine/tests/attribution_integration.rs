//! 归档流水线集成测试
//!
//! 用内存实现替换 PostgreSQL 仓储，覆盖评估、模拟、应用、
//! 幂等与批量处理的完整链路。

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use attribution_engine::error::Result;
use attribution_engine::fields::{ActionType, FieldType, Operator};
use attribution_engine::models::{
    Action, ActorContext, ClassificationAuditEntry, ClassificationAuditRecord, Condition,
    DocumentTag, DocumentView, ExecutionLogRecord, GroupOutcome, Rule, value_as_text,
};
use attribution_engine::repository::traits::{AuditLog, DocumentStore, RuleStore};
use attribution_engine::service::AttributionService;

#[derive(Default)]
struct InMemoryDocs {
    documents: Mutex<HashMap<i64, DocumentView>>,
}

impl InMemoryDocs {
    fn with_documents(documents: Vec<DocumentView>) -> Self {
        Self {
            documents: Mutex::new(documents.into_iter().map(|d| (d.id, d)).collect()),
        }
    }

    fn snapshot(&self, document_id: i64) -> Option<DocumentView> {
        self.documents.lock().unwrap().get(&document_id).cloned()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocs {
    async fn load_document_view(&self, document_id: i64) -> Result<Option<DocumentView>> {
        Ok(self.documents.lock().unwrap().get(&document_id).cloned())
    }

    async fn get_document_tags(&self, document_id: i64) -> Result<Vec<DocumentTag>> {
        Ok(self
            .documents
            .lock()
            .unwrap()
            .get(&document_id)
            .map(|d| d.tags.clone())
            .unwrap_or_default())
    }

    async fn get_custom_field_value(
        &self,
        document_id: i64,
        field_name: &str,
    ) -> Result<Option<Value>> {
        Ok(self
            .documents
            .lock()
            .unwrap()
            .get(&document_id)
            .and_then(|d| d.custom_fields.get(field_name).cloned()))
    }

    async fn get_classification_field(
        &self,
        document_id: i64,
        field_name: &str,
    ) -> Result<Option<String>> {
        let documents = self.documents.lock().unwrap();
        let doc = documents.get(&document_id);
        Ok(doc.and_then(|d| match field_name {
            "compte_comptable" => d.compte_comptable.clone(),
            "centre_cout" => d.centre_cout.clone(),
            "projet" => d.projet.clone(),
            _ => None,
        }))
    }

    async fn set_classification_field(
        &self,
        document_id: i64,
        field_name: &str,
        value: Option<String>,
    ) -> Result<()> {
        let mut documents = self.documents.lock().unwrap();
        if let Some(doc) = documents.get_mut(&document_id) {
            match field_name {
                "compte_comptable" => doc.compte_comptable = value,
                "centre_cout" => doc.centre_cout = value,
                "projet" => doc.projet = value,
                _ => {}
            }
        }
        Ok(())
    }

    async fn add_tag(&self, document_id: i64, tag_id: i64) -> Result<()> {
        let mut documents = self.documents.lock().unwrap();
        if let Some(doc) = documents.get_mut(&document_id)
            && !doc.tags.iter().any(|t| t.id == tag_id)
        {
            doc.tags.push(DocumentTag {
                id: tag_id,
                name: format!("tag-{tag_id}"),
            });
        }
        Ok(())
    }

    async fn remove_tag(&self, document_id: i64, tag_id: i64) -> Result<()> {
        let mut documents = self.documents.lock().unwrap();
        if let Some(doc) = documents.get_mut(&document_id) {
            doc.tags.retain(|t| t.id != tag_id);
        }
        Ok(())
    }

    async fn get_folder(&self, document_id: i64) -> Result<Option<i64>> {
        Ok(self
            .documents
            .lock()
            .unwrap()
            .get(&document_id)
            .and_then(|d| d.logical_folder_id))
    }

    async fn move_to_folder(&self, document_id: i64, folder_id: i64) -> Result<()> {
        let mut documents = self.documents.lock().unwrap();
        if let Some(doc) = documents.get_mut(&document_id) {
            doc.logical_folder_id = Some(folder_id);
        }
        Ok(())
    }

    async fn get_correspondent(&self, document_id: i64) -> Result<Option<i64>> {
        Ok(self
            .documents
            .lock()
            .unwrap()
            .get(&document_id)
            .and_then(|d| d.correspondent_id))
    }

    async fn set_correspondent(&self, document_id: i64, correspondent_id: i64) -> Result<()> {
        let mut documents = self.documents.lock().unwrap();
        if let Some(doc) = documents.get_mut(&document_id) {
            doc.correspondent_id = Some(correspondent_id);
        }
        Ok(())
    }

    async fn get_document_type(&self, document_id: i64) -> Result<Option<i64>> {
        Ok(self
            .documents
            .lock()
            .unwrap()
            .get(&document_id)
            .and_then(|d| d.document_type_id))
    }

    async fn set_document_type(&self, document_id: i64, document_type_id: i64) -> Result<()> {
        let mut documents = self.documents.lock().unwrap();
        if let Some(doc) = documents.get_mut(&document_id) {
            doc.document_type_id = Some(document_type_id);
        }
        Ok(())
    }

    async fn stamp_classification(&self, _document_id: i64, _source: &str) -> Result<()> {
        Ok(())
    }
}

struct InMemoryRules {
    rules: Vec<Rule>,
}

#[async_trait]
impl RuleStore for InMemoryRules {
    async fn get_active_rules(&self) -> Result<Vec<Rule>> {
        let mut rules: Vec<Rule> = self.rules.iter().filter(|r| r.is_active).cloned().collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(rules)
    }

    async fn find_rule(&self, rule_id: i64) -> Result<Option<Rule>> {
        Ok(self.rules.iter().find(|r| r.id == rule_id).cloned())
    }
}

#[derive(Default)]
struct InMemoryAudit {
    execution_logs: Mutex<Vec<ExecutionLogRecord>>,
    audit_entries: Mutex<Vec<ClassificationAuditEntry>>,
}

#[async_trait]
impl AuditLog for InMemoryAudit {
    async fn append_execution_log(
        &self,
        rule_id: i64,
        document_id: i64,
        matched: bool,
        conditions_evaluated: &[GroupOutcome],
        actions_applied: &[Action],
        execution_time_ms: i64,
    ) -> Result<()> {
        let mut logs = self.execution_logs.lock().unwrap();
        let next_id = logs.len() as i64 + 1;
        logs.push(ExecutionLogRecord {
            id: next_id,
            rule_id,
            rule_name: None,
            document_id,
            document_title: None,
            matched,
            conditions_evaluated: serde_json::to_value(conditions_evaluated)?,
            actions_applied: serde_json::to_value(actions_applied)?,
            execution_time_ms,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn append_classification_audit(&self, entry: &ClassificationAuditEntry) -> Result<()> {
        self.audit_entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn logs_for_rule(&self, rule_id: i64, limit: i64) -> Result<Vec<ExecutionLogRecord>> {
        Ok(self
            .execution_logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.rule_id == rule_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn logs_for_document(&self, document_id: i64) -> Result<Vec<ExecutionLogRecord>> {
        Ok(self
            .execution_logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn history_for_document(
        &self,
        document_id: i64,
        limit: i64,
    ) -> Result<Vec<ClassificationAuditRecord>> {
        Ok(self
            .audit_entries
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.document_id == document_id)
            .take(limit as usize)
            .map(|(i, e)| ClassificationAuditRecord {
                id: i as i64 + 1,
                document_id: e.document_id,
                field_code: e.field_code.clone(),
                old_value: e.old_value.as_ref().and_then(value_as_text),
                new_value: e.new_value.as_ref().and_then(value_as_text),
                change_source: e.change_source.clone(),
                change_reason: e.change_reason.clone(),
                rule_id: e.rule_id,
                user_id: e.user_id,
                ip_address: e.ip_address.clone(),
                created_at: Utc::now(),
            })
            .collect())
    }
}

fn facture() -> DocumentView {
    DocumentView {
        id: 1,
        title: Some("Facture EDF janvier".to_string()),
        correspondent_id: Some(5),
        correspondent_name: Some("EDF".to_string()),
        amount: Some(250.0),
        ocr_content: Some("Facture d'électricité EDF".to_string()),
        logical_folder_id: Some(10),
        tags: vec![DocumentTag {
            id: 1,
            name: "facture".to_string(),
        }],
        ..Default::default()
    }
}

fn condition(
    rule_id: i64,
    group: i32,
    field_type: FieldType,
    operator: Operator,
    value: Value,
) -> Condition {
    Condition {
        rule_id,
        condition_group: group,
        field_type,
        field_name: None,
        operator,
        value,
    }
}

fn service(
    documents: Vec<DocumentView>,
    rules: Vec<Rule>,
) -> (
    AttributionService<InMemoryDocs, InMemoryRules, InMemoryAudit>,
    Arc<InMemoryDocs>,
    Arc<InMemoryAudit>,
) {
    let docs = Arc::new(InMemoryDocs::with_documents(documents));
    let audit = Arc::new(InMemoryAudit::default());
    let svc = AttributionService::new(
        docs.clone(),
        Arc::new(InMemoryRules { rules }),
        audit.clone(),
    );
    (svc, docs, audit)
}

#[tokio::test]
async fn stop_on_match_shadows_lower_priority_rules() {
    let rules = vec![
        Rule {
            id: 1,
            name: "EDF vers énergie".to_string(),
            description: None,
            priority: 100,
            is_active: true,
            stop_on_match: true,
            conditions: vec![condition(
                1,
                0,
                FieldType::Correspondent,
                Operator::Equals,
                json!(5),
            )],
            actions: vec![Action {
                rule_id: 1,
                action_type: ActionType::MoveToFolder,
                field_name: None,
                value: json!(20),
            }],
        },
        Rule {
            id: 2,
            name: "tout vers archive".to_string(),
            description: None,
            priority: 50,
            is_active: true,
            stop_on_match: false,
            conditions: vec![],
            actions: vec![Action {
                rule_id: 2,
                action_type: ActionType::MoveToFolder,
                field_name: None,
                value: json!(99),
            }],
        },
    ];

    let (svc, docs, audit) = service(vec![facture()], rules);
    let result = svc.process(1, true, &ActorContext::system()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.rules_evaluated, 1);
    assert_eq!(result.rules_matched, 1);
    assert_eq!(result.actions_applied, 1);
    assert_eq!(docs.snapshot(1).unwrap().logical_folder_id, Some(20));
    // 第二条规则未被评估，执行日志只有一条
    assert_eq!(audit.execution_logs.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn condition_groups_are_or_combined() {
    // 组 0 不成立（金额 > 1000 为假），组 1 成立（OCR 内容包含 EDF）
    let rules = vec![Rule {
        id: 1,
        name: "gros montant ou EDF".to_string(),
        description: None,
        priority: 10,
        is_active: true,
        stop_on_match: false,
        conditions: vec![
            condition(1, 0, FieldType::Amount, Operator::GreaterThan, json!(1000)),
            condition(1, 1, FieldType::Content, Operator::Contains, json!("edf")),
        ],
        actions: vec![Action {
            rule_id: 1,
            action_type: ActionType::AddTag,
            field_name: None,
            value: json!({"id": 7, "name": "énergie"}),
        }],
    }];

    let (svc, docs, _audit) = service(vec![facture()], rules);
    let result = svc.process(1, true, &ActorContext::system()).await.unwrap();

    assert_eq!(result.rules_matched, 1);
    assert!(docs.snapshot(1).unwrap().tags.iter().any(|t| t.id == 7));
    let log = &result.logs[0];
    assert!(log.matched);
    assert!(!log.conditions_evaluated[0].matched);
    assert!(log.conditions_evaluated[1].matched);
}

#[tokio::test]
async fn simulation_leaves_document_untouched() {
    let rules = vec![Rule {
        id: 1,
        name: "affectation projet".to_string(),
        description: None,
        priority: 10,
        is_active: true,
        stop_on_match: false,
        conditions: vec![],
        actions: vec![Action {
            rule_id: 1,
            action_type: ActionType::SetField,
            field_name: Some("projet".to_string()),
            value: json!("P-2026"),
        }],
    }];

    let (svc, docs, audit) = service(vec![facture()], rules);
    let result = svc
        .process(1, false, &ActorContext::system())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.actions_planned, 1);
    assert_eq!(result.actions_applied, 0);
    assert!(result.changes[0].simulation);
    assert_eq!(docs.snapshot(1).unwrap().projet, None);
    assert!(audit.audit_entries.lock().unwrap().is_empty());
    // 模拟模式仍写执行日志（评估本身发生了）
    assert_eq!(audit.execution_logs.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn reapplying_set_field_is_idempotent() {
    let rules = vec![Rule {
        id: 1,
        name: "affectation centre de coût".to_string(),
        description: None,
        priority: 10,
        is_active: true,
        stop_on_match: false,
        conditions: vec![],
        actions: vec![Action {
            rule_id: 1,
            action_type: ActionType::SetField,
            field_name: Some("centre_cout".to_string()),
            value: json!("CC-42"),
        }],
    }];

    let (svc, docs, audit) = service(vec![facture()], rules);
    let actor = ActorContext::new(Some(3), None);

    let first = svc.process(1, true, &actor).await.unwrap();
    assert_eq!(first.actions_applied, 1);
    assert_eq!(
        docs.snapshot(1).unwrap().centre_cout.as_deref(),
        Some("CC-42")
    );

    let second = svc.process(1, true, &actor).await.unwrap();
    assert_eq!(second.actions_applied, 0);
    assert_eq!(second.changes[0].reason.as_deref(), Some("Value unchanged"));
    // 审计只记录实际发生的那次变更
    assert_eq!(audit.audit_entries.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn tag_actions_audit_with_reasons() {
    let rules = vec![Rule {
        id: 1,
        name: "échange de tags".to_string(),
        description: None,
        priority: 10,
        is_active: true,
        stop_on_match: false,
        conditions: vec![],
        actions: vec![
            Action {
                rule_id: 1,
                action_type: ActionType::AddTag,
                field_name: None,
                value: json!(7),
            },
            Action {
                rule_id: 1,
                action_type: ActionType::RemoveTag,
                field_name: None,
                value: json!(1),
            },
        ],
    }];

    let (svc, docs, audit) = service(vec![facture()], rules);
    let result = svc.process(1, true, &ActorContext::system()).await.unwrap();

    assert_eq!(result.actions_applied, 2);
    let tags = docs.snapshot(1).unwrap().tags;
    assert!(tags.iter().any(|t| t.id == 7));
    assert!(!tags.iter().any(|t| t.id == 1));

    let entries = audit.audit_entries.lock().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].change_reason.as_deref(), Some("Tag added by rule"));
    assert_eq!(
        entries[1].change_reason.as_deref(),
        Some("Tag removed by rule")
    );
    assert!(entries.iter().all(|e| e.change_source == "rules"));
}

#[tokio::test]
async fn batch_tolerates_missing_documents() {
    let rules = vec![Rule {
        id: 1,
        name: "affectation projet".to_string(),
        description: None,
        priority: 10,
        is_active: true,
        stop_on_match: false,
        conditions: vec![],
        actions: vec![Action {
            rule_id: 1,
            action_type: ActionType::SetField,
            field_name: Some("projet".to_string()),
            value: json!("P-2026"),
        }],
    }];

    let (svc, _docs, _audit) = service(vec![facture()], rules);
    let batch = svc
        .process_batch(&[1, 404], true, &ActorContext::system())
        .await
        .unwrap();

    assert_eq!(batch.total, 2);
    assert_eq!(batch.processed, 2);
    assert_eq!(batch.with_matches, 1);
    assert_eq!(batch.with_changes, 1);
    assert!(batch.results[0].success);
    assert!(!batch.results[1].success);
    assert_eq!(
        batch.results[1].error.as_deref(),
        Some("Document not found")
    );
}

#[tokio::test]
async fn read_side_exposes_logs_and_classification_history() {
    let rules = vec![Rule {
        id: 1,
        name: "affectation projet".to_string(),
        description: None,
        priority: 10,
        is_active: true,
        stop_on_match: false,
        conditions: vec![],
        actions: vec![Action {
            rule_id: 1,
            action_type: ActionType::SetField,
            field_name: Some("projet".to_string()),
            value: json!("P-2026"),
        }],
    }];

    let (svc, _docs, audit) = service(vec![facture()], rules);
    let actor = ActorContext::new(Some(3), Some("10.0.0.1".to_string()));
    let result = svc.process(1, true, &actor).await.unwrap();
    assert_eq!(result.actions_applied, 1);

    // 按文档查询执行日志
    let doc_logs = audit.logs_for_document(1).await.unwrap();
    assert_eq!(doc_logs.len(), 1);
    assert_eq!(doc_logs[0].rule_id, 1);
    assert!(doc_logs[0].matched);

    // 按规则查询执行日志
    let rule_logs = audit.logs_for_rule(1, 10).await.unwrap();
    assert_eq!(rule_logs.len(), 1);
    assert_eq!(rule_logs[0].document_id, 1);
    assert!(audit.logs_for_rule(99, 10).await.unwrap().is_empty());

    // 归类变更历史
    let history = audit.history_for_document(1, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].field_code, "projet");
    assert_eq!(history[0].new_value.as_deref(), Some("P-2026"));
    assert_eq!(history[0].change_source, "rules");
    assert_eq!(history[0].rule_id, Some(1));
    assert_eq!(history[0].user_id, Some(3));
    assert_eq!(history[0].ip_address.as_deref(), Some("10.0.0.1"));
    assert!(audit.history_for_document(404, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rule_previews_without_side_effects() {
    let rules = vec![Rule {
        id: 1,
        name: "EDF vers énergie".to_string(),
        description: None,
        priority: 10,
        is_active: true,
        stop_on_match: false,
        conditions: vec![condition(
            1,
            0,
            FieldType::Correspondent,
            Operator::Equals,
            json!("5"),
        )],
        actions: vec![Action {
            rule_id: 1,
            action_type: ActionType::MoveToFolder,
            field_name: None,
            value: json!(20),
        }],
    }];

    let (svc, docs, audit) = service(vec![facture()], rules);
    let report = svc.engine().test_rule(1, &[1, 404]).await.unwrap();

    assert_eq!(report.rule_name, "EDF vers énergie");
    assert_eq!(report.summary.total, 2);
    // 条件值为数字形态字符串时按数值比较
    assert_eq!(report.summary.matched, 1);
    assert_eq!(report.summary.errors, 1);
    assert_eq!(report.results[0].would_apply.len(), 1);
    assert_eq!(docs.snapshot(1).unwrap().logical_folder_id, Some(10));
    assert!(audit.execution_logs.lock().unwrap().is_empty());
}
