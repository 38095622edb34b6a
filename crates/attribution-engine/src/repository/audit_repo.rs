//! 审计仓储（PostgreSQL 实现）
//!
//! 两个只追加的表：attribution_rule_logs 记录每条规则的每次评估
//! （条件明细以 JSONB 存档），classification_audit_log 记录每次
//! 实际落库的字段变更。

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::Result;
use crate::models::{
    Action, ClassificationAuditEntry, ClassificationAuditRecord, ExecutionLogRecord, GroupOutcome,
    value_as_text,
};
use crate::repository::traits::AuditLog;

/// 审计仓储
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_execution_log(row: &PgRow) -> ExecutionLogRecord {
        ExecutionLogRecord {
            id: row.get("id"),
            rule_id: row.get("rule_id"),
            rule_name: row.get("rule_name"),
            document_id: row.get("document_id"),
            document_title: row.get("document_title"),
            matched: row.get("matched"),
            conditions_evaluated: row.get("conditions_evaluated"),
            actions_applied: row.get("actions_applied"),
            execution_time_ms: row.get("execution_time_ms"),
            created_at: row.get("created_at"),
        }
    }

    fn map_audit_record(row: &PgRow) -> ClassificationAuditRecord {
        ClassificationAuditRecord {
            id: row.get("id"),
            document_id: row.get("document_id"),
            field_code: row.get("field_code"),
            old_value: row.get("old_value"),
            new_value: row.get("new_value"),
            change_source: row.get("change_source"),
            change_reason: row.get("change_reason"),
            rule_id: row.get("rule_id"),
            user_id: row.get("user_id"),
            ip_address: row.get("ip_address"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn append_execution_log(
        &self,
        rule_id: i64,
        document_id: i64,
        matched: bool,
        groups: &[GroupOutcome],
        actions: &[Action],
        execution_time_ms: i64,
    ) -> Result<()> {
        let conditions_evaluated = serde_json::to_value(groups)?;
        let actions_applied = serde_json::to_value(actions)?;

        sqlx::query(
            r#"INSERT INTO attribution_rule_logs
               (rule_id, document_id, matched, conditions_evaluated, actions_applied, execution_time_ms)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(rule_id)
        .bind(document_id)
        .bind(matched)
        .bind(conditions_evaluated)
        .bind(actions_applied)
        .bind(execution_time_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_classification_audit(&self, entry: &ClassificationAuditEntry) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO classification_audit_log
               (document_id, field_code, old_value, new_value, change_source,
                change_reason, rule_id, user_id, ip_address)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(entry.document_id)
        .bind(&entry.field_code)
        .bind(entry.old_value.as_ref().and_then(value_as_text))
        .bind(entry.new_value.as_ref().and_then(value_as_text))
        .bind(&entry.change_source)
        .bind(&entry.change_reason)
        .bind(entry.rule_id)
        .bind(entry.user_id)
        .bind(&entry.ip_address)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn logs_for_rule(&self, rule_id: i64, limit: i64) -> Result<Vec<ExecutionLogRecord>> {
        let rows = sqlx::query(
            r#"SELECT l.id, l.rule_id, r.name AS rule_name, l.document_id,
                      d.title AS document_title, l.matched,
                      l.conditions_evaluated, l.actions_applied,
                      l.execution_time_ms, l.created_at
               FROM attribution_rule_logs l
               JOIN attribution_rules r ON l.rule_id = r.id
               LEFT JOIN documents d ON l.document_id = d.id
               WHERE l.rule_id = $1
               ORDER BY l.created_at DESC
               LIMIT $2"#,
        )
        .bind(rule_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::map_execution_log).collect())
    }

    async fn logs_for_document(&self, document_id: i64) -> Result<Vec<ExecutionLogRecord>> {
        let rows = sqlx::query(
            r#"SELECT l.id, l.rule_id, r.name AS rule_name, l.document_id,
                      d.title AS document_title, l.matched,
                      l.conditions_evaluated, l.actions_applied,
                      l.execution_time_ms, l.created_at
               FROM attribution_rule_logs l
               JOIN attribution_rules r ON l.rule_id = r.id
               LEFT JOIN documents d ON l.document_id = d.id
               WHERE l.document_id = $1
               ORDER BY l.created_at DESC"#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::map_execution_log).collect())
    }

    async fn history_for_document(
        &self,
        document_id: i64,
        limit: i64,
    ) -> Result<Vec<ClassificationAuditRecord>> {
        let rows = sqlx::query(
            r#"SELECT id, document_id, field_code, old_value, new_value,
                      change_source, change_reason, rule_id, user_id, ip_address, created_at
               FROM classification_audit_log
               WHERE document_id = $1
               ORDER BY created_at DESC
               LIMIT $2"#,
        )
        .bind(document_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::map_audit_record).collect())
    }
}
