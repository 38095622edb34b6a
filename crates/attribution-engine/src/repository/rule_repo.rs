//! 规则仓储（PostgreSQL 实现）
//!
//! 按优先级降序加载启用规则及其条件组与动作。条件或动作里出现
//! 无法识别的字段类型、操作符或动作类型时整条规则被拒绝：跳过
//! 单个条件会放宽 AND 组的语义，宁可不执行也不能执行错。

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::warn;

use crate::error::{AttributionError, Result};
use crate::fields::{ActionType, FieldType, Operator};
use crate::models::{Action, Condition, Rule, parse_stored_value};
use crate::repository::traits::RuleStore;

/// 规则仓储
pub struct PgRuleStore {
    pool: PgPool,
}

impl PgRuleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_rule(row: &PgRow) -> Rule {
        Rule {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            priority: row.get("priority"),
            is_active: row.get("is_active"),
            stop_on_match: row.get("stop_on_match"),
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }

    fn map_condition(row: &PgRow) -> Result<Condition> {
        let field_type_raw: String = row.get("field_type");
        let operator_raw: String = row.get("operator");
        let raw_value: String = row.get("value");

        let field_type = FieldType::parse(&field_type_raw).ok_or_else(|| {
            AttributionError::RuleDataInvalid(format!("未知字段类型: {field_type_raw}"))
        })?;
        let operator = Operator::parse(&operator_raw).ok_or_else(|| {
            AttributionError::RuleDataInvalid(format!("未知操作符: {operator_raw}"))
        })?;

        Ok(Condition {
            rule_id: row.get("rule_id"),
            condition_group: row.get("condition_group"),
            field_type,
            field_name: row.get("field_name"),
            operator,
            value: parse_stored_value(&raw_value),
        })
    }

    fn map_action(row: &PgRow) -> Result<Action> {
        let action_type_raw: String = row.get("action_type");
        let raw_value: String = row.get("value");

        let action_type = ActionType::parse(&action_type_raw).ok_or_else(|| {
            AttributionError::RuleDataInvalid(format!("未知动作类型: {action_type_raw}"))
        })?;

        Ok(Action {
            rule_id: row.get("rule_id"),
            action_type,
            field_name: row.get("field_name"),
            value: parse_stored_value(&raw_value),
        })
    }

    /// 加载规则的条件与动作明细
    async fn hydrate(&self, rule: &mut Rule) -> Result<()> {
        let condition_rows = sqlx::query(
            r#"SELECT rule_id, condition_group, field_type, field_name, operator, value
               FROM attribution_rule_conditions
               WHERE rule_id = $1
               ORDER BY condition_group, id"#,
        )
        .bind(rule.id)
        .fetch_all(&self.pool)
        .await?;

        for row in &condition_rows {
            rule.conditions.push(Self::map_condition(row)?);
        }

        let action_rows = sqlx::query(
            r#"SELECT rule_id, action_type, field_name, value
               FROM attribution_rule_actions
               WHERE rule_id = $1
               ORDER BY id"#,
        )
        .bind(rule.id)
        .fetch_all(&self.pool)
        .await?;

        for row in &action_rows {
            rule.actions.push(Self::map_action(row)?);
        }

        Ok(())
    }
}

#[async_trait]
impl RuleStore for PgRuleStore {
    async fn get_active_rules(&self) -> Result<Vec<Rule>> {
        let rows = sqlx::query(
            r#"SELECT id, name, description, priority, is_active, stop_on_match
               FROM attribution_rules
               WHERE is_active = TRUE
               ORDER BY priority DESC, id ASC"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut rule = Self::map_rule(row);
            match self.hydrate(&mut rule).await {
                Ok(()) => rules.push(rule),
                Err(AttributionError::RuleDataInvalid(reason)) => {
                    warn!(rule_id = rule.id, rule_name = %rule.name, %reason, "规则数据非法，跳过该规则");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(rules)
    }

    async fn find_rule(&self, rule_id: i64) -> Result<Option<Rule>> {
        let row = sqlx::query(
            r#"SELECT id, name, description, priority, is_active, stop_on_match
               FROM attribution_rules
               WHERE id = $1"#,
        )
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut rule = Self::map_rule(&row);
        self.hydrate(&mut rule).await?;

        Ok(Some(rule))
    }
}
