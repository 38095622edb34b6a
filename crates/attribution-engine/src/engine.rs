//! 规则引擎
//!
//! 按优先级降序遍历启用规则，组间 OR、组内 AND 地评估条件，
//! 收集匹配规则计划执行的动作。引擎本身不执行任何动作，
//! 动作的落库由上层服务负责。
//!
//! 每条规则的评估结果（含条件明细与耗时）都写入执行日志，
//! 命中 stop_on_match 的规则后停止遍历。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::error::{AttributionError, Result};
use crate::evaluator::ConditionEvaluator;
use crate::models::{
    DocumentView, EvaluationResult, GroupOutcome, PlannedAction, Rule, RuleEvaluation,
    RuleLogSummary, RuleTestOutcome, RuleTestReport, RuleTestSummary,
};
use crate::repository::{AuditLog, DocumentStore, RuleStore};

/// 归档规则引擎
pub struct RuleEngine<D, R, A>
where
    D: DocumentStore,
    R: RuleStore,
    A: AuditLog,
{
    docs: Arc<D>,
    rules: Arc<R>,
    audit: Arc<A>,
}

impl<D, R, A> RuleEngine<D, R, A>
where
    D: DocumentStore,
    R: RuleStore,
    A: AuditLog,
{
    pub fn new(docs: Arc<D>, rules: Arc<R>, audit: Arc<A>) -> Self {
        Self { docs, rules, audit }
    }

    /// 对单个文档评估全部启用规则
    ///
    /// 文档不存在时返回 success=false 的结果而非错误，
    /// 批量处理场景下单个缺失文档不应中断整批。
    #[instrument(skip(self), fields(document_id = document_id))]
    pub async fn evaluate(&self, document_id: i64) -> Result<EvaluationResult> {
        let started = Instant::now();

        let Some(document) = self.docs.load_document_view(document_id).await? else {
            warn!(document_id, "文档不存在，跳过评估");
            return Ok(EvaluationResult::document_not_found(document_id));
        };

        let rules = self.rules.get_active_rules().await?;
        debug!(document_id, rule_count = rules.len(), "开始评估规则");

        let mut rules_evaluated: u32 = 0;
        let mut rules_matched: u32 = 0;
        let mut actions: Vec<PlannedAction> = Vec::new();
        let mut logs: Vec<RuleLogSummary> = Vec::new();

        for rule in &rules {
            let rule_started = Instant::now();
            let evaluation = Self::evaluate_rule(rule, &document);
            let elapsed_ms = rule_started.elapsed().as_millis() as i64;
            rules_evaluated += 1;

            let applied_actions: &[_] = if evaluation.matched {
                &rule.actions
            } else {
                &[]
            };
            self.audit
                .append_execution_log(
                    rule.id,
                    document_id,
                    evaluation.matched,
                    &evaluation.groups,
                    applied_actions,
                    elapsed_ms,
                )
                .await?;

            logs.push(RuleLogSummary {
                rule_id: rule.id,
                rule_name: rule.name.clone(),
                matched: evaluation.matched,
                conditions_evaluated: evaluation.groups,
                execution_time_ms: elapsed_ms,
            });

            if !evaluation.matched {
                continue;
            }

            rules_matched += 1;
            for action in &rule.actions {
                actions.push(PlannedAction {
                    rule_id: rule.id,
                    rule_name: rule.name.clone(),
                    action_type: action.action_type,
                    field_name: action.field_name.clone(),
                    value: action.value.clone(),
                });
            }

            if rule.stop_on_match {
                info!(document_id, rule_id = rule.id, "规则命中且 stop_on_match，停止遍历");
                break;
            }
        }

        info!(
            document_id,
            rules_evaluated, rules_matched,
            actions_planned = actions.len(),
            "规则评估完成"
        );

        Ok(EvaluationResult {
            success: true,
            error: None,
            document_id,
            rules_evaluated,
            rules_matched,
            actions,
            logs,
            execution_time_ms: started.elapsed().as_millis() as i64,
        })
    }

    /// 对指定文档集合试运行单条规则（不写日志、不执行动作）
    #[instrument(skip(self, document_ids), fields(rule_id = rule_id, doc_count = document_ids.len()))]
    pub async fn test_rule(&self, rule_id: i64, document_ids: &[i64]) -> Result<RuleTestReport> {
        let rule = self
            .rules
            .find_rule(rule_id)
            .await?
            .ok_or(AttributionError::RuleNotFound(rule_id))?;

        let mut results: Vec<RuleTestOutcome> = Vec::with_capacity(document_ids.len());
        let mut matched = 0usize;
        let mut errors = 0usize;

        for &document_id in document_ids {
            match self.docs.load_document_view(document_id).await {
                Ok(Some(document)) => {
                    let evaluation = Self::evaluate_rule(&rule, &document);
                    if evaluation.matched {
                        matched += 1;
                    }
                    results.push(RuleTestOutcome {
                        document_id,
                        document_title: Some(
                            document
                                .title
                                .clone()
                                .unwrap_or_else(|| "Sans titre".to_string()),
                        ),
                        matched: evaluation.matched,
                        conditions: evaluation.groups,
                        would_apply: if evaluation.matched {
                            rule.actions.clone()
                        } else {
                            Vec::new()
                        },
                        error: None,
                    });
                }
                Ok(None) => {
                    errors += 1;
                    results.push(RuleTestOutcome {
                        document_id,
                        document_title: None,
                        matched: false,
                        conditions: Vec::new(),
                        would_apply: Vec::new(),
                        error: Some("Document not found".to_string()),
                    });
                }
                Err(e) => {
                    errors += 1;
                    results.push(RuleTestOutcome {
                        document_id,
                        document_title: None,
                        matched: false,
                        conditions: Vec::new(),
                        would_apply: Vec::new(),
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let total = results.len();
        Ok(RuleTestReport {
            rule_id: rule.id,
            rule_name: rule.name,
            conditions_count: rule.conditions.len(),
            actions_count: rule.actions.len(),
            results,
            summary: RuleTestSummary {
                total,
                matched,
                not_matched: total - matched - errors,
                errors,
            },
        })
    }

    /// 评估单条规则：组内 AND，组间 OR
    ///
    /// 没有任何条件的规则视为匹配（兜底规则）。
    fn evaluate_rule(rule: &Rule, document: &DocumentView) -> RuleEvaluation {
        if rule.conditions.is_empty() {
            return RuleEvaluation {
                matched: true,
                groups: Vec::new(),
            };
        }

        let mut grouped: BTreeMap<i32, Vec<&crate::models::Condition>> = BTreeMap::new();
        for condition in &rule.conditions {
            grouped.entry(condition.condition_group).or_default().push(condition);
        }

        let mut matched = false;
        let mut groups: Vec<GroupOutcome> = Vec::with_capacity(grouped.len());

        for (group, conditions) in grouped {
            let outcomes: Vec<_> = conditions
                .iter()
                .map(|c| ConditionEvaluator::evaluate(c, document))
                .collect();
            let group_matched = outcomes.iter().all(|o| o.matched);
            if group_matched {
                matched = true;
            }
            groups.push(GroupOutcome {
                group,
                matched: group_matched,
                conditions: outcomes,
            });
        }

        RuleEvaluation { matched, groups }
    }
}
