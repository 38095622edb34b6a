//! 仓储 Trait 定义
//!
//! 定义引擎依赖的文档存储、规则存储与审计日志接口，
//! 服务层依赖抽象而非具体实现，支持 mock 测试。

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::models::{
    Action, ClassificationAuditEntry, ClassificationAuditRecord, DocumentTag, DocumentView,
    ExecutionLogRecord, GroupOutcome, Rule,
};

/// 文档存储接口
///
/// 读取侧装配 DocumentView 快照，写入侧提供动作应用所需的
/// 字段/标签/目录变更操作。每个写操作自身保证原子性。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 加载文档视图（含关联名称、标签和自定义字段），不存在返回 None
    async fn load_document_view(&self, document_id: i64) -> Result<Option<DocumentView>>;

    /// 文档当前的标签列表
    async fn get_document_tags(&self, document_id: i64) -> Result<Vec<DocumentTag>>;

    /// 按名称读取自定义字段值
    async fn get_custom_field_value(
        &self,
        document_id: i64,
        field_name: &str,
    ) -> Result<Option<Value>>;

    /// 读取归类字段（compte_comptable / centre_cout / projet）的当前值
    async fn get_classification_field(
        &self,
        document_id: i64,
        field_name: &str,
    ) -> Result<Option<String>>;

    /// 写入归类字段
    async fn set_classification_field(
        &self,
        document_id: i64,
        field_name: &str,
        value: Option<String>,
    ) -> Result<()>;

    /// 给文档加标签（已存在时为幂等空操作）
    async fn add_tag(&self, document_id: i64, tag_id: i64) -> Result<()>;

    /// 移除文档标签
    async fn remove_tag(&self, document_id: i64, tag_id: i64) -> Result<()>;

    /// 文档当前所在的逻辑目录
    async fn get_folder(&self, document_id: i64) -> Result<Option<i64>>;

    /// 移动文档到逻辑目录
    async fn move_to_folder(&self, document_id: i64, folder_id: i64) -> Result<()>;

    /// 文档当前的正对应方 id
    async fn get_correspondent(&self, document_id: i64) -> Result<Option<i64>>;

    async fn set_correspondent(&self, document_id: i64, correspondent_id: i64) -> Result<()>;

    /// 文档当前的类型 id
    async fn get_document_type(&self, document_id: i64) -> Result<Option<i64>>;

    async fn set_document_type(&self, document_id: i64, document_type_id: i64) -> Result<()>;

    /// 应用动作后盖上归类时间戳（last_classified_at / last_classified_by）
    async fn stamp_classification(&self, document_id: i64, source: &str) -> Result<()>;
}

/// 规则存储接口（引擎侧只读）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// 所有启用的规则，按 priority 降序、id 升序（平局时的确定性顺序）
    async fn get_active_rules(&self) -> Result<Vec<Rule>>;

    /// 按 id 查找规则（含条件与动作）
    async fn find_rule(&self, rule_id: i64) -> Result<Option<Rule>>;
}

/// 审计日志接口
///
/// 执行日志与归类审计都是只追加的，引擎从不修改或删除。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// 追加一条规则执行日志（无论是否匹配都写入）
    async fn append_execution_log(
        &self,
        rule_id: i64,
        document_id: i64,
        matched: bool,
        conditions_evaluated: &[GroupOutcome],
        actions_applied: &[Action],
        execution_time_ms: i64,
    ) -> Result<()>;

    /// 追加一条归类变更审计
    async fn append_classification_audit(&self, entry: &ClassificationAuditEntry) -> Result<()>;

    /// 某规则最近的执行日志
    async fn logs_for_rule(&self, rule_id: i64, limit: i64) -> Result<Vec<ExecutionLogRecord>>;

    /// 某文档的全部执行日志
    async fn logs_for_document(&self, document_id: i64) -> Result<Vec<ExecutionLogRecord>>;

    /// 某文档的归类变更历史
    async fn history_for_document(
        &self,
        document_id: i64,
        limit: i64,
    ) -> Result<Vec<ClassificationAuditRecord>>;
}
