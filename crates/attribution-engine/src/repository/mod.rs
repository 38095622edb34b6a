//! 数据访问层
//!
//! trait 定义与 PostgreSQL 实现分离，引擎与服务只依赖 trait，
//! 测试用 mockall 或内存实现替换。

pub mod audit_repo;
pub mod document_repo;
pub mod rule_repo;
pub mod traits;

pub use audit_repo::PgAuditLog;
pub use document_repo::PgDocumentStore;
pub use rule_repo::PgRuleStore;
pub use traits::{AuditLog, DocumentStore, RuleStore};

#[cfg(test)]
pub use traits::{MockAuditLog, MockDocumentStore, MockRuleStore};
