//! 归档规则引擎
//!
//! K-Docs 文档自动归类子系统：按可配置的规则为文档设置归类字段、
//! 标签、文件夹、对应方与类型。
//!
//! # 分层
//!
//! - [`evaluator`]: 纯函数条件求值（无 IO）
//! - [`engine`]: 规则遍历与匹配，写执行日志
//! - [`service`]: 动作应用、模拟模式、归类审计、批量处理
//! - [`repository`]: PostgreSQL 数据访问，trait 可替换
//!
//! # 匹配语义
//!
//! 规则按优先级降序（同优先级按 ID 升序）评估，条件组之间 OR、
//! 组内 AND。没有条件的规则始终匹配。命中 stop_on_match 规则
//! 后停止遍历。

pub mod engine;
pub mod error;
pub mod evaluator;
pub mod fields;
pub mod models;
pub mod repository;
pub mod service;

pub use engine::RuleEngine;
pub use error::{AttributionError, Result};
pub use evaluator::ConditionEvaluator;
pub use fields::{ALLOWED_SET_FIELDS, ActionType, FieldType, Operator};
pub use models::{
    ActorContext, BatchResult, ChangeResult, DocumentView, EvaluationResult, ProcessResult, Rule,
    RuleTestReport,
};
pub use service::AttributionService;
