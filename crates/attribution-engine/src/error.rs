//! 归类引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttributionError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("规则未找到: rule_id={0}")]
    RuleNotFound(i64),

    #[error("规则数据解析失败: {0}")]
    RuleDataInvalid(String),

    #[error("JSON 序列化错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AttributionError>;
