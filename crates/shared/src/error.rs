//! 统一错误处理模块
//!
//! 定义各服务共享的基础错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum KdocsError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    // ==================== 配置错误 ====================
    #[error("配置加载失败: {0}")]
    Config(#[from] config::ConfigError),

    // ==================== 序列化错误 ====================
    #[error("JSON 序列化错误: {0}")]
    Json(#[from] serde_json::Error),

    // ==================== 验证错误 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, KdocsError>;

impl KdocsError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 判断是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(sqlx::Error::PoolTimedOut))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = KdocsError::NotFound {
            entity: "document".to_string(),
            id: "42".to_string(),
        };
        assert_eq!(err.code(), "NOT_FOUND");
        assert!(err.to_string().contains("document"));
    }

    #[test]
    fn test_validation_error_display() {
        let err = KdocsError::Validation("priority 必须为整数".to_string());
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
