//! 共享库
//!
//! 包含 K-Docs 各服务共用的配置、错误处理、数据库连接和日志初始化等基础设施代码。

pub mod config;
pub mod database;
pub mod error;
pub mod observability;

pub use config::AppConfig;
pub use database::Database;
pub use error::{KdocsError, Result};
