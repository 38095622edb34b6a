//! 归档批处理入口
//!
//! 一次性对指定文档执行归档规则。
//!
//! ```text
//! attribution [--simulate] <document_id>...
//! ```
//!
//! 默认应用动作并写入审计，--simulate 仅评估规则并列出计划变更。
//! 处理汇总以 JSON 形式输出到标准输出。

use anyhow::{Context, Result, bail};
use attribution_engine::models::ActorContext;
use attribution_engine::repository::{PgAuditLog, PgDocumentStore, PgRuleStore};
use attribution_engine::service::AttributionService;
use kdocs_shared::config::AppConfig;
use kdocs_shared::database::Database;
use kdocs_shared::observability;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load("attribution-engine").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    observability::init(&config.logging)?;

    let mut apply = true;
    let mut document_ids: Vec<i64> = Vec::new();
    for arg in std::env::args().skip(1) {
        if arg == "--simulate" {
            apply = false;
        } else {
            let id = arg
                .parse::<i64>()
                .with_context(|| format!("invalid document id: {arg}"))?;
            document_ids.push(id);
        }
    }

    if document_ids.is_empty() {
        bail!("usage: attribution [--simulate] <document_id>...");
    }

    info!(
        count = document_ids.len(),
        apply, "Starting attribution batch"
    );

    let database = Database::connect(&config.database).await?;
    database.health_check().await?;

    let docs = Arc::new(PgDocumentStore::new(database.pool().clone()));
    let rules = Arc::new(PgRuleStore::new(database.pool().clone()));
    let audit = Arc::new(PgAuditLog::new(database.pool().clone()));

    let service = AttributionService::new(docs, rules, audit);

    let batch = service
        .process_batch(&document_ids, apply, &ActorContext::system())
        .await?;

    println!("{}", serde_json::to_string_pretty(&batch)?);

    info!(
        total = batch.total,
        with_matches = batch.with_matches,
        with_changes = batch.with_changes,
        "Attribution batch complete"
    );

    database.close().await;
    Ok(())
}
