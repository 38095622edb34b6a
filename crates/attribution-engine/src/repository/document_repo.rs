//! 文档仓储（PostgreSQL 实现）
//!
//! 读取侧把文档行连同对应方名称、类型标签、标签列表与自定义字段
//! 拼装为 DocumentView 快照；写入侧提供动作应用所需的单条原子变更。

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::collections::HashMap;

use crate::error::{AttributionError, Result};
use crate::models::{DocumentTag, DocumentView, parse_stored_value};
use crate::repository::traits::DocumentStore;

/// 文档仓储
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 校验归类字段名并返回安全的列名
    ///
    /// 列名不能作为绑定参数，这里用白名单匹配挡住任何注入可能。
    fn classification_column(field_name: &str) -> Result<&'static str> {
        match field_name {
            "compte_comptable" => Ok("compte_comptable"),
            "centre_cout" => Ok("centre_cout"),
            "projet" => Ok("projet"),
            _ => Err(AttributionError::Internal(format!(
                "非法归类字段: {field_name}"
            ))),
        }
    }

    fn map_view(row: &PgRow) -> DocumentView {
        DocumentView {
            id: row.get("id"),
            title: row.get("title"),
            correspondent_id: row.get("correspondent_id"),
            correspondent_name: row.get("correspondent_name"),
            document_type_id: row.get("document_type_id"),
            document_type_label: row.get("document_type_label"),
            amount: row.get("amount"),
            content: row.get("content"),
            ocr_content: row.get("ocr_content"),
            doc_date: row.get("doc_date"),
            created_at: row.get("created_at"),
            logical_folder_id: row.get("logical_folder_id"),
            compte_comptable: row.get("compte_comptable"),
            centre_cout: row.get("centre_cout"),
            projet: row.get("projet"),
            tags: Vec::new(),
            custom_fields: HashMap::new(),
        }
    }

    /// 文档的全部自定义字段值（按字段名索引）
    async fn load_custom_fields(&self, document_id: i64) -> Result<HashMap<String, Value>> {
        let rows = sqlx::query(
            r#"SELECT cf.name, dcfv.value
               FROM document_custom_field_values dcfv
               JOIN custom_fields cf ON dcfv.custom_field_id = cf.id
               WHERE dcfv.document_id = $1"#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get("name");
                let raw: String = row.get("value");
                (name, parse_stored_value(&raw))
            })
            .collect())
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn load_document_view(&self, document_id: i64) -> Result<Option<DocumentView>> {
        let row = sqlx::query(
            r#"SELECT d.id, d.title, d.correspondent_id, d.document_type_id,
                      d.amount::float8 AS amount, d.content, d.ocr_content,
                      d.doc_date, d.created_at, d.logical_folder_id,
                      d.compte_comptable, d.centre_cout, d.projet,
                      dt.label AS document_type_label,
                      c.name AS correspondent_name
               FROM documents d
               LEFT JOIN document_types dt ON d.document_type_id = dt.id
               LEFT JOIN correspondents c ON d.correspondent_id = c.id
               WHERE d.id = $1"#,
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut view = Self::map_view(&row);
        view.tags = self.get_document_tags(document_id).await?;
        view.custom_fields = self.load_custom_fields(document_id).await?;

        Ok(Some(view))
    }

    async fn get_document_tags(&self, document_id: i64) -> Result<Vec<DocumentTag>> {
        let rows = sqlx::query(
            r#"SELECT t.id, t.name
               FROM document_tags dt
               JOIN tags t ON dt.tag_id = t.id
               WHERE dt.document_id = $1
               ORDER BY t.id"#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| DocumentTag {
                id: row.get("id"),
                name: row.get("name"),
            })
            .collect())
    }

    async fn get_custom_field_value(
        &self,
        document_id: i64,
        field_name: &str,
    ) -> Result<Option<Value>> {
        let row = sqlx::query(
            r#"SELECT dcfv.value
               FROM document_custom_field_values dcfv
               JOIN custom_fields cf ON dcfv.custom_field_id = cf.id
               WHERE dcfv.document_id = $1 AND cf.name = $2"#,
        )
        .bind(document_id)
        .bind(field_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let raw: String = r.get("value");
            parse_stored_value(&raw)
        }))
    }

    async fn get_classification_field(
        &self,
        document_id: i64,
        field_name: &str,
    ) -> Result<Option<String>> {
        let column = Self::classification_column(field_name)?;

        let row = sqlx::query(&format!(
            "SELECT {column} AS value FROM documents WHERE id = $1"
        ))
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|r| r.get("value")))
    }

    async fn set_classification_field(
        &self,
        document_id: i64,
        field_name: &str,
        value: Option<String>,
    ) -> Result<()> {
        let column = Self::classification_column(field_name)?;

        sqlx::query(&format!(
            "UPDATE documents SET {column} = $2 WHERE id = $1"
        ))
        .bind(document_id)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn add_tag(&self, document_id: i64, tag_id: i64) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO document_tags (document_id, tag_id)
               VALUES ($1, $2)
               ON CONFLICT DO NOTHING"#,
        )
        .bind(document_id)
        .bind(tag_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_tag(&self, document_id: i64, tag_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM document_tags WHERE document_id = $1 AND tag_id = $2")
            .bind(document_id)
            .bind(tag_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_folder(&self, document_id: i64) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT logical_folder_id FROM documents WHERE id = $1")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|r| r.get("logical_folder_id")))
    }

    async fn move_to_folder(&self, document_id: i64, folder_id: i64) -> Result<()> {
        sqlx::query("UPDATE documents SET logical_folder_id = $2 WHERE id = $1")
            .bind(document_id)
            .bind(folder_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_correspondent(&self, document_id: i64) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT correspondent_id FROM documents WHERE id = $1")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|r| r.get("correspondent_id")))
    }

    async fn set_correspondent(&self, document_id: i64, correspondent_id: i64) -> Result<()> {
        sqlx::query("UPDATE documents SET correspondent_id = $2 WHERE id = $1")
            .bind(document_id)
            .bind(correspondent_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_document_type(&self, document_id: i64) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT document_type_id FROM documents WHERE id = $1")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|r| r.get("document_type_id")))
    }

    async fn set_document_type(&self, document_id: i64, document_type_id: i64) -> Result<()> {
        sqlx::query("UPDATE documents SET document_type_id = $2 WHERE id = $1")
            .bind(document_id)
            .bind(document_type_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn stamp_classification(&self, document_id: i64, source: &str) -> Result<()> {
        sqlx::query(
            r#"UPDATE documents
               SET last_classified_at = NOW(), last_classified_by = $2
               WHERE id = $1"#,
        )
        .bind(document_id)
        .bind(source)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
