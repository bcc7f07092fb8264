//! Notes store: a local SQLite table of business notes.
//!
//! Always available (no credentials). Search, list and get are read-only;
//! create and delete are flagged mutating.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::{required_str, Tool, ToolContext, ToolRegistry};
use crate::error::ToolError;
use crate::db;

const DEFAULT_LIST_LIMIT: i64 = 20;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Note {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct NotesStore {
    pool: SqlitePool,
}

fn db_error(e: sqlx::Error) -> ToolError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => ToolError::Transient(e.to_string()),
        other => ToolError::Failed(format!("database error: {}", other)),
    }
}

fn row_to_note(row: &sqlx::sqlite::SqliteRow) -> Note {
    Note {
        id: row.get("id"),
        title: row.get("title"),
        content: row.get("content"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

impl NotesStore {
    /// Open (creating if needed) the notes database and its schema.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let pool = db::connect(path).await?;
        Ok(Self { pool })
    }

    pub async fn create(&self, title: &str, content: &str) -> Result<Note, ToolError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO notes (title, content, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(title)
        .bind(content)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(Note {
            id: result.last_insert_rowid(),
            title: title.to_string(),
            content: content.to_string(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub async fn get(&self, id: i64) -> Result<Note, ToolError> {
        let row = sqlx::query(
            "SELECT id, title, content, created_at, updated_at FROM notes WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref()
            .map(row_to_note)
            .ok_or_else(|| ToolError::NotFound(format!("note {}", id)))
    }

    /// Most recent notes first.
    pub async fn list(&self, limit: i64) -> Result<Vec<Note>, ToolError> {
        let rows = sqlx::query(
            "SELECT id, title, content, created_at, updated_at FROM notes ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(rows.iter().map(row_to_note).collect())
    }

    /// Case-insensitive substring match on title or content.
    pub async fn search(&self, query: &str) -> Result<Vec<Note>, ToolError> {
        let pattern = format!(
            "%{}%",
            query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        let rows = sqlx::query(
            r#"
            SELECT id, title, content, created_at, updated_at FROM notes
            WHERE title LIKE ?1 ESCAPE '\' OR content LIKE ?1 ESCAPE '\'
            ORDER BY id DESC
            "#,
        )
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(rows.iter().map(row_to_note).collect())
    }

    pub async fn delete(&self, id: i64) -> Result<(), ToolError> {
        let result = sqlx::query("DELETE FROM notes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(ToolError::NotFound(format!("note {}", id)));
        }
        Ok(())
    }
}

pub fn register(registry: &mut ToolRegistry, store: NotesStore) {
    let store = Arc::new(store);
    registry.register(Box::new(SearchNotesTool(store.clone())));
    registry.register(Box::new(ListNotesTool(store.clone())));
    registry.register(Box::new(GetNoteTool(store.clone())));
    registry.register(Box::new(CreateNoteTool(store.clone())));
    registry.register(Box::new(DeleteNoteTool(store)));
}

fn notes_payload(notes: Vec<Note>) -> Value {
    json!({ "count": notes.len(), "notes": notes })
}

fn id_param(params: &Value) -> Result<i64, ToolError> {
    params["id"]
        .as_i64()
        .ok_or_else(|| ToolError::InvalidInput("id must be an integer".to_string()))
}

pub struct SearchNotesTool(pub Arc<NotesStore>);

#[async_trait]
impl Tool for SearchNotesTool {
    fn name(&self) -> &str {
        "notes_search"
    }

    fn description(&self) -> &str {
        "Search saved business notes by keyword"
    }

    fn category(&self) -> &str {
        "notes"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "minLength": 1 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let query = required_str(&params, "query")?;
        Ok(notes_payload(self.0.search(query).await?))
    }
}

pub struct ListNotesTool(pub Arc<NotesStore>);

#[async_trait]
impl Tool for ListNotesTool {
    fn name(&self) -> &str {
        "notes_list"
    }

    fn description(&self) -> &str {
        "List the most recent saved notes"
    }

    fn category(&self) -> &str {
        "notes"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "minimum": 1, "maximum": 100, "default": DEFAULT_LIST_LIMIT }
            }
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let limit = params["limit"].as_i64().unwrap_or(DEFAULT_LIST_LIMIT);
        Ok(notes_payload(self.0.list(limit).await?))
    }
}

pub struct GetNoteTool(pub Arc<NotesStore>);

#[async_trait]
impl Tool for GetNoteTool {
    fn name(&self) -> &str {
        "notes_get"
    }

    fn description(&self) -> &str {
        "Fetch one note by id"
    }

    fn category(&self) -> &str {
        "notes"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "integer", "minimum": 1 }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let note = self.0.get(id_param(&params)?).await?;
        serde_json::to_value(note).map_err(|e| ToolError::Failed(e.to_string()))
    }
}

pub struct CreateNoteTool(pub Arc<NotesStore>);

#[async_trait]
impl Tool for CreateNoteTool {
    fn name(&self) -> &str {
        "notes_create"
    }

    fn description(&self) -> &str {
        "Save a new note. Only use when the user explicitly asks to save something."
    }

    fn category(&self) -> &str {
        "notes"
    }

    fn is_mutating(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "minLength": 1 },
                "content": { "type": "string", "minLength": 1 }
            },
            "required": ["title", "content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let title = required_str(&params, "title")?;
        let content = required_str(&params, "content")?;
        let note = self.0.create(title, content).await?;
        info!(query_id = %ctx.query_id, note_id = note.id, "note created");
        serde_json::to_value(note).map_err(|e| ToolError::Failed(e.to_string()))
    }
}

pub struct DeleteNoteTool(pub Arc<NotesStore>);

#[async_trait]
impl Tool for DeleteNoteTool {
    fn name(&self) -> &str {
        "notes_delete"
    }

    fn description(&self) -> &str {
        "Delete a note by id. Only use when the user explicitly asks to delete one."
    }

    fn category(&self) -> &str {
        "notes"
    }

    fn is_mutating(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "integer", "minimum": 1 }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let id = id_param(&params)?;
        self.0.delete(id).await?;
        info!(query_id = %ctx.query_id, note_id = id, "note deleted");
        Ok(json!({ "deleted": id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, NotesStore) {
        let dir = TempDir::new().unwrap();
        let store = NotesStore::open(&dir.path().join("data/notes.sqlite"))
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_notes_crud() {
        let (_dir, store) = store().await;

        let a = store.create("Acme call", "Discussed renewal at 12% discount").await.unwrap();
        let b = store.create("Globex", "Waiting on 100_000 unit order").await.unwrap();
        assert!(b.id > a.id);

        assert_eq!(store.get(a.id).await.unwrap().title, "Acme call");

        let listed = store.list(10).await.unwrap();
        assert_eq!(listed.iter().map(|n| n.id).collect::<Vec<_>>(), vec![b.id, a.id]);

        let hits = store.search("renewal").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, a.id);

        // LIKE wildcards in the query are matched literally
        assert_eq!(store.search("100_000").await.unwrap().len(), 1);
        assert_eq!(store.search("%").await.unwrap().len(), 0);

        store.delete(a.id).await.unwrap();
        assert!(matches!(store.get(a.id).await, Err(ToolError::NotFound(_))));
        assert!(matches!(store.delete(a.id).await, Err(ToolError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_notes_tools_through_registry() {
        let (_dir, store) = store().await;
        let mut registry = ToolRegistry::new();
        register(&mut registry, store);
        assert_eq!(registry.len(), 5);

        let ctx = ToolContext::new("q-notes");
        let created = registry
            .invoke(
                "notes_create",
                &json!({"title": "Q3 plan", "content": "Expand to Denver"}),
                &ctx,
            )
            .await
            .unwrap();
        let id = created["id"].as_i64().unwrap();

        let listed = registry.invoke("notes_list", &json!({}), &ctx).await.unwrap();
        assert_eq!(listed["count"], 1);

        let found = registry
            .invoke("notes_search", &json!({"query": "denver"}), &ctx)
            .await
            .unwrap();
        assert_eq!(found["notes"][0]["id"], id);

        let err = registry
            .invoke("notes_get", &json!({"id": "one"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));

        assert!(registry.find("notes_delete").unwrap().is_mutating());
    }
}
