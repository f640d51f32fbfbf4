use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};

use super::{Document, DocumentStore, Query, StoreResult};

/// Document store backed by a single JSONB `documents` table.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn init_db(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn to_document(row: PgRow) -> StoreResult<Document> {
    let id: String = row.try_get("id")?;
    let Json(fields): Json<Value> = row.try_get("fields")?;
    let fields = match fields {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Ok(Document { id, fields })
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    fn backend_tag(&self) -> &'static str {
        "postgres"
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let row = sqlx::query("SELECT id, fields FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(to_document).transpose()
    }

    async fn query(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT id, ");

        match &query.select {
            Some(fields) if !fields.is_empty() => {
                builder.push("jsonb_strip_nulls(jsonb_build_object(");
                for (index, field) in fields.iter().enumerate() {
                    if index > 0 {
                        builder.push(", ");
                    }
                    builder
                        .push_bind(field.clone())
                        .push("::text, fields -> ")
                        .push_bind(field.clone())
                        .push("::text");
                }
                builder.push(")) AS fields");
            }
            _ => {
                builder.push("fields");
            }
        }

        builder
            .push(" FROM documents WHERE collection = ")
            .push_bind(collection.to_string());

        for (field, value) in &query.equals {
            let mut probe = Map::new();
            probe.insert(field.clone(), value.clone());
            builder
                .push(" AND fields @> ")
                .push_bind(Json(Value::Object(probe)));
        }

        if let Some(prefix) = &query.id_prefix {
            builder
                .push(" AND starts_with(id, ")
                .push_bind(prefix.clone())
                .push(")");
        }

        if let Some(cursor) = &query.start_after {
            builder
                .push(" AND id COLLATE \"C\" > ")
                .push_bind(cursor.clone());
        }

        builder.push(" ORDER BY id COLLATE \"C\"");

        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.into_iter().map(to_document).collect()
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT collection FROM documents ORDER BY collection")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get("collection").map_err(Into::into))
            .collect()
    }

    async fn put(&self, collection: &str, id: &str, fields: Value) -> StoreResult<()> {
        let fields = match fields {
            Value::Object(_) => fields,
            other => json!({ "value": other }),
        };

        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, fields, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (collection, id) DO UPDATE
            SET fields = EXCLUDED.fields, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(Json(fields))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
