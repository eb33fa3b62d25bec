//! Database-backed session store (SQLite/PostgreSQL)

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::time::Duration;

use super::SessionStore;
use crate::agents::domain::{AgentInteraction, CoordinationRun, Message};
use crate::agents::error::{StoreError, StoreResult};

/// Schema for messages, interactions and runs
const MIGRATION_001_SESSIONS: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    author TEXT NOT NULL,
    agent_role TEXT,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS interactions (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    source_agent TEXT NOT NULL,
    target_agent TEXT NOT NULL,
    kind TEXT NOT NULL,
    query_snapshot TEXT NOT NULL,
    response_snapshot TEXT,
    in_reply_to TEXT,
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    mode TEXT NOT NULL,
    selected_agents TEXT NOT NULL,
    primary_agent TEXT NOT NULL,
    scores TEXT NOT NULL,
    state TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    final_response TEXT,
    degraded TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, created_at);
CREATE INDEX IF NOT EXISTS idx_interactions_session ON interactions(session_id, created_at);
CREATE INDEX IF NOT EXISTS idx_runs_session ON runs(session_id)
"#;

/// Migration definition
struct Migration {
    name: &'static str,
    sql: &'static str,
}

fn migrations() -> Vec<Migration> {
    vec![Migration {
        name: "001_sessions",
        sql: MIGRATION_001_SESSIONS,
    }]
}

/// Fixed-width timestamps sort lexically in time order
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", raw, e)))
}

/// Serialize a unit enum to its serde name
fn enum_name<T: Serialize>(value: &T) -> StoreResult<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(StoreError::Corrupt(format!("expected a string, got {}", other))),
    }
}

fn parse_enum<T: DeserializeOwned>(raw: String) -> StoreResult<T> {
    Ok(serde_json::from_value(serde_json::Value::String(raw))?)
}

/// Database session store
pub struct DatabaseStore {
    pool: AnyPool,
}

impl DatabaseStore {
    /// Connect to `url` (`sqlite://...`, `postgres://...`)
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        sqlx::any::install_default_drivers();

        // Each connection to an in-memory SQLite database sees its own database
        let max_connections = if url.contains(":memory:") {
            1
        } else {
            max_connections.max(1)
        };

        tracing::info!("Connecting session store with max {} connections", max_connections);

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> StoreResult<usize> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _agora_migrations (name TEXT PRIMARY KEY, applied_at TEXT NOT NULL)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Migration(e.to_string()))?;

        let mut applied = 0;
        for migration in migrations() {
            let done = sqlx::query("SELECT name FROM _agora_migrations WHERE name = $1")
                .bind(migration.name)
                .fetch_optional(&self.pool)
                .await?
                .is_some();
            if done {
                tracing::debug!("Migration '{}' already applied, skipping", migration.name);
                continue;
            }

            tracing::info!("Applying migration: {}", migration.name);
            for statement in migration.sql.split(';') {
                let statement = statement.trim();
                if statement.is_empty() {
                    continue;
                }
                sqlx::query(statement).execute(&self.pool).await.map_err(|e| {
                    StoreError::Migration(format!(
                        "Failed to execute migration '{}': {}",
                        migration.name, e
                    ))
                })?;
            }

            sqlx::query("INSERT INTO _agora_migrations (name, applied_at) VALUES ($1, $2)")
                .bind(migration.name)
                .bind(timestamp(&Utc::now()))
                .execute(&self.pool)
                .await?;
            applied += 1;
        }

        Ok(applied)
    }

    fn message_from_row(row: &AnyRow) -> StoreResult<Message> {
        Ok(Message {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            author: parse_enum(row.try_get("author")?)?,
            agent_role: row.try_get("agent_role")?,
            content: row.try_get("content")?,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        })
    }

    fn interaction_from_row(row: &AnyRow) -> StoreResult<AgentInteraction> {
        let kind: String = row.try_get("kind")?;
        let metadata: String = row.try_get("metadata")?;
        Ok(AgentInteraction {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            session_id: row.try_get("session_id")?,
            source_agent: row.try_get("source_agent")?,
            target_agent: row.try_get("target_agent")?,
            kind: kind.parse().map_err(StoreError::Corrupt)?,
            query_snapshot: row.try_get("query_snapshot")?,
            response_snapshot: row.try_get("response_snapshot")?,
            in_reply_to: row.try_get("in_reply_to")?,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
            metadata: serde_json::from_str(&metadata)?,
        })
    }

    fn run_from_row(row: &AnyRow) -> StoreResult<CoordinationRun> {
        let selected: String = row.try_get("selected_agents")?;
        let scores: String = row.try_get("scores")?;
        let degraded: String = row.try_get("degraded")?;
        let finished_at: Option<String> = row.try_get("finished_at")?;
        Ok(CoordinationRun {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            mode: parse_enum(row.try_get("mode")?)?,
            selected_agents: serde_json::from_str(&selected)?,
            primary_agent: row.try_get("primary_agent")?,
            scores: serde_json::from_str(&scores)?,
            state: parse_enum(row.try_get("state")?)?,
            started_at: parse_timestamp(&row.try_get::<String, _>("started_at")?)?,
            finished_at: finished_at.as_deref().map(parse_timestamp).transpose()?,
            final_response: row.try_get("final_response")?,
            degraded: serde_json::from_str(&degraded)?,
        })
    }
}

#[async_trait]
impl SessionStore for DatabaseStore {
    fn name(&self) -> &str {
        "database"
    }

    async fn append_message(&self, message: &Message) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO messages (id, session_id, author, agent_role, content, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (id) DO NOTHING",
        )
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(enum_name(&message.author)?)
        .bind(message.agent_role.clone())
        .bind(&message.content)
        .bind(timestamp(&message.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_interaction(&self, interaction: &AgentInteraction) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO interactions (id, run_id, session_id, source_agent, target_agent, kind, \
             query_snapshot, response_snapshot, in_reply_to, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) ON CONFLICT (id) DO NOTHING",
        )
        .bind(&interaction.id)
        .bind(&interaction.run_id)
        .bind(&interaction.session_id)
        .bind(&interaction.source_agent)
        .bind(&interaction.target_agent)
        .bind(interaction.kind.to_string())
        .bind(&interaction.query_snapshot)
        .bind(interaction.response_snapshot.clone())
        .bind(interaction.in_reply_to.clone())
        .bind(serde_json::to_string(&interaction.metadata)?)
        .bind(timestamp(&interaction.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_run(&self, run: &CoordinationRun) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO runs (id, session_id, mode, selected_agents, primary_agent, scores, state, \
             started_at, finished_at, final_response, degraded) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) ON CONFLICT (id) DO NOTHING",
        )
        .bind(&run.id)
        .bind(&run.session_id)
        .bind(enum_name(&run.mode)?)
        .bind(serde_json::to_string(&run.selected_agents)?)
        .bind(&run.primary_agent)
        .bind(serde_json::to_string(&run.scores)?)
        .bind(enum_name(&run.state)?)
        .bind(timestamp(&run.started_at))
        .bind(run.finished_at.as_ref().map(timestamp))
        .bind(run.final_response.clone())
        .bind(serde_json::to_string(&run.degraded)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finalize_run(&self, run: &CoordinationRun) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE runs SET state = $1, finished_at = $2, final_response = $3, degraded = $4 \
             WHERE id = $5 AND state NOT IN ('done', 'failed')",
        )
        .bind(enum_name(&run.state)?)
        .bind(run.finished_at.as_ref().map(timestamp))
        .bind(run.final_response.clone())
        .bind(serde_json::to_string(&run.degraded)?)
        .bind(&run.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 && self.get_run(&run.id).await?.is_none() {
            return Err(StoreError::NotFound {
                entity: "run",
                id: run.id.clone(),
            });
        }
        Ok(())
    }

    async fn recent_messages(&self, session_id: &str, limit: usize) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, session_id, author, agent_role, content, created_at FROM messages \
             WHERE session_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2",
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows
            .iter()
            .map(Self::message_from_row)
            .collect::<StoreResult<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn messages(&self, session_id: &str) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, session_id, author, agent_role, content, created_at FROM messages \
             WHERE session_id = $1 ORDER BY created_at, id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::message_from_row).collect()
    }

    async fn interactions(&self, session_id: &str) -> StoreResult<Vec<AgentInteraction>> {
        let rows = sqlx::query(
            "SELECT id, run_id, session_id, source_agent, target_agent, kind, query_snapshot, \
             response_snapshot, in_reply_to, metadata, created_at FROM interactions \
             WHERE session_id = $1 ORDER BY created_at, id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::interaction_from_row).collect()
    }

    async fn get_run(&self, run_id: &str) -> StoreResult<Option<CoordinationRun>> {
        let row = sqlx::query(
            "SELECT id, session_id, mode, selected_agents, primary_agent, scores, state, \
             started_at, finished_at, final_response, degraded FROM runs WHERE id = $1",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::run_from_row).transpose()
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(format!("Health check failed: {}", e)))?;
        Ok(())
    }
}
