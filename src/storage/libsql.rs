//! LibSQL storage backend implementation
//!
//! Provides persistent storage for users, chats, append-only message
//! history, sub-agents, and sub-agent prompt revisions. Sub-agent prompt
//! mutations run inside a transaction so the revision snapshot and the
//! update commit atomically.

use crate::error::{HermesError, Result};
use crate::storage::StorageBackend;
use crate::types::{
    Chat, ChatId, ChatMessage, MessageRecord, PromptUpdatePolicy, SubAgent, SubAgentId,
    SubAgentRevision, ToolCallRecord, UserId, UserRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{params, Builder, Connection, Database, Row};
use tracing::{debug, info};

/// Embedded schema migrations, applied in order
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_initial_schema.sql",
        include_str!("../../migrations/001_initial_schema.sql"),
    ),
    (
        "002_add_indexes.sql",
        include_str!("../../migrations/002_add_indexes.sql"),
    ),
];

/// Parse SQL file into individual statements, handling multi-line constructs
fn parse_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0; // Track BEGIN/END nesting depth

    for line in sql.lines() {
        let trimmed = line.trim();

        // Skip comment-only and empty lines when not building a statement
        if current.is_empty() && (trimmed.is_empty() || trimmed.starts_with("--")) {
            continue;
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);

        let upper = trimmed.to_uppercase();
        if upper.starts_with("BEGIN") || upper.contains(" BEGIN") {
            depth += 1;
        }
        if upper.starts_with("END") {
            depth = depth.saturating_sub(1);
        }

        // Statement is complete when we hit ; at depth 0
        if trimmed.ends_with(';') && depth == 0 {
            statements.push(current.clone());
            current.clear();
        }
    }

    if !current.trim().is_empty() {
        statements.push(current);
    }

    statements
}

/// Map transaction commit failures onto actionable messages
fn commit_error(e: libsql::Error) -> HermesError {
    let error_msg = e.to_string();
    if error_msg.contains("readonly") || error_msg.contains("permission") {
        HermesError::Database(
            "Transaction failed: database is read-only. Ensure file and WAL files have write permissions.".to_string()
        )
    } else if error_msg.contains("locked") || error_msg.contains("busy") {
        HermesError::Database(
            "Transaction failed: database is locked. Another process may be writing.".to_string(),
        )
    } else {
        HermesError::Database(format!("Transaction commit failed: {}", error_msg))
    }
}

/// LibSQL storage backend
pub struct LibsqlStorage {
    db: Database,
}

/// Database connection mode
#[derive(Debug, Clone)]
pub enum ConnectionMode {
    /// Local file-based database
    Local(String),
    /// In-memory database (for testing)
    InMemory,
}

impl LibsqlStorage {
    /// Validate database file before opening
    ///
    /// Returns `Ok(true)` if the database exists and looks valid,
    /// `Ok(false)` if it doesn't exist and `must_exist` is false.
    fn validate_database_file(db_path: &str, must_exist: bool) -> Result<bool> {
        use std::fs;
        use std::path::Path;

        let path = Path::new(db_path);

        if !path.exists() {
            if must_exist {
                return Err(HermesError::Database(format!(
                    "Database file not found at '{}'. Please run 'hermes init' first or check your configuration.",
                    db_path
                )));
            } else {
                return Ok(false);
            }
        }

        // SQLite files start with "SQLite format 3\0" (16 bytes)
        match fs::read(path) {
            Ok(bytes) => {
                if bytes.len() < 16 || &bytes[0..16] != b"SQLite format 3\0" {
                    return Err(HermesError::Database(format!(
                        "Database file at '{}' is corrupted or not a valid SQLite database. Please delete it and run 'hermes init' to reinitialize.",
                        db_path
                    )));
                }

                debug!("Database file validation passed: {}", db_path);
                Ok(true)
            }
            Err(e) => {
                let error_msg = e.to_string();
                if error_msg.contains("permission") || error_msg.contains("Permission") {
                    Err(HermesError::Database(format!(
                        "Cannot read database file at '{}': Permission denied. Please check file permissions.",
                        db_path
                    )))
                } else {
                    Err(HermesError::Database(format!(
                        "Cannot read database file at '{}': {}. The file may be corrupted or inaccessible.",
                        db_path, e
                    )))
                }
            }
        }
    }

    /// Create a new LibSQL storage backend with validation
    ///
    /// # Arguments
    /// * `mode` - Connection mode (local or in-memory)
    /// * `create_if_missing` - If true, create the database when absent;
    ///   if false, error on a missing database
    pub async fn new_with_validation(mode: ConnectionMode, create_if_missing: bool) -> Result<Self> {
        info!(
            "Connecting to LibSQL database: {:?} (create_if_missing: {})",
            mode, create_if_missing
        );

        if let ConnectionMode::Local(ref path) = mode {
            let exists = Self::validate_database_file(path, !create_if_missing)?;

            if create_if_missing && !exists {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        HermesError::Database(format!(
                            "Failed to create database directory {}: {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }
            }
        }

        let db = match mode {
            ConnectionMode::Local(ref path) => Builder::new_local(path)
                .build()
                .await
                .map_err(|e| {
                    HermesError::Database(format!("Failed to create local database: {}", e))
                })?,
            ConnectionMode::InMemory => Builder::new_local(":memory:")
                .build()
                .await
                .map_err(|e| {
                    HermesError::Database(format!("Failed to create in-memory database: {}", e))
                })?,
        };

        info!("LibSQL database connection established");

        let storage = Self { db };

        storage.verify_database_health().await?;
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create a new LibSQL storage backend
    ///
    /// Default behavior: the database must already exist. Use
    /// `new_with_validation(..., true)` for explicit creation
    /// (init/serve commands).
    pub async fn new(mode: ConnectionMode) -> Result<Self> {
        Self::new_with_validation(mode, false).await
    }

    /// Create a new local file-based storage (convenience method)
    pub async fn new_local(path: &str) -> Result<Self> {
        Self::new(ConnectionMode::Local(path.to_string())).await
    }

    /// Create an in-memory storage (convenience method for tests)
    pub async fn in_memory() -> Result<Self> {
        Self::new(ConnectionMode::InMemory).await
    }

    /// Verify database health before operations
    async fn verify_database_health(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.query("SELECT 1", params![]).await.map_err(|e| {
            HermesError::Database(format!(
                "Database corruption detected or invalid database file: {}",
                e
            ))
        })?;

        // Check that the database is writable
        let write_test = r#"
            CREATE TABLE IF NOT EXISTS _health_check (id INTEGER PRIMARY KEY);
            DROP TABLE IF EXISTS _health_check;
        "#;

        if let Err(e) = conn.execute_batch(write_test).await {
            let error_msg = e.to_string().to_lowercase();
            if error_msg.contains("read") && error_msg.contains("only")
                || error_msg.contains("readonly")
                || error_msg.contains("permission")
            {
                return Err(HermesError::Database(format!(
                    "Database is read-only or lacks write permissions: {}",
                    e
                )));
            }
            return Err(HermesError::Database(format!(
                "Database write test failed: {}",
                e
            )));
        }

        debug!("Database health check passed");
        Ok(())
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");

        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations_applied (
                migration_name TEXT PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )",
            params![],
        )
        .await
        .map_err(|e| HermesError::Migration(format!("Failed to create migrations table: {}", e)))?;

        for (migration_name, sql) in MIGRATIONS {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM _migrations_applied WHERE migration_name = ?",
                    params![*migration_name],
                )
                .await?;

            let already_applied = if let Some(row) = rows.next().await? {
                row.get::<i64>(0).unwrap_or(0)
            } else {
                0
            };

            if already_applied > 0 {
                debug!("Skipping already applied migration: {}", migration_name);
                continue;
            }

            let statements = parse_sql_statements(sql);
            debug!(
                "Parsed {} statements from {}",
                statements.len(),
                migration_name
            );
            for (i, statement) in statements.iter().enumerate() {
                let statement = statement.trim();
                if !statement.is_empty() {
                    conn.execute(statement, params![]).await.map_err(|e| {
                        HermesError::Migration(format!(
                            "Failed to execute statement #{} in {}: {}",
                            i + 1,
                            migration_name,
                            e
                        ))
                    })?;
                }
            }

            let now = Utc::now().timestamp();
            conn.execute(
                "INSERT INTO _migrations_applied (migration_name, applied_at) VALUES (?, ?)",
                params![*migration_name, now],
            )
            .await
            .map_err(|e| HermesError::Migration(format!("Failed to record migration: {}", e)))?;

            info!("Executed migration: {}", migration_name);
        }

        info!("Database migrations completed");
        Ok(())
    }

    /// Get a connection from the database
    fn get_conn(&self) -> Result<Connection> {
        self.db
            .connect()
            .map_err(|e| HermesError::Database(format!("Failed to get connection: {}", e)))
    }

    fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| HermesError::Database(format!("Invalid timestamp '{}': {}", value, e)))
    }

    fn row_to_user(row: &Row) -> Result<UserRecord> {
        let id_str: String = row.get(0)?;
        let created_at_str: String = row.get(3)?;
        let deleted_at = match row.get::<String>(4) {
            Ok(s) => Some(Self::parse_timestamp(&s)?),
            Err(_) => None,
        };

        Ok(UserRecord {
            id: UserId::from_string(&id_str)?,
            email: row.get(1)?,
            display_name: row.get(2)?,
            created_at: Self::parse_timestamp(&created_at_str)?,
            deleted_at,
        })
    }

    fn row_to_chat(row: &Row) -> Result<Chat> {
        let id_str: String = row.get(0)?;
        let author_str: String = row.get(1)?;
        let created_at_str: String = row.get(3)?;
        let updated_at_str: String = row.get(4)?;

        Ok(Chat {
            id: ChatId::from_string(&id_str)?,
            author_id: UserId::from_string(&author_str)?,
            title: row.get::<String>(2).ok(),
            created_at: Self::parse_timestamp(&created_at_str)?,
            updated_at: Self::parse_timestamp(&updated_at_str)?,
        })
    }

    fn row_to_message_record(row: &Row) -> Result<MessageRecord> {
        let id: i64 = row.get(0)?;
        let chat_id_str: String = row.get(1)?;
        let role: String = row.get(2)?;
        let content: String = row.get(3)?;
        let created_at_str: String = row.get(7)?;

        let message = match role.as_str() {
            "system" => ChatMessage::System { content },
            "user" => ChatMessage::User { content },
            "assistant" => {
                let tool_calls: Vec<ToolCallRecord> = match row.get::<String>(4) {
                    Ok(json) => serde_json::from_str(&json)?,
                    Err(_) => Vec::new(),
                };
                ChatMessage::Assistant {
                    content,
                    tool_calls,
                }
            }
            "tool" => ChatMessage::Tool {
                content,
                tool_call_id: row.get::<String>(5).unwrap_or_default(),
                name: row.get::<String>(6).unwrap_or_default(),
            },
            other => {
                return Err(HermesError::Database(format!(
                    "Unknown message role '{}' in chat_messages row {}",
                    other, id
                )))
            }
        };

        Ok(MessageRecord {
            id,
            chat_id: ChatId::from_string(&chat_id_str)?,
            message,
            created_at: Self::parse_timestamp(&created_at_str)?,
        })
    }

    fn row_to_sub_agent(row: &Row) -> Result<SubAgent> {
        let id_str: String = row.get(0)?;
        let chat_id_str: String = row.get(1)?;
        let created_at_str: String = row.get(4)?;
        let updated_at_str: String = row.get(5)?;
        let deleted_at = match row.get::<String>(6) {
            Ok(s) => Some(Self::parse_timestamp(&s)?),
            Err(_) => None,
        };

        Ok(SubAgent {
            id: SubAgentId::from_string(&id_str)?,
            chat_id: ChatId::from_string(&chat_id_str)?,
            name: row.get(2)?,
            prompt: row.get(3)?,
            created_at: Self::parse_timestamp(&created_at_str)?,
            updated_at: Self::parse_timestamp(&updated_at_str)?,
            deleted_at,
        })
    }

    fn row_to_revision(row: &Row) -> Result<SubAgentRevision> {
        let id: i64 = row.get(0)?;
        let agent_id_str: String = row.get(1)?;
        let created_at_str: String = row.get(3)?;

        Ok(SubAgentRevision {
            id,
            sub_agent_id: SubAgentId::from_string(&agent_id_str)?,
            old_prompt: row.get(2)?,
            created_at: Self::parse_timestamp(&created_at_str)?,
        })
    }
}

#[async_trait]
impl StorageBackend for LibsqlStorage {
    async fn create_user(&self, email: &str, display_name: &str) -> Result<UserRecord> {
        debug!("Creating user: {}", email);

        let conn = self.get_conn()?;
        let user = UserRecord {
            id: UserId::new(),
            email: email.to_string(),
            display_name: display_name.to_string(),
            created_at: Utc::now(),
            deleted_at: None,
        };

        conn.execute(
            "INSERT INTO users (id, email, display_name, created_at, deleted_at)
             VALUES (?, ?, ?, ?, NULL)",
            params![
                user.id.to_string(),
                user.email.clone(),
                user.display_name.clone(),
                user.created_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| {
            let error_msg = e.to_string();
            if error_msg.contains("UNIQUE") {
                HermesError::Database(format!("A user with email '{}' already exists", email))
            } else {
                HermesError::Database(format!("Failed to create user: {}", error_msg))
            }
        })?;

        info!("Created user {} ({})", user.id, email);
        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> Result<UserRecord> {
        let conn = self.get_conn()?;
        let mut rows = conn
            .query(
                "SELECT id, email, display_name, created_at, deleted_at
                 FROM users WHERE id = ? AND deleted_at IS NULL",
                params![id.to_string()],
            )
            .await?;

        let row = rows
            .next()
            .await?
            .ok_or_else(|| HermesError::NotFound(format!("user {}", id)))?;

        Self::row_to_user(&row)
    }

    async fn create_chat(&self, author_id: UserId, title: Option<String>) -> Result<Chat> {
        debug!("Creating chat for user {}", author_id);

        let conn = self.get_conn()?;
        let now = Utc::now();
        let chat = Chat {
            id: ChatId::new(),
            author_id,
            title,
            created_at: now,
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO chats (id, author_id, title, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                chat.id.to_string(),
                chat.author_id.to_string(),
                chat.title.clone(),
                chat.created_at.to_rfc3339(),
                chat.updated_at.to_rfc3339(),
            ],
        )
        .await?;

        info!("Created chat {}", chat.id);
        Ok(chat)
    }

    async fn get_chat(&self, id: ChatId) -> Result<Chat> {
        let conn = self.get_conn()?;
        let mut rows = conn
            .query(
                "SELECT id, author_id, title, created_at, updated_at FROM chats WHERE id = ?",
                params![id.to_string()],
            )
            .await?;

        let row = rows
            .next()
            .await?
            .ok_or_else(|| HermesError::NotFound(format!("chat {}", id)))?;

        Self::row_to_chat(&row)
    }

    async fn get_owned_chat(&self, id: ChatId, author_id: UserId) -> Result<Chat> {
        let chat = self.get_chat(id).await?;
        if chat.author_id != author_id {
            return Err(HermesError::Unauthorized(format!(
                "chat {} does not belong to user {}",
                id, author_id
            )));
        }
        Ok(chat)
    }

    async fn list_chats(&self, author_id: UserId) -> Result<Vec<Chat>> {
        let conn = self.get_conn()?;
        let mut rows = conn
            .query(
                "SELECT id, author_id, title, created_at, updated_at
                 FROM chats WHERE author_id = ? ORDER BY updated_at DESC",
                params![author_id.to_string()],
            )
            .await?;

        let mut chats = Vec::new();
        while let Some(row) = rows.next().await? {
            chats.push(Self::row_to_chat(&row)?);
        }

        debug!("Listed {} chats for user {}", chats.len(), author_id);
        Ok(chats)
    }

    async fn set_chat_title(&self, id: ChatId, title: &str) -> Result<()> {
        let conn = self.get_conn()?;
        let affected = conn
            .execute(
                "UPDATE chats SET title = ?, updated_at = ? WHERE id = ?",
                params![title, Utc::now().to_rfc3339(), id.to_string()],
            )
            .await?;

        if affected == 0 {
            return Err(HermesError::NotFound(format!("chat {}", id)));
        }
        Ok(())
    }

    async fn append_message(
        &self,
        chat_id: ChatId,
        message: &ChatMessage,
    ) -> Result<MessageRecord> {
        debug!("Appending {} message to chat {}", message.role(), chat_id);

        let conn = self.get_conn()?;
        let tx = conn.transaction().await?;
        let now = Utc::now();

        let affected = tx
            .execute(
                "UPDATE chats SET updated_at = ? WHERE id = ?",
                params![now.to_rfc3339(), chat_id.to_string()],
            )
            .await?;
        if affected == 0 {
            return Err(HermesError::NotFound(format!("chat {}", chat_id)));
        }

        let tool_calls_json = match message {
            ChatMessage::Assistant { tool_calls, .. } if !tool_calls.is_empty() => {
                Some(serde_json::to_string(tool_calls)?)
            }
            _ => None,
        };
        let (tool_call_id, tool_name) = match message {
            ChatMessage::Tool {
                tool_call_id, name, ..
            } => (Some(tool_call_id.clone()), Some(name.clone())),
            _ => (None, None),
        };

        let mut rows = tx
            .query(
                "INSERT INTO chat_messages (chat_id, role, content, tool_calls, tool_call_id, name, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
                params![
                    chat_id.to_string(),
                    message.role(),
                    message.content().to_string(),
                    tool_calls_json,
                    tool_call_id,
                    tool_name,
                    now.to_rfc3339(),
                ],
            )
            .await?;

        let row = rows
            .next()
            .await?
            .ok_or_else(|| HermesError::Database("Message insert returned no row".to_string()))?;
        let row_id: i64 = row.get(0)?;
        // The row keeps the RETURNING statement alive; both it and the rows
        // handle must be released before COMMIT or SQLite rejects the commit
        // with "SQL statements in progress".
        drop(row);
        drop(rows);

        tx.commit().await.map_err(commit_error)?;

        Ok(MessageRecord {
            id: row_id,
            chat_id,
            message: message.clone(),
            created_at: now,
        })
    }

    async fn chat_history(&self, chat_id: ChatId) -> Result<Vec<MessageRecord>> {
        let conn = self.get_conn()?;
        let mut rows = conn
            .query(
                "SELECT id, chat_id, role, content, tool_calls, tool_call_id, name, created_at
                 FROM chat_messages WHERE chat_id = ? ORDER BY id ASC",
                params![chat_id.to_string()],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::row_to_message_record(&row)?);
        }

        debug!("Loaded {} messages for chat {}", records.len(), chat_id);
        Ok(records)
    }

    async fn upsert_sub_agent(
        &self,
        chat_id: ChatId,
        name: &str,
        prompt: &str,
    ) -> Result<SubAgent> {
        debug!("Upserting sub-agent '{}'", name);

        let conn = self.get_conn()?;
        let tx = conn.transaction().await?;
        let now = Utc::now();

        let mut rows = tx
            .query(
                "SELECT id, chat_id, name, prompt, created_at, updated_at, deleted_at
                 FROM sub_agents WHERE name = ? AND deleted_at IS NULL",
                params![name],
            )
            .await?;
        let existing = match rows.next().await? {
            Some(row) => Some(Self::row_to_sub_agent(&row)?),
            None => None,
        };
        drop(rows);

        if let Some(existing) = existing {
            if existing.prompt == prompt {
                // Identical prompt: idempotent no-op, no revision row
                tx.commit().await.map_err(commit_error)?;
                return Ok(existing);
            }

            tx.execute(
                "INSERT INTO sub_agent_revisions (sub_agent_id, old_prompt, created_at)
                 VALUES (?, ?, ?)",
                params![
                    existing.id.to_string(),
                    existing.prompt.clone(),
                    now.to_rfc3339(),
                ],
            )
            .await?;
            tx.execute(
                "UPDATE sub_agents SET prompt = ?, updated_at = ? WHERE id = ?",
                params![prompt, now.to_rfc3339(), existing.id.to_string()],
            )
            .await?;
            tx.commit().await.map_err(commit_error)?;

            debug!("Updated sub-agent '{}' prompt via upsert", name);
            return Ok(SubAgent {
                prompt: prompt.to_string(),
                updated_at: now,
                ..existing
            });
        }

        let agent = SubAgent {
            id: SubAgentId::new(),
            chat_id,
            name: name.to_string(),
            prompt: prompt.to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        tx.execute(
            "INSERT INTO sub_agents (id, chat_id, name, prompt, created_at, updated_at, deleted_at)
             VALUES (?, ?, ?, ?, ?, ?, NULL)",
            params![
                agent.id.to_string(),
                agent.chat_id.to_string(),
                agent.name.clone(),
                agent.prompt.clone(),
                agent.created_at.to_rfc3339(),
                agent.updated_at.to_rfc3339(),
            ],
        )
        .await?;
        tx.commit().await.map_err(commit_error)?;

        info!("Created sub-agent '{}' ({})", agent.name, agent.id);
        Ok(agent)
    }

    async fn get_sub_agent(&self, id: SubAgentId) -> Result<SubAgent> {
        let conn = self.get_conn()?;
        let mut rows = conn
            .query(
                "SELECT id, chat_id, name, prompt, created_at, updated_at, deleted_at
                 FROM sub_agents WHERE id = ? AND deleted_at IS NULL",
                params![id.to_string()],
            )
            .await?;

        let row = rows
            .next()
            .await?
            .ok_or_else(|| HermesError::NotFound(format!("sub-agent {}", id)))?;

        Self::row_to_sub_agent(&row)
    }

    async fn find_sub_agent_by_name(&self, name: &str) -> Result<Option<SubAgent>> {
        let conn = self.get_conn()?;
        let mut rows = conn
            .query(
                "SELECT id, chat_id, name, prompt, created_at, updated_at, deleted_at
                 FROM sub_agents WHERE name = ? AND deleted_at IS NULL",
                params![name],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_sub_agent(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_sub_agents(&self) -> Result<Vec<SubAgent>> {
        let conn = self.get_conn()?;
        let mut rows = conn
            .query(
                "SELECT id, chat_id, name, prompt, created_at, updated_at, deleted_at
                 FROM sub_agents WHERE deleted_at IS NULL ORDER BY created_at DESC",
                params![],
            )
            .await?;

        let mut agents = Vec::new();
        while let Some(row) = rows.next().await? {
            agents.push(Self::row_to_sub_agent(&row)?);
        }

        debug!("Listed {} sub-agents", agents.len());
        Ok(agents)
    }

    async fn most_recently_updated_sub_agent(&self) -> Result<Option<SubAgent>> {
        let conn = self.get_conn()?;
        let mut rows = conn
            .query(
                "SELECT id, chat_id, name, prompt, created_at, updated_at, deleted_at
                 FROM sub_agents WHERE deleted_at IS NULL
                 ORDER BY updated_at DESC LIMIT 1",
                params![],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_sub_agent(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_sub_agent_prompt(
        &self,
        id: SubAgentId,
        incoming: &str,
        policy: PromptUpdatePolicy,
    ) -> Result<SubAgent> {
        debug!("Updating sub-agent {} prompt ({:?})", id, policy);

        let conn = self.get_conn()?;
        let tx = conn.transaction().await?;
        let now = Utc::now();

        let mut rows = tx
            .query(
                "SELECT id, chat_id, name, prompt, created_at, updated_at, deleted_at
                 FROM sub_agents WHERE id = ? AND deleted_at IS NULL",
                params![id.to_string()],
            )
            .await?;
        let existing = rows
            .next()
            .await?
            .ok_or_else(|| HermesError::NotFound(format!("sub-agent {}", id)))?;
        let existing = Self::row_to_sub_agent(&existing)?;
        drop(rows);

        let new_prompt = policy.apply(&existing.prompt, incoming);

        // A revision is written on every update, even when the resulting
        // prompt text is unchanged.
        tx.execute(
            "INSERT INTO sub_agent_revisions (sub_agent_id, old_prompt, created_at)
             VALUES (?, ?, ?)",
            params![
                existing.id.to_string(),
                existing.prompt.clone(),
                now.to_rfc3339(),
            ],
        )
        .await?;
        tx.execute(
            "UPDATE sub_agents SET prompt = ?, updated_at = ? WHERE id = ?",
            params![new_prompt.clone(), now.to_rfc3339(), existing.id.to_string()],
        )
        .await?;
        tx.commit().await.map_err(commit_error)?;

        Ok(SubAgent {
            prompt: new_prompt,
            updated_at: now,
            ..existing
        })
    }

    async fn delete_sub_agent(&self, id: SubAgentId) -> Result<()> {
        debug!("Soft-deleting sub-agent {}", id);

        let conn = self.get_conn()?;
        let mut rows = conn
            .query(
                "SELECT deleted_at FROM sub_agents WHERE id = ?",
                params![id.to_string()],
            )
            .await?;

        let row = rows
            .next()
            .await?
            .ok_or_else(|| HermesError::NotFound(format!("sub-agent {}", id)))?;

        if row.get::<String>(0).is_ok() {
            // Already deleted: no-op success
            return Ok(());
        }
        drop(rows);

        conn.execute(
            "UPDATE sub_agents SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
            params![Utc::now().to_rfc3339(), id.to_string()],
        )
        .await?;

        info!("Soft-deleted sub-agent {}", id);
        Ok(())
    }

    async fn restore_sub_agent(&self, id: SubAgentId) -> Result<()> {
        debug!("Restoring sub-agent {}", id);

        let conn = self.get_conn()?;

        // Restoring into a name held by another active agent violates the
        // partial unique index and surfaces as a database error.
        let affected = conn
            .execute(
                "UPDATE sub_agents SET deleted_at = NULL WHERE id = ?",
                params![id.to_string()],
            )
            .await?;

        if affected == 0 {
            return Err(HermesError::NotFound(format!("sub-agent {}", id)));
        }
        Ok(())
    }

    async fn sub_agent_revisions(&self, id: SubAgentId) -> Result<Vec<SubAgentRevision>> {
        let conn = self.get_conn()?;
        let mut rows = conn
            .query(
                "SELECT id, sub_agent_id, old_prompt, created_at
                 FROM sub_agent_revisions WHERE sub_agent_id = ?
                 ORDER BY created_at ASC, id ASC",
                params![id.to_string()],
            )
            .await?;

        let mut revisions = Vec::new();
        while let Some(row) = rows.next().await? {
            revisions.push(Self::row_to_revision(&row)?);
        }

        Ok(revisions)
    }
}
