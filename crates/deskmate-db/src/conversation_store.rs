use std::path::Path;

use chrono::{DateTime, Utc};
use deskmate_common::{Error, Message, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::warn;

use crate::migrations::{self, format_timestamp, parse_timestamp};

const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistent storage for conversations and their typed message history.
pub struct ConversationStore {
    conn: Connection,
}

impl ConversationStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self {
            conn: migrations::open_connection(db_path)?,
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: migrations::open_in_memory()?,
        })
    }

    /// Start a conversation titled after the first message.
    pub fn create_conversation(&self, user_id: &str, first_message: &str) -> Result<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title_from(first_message),
            created_at: now,
            updated_at: now,
        };
        self.conn
            .execute(
                "INSERT INTO conversations (id, user_id, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![
                    conversation.id,
                    conversation.user_id,
                    conversation.title,
                    format_timestamp(now)
                ],
            )
            .map_err(|e| Error::Database(format!("failed to create conversation: {e}")))?;
        Ok(conversation)
    }

    pub fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        self.conn
            .query_row(
                "SELECT id, user_id, title, created_at, updated_at
                 FROM conversations WHERE id = ?1",
                params![conversation_id],
                row_to_conversation,
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load conversation: {e}")))
    }

    /// Conversations of one user, most recently active first.
    pub fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, user_id, title, created_at, updated_at
                 FROM conversations
                 WHERE user_id = ?1
                 ORDER BY updated_at DESC, rowid DESC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare conversation query: {e}")))?;

        let rows = stmt
            .query_map(params![user_id], row_to_conversation)
            .map_err(|e| Error::Database(format!("failed to list conversations: {e}")))?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(
                row.map_err(|e| Error::Database(format!("failed to read conversation row: {e}")))?,
            );
        }
        Ok(conversations)
    }

    /// Append messages in order and bump the conversation's activity time.
    pub fn append_messages(&self, conversation_id: &str, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let now = format_timestamp(Utc::now());
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;

        for message in messages {
            let payload = serde_json::to_string(message)?;
            tx.execute(
                "INSERT INTO conversation_messages (conversation_id, kind, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![conversation_id, message.kind().as_str(), payload, now],
            )
            .map_err(|e| Error::Database(format!("failed to append message: {e}")))?;
        }

        let touched = tx
            .execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                params![conversation_id, now],
            )
            .map_err(|e| Error::Database(format!("failed to touch conversation: {e}")))?;
        if touched == 0 {
            return Err(Error::Database(format!(
                "conversation '{conversation_id}' does not exist"
            )));
        }

        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit messages: {e}")))
    }

    /// Full history of a conversation in chronological order.
    pub fn load_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT payload FROM conversation_messages
                 WHERE conversation_id = ?1
                 ORDER BY id ASC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare message query: {e}")))?;

        let rows = stmt
            .query_map(params![conversation_id], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Database(format!("failed to load messages: {e}")))?;

        let mut messages = Vec::new();
        for row in rows {
            let payload =
                row.map_err(|e| Error::Database(format!("failed to read message row: {e}")))?;
            match serde_json::from_str::<Message>(&payload) {
                Ok(message) => messages.push(message),
                Err(e) => warn!(
                    "skipping unreadable message in conversation {}: {e}",
                    conversation_id
                ),
            }
        }
        Ok(messages)
    }

    /// Returns true if a conversation was removed.
    pub fn delete_conversation(&self, conversation_id: &str) -> Result<bool> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;
        tx.execute(
            "DELETE FROM conversation_messages WHERE conversation_id = ?1",
            params![conversation_id],
        )
        .map_err(|e| Error::Database(format!("failed to delete messages: {e}")))?;
        let deleted = tx
            .execute(
                "DELETE FROM conversations WHERE id = ?1",
                params![conversation_id],
            )
            .map_err(|e| Error::Database(format!("failed to delete conversation: {e}")))?;
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit delete: {e}")))?;
        Ok(deleted > 0)
    }

    pub fn message_count(&self, conversation_id: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM conversation_messages WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to count messages: {e}")))
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let created_raw: String = row.get(3)?;
    let updated_raw: String = row.get(4)?;
    Ok(Conversation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        created_at: parse_timestamp(&created_raw),
        updated_at: parse_timestamp(&updated_raw),
    })
}

fn title_from(first_message: &str) -> String {
    let trimmed = first_message.trim();
    if trimmed.is_empty() {
        return "New conversation".to_string();
    }
    trimmed.chars().take(TITLE_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskmate_common::ToolCall;
    use serde_json::json;

    #[test]
    fn create_and_list_conversations() {
        let store = ConversationStore::in_memory().expect("in-memory store should open");
        let first = store.create_conversation("u-1", "How many leave days do I have?").unwrap();
        let _other_user = store.create_conversation("u-2", "hello").unwrap();
        let second = store.create_conversation("u-1", "Book the Orchid room").unwrap();
        store
            .append_messages(&first.id, &[Message::human("again")])
            .unwrap();

        let listed = store.list_conversations("u-1").unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|c| c.id == second.id));
        assert_eq!(
            store.get_conversation(&first.id).unwrap().unwrap().title,
            "How many leave days do I have?"
        );
    }

    #[test]
    fn title_is_truncated_to_fifty_chars() {
        let long = "é".repeat(80);
        assert_eq!(title_from(&long).chars().count(), 50);
        assert_eq!(title_from("   "), "New conversation");
    }

    #[test]
    fn messages_keep_kind_and_order() {
        let store = ConversationStore::in_memory().unwrap();
        let conversation = store.create_conversation("u-1", "rooms?").unwrap();
        let call = ToolCall::new("list_rooms", json!({}));
        let messages = vec![
            Message::human("rooms?"),
            Message::tool_invocation(vec![call.clone()]),
            Message::tool_result(&call, json!({"success": true, "count": 2})),
            Message::agent_text("There are 2 rooms."),
        ];
        store.append_messages(&conversation.id, &messages).unwrap();

        let loaded = store.load_messages(&conversation.id).unwrap();
        assert_eq!(loaded, messages);
        assert_eq!(store.message_count(&conversation.id).unwrap(), 4);
    }

    #[test]
    fn append_to_missing_conversation_fails() {
        let store = ConversationStore::in_memory().unwrap();
        let err = store
            .append_messages("nope", &[Message::human("hi")])
            .unwrap_err();
        assert!(err.to_string().contains("database error"));
    }

    #[test]
    fn delete_removes_messages() {
        let store = ConversationStore::in_memory().unwrap();
        let conversation = store.create_conversation("u-1", "hi").unwrap();
        store
            .append_messages(&conversation.id, &[Message::human("hi")])
            .unwrap();

        assert!(store.delete_conversation(&conversation.id).unwrap());
        assert!(!store.delete_conversation(&conversation.id).unwrap());
        assert!(store.get_conversation(&conversation.id).unwrap().is_none());
        assert_eq!(store.message_count(&conversation.id).unwrap(), 0);
    }

    #[test]
    fn on_disk_store_persists_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deskmate.db");
        let id = {
            let store = ConversationStore::open(&path).unwrap();
            let conversation = store.create_conversation("u-1", "persist me").unwrap();
            store
                .append_messages(&conversation.id, &[Message::agent_text("ok")])
                .unwrap();
            conversation.id
        };
        let reopened = ConversationStore::open(&path).unwrap();
        assert_eq!(reopened.load_messages(&id).unwrap().len(), 1);
    }
}
