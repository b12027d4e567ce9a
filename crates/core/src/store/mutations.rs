//! Durable store of content submissions awaiting replay.
//!
//! Records are addressed by an auto-assigned ascending id; listing order is id
//! order, which is enqueue order.

use super::connection::StoreDb;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;

/// Body of a content-creation request: `{content, title?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct MutationPayload {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl MutationPayload {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into(), title: None }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// A submission persisted while the origin was unreachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct QueuedMutation {
    pub id: i64,
    pub payload: MutationPayload,
    pub queued_at: String,
}

impl StoreDb {
    /// Append a submission to the queue, returning its id.
    pub async fn enqueue_mutation(&self, payload: &MutationPayload) -> Result<i64, Error> {
        let payload = payload.clone();
        let queued_at = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<i64, Error> {
                conn.execute(
                    "INSERT INTO mutations (content, title, queued_at) VALUES (?1, ?2, ?3)",
                    params![payload.content, payload.title, queued_at],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Error::from)
    }

    /// All queued submissions in enqueue order.
    pub async fn list_mutations(&self) -> Result<Vec<QueuedMutation>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<QueuedMutation>, Error> {
                let mut stmt = conn.prepare("SELECT id, content, title, queued_at FROM mutations ORDER BY id ASC")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(QueuedMutation {
                            id: row.get(0)?,
                            payload: MutationPayload { content: row.get(1)?, title: row.get(2)? },
                            queued_at: row.get(3)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete one submission by id.
    ///
    /// Returns false if another context already removed it.
    pub async fn delete_mutation(&self, id: i64) -> Result<bool, Error> {
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let removed = conn.execute("DELETE FROM mutations WHERE id = ?1", params![id])?;
                Ok(removed > 0)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn mutation_count(&self) -> Result<usize, Error> {
        self.conn
            .call(|conn| -> Result<usize, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM mutations", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
            .map_err(Error::from)
    }
}
