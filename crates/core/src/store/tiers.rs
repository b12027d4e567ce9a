//! Versioned cache tiers.
//!
//! A tier is a named store of request URL to response. Three tiers make up one
//! version set (precache, static assets, content pages); the version number is
//! baked into every name so an activation can drop whole older sets at once.
//! Entries remember insertion order, which is the only ordering signal used for
//! eviction.

use super::connection::StoreDb;
use super::hash::compute_cache_key;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// Names of the three tiers belonging to one cache version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierSet {
    prefix: String,
    version: u32,
}

impl TierSet {
    pub fn new(prefix: impl Into<String>, version: u32) -> Self {
        Self { prefix: prefix.into(), version }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Offline fallback resources, populated on install.
    pub fn precache(&self) -> String {
        format!("{}-precache-v{}", self.prefix, self.version)
    }

    /// Stale-while-revalidate store for `/static/` assets.
    pub fn static_assets(&self) -> String {
        format!("{}-static-v{}", self.prefix, self.version)
    }

    /// Network-first store for page documents, size bounded.
    pub fn pages(&self) -> String {
        format!("{}-pages-v{}", self.prefix, self.version)
    }

    pub fn names(&self) -> [String; 3] {
        [self.precache(), self.static_assets(), self.pages()]
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names().iter().any(|n| n == name)
    }
}

/// A response stored in a cache tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct StoredResponse {
    /// Request URL the entry is keyed on.
    pub url: String,
    /// Redirect target the body came from, if it differs from `url`.
    pub final_url: Option<String>,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub stored_at: String,
}

impl StoredResponse {
    pub fn new(url: impl Into<String>, status_code: u16, content_type: Option<String>, body: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            final_url: None,
            status_code,
            content_type,
            headers: Vec::new(),
            body,
            stored_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

fn read_response(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredResponse> {
    let headers_json: Option<String> = row.get(3)?;
    let headers = headers_json
        .and_then(|json| serde_json::from_str(&json).ok())
        .unwrap_or_default();
    Ok(StoredResponse {
        url: row.get(0)?,
        status_code: row.get(1)?,
        content_type: row.get(2)?,
        headers,
        body: row.get(4)?,
        stored_at: row.get(5)?,
        final_url: row.get(6)?,
    })
}

impl StoreDb {
    /// Create a tier if it doesn't exist yet.
    pub async fn open_tier(&self, name: &str) -> Result<(), Error> {
        let name = name.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO cache_tiers (name, created_at) VALUES (?1, ?2)",
                    params![name, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// List every stored tier, oldest first.
    pub async fn tier_names(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT name FROM cache_tiers ORDER BY created_at ASC, name ASC")?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a tier and all of its entries.
    ///
    /// Returns false if the tier did not exist.
    pub async fn delete_tier(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM cache_entries WHERE tier = ?1", params![name])?;
                let removed = tx.execute("DELETE FROM cache_tiers WHERE name = ?1", params![name])?;
                tx.commit()?;
                Ok(removed > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Store a response in a tier, replacing any entry for the same URL.
    ///
    /// A replaced entry moves to the back of the insertion order. The delete and
    /// insert happen in one transaction, so concurrent readers of the same URL
    /// see either the old or the new response.
    pub async fn put_entry(&self, tier: &str, response: &StoredResponse) -> Result<(), Error> {
        let tier = tier.to_string();
        let response = response.clone();
        let key_hash = compute_cache_key(&response.url);
        let headers_json = if response.headers.is_empty() {
            None
        } else {
            serde_json::to_string(&response.headers).ok()
        };
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT OR IGNORE INTO cache_tiers (name, created_at) VALUES (?1, ?2)",
                    params![tier, now],
                )?;
                tx.execute(
                    "DELETE FROM cache_entries WHERE tier = ?1 AND key_hash = ?2",
                    params![tier, key_hash],
                )?;
                tx.execute(
                    "INSERT INTO cache_entries (
                        tier, key_hash, url, status_code, content_type, headers_json, body, stored_at, final_url
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        tier,
                        key_hash,
                        &response.url,
                        response.status_code,
                        &response.content_type,
                        headers_json,
                        &response.body,
                        &response.stored_at,
                        &response.final_url,
                    ],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Look up a URL in one tier.
    pub async fn match_entry(&self, tier: &str, url: &str) -> Result<Option<StoredResponse>, Error> {
        let tier = tier.to_string();
        let key_hash = compute_cache_key(url);
        self.conn
            .call(move |conn| -> Result<Option<StoredResponse>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT url, status_code, content_type, headers_json, body, stored_at, final_url
                    FROM cache_entries WHERE tier = ?1 AND key_hash = ?2",
                )?;
                match stmt.query_row(params![tier, key_hash], read_response) {
                    Ok(r) => Ok(Some(r)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Look up a URL across several tiers, first hit wins.
    pub async fn match_any(&self, tiers: &[String], url: &str) -> Result<Option<StoredResponse>, Error> {
        for tier in tiers {
            if let Some(hit) = self.match_entry(tier, url).await? {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }

    /// URLs stored in a tier, in insertion order.
    pub async fn tier_keys(&self, tier: &str) -> Result<Vec<String>, Error> {
        let tier = tier.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT url FROM cache_entries WHERE tier = ?1 ORDER BY seq ASC")?;
                let keys = stmt
                    .query_map(params![tier], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(keys)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn tier_len(&self, tier: &str) -> Result<usize, Error> {
        let tier = tier.to_string();
        self.conn
            .call(move |conn| -> Result<usize, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM cache_entries WHERE tier = ?1", params![tier], |row| {
                        row.get(0)
                    })?;
                Ok(count as usize)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete the oldest-inserted entries until the tier holds at most `max_entries`.
    ///
    /// Returns the number of deleted entries.
    pub async fn trim_tier_fifo(&self, tier: &str, max_entries: usize) -> Result<u64, Error> {
        let tier = tier.to_string();
        let max = max_entries as i64;
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let tx = conn.transaction()?;
                let count: i64 =
                    tx.query_row("SELECT COUNT(*) FROM cache_entries WHERE tier = ?1", params![tier], |row| {
                        row.get(0)
                    })?;
                if count <= max {
                    return Ok(0);
                }

                let deleted = tx.execute(
                    "DELETE FROM cache_entries WHERE seq IN (
                        SELECT seq FROM cache_entries WHERE tier = ?1 ORDER BY seq ASC LIMIT ?2
                    )",
                    params![tier, count - max],
                )?;
                tx.commit()?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }
}
