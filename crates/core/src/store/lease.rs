//! Drain lease shared by every context using the same store.
//!
//! A single row names the current drain holder and when its claim lapses.
//! Acquisition is one conditional UPSERT, so two contexts racing for the lease
//! cannot both win.

use super::connection::StoreDb;
use crate::Error;
use chrono::{SecondsFormat, Utc};
use std::time::Duration;
use tokio_rusqlite::params;

fn timestamp(at: chrono::DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl StoreDb {
    /// Try to take the drain lease for `holder` for `ttl`.
    ///
    /// Succeeds when nobody holds it, the previous claim has lapsed, or `holder`
    /// already owns it (renewal).
    pub async fn try_acquire_drain_lease(&self, holder: &str, ttl: Duration) -> Result<bool, Error> {
        let holder = holder.to_string();
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| Error::InvalidInput(e.to_string()))?;
        let expires_at = timestamp(now + ttl);
        let now = timestamp(now);
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let changed = conn.execute(
                    "INSERT INTO drain_lease (id, holder, expires_at) VALUES (1, ?1, ?2)
                    ON CONFLICT(id) DO UPDATE SET
                        holder = excluded.holder,
                        expires_at = excluded.expires_at
                    WHERE drain_lease.expires_at <= ?3 OR drain_lease.holder = excluded.holder",
                    params![holder, expires_at, now],
                )?;
                Ok(changed == 1)
            })
            .await
            .map_err(Error::from)
    }

    /// Release the lease if `holder` still owns it.
    pub async fn release_drain_lease(&self, holder: &str) -> Result<(), Error> {
        let holder = holder.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute("DELETE FROM drain_lease WHERE holder = ?1", params![holder])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }
}
