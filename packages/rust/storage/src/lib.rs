//! Turso Embedded / libSQL storage layer for the resolution cache.
//!
//! The [`Storage`] struct wraps a libSQL database holding one row per
//! resolved CNPJ: payload, normalized status, source provider, and the
//! fetch/expiry/access timestamps.
//!
//! **Access rules:**
//! - The registry resolver is the sole writer, via [`Storage::open`]
//! - Reporting commands may use [`Storage::open_readonly`]
//!
//! Expiry is checked at read time; nothing is evicted in the background.

mod migrations;

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, params};
use prospector_shared::{CacheEntry, Cnpj, ProspectorError, RegistrationStatus, Result};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// Aggregate counts over the cache table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total: u64,
    pub fresh: u64,
    pub expired: u64,
    pub active: u64,
    pub inactive: u64,
    pub total_hits: u64,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ProspectorError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ProspectorError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ProspectorError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Get the entry for `cnpj`, expired or not.
    pub async fn get_cache_entry(&self, cnpj: &Cnpj) -> Result<Option<CacheEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT cnpj, payload_json, status, source, fetched_at, expires_at, hit_count, last_accessed_at
                 FROM registry_cache WHERE cnpj = ?1",
                params![cnpj.as_str()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_cache_entry(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Get the entry for `cnpj` only if it has not expired at `now`.
    pub async fn get_fresh_cache_entry(
        &self,
        cnpj: &Cnpj,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>> {
        Ok(self
            .get_cache_entry(cnpj)
            .await?
            .filter(|entry| entry.is_fresh(now)))
    }

    /// Count entries by freshness and status.
    pub async fn cache_stats(&self, now: DateTime<Utc>) -> Result<CacheStats> {
        let now = timestamp(now);
        let mut rows = self
            .conn
            .query(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN expires_at > ?1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(hit_count), 0)
                 FROM registry_cache",
                params![now.as_str()],
            )
            .await
            .map_err(storage_err)?;

        let row = rows
            .next()
            .await
            .map_err(storage_err)?
            .ok_or_else(|| ProspectorError::Storage("empty aggregate result".into()))?;

        let total = row.get::<i64>(0).map_err(storage_err)? as u64;
        let fresh = row.get::<i64>(1).map_err(storage_err)? as u64;
        let active = row.get::<i64>(2).map_err(storage_err)? as u64;
        let total_hits = row.get::<i64>(3).map_err(storage_err)? as u64;

        Ok(CacheStats {
            total,
            fresh,
            expired: total - fresh,
            active,
            inactive: total - active,
            total_hits,
        })
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Insert or overwrite the entry for one identifier.
    pub async fn put_cache_entry(&self, entry: &CacheEntry) -> Result<()> {
        self.put_cache_entries(std::slice::from_ref(entry)).await
    }

    /// Insert or overwrite several entries in one multi-row upsert.
    ///
    /// When the same identifier appears more than once, the last entry wins.
    pub async fn put_cache_entries(&self, entries: &[CacheEntry]) -> Result<()> {
        self.check_writable()?;

        let mut latest: HashMap<&str, &CacheEntry> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();
        for entry in entries {
            let key = entry.cnpj.as_str();
            if latest.insert(key, entry).is_none() {
                order.push(key);
            }
        }
        if order.is_empty() {
            return Ok(());
        }

        let mut values: Vec<libsql::Value> = Vec::with_capacity(order.len() * 8);
        let mut placeholders: Vec<String> = Vec::with_capacity(order.len());
        for (i, key) in order.iter().enumerate() {
            let entry = latest[key];
            let payload = serde_json::to_string(&entry.entity)
                .map_err(|e| ProspectorError::Storage(format!("encode payload: {e}")))?;
            let base = i * 8;
            placeholders.push(format!(
                "(?{}, ?{}, ?{}, ?{}, ?{}, ?{}, ?{}, ?{})",
                base + 1,
                base + 2,
                base + 3,
                base + 4,
                base + 5,
                base + 6,
                base + 7,
                base + 8
            ));
            values.push(entry.cnpj.as_str().into());
            values.push(payload.into());
            values.push(entry.status.as_str().into());
            values.push(entry.source.as_str().into());
            values.push(timestamp(entry.fetched_at).into());
            values.push(timestamp(entry.expires_at).into());
            values.push((entry.hit_count as i64).into());
            values.push(match entry.last_accessed_at {
                Some(at) => timestamp(at).into(),
                None => libsql::Value::Null,
            });
        }

        let sql = format!(
            "INSERT INTO registry_cache
                (cnpj, payload_json, status, source, fetched_at, expires_at, hit_count, last_accessed_at)
             VALUES {}
             ON CONFLICT(cnpj) DO UPDATE SET
               payload_json = excluded.payload_json,
               status = excluded.status,
               source = excluded.source,
               fetched_at = excluded.fetched_at,
               expires_at = excluded.expires_at",
            placeholders.join(", ")
        );

        self.conn
            .execute(&sql, libsql::params_from_iter(values))
            .await
            .map_err(storage_err)?;

        tracing::debug!(rows = order.len(), "cache entries upserted");
        Ok(())
    }

    /// Increment the hit counter and stamp the access time.
    pub async fn record_cache_hit(&self, cnpj: &Cnpj, at: DateTime<Utc>) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE registry_cache
                 SET hit_count = hit_count + 1, last_accessed_at = ?2
                 WHERE cnpj = ?1",
                params![cnpj.as_str(), timestamp(at)],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Delete every entry that expired before `now`. Returns the number removed.
    pub async fn purge_expired_cache(&self, now: DateTime<Utc>) -> Result<u64> {
        self.check_writable()?;
        let removed = self
            .conn
            .execute(
                "DELETE FROM registry_cache WHERE expires_at <= ?1",
                params![timestamp(now)],
            )
            .await
            .map_err(storage_err)?;
        Ok(removed)
    }
}

/// Fixed-width UTC timestamps so that text comparison matches time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ProspectorError::Storage(format!("invalid date: {e}")))
}

fn storage_err(e: libsql::Error) -> ProspectorError {
    ProspectorError::Storage(e.to_string())
}

/// Convert a database row to a [`CacheEntry`].
fn row_to_cache_entry(row: &libsql::Row) -> Result<CacheEntry> {
    let cnpj: String = row.get(0).map_err(storage_err)?;
    let cnpj: Cnpj = cnpj
        .parse()
        .map_err(|_| ProspectorError::Storage(format!("corrupt cache key {cnpj}")))?;

    let payload: String = row.get(1).map_err(storage_err)?;
    let entity = serde_json::from_str(&payload)
        .map_err(|e| ProspectorError::Storage(format!("corrupt payload for {cnpj}: {e}")))?;

    let status: String = row.get(2).map_err(storage_err)?;
    let status = match status.as_str() {
        "active" => RegistrationStatus::Active,
        _ => RegistrationStatus::Inactive,
    };

    let last_accessed_at = match row.get::<String>(7).ok() {
        Some(s) => Some(parse_timestamp(&s)?),
        None => None,
    };

    Ok(CacheEntry {
        cnpj,
        entity,
        status,
        source: row.get(3).map_err(storage_err)?,
        fetched_at: parse_timestamp(&row.get::<String>(4).map_err(storage_err)?)?,
        expires_at: parse_timestamp(&row.get::<String>(5).map_err(storage_err)?)?,
        hit_count: row.get::<i64>(6).map_err(storage_err)? as u64,
        last_accessed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use prospector_shared::{Contacts, ResolvedEntity, SizeBand};
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("prospector_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn entity(cnpj: &Cnpj, status: RegistrationStatus) -> ResolvedEntity {
        ResolvedEntity {
            cnpj: cnpj.clone(),
            legal_name: "CANTINA DO BAIRRO LTDA".into(),
            trade_name: Some("Cantina do Bairro".into()),
            size_band: SizeBand::Micro,
            size_label: "MICRO EMPRESA".into(),
            status,
            status_label: "ATIVA".into(),
            municipality: "CAMPINAS".into(),
            region: "SP".into(),
            primary_activity: Some("Restaurantes e similares".into()),
            contacts: Contacts::default(),
        }
    }

    fn entry(cnpj: &Cnpj, ttl: Duration, source: &str) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            cnpj: cnpj.clone(),
            entity: entity(cnpj, RegistrationStatus::Active),
            status: RegistrationStatus::Active,
            source: source.into(),
            fetched_at: now,
            expires_at: now + ttl,
            hit_count: 0,
            last_accessed_at: None,
        }
    }

    fn cnpj(base: &str) -> Cnpj {
        Cnpj::from_base(base).expect("valid base")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("prospector_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn put_and_get_entry() {
        let storage = test_storage().await;
        let id = cnpj("112223330001");

        assert!(storage.get_cache_entry(&id).await.unwrap().is_none());

        storage
            .put_cache_entry(&entry(&id, Duration::days(7), "brasilapi"))
            .await
            .expect("put");

        let found = storage.get_cache_entry(&id).await.unwrap().expect("hit");
        assert_eq!(found.cnpj, id);
        assert_eq!(found.source, "brasilapi");
        assert_eq!(found.status, RegistrationStatus::Active);
        assert_eq!(found.entity.municipality, "CAMPINAS");
        assert_eq!(found.hit_count, 0);
    }

    #[tokio::test]
    async fn expired_entries_are_not_fresh() {
        let storage = test_storage().await;
        let id = cnpj("456789010001");
        storage
            .put_cache_entry(&entry(&id, Duration::seconds(-5), "receitaws"))
            .await
            .unwrap();

        let now = Utc::now();
        assert!(storage.get_cache_entry(&id).await.unwrap().is_some());
        assert!(storage.get_fresh_cache_entry(&id, now).await.unwrap().is_none());

        let removed = storage.purge_expired_cache(now).await.unwrap();
        assert_eq!(removed, 1);
        assert!(storage.get_cache_entry(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn hits_are_counted() {
        let storage = test_storage().await;
        let id = cnpj("190131470001");
        storage
            .put_cache_entry(&entry(&id, Duration::days(1), "brasilapi"))
            .await
            .unwrap();

        storage.record_cache_hit(&id, Utc::now()).await.unwrap();
        storage.record_cache_hit(&id, Utc::now()).await.unwrap();

        let found = storage.get_cache_entry(&id).await.unwrap().unwrap();
        assert_eq!(found.hit_count, 2);
        assert!(found.last_accessed_at.is_some());
    }

    #[tokio::test]
    async fn multi_row_upsert_overwrites_per_key() {
        let storage = test_storage().await;
        let a = cnpj("334130000001");
        let b = cnpj("123456780001");

        storage
            .put_cache_entries(&[
                entry(&a, Duration::days(1), "brasilapi"),
                entry(&b, Duration::days(1), "brasilapi"),
            ])
            .await
            .expect("first batch");

        storage.record_cache_hit(&a, Utc::now()).await.unwrap();

        // Overwrite `a` twice in one batch; the last one wins and the hit
        // counter survives the overwrite.
        storage
            .put_cache_entries(&[
                entry(&a, Duration::days(1), "brasilapi"),
                entry(&a, Duration::days(1), "receitaws"),
            ])
            .await
            .expect("second batch");

        let found = storage.get_cache_entry(&a).await.unwrap().unwrap();
        assert_eq!(found.source, "receitaws");
        assert_eq!(found.hit_count, 1);

        let stats = storage.cache_stats(Utc::now()).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.fresh, 2);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.total_hits, 1);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let storage = test_storage().await;
        storage.put_cache_entries(&[]).await.expect("empty batch");
        let stats = storage.cache_stats(Utc::now()).await.unwrap();
        assert_eq!(stats, CacheStats::default());
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("prospector_test_{}.db", Uuid::now_v7()));
        let id = cnpj("987654320001");
        let rw = Storage::open(&tmp).await.unwrap();
        rw.put_cache_entry(&entry(&id, Duration::days(1), "brasilapi"))
            .await
            .unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert!(ro.get_cache_entry(&id).await.unwrap().is_some());
        let result = ro.record_cache_hit(&id, Utc::now()).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
