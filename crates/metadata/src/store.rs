//! Metadata store trait and implementations.

use crate::error::{MetadataError, MetadataResult};
use crate::models::CommitOutcome;
use crate::repos::{ArtifactRepo, QuotaRepo, ScopeRepo, SearchRepo, TokenRepo};
use async_trait::async_trait;
use depot_core::{Artifact, ArtifactHash};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    ArtifactRepo + SearchRepo + QuotaRepo + ScopeRepo + TokenRepo + Send + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;

    /// Commit an uploaded artifact.
    ///
    /// In one transaction: writes the record and its search entry, and
    /// settles the uploader's quota by replacing the `reserved` bytes charged
    /// at admission with the final charge (the artifact size, or zero when
    /// the uploader already owns this hash). If the hash belonged to another
    /// owner, that owner's charge and the artifact's grants are removed.
    /// Fails with `QuotaExceeded` and changes nothing if the settled usage
    /// would exceed the uploader's limit.
    async fn commit_upload(
        &self,
        artifact: &Artifact,
        reserved: u64,
    ) -> MetadataResult<CommitOutcome>;

    /// Delete a record with its attributes, grants and search entries, and
    /// return its size to the owner's quota, in one transaction.
    /// Returns the removed artifact, or `None` if there was none. Fails with
    /// `NotOwner` and changes nothing unless `owner` owns the record when the
    /// transaction runs.
    async fn delete_artifact(
        &self,
        hash: &ArtifactHash,
        owner: &str,
    ) -> MetadataResult<Option<Artifact>>;

    /// Close all connections. Further calls fail.
    async fn close(&self);
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    query_timeout: Duration,
    default_quota_bytes: i64,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(600);

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        // A single connection serializes write transactions; quota admission
        // and commit rely on it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            query_timeout: Duration::from_secs(query_timeout_secs),
            default_quota_bytes: crate::models::to_db_bytes(depot_core::DEFAULT_QUOTA_BYTES),
        };
        store.migrate().await?;

        Ok(store)
    }

    /// Set the limit given to owners on their first ledger write.
    pub fn with_default_quota(mut self, limit_bytes: u64) -> Self {
        self.default_quota_bytes = crate::models::to_db_bytes(limit_bytes);
        self
    }

    fn warn_if_slow(&self, operation: &'static str, started: Instant) {
        let elapsed = started.elapsed();
        if elapsed > self.query_timeout {
            tracing::warn!(
                operation,
                elapsed_ms = elapsed.as_millis() as u64,
                timeout_secs = self.query_timeout.as_secs(),
                "metadata transaction exceeded the advisory query timeout"
            );
        }
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn commit_upload(
        &self,
        artifact: &Artifact,
        reserved: u64,
    ) -> MetadataResult<CommitOutcome> {
        let started = Instant::now();
        let outcome = sqlite_impl::commit_upload(self, artifact, reserved).await;
        self.warn_if_slow("commit_upload", started);
        outcome
    }

    async fn delete_artifact(
        &self,
        hash: &ArtifactHash,
        owner: &str,
    ) -> MetadataResult<Option<Artifact>> {
        let started = Instant::now();
        let removed = sqlite_impl::delete_artifact(self, hash, owner).await;
        self.warn_if_slow("delete_artifact", started);
        removed
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::SearchHit;
    use depot_core::ArtifactKind;
    use depot_core::artifact::validate_attribute;
    use sqlx::SqliteConnection;
    use std::collections::{BTreeMap, HashMap};
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn validate_attributes(attributes: &BTreeMap<String, String>) -> MetadataResult<()> {
        for (key, value) in attributes {
            validate_attribute(key, value)
                .map_err(|e| MetadataError::Constraint(e.to_string()))?;
        }
        Ok(())
    }

    /// Upsert the record, replace its attributes and append a search entry.
    async fn write_artifact(conn: &mut SqliteConnection, artifact: &Artifact) -> MetadataResult<()> {
        let row = ArtifactRow::from_artifact(artifact);

        // INSERT OR REPLACE would delete the row first and cascade into grants.
        sqlx::query(
            r#"
            INSERT INTO artifacts (hash, name, owner, kind, size_bytes, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(hash) DO UPDATE SET
                name = excluded.name,
                owner = excluded.owner,
                kind = excluded.kind,
                size_bytes = excluded.size_bytes,
                created_at = excluded.created_at
            "#,
        )
        .bind(&row.hash)
        .bind(&row.name)
        .bind(&row.owner)
        .bind(&row.kind)
        .bind(row.size_bytes)
        .bind(row.created_at)
        .execute(&mut *conn)
        .await?;

        sqlx::query("DELETE FROM artifact_attributes WHERE hash = ?")
            .bind(&row.hash)
            .execute(&mut *conn)
            .await?;

        for (key, value) in &artifact.attributes {
            sqlx::query("INSERT INTO artifact_attributes (hash, key, value) VALUES (?, ?, ?)")
                .bind(&row.hash)
                .bind(key)
                .bind(value)
                .execute(&mut *conn)
                .await?;
        }

        sqlx::query("INSERT INTO search_index (name, created_at_ns, hash) VALUES (?, ?, ?)")
            .bind(&row.name)
            .bind(to_db_nanos(artifact.created_at))
            .bind(&row.hash)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    async fn load_artifact(
        conn: &mut SqliteConnection,
        hash: &str,
    ) -> MetadataResult<Option<Artifact>> {
        let Some(row) = sqlx::query_as::<_, ArtifactRow>("SELECT * FROM artifacts WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&mut *conn)
            .await?
        else {
            return Ok(None);
        };

        let attributes = sqlx::query_as::<_, ArtifactAttributeRow>(
            "SELECT * FROM artifact_attributes WHERE hash = ? ORDER BY key",
        )
        .bind(hash)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(|a| (a.key, a.value))
        .collect();

        row.into_artifact(attributes).map(Some)
    }

    async fn ensure_quota_row(
        conn: &mut SqliteConnection,
        owner: &str,
        default_limit: i64,
        now: OffsetDateTime,
    ) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO quotas (owner, limit_bytes, used_bytes, updated_at) VALUES (?, ?, 0, ?) ON CONFLICT(owner) DO NOTHING",
        )
        .bind(owner)
        .bind(default_limit)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn fetch_quota_row(conn: &mut SqliteConnection, owner: &str) -> MetadataResult<QuotaRow> {
        let row = sqlx::query_as::<_, QuotaRow>("SELECT * FROM quotas WHERE owner = ?")
            .bind(owner)
            .fetch_one(&mut *conn)
            .await?;
        Ok(row)
    }

    async fn apply_usage_delta(
        conn: &mut SqliteConnection,
        owner: &str,
        delta: i64,
        now: OffsetDateTime,
    ) -> MetadataResult<()> {
        sqlx::query(
            "UPDATE quotas SET used_bytes = MAX(used_bytes + ?, 0), updated_at = ? WHERE owner = ?",
        )
        .bind(delta)
        .bind(now)
        .bind(owner)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub(super) async fn commit_upload(
        store: &SqliteStore,
        artifact: &Artifact,
        reserved: u64,
    ) -> MetadataResult<CommitOutcome> {
        validate_attributes(&artifact.attributes)?;
        let now = OffsetDateTime::now_utc();
        let hash = artifact.hash.to_hex();
        let owner = artifact.owner.as_str();

        let mut tx = store.pool.begin().await?;

        let existing = sqlx::query_as::<_, ArtifactRow>("SELECT * FROM artifacts WHERE hash = ?")
            .bind(&hash)
            .fetch_optional(&mut *tx)
            .await?;

        let same_owner = existing.as_ref().is_some_and(|prev| prev.owner == owner);
        let charged = if same_owner { 0 } else { artifact.size };

        ensure_quota_row(&mut tx, owner, store.default_quota_bytes, now).await?;
        let quota = fetch_quota_row(&mut tx, owner).await?;
        let settlement = to_db_bytes(charged).saturating_sub(to_db_bytes(reserved));
        let settled = quota.used_bytes.saturating_add(settlement).max(0);
        if settled > quota.limit_bytes {
            // Dropping the transaction discards the quota row insert too.
            return Err(MetadataError::QuotaExceeded {
                owner: owner.to_string(),
                requested: charged,
                available: quota
                    .limit()
                    .saturating_sub(quota.used().saturating_sub(reserved)),
            });
        }
        apply_usage_delta(&mut tx, owner, settlement, now).await?;

        let mut previous_owner = None;
        if let Some(prev) = &existing
            && prev.owner != owner
        {
            apply_usage_delta(&mut tx, &prev.owner, -prev.size_bytes, now).await?;
            sqlx::query("DELETE FROM artifact_scopes WHERE hash = ?")
                .bind(&hash)
                .execute(&mut *tx)
                .await?;
            previous_owner = Some(prev.owner.clone());
        }

        write_artifact(&mut tx, artifact).await?;
        tx.commit().await?;

        Ok(CommitOutcome {
            deduplicated: existing.is_some(),
            previous_owner,
            charged,
        })
    }

    /// Current owner of a record, read inside the caller's transaction.
    async fn record_owner(
        conn: &mut SqliteConnection,
        hash: &str,
    ) -> MetadataResult<Option<String>> {
        let owner = sqlx::query_scalar::<_, String>("SELECT owner FROM artifacts WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(owner)
    }

    /// `NotFound` for a missing record, `NotOwner` for someone else's.
    async fn ensure_owner(
        conn: &mut SqliteConnection,
        hash: &str,
        owner: &str,
    ) -> MetadataResult<()> {
        match record_owner(conn, hash).await? {
            None => Err(MetadataError::NotFound(format!("artifact {hash}"))),
            Some(current) if current != owner => {
                Err(MetadataError::NotOwner(format!("artifact {hash}")))
            }
            Some(_) => Ok(()),
        }
    }

    pub(super) async fn delete_artifact(
        store: &SqliteStore,
        hash: &ArtifactHash,
        owner: &str,
    ) -> MetadataResult<Option<Artifact>> {
        let hash_hex = hash.to_hex();
        let mut tx = store.pool.begin().await?;

        let Some(artifact) = load_artifact(&mut tx, &hash_hex).await? else {
            return Ok(None);
        };
        if artifact.owner.as_str() != owner {
            return Err(MetadataError::NotOwner(format!("artifact {hash_hex}")));
        }

        for statement in [
            "DELETE FROM artifact_attributes WHERE hash = ?",
            "DELETE FROM artifact_scopes WHERE hash = ?",
            "DELETE FROM search_index WHERE hash = ?",
            "DELETE FROM artifacts WHERE hash = ?",
        ] {
            sqlx::query(statement)
                .bind(&hash_hex)
                .execute(&mut *tx)
                .await?;
        }

        apply_usage_delta(
            &mut tx,
            artifact.owner.as_str(),
            -to_db_bytes(artifact.size),
            OffsetDateTime::now_utc(),
        )
        .await?;

        tx.commit().await?;
        Ok(Some(artifact))
    }

    #[async_trait]
    impl ArtifactRepo for SqliteStore {
        async fn put_artifact(&self, artifact: &Artifact) -> MetadataResult<()> {
            validate_attributes(&artifact.attributes)?;
            let mut tx = self.pool.begin().await?;
            write_artifact(&mut tx, artifact).await?;
            tx.commit().await?;
            Ok(())
        }

        async fn get_artifact(&self, hash: &ArtifactHash) -> MetadataResult<Option<Artifact>> {
            let mut conn = self.pool.acquire().await?;
            load_artifact(&mut conn, &hash.to_hex()).await
        }

        async fn get_artifact_name(&self, hash: &ArtifactHash) -> MetadataResult<Option<String>> {
            let name = sqlx::query_scalar::<_, String>("SELECT name FROM artifacts WHERE hash = ?")
                .bind(hash.to_hex())
                .fetch_optional(&self.pool)
                .await?;
            Ok(name)
        }

        async fn get_attributes(
            &self,
            hash: &ArtifactHash,
        ) -> MetadataResult<Option<BTreeMap<String, String>>> {
            Ok(self
                .get_artifact(hash)
                .await?
                .map(|artifact| artifact.attribute_view()))
        }

        async fn artifact_exists(&self, hash: &ArtifactHash) -> MetadataResult<bool> {
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM artifacts WHERE hash = ?)",
            )
            .bind(hash.to_hex())
            .fetch_one(&self.pool)
            .await?;
            Ok(exists)
        }

        async fn list_artifacts(&self) -> MetadataResult<BTreeMap<String, String>> {
            let rows: Vec<(String, String)> =
                sqlx::query_as("SELECT hash, name FROM artifacts ORDER BY hash")
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows.into_iter().collect())
        }

        async fn list_artifacts_by_kind(
            &self,
            kind: ArtifactKind,
        ) -> MetadataResult<Vec<Artifact>> {
            let mut conn = self.pool.acquire().await?;

            let rows = sqlx::query_as::<_, ArtifactRow>(
                "SELECT * FROM artifacts WHERE kind = ? ORDER BY name, created_at",
            )
            .bind(kind.as_str())
            .fetch_all(&mut *conn)
            .await?;

            let attribute_rows = sqlx::query_as::<_, ArtifactAttributeRow>(
                r#"
                SELECT attr.hash, attr.key, attr.value
                FROM artifact_attributes attr
                JOIN artifacts a ON a.hash = attr.hash
                WHERE a.kind = ?
                "#,
            )
            .bind(kind.as_str())
            .fetch_all(&mut *conn)
            .await?;

            let mut attributes: HashMap<String, BTreeMap<String, String>> = HashMap::new();
            for attr in attribute_rows {
                attributes
                    .entry(attr.hash)
                    .or_default()
                    .insert(attr.key, attr.value);
            }

            rows.into_iter()
                .map(|row| {
                    let attrs = attributes.remove(&row.hash).unwrap_or_default();
                    row.into_artifact(attrs)
                })
                .collect()
        }

        async fn append_attributes(
            &self,
            hash: &ArtifactHash,
            attributes: &BTreeMap<String, String>,
        ) -> MetadataResult<u64> {
            validate_attributes(attributes)?;
            let hash_hex = hash.to_hex();
            let mut tx = self.pool.begin().await?;
            ensure_owner(&mut tx, &hash_hex, owner).await?;

            let mut added = 0;
            for (key, value) in attributes {
                let result = sqlx::query(
                    "INSERT INTO artifact_attributes (hash, key, value) VALUES (?, ?, ?) ON CONFLICT(hash, key) DO NOTHING",
                )
                .bind(&hash_hex)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
                added += result.rows_affected();
            }

            tx.commit().await?;
            Ok(added)
        }
    }

    #[async_trait]
    impl SearchRepo for SqliteStore {
        async fn index_artifact(
            &self,
            name: &str,
            created_at: OffsetDateTime,
            hash: &ArtifactHash,
        ) -> MetadataResult<()> {
            sqlx::query("INSERT INTO search_index (name, created_at_ns, hash) VALUES (?, ?, ?)")
                .bind(name)
                .bind(to_db_nanos(created_at))
                .bind(hash.to_hex())
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn search_by_prefix(&self, query: &str) -> MetadataResult<Vec<SearchHit>> {
            // Seek to the first name >= query, then keep rows while the prefix matches.
            let rows = sqlx::query_as::<_, SearchEntryRow>(
                r#"
                SELECT * FROM search_index
                WHERE name >= ?1 AND substr(name, 1, length(?1)) = ?1
                ORDER BY name, created_at_ns, entry_id
                "#,
            )
            .bind(query)
            .fetch_all(&self.pool)
            .await?;

            Ok(rows
                .into_iter()
                .map(|row| SearchHit {
                    name: row.name,
                    hash: row.hash,
                    created_at_ns: row.created_at_ns,
                })
                .collect())
        }

        async fn last_hash(&self, name: &str) -> MetadataResult<ArtifactHash> {
            let hash = sqlx::query_scalar::<_, String>(
                "SELECT hash FROM search_index WHERE name = ? ORDER BY created_at_ns DESC, entry_id DESC LIMIT 1",
            )
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("no versions of {name}")))?;
            Ok(ArtifactHash::from_hex(&hash)?)
        }
    }

    #[async_trait]
    impl QuotaRepo for SqliteStore {
        async fn get_quota(&self, owner: &str) -> MetadataResult<QuotaRow> {
            let row = sqlx::query_as::<_, QuotaRow>("SELECT * FROM quotas WHERE owner = ?")
                .bind(owner)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row.unwrap_or_else(|| QuotaRow {
                owner: owner.to_string(),
                limit_bytes: self.default_quota_bytes,
                used_bytes: 0,
                updated_at: OffsetDateTime::now_utc(),
            }))
        }

        async fn set_quota(&self, owner: &str, limit_bytes: i64) -> MetadataResult<QuotaRow> {
            if limit_bytes < 0 {
                return Err(MetadataError::Constraint(format!(
                    "quota limit must be non-negative, got {limit_bytes}"
                )));
            }
            let now = OffsetDateTime::now_utc();
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                r#"
                INSERT INTO quotas (owner, limit_bytes, used_bytes, updated_at) VALUES (?, ?, 0, ?)
                ON CONFLICT(owner) DO UPDATE SET
                    limit_bytes = excluded.limit_bytes,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(owner)
            .bind(limit_bytes)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            let row = fetch_quota_row(&mut tx, owner).await?;
            tx.commit().await?;
            Ok(row)
        }

        async fn adjust_usage(&self, owner: &str, delta: i64) -> MetadataResult<QuotaRow> {
            let now = OffsetDateTime::now_utc();
            let mut tx = self.pool.begin().await?;
            ensure_quota_row(&mut tx, owner, self.default_quota_bytes, now).await?;
            apply_usage_delta(&mut tx, owner, delta, now).await?;
            let row = fetch_quota_row(&mut tx, owner).await?;
            tx.commit().await?;
            Ok(row)
        }

        async fn reserve_quota(&self, owner: &str, bytes: u64) -> MetadataResult<QuotaRow> {
            let now = OffsetDateTime::now_utc();
            let mut tx = self.pool.begin().await?;
            ensure_quota_row(&mut tx, owner, self.default_quota_bytes, now).await?;

            let charged = sqlx::query(
                "UPDATE quotas SET used_bytes = used_bytes + ?1, updated_at = ?2 WHERE owner = ?3 AND limit_bytes - used_bytes >= ?1",
            )
            .bind(to_db_bytes(bytes))
            .bind(now)
            .bind(owner)
            .execute(&mut *tx)
            .await?;

            let row = fetch_quota_row(&mut tx, owner).await?;
            if charged.rows_affected() == 0 {
                return Err(MetadataError::QuotaExceeded {
                    owner: owner.to_string(),
                    requested: bytes,
                    available: row.left(),
                });
            }

            tx.commit().await?;
            Ok(row)
        }

        async fn release_quota(&self, owner: &str, bytes: u64) -> MetadataResult<QuotaRow> {
            self.adjust_usage(owner, -to_db_bytes(bytes)).await
        }

        async fn recompute_usage(&self) -> MetadataResult<Vec<UsageCorrection>> {
            let now = OffsetDateTime::now_utc();
            let mut tx = self.pool.begin().await?;

            // "WHERE true" keeps SQLite from parsing ON CONFLICT as a join constraint.
            sqlx::query(
                r#"
                INSERT INTO quotas (owner, limit_bytes, used_bytes, updated_at)
                SELECT DISTINCT owner, ?, 0, ? FROM artifacts WHERE true
                ON CONFLICT(owner) DO NOTHING
                "#,
            )
            .bind(self.default_quota_bytes)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            let rows: Vec<(String, i64, i64)> = sqlx::query_as(
                r#"
                SELECT q.owner, q.used_bytes,
                       COALESCE((SELECT SUM(a.size_bytes) FROM artifacts a WHERE a.owner = q.owner), 0)
                FROM quotas q
                ORDER BY q.owner
                "#,
            )
            .fetch_all(&mut *tx)
            .await?;

            let mut corrections = Vec::new();
            for (owner, recorded, actual) in rows {
                if recorded == actual {
                    continue;
                }
                sqlx::query("UPDATE quotas SET used_bytes = ?, updated_at = ? WHERE owner = ?")
                    .bind(actual)
                    .bind(now)
                    .bind(&owner)
                    .execute(&mut *tx)
                    .await?;
                corrections.push(UsageCorrection {
                    owner,
                    recorded: from_db_bytes(recorded),
                    actual: from_db_bytes(actual),
                });
            }

            tx.commit().await?;
            Ok(corrections)
        }
    }

    #[async_trait]
    impl ScopeRepo for SqliteStore {
        async fn check_owner(&self, identity: &str, hash: &ArtifactHash) -> MetadataResult<bool> {
            let owned = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM artifacts WHERE hash = ? AND owner = ?)",
            )
            .bind(hash.to_hex())
            .bind(identity)
            .fetch_one(&self.pool)
            .await?;
            Ok(owned)
        }

        async fn share_with(
            &self,
            hash: &ArtifactHash,
            owner: &str,
            grantee: &str,
        ) -> MetadataResult<bool> {
            let hash_hex = hash.to_hex();
            let mut tx = self.pool.begin().await?;
            ensure_owner(&mut tx, &hash_hex, owner).await?;

            let result = sqlx::query(
                r#"
                INSERT INTO artifact_scopes (hash, grantee, granted_by, granted_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(hash, grantee) DO NOTHING
                "#,
            )
            .bind(&hash_hex)
            .bind(grantee)
            .bind(owner)
            .bind(OffsetDateTime::now_utc())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(result.rows_affected() > 0)
        }

        async fn unshare_with(
            &self,
            hash: &ArtifactHash,
            owner: &str,
            grantee: &str,
        ) -> MetadataResult<bool> {
            let hash_hex = hash.to_hex();
            let mut tx = self.pool.begin().await?;
            ensure_owner(&mut tx, &hash_hex, owner).await?;

            let result = sqlx::query("DELETE FROM artifact_scopes WHERE hash = ? AND grantee = ?")
                .bind(&hash_hex)
                .bind(grantee)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(result.rows_affected() > 0)
        }

        async fn get_scope(&self, hash: &ArtifactHash, _owner: &str) -> MetadataResult<Vec<String>> {
            let grantees = sqlx::query_scalar::<_, String>(
                "SELECT grantee FROM artifact_scopes WHERE hash = ? ORDER BY grantee",
            )
            .bind(hash.to_hex())
            .fetch_all(&self.pool)
            .await?;
            Ok(grantees)
        }

        async fn can_access(
            &self,
            identity: Option<&str>,
            hash: &ArtifactHash,
        ) -> MetadataResult<bool> {
            let row: Option<(String, i64, bool)> = sqlx::query_as(
                r#"
                SELECT a.owner,
                       (SELECT COUNT(*) FROM artifact_scopes s WHERE s.hash = a.hash),
                       EXISTS(SELECT 1 FROM artifact_scopes s WHERE s.hash = a.hash AND s.grantee = ?)
                FROM artifacts a
                WHERE a.hash = ?
                "#,
            )
            .bind(identity.unwrap_or_default())
            .bind(hash.to_hex())
            .fetch_optional(&self.pool)
            .await?;

            Ok(match (row, identity) {
                (None, _) => false,
                (Some((_, 0, _)), _) => true,
                (Some(_), None) => false,
                (Some((owner, _, granted)), Some(identity)) => granted || owner == identity,
            })
        }
    }

    #[async_trait]
    impl TokenRepo for SqliteStore {
        async fn create_token(&self, token: &TokenRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO tokens (
                    token_id, identity, token_hash, expires_at,
                    revoked_at, created_at, last_used_at, description
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(token.token_id)
            .bind(&token.identity)
            .bind(&token.token_hash)
            .bind(token.expires_at)
            .bind(token.revoked_at)
            .bind(token.created_at)
            .bind(token.last_used_at)
            .bind(&token.description)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<TokenRow>> {
            let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE token_hash = ?")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn touch_token(&self, token_id: Uuid, used_at: OffsetDateTime) -> MetadataResult<()> {
            sqlx::query("UPDATE tokens SET last_used_at = ? WHERE token_id = ?")
                .bind(used_at)
                .bind(token_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn revoke_token(
            &self,
            token_id: Uuid,
            revoked_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query(
                "UPDATE tokens SET revoked_at = ? WHERE token_id = ? AND revoked_at IS NULL",
            )
            .bind(revoked_at)
            .bind(token_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn list_tokens_for_identity(&self, identity: &str) -> MetadataResult<Vec<TokenRow>> {
            let rows = sqlx::query_as::<_, TokenRow>(
                "SELECT * FROM tokens WHERE identity = ? ORDER BY created_at DESC",
            )
            .bind(identity)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Artifact records, keyed by the hex content hash
CREATE TABLE IF NOT EXISTS artifacts (
    hash TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    owner TEXT NOT NULL,
    kind TEXT NOT NULL,
    size_bytes INTEGER NOT NULL CHECK (size_bytes >= 0),
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_artifacts_owner ON artifacts(owner);
CREATE INDEX IF NOT EXISTS idx_artifacts_kind ON artifacts(kind, name);

-- Extension attributes
CREATE TABLE IF NOT EXISTS artifact_attributes (
    hash TEXT NOT NULL REFERENCES artifacts(hash) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (hash, key)
);

-- Search index: append-only (name, timestamp, hash) entries, pruned on delete
CREATE TABLE IF NOT EXISTS search_index (
    entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    created_at_ns INTEGER NOT NULL,
    hash TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_search_name ON search_index(name, created_at_ns, entry_id);
CREATE INDEX IF NOT EXISTS idx_search_hash ON search_index(hash);

-- Quota ledger
CREATE TABLE IF NOT EXISTS quotas (
    owner TEXT PRIMARY KEY,
    limit_bytes INTEGER NOT NULL CHECK (limit_bytes >= 0),
    used_bytes INTEGER NOT NULL DEFAULT 0 CHECK (used_bytes >= 0),
    updated_at TEXT NOT NULL
);

-- Read grants
CREATE TABLE IF NOT EXISTS artifact_scopes (
    hash TEXT NOT NULL REFERENCES artifacts(hash) ON DELETE CASCADE,
    grantee TEXT NOT NULL,
    granted_by TEXT NOT NULL,
    granted_at TEXT NOT NULL,
    PRIMARY KEY (hash, grantee)
);

-- API tokens
CREATE TABLE IF NOT EXISTS tokens (
    token_id BLOB PRIMARY KEY,
    identity TEXT NOT NULL,
    token_hash TEXT NOT NULL UNIQUE,
    expires_at TEXT,
    revoked_at TEXT,
    created_at TEXT NOT NULL,
    last_used_at TEXT,
    description TEXT
);
CREATE INDEX IF NOT EXISTS idx_tokens_identity ON tokens(identity);
"#;
