//! PostgreSQL Token Store
//!
//! `sqlx` adapter over the schema in `migrations/`. Pair writes, cascades and
//! rotation each run in one transaction. The refresh row is deleted
//! explicitly alongside its access token rather than relying on the foreign
//! key alone.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};

use crate::error::{OAuth2Error, StorageError};
use crate::token::{PurgeReport, TokenStore};
use crate::types::{
    token_prefix, AccessToken, RefreshToken, RotationRecord, TokenEntity, TokenOwner, TokenPair,
};

/// Schema migrations for the token and registry tables, in order.
pub const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_oauth_tokens",
        include_str!("../../migrations/0001_oauth_tokens.sql"),
    ),
    (
        "0002_widen_token_columns",
        include_str!("../../migrations/0002_widen_token_columns.sql"),
    ),
];

/// Token store backed by PostgreSQL.
#[derive(Clone)]
pub struct PostgresTokenStore {
    pool: PgPool,
}

impl PostgresTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a small default pool.
    pub async fn connect(database_url: &str) -> Result<Self, OAuth2Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| backend("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create or upgrade the token and registry tables. Every migration is
    /// safe to re-run.
    pub async fn migrate(&self) -> Result<(), OAuth2Error> {
        for &(name, sql) in MIGRATIONS {
            sqlx::raw_sql(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| backend(&format!("migrate {}", name), e))?;
            tracing::debug!(migration = %name, "applied migration");
        }
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_access_token(&self, row: AccessTokenRow) -> Result<AccessToken, OAuth2Error> {
        let scopes = sqlx::query_scalar::<_, String>(
            "SELECT scope_id FROM oauth_access_token_scopes WHERE access_token = $1",
        )
        .bind(&row.token)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend("load scopes", e))?;

        Ok(AccessToken::new(
            row.token,
            row.client_id,
            row.user_id,
            scopes,
            row.created_at,
            row.expires_at,
        ))
    }
}

#[derive(sqlx::FromRow)]
struct AccessTokenRow {
    token: String,
    client_id: String,
    user_id: Option<String>,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct RefreshTokenRow {
    access_token: String,
    token: String,
    expires: i64,
    created_at: DateTime<Utc>,
}

impl RefreshTokenRow {
    fn into_token(self) -> Result<RefreshToken, OAuth2Error> {
        let expires_at = DateTime::<Utc>::from_timestamp(self.expires, 0).ok_or_else(|| {
            OAuth2Error::Storage(StorageError::Backend {
                message: format!("refresh token expiry {} out of range", self.expires),
            })
        })?;
        Ok(RefreshToken::new(
            self.token,
            self.access_token,
            self.created_at,
            expires_at,
        ))
    }
}

#[derive(sqlx::FromRow)]
struct RotationRow {
    token: String,
    successor_access_token: String,
    successor_refresh_token: String,
    rotated_at: DateTime<Utc>,
}

impl From<RotationRow> for RotationRecord {
    fn from(row: RotationRow) -> Self {
        Self {
            refresh_token: row.token,
            successor_access_token: row.successor_access_token,
            successor_refresh_token: row.successor_refresh_token,
            rotated_at: row.rotated_at,
        }
    }
}

const SELECT_REFRESH: &str =
    "SELECT access_token, token, expires, created_at FROM oauth_refresh_tokens";

pub(crate) fn backend(context: &str, e: sqlx::Error) -> OAuth2Error {
    OAuth2Error::Storage(StorageError::Backend {
        message: format!("{}: {}", context, e),
    })
}

/// Map an insert failure: unique violations are conflicts, foreign key
/// violations come from `on_missing_parent`.
fn insert_error(
    e: sqlx::Error,
    id: &str,
    on_missing_parent: impl FnOnce() -> OAuth2Error,
) -> OAuth2Error {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return OAuth2Error::Storage(StorageError::Conflict { id: id.to_string() });
        }
        if db.is_foreign_key_violation() {
            return on_missing_parent();
        }
    }
    backend("insert", e)
}

async fn insert_access(conn: &mut PgConnection, token: &AccessToken) -> Result<(), OAuth2Error> {
    sqlx::query(
        r#"
        INSERT INTO oauth_access_tokens (token, client_id, user_id, expires_at, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(token.identifier())
    .bind(token.client_id())
    .bind(token.user_id())
    .bind(token.expires_at())
    .bind(token.created_at())
    .bind(token.updated_at())
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        insert_error(e, token.identifier(), || {
            OAuth2Error::Storage(StorageError::Backend {
                message: "access token insert violated a foreign key".to_string(),
            })
        })
    })?;

    for scope in token.scopes() {
        sqlx::query("INSERT INTO oauth_access_token_scopes (access_token, scope_id) VALUES ($1, $2)")
            .bind(token.identifier())
            .bind(scope)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                insert_error(e, token.identifier(), || {
                    OAuth2Error::Storage(StorageError::Backend {
                        message: format!("scope {:?} is not registered", scope),
                    })
                })
            })?;
    }
    Ok(())
}

async fn insert_refresh(conn: &mut PgConnection, token: &RefreshToken) -> Result<(), OAuth2Error> {
    sqlx::query(
        r#"
        INSERT INTO oauth_refresh_tokens (access_token, token, expires, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(token.access_token_id())
    .bind(token.identifier())
    .bind(token.expires_at().timestamp())
    .bind(token.created_at())
    .bind(token.updated_at())
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        insert_error(e, token.identifier(), || {
            OAuth2Error::Storage(StorageError::MissingParent {
                access_token: token.access_token_id().to_string(),
            })
        })
    })?;
    Ok(())
}

/// Delete an access token, its scopes and its refresh token. Returns whether
/// the access token existed.
async fn delete_access_cascade(conn: &mut PgConnection, id: &str) -> Result<bool, OAuth2Error> {
    sqlx::query("DELETE FROM oauth_refresh_tokens WHERE access_token = $1")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| backend("delete refresh token", e))?;
    sqlx::query("DELETE FROM oauth_access_token_scopes WHERE access_token = $1")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| backend("delete scopes", e))?;
    let result = sqlx::query("DELETE FROM oauth_access_tokens WHERE token = $1")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| backend("delete access token", e))?;
    Ok(result.rows_affected() > 0)
}

fn not_found(id: &str) -> OAuth2Error {
    OAuth2Error::Storage(StorageError::NotFound { id: id.to_string() })
}

#[async_trait]
impl TokenStore for PostgresTokenStore {
    async fn put_access_token(&self, token: AccessToken) -> Result<(), OAuth2Error> {
        let mut tx = self.pool.begin().await.map_err(|e| backend("begin", e))?;
        insert_access(&mut tx, &token).await?;
        tx.commit().await.map_err(|e| backend("commit", e))?;
        tracing::debug!(access_token = token_prefix(token.identifier()), "stored access token");
        Ok(())
    }

    async fn put_refresh_token(&self, token: RefreshToken) -> Result<(), OAuth2Error> {
        let mut conn = self.pool.acquire().await.map_err(|e| backend("acquire", e))?;
        insert_refresh(&mut conn, &token).await?;
        tracing::debug!(refresh_token = token_prefix(token.identifier()), "stored refresh token");
        Ok(())
    }

    async fn put_pair(&self, pair: TokenPair) -> Result<(), OAuth2Error> {
        let mut tx = self.pool.begin().await.map_err(|e| backend("begin", e))?;
        insert_access(&mut tx, &pair.access_token).await?;
        insert_refresh(&mut tx, &pair.refresh_token).await?;
        tx.commit().await.map_err(|e| backend("commit", e))?;
        tracing::debug!(
            access_token = token_prefix(pair.access_token.identifier()),
            "stored token pair"
        );
        Ok(())
    }

    async fn get_access_token(&self, id: &str) -> Result<AccessToken, OAuth2Error> {
        let row = sqlx::query_as::<_, AccessTokenRow>(
            r#"
            SELECT token, client_id, user_id, expires_at, created_at
            FROM oauth_access_tokens
            WHERE token = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("get access token", e))?
        .ok_or_else(|| not_found(id))?;

        self.load_access_token(row).await
    }

    async fn get_refresh_token(&self, id: &str) -> Result<RefreshToken, OAuth2Error> {
        sqlx::query_as::<_, RefreshTokenRow>(&format!("{} WHERE token = $1", SELECT_REFRESH))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("get refresh token", e))?
            .ok_or_else(|| not_found(id))?
            .into_token()
    }

    async fn get_refresh_token_for_access(
        &self,
        access_token_id: &str,
    ) -> Result<Option<RefreshToken>, OAuth2Error> {
        sqlx::query_as::<_, RefreshTokenRow>(&format!("{} WHERE access_token = $1", SELECT_REFRESH))
            .bind(access_token_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("get refresh token", e))?
            .map(RefreshTokenRow::into_token)
            .transpose()
    }

    async fn delete_access_token(&self, id: &str) -> Result<(), OAuth2Error> {
        let mut tx = self.pool.begin().await.map_err(|e| backend("begin", e))?;
        if !delete_access_cascade(&mut tx, id).await? {
            return Err(not_found(id));
        }
        tx.commit().await.map_err(|e| backend("commit", e))?;
        tracing::debug!(access_token = token_prefix(id), "deleted access token");
        Ok(())
    }

    async fn delete_refresh_token(&self, id: &str) -> Result<(), OAuth2Error> {
        let result = sqlx::query("DELETE FROM oauth_refresh_tokens WHERE token = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| backend("delete refresh token", e))?;
        if result.rows_affected() == 0 {
            return Err(not_found(id));
        }
        tracing::debug!(refresh_token = token_prefix(id), "deleted refresh token");
        Ok(())
    }

    async fn rotate_pair(
        &self,
        old_refresh_id: &str,
        new_pair: TokenPair,
        rotated_at: DateTime<Utc>,
    ) -> Result<RefreshToken, OAuth2Error> {
        let mut tx = self.pool.begin().await.map_err(|e| backend("begin", e))?;

        // The DELETE takes the row lock; a concurrent rotation blocks here and
        // then finds nothing to delete.
        let old = sqlx::query_as::<_, RefreshTokenRow>(
            "DELETE FROM oauth_refresh_tokens WHERE token = $1 \
             RETURNING access_token, token, expires, created_at",
        )
        .bind(old_refresh_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| backend("consume refresh token", e))?
        .ok_or_else(|| not_found(old_refresh_id))?
        .into_token()?;

        delete_access_cascade(&mut tx, old.access_token_id()).await?;
        insert_access(&mut tx, &new_pair.access_token).await?;
        insert_refresh(&mut tx, &new_pair.refresh_token).await?;

        sqlx::query(
            r#"
            INSERT INTO oauth_refresh_token_rotations
                (token, successor_access_token, successor_refresh_token, rotated_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(old.identifier())
        .bind(new_pair.access_token.identifier())
        .bind(new_pair.refresh_token.identifier())
        .bind(rotated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| insert_error(e, old.identifier(), || backend_message("rotation record")))?;

        tx.commit().await.map_err(|e| backend("commit", e))?;
        tracing::debug!(refresh_token = token_prefix(old_refresh_id), "rotated token pair");
        Ok(old)
    }

    async fn find_rotation(&self, refresh_id: &str) -> Result<Option<RotationRecord>, OAuth2Error> {
        let row = sqlx::query_as::<_, RotationRow>(
            r#"
            SELECT token, successor_access_token, successor_refresh_token, rotated_at
            FROM oauth_refresh_token_rotations
            WHERE token = $1
            "#,
        )
        .bind(refresh_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("find rotation", e))?;
        Ok(row.map(RotationRecord::from))
    }

    async fn access_token_ids_for(&self, owner: &TokenOwner) -> Result<Vec<String>, OAuth2Error> {
        let (sql, value) = match owner {
            TokenOwner::Client(client_id) => (
                "SELECT token FROM oauth_access_tokens WHERE client_id = $1 ORDER BY token",
                client_id,
            ),
            TokenOwner::Subject(user_id) => (
                "SELECT token FROM oauth_access_tokens WHERE user_id = $1 ORDER BY token",
                user_id,
            ),
        };
        sqlx::query_scalar::<_, String>(sql)
            .bind(value)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| backend("list access tokens", e))
    }

    async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        rotations_before: DateTime<Utc>,
    ) -> Result<PurgeReport, OAuth2Error> {
        let mut tx = self.pool.begin().await.map_err(|e| backend("begin", e))?;
        let mut report = PurgeReport::default();

        report.refresh_tokens = sqlx::query("DELETE FROM oauth_refresh_tokens WHERE expires < $1")
            .bind(now.timestamp())
            .execute(&mut *tx)
            .await
            .map_err(|e| backend("purge refresh tokens", e))?
            .rows_affected();

        // an expired access token stays while its refresh token can still rotate
        sqlx::query(
            "DELETE FROM oauth_access_token_scopes WHERE access_token IN \
             (SELECT a.token FROM oauth_access_tokens a WHERE a.expires_at < $1 \
              AND NOT EXISTS (SELECT 1 FROM oauth_refresh_tokens r WHERE r.access_token = a.token))",
        )
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| backend("purge scopes", e))?;

        report.access_tokens = sqlx::query(
            "DELETE FROM oauth_access_tokens a WHERE a.expires_at < $1 \
             AND NOT EXISTS (SELECT 1 FROM oauth_refresh_tokens r WHERE r.access_token = a.token)",
        )
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| backend("purge access tokens", e))?
        .rows_affected();

        report.rotation_records =
            sqlx::query("DELETE FROM oauth_refresh_token_rotations WHERE rotated_at < $1")
                .bind(rotations_before)
                .execute(&mut *tx)
                .await
                .map_err(|e| backend("purge rotation records", e))?
                .rows_affected();

        tx.commit().await.map_err(|e| backend("commit", e))?;
        Ok(report)
    }

    async fn count(&self) -> Result<(usize, usize), OAuth2Error> {
        let access = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM oauth_access_tokens")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| backend("count", e))?;
        let refresh = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM oauth_refresh_tokens")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| backend("count", e))?;
        Ok((access as usize, refresh as usize))
    }
}

fn backend_message(what: &str) -> OAuth2Error {
    OAuth2Error::Storage(StorageError::Backend {
        message: format!("{} violated a foreign key", what),
    })
}
