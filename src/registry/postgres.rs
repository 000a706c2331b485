//! PostgreSQL Registries
//!
//! Scope and client registries over the `oauth_scopes`, `oauth_clients` and
//! `oauth_client_scopes` tables. Tokens stored by
//! [`PostgresTokenStore`](crate::token::PostgresTokenStore) reference these
//! scopes by foreign key, so both must share a database.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::{ConfigurationError, OAuth2Error, StorageError};
use crate::registry::scope::check_scope_id;
use crate::registry::{ClientRegistry, ScopeRegistry};
use crate::token::postgres::backend;
use crate::types::{Client, Scope};

#[derive(sqlx::FromRow)]
struct ScopeRow {
    id: String,
    description: Option<String>,
}

impl From<ScopeRow> for Scope {
    fn from(row: ScopeRow) -> Self {
        Self {
            id: row.id,
            description: row.description,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ClientRow {
    id: String,
    name: Option<String>,
    secret_hash: Option<Vec<u8>>,
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

/// Scope registry backed by PostgreSQL.
#[derive(Clone)]
pub struct PostgresScopeRegistry {
    pool: PgPool,
}

impl PostgresScopeRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScopeRegistry for PostgresScopeRegistry {
    async fn get_scope(&self, id: &str) -> Result<Option<Scope>, OAuth2Error> {
        let row = sqlx::query_as::<_, ScopeRow>(
            "SELECT id, description FROM oauth_scopes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("get scope", e))?;
        Ok(row.map(Scope::from))
    }

    async fn register_scope(&self, scope: Scope) -> Result<(), OAuth2Error> {
        check_scope_id(&scope.id)?;

        sqlx::query("INSERT INTO oauth_scopes (id, description) VALUES ($1, $2)")
            .bind(&scope.id)
            .bind(&scope.description)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    OAuth2Error::Storage(StorageError::Conflict {
                        id: scope.id.clone(),
                    })
                } else {
                    backend("register scope", e)
                }
            })?;

        tracing::debug!(scope = %scope.id, "registered scope");
        Ok(())
    }

    async fn list_scopes(&self) -> Result<Vec<Scope>, OAuth2Error> {
        let rows = sqlx::query_as::<_, ScopeRow>(
            "SELECT id, description FROM oauth_scopes ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend("list scopes", e))?;
        Ok(rows.into_iter().map(Scope::from).collect())
    }
}

/// Client registry backed by PostgreSQL.
///
/// A client's allowed scopes must already be registered.
#[derive(Clone)]
pub struct PostgresClientRegistry {
    pool: PgPool,
}

impl PostgresClientRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClientRegistry for PostgresClientRegistry {
    async fn get_client(&self, client_id: &str) -> Result<Option<Client>, OAuth2Error> {
        let Some(row) = sqlx::query_as::<_, ClientRow>(
            "SELECT id, name, secret_hash FROM oauth_clients WHERE id = $1",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("get client", e))?
        else {
            return Ok(None);
        };

        let scopes = sqlx::query_scalar::<_, String>(
            "SELECT scope_id FROM oauth_client_scopes WHERE client_id = $1",
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend("load client scopes", e))?;

        Ok(Some(Client::from_stored(
            row.id,
            row.name,
            row.secret_hash,
            scopes,
        )))
    }

    async fn register_client(&self, client: Client) -> Result<(), OAuth2Error> {
        let mut tx = self.pool.begin().await.map_err(|e| backend("begin", e))?;

        sqlx::query("INSERT INTO oauth_clients (id, secret_hash, name) VALUES ($1, $2, $3)")
            .bind(&client.id)
            .bind(client.secret_hash())
            .bind(&client.name)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    OAuth2Error::Storage(StorageError::Conflict {
                        id: client.id.clone(),
                    })
                } else {
                    backend("register client", e)
                }
            })?;

        for scope in &client.allowed_scopes {
            sqlx::query("INSERT INTO oauth_client_scopes (client_id, scope_id) VALUES ($1, $2)")
                .bind(&client.id)
                .bind(scope)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if is_foreign_key_violation(&e) {
                        OAuth2Error::Configuration(ConfigurationError::InvalidConfig {
                            message: format!(
                                "client {} allows unregistered scope {:?}",
                                client.id, scope
                            ),
                        })
                    } else {
                        backend("register client scopes", e)
                    }
                })?;
        }

        tx.commit().await.map_err(|e| backend("commit", e))?;
        tracing::debug!(
            client_id = %client.id,
            confidential = client.is_confidential(),
            "registered client"
        );
        Ok(())
    }
}
