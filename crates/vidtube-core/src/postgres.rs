//! PostgreSQL credential store
//!
//! Conditional writes are single `UPDATE ... WHERE` statements so the
//! database row lock provides the atomicity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use uuid::Uuid;

use crate::store::CredentialStore;
use crate::{normalize_identifier, CoreError, NewPrincipal, Principal, ResetTicket, Result};

macro_rules! select_principal {
    ($tail:literal) => {
        concat!(
            "SELECT id, username, email, full_name, avatar, cover_image, password_hash, \
             refresh_token, reset_token_hash, reset_token_expires_at, created_at, updated_at \
             FROM users ",
            $tail
        )
    };
}

/// PostgreSQL-backed `CredentialStore`
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    /// Create a new store connection
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| CoreError::DatabaseError(format!("PostgreSQL connection failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CoreError::DatabaseError(format!("Migration failed: {e}")))
    }
}

/// User row from database
#[derive(Debug, FromRow)]
struct PrincipalRow {
    id: Uuid,
    username: String,
    email: String,
    full_name: String,
    avatar: String,
    cover_image: Option<String>,
    password_hash: String,
    refresh_token: Option<String>,
    reset_token_hash: Option<String>,
    reset_token_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PrincipalRow> for Principal {
    fn from(row: PrincipalRow) -> Self {
        let reset_ticket = match (row.reset_token_hash, row.reset_token_expires_at) {
            (Some(token_hash), Some(expires_at)) => Some(ResetTicket {
                token_hash,
                expires_at,
            }),
            _ => None,
        };

        Principal {
            id: row.id,
            username: row.username,
            email: row.email,
            full_name: row.full_name,
            avatar: row.avatar,
            cover_image: row.cover_image,
            password_hash: row.password_hash,
            refresh_token: row.refresh_token,
            reset_ticket,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn db_error(e: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return CoreError::Conflict("username or email already exists".to_string());
        }
    }
    CoreError::DatabaseError(e.to_string())
}

fn expect_row(rows_affected: u64, id: Uuid) -> Result<()> {
    if rows_affected == 0 {
        Err(CoreError::NotFound(format!("principal {id}")))
    } else {
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_username_or_email(&self, identifier: &str) -> Result<Option<Principal>> {
        let identifier = normalize_identifier(identifier);
        let row = sqlx::query_as::<_, PrincipalRow>(select_principal!(
            "WHERE username = $1 OR email = $1 LIMIT 1"
        ))
        .bind(&identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(Principal::from))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>> {
        let email = normalize_identifier(email);
        let row = sqlx::query_as::<_, PrincipalRow>(select_principal!("WHERE email = $1"))
            .bind(&email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(row.map(Principal::from))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>> {
        let row = sqlx::query_as::<_, PrincipalRow>(select_principal!("WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(row.map(Principal::from))
    }

    async fn create(&self, principal: NewPrincipal) -> Result<Principal> {
        let principal = principal.into_principal();

        let row = sqlx::query_as::<_, PrincipalRow>(
            r#"
            INSERT INTO users (
                id, username, email, full_name, avatar, cover_image,
                password_hash, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, username, email, full_name, avatar, cover_image, password_hash,
                      refresh_token, reset_token_hash, reset_token_expires_at,
                      created_at, updated_at
            "#,
        )
        .bind(principal.id)
        .bind(&principal.username)
        .bind(&principal.email)
        .bind(&principal.full_name)
        .bind(&principal.avatar)
        .bind(&principal.cover_image)
        .bind(&principal.password_hash)
        .bind(principal.created_at)
        .bind(principal.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.into())
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(password_hash)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;

        expect_row(result.rows_affected(), id)
    }

    async fn update_refresh_slot(&self, id: Uuid, token: Option<&str>) -> Result<()> {
        let result =
            sqlx::query("UPDATE users SET refresh_token = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(token)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;

        expect_row(result.rows_affected(), id)
    }

    async fn compare_and_swap_refresh(
        &self,
        id: Uuid,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET refresh_token = $3, updated_at = NOW()
            WHERE id = $1 AND refresh_token IS NOT DISTINCT FROM $2::TEXT
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(new)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        // Distinguish a lost race from a principal that no longer exists
        match self.find_by_id(id).await? {
            Some(_) => Ok(false),
            None => Err(CoreError::NotFound(format!("principal {id}"))),
        }
    }

    async fn update_reset_token(&self, id: Uuid, ticket: Option<&ResetTicket>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET reset_token_hash = $2, reset_token_expires_at = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(ticket.map(|t| t.token_hash.as_str()))
        .bind(ticket.map(|t| t.expires_at))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        expect_row(result.rows_affected(), id)
    }

    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Principal>> {
        let row = sqlx::query_as::<_, PrincipalRow>(select_principal!(
            "WHERE reset_token_hash = $1 AND reset_token_expires_at > $2"
        ))
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(Principal::from))
    }

    async fn complete_password_reset(
        &self,
        id: Uuid,
        token_hash: &str,
        password_hash: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $3,
                reset_token_hash = NULL,
                reset_token_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND reset_token_hash = $2
            "#,
        )
        .bind(id)
        .bind(token_hash)
        .bind(password_hash)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn purge_expired_reset_tokens(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET reset_token_hash = NULL, reset_token_expires_at = NULL
            WHERE reset_token_expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected())
    }
}
