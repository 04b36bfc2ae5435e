//! `PostgreSQL` account repository.

use super::{AccountRepository, Result};
use crate::types::Account;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dentalbook_auth::Role;
use dentalbook_postgres::RepositoryError;
use sqlx::PgPool;

const COLUMNS: &str =
    "id, email, password_hash, name, surname, role, active, profile_complete, last_login, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: i64,
    email: String,
    password_hash: String,
    name: String,
    surname: String,
    role: String,
    active: bool,
    profile_complete: bool,
    last_login: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = RepositoryError;

    fn try_from(row: AccountRow) -> std::result::Result<Self, Self::Error> {
        let role: Role = row
            .role
            .parse()
            .map_err(|e| RepositoryError::Corrupt(format!("account {}: {e}", row.id)))?;
        Ok(Self {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            name: row.name,
            surname: row.surname,
            role,
            active: row.active,
            profile_complete: row.profile_complete,
            last_login: row.last_login,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Accounts in `PostgreSQL`.
#[derive(Clone, Debug)]
pub struct PostgresAccountRepository {
    pool: PgPool,
}

impl PostgresAccountRepository {
    /// Create a repository over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the service migrations.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Migration failed: {e}")))
    }
}

#[async_trait]
impl AccountRepository for PostgresAccountRepository {
    async fn next_id(&self) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as("SELECT nextval(pg_get_serial_sequence('accounts', 'id'))")
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn find(&self, id: i64) -> Result<Option<Account>> {
        let row: Option<AccountRow> = sqlx::query_as(&format!("SELECT {COLUMNS} FROM accounts WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Account::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let row: Option<AccountRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM accounts WHERE email = $1"))
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Account::try_from).transpose()
    }

    async fn insert(&self, account: &Account) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO accounts ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(account.id)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(&account.name)
        .bind(&account.surname)
        .bind(account.role.as_str())
        .bind(account.active)
        .bind(account.profile_complete)
        .bind(account.last_login)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r"
            UPDATE accounts SET
                password_hash = $2, name = $3, surname = $4, role = $5, active = $6,
                profile_complete = $7, last_login = $8, updated_at = $9
            WHERE id = $1
            ",
        )
        .bind(account.id)
        .bind(&account.password_hash)
        .bind(&account.name)
        .bind(&account.surname)
        .bind(account.role.as_str())
        .bind(account.active)
        .bind(account.profile_complete)
        .bind(account.last_login)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<Account>> {
        let rows: Vec<AccountRow> = sqlx::query_as(&format!("SELECT {COLUMNS} FROM accounts ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Account::try_from).collect()
    }

    async fn ping(&self) -> bool {
        dentalbook_postgres::ping(&self.pool).await
    }
}
