//! `PostgreSQL` profile repository.

use super::{ProfileRepository, Result};
use crate::types::{Page, Pagination, Profile, ProfileFilter};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dentalbook_auth::Role;
use dentalbook_postgres::RepositoryError;
use sqlx::{PgPool, Postgres, QueryBuilder};

const COLUMNS: &str = "id, email, name, surname, role, active, profile_complete, national_id, \
     birth_date, phone, address, last_login, license_number, specialty, years_experience, shift, \
     hire_date, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: i64,
    email: String,
    name: String,
    surname: String,
    role: String,
    active: bool,
    profile_complete: bool,
    national_id: Option<String>,
    birth_date: Option<NaiveDate>,
    phone: Option<String>,
    address: Option<String>,
    last_login: Option<DateTime<Utc>>,
    license_number: Option<String>,
    specialty: Option<String>,
    years_experience: Option<i32>,
    shift: Option<String>,
    hire_date: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = RepositoryError;

    fn try_from(row: ProfileRow) -> std::result::Result<Self, Self::Error> {
        let role: Role = row
            .role
            .parse()
            .map_err(|e| RepositoryError::Corrupt(format!("profile {}: {e}", row.id)))?;
        Ok(Self {
            id: row.id,
            email: row.email,
            name: row.name,
            surname: row.surname,
            role,
            active: row.active,
            profile_complete: row.profile_complete,
            national_id: row.national_id,
            birth_date: row.birth_date,
            phone: row.phone,
            address: row.address,
            last_login: row.last_login,
            license_number: row.license_number,
            specialty: row.specialty,
            years_experience: row.years_experience,
            shift: row.shift,
            hire_date: row.hire_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_profiles(rows: Vec<ProfileRow>) -> Result<Vec<Profile>> {
    rows.into_iter().map(Profile::try_from).collect()
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &ProfileFilter) {
    builder.push(" WHERE TRUE");
    if let Some(role) = filter.role {
        builder.push(" AND role = ").push_bind(role.as_str());
    }
    if let Some(active) = filter.active {
        builder.push(" AND active = ").push_bind(active);
    }
    if let Some(complete) = filter.profile_complete {
        builder.push(" AND profile_complete = ").push_bind(complete);
    }
    if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_"));
        builder
            .push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR surname ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR national_id ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

/// Profiles in `PostgreSQL`.
#[derive(Clone, Debug)]
pub struct PostgresProfileRepository {
    pool: PgPool,
}

impl PostgresProfileRepository {
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
impl ProfileRepository for PostgresProfileRepository {
    async fn find(&self, id: i64) -> Result<Option<Profile>> {
        let row: Option<ProfileRow> = sqlx::query_as(&format!("SELECT {COLUMNS} FROM profiles WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Profile::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Profile>> {
        let row: Option<ProfileRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM profiles WHERE email = $1"))
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Profile::try_from).transpose()
    }

    async fn insert(&self, profile: &Profile) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO profiles ({COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)"
        ))
        .bind(profile.id)
        .bind(&profile.email)
        .bind(&profile.name)
        .bind(&profile.surname)
        .bind(profile.role.as_str())
        .bind(profile.active)
        .bind(profile.profile_complete)
        .bind(&profile.national_id)
        .bind(profile.birth_date)
        .bind(&profile.phone)
        .bind(&profile.address)
        .bind(profile.last_login)
        .bind(&profile.license_number)
        .bind(&profile.specialty)
        .bind(profile.years_experience)
        .bind(&profile.shift)
        .bind(profile.hire_date)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, profile: &Profile, expected: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE profiles SET
                email = $2, name = $3, surname = $4, role = $5, active = $6,
                profile_complete = $7, national_id = $8, birth_date = $9, phone = $10,
                address = $11, last_login = $12, license_number = $13, specialty = $14,
                years_experience = $15, shift = $16, hire_date = $17, updated_at = $18
            WHERE id = $1 AND updated_at = $19
            ",
        )
        .bind(profile.id)
        .bind(&profile.email)
        .bind(&profile.name)
        .bind(&profile.surname)
        .bind(profile.role.as_str())
        .bind(profile.active)
        .bind(profile.profile_complete)
        .bind(&profile.national_id)
        .bind(profile.birth_date)
        .bind(&profile.phone)
        .bind(&profile.address)
        .bind(profile.last_login)
        .bind(&profile.license_number)
        .bind(&profile.specialty)
        .bind(profile.years_experience)
        .bind(&profile.shift)
        .bind(profile.hire_date)
        .bind(profile.updated_at)
        .bind(expected)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list(&self, filter: &ProfileFilter) -> Result<Page<Profile>> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM profiles");
        push_filters(&mut count, filter);
        let (total,): (i64,) = count.build_query_as().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::new(format!("SELECT {COLUMNS} FROM profiles"));
        push_filters(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(i64::from(filter.limit.max(1)))
            .push(" OFFSET ")
            .push_bind(i64::try_from(filter.offset()).unwrap_or(i64::MAX));
        let rows: Vec<ProfileRow> = select.build_query_as().fetch_all(&self.pool).await?;

        Ok(Page {
            items: into_profiles(rows)?,
            pagination: Pagination::new(filter.page, filter.limit, u64::try_from(total).unwrap_or_default()),
        })
    }

    async fn by_role(&self, role: Role, active: bool) -> Result<Vec<Profile>> {
        let rows: Vec<ProfileRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM profiles WHERE role = $1 AND active = $2 ORDER BY name, surname"
        ))
        .bind(role.as_str())
        .bind(active)
        .fetch_all(&self.pool)
        .await?;
        into_profiles(rows)
    }

    async fn ping(&self) -> bool {
        dentalbook_postgres::ping(&self.pool).await
    }
}
