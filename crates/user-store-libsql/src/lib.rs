#[macro_use]
extern crate tracing;

use anyhow::Context as _;
use async_trait::async_trait;
use libsql::{Connection, Value};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use user_store::{
    EmployeeProfile, Gender, Language, PasswordHash, ProfileUpdate, StoreError, User, UserStore,
};
use uuid::Uuid;

#[rustfmt::skip]
pub use libsql;

const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Implementation of [`UserStore`] using libSQL as the backend
///
/// We use the 'user_version' value to store the migration state.
/// It's a very lightweight approach as it is just an integer at a fixed offset in the SQLite file.
/// - <https://sqlite.org/pragma.html#pragma_user_version>
/// - <https://www.sqlite.org/fileformat.html#user_version_number>
pub struct LibSqlUserStore {
    conn: Connection,
}

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE user (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE COLLATE NOCASE,
        first_name TEXT NOT NULL DEFAULT '',
        last_name TEXT NOT NULL DEFAULT '',
        phone_number TEXT,
        date_of_birth TEXT,
        is_active INTEGER NOT NULL DEFAULT 1,
        is_staff INTEGER NOT NULL DEFAULT 0,
        is_superuser INTEGER NOT NULL DEFAULT 0,
        is_verified INTEGER NOT NULL DEFAULT 0,
        date_joined INTEGER NOT NULL,
        last_login INTEGER,
        email_verified_at INTEGER,
        preferred_language TEXT NOT NULL DEFAULT 'en',
        timezone TEXT NOT NULL DEFAULT 'UTC',
        email_notifications INTEGER NOT NULL DEFAULT 1,
        marketing_emails INTEGER NOT NULL DEFAULT 0,
        password_hash TEXT NOT NULL,
        password_changed_at INTEGER,
        failed_login_attempts INTEGER NOT NULL DEFAULT 0,
        account_locked_until INTEGER
    );

    CREATE INDEX user_email_idx ON user (email);
    CREATE INDEX user_active_staff_idx ON user (is_active, is_staff);
    CREATE INDEX user_date_joined_idx ON user (date_joined);
    CREATE INDEX user_last_login_idx ON user (last_login);

    CREATE TABLE employee_profile (
        user_id TEXT PRIMARY KEY REFERENCES user (id) ON DELETE CASCADE,
        national_id TEXT,
        gender TEXT,
        insurance_number TEXT,
        employment_status TEXT,
        contract_months INTEGER NOT NULL DEFAULT 0,
        contract_start_date TEXT
    );",
];

const USER_COLUMNS: &str = "id, email, first_name, last_name, phone_number, date_of_birth,
    is_active, is_staff, is_superuser, is_verified,
    date_joined, last_login, email_verified_at,
    preferred_language, timezone, email_notifications, marketing_emails,
    password_hash, password_changed_at, failed_login_attempts, account_locked_until";

impl LibSqlUserStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    async fn apply_pragmas(&self) -> anyhow::Result<()> {
        // Inspiration was taken from https://briandouglas.ie/sqlite-defaults/
        const PRAGMAS: &str = "
            -- https://www.sqlite.org/pragma.html#pragma_journal_mode
            -- Use a write-ahead log instead of a rollback journal to implement transactions.
            PRAGMA journal_mode = WAL;

            -- https://www.sqlite.org/pragma.html#pragma_synchronous
            -- TLDR: journal_mode WAL + synchronous NORMAL is a good combination.
            PRAGMA synchronous = NORMAL;

            -- https://www.sqlite.org/pragma.html#pragma_busy_timeout
            -- Prevents SQLITE_BUSY errors by giving a timeout to wait for a locked resource before
            -- returning an error, useful for handling multiple concurrent accesses.
            PRAGMA busy_timeout = 15000;

            -- https://www.sqlite.org/pragma.html#pragma_cache_size
            -- Reduce the number of disks reads by allowing more data to be cached in memory (3MB).
            PRAGMA cache_size = -3000;

            -- https://www.sqlite.org/pragma.html#pragma_auto_vacuum
            -- Reclaims disk space gradually as rows are deleted, instead of performing a full vacuum,
            -- reducing performance impact during database operations.
            PRAGMA auto_vacuum = INCREMENTAL;

            -- https://www.sqlite.org/pragma.html#pragma_foreign_keys
            -- Enforce the employee profile to user relation.
            PRAGMA foreign_keys = ON;

            -- https://www.sqlite.org/pragma.html#pragma_temp_store
            -- Store temporary tables and data in memory for better performance
            PRAGMA temp_store = MEMORY;
        ";

        trace!(sql_query = %PRAGMAS, "PRAGMAs query");

        let mut batch_rows = self
            .conn
            .execute_batch(PRAGMAS)
            .await
            .context("failed to batch execute SQL query")?;

        while let Some(rows) = batch_rows.next_stmt_row() {
            let Some(mut rows) = rows else {
                continue;
            };

            while let Ok(Some(row)) = rows.next().await {
                trace!(?row, "PRAGMA row");
            }
        }

        Ok(())
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        let user_version = self.query_user_version().await?;

        match MIGRATIONS.get(user_version..) {
            Some(remaining) if !remaining.is_empty() => {
                info!(
                    user_version,
                    migration_count = MIGRATIONS.len() - user_version,
                    "Start migration"
                );

                for (sql_query, migration_id) in remaining.iter().zip(user_version..MIGRATIONS.len()) {
                    trace!(migration_id, %sql_query, "Apply migration");

                    self.conn
                        .execute_batch(sql_query)
                        .await
                        .with_context(|| format!("failed to execute migration {migration_id}"))?;

                    self.update_user_version(migration_id + 1)
                        .await
                        .context("failed to update user version")?;
                }

                info!("Migration complete");
            }
            None => {
                warn!(user_version, "user_version is set to an unexpected value");
            }
            _ => {
                debug!(user_version, "Database is already up to date");
            }
        }

        Ok(())
    }

    async fn query_user_version(&self) -> anyhow::Result<usize> {
        let sql_query = "PRAGMA user_version";

        let row = self
            .conn
            .query(sql_query, ())
            .await
            .context("failed to execute SQL query")?
            .next()
            .await
            .context("failed to read the row")?
            .context("no row returned")?;

        let value = row.get::<u64>(0).context("failed to read user_version value")?;

        Ok(usize::try_from(value).expect("number not too big"))
    }

    async fn update_user_version(&self, value: usize) -> anyhow::Result<()> {
        let value = u64::try_from(value).expect("number not too big");

        let sql_query = format!("PRAGMA user_version = {value}");

        self.conn
            .execute(&sql_query, ())
            .await
            .context("failed to execute SQL query")?;

        Ok(())
    }

    async fn fetch_user(&self, sql_query: &str, id_or_email: &str) -> Result<Option<User>, StoreError> {
        let params = vec![Value::from(id_or_email.to_owned())];

        let mut rows = self.conn.query(sql_query, params).await.map_err(backend_error)?;

        match rows.next().await.map_err(backend_error)? {
            Some(row) => Ok(Some(user_from_row(&row).map_err(StoreError::Backend)?)),
            None => Ok(None),
        }
    }

    async fn require_user(&self, id: Uuid) -> Result<User, StoreError> {
        self.user_by_id(id).await?.ok_or(StoreError::NotFound)
    }

    /// Writes back the mutable login/lockout/verification columns of a user.
    async fn persist_account_state(&self, user: &User) -> Result<(), StoreError> {
        let sql_query = "UPDATE user SET
                last_login = :last_login,
                email_verified_at = :email_verified_at,
                is_verified = :is_verified,
                failed_login_attempts = :failed_login_attempts,
                account_locked_until = :account_locked_until
            WHERE id = :id";

        let params = (
            (":id", Value::from(user.id.to_string())),
            (":last_login", opt_int(user.last_login.map(ts))),
            (":email_verified_at", opt_int(user.email_verified_at.map(ts))),
            (":is_verified", Value::from(i64::from(user.is_verified))),
            (":failed_login_attempts", Value::from(i64::from(user.failed_login_attempts))),
            (":account_locked_until", opt_int(user.account_locked_until.map(ts))),
        );

        let changed_count = self.conn.execute(sql_query, params).await.map_err(backend_error)?;

        if changed_count == 0 {
            return Err(StoreError::NotFound);
        }

        Ok(())
    }
}

#[async_trait]
impl UserStore for LibSqlUserStore {
    async fn setup(&self) -> anyhow::Result<()> {
        self.apply_pragmas().await?;
        self.migrate().await?;
        Ok(())
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let sql_query =
            format!("INSERT INTO user ({USER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)");

        let params: Vec<Value> = vec![
            Value::from(user.id.to_string()),
            Value::from(user.email.clone()),
            Value::from(user.first_name.clone()),
            Value::from(user.last_name.clone()),
            opt_text(user.phone_number.clone()),
            opt_text(user.date_of_birth.map(date_to_text).transpose().map_err(StoreError::Backend)?),
            Value::from(i64::from(user.is_active)),
            Value::from(i64::from(user.is_staff)),
            Value::from(i64::from(user.is_superuser)),
            Value::from(i64::from(user.is_verified)),
            Value::from(ts(user.date_joined)),
            opt_int(user.last_login.map(ts)),
            opt_int(user.email_verified_at.map(ts)),
            Value::from(user.preferred_language.as_str()),
            Value::from(user.timezone.clone()),
            Value::from(i64::from(user.email_notifications)),
            Value::from(i64::from(user.marketing_emails)),
            Value::from(user.password_hash.as_phc_string()),
            opt_int(user.password_changed_at.map(ts)),
            Value::from(i64::from(user.failed_login_attempts)),
            opt_int(user.account_locked_until.map(ts)),
        ];

        trace!(user_id = %user.id, "Inserting a new user");

        match self.conn.execute(&sql_query, params).await {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateEmail),
            Err(e) => Err(backend_error(e)),
        }
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql_query = format!("SELECT {USER_COLUMNS} FROM user WHERE id = ?1");
        self.fetch_user(&sql_query, &id.to_string()).await
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        // The email column is COLLATE NOCASE, so equality is case-insensitive.
        let sql_query = format!("SELECT {USER_COLUMNS} FROM user WHERE email = ?1");
        self.fetch_user(&sql_query, email).await
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> Result<User, StoreError> {
        let mut user = self.require_user(id).await?;
        user.apply_update(update)?;

        let sql_query = "UPDATE user SET
                first_name = :first_name,
                last_name = :last_name,
                phone_number = :phone_number,
                date_of_birth = :date_of_birth,
                preferred_language = :preferred_language,
                timezone = :timezone,
                email_notifications = :email_notifications,
                marketing_emails = :marketing_emails
            WHERE id = :id";

        let params = (
            (":id", Value::from(user.id.to_string())),
            (":first_name", Value::from(user.first_name.clone())),
            (":last_name", Value::from(user.last_name.clone())),
            (":phone_number", opt_text(user.phone_number.clone())),
            (
                ":date_of_birth",
                opt_text(user.date_of_birth.map(date_to_text).transpose().map_err(StoreError::Backend)?),
            ),
            (":preferred_language", Value::from(user.preferred_language.as_str())),
            (":timezone", Value::from(user.timezone.clone())),
            (":email_notifications", Value::from(i64::from(user.email_notifications))),
            (":marketing_emails", Value::from(i64::from(user.marketing_emails))),
        );

        self.conn.execute(sql_query, params).await.map_err(backend_error)?;

        Ok(user)
    }

    async fn set_password(&self, id: Uuid, hash: PasswordHash, now: OffsetDateTime) -> Result<(), StoreError> {
        let sql_query = "UPDATE user SET password_hash = :password_hash, password_changed_at = :password_changed_at
            WHERE id = :id";

        let params = (
            (":id", Value::from(id.to_string())),
            (":password_hash", Value::from(hash.as_phc_string())),
            (":password_changed_at", Value::from(ts(now))),
        );

        let changed_count = self.conn.execute(sql_query, params).await.map_err(backend_error)?;

        if changed_count == 0 {
            return Err(StoreError::NotFound);
        }

        Ok(())
    }

    async fn mark_email_verified(&self, id: Uuid, now: OffsetDateTime) -> Result<User, StoreError> {
        let mut user = self.require_user(id).await?;
        user.verify_email(now);
        self.persist_account_state(&user).await?;
        Ok(user)
    }

    async fn record_login_success(&self, id: Uuid, now: OffsetDateTime) -> Result<(), StoreError> {
        let mut user = self.require_user(id).await?;
        user.register_login_success(now);
        self.persist_account_state(&user).await
    }

    async fn record_login_failure(&self, id: Uuid, now: OffsetDateTime) -> Result<User, StoreError> {
        let mut user = self.require_user(id).await?;
        user.register_login_failure(now);
        self.persist_account_state(&user).await?;
        Ok(user)
    }

    async fn unlock_account(&self, id: Uuid) -> Result<(), StoreError> {
        let mut user = self.require_user(id).await?;
        user.unlock_account();
        self.persist_account_state(&user).await
    }

    async fn count_users(&self) -> Result<u64, StoreError> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM user", ())
            .await
            .map_err(backend_error)?;

        let row = rows
            .next()
            .await
            .map_err(backend_error)?
            .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("no row returned")))?;

        row.get::<u64>(0).map_err(backend_error)
    }

    async fn upsert_employee_profile(&self, profile: &EmployeeProfile) -> Result<(), StoreError> {
        let sql_query = "INSERT INTO employee_profile
                (user_id, national_id, gender, insurance_number, employment_status, contract_months, contract_start_date)
            VALUES (:user_id, :national_id, :gender, :insurance_number, :employment_status, :contract_months, :contract_start_date)
            ON CONFLICT (user_id) DO UPDATE SET
                national_id = excluded.national_id,
                gender = excluded.gender,
                insurance_number = excluded.insurance_number,
                employment_status = excluded.employment_status,
                contract_months = excluded.contract_months,
                contract_start_date = excluded.contract_start_date";

        let params = (
            (":user_id", Value::from(profile.user_id.to_string())),
            (":national_id", opt_text(profile.national_id.clone())),
            (":gender", opt_text(profile.gender.map(|g| g.as_str().to_owned()))),
            (":insurance_number", opt_text(profile.insurance_number.clone())),
            (":employment_status", opt_text(profile.employment_status.clone())),
            (":contract_months", Value::from(i64::from(profile.contract_months))),
            (
                ":contract_start_date",
                opt_text(profile.contract_start_date.map(date_to_text).transpose().map_err(StoreError::Backend)?),
            ),
        );

        match self.conn.execute(sql_query, params).await {
            Ok(_) => Ok(()),
            // The foreign key constraint means the referenced user is gone.
            Err(e) if is_foreign_key_violation(&e) => Err(StoreError::NotFound),
            Err(e) => Err(backend_error(e)),
        }
    }

    async fn employee_profile(&self, user_id: Uuid) -> Result<Option<EmployeeProfile>, StoreError> {
        let sql_query = "SELECT user_id, national_id, gender, insurance_number, employment_status,
                contract_months, contract_start_date
            FROM employee_profile WHERE user_id = ?1";

        let params = vec![Value::from(user_id.to_string())];

        let mut rows = self.conn.query(sql_query, params).await.map_err(backend_error)?;

        match rows.next().await.map_err(backend_error)? {
            Some(row) => Ok(Some(employee_from_row(&row).map_err(StoreError::Backend)?)),
            None => Ok(None),
        }
    }
}

fn backend_error(e: impl Into<anyhow::Error>) -> StoreError {
    StoreError::Backend(e.into())
}

fn opt_text(value: Option<String>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

fn opt_int(value: Option<i64>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

fn is_unique_violation(e: &libsql::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

fn is_foreign_key_violation(e: &libsql::Error) -> bool {
    e.to_string().contains("FOREIGN KEY constraint failed")
}

fn ts(datetime: OffsetDateTime) -> i64 {
    datetime.unix_timestamp()
}

fn from_ts(timestamp: i64) -> anyhow::Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(timestamp).context("timestamp out of range")
}

fn date_to_text(date: Date) -> anyhow::Result<String> {
    date.format(DATE_FORMAT).context("failed to format date")
}

fn text_to_date(text: &str) -> anyhow::Result<Date> {
    Date::parse(text, DATE_FORMAT).context("failed to parse date")
}

fn user_from_row(row: &libsql::Row) -> anyhow::Result<User> {
    let id = row.get::<String>(0).context("id")?;
    let date_of_birth = row.get::<Option<String>>(5).context("date_of_birth")?;
    let preferred_language = row.get::<String>(13).context("preferred_language")?;

    Ok(User {
        id: Uuid::parse_str(&id).context("invalid user id")?,
        email: row.get::<String>(1).context("email")?,
        first_name: row.get::<String>(2).context("first_name")?,
        last_name: row.get::<String>(3).context("last_name")?,
        phone_number: row.get::<Option<String>>(4).context("phone_number")?,
        date_of_birth: date_of_birth.as_deref().map(text_to_date).transpose()?,
        is_active: row.get::<i64>(6).context("is_active")? != 0,
        is_staff: row.get::<i64>(7).context("is_staff")? != 0,
        is_superuser: row.get::<i64>(8).context("is_superuser")? != 0,
        is_verified: row.get::<i64>(9).context("is_verified")? != 0,
        date_joined: from_ts(row.get::<i64>(10).context("date_joined")?)?,
        last_login: row.get::<Option<i64>>(11).context("last_login")?.map(from_ts).transpose()?,
        email_verified_at: row
            .get::<Option<i64>>(12)
            .context("email_verified_at")?
            .map(from_ts)
            .transpose()?,
        preferred_language: preferred_language.parse::<Language>().context("preferred_language")?,
        timezone: row.get::<String>(14).context("timezone")?,
        email_notifications: row.get::<i64>(15).context("email_notifications")? != 0,
        marketing_emails: row.get::<i64>(16).context("marketing_emails")? != 0,
        password_hash: PasswordHash::from_phc_string(row.get::<String>(17).context("password_hash")?),
        password_changed_at: row
            .get::<Option<i64>>(18)
            .context("password_changed_at")?
            .map(from_ts)
            .transpose()?,
        failed_login_attempts: u32::try_from(row.get::<i64>(19).context("failed_login_attempts")?)
            .context("failed_login_attempts out of range")?,
        account_locked_until: row
            .get::<Option<i64>>(20)
            .context("account_locked_until")?
            .map(from_ts)
            .transpose()?,
    })
}

fn employee_from_row(row: &libsql::Row) -> anyhow::Result<EmployeeProfile> {
    let user_id = row.get::<String>(0).context("user_id")?;
    let gender = row.get::<Option<String>>(2).context("gender")?;
    let contract_start_date = row.get::<Option<String>>(6).context("contract_start_date")?;

    Ok(EmployeeProfile {
        user_id: Uuid::parse_str(&user_id).context("invalid user id")?,
        national_id: row.get::<Option<String>>(1).context("national_id")?,
        gender: gender.as_deref().map(|g| g.parse::<Gender>()).transpose().context("gender")?,
        insurance_number: row.get::<Option<String>>(3).context("insurance_number")?,
        employment_status: row.get::<Option<String>>(4).context("employment_status")?,
        contract_months: u32::try_from(row.get::<i64>(5).context("contract_months")?)
            .context("contract_months out of range")?,
        contract_start_date: contract_start_date.as_deref().map(text_to_date).transpose()?,
    })
}
