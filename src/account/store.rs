//! Credential persistence behind a narrow interface.
//!
//! The Postgres store is the production implementation; the in-memory
//! store backs flow and handler tests. Issuance and consumption paths
//! only ever do single-statement writes, so a backend failure never
//! leaves a half-written row.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::Instrument;

use super::Account;

/// Backend failure, fatal to the current request.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
}

/// Whether an insert landed or hit the email uniqueness constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Conflict,
}

/// Narrow persistence seam the flows talk to.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    /// Create a new account; conflicts are an outcome, not an error.
    async fn insert(&self, account: &Account) -> Result<InsertOutcome, StoreError>;

    /// Persist the mutable fields of an existing account.
    async fn save(&self, account: &Account) -> Result<(), StoreError>;
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn unavailable(err: &sqlx::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

/// Postgres-backed store over the `accounts` table.
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let query = "SELECT email, password_hash, verified, created_at FROM accounts WHERE email = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| unavailable(&err))?;

        Ok(row.map(|row| Account {
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            verified: row.get("verified"),
            created_at: row.get("created_at"),
        }))
    }

    async fn insert(&self, account: &Account) -> Result<InsertOutcome, StoreError> {
        let query = r"
            INSERT INTO accounts (email, password_hash, verified, created_at)
            VALUES ($1, $2, $3, $4)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(&account.email)
            .bind(&account.password_hash)
            .bind(account.verified)
            .bind(account.created_at)
            .execute(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
            Err(err) => Err(unavailable(&err)),
        }
    }

    async fn save(&self, account: &Account) -> Result<(), StoreError> {
        let query = "UPDATE accounts SET password_hash = $2, verified = $3 WHERE email = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&account.email)
            .bind(&account.password_hash)
            .bind(account.verified)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| unavailable(&err))?;

        Ok(())
    }
}

/// Map-backed store for tests, with a switch to simulate an outage.
pub struct InMemoryCredentialStore {
    accounts: Mutex<HashMap<String, Account>>,
    unavailable: AtomicBool,
}

impl InMemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        self.check_available()?;
        let accounts = self.accounts.lock().await;
        Ok(accounts.get(email).cloned())
    }

    async fn insert(&self, account: &Account) -> Result<InsertOutcome, StoreError> {
        self.check_available()?;
        let mut accounts = self.accounts.lock().await;
        if accounts.contains_key(&account.email) {
            return Ok(InsertOutcome::Conflict);
        }
        accounts.insert(account.email.clone(), account.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn save(&self, account: &Account) -> Result<(), StoreError> {
        self.check_available()?;
        let mut accounts = self.accounts.lock().await;
        accounts.insert(account.email.clone(), account.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn is_unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("99999"),
        }));
        assert!(!is_unique_violation(&err));

        let err = sqlx::Error::RowNotFound;
        assert!(!is_unique_violation(&err));
    }

    #[tokio::test]
    async fn in_memory_insert_then_find() {
        let store = InMemoryCredentialStore::new();
        let account = Account::new("a@example.com".to_string(), "hash".to_string());

        assert_eq!(store.insert(&account).await.unwrap(), InsertOutcome::Inserted);
        let found = store.find_by_email("a@example.com").await.unwrap().unwrap();
        assert_eq!(found.password_hash, "hash");
        assert!(store.find_by_email("b@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn in_memory_insert_conflicts_on_duplicate_email() {
        let store = InMemoryCredentialStore::new();
        let account = Account::new("a@example.com".to_string(), "hash".to_string());

        store.insert(&account).await.unwrap();
        assert_eq!(store.insert(&account).await.unwrap(), InsertOutcome::Conflict);
    }

    #[tokio::test]
    async fn in_memory_save_overwrites_mutable_fields() {
        let store = InMemoryCredentialStore::new();
        let mut account = Account::new("a@example.com".to_string(), "hash".to_string());
        store.insert(&account).await.unwrap();

        account.verified = true;
        account.password_hash = "new-hash".to_string();
        store.save(&account).await.unwrap();

        let found = store.find_by_email("a@example.com").await.unwrap().unwrap();
        assert!(found.verified);
        assert_eq!(found.password_hash, "new-hash");
    }

    #[tokio::test]
    async fn in_memory_outage_switch_fails_every_call() {
        let store = InMemoryCredentialStore::new();
        store.set_unavailable(true);

        let account = Account::new("a@example.com".to_string(), "hash".to_string());
        assert!(matches!(
            store.find_by_email("a@example.com").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.insert(&account).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.save(&account).await,
            Err(StoreError::Unavailable(_))
        ));

        store.set_unavailable(false);
        assert!(store.find_by_email("a@example.com").await.is_ok());
    }
}
