use std::collections::HashMap;
use std::sync::Mutex;

use axum::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::auth::user::{NewUser, User};
use crate::error::AuthError;

pub type Result<T> = std::result::Result<T, AuthError>;

/// Durable lookup and persistence of user records. Handlers only see this
/// trait, so tests can run against the in-memory implementation.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn find_by_id(&self, id: i64) -> Result<Option<User>>;
    async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>>;
    async fn find_by_verification_token(&self, token: &str) -> Result<Option<User>>;
    /// Fails with `EmailTaken` when the email is already present. The
    /// uniqueness check must be atomic with the insert.
    async fn create(&self, new: NewUser) -> Result<User>;
    /// Persists mutations to an existing record; `UserNotFound` if the
    /// record no longer exists.
    async fn save(&self, user: &User) -> Result<()>;
    /// `UserNotFound` if no such id; deletion is not idempotent.
    async fn delete(&self, id: i64) -> Result<()>;
}

const USER_COLUMNS: &str = "id, email, name, password_hash, email_verified, \
     verification_token, reset_token, reset_token_expires_at, created_at";

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_by_column(&self, column: &str, value: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_by_column("email", email).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>> {
        self.find_by_column("reset_token", token).await
    }

    async fn find_by_verification_token(&self, token: &str) -> Result<Option<User>> {
        self.find_by_column("verification_token", token).await
    }

    async fn create(&self, new: NewUser) -> Result<User> {
        let sql = format!(
            "INSERT INTO users (email, name, password_hash, verification_token) \
             VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
        );
        let result = sqlx::query_as::<_, User>(&sql)
            .bind(&new.email)
            .bind(&new.name)
            .bind(&new.password_hash)
            .bind(&new.verification_token)
            .fetch_one(&self.pool)
            .await;
        match result {
            Ok(user) => Ok(user),
            // A concurrent second writer hits the unique constraint; surface
            // it as a conflict rather than a server error.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(AuthError::EmailTaken)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, user: &User) -> Result<()> {
        let done = sqlx::query(
            r#"
            UPDATE users
            SET name = $2,
                password_hash = $3,
                email_verified = $4,
                verification_token = $5,
                reset_token = $6,
                reset_token_expires_at = $7
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.email_verified)
        .bind(&user.verification_token)
        .bind(&user.reset_token)
        .bind(user.reset_token_expires_at)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(AuthError::UserNotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let done = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(AuthError::UserNotFound);
        }
        Ok(())
    }
}

/// In-memory store backing `AppState::fake()` and the handler tests.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    next_id: i64,
    users: HashMap<i64, User>,
}

impl MemoryUserStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().expect("user store mutex poisoned")
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.reset_token.as_deref() == Some(token))
            .cloned())
    }

    async fn find_by_verification_token(&self, token: &str) -> Result<Option<User>> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.verification_token.as_deref() == Some(token))
            .cloned())
    }

    async fn create(&self, new: NewUser) -> Result<User> {
        let mut inner = self.lock();
        if inner.users.values().any(|u| u.email == new.email) {
            return Err(AuthError::EmailTaken);
        }
        inner.next_id += 1;
        let user = User {
            id: inner.next_id,
            email: new.email,
            name: new.name,
            password_hash: new.password_hash,
            email_verified: false,
            verification_token: new.verification_token,
            reset_token: None,
            reset_token_expires_at: None,
            created_at: OffsetDateTime::now_utc(),
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn save(&self, user: &User) -> Result<()> {
        let mut inner = self.lock();
        if !inner.users.contains_key(&user.id) {
            return Err(AuthError::UserNotFound);
        }
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        if self.lock().users.remove(&id).is_none() {
            return Err(AuthError::UserNotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            name: "Test User".into(),
            password_hash: "$argon2id$fake".into(),
            verification_token: None,
        }
    }

    #[tokio::test]
    async fn create_assigns_sequential_ids() {
        let store = MemoryUserStore::default();
        let a = store.create(new_user("a@example.com")).await.unwrap();
        let b = store.create(new_user("b@example.com")).await.unwrap();
        assert!(b.id > a.id);
        assert!(!a.email_verified);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_email() {
        let store = MemoryUserStore::default();
        store.create(new_user("dup@example.com")).await.unwrap();
        let err = store.create(new_user("dup@example.com")).await.unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken));
        // The first record is untouched.
        assert!(store
            .find_by_email("dup@example.com")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn find_by_email_returns_none_for_unknown() {
        let store = MemoryUserStore::default();
        assert!(store.find_by_email("ghost@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_unknown_user_is_not_found() {
        let store = MemoryUserStore::default();
        let mut user = store.create(new_user("x@example.com")).await.unwrap();
        store.delete(user.id).await.unwrap();
        user.name = "Renamed".into();
        let err = store.save(&user).await.unwrap_err();
        assert!(matches!(err, AuthError::UserNotFound));
    }

    #[tokio::test]
    async fn delete_unknown_user_is_not_found() {
        let store = MemoryUserStore::default();
        let err = store.delete(42).await.unwrap_err();
        assert!(matches!(err, AuthError::UserNotFound));
    }

    #[tokio::test]
    async fn save_persists_mutations() {
        let store = MemoryUserStore::default();
        let mut user = store.create(new_user("m@example.com")).await.unwrap();
        user.email_verified = true;
        user.verification_token = None;
        store.save(&user).await.unwrap();
        let reloaded = store.find_by_id(user.id).await.unwrap().unwrap();
        assert!(reloaded.email_verified);
    }
}
