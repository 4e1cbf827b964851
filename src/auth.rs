use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

pub const SESSION_COOKIE: &str = "tripmarket_session";

const SESSION_TTL_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: i64,
    pub uuid: String,
    pub username: String,
}

#[derive(Debug, Clone, Default)]
pub struct CurrentUser(pub Option<AuthenticatedUser>);

impl CurrentUser {
    pub fn require_user(&self) -> Result<&AuthenticatedUser, AppError> {
        self.0.as_ref().ok_or(AppError::Unauthorized)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar: PrivateCookieJar = match PrivateCookieJar::from_request_parts(parts, state).await {
            Ok(jar) => jar,
            Err(never) => match never {},
        };

        let Some(cookie) = jar.get(SESSION_COOKIE) else {
            return Ok(Self(None));
        };

        Ok(Self(resolve_session(state, cookie.value()).await?))
    }
}

pub async fn register_user(
    state: &AppState,
    username: &str,
    email: &str,
    password: &str,
) -> Result<AuthenticatedUser, AppError> {
    let username = username.trim();
    let email = email.trim();

    if username.is_empty() {
        return Err(AppError::BadRequest("please pick a username".into()));
    }
    if !email.contains('@') {
        return Err(AppError::BadRequest(
            "that does not look like an email address".into(),
        ));
    }
    if password.len() < 8 {
        return Err(AppError::BadRequest(
            "the password needs at least 8 characters".into(),
        ));
    }

    let taken = sqlx::query("SELECT id FROM users WHERE username = ?1 OR email = ?2")
        .bind(username)
        .bind(email)
        .fetch_optional(&state.db)
        .await?;
    if taken.is_some() {
        return Err(AppError::BadRequest(
            "username or email is already taken".into(),
        ));
    }

    let user_uuid = Uuid::new_v4().to_string();
    let password_hash = hash_password(password)?;
    let now = Utc::now();

    let result = sqlx::query(
        r#"INSERT INTO users (uuid, username, email, password_hash, created_at, last_login_at)
           VALUES (?1, ?2, ?3, ?4, ?5, NULL)"#,
    )
    .bind(&user_uuid)
    .bind(username)
    .bind(email)
    .bind(&password_hash)
    .bind(now)
    .execute(&state.db)
    .await?;
    let user_id = result.last_insert_rowid();

    // Every account gets its marketplace profile row up front.
    sqlx::query("INSERT INTO customers (user_id, phone, street_address) VALUES (?1, NULL, NULL)")
        .bind(user_id)
        .execute(&state.db)
        .await?;

    Ok(AuthenticatedUser {
        id: user_id,
        uuid: user_uuid,
        username: username.to_string(),
    })
}

pub async fn authenticate_user(
    state: &AppState,
    identifier: &str,
    password: &str,
) -> Result<AuthenticatedUser, AppError> {
    let identifier = identifier.trim();
    if identifier.is_empty() || password.is_empty() {
        return Err(AppError::BadRequest(
            "please fill in both fields".into(),
        ));
    }

    let row = sqlx::query(
        "SELECT id, uuid, username, password_hash FROM users WHERE username = ?1 OR email = ?1",
    )
    .bind(identifier)
    .fetch_optional(&state.db)
    .await?;
    let Some(row) = row else {
        return Err(AppError::Unauthorized);
    };

    let stored_hash: String = row.get("password_hash");
    if !verify_password(password, &stored_hash) {
        return Err(AppError::Unauthorized);
    }

    let user_id: i64 = row.get("id");
    sqlx::query("UPDATE users SET last_login_at = ?1 WHERE id = ?2")
        .bind(Utc::now())
        .bind(user_id)
        .execute(&state.db)
        .await?;

    Ok(AuthenticatedUser {
        id: user_id,
        uuid: row.get("uuid"),
        username: row.get("username"),
    })
}

pub async fn create_session(state: &AppState, user_id: i64) -> Result<String, AppError> {
    let session_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        r#"INSERT INTO sessions (id, user_id, created_at, last_seen_at, expires_at)
           VALUES (?1, ?2, ?3, ?4, ?5)"#,
    )
    .bind(&session_id)
    .bind(user_id)
    .bind(now)
    .bind(now)
    .bind(now + Duration::days(SESSION_TTL_DAYS))
    .execute(&state.db)
    .await?;
    Ok(session_id)
}

pub async fn destroy_session(state: &AppState, session_id: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM sessions WHERE id = ?1")
        .bind(session_id)
        .execute(&state.db)
        .await?;
    Ok(())
}

pub fn apply_session_cookie(jar: PrivateCookieJar, session_id: &str) -> PrivateCookieJar {
    let mut cookie = Cookie::new(SESSION_COOKIE, session_id.to_string());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    jar.add(cookie)
}

pub fn clear_session_cookie(jar: PrivateCookieJar) -> PrivateCookieJar {
    jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
}

async fn resolve_session(
    state: &AppState,
    session_id: &str,
) -> Result<Option<AuthenticatedUser>, AppError> {
    let row = sqlx::query(
        r#"SELECT u.id, u.uuid, u.username, s.expires_at
           FROM sessions s
           JOIN users u ON u.id = s.user_id
           WHERE s.id = ?1"#,
    )
    .bind(session_id)
    .fetch_optional(&state.db)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let expires_at: Option<DateTime<Utc>> = row.get("expires_at");
    if let Some(expiry) = expires_at {
        if expiry <= Utc::now() {
            destroy_session(state, session_id).await?;
            return Ok(None);
        }
    }

    sqlx::query("UPDATE sessions SET last_seen_at = ?1 WHERE id = ?2")
        .bind(Utc::now())
        .bind(session_id)
        .execute(&state.db)
        .await?;

    Ok(Some(AuthenticatedUser {
        id: row.get("id"),
        uuid: row.get("uuid"),
        username: row.get("username"),
    }))
}

fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AppError::Other(anyhow::anyhow!("password hashing failed: {err}")))
}

fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}
