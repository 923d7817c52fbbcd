// Ambient-session authentication boundary.
//
// The login/logout pipeline that writes the `sessions` table lives outside
// this service. The chat server only resolves the `sessionid` cookie on the
// upgrade request to a principal and checks the request's anti-forgery
// token against the one stored with the session.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header::COOKIE, HeaderMap};
use sqlx::PgPool;
use tokio::sync::RwLock;

/// Name of the ambient session cookie.
pub const SESSION_COOKIE: &str = "sessionid";

/// An authenticated user identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
    pub username: String,
}

/// A resolved ambient session: the principal plus the session-scoped
/// anti-forgery token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSession {
    pub principal: Principal,
    csrf_token: String,
}

impl AuthenticatedSession {
    /// Compare a caller-supplied anti-forgery token against the session's.
    pub fn csrf_matches(&self, provided: Option<&str>) -> bool {
        matches!(provided, Some(token) if !token.is_empty() && token == self.csrf_token)
    }
}

#[derive(Clone)]
pub enum SessionAuthenticator {
    Postgres(PgPool),
    #[cfg_attr(not(test), allow(dead_code))]
    Memory(Arc<RwLock<MemoryAuthState>>),
}

#[derive(Debug, Default)]
pub struct MemoryAuthState {
    users: HashMap<i64, Principal>,
    sessions: HashMap<String, MemorySessionRecord>,
}

#[derive(Debug)]
struct MemorySessionRecord {
    user_id: i64,
    csrf_token: String,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    user_id: i64,
    username: String,
    csrf_token: String,
}

impl SessionAuthenticator {
    /// Resolve the principal for the request's ambient session cookie.
    ///
    /// Returns `Ok(None)` for a missing cookie, an unknown or expired
    /// session, or a deactivated user — all indistinguishable to the
    /// caller by design.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<AuthenticatedSession>> {
        let Some(session_key) = session_key_from_headers(headers) else {
            return Ok(None);
        };

        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, SessionRow>(
                    r#"
                    SELECT s.user_id, u.username, s.csrf_token
                    FROM sessions AS s
                    INNER JOIN users AS u
                        ON u.id = s.user_id
                    WHERE s.session_key = $1
                      AND s.expires_at > now()
                      AND u.is_active
                    "#,
                )
                .bind(&session_key)
                .fetch_optional(pool)
                .await
                .context("failed to resolve ambient session")?;

                Ok(row.map(|row| AuthenticatedSession {
                    principal: Principal { user_id: row.user_id, username: row.username },
                    csrf_token: row.csrf_token,
                }))
            }
            Self::Memory(state) => {
                let guard = state.read().await;
                let Some(record) = guard.sessions.get(&session_key) else {
                    return Ok(None);
                };
                Ok(guard.users.get(&record.user_id).map(|principal| AuthenticatedSession {
                    principal: principal.clone(),
                    csrf_token: record.csrf_token.clone(),
                }))
            }
        }
    }

    /// Look up an active principal by id (counterpart resolution).
    pub async fn principal_by_id(&self, user_id: i64) -> Result<Option<Principal>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, (i64, String)>(
                    "SELECT id, username FROM users WHERE id = $1 AND is_active",
                )
                .bind(user_id)
                .fetch_optional(pool)
                .await
                .context("failed to resolve counterpart principal")?;

                Ok(row.map(|(user_id, username)| Principal { user_id, username }))
            }
            Self::Memory(state) => Ok(state.read().await.users.get(&user_id).cloned()),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryAuthState::default())))
    }

    #[cfg(test)]
    pub(crate) async fn seed_user(&self, user_id: i64, username: &str) {
        if let Self::Memory(state) = self {
            state
                .write()
                .await
                .users
                .insert(user_id, Principal { user_id, username: username.to_string() });
        }
    }

    #[cfg(test)]
    pub(crate) async fn seed_session(&self, session_key: &str, user_id: i64, csrf_token: &str) {
        if let Self::Memory(state) = self {
            state.write().await.sessions.insert(
                session_key.to_string(),
                MemorySessionRecord { user_id, csrf_token: csrf_token.to_string() },
            );
        }
    }
}

fn session_key_from_headers(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    session_key_from_cookie_header(raw)
}

fn session_key_from_cookie_header(raw: &str) -> Option<String> {
    raw.split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
