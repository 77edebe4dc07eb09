//! Demo authentication: any email/password pair is accepted and the user
//! record lives in the key-value store. Sessions are HMAC-signed tokens that
//! must also still be recorded in the store.

use anyhow::Context;
use chrono::Utc;
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::store::KvStore;

const MIN_PASSWORD_LEN: usize = 6;
const GOOGLE_DEMO_ID: &str = "demo_google_com";
const GOOGLE_DEMO_EMAIL: &str = "demo@google.com";
const GOOGLE_DEMO_AVATAR: &str = "https://via.placeholder.com/150";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Email and password are required")]
    MissingCredentials,
    #[error("Password must be at least 6 characters")]
    PasswordTooShort,
    #[error("No user found")]
    UnknownUser,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UserMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppMetadata {
    pub provider: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub user_metadata: UserMetadata,
    pub created_at: String,
    pub last_sign_in_at: String,
    pub app_metadata: AppMetadata,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Session {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

pub fn user_id_for_email(email: &str) -> String {
    email.replace(['@', '.'], "_").to_lowercase()
}

fn local_part(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

fn user_key(user_id: &str) -> String {
    format!("moviesprix-user-{user_id}")
}

fn session_key(token: &str) -> String {
    format!("moviesprix-session-{token}")
}

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn KvStore>,
    secret: String,
    // held across every load-then-save of a user record
    user_writes: Arc<Mutex<()>>,
}

impl AuthService {
    pub fn new(store: Arc<dyn KvStore>, secret: impl Into<String>) -> Self {
        Self {
            store,
            secret: secret.into(),
            user_writes: Arc::new(Mutex::new(())),
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let email = email.trim();
        if email.is_empty() || password.trim().is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        let metadata = UserMetadata {
            full_name: Some(local_part(email)),
            ..Default::default()
        };
        self.establish(user_id_for_email(email), email, metadata, "email")
            .await
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: Option<&str>,
    ) -> Result<Session, AuthError> {
        let email = email.trim();
        if email.is_empty() || password.trim().is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::PasswordTooShort);
        }
        let full_name = full_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| local_part(email));
        let metadata = UserMetadata {
            full_name: Some(full_name),
            ..Default::default()
        };
        self.establish(user_id_for_email(email), email, metadata, "email")
            .await
    }

    pub async fn sign_in_with_google(&self) -> Result<Session, AuthError> {
        let metadata = UserMetadata {
            full_name: Some("Demo User".to_string()),
            name: Some("Demo User".to_string()),
            avatar_url: Some(GOOGLE_DEMO_AVATAR.to_string()),
        };
        self.establish(
            GOOGLE_DEMO_ID.to_string(),
            GOOGLE_DEMO_EMAIL,
            metadata,
            "google",
        )
        .await
    }

    /// Stores (or refreshes) the user record and opens a new session for it.
    /// A returning user keeps their existing metadata and creation time.
    async fn establish(
        &self,
        user_id: String,
        email: &str,
        metadata: UserMetadata,
        provider: &str,
    ) -> Result<Session, AuthError> {
        let writing = self.user_writes.lock().await;
        let now = Utc::now().to_rfc3339();
        let user = match self.load_user(&user_id).await? {
            Some(existing) => User {
                last_sign_in_at: now,
                app_metadata: AppMetadata {
                    provider: provider.to_string(),
                },
                ..existing
            },
            None => User {
                id: user_id,
                email: email.to_string(),
                user_metadata: metadata,
                created_at: now.clone(),
                last_sign_in_at: now,
                app_metadata: AppMetadata {
                    provider: provider.to_string(),
                },
            },
        };
        self.save_user(&user).await?;
        drop(writing);

        let token = self.issue_token(&user.id)?;
        self.store
            .set(&session_key(&token), user.id.clone())
            .await
            .context("Failed to record session")?;
        info!("Signed in user {} via {}", user.id, provider);
        Ok(Session { token, user })
    }

    pub async fn session(&self, token: &str) -> Result<Option<User>, AuthError> {
        let Some(user_id) = self.verify_token(token) else {
            debug!("Rejected session token with bad signature");
            return Ok(None);
        };
        let stored = self
            .store
            .get(&session_key(token))
            .await
            .context("Failed to read session")?;
        if stored.as_deref() != Some(user_id) {
            return Ok(None);
        }
        self.load_user(user_id).await
    }

    pub async fn sign_out(&self, token: &str) -> Result<(), AuthError> {
        self.store
            .remove(&session_key(token))
            .await
            .context("Failed to remove session")?;
        Ok(())
    }

    pub async fn update_profile(
        &self,
        user_id: &str,
        update: ProfileUpdate,
    ) -> Result<User, AuthError> {
        let _writing = self.user_writes.lock().await;
        let mut user = self
            .load_user(user_id)
            .await?
            .ok_or(AuthError::UnknownUser)?;
        if let Some(name) = update.full_name {
            user.user_metadata.full_name = Some(name);
        }
        if let Some(avatar) = update.avatar_url {
            user.user_metadata.avatar_url = Some(avatar);
        }
        self.save_user(&user).await?;
        Ok(user)
    }

    async fn load_user(&self, user_id: &str) -> Result<Option<User>, AuthError> {
        let raw = self
            .store
            .get(&user_key(user_id))
            .await
            .context("Failed to read user")?;
        match raw {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(user) => Ok(Some(user)),
                Err(e) => {
                    warn!("Discarding unreadable user record {}: {}", user_id, e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn save_user(&self, user: &User) -> Result<(), AuthError> {
        let body = serde_json::to_string(user).context("Failed to encode user")?;
        self.store
            .set(&user_key(&user.id), body)
            .await
            .context("Failed to store user")?;
        Ok(())
    }

    fn sign(&self, payload: &str) -> anyhow::Result<Vec<u8>> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.as_bytes())
            .map_err(|_| anyhow::anyhow!("Invalid session secret"))?;
        mac.update(payload.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn issue_token(&self, user_id: &str) -> anyhow::Result<String> {
        let issued = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let payload = format!("{user_id}.{issued}");
        let sig = hex::encode(self.sign(&payload)?);
        Ok(format!("{payload}.{sig}"))
    }

    /// Returns the user id embedded in a well-signed token.
    fn verify_token<'a>(&self, token: &'a str) -> Option<&'a str> {
        let (payload, sig_hex) = token.rsplit_once('.')?;
        let (user_id, _issued) = payload.rsplit_once('.')?;
        let expected = hex::decode(sig_hex).ok()?;
        let computed = self.sign(payload).ok()?;
        (expected.len() == computed.len() && constant_time_eq(&computed, &expected))
            .then_some(user_id)
    }
}
