//! Authentication service
//!
//! Email/password accounts with JWT access tokens and rotating refresh
//! tokens. Every sign-in, refresh and sign-out is announced on
//! [`SessionEvents`].

use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;
use crate::models::{Account, Identity, NewAuthSession, Session};
use crate::profile::NewProfile;
use crate::session::{SessionContext, SessionEvent, SessionEvents};
use crate::store::{CredentialStore, ProfileRepository, Store, StoreError};

use super::jwt::{generate_access_token, generate_refresh_token, verify_token, JwtError, TokenType};
use super::password::{hash_password, hash_token, verify_password};

/// Auth service errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Username is already taken")]
    UsernameTaken,

    #[error("Email is already registered")]
    EmailTaken,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Session not found or revoked")]
    SessionNotFound,

    #[error("Token error: {0}")]
    TokenError(String),

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<JwtError> for AuthError {
    fn from(e: JwtError) -> Self {
        AuthError::TokenError(e.to_string())
    }
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    credentials: Arc<dyn CredentialStore>,
    profiles: Arc<dyn ProfileRepository>,
    events: SessionEvents,
    jwt_secret: String,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_days: i64,
    bcrypt_cost: u32,
}

impl AuthService {
    /// Create a new AuthService
    pub fn new(store: &Store, events: SessionEvents, config: &Config) -> Self {
        Self {
            credentials: store.credentials.clone(),
            profiles: store.profiles.clone(),
            events,
            jwt_secret: config.jwt_secret.clone(),
            access_token_ttl_seconds: config.jwt_access_token_ttl_seconds,
            refresh_token_ttl_days: config.jwt_refresh_token_ttl_days,
            bcrypt_cost: config.bcrypt_cost,
        }
    }

    pub fn events(&self) -> &SessionEvents {
        &self.events
    }

    /// Register an account and its profile under the chosen username
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<Session, AuthError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AuthError::Validation("Username is required".to_string()));
        }

        if self.profiles.find_profile_by_username(username).await?.is_some() {
            return Err(AuthError::UsernameTaken);
        }

        let password_hash = hash_password(password.to_string(), self.bcrypt_cost).await?;
        let account = self
            .credentials
            .create_account(email.trim(), &password_hash)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => AuthError::EmailTaken,
                other => AuthError::Store(other),
            })?;

        // A concurrent sign-up may have claimed the name since the check above;
        // the account then gets a generated username on first sign-in
        match self
            .profiles
            .insert_profile(NewProfile::blank(account.id, username))
            .await
        {
            Ok(_) => {}
            Err(StoreError::Conflict(reason)) => {
                tracing::warn!(
                    user_id = %account.id,
                    reason = %reason,
                    "Username claimed during sign-up"
                );
                return Err(AuthError::UsernameTaken);
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(user_id = %account.id, "Account registered");
        self.open_session(&account).await
    }

    /// Sign in with email and password
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let account = self
            .credentials
            .find_account_by_email(email.trim())
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(password.to_string(), account.password_hash.clone()).await? {
            tracing::debug!(user_id = %account.id, "Password mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        self.open_session(&account).await
    }

    /// Issue tokens for a new session and announce it
    async fn open_session(&self, account: &Account) -> Result<Session, AuthError> {
        let identity = account.identity();
        let (session, jti, refresh_token_hash) = self.issue_tokens(&identity)?;

        self.credentials
            .insert_session(NewAuthSession {
                user_id: identity.id,
                jti,
                refresh_token_hash,
                expires_at: Utc::now() + Duration::days(self.refresh_token_ttl_days),
            })
            .await?;

        tracing::info!(user_id = %identity.id, "Signed in");
        self.events.publish(SessionEvent::SignedIn(identity));
        Ok(session)
    }

    /// New token pair plus the session jti and refresh hash to store
    fn issue_tokens(&self, identity: &Identity) -> Result<(Session, String, String), AuthError> {
        let jti = Uuid::new_v4().to_string();
        let access_token =
            generate_access_token(identity, &jti, &self.jwt_secret, self.access_token_ttl_seconds)?;

        let refresh_jti = Uuid::new_v4().to_string();
        let refresh_token = generate_refresh_token(
            identity,
            &refresh_jti,
            &self.jwt_secret,
            self.refresh_token_ttl_days,
        )?;
        let refresh_token_hash = hash_token(&refresh_token);

        let session = Session {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_ttl_seconds,
            user: identity.clone(),
        };
        Ok((session, jti, refresh_token_hash))
    }

    /// Refresh tokens using a valid refresh token
    pub async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let claims = verify_token(refresh_token, &self.jwt_secret)?;
        if !claims.is(TokenType::Refresh) {
            return Err(AuthError::InvalidRefreshToken);
        }

        let stored = self
            .credentials
            .find_session_by_refresh_hash(&hash_token(refresh_token))
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        let account = self.credentials.get_account(stored.user_id).await?;
        let identity = account.identity();
        let (session, jti, refresh_token_hash) = self.issue_tokens(&identity)?;

        self.credentials
            .rotate_session(
                stored.id,
                &jti,
                &refresh_token_hash,
                Utc::now() + Duration::days(self.refresh_token_ttl_days),
            )
            .await?;

        tracing::debug!(user_id = %identity.id, "Tokens refreshed");
        self.events.publish(SessionEvent::TokenRefreshed(identity));
        Ok(session)
    }

    /// Revoke the caller's session
    pub async fn sign_out(&self, session: &SessionContext) -> Result<(), AuthError> {
        if !self.credentials.revoke_session(&session.session_id).await? {
            return Err(AuthError::SessionNotFound);
        }

        tracing::info!(user_id = %session.user_id(), "Signed out");
        self.events.publish(SessionEvent::SignedOut(session.user_id()));
        Ok(())
    }

    /// Resolve an access token into the caller's session
    pub async fn authenticate(&self, access_token: &str) -> Result<SessionContext, AuthError> {
        let claims = verify_token(access_token, &self.jwt_secret)?;
        if !claims.is(TokenType::Access) {
            return Err(AuthError::TokenError("Expected an access token".to_string()));
        }

        self.credentials
            .find_active_session(&claims.jti)
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        Ok(SessionContext::new(claims.identity()?, claims.jti))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        let config = Config {
            bcrypt_cost: 4,
            ..Config::default()
        };
        AuthService::new(&Store::memory(), SessionEvents::new(), &config)
    }

    #[tokio::test]
    async fn test_sign_up_then_sign_in() {
        let auth = service();
        let mut events = auth.events().subscribe();

        let session = auth
            .sign_up("ana@example.com", "secret1", "ana")
            .await
            .unwrap();
        assert_eq!(session.token_type, "Bearer");
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::SignedIn(_)));

        let ctx = auth.authenticate(&session.access_token).await.unwrap();
        assert_eq!(ctx.identity, session.user);

        let again = auth.sign_in("ana@example.com", "secret1").await.unwrap();
        assert_eq!(again.user.id, session.user.id);
    }

    #[tokio::test]
    async fn test_sign_up_rejects_taken_username_and_email() {
        let auth = service();
        auth.sign_up("ana@example.com", "secret1", "ana").await.unwrap();

        assert!(matches!(
            auth.sign_up("other@example.com", "secret1", "ana").await,
            Err(AuthError::UsernameTaken)
        ));
        assert!(matches!(
            auth.sign_up("ana@example.com", "secret1", "ana2").await,
            Err(AuthError::EmailTaken)
        ));
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let auth = service();
        auth.sign_up("ana@example.com", "secret1", "ana").await.unwrap();

        assert!(matches!(
            auth.sign_in("ana@example.com", "nope").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.sign_in("nobody@example.com", "secret1").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_sign_out_revokes() {
        let auth = service();
        let session = auth.sign_up("ana@example.com", "secret1", "ana").await.unwrap();

        let refreshed = auth.refresh(&session.refresh_token).await.unwrap();
        // The old pair is gone once rotated
        assert!(auth.refresh(&session.refresh_token).await.is_err());
        assert!(auth.authenticate(&session.access_token).await.is_err());

        let ctx = auth.authenticate(&refreshed.access_token).await.unwrap();
        auth.sign_out(&ctx).await.unwrap();
        assert!(matches!(
            auth.authenticate(&refreshed.access_token).await,
            Err(AuthError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_refresh_token_is_not_an_access_token() {
        let auth = service();
        let session = auth.sign_up("ana@example.com", "secret1", "ana").await.unwrap();
        assert!(auth.authenticate(&session.refresh_token).await.is_err());
        assert!(matches!(
            auth.refresh(&session.access_token).await,
            Err(AuthError::InvalidRefreshToken)
        ));
    }
}
