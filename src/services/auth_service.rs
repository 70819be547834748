//! Identity operations: token verification and minting, profile access,
//! and the admin user-management surface.

use std::time::Instant;

use serde_json::{Map, Value};

use crate::api::Timed;
use crate::error::ApiError;
use crate::provider::{Identity, NewUser, UserPage, UserRecord, UserUpdate};
use crate::state::AppState;

pub struct AuthService {
    state: AppState,
}

impl AuthService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub async fn verify_token(
        &self,
        token: &str,
        check_revoked: bool,
    ) -> Result<Timed<Identity>, ApiError> {
        let auth = self.state.capabilities.auth().await?;
        let started = Instant::now();
        let identity = auth.verify_token(token, check_revoked).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        tracing::info!(uid = %identity.uid, check_revoked, elapsed, "token verified");
        Ok(Timed::new(identity, elapsed))
    }

    /// Mint a custom sign-in token for `uid`. Claims ride along and surface
    /// in verified identities after the client exchanges the token.
    pub async fn create_custom_token(
        &self,
        uid: &str,
        claims: Option<Map<String, Value>>,
    ) -> Result<Timed<String>, ApiError> {
        let auth = self.state.capabilities.auth().await?;
        let started = Instant::now();
        let token = auth.create_custom_token(uid, claims).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        tracing::info!(uid = %uid, elapsed, "custom token minted");
        Ok(Timed::new(token, elapsed))
    }

    pub async fn get_user(&self, uid: &str) -> Result<Timed<UserRecord>, ApiError> {
        let auth = self.state.capabilities.auth().await?;
        let started = Instant::now();
        let record = auth.get_user(uid).await?;
        Ok(Timed::new(record, started.elapsed().as_millis() as u64))
    }

    pub async fn create_user(&self, user: NewUser) -> Result<Timed<UserRecord>, ApiError> {
        let auth = self.state.capabilities.auth().await?;
        let started = Instant::now();
        let record = auth.create_user(user).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        tracing::info!(uid = %record.uid, elapsed, "user created");
        Ok(Timed::new(record, elapsed))
    }

    pub async fn update_user(
        &self,
        uid: &str,
        update: UserUpdate,
    ) -> Result<Timed<UserRecord>, ApiError> {
        let auth = self.state.capabilities.auth().await?;
        let started = Instant::now();
        let record = auth.update_user(uid, update).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        tracing::info!(uid = %uid, elapsed, "user updated");
        Ok(Timed::new(record, elapsed))
    }

    pub async fn delete_user(&self, uid: &str) -> Result<Timed<()>, ApiError> {
        let auth = self.state.capabilities.auth().await?;
        let started = Instant::now();
        auth.delete_user(uid).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        tracing::info!(uid = %uid, elapsed, "user deleted");
        Ok(Timed::new((), elapsed))
    }

    pub async fn list_users(
        &self,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<Timed<UserPage>, ApiError> {
        let auth = self.state.capabilities.auth().await?;
        let started = Instant::now();
        let page = auth.list_users(page_size, page_token).await?;
        Ok(Timed::new(page, started.elapsed().as_millis() as u64))
    }

    /// Replace the user's custom claims wholesale. Role and permission
    /// gates read these on every check, so changes apply immediately.
    pub async fn set_custom_claims(
        &self,
        uid: &str,
        claims: Map<String, Value>,
    ) -> Result<Timed<()>, ApiError> {
        let auth = self.state.capabilities.auth().await?;
        let started = Instant::now();
        auth.set_custom_claims(uid, claims).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        tracing::info!(uid = %uid, elapsed, "custom claims replaced");
        Ok(Timed::new((), elapsed))
    }

    pub async fn revoke_tokens(&self, uid: &str) -> Result<Timed<()>, ApiError> {
        let auth = self.state.capabilities.auth().await?;
        let started = Instant::now();
        auth.revoke_tokens(uid).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        tracing::info!(uid = %uid, elapsed, "tokens revoked");
        Ok(Timed::new((), elapsed))
    }
}
