//! Session token authentication.
//!
//! A user may be logged in from several sessions at once. Each session is a
//! token on the user record: the sha256 digest of the session id and an
//! expiry. Login replaces the token of its own session and drops every
//! expired token in the same atomic write, so concurrent logins of one user
//! never lose each other's tokens.
use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::TimeDelta;
use mockable::Clock;

use crate::config::Argon2Config;
use crate::error::{Result, ServiceError};
use crate::model::{SessionToken, TimeStamp, User};
use crate::store::EntityStore;
use crate::utils::session_digest;

/// Opaque password hashing service.
pub trait PasswordDigest: Send + Sync {
    fn hash(&self, password: &str) -> Result<String>;
    fn verify(&self, password: &str, digest: &str) -> bool;
}

/// Argon2id digests in PHC string format.
pub struct Argon2Digest {
    argon2: Argon2<'static>,
}

impl Argon2Digest {
    pub fn new(config: &Argon2Config) -> anyhow::Result<Self> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            None,
        )
        .map_err(|e| anyhow::anyhow!("invalid argon2 parameters: {e}"))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }
}

impl Default for Argon2Digest {
    fn default() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }
}

impl PasswordDigest for Argon2Digest {
    fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ServiceError::Digest(e.to_string()))
    }

    fn verify(&self, password: &str, digest: &str) -> bool {
        match PasswordHash::new(digest) {
            Ok(parsed) => self
                .argon2
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

pub struct SessionAuthenticator<S> {
    store: Arc<S>,
    digest: Arc<dyn PasswordDigest>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl<S: EntityStore> SessionAuthenticator<S> {
    pub fn new(
        store: Arc<S>,
        digest: Arc<dyn PasswordDigest>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            store,
            digest,
            clock,
        }
    }

    /// Verify credentials and authorize `session_id` for `ttl_secs` seconds.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        ttl_secs: i64,
        session_id: &str,
    ) -> Result<User> {
        if username.is_empty() || password.is_empty() || session_id.is_empty() {
            return Err(ServiceError::validation("Missing parameters."));
        }
        let ttl = TimeDelta::try_seconds(ttl_secs)
            .filter(|ttl| *ttl > TimeDelta::zero())
            .ok_or_else(|| ServiceError::validation("Expiry must be a positive number of seconds."))?;

        let username = username.to_lowercase();
        let Some(user) = self.store.find_user(&username).await? else {
            tracing::warn!(username = %username, "login for unknown user");
            return Err(ServiceError::InvalidCredentials);
        };
        if !self.digest.verify(password, &user.password_digest) {
            tracing::warn!(username = %username, "login with wrong password");
            return Err(ServiceError::InvalidCredentials);
        }

        let now = self.clock.utc();
        // stored timestamps are i64 nanoseconds, so expiry must stay encodable
        let expires_at = now
            .checked_add_signed(ttl)
            .filter(|at| at.timestamp_nanos_opt().is_some())
            .ok_or_else(|| ServiceError::validation("Expiry must be a positive number of seconds."))?;
        let digest = session_digest(session_id);

        let user = self
            .store
            .update::<User, ServiceError, _>(&user.id, |mut user| {
                user.authorized_tokens
                    .retain(|token| token.is_live_at(now) && token.session_digest != digest);
                user.authorized_tokens.push(SessionToken {
                    session_digest: digest.clone(),
                    expires_at: TimeStamp::from(expires_at),
                });
                Ok(user)
            })
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;

        tracing::info!(
            username = %username,
            sessions = user.authorized_tokens.len(),
            %expires_at,
            "user logged in"
        );
        Ok(user)
    }

    /// Revoke the token of `session_id`. Unknown users and sessions are a no-op.
    pub async fn logout(&self, username: &str, session_id: &str) -> Result<()> {
        let Some(id) = self.store.user_id_for(username).await? else {
            return Ok(());
        };
        let digest = session_digest(session_id);

        self.store
            .update::<User, ServiceError, _>(&id, |mut user| {
                user.authorized_tokens
                    .retain(|token| token.session_digest != digest);
                Ok(user)
            })
            .await?;

        tracing::info!(username, "user logged out");
        Ok(())
    }

    /// True while `session_id` holds an unexpired token of `username`.
    pub async fn validate(&self, username: &str, session_id: &str) -> Result<bool> {
        let Some(user) = self.store.find_user(username).await? else {
            return Ok(false);
        };
        let digest = session_digest(session_id);
        let now = self.clock.utc();

        Ok(user
            .authorized_tokens
            .iter()
            .any(|token| token.session_digest == digest && token.is_live_at(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> Argon2Digest {
        Argon2Digest::new(&Argon2Config {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap()
    }

    #[test]
    fn digest_verifies_only_the_original_password() {
        let digest = cheap();
        let hashed = digest.hash("hunter22").unwrap();

        assert_ne!(hashed, "hunter22");
        assert!(digest.verify("hunter22", &hashed));
        assert!(!digest.verify("hunter23", &hashed));
        assert!(!digest.verify("hunter22", "not a phc string"));
    }

    #[test]
    fn rejects_impossible_params() {
        let bad = Argon2Config {
            memory_kib: 64,
            iterations: 0,
            parallelism: 1,
        };
        assert!(Argon2Digest::new(&bad).is_err());
    }
}
