//! User registration and profiles
use std::sync::Arc;

use serde::Serialize;

use crate::aggregate::{self, UserView};
use crate::auth::PasswordDigest;
use crate::error::{Result, ServiceError};
use crate::model::{EntityKind, Gender, User};
use crate::resolver::Resolver;
use crate::store::{EntityStore, Registration};
use crate::utils::mint_id;

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub gender: String,
    pub description: Option<String>,
}

/// Answer to "am I logged in?".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserView>,
}

pub struct AccountService<S> {
    store: Arc<S>,
    digest: Arc<dyn PasswordDigest>,
}

fn is_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

/// Normalize and check a registration, reporting the first broken rule.
fn validate(new: &NewUser) -> Result<(String, String, Gender, String)> {
    let email = new.email.trim().to_lowercase();
    let username = new.username.trim().to_lowercase();
    let description = new.description.clone().unwrap_or_default();

    if email.is_empty() {
        return Err(ServiceError::validation("Email cannot be blank."));
    }
    if !is_email(&email) {
        return Err(ServiceError::validation("Invalid email address."));
    }
    if username.is_empty() || !username.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ServiceError::validation("Username must be alphanumeric."));
    }
    if !(4..=20).contains(&username.len()) {
        return Err(ServiceError::validation(
            "Username must be between 4 and 20 characters long",
        ));
    }
    if new.password.chars().any(char::is_whitespace) {
        return Err(ServiceError::validation("Password cannot contain spaces."));
    }
    if !(6..=20).contains(&new.password.chars().count()) {
        return Err(ServiceError::validation(
            "Password must be between 6 and 20 characters long.",
        ));
    }
    let gender = Gender::parse(&new.gender).ok_or_else(|| ServiceError::validation("Invalid gender."))?;
    if description.chars().count() > 100 {
        return Err(ServiceError::validation(
            "Description must not contain more than 100 characters.",
        ));
    }

    Ok((username, email, gender, description))
}

impl<S: EntityStore> AccountService<S> {
    pub fn new(store: Arc<S>, digest: Arc<dyn PasswordDigest>) -> Self {
        Self { store, digest }
    }

    /// Create a user. The new user is not logged in.
    pub async fn register(&self, new: NewUser) -> Result<User> {
        let (username, email, gender, description) = validate(&new).inspect_err(|e| {
            tracing::warn!(error = %e, "registration rejected");
        })?;

        let user = User {
            id: mint_id(EntityKind::User)?,
            username,
            email,
            gender,
            description,
            password_digest: self.digest.hash(&new.password)?,
            profile_picture_is_set: false,
            books: vec![],
            authorized_tokens: vec![],
        };

        match self.store.register_user(&user).await? {
            Registration::Created => {
                tracing::info!(user = %user.id, username = %user.username, "user registered");
                Ok(user)
            }
            Registration::EmailTaken => Err(ServiceError::validation("Email already taken.")),
            Registration::UsernameTaken => Err(ServiceError::validation("Username already taken.")),
        }
    }

    pub async fn user_view(&self, username: &str) -> Result<UserView> {
        let resolver = Resolver::new(self.store.as_ref());
        let user = resolver
            .resolve_user(&username.to_lowercase())
            .await?
            .ok_or_else(|| ServiceError::not_found("User not found."))?;
        Ok(aggregate::user_view(&resolver, &user).await?)
    }

    /// `authenticated` is the caller's session state as already validated.
    pub async fn status(&self, authenticated: Option<&str>) -> Result<AuthStatus> {
        let Some(username) = authenticated else {
            return Ok(AuthStatus {
                authenticated: false,
                user: None,
            });
        };
        match self.user_view(username).await {
            Ok(view) => Ok(AuthStatus {
                authenticated: true,
                user: Some(view),
            }),
            Err(ServiceError::NotFound(_)) => Ok(AuthStatus {
                authenticated: false,
                user: None,
            }),
            Err(e) => Err(e),
        }
    }
}
