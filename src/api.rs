//! Framework-agnostic request boundary.
//!
//! Every operation takes the caller's [`Session`] plus a JSON body and returns
//! a [`Reply`] carrying an HTTP status and a `{success, ...}` envelope. A web
//! layer only has to move bytes in and out. Internal failures are logged here
//! and replaced with a generic message.
use std::sync::Arc;

use mockable::{Clock, DefaultClock};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::accounts::{AccountService, NewUser};
use crate::auth::{Argon2Digest, PasswordDigest, SessionAuthenticator};
use crate::catalog::{CatalogService, NewBook};
use crate::config::AppConfig;
use crate::error::ServiceError;
use crate::messages::MessageService;
use crate::notify::Notifier;
use crate::service::{NewTrade, TradeService};
use crate::store::EntityStore;
use crate::trade::TradeStatus;

pub const AUTH_REQUIRED: &str = "Authentication required.";
pub const GENERIC_ERROR: &str = "Error: Please try again.";

/// The caller's cookie session. `username` is set by a successful login.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub username: Option<String>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
}

impl Reply {
    /// 200 with `fields` merged into a successful envelope.
    pub fn ok(fields: Value) -> Self {
        let mut body = json!({ "success": true });
        if let (Some(body), Value::Object(fields)) = (body.as_object_mut(), fields) {
            body.extend(fields);
        }
        Self { status: 200, body }
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({ "success": false, "error": message }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.body["success"] == Value::Bool(true)
    }
}

impl From<ServiceError> for Reply {
    fn from(err: ServiceError) -> Self {
        match &err {
            ServiceError::Validation(m) | ServiceError::Conflict(m) => Reply::error(400, m),
            ServiceError::InvalidCredentials => Reply::error(400, &err.to_string()),
            ServiceError::NotFound(m) => Reply::error(404, m),
            ServiceError::Unauthorized(m) => Reply::error(403, m),
            ServiceError::Store(_) | ServiceError::Aggregation(_) | ServiceError::Digest(_) => {
                tracing::error!(error = %err, "request failed");
                Reply::error(500, GENERIC_ERROR)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTradeRequest {
    pub book: String,
    pub offer: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTradeRequest {
    pub trade: String,
    pub status: String,
    #[serde(default)]
    pub selection: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub trade: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    /// Session lifetime in seconds.
    #[serde(default)]
    pub expiry: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub gender: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookRequest {
    pub title: String,
    pub author: String,
    pub genre: String,
    #[serde(default, alias = "additionalDescription")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddGenreRequest {
    pub genre: String,
}

fn parse<T: DeserializeOwned>(body: Value, missing: &str) -> Result<T, Reply> {
    serde_json::from_value(body).map_err(|e| {
        tracing::debug!(error = %e, "malformed request body");
        Reply::error(400, missing)
    })
}

/// Collapse a handler result into a reply.
fn reply(result: Result<Reply, Reply>) -> Reply {
    result.unwrap_or_else(|err| err)
}

pub struct Api<S> {
    pub trades: TradeService<S>,
    pub messages: MessageService<S>,
    pub auth: SessionAuthenticator<S>,
    pub accounts: AccountService<S>,
    pub catalog: CatalogService<S>,
    default_ttl_secs: i64,
}

impl<S: EntityStore> Api<S> {
    pub fn new(
        store: Arc<S>,
        config: &AppConfig,
        digest: Arc<dyn PasswordDigest>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            trades: TradeService::new(store.clone(), notifier.clone(), clock.clone()),
            messages: MessageService::new(store.clone(), notifier, clock.clone()),
            auth: SessionAuthenticator::new(store.clone(), digest.clone(), clock.clone()),
            accounts: AccountService::new(store.clone(), digest),
            catalog: CatalogService::new(store, clock, config.admins.clone()),
            default_ttl_secs: config.auth.default_ttl_secs,
        }
    }

    /// Wire the services with argon2 digests and the system clock.
    pub fn from_config(
        store: Arc<S>,
        config: &AppConfig,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        let digest = Argon2Digest::new(&config.auth.argon2)?;
        Ok(Self::new(
            store,
            config,
            Arc::new(digest),
            notifier,
            Arc::new(DefaultClock),
        ))
    }

    /// Username of the caller if its session holds a live token.
    async fn authenticated(&self, session: &Session) -> Result<String, Reply> {
        let Some(username) = session.username.as_deref() else {
            return Err(Reply::error(403, AUTH_REQUIRED));
        };
        match self.auth.validate(username, &session.id).await {
            Ok(true) => Ok(username.to_owned()),
            Ok(false) => Err(Reply::error(403, AUTH_REQUIRED)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn register(&self, body: Value) -> Reply {
        reply(async {
            let req: RegisterRequest = parse(body, "Missing parameters.")?;
            self.accounts
                .register(NewUser {
                    username: req.username,
                    email: req.email,
                    password: req.password,
                    gender: req.gender,
                    description: req.description,
                })
                .await?;
            Ok::<_, Reply>(Reply::ok(json!({})))
        }
        .await)
    }

    pub async fn login(&self, session: &mut Session, body: Value) -> Reply {
        reply(async {
            let req: LoginRequest = parse(body, "Missing parameters.")?;
            let ttl = req.expiry.unwrap_or(self.default_ttl_secs);
            let user = self
                .auth
                .login(&req.username, &req.password, ttl, &session.id)
                .await?;
            let view = self.accounts.user_view(&user.username).await?;
            session.username = Some(user.username);
            Ok::<_, Reply>(Reply::ok(json!({ "user": view })))
        }
        .await)
    }

    pub async fn logout(&self, session: &mut Session) -> Reply {
        reply(async {
            let username = self.authenticated(session).await?;
            self.auth.logout(&username, &session.id).await?;
            session.username = None;
            Ok::<_, Reply>(Reply::ok(json!({})))
        }
        .await)
    }

    pub async fn status(&self, session: &Session) -> Reply {
        reply(async {
            let username = self.authenticated(session).await.ok();
            let status = self.accounts.status(username.as_deref()).await?;
            Ok::<_, Reply>(Reply::ok(json!(status)))
        }
        .await)
    }

    pub async fn user_profile(&self, username: &str) -> Reply {
        reply(async {
            let view = self.accounts.user_view(username).await?;
            Ok::<_, Reply>(Reply::ok(json!({ "user": view })))
        }
        .await)
    }

    pub async fn create_trade(&self, session: &Session, body: Value) -> Reply {
        reply(async {
            let actor = self.authenticated(session).await?;
            let req: CreateTradeRequest = parse(body, "Missing or invalid parameters.")?;
            let view = self
                .trades
                .create_trade(
                    NewTrade {
                        list_book: req.book,
                        offer_books: req.offer,
                        description: req.description,
                    },
                    &actor,
                )
                .await?;
            Ok::<_, Reply>(Reply::ok(json!({ "trade": view })))
        }
        .await)
    }

    /// Accept (`"A"` with a selection) or cancel (`"C"`) a trade.
    pub async fn update_trade(&self, session: &Session, body: Value) -> Reply {
        reply(async {
            let actor = self.authenticated(session).await?;
            let req: UpdateTradeRequest = parse(body, "Missing or invalid parameters.")?;
            match TradeStatus::from_code(&req.status) {
                Some(TradeStatus::Accepted) => {
                    let selection = req
                        .selection
                        .filter(|s| !s.is_empty())
                        .ok_or_else(|| Reply::error(400, "Missing selection."))?;
                    self.trades.accept_trade(&req.trade, &selection, &actor).await?;
                }
                Some(TradeStatus::Cancelled) => {
                    self.trades.cancel_trade(&req.trade, &actor).await?;
                }
                _ => return Err(Reply::error(400, "Invalid status.")),
            }
            Ok::<_, Reply>(Reply::ok(json!({})))
        }
        .await)
    }

    pub async fn list_trades(&self, session: &Session) -> Reply {
        reply(async {
            let actor = self.authenticated(session).await?;
            let trades = self.trades.list_trades_for_user(&actor).await?;
            Ok::<_, Reply>(Reply::ok(json!({ "trades": trades })))
        }
        .await)
    }

    pub async fn get_trade(&self, trade_id: &str) -> Reply {
        reply(async {
            let view = self.trades.get_trade_view(trade_id).await?;
            Ok::<_, Reply>(Reply::ok(json!({ "trade": view })))
        }
        .await)
    }

    pub async fn create_message(&self, session: &Session, body: Value) -> Reply {
        reply(async {
            let actor = self.authenticated(session).await?;
            let req: CreateMessageRequest = parse(body, "Missing content or trade")?;
            let message = self
                .messages
                .create_message(&req.content, &req.trade, &actor)
                .await?;
            Ok::<_, Reply>(Reply::ok(json!({ "message": message })))
        }
        .await)
    }

    pub async fn list_messages(&self, session: &Session, trade_id: &str) -> Reply {
        reply(async {
            let actor = self.authenticated(session).await?;
            let messages = self.messages.list_trade_messages(trade_id, &actor).await?;
            Ok::<_, Reply>(Reply::ok(json!({ "messages": messages })))
        }
        .await)
    }

    pub async fn list_genres(&self) -> Reply {
        reply(async {
            let genres = self.catalog.list_genres().await?;
            Ok::<_, Reply>(Reply::ok(json!({ "genres": genres })))
        }
        .await)
    }

    pub async fn add_genre(&self, session: &Session, body: Value) -> Reply {
        reply(async {
            let actor = self.authenticated(session).await?;
            let req: AddGenreRequest = parse(body, "Invalid parameters.")?;
            let genre = self.catalog.add_genre(&req.genre, &actor).await?;
            Ok::<_, Reply>(Reply::ok(json!({ "genre": genre.title })))
        }
        .await)
    }

    pub async fn create_book(&self, session: &Session, body: Value) -> Reply {
        reply(async {
            let actor = self.authenticated(session).await?;
            let req: CreateBookRequest = parse(body, "Missing or invalid parameters.")?;
            let book = self
                .catalog
                .list_book(
                    NewBook {
                        title: req.title,
                        author: req.author,
                        genre: req.genre,
                        description: req.description,
                    },
                    &actor,
                )
                .await?;
            Ok::<_, Reply>(Reply::ok(json!({ "book": book })))
        }
        .await)
    }

    pub async fn recent_books(&self, n: i64) -> Reply {
        reply(async {
            let books = self.catalog.recent_books(n).await?;
            Ok::<_, Reply>(Reply::ok(json!({ "books": books })))
        }
        .await)
    }
}
