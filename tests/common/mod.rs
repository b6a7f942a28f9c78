//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use book_trade::api::{Api, Session};
use book_trade::auth::Argon2Digest;
use book_trade::catalog::NewBook;
use book_trade::config::{AppConfig, Argon2Config};
use book_trade::notify::BroadcastNotifier;
use book_trade::store::SledStore;
use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use mockable::Clock;
use serde_json::json;
use tempfile::TempDir;

pub const ADMIN: &str = "admin";
pub const PASSWORD: &str = "secret1";

/// A clock that only moves when told to.
pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance_seconds(&self, seconds: i64) {
        *self.lock_clock() += TimeDelta::seconds(seconds);
    }

    fn lock_clock(&self) -> MutexGuard<'_, DateTime<Utc>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.lock_clock()
    }
}

pub struct World {
    pub api: Arc<Api<SledStore>>,
    pub store: Arc<SledStore>,
    pub clock: Arc<MutableClock>,
    pub notifier: Arc<BroadcastNotifier>,
    _dir: TempDir,
}

impl World {
    /// Fresh database in a temp dir, with a `Fiction` genre already added.
    pub async fn new() -> anyhow::Result<Self> {
        // Sled locks its directory, so every test gets its own database.
        let dir = tempfile::tempdir()?;
        let store = Arc::new(SledStore::open(dir.path().join("book_trade.db"))?);

        let config = AppConfig {
            admins: vec![ADMIN.to_string()],
            ..AppConfig::default()
        };
        // minimal cost, these digests only need to verify
        let digest = Argon2Digest::new(&Argon2Config {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        })?;
        let clock = Arc::new(MutableClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()));
        let notifier = Arc::new(BroadcastNotifier::new(64));

        let api = Api::new(
            store.clone(),
            &config,
            Arc::new(digest),
            notifier.clone(),
            clock.clone(),
        );

        let world = Self {
            api: Arc::new(api),
            store,
            clock,
            notifier,
            _dir: dir,
        };
        world.user(ADMIN).await?;
        world.api.catalog.add_genre("Fiction", ADMIN).await?;
        Ok(world)
    }

    /// Register `username` and log it in on a session of its own.
    pub async fn user(&self, username: &str) -> anyhow::Result<Session> {
        let reply = self
            .api
            .register(json!({
                "username": username,
                "email": format!("{username}@example.com"),
                "password": PASSWORD,
                "gender": "Female",
            }))
            .await;
        anyhow::ensure!(reply.is_success(), "register failed: {}", reply.body);

        let mut session = Session::new(format!("sess-{username}"));
        let reply = self
            .api
            .login(
                &mut session,
                json!({ "username": username, "password": PASSWORD, "expiry": 3600 }),
            )
            .await;
        anyhow::ensure!(reply.is_success(), "login failed: {}", reply.body);
        Ok(session)
    }

    /// List a Fiction book owned by the session's user, returning its id.
    pub async fn book(&self, owner: &Session, title: &str) -> anyhow::Result<String> {
        let username = owner.username.as_deref().context("session is not logged in")?;
        let view = self
            .api
            .catalog
            .list_book(
                NewBook {
                    title: title.to_string(),
                    author: "Anon".to_string(),
                    genre: "Fiction".to_string(),
                    description: None,
                },
                username,
            )
            .await?;
        self.clock.advance_seconds(1);
        Ok(view.id)
    }
}
