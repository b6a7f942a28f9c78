//! Entity store port and its sled-backed implementation.
//!
//! Every record kind lives in its own sled tree, keyed by primary id and
//! encoded as CBOR. Username and email uniqueness is kept in two index trees
//! that are claimed in the same transaction as the user record itself.
//!
//! Mutations go through [`EntityStore::update`], a compare-and-swap loop: the
//! closure sees the current record and either returns its replacement or an
//! error. A concurrent writer makes the swap fail, in which case the closure
//! runs again against the fresher record, so preconditions checked inside it
//! hold at the moment of the write.
use std::path::Path;

use async_trait::async_trait;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionError};

use crate::error::StoreError;
use crate::model::{Entity, EntityKind, User};

const USERNAMES: &str = "idx_usernames";
const EMAILS: &str = "idx_emails";

/// Outcome of claiming a new user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    UsernameTaken,
    EmailTaken,
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch a record by primary key. Absence is `Ok(None)`, not an error.
    async fn find<E: Entity>(&self, key: &str) -> Result<Option<E>, StoreError>;

    /// Every record of a kind matching `predicate`, in key order.
    async fn find_where<E, P>(&self, predicate: P) -> Result<Vec<E>, StoreError>
    where
        E: Entity,
        P: Fn(&E) -> bool + Send;

    /// Insert a record whose key must not exist yet. Returns `false` when it does.
    async fn insert<E: Entity>(&self, entity: &E) -> Result<bool, StoreError>;

    /// Atomically replace a single record. `Ok(None)` when the key is absent.
    async fn update<E, X, F>(&self, key: &str, mutate: F) -> Result<Option<E>, X>
    where
        E: Entity,
        X: From<StoreError> + Send,
        F: FnMut(E) -> Result<E, X> + Send;

    /// Store a new user while claiming its username and email.
    async fn register_user(&self, user: &User) -> Result<Registration, StoreError>;

    /// Primary id of the user holding `username`.
    async fn user_id_for(&self, username: &str) -> Result<Option<String>, StoreError>;

    /// User record holding `username`.
    async fn find_user(&self, username: &str) -> Result<Option<User>, StoreError> {
        match self.user_id_for(username).await? {
            Some(id) => self.find::<User>(&id).await,
            None => Ok(None),
        }
    }

    /// Monotonic sequence used to order records by creation.
    async fn next_sequence(&self) -> Result<u64, StoreError>;
}

pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn new(db: sled::Db) -> Self {
        Self { db }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self::new(sled::open(path)?))
    }

    /// A throwaway database removed when dropped.
    pub fn temporary() -> Result<Self, StoreError> {
        Ok(Self::new(sled::Config::new().temporary(true).open()?))
    }

    fn tree(&self, kind: EntityKind) -> Result<sled::Tree, StoreError> {
        Ok(self.db.open_tree(kind.as_str())?)
    }
}

fn encode<E: Entity>(entity: &E) -> Result<Vec<u8>, StoreError> {
    minicbor::to_vec(entity).map_err(|e| StoreError::Encode {
        kind: E::KIND.as_str(),
        message: e.to_string(),
    })
}

fn decode<E: Entity>(bytes: &[u8]) -> Result<E, StoreError> {
    minicbor::decode(bytes).map_err(|source| StoreError::Decode {
        kind: E::KIND.as_str(),
        source,
    })
}

#[async_trait]
impl EntityStore for SledStore {
    async fn find<E: Entity>(&self, key: &str) -> Result<Option<E>, StoreError> {
        match self.tree(E::KIND)?.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn find_where<E, P>(&self, predicate: P) -> Result<Vec<E>, StoreError>
    where
        E: Entity,
        P: Fn(&E) -> bool + Send,
    {
        let mut found = vec![];
        for entry in self.tree(E::KIND)?.iter() {
            let (_, bytes) = entry?;
            let entity: E = decode(&bytes)?;
            if predicate(&entity) {
                found.push(entity);
            }
        }
        Ok(found)
    }

    async fn insert<E: Entity>(&self, entity: &E) -> Result<bool, StoreError> {
        let bytes = encode(entity)?;
        let swapped =
            self.tree(E::KIND)?
                .compare_and_swap(entity.key(), None as Option<&[u8]>, Some(bytes))?;
        Ok(swapped.is_ok())
    }

    async fn update<E, X, F>(&self, key: &str, mut mutate: F) -> Result<Option<E>, X>
    where
        E: Entity,
        X: From<StoreError> + Send,
        F: FnMut(E) -> Result<E, X> + Send,
    {
        let tree = self.tree(E::KIND)?;
        loop {
            let Some(current) = tree.get(key).map_err(StoreError::from)? else {
                return Ok(None);
            };
            let next = mutate(decode(&current)?)?;
            let bytes = encode(&next)?;

            match tree
                .compare_and_swap(key, Some(&current), Some(bytes))
                .map_err(StoreError::from)?
            {
                Ok(()) => return Ok(Some(next)),
                Err(_) => {
                    tracing::debug!(kind = E::KIND.as_str(), key, "concurrent write, retrying update");
                }
            }
        }
    }

    async fn register_user(&self, user: &User) -> Result<Registration, StoreError> {
        let users = self.tree(EntityKind::User)?;
        let usernames = self.db.open_tree(USERNAMES)?;
        let emails = self.db.open_tree(EMAILS)?;
        let bytes = encode(user)?;

        let outcome = (&users, &usernames, &emails).transaction(|(users, usernames, emails)| {
            if usernames.get(user.username.as_str())?.is_some() {
                return Err(ConflictableTransactionError::Abort(Registration::UsernameTaken));
            }
            if emails.get(user.email.as_str())?.is_some() {
                return Err(ConflictableTransactionError::Abort(Registration::EmailTaken));
            }
            usernames.insert(user.username.as_str(), user.id.as_str())?;
            emails.insert(user.email.as_str(), user.id.as_str())?;
            users.insert(user.id.as_str(), bytes.as_slice())?;
            Ok(())
        });

        match outcome {
            Ok(()) => Ok(Registration::Created),
            Err(TransactionError::Abort(taken)) => Ok(taken),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    async fn user_id_for(&self, username: &str) -> Result<Option<String>, StoreError> {
        let usernames = self.db.open_tree(USERNAMES)?;
        Ok(usernames
            .get(username)?
            .map(|id| String::from_utf8_lossy(&id).into_owned()))
    }

    async fn next_sequence(&self) -> Result<u64, StoreError> {
        Ok(self.db.generate_id()?)
    }
}
