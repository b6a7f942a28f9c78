//! Request-scoped identity resolution.
//!
//! A [`Resolver`] lives for one request. Each (kind, key) pair is fetched from
//! the store at most once, even when several aggregation branches ask for it
//! at the same time; later lookups get the same immutable handle.
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;

use crate::error::StoreError;
use crate::model::{Entity, EntityKind, User};
use crate::store::EntityStore;

type Handle = Option<Arc<dyn Any + Send + Sync>>;
type Slot<T> = Arc<OnceCell<T>>;

pub struct Resolver<'s, S> {
    store: &'s S,
    entities: Mutex<HashMap<(EntityKind, String), Slot<Handle>>>,
    usernames: Mutex<HashMap<String, Slot<Option<String>>>>,
}

impl<'s, S: EntityStore> Resolver<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            entities: Mutex::new(HashMap::new()),
            usernames: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a record by primary key. A missing record is `Ok(None)`.
    pub async fn resolve<E: Entity>(&self, key: &str) -> Result<Option<Arc<E>>, StoreError> {
        let slot = {
            let mut entities = self.entities.lock().unwrap_or_else(PoisonError::into_inner);
            entities
                .entry((E::KIND, key.to_owned()))
                .or_default()
                .clone()
        };

        let handle = slot
            .get_or_try_init(|| async {
                let found = self.store.find::<E>(key).await?;
                Ok::<Handle, StoreError>(found.map(|e| Arc::new(e) as Arc<dyn Any + Send + Sync>))
            })
            .await?;

        Ok(handle.clone().and_then(|any| any.downcast::<E>().ok()))
    }

    /// Resolve a user by its unique username.
    pub async fn resolve_user(&self, username: &str) -> Result<Option<Arc<User>>, StoreError> {
        let slot = {
            let mut usernames = self.usernames.lock().unwrap_or_else(PoisonError::into_inner);
            usernames.entry(username.to_owned()).or_default().clone()
        };

        let id = slot
            .get_or_try_init(|| self.store.user_id_for(username))
            .await?;

        match id {
            Some(id) => self.resolve::<User>(id).await,
            None => Ok(None),
        }
    }

    /// Seed the cache with a record the caller already holds.
    pub fn prime<E: Entity>(&self, entity: E) -> Arc<E> {
        let entity = Arc::new(entity);
        let handle: Handle = Some(entity.clone());
        let mut entities = self.entities.lock().unwrap_or_else(PoisonError::into_inner);
        entities.insert(
            (E::KIND, entity.key().to_owned()),
            Arc::new(OnceCell::new_with(Some(handle))),
        );
        entity
    }
}
