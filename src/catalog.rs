//! Genres and book listings
use std::sync::Arc;

use futures::future::try_join_all;
use mockable::Clock;

use crate::aggregate::{self, BookView};
use crate::error::{Result, ServiceError};
use crate::model::{Book, EntityKind, Genre, TimeStamp, User};
use crate::resolver::Resolver;
use crate::store::EntityStore;
use crate::utils::mint_id;

#[derive(Debug, Clone, Default)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub genre: String, // genre title
    pub description: Option<String>,
}

pub struct CatalogService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock + Send + Sync>,
    admins: Vec<String>,
}

impl<S: EntityStore> CatalogService<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock + Send + Sync>, admins: Vec<String>) -> Self {
        Self {
            store,
            clock,
            admins,
        }
    }

    async fn genre_by_title(&self, title: &str) -> Result<Option<Genre>> {
        let title = title.to_owned();
        let mut found = self
            .store
            .find_where::<Genre, _>(move |genre| genre.title == title)
            .await?;
        Ok(found.pop())
    }

    pub async fn add_genre(&self, title: &str, actor: &str) -> Result<Genre> {
        if !self.admins.iter().any(|admin| admin == actor) {
            tracing::warn!(actor, "genre creation by non admin");
            return Err(ServiceError::unauthorized("Admin privileges required."));
        }
        let title = title.trim();
        if title.is_empty() {
            return Err(ServiceError::validation("Invalid parameters."));
        }
        // TODO: claim titles through an index tree like usernames, two admins
        // adding the same title at the same instant can both pass this check
        if self.genre_by_title(title).await?.is_some() {
            return Err(ServiceError::conflict("Genre already exists."));
        }

        let genre = Genre {
            id: mint_id(EntityKind::Genre)?,
            title: title.to_owned(),
        };
        self.store.insert(&genre).await?;
        tracing::info!(genre = %genre.id, title, "genre added");
        Ok(genre)
    }

    /// All genre titles, sorted.
    pub async fn list_genres(&self) -> Result<Vec<String>> {
        let mut titles: Vec<String> = self
            .store
            .find_where::<Genre, _>(|_| true)
            .await?
            .into_iter()
            .map(|genre| genre.title)
            .collect();
        titles.sort();
        Ok(titles)
    }

    /// List a book owned by `actor`. The listing date is assigned here.
    pub async fn list_book(&self, new: NewBook, actor: &str) -> Result<BookView> {
        if new.title.trim().is_empty() || new.author.trim().is_empty() || new.genre.trim().is_empty()
        {
            return Err(ServiceError::validation("Missing or invalid parameters."));
        }
        let genre = self
            .genre_by_title(new.genre.trim())
            .await?
            .ok_or_else(|| ServiceError::validation("Invalid genre."))?;
        let owner = self
            .store
            .find_user(actor)
            .await?
            .ok_or_else(|| ServiceError::not_found("User not found."))?;

        let book = Book {
            id: mint_id(EntityKind::Book)?,
            title: new.title.trim().to_owned(),
            author: new.author.trim().to_owned(),
            genre: genre.id.clone(),
            owner: owner.id.clone(),
            date_listed: TimeStamp::from(self.clock.utc()),
            description: new.description.filter(|d| !d.trim().is_empty()),
        };
        self.store.insert(&book).await?;

        let book_id = book.id.clone();
        let owner = self
            .store
            .update::<User, ServiceError, _>(&owner.id, |mut user| {
                if !user.books.contains(&book_id) {
                    user.books.push(book_id.clone());
                }
                Ok(user)
            })
            .await?
            .ok_or_else(|| ServiceError::not_found("User not found."))?;
        tracing::info!(book = %book.id, owner = %owner.username, "book listed");

        let resolver = Resolver::new(self.store.as_ref());
        resolver.prime(genre);
        resolver.prime(owner);
        Ok(aggregate::book_view(&resolver, &book).await?)
    }

    /// The `n` most recently listed books, newest first.
    pub async fn recent_books(&self, n: i64) -> Result<Vec<BookView>> {
        if n < 1 {
            return Err(ServiceError::validation("n must be greater than 0."));
        }
        let mut books = self.store.find_where::<Book, _>(|_| true).await?;
        books.sort_by_key(|book| {
            std::cmp::Reverse((book.date_listed.to_datetime_utc(), book.id.clone()))
        });
        books.truncate(usize::try_from(n).unwrap_or(usize::MAX));

        let resolver = Resolver::new(self.store.as_ref());
        let views =
            try_join_all(books.iter().map(|book| aggregate::book_view(&resolver, book))).await?;
        Ok(views)
    }

    pub async fn book_view(&self, book_id: &str) -> Result<BookView> {
        let resolver = Resolver::new(self.store.as_ref());
        let book = resolver
            .resolve::<Book>(book_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Book not found."))?;
        Ok(aggregate::book_view(&resolver, &book).await?)
    }
}
