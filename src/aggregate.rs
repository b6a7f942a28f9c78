//! Relational aggregation of stored records into presentation views.
//!
//! Records only carry ids. The functions here resolve those ids through a
//! [`Resolver`] and return plain view structs. Independent references are
//! resolved concurrently; multi-valued references keep their input order no
//! matter which fetch completes first. Expansion is fixed at one level per
//! field (a book shows its owner's username, not the owner's books), so the
//! walk always terminates.
//!
//! A reference that is already a view ([`Ref::Resolved`]) is passed through
//! untouched, which makes aggregating an aggregated trade a no-op.
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::{Book, EntityKind, Gender, Genre, Trade, User};
use crate::resolver::Resolver;
use crate::store::EntityStore;
use crate::trade::TradeStatus;

#[derive(thiserror::Error, Debug)]
pub enum AggregateError {
    #[error("dangling {kind} reference {key}")]
    Dangling { kind: EntityKind, key: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A reference field: either a raw key or an already resolved view.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Ref<T> {
    Resolved(T),
    Id(String),
}

impl<T> Ref<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Ref::Resolved(_))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BookSummary {
    pub id: String,
    pub title: String,
    pub author: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub username: String,
    pub email: String,
    pub gender: Gender,
    pub description: String,
    pub profile_picture_is_set: bool,
    pub books: Vec<BookSummary>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BookView {
    pub id: String,
    pub title: String,
    pub author: String,
    pub genre: String, // genre title
    pub owner: String, // owner username
    pub date_listed: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
}

/// A trade whose references may or may not be resolved yet.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TradeDoc {
    pub id: String,
    pub list_user: Ref<UserView>,
    pub offer_user: Ref<UserView>,
    pub list_book: Ref<BookView>,
    pub offer_books: Vec<Ref<BookView>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub selected_book: Option<Ref<BookView>>,
    pub description: String,
    pub status: TradeStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TradeView {
    pub id: String,
    pub list_user: UserView,
    pub offer_user: UserView,
    pub list_book: BookView,
    pub offer_books: Vec<BookView>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub selected_book: Option<BookView>,
    pub description: String,
    pub status: TradeStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&Trade> for TradeDoc {
    fn from(trade: &Trade) -> Self {
        Self {
            id: trade.id.clone(),
            list_user: Ref::Id(trade.list_user.clone()),
            offer_user: Ref::Id(trade.offer_user.clone()),
            list_book: Ref::Id(trade.list_book.clone()),
            offer_books: trade.offer_books.iter().cloned().map(Ref::Id).collect(),
            selected_book: trade.selected_book.clone().map(Ref::Id),
            description: trade.description.clone(),
            status: trade.status,
            created_at: trade.created_at.to_datetime_utc(),
        }
    }
}

impl From<TradeView> for TradeDoc {
    fn from(view: TradeView) -> Self {
        Self {
            id: view.id,
            list_user: Ref::Resolved(view.list_user),
            offer_user: Ref::Resolved(view.offer_user),
            list_book: Ref::Resolved(view.list_book),
            offer_books: view.offer_books.into_iter().map(Ref::Resolved).collect(),
            selected_book: view.selected_book.map(Ref::Resolved),
            description: view.description,
            status: view.status,
            created_at: view.created_at,
        }
    }
}

fn dangling(kind: EntityKind, key: &str) -> AggregateError {
    AggregateError::Dangling {
        kind,
        key: key.to_owned(),
    }
}

/// Resolve every reference of a trade. Fails as a whole if any branch fails.
pub async fn trade_view<S: EntityStore>(
    resolver: &Resolver<'_, S>,
    doc: TradeDoc,
) -> Result<TradeView, AggregateError> {
    let TradeDoc {
        id,
        list_user,
        offer_user,
        list_book,
        offer_books,
        selected_book,
        description,
        status,
        created_at,
    } = doc;

    let selected = async {
        match selected_book {
            Some(book) => book_ref(resolver, book).await.map(Some),
            None => Ok(None),
        }
    };

    let (list_user, offer_user, list_book, offer_books, selected_book) = futures::try_join!(
        user_ref(resolver, list_user),
        user_ref(resolver, offer_user),
        book_ref(resolver, list_book),
        try_join_all(offer_books.into_iter().map(|book| book_ref(resolver, book))),
        selected,
    )?;

    Ok(TradeView {
        id,
        list_user,
        offer_user,
        list_book,
        offer_books,
        selected_book,
        description,
        status,
        created_at,
    })
}

async fn user_ref<S: EntityStore>(
    resolver: &Resolver<'_, S>,
    user: Ref<UserView>,
) -> Result<UserView, AggregateError> {
    match user {
        Ref::Resolved(view) => Ok(view),
        Ref::Id(username) => user_view_by_name(resolver, &username).await,
    }
}

async fn book_ref<S: EntityStore>(
    resolver: &Resolver<'_, S>,
    book: Ref<BookView>,
) -> Result<BookView, AggregateError> {
    match book {
        Ref::Resolved(view) => Ok(view),
        Ref::Id(id) => book_view_by_id(resolver, &id).await,
    }
}

pub async fn user_view_by_name<S: EntityStore>(
    resolver: &Resolver<'_, S>,
    username: &str,
) -> Result<UserView, AggregateError> {
    let user = resolver
        .resolve_user(username)
        .await?
        .ok_or_else(|| dangling(EntityKind::User, username))?;
    user_view(resolver, &user).await
}

/// Project a user, listing each of its books by title and author.
pub async fn user_view<S: EntityStore>(
    resolver: &Resolver<'_, S>,
    user: &User,
) -> Result<UserView, AggregateError> {
    let books = try_join_all(user.books.iter().map(|id| async move {
        let book = resolver
            .resolve::<Book>(id)
            .await?
            .ok_or_else(|| dangling(EntityKind::Book, id))?;
        Ok::<_, AggregateError>(BookSummary {
            id: book.id.clone(),
            title: book.title.clone(),
            author: book.author.clone(),
        })
    }))
    .await?;

    Ok(UserView {
        username: user.username.clone(),
        email: user.email.clone(),
        gender: user.gender,
        description: user.description.clone(),
        profile_picture_is_set: user.profile_picture_is_set,
        books,
    })
}

pub async fn book_view_by_id<S: EntityStore>(
    resolver: &Resolver<'_, S>,
    id: &str,
) -> Result<BookView, AggregateError> {
    let book = resolver
        .resolve::<Book>(id)
        .await?
        .ok_or_else(|| dangling(EntityKind::Book, id))?;
    book_view(resolver, &book).await
}

/// Project a book with its owner's username and its genre title.
pub async fn book_view<S: EntityStore>(
    resolver: &Resolver<'_, S>,
    book: &Book,
) -> Result<BookView, AggregateError> {
    let owner = async {
        resolver
            .resolve::<User>(&book.owner)
            .await?
            .ok_or_else(|| dangling(EntityKind::User, &book.owner))
    };
    let genre = async {
        resolver
            .resolve::<Genre>(&book.genre)
            .await?
            .ok_or_else(|| dangling(EntityKind::Genre, &book.genre))
    };
    let (owner, genre) = futures::try_join!(owner, genre)?;

    Ok(BookView {
        id: book.id.clone(),
        title: book.title.clone(),
        author: book.author.clone(),
        genre: genre.title.clone(),
        owner: owner.username.clone(),
        date_listed: book.date_listed.to_datetime_utc(),
        description: book.description.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_ids_serialize_as_strings() {
        let id: Ref<BookSummary> = Ref::Id("book_1".into());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"book_1\"");

        let resolved = Ref::Resolved(BookSummary {
            id: "book_1".into(),
            title: "Dune".into(),
            author: "Herbert".into(),
        });
        let json = serde_json::to_value(&resolved).unwrap();
        assert_eq!(json["title"], "Dune");

        let back: Ref<BookSummary> = serde_json::from_value(json).unwrap();
        assert!(back.is_resolved());
    }
}
