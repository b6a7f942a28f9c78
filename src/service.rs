//! Service layer API for trade workflow operations
use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use mockable::Clock;

use crate::aggregate::{self, AggregateError, TradeDoc, TradeView};
use crate::error::{Result, ServiceError};
use crate::model::{Book, EntityKind, TimeStamp, Trade, User};
use crate::notify::{Event, Notifier};
use crate::resolver::Resolver;
use crate::store::EntityStore;
use crate::trade::TradeStatus;
use crate::utils::mint_id;

/// Input of [`TradeService::create_trade`].
#[derive(Debug, Clone, Default)]
pub struct NewTrade {
    pub list_book: String,
    pub offer_books: Vec<String>,
    pub description: Option<String>,
}

pub struct TradeService<S> {
    store: Arc<S>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl<S: EntityStore> TradeService<S> {
    pub fn new(
        store: Arc<S>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
        }
    }

    /// Propose a trade: `actor` offers some of their books for `list_book`.
    ///
    /// Preconditions are checked in a fixed order and the first failure is
    /// reported: request shape, listed book existence, self trade, offer set.
    pub async fn create_trade(&self, new: NewTrade, actor: &str) -> Result<TradeView> {
        if new.list_book.trim().is_empty()
            || new.offer_books.is_empty()
            || new.offer_books.iter().any(|id| id.trim().is_empty())
        {
            tracing::warn!(actor, "rejected trade with missing parameters");
            return Err(ServiceError::validation("Missing or invalid parameters."));
        }

        let resolver = Resolver::new(self.store.as_ref());

        let list_book = resolver
            .resolve::<Book>(&new.list_book)
            .await?
            .ok_or_else(|| ServiceError::not_found("Listing book does not exist."))?;

        let offerer = resolver
            .resolve_user(actor)
            .await?
            .ok_or_else(|| ServiceError::not_found("User not found."))?;

        if list_book.owner == offerer.id {
            tracing::warn!(actor, book = %list_book.id, "rejected self trade");
            return Err(ServiceError::validation("You cannot trade with yourself."));
        }

        self.check_offer(&resolver, &new.offer_books, &offerer).await?;

        let lister = resolver
            .resolve::<User>(&list_book.owner)
            .await?
            .ok_or_else(|| AggregateError::Dangling {
                kind: EntityKind::User,
                key: list_book.owner.clone(),
            })?;

        let trade = Trade {
            id: mint_id(EntityKind::Trade)?,
            list_user: lister.username.clone(),
            offer_user: offerer.username.clone(),
            list_book: list_book.id.clone(),
            offer_books: new.offer_books,
            description: new.description.unwrap_or_default(),
            selected_book: None,
            status: TradeStatus::Pending,
            created_at: TimeStamp::from(self.clock.utc()),
        };
        self.store.insert(&trade).await?;

        tracing::info!(
            trade = %trade.id,
            list_user = %trade.list_user,
            offer_user = %trade.offer_user,
            offered = trade.offer_books.len(),
            "trade created"
        );
        self.notifier.deliver(
            &trade.list_user,
            Event::TradeCreated {
                trade: trade.id.clone(),
            },
        );

        Ok(aggregate::trade_view(&resolver, TradeDoc::from(&trade)).await?)
    }

    /// Every offered id must be distinct, exist, and belong to `offerer`.
    async fn check_offer(
        &self,
        resolver: &Resolver<'_, S>,
        offer_books: &[String],
        offerer: &User,
    ) -> Result<()> {
        let distinct: HashSet<&str> = offer_books.iter().map(String::as_str).collect();
        if distinct.len() != offer_books.len() {
            tracing::warn!(user = %offerer.username, "rejected offer with repeated books");
            return Err(ServiceError::validation("Invalid offer."));
        }

        let books = try_join_all(offer_books.iter().map(|id| resolver.resolve::<Book>(id))).await?;
        let owned = books
            .iter()
            .all(|book| matches!(book, Some(book) if book.owner == offerer.id));
        if !owned {
            tracing::warn!(user = %offerer.username, "rejected offer of unowned books");
            return Err(ServiceError::validation("Invalid offer."));
        }
        Ok(())
    }

    /// The listing user accepts the trade, picking one of the offered books.
    pub async fn accept_trade(&self, trade_id: &str, selected: &str, actor: &str) -> Result<Trade> {
        let trade = self
            .store
            .update::<Trade, ServiceError, _>(trade_id, |mut trade| {
                if trade.list_user != actor {
                    return Err(ServiceError::unauthorized(
                        "Only the listing user can accept this trade.",
                    ));
                }
                trade.status = trade.status.transition(TradeStatus::Accepted)?;
                if !trade.offer_books.iter().any(|id| id == selected) {
                    return Err(ServiceError::validation(
                        "Selected book is not part of the offer.",
                    ));
                }
                trade.selected_book = Some(selected.to_owned());
                Ok(trade)
            })
            .await
            .inspect_err(|e| tracing::warn!(trade = trade_id, actor, error = %e, "accept rejected"))?
            .ok_or_else(|| ServiceError::not_found("Trade not found."))?;

        tracing::info!(trade = %trade.id, selected, "trade accepted");
        self.notify_update(&trade, actor);
        Ok(trade)
    }

    /// Either participant withdraws from the trade.
    pub async fn cancel_trade(&self, trade_id: &str, actor: &str) -> Result<Trade> {
        let trade = self
            .store
            .update::<Trade, ServiceError, _>(trade_id, |mut trade| {
                if !trade.is_participant(actor) {
                    return Err(ServiceError::unauthorized(
                        "You are not a participant of this trade.",
                    ));
                }
                trade.status = trade.status.transition(TradeStatus::Cancelled)?;
                Ok(trade)
            })
            .await
            .inspect_err(|e| tracing::warn!(trade = trade_id, actor, error = %e, "cancel rejected"))?
            .ok_or_else(|| ServiceError::not_found("Trade not found."))?;

        tracing::info!(trade = %trade.id, actor, "trade cancelled");
        self.notify_update(&trade, actor);
        Ok(trade)
    }

    fn notify_update(&self, trade: &Trade, actor: &str) {
        if let Some(other) = trade.counterparty(actor) {
            self.notifier.deliver(
                other,
                Event::TradeUpdated {
                    trade: trade.id.clone(),
                    status: trade.status,
                },
            );
        }
    }

    /// Every trade `actor` takes part in, oldest first, fully aggregated.
    pub async fn list_trades_for_user(&self, actor: &str) -> Result<Vec<TradeView>> {
        let owned = actor.to_owned();
        let mut trades = self
            .store
            .find_where::<Trade, _>(move |trade| trade.is_participant(&owned))
            .await?;
        trades.sort_by_key(|trade| (trade.created_at.to_datetime_utc(), trade.id.clone()));

        // one resolver, so users and books shared between trades are fetched once
        let resolver = Resolver::new(self.store.as_ref());
        let views = try_join_all(
            trades
                .iter()
                .map(|trade| aggregate::trade_view(&resolver, TradeDoc::from(trade))),
        )
        .await?;
        Ok(views)
    }

    pub async fn get_trade_view(&self, trade_id: &str) -> Result<TradeView> {
        let trade = self
            .store
            .find::<Trade>(trade_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Trade not found."))?;

        let resolver = Resolver::new(self.store.as_ref());
        Ok(aggregate::trade_view(&resolver, TradeDoc::from(&trade)).await?)
    }
}
