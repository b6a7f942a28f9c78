//! Negotiation messages attached to a trade
use std::sync::Arc;

use mockable::Clock;

use crate::error::{Result, ServiceError};
use crate::model::{EntityKind, Message, TimeStamp, Trade};
use crate::notify::{Event, Notifier};
use crate::store::EntityStore;
use crate::utils::mint_id;

pub struct MessageService<S> {
    store: Arc<S>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl<S: EntityStore> MessageService<S> {
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

    async fn participant_trade(&self, trade_id: &str, actor: &str) -> Result<Trade> {
        let trade = self
            .store
            .find::<Trade>(trade_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Trade does not exist"))?;
        if !trade.is_participant(actor) {
            tracing::warn!(trade = trade_id, actor, "message access by non participant");
            return Err(ServiceError::unauthorized(
                "You are not a participant of this trade.",
            ));
        }
        Ok(trade)
    }

    pub async fn create_message(&self, content: &str, trade_id: &str, actor: &str) -> Result<Message> {
        if content.trim().is_empty() || trade_id.trim().is_empty() {
            return Err(ServiceError::validation("Missing content or trade"));
        }
        let trade = self.participant_trade(trade_id, actor).await?;

        let message = Message {
            id: mint_id(EntityKind::Message)?,
            seq: self.store.next_sequence().await?,
            sender: actor.to_owned(),
            content: content.to_owned(),
            trade: trade.id.clone(),
            sent_at: TimeStamp::from(self.clock.utc()),
        };
        self.store.insert(&message).await?;

        tracing::info!(trade = %trade.id, message = %message.id, sender = actor, "message posted");
        if let Some(other) = trade.counterparty(actor) {
            self.notifier.deliver(
                other,
                Event::MessagePosted {
                    trade: trade.id.clone(),
                    message: message.id.clone(),
                },
            );
        }
        Ok(message)
    }

    /// Messages of a trade in the order they were posted.
    pub async fn list_trade_messages(&self, trade_id: &str, actor: &str) -> Result<Vec<Message>> {
        if trade_id.trim().is_empty() {
            return Err(ServiceError::validation("Missing trade"));
        }
        let trade = self.participant_trade(trade_id, actor).await?;

        let mut messages = self
            .store
            .find_where::<Message, _>(move |message| message.trade == trade.id)
            .await?;
        messages.sort_by_key(|message| message.seq);
        Ok(messages)
    }
}
