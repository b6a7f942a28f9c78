//! Stored records of the trading platform.
//!
//! Records reference each other by id (or username, for trade participants),
//! never by embedding. Turning references into presentable views is the job of
//! [`crate::aggregate`].
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};

use crate::trade::TradeStatus;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl From<DateTime<Utc>> for TimeStamp<Utc> {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// The kinds of independently stored records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Book,
    Genre,
    Trade,
    Message,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Book => "book",
            EntityKind::Genre => "genre",
            EntityKind::Trade => "trade",
            EntityKind::Message => "message",
        }
    }

    /// Human readable part of the bech32 ids minted for this kind.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            EntityKind::User => "user_",
            EntityKind::Book => "book_",
            EntityKind::Genre => "genre_",
            EntityKind::Trade => "trade_",
            EntityKind::Message => "msg_",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record the entity store can persist under its own tree.
pub trait Entity:
    minicbor::Encode<()> + for<'b> minicbor::Decode<'b, ()> + Send + Sync + 'static
{
    const KIND: EntityKind;

    /// Primary key of the record.
    fn key(&self) -> &str;
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum Gender {
    #[n(0)]
    Male,
    #[n(1)]
    Female,
}

impl Gender {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Male" => Some(Gender::Male),
            "Female" => Some(Gender::Female),
            _ => None,
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    #[n(0)]
    pub session_digest: String, // sha256 of the session id
    #[n(1)]
    pub expires_at: TimeStamp<Utc>,
}

impl SessionToken {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.to_datetime_utc() > now
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct User {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub username: String, // unique, lower case
    #[n(2)]
    pub email: String, // unique, lower case
    #[n(3)]
    pub gender: Gender,
    #[n(4)]
    pub description: String,
    #[n(5)]
    pub password_digest: String,
    #[n(6)]
    pub profile_picture_is_set: bool,
    #[n(7)]
    pub books: Vec<String>, // book ids in listing order
    #[n(8)]
    pub authorized_tokens: Vec<SessionToken>,
}

impl Entity for User {
    const KIND: EntityKind = EntityKind::User;

    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Book {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub title: String,
    #[n(2)]
    pub author: String,
    #[n(3)]
    pub genre: String, // genre id
    #[n(4)]
    pub owner: String, // user id
    #[n(5)]
    pub date_listed: TimeStamp<Utc>,
    #[n(6)]
    pub description: Option<String>,
}

impl Entity for Book {
    const KIND: EntityKind = EntityKind::Book;

    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Genre {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub title: String,
}

impl Entity for Genre {
    const KIND: EntityKind = EntityKind::Genre;

    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Trade {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub list_user: String, // username of the lister
    #[n(2)]
    pub offer_user: String, // username of the offerer
    #[n(3)]
    pub list_book: String,
    #[n(4)]
    pub offer_books: Vec<String>,
    #[n(5)]
    pub description: String,
    #[n(6)]
    pub selected_book: Option<String>,
    #[n(7)]
    pub status: TradeStatus,
    #[n(8)]
    pub created_at: TimeStamp<Utc>,
}

impl Trade {
    pub fn is_participant(&self, username: &str) -> bool {
        self.list_user == username || self.offer_user == username
    }

    /// The other side of the trade, if `username` takes part in it.
    pub fn counterparty(&self, username: &str) -> Option<&str> {
        if self.list_user == username {
            Some(&self.offer_user)
        } else if self.offer_user == username {
            Some(&self.list_user)
        } else {
            None
        }
    }
}

impl Entity for Trade {
    const KIND: EntityKind = EntityKind::Trade;

    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub seq: u64, // store-wide creation sequence
    #[n(2)]
    pub sender: String,
    #[n(3)]
    pub content: String,
    #[n(4)]
    pub trade: String,
    #[n(5)]
    #[serde(with = "timestamp_serde")]
    pub sent_at: TimeStamp<Utc>,
}

impl Entity for Message {
    const KIND: EntityKind = EntityKind::Message;

    fn key(&self) -> &str {
        &self.id
    }
}

mod timestamp_serde {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::TimeStamp;

    pub fn serialize<S: Serializer>(ts: &TimeStamp<Utc>, s: S) -> Result<S::Ok, S::Error> {
        ts.to_datetime_utc().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<TimeStamp<Utc>, D::Error> {
        DateTime::<Utc>::deserialize(d).map(TimeStamp::from)
    }
}
