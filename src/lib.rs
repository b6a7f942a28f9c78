//! Core of a peer-to-peer book trading service: trade lifecycle, relational
//! aggregation of stored records into views, and session token authentication.

pub mod accounts;
pub mod aggregate;
pub mod api;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod logging;
pub mod messages;
pub mod model;
pub mod notify;
pub mod resolver;
pub mod service;
pub mod store;
pub mod trade;
pub mod utils;
