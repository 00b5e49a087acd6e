//! Core types, services and the storage trait for the gatehouse access
//! control system.
//!
//! This crate has no HTTP or database dependencies. The services here
//! (credential resolution, the visit ledger, alert dispatch) run against any
//! [`store::GateStore`] and are shared by the server and its tests.

// Native `async fn` in traits; the store trait spells out `Send` futures.
#![allow(async_fn_in_trait)]

pub mod access_log;
pub mod alert;
pub mod credential;
pub mod dispatcher;
pub mod error;
pub mod ledger;
pub mod realtime;
pub mod resolver;
pub mod session;
pub mod store;
pub mod subject;
pub mod visit;

pub use error::{Error, Result};
