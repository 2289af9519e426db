//! Core library for the transactional outbox / webhook dispatcher.
//!
//! An HTTP-facing binary (not part of this crate) accepts domain events
//! through [`outbox::OutboxService`], records them durably, and the
//! [`dispatcher::Dispatcher`] fans them out to registered
//! [`models::Subscription`]s with signed, retried, at-least-once delivery.

pub mod admin;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod models;
pub mod outbox;
pub mod repository;
pub mod signer;
pub mod subscriptions;

#[cfg(any(test, feature = "test-util"))]
pub mod testutil;

pub use error::{OutboxError, OutboxResult};
