//! # Conveyor testing
//!
//! In-memory doubles for the job store, broker and server API, so scenarios
//! in spec §8 can run as ordinary `#[tokio::test]`s without a live Postgres
//! or RabbitMQ.

mod api;
mod bus;
mod store;

pub use api::InMemoryServerApi;
pub use bus::InMemoryBus;
pub use store::InMemoryJobStore;
