//! Haven Place Execution Substrate
//!
//! Events for one place must never run concurrently, while events for
//! different places should run fully in parallel. This crate provides the
//! substrate both guarantees rest on:
//!
//! - [`PlaceExecutorRegistry`]: lazily-created logical actors, one per place,
//!   multiplexed onto the shared tokio worker pool. A place's mailbox drains
//!   strictly in arrival order and deactivates when empty.
//! - [`KeyedScheduler`]: cancellable, replaceable timeouts keyed by
//!   (place, alarm, purpose), delivered back through the owning place's
//!   mailbox.

pub mod error;
pub mod executor;
pub mod scheduler;

pub use error::{PlaceError, Result};
pub use executor::{PlaceExecutorRegistry, PlaceHandler, PlaceId};
pub use scheduler::{KeyedScheduler, TimeoutKey, DEFAULT_TICK_MS};
