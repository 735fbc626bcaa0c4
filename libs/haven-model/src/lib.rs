//! Haven Model Substrate
//!
//! Shared vocabulary for device and place state across Haven services:
//! addresses, namespaced attribute maps, the model store abstraction with an
//! in-memory implementation, and composable match predicates for
//! capability-style dispatch.

pub mod address;
pub mod attributes;
pub mod error;
pub mod model;
pub mod predicate;

pub use address::{Address, NS_DEVICE, NS_INCIDENT, NS_PERSON, NS_PLATFORM, NS_SERVICE};
pub use attributes::{instanced, AttributeMap, AttributeValue};
pub use error::{ModelError, Result};
pub use model::{MemoryModelStore, Model, ModelChange, ModelStore};
pub use predicate::Predicate;
