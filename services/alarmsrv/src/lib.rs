//! Haven Alarm Service
//!
//! Cloud-side alarm subsystem for the Haven home platform. Each managed
//! place owns one alarm subsystem model aggregating five independent alarm
//! types (security, smoke, CO, water, panic); committed device changes, user
//! requests and timeouts are funneled through a per-place serialized actor
//! so no place's state is ever touched concurrently.

pub mod api;
pub mod bus;
pub mod calltree;
pub mod config;
pub mod error;
pub mod incident;
pub mod machine;
pub mod subsystem;

use crate::bus::{BroadcastBus, PlatformBus};
use crate::config::AlarmConfig;
use crate::error::{AlarmError, Result};
use crate::incident::{IncidentService, MemoryIncidentService};
use crate::subsystem::model::AlarmSubsystemModel;
use crate::subsystem::{AlarmSubsystem, SubsystemEvent};
use haven_model::{AttributeMap, MemoryModelStore, Model, ModelStore};
use haven_place::{KeyedScheduler, PlaceExecutorRegistry, PlaceId};
use std::sync::Arc;
use tracing::info;

/// Shared service state handed to the API layer
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AlarmConfig>,
    pub store: Arc<dyn ModelStore>,
    pub incidents: Arc<MemoryIncidentService>,
    pub bus: Arc<BroadcastBus>,
    pub subsystem: Arc<AlarmSubsystem>,
    pub registry: Arc<PlaceExecutorRegistry<SubsystemEvent>>,
    pub scheduler: Arc<KeyedScheduler<SubsystemEvent>>,
}

impl AppState {
    /// Wire the whole service together; the scheduler loop is not started
    pub fn build(config: AlarmConfig) -> Self {
        let store: Arc<dyn ModelStore> = Arc::new(MemoryModelStore::new());
        let incidents = Arc::new(MemoryIncidentService::new());
        let bus = Arc::new(BroadcastBus::new(256));

        let subsystem = AlarmSubsystem::new(
            store.clone(),
            incidents.clone() as Arc<dyn IncidentService>,
            bus.clone() as Arc<dyn PlatformBus>,
        );
        let registry = PlaceExecutorRegistry::new(
            subsystem.clone() as Arc<dyn haven_place::PlaceHandler<SubsystemEvent>>,
        );
        let scheduler = KeyedScheduler::new(registry.clone(), config.scheduler.tick_ms);
        subsystem.attach_scheduler(scheduler.clone());

        Self {
            config: Arc::new(config),
            store,
            incidents,
            bus,
            subsystem,
            registry,
            scheduler,
        }
    }

    /// Register a place: seed its subsystem model with the configured
    /// entrance delays and warm up its actor
    pub fn register_place(&self, place: PlaceId) -> Result<()> {
        let model = AlarmSubsystemModel::seed(
            place,
            self.config.security.entrance_delay_on,
            self.config.security.entrance_delay_partial,
        );
        self.store.insert(model)?;
        info!(%place, "place registered");
        Ok(())
    }

    /// Register a device model under a place
    pub fn register_device(&self, place: PlaceId, model: Model) -> Result<()> {
        let owner = model
            .get(subsystem::keys::BASE_PLACE)
            .and_then(|v| v.as_text())
            .unwrap_or_default();
        if owner != place.to_string() {
            return Err(AlarmError::InvalidRequest(format!(
                "device {} does not belong to place {place}",
                model.address()
            )));
        }
        self.store.insert(model)?;
        Ok(())
    }

    /// Apply a device attribute change and dispatch the resulting committed
    /// changes through the owning place's actor
    pub fn apply_device_change(
        &self,
        place: PlaceId,
        address: &haven_model::Address,
        update: AttributeMap,
    ) -> Result<()> {
        let device = self
            .store
            .get(address)
            .ok_or_else(|| AlarmError::InvalidRequest(format!("unknown device {address}")))?;
        let owner = device
            .get(subsystem::keys::BASE_PLACE)
            .and_then(|v| v.as_text())
            .unwrap_or_default();
        if owner != place.to_string() {
            return Err(AlarmError::InvalidRequest(format!(
                "device {address} does not belong to place {place}"
            )));
        }
        let changes = self.store.update(address, update)?;
        for change in changes {
            self.registry
                .dispatch(place, SubsystemEvent::ModelChanged(change));
        }
        Ok(())
    }
}
