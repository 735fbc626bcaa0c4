//! Incident Recording
//!
//! An incident is the durable record of one alerting episode for a place. At
//! most one incident is open per place; a second alarm type alerting while
//! one is open attaches to the existing incident instead of opening another.
//! Triggers append in arrival order and their timestamps never regress.

use crate::error::{AlarmError, Result};
use crate::machine::{AlertType, IncidentTrigger};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use haven_model::Address;
use haven_place::PlaceId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// One alerting episode for a place
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmIncident {
    /// Incident address (`INCD:<uuid>`)
    pub address: Address,
    /// Owning place
    pub place: PlaceId,
    /// Alarm type that opened the incident
    pub alert: AlertType,
    /// Further types that attached while the incident was open
    pub additional_alerts: Vec<AlertType>,
    /// Triggers in arrival order, timestamps monotonic
    pub triggers: Vec<IncidentTrigger>,
    /// Whether the incident was cancelled by a user action
    pub cancelled: bool,
    /// Open time
    pub started: DateTime<Utc>,
}

impl AlarmIncident {
    fn open(place: PlaceId, alert: AlertType, started: DateTime<Utc>) -> Self {
        Self {
            address: Address::incident(Uuid::new_v4().to_string()),
            place,
            alert,
            additional_alerts: Vec::new(),
            triggers: Vec::new(),
            cancelled: false,
            started,
        }
    }

    /// Append triggers, clamping each timestamp so it never precedes the
    /// last recorded one
    fn append(&mut self, triggers: Vec<IncidentTrigger>) {
        for mut trigger in triggers {
            if let Some(last) = self.triggers.last() {
                if trigger.time < last.time {
                    trigger.time = last.time;
                }
            }
            self.triggers.push(trigger);
        }
    }
}

/// Incident storage and lifecycle
///
/// `cancel` returns `true` when cancellation also completed (closed) the
/// incident; an implementation backed by an external monitoring pipeline may
/// return `false` and complete asynchronously.
#[async_trait]
pub trait IncidentService: Send + Sync {
    /// Record an alert for the place: open a new incident or attach the type
    /// to the already-open one. Returns the incident address either way.
    async fn add_alert(
        &self,
        place: PlaceId,
        alert: AlertType,
        triggers: Vec<IncidentTrigger>,
    ) -> Result<Address>;

    /// Append further triggers to the open incident. No-op when none is open.
    async fn update_incident(&self, place: PlaceId, triggers: Vec<IncidentTrigger>) -> Result<()>;

    /// Cancel the open incident. `Ok(true)` when the incident is now closed.
    async fn cancel(&self, place: PlaceId) -> Result<bool>;

    /// The open incident for the place, if any
    async fn current(&self, place: PlaceId) -> Option<AlarmIncident>;
}

/// In-memory incident service
///
/// Closed incidents are retained per place for inspection.
pub struct MemoryIncidentService {
    open: DashMap<PlaceId, AlarmIncident>,
    closed: Mutex<Vec<AlarmIncident>>,
    add_alert_calls: AtomicU64,
}

impl MemoryIncidentService {
    pub fn new() -> Self {
        Self {
            open: DashMap::new(),
            closed: Mutex::new(Vec::new()),
            add_alert_calls: AtomicU64::new(0),
        }
    }

    /// How many times `add_alert` opened a NEW incident
    pub fn opened_count(&self) -> u64 {
        self.add_alert_calls.load(Ordering::Relaxed)
    }

    /// Closed incident history for a place, oldest first
    pub fn closed_for(&self, place: PlaceId) -> Vec<AlarmIncident> {
        self.closed
            .lock()
            .iter()
            .filter(|i| i.place == place)
            .cloned()
            .collect()
    }
}

impl Default for MemoryIncidentService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IncidentService for MemoryIncidentService {
    async fn add_alert(
        &self,
        place: PlaceId,
        alert: AlertType,
        triggers: Vec<IncidentTrigger>,
    ) -> Result<Address> {
        let mut entry = self.open.entry(place).or_insert_with(|| {
            self.add_alert_calls.fetch_add(1, Ordering::Relaxed);
            AlarmIncident::open(place, alert, Utc::now())
        });
        let incident = entry.value_mut();
        if incident.alert != alert && !incident.additional_alerts.contains(&alert) {
            incident.additional_alerts.push(alert);
        }
        incident.append(triggers);
        Ok(incident.address.clone())
    }

    async fn update_incident(&self, place: PlaceId, triggers: Vec<IncidentTrigger>) -> Result<()> {
        if let Some(mut entry) = self.open.get_mut(&place) {
            entry.value_mut().append(triggers);
        }
        Ok(())
    }

    async fn cancel(&self, place: PlaceId) -> Result<bool> {
        match self.open.remove(&place) {
            Some((_, mut incident)) => {
                incident.cancelled = true;
                self.closed.lock().push(incident);
                Ok(true)
            },
            None => Err(AlarmError::Incident(format!(
                "no open incident for place {place}"
            ))),
        }
    }

    async fn current(&self, place: PlaceId) -> Option<AlarmIncident> {
        self.open.get(&place).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::TriggerEvent;
    use chrono::Duration;

    fn trigger(event: TriggerEvent, time: DateTime<Utc>) -> IncidentTrigger {
        IncidentTrigger::new(Address::device("dev-1"), event, time)
    }

    #[tokio::test]
    async fn test_second_alert_attaches_to_open_incident() {
        let service = MemoryIncidentService::new();
        let place = PlaceId::random();
        let now = Utc::now();

        let first = service
            .add_alert(place, AlertType::Smoke, vec![trigger(TriggerEvent::Smoke, now)])
            .await
            .unwrap();
        let second = service
            .add_alert(place, AlertType::Co, vec![trigger(TriggerEvent::Co, now)])
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(service.opened_count(), 1);

        let incident = service.current(place).await.unwrap();
        assert_eq!(incident.alert, AlertType::Smoke);
        assert_eq!(incident.additional_alerts, vec![AlertType::Co]);
        assert_eq!(incident.triggers.len(), 2);
    }

    #[tokio::test]
    async fn test_trigger_timestamps_never_regress() {
        let service = MemoryIncidentService::new();
        let place = PlaceId::random();
        let now = Utc::now();

        service
            .add_alert(place, AlertType::Water, vec![trigger(TriggerEvent::Leak, now)])
            .await
            .unwrap();
        let earlier = now - Duration::seconds(5);
        service
            .update_incident(place, vec![trigger(TriggerEvent::Leak, earlier)])
            .await
            .unwrap();

        let incident = service.current(place).await.unwrap();
        assert_eq!(incident.triggers.len(), 2);
        assert!(incident.triggers[1].time >= incident.triggers[0].time);
    }

    #[tokio::test]
    async fn test_cancel_closes_and_archives() {
        let service = MemoryIncidentService::new();
        let place = PlaceId::random();

        service
            .add_alert(
                place,
                AlertType::Panic,
                vec![trigger(TriggerEvent::Panic, Utc::now())],
            )
            .await
            .unwrap();
        assert!(service.cancel(place).await.unwrap());
        assert!(service.current(place).await.is_none());

        let closed = service.closed_for(place);
        assert_eq!(closed.len(), 1);
        assert!(closed[0].cancelled);
    }

    #[tokio::test]
    async fn test_cancel_without_open_incident_fails() {
        let service = MemoryIncidentService::new();
        assert!(service.cancel(PlaceId::random()).await.is_err());
    }

    #[tokio::test]
    async fn test_update_without_open_incident_is_noop() {
        let service = MemoryIncidentService::new();
        let place = PlaceId::random();
        service
            .update_incident(place, vec![trigger(TriggerEvent::Motion, Utc::now())])
            .await
            .unwrap();
        assert!(service.current(place).await.is_none());
    }
}
