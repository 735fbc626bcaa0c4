//! Alarm Subsystem Model View
//!
//! Typed accessors over the one `SERV:<place>:alarm` model each place owns.
//! Reads see writes staged earlier in the same dispatch turn; staged writes
//! are committed to the store in one batch at the end of the turn so value-
//! change events broadcast exactly what changed.

use crate::machine::{AlertState, AlertType};
use crate::subsystem::keys;
use chrono::{DateTime, Utc};
use haven_model::{instanced, Address, AttributeMap, AttributeValue, Model};
use haven_place::PlaceId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Aggregate subsystem alarm state
///
/// A pure function of the per-type states and the security arm mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmState {
    Disarmed,
    Armed,
    Prealert,
    Alert,
    Clearing,
}

impl AlarmState {
    /// Uppercase wire name
    pub fn name(&self) -> &'static str {
        match self {
            AlarmState::Disarmed => "DISARMED",
            AlarmState::Armed => "ARMED",
            AlarmState::Prealert => "PREALERT",
            AlarmState::Alert => "ALERT",
            AlarmState::Clearing => "CLEARING",
        }
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed view over one place's alarm subsystem model
pub struct AlarmSubsystemModel {
    place: PlaceId,
    model: Model,
    staged: AttributeMap,
}

impl AlarmSubsystemModel {
    /// Address of a place's subsystem model
    pub fn address_for(place: PlaceId) -> Address {
        Address::service(place.to_string(), "alarm")
    }

    /// Build the initial subsystem model for a place
    pub fn seed(place: PlaceId, entrance_delay_on: u64, entrance_delay_partial: u64) -> Model {
        let mut attrs = AttributeMap::new()
            .with(keys::BASE_PLACE, place.to_string())
            .with(keys::ALARM_STATE, AlarmState::Disarmed.name())
            .with(keys::ACTIVE_ALERTS, Vec::<AttributeValue>::new())
            .with(keys::SECURITY_MODE, keys::modes::DISARMED)
            .with(keys::CURRENT_INCIDENT, "")
            .with(keys::BYPASSED, BTreeSet::<String>::new())
            .with(keys::CALL_TREE, Vec::<AttributeValue>::new());
        attrs.set_instanced(
            keys::ENTRANCE_DELAY,
            keys::modes::ON,
            entrance_delay_on as i64,
        );
        attrs.set_instanced(
            keys::ENTRANCE_DELAY,
            keys::modes::PARTIAL,
            entrance_delay_partial as i64,
        );
        for alert in AlertType::PRIORITY_ORDER {
            attrs.set_instanced(keys::ALERT_STATE, alert.name(), AlertState::Inactive.name());
        }
        Model::new(Self::address_for(place), attrs)
    }

    /// Wrap a loaded subsystem model
    pub fn new(place: PlaceId, model: Model) -> Self {
        Self {
            place,
            model,
            staged: AttributeMap::new(),
        }
    }

    /// Owning place
    pub fn place(&self) -> PlaceId {
        self.place
    }

    /// Model address
    pub fn address(&self) -> &Address {
        self.model.address()
    }

    /// Staged-first attribute read
    fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.staged.get(key).or_else(|| self.model.get(key))
    }

    fn set(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.staged.set(key, value);
    }

    /// Take the writes staged this turn, leaving the view clean
    pub fn take_staged(&mut self) -> AttributeMap {
        std::mem::take(&mut self.staged)
    }

    // ---- per-type alert state ----

    /// Current state of one alarm type (missing attribute reads as INACTIVE)
    pub fn alert_state(&self, alert: AlertType) -> AlertState {
        self.get(&instanced(keys::ALERT_STATE, alert.name()))
            .and_then(AttributeValue::as_text)
            .and_then(AlertState::from_name)
            .unwrap_or(AlertState::Inactive)
    }

    /// Stage a per-type state write
    pub fn set_alert_state(&mut self, alert: AlertType, state: AlertState) {
        self.set(instanced(keys::ALERT_STATE, alert.name()), state.name());
    }

    // ---- aggregate state ----

    /// Aggregate alarm state as last committed/staged
    pub fn alarm_state(&self) -> AlarmState {
        match self.get(keys::ALARM_STATE).and_then(AttributeValue::as_text) {
            Some("ARMED") => AlarmState::Armed,
            Some("PREALERT") => AlarmState::Prealert,
            Some("ALERT") => AlarmState::Alert,
            Some("CLEARING") => AlarmState::Clearing,
            _ => AlarmState::Disarmed,
        }
    }

    /// Types currently not INACTIVE, in priority order
    pub fn active_alerts(&self) -> Vec<AlertType> {
        AlertType::PRIORITY_ORDER
            .into_iter()
            .filter(|alert| self.alert_state(*alert) != AlertState::Inactive)
            .collect()
    }

    /// Recompute `ALARMSTATE` and `ACTIVEALERTS` from the per-type states and
    /// the arm mode. Called after every dispatch pass.
    pub fn recompute_aggregate(&mut self) {
        let states: Vec<(AlertType, AlertState)> = AlertType::PRIORITY_ORDER
            .into_iter()
            .map(|alert| (alert, self.alert_state(alert)))
            .collect();

        let aggregate = if states.iter().any(|(_, s)| *s == AlertState::Alert) {
            AlarmState::Alert
        } else if states.iter().any(|(_, s)| *s == AlertState::Clearing) {
            AlarmState::Clearing
        } else if states.iter().any(|(_, s)| *s == AlertState::Prealert) {
            AlarmState::Prealert
        } else if self.armed() {
            AlarmState::Armed
        } else {
            AlarmState::Disarmed
        };

        let active: Vec<AttributeValue> = states
            .iter()
            .filter(|(_, s)| *s != AlertState::Inactive)
            .map(|(alert, _)| AttributeValue::from(alert.name()))
            .collect();

        self.set(keys::ALARM_STATE, aggregate.name());
        self.set(keys::ACTIVE_ALERTS, active);
    }

    // ---- security configuration ----

    /// Current arm mode (`ON`, `PARTIAL`, `DISARMED`)
    pub fn security_mode(&self) -> String {
        self.get(keys::SECURITY_MODE)
            .and_then(AttributeValue::as_text)
            .unwrap_or(keys::modes::DISARMED)
            .to_string()
    }

    /// Stage an arm mode write
    pub fn set_security_mode(&mut self, mode: &str) {
        self.set(keys::SECURITY_MODE, mode);
    }

    /// True unless the mode is `DISARMED`
    pub fn armed(&self) -> bool {
        self.security_mode() != keys::modes::DISARMED
    }

    /// Configured entrance delay for an arm mode, in seconds
    pub fn entrance_delay_secs(&self, mode: &str) -> u64 {
        self.get(&instanced(keys::ENTRANCE_DELAY, mode))
            .and_then(AttributeValue::as_int)
            .map(|secs| secs.max(0) as u64)
            .unwrap_or(0)
    }

    /// Devices excluded from participation by an `ArmBypassed` request
    pub fn bypassed(&self) -> BTreeSet<String> {
        self.get(keys::BYPASSED)
            .and_then(AttributeValue::as_set)
            .cloned()
            .unwrap_or_default()
    }

    /// Stage the bypass set
    pub fn set_bypassed(&mut self, bypassed: BTreeSet<String>) {
        self.set(keys::BYPASSED, bypassed);
    }

    // ---- prealert deadline (timeout-loss healing) ----

    /// Pending prealert expiry, if one is armed
    pub fn prealert_deadline(&self) -> Option<DateTime<Utc>> {
        let millis = self
            .get(keys::PREALERT_EXPIRY_AT)
            .and_then(AttributeValue::as_int)?;
        if millis <= 0 {
            return None;
        }
        DateTime::<Utc>::from_timestamp_millis(millis)
    }

    /// Stage the prealert expiry timestamp
    pub fn set_prealert_deadline(&mut self, at: DateTime<Utc>) {
        self.set(keys::PREALERT_EXPIRY_AT, at.timestamp_millis());
    }

    /// Drop the prealert expiry timestamp
    pub fn clear_prealert_deadline(&mut self) {
        self.set(keys::PREALERT_EXPIRY_AT, 0i64);
    }

    // ---- incident linkage ----

    /// Address of the open incident, if any
    pub fn incident(&self) -> Option<Address> {
        self.get(keys::CURRENT_INCIDENT)
            .and_then(AttributeValue::as_text)
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse().ok())
    }

    /// Stage the open incident address
    pub fn set_incident(&mut self, address: &Address) {
        self.set(keys::CURRENT_INCIDENT, address.to_string());
    }

    /// Clear the incident linkage
    pub fn clear_incident(&mut self) {
        self.set(keys::CURRENT_INCIDENT, "");
    }

    // ---- call tree ----

    /// Raw call tree entries as stored (list of entry maps)
    pub fn call_tree_raw(&self) -> Vec<AttributeValue> {
        self.get(keys::CALL_TREE)
            .and_then(AttributeValue::as_list)
            .map(|l| l.to_vec())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> AlarmSubsystemModel {
        let place = PlaceId::random();
        AlarmSubsystemModel::new(place, AlarmSubsystemModel::seed(place, 30, 30))
    }

    #[test]
    fn test_seed_defaults() {
        let view = view();
        assert_eq!(view.alarm_state(), AlarmState::Disarmed);
        assert_eq!(view.security_mode(), "DISARMED");
        assert!(!view.armed());
        assert_eq!(view.entrance_delay_secs(keys::modes::ON), 30);
        assert!(view.active_alerts().is_empty());
        assert!(view.incident().is_none());
        for alert in AlertType::PRIORITY_ORDER {
            assert_eq!(view.alert_state(alert), AlertState::Inactive);
        }
    }

    #[test]
    fn test_staged_reads_see_staged_writes() {
        let mut view = view();
        view.set_alert_state(AlertType::Smoke, AlertState::Alert);
        assert_eq!(view.alert_state(AlertType::Smoke), AlertState::Alert);

        let staged = view.take_staged();
        assert_eq!(staged.len(), 1);
        // After the take, reads fall back to the unchanged model
        assert_eq!(view.alert_state(AlertType::Smoke), AlertState::Inactive);
    }

    #[test]
    fn test_recompute_aggregate_precedence() {
        let mut view = view();
        view.set_security_mode(keys::modes::ON);
        view.recompute_aggregate();
        assert_eq!(view.alarm_state(), AlarmState::Armed);

        view.set_alert_state(AlertType::Security, AlertState::Prealert);
        view.recompute_aggregate();
        assert_eq!(view.alarm_state(), AlarmState::Prealert);

        view.set_alert_state(AlertType::Water, AlertState::Clearing);
        view.recompute_aggregate();
        assert_eq!(view.alarm_state(), AlarmState::Clearing);

        view.set_alert_state(AlertType::Smoke, AlertState::Alert);
        view.recompute_aggregate();
        assert_eq!(view.alarm_state(), AlarmState::Alert);
        assert_eq!(
            view.active_alerts(),
            vec![AlertType::Smoke, AlertType::Security, AlertType::Water]
        );
    }

    #[test]
    fn test_incident_linkage_roundtrip() {
        let mut view = view();
        let incident = Address::incident("abc");
        view.set_incident(&incident);
        assert_eq!(view.incident(), Some(incident));
        view.clear_incident();
        assert!(view.incident().is_none());
    }

    #[test]
    fn test_prealert_deadline_roundtrip() {
        let mut view = view();
        assert!(view.prealert_deadline().is_none());
        let at = Utc::now();
        view.set_prealert_deadline(at);
        let stored = view.prealert_deadline().unwrap();
        assert_eq!(stored.timestamp_millis(), at.timestamp_millis());
        view.clear_prealert_deadline();
        assert!(view.prealert_deadline().is_none());
    }
}
