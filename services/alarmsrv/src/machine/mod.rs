//! Per-type Alarm State Machines
//!
//! The generic finite-state-machine vocabulary shared by every alarm type:
//! states, trigger classification, and the `(state, event) -> (next state,
//! side effects)` transition tables. Per-type behavior (which devices
//! participate, what trips them, extra effects on entering ALERT) hangs off
//! the [`AlarmTypeMachine`] specialization points; the transitions themselves
//! are provided methods so all types share one contract.
//!
//! Transitions are pure: they return a [`Transition`] describing the next
//! state and an effect list. The subsystem aggregator owns applying effects
//! (incident calls, timeouts, device commands, commits).

pub mod co;
pub mod panic;
pub mod security;
pub mod smoke;
pub mod water;

use crate::subsystem::keys::purposes;
use crate::subsystem::model::AlarmSubsystemModel;
use chrono::{DateTime, Utc};
use haven_model::{Address, AttributeMap, AttributeValue, Model, ModelChange, Predicate};
use haven_place::PlaceId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use co::CoAlarm;
pub use panic::PanicAlarm;
pub use security::SecurityAlarm;
pub use smoke::SmokeAlarm;
pub use water::WaterAlarm;

/// The independent alarm types aggregated by the subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    Security,
    Smoke,
    Co,
    Water,
    Panic,
}

impl AlertType {
    /// All types in escalation priority order (highest first)
    pub const PRIORITY_ORDER: [AlertType; 5] = [
        AlertType::Panic,
        AlertType::Co,
        AlertType::Smoke,
        AlertType::Security,
        AlertType::Water,
    ];

    /// Uppercase wire name, also the attribute instance qualifier
    pub fn name(&self) -> &'static str {
        match self {
            AlertType::Security => "SECURITY",
            AlertType::Smoke => "SMOKE",
            AlertType::Co => "CO",
            AlertType::Water => "WATER",
            AlertType::Panic => "PANIC",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-type alert lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertState {
    /// Nothing tripped
    Inactive,
    /// Tripped, escalation pending the entrance delay (security only)
    Prealert,
    /// Alerting; incident open
    Alert,
    /// Cancelled, waiting for the incident to close
    Clearing,
}

impl AlertState {
    /// Uppercase wire name
    pub fn name(&self) -> &'static str {
        match self {
            AlertState::Inactive => "INACTIVE",
            AlertState::Prealert => "PREALERT",
            AlertState::Alert => "ALERT",
            AlertState::Clearing => "CLEARING",
        }
    }

    /// Parse a wire name; unknown names yield `None`
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "INACTIVE" => Some(AlertState::Inactive),
            "PREALERT" => Some(AlertState::Prealert),
            "ALERT" => Some(AlertState::Alert),
            "CLEARING" => Some(AlertState::Clearing),
            _ => None,
        }
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why an alert fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerEvent {
    Contact,
    Motion,
    Leak,
    Smoke,
    Co,
    Panic,
    VerifiedAlarm,
}

impl TriggerEvent {
    /// Uppercase wire name
    pub fn name(&self) -> &'static str {
        match self {
            TriggerEvent::Contact => "CONTACT",
            TriggerEvent::Motion => "MOTION",
            TriggerEvent::Leak => "LEAK",
            TriggerEvent::Smoke => "SMOKE",
            TriggerEvent::Co => "CO",
            TriggerEvent::Panic => "PANIC",
            TriggerEvent::VerifiedAlarm => "VERIFIED_ALARM",
        }
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One observed sensor/user event causing or extending an alert
///
/// Appended in arrival order; timestamps are clamped by the aggregator so
/// they never regress within one incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentTrigger {
    /// Device or actor that caused the trigger
    pub source: Address,
    /// Trigger classification
    pub event: TriggerEvent,
    /// Observation time
    pub time: DateTime<Utc>,
    /// Extra attributes captured at trigger time
    #[serde(default)]
    pub attributes: AttributeMap,
}

impl IncidentTrigger {
    /// Build a trigger observed now
    pub fn new(source: Address, event: TriggerEvent, time: DateTime<Utc>) -> Self {
        Self {
            source,
            event,
            time,
            attributes: AttributeMap::new(),
        }
    }
}

/// Side effects a transition asks the aggregator to perform
#[derive(Debug, Clone)]
pub enum Effect {
    /// Append a trigger to the type's scratch-pad (and the open incident)
    RecordTrigger(IncidentTrigger),
    /// Open an incident for the place, or attach this type to the open one
    OpenIncident,
    /// Extend the open incident with the triggers recorded this turn
    ExtendIncident,
    /// Request cancellation of the open incident
    CancelIncident,
    /// Drop the type's accumulated trigger scratch-pad
    ClearTriggers,
    /// Arm (or re-arm, replacing) a keyed timeout for this type
    ScheduleTimeout {
        purpose: &'static str,
        after: Duration,
    },
    /// Cancel a pending keyed timeout for this type
    CancelTimeout { purpose: &'static str },
    /// Write an attribute to every model in the place matching the predicate
    SendToDevices {
        matching: Predicate,
        key: String,
        value: AttributeValue,
    },
}

/// Result of one state-table step
#[derive(Debug, Clone)]
pub struct Transition {
    /// State after the step
    pub next: AlertState,
    /// Effects for the aggregator to apply, in order
    pub effects: Vec<Effect>,
}

impl Transition {
    /// Remain in the given state with no effects
    pub fn stay(state: AlertState) -> Self {
        Self {
            next: state,
            effects: Vec::new(),
        }
    }

    /// Move to the given state
    pub fn to(state: AlertState) -> Self {
        Self {
            next: state,
            effects: Vec::new(),
        }
    }

    /// Append an effect
    pub fn with(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Append several effects
    pub fn with_all(mut self, effects: Vec<Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Read-only context a machine evaluates against
///
/// The view is the place's subsystem model including writes already staged
/// earlier in the same dispatch turn.
pub struct MachineContext<'a> {
    /// Owning place
    pub place: PlaceId,
    /// Subsystem model view
    pub view: &'a AlarmSubsystemModel,
    /// Turn timestamp; every trigger recorded this turn uses it
    pub now: DateTime<Utc>,
}

/// Per-type alarm state machine
///
/// Implementors supply the specialization points (device matching, trip
/// classification, extra ALERT effects); the transition tables are provided
/// methods shared by all types.
pub trait AlarmTypeMachine: Send + Sync {
    /// The alarm type this machine drives
    fn alert_type(&self) -> AlertType;

    /// Which device models this type watches at all
    fn device_match(&self) -> Predicate;

    /// Trip classification: does this committed change trip the alarm, and as
    /// what trigger kind?
    fn classify(&self, device: &Model, change: &ModelChange) -> Option<TriggerEvent>;

    /// Whether the device participates right now (e.g. security honors the
    /// arm mode and the bypass list)
    fn participates(&self, _ctx: &MachineContext<'_>, _device: &Model) -> bool {
        true
    }

    /// Entrance delay before full escalation, when configured (security only)
    fn prealert_delay(&self, _ctx: &MachineContext<'_>) -> Option<Duration> {
        None
    }

    /// Extra effects on entering ALERT (e.g. water closes valves)
    fn alert_effects(&self, _ctx: &MachineContext<'_>) -> Vec<Effect> {
        Vec::new()
    }

    /// Transition into ALERT, recording the trigger and opening/extending the
    /// incident
    fn alert_transition(&self, ctx: &MachineContext<'_>, trigger: IncidentTrigger) -> Transition {
        Transition::to(AlertState::Alert)
            .with(Effect::RecordTrigger(trigger))
            .with(Effect::OpenIncident)
            .with_all(self.alert_effects(ctx))
    }

    /// A matching, participating sensor tripped
    ///
    /// INACTIVE goes to ALERT (through PREALERT when an entrance delay is
    /// configured); PREALERT escalates to ALERT; while ALERT the trigger is
    /// still appended but the state does not churn; CLEARING ignores new
    /// trips until the incident closes.
    fn on_sensor_triggered(
        &self,
        ctx: &MachineContext<'_>,
        source: &Address,
        event: TriggerEvent,
    ) -> Transition {
        let trigger = IncidentTrigger::new(source.clone(), event, ctx.now);
        match ctx.view.alert_state(self.alert_type()) {
            AlertState::Inactive => match self.prealert_delay(ctx) {
                Some(delay) if !delay.is_zero() => Transition::to(AlertState::Prealert)
                    .with(Effect::RecordTrigger(trigger))
                    .with(Effect::ScheduleTimeout {
                        purpose: purposes::PREALERT_EXPIRY,
                        after: delay,
                    }),
                _ => self.alert_transition(ctx, trigger),
            },
            AlertState::Prealert => self
                .alert_transition(ctx, trigger)
                .with(Effect::CancelTimeout {
                    purpose: purposes::PREALERT_EXPIRY,
                }),
            AlertState::Alert => Transition::stay(AlertState::Alert)
                .with(Effect::RecordTrigger(trigger))
                .with(Effect::ExtendIncident),
            AlertState::Clearing => Transition::stay(AlertState::Clearing),
        }
    }

    /// Direct user/rule action (panic button, verified alarm): ALERT
    /// immediately, bypassing PREALERT
    fn on_triggered(
        &self,
        ctx: &MachineContext<'_>,
        actor: &Address,
        event: TriggerEvent,
    ) -> Transition {
        let trigger = IncidentTrigger::new(actor.clone(), event, ctx.now);
        match ctx.view.alert_state(self.alert_type()) {
            AlertState::Alert => Transition::stay(AlertState::Alert)
                .with(Effect::RecordTrigger(trigger))
                .with(Effect::ExtendIncident),
            AlertState::Prealert => self
                .alert_transition(ctx, trigger)
                .with(Effect::CancelTimeout {
                    purpose: purposes::PREALERT_EXPIRY,
                }),
            // Reachable from INACTIVE and CLEARING alike
            _ => self.alert_transition(ctx, trigger),
        }
    }

    /// Cancel the alert: ALERT goes to CLEARING, triggers are retained for
    /// audit until clearing completes. PREALERT unwinds straight to INACTIVE.
    /// Idempotent from CLEARING and INACTIVE.
    fn cancel(&self, ctx: &MachineContext<'_>) -> Transition {
        match ctx.view.alert_state(self.alert_type()) {
            AlertState::Alert => Transition::to(AlertState::Clearing).with(Effect::CancelIncident),
            AlertState::Prealert => Transition::to(AlertState::Inactive)
                .with(Effect::CancelTimeout {
                    purpose: purposes::PREALERT_EXPIRY,
                })
                .with_all(self.on_exit()),
            state => Transition::stay(state),
        }
    }

    /// The entrance delay ran out: PREALERT escalates to ALERT on the
    /// triggers already recorded. A stale fire in any other state is a no-op.
    fn on_prealert_expired(&self, ctx: &MachineContext<'_>) -> Transition {
        match ctx.view.alert_state(self.alert_type()) {
            AlertState::Prealert => Transition::to(AlertState::Alert)
                .with(Effect::OpenIncident)
                .with_all(self.alert_effects(ctx)),
            state => Transition::stay(state),
        }
    }

    /// The incident closed out: CLEARING returns to INACTIVE and the
    /// scratch-pad is dropped
    fn on_incident_closed(&self, ctx: &MachineContext<'_>) -> Transition {
        match ctx.view.alert_state(self.alert_type()) {
            AlertState::Clearing => {
                Transition::to(AlertState::Inactive).with_all(self.on_exit())
            },
            state => Transition::stay(state),
        }
    }

    /// Effects run when leaving the alerting lifecycle: clear the trigger
    /// scratch-pad
    fn on_exit(&self) -> Vec<Effect> {
        vec![Effect::ClearTriggers]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_state_names_roundtrip() {
        for state in [
            AlertState::Inactive,
            AlertState::Prealert,
            AlertState::Alert,
            AlertState::Clearing,
        ] {
            assert_eq!(AlertState::from_name(state.name()), Some(state));
        }
        assert_eq!(AlertState::from_name("BOGUS"), None);
    }

    #[test]
    fn test_priority_order_covers_all_types() {
        assert_eq!(AlertType::PRIORITY_ORDER.len(), 5);
        assert_eq!(AlertType::PRIORITY_ORDER[0], AlertType::Panic);
        assert_eq!(AlertType::PRIORITY_ORDER[4], AlertType::Water);
    }

    #[test]
    fn test_trigger_event_wire_names() {
        assert_eq!(TriggerEvent::VerifiedAlarm.name(), "VERIFIED_ALARM");
        assert_eq!(
            serde_json::to_value(TriggerEvent::VerifiedAlarm).unwrap(),
            serde_json::json!("VERIFIED_ALARM")
        );
    }
}
