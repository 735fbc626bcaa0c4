//! Panic Alarm
//!
//! Fired by direct user or rule action only; no device predicate and no
//! entrance delay. Reachable from any state, always straight to ALERT.

use crate::machine::{AlarmTypeMachine, AlertType, TriggerEvent};
use haven_model::{Model, ModelChange, Predicate};

/// Panic alarm type machine
pub struct PanicAlarm;

impl AlarmTypeMachine for PanicAlarm {
    fn alert_type(&self) -> AlertType {
        AlertType::Panic
    }

    fn device_match(&self) -> Predicate {
        Predicate::Never
    }

    fn classify(&self, _device: &Model, _change: &ModelChange) -> Option<TriggerEvent> {
        None
    }
}
