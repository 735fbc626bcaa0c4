//! Smoke Alarm
//!
//! Smoke detectors participate regardless of arm state; detection goes
//! straight to ALERT.

use crate::machine::{AlarmTypeMachine, AlertType, TriggerEvent};
use crate::subsystem::keys::{self, values};
use haven_model::{Model, ModelChange, Predicate, NS_DEVICE};

/// Smoke alarm type machine
pub struct SmokeAlarm;

impl AlarmTypeMachine for SmokeAlarm {
    fn alert_type(&self) -> AlertType {
        AlertType::Smoke
    }

    fn device_match(&self) -> Predicate {
        Predicate::namespace(NS_DEVICE).and(Predicate::attr_present(keys::SMOKE))
    }

    fn classify(&self, _device: &Model, change: &ModelChange) -> Option<TriggerEvent> {
        (change.key == keys::SMOKE && change.new.as_text() == Some(values::DETECTED))
            .then_some(TriggerEvent::Smoke)
    }
}
