//! Carbon Monoxide Alarm
//!
//! CO detectors participate regardless of arm state; detection goes straight
//! to ALERT.

use crate::machine::{AlarmTypeMachine, AlertType, TriggerEvent};
use crate::subsystem::keys::{self, values};
use haven_model::{Model, ModelChange, Predicate, NS_DEVICE};

/// Carbon monoxide alarm type machine
pub struct CoAlarm;

impl AlarmTypeMachine for CoAlarm {
    fn alert_type(&self) -> AlertType {
        AlertType::Co
    }

    fn device_match(&self) -> Predicate {
        Predicate::namespace(NS_DEVICE).and(Predicate::attr_present(keys::CO))
    }

    fn classify(&self, _device: &Model, change: &ModelChange) -> Option<TriggerEvent> {
        (change.key == keys::CO && change.new.as_text() == Some(values::DETECTED))
            .then_some(TriggerEvent::Co)
    }
}
