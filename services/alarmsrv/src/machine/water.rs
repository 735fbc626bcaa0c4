//! Water Leak Alarm
//!
//! Leak sensors participate regardless of arm state. On entering ALERT the
//! machine additionally issues a close command to every valve model in the
//! place, containing the leak while the incident escalates.

use crate::machine::{AlarmTypeMachine, AlertType, Effect, MachineContext, TriggerEvent};
use crate::subsystem::keys::{self, values};
use haven_model::{AttributeValue, Model, ModelChange, Predicate, NS_DEVICE};

/// Water leak alarm type machine
pub struct WaterAlarm;

impl WaterAlarm {
    /// Valves eligible for the shutoff command
    pub fn valve_match() -> Predicate {
        Predicate::namespace(NS_DEVICE).and(Predicate::attr_present(keys::VALVE))
    }
}

impl AlarmTypeMachine for WaterAlarm {
    fn alert_type(&self) -> AlertType {
        AlertType::Water
    }

    fn device_match(&self) -> Predicate {
        Predicate::namespace(NS_DEVICE).and(Predicate::attr_present(keys::LEAK))
    }

    fn classify(&self, _device: &Model, change: &ModelChange) -> Option<TriggerEvent> {
        (change.key == keys::LEAK && change.new.as_text() == Some(values::LEAK))
            .then_some(TriggerEvent::Leak)
    }

    fn alert_effects(&self, _ctx: &MachineContext<'_>) -> Vec<Effect> {
        vec![Effect::SendToDevices {
            matching: Self::valve_match(),
            key: keys::VALVE.to_string(),
            value: AttributeValue::from(values::CLOSED),
        }]
    }
}
