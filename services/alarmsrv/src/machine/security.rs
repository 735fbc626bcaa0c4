//! Security Alarm
//!
//! Contact and motion devices participate according to the arm mode: `ON`
//! arms everything, `PARTIAL` arms the perimeter (contact sensors) only,
//! `DISARMED` arms nothing. Devices bypassed at arm time are excluded until
//! the next arm cycle. The configured entrance delay interposes PREALERT
//! before full escalation.

use crate::machine::{AlarmTypeMachine, AlertType, MachineContext, TriggerEvent};
use crate::subsystem::keys::{self, values};
use haven_model::{AttributeValue, Model, ModelChange, Predicate, NS_DEVICE};
use std::time::Duration;

/// Security alarm type machine
pub struct SecurityAlarm;

impl SecurityAlarm {
    /// True when the device is currently tripped (door open / motion seen)
    pub fn is_tripped(device: &Model) -> bool {
        let opened = device
            .get(keys::CONTACT)
            .and_then(AttributeValue::as_text)
            .map(|v| v == values::OPENED)
            .unwrap_or(false);
        let motion = device
            .get(keys::MOTION)
            .and_then(AttributeValue::as_text)
            .map(|v| v == values::DETECTED)
            .unwrap_or(false);
        opened || motion
    }

    /// Whether the device takes part under the given arm mode, ignoring the
    /// bypass list
    pub fn participates_in_mode(device: &Model, mode: &str) -> bool {
        match mode {
            keys::modes::ON => true,
            // Perimeter only: interior motion sensors stay out
            keys::modes::PARTIAL => device.attributes().contains(keys::CONTACT),
            _ => false,
        }
    }
}

impl AlarmTypeMachine for SecurityAlarm {
    fn alert_type(&self) -> AlertType {
        AlertType::Security
    }

    fn device_match(&self) -> Predicate {
        Predicate::namespace(NS_DEVICE).and(
            Predicate::attr_present(keys::CONTACT).or(Predicate::attr_present(keys::MOTION)),
        )
    }

    fn classify(&self, _device: &Model, change: &ModelChange) -> Option<TriggerEvent> {
        match (change.key.as_str(), change.new.as_text()) {
            (keys::CONTACT, Some(values::OPENED)) => Some(TriggerEvent::Contact),
            (keys::MOTION, Some(values::DETECTED)) => Some(TriggerEvent::Motion),
            _ => None,
        }
    }

    fn participates(&self, ctx: &MachineContext<'_>, device: &Model) -> bool {
        let mode = ctx.view.security_mode();
        if !Self::participates_in_mode(device, &mode) {
            return false;
        }
        !ctx.view.bypassed().contains(&device.address().to_string())
    }

    fn prealert_delay(&self, ctx: &MachineContext<'_>) -> Option<Duration> {
        let secs = ctx.view.entrance_delay_secs(&ctx.view.security_mode());
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{AlertState, Effect};
    use crate::subsystem::model::AlarmSubsystemModel;
    use chrono::Utc;
    use haven_model::{Address, AttributeMap};
    use haven_place::PlaceId;

    fn door(place: PlaceId) -> Model {
        Model::new(
            Address::device("door-1"),
            AttributeMap::new()
                .with(keys::CONTACT, values::CLOSED)
                .with(keys::BASE_PLACE, place.to_string()),
        )
    }

    fn motion_sensor(place: PlaceId) -> Model {
        Model::new(
            Address::device("pir-1"),
            AttributeMap::new()
                .with(keys::MOTION, values::NONE)
                .with(keys::BASE_PLACE, place.to_string()),
        )
    }

    fn view(place: PlaceId, delay: u64) -> AlarmSubsystemModel {
        AlarmSubsystemModel::new(place, AlarmSubsystemModel::seed(place, delay, delay))
    }

    fn opened_change(device: &Model) -> ModelChange {
        ModelChange {
            address: device.address().clone(),
            key: keys::CONTACT.to_string(),
            old: Some(AttributeValue::from(values::CLOSED)),
            new: AttributeValue::from(values::OPENED),
        }
    }

    #[test]
    fn test_classify_contact_and_motion() {
        let place = PlaceId::random();
        let machine = SecurityAlarm;
        let door = door(place);
        assert_eq!(
            machine.classify(&door, &opened_change(&door)),
            Some(TriggerEvent::Contact)
        );

        let closed = ModelChange {
            address: door.address().clone(),
            key: keys::CONTACT.to_string(),
            old: Some(AttributeValue::from(values::OPENED)),
            new: AttributeValue::from(values::CLOSED),
        };
        assert_eq!(machine.classify(&door, &closed), None);
    }

    #[test]
    fn test_participation_by_mode() {
        let place = PlaceId::random();
        let machine = SecurityAlarm;
        let mut view = view(place, 0);
        let door = door(place);
        let pir = motion_sensor(place);

        let ctx = MachineContext {
            place,
            view: &view,
            now: Utc::now(),
        };
        // Disarmed: nothing participates
        assert!(!machine.participates(&ctx, &door));
        drop(ctx);

        view.set_security_mode(keys::modes::PARTIAL);
        let ctx = MachineContext {
            place,
            view: &view,
            now: Utc::now(),
        };
        assert!(machine.participates(&ctx, &door));
        assert!(!machine.participates(&ctx, &pir));
        drop(ctx);

        view.set_security_mode(keys::modes::ON);
        let ctx = MachineContext {
            place,
            view: &view,
            now: Utc::now(),
        };
        assert!(machine.participates(&ctx, &door));
        assert!(machine.participates(&ctx, &pir));
    }

    #[test]
    fn test_bypassed_device_excluded() {
        let place = PlaceId::random();
        let machine = SecurityAlarm;
        let mut view = view(place, 0);
        let door = door(place);
        view.set_security_mode(keys::modes::ON);
        view.set_bypassed([door.address().to_string()].into_iter().collect());

        let ctx = MachineContext {
            place,
            view: &view,
            now: Utc::now(),
        };
        assert!(!machine.participates(&ctx, &door));
    }

    #[test]
    fn test_entrance_delay_interposes_prealert() {
        let place = PlaceId::random();
        let machine = SecurityAlarm;
        let mut view = view(place, 30);
        view.set_security_mode(keys::modes::ON);
        let door = door(place);

        let ctx = MachineContext {
            place,
            view: &view,
            now: Utc::now(),
        };
        let transition =
            machine.on_sensor_triggered(&ctx, door.address(), TriggerEvent::Contact);
        assert_eq!(transition.next, AlertState::Prealert);
        assert!(transition
            .effects
            .iter()
            .any(|e| matches!(e, Effect::ScheduleTimeout { .. })));
    }

    #[test]
    fn test_zero_delay_goes_straight_to_alert() {
        let place = PlaceId::random();
        let machine = SecurityAlarm;
        let mut view = view(place, 0);
        view.set_security_mode(keys::modes::ON);
        let door = door(place);

        let ctx = MachineContext {
            place,
            view: &view,
            now: Utc::now(),
        };
        let transition =
            machine.on_sensor_triggered(&ctx, door.address(), TriggerEvent::Contact);
        assert_eq!(transition.next, AlertState::Alert);
        assert!(transition
            .effects
            .iter()
            .any(|e| matches!(e, Effect::OpenIncident)));
    }

    #[test]
    fn test_prealert_expiry_promotes_and_stale_fire_is_noop() {
        let place = PlaceId::random();
        let machine = SecurityAlarm;
        let mut view = view(place, 30);
        view.set_security_mode(keys::modes::ON);

        // Stale fire while inactive
        let ctx = MachineContext {
            place,
            view: &view,
            now: Utc::now(),
        };
        let stale = machine.on_prealert_expired(&ctx);
        assert_eq!(stale.next, AlertState::Inactive);
        assert!(stale.effects.is_empty());
        drop(ctx);

        view.set_alert_state(AlertType::Security, AlertState::Prealert);
        let ctx = MachineContext {
            place,
            view: &view,
            now: Utc::now(),
        };
        let promoted = machine.on_prealert_expired(&ctx);
        assert_eq!(promoted.next, AlertState::Alert);
        assert!(promoted
            .effects
            .iter()
            .any(|e| matches!(e, Effect::OpenIncident)));
    }

    #[test]
    fn test_cancel_is_idempotent_from_inactive_and_clearing() {
        let place = PlaceId::random();
        let machine = SecurityAlarm;
        let mut view = view(place, 30);

        let ctx = MachineContext {
            place,
            view: &view,
            now: Utc::now(),
        };
        let noop = machine.cancel(&ctx);
        assert_eq!(noop.next, AlertState::Inactive);
        assert!(noop.effects.is_empty());
        drop(ctx);

        view.set_alert_state(AlertType::Security, AlertState::Clearing);
        let ctx = MachineContext {
            place,
            view: &view,
            now: Utc::now(),
        };
        let noop = machine.cancel(&ctx);
        assert_eq!(noop.next, AlertState::Clearing);
        assert!(noop.effects.is_empty());
    }
}
