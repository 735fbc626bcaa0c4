//! Shared test fixtures: a wired service with one seeded place and a
//! realistic device population.

#![allow(dead_code)]

use alarmsrv::config::AlarmConfig;
use alarmsrv::error::Result;
use alarmsrv::subsystem::keys::{self, values};
use alarmsrv::subsystem::{AlarmStatus, RequestBody, SubsystemEvent};
use alarmsrv::AppState;
use haven_model::{Address, AttributeMap, Model};
use haven_place::PlaceId;
use std::time::Duration;
use tokio::sync::oneshot;

pub const DOOR: &str = "door-1";
pub const PIR: &str = "pir-1";
pub const SMOKE: &str = "smoke-1";
pub const CO: &str = "co-1";
pub const LEAK: &str = "leak-1";
pub const VALVE_A: &str = "valve-1";
pub const VALVE_B: &str = "valve-2";

pub struct TestPlace {
    pub state: AppState,
    pub place: PlaceId,
}

/// Build a service with one place and its devices seeded
pub fn seeded(entrance_delay_on: u64) -> TestPlace {
    let mut config = AlarmConfig::default();
    config.security.entrance_delay_on = entrance_delay_on;
    config.security.entrance_delay_partial = 0;

    let state = AppState::build(config);
    let place = PlaceId::random();
    state.register_place(place).expect("place registers");

    let devices = [
        (DOOR, keys::CONTACT, values::CLOSED),
        (PIR, keys::MOTION, values::NONE),
        (SMOKE, keys::SMOKE, values::SAFE),
        (CO, keys::CO, values::SAFE),
        (LEAK, keys::LEAK, values::SAFE),
        (VALVE_A, keys::VALVE, values::OPEN),
        (VALVE_B, keys::VALVE, values::OPEN),
    ];
    for (id, key, value) in devices {
        let model = Model::new(
            Address::device(id),
            AttributeMap::new()
                .with(key, value)
                .with(keys::BASE_PLACE, place.to_string()),
        );
        state.register_device(place, model).expect("device registers");
    }

    TestPlace { state, place }
}

impl TestPlace {
    /// Apply one device attribute change and wait for the actor to drain
    pub async fn set_device(&self, id: &str, key: &str, value: &str) {
        self.state
            .apply_device_change(
                self.place,
                &Address::device(id),
                AttributeMap::new().with(key, value),
            )
            .expect("device change applies");
        self.wait_idle().await;
    }

    /// Send a request through the place actor and await its outcome
    pub async fn send(&self, body: RequestBody) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.state.registry.dispatch(
            self.place,
            SubsystemEvent::Request {
                body,
                reply: Some(tx),
            },
        );
        rx.await.expect("actor replies")
    }

    /// Wait until the place actor has drained its mailbox
    pub async fn wait_idle(&self) {
        for _ in 0..1000 {
            if !self.state.registry.is_active(self.place) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("place actor never went idle");
    }

    pub fn status(&self) -> AlarmStatus {
        self.state
            .subsystem
            .status(self.place)
            .expect("status loads")
    }

    /// Current value of one device attribute
    pub fn device_value(&self, id: &str, key: &str) -> Option<String> {
        self.state
            .store
            .get(&Address::device(id))
            .and_then(|m| m.get(key).and_then(|v| v.as_text().map(str::to_string)))
    }
}
