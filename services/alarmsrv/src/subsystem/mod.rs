//! Alarm Subsystem Aggregator
//!
//! One logical alarm subsystem per place, multiplexed over the shared worker
//! pool by the place executor. Every input (committed model change, user
//! request, timeout fire) arrives as a [`SubsystemEvent`] through the place's
//! mailbox, so subsystem state for one place is never touched concurrently.
//!
//! The per-type machines are pure; this module owns loading the subsystem
//! model, running the machines, applying their effects (incident calls,
//! timeouts, device commands) and committing the staged writes in one batch.

pub mod keys;
pub mod model;

use crate::bus::{MessageKind, PlatformBus, PlatformMessage};
use crate::error::{AlarmError, Result};
use crate::incident::IncidentService;
use crate::machine::{
    AlarmTypeMachine, AlertState, AlertType, CoAlarm, Effect, IncidentTrigger, MachineContext,
    PanicAlarm, SecurityAlarm, SmokeAlarm, Transition, TriggerEvent, WaterAlarm,
};
use crate::subsystem::keys::purposes;
use crate::subsystem::model::{AlarmState, AlarmSubsystemModel};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use haven_model::{Address, AttributeMap, Model, ModelChange, ModelStore, Predicate};
use haven_place::{KeyedScheduler, PlaceHandler, PlaceId, TimeoutKey};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, OnceLock};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// User-initiated subsystem requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestBody {
    /// Arm security; rejected while participating devices are tripped
    Arm { mode: String },
    /// Arm security, bypassing currently tripped devices
    ArmBypassed { mode: String },
    /// Disarm security, cancelling any security alert
    Disarm,
    /// Trip the panic alarm
    Panic,
    /// Cancel every active alert and the open incident
    Cancel,
}

/// Everything a place's alarm actor processes
pub enum SubsystemEvent {
    /// A committed model attribute change
    ModelChanged(ModelChange),
    /// A user request, optionally awaiting the outcome
    Request {
        body: RequestBody,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    /// A keyed timeout fired
    Timeout(TimeoutKey),
}

impl From<TimeoutKey> for SubsystemEvent {
    fn from(key: TimeoutKey) -> Self {
        SubsystemEvent::Timeout(key)
    }
}

/// Snapshot of one place's alarm subsystem, as served by the status API
#[derive(Debug, Clone, Serialize)]
pub struct AlarmStatus {
    pub place: PlaceId,
    pub state: AlarmState,
    pub active_alerts: Vec<AlertType>,
    pub alerts: Vec<AlertSnapshot>,
    pub security_mode: String,
    pub bypassed: Vec<String>,
    pub incident: Option<Address>,
}

/// One alarm type's state within a status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct AlertSnapshot {
    pub alert: AlertType,
    pub state: AlertState,
}

/// The alarm subsystem: per-place state machines over the model store
pub struct AlarmSubsystem {
    store: Arc<dyn ModelStore>,
    incidents: Arc<dyn IncidentService>,
    bus: Arc<dyn PlatformBus>,
    scheduler: OnceLock<Arc<KeyedScheduler<SubsystemEvent>>>,
    machines: Vec<Arc<dyn AlarmTypeMachine>>,
    /// Per (place, type) triggers accumulated during the current episode.
    /// Only ever touched from the owning place's actor turn.
    triggers: DashMap<(PlaceId, AlertType), Vec<IncidentTrigger>>,
}

impl AlarmSubsystem {
    /// Build the subsystem with all five alarm type machines
    pub fn new(
        store: Arc<dyn ModelStore>,
        incidents: Arc<dyn IncidentService>,
        bus: Arc<dyn PlatformBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            incidents,
            bus,
            scheduler: OnceLock::new(),
            machines: vec![
                Arc::new(SecurityAlarm),
                Arc::new(SmokeAlarm),
                Arc::new(CoAlarm),
                Arc::new(WaterAlarm),
                Arc::new(PanicAlarm),
            ],
            triggers: DashMap::new(),
        })
    }

    /// Wire in the scheduler after construction (the scheduler needs the
    /// registry, the registry needs this handler)
    pub fn attach_scheduler(&self, scheduler: Arc<KeyedScheduler<SubsystemEvent>>) {
        if self.scheduler.set(scheduler).is_err() {
            warn!("scheduler already attached");
        }
    }

    fn scheduler(&self) -> Option<&Arc<KeyedScheduler<SubsystemEvent>>> {
        self.scheduler.get()
    }

    fn machine_for(&self, alert: AlertType) -> &Arc<dyn AlarmTypeMachine> {
        // new() registers one machine per type
        self.machines
            .iter()
            .find(|m| m.alert_type() == alert)
            .unwrap_or(&self.machines[0])
    }

    fn load_view(&self, place: PlaceId) -> Result<AlarmSubsystemModel> {
        let address = AlarmSubsystemModel::address_for(place);
        let model = self
            .store
            .get(&address)
            .ok_or(AlarmError::UnknownPlace(place))?;
        Ok(AlarmSubsystemModel::new(place, model))
    }

    /// Read-only status snapshot for the API
    pub fn status(&self, place: PlaceId) -> Result<AlarmStatus> {
        let view = self.load_view(place)?;
        Ok(AlarmStatus {
            place,
            state: view.alarm_state(),
            active_alerts: view.active_alerts(),
            alerts: AlertType::PRIORITY_ORDER
                .into_iter()
                .map(|alert| AlertSnapshot {
                    alert,
                    state: view.alert_state(alert),
                })
                .collect(),
            security_mode: view.security_mode(),
            bypassed: view.bypassed().into_iter().collect(),
            incident: view.incident(),
        })
    }

    // ---- event entry points ----

    async fn on_model_changed(&self, place: PlaceId, change: ModelChange) {
        let mut view = match self.load_view(place) {
            Ok(view) => view,
            Err(_) => {
                warn!(%place, "dropping model change for place without subsystem model");
                return;
            },
        };
        let now = Utc::now();
        self.heal_prealert(&mut view, now).await;

        let Some(device) = self.store.get(&change.address) else {
            debug!(address = %change.address, "changed model no longer exists");
            self.finish(&mut view);
            return;
        };
        if !self.belongs_to_place(&device, place) {
            warn!(address = %change.address, %place, "model change for foreign place, ignoring");
            self.finish(&mut view);
            return;
        }

        for machine in &self.machines {
            if !machine.device_match().matches(&device) {
                continue;
            }
            let transition = {
                let ctx = MachineContext {
                    place,
                    view: &view,
                    now,
                };
                if !machine.participates(&ctx, &device) {
                    continue;
                }
                let Some(event) = machine.classify(&device, &change) else {
                    continue;
                };
                info!(%place, alert = %machine.alert_type(), trigger = %event,
                      source = %device.address(), "alarm trigger");
                machine.on_sensor_triggered(&ctx, device.address(), event)
            };
            // One failing type never blocks the others
            if let Err(e) = self
                .apply_transition(&mut view, machine.alert_type(), transition, now)
                .await
            {
                error!(%place, alert = %machine.alert_type(), error = %e,
                       "failed to apply alarm transition");
            }
        }

        self.finish(&mut view);
    }

    async fn handle_request(&self, place: PlaceId, body: RequestBody) -> Result<()> {
        let mut view = self.load_view(place)?;
        let now = Utc::now();
        self.heal_prealert(&mut view, now).await;

        let outcome = self.dispatch_request(place, &mut view, body, now).await;
        // Commit regardless: a rejected request stages nothing of its own,
        // but prealert healing above may have
        self.finish(&mut view);
        outcome
    }

    async fn dispatch_request(
        &self,
        place: PlaceId,
        view: &mut AlarmSubsystemModel,
        body: RequestBody,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match body {
            RequestBody::Arm { mode } => self.arm(view, &mode, false)?,
            RequestBody::ArmBypassed { mode } => self.arm(view, &mode, true)?,
            RequestBody::Disarm => self.disarm(view, now).await?,
            RequestBody::Panic => {
                let machine = self.machine_for(AlertType::Panic);
                let actor = view.address().clone();
                let transition = {
                    let ctx = MachineContext {
                        place,
                        view,
                        now,
                    };
                    machine.on_triggered(&ctx, &actor, TriggerEvent::Panic)
                };
                info!(%place, "panic alarm requested");
                self.apply_transition(view, AlertType::Panic, transition, now)
                    .await?;
            },
            RequestBody::Cancel => {
                // Idempotent; a cancel with nothing active is a no-op
                for alert in AlertType::PRIORITY_ORDER {
                    if view.alert_state(alert) == AlertState::Inactive {
                        continue;
                    }
                    let machine = self.machine_for(alert);
                    let transition = {
                        let ctx = MachineContext {
                            place,
                            view,
                            now,
                        };
                        machine.cancel(&ctx)
                    };
                    self.apply_transition(view, alert, transition, now).await?;
                }
                info!(%place, "alarm cancel requested");
            },
        }
        Ok(())
    }

    async fn on_timeout(&self, place: PlaceId, key: TimeoutKey) {
        if key.purpose != purposes::PREALERT_EXPIRY {
            warn!(%key, "unknown timeout purpose");
            return;
        }
        let Some(alert) = AlertType::PRIORITY_ORDER
            .into_iter()
            .find(|a| a.name() == key.alarm)
        else {
            warn!(%key, "timeout for unknown alarm type");
            return;
        };
        let mut view = match self.load_view(place) {
            Ok(view) => view,
            Err(_) => {
                debug!(%place, "timeout fired for place without subsystem model");
                return;
            },
        };
        let now = Utc::now();
        let machine = self.machine_for(alert);
        let transition = {
            let ctx = MachineContext {
                place,
                view: &view,
                now,
            };
            machine.on_prealert_expired(&ctx)
        };
        if transition.next == AlertState::Alert {
            info!(%place, alert = %alert, "prealert expired, escalating");
        }
        view.clear_prealert_deadline();
        if let Err(e) = self.apply_transition(&mut view, alert, transition, now).await {
            error!(%place, alert = %alert, error = %e, "failed to apply prealert expiry");
        }
        self.finish(&mut view);
    }

    // ---- request flows ----

    /// Validate and apply an arm request. With `bypass` the currently tripped
    /// participating devices are excluded for this arm cycle instead of
    /// rejecting the request.
    fn arm(&self, view: &mut AlarmSubsystemModel, mode: &str, bypass: bool) -> Result<()> {
        if mode != keys::modes::ON && mode != keys::modes::PARTIAL {
            return Err(AlarmError::InvalidRequest(format!("unknown arm mode {mode}")));
        }
        // Arming is only valid from rest; any alerting type blocks it,
        // bypassed or not
        for alert in AlertType::PRIORITY_ORDER {
            let state = view.alert_state(alert);
            if matches!(state, AlertState::Prealert | AlertState::Alert) {
                return Err(AlarmError::ArmInvalid(format!("{alert} is {state}")));
            }
        }

        let tripped: Vec<String> = self
            .place_devices(view.place(), SecurityAlarm.device_match())
            .into_iter()
            .filter(|d| {
                SecurityAlarm::participates_in_mode(d, mode) && SecurityAlarm::is_tripped(d)
            })
            .map(|d| d.address().to_string())
            .collect();

        if bypass {
            view.set_bypassed(tripped.iter().cloned().collect());
        } else if !tripped.is_empty() {
            return Err(AlarmError::ArmTriggered(tripped.join(", ")));
        } else {
            view.set_bypassed(Default::default());
        }

        view.set_security_mode(mode);
        info!(place = %view.place(), mode, bypass, "security armed");
        Ok(())
    }

    async fn disarm(&self, view: &mut AlarmSubsystemModel, now: DateTime<Utc>) -> Result<()> {
        let place = view.place();
        // Disarm unwinds security only; smoke, CO, water and panic keep
        // alerting until cancelled explicitly
        if view.alert_state(AlertType::Security) != AlertState::Inactive {
            let machine = self.machine_for(AlertType::Security);
            let transition = {
                let ctx = MachineContext {
                    place,
                    view: &*view,
                    now,
                };
                machine.cancel(&ctx)
            };
            self.apply_transition(view, AlertType::Security, transition, now)
                .await?;
        }
        view.set_security_mode(keys::modes::DISARMED);
        view.set_bypassed(Default::default());
        info!(%place, "security disarmed");
        Ok(())
    }

    // ---- effect application ----

    async fn apply_transition(
        &self,
        view: &mut AlarmSubsystemModel,
        alert: AlertType,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let place = view.place();
        view.set_alert_state(alert, transition.next);

        // Triggers recorded this turn; extension sends only these, opening
        // falls back to the full episode scratch-pad
        let mut turn_triggers: Vec<IncidentTrigger> = Vec::new();

        for effect in transition.effects {
            match effect {
                Effect::RecordTrigger(trigger) => {
                    let trigger = self.record_trigger(place, alert, trigger);
                    turn_triggers.push(trigger);
                },
                Effect::OpenIncident => {
                    // The whole episode so far, including prealert triggers
                    let triggers = self.episode_triggers(place, alert);
                    let was_open = view.incident().is_some();
                    let address = self.incidents.add_alert(place, alert, triggers).await?;
                    view.set_incident(&address);
                    let kind = if was_open {
                        MessageKind::IncidentUpdated
                    } else {
                        MessageKind::IncidentOpened
                    };
                    info!(%place, alert = %alert, incident = %address, "incident alert recorded");
                    self.bus.broadcast(PlatformMessage::new(
                        address,
                        kind,
                        json!({ "place": place, "alert": alert }),
                    ));
                },
                Effect::ExtendIncident => {
                    self.incidents
                        .update_incident(place, turn_triggers.clone())
                        .await?;
                    if let Some(address) = view.incident() {
                        self.bus.broadcast(PlatformMessage::new(
                            address,
                            MessageKind::IncidentUpdated,
                            json!({ "place": place, "alert": alert }),
                        ));
                    }
                },
                Effect::CancelIncident => {
                    self.cancel_incident(view, alert).await;
                },
                Effect::ClearTriggers => {
                    self.triggers.remove(&(place, alert));
                },
                Effect::ScheduleTimeout { purpose, after } => {
                    if let Some(scheduler) = self.scheduler() {
                        scheduler
                            .schedule_after(after, TimeoutKey::new(place, alert.name(), purpose));
                    } else {
                        warn!(%place, "no scheduler attached, timeout not armed");
                    }
                    if purpose == purposes::PREALERT_EXPIRY {
                        let deadline = now
                            + ChronoDuration::milliseconds(after.as_millis() as i64);
                        view.set_prealert_deadline(deadline);
                    }
                },
                Effect::CancelTimeout { purpose } => {
                    if let Some(scheduler) = self.scheduler() {
                        scheduler.cancel(&TimeoutKey::new(place, alert.name(), purpose));
                    }
                    if purpose == purposes::PREALERT_EXPIRY {
                        view.clear_prealert_deadline();
                    }
                },
                Effect::SendToDevices {
                    matching,
                    key,
                    value,
                } => {
                    self.send_to_devices(place, matching, key, value);
                },
            }
        }
        Ok(())
    }

    /// Append a trigger to the episode scratch-pad, clamping its timestamp so
    /// the pad stays monotonic
    fn record_trigger(
        &self,
        place: PlaceId,
        alert: AlertType,
        mut trigger: IncidentTrigger,
    ) -> IncidentTrigger {
        let mut pad = self.triggers.entry((place, alert)).or_default();
        if let Some(last) = pad.last() {
            if trigger.time < last.time {
                trigger.time = last.time;
            }
        }
        pad.push(trigger.clone());
        trigger
    }

    fn episode_triggers(&self, place: PlaceId, alert: AlertType) -> Vec<IncidentTrigger> {
        self.triggers
            .get(&(place, alert))
            .map(|pad| pad.value().clone())
            .unwrap_or_default()
    }

    /// Cancel this type's part of the open incident and, since the
    /// in-process incident service completes synchronously, finish the
    /// type's CLEARING state in the same turn.
    ///
    /// The incident is shared between alerting types, so it is only
    /// cancelled at the service once the last alerting type unwinds; until
    /// then the type just leaves the episode locally.
    async fn cancel_incident(&self, view: &mut AlarmSubsystemModel, alert: AlertType) {
        let place = view.place();
        let others_alerting = AlertType::PRIORITY_ORDER.into_iter().any(|other| {
            other != alert
                && matches!(
                    view.alert_state(other),
                    AlertState::Prealert | AlertState::Alert
                )
        });
        if others_alerting {
            view.set_alert_state(alert, AlertState::Inactive);
            self.triggers.remove(&(place, alert));
            return;
        }
        // Another type cancelled the shared incident earlier this turn
        let completed = match view.incident() {
            None => true,
            Some(address) => match self.incidents.cancel(place).await {
                Ok(completed) => {
                    self.bus.broadcast(PlatformMessage::new(
                        address,
                        MessageKind::IncidentCancelled,
                        json!({ "place": place }),
                    ));
                    completed
                },
                Err(e) => {
                    // Linkage without an open incident; recover to rest
                    warn!(%place, error = %e, "incident cancel failed, clearing linkage");
                    true
                },
            },
        };
        if completed {
            view.clear_incident();
            view.set_alert_state(alert, AlertState::Inactive);
            self.triggers.remove(&(place, alert));
        }
    }

    /// Escalate a pending prealert whose expiry timeout was lost (process
    /// restart, scheduler gap). Runs at the head of every turn.
    async fn heal_prealert(&self, view: &mut AlarmSubsystemModel, now: DateTime<Utc>) {
        let Some(deadline) = view.prealert_deadline() else {
            return;
        };
        if deadline > now {
            return;
        }
        let place = view.place();
        if view.alert_state(AlertType::Security) == AlertState::Prealert {
            warn!(%place, "prealert deadline passed without a timeout fire, escalating");
            let machine = self.machine_for(AlertType::Security);
            let transition = {
                let ctx = MachineContext {
                    place,
                    view: &*view,
                    now,
                };
                machine.on_prealert_expired(&ctx)
            };
            if let Err(e) = self
                .apply_transition(view, AlertType::Security, transition, now)
                .await
            {
                error!(%place, error = %e, "failed to heal expired prealert");
            }
        }
        view.clear_prealert_deadline();
        if let Some(scheduler) = self.scheduler() {
            scheduler.cancel(&TimeoutKey::new(
                place,
                AlertType::Security.name(),
                purposes::PREALERT_EXPIRY,
            ));
        }
    }

    // ---- store plumbing ----

    fn belongs_to_place(&self, model: &Model, place: PlaceId) -> bool {
        model
            .get(keys::BASE_PLACE)
            .and_then(|v| v.as_text())
            .map(|p| p == place.to_string())
            .unwrap_or(false)
    }

    fn place_devices(&self, place: PlaceId, matching: Predicate) -> Vec<Model> {
        let scoped = matching.and(Predicate::attr_equals(
            keys::BASE_PLACE,
            place.to_string(),
        ));
        self.store.models(&scoped)
    }

    /// Write a command attribute to every matching device in the place
    fn send_to_devices(
        &self,
        place: PlaceId,
        matching: Predicate,
        key: String,
        value: haven_model::AttributeValue,
    ) {
        for device in self.place_devices(place, matching) {
            let address = device.address().clone();
            let update = AttributeMap::new().with(key.clone(), value.clone());
            match self.store.update(&address, update) {
                Ok(changes) if !changes.is_empty() => {
                    info!(%place, device = %address, key = %key, "device command sent");
                    self.bus.broadcast(PlatformMessage::new(
                        address,
                        MessageKind::DeviceCommand,
                        json!({ "key": key.clone(), "value": value.clone() }),
                    ));
                },
                Ok(_) => {},
                Err(e) => {
                    error!(%place, device = %address, error = %e, "device command failed");
                },
            }
        }
    }

    /// Commit, logging rather than propagating; used on paths with no
    /// requester to report to
    fn finish(&self, view: &mut AlarmSubsystemModel) {
        if let Err(e) = self.commit(view) {
            error!(place = %view.place(), error = %e, "failed to commit subsystem model");
        }
    }

    /// Commit the turn's staged writes in one batch and broadcast each
    /// resulting change
    fn commit(&self, view: &mut AlarmSubsystemModel) -> Result<()> {
        view.recompute_aggregate();
        let staged = view.take_staged();
        if staged.is_empty() {
            return Ok(());
        }
        let address = view.address().clone();
        let changes = self.store.update(&address, staged)?;
        for change in changes {
            self.bus.broadcast(PlatformMessage::new(
                address.clone(),
                MessageKind::ValueChange,
                json!({ "key": change.key, "old": change.old, "new": change.new }),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PlaceHandler<SubsystemEvent> for AlarmSubsystem {
    async fn handle(&self, place: PlaceId, event: SubsystemEvent) {
        match event {
            SubsystemEvent::ModelChanged(change) => self.on_model_changed(place, change).await,
            SubsystemEvent::Request { body, reply } => {
                let outcome = self.handle_request(place, body).await;
                if let Err(e) = &outcome {
                    debug!(%place, code = e.code(), "request rejected: {e}");
                }
                if let Some(reply) = reply {
                    // Requester may have given up waiting
                    let _ = reply.send(outcome);
                }
            },
            SubsystemEvent::Timeout(key) => self.on_timeout(place, key).await,
        }
    }
}
