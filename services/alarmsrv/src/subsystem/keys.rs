//! Attribute Keyspace
//!
//! Single source of truth for the attribute keys the alarm subsystem reads
//! and writes, both on device models and on the per-place subsystem model.
//! Per-instance attributes append an instance qualifier via
//! [`haven_model::instanced`].

/// Place ownership marker present on every model
pub const BASE_PLACE: &str = "base:place";

// ---- device capability attributes ----

/// Contact sensor state: `OPENED` / `CLOSED`
pub const CONTACT: &str = "cont:contact";
/// Motion sensor state: `DETECTED` / `NONE`
pub const MOTION: &str = "mot:motion";
/// Smoke detector state: `DETECTED` / `SAFE`
pub const SMOKE: &str = "smoke:smoke";
/// Carbon monoxide detector state: `DETECTED` / `SAFE`
pub const CO: &str = "co:co";
/// Leak sensor state: `LEAK` / `SAFE`
pub const LEAK: &str = "leakh2o:state";
/// Water valve state: `OPEN` / `CLOSED`
pub const VALVE: &str = "valv:valvestate";

/// Attribute values for the device states above
pub mod values {
    pub const OPENED: &str = "OPENED";
    pub const CLOSED: &str = "CLOSED";
    pub const DETECTED: &str = "DETECTED";
    pub const SAFE: &str = "SAFE";
    pub const LEAK: &str = "LEAK";
    pub const NONE: &str = "NONE";
    pub const OPEN: &str = "OPEN";
}

// ---- subsystem model attributes ----

/// Per-type alert state, instanced by alert type name
/// (`alert:alertstate:SMOKE`)
pub const ALERT_STATE: &str = "alert:alertstate";
/// Aggregate subsystem alarm state
pub const ALARM_STATE: &str = "subalarm:alarmstate";
/// Ordered list of currently alerting types
pub const ACTIVE_ALERTS: &str = "subalarm:activealerts";
/// Escalation call tree (list of entry maps)
pub const CALL_TREE: &str = "subalarm:calltree";
/// Address of the open incident, empty text when none
pub const CURRENT_INCIDENT: &str = "subalarm:incident";

/// Security arm mode: `ON` / `PARTIAL` / `DISARMED`
pub const SECURITY_MODE: &str = "subsecurity:mode";
/// Entrance delay seconds, instanced by arm mode
/// (`subsecurity:entrancedelay:ON`)
pub const ENTRANCE_DELAY: &str = "subsecurity:entrancedelay";
/// Addresses excluded from participation by an `ArmBypassed` request
pub const BYPASSED: &str = "subsecurity:bypassed";
/// Epoch milliseconds at which the pending prealert expires; used to heal a
/// lost expiry timeout on the next event
pub const PREALERT_EXPIRY_AT: &str = "subsecurity:prealertexpiry";

/// Security arm modes
pub mod modes {
    pub const ON: &str = "ON";
    pub const PARTIAL: &str = "PARTIAL";
    pub const DISARMED: &str = "DISARMED";
}

/// Timeout purposes used in scheduler keys
pub mod purposes {
    pub const PREALERT_EXPIRY: &str = "prealert-expiry";
}

/// Call tree entry fields
pub mod calltree {
    pub const PERSON: &str = "person";
    pub const CONTACT: &str = "contact";
    pub const ENABLED: &str = "enabled";
}

/// Person model attributes
pub const PERSON_NAME: &str = "pers:name";
