//! Model Addressing
//!
//! Every entity on the platform is identified by an [`Address`]: a namespace,
//! an entity id, and an optional instance qualifier. The canonical string form
//! is `namespace:id` or `namespace:id:instance` and is what goes over the wire
//! and into map keys.

use crate::error::ModelError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Driver namespace - physical and virtual devices
pub const NS_DEVICE: &str = "DRIV";
/// Service namespace - per-place subsystem models
pub const NS_SERVICE: &str = "SERV";
/// Platform namespace - cloud-side singleton services
pub const NS_PLATFORM: &str = "PLAT";
/// Person namespace - people associated with a place
pub const NS_PERSON: &str = "PERS";
/// Incident namespace - alarm incident records
pub const NS_INCIDENT: &str = "INCD";

/// Address of a platform entity
///
/// Value type used as map key and for equality. The namespace groups entities
/// by kind (`DRIV`, `SERV`, `PERS`, ...), the id names the entity inside the
/// namespace, and the optional instance qualifier distinguishes sub-entities
/// of one model (e.g. the `alarm` service instance of a place).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    namespace: String,
    id: String,
    instance: Option<String>,
}

impl Address {
    /// Create an address from namespace and id
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
            instance: None,
        }
    }

    /// Attach an instance qualifier
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Address of a device model
    pub fn device(id: impl Into<String>) -> Self {
        Self::new(NS_DEVICE, id)
    }

    /// Address of a per-place service model instance (e.g. the alarm subsystem)
    pub fn service(place_id: impl Into<String>, service: impl Into<String>) -> Self {
        Self::new(NS_SERVICE, place_id).with_instance(service)
    }

    /// Address of a person model
    pub fn person(id: impl Into<String>) -> Self {
        Self::new(NS_PERSON, id)
    }

    /// Address of an incident record
    pub fn incident(id: impl Into<String>) -> Self {
        Self::new(NS_INCIDENT, id)
    }

    /// Entity namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Entity id within the namespace
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Optional instance qualifier
    pub fn instance(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    /// Check namespace membership
    pub fn is_in(&self, namespace: &str) -> bool {
        self.namespace == namespace
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(instance) => write!(f, "{}:{}:{}", self.namespace, self.id, instance),
            None => write!(f, "{}:{}", self.namespace, self.id),
        }
    }
}

impl FromStr for Address {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let namespace = parts.next().filter(|p| !p.is_empty());
        let id = parts.next().filter(|p| !p.is_empty());
        match (namespace, id) {
            (Some(namespace), Some(id)) => {
                let mut addr = Address::new(namespace, id);
                if let Some(instance) = parts.next().filter(|p| !p.is_empty()) {
                    addr = addr.with_instance(instance);
                }
                Ok(addr)
            },
            _ => Err(ModelError::InvalidAddress(s.to_string())),
        }
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_roundtrip() {
        let addr = Address::device("abc-123");
        assert_eq!(addr.to_string(), "DRIV:abc-123");
        assert_eq!("DRIV:abc-123".parse::<Address>().unwrap(), addr);

        let addr = Address::service("place-1", "alarm");
        assert_eq!(addr.to_string(), "SERV:place-1:alarm");
        assert_eq!("SERV:place-1:alarm".parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn test_address_parse_rejects_malformed() {
        assert!("".parse::<Address>().is_err());
        assert!("DRIV".parse::<Address>().is_err());
        assert!("DRIV:".parse::<Address>().is_err());
        assert!(":id".parse::<Address>().is_err());
    }

    #[test]
    fn test_address_serde_as_string() {
        let addr = Address::person("p1");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"PERS:p1\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_namespace_membership() {
        assert!(Address::device("d").is_in(NS_DEVICE));
        assert!(!Address::device("d").is_in(NS_PERSON));
    }
}
