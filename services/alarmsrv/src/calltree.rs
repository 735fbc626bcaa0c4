//! Escalation Call Tree
//!
//! Each place's subsystem model carries an ordered list of call tree entries
//! naming who to notify when an incident opens. Entries reference person
//! models by address; resolution skips disabled entries, malformed entries,
//! and dangling person references rather than failing the whole list.

use crate::subsystem::keys;
use crate::subsystem::model::AlarmSubsystemModel;
use haven_model::{Address, AttributeValue, ModelStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// One stored call tree entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallTreeEntry {
    /// Person model address
    pub person: Address,
    /// Contact detail (phone number, push channel)
    pub contact: String,
    /// Disabled entries are kept in the list but skipped at resolution
    pub enabled: bool,
}

impl CallTreeEntry {
    /// Encode as the attribute map stored in the subsystem model list
    pub fn to_value(&self) -> AttributeValue {
        let mut map = BTreeMap::new();
        map.insert(
            keys::calltree::PERSON.to_string(),
            AttributeValue::from(self.person.to_string()),
        );
        map.insert(
            keys::calltree::CONTACT.to_string(),
            AttributeValue::from(self.contact.clone()),
        );
        map.insert(
            keys::calltree::ENABLED.to_string(),
            AttributeValue::from(self.enabled),
        );
        AttributeValue::Map(map)
    }

    /// Decode a stored entry; `None` for anything malformed
    pub fn from_value(value: &AttributeValue) -> Option<Self> {
        let map = value.as_map()?;
        let person = map
            .get(keys::calltree::PERSON)?
            .as_text()?
            .parse::<Address>()
            .ok()?;
        let contact = map.get(keys::calltree::CONTACT)?.as_text()?.to_string();
        let enabled = map
            .get(keys::calltree::ENABLED)
            .and_then(AttributeValue::as_bool)
            .unwrap_or(true);
        Some(Self {
            person,
            contact,
            enabled,
        })
    }
}

/// A call tree entry joined with its person model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedContact {
    /// Person model address
    pub person: Address,
    /// Display name from the person model
    pub name: String,
    /// Contact detail from the entry
    pub contact: String,
}

/// Resolve a place's call tree against the model store, in stored order
///
/// Returns an empty list when no tree is configured. Disabled, malformed,
/// and dangling entries are skipped with a warning.
pub fn resolve_call_tree(
    store: &dyn ModelStore,
    view: &AlarmSubsystemModel,
) -> Vec<ResolvedContact> {
    let mut resolved = Vec::new();
    for raw in view.call_tree_raw() {
        let Some(entry) = CallTreeEntry::from_value(&raw) else {
            warn!(place = %view.place(), "skipping malformed call tree entry");
            continue;
        };
        if !entry.enabled {
            continue;
        }
        let Some(person) = store.get(&entry.person) else {
            warn!(place = %view.place(), person = %entry.person, "call tree entry references missing person");
            continue;
        };
        let name = match person.require_text(keys::PERSON_NAME) {
            Ok(name) => name.to_string(),
            Err(e) => {
                warn!(place = %view.place(), person = %entry.person, error = %e,
                      "skipping call tree entry with malformed person model");
                continue;
            },
        };
        resolved.push(ResolvedContact {
            person: entry.person,
            name,
            contact: entry.contact,
        });
    }
    resolved
}
