//! Subscription ids, the device-state snapshot and live entity updates.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::PayloadError;

/// Server event name carrying a device state change
pub const DEVICE_UPDATED_EVENT: &str = "DEVICE_UPDATED";

/// Socket-level id of one subscription.
///
/// Ids are minted per `start` frame and never reused, so an id from a previous
/// socket can never match a subscription on the current one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SubscriptionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SubscriptionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type EntityId = String;

/// Property name to value, e.g. `powerState -> "true"`
pub type PropertyMap = BTreeMap<String, String>;

/// Latest known properties of every tracked entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    entities: HashMap<EntityId, PropertyMap>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: impl Into<EntityId>, properties: PropertyMap) {
        self.entities.insert(entity.into(), properties);
    }

    pub fn get(&self, entity: &str) -> Option<&PropertyMap> {
        self.entities.get(entity)
    }

    pub fn property(&self, entity: &str, name: &str) -> Option<&str> {
        self.get(entity)?.get(name).map(String::as_str)
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.entities.contains_key(entity)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &PropertyMap)> {
        self.entities.iter()
    }

    /// Overwrite only the properties named in `update`.
    ///
    /// Returns `false` and leaves the snapshot untouched when the entity is
    /// not tracked.
    pub fn merge(&mut self, update: &EntityUpdate) -> bool {
        let Some(properties) = self.entities.get_mut(&update.entity) else {
            return false;
        };
        for (name, value) in &update.properties {
            properties.insert(name.clone(), value.clone());
        }
        true
    }
}

impl<K: Into<EntityId>> FromIterator<(K, PropertyMap)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (K, PropertyMap)>>(iter: I) -> Self {
        Self {
            entities: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Partial property change for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityUpdate {
    pub entity: EntityId,
    pub properties: PropertyMap,
}

#[derive(Deserialize)]
struct DeviceUpdated {
    id: String,
    states: Vec<NamedState>,
}

#[derive(Deserialize)]
struct NamedState {
    name: String,
    value: Value,
}

impl EntityUpdate {
    /// Interpret the payload of a `data` frame.
    ///
    /// Accepts either `{entity, properties}` or the backend's event envelope
    /// `{data: {OnServerEvent: {name, payload}}}` whose `payload` is a JSON
    /// string `{id, states: [{name, value}]}`. Envelope events other than
    /// `DEVICE_UPDATED` yield `Ok(None)`.
    pub fn from_payload(payload: &Value) -> Result<Option<Self>, PayloadError> {
        if let Some(entity) = payload.get("entity") {
            let entity = entity
                .as_str()
                .ok_or(PayloadError::InvalidField("entity"))?
                .to_string();
            let properties = payload
                .get("properties")
                .ok_or(PayloadError::MissingField("properties"))?
                .as_object()
                .ok_or(PayloadError::InvalidField("properties"))?
                .iter()
                .map(|(name, value)| {
                    scalar_to_string(value)
                        .map(|value| (name.clone(), value))
                        .ok_or(PayloadError::InvalidField("properties"))
                })
                .collect::<Result<PropertyMap, _>>()?;
            return Ok(Some(Self { entity, properties }));
        }

        let event = payload
            .pointer("/data/OnServerEvent")
            .ok_or(PayloadError::UnknownShape)?;
        let name = event
            .get("name")
            .and_then(Value::as_str)
            .ok_or(PayloadError::MissingField("name"))?;
        if name != DEVICE_UPDATED_EVENT {
            return Ok(None);
        }

        let body = event
            .get("payload")
            .and_then(Value::as_str)
            .ok_or(PayloadError::MissingField("payload"))?;
        let device: DeviceUpdated =
            serde_json::from_str(body).map_err(|e| PayloadError::Json(e.to_string()))?;

        let properties = device
            .states
            .into_iter()
            .map(|state| {
                scalar_to_string(&state.value)
                    .map(|value| (state.name, value))
                    .ok_or(PayloadError::InvalidField("states"))
            })
            .collect::<Result<PropertyMap, _>>()?;

        Ok(Some(Self {
            entity: device.id,
            properties,
        }))
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
