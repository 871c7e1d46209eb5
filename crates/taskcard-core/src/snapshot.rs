use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The host's view of every observed entity, delivered on each refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    #[serde(default)]
    pub states: BTreeMap<String, EntityState>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntityState {
    #[serde(default)]
    pub state: String,

    #[serde(default)]
    pub attributes: EntityAttributes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntityAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,

    #[serde(default, with = "id_serde::option", skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_url: Option<String>,

    #[serde(default)]
    pub tasks: Vec<Task>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    #[serde(with = "id_serde")]
    pub id: String,

    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub due: Option<Due>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Due {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Task {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            due: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_due(mut self, date: Option<&str>, datetime: Option<&str>) -> Self {
        self.due = Some(Due {
            date: date.map(str::to_string),
            datetime: datetime.map(str::to_string),
            extra: BTreeMap::new(),
        });
        self
    }
}

impl EntityState {
    /// A scalar entity such as an `input_text` field.
    pub fn scalar(value: impl Into<String>) -> Self {
        Self {
            state: value.into(),
            attributes: EntityAttributes::default(),
        }
    }
}

impl Snapshot {
    pub fn entity(&self, entity_id: &str) -> Option<&EntityState> {
        self.states.get(entity_id)
    }

    pub fn entity_mut(&mut self, entity_id: &str) -> Option<&mut EntityState> {
        self.states.get_mut(entity_id)
    }

    /// Raw scalar state of a single-field entity.
    pub fn field_state(&self, entity_id: &str) -> Option<&str> {
        self.states.get(entity_id).map(|entity| entity.state.as_str())
    }

    pub fn insert(&mut self, entity_id: impl Into<String>, state: EntityState) {
        self.states.insert(entity_id.into(), state);
    }
}

/// Upstream ids are strings in newer payloads and integers in older ones.
pub mod id_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Unsigned(u64),
        Signed(i64),
    }

    impl From<RawId> for String {
        fn from(raw: RawId) -> Self {
            match raw {
                RawId::Text(text) => text,
                RawId::Unsigned(n) => n.to_string(),
                RawId::Signed(n) => n.to_string(),
            }
        }
    }

    pub fn serialize<S>(id: &str, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(id)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        RawId::deserialize(deserializer).map(String::from)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        use super::RawId;

        pub fn serialize<S>(id: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match id {
                Some(value) => serializer.serialize_str(value),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
        }
    }
}
