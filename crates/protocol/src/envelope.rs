use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A fresh message or operation identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ── OperationInfo ────────────────────────────────────────────────────────────

/// Human-readable half of the correlation triplet. The operation id itself is
/// generated by the pipeline once per outbound call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl OperationInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// One logical message travelling through a pipeline.
///
/// Keys that are not part of the known field set are collected into
/// [`Envelope::extensions`] on deserialization and written back out untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T = Value> {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Creation instant in milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_identifier: Option<String>,
    /// Extra fields set by handlers.
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

impl<T> Envelope<T> {
    /// Wrap `data` with a fresh id and the current timestamp.
    pub fn new(data: T) -> Self {
        Self {
            id: new_id(),
            source: None,
            target: None,
            timestamp: now_ms(),
            data,
            operation_id: None,
            operation_name: None,
            operation_description: None,
            integrity: None,
            signature: None,
            signature_identifier: None,
            extensions: Map::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Set the full correlation triplet.
    pub fn with_operation(mut self, operation_id: impl Into<String>, info: OperationInfo) -> Self {
        self.operation_id = Some(operation_id.into());
        self.operation_name = info.name;
        self.operation_description = info.description;
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// Copy the correlation triplet from `other` when this envelope has none.
    pub fn inherit_operation<U>(&mut self, other: &Envelope<U>) {
        if self.operation_id.is_some() {
            return;
        }
        self.operation_id.clone_from(&other.operation_id);
        self.operation_name.clone_from(&other.operation_name);
        self.operation_description
            .clone_from(&other.operation_description);
    }

    /// Replace the payload, keeping every piece of metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            id: self.id,
            source: self.source,
            target: self.target,
            timestamp: self.timestamp,
            data: f(self.data),
            operation_id: self.operation_id,
            operation_name: self.operation_name,
            operation_description: self.operation_description,
            integrity: self.integrity,
            signature: self.signature,
            signature_identifier: self.signature_identifier,
            extensions: self.extensions,
        }
    }

    /// Metadata-only copy, for logging an envelope that is about to be moved.
    pub fn header(&self) -> Envelope<()> {
        Envelope {
            id: self.id.clone(),
            source: self.source.clone(),
            target: self.target.clone(),
            timestamp: self.timestamp,
            data: (),
            operation_id: self.operation_id.clone(),
            operation_name: self.operation_name.clone(),
            operation_description: self.operation_description.clone(),
            integrity: self.integrity.clone(),
            signature: self.signature.clone(),
            signature_identifier: self.signature_identifier.clone(),
            extensions: self.extensions.clone(),
        }
    }

    /// Milliseconds elapsed between creation and `now`. Clamped at zero for
    /// envelopes stamped by a clock that runs ahead of ours.
    pub fn age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.timestamp)
    }

    pub fn into_data(self) -> T {
        self.data
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn new_envelopes_get_distinct_ids() {
        let a = Envelope::new(json!({}));
        let b = Envelope::new(json!({}));
        assert_ne!(a.id, b.id);
        assert!(a.timestamp > 0);
    }

    #[test]
    fn serializes_with_camel_case_and_skips_absent_fields() {
        let env = Envelope::new(json!({"x": 1}))
            .with_source("client")
            .with_operation("op-1", OperationInfo::named("apply"));
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["operationId"], "op-1");
        assert_eq!(value["operationName"], "apply");
        assert_eq!(value["source"], "client");
        assert!(value.get("target").is_none());
        assert!(value.get("signatureIdentifier").is_none());
    }

    #[test]
    fn unknown_keys_round_trip_through_extensions() {
        let raw = json!({
            "id": "m-1",
            "timestamp": 42,
            "data": [1, 2],
            "signatureIdentifier": "key-7",
            "hop": 3,
            "trace": {"span": "abc"}
        });
        let env: Envelope = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(env.signature_identifier.as_deref(), Some("key-7"));
        assert_eq!(env.extensions["hop"], 3);
        assert_eq!(serde_json::to_value(&env).unwrap(), raw);
    }

    #[test]
    fn inherit_operation_only_fills_missing_triplet() {
        let outgoing = Envelope::new(())
            .with_operation("op-1", OperationInfo::named("get").with_description("read x"));

        let mut bare = Envelope::new(5u32);
        bare.inherit_operation(&outgoing);
        assert_eq!(bare.operation_id.as_deref(), Some("op-1"));
        assert_eq!(bare.operation_description.as_deref(), Some("read x"));

        let mut own = Envelope::new(5u32).with_operation("op-2", OperationInfo::default());
        own.inherit_operation(&outgoing);
        assert_eq!(own.operation_id.as_deref(), Some("op-2"));
        assert!(own.operation_name.is_none());
    }

    #[test]
    fn map_keeps_metadata() {
        let env = Envelope::new("7")
            .with_target("server")
            .with_extension("hop", json!(1));
        let id = env.id.clone();
        let mapped = env.map(|s| s.parse::<u32>().unwrap());
        assert_eq!(mapped.data, 7);
        assert_eq!(mapped.id, id);
        assert_eq!(mapped.target.as_deref(), Some("server"));
        assert_eq!(mapped.extensions["hop"], 1);
    }

    #[test]
    fn header_drops_only_the_payload() {
        let env = Envelope::new(vec![1u8, 2, 3])
            .with_source("a")
            .with_operation("op", OperationInfo::named("n"));
        let header = env.header();
        assert_eq!(header.id, env.id);
        assert_eq!(header.source, env.source);
        assert_eq!(header.operation_name, env.operation_name);
        assert_eq!(header.timestamp, env.timestamp);
    }

    #[test]
    fn age_is_clamped() {
        let mut env = Envelope::new(());
        env.timestamp = 1_000;
        assert_eq!(env.age_ms(1_250), 250);
        assert_eq!(env.age_ms(900), 0);
    }
}
