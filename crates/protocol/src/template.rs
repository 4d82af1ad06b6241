use serde_json::{Map, Value};

/// Payloads that can be layered over a default template.
///
/// The merge is shallow: top-level keys from the caller win, nested objects
/// are not merged recursively.
pub trait MergeTemplate: Sized {
    fn merge_over(self, template: &Self) -> Self;
}

impl MergeTemplate for Map<String, Value> {
    fn merge_over(self, template: &Self) -> Self {
        let mut merged = template.clone();
        merged.extend(self);
        merged
    }
}

impl MergeTemplate for Value {
    fn merge_over(self, template: &Self) -> Self {
        match (self, template) {
            (Value::Object(data), Value::Object(defaults)) => {
                Value::Object(data.merge_over(defaults))
            },
            (Value::Null, _) => template.clone(),
            (data, _) => data,
        }
    }
}

impl MergeTemplate for () {
    fn merge_over(self, _template: &Self) -> Self {}
}
