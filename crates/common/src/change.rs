use value::Key;

/// Free-form, sync-source- or user-supplied metadata attached to a mutation
/// or a synced change. Modeled as a JSON object rather than a generic type
/// parameter so `Collection<T>` doesn't need a second type parameter for
/// metadata the engine itself never interprets.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// A single delta delivered to a subscriber. `previous_value` is required
/// for `Update`/`Delete` per `spec.md` §3.
#[derive(Clone, Debug)]
pub struct ChangeMessage<T> {
    pub key: Key,
    pub change_type: ChangeType,
    pub value: T,
    pub previous_value: Option<T>,
    pub metadata: Option<Metadata>,
}

impl<T> ChangeMessage<T> {
    pub fn insert(key: Key, value: T) -> Self {
        Self {
            key,
            change_type: ChangeType::Insert,
            value,
            previous_value: None,
            metadata: None,
        }
    }

    pub fn update(key: Key, value: T, previous_value: T) -> Self {
        Self {
            key,
            change_type: ChangeType::Update,
            value,
            previous_value: Some(previous_value),
            metadata: None,
        }
    }

    /// `value` mirrors the deleted record so subscribers that only look at
    /// `value` still see what was removed, matching the spec's
    /// `{key, type: delete, value, previousValue}` shape where both carry
    /// the same payload.
    pub fn delete(key: Key, previous_value: T) -> Self
    where
        T: Clone,
    {
        Self {
            key,
            change_type: ChangeType::Delete,
            value: previous_value.clone(),
            previous_value: Some(previous_value),
            metadata: None,
        }
    }
}
