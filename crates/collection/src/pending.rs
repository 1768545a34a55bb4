//! Internal helpers for building [`transaction::PendingMutation`]s and
//! driving the synchronous overlay/index/emission pipeline shared by direct
//! mutators (C8) and sync intake (C9).

use std::time::{
    SystemTime,
    UNIX_EPOCH,
};

use common::ChangeMessage;
use serde::Serialize;
use value::Key;

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Diffs `before`/`after` structurally (via their JSON projection, since `T`
/// isn't required to implement `PartialEq`) and produces the change to
/// emit, or `None` if the derived view didn't actually move.
pub(crate) fn derive_change<T: Clone + Serialize>(
    key: Key,
    before: Option<T>,
    after: Option<T>,
) -> Option<ChangeMessage<T>> {
    match (before, after) {
        (None, None) => None,
        (None, Some(value)) => Some(ChangeMessage::insert(key, value)),
        (Some(previous), None) => Some(ChangeMessage::delete(key, previous)),
        (Some(previous), Some(value)) => {
            let unchanged = serde_json::to_value(&previous).ok() == serde_json::to_value(&value).ok();
            if unchanged {
                None
            } else {
                Some(ChangeMessage::update(key, value, previous))
            }
        },
    }
}

pub(crate) fn apply_index_change<T>(
    indexes: &mut indexing::IndexSet<T>,
    key: &Key,
    before: Option<&T>,
    after: Option<&T>,
) -> anyhow::Result<()> {
    match (before, after) {
        (None, Some(new)) => indexes.on_insert(key, new),
        (Some(old), None) => {
            indexes.on_remove(key, old);
            Ok(())
        },
        (Some(old), Some(new)) => indexes.on_update(key, old, new),
        (None, None) => Ok(()),
    }
}

/// The minimal JSON merge-patch (RFC 7396-shaped) describing how `after`
/// differs from `before`: changed/added keys carry their new value, removed
/// keys carry `null`. `None` when the two serialize identically, or when
/// either side isn't a JSON object (the patch shape only applies to
/// `update`, never to insert/delete, which carry a whole value instead).
pub(crate) fn diff_changes<T: Serialize>(before: &T, after: &T) -> Option<serde_json::Value> {
    let before = serde_json::to_value(before).ok()?;
    let after = serde_json::to_value(after).ok()?;
    if before == after {
        return None;
    }
    let (serde_json::Value::Object(b), serde_json::Value::Object(a)) = (&before, &after) else {
        return Some(after);
    };
    let mut patch = serde_json::Map::new();
    for (k, av) in a {
        if b.get(k) != Some(av) {
            patch.insert(k.clone(), av.clone());
        }
    }
    for k in b.keys() {
        if !a.contains_key(k) {
            patch.insert(k.clone(), serde_json::Value::Null);
        }
    }
    Some(serde_json::Value::Object(patch))
}
