//! Filtered change subscriptions (`spec.md` §4.10, component C10): a
//! subscriber with a `where` expression sees `insert`/`delete` in place of
//! `update` whenever a change crosses the filter's boundary, rather than
//! raw before/after membership flips.

use std::rc::Rc;

use common::ChangeMessage;
use query::Expr;
use serde::Serialize;

use crate::collection::Collection;

pub(crate) struct Subscriber<T> {
    pub id: u64,
    pub filter: Option<Expr>,
    pub callback: Box<dyn Fn(Vec<ChangeMessage<T>>)>,
}

#[derive(Default)]
pub struct SubscribeOptions {
    pub include_initial_state: bool,
    pub filter: Option<Expr>,
}

/// An active subscription. Dropping this without calling [`Self::unsubscribe`]
/// leaves the callback registered, matching the teacher's convention of an
/// explicit unsubscribe function rather than drop-based cleanup (the caller
/// may want to keep the subscription alive past the handle's own scope).
pub struct Subscription<T> {
    collection: Rc<Collection<T>>,
    id: u64,
}

impl<T: Clone + Serialize + 'static> Subscription<T> {
    pub(crate) fn new(collection: Rc<Collection<T>>, id: u64) -> Self {
        Self { collection, id }
    }

    /// Idempotent: calling this more than once is a no-op after the first.
    pub fn unsubscribe(&self) {
        self.collection.unsubscribe(self.id);
    }
}

pub(crate) fn record_matches<T: Serialize>(filter: &Option<Expr>, value: &T) -> bool {
    match filter {
        None => true,
        Some(expr) => serde_json::to_value(value)
            .map(|json| query::matches(expr, &json))
            .unwrap_or(false),
    }
}

/// Projects a batch of raw derived-view changes through one subscriber's
/// filter, turning a boundary crossing into a synthetic insert/delete.
pub(crate) fn filter_changes<T: Clone + Serialize>(
    filter: &Option<Expr>,
    changes: &[ChangeMessage<T>],
) -> Vec<ChangeMessage<T>> {
    if filter.is_none() {
        return changes.to_vec();
    }
    let mut out = Vec::with_capacity(changes.len());
    for change in changes {
        let was_in = change
            .previous_value
            .as_ref()
            .is_some_and(|previous| record_matches(filter, previous));
        let is_in = !matches!(change.change_type, common::ChangeType::Delete)
            && record_matches(filter, &change.value);
        match (was_in, is_in) {
            (false, false) => {},
            (false, true) => out.push(ChangeMessage::insert(change.key.clone(), change.value.clone())),
            (true, false) => {
                let previous = change.previous_value.clone().unwrap_or_else(|| change.value.clone());
                out.push(ChangeMessage::delete(change.key.clone(), previous));
            },
            (true, true) => out.push(change.clone()),
        }
    }
    out
}
