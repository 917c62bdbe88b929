//! Change tracking between the pre- and post-image of a record

use crate::config::EventPolicy;
use crate::types::Record;
use serde_json::Value;

/// A plaintext field transition, before encryption is applied
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: &'static str,
    pub encrypted: bool,
    pub old_value: Value,
    pub new_value: Value,
}

/// Diff two images of a record in declared field order
///
/// Only fields whose value differs are listed, so the result depends on the
/// logical change and not on the order the caller mutated fields in.
pub fn diff<R: Record>(before: &R, after: &R, policy: EventPolicy) -> Vec<FieldChange> {
    if policy == EventPolicy::None {
        return Vec::new();
    }

    R::fields()
        .iter()
        .filter(|spec| spec.tracked || policy == EventPolicy::AllChanges)
        .filter_map(|spec| {
            let old_value = (spec.get)(before);
            let new_value = (spec.get)(after);
            (old_value != new_value).then_some(FieldChange {
                field: spec.name,
                encrypted: spec.encrypted,
                old_value,
                new_value,
            })
        })
        .collect()
}
