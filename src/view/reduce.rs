//! Grouped, single-pass reduce over collated view rows.

use serde_json::Value;

use std::cmp::Ordering;

use crate::{
    view::{
        collate::collate_json,
        sandbox::{Sandbox, SandboxFn},
        ViewRow,
    },
    Result,
};

// Grouping depth for `group=true`, effectively the whole key.
pub(crate) const GROUP_FULL: usize = usize::MAX;

// The grouping key for a row: an array-prefix of `level` for array
// keys, the key itself for non-array keys, null when grouping is off.
pub(crate) fn array_prefix(key: &Value, level: usize) -> Value {
    match key {
        Value::Array(arr) if level > 0 => {
            let n = level.min(arr.len());
            Value::Array(arr[..n].to_vec())
        }
        _ if level > 0 => key.clone(),
        _ => Value::Null,
    }
}

/// Reduce sorted rows into one row per contiguous group. With `level`
/// ZERO every row lands in a single group keyed null. Reduce errors are
/// fatal to the view.
pub(crate) fn reduce_rows(
    sandbox: &Sandbox,
    func: &SandboxFn,
    rows: &[ViewRow],
    level: usize,
) -> Result<Vec<ViewRow>> {
    let mut results = vec![];

    let mut i = 0;
    while i < rows.len() {
        let group_key = array_prefix(&rows[i].key, level);

        let mut group_keys = vec![];
        let mut group_values = vec![];
        let mut j = i;
        while j < rows.len() {
            let row_key = array_prefix(&rows[j].key, level);
            if collate_json(&group_key, &row_key) != Ordering::Equal {
                break;
            }
            group_keys.push(rows[j].key.clone());
            group_values.push(rows[j].value.clone());
            j += 1;
        }
        i = j;

        let value = sandbox.call_reduce(func, &group_keys, &group_values, false)?;
        results.push(ViewRow {
            id: None,
            key: group_key,
            value,
            doc: None,
        });
    }

    Ok(results)
}

#[cfg(test)]
#[path = "reduce_test.rs"]
mod reduce_test;
