//! Turns a folder's logical child list into concrete `position` values.

use std::collections::HashSet;
use tracing::debug;

use crate::error::Result;
use crate::store::BookmarkStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    pub order: Vec<String>,
    /// False when the folder already read back in this order.
    pub changed: bool,
}

/// Merge a folder's incoming child list with the rows that actually
/// belong to it.
///
/// Incoming GUIDs that are members come first, in incoming order; members
/// the incoming list does not mention follow in their existing order.
/// GUIDs that are not members are dropped, as are duplicates.
pub fn merge_child_order(incoming: &[String], members: &[String]) -> Vec<String> {
    let member_set: HashSet<&str> = members.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(members.len());
    let mut order = Vec::with_capacity(members.len());

    for guid in incoming {
        if member_set.contains(guid.as_str()) && seen.insert(guid.as_str()) {
            order.push(guid.clone());
        }
    }
    for guid in members {
        if seen.insert(guid.as_str()) {
            order.push(guid.clone());
        }
    }
    order
}

/// Materialize `incoming` as the order of `folder`.
pub fn materialize(store: &BookmarkStore, folder: &str, incoming: &[String]) -> Result<Materialized> {
    let current = store.children_of(folder)?;
    let members = store.rows_with_parent(folder)?;
    let order = merge_child_order(incoming, &members);
    let changed = order != current;

    if changed {
        store.set_positions(folder, &order)?;
        debug!("materialized {}: {:?} -> {:?}", folder, current, order);
    } else {
        debug!("order of {} unchanged", folder);
    }

    Ok(Materialized { order, changed })
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_merge_is_permutation_of_members(
            members in proptest::collection::hash_set("[a-z]{3}", 0..12),
            extra in proptest::collection::vec("[a-z]{3}", 0..6),
        ) {
            let members: Vec<String> = members.into_iter().collect();
            let mut incoming: Vec<String> = members.iter().rev().cloned().collect();
            incoming.extend(extra);

            let merged = merge_child_order(&incoming, &members);
            let mut sorted_merged = merged.clone();
            sorted_merged.sort();
            let mut sorted_members = members.clone();
            sorted_members.sort();
            prop_assert_eq!(sorted_merged, sorted_members);
        }

        #[test]
        fn prop_merge_is_idempotent(
            members in proptest::collection::hash_set("[a-z]{3}", 0..12),
            incoming in proptest::collection::vec("[a-z]{3}", 0..12),
        ) {
            let members: Vec<String> = members.into_iter().collect();
            let once = merge_child_order(&incoming, &members);
            let twice = merge_child_order(&once, &once);
            prop_assert_eq!(once, twice);
        }
    }
}
