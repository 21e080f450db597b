//! Hierarchy expansion and composite-phenomenon handling.
//!
//! Parent/child trees (procedures, features, observable properties) and
//! composite-phenomenon membership are expanded into flat identifier sets
//! with an explicit worklist and a visited-set guard: stack depth is bounded
//! and a cycle is a detectable error instead of a stack overflow.
//!
//! Expansion is idempotent — expanding an already-flat set returns the same
//! set — and an identifier with no children expands to the singleton.

use std::collections::BTreeSet;
use std::collections::VecDeque;

use sensorstore_model::{HierarchyDirection, HierarchyKind, ObservableProperty};

use crate::error::{Result, StoreError};
use crate::reference::ReferenceCache;
use crate::registry::{ensure_constellation, register_observable_property};
use crate::store::{Session, StoreInner};

/// Expand root identifiers into the transitive flat identifier set.
///
/// `include_roots` controls whether the roots themselves appear in the
/// output. Identifiers unknown to the store are treated as childless leaves.
pub fn expand(
    session: &Session,
    kind: HierarchyKind,
    roots: &[String],
    include_roots: bool,
    direction: HierarchyDirection,
) -> Result<BTreeSet<String>> {
    let store = session.read();
    let mut out = BTreeSet::new();

    // Each root is walked with its own visited set: a revisit inside one
    // walk is a genuine cycle, while overlap between two roots' subtrees
    // (one root descending from another, or parent walks converging) is
    // ordinary and must not be mistaken for one.
    for root in roots {
        if include_roots {
            out.insert(root.clone());
        }
        let Some(id) = row_id(&store, kind, root) else {
            // No row means no children; the root stands alone.
            continue;
        };
        let mut visited: BTreeSet<u32> = BTreeSet::new();
        visited.insert(id);
        let mut worklist: VecDeque<u32> = VecDeque::new();
        worklist.push_back(id);

        while let Some(current) = worklist.pop_front() {
            for next in neighbors(&store, kind, current, direction) {
                if !visited.insert(next) {
                    return Err(StoreError::HierarchyCycle {
                        identifier: identifier_of(&store, kind, next),
                    });
                }
                out.insert(identifier_of(&store, kind, next));
                worklist.push_back(next);
            }
        }
    }
    Ok(out)
}

fn row_id(store: &StoreInner, kind: HierarchyKind, identifier: &str) -> Option<u32> {
    match kind {
        HierarchyKind::Procedure => store.procedure_ids.get(identifier).copied(),
        HierarchyKind::Feature => store.feature_ids.get(identifier).copied(),
        HierarchyKind::ObservableProperty => store.property_ids.get(identifier).copied(),
    }
}

fn identifier_of(store: &StoreInner, kind: HierarchyKind, id: u32) -> String {
    match kind {
        HierarchyKind::Procedure => store.procedures[id as usize].identifier.clone(),
        HierarchyKind::Feature => store.features[id as usize].identifier.clone(),
        HierarchyKind::ObservableProperty => store.properties[id as usize].identifier.clone(),
    }
}

fn neighbors(
    store: &StoreInner,
    kind: HierarchyKind,
    id: u32,
    direction: HierarchyDirection,
) -> Vec<u32> {
    match direction {
        HierarchyDirection::Children => match kind {
            HierarchyKind::Procedure => store
                .procedure_children
                .get(&id)
                .cloned()
                .unwrap_or_default(),
            HierarchyKind::Feature => {
                store.feature_children.get(&id).cloned().unwrap_or_default()
            }
            HierarchyKind::ObservableProperty => store
                .property_children
                .get(&id)
                .cloned()
                .unwrap_or_default(),
        },
        HierarchyDirection::Parents => {
            let parent = match kind {
                HierarchyKind::Procedure => store.procedures[id as usize].parent,
                HierarchyKind::Feature => store.features[id as usize].parent,
                HierarchyKind::ObservableProperty => store.properties[id as usize].parent,
            };
            parent.into_iter().collect()
        }
    }
}

// ============================================================================
// Composite phenomena
// ============================================================================

/// Insert a composite observable property.
///
/// Order matters: components are created first (if absent) as hidden-child
/// properties, then the parent-child linkage is persisted, then every
/// constellation already registered for the parent under a (procedure,
/// offering) pair is mirrored per component as a hidden-child constellation.
pub fn insert_composite_phenomenon(
    session: &Session,
    parent: &ObservableProperty,
    components: &[ObservableProperty],
    mut cache: Option<&mut ReferenceCache>,
) -> Result<u32> {
    let parent_id = register_observable_property(session, parent, cache.as_deref_mut())?;

    let mut component_ids = Vec::with_capacity(components.len());
    for component in components {
        let mut hidden = component.clone();
        hidden.hidden_child = true;
        let id = register_observable_property(session, &hidden, cache.as_deref_mut())?;
        component_ids.push(id);
    }

    {
        let mut store = session.write();
        for &component_id in &component_ids {
            if component_id == parent_id {
                return Err(StoreError::HierarchyCycle {
                    identifier: parent.identifier.clone(),
                });
            }
            let row = &mut store.properties[component_id as usize];
            row.hidden_child = true;
            row.parent = Some(parent_id);
            let children = store.property_children.entry(parent_id).or_default();
            if !children.contains(&component_id) {
                children.push(component_id);
            }
            let parent_row = &mut store.properties[parent_id as usize];
            if !parent_row.components.contains(&component_id) {
                parent_row.components.push(component_id);
            }
        }
    }

    // Mirror existing parent constellations for each component.
    let existing: Vec<(u32, u32, Option<u32>)> = {
        let store = session.read();
        store
            .constellations
            .iter()
            .filter(|c| c.property == parent_id)
            .map(|c| (c.procedure, c.offering, c.observation_type))
            .collect()
    };
    for (procedure, offering, observation_type) in existing {
        let type_key = {
            let store = session.read();
            observation_type.and_then(|t| {
                store
                    .reference_table(sensorstore_model::ReferenceKind::ObservationType)
                    .value(t)
                    .map(str::to_string)
            })
        };
        for &component_id in &component_ids {
            ensure_constellation(
                session,
                procedure,
                component_id,
                offering,
                type_key.as_deref(),
                true,
                cache.as_deref_mut(),
            )?;
        }
    }

    tracing::debug!(
        parent = %parent.identifier,
        components = component_ids.len(),
        "inserted composite phenomenon"
    );
    Ok(parent_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::register_procedure;
    use crate::schema::SchemaShape;
    use crate::store::ObservationStore;
    use sensorstore_model::Procedure;

    fn store_with_procedure_tree() -> ObservationStore {
        let store = ObservationStore::new(SchemaShape::LegacyFlat);
        let session = store.session();
        register_procedure(&session, &Procedure::new("root", "fmt"), None).unwrap();
        let mut child = Procedure::new("child-a", "fmt");
        child.parent = Some("root".to_string());
        register_procedure(&session, &child, None).unwrap();
        let mut grandchild = Procedure::new("leaf-a1", "fmt");
        grandchild.parent = Some("child-a".to_string());
        register_procedure(&session, &grandchild, None).unwrap();
        store
    }

    #[test]
    fn expands_children_transitively() {
        let store = store_with_procedure_tree();
        let session = store.session();
        let set = expand(
            &session,
            HierarchyKind::Procedure,
            &["root".to_string()],
            true,
            HierarchyDirection::Children,
        )
        .unwrap();
        assert_eq!(
            set,
            ["root", "child-a", "leaf-a1"]
                .iter()
                .map(|s| s.to_string())
                .collect()
        );
    }

    #[test]
    fn excluding_roots_drops_them() {
        let store = store_with_procedure_tree();
        let session = store.session();
        let set = expand(
            &session,
            HierarchyKind::Procedure,
            &["root".to_string()],
            false,
            HierarchyDirection::Children,
        )
        .unwrap();
        assert!(!set.contains("root"));
        assert!(set.contains("leaf-a1"));
    }

    #[test]
    fn unknown_identifier_is_a_singleton() {
        let store = ObservationStore::new(SchemaShape::LegacyFlat);
        let session = store.session();
        let set = expand(
            &session,
            HierarchyKind::Feature,
            &["nowhere".to_string()],
            true,
            HierarchyDirection::Children,
        )
        .unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains("nowhere"));
    }

    #[test]
    fn parents_direction_walks_up() {
        let store = store_with_procedure_tree();
        let session = store.session();
        let set = expand(
            &session,
            HierarchyKind::Procedure,
            &["leaf-a1".to_string()],
            false,
            HierarchyDirection::Parents,
        )
        .unwrap();
        assert_eq!(
            set,
            ["root", "child-a"].iter().map(|s| s.to_string()).collect()
        );
    }
}
