//! Mutable node storage for the Space.

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::model::{Equality, Field, Idkey, Thing, Value};
use crate::schema::TypeDef;

/// Generation-checked handle to a node.
///
/// A handle goes stale once its node is removed; the slot may be reused
/// under a newer generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl NodeId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// A field value with identifiable sub-things replaced by links.
#[derive(Debug, Clone)]
pub(crate) enum MutValue {
    Plain(Value),
    Link(NodeId),
    List(Vec<Option<MutValue>>),
    Map(BTreeMap<String, Option<MutValue>>),
    /// A non-identifiable sub-thing that holds links.
    Record { ty: Arc<TypeDef>, fields: Vec<MutField> },
}

#[derive(Debug, Clone, Default)]
pub(crate) enum MutField {
    #[default]
    Absent,
    Null,
    Value(MutValue),
}

impl MutField {
    pub(crate) fn is_absent(&self) -> bool {
        matches!(self, MutField::Absent)
    }
}

pub(crate) struct Node {
    pub(crate) ty: Arc<TypeDef>,
    pub(crate) key: Idkey,
    pub(crate) root: NodeId,
    pub(crate) fields: Vec<MutField>,
    /// Incoming links, counted per parent.
    pub(crate) parents: FxHashMap<NodeId, u32>,
    pub(crate) holds: u32,
    pub(crate) cached: Option<Thing>,
    pub(crate) previous: Option<Thing>,
}

impl Node {
    pub(crate) fn new(ty: Arc<TypeDef>, key: Idkey, root: NodeId) -> Self {
        let len = ty.fields().len();
        Self {
            ty,
            key,
            root,
            fields: vec![MutField::Absent; len],
            parents: FxHashMap::default(),
            holds: 0,
            cached: None,
            previous: None,
        }
    }

    /// True if nothing but the node itself links to it.
    pub(crate) fn is_unreferenced(&self, own: NodeId) -> bool {
        self.parents.keys().all(|&parent| parent == own)
    }

    /// Evicts the cached snapshot. The oldest unconsumed eviction is kept.
    pub(crate) fn evict(&mut self) {
        if let Some(snapshot) = self.cached.take() {
            if self.previous.is_none() {
                self.previous = Some(snapshot);
            }
        }
    }

    /// Every link held by this node, with multiplicity.
    pub(crate) fn links(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        for field in &self.fields {
            collect_field_links(field, &mut out);
        }
        out
    }
}

pub(crate) fn collect_field_links(field: &MutField, out: &mut Vec<NodeId>) {
    if let MutField::Value(value) = field {
        collect_links(value, out);
    }
}

fn collect_links(value: &MutValue, out: &mut Vec<NodeId>) {
    match value {
        MutValue::Plain(_) => {}
        MutValue::Link(id) => out.push(*id),
        MutValue::List(items) => {
            for item in items.iter().flatten() {
                collect_links(item, out);
            }
        }
        MutValue::Map(entries) => {
            for item in entries.values().flatten() {
                collect_links(item, out);
            }
        }
        MutValue::Record { fields, .. } => {
            for field in fields {
                collect_field_links(field, out);
            }
        }
    }
}

/// Deep comparison used to decide whether a merge changes a node.
pub(crate) fn same_field(a: &MutField, b: &MutField) -> bool {
    match (a, b) {
        (MutField::Absent, MutField::Absent) | (MutField::Null, MutField::Null) => true,
        (MutField::Value(a), MutField::Value(b)) => same_value(a, b),
        _ => false,
    }
}

fn same_value(a: &MutValue, b: &MutValue) -> bool {
    match (a, b) {
        (MutValue::Plain(a), MutValue::Plain(b)) => a.equals(b, Equality::State),
        (MutValue::Link(a), MutValue::Link(b)) => a == b,
        (MutValue::List(a), MutValue::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(a, b)| same_item(a.as_ref(), b.as_ref()))
        }
        (MutValue::Map(a), MutValue::Map(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b)
                    .all(|((ka, a), (kb, b))| ka == kb && same_item(a.as_ref(), b.as_ref()))
        }
        (MutValue::Record { ty: ta, fields: fa }, MutValue::Record { ty: tb, fields: fb }) => {
            ta.name() == tb.name() && fa.len() == fb.len() && fa.iter().zip(fb).all(|(a, b)| same_field(a, b))
        }
        _ => false,
    }
}

fn same_item(a: Option<&MutValue>, b: Option<&MutValue>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => same_value(a, b),
        _ => false,
    }
}

/// Converts a frozen field of a kind that cannot link.
pub(crate) fn plain_field(field: &Field) -> MutField {
    match field {
        Field::Absent => MutField::Absent,
        Field::Null => MutField::Null,
        Field::Value(value) => MutField::Value(MutValue::Plain(value.clone())),
    }
}
