//! The Space: a normalized, mutable graph of Things.
//!
//! Every identifiable Thing imprinted into a Space, directly or nested,
//! becomes one node keyed by its idkey. Nodes hold links to the nodes they
//! reference and a reference count of incoming links; a node with no
//! incoming links and no external holds is removed, cascading to children
//! that lose their last link. Non-identifiable sub-things are stored
//! inline in their parent node.
//!
//! [`Space::settle`] rebuilds changed nodes, computes the round's [`Diff`],
//! evaluates reactions and runs contextual derivations until nothing
//! changes.

mod node;

pub use node::NodeId;

use std::collections::{BTreeMap, BTreeSet};
use std::mem;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::derive::{self, Selector};
use crate::error::SpaceError;
use crate::limits::MAX_DEPTH;
use crate::model::{Equality, Field, Idkey, Thing, ThingBuilder, Value};
use crate::reaction::{self, Change, Diff, ReactionKey};
use crate::schema::{Schema, TypeDef};
use node::{MutField, MutValue, Node, collect_field_links, plain_field, same_field};

/// Tuning knobs for a [`Space`].
#[derive(Debug, Clone, Copy)]
pub struct SpaceConfig {
    /// Settle rounds allowed before reactions are considered divergent.
    pub max_settle_rounds: usize,
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self { max_settle_rounds: 16 }
    }
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// A mutable graph of Things, owned by a single coordinator.
pub struct Space {
    schema: Arc<Schema>,
    config: SpaceConfig,
    slots: Vec<Slot>,
    free: Vec<u32>,
    index: FxHashMap<Idkey, NodeId>,
    by_type: FxHashMap<String, BTreeSet<NodeId>>,
    changed: BTreeSet<NodeId>,
    orphans: Vec<NodeId>,
    /// Nodes created by the imprint in progress.
    created: Vec<NodeId>,
}

impl Space {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self::with_config(schema, SpaceConfig::default())
    }

    pub fn with_config(schema: Arc<Schema>, config: SpaceConfig) -> Self {
        Self {
            schema,
            config,
            slots: Vec::new(),
            free: Vec::new(),
            index: FxHashMap::default(),
            by_type: FxHashMap::default(),
            changed: BTreeSet::new(),
            orphans: Vec::new(),
            created: Vec::new(),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    /// Finds the node holding the entity with `thing`'s identity.
    pub fn lookup(&self, thing: &Thing) -> Option<NodeId> {
        self.index.get(&thing.idkey()).copied()
    }

    /// Live nodes of a type, in creation-slot order.
    pub fn live(&self, type_name: &str) -> Vec<NodeId> {
        self.by_type
            .get(type_name)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The nearest identifiable ancestor, or the node itself.
    pub fn root(&self, id: NodeId) -> Result<NodeId, SpaceError> {
        Ok(self.node(id)?.root)
    }

    /// Nodes this node links to, with multiplicity.
    pub fn links(&self, id: NodeId) -> Result<Vec<NodeId>, SpaceError> {
        Ok(self.node(id)?.links())
    }

    /// Number of links pointing at this node.
    pub fn link_count(&self, id: NodeId) -> Result<u32, SpaceError> {
        Ok(self.node(id)?.parents.values().sum())
    }

    /// The cached snapshot, if the node is built and unchanged since.
    pub fn get(&self, id: NodeId) -> Option<&Thing> {
        self.node(id).ok().and_then(|node| node.cached.as_ref())
    }

    /// Takes the snapshot evicted by the last change. Returns it once.
    pub fn previous(&mut self, id: NodeId) -> Option<Thing> {
        self.node_mut(id).ok().and_then(|node| node.previous.take())
    }

    // =========================================================================
    // ARENA
    // =========================================================================

    fn node(&self, id: NodeId) -> Result<&Node, SpaceError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
            .ok_or(SpaceError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, SpaceError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or(SpaceError::UnknownNode(id))
    }

    fn allocate(&mut self) -> NodeId {
        match self.free.pop() {
            Some(index) => NodeId {
                index,
                generation: self.slots[index as usize].generation,
            },
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: None,
                });
                NodeId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    fn create(&mut self, ty: Arc<TypeDef>, key: Idkey, parent_root: Option<NodeId>) -> NodeId {
        let id = self.allocate();
        let root = if ty.is_identifiable() {
            id
        } else {
            parent_root.unwrap_or(id)
        };
        debug!(type_name = ty.name(), ?id, "creating node");
        self.by_type.entry(ty.name().to_string()).or_default().insert(id);
        self.index.insert(key, id);
        self.slots[id.index as usize].node = Some(Node::new(ty, key, root));
        id
    }

    fn remove(&mut self, id: NodeId) -> Option<Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.index.remove(&node.key);
        if let Some(ids) = self.by_type.get_mut(node.ty.name()) {
            ids.remove(&id);
        }
        self.changed.remove(&id);
        debug!(type_name = node.ty.name(), ?id, "removed node");
        Some(node)
    }

    // =========================================================================
    // HOLDS AND LINKS
    // =========================================================================

    /// Adds an external hold that keeps the node alive.
    pub fn retain(&mut self, id: NodeId) -> Result<(), SpaceError> {
        self.node_mut(id)?.holds += 1;
        Ok(())
    }

    /// Drops an external hold. The node is removed when no holds and no
    /// links remain.
    pub fn release(&mut self, id: NodeId) -> Result<(), SpaceError> {
        let node = self.node_mut(id)?;
        node.holds = node.holds.saturating_sub(1);
        self.orphans.push(id);
        self.sweep();
        Ok(())
    }

    fn link(&mut self, parent: NodeId, child: NodeId) {
        if let Ok(node) = self.node_mut(child) {
            *node.parents.entry(parent).or_insert(0) += 1;
        }
    }

    fn unlink(&mut self, parent: NodeId, child: NodeId) {
        let Ok(node) = self.node_mut(child) else {
            return;
        };
        if let Some(count) = node.parents.get_mut(&parent) {
            *count -= 1;
            if *count == 0 {
                node.parents.remove(&parent);
            }
        }
        let orphaned = node.is_unreferenced(child);
        if orphaned {
            self.orphans.push(child);
        }
    }

    /// Removes unreferenced, unheld nodes queued by unlink/release.
    fn sweep(&mut self) {
        while let Some(id) = self.orphans.pop() {
            let removable = self
                .node(id)
                .is_ok_and(|node| node.holds == 0 && node.is_unreferenced(id));
            if !removable {
                continue;
            }
            let Some(node) = self.remove(id) else {
                continue;
            };
            for child in node.links() {
                if child != id {
                    self.unlink(id, child);
                }
            }
        }
    }

    // =========================================================================
    // IMPRINT
    // =========================================================================

    /// Merges a Thing and everything it references into the graph.
    ///
    /// Only declared fields are merged. Pure derived fields are skipped and
    /// recomputed on build.
    ///
    /// On failure, nodes created by this call are collected unless an
    /// existing node already links them.
    pub fn imprint(&mut self, thing: &Thing, parent_root: Option<NodeId>) -> Result<NodeId, SpaceError> {
        let result = self.imprint_at(thing, parent_root, 0);
        let created = mem::take(&mut self.created);
        if result.is_err() {
            self.orphans.extend(created);
        }
        self.sweep();
        result
    }

    fn imprint_at(&mut self, thing: &Thing, parent_root: Option<NodeId>, depth: usize) -> Result<NodeId, SpaceError> {
        if depth > MAX_DEPTH {
            return Err(SpaceError::DepthExceeded { max: MAX_DEPTH });
        }
        let ty = self
            .schema
            .type_def(thing.type_name())
            .cloned()
            .ok_or_else(|| SpaceError::UnknownType {
                name: thing.type_name().to_string(),
            })?;

        let key = thing.idkey();
        let id = match self.index.get(&key) {
            Some(&id) => id,
            None => {
                let id = self.create(ty.clone(), key, parent_root);
                self.created.push(id);
                self.mark_changed(id);
                id
            }
        };
        let root = self.node(id)?.root;

        for (idx, def) in ty.fields().iter().enumerate() {
            let Some(field) = thing.fields().get(idx) else {
                continue;
            };
            if field.is_absent() || def.is_pure_derived() {
                continue;
            }
            let incoming = if def.may_link() {
                self.convert_field(field, root, depth)?
            } else {
                plain_field(field)
            };
            self.merge_field(id, idx, incoming)?;
        }
        Ok(id)
    }

    fn convert_field(&mut self, field: &Field, root: NodeId, depth: usize) -> Result<MutField, SpaceError> {
        Ok(match field {
            Field::Absent => MutField::Absent,
            Field::Null => MutField::Null,
            Field::Value(value) => MutField::Value(self.convert_value(value, root, depth)?),
        })
    }

    fn convert_value(&mut self, value: &Value, root: NodeId, depth: usize) -> Result<MutValue, SpaceError> {
        if depth > MAX_DEPTH {
            return Err(SpaceError::DepthExceeded { max: MAX_DEPTH });
        }
        Ok(match value {
            Value::Thing(thing) if thing.type_def().is_identifiable() => {
                MutValue::Link(self.imprint_at(thing, Some(root), depth + 1)?)
            }
            Value::Thing(thing) if thing.type_def().may_contain_identifiable() => {
                let mut fields = Vec::with_capacity(thing.fields().len());
                for (def, field) in thing.type_def().fields().iter().zip(thing.fields()) {
                    if def.is_pure_derived() {
                        fields.push(MutField::Absent);
                    } else {
                        fields.push(self.convert_field(field, root, depth + 1)?);
                    }
                }
                MutValue::Record {
                    ty: thing.type_def().clone(),
                    fields,
                }
            }
            Value::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(match item {
                        Some(value) => Some(self.convert_value(value, root, depth + 1)?),
                        None => None,
                    });
                }
                MutValue::List(out)
            }
            Value::Map(entries) => {
                let mut out = BTreeMap::new();
                for (key, item) in entries {
                    let item = match item {
                        Some(value) => Some(self.convert_value(value, root, depth + 1)?),
                        None => None,
                    };
                    out.insert(key.clone(), item);
                }
                MutValue::Map(out)
            }
            other => MutValue::Plain(other.clone()),
        })
    }

    /// Replaces one field if the incoming value differs.
    fn merge_field(&mut self, id: NodeId, idx: usize, incoming: MutField) -> Result<(), SpaceError> {
        let node = self.node(id)?;
        let Some(current) = node.fields.get(idx) else {
            return Ok(());
        };
        if same_field(current, &incoming) {
            return Ok(());
        }
        trace!(type_name = node.ty.name(), field = node.ty.fields()[idx].name(), ?id, "merging field");

        let mut old_links = Vec::new();
        collect_field_links(current, &mut old_links);
        let mut new_links = Vec::new();
        collect_field_links(&incoming, &mut new_links);

        for child in old_links {
            self.unlink(id, child);
        }
        self.node_mut(id)?.fields[idx] = incoming;
        for child in new_links {
            self.link(id, child);
        }
        self.mark_changed(id);
        Ok(())
    }

    /// Marks a node changed and evicts its snapshot and those of every
    /// ancestor.
    pub fn invalidate(&mut self, id: NodeId) -> Result<(), SpaceError> {
        self.node(id)?;
        self.mark_changed(id);
        Ok(())
    }

    fn mark_changed(&mut self, id: NodeId) {
        let mut visited = FxHashSet::default();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Ok(node) = self.node_mut(current) else {
                continue;
            };
            node.evict();
            stack.extend(node.parents.keys().copied());
            self.changed.insert(current);
        }
    }

    // =========================================================================
    // BUILD
    // =========================================================================

    /// Returns the node's current snapshot, building it and any unbuilt
    /// descendants first.
    pub fn build(&mut self, id: NodeId) -> Result<Thing, SpaceError> {
        if let Some(cached) = &self.node(id)?.cached {
            return Ok(cached.clone());
        }
        for next in self.unbuilt_post_order(id)? {
            let thing = self.assemble(next)?;
            self.node_mut(next)?.cached = Some(thing);
        }
        let node = self.node(id)?;
        match &node.cached {
            Some(thing) => Ok(thing.clone()),
            None => self.assemble(id),
        }
    }

    /// Uncached nodes reachable from `id`, children before parents. Leaf
    /// types are not walked.
    fn unbuilt_post_order(&self, id: NodeId) -> Result<Vec<NodeId>, SpaceError> {
        let node = self.node(id)?;
        if !node.ty.may_contain_identifiable() {
            return Ok(vec![id]);
        }
        let mut order = Vec::new();
        let mut visited = FxHashSet::default();
        // (node, children pushed)
        let mut stack = vec![(id, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                order.push(current);
                continue;
            }
            if !visited.insert(current) {
                continue;
            }
            let node = self.node(current)?;
            if node.cached.is_some() {
                continue;
            }
            stack.push((current, true));
            for child in node.links() {
                if !visited.contains(&child) {
                    stack.push((child, false));
                }
            }
        }
        Ok(order)
    }

    /// Assembles a snapshot from the node's fields and its children's
    /// cached snapshots. Children without a snapshot (link cycles) are
    /// represented by their identifying fields.
    fn assemble(&self, id: NodeId) -> Result<Thing, SpaceError> {
        let node = self.node(id)?;
        self.assemble_fields(&node.ty, &node.fields)
    }

    fn assemble_fields(&self, ty: &Arc<TypeDef>, fields: &[MutField]) -> Result<Thing, SpaceError> {
        let mut builder = ThingBuilder::new(ty.clone());
        for (idx, field) in fields.iter().enumerate() {
            let out = match field {
                MutField::Absent => continue,
                MutField::Null => Field::Null,
                MutField::Value(value) => Field::Value(self.freeze(value)?),
            };
            builder.put(idx, out);
        }
        Ok(builder.build())
    }

    fn freeze(&self, value: &MutValue) -> Result<Value, SpaceError> {
        Ok(match value {
            MutValue::Plain(value) => value.clone(),
            MutValue::Link(child) => Value::Thing(self.snapshot(*child)?),
            MutValue::List(items) => Value::List(
                items
                    .iter()
                    .map(|item| item.as_ref().map(|v| self.freeze(v)).transpose())
                    .collect::<Result<_, _>>()?,
            ),
            MutValue::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, item)| Ok((k.clone(), item.as_ref().map(|v| self.freeze(v)).transpose()?)))
                    .collect::<Result<_, SpaceError>>()?,
            ),
            MutValue::Record { ty, fields } => Value::Thing(self.assemble_fields(ty, fields)?),
        })
    }

    fn snapshot_or_assemble(&self, id: NodeId) -> Option<Thing> {
        let node = self.node(id).ok()?;
        match &node.cached {
            Some(thing) => Some(thing.clone()),
            None => self.assemble(id).ok(),
        }
    }

    /// A child's cached snapshot, or a stand-in holding its identifying
    /// fields while the child is still being built.
    fn snapshot(&self, id: NodeId) -> Result<Thing, SpaceError> {
        let node = self.node(id)?;
        if let Some(cached) = &node.cached {
            return Ok(cached.clone());
        }
        let mut builder = ThingBuilder::new(node.ty.clone());
        for (idx, (def, field)) in node.ty.fields().iter().zip(&node.fields).enumerate() {
            if !def.is_identifying() {
                continue;
            }
            match field {
                MutField::Null => builder.put(idx, Field::Null),
                MutField::Value(MutValue::Plain(value)) => builder.put(idx, Field::Value(value.clone())),
                _ => {}
            }
        }
        Ok(builder.build())
    }

    // =========================================================================
    // SETTLE
    // =========================================================================

    /// Rebuilds changed nodes and runs reactions until the graph is stable.
    ///
    /// Returns every change observed, keeping each entity's earliest
    /// snapshot as `was`.
    pub fn settle(&mut self) -> Result<Diff, SpaceError> {
        let mut total = Diff::new();
        let mut rounds = 0;
        while !self.changed.is_empty() {
            if rounds == self.config.max_settle_rounds {
                return Err(SpaceError::Unsettled { rounds });
            }
            rounds += 1;

            let ids: Vec<NodeId> = mem::take(&mut self.changed).into_iter().collect();
            let mut diff = Diff::new();
            let mut changed = Vec::with_capacity(ids.len());
            for id in ids {
                let Ok(node) = self.node_mut(id) else {
                    continue;
                };
                let was = node.previous.take();
                let is = self.build(id)?;
                if was.as_ref().is_some_and(|was| was.equals(&is, Equality::State)) {
                    continue;
                }
                changed.push((id, was.clone(), is.clone()));
                diff.push(Change { was, is });
            }
            debug!(round = rounds, changes = diff.len(), "settling");

            let work = self.reaction_work(&changed, &diff)?;
            let mut results = Vec::with_capacity(work.len());
            for &(id, idx) in &work {
                let current = self.build(id)?;
                let view = SpaceView { space: self };
                if let Some(field) = derive::run_contextual(&current, idx, &diff, &view) {
                    results.push((id, idx, field));
                }
            }
            for (id, idx, field) in results {
                let root = self.node(id)?.root;
                let incoming = self.convert_field(&field, root, 0)?;
                self.merge_field(id, idx, incoming)?;
            }
            self.sweep();
            total.merge(diff);
        }
        Ok(total)
    }

    /// Contextual fields to recompute: reaction keys of each change plus
    /// contextual fields the node has never derived.
    fn reaction_work(
        &self,
        changed: &[(NodeId, Option<Thing>, Thing)],
        diff: &Diff,
    ) -> Result<BTreeSet<(NodeId, usize)>, SpaceError> {
        let mut work = BTreeSet::new();
        for (id, was, is) in changed {
            for key in reaction::reactions(was.as_ref(), is, diff) {
                match key {
                    ReactionKey::Own { type_name, field } => {
                        if type_name == is.type_name() {
                            if let Some(idx) = is.type_def().field_index(&field) {
                                work.insert((*id, idx));
                            }
                        }
                    }
                    ReactionKey::Broadcast { type_name, field } => {
                        let Some(idx) = self.schema.type_def(&type_name).and_then(|ty| ty.field_index(&field)) else {
                            continue;
                        };
                        for target in self.live(&type_name) {
                            work.insert((target, idx));
                        }
                    }
                }
            }
            let node = self.node(*id)?;
            for &idx in node.ty.contextual_fields() {
                if node.fields[idx].is_absent() {
                    work.insert((*id, idx));
                }
            }
        }
        Ok(work)
    }
}

/// Read-only selector over a Space's live nodes.
struct SpaceView<'a> {
    space: &'a Space,
}

impl Selector for SpaceView<'_> {
    fn find(&self, identity: &Thing) -> Option<Thing> {
        let id = self.space.lookup(identity)?;
        self.space.snapshot_or_assemble(id)
    }

    fn all_of(&self, type_name: &str) -> Vec<Thing> {
        self.space
            .live(type_name)
            .into_iter()
            .filter_map(|id| self.space.snapshot_or_assemble(id))
            .collect()
    }
}
