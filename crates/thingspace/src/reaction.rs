//! Reactions: which contextual fields to recompute after a change.
//!
//! Triggers declared on contextual fields are compiled by the schema into
//! [`ReactionRule`]s attached to the type they observe. [`reactions`]
//! evaluates the rules of a changed Thing against its previous snapshot and
//! the round's [`Diff`].

use rustc_hash::FxHashMap;

use crate::model::{Equality, Field, Idkey, Thing, Value};

/// A field path relative to a type, one field name per step.
pub type Path = Vec<String>;

/// When a trigger fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// The value at `path` differs from the previous snapshot.
    Changed(Path),
    /// The value at `path` is declared and equal to the previous snapshot.
    Unchanged(Path),
    /// Some element previously held by `collection` changed at `path`
    /// within the same diff.
    ElementChanged { collection: Path, path: Path },
}

/// A reactive trigger on a contextual field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    source: Option<String>,
    condition: Condition,
}

impl Trigger {
    pub fn changed<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Condition::Changed(to_path(path)))
    }

    pub fn unchanged<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Condition::Unchanged(to_path(path)))
    }

    pub fn element_changed<I, S, J, T>(collection: I, path: J) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        J: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::new(Condition::ElementChanged {
            collection: to_path(collection),
            path: to_path(path),
        })
    }

    fn new(condition: Condition) -> Self {
        Self {
            source: None,
            condition,
        }
    }

    /// Observes another type; every live instance of the declaring type
    /// reacts when any instance of `type_name` matches.
    pub fn on(mut self, type_name: impl Into<String>) -> Self {
        self.source = Some(type_name.into());
        self
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }
}

fn to_path<I, S>(path: I) -> Path
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    path.into_iter().map(Into::into).collect()
}

/// Names a contextual field to recompute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReactionKey {
    /// Recompute `field` on the Thing that changed.
    Own { type_name: String, field: String },
    /// Recompute `field` on every live Thing of `type_name`.
    Broadcast { type_name: String, field: String },
}

/// A compiled trigger, stored on the observed type.
#[derive(Debug, Clone)]
pub struct ReactionRule {
    pub(crate) condition: Condition,
    pub(crate) key: ReactionKey,
}

impl ReactionRule {
    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn key(&self) -> &ReactionKey {
        &self.key
    }
}

// =============================================================================
// DIFF
// =============================================================================

/// One entity's transition within a settle round.
#[derive(Debug, Clone)]
pub struct Change {
    /// Snapshot before the round; `None` on first appearance.
    pub was: Option<Thing>,
    pub is: Thing,
}

/// The set of changes of one round, indexed by identity.
#[derive(Debug, Clone, Default)]
pub struct Diff {
    changes: Vec<Change>,
    index: FxHashMap<Idkey, usize>,
}

impl Diff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a change. A later change of the same entity keeps the
    /// earliest `was`.
    pub fn push(&mut self, change: Change) {
        let key = change.is.idkey();
        match self.index.get(&key) {
            Some(&pos) => {
                self.changes[pos].is = change.is;
            }
            None => {
                self.index.insert(key, self.changes.len());
                self.changes.push(change);
            }
        }
    }

    /// Folds another diff into this one.
    pub fn merge(&mut self, other: Diff) {
        for change in other.changes {
            self.push(change);
        }
    }

    /// Looks up the change of the entity with `thing`'s identity.
    pub fn find(&self, thing: &Thing) -> Option<&Change> {
        self.index.get(&thing.idkey()).map(|&pos| &self.changes[pos])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

// =============================================================================
// EVALUATION
// =============================================================================

/// Multiset of reaction keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reactions {
    keys: Vec<ReactionKey>,
}

impl Reactions {
    pub fn iter(&self) -> impl Iterator<Item = &ReactionKey> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of times `key` occurs.
    pub fn count(&self, key: &ReactionKey) -> usize {
        self.keys.iter().filter(|k| *k == key).count()
    }

    pub fn contains(&self, key: &ReactionKey) -> bool {
        self.keys.contains(key)
    }
}

impl IntoIterator for Reactions {
    type Item = ReactionKey;
    type IntoIter = std::vec::IntoIter<ReactionKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.into_iter()
    }
}

/// Evaluates the rules of `is`'s type against its previous snapshot.
pub fn reactions(was: Option<&Thing>, is: &Thing, diff: &Diff) -> Reactions {
    let mut keys = Vec::new();
    for rule in is.type_def().rules() {
        let fires = match &rule.condition {
            Condition::Changed(path) => path_changed(was, is, path),
            Condition::Unchanged(path) => resolve(is, path).is_some() && !path_changed(was, is, path),
            Condition::ElementChanged { collection, path } => element_changed(was, is, collection, path, diff),
        };
        if fires {
            keys.push(rule.key.clone());
        }
    }
    Reactions { keys }
}

/// Follows `path` through nested Things. `None` when a step is undeclared
/// or not a Thing.
fn resolve<'t>(thing: &'t Thing, path: &[String]) -> Option<&'t Field> {
    let (last, init) = path.split_last()?;
    let mut current = thing;
    for step in init {
        match current.field(step) {
            Field::Value(Value::Thing(next)) => current = next,
            _ => return None,
        }
    }
    let field = current.field(last);
    field.is_declared().then_some(field)
}

/// True if `is` declares `path` and `was` is missing, does not declare it,
/// or holds a different value there.
pub fn path_changed(was: Option<&Thing>, is: &Thing, path: &[String]) -> bool {
    let Some(now) = resolve(is, path) else {
        return false;
    };
    match was.and_then(|w| resolve(w, path)) {
        None => true,
        Some(before) => !before.equals(now, Equality::State),
    }
}

fn element_changed(was: Option<&Thing>, is: &Thing, collection: &[String], path: &[String], diff: &Diff) -> bool {
    if resolve(is, collection).is_none() {
        return false;
    }
    let Some(before) = was.and_then(|w| resolve(w, collection)) else {
        return true;
    };
    let elements: Vec<&Value> = match before.value() {
        Some(Value::List(items)) => items.iter().flatten().collect(),
        Some(Value::Map(entries)) => entries.values().flatten().collect(),
        _ => Vec::new(),
    };
    elements.into_iter().any(|element| match element {
        Value::Thing(thing) => diff
            .find(thing)
            .is_some_and(|change| path_changed(change.was.as_ref(), &change.is, path)),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    fn own(type_name: &str, field: &str) -> ReactionKey {
        ReactionKey::Own {
            type_name: type_name.to_string(),
            field: field.to_string(),
        }
    }

    #[test]
    fn test_type_broadcast_fires_on_change() {
        let schema = test_support::schema();
        let was = schema.builder_for("A").unwrap().set("id", "a").set_null("val").build();
        let is = was.builder().set("val", "x").build();
        let out = reactions(Some(&was), &is, &Diff::new());
        assert!(out.contains(&ReactionKey::Broadcast {
            type_name: "B".to_string(),
            field: "reactive_to_type_field".to_string(),
        }));

        let quiet = reactions(Some(&is), &is, &Diff::new());
        assert!(quiet.is_empty());
    }

    #[test]
    fn test_first_appearance_counts_as_change() {
        let schema = test_support::schema();
        let is = schema.builder_for("A").unwrap().set("id", "a").set("val", "x").build();
        assert_eq!(reactions(None, &is, &Diff::new()).len(), 1);

        let undeclared = schema.builder_for("A").unwrap().set("id", "a").build();
        assert!(reactions(None, &undeclared, &Diff::new()).is_empty());
    }

    #[test]
    fn test_own_and_unchanged_conditions() {
        let schema = test_support::schema();
        let was = schema
            .builder_for("Shelf")
            .unwrap()
            .set("id", "s")
            .set("title", "Old")
            .set("label", "fixed")
            .build();
        let is = was.builder().set("title", "New").build();
        let out = reactions(Some(&was), &is, &Diff::new());
        assert_eq!(out.count(&own("Shelf", "title_upper")), 1);
        assert_eq!(out.count(&own("Shelf", "label_seen")), 1);
    }

    #[test]
    fn test_element_changed_looks_up_diff() {
        let schema = test_support::schema();
        let old_book = schema.builder_for("Book").unwrap().set("isbn", "1").set("title", "A").build();
        let new_book = old_book.builder().set("title", "B").build();
        let shelf = schema
            .builder_for("Shelf")
            .unwrap()
            .set("id", "s")
            .set("books", Value::list([old_book.clone()]))
            .build();

        let mut diff = Diff::new();
        diff.push(Change {
            was: Some(old_book),
            is: new_book,
        });
        let out = reactions(Some(&shelf), &shelf, &diff);
        assert_eq!(out.count(&own("Shelf", "book_titles")), 1);

        let out = reactions(Some(&shelf), &shelf, &Diff::new());
        assert!(!out.contains(&own("Shelf", "book_titles")));
    }

    #[test]
    fn test_diff_keeps_earliest_was() {
        let schema = test_support::schema();
        let v1 = test_support::item(&schema, "1", Some("a"));
        let v2 = test_support::item(&schema, "1", Some("b"));
        let v3 = test_support::item(&schema, "1", Some("c"));
        let mut diff = Diff::new();
        diff.push(Change { was: Some(v1.clone()), is: v2.clone() });
        diff.push(Change { was: Some(v2), is: v3.clone() });
        assert_eq!(diff.len(), 1);
        let change = diff.find(&v1).unwrap();
        assert_eq!(change.was.as_ref(), Some(&v1));
        assert_eq!(change.is, v3);
    }
}
