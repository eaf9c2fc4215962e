//! Schema validation and static analysis.
//!
//! Runs once per schema: checks references, orders derivations, computes
//! dangerous/identifiable reachability and compiles reaction triggers into
//! per-source-type rules.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::SchemaError;
use crate::reaction::{Condition, ReactionKey, ReactionRule};

use super::{EnumDef, FieldKind, OpenDef, TypeBuilder, TypeDef};

pub(super) fn finalize(
    types: Vec<TypeBuilder>,
    enums: Vec<EnumDef>,
    opens: Vec<OpenDef>,
) -> Result<(Vec<TypeDef>, Vec<EnumDef>, Vec<OpenDef>), SchemaError> {
    check_names(&types, &enums, &opens)?;
    for e in &enums {
        check_enum(e)?;
    }

    let names: Vec<String> = types.iter().map(|t| t.name.clone()).collect();
    let type_names: FxHashSet<&str> = names.iter().map(String::as_str).collect();
    for open in &opens {
        for member in &open.members {
            if !type_names.contains(member.as_str()) {
                return Err(SchemaError::UnknownType {
                    name: member.clone(),
                });
            }
        }
    }

    let enum_names: FxHashSet<&str> = enums.iter().map(|e| e.name.as_str()).collect();
    let open_map: FxHashMap<String, OpenDef> =
        opens.iter().map(|o| (o.name.clone(), o.clone())).collect();

    let mut defs = Vec::with_capacity(types.len());
    for builder in types {
        defs.push(finalize_type(builder, &type_names, &enum_names, &open_map)?);
    }

    // Reachability needs every type's fields; index by name first.
    let by_name: FxHashMap<String, usize> = defs
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.clone(), i))
        .collect();
    let graph = TypeGraph::new(&defs, &by_name, &open_map);

    let dangerous: Vec<bool> = (0..defs.len())
        .map(|i| graph.reaches(i, |t| t.fields.iter().any(|f| f.dangerous), true))
        .collect();
    let contains_identifiable: Vec<bool> = (0..defs.len())
        .map(|i| graph.reaches(i, |t| t.identifiable, false))
        .collect();

    let mut field_flags = Vec::with_capacity(defs.len());
    for ty in &defs {
        let flags: Vec<(bool, bool)> = ty
            .fields
            .iter()
            .map(|f| {
                let targets = graph.kind_targets(&f.kind);
                let reaches_dangerous = f.dangerous || targets.iter().any(|&t| dangerous[t]);
                let may_link = targets
                    .iter()
                    .any(|&t| defs[t].identifiable || contains_identifiable[t]);
                (reaches_dangerous, may_link)
            })
            .collect();
        field_flags.push(flags);
    }

    let mut rules = compile_rules(&defs, &by_name)?;

    for (i, ty) in defs.iter_mut().enumerate() {
        ty.dangerous_capable = dangerous[i];
        ty.may_contain_identifiable = contains_identifiable[i];
        for (field, (reaches_dangerous, may_link)) in ty.fields.iter_mut().zip(&field_flags[i]) {
            field.reaches_dangerous = *reaches_dangerous;
            field.may_link = *may_link;
        }
        ty.rules = rules.remove(&ty.name).unwrap_or_default();
    }

    Ok((defs, enums, opens))
}

fn check_names(types: &[TypeBuilder], enums: &[EnumDef], opens: &[OpenDef]) -> Result<(), SchemaError> {
    let mut seen = FxHashSet::default();
    let names = types
        .iter()
        .map(|t| &t.name)
        .chain(enums.iter().map(|e| &e.name))
        .chain(opens.iter().map(|o| &o.name));
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(SchemaError::DuplicateName { name: name.clone() });
        }
    }
    Ok(())
}

fn check_enum(e: &EnumDef) -> Result<(), SchemaError> {
    let mut ids = FxHashSet::default();
    for (id, _) in &e.values {
        if *id == 0 || !ids.insert(*id) {
            return Err(SchemaError::InvalidEnumId {
                enum_name: e.name.clone(),
                id: *id,
            });
        }
    }
    Ok(())
}

fn check_kind(
    kind: &FieldKind,
    types: &FxHashSet<&str>,
    enums: &FxHashSet<&str>,
    opens: &FxHashMap<String, OpenDef>,
) -> Result<(), SchemaError> {
    match kind {
        FieldKind::Enum(name) if !enums.contains(name.as_str()) => {
            Err(SchemaError::UnknownEnum { name: name.clone() })
        }
        FieldKind::Thing(name) if !types.contains(name.as_str()) => {
            Err(SchemaError::UnknownType { name: name.clone() })
        }
        FieldKind::Open(name) if !opens.contains_key(name) => {
            Err(SchemaError::UnknownOpenType { name: name.clone() })
        }
        FieldKind::List(element) | FieldKind::Map(element) => check_kind(element, types, enums, opens),
        _ => Ok(()),
    }
}

fn finalize_type(
    builder: TypeBuilder,
    type_names: &FxHashSet<&str>,
    enum_names: &FxHashSet<&str>,
    opens: &FxHashMap<String, OpenDef>,
) -> Result<TypeDef, SchemaError> {
    let TypeBuilder { name, kind, mut fields } = builder;

    let mut index = FxHashMap::default();
    let mut compat_ids = FxHashSet::default();
    for (i, field) in fields.iter().enumerate() {
        if index.insert(field.name.clone(), i).is_some() {
            return Err(SchemaError::DuplicateField {
                type_name: name.clone(),
                field: field.name.clone(),
            });
        }
        if !compat_ids.insert(field.compat_id) {
            return Err(SchemaError::DuplicateCompatId {
                type_name: name.clone(),
                compat_id: field.compat_id,
            });
        }
        check_kind(&field.kind, type_names, enum_names, opens)?;
    }

    for field in &fields {
        if let Some(derivation) = &field.derivation {
            for input in derivation.inputs() {
                if !index.contains_key(input.as_str()) {
                    return Err(SchemaError::UnknownField {
                        type_name: name.clone(),
                        field: input.clone(),
                    });
                }
            }
        }
        if !field.triggers.is_empty() && !field.is_contextual() {
            return Err(SchemaError::NotContextual {
                type_name: name.clone(),
                field: field.name.clone(),
            });
        }
    }

    let derive_order = derive_order(&name, &fields, &index)?;

    for field in fields.iter_mut() {
        let self_referencing = field
            .derivation
            .as_ref()
            .is_some_and(|d| d.inputs().iter().any(|input| *input == field.name));
        field.on_wire = !field.is_pure_derived() || field.identifying || self_referencing;
    }

    let mut wire_order: Vec<usize> = (0..fields.len()).filter(|&i| fields[i].on_wire).collect();
    wire_order.sort_by_key(|&i| fields[i].compat_id);

    let contextual = (0..fields.len()).filter(|&i| fields[i].is_contextual()).collect();
    let identifiable = fields.iter().any(|f| f.identifying);

    Ok(TypeDef {
        name,
        kind,
        fields,
        index,
        wire_order,
        derive_order,
        contextual,
        rules: Vec::new(),
        identifiable,
        dangerous_capable: false,
        may_contain_identifiable: false,
    })
}

/// Topologically orders pure derivations. A derivation reading its own field
/// sees the prior value; any other cycle is an error.
fn derive_order(
    type_name: &str,
    fields: &[super::FieldDef],
    index: &FxHashMap<String, usize>,
) -> Result<Vec<usize>, SchemaError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    fn visit(
        i: usize,
        fields: &[super::FieldDef],
        index: &FxHashMap<String, usize>,
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) -> Result<(), Vec<usize>> {
        match marks[i] {
            Mark::Done => return Ok(()),
            Mark::Active => {
                let start = stack.iter().position(|&s| s == i).unwrap_or(0);
                return Err(stack[start..].to_vec());
            }
            Mark::New => {}
        }
        marks[i] = Mark::Active;
        stack.push(i);
        if let Some(derivation) = fields[i].derivation.as_ref().filter(|d| d.is_pure()) {
            for input in derivation.inputs() {
                let Some(&dep) = index.get(input.as_str()) else {
                    continue;
                };
                if dep != i {
                    visit(dep, fields, index, marks, stack, order)?;
                }
            }
            order.push(i);
        }
        stack.pop();
        marks[i] = Mark::Done;
        Ok(())
    }

    let mut marks = vec![Mark::New; fields.len()];
    let mut order = Vec::new();
    let mut stack = Vec::new();
    for i in 0..fields.len() {
        visit(i, fields, index, &mut marks, &mut stack, &mut order).map_err(|cycle| {
            SchemaError::DerivationCycle {
                type_name: type_name.to_string(),
                fields: cycle.iter().map(|&c| fields[c].name.clone()).collect(),
            }
        })?;
    }
    Ok(order)
}

/// Type-to-type reference graph through Thing and open-type fields.
struct TypeGraph<'a> {
    defs: &'a [TypeDef],
    by_name: &'a FxHashMap<String, usize>,
    opens: &'a FxHashMap<String, OpenDef>,
}

impl<'a> TypeGraph<'a> {
    fn new(defs: &'a [TypeDef], by_name: &'a FxHashMap<String, usize>, opens: &'a FxHashMap<String, OpenDef>) -> Self {
        Self { defs, by_name, opens }
    }

    fn kind_targets(&self, kind: &FieldKind) -> Vec<usize> {
        let mut names = Vec::new();
        kind.referenced_types(self.opens, &mut names);
        names.iter().filter_map(|n| self.by_name.get(*n).copied()).collect()
    }

    /// Returns true if a type satisfying `pred` is reachable from `start`.
    /// With `include_start`, `start` itself counts without following a field.
    fn reaches(&self, start: usize, pred: impl Fn(&TypeDef) -> bool, include_start: bool) -> bool {
        let mut checked = FxHashSet::default();
        let mut stack = Vec::new();
        if include_start {
            stack.push(start);
        } else {
            for f in &self.defs[start].fields {
                stack.extend(self.kind_targets(&f.kind));
            }
        }
        while let Some(t) = stack.pop() {
            if !checked.insert(t) {
                continue;
            }
            let ty = &self.defs[t];
            if pred(ty) {
                return true;
            }
            for f in &ty.fields {
                stack.extend(self.kind_targets(&f.kind));
            }
        }
        false
    }
}

/// Compiles every trigger into a rule on its source type.
fn compile_rules(
    defs: &[TypeDef],
    by_name: &FxHashMap<String, usize>,
) -> Result<FxHashMap<String, Vec<ReactionRule>>, SchemaError> {
    let mut rules: FxHashMap<String, Vec<ReactionRule>> = FxHashMap::default();
    for target in defs {
        for field in &target.fields {
            for trigger in &field.triggers {
                let source_name = trigger.source().unwrap_or(target.name.as_str());
                let source = by_name
                    .get(source_name)
                    .map(|&i| &defs[i])
                    .ok_or_else(|| SchemaError::UnknownType {
                        name: source_name.to_string(),
                    })?;

                let invalid = |path: &[String]| SchemaError::InvalidTriggerPath {
                    type_name: target.name.clone(),
                    field: field.name.clone(),
                    path: path.to_vec(),
                };
                match trigger.condition() {
                    Condition::Changed(path) | Condition::Unchanged(path) => {
                        resolve_path(source, path, defs, by_name).ok_or_else(|| invalid(path))?;
                    }
                    Condition::ElementChanged { collection, path } => {
                        let kind = resolve_path(source, collection, defs, by_name)
                            .ok_or_else(|| invalid(collection))?;
                        let element = match kind {
                            FieldKind::List(element) | FieldKind::Map(element) => element,
                            _ => return Err(invalid(collection)),
                        };
                        let FieldKind::Thing(element_type) = element.as_ref() else {
                            return Err(invalid(collection));
                        };
                        let element_def = by_name
                            .get(element_type)
                            .map(|&i| &defs[i])
                            .ok_or_else(|| invalid(collection))?;
                        resolve_path(element_def, path, defs, by_name).ok_or_else(|| invalid(path))?;
                    }
                }

                let key = if trigger.source().is_some() {
                    ReactionKey::Broadcast {
                        type_name: target.name.clone(),
                        field: field.name.clone(),
                    }
                } else {
                    ReactionKey::Own {
                        type_name: target.name.clone(),
                        field: field.name.clone(),
                    }
                };
                rules.entry(source.name.clone()).or_default().push(ReactionRule {
                    condition: trigger.condition().clone(),
                    key,
                });
            }
        }
    }
    Ok(rules)
}

/// Follows a dotted field path through nested Thing fields.
fn resolve_path<'a>(
    start: &'a TypeDef,
    path: &[String],
    defs: &'a [TypeDef],
    by_name: &FxHashMap<String, usize>,
) -> Option<&'a FieldKind> {
    let (last, init) = path.split_last()?;
    let mut current = start;
    for step in init {
        let field = current.field(step)?;
        let FieldKind::Thing(next) = &field.kind else {
            return None;
        };
        current = by_name.get(next).map(|&i| &defs[i])?;
    }
    current.field(last).map(|f| &f.kind)
}
