use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::error::PlanningError;
use crate::flattener::{FlattenedIndex, Route};
use crate::query::{
    ArgumentValue, Fragment, OperationKind, Query, Selection, SelectionSet, json_to_argument,
};
use crate::schema::{FieldDef, Schema, TypeKind, TypeRef};
use crate::schema_registry::ComposedSchema;
use crate::{COORDINATOR_SERVICE, ENTITIES_FIELD, FEDERATION_KEY, FEDERATION_TYPENAME};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathStep {
    /// Descend into the field with this response key.
    Field(String),
    /// Keep only objects whose concrete type is this one.
    Type(String),
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathStep::Field(name) => f.write_str(name),
            PathStep::Type(name) => write!(f, "({name})"),
        }
    }
}

/// What a plan asks its service for.
#[derive(Clone, Debug, PartialEq)]
pub enum Fetch {
    /// Fields of the operation's root type.
    Root(OperationKind),
    /// Objects of `type_name` re-entered by the keys collected from the parent.
    Entities { type_name: String },
}

impl fmt::Display for Fetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fetch::Root(kind) => write!(f, "{kind}"),
            Fetch::Entities { type_name } => write!(f, "entities {type_name}"),
        }
    }
}

/// One sub-query and the plans that depend on its result.
#[derive(Clone, Debug, PartialEq)]
pub struct Plan {
    pub service: String,
    pub fetch: Fetch,
    pub selection_set: SelectionSet,
    /// Where in the parent's result this plan's answers are merged.
    pub path: Vec<PathStep>,
    pub after: Vec<Arc<Plan>>,
}

impl Plan {
    pub fn is_coordinator(&self) -> bool {
        self.service == COORDINATOR_SERVICE
    }

    /// The operation sent to the service, with `keys` bound for re-entry fetches.
    pub fn query(&self, keys: &[JsonValue]) -> Query {
        match &self.fetch {
            Fetch::Root(kind) => Query {
                kind: *kind,
                selection_set: self.selection_set.clone(),
            },
            Fetch::Entities { type_name } => {
                let entities = Selection {
                    arguments: vec![(
                        "keys".to_string(),
                        ArgumentValue::List(keys.iter().map(key_literal).collect()),
                    )],
                    selection_set: Some(self.selection_set.clone()),
                    ..Selection::field(type_name.clone())
                };
                let root = Selection {
                    selection_set: Some(SelectionSet {
                        selections: vec![entities],
                        fragments: Vec::new(),
                    }),
                    ..Selection::field(ENTITIES_FIELD)
                };
                Query {
                    kind: OperationKind::Query,
                    selection_set: SelectionSet {
                        selections: vec![root],
                        fragments: Vec::new(),
                    },
                }
            }
        }
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}{}: {}", "", self.service, self.fetch, indent = depth * 2)?;
        if !self.path.is_empty() {
            let path: Vec<String> = self.path.iter().map(ToString::to_string).collect();
            write!(f, " at {}", path.join("."))?;
        }
        writeln!(f, " {}", self.selection_set)?;
        for child in &self.after {
            child.write_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

// Numeric keys outside Int range travel as ID strings.
fn key_literal(key: &JsonValue) -> ArgumentValue {
    match key {
        JsonValue::Number(number)
            if number.as_i64().and_then(|n| i32::try_from(n).ok()).is_none() =>
        {
            ArgumentValue::String(number.to_string())
        }
        other => json_to_argument(other),
    }
}

/// Selections gathered for one object on one service.
struct Level {
    service: String,
    type_name: String,
    path: Vec<PathStep>,
    local: SelectionSet,
    /// service -> selections it must resolve on this object
    remote: BTreeMap<String, Vec<Selection>>,
    after: Vec<Arc<Plan>>,
    needs_typename: bool,
}

pub struct Planner {
    schema: Arc<ComposedSchema>,
    index: Arc<FlattenedIndex>,
}

impl Planner {
    pub fn new(schema: Arc<ComposedSchema>, index: Arc<FlattenedIndex>) -> Self {
        Planner { schema, index }
    }

    pub fn plan_root(&self, query: &Query) -> Result<Plan, PlanningError> {
        let schema = self.schema.schema();
        let root = schema
            .root_type(query.kind)
            .ok_or_else(|| PlanningError::MissingRootType(query.kind.to_string()))?
            .to_string();

        let mut selections = Vec::new();
        root_selections(&root, &query.selection_set, &mut selections)?;

        let mut typename = SelectionSet::default();
        let mut groups: BTreeMap<String, Vec<Selection>> = BTreeMap::new();
        for selection in selections {
            reserved_key(&selection)?;
            if selection.name == "__typename" {
                typename.selections.push(selection);
                continue;
            }
            let owner = self
                .index
                .owner(&root, &selection.name, COORDINATOR_SERVICE)
                .ok_or_else(|| unresolved(schema, &root, &selection.name))?;
            groups.entry(owner.to_string()).or_default().push(selection);
        }

        if query.kind == OperationKind::Mutation && groups.len() > 1 {
            return Err(PlanningError::MutationAcrossServices(
                groups.into_keys().collect(),
            ));
        }

        let mut children = Vec::with_capacity(groups.len());
        for (service, selections) in groups {
            let set = SelectionSet {
                selections,
                fragments: Vec::new(),
            };
            let (selection_set, after) =
                self.plan_selection_set(&service, &root, &set, Vec::new())?;
            children.push(Plan {
                service,
                fetch: Fetch::Root(query.kind),
                selection_set,
                path: Vec::new(),
                after,
            });
        }

        if typename.is_empty() && children.len() == 1 {
            if let Some(plan) = children.pop() {
                return Ok(plan);
            }
        }
        Ok(Plan {
            service: COORDINATOR_SERVICE.to_string(),
            fetch: Fetch::Root(query.kind),
            selection_set: typename,
            path: Vec::new(),
            after: children.into_iter().map(Arc::new).collect(),
        })
    }

    /// Plans `set` on an object of `type_name` held by `service`, returning the
    /// part `service` answers itself and the plans hanging below it.
    fn plan_selection_set(
        &self,
        service: &str,
        type_name: &str,
        set: &SelectionSet,
        path: Vec<PathStep>,
    ) -> Result<(SelectionSet, Vec<Arc<Plan>>), PlanningError> {
        let mut level = Level {
            service: service.to_string(),
            type_name: type_name.to_string(),
            path,
            local: SelectionSet::default(),
            remote: BTreeMap::new(),
            after: Vec::new(),
            needs_typename: false,
        };
        self.collect(&mut level, set)?;
        self.finish(level)
    }

    fn collect(&self, level: &mut Level, set: &SelectionSet) -> Result<(), PlanningError> {
        for selection in &set.selections {
            self.collect_field(level, selection)?;
        }
        for fragment in &set.fragments {
            self.collect_fragment(level, fragment)?;
        }
        Ok(())
    }

    fn collect_field(&self, level: &mut Level, selection: &Selection) -> Result<(), PlanningError> {
        reserved_key(selection)?;
        if selection.name == "__typename" {
            level.local.selections.push(selection.clone());
            return Ok(());
        }

        let schema = self.schema.schema();
        let type_name = level.type_name.clone();
        let current = level.service.clone();
        let field = schema
            .field(&type_name, &selection.name)
            .ok_or_else(|| PlanningError::UnknownField {
                type_name: type_name.clone(),
                field: selection.name.clone(),
            })?;
        let arguments = coerce_arguments(schema, &type_name, field, selection)?;

        let field_type = field.ty.named_type();
        if schema.get(field_type).is_none() {
            return Err(PlanningError::UnknownType(field_type.to_string()));
        }
        match (schema.is_composite(field_type), &selection.selection_set) {
            (true, None) => {
                return Err(PlanningError::MissingSelection {
                    type_name,
                    field: selection.name.clone(),
                    field_type: field.ty.to_string(),
                });
            }
            (false, Some(_)) => {
                return Err(PlanningError::UnexpectedSelection {
                    type_name,
                    field: selection.name.clone(),
                    field_type: field.ty.to_string(),
                });
            }
            _ => {}
        }

        let route = self
            .index
            .route(&type_name, &selection.name, &current)
            .ok_or_else(|| unresolved(schema, &type_name, &selection.name))?;
        match route {
            Route::Local => {
                let selection_set = match &selection.selection_set {
                    Some(set) => {
                        let mut path = level.path.clone();
                        path.push(PathStep::Field(selection.response_key().to_string()));
                        let (set, after) =
                            self.plan_selection_set(&current, field_type, set, path)?;
                        level.after.extend(after);
                        Some(set)
                    }
                    None => None,
                };
                level.local.selections.push(Selection {
                    name: selection.name.clone(),
                    alias: selection.alias.clone(),
                    arguments,
                    selection_set,
                });
            }
            Route::Remote { service, key } => {
                if key.is_none() {
                    return Err(PlanningError::UnresolvedKey {
                        type_name,
                        from: current.clone(),
                        to: service.to_string(),
                    });
                }
                level
                    .remote
                    .entry(service.to_string())
                    .or_default()
                    .push(Selection {
                        arguments,
                        ..selection.clone()
                    });
            }
        }
        Ok(())
    }

    fn collect_fragment(&self, level: &mut Level, fragment: &Fragment) -> Result<(), PlanningError> {
        let schema = self.schema.schema();
        let type_name = level.type_name.clone();
        let on = &fragment.on;
        if schema.get(on).is_none() {
            return Err(PlanningError::UnknownType(on.clone()));
        }
        let invalid = || PlanningError::InvalidFragment {
            on: on.clone(),
            within: type_name.clone(),
        };
        if *on == type_name {
            return self.collect(level, &fragment.selection_set);
        }

        let applies = schema.possible_types(on);
        if !schema.is_abstract(&type_name) {
            if applies.contains(type_name.as_str()) {
                return self.collect(level, &fragment.selection_set);
            }
            return Err(invalid());
        }

        let shared: Vec<String> = schema
            .possible_types(&type_name)
            .intersection(&applies)
            .map(|name| name.to_string())
            .collect();
        if shared.is_empty() {
            return Err(invalid());
        }
        for concrete in shared {
            let mut path = level.path.clone();
            path.push(PathStep::Type(concrete.clone()));
            let (selection_set, after) =
                self.plan_selection_set(&level.service, &concrete, &fragment.selection_set, path)?;
            if !after.is_empty() {
                level.needs_typename = true;
            }
            level.after.extend(after);
            level.local.fragments.push(Fragment {
                on: concrete,
                selection_set,
            });
        }
        Ok(())
    }

    fn finish(&self, mut level: Level) -> Result<(SelectionSet, Vec<Arc<Plan>>), PlanningError> {
        for (service, selections) in std::mem::take(&mut level.remote) {
            let key = self
                .index
                .key(&level.type_name, &level.service, &service)
                .ok_or_else(|| PlanningError::UnresolvedKey {
                    type_name: level.type_name.clone(),
                    from: level.service.clone(),
                    to: service.clone(),
                })?;
            if !level.local.contains_key(FEDERATION_KEY) {
                level
                    .local
                    .selections
                    .push(Selection::aliased(FEDERATION_KEY, key));
            }

            let set = SelectionSet {
                selections,
                fragments: Vec::new(),
            };
            let (selection_set, after) =
                self.plan_selection_set(&service, &level.type_name, &set, Vec::new())?;
            level.after.push(Arc::new(Plan {
                service,
                fetch: Fetch::Entities {
                    type_name: level.type_name.clone(),
                },
                selection_set,
                path: level.path.clone(),
                after,
            }));
        }

        if level.needs_typename && !level.local.contains_key(FEDERATION_TYPENAME) {
            level
                .local
                .selections
                .push(Selection::aliased(FEDERATION_TYPENAME, "__typename"));
        }
        Ok((level.local, level.after))
    }
}

fn reserved_key(selection: &Selection) -> Result<(), PlanningError> {
    if selection.response_key().starts_with(FEDERATION_KEY) {
        return Err(PlanningError::ReservedResponseKey(
            selection.response_key().to_string(),
        ));
    }
    Ok(())
}

fn root_selections(
    root: &str,
    set: &SelectionSet,
    out: &mut Vec<Selection>,
) -> Result<(), PlanningError> {
    out.extend(set.selections.iter().cloned());
    for fragment in &set.fragments {
        if fragment.on != root {
            return Err(PlanningError::InvalidFragment {
                on: fragment.on.clone(),
                within: root.to_string(),
            });
        }
        root_selections(root, &fragment.selection_set, out)?;
    }
    Ok(())
}

fn unresolved(schema: &Schema, type_name: &str, field: &str) -> PlanningError {
    if schema.field(type_name, field).is_some() {
        PlanningError::UnresolvedField {
            type_name: type_name.to_string(),
            field: field.to_string(),
        }
    } else {
        PlanningError::UnknownField {
            type_name: type_name.to_string(),
            field: field.to_string(),
        }
    }
}

fn coerce_arguments(
    schema: &Schema,
    type_name: &str,
    field: &FieldDef,
    selection: &Selection,
) -> Result<Vec<(String, ArgumentValue)>, PlanningError> {
    let mut arguments = Vec::with_capacity(selection.arguments.len());
    for (name, value) in &selection.arguments {
        let definition =
            field
                .arguments
                .get(name)
                .ok_or_else(|| PlanningError::UnknownArgument {
                    type_name: type_name.to_string(),
                    field: field.name.clone(),
                    argument: name.clone(),
                })?;
        let value = coerce(schema, &definition.ty, value).ok_or_else(|| {
            PlanningError::ArgumentMismatch {
                type_name: type_name.to_string(),
                field: field.name.clone(),
                argument: name.clone(),
                expected: definition.ty.to_string(),
            }
        })?;
        arguments.push((name.clone(), value));
    }

    for (name, definition) in &field.arguments {
        if definition.ty.is_non_null()
            && definition.default_value.is_none()
            && selection.argument(name).is_none()
        {
            return Err(PlanningError::MissingArgument {
                type_name: type_name.to_string(),
                field: field.name.clone(),
                argument: name.clone(),
            });
        }
    }
    Ok(arguments)
}

/// Checks `value` against an input type; enum values given as strings become enum literals.
fn coerce(schema: &Schema, ty: &TypeRef, value: &ArgumentValue) -> Option<ArgumentValue> {
    match (ty, value) {
        (TypeRef::NonNull(_), ArgumentValue::Null) => None,
        (TypeRef::NonNull(inner), value) => coerce(schema, inner, value),
        (_, ArgumentValue::Null) => Some(ArgumentValue::Null),
        (TypeRef::List(inner), ArgumentValue::List(items)) => items
            .iter()
            .map(|item| coerce(schema, inner, item))
            .collect::<Option<Vec<_>>>()
            .map(ArgumentValue::List),
        (TypeRef::List(inner), value) => coerce(schema, inner, value),
        (TypeRef::Named(name), value) => coerce_named(schema, name, value),
    }
}

fn coerce_named(schema: &Schema, name: &str, value: &ArgumentValue) -> Option<ArgumentValue> {
    let ty = schema.get(name)?;
    match (ty.kind, value) {
        (TypeKind::Scalar, value) => {
            let fits = match (name, value) {
                ("Int", ArgumentValue::Int(_)) => true,
                ("Float", ArgumentValue::Int(_) | ArgumentValue::Float(_)) => true,
                ("String", ArgumentValue::String(_)) => true,
                ("Boolean", ArgumentValue::Boolean(_)) => true,
                ("ID", ArgumentValue::String(_) | ArgumentValue::Int(_)) => true,
                ("Int" | "Float" | "String" | "Boolean" | "ID", _) => false,
                (_, ArgumentValue::Variable(_)) => false,
                _ => true,
            };
            fits.then(|| value.clone())
        }
        (TypeKind::Enum, ArgumentValue::Enum(variant) | ArgumentValue::String(variant)) => ty
            .enum_values
            .contains(variant)
            .then(|| ArgumentValue::Enum(variant.clone())),
        (TypeKind::InputObject, ArgumentValue::Object(fields)) => {
            let mut coerced = BTreeMap::new();
            for (field, value) in fields {
                let input = ty.input_fields.get(field)?;
                coerced.insert(field.clone(), coerce(schema, &input.ty, value)?);
            }
            let complete = ty.input_fields.values().all(|input| {
                !input.ty.is_non_null()
                    || input.default_value.is_some()
                    || coerced.contains_key(&input.name)
            });
            complete.then_some(ArgumentValue::Object(coerced))
        }
        _ => None,
    }
}
