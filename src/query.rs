//! Normalized operation model.
//!
//! Operations are parsed with `graphql-parser`, then flattened into a small
//! owned tree: variables are substituted into argument literals, named
//! fragments are inlined and `@skip`/`@include` are evaluated. The planner
//! works on this tree and prints sub-queries back to GraphQL text.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use graphql_parser::query as ast;
use serde_json::{Map, Value as JsonValue};

use crate::error::QueryError;

/// A fully resolved argument literal.
pub type ArgumentValue = ast::Value<'static, String>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Mutation,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Query => f.write_str("query"),
            OperationKind::Mutation => f.write_str("mutation"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub kind: OperationKind,
    pub selection_set: SelectionSet,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectionSet {
    pub selections: Vec<Selection>,
    /// Type-conditioned fragments, applied on top of `selections`.
    pub fragments: Vec<Fragment>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    pub name: String,
    pub alias: Option<String>,
    pub arguments: Vec<(String, ArgumentValue)>,
    pub selection_set: Option<SelectionSet>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Fragment {
    pub on: String,
    pub selection_set: SelectionSet,
}

impl Query {
    /// Parses `source` and resolves the chosen operation against `variables`.
    pub fn parse(
        source: &str,
        variables: Option<&JsonValue>,
        operation_name: Option<&str>,
    ) -> Result<Self, QueryError> {
        let document = ast::parse_query::<String>(source)?;

        let mut operations = Vec::new();
        let mut fragments = HashMap::new();
        for definition in &document.definitions {
            match definition {
                ast::Definition::Operation(operation) => operations.push(operation),
                ast::Definition::Fragment(fragment) => {
                    fragments.insert(fragment.name.as_str(), fragment);
                }
            }
        }

        let operation = match operation_name {
            Some(name) => operations
                .into_iter()
                .find(|operation| operation_name_of(operation) == Some(name))
                .ok_or_else(|| QueryError::UnknownOperation(name.to_string()))?,
            None => match operations.as_slice() {
                [operation] => *operation,
                [] => return Err(QueryError::UnknownOperation("<anonymous>".to_string())),
                _ => return Err(QueryError::AmbiguousOperation),
            },
        };

        let (kind, definitions, selection_set): (_, &[ast::VariableDefinition<'_, String>], _) =
            match operation {
                ast::OperationDefinition::SelectionSet(set) => (OperationKind::Query, &[][..], set),
                ast::OperationDefinition::Query(query) => (
                    OperationKind::Query,
                    query.variable_definitions.as_slice(),
                    &query.selection_set,
                ),
                ast::OperationDefinition::Mutation(mutation) => (
                    OperationKind::Mutation,
                    mutation.variable_definitions.as_slice(),
                    &mutation.selection_set,
                ),
                ast::OperationDefinition::Subscription(_) => return Err(QueryError::Subscription),
            };

        let mut resolver = Resolver {
            variables: BTreeMap::new(),
            fragments,
        };
        for definition in definitions {
            let value = match variables.and_then(|values| values.get(&definition.name)) {
                Some(value) => json_to_argument(value),
                None => match &definition.default_value {
                    Some(default) => resolver.resolve(default)?,
                    None if matches!(definition.var_type, ast::Type::NonNullType(_)) => {
                        return Err(QueryError::MissingVariable(definition.name.clone()));
                    }
                    None => ArgumentValue::Null,
                },
            };
            resolver.variables.insert(definition.name.clone(), value);
        }

        let mut root = SelectionSet::default();
        resolver.convert(selection_set, &mut root, &mut Vec::new())?;

        Ok(Query {
            kind,
            selection_set: root,
        })
    }
}

fn operation_name_of<'o>(operation: &'o ast::OperationDefinition<'_, String>) -> Option<&'o str> {
    match operation {
        ast::OperationDefinition::SelectionSet(_) => None,
        ast::OperationDefinition::Query(query) => query.name.as_deref(),
        ast::OperationDefinition::Mutation(mutation) => mutation.name.as_deref(),
        ast::OperationDefinition::Subscription(subscription) => subscription.name.as_deref(),
    }
}

struct Resolver<'d, 'a> {
    variables: BTreeMap<String, ArgumentValue>,
    fragments: HashMap<&'d str, &'d ast::FragmentDefinition<'a, String>>,
}

impl<'a> Resolver<'_, 'a> {
    fn convert(
        &self,
        set: &ast::SelectionSet<'a, String>,
        out: &mut SelectionSet,
        spreads: &mut Vec<String>,
    ) -> Result<(), QueryError> {
        for item in &set.items {
            match item {
                ast::Selection::Field(field) => {
                    if !self.included(&field.directives)? {
                        continue;
                    }
                    let arguments = field
                        .arguments
                        .iter()
                        .map(|(name, value)| Ok((name.clone(), self.resolve(value)?)))
                        .collect::<Result<Vec<_>, QueryError>>()?;
                    let selection_set = if field.selection_set.items.is_empty() {
                        None
                    } else {
                        let mut inner = SelectionSet::default();
                        self.convert(&field.selection_set, &mut inner, spreads)?;
                        Some(inner)
                    };
                    out.selections.push(Selection {
                        name: field.name.clone(),
                        alias: field.alias.clone(),
                        arguments,
                        selection_set,
                    });
                }
                ast::Selection::FragmentSpread(spread) => {
                    if !self.included(&spread.directives)? {
                        continue;
                    }
                    let name = &spread.fragment_name;
                    let fragment = self
                        .fragments
                        .get(name.as_str())
                        .ok_or_else(|| QueryError::UnknownFragment(name.clone()))?;
                    if spreads.contains(name) {
                        return Err(QueryError::FragmentCycle(name.clone()));
                    }
                    spreads.push(name.clone());
                    let ast::TypeCondition::On(on) = &fragment.type_condition;
                    let mut inner = SelectionSet::default();
                    self.convert(&fragment.selection_set, &mut inner, spreads)?;
                    spreads.pop();
                    out.fragments.push(Fragment {
                        on: on.clone(),
                        selection_set: inner,
                    });
                }
                ast::Selection::InlineFragment(inline) => {
                    if !self.included(&inline.directives)? {
                        continue;
                    }
                    match &inline.type_condition {
                        Some(ast::TypeCondition::On(on)) => {
                            let mut inner = SelectionSet::default();
                            self.convert(&inline.selection_set, &mut inner, spreads)?;
                            out.fragments.push(Fragment {
                                on: on.clone(),
                                selection_set: inner,
                            });
                        }
                        None => self.convert(&inline.selection_set, out, spreads)?,
                    }
                }
            }
        }
        Ok(())
    }

    fn included(&self, directives: &[ast::Directive<'a, String>]) -> Result<bool, QueryError> {
        for directive in directives {
            let skip_when = match directive.name.as_str() {
                "skip" => true,
                "include" => false,
                _ => continue,
            };
            let condition = directive
                .arguments
                .iter()
                .find(|(name, _)| name == "if")
                .map(|(_, value)| self.resolve(value))
                .transpose()?;
            match condition {
                Some(ArgumentValue::Boolean(value)) if value == skip_when => return Ok(false),
                Some(ArgumentValue::Boolean(_)) => {}
                _ => return Err(QueryError::InvalidDirective(directive.name.clone())),
            }
        }
        Ok(true)
    }

    fn resolve(&self, value: &ast::Value<'a, String>) -> Result<ArgumentValue, QueryError> {
        Ok(match value {
            ast::Value::Variable(name) => self
                .variables
                .get(name)
                .cloned()
                .ok_or_else(|| QueryError::UndeclaredVariable(name.clone()))?,
            ast::Value::Int(number) => ArgumentValue::Int(number.clone()),
            ast::Value::Float(number) => ArgumentValue::Float(*number),
            ast::Value::String(string) => ArgumentValue::String(string.clone()),
            ast::Value::Boolean(boolean) => ArgumentValue::Boolean(*boolean),
            ast::Value::Null => ArgumentValue::Null,
            ast::Value::Enum(name) => ArgumentValue::Enum(name.clone()),
            ast::Value::List(items) => ArgumentValue::List(
                items
                    .iter()
                    .map(|item| self.resolve(item))
                    .collect::<Result<_, _>>()?,
            ),
            ast::Value::Object(fields) => ArgumentValue::Object(
                fields
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), self.resolve(value)?)))
                    .collect::<Result<_, QueryError>>()?,
            ),
        })
    }
}

/// Converts a JSON value (a variable or a correlation key) to a GraphQL literal.
pub fn json_to_argument(value: &JsonValue) -> ArgumentValue {
    match value {
        JsonValue::Null => ArgumentValue::Null,
        JsonValue::Bool(boolean) => ArgumentValue::Boolean(*boolean),
        JsonValue::Number(number) => match number.as_i64().and_then(|n| i32::try_from(n).ok()) {
            Some(int) => ArgumentValue::Int(int.into()),
            None => ArgumentValue::Float(number.as_f64().unwrap_or_default()),
        },
        JsonValue::String(string) => ArgumentValue::String(string.clone()),
        JsonValue::Array(items) => ArgumentValue::List(items.iter().map(json_to_argument).collect()),
        JsonValue::Object(fields) => ArgumentValue::Object(
            fields
                .iter()
                .map(|(name, value)| (name.clone(), json_to_argument(value)))
                .collect(),
        ),
    }
}

/// Converts a resolved literal back to JSON; enum values become strings.
pub fn argument_to_json(value: &ArgumentValue) -> JsonValue {
    match value {
        ArgumentValue::Variable(_) | ArgumentValue::Null => JsonValue::Null,
        ArgumentValue::Int(number) => number.as_i64().map(JsonValue::from).unwrap_or_default(),
        ArgumentValue::Float(number) => serde_json::Number::from_f64(*number)
            .map(JsonValue::Number)
            .unwrap_or_default(),
        ArgumentValue::String(string) | ArgumentValue::Enum(string) => {
            JsonValue::String(string.clone())
        }
        ArgumentValue::Boolean(boolean) => JsonValue::Bool(*boolean),
        ArgumentValue::List(items) => JsonValue::Array(items.iter().map(argument_to_json).collect()),
        ArgumentValue::Object(fields) => JsonValue::Object(
            fields
                .iter()
                .map(|(name, value)| (name.clone(), argument_to_json(value)))
                .collect(),
        ),
    }
}

impl Selection {
    pub fn field(name: impl Into<String>) -> Self {
        Selection {
            name: name.into(),
            alias: None,
            arguments: Vec::new(),
            selection_set: None,
        }
    }

    pub fn aliased(alias: impl Into<String>, name: impl Into<String>) -> Self {
        Selection {
            alias: Some(alias.into()),
            ..Selection::field(name)
        }
    }

    /// The key this selection occupies in a result object.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn argument(&self, name: &str) -> Option<&ArgumentValue> {
        self.arguments
            .iter()
            .find(|(argument, _)| argument == name)
            .map(|(_, value)| value)
    }
}

impl SelectionSet {
    pub fn is_empty(&self) -> bool {
        self.selections.is_empty() && self.fragments.is_empty()
    }

    /// Whether a selection answers under `response_key`.
    pub fn contains_key(&self, response_key: &str) -> bool {
        self.selections
            .iter()
            .any(|selection| selection.response_key() == response_key)
    }

    /// Evaluates the selection set over an in-memory JSON value.
    pub fn project(&self, value: &JsonValue) -> JsonValue {
        match value {
            JsonValue::Array(items) => {
                JsonValue::Array(items.iter().map(|item| self.project(item)).collect())
            }
            JsonValue::Object(object) => {
                let mut out = Map::new();
                self.project_into(object, &mut out);
                JsonValue::Object(out)
            }
            other => other.clone(),
        }
    }

    fn project_into(&self, object: &Map<String, JsonValue>, out: &mut Map<String, JsonValue>) {
        for selection in &self.selections {
            let value = match (object.get(&selection.name), &selection.selection_set) {
                (Some(value), Some(set)) => set.project(value),
                (Some(value), None) => value.clone(),
                (None, _) => JsonValue::Null,
            };
            out.insert(selection.response_key().to_string(), value);
        }

        let typename = object.get("__typename").and_then(JsonValue::as_str);
        for fragment in &self.fragments {
            if typename.is_none_or(|typename| typename == fragment.on) {
                fragment.selection_set.project_into(object, out);
            }
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.selection_set)
    }
}

impl fmt::Display for SelectionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for selection in &self.selections {
            write!(f, " {selection}")?;
        }
        for fragment in &self.fragments {
            write!(f, " ... on {} {}", fragment.on, fragment.selection_set)?;
        }
        f.write_str(" }")
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(alias) = &self.alias {
            write!(f, "{alias}: ")?;
        }
        f.write_str(&self.name)?;
        if !self.arguments.is_empty() {
            f.write_str("(")?;
            for (i, (name, value)) in self.arguments.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{name}: {}", DisplayValue(value))?;
            }
            f.write_str(")")?;
        }
        if let Some(set) = &self.selection_set {
            write!(f, " {set}")?;
        }
        Ok(())
    }
}

/// Prints a literal in GraphQL syntax.
pub(crate) struct DisplayValue<'v, 'a>(pub &'v ast::Value<'a, String>);

impl fmt::Display for DisplayValue<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            ast::Value::Variable(name) => write!(f, "${name}"),
            ast::Value::Int(number) => write!(f, "{}", number.as_i64().unwrap_or_default()),
            ast::Value::Float(number) => write!(f, "{number}"),
            // JSON string escapes are valid GraphQL string escapes.
            ast::Value::String(string) => write!(f, "{}", JsonValue::String(string.clone())),
            ast::Value::Boolean(boolean) => write!(f, "{boolean}"),
            ast::Value::Null => f.write_str("null"),
            ast::Value::Enum(name) => f.write_str(name),
            ast::Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", DisplayValue(item))?;
                }
                f.write_str("]")
            }
            ast::Value::Object(fields) => {
                f.write_str("{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {}", DisplayValue(value))?;
                }
                f.write_str("}")
            }
        }
    }
}
