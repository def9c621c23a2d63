//! Introspection of a [`Schema`] answered in-process.
//!
//! The schema is rendered once into the JSON shape of the introspection
//! types; queries are answered by projecting their selections over it.
//! Nested type references carry `kind`, `name` and `ofType` only.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value as JsonValue, json};
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, SchemaError};
use crate::executor_client::ExecutorClient;
use crate::query::{ArgumentValue, Query, Selection};
use crate::schema::{FieldDef, InputValueDef, Schema, TypeDef, TypeKind, TypeRef};

pub const INTROSPECTION_QUERY: &str = r#"
query IntrospectionQuery {
  __schema {
    queryType { name }
    mutationType { name }
    subscriptionType { name }
    types { ...FullType }
    directives { name description locations args { ...InputValue } }
  }
}

fragment FullType on __Type {
  kind
  name
  description
  fields(includeDeprecated: true) {
    name
    description
    args { ...InputValue }
    type { ...TypeRef }
    isDeprecated
    deprecationReason
  }
  inputFields { ...InputValue }
  interfaces { ...TypeRef }
  enumValues(includeDeprecated: true) { name description isDeprecated deprecationReason }
  possibleTypes { ...TypeRef }
}

fragment InputValue on __InputValue {
  name
  description
  type { ...TypeRef }
  defaultValue
}

fragment TypeRef on __Type {
  kind
  name
  ofType {
    kind
    name
    ofType {
      kind
      name
      ofType {
        kind
        name
        ofType {
          kind
          name
          ofType {
            kind
            name
            ofType {
              kind
              name
              ofType { kind name }
            }
          }
        }
      }
    }
  }
}
"#;

/// The introspection types themselves.
pub const META_SDL: &str = r#"
type Query {
  __schema: __Schema!
  __type(name: String!): __Type
}

type __Schema {
  description: String
  types: [__Type!]!
  queryType: __Type!
  mutationType: __Type
  subscriptionType: __Type
  directives: [__Directive!]!
}

type __Type {
  kind: __TypeKind!
  name: String
  description: String
  specifiedByURL: String
  fields(includeDeprecated: Boolean = false): [__Field!]
  interfaces: [__Type!]
  possibleTypes: [__Type!]
  enumValues(includeDeprecated: Boolean = false): [__EnumValue!]
  inputFields(includeDeprecated: Boolean = false): [__InputValue!]
  ofType: __Type
}

type __Field {
  name: String!
  description: String
  args(includeDeprecated: Boolean = false): [__InputValue!]!
  type: __Type!
  isDeprecated: Boolean!
  deprecationReason: String
}

type __InputValue {
  name: String!
  description: String
  type: __Type!
  defaultValue: String
  isDeprecated: Boolean!
  deprecationReason: String
}

type __EnumValue {
  name: String!
  description: String
  isDeprecated: Boolean!
  deprecationReason: String
}

type __Directive {
  name: String!
  description: String
  locations: [__DirectiveLocation!]!
  args(includeDeprecated: Boolean = false): [__InputValue!]!
  isRepeatable: Boolean!
}

enum __TypeKind { SCALAR OBJECT INTERFACE UNION ENUM INPUT_OBJECT LIST NON_NULL }

enum __DirectiveLocation {
  QUERY MUTATION SUBSCRIPTION FIELD FRAGMENT_DEFINITION FRAGMENT_SPREAD INLINE_FRAGMENT
  VARIABLE_DEFINITION SCHEMA SCALAR OBJECT FIELD_DEFINITION ARGUMENT_DEFINITION INTERFACE
  UNION ENUM ENUM_VALUE INPUT_OBJECT INPUT_FIELD_DEFINITION
}
"#;

pub fn meta_schema() -> Result<Schema, SchemaError> {
    Schema::from_sdl(META_SDL)
}

/// Answers `__schema`, `__type` and `__typename` for one schema.
pub struct IntrospectionService {
    root: String,
    schema: JsonValue,
    types: HashMap<String, JsonValue>,
}

impl IntrospectionService {
    pub fn new(schema: &Schema) -> Self {
        let types: HashMap<String, JsonValue> = schema
            .types
            .values()
            .map(|ty| (ty.name.clone(), render_type(schema, ty)))
            .collect();
        let full = |name: Option<&str>| {
            name.and_then(|name| types.get(name))
                .cloned()
                .unwrap_or(JsonValue::Null)
        };

        let rendered = json!({
            "__typename": "__Schema",
            "description": null,
            "queryType": full(Some(schema.query_type.as_str())),
            "mutationType": full(schema.mutation_type.as_deref()),
            "subscriptionType": null,
            "types": schema.types.keys().map(|name| full(Some(name.as_str()))).collect::<Vec<_>>(),
            "directives": [
                condition_directive("skip", "Directs the executor to skip this field or fragment when the `if` argument is true."),
                condition_directive("include", "Directs the executor to include this field or fragment only when the `if` argument is true."),
            ],
        });

        IntrospectionService {
            root: schema.query_type.clone(),
            schema: rendered,
            types,
        }
    }

    /// Evaluates the root selections of `query`; unknown fields resolve to null.
    pub fn resolve(&self, query: &Query) -> JsonValue {
        let mut data = Map::new();
        let mut selections: Vec<&Selection> = query.selection_set.selections.iter().collect();
        let mut fragments: Vec<_> = query.selection_set.fragments.iter().collect();
        while let Some(fragment) = fragments.pop() {
            selections.extend(fragment.selection_set.selections.iter());
            fragments.extend(fragment.selection_set.fragments.iter());
        }

        for selection in selections {
            let value = match selection.name.as_str() {
                "__schema" => self.project(selection, &self.schema),
                "__type" => match selection.argument("name") {
                    Some(ArgumentValue::String(name)) => self
                        .types
                        .get(name)
                        .map(|ty| self.project(selection, ty))
                        .unwrap_or(JsonValue::Null),
                    _ => JsonValue::Null,
                },
                "__typename" => JsonValue::String(self.root.clone()),
                _ => JsonValue::Null,
            };
            data.insert(selection.response_key().to_string(), value);
        }
        JsonValue::Object(data)
    }

    fn project(&self, selection: &Selection, value: &JsonValue) -> JsonValue {
        match &selection.selection_set {
            Some(set) => set.project(value),
            None => value.clone(),
        }
    }
}

#[async_trait]
impl ExecutorClient for IntrospectionService {
    async fn execute(&self, _ctx: &CancellationToken, query: &Query) -> Result<Bytes, ClientError> {
        let response = json!({ "data": self.resolve(query) });
        Ok(Bytes::from(response.to_string()))
    }
}

fn condition_directive(name: &str, description: &str) -> JsonValue {
    json!({
        "__typename": "__Directive",
        "name": name,
        "description": description,
        "locations": ["FIELD", "FRAGMENT_SPREAD", "INLINE_FRAGMENT"],
        "args": [{
            "__typename": "__InputValue",
            "name": "if",
            "description": null,
            "type": {
                "__typename": "__Type",
                "kind": "NON_NULL",
                "name": null,
                "ofType": { "__typename": "__Type", "kind": "SCALAR", "name": "Boolean", "ofType": null },
            },
            "defaultValue": null,
            "isDeprecated": false,
            "deprecationReason": null,
        }],
        "isRepeatable": false,
    })
}

fn render_type(schema: &Schema, ty: &TypeDef) -> JsonValue {
    let named = |names: &BTreeSet<String>| {
        names
            .iter()
            .map(|name| render_ref(schema, &TypeRef::Named(name.clone())))
            .collect::<Vec<_>>()
    };
    let object_like = matches!(ty.kind, TypeKind::Object | TypeKind::Interface);

    json!({
        "__typename": "__Type",
        "kind": ty.kind,
        "name": ty.name,
        "description": ty.description,
        "specifiedByURL": null,
        "fields": object_like.then(|| {
            ty.fields.values().map(|field| render_field(schema, field)).collect::<Vec<_>>()
        }),
        "inputFields": (ty.kind == TypeKind::InputObject).then(|| {
            ty.input_fields.values().map(|input| render_input(schema, input)).collect::<Vec<_>>()
        }),
        "interfaces": object_like.then(|| named(&ty.interfaces)),
        "enumValues": (ty.kind == TypeKind::Enum).then(|| {
            ty.enum_values
                .iter()
                .map(|value| json!({
                    "__typename": "__EnumValue",
                    "name": value,
                    "description": null,
                    "isDeprecated": false,
                    "deprecationReason": null,
                }))
                .collect::<Vec<_>>()
        }),
        "possibleTypes": matches!(ty.kind, TypeKind::Interface | TypeKind::Union)
            .then(|| named(&ty.possible_types)),
        "ofType": null,
    })
}

fn render_field(schema: &Schema, field: &FieldDef) -> JsonValue {
    json!({
        "__typename": "__Field",
        "name": field.name,
        "description": field.description,
        "args": field.arguments.values().map(|input| render_input(schema, input)).collect::<Vec<_>>(),
        "type": render_ref(schema, &field.ty),
        "isDeprecated": false,
        "deprecationReason": null,
    })
}

fn render_input(schema: &Schema, input: &InputValueDef) -> JsonValue {
    json!({
        "__typename": "__InputValue",
        "name": input.name,
        "description": input.description,
        "type": render_ref(schema, &input.ty),
        "defaultValue": input.default_value,
        "isDeprecated": false,
        "deprecationReason": null,
    })
}

fn render_ref(schema: &Schema, ty: &TypeRef) -> JsonValue {
    match ty {
        TypeRef::Named(name) => json!({
            "__typename": "__Type",
            "kind": schema.get(name).map_or(TypeKind::Scalar, |ty| ty.kind),
            "name": name,
            "ofType": null,
        }),
        TypeRef::List(inner) => json!({
            "__typename": "__Type",
            "kind": TypeKind::List,
            "name": null,
            "ofType": render_ref(schema, inner),
        }),
        TypeRef::NonNull(inner) => json!({
            "__typename": "__Type",
            "kind": TypeKind::NonNull,
            "name": null,
            "ofType": render_ref(schema, inner),
        }),
    }
}
