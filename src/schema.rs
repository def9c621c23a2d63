use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use graphql_parser::schema as sdl;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::SchemaError;
use crate::query::{DisplayValue, OperationKind};

const BUILTIN_SCALARS: [&str; 5] = ["String", "Int", "Float", "Boolean", "ID"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
    List,
    NonNull,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeKind::Scalar => "scalar",
            TypeKind::Object => "object",
            TypeKind::Interface => "interface",
            TypeKind::Union => "union",
            TypeKind::Enum => "enum",
            TypeKind::InputObject => "input object",
            TypeKind::List => "list",
            TypeKind::NonNull => "non-null",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    /// The innermost named type.
    pub fn named_type(&self) -> &str {
        match self {
            TypeRef::Named(name) => name,
            TypeRef::List(inner) | TypeRef::NonNull(inner) => inner.named_type(),
        }
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, TypeRef::NonNull(_))
    }

    /// Whether the type is a list once non-null wrapping is removed.
    pub fn is_list(&self) -> bool {
        match self {
            TypeRef::List(_) => true,
            TypeRef::NonNull(inner) => inner.is_list(),
            TypeRef::Named(_) => false,
        }
    }

    fn rename(&mut self, renames: &BTreeMap<String, String>) {
        match self {
            TypeRef::Named(name) => {
                if let Some(renamed) = renames.get(name) {
                    *name = renamed.clone();
                }
            }
            TypeRef::List(inner) | TypeRef::NonNull(inner) => inner.rename(renames),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(name) => f.write_str(name),
            TypeRef::List(inner) => write!(f, "[{inner}]"),
            TypeRef::NonNull(inner) => write!(f, "{inner}!"),
        }
    }
}

impl<'a> From<&sdl::Type<'a, String>> for TypeRef {
    fn from(ty: &sdl::Type<'a, String>) -> Self {
        match ty {
            sdl::Type::NamedType(name) => TypeRef::Named(name.clone()),
            sdl::Type::ListType(inner) => TypeRef::List(Box::new((&**inner).into())),
            sdl::Type::NonNullType(inner) => TypeRef::NonNull(Box::new((&**inner).into())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputValueDef {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
    pub default_value: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub description: Option<String>,
    pub arguments: BTreeMap<String, InputValueDef>,
    pub ty: TypeRef,
}

impl FieldDef {
    /// Same result type and same argument names and types; descriptions are ignored.
    pub fn same_shape(&self, other: &FieldDef) -> bool {
        self.ty == other.ty
            && self.arguments.len() == other.arguments.len()
            && self.arguments.iter().all(|(name, argument)| {
                other
                    .arguments
                    .get(name)
                    .is_some_and(|other| other.ty == argument.ty)
            })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDef {
    pub name: String,
    pub kind: TypeKind,
    pub description: Option<String>,
    pub fields: BTreeMap<String, FieldDef>,
    pub interfaces: BTreeSet<String>,
    pub possible_types: BTreeSet<String>,
    pub enum_values: BTreeSet<String>,
    pub input_fields: BTreeMap<String, InputValueDef>,
}

impl TypeDef {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        TypeDef {
            name: name.into(),
            kind,
            description: None,
            fields: BTreeMap::new(),
            interfaces: BTreeSet::new(),
            possible_types: BTreeSet::new(),
            enum_values: BTreeSet::new(),
            input_fields: BTreeMap::new(),
        }
    }

    pub(crate) fn rename_refs(&mut self, renames: &BTreeMap<String, String>) {
        for field in self.fields.values_mut() {
            field.ty.rename(renames);
            for argument in field.arguments.values_mut() {
                argument.ty.rename(renames);
            }
        }
        for input in self.input_fields.values_mut() {
            input.ty.rename(renames);
        }
    }
}

/// The schema description of one service, or of the composed graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    pub query_type: String,
    pub mutation_type: Option<String>,
    pub types: BTreeMap<String, TypeDef>,
}

impl Schema {
    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    pub fn field(&self, type_name: &str, field: &str) -> Option<&FieldDef> {
        self.types.get(type_name)?.fields.get(field)
    }

    pub fn root_type(&self, kind: OperationKind) -> Option<&str> {
        match kind {
            OperationKind::Query => Some(&self.query_type),
            OperationKind::Mutation => self.mutation_type.as_deref(),
        }
    }

    pub fn is_composite(&self, name: &str) -> bool {
        self.types.get(name).is_some_and(|ty| {
            matches!(
                ty.kind,
                TypeKind::Object | TypeKind::Interface | TypeKind::Union
            )
        })
    }

    pub fn is_abstract(&self, name: &str) -> bool {
        self.types
            .get(name)
            .is_some_and(|ty| matches!(ty.kind, TypeKind::Interface | TypeKind::Union))
    }

    /// Concrete object types a value of type `name` can have.
    pub fn possible_types(&self, name: &str) -> BTreeSet<&str> {
        match self.types.get(name) {
            Some(ty) if ty.kind == TypeKind::Object => BTreeSet::from([ty.name.as_str()]),
            Some(ty) => ty.possible_types.iter().map(String::as_str).collect(),
            None => BTreeSet::new(),
        }
    }

    /// Registers every object as a possible type of the interfaces it implements.
    pub(crate) fn link_interfaces(&mut self) {
        let implementations: Vec<(String, String)> = self
            .types
            .values()
            .filter(|ty| ty.kind == TypeKind::Object)
            .flat_map(|ty| {
                ty.interfaces
                    .iter()
                    .map(move |interface| (interface.clone(), ty.name.clone()))
            })
            .collect();
        for (interface, object) in implementations {
            if let Some(interface) = self.types.get_mut(&interface) {
                interface.possible_types.insert(object);
            }
        }
    }

    /// Builds a schema from SDL. Without a `schema` definition the roots are
    /// `Query` and, when defined, `Mutation`.
    pub fn from_sdl(source: &str) -> Result<Self, SchemaError> {
        let document = sdl::parse_schema::<String>(source)?;

        let mut query_type = None;
        let mut mutation_type = None;
        let mut types = BTreeMap::new();
        let mut extensions = Vec::new();
        for definition in &document.definitions {
            match definition {
                sdl::Definition::SchemaDefinition(schema) => {
                    query_type = schema.query.clone();
                    mutation_type = schema.mutation.clone();
                }
                sdl::Definition::TypeDefinition(definition) => {
                    let ty = type_from_sdl(definition);
                    types.insert(ty.name.clone(), ty);
                }
                sdl::Definition::TypeExtension(extension) => extensions.push(extension),
                sdl::Definition::DirectiveDefinition(_) => {}
            }
        }

        let no_interfaces = Vec::new();
        for extension in extensions {
            let (name, fields, interfaces) = match extension {
                sdl::TypeExtension::Object(object) => {
                    (&object.name, &object.fields, &object.implements_interfaces)
                }
                sdl::TypeExtension::Interface(interface) => {
                    (&interface.name, &interface.fields, &no_interfaces)
                }
                sdl::TypeExtension::Scalar(ext) => return Err(unsupported(&ext.name)),
                sdl::TypeExtension::Union(ext) => return Err(unsupported(&ext.name)),
                sdl::TypeExtension::Enum(ext) => return Err(unsupported(&ext.name)),
                sdl::TypeExtension::InputObject(ext) => return Err(unsupported(&ext.name)),
            };
            let ty = types
                .get_mut(name)
                .ok_or_else(|| SchemaError::UndefinedExtension(name.clone()))?;
            ty.fields.extend(fields.iter().map(field_from_sdl));
            ty.interfaces.extend(interfaces.iter().cloned());
        }

        for scalar in BUILTIN_SCALARS {
            types
                .entry(scalar.to_string())
                .or_insert_with(|| TypeDef::new(scalar, TypeKind::Scalar));
        }

        let mutation_type =
            mutation_type.or_else(|| types.contains_key("Mutation").then(|| "Mutation".to_string()));
        let mut schema = Schema {
            query_type: query_type.unwrap_or_else(|| "Query".to_string()),
            mutation_type,
            types,
        };
        schema.link_interfaces();
        Ok(schema)
    }

    /// Decodes the `data` of a standard introspection query answer.
    pub fn from_introspection(data: JsonValue) -> Result<Self, SchemaError> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "__schema")]
            schema: Option<IntrospectionSchema>,
        }

        let Data { schema } = serde_json::from_value(data)?;
        let schema = schema.ok_or_else(|| {
            SchemaError::Introspection("response carries no __schema".to_string())
        })?;

        let mut types = BTreeMap::new();
        for ty in schema.types {
            let ty = ty.into_type_def()?;
            types.insert(ty.name.clone(), ty);
        }
        let mut schema = Schema {
            query_type: schema.query_type.name,
            mutation_type: schema.mutation_type.map(|ty| ty.name),
            types,
        };
        schema.link_interfaces();
        Ok(schema)
    }
}

fn unsupported(name: &str) -> SchemaError {
    SchemaError::UnsupportedExtension(name.to_string())
}

fn type_from_sdl(definition: &sdl::TypeDefinition<'_, String>) -> TypeDef {
    match definition {
        sdl::TypeDefinition::Scalar(scalar) => TypeDef {
            description: scalar.description.clone(),
            ..TypeDef::new(&scalar.name, TypeKind::Scalar)
        },
        sdl::TypeDefinition::Object(object) => TypeDef {
            description: object.description.clone(),
            fields: object.fields.iter().map(field_from_sdl).collect(),
            interfaces: object.implements_interfaces.iter().cloned().collect(),
            ..TypeDef::new(&object.name, TypeKind::Object)
        },
        sdl::TypeDefinition::Interface(interface) => TypeDef {
            description: interface.description.clone(),
            fields: interface.fields.iter().map(field_from_sdl).collect(),
            ..TypeDef::new(&interface.name, TypeKind::Interface)
        },
        sdl::TypeDefinition::Union(union) => TypeDef {
            description: union.description.clone(),
            possible_types: union.types.iter().cloned().collect(),
            ..TypeDef::new(&union.name, TypeKind::Union)
        },
        sdl::TypeDefinition::Enum(enumeration) => TypeDef {
            description: enumeration.description.clone(),
            enum_values: enumeration
                .values
                .iter()
                .map(|value| value.name.clone())
                .collect(),
            ..TypeDef::new(&enumeration.name, TypeKind::Enum)
        },
        sdl::TypeDefinition::InputObject(input) => TypeDef {
            description: input.description.clone(),
            input_fields: input.fields.iter().map(input_value_from_sdl).collect(),
            ..TypeDef::new(&input.name, TypeKind::InputObject)
        },
    }
}

fn field_from_sdl(field: &sdl::Field<'_, String>) -> (String, FieldDef) {
    (
        field.name.clone(),
        FieldDef {
            name: field.name.clone(),
            description: field.description.clone(),
            arguments: field.arguments.iter().map(input_value_from_sdl).collect(),
            ty: (&field.field_type).into(),
        },
    )
}

fn input_value_from_sdl(input: &sdl::InputValue<'_, String>) -> (String, InputValueDef) {
    (
        input.name.clone(),
        InputValueDef {
            name: input.name.clone(),
            description: input.description.clone(),
            ty: (&input.value_type).into(),
            default_value: input
                .default_value
                .as_ref()
                .map(|value| DisplayValue(value).to_string()),
        },
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionSchema {
    query_type: NamedRef,
    mutation_type: Option<NamedRef>,
    types: Vec<IntrospectionType>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionType {
    kind: TypeKind,
    name: String,
    description: Option<String>,
    fields: Option<Vec<IntrospectionField>>,
    input_fields: Option<Vec<IntrospectionInputValue>>,
    interfaces: Option<Vec<IntrospectionTypeRef>>,
    enum_values: Option<Vec<NamedRef>>,
    possible_types: Option<Vec<IntrospectionTypeRef>>,
}

#[derive(Debug, Deserialize)]
struct IntrospectionField {
    name: String,
    description: Option<String>,
    #[serde(default)]
    args: Vec<IntrospectionInputValue>,
    #[serde(rename = "type")]
    ty: IntrospectionTypeRef,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionInputValue {
    name: String,
    description: Option<String>,
    #[serde(rename = "type")]
    ty: IntrospectionTypeRef,
    default_value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionTypeRef {
    kind: TypeKind,
    name: Option<String>,
    of_type: Option<Box<IntrospectionTypeRef>>,
}

impl IntrospectionType {
    fn into_type_def(self) -> Result<TypeDef, SchemaError> {
        let name = self.name;
        let named = |refs: Option<Vec<IntrospectionTypeRef>>| -> Result<BTreeSet<String>, SchemaError> {
            refs.unwrap_or_default()
                .into_iter()
                .map(|r| r.name.ok_or_else(|| SchemaError::MalformedTypeRef(name.clone())))
                .collect()
        };
        let interfaces = named(self.interfaces)?;
        let possible_types = named(self.possible_types)?;

        let mut fields = BTreeMap::new();
        for field in self.fields.unwrap_or_default() {
            let context = format!("{name}.{}", field.name);
            let arguments = field
                .args
                .into_iter()
                .map(|argument| input_value(argument, &context))
                .collect::<Result<_, _>>()?;
            let definition = FieldDef {
                ty: field.ty.into_type_ref(&context)?,
                name: field.name.clone(),
                description: field.description,
                arguments,
            };
            fields.insert(field.name, definition);
        }

        let input_fields = self
            .input_fields
            .unwrap_or_default()
            .into_iter()
            .map(|input| input_value(input, &name))
            .collect::<Result<_, _>>()?;

        Ok(TypeDef {
            kind: self.kind,
            description: self.description,
            fields,
            interfaces,
            possible_types,
            enum_values: self
                .enum_values
                .unwrap_or_default()
                .into_iter()
                .map(|value| value.name)
                .collect(),
            input_fields,
            name,
        })
    }
}

fn input_value(
    input: IntrospectionInputValue,
    context: &str,
) -> Result<(String, InputValueDef), SchemaError> {
    let ty = input.ty.into_type_ref(&format!("{context}({})", input.name))?;
    Ok((
        input.name.clone(),
        InputValueDef {
            name: input.name,
            description: input.description,
            ty,
            default_value: input.default_value,
        },
    ))
}

impl IntrospectionTypeRef {
    fn into_type_ref(self, context: &str) -> Result<TypeRef, SchemaError> {
        let malformed = || SchemaError::MalformedTypeRef(context.to_string());
        match self.kind {
            TypeKind::List => Ok(TypeRef::List(Box::new(
                self.of_type.ok_or_else(malformed)?.into_type_ref(context)?,
            ))),
            TypeKind::NonNull => Ok(TypeRef::NonNull(Box::new(
                self.of_type.ok_or_else(malformed)?.into_type_ref(context)?,
            ))),
            _ => self.name.map(TypeRef::Named).ok_or_else(malformed),
        }
    }
}
