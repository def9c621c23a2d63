use std::collections::{BTreeMap, BTreeSet, btree_map::Entry};

use tracing::debug;

use crate::error::CompositionError;
use crate::schema::{Schema, TypeDef, TypeKind};
use crate::{ENTITIES_FIELD, INTROSPECTION_SERVICE};

/// The union of all services' schemas, annotated with field ownership.
#[derive(Clone, Debug)]
pub struct ComposedSchema {
    schema: Schema,
    /// type -> field -> services declaring it
    owners: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
    /// type -> services declaring it
    declared_by: BTreeMap<String, BTreeSet<String>>,
    /// type -> services that can resolve it by key
    entry_points: BTreeMap<String, BTreeSet<String>>,
}

impl ComposedSchema {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn owners(&self, type_name: &str, field: &str) -> Option<&BTreeSet<String>> {
        self.owners.get(type_name)?.get(field)
    }

    pub fn field_owners(&self, type_name: &str) -> Option<&BTreeMap<String, BTreeSet<String>>> {
        self.owners.get(type_name)
    }

    pub fn declared_by(&self, type_name: &str) -> Option<&BTreeSet<String>> {
        self.declared_by.get(type_name)
    }

    pub fn can_reenter(&self, type_name: &str, service: &str) -> bool {
        self.entry_points
            .get(type_name)
            .is_some_and(|services| services.contains(service))
    }

    /// The schema as presented to clients: meta fields such as `__schema` are hidden.
    pub fn client_schema(&self) -> Schema {
        let mut schema = self.schema.clone();
        for ty in schema.types.values_mut() {
            ty.fields.retain(|name, _| !name.starts_with("__"));
        }
        schema
    }
}

/// One service's schema with roots renamed and federation plumbing removed.
struct ServiceTypes {
    types: Vec<TypeDef>,
    entry_points: BTreeSet<String>,
}

fn normalize(service: &str, schema: Schema) -> Result<ServiceTypes, CompositionError> {
    let mut renames = BTreeMap::new();
    renames.insert(schema.query_type.clone(), "Query".to_string());
    if let Some(mutation) = &schema.mutation_type {
        renames.insert(mutation.clone(), "Mutation".to_string());
    }

    let plumbing = match schema.field(&schema.query_type, ENTITIES_FIELD) {
        Some(field) => {
            let type_name = field.ty.named_type().to_string();
            match schema.get(&type_name) {
                Some(ty) if ty.kind == TypeKind::Object => Some(ty),
                _ => {
                    return Err(CompositionError::InvalidEntryPoint {
                        service: service.to_string(),
                        type_name,
                    });
                }
            }
        }
        None => None,
    };
    let mut entry_points = BTreeSet::new();
    for field in plumbing.iter().flat_map(|ty| ty.fields.values()) {
        let returns = field.ty.named_type();
        let well_formed = returns == field.name
            && field.ty.is_list()
            && schema
                .get(returns)
                .is_some_and(|ty| ty.kind == TypeKind::Object)
            && field
                .arguments
                .get("keys")
                .is_some_and(|keys| keys.ty.is_list());
        if !well_formed {
            return Err(CompositionError::MalformedEntryPoint {
                service: service.to_string(),
                field: field.name.clone(),
            });
        }
        entry_points.insert(field.name.clone());
    }
    let plumbing = plumbing.map(|ty| ty.name.clone());

    let mut types = Vec::with_capacity(schema.types.len());
    for (name, mut ty) in schema.types {
        if Some(&name) == plumbing.as_ref() {
            continue;
        }
        if name.starts_with("__") && service != INTROSPECTION_SERVICE {
            continue;
        }
        if name == schema.query_type {
            ty.fields.remove(ENTITIES_FIELD);
        }
        if let Some(renamed) = renames.get(&name) {
            ty.name = renamed.clone();
        }
        ty.rename_refs(&renames);
        types.push(ty);
    }

    Ok(ServiceTypes {
        types,
        entry_points,
    })
}

/// Merges every service's schema into one composed schema.
///
/// Services are processed in name order, so the result and any reported
/// conflict do not depend on the order of `services`.
pub fn compose<I>(services: I) -> Result<ComposedSchema, CompositionError>
where
    I: IntoIterator<Item = (String, Schema)>,
{
    let mut inputs = BTreeMap::new();
    for (service, schema) in services {
        if inputs.contains_key(&service) {
            return Err(CompositionError::DuplicateService(service));
        }
        inputs.insert(service, schema);
    }

    let mut types: BTreeMap<String, (String, TypeDef)> = BTreeMap::new();
    let mut owners: BTreeMap<String, BTreeMap<String, BTreeSet<String>>> = BTreeMap::new();
    let mut declared_by: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut entry_points: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for (service, schema) in inputs {
        let normalized = normalize(&service, schema)?;
        for type_name in normalized.entry_points {
            entry_points
                .entry(type_name)
                .or_default()
                .insert(service.clone());
        }

        for ty in normalized.types {
            declared_by
                .entry(ty.name.clone())
                .or_default()
                .insert(service.clone());
            let field_owners = owners.entry(ty.name.clone()).or_default();

            match types.entry(ty.name.clone()) {
                Entry::Vacant(entry) => {
                    for field in ty.fields.keys() {
                        field_owners
                            .entry(field.clone())
                            .or_default()
                            .insert(service.clone());
                    }
                    entry.insert((service.clone(), ty));
                }
                Entry::Occupied(mut entry) => {
                    let (first, existing) = entry.get_mut();
                    merge_type(first, existing, &service, ty, field_owners)?;
                }
            }
        }
    }

    let mut schema = Schema {
        query_type: "Query".to_string(),
        mutation_type: types.contains_key("Mutation").then(|| "Mutation".to_string()),
        types: types
            .into_iter()
            .map(|(name, (_, ty))| (name, ty))
            .collect(),
    };
    schema
        .types
        .entry("Query".to_string())
        .or_insert_with(|| TypeDef::new("Query", TypeKind::Object));
    schema.link_interfaces();

    debug!(
        types = schema.types.len(),
        entry_points = entry_points.len(),
        "composed schema"
    );

    Ok(ComposedSchema {
        schema,
        owners,
        declared_by,
        entry_points,
    })
}

fn merge_type(
    first: &str,
    existing: &mut TypeDef,
    service: &str,
    ty: TypeDef,
    field_owners: &mut BTreeMap<String, BTreeSet<String>>,
) -> Result<(), CompositionError> {
    if existing.kind != ty.kind {
        return Err(CompositionError::KindConflict {
            type_name: ty.name,
            first: first.to_string(),
            first_kind: existing.kind.to_string(),
            second: service.to_string(),
            second_kind: ty.kind.to_string(),
        });
    }

    for (name, field) in ty.fields {
        let services = field_owners.entry(name.clone()).or_default();
        match existing.fields.get(&name) {
            Some(declared) if !declared.same_shape(&field) => {
                return Err(CompositionError::FieldConflict {
                    type_name: existing.name.clone(),
                    field: name,
                    first: services.first().cloned().unwrap_or_default(),
                    second: service.to_string(),
                });
            }
            Some(_) => {}
            None => {
                existing.fields.insert(name, field);
            }
        }
        services.insert(service.to_string());
    }

    for (name, input) in ty.input_fields {
        match existing.input_fields.get(&name) {
            Some(declared) if declared.ty != input.ty => {
                return Err(CompositionError::InputFieldConflict {
                    type_name: existing.name.clone(),
                    field: name,
                    first: first.to_string(),
                    second: service.to_string(),
                });
            }
            Some(_) => {}
            None => {
                existing.input_fields.insert(name, input);
            }
        }
    }

    existing.interfaces.extend(ty.interfaces);
    existing.possible_types.extend(ty.possible_types);
    existing.enum_values.extend(ty.enum_values);
    if existing.description.is_none() {
        existing.description = ty.description;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sdl(source: &str) -> Schema {
        Schema::from_sdl(source).unwrap()
    }

    fn users() -> Schema {
        sdl(r#"
            type Query { users: [User!]! _federation: Federation }
            type Federation { User(keys: [ID!]!): [User]! }
            type User { id: ID! name: String! }
        "#)
    }

    fn orders() -> Schema {
        sdl(r#"
            schema { query: OrdersQuery }
            type OrdersQuery { orders: [Order!]! }
            type Order { id: ID! userId: ID! buyer: User! }
            type User { id: ID! }
        "#)
    }

    #[test]
    fn unions_fields_and_records_owners() {
        let composed = compose([
            ("users".to_string(), users()),
            ("orders".to_string(), orders()),
        ])
        .unwrap();

        let user = composed.schema().get("User").unwrap();
        assert_eq!(
            user.fields.keys().collect::<Vec<_>>(),
            vec!["id", "name"]
        );
        assert_eq!(
            composed.owners("User", "id").unwrap(),
            &BTreeSet::from(["orders".to_string(), "users".to_string()])
        );
        assert_eq!(
            composed.owners("User", "name").unwrap(),
            &BTreeSet::from(["users".to_string()])
        );
        // renamed root, plumbing removed
        assert!(composed.schema().field("Query", "orders").is_some());
        assert!(composed.schema().field("Query", ENTITIES_FIELD).is_none());
        assert!(composed.schema().get("Federation").is_none());
        assert!(composed.can_reenter("User", "users"));
        assert!(!composed.can_reenter("User", "orders"));
    }

    #[test]
    fn merge_order_does_not_change_ownership() {
        let forward = compose([
            ("users".to_string(), users()),
            ("orders".to_string(), orders()),
        ])
        .unwrap();
        let backward = compose([
            ("orders".to_string(), orders()),
            ("users".to_string(), users()),
        ])
        .unwrap();

        assert_eq!(forward.owners, backward.owners);
        assert_eq!(forward.schema(), backward.schema());
    }

    #[test]
    fn conflicts_are_reported_deterministically() {
        let a = sdl("type Query { a: Int } type User { id: ID! name: String }");
        let b = sdl("type Query { b: Int } type User { id: ID! name: Int }");

        let expected = CompositionError::FieldConflict {
            type_name: "User".to_string(),
            field: "name".to_string(),
            first: "a".to_string(),
            second: "b".to_string(),
        };
        let forward = compose([("a".to_string(), a.clone()), ("b".to_string(), b.clone())]);
        let backward = compose([("b".to_string(), b), ("a".to_string(), a)]);
        assert_eq!(forward.unwrap_err(), expected);
        assert_eq!(backward.unwrap_err(), expected);
    }

    #[test]
    fn rejects_kind_conflicts_and_duplicates() {
        let a = sdl("type Query { a: Int } type Thing { id: ID }");
        let b = sdl("type Query { b: Int } interface Thing { id: ID }");
        assert!(matches!(
            compose([("a".to_string(), a.clone()), ("b".to_string(), b)]),
            Err(CompositionError::KindConflict { type_name, .. }) if type_name == "Thing"
        ));
        assert_eq!(
            compose([("a".to_string(), a.clone()), ("a".to_string(), a)]).unwrap_err(),
            CompositionError::DuplicateService("a".to_string())
        );
    }

    #[test]
    fn entry_points_must_match_the_lookup_shape() {
        let malformed = |federation: &str| {
            let source = format!(
                "type Query {{ users: [User] _federation: Federation }} \
                 type Federation {{ {federation} }} \
                 type User {{ id: ID! }}"
            );
            compose([("users".to_string(), sdl(&source))]).unwrap_err()
        };
        let expected = |field: &str| CompositionError::MalformedEntryPoint {
            service: "users".to_string(),
            field: field.to_string(),
        };

        assert_eq!(malformed("lookupUsers(ids: String): User"), expected("lookupUsers"));
        assert_eq!(malformed("User(keys: [ID!]!): User"), expected("User"));
        assert_eq!(malformed("User(ids: [ID!]!): [User]"), expected("User"));
        assert_eq!(malformed("User(keys: ID): [User]"), expected("User"));

        let composed = compose([("users".to_string(), users())]).unwrap();
        assert!(composed.can_reenter("User", "users"));
        assert!(composed.schema().get("Federation").is_none());
    }

    #[test]
    fn meta_types_only_come_from_introspection() {
        let mut backend = sdl("type Query { a: Int }");
        backend
            .types
            .insert("__Type".to_string(), TypeDef::new("__Type", TypeKind::Object));
        let composed = compose([("a".to_string(), backend)]).unwrap();
        assert!(composed.schema().get("__Type").is_none());

        let meta = sdl("type Query { __schema: __Schema! } type __Schema { description: String }");
        let composed = compose([(INTROSPECTION_SERVICE.to_string(), meta)]).unwrap();
        assert!(composed.schema().get("__Schema").is_some());
        assert!(composed.client_schema().field("Query", "__schema").is_none());
    }
}
