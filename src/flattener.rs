use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use tracing::debug;

use crate::KEY_FIELD;
use crate::error::CompositionError;
use crate::schema::TypeKind;
use crate::schema_registry::ComposedSchema;

/// How a field is reached from a service that currently holds its parent object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route<'a> {
    /// The current service resolves the field itself.
    Local,
    /// The field lives on `service`; the parent object must be re-entered there by `key`.
    Remote {
        service: &'a str,
        key: Option<&'a str>,
    },
}

#[derive(Debug, Default)]
struct TypeIndex {
    /// field -> owners, sorted
    owners: HashMap<String, Vec<String>>,
    /// from -> to -> key field
    crossings: HashMap<String, HashMap<String, String>>,
}

/// Per-field ownership and key lookup for everything reachable from the roots.
#[derive(Debug, Default)]
pub struct FlattenedIndex {
    types: HashMap<String, TypeIndex>,
}

impl FlattenedIndex {
    pub fn new(composed: &ComposedSchema) -> Result<Self, CompositionError> {
        let schema = composed.schema();
        let roots: BTreeSet<&str> = [Some(schema.query_type.as_str()), schema.mutation_type.as_deref()]
            .into_iter()
            .flatten()
            .collect();

        let mut types: BTreeMap<String, TypeIndex> = BTreeMap::new();
        let mut seen: BTreeSet<&str> = roots.clone();
        let mut queue: VecDeque<&str> = roots.iter().copied().collect();
        while let Some(type_name) = queue.pop_front() {
            let Some(ty) = schema.get(type_name) else {
                continue;
            };
            let mut next: Vec<&str> = ty.possible_types.iter().map(String::as_str).collect();

            if matches!(ty.kind, TypeKind::Object | TypeKind::Interface) {
                let index = types.entry(type_name.to_string()).or_default();
                for (name, field) in &ty.fields {
                    let owners = composed
                        .owners(type_name, name)
                        .map(|owners| owners.iter().cloned().collect())
                        .unwrap_or_default();
                    index.owners.insert(name.clone(), owners);
                    next.push(field.ty.named_type());
                }
            }

            for name in next {
                if seen.insert(name) {
                    queue.push_back(name);
                }
            }
        }

        for (type_name, index) in types.iter_mut() {
            if roots.contains(type_name.as_str()) || type_name.starts_with("__") {
                continue;
            }
            let Some(declared_by) = composed.declared_by(type_name) else {
                continue;
            };
            for from in declared_by {
                let mut owners: Vec<&Vec<String>> = index.owners.values().collect();
                owners.sort();
                for owners in owners {
                    let Some(to) = owners.first() else {
                        continue;
                    };
                    if owners.contains(from) {
                        continue;
                    }
                    let declares_key = |service: &String| {
                        composed
                            .owners(type_name, KEY_FIELD)
                            .is_some_and(|owners| owners.contains(service))
                    };
                    if !declares_key(from) || !declares_key(to) {
                        return Err(CompositionError::MissingKey {
                            type_name: type_name.clone(),
                            from: from.clone(),
                            to: to.clone(),
                        });
                    }
                    if !composed.can_reenter(type_name, to) {
                        return Err(CompositionError::MissingEntryPoint {
                            type_name: type_name.clone(),
                            service: to.clone(),
                        });
                    }
                    index
                        .crossings
                        .entry(from.clone())
                        .or_default()
                        .insert(to.clone(), KEY_FIELD.to_string());
                }
            }
        }

        debug!(types = types.len(), "flattened composed schema");
        Ok(FlattenedIndex {
            types: types.into_iter().collect(),
        })
    }

    /// Owners of a reachable field, sorted by service name.
    pub fn owners(&self, type_name: &str, field: &str) -> Option<&[String]> {
        self.types
            .get(type_name)?
            .owners
            .get(field)
            .map(Vec::as_slice)
    }

    /// The single service resolving `field` when `current` holds the parent object:
    /// `current` itself when it is an owner, otherwise the first owner by name.
    pub fn owner<'a>(&'a self, type_name: &str, field: &str, current: &'a str) -> Option<&'a str> {
        let owners = self.owners(type_name, field)?;
        if owners.iter().any(|owner| owner == current) {
            Some(current)
        } else {
            owners.first().map(String::as_str)
        }
    }

    pub fn key(&self, type_name: &str, from: &str, to: &str) -> Option<&str> {
        self.types
            .get(type_name)?
            .crossings
            .get(from)?
            .get(to)
            .map(String::as_str)
    }

    pub fn route<'a>(&'a self, type_name: &str, field: &str, current: &'a str) -> Option<Route<'a>> {
        let owner = self.owner(type_name, field, current)?;
        if owner == current {
            return Some(Route::Local);
        }
        Some(Route::Remote {
            service: owner,
            key: self.key(type_name, current, owner),
        })
    }
}
