use serde_json::{Map, Value as JsonValue};

use crate::error::FollowError;
use crate::query_planner::PathStep;
use crate::{FEDERATION_KEY, FEDERATION_TYPENAME};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Index(usize),
    Key(String),
}

/// Address of an object inside a node's result list, starting with the index
/// of the result it belongs to.
pub type Location = Vec<Segment>;

/// Targets a child plan merges into, with the keys extracted from each.
#[derive(Debug, Default, PartialEq)]
pub struct PathFollower {
    pub targets: Vec<Location>,
    pub keys: Vec<JsonValue>,
}

impl PathFollower {
    /// Walks `path` through every result, collecting each object the path ends
    /// on together with its correlation key.
    pub fn follow(results: &[JsonValue], path: &[PathStep]) -> Result<Self, FollowError> {
        let mut follower = PathFollower::default();
        let mut location = Vec::new();
        follower.walk_list(results, path, &mut location)?;
        Ok(follower)
    }

    /// Targets for children that fetch from a root: every result object, no keys.
    pub fn roots(results: &[JsonValue]) -> Self {
        PathFollower {
            targets: (0..results.len()).map(|i| vec![Segment::Index(i)]).collect(),
            keys: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    fn walk_list(
        &mut self,
        items: &[JsonValue],
        path: &[PathStep],
        location: &mut Location,
    ) -> Result<(), FollowError> {
        for (index, item) in items.iter().enumerate() {
            location.push(Segment::Index(index));
            let walked = self.walk(item, path, location);
            location.pop();
            walked.map_err(|err| FollowError::Index {
                index,
                source: Box::new(err),
            })?;
        }
        Ok(())
    }

    fn walk(
        &mut self,
        value: &JsonValue,
        path: &[PathStep],
        location: &mut Location,
    ) -> Result<(), FollowError> {
        let object = match value {
            JsonValue::Null => return Ok(()),
            JsonValue::Array(items) => return self.walk_list(items, path, location),
            JsonValue::Object(object) => object,
            scalar => return Err(FollowError::NotAnObject(scalar.to_string())),
        };

        match path.split_first() {
            None => {
                let key = object
                    .get(FEDERATION_KEY)
                    .ok_or_else(|| FollowError::MissingMarker {
                        marker: FEDERATION_KEY,
                        object: value.to_string(),
                    })?;
                self.targets.push(location.clone());
                self.keys.push(key.clone());
                Ok(())
            }
            Some((PathStep::Field(name), rest)) => {
                let child = object
                    .get(name)
                    .ok_or_else(|| FollowError::MissingField(name.clone()))?;
                location.push(Segment::Key(name.clone()));
                let walked = self.walk(child, rest, location);
                location.pop();
                walked.map_err(|err| FollowError::Field {
                    name: name.clone(),
                    source: Box::new(err),
                })
            }
            Some((PathStep::Type(name), rest)) => {
                let typename = object
                    .get(FEDERATION_TYPENAME)
                    .or_else(|| object.get("__typename"))
                    .and_then(JsonValue::as_str)
                    .ok_or(FollowError::MissingTypename)?;
                if typename != name {
                    return Ok(());
                }
                self.walk(value, rest, location)
                    .map_err(|err| FollowError::Type {
                        name: name.clone(),
                        source: Box::new(err),
                    })
            }
        }
    }
}

/// Resolves a location produced by [`PathFollower`] to the object it names.
pub fn target_mut<'r>(
    results: &'r mut [JsonValue],
    location: &[Segment],
) -> Option<&'r mut Map<String, JsonValue>> {
    let (Segment::Index(first), rest) = location.split_first()? else {
        return None;
    };
    let mut value = results.get_mut(*first)?;
    for segment in rest {
        value = match segment {
            Segment::Index(index) => value.get_mut(*index)?,
            Segment::Key(key) => value.get_mut(key.as_str())?,
        };
    }
    value.as_object_mut()
}
