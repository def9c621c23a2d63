use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ENTITIES_FIELD;
use crate::error::ExecutionError;
use crate::executor_client::ExecutorClient;
use crate::path_follower::{Location, PathFollower, target_mut};
use crate::query::OperationKind;
use crate::query_planner::{Fetch, Plan};

/// Walks plans against the services' clients.
#[derive(Clone)]
pub struct Executor {
    clients: Arc<HashMap<String, Arc<dyn ExecutorClient>>>,
}

impl Executor {
    pub fn new(clients: HashMap<String, Arc<dyn ExecutorClient>>) -> Self {
        Executor {
            clients: Arc::new(clients),
        }
    }

    /// Executes `plan` and everything after it, returning one result per key
    /// (a single result for root plans) with all children merged in.
    ///
    /// Children run concurrently once this plan's own fetch is done. The first
    /// failing child fails the whole call and cancels the token handed to its
    /// siblings; their results are discarded.
    pub fn execute(
        &self,
        ctx: CancellationToken,
        plan: Arc<Plan>,
        keys: Option<Vec<JsonValue>>,
    ) -> BoxFuture<'static, Result<Vec<JsonValue>, ExecutionError>> {
        let executor = self.clone();
        async move {
            if ctx.is_cancelled() {
                return Err(ExecutionError::Cancelled);
            }
            let results = executor.fetch(&ctx, &plan, keys.as_deref()).await?;
            if plan.after.is_empty() {
                return Ok(results);
            }

            let mut dispatch = Vec::with_capacity(plan.after.len());
            for child in &plan.after {
                let follower = match child.fetch {
                    Fetch::Root(_) => PathFollower::roots(&results),
                    Fetch::Entities { .. } => PathFollower::follow(&results, &child.path)
                        .map_err(|source| ExecutionError::Follow {
                            service: child.service.clone(),
                            source,
                        })?,
                };
                if follower.is_empty() {
                    debug!(service = %child.service, "no targets, skipping sub plan");
                    continue;
                }
                dispatch.push((Arc::clone(child), follower));
            }

            let results = Arc::new(Mutex::new(results));
            let group = ctx.child_token();
            let mut tasks = FuturesUnordered::new();
            for (child, PathFollower { targets, keys }) in dispatch {
                let executor = executor.clone();
                let results = Arc::clone(&results);
                let group = group.clone();
                tasks.push(tokio::spawn(async move {
                    let keys = match child.fetch {
                        Fetch::Entities { .. } => Some(keys),
                        Fetch::Root(_) => None,
                    };
                    let answers = executor.execute(group, Arc::clone(&child), keys).await?;
                    let mut results = results.lock().await;
                    merge(&child, &mut results, &targets, answers)
                }));
            }

            while let Some(joined) = tasks.next().await {
                if let Err(err) = joined.map_err(ExecutionError::from).and_then(|merged| merged) {
                    warn!(service = %plan.service, error = %err, "sub plan failed");
                    group.cancel();
                    return Err(err);
                }
            }

            let mut results = results.lock().await;
            Ok(std::mem::take(&mut *results))
        }
        .boxed()
    }

    async fn fetch(
        &self,
        ctx: &CancellationToken,
        plan: &Plan,
        keys: Option<&[JsonValue]>,
    ) -> Result<Vec<JsonValue>, ExecutionError> {
        if plan.is_coordinator() {
            let root = match plan.fetch {
                Fetch::Root(OperationKind::Mutation) => "Mutation",
                _ => "Query",
            };
            let object: Map<String, JsonValue> = plan
                .selection_set
                .selections
                .iter()
                .map(|selection| (selection.response_key().to_string(), root.into()))
                .collect();
            return Ok(vec![JsonValue::Object(object)]);
        }

        let client = self
            .clients
            .get(&plan.service)
            .ok_or_else(|| ExecutionError::UnknownService(plan.service.clone()))?;
        let query = plan.query(keys.unwrap_or_default());
        debug!(service = %plan.service, query = %query, "dispatching sub-query");

        let bytes = client
            .execute(ctx, &query)
            .await
            .map_err(|source| ExecutionError::Transport {
                service: plan.service.clone(),
                source,
            })?;
        let mut data = decode_response(&plan.service, &bytes)?;

        match &plan.fetch {
            Fetch::Root(_) => Ok(vec![data]),
            Fetch::Entities { type_name } => {
                let pointer = format!("/{ENTITIES_FIELD}/{type_name}");
                match data.pointer_mut(&pointer).map(JsonValue::take) {
                    Some(JsonValue::Array(items)) => Ok(items),
                    _ => Err(ExecutionError::Shape {
                        service: plan.service.clone(),
                        message: format!("expected a list at {ENTITIES_FIELD}.{type_name}"),
                    }),
                }
            }
        }
    }
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    data: Option<JsonValue>,
    #[serde(default)]
    errors: Vec<ResponseError>,
}

#[derive(Deserialize)]
struct ResponseError {
    #[serde(default)]
    message: String,
}

/// Reads a GraphQL response envelope, returning its `data` object.
pub(crate) fn decode_response(service: &str, bytes: &[u8]) -> Result<JsonValue, ExecutionError> {
    let response: Response =
        serde_json::from_slice(bytes).map_err(|source| ExecutionError::Decode {
            service: service.to_string(),
            source,
        })?;
    if !response.errors.is_empty() {
        let messages: Vec<String> = response.errors.into_iter().map(|err| err.message).collect();
        return Err(ExecutionError::Service {
            service: service.to_string(),
            message: messages.join("; "),
        });
    }
    match response.data {
        Some(data @ JsonValue::Object(_)) => Ok(data),
        _ => Err(ExecutionError::Shape {
            service: service.to_string(),
            message: "response carries no data object".to_string(),
        }),
    }
}

/// Merges a child's answers into the objects its path resolved to, pairwise.
fn merge(
    plan: &Plan,
    results: &mut [JsonValue],
    targets: &[Location],
    answers: Vec<JsonValue>,
) -> Result<(), ExecutionError> {
    if answers.len() != targets.len() {
        return Err(ExecutionError::ResultCount {
            service: plan.service.clone(),
            expected: targets.len(),
            actual: answers.len(),
        });
    }

    for (location, answer) in targets.iter().zip(answers) {
        let target = target_mut(results, location).ok_or_else(|| ExecutionError::Shape {
            service: plan.service.clone(),
            message: "merge target is no longer an object".to_string(),
        })?;
        match answer {
            JsonValue::Object(fields) => target.extend(fields),
            JsonValue::Null => {
                for selection in &plan.selection_set.selections {
                    target.insert(selection.response_key().to_string(), JsonValue::Null);
                }
            }
            other => {
                return Err(ExecutionError::Shape {
                    service: plan.service.clone(),
                    message: format!("expected an object, got {other}"),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_follower::Segment;
    use crate::query::{Selection, SelectionSet};
    use crate::query_planner::PathStep;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn entities(service: &str, fields: &[&str]) -> Plan {
        Plan {
            service: service.to_string(),
            fetch: Fetch::Entities {
                type_name: "User".to_string(),
            },
            selection_set: SelectionSet {
                selections: fields.iter().map(|name| Selection::field(*name)).collect(),
                fragments: Vec::new(),
            },
            path: vec![PathStep::Field("buyer".to_string())],
            after: Vec::new(),
        }
    }

    #[test]
    fn decodes_response_envelopes() {
        assert_eq!(
            decode_response("users", br#"{"data":{"a":1}}"#).unwrap(),
            json!({ "a": 1 })
        );

        let err = decode_response("users", br#"{"data":null,"errors":[{"message":"boom"},{"message":"bang"}]}"#)
            .unwrap_err();
        assert_eq!(err.to_string(), "service users returned errors: boom; bang");

        assert!(matches!(
            decode_response("users", br#"{"data":[1]}"#),
            Err(ExecutionError::Shape { .. })
        ));
        assert!(matches!(
            decode_response("users", b"<html>"),
            Err(ExecutionError::Decode { service, .. }) if service == "users"
        ));
    }

    #[test]
    fn merges_objects_and_fills_null_entities() {
        let mut results = vec![
            json!({ "buyer": { "__federation": "u1" } }),
            json!({ "buyer": { "__federation": "u2" } }),
        ];
        let targets = vec![
            vec![Segment::Index(0), Segment::Key("buyer".into())],
            vec![Segment::Index(1), Segment::Key("buyer".into())],
        ];

        merge(
            &entities("users", &["name", "email"]),
            &mut results,
            &targets,
            vec![json!({ "name": "Ada", "email": "ada@example.com" }), JsonValue::Null],
        )
        .unwrap();

        assert_eq!(
            results,
            vec![
                json!({ "buyer": { "__federation": "u1", "name": "Ada", "email": "ada@example.com" } }),
                json!({ "buyer": { "__federation": "u2", "name": null, "email": null } }),
            ]
        );
    }

    #[test]
    fn rejects_answers_not_aligned_with_keys() {
        let mut results = vec![json!({ "buyer": { "__federation": "u1" } })];
        let targets = vec![vec![Segment::Index(0), Segment::Key("buyer".into())]];

        let err = merge(&entities("users", &["name"]), &mut results, &targets, Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::ResultCount { expected: 1, actual: 0, .. }
        ));

        let err = merge(
            &entities("users", &["name"]),
            &mut results,
            &targets,
            vec![json!("Ada")],
        )
        .unwrap_err();
        assert!(matches!(err, ExecutionError::Shape { .. }));
    }

    #[tokio::test]
    async fn coordinator_answers_typename_without_clients() {
        let plan = Plan {
            service: crate::COORDINATOR_SERVICE.to_string(),
            fetch: Fetch::Root(OperationKind::Query),
            selection_set: SelectionSet {
                selections: vec![Selection::aliased("kind", "__typename")],
                fragments: Vec::new(),
            },
            path: Vec::new(),
            after: Vec::new(),
        };
        let executor = Executor::new(HashMap::new());
        let results = executor
            .execute(CancellationToken::new(), Arc::new(plan), None)
            .await
            .unwrap();
        assert_eq!(results, vec![json!({ "kind": "Query" })]);
    }

    #[tokio::test]
    async fn cancelled_context_stops_before_fetching() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let executor = Executor::new(HashMap::new());
        let err = executor
            .execute(ctx, Arc::new(entities("users", &["name"])), Some(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Cancelled));
    }
}
