#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use quilt::error::{ClientError, GatewayError};
use quilt::executor_client::ExecutorClient;
use quilt::introspection::IntrospectionService;
use quilt::query::{Query, argument_to_json};
use quilt::{FederationGateway, Schema};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

pub const USERS_SDL: &str = r#"
    type Query { users: [User!]! _federation: Federation }
    type Federation { User(keys: [ID!]!): [User]! }
    type User { id: ID! name: String! }
"#;

pub const ORDERS_SDL: &str = r#"
    type Query { orders: [Order!]! }
    type Order { id: ID! userId: ID! buyer: User! }
    type User { id: ID! }
"#;

enum Failure {
    Errors(String),
    Status(u16),
}

/// An in-process service answering from fixed data.
///
/// Root queries are projected over `root`; `_federation` lookups are answered
/// from `entities`, keyed by type name and key.
pub struct MockService {
    introspection: IntrospectionService,
    root: Value,
    entities: HashMap<String, HashMap<String, Value>>,
    delay: Duration,
    failure: Option<Failure>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockService {
    pub fn new(sdl: &str, root: Value) -> Self {
        let schema = Schema::from_sdl(sdl).expect("mock schema should parse");
        MockService {
            introspection: IntrospectionService::new(&schema),
            root,
            entities: HashMap::new(),
            delay: Duration::ZERO,
            failure: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_entities(mut self, type_name: &str, objects: Vec<Value>) -> Self {
        let table = self.entities.entry(type_name.to_string()).or_default();
        for object in objects {
            table.insert(key_of(&object["id"]), object);
        }
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Answers every query after schema fetching with GraphQL errors.
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(Failure::Errors(message.to_string()));
        self
    }

    /// Answers every query after schema fetching with an HTTP status error.
    pub fn unavailable(mut self) -> Self {
        self.failure = Some(Failure::Status(503));
        self
    }

    /// Queries received, printed, excluding schema fetching.
    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }

    fn answer(&self, query: &Query) -> Value {
        let Some(federation) = query
            .selection_set
            .selections
            .iter()
            .find(|selection| selection.name == "_federation")
        else {
            return json!({ "data": query.selection_set.project(&self.root) });
        };

        let mut answers = Map::new();
        for lookup in federation
            .selection_set
            .iter()
            .flat_map(|set| set.selections.iter())
        {
            let keys = lookup.argument("keys").map(argument_to_json);
            let table = self.entities.get(&lookup.name);
            let objects: Vec<Value> = keys
                .as_ref()
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .map(|key| {
                    match table.and_then(|table| table.get(&key_of(key))) {
                        Some(object) => match &lookup.selection_set {
                            Some(set) => set.project(object),
                            None => object.clone(),
                        },
                        None => Value::Null,
                    }
                })
                .collect();
            answers.insert(lookup.response_key().to_string(), Value::Array(objects));
        }
        json!({ "data": { (federation.response_key()): answers } })
    }
}

fn key_of(value: &Value) -> String {
    match value {
        Value::String(key) => key.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ExecutorClient for MockService {
    async fn execute(&self, ctx: &CancellationToken, query: &Query) -> Result<Bytes, ClientError> {
        if query.selection_set.contains_key("__schema") {
            return self.introspection.execute(ctx, query).await;
        }
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push(query.to_string());

        if !self.delay.is_zero() {
            tokio::select! {
                _ = ctx.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        let response = match &self.failure {
            Some(Failure::Status(status)) => return Err(ClientError::Status(*status)),
            Some(Failure::Errors(message)) => json!({ "data": null, "errors": [{ "message": message }] }),
            None => self.answer(query),
        };
        Ok(Bytes::from(response.to_string()))
    }
}

pub fn users() -> MockService {
    MockService::new(
        USERS_SDL,
        json!({
            "users": [
                { "id": "u1", "name": "Ada" },
                { "id": "u2", "name": "Grace" },
            ]
        }),
    )
    .with_entities(
        "User",
        vec![
            json!({ "id": "u1", "name": "Ada" }),
            json!({ "id": "u2", "name": "Grace" }),
        ],
    )
}

pub fn orders() -> MockService {
    MockService::new(
        ORDERS_SDL,
        json!({
            "orders": [
                { "id": "o1", "userId": "u1", "buyer": { "id": "u1" } },
                { "id": "o2", "userId": "u2", "buyer": { "id": "u2" } },
                { "id": "o3", "userId": "u9", "buyer": { "id": "u9" } },
            ]
        }),
    )
}

pub async fn gateway(services: Vec<(&str, MockService)>) -> Result<FederationGateway, GatewayError> {
    let clients: HashMap<String, Arc<dyn ExecutorClient>> = services
        .into_iter()
        .map(|(name, service)| (name.to_string(), Arc::new(service) as Arc<dyn ExecutorClient>))
        .collect();
    FederationGateway::new(&CancellationToken::new(), clients).await
}

pub async fn run(gateway: &FederationGateway, source: &str) -> Result<Value, GatewayError> {
    let query = Query::parse(source, None, None)?;
    gateway.execute(&CancellationToken::new(), &query).await
}
