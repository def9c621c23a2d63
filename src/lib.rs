pub mod config;
pub mod error;
pub mod executor_client;
pub mod federation_gateway;
pub mod flattener;
pub mod introspection;
pub mod path_follower;
pub mod query;
pub mod query_executor;
pub mod query_planner;
pub mod schema;
pub mod schema_registry;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use executor_client::{ExecutorClient, HttpExecutorClient};
pub use federation_gateway::FederationGateway;
pub use query::Query;
pub use query_planner::{Plan, Planner};
pub use schema::Schema;
pub use schema_registry::{ComposedSchema, compose};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Alias under which the parent sub-query requests the key of a re-entry object.
pub const FEDERATION_KEY: &str = "__federation";
/// Alias under which the parent sub-query requests `__typename` at polymorphic boundaries.
pub const FEDERATION_TYPENAME: &str = "__federation_typename";
/// Root field through which a service re-enters its federated types by key.
pub const ENTITIES_FIELD: &str = "_federation";
/// Field that identifies an instance of a federated type.
pub const KEY_FIELD: &str = "id";
/// Pseudo-service answering introspection of the composed schema.
pub const INTROSPECTION_SERVICE: &str = "introspection";
/// Identity of root plans that only coordinate other services.
pub const COORDINATOR_SERVICE: &str = "gateway";

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    pub query: String,
    pub variables: Option<Value>,
    pub operation_name: Option<String>,
}
