use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::GatewayConfig;
use crate::error::{ExecutionError, GatewayError};
use crate::executor_client::ExecutorClient;
use crate::flattener::FlattenedIndex;
use crate::introspection::{INTROSPECTION_QUERY, IntrospectionService, meta_schema};
use crate::query::Query;
use crate::query_executor::{Executor, decode_response};
use crate::query_planner::Planner;
use crate::schema::Schema;
use crate::schema_registry::{ComposedSchema, compose};
use crate::{COORDINATOR_SERVICE, FEDERATION_KEY, GraphQLRequest, INTROSPECTION_SERVICE};

pub struct FederationGateway {
    schema: Arc<ComposedSchema>,
    planner: Planner,
    executor: Executor,
}

impl FederationGateway {
    /// Fetches every service's schema, composes them and registers the
    /// introspection pseudo-service. Any failure aborts construction.
    pub async fn new(
        ctx: &CancellationToken,
        mut clients: HashMap<String, Arc<dyn ExecutorClient>>,
    ) -> Result<Self, GatewayError> {
        if let Some(name) = clients
            .keys()
            .find(|name| *name == INTROSPECTION_SERVICE || *name == COORDINATOR_SERVICE)
        {
            return Err(GatewayError::ReservedService(name.clone()));
        }

        let introspection = Query::parse(INTROSPECTION_QUERY, None, None)?;
        let mut schemas = try_join_all(
            clients
                .iter()
                .map(|(name, client)| fetch_schema(ctx, name, client.as_ref(), &introspection)),
        )
        .await?;

        let meta = meta_schema().map_err(|source| GatewayError::Schema {
            service: INTROSPECTION_SERVICE.to_string(),
            source,
        })?;
        let meta = IntrospectionService::new(&meta);
        schemas.push(fetch_schema(ctx, INTROSPECTION_SERVICE, &meta, &introspection).await?);

        let composed = Arc::new(compose(schemas)?);
        let index = Arc::new(FlattenedIndex::new(&composed)?);

        let services = clients.len();
        clients.insert(
            INTROSPECTION_SERVICE.to_string(),
            Arc::new(IntrospectionService::new(&composed.client_schema())),
        );
        info!(
            services,
            types = composed.schema().types.len(),
            "federation gateway ready"
        );

        Ok(FederationGateway {
            planner: Planner::new(Arc::clone(&composed), index),
            executor: Executor::new(clients),
            schema: composed,
        })
    }

    pub async fn from_config(
        ctx: &CancellationToken,
        config: &GatewayConfig,
    ) -> Result<Self, GatewayError> {
        Self::new(ctx, config.clients()).await
    }

    pub fn schema(&self) -> &ComposedSchema {
        &self.schema
    }

    /// Plans and executes `query`, returning the merged result as a client sees it.
    pub async fn execute(
        &self,
        ctx: &CancellationToken,
        query: &Query,
    ) -> Result<JsonValue, GatewayError> {
        let plan = Arc::new(self.planner.plan_root(query)?);
        debug!("query plan:\n{plan}");

        let results = self.executor.execute(ctx.clone(), plan, None).await?;
        let mut data = results.into_iter().next().unwrap_or_default();
        strip_markers(&mut data);
        Ok(data)
    }

    pub async fn process_request(
        &self,
        ctx: &CancellationToken,
        request: GraphQLRequest,
    ) -> Result<JsonValue, GatewayError> {
        debug!(operation = ?request.operation_name, "processing request");
        let query = Query::parse(
            &request.query,
            request.variables.as_ref(),
            request.operation_name.as_deref(),
        )?;
        self.execute(ctx, &query).await
    }
}

async fn fetch_schema(
    ctx: &CancellationToken,
    service: &str,
    client: &dyn ExecutorClient,
    query: &Query,
) -> Result<(String, Schema), GatewayError> {
    let fetch_error = |source: ExecutionError| GatewayError::Fetch {
        service: service.to_string(),
        source,
    };
    let bytes = client.execute(ctx, query).await.map_err(|source| {
        fetch_error(ExecutionError::Transport {
            service: service.to_string(),
            source,
        })
    })?;
    let data = decode_response(service, &bytes).map_err(fetch_error)?;
    let schema = Schema::from_introspection(data).map_err(|source| GatewayError::Schema {
        service: service.to_string(),
        source,
    })?;

    debug!(service, types = schema.types.len(), "fetched schema");
    Ok((service.to_string(), schema))
}

/// Removes correlation markers everywhere in a result.
fn strip_markers(value: &mut JsonValue) {
    match value {
        JsonValue::Object(object) => {
            object.retain(|name, _| !name.starts_with(FEDERATION_KEY));
            object.values_mut().for_each(strip_markers);
        }
        JsonValue::Array(items) => items.iter_mut().for_each(strip_markers),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn strips_markers_at_every_depth() {
        let mut value = json!({
            "orders": [
                { "id": 1, "__federation": "u1", "buyer": { "__federation_typename": "User", "name": "Ada" } },
            ],
            "__typename": "Query",
        });
        strip_markers(&mut value);
        assert_eq!(
            value,
            json!({ "orders": [{ "id": 1, "buyer": { "name": "Ada" } }], "__typename": "Query" })
        );
    }

    #[tokio::test]
    async fn rejects_reserved_service_names() {
        let schema = Schema::from_sdl("type Query { a: Int }").unwrap();
        let mut clients: HashMap<String, Arc<dyn ExecutorClient>> = HashMap::new();
        clients.insert(
            COORDINATOR_SERVICE.to_string(),
            Arc::new(IntrospectionService::new(&schema)),
        );

        let err = FederationGateway::new(&CancellationToken::new(), clients)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GatewayError::ReservedService(name) if name == "gateway"));
    }
}
