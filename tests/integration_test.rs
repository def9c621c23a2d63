mod common;

use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use quilt::error::{CompositionError, ExecutionError, GatewayError, PlanningError};
use quilt::{GraphQLRequest, Query};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use common::{MockService, gateway, orders, run, users};

const ORDERS_WITH_ENTRIES_SDL: &str = r#"
    type Query { orders: [Order!]! _federation: Federation }
    type Federation { Order(keys: [ID!]!): [Order]! }
    type Order { id: ID! }
"#;

const SHIPPING_SDL: &str = r#"
    type Query { _federation: Federation }
    type Federation { Order(keys: [ID!]!): [Order]! }
    type Order { id: ID! eta: String! }
"#;

const BILLING_SDL: &str = r#"
    type Query { _federation: Federation }
    type Federation { Order(keys: [ID!]!): [Order]! }
    type Order { id: ID! total: Int! }
"#;

fn shipping() -> MockService {
    MockService::new(SHIPPING_SDL, json!({})).with_entities(
        "Order",
        vec![
            json!({ "id": "o1", "eta": "monday" }),
            json!({ "id": "o2", "eta": "friday" }),
        ],
    )
}

fn billing() -> MockService {
    MockService::new(BILLING_SDL, json!({})).with_entities(
        "Order",
        vec![
            json!({ "id": "o1", "total": 12 }),
            json!({ "id": "o2", "total": 30 }),
        ],
    )
}

fn order_root() -> MockService {
    MockService::new(
        ORDERS_WITH_ENTRIES_SDL,
        json!({ "orders": [{ "id": "o1" }, { "id": "o2" }] }),
    )
}

#[tokio::test]
async fn test_cross_service_query() {
    let orders = orders();
    let users = users();
    let orders_calls = orders.calls();
    let users_calls = users.calls();
    let gateway = gateway(vec![("orders", orders), ("users", users)])
        .await
        .unwrap();

    let data = run(&gateway, "{ orders { id buyer { name } } }")
        .await
        .unwrap();

    assert_eq!(
        data,
        json!({
            "orders": [
                { "id": "o1", "buyer": { "name": "Ada" } },
                { "id": "o2", "buyer": { "name": "Grace" } },
                { "id": "o3", "buyer": { "name": null } },
            ]
        })
    );
    assert_eq!(
        *orders_calls.lock().unwrap(),
        vec!["query { orders { id buyer { __federation: id } } }"]
    );
    assert_eq!(
        *users_calls.lock().unwrap(),
        vec![r#"query { _federation { User(keys: ["u1", "u2", "u9"]) { name } } }"#]
    );
}

#[tokio::test]
async fn test_two_hop_crossing() {
    let users = MockService::new(
        r#"
            type Query { _federation: Federation }
            type Federation { User(keys: [ID!]!): [User]! }
            type User { id: ID! name: String! favorite: Product }
            type Product { id: ID! }
        "#,
        json!({}),
    )
    .with_entities(
        "User",
        vec![
            json!({ "id": "u1", "name": "Ada", "favorite": { "id": "p1" } }),
            json!({ "id": "u2", "name": "Grace", "favorite": null }),
        ],
    );
    let catalog = MockService::new(
        r#"
            type Query { _federation: Federation }
            type Federation { Product(keys: [ID!]!): [Product]! }
            type Product { id: ID! title: String }
        "#,
        json!({}),
    )
    .with_entities("Product", vec![json!({ "id": "p1", "title": "Dune" })]);
    let users_calls = users.calls();
    let catalog_calls = catalog.calls();

    let gateway = gateway(vec![("orders", orders()), ("users", users), ("catalog", catalog)])
        .await
        .unwrap();
    let data = run(&gateway, "{ orders { id buyer { name favorite { title } } } }")
        .await
        .unwrap();

    assert_eq!(
        data,
        json!({
            "orders": [
                { "id": "o1", "buyer": { "name": "Ada", "favorite": { "title": "Dune" } } },
                { "id": "o2", "buyer": { "name": "Grace", "favorite": null } },
                { "id": "o3", "buyer": { "name": null, "favorite": null } },
            ]
        })
    );
    assert_eq!(
        *users_calls.lock().unwrap(),
        vec![r#"query { _federation { User(keys: ["u1", "u2", "u9"]) { name favorite { __federation: id } } } }"#]
    );
    assert_eq!(
        *catalog_calls.lock().unwrap(),
        vec![r#"query { _federation { Product(keys: ["p1"]) { title } } }"#]
    );
}

#[tokio::test]
async fn test_null_path_skips_child_service() {
    let orders = MockService::new(
        r#"
            type Query { orders: [Order!]! }
            type Order { id: ID! buyer: User }
            type User { id: ID! }
        "#,
        json!({ "orders": [{ "id": "o1", "buyer": null }, { "id": "o2", "buyer": null }] }),
    );
    let users = users();
    let users_calls = users.calls();
    let gateway = gateway(vec![("orders", orders), ("users", users)])
        .await
        .unwrap();

    let data = run(&gateway, "{ orders { id buyer { name } } }")
        .await
        .unwrap();

    assert_eq!(
        data,
        json!({ "orders": [{ "id": "o1", "buyer": null }, { "id": "o2", "buyer": null }] })
    );
    assert!(users_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_single_service_query_passes_through() {
    let users = users();
    let calls = users.calls();
    let gateway = gateway(vec![("users", users), ("orders", orders())])
        .await
        .unwrap();

    let data = run(&gateway, "{ people: users { id name } }").await.unwrap();

    assert_eq!(
        data,
        json!({ "people": [{ "id": "u1", "name": "Ada" }, { "id": "u2", "name": "Grace" }] })
    );
    assert_eq!(calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_root_fields_across_services() {
    let gateway = gateway(vec![("orders", orders()), ("users", users())])
        .await
        .unwrap();

    let data = run(&gateway, "{ __typename users { name } orders { id } }")
        .await
        .unwrap();

    assert_eq!(
        data,
        json!({
            "__typename": "Query",
            "users": [{ "name": "Ada" }, { "name": "Grace" }],
            "orders": [{ "id": "o1" }, { "id": "o2" }, { "id": "o3" }],
        })
    );
}

#[tokio::test]
async fn test_sibling_children_merge_regardless_of_completion_order() {
    let expected = json!({
        "orders": [
            { "id": "o1", "eta": "monday", "total": 12 },
            { "id": "o2", "eta": "friday", "total": 30 },
        ]
    });

    for (shipping_delay, billing_delay) in [(50, 0), (0, 50)] {
        let gateway = gateway(vec![
            ("orders", order_root()),
            (
                "shipping",
                shipping().with_delay(Duration::from_millis(shipping_delay)),
            ),
            (
                "billing",
                billing().with_delay(Duration::from_millis(billing_delay)),
            ),
        ])
        .await
        .unwrap();

        let data = run(&gateway, "{ orders { id eta total } }").await.unwrap();
        assert_eq!(data, expected);
    }
}

#[tokio::test]
async fn test_polymorphic_crossing() {
    let catalog = MockService::new(
        r#"
            type Query { feed: [Item!]! }
            interface Item { id: ID! }
            type Book implements Item { id: ID! title: String }
            type Movie implements Item { id: ID! }
        "#,
        json!({
            "feed": [
                { "__typename": "Book", "id": "b1", "title": "Dune" },
                { "__typename": "Movie", "id": "m1" },
            ]
        }),
    );
    let reviews = MockService::new(
        r#"
            type Query { _federation: Federation }
            type Federation { Movie(keys: [ID!]!): [Movie]! }
            type Movie { id: ID! rating: Int }
        "#,
        json!({}),
    )
    .with_entities("Movie", vec![json!({ "id": "m1", "rating": 5 })]);
    let reviews_calls = reviews.calls();

    let gateway = gateway(vec![("catalog", catalog), ("reviews", reviews)])
        .await
        .unwrap();
    let data = run(
        &gateway,
        "{ feed { id ... on Movie { rating } ... on Book { title } } }",
    )
    .await
    .unwrap();

    assert_eq!(
        data,
        json!({ "feed": [{ "id": "b1", "title": "Dune" }, { "id": "m1", "rating": 5 }] })
    );
    assert_eq!(
        *reviews_calls.lock().unwrap(),
        vec![r#"query { _federation { Movie(keys: ["m1"]) { rating } } }"#]
    );
}

#[tokio::test]
async fn test_introspection_of_composed_schema() {
    let gateway = gateway(vec![("orders", orders()), ("users", users())])
        .await
        .unwrap();

    let data = run(
        &gateway,
        r#"{ __schema { queryType { name fields { name } } } __type(name: "User") { kind fields { name } } }"#,
    )
    .await
    .unwrap();

    assert_eq!(
        data,
        json!({
            "__schema": {
                "queryType": { "name": "Query", "fields": [{ "name": "orders" }, { "name": "users" }] }
            },
            "__type": { "kind": "OBJECT", "fields": [{ "name": "id" }, { "name": "name" }] },
        })
    );
}

#[tokio::test]
async fn test_process_request_with_variables() {
    let gateway = gateway(vec![("orders", orders()), ("users", users())])
        .await
        .unwrap();
    let request: GraphQLRequest = serde_json::from_value(json!({
        "query": "query Lookup($name: String!) { __type(name: $name) { name } }",
        "variables": { "name": "Order" },
        "operationName": "Lookup",
    }))
    .unwrap();

    let data = gateway
        .process_request(&CancellationToken::new(), request)
        .await
        .unwrap();
    assert_eq!(data, json!({ "__type": { "name": "Order" } }));
}

#[tokio::test]
async fn test_unavailable_service_is_named_in_error() {
    let gateway = gateway(vec![("orders", orders()), ("users", users().unavailable())])
        .await
        .unwrap();

    let err = run(&gateway, "{ orders { buyer { name } } }")
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        GatewayError::Execution(ExecutionError::Transport { service, .. }) if service == "users"
    ));
    assert_eq!(
        err.to_string(),
        "executing on service users: service answered with status 503"
    );
}

#[tokio::test]
async fn test_service_errors_are_reported() {
    let gateway = gateway(vec![("orders", orders().failing("database offline")), ("users", users())])
        .await
        .unwrap();

    let err = run(&gateway, "{ orders { id } }").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "service orders returned errors: database offline"
    );
}

#[tokio::test]
async fn test_first_failure_cancels_siblings() {
    let gateway = gateway(vec![
        ("orders", order_root()),
        (
            "shipping",
            shipping().with_delay(Duration::from_secs(30)),
        ),
        ("billing", billing().failing("card declined")),
    ])
    .await
    .unwrap();

    let started = Instant::now();
    let err = run(&gateway, "{ orders { eta total } }").await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(
        err.to_string(),
        "service billing returned errors: card declined"
    );
}

#[tokio::test]
async fn test_cancelled_context() {
    let gateway = gateway(vec![("orders", orders()), ("users", users())])
        .await
        .unwrap();
    let ctx = CancellationToken::new();
    ctx.cancel();

    let query = Query::parse("{ orders { id } }", None, None).unwrap();
    let err = gateway.execute(&ctx, &query).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Execution(ExecutionError::Cancelled)
    ));
}

#[tokio::test]
async fn test_planning_errors() {
    let gateway = gateway(vec![("orders", orders()), ("users", users())])
        .await
        .unwrap();

    let err = run(&gateway, "{ orders { nope } }").await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Planning(PlanningError::UnknownField { type_name, field })
            if type_name == "Order" && field == "nope"
    ));

    // Plumbing is not part of the client schema.
    let err = run(&gateway, "{ _federation { __typename } }")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Planning(PlanningError::UnknownField { .. })
    ));
}

#[tokio::test]
async fn test_conflicting_schemas_fail_construction() {
    let shadow = MockService::new(
        "type Query { people: [User!]! } type User { id: ID! name: Int }",
        Value::Null,
    );

    let err = gateway(vec![("users", users()), ("shadow", shadow)])
        .await
        .err()
        .unwrap();

    assert!(matches!(
        err,
        GatewayError::Composition(CompositionError::FieldConflict { ref type_name, ref field, .. })
            if type_name == "User" && field == "name"
    ));
}
