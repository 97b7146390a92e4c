//! Integration tests for sluice_sdk

use async_trait::async_trait;
use futures::StreamExt;
use indexmap::IndexMap;
use serde_json::{json, Value};
use sluice_runtime::{
    Field, FieldDef, InputValue, InputValueDef, InstrumentationError,
    InstrumentationExecutionParameters, InstrumentationState, ObjectDef, OperationDefinition,
    OperationKind, SchemaBuilder, TypeRef, VariableDefinition,
};
use sluice_sdk::{
    Context, Document, ErrorCode, Instrumentation, PubSub, Response, ResolverMap, Schema,
    ServiceConfig, SubscriptionResponse, SubscriptionService,
};
use std::time::Duration;

fn schema() -> Schema {
    SchemaBuilder::new()
        .query_type("Query")
        .subscription_type("Subscription")
        .object(ObjectDef::new("Query").field(FieldDef::new("ping", TypeRef::named("String"))))
        .object(
            ObjectDef::new("Subscription")
                .field(
                    FieldDef::new("messages", TypeRef::named("Message")).argument(
                        InputValueDef::new("room", TypeRef::non_null(TypeRef::named("String"))),
                    ),
                )
                .field(FieldDef::new("silence", TypeRef::named("Int"))),
        )
        .object(
            ObjectDef::new("Message")
                .field(FieldDef::new("id", TypeRef::non_null(TypeRef::named("ID"))))
                .field(FieldDef::new("body", TypeRef::non_null(TypeRef::named("String")))),
        )
        .build()
}

fn service(pubsub: &PubSub) -> SubscriptionService {
    service_with(pubsub, ServiceConfig::new())
}

fn service_with(pubsub: &PubSub, config: ServiceConfig) -> SubscriptionService {
    SubscriptionService::builder()
        .schema(schema())
        .pubsub(pubsub.clone())
        .topic("messages", |args| {
            format!("room:{}", args.get_as::<String>("room").unwrap_or_default())
        })
        .config(config)
        .build()
        .expect("service should build")
}

fn messages_document(room: InputValue) -> Document {
    Document::new().with_operation(
        OperationDefinition::subscription()
            .named("OnMessage")
            .variable(VariableDefinition::new(
                "room",
                TypeRef::non_null(TypeRef::named("String")),
            ))
            .select(
                Field::new("messages")
                    .argument("room", room)
                    .select(Field::new("id"))
                    .select(Field::new("body")),
            ),
    )
}

fn variables(room: &str) -> IndexMap<String, Value> {
    let mut variables = IndexMap::new();
    variables.insert("room".to_string(), json!(room));
    variables
}

async fn collect(response: SubscriptionResponse) -> Vec<Value> {
    response
        .into_stream()
        .expect("subscription should produce a stream")
        .map(|item| item.expect("stream should not fail").to_json())
        .collect()
        .await
}

/// Test that published events come out as ordered responses
#[tokio::test]
async fn test_pubsub_events_flow_through_service() {
    let pubsub = PubSub::new();
    let service = service(&pubsub);

    let response = service
        .subscribe(
            messages_document(InputValue::variable("room")),
            Some("OnMessage"),
            variables("lobby"),
            Context::new(),
        )
        .await
        .unwrap();
    assert!(pubsub.has_subscribers("room:lobby").await);

    for i in 1..=3 {
        pubsub
            .publish("room:lobby", json!({ "id": i.to_string(), "body": format!("hello {}", i) }))
            .await;
    }
    pubsub.close("room:lobby").await;

    let results = collect(response).await;
    assert_eq!(
        results,
        vec![
            json!({ "data": { "messages": { "id": "1", "body": "hello 1" } } }),
            json!({ "data": { "messages": { "id": "2", "body": "hello 2" } } }),
            json!({ "data": { "messages": { "id": "3", "body": "hello 3" } } }),
        ]
    );
}

/// Test that the topic is derived from the field arguments
#[tokio::test]
async fn test_topic_follows_arguments() {
    let pubsub = PubSub::new();
    let service = service(&pubsub);

    let lobby = service
        .subscribe(
            messages_document(InputValue::variable("room")),
            None,
            variables("lobby"),
            Context::new(),
        )
        .await
        .unwrap();
    let kitchen = service
        .subscribe(
            messages_document(json!("kitchen").into()),
            None,
            variables("ignored"),
            Context::new(),
        )
        .await
        .unwrap();

    pubsub.publish("room:lobby", json!({ "id": "l", "body": "lobby" })).await;
    pubsub.publish("room:kitchen", json!({ "id": "k", "body": "kitchen" })).await;
    pubsub.close("room:lobby").await;
    pubsub.close("room:kitchen").await;

    let lobby = collect(lobby).await;
    let kitchen = collect(kitchen).await;
    assert_eq!(lobby.len(), 1);
    assert_eq!(lobby[0]["data"]["messages"]["body"], "lobby");
    assert_eq!(kitchen.len(), 1);
    assert_eq!(kitchen[0]["data"]["messages"]["body"], "kitchen");
}

/// Test that a malformed event only fails its own response
#[tokio::test]
async fn test_bad_event_is_isolated() {
    let pubsub = PubSub::new();
    let service = service_with(&pubsub, ServiceConfig::new().max_in_flight_events(1));

    let response = service
        .subscribe(
            messages_document(InputValue::variable("room")),
            None,
            variables("lobby"),
            Context::new(),
        )
        .await
        .unwrap();

    pubsub.publish("room:lobby", json!({ "id": "1" })).await;
    pubsub.publish("room:lobby", json!({ "id": "2", "body": "fine" })).await;
    pubsub.close("room:lobby").await;

    let results = collect(response).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["data"]["messages"], Value::Null);
    assert_eq!(results[0]["errors"][0]["path"], json!(["messages", "body"]));
    assert_eq!(results[1], json!({ "data": { "messages": { "id": "2", "body": "fine" } } }));
}

/// Test that a missing required variable is reported as a validation error
#[tokio::test]
async fn test_missing_variable_is_rejected() {
    let pubsub = PubSub::new();
    let err = service(&pubsub)
        .subscribe(
            messages_document(InputValue::variable("room")),
            None,
            IndexMap::new(),
            Context::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::ValidationError);
    assert_eq!(err.extension("variable"), Some(&json!("room")));
    assert_eq!(pubsub.topic_count().await, 0);
}

/// Test that non-subscription operations are rejected
#[tokio::test]
async fn test_query_operation_is_rejected() {
    let document = Document::new()
        .with_operation(OperationDefinition::new(OperationKind::Query).select(Field::new("ping")));

    let err = service(&PubSub::new())
        .subscribe(document, None, IndexMap::new(), Context::new())
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::NotASubscription);
    assert!(err.is_client_error());
}

/// Test that an unknown operation name is reported
#[tokio::test]
async fn test_unknown_operation_name() {
    let err = service(&PubSub::new())
        .subscribe(
            messages_document(InputValue::variable("room")),
            Some("OnSomethingElse"),
            variables("lobby"),
            Context::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::UnknownOperation);
}

/// Test that a subscription field resolving to null gives no stream
#[tokio::test]
async fn test_field_without_stream_resolver() {
    let document = Document::new()
        .with_operation(OperationDefinition::subscription().select(Field::new("silence")));

    let response = service(&PubSub::new())
        .subscribe(document, None, IndexMap::new(), Context::new())
        .await
        .unwrap();

    assert!(response.stream.is_none());
    assert!(response.errors.is_empty());
}

/// Test that a stream resolver returning a plain value is fatal
#[tokio::test]
async fn test_plain_value_is_not_an_event_stream() {
    let mut resolvers = ResolverMap::new();
    resolvers.register_fn("Subscription", "silence", |_, _, _, _| Ok(json!(1)));
    let service = SubscriptionService::builder()
        .schema(schema())
        .resolvers(resolvers)
        .build()
        .unwrap();

    let document = Document::new()
        .with_operation(OperationDefinition::subscription().select(Field::new("silence")));
    let err = service
        .subscribe(document, None, IndexMap::new(), Context::new())
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::NotAnEventStream);
    assert_eq!(err.extension("field"), Some(&json!("silence")));
    assert!(err.is_server_error());
}

struct Stamp;

#[async_trait]
impl Instrumentation for Stamp {
    fn name(&self) -> &str {
        "stamp"
    }

    async fn instrument_execution_result(
        &self,
        result: Response,
        params: &InstrumentationExecutionParameters<'_>,
        _state: Option<&InstrumentationState>,
    ) -> Result<Response, InstrumentationError> {
        Ok(result.with_extension("path", json!(params.path.to_string())))
    }
}

/// Test that registered instrumentation is chained after tracing
#[tokio::test]
async fn test_instrumentation_transforms_results() {
    let pubsub = PubSub::new();
    let service = SubscriptionService::builder()
        .schema(schema())
        .pubsub(pubsub.clone())
        .topic("messages", |_| "all".to_string())
        .instrumentation(Stamp)
        .build()
        .unwrap();

    let response = service
        .subscribe(
            messages_document(InputValue::variable("room")),
            None,
            variables("any"),
            Context::new(),
        )
        .await
        .unwrap();

    pubsub.publish("all", json!({ "id": "1", "body": "x" })).await;
    pubsub.close("all").await;

    let results = tokio::time::timeout(Duration::from_secs(5), collect(response))
        .await
        .expect("stream should end after the topic closes");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["extensions"]["path"], "messages");
}
