use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use blockflow::blocks::{BlockHandler, BlockOutput, HandlerRegistry, HandlerResult};
use blockflow::config::{Config, EngineSettings};
use blockflow::datastore::{Datastore, MemoryDatastore};
use blockflow::engine::{resolve, ExecutionContext, Resolver};
use blockflow::error::{BlockErrorKind, EngineError, GraphErrorKind};
use blockflow::workflow::{
    parse_workflow, plan, Block, BlockConfig, BlockKind, Connection, Workflow,
};
use blockflow::Engine;

fn workflow(blocks: Vec<Block>, connections: Vec<(&str, &str)>) -> Workflow {
    Workflow {
        name: "scenario".to_string(),
        description: String::new(),
        blocks,
        connections: connections
            .into_iter()
            .map(|(s, t)| Connection::new(s, t))
            .collect(),
        status: Default::default(),
    }
}

fn engine_with(store: Arc<MemoryDatastore>, config: &Config) -> Engine {
    Engine::with_datastore(store, config).unwrap()
}

fn engine() -> Engine {
    engine_with(Arc::new(MemoryDatastore::new()), &Config::default())
}

#[test]
fn test_diamond_levels() {
    let blocks = vec![
        Block::new("a", BlockKind::Intake, json!({})),
        Block::new("b", BlockKind::Transform, json!({})),
        Block::new("c", BlockKind::Transform, json!({})),
        Block::new("d", BlockKind::Respond, json!({})),
    ];
    let connections = vec![
        Connection::new("a", "b"),
        Connection::new("a", "c"),
        Connection::new("b", "d"),
        Connection::new("c", "d"),
    ];

    let plan = plan(&blocks, &connections).unwrap();
    assert_eq!(plan.len(), 3);
    assert_eq!(plan.levels()[0], vec!["a"]);
    let mut middle = plan.levels()[1].clone();
    middle.sort();
    assert_eq!(middle, vec!["b", "c"]);
    assert_eq!(plan.levels()[2], vec!["d"]);

    for connection in &connections {
        assert!(
            plan.level_of(&connection.source_block_id) < plan.level_of(&connection.target_block_id)
        );
    }
}

#[tokio::test]
async fn test_cycle_fails_before_any_block_runs() {
    let wf = workflow(
        vec![
            Block::new("a", BlockKind::Transform, json!({})),
            Block::new("b", BlockKind::Transform, json!({})),
            Block::new("out", BlockKind::Respond, json!({})),
        ],
        vec![("a", "b"), ("b", "a"), ("b", "out")],
    );

    let err = engine()
        .execute(&wf, json!({}), &HashMap::new())
        .await
        .unwrap_err();
    match err {
        EngineError::Graph(graph) => {
            assert_eq!(graph.kind, GraphErrorKind::Cycle);
            let blamed = graph.block_id.unwrap();
            assert!(blamed == "a" || blamed == "b");
        }
        other => panic!("expected graph error, got {:?}", other),
    }
}

#[test]
fn test_interpolation_keeps_types() {
    let ctx = ExecutionContext::new(json!({"age": 30, "name": "Ann"}), &HashMap::new());
    assert_eq!(resolve(&json!("{{request_data.age}}"), &ctx).value, json!(30));
    assert_eq!(
        resolve(&json!("Hello {{request_data.name}}"), &ctx).value,
        json!("Hello Ann")
    );
}

fn gate() -> Workflow {
    workflow(
        vec![
            Block::new(
                "gate",
                BlockKind::Conditional,
                json!({
                    "condition": "{{request_data.age}} >= 18",
                    "true_value": "adult",
                    "false_value": "minor"
                }),
            ),
            Block::new("out", BlockKind::Respond, json!({"body": {"verdict": "{{gate}}"}})),
        ],
        vec![("gate", "out")],
    )
}

#[tokio::test]
async fn test_conditional_selection() {
    let engine = engine();
    let wf = gate();

    for (age, expected) in [(json!(20), "adult"), (json!(10), "minor"), (json!("18"), "adult")] {
        let response = engine
            .execute(&wf, json!({ "age": age }), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(response.body["verdict"], expected, "age {}", age);
    }
}

#[tokio::test]
async fn test_pick_applied_twice() {
    let wf = workflow(
        vec![
            Block::new(
                "first",
                BlockKind::Transform,
                json!({"operations": [{"type": "pick", "fields": ["a"]}]}),
            ),
            Block::new(
                "second",
                BlockKind::Transform,
                json!({"input_ref": "first", "operations": [{"type": "pick", "fields": ["a"]}]}),
            ),
            Block::new(
                "out",
                BlockKind::Respond,
                json!({"body": {"first": "{{first}}", "second": "{{second}}"}}),
            ),
        ],
        vec![("first", "second"), ("second", "out")],
    );

    let response = engine()
        .execute(&wf, json!({"a": 1, "b": 2}), &HashMap::new())
        .await
        .unwrap();
    assert_eq!(response.body, json!({"first": {"a": 1}, "second": {"a": 1}}));
}

async fn users() -> Arc<MemoryDatastore> {
    let store = Arc::new(MemoryDatastore::new());
    store
        .seed(
            "users",
            vec![
                json!({"name": "Ann", "age": 20}),
                json!({"name": "Bob", "age": 30}),
                json!({"name": "Cid", "age": 40}),
                json!({"name": "Dee", "age": 50}),
            ],
        )
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn test_intake_query_respond() {
    let wf = workflow(
        vec![
            Block::new(
                "in",
                BlockKind::Intake,
                json!({"schema": [{"name": "age", "type": "number", "required": true}]}),
            ),
            Block::new(
                "db",
                BlockKind::DatastoreQuery,
                json!({
                    "operation": "find",
                    "collection": "users",
                    "query": {"age": {"$gt": "{{request_data.age}}"}}
                }),
            ),
            Block::new(
                "out",
                BlockKind::Respond,
                json!({"body": {"data": "{{db.results}}", "count": "{{db.count}}"}}),
            ),
        ],
        vec![("in", "db"), ("db", "out")],
    );

    let response = engine_with(users().await, &Config::default())
        .execute(&wf, json!({"age": 25}), &HashMap::new())
        .await
        .unwrap();

    assert_eq!(response.status_code, 200);
    assert_eq!(response.body["count"], json!(3));
    let names: Vec<&str> = response.body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Bob", "Cid", "Dee"]);
}

#[tokio::test]
async fn test_missing_required_field_stops_before_query() {
    let wf = workflow(
        vec![
            Block::new(
                "in",
                BlockKind::Intake,
                json!({"schema": [{"name": "age", "type": "number"}]}),
            ),
            Block::new(
                "db",
                BlockKind::DatastoreQuery,
                json!({"collection": "users", "operation": "delete", "query": {}}),
            ),
            Block::new("out", BlockKind::Respond, json!({})),
        ],
        vec![("in", "db"), ("db", "out")],
    );

    let store = users().await;
    let err = engine_with(store.clone(), &Config::default())
        .execute(&wf, json!({}), &HashMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.block_id(), Some("in"));
    assert_eq!(err.block_error_kind(), Some(BlockErrorKind::Validation));
    assert_eq!(store.count("users").await, 4);
}

#[tokio::test]
async fn test_unreachable_outbound_call() {
    let mut config = Config::default();
    config.outbound.allow_internal_urls = true;

    let wf = workflow(
        vec![
            Block::new(
                "call",
                BlockKind::OutboundCall,
                json!({"url": "http://127.0.0.1:1/unreachable", "method": "POST", "body": {"x": 1}}),
            ),
            Block::new("out", BlockKind::Respond, json!({"body": {"never": true}})),
        ],
        vec![("call", "out")],
    );

    let err = engine_with(Arc::new(MemoryDatastore::new()), &config)
        .execute(&wf, json!({}), &HashMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.block_id(), Some("call"));
    assert_eq!(err.block_error_kind(), Some(BlockErrorKind::Network));
    assert_eq!(err.http_status(), 502);
    assert!(err.to_json()["error"]["block_id"] == "call");
}

#[tokio::test]
async fn test_unresolved_filter_reference() {
    let wf = workflow(
        vec![
            Block::new(
                "db",
                BlockKind::DatastoreQuery,
                json!({"collection": "users", "query": {"name": "{{nonexistent_block.field}}"}}),
            ),
            Block::new("out", BlockKind::Respond, json!({})),
        ],
        vec![("db", "out")],
    );

    let err = engine_with(users().await, &Config::default())
        .execute(&wf, json!({}), &HashMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.block_id(), Some("db"));
    assert_eq!(
        err.block_error_kind(),
        Some(BlockErrorKind::UnresolvedReference)
    );
}

struct Slow;

#[async_trait]
impl BlockHandler for Slow {
    fn kind(&self) -> BlockKind {
        BlockKind::Transform
    }

    fn description(&self) -> &str {
        "sleeps"
    }

    async fn execute(&self, _config: &BlockConfig, _resolver: &Resolver<'_>) -> HandlerResult {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(BlockOutput::new(Value::Null))
    }
}

#[tokio::test(start_paused = true)]
async fn test_block_timeout() {
    let mut registry =
        HandlerRegistry::new(Arc::new(MemoryDatastore::new()), &Config::default()).unwrap();
    registry.register(Arc::new(Slow));
    let engine = Engine::with_settings(
        registry,
        EngineSettings {
            block_timeout_seconds: 1,
            ..Default::default()
        },
    );

    let wf = workflow(
        vec![
            Block::new("slow", BlockKind::Transform, json!({})),
            Block::new("out", BlockKind::Respond, json!({})),
        ],
        vec![("slow", "out")],
    );

    let err = engine
        .execute(&wf, json!({}), &HashMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.block_id(), Some("slow"));
    assert_eq!(err.block_error_kind(), Some(BlockErrorKind::Timeout));
    assert_eq!(err.http_status(), 504);
}

#[tokio::test]
async fn test_yaml_document_with_legacy_kinds() {
    let yaml = r#"
name: greet
status: deployed
blocks:
  - id: in
    type: input
    label: Request
    config:
      schema:
        name: string
  - id: shape
    type: transform
    config:
      operations:
        - { type: template, field: greeting, value: "Hello {{request_data.name}}" }
        - { type: delete, field: name }
  - id: out
    type: output
    config:
      status_code: 201
      headers: { X-Greeting: "{{shape.greeting}}" }
      body: "{{shape}}"
connections:
  - { source: in, target: shape }
  - { source: shape, target: out }
"#;

    let wf = parse_workflow(yaml).unwrap();
    assert!(wf.is_deployed());

    let response = engine()
        .execute(&wf, json!({"name": "Ann"}), &HashMap::new())
        .await
        .unwrap();
    assert_eq!(response.status_code, 201);
    assert_eq!(response.body, json!({"greeting": "Hello Ann"}));
    assert_eq!(
        response.headers.get("X-Greeting").map(String::as_str),
        Some("Hello Ann")
    );
}

#[tokio::test]
async fn test_invalid_config_is_graph_error() {
    let wf = workflow(
        vec![
            Block::new(
                "db",
                BlockKind::DatastoreQuery,
                json!({"collection": "users", "operation": "upsert"}),
            ),
            Block::new("out", BlockKind::Respond, json!({})),
        ],
        vec![("db", "out")],
    );

    let err = engine()
        .execute(&wf, json!({}), &HashMap::new())
        .await
        .unwrap_err();
    match err {
        EngineError::Graph(graph) => {
            assert_eq!(graph.kind, GraphErrorKind::InvalidConfig);
            assert_eq!(graph.block_id.as_deref(), Some("db"));
        }
        other => panic!("expected graph error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_invocations_are_isolated() {
    let engine = engine();
    let wf = gate();

    let mut handles = Vec::new();
    for age in 0..20 {
        let engine = engine.clone();
        let wf = wf.clone();
        handles.push(tokio::spawn(async move {
            let response = engine
                .execute(&wf, json!({ "age": age }), &HashMap::new())
                .await
                .unwrap();
            (age, response.body["verdict"].clone())
        }));
    }

    for handle in handles {
        let (age, verdict) = handle.await.unwrap();
        let expected = if age >= 18 { "adult" } else { "minor" };
        assert_eq!(verdict, expected);
    }
}
