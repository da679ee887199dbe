//! End-to-end runs: map-reduce, dynamic interrupts, state edits, memory,
//! streaming and an agent loop with tools.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use stepgraph_core::interrupt::interrupt;
use stepgraph_core::llm::model_node;
use stepgraph_core::messages::{messages_from_value, Message, MessageRole, ToolCall};
use stepgraph_core::{
    tools_condition, CancelFlag, CheckpointConfig, CompileOptions, ConditionalEdgeResult,
    FileCheckpointSaver, GraphError, InMemoryCheckpointSaver, InMemoryStore, InterruptWhen, Reducer, RunStatus,
    ScriptedChatModel, Send, StateGraph, StateSchema, Store, StreamMode, Tool, ToolNode, END,
    START,
};

fn checkpointed() -> CompileOptions {
    CompileOptions::new().with_checkpointer(Arc::new(InMemoryCheckpointSaver::new()))
}

#[tokio::test]
async fn test_map_reduce_with_send() {
    let schema = StateSchema::new()
        .field("subjects", Reducer::Overwrite)
        .field("jokes", Reducer::Append);
    let mut graph = StateGraph::new(schema);
    graph.add_node("generate_joke", |input| {
        Box::pin(async move {
            let subject = input["subject"].as_str().unwrap_or_default().to_string();
            Ok(json!({"jokes": [format!("a joke about {}", subject)]}))
        })
    });
    graph.add_node("best_joke", |state| {
        Box::pin(async move {
            let count = state["jokes"].as_array().map_or(0, Vec::len);
            Ok(json!({"count": count}))
        })
    });
    graph.add_conditional_edges(
        START,
        |state: &Value| {
            let sends: Vec<Send> = state["subjects"]
                .as_array()
                .into_iter()
                .flatten()
                .map(|subject| Send::new("generate_joke", json!({"subject": subject})))
                .collect();
            Ok(ConditionalEdgeResult::from(sends))
        },
        None,
    );
    graph
        .add_edge("generate_joke", "best_joke")
        .add_edge("best_joke", END);

    let outcome = graph
        .compile()
        .unwrap()
        .invoke(json!({"subjects": ["cats", "dogs", "owls"]}))
        .await
        .unwrap();

    assert_eq!(
        outcome.values["jokes"],
        json!(["a joke about cats", "a joke about dogs", "a joke about owls"])
    );
    // The reduce step runs once, after every mapped task
    assert_eq!(outcome.values["count"], 3);
}

#[tokio::test]
async fn test_dynamic_interrupt_edit_then_resume() {
    let schema = StateSchema::new().field("log", Reducer::Append);
    let mut graph = StateGraph::new(schema);
    graph.add_node("draft", |_| Box::pin(async { Ok(json!({"log": ["draft"]})) }));
    graph.add_node("review", |state| {
        Box::pin(async move {
            match state.get("approved").and_then(Value::as_bool) {
                Some(true) => Ok(json!({"log": ["review"]})),
                _ => Err(interrupt("needs approval")),
            }
        })
    });
    graph
        .add_edge(START, "draft")
        .add_edge("draft", "review")
        .add_edge("review", END);
    let app = graph.compile_with(checkpointed()).unwrap();
    let config = CheckpointConfig::for_thread("review");

    let paused = app.invoke_with_config(Some(json!({})), &config).await.unwrap();
    assert_eq!(paused.status, RunStatus::Interrupted);
    let pause = paused.interrupt().unwrap();
    assert_eq!(pause.node, "review");
    assert_eq!(pause.when, InterruptWhen::Dynamic);
    assert_eq!(pause.reason, "needs approval");
    assert_eq!(paused.next, vec!["review".to_string()]);

    // Continuing without an edit pauses again
    let again = app.resume(&config).await.unwrap();
    assert!(again.is_interrupted());

    app.update_state(&config, json!({"approved": true}), None).await.unwrap();
    let done = app.resume(&config).await.unwrap();
    assert!(done.is_completed());
    assert_eq!(done.values["log"], json!(["draft", "review"]));
}

#[tokio::test]
async fn test_completed_siblings_commit_when_one_pauses() {
    let schema = StateSchema::new().field("log", Reducer::Append);
    let mut graph = StateGraph::new(schema);
    graph.add_node("fan", |_| Box::pin(async { Ok(Value::Null) }));
    graph.add_node("fast", |_| Box::pin(async { Ok(json!({"log": ["fast"]})) }));
    graph.add_node("ask", |state| {
        Box::pin(async move {
            if state.get("answer").is_some() {
                Ok(json!({"log": ["ask"]}))
            } else {
                Err(interrupt("what next?"))
            }
        })
    });
    graph.add_node("join", |_| Box::pin(async { Ok(json!({"log": ["join"]})) }));
    graph
        .add_edge(START, "fan")
        .add_edge("fan", "fast")
        .add_edge("fan", "ask")
        .add_edge("fast", "join")
        .add_edge("ask", "join")
        .add_edge("join", END);
    let app = graph.compile_with(checkpointed()).unwrap();
    let config = CheckpointConfig::for_thread("siblings");

    let paused = app.invoke_with_config(Some(json!({})), &config).await.unwrap();
    assert!(paused.is_interrupted());
    assert_eq!(paused.values["log"], json!(["fast"]));
    assert_eq!(paused.next, vec!["ask".to_string()]);

    app.update_state(&config, json!({"answer": 42}), None).await.unwrap();
    let done = app.resume(&config).await.unwrap();
    // `fast` is not repeated; `join` runs after `ask`
    assert_eq!(done.values["log"], json!(["fast", "ask", "join"]));
}

#[tokio::test]
async fn test_dynamic_interrupt_wins_over_interrupt_after() {
    let mut graph = StateGraph::new(StateSchema::new());
    graph.add_node("gate", |_| Box::pin(async { Err(interrupt("stop here")) }));
    graph.add_edge(START, "gate").add_edge("gate", END);
    let app = graph
        .compile_with(checkpointed().with_interrupt_after(["gate"]))
        .unwrap();

    let outcome = app
        .invoke_with_config(Some(json!({})), &CheckpointConfig::for_thread("t"))
        .await
        .unwrap();
    assert_eq!(outcome.interrupts.len(), 1);
    assert_eq!(outcome.interrupts[0].when, InterruptWhen::Dynamic);
}

#[tokio::test]
async fn test_interrupt_after_and_update_as_node() {
    let schema = StateSchema::new().field("log", Reducer::Append);
    let mut graph = StateGraph::new(schema);
    for name in ["plan", "act", "report"] {
        graph.add_node(name, move |_| Box::pin(async move { Ok(json!({"log": [name]})) }));
    }
    graph
        .add_edge(START, "plan")
        .add_edge("plan", "act")
        .add_edge("act", "report")
        .add_edge("report", END);
    let app = graph
        .compile_with(checkpointed().with_interrupt_after(["plan"]))
        .unwrap();
    let config = CheckpointConfig::for_thread("as-node");

    let paused = app.invoke_with_config(Some(json!({})), &config).await.unwrap();
    assert_eq!(paused.interrupt().unwrap().when, InterruptWhen::After);
    assert_eq!(paused.next, vec!["act".to_string()]);

    // Pretend `act` already ran: the next step is `report`
    app.update_state(&config, json!({"log": ["manual act"]}), Some("act"))
        .await
        .unwrap();
    let snapshot = app.get_state(&config).await.unwrap().unwrap();
    assert_eq!(snapshot.next, vec!["report".to_string()]);
    assert_eq!(snapshot.metadata.writes, Some(json!({"act": {"log": ["manual act"]}})));

    let done = app.resume(&config).await.unwrap();
    assert_eq!(done.values["log"], json!(["plan", "manual act", "report"]));

    let err = app
        .update_state(&config, json!({}), Some("nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::Validation(_)));
}

#[tokio::test]
async fn test_breakpoint_planned_by_update_as_node_still_stops() {
    let schema = StateSchema::new().field("log", Reducer::Append);
    let mut graph = StateGraph::new(schema);
    for name in ["plan", "act", "report"] {
        graph.add_node(name, move |_| Box::pin(async move { Ok(json!({"log": [name]})) }));
    }
    graph
        .add_edge(START, "plan")
        .add_edge("plan", "act")
        .add_edge("act", "report")
        .add_edge("report", END);
    let app = graph
        .compile_with(checkpointed().with_interrupt_before(["act", "report"]))
        .unwrap();
    let config = CheckpointConfig::for_thread("edit-then-continue");

    let paused = app.invoke_with_config(Some(json!({})), &config).await.unwrap();
    assert_eq!(paused.next, vec!["act".to_string()]);

    // A plain edit keeps the pause on `act` so it is not asked for twice
    app.update_state(&config, json!({"approved": true}), None)
        .await
        .unwrap();
    let snapshot = app.get_state(&config).await.unwrap().unwrap();
    assert_eq!(snapshot.interrupts.len(), 1);
    assert_eq!(snapshot.interrupts[0].node, "act");

    app.update_state(&config, json!({"log": ["manual act"]}), Some("act"))
        .await
        .unwrap();
    let snapshot = app.get_state(&config).await.unwrap().unwrap();
    assert_eq!(snapshot.next, vec!["report".to_string()]);
    assert!(snapshot.interrupts.is_empty());

    let stopped = app.resume(&config).await.unwrap();
    assert_eq!(stopped.status, RunStatus::Interrupted);
    assert_eq!(stopped.next, vec!["report".to_string()]);
    assert_eq!(stopped.interrupt().unwrap().when, InterruptWhen::Before);
    assert_eq!(stopped.values["log"], json!(["plan", "manual act"]));

    let done = app.resume(&config).await.unwrap();
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.values["log"], json!(["plan", "manual act", "report"]));
}

#[tokio::test]
async fn test_interrupt_after_of_sibling_fires_with_dynamic_pause() {
    let schema = StateSchema::new().field("log", Reducer::Append);
    let mut graph = StateGraph::new(schema);
    let asked = Arc::new(AtomicUsize::new(0));
    let calls = asked.clone();
    graph.add_node("b", move |_| {
        let first = calls.fetch_add(1, Ordering::SeqCst) == 0;
        Box::pin(async move {
            if first {
                Err(interrupt("need input"))
            } else {
                Ok(json!({"log": ["b"]}))
            }
        })
    });
    graph.add_node("c", |_| Box::pin(async { Ok(json!({"log": ["c"]})) }));
    graph.add_node("d", |_| Box::pin(async { Ok(json!({"log": ["d"]})) }));
    graph
        .add_edge(START, "b")
        .add_edge(START, "c")
        .add_edge("b", END)
        .add_edge("c", "d")
        .add_edge("d", END);
    let app = graph
        .compile_with(checkpointed().with_interrupt_after(["c"]))
        .unwrap();
    let config = CheckpointConfig::for_thread("after-beside-dynamic");

    let paused = app.invoke_with_config(Some(json!({})), &config).await.unwrap();
    let kinds: Vec<(&str, InterruptWhen)> = paused
        .interrupts
        .iter()
        .map(|pending| (pending.node.as_str(), pending.when))
        .collect();
    assert_eq!(
        kinds,
        vec![("b", InterruptWhen::Dynamic), ("c", InterruptWhen::After)]
    );
    assert_eq!(paused.values["log"], json!(["c"]));
    assert_eq!(paused.next, vec!["b".to_string()]);

    let done = app.resume(&config).await.unwrap();
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.values["log"], json!(["c", "b", "d"]));
    assert_eq!(asked.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_replay_from_past_checkpoint() {
    let schema = StateSchema::new().field("count", Reducer::Sum);
    let mut graph = StateGraph::new(schema);
    graph.add_node("inc", |_| Box::pin(async { Ok(json!({"count": 1})) }));
    graph.add_node("double", |state| {
        Box::pin(async move {
            let count = state["count"].as_i64().unwrap_or(0);
            Ok(json!({"count": count}))
        })
    });
    graph
        .add_edge(START, "inc")
        .add_edge("inc", "double")
        .add_edge("double", END);
    let app = graph.compile_with(checkpointed()).unwrap();
    let config = CheckpointConfig::for_thread("replay");

    let first = app.invoke_with_config(Some(json!({"count": 1})), &config).await.unwrap();
    assert_eq!(first.values["count"], 4);

    use futures::StreamExt;
    let before_double = app
        .get_state_history(&config, None, None, None)
        .await
        .unwrap()
        .map(|snapshot| snapshot.unwrap())
        .filter(|snapshot| futures::future::ready(snapshot.next == vec!["double".to_string()]))
        .next()
        .await
        .unwrap();

    let replayed = app
        .invoke_with_config(None, &before_double.config)
        .await
        .unwrap();
    assert_eq!(replayed.values["count"], 4);

    // The replay is a new branch; the head moved to it
    let head = app.get_state(&config).await.unwrap().unwrap();
    assert_eq!(head.config.checkpoint_id, replayed.config.checkpoint_id);
}

#[tokio::test]
async fn test_node_failure_keeps_thread_resumable() {
    let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let schema = StateSchema::new().field("log", Reducer::Append);
    let mut graph = StateGraph::new(schema);
    graph.add_node("ok", |_| Box::pin(async { Ok(json!({"log": ["ok"]})) }));
    let counter = attempts.clone();
    graph.add_node("flaky", move |_| {
        let attempt = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Box::pin(async move {
            if attempt == 0 {
                Err(GraphError::custom("upstream timeout"))
            } else {
                Ok(json!({"log": ["flaky"]}))
            }
        })
    });
    graph
        .add_edge(START, "ok")
        .add_edge("ok", "flaky")
        .add_edge("flaky", END);
    let app = graph.compile_with(checkpointed()).unwrap();
    let config = CheckpointConfig::for_thread("flaky");

    let err = app.invoke_with_config(Some(json!({})), &config).await.unwrap_err();
    match err {
        GraphError::NodeFailed { node, source } => {
            assert_eq!(node, "flaky");
            assert_eq!(source.to_string(), "upstream timeout");
        }
        other => panic!("unexpected error: {other}"),
    }

    let state = app.get_state(&config).await.unwrap().unwrap();
    assert_eq!(state.values["log"], json!(["ok"]));
    assert_eq!(state.next, vec!["flaky".to_string()]);

    let done = app.resume(&config).await.unwrap();
    assert_eq!(done.values["log"], json!(["ok", "flaky"]));
}

#[tokio::test]
async fn test_router_error_fails_source_node() {
    let mut graph = StateGraph::new(StateSchema::new());
    graph.add_node("decide", |_| Box::pin(async { Ok(Value::Null) }));
    graph.add_conditional_edges(
        "decide",
        |_: &Value| Err(GraphError::custom("no route")),
        None,
    );
    graph.add_edge(START, "decide");

    let err = graph.compile().unwrap().invoke(json!({})).await.unwrap_err();
    assert!(matches!(err, GraphError::NodeFailed { ref node, .. } if node == "decide"));
}

#[tokio::test]
async fn test_recursion_limit() {
    let schema = StateSchema::new().field("n", Reducer::Sum);
    let mut graph = StateGraph::new(schema);
    graph.add_node("spin", |_| Box::pin(async { Ok(json!({"n": 1})) }));
    graph.add_edge(START, "spin").add_edge("spin", "spin");
    let app = graph.compile().unwrap();

    let err = app.invoke(json!({})).await.unwrap_err();
    assert!(matches!(err, GraphError::RecursionLimit { limit: 25 }));

    let config = CheckpointConfig::new().with_extra("recursion_limit", json!(3));
    let err = app.invoke_with_config(Some(json!({})), &config).await.unwrap_err();
    assert!(matches!(err, GraphError::RecursionLimit { limit: 3 }));

    let config = CheckpointConfig::new().with_extra("recursion_limit", json!("many"));
    let err = app.invoke_with_config(Some(json!({})), &config).await.unwrap_err();
    assert!(matches!(err, GraphError::Configuration(_)));
}

#[tokio::test]
async fn test_cancelled_run_stops_between_supersteps() {
    let cancel = CancelFlag::new();
    let schema = StateSchema::new().field("log", Reducer::Append);
    let mut graph = StateGraph::new(schema);
    let flag = cancel.clone();
    graph.add_node("first", move |_| {
        flag.cancel();
        Box::pin(async { Ok(json!({"log": ["first"]})) })
    });
    graph.add_node("second", |_| Box::pin(async { Ok(json!({"log": ["second"]})) }));
    graph
        .add_edge(START, "first")
        .add_edge("first", "second")
        .add_edge("second", END);
    let app = graph.compile_with(checkpointed()).unwrap();
    let config = CheckpointConfig::for_thread("cancel");

    let outcome = app
        .invoke_cancellable(Some(json!({})), &config, "run-1", cancel)
        .await
        .unwrap();
    assert_eq!(outcome.run_id, "run-1");
    assert!(outcome.is_interrupted());
    assert_eq!(outcome.interrupt().unwrap().when, InterruptWhen::Cancelled);
    assert_eq!(outcome.values["log"], json!(["first"]));

    let done = app.resume(&config).await.unwrap();
    assert_eq!(done.values["log"], json!(["first", "second"]));
}

#[tokio::test]
async fn test_checkpointer_requires_thread() {
    let mut graph = StateGraph::new(StateSchema::new());
    graph.add_node("a", |_| Box::pin(async { Ok(Value::Null) }));
    graph.add_edge(START, "a").add_edge("a", END);
    let app = graph.compile_with(checkpointed()).unwrap();

    assert!(matches!(
        app.invoke(json!({})).await.unwrap_err(),
        GraphError::Configuration(_)
    ));
    assert!(matches!(
        app.invoke_with_config(Some(json!([1, 2])), &CheckpointConfig::for_thread("t"))
            .await
            .unwrap_err(),
        GraphError::Validation(_)
    ));
    assert!(matches!(
        app.resume(&CheckpointConfig::for_thread("empty")).await.unwrap_err(),
        GraphError::Configuration(_)
    ));
}

#[tokio::test]
async fn test_store_shared_across_threads() {
    let store = Arc::new(InMemoryStore::new());
    let mut graph = StateGraph::new(StateSchema::new());
    graph.add_node_with_context("remember", |state, ctx| {
        Box::pin(async move {
            let user = ctx
                .get("user_id")
                .and_then(Value::as_str)
                .unwrap_or("anonymous")
                .to_string();
            let namespace = vec![user, "memories".to_string()];
            let store = ctx.require_store()?;
            if let Some(fact) = state.get("fact") {
                store.put(&namespace, "fact", fact.clone()).await?;
            }
            let known = store
                .get(&namespace, "fact")
                .await?
                .map(|item| item.value)
                .unwrap_or(Value::Null);
            Ok(json!({"known": known}))
        })
    });
    graph.add_edge(START, "remember").add_edge("remember", END);
    let app = graph
        .compile_with(checkpointed().with_store(store.clone()))
        .unwrap();

    let first = CheckpointConfig::for_thread("thread-1").with_extra("user_id", json!("alice"));
    app.invoke_with_config(Some(json!({"fact": "likes tea"})), &first)
        .await
        .unwrap();

    // Another thread of the same user sees the memory
    let second = CheckpointConfig::for_thread("thread-2").with_extra("user_id", json!("alice"));
    let outcome = app.invoke_with_config(Some(json!({})), &second).await.unwrap();
    assert_eq!(outcome.values["known"], "likes tea");

    // Another user does not
    let other = CheckpointConfig::for_thread("thread-3").with_extra("user_id", json!("bob"));
    let outcome = app.invoke_with_config(Some(json!({})), &other).await.unwrap();
    assert_eq!(outcome.values["known"], Value::Null);

    let stored = store
        .get(&["alice".to_string(), "memories".to_string()], "fact")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.value, "likes tea");
}

#[tokio::test]
async fn test_stream_updates_and_values() {
    let schema = StateSchema::new().field("log", Reducer::Append);
    let mut graph = StateGraph::new(schema);
    graph.add_node_with_context("a", |_, ctx| {
        Box::pin(async move {
            ctx.writer().write(json!({"progress": 50}));
            Ok(json!({"log": ["a"]}))
        })
    });
    graph.add_node("b", |_| Box::pin(async { Ok(json!({"log": ["b"]})) }));
    graph.add_edge(START, "a").add_edge("a", "b").add_edge("b", END);
    let app = graph.compile().unwrap();

    let chunks = app
        .stream_collect(
            Some(json!({})),
            &CheckpointConfig::new(),
            vec![StreamMode::Updates, StreamMode::Values, StreamMode::Custom],
        )
        .await
        .unwrap();

    let updates: Vec<&Value> = chunks
        .iter()
        .filter(|chunk| chunk.mode == StreamMode::Updates)
        .map(|chunk| &chunk.data)
        .collect();
    assert_eq!(
        updates,
        vec![&json!({"a": {"log": ["a"]}}), &json!({"b": {"log": ["b"]}})]
    );

    let custom: Vec<_> = chunks
        .iter()
        .filter(|chunk| chunk.mode == StreamMode::Custom)
        .collect();
    assert_eq!(custom.len(), 1);
    assert_eq!(custom[0].node.as_deref(), Some("a"));
    assert_eq!(custom[0].data, json!({"progress": 50}));

    let last_values = chunks
        .iter()
        .rev()
        .find(|chunk| chunk.mode == StreamMode::Values)
        .unwrap();
    assert_eq!(last_values.data["log"], json!(["a", "b"]));
}

#[tokio::test]
async fn test_stream_reports_failure_last() {
    let mut graph = StateGraph::new(StateSchema::new());
    graph.add_node("boom", |_| Box::pin(async { Err(GraphError::custom("boom")) }));
    graph.add_edge(START, "boom").add_edge("boom", END);
    let app = graph.compile().unwrap();

    let err = app
        .stream_collect(Some(json!({})), &CheckpointConfig::new(), vec![StreamMode::Values])
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::NodeFailed { .. }));
}

#[tokio::test]
async fn test_agent_loop_with_tools() {
    let multiply = Tool::new(
        "multiply",
        "Multiply a and b",
        json!({"type": "object", "required": ["a", "b"]}),
        |args, _runtime| {
            Box::pin(async move {
                let a = args["a"].as_f64().unwrap_or(0.0);
                let b = args["b"].as_f64().unwrap_or(0.0);
                Ok(json!(a * b))
            })
        },
    );

    let model = Arc::new(ScriptedChatModel::new(vec![
        Message::ai("").with_tool_calls(vec![ToolCall::new(
            "call_1",
            "multiply",
            json!({"a": 6, "b": 7}),
        )]),
        Message::ai("6 times 7 is 42"),
    ]));

    let mut graph = StateGraph::new(StateSchema::messages());
    graph.add_node_with_context("agent", model_node(model.clone(), "messages"));
    graph.add_tool_node("tools", ToolNode::from_tools([multiply]));
    graph
        .add_edge(START, "agent")
        .add_conditional_edges("agent", tools_condition, None)
        .add_edge("tools", "agent");
    let app = graph.compile().unwrap();

    let outcome = app
        .invoke(json!({"messages": [Message::human("what is 6 times 7?").to_value()]}))
        .await
        .unwrap();

    let messages = messages_from_value(&outcome.values["messages"]).unwrap();
    let roles: Vec<MessageRole> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![MessageRole::Human, MessageRole::Ai, MessageRole::Tool, MessageRole::Ai]
    );
    assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(messages[2].content, "42.0");
    assert_eq!(messages[3].content, "6 times 7 is 42");

    // The second model call saw the tool result
    let calls = model.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].len(), 3);
    assert_eq!(model.remaining(), 0);
}

#[tokio::test]
async fn test_router_path_map_labels() {
    let mut graph = StateGraph::new(StateSchema::new());
    graph.add_node("classify", |_| Box::pin(async { Ok(json!({"kind": "question"})) }));
    graph.add_node("answer", |_| Box::pin(async { Ok(json!({"handled_by": "answer"})) }));
    graph.add_node("file", |_| Box::pin(async { Ok(json!({"handled_by": "file"})) }));
    let path_map = HashMap::from([
        ("question".to_string(), "answer".to_string()),
        ("report".to_string(), "file".to_string()),
    ]);
    graph
        .add_edge(START, "classify")
        .add_conditional_edges(
            "classify",
            |state: &Value| {
                Ok(ConditionalEdgeResult::from(
                    state["kind"].as_str().unwrap_or("report"),
                ))
            },
            Some(path_map),
        )
        .add_edge("answer", END)
        .add_edge("file", END);

    let outcome = graph.compile().unwrap().invoke(json!({})).await.unwrap();
    assert_eq!(outcome.values["handled_by"], "answer");
}

fn review_pipeline(saver: FileCheckpointSaver) -> stepgraph_core::CompiledGraph {
    let schema = StateSchema::new().field("log", Reducer::Append);
    let mut graph = StateGraph::new(schema);
    for name in ["draft", "review", "publish"] {
        graph.add_node(name, move |_| Box::pin(async move { Ok(json!({"log": [name]})) }));
    }
    graph
        .add_edge(START, "draft")
        .add_edge("draft", "review")
        .add_edge("review", "publish")
        .add_edge("publish", END);
    graph
        .compile_with(
            CompileOptions::new()
                .with_checkpointer(Arc::new(saver))
                .with_interrupt_before(["publish"]),
        )
        .unwrap()
}

#[tokio::test]
async fn test_thread_resumes_after_saver_is_reopened() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = CheckpointConfig::for_thread("durable");

    let app = review_pipeline(FileCheckpointSaver::open(dir.path()).await.unwrap());
    let paused = app.invoke_with_config(Some(json!({})), &config).await.unwrap();
    assert_eq!(paused.next, vec!["publish".to_string()]);
    drop(app);

    let app = review_pipeline(FileCheckpointSaver::open(dir.path()).await.unwrap());
    let snapshot = app.get_state(&config).await.unwrap().unwrap();
    assert_eq!(snapshot.values["log"], json!(["draft", "review"]));
    assert_eq!(snapshot.next, vec!["publish".to_string()]);

    let done = app.resume(&config).await.unwrap();
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.values["log"], json!(["draft", "review", "publish"]));

    use futures::StreamExt;
    let history: Vec<_> = app
        .get_state_history(&config, None, None, None)
        .await
        .unwrap()
        .collect()
        .await;
    // input, draft, review, publish
    assert_eq!(history.len(), 4);
}
