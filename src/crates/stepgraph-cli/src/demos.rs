//! Demo graphs behind each subcommand

use anyhow::{bail, Context};
use futures::StreamExt;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use stepgraph_core::interrupt::interrupt;
use stepgraph_core::llm::model_node;
use stepgraph_core::messages::{
    filter_messages, messages_from_value, trim_messages, Message, MessageFilter, MessageRole,
    RemoveMessage, ToolCall, TrimOptions,
};
use stepgraph_core::{
    tools_condition, CheckpointConfig, CompileOptions, CompiledGraph, ConditionalEdgeResult,
    EngineSettings, FileCheckpointSaver, GraphError, InMemoryCheckpointSaver, InMemoryStore,
    MultitaskStrategy, Reducer, RunManager, RunOutcome, ScriptedChatModel, Send, StateGraph,
    StateSchema, Store, StreamMode, Tool, ToolNode, END, START,
};

fn options(settings: &EngineSettings) -> CompileOptions {
    CompileOptions::new().with_settings(settings.clone())
}

fn checkpointed(settings: &EngineSettings) -> CompileOptions {
    options(settings).with_checkpointer(Arc::new(InMemoryCheckpointSaver::new()))
}

fn print_outcome(label: &str, outcome: &RunOutcome) -> anyhow::Result<()> {
    println!(
        "{label}: {:?}, next = {:?}\n{}",
        outcome.status,
        outcome.next,
        serde_json::to_string_pretty(&outcome.values)?
    );
    for pending in &outcome.interrupts {
        println!("  interrupt {:?} at '{}': {}", pending.when, pending.node, pending.reason);
    }
    Ok(())
}

fn print_messages(values: &Value) -> anyhow::Result<()> {
    for message in messages_from_value(&values["messages"])? {
        println!("  [{:?}] {}", message.role, message.content);
    }
    Ok(())
}

fn multiply_tool() -> Tool {
    Tool::new(
        "multiply",
        "Multiply a and b",
        json!({
            "type": "object",
            "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
            "required": ["a", "b"]
        }),
        |args, _runtime| {
            Box::pin(async move {
                let a = args["a"].as_f64().unwrap_or_default();
                let b = args["b"].as_f64().unwrap_or_default();
                Ok(json!(a * b))
            })
        },
    )
}

/// Model that asks for one multiplication, then answers
fn arithmetic_model() -> Arc<ScriptedChatModel> {
    Arc::new(ScriptedChatModel::new(vec![
        Message::ai("").with_tool_calls(vec![ToolCall::new(
            "call_1",
            "multiply",
            json!({"a": 3, "b": 4}),
        )]),
        Message::ai("3 multiplied by 4 is 12."),
    ]))
}

fn agent_graph(model: Arc<ScriptedChatModel>, options: CompileOptions) -> anyhow::Result<CompiledGraph> {
    let mut graph = StateGraph::new(StateSchema::messages());
    graph.add_node_with_context("assistant", model_node(model, "messages"));
    graph.add_tool_node("tools", ToolNode::from_tools([multiply_tool()]));
    graph
        .add_edge(START, "assistant")
        .add_conditional_edges("assistant", tools_condition, None)
        .add_edge("tools", "assistant");
    Ok(graph.compile_with(options)?)
}

pub async fn simple(settings: &EngineSettings, mood: &str) -> anyhow::Result<()> {
    let mut graph = StateGraph::new(StateSchema::new());
    let append = |suffix: &'static str| {
        move |state: Value| -> stepgraph_core::NodeFuture {
            Box::pin(async move {
                let text = state["graph_state"].as_str().unwrap_or_default();
                Ok(json!({"graph_state": format!("{}{}", text, suffix)}))
            })
        }
    };
    graph.add_node("node_1", append(" I am"));
    graph.add_node("node_2", append(" happy!"));
    graph.add_node("node_3", append(" sad!"));
    graph
        .add_edge(START, "node_1")
        .add_conditional_edges(
            "node_1",
            |state: &Value| {
                let target = match state["mood"].as_str() {
                    Some("sad") => "node_3",
                    _ => "node_2",
                };
                Ok(ConditionalEdgeResult::from(target))
            },
            None,
        )
        .add_edge("node_2", END)
        .add_edge("node_3", END);

    let app = graph.compile_with(options(settings))?;
    let outcome = app.invoke(json!({"graph_state": "Hi, this is Lance.", "mood": mood})).await?;
    print_outcome("simple", &outcome)
}

fn fan_out_graph(reducer: Reducer, settings: &EngineSettings) -> anyhow::Result<CompiledGraph> {
    let mut graph = StateGraph::new(StateSchema::new().field("foo", reducer));
    graph.add_node("node_1", |_| Box::pin(async { Ok(json!({"foo": [1]})) }));
    graph.add_node("node_2", |_| Box::pin(async { Ok(json!({"foo": [2]})) }));
    graph.add_node("node_3", |_| Box::pin(async { Ok(json!({"foo": [3]})) }));
    graph
        .add_edge(START, "node_1")
        .add_edge("node_1", "node_2")
        .add_edge("node_1", "node_3")
        .add_edge("node_2", END)
        .add_edge("node_3", END);
    Ok(graph.compile_with(options(settings))?)
}

pub async fn reducers(settings: &EngineSettings) -> anyhow::Result<()> {
    match fan_out_graph(Reducer::Overwrite, settings)?.invoke(json!({"foo": [0]})).await {
        Err(err @ GraphError::InvalidUpdate { .. }) => println!("overwrite: {}", err),
        Err(err) => return Err(err.into()),
        Ok(_) => bail!("two writers of an overwrite field must fail"),
    }

    let outcome = fan_out_graph(Reducer::Append, settings)?
        .invoke(json!({"foo": [0]}))
        .await?;
    print_outcome("append", &outcome)
}

pub async fn parallel(settings: &EngineSettings) -> anyhow::Result<()> {
    let mut graph = StateGraph::new(StateSchema::new().field("state", Reducer::Append));
    for name in ["a", "b", "b2", "c", "d"] {
        graph.add_node(name, move |_| {
            Box::pin(async move { Ok(json!({"state": [format!("I'm {}", name.to_uppercase())]})) })
        });
    }
    graph
        .add_edge(START, "a")
        .add_edge("a", "b")
        .add_edge("a", "c")
        .add_edge("b", "b2")
        .add_join_edge(["b2", "c"], "d")
        .add_edge("d", END);

    let outcome = graph
        .compile_with(options(settings))?
        .invoke(json!({"state": []}))
        .await?;
    print_outcome("parallel", &outcome)
}

pub async fn map_reduce(settings: &EngineSettings, subjects: Vec<String>) -> anyhow::Result<()> {
    let schema = StateSchema::new()
        .field("subjects", Reducer::Overwrite)
        .field("jokes", Reducer::Append);
    let mut graph = StateGraph::new(schema);
    graph.add_node("generate_joke", |input| {
        Box::pin(async move {
            let subject = input["subject"].as_str().unwrap_or("nothing").to_string();
            Ok(json!({"jokes": [format!("Why did the {} cross the road? To get checkpointed.", subject)]}))
        })
    });
    graph.add_node("best_joke", |state| {
        Box::pin(async move {
            let best = state["jokes"]
                .as_array()
                .and_then(|jokes| jokes.iter().filter_map(Value::as_str).min_by_key(|joke| joke.len()))
                .unwrap_or_default()
                .to_string();
            Ok(json!({"best_selected_joke": best}))
        })
    });
    graph
        .add_conditional_edges(
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
        )
        .add_edge("generate_joke", "best_joke")
        .add_edge("best_joke", END);

    let outcome = graph
        .compile_with(options(settings))?
        .invoke(json!({"subjects": subjects}))
        .await?;
    print_outcome("map-reduce", &outcome)
}

pub async fn breakpoints(settings: &EngineSettings) -> anyhow::Result<()> {
    let app = agent_graph(
        arithmetic_model(),
        checkpointed(settings).with_interrupt_before(["tools"]),
    )?;
    let config = CheckpointConfig::for_thread("breakpoints");

    let input = json!({"messages": [Message::human("Multiply 3 and 4").to_value()]});
    let paused = app.invoke_with_config(Some(input), &config).await?;
    print_outcome("paused before tools", &paused)?;

    // Approve by continuing with no new input
    let done = app.resume(&config).await?;
    println!("approved:");
    print_messages(&done.values)
}

pub async fn dynamic_breakpoints(settings: &EngineSettings, input: &str) -> anyhow::Result<()> {
    let mut graph = StateGraph::new(StateSchema::new());
    graph.add_node("step_1", |_| Box::pin(async { Ok(Value::Null) }));
    graph.add_node("step_2", |state| {
        Box::pin(async move {
            let text = state["input"].as_str().unwrap_or_default();
            if text.len() > 5 {
                return Err(interrupt(format!(
                    "Received input that is longer than 5 characters: {}",
                    text
                )));
            }
            Ok(Value::Null)
        })
    });
    graph.add_node("step_3", |_| Box::pin(async { Ok(Value::Null) }));
    graph
        .add_edge(START, "step_1")
        .add_edge("step_1", "step_2")
        .add_edge("step_2", "step_3")
        .add_edge("step_3", END);
    let app = graph.compile_with(checkpointed(settings))?;
    let config = CheckpointConfig::for_thread("dynamic");

    let outcome = app
        .invoke_with_config(Some(json!({"input": input})), &config)
        .await?;
    print_outcome("first run", &outcome)?;
    if !outcome.is_interrupted() {
        return Ok(());
    }

    let again = app.resume(&config).await?;
    print_outcome("resumed without an edit", &again)?;

    app.update_state(&config, json!({"input": "hi"}), None).await?;
    let done = app.resume(&config).await?;
    print_outcome("resumed after the edit", &done)
}

pub async fn time_travel(settings: &EngineSettings) -> anyhow::Result<()> {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let app = agent_graph(
        arithmetic_model(),
        options(settings).with_checkpointer(saver.clone()),
    )?;
    let config = CheckpointConfig::for_thread("time-travel");
    let input = json!({"messages": [Message::human("Multiply 3 and 4").to_value()]});
    app.invoke_with_config(Some(input), &config).await?;

    let history: Vec<_> = app
        .get_state_history(&config, None, None, None)
        .await?
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<_, _>>()?;
    println!("history (newest first):");
    for snapshot in &history {
        println!(
            "  {} step {:?} source {:?} next {:?}",
            snapshot.config.checkpoint_id.as_deref().unwrap_or("-"),
            snapshot.metadata.step,
            snapshot.metadata.source,
            snapshot.next
        );
    }

    // Replay from the input checkpoint; the scripted model needs a fresh
    // script, so the replay runs through a second graph on the same saver
    let to_replay = history.last().context("thread has no history")?;
    let replay_app = agent_graph(arithmetic_model(), options(settings).with_checkpointer(saver))?;
    let replayed = replay_app.invoke_with_config(None, &to_replay.config).await?;
    print_outcome("replayed", &replayed)?;

    // Fork: rewrite the human message in place, keeping its id
    let first_message = messages_from_value(&to_replay.values["messages"])?
        .into_iter()
        .next()
        .context("input checkpoint has no message")?;
    let edited = Message::human("Multiply 5 and 3")
        .with_id(first_message.id.clone().unwrap_or_default());
    let fork = app
        .update_state(&to_replay.config, json!({"messages": [edited.to_value()]}), None)
        .await?;
    let forked = app.get_state(&fork).await?.context("fork not found")?;
    println!(
        "forked {} from {}:",
        fork.checkpoint_id.as_deref().unwrap_or("-"),
        forked
            .parent_config
            .and_then(|parent| parent.checkpoint_id)
            .unwrap_or_default()
    );
    print_messages(&forked.values)?;

    let original = app
        .get_state(&history[0].config)
        .await?
        .context("original head is gone")?;
    println!("original branch is still there:");
    print_messages(&original.values)
}

pub async fn memory(settings: &EngineSettings, user: &str) -> anyhow::Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let mut graph = StateGraph::new(StateSchema::messages());
    graph.add_node_with_context("call_model", |state, ctx| {
        Box::pin(async move {
            let user = ctx
                .get("user_id")
                .and_then(Value::as_str)
                .unwrap_or("anonymous")
                .to_string();
            let namespace = vec!["memory".to_string(), user];
            let store = ctx.require_store()?;
            let known = store
                .get(&namespace, "user_memory")
                .await?
                .map(|item| item.value["memory"].as_str().unwrap_or_default().to_string());

            let reply = match known {
                Some(memory) => format!("Welcome back! I remember: {}", memory),
                None => "Nice to meet you. I don't know anything about you yet.".to_string(),
            };
            let last = messages_from_value(&state["messages"])?
                .into_iter()
                .rev()
                .find(|message| message.role == MessageRole::Human)
                .map(|message| message.content)
                .unwrap_or_default();
            store
                .put(&namespace, "user_memory", json!({"memory": last}))
                .await?;
            Ok(json!({"messages": [Message::ai(reply).to_value()]}))
        })
    });
    graph
        .add_edge(START, "call_model")
        .add_edge("call_model", END);
    let app = graph.compile_with(checkpointed(settings).with_store(store.clone()))?;

    let first = CheckpointConfig::for_thread("memory-1").with_extra("user_id", json!(user));
    let outcome = app
        .invoke_with_config(
            Some(json!({"messages": [Message::human("I like to bike around San Francisco").to_value()]})),
            &first,
        )
        .await?;
    print_messages(&outcome.values)?;

    let second = CheckpointConfig::for_thread("memory-2").with_extra("user_id", json!(user));
    let outcome = app
        .invoke_with_config(
            Some(json!({"messages": [Message::human("What bakeries do you recommend?").to_value()]})),
            &second,
        )
        .await?;
    print_messages(&outcome.values)?;

    let namespaces = store.list_namespaces(&[], None).await?;
    println!("store namespaces: {:?}", namespaces);
    Ok(())
}

pub async fn double_texting(settings: &EngineSettings, strategy: MultitaskStrategy) -> anyhow::Result<()> {
    let mut graph = StateGraph::new(StateSchema::messages());
    graph.add_node("plan", |_| {
        Box::pin(async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(json!({"messages": [Message::ai("planning...").to_value()]}))
        })
    });
    graph.add_node("answer", |state| {
        Box::pin(async move {
            let asked = messages_from_value(&state["messages"])?
                .into_iter()
                .rev()
                .find(|message| message.role == MessageRole::Human)
                .map(|message| message.content)
                .unwrap_or_default();
            Ok(json!({"messages": [Message::ai(format!("done: {}", asked)).to_value()]}))
        })
    });
    graph
        .add_edge(START, "plan")
        .add_edge("plan", "answer")
        .add_edge("answer", END);
    let app = Arc::new(graph.compile_with(checkpointed(settings))?);
    let runs = RunManager::new(app.clone());
    let config = CheckpointConfig::for_thread("double-texting");

    let first = runs.submit(
        &config,
        Some(json!({"messages": [Message::human("Summarize my todos due tomorrow").to_value()]})),
        MultitaskStrategy::Enqueue,
    )?;
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let second = runs.submit(
        &config,
        Some(json!({"messages": [Message::human("Never mind, add a todo instead").to_value()]})),
        strategy,
    );

    match first.wait().await {
        Ok(outcome) => println!("first run: {:?}", outcome.status),
        Err(err) => println!("first run: {}", err),
    }
    match second {
        Ok(handle) => {
            let outcome = handle.wait().await?;
            println!("second run: {:?}", outcome.status);
        }
        Err(err) => println!("second run refused: {}", err),
    }

    if let Some(state) = app.get_state(&config).await? {
        println!("thread state:");
        print_messages(&state.values)?;
    }
    for record in runs.list_runs("double-texting") {
        println!("  run {} {:?}", record.run_id, record.status);
    }
    Ok(())
}

pub async fn stream(settings: &EngineSettings) -> anyhow::Result<()> {
    let app = agent_graph(arithmetic_model(), options(settings))?;
    let input = json!({"messages": [Message::human("Multiply 3 and 4").to_value()]});

    let mut chunks = app.stream(
        Some(input),
        &CheckpointConfig::new(),
        vec![StreamMode::Updates, StreamMode::Messages],
    );
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        match chunk.mode {
            StreamMode::Messages => println!(
                "token from {}: {:?}",
                chunk.node.as_deref().unwrap_or("-"),
                chunk.data["content"]
            ),
            _ => println!("update: {}", chunk.data),
        }
    }
    Ok(())
}

pub async fn subgraph(settings: &EngineSettings) -> anyhow::Result<()> {
    let child_schema = StateSchema::new()
        .with_input_keys(["logs"])
        .with_output_keys(["summary"]);
    let mut child = StateGraph::new(child_schema);
    child.add_node("summarize", |state| {
        Box::pin(async move {
            let count = state["logs"].as_array().map_or(0, Vec::len);
            Ok(json!({"summary": format!("{} log entries reviewed", count)}))
        })
    });
    child
        .add_edge(START, "summarize")
        .add_edge("summarize", END);
    let child = child.compile_with(options(settings))?;

    let mut parent = StateGraph::new(StateSchema::new());
    parent.add_node("collect", |_| {
        Box::pin(async { Ok(json!({"logs": ["login failed", "timeout", "retry ok"]})) })
    });
    parent.add_subgraph("summary_agent", child);
    parent
        .add_edge(START, "collect")
        .add_edge("collect", "summary_agent")
        .add_edge("summary_agent", END);

    let outcome = parent
        .compile_with(options(settings))?
        .invoke(json!({}))
        .await?;
    print_outcome("subgraph", &outcome)
}

/// Conversations longer than this get summarized
const SUMMARY_THRESHOLD: usize = 6;

/// Chatbot that folds old messages into a running summary, keeping the
/// last two messages verbatim
fn summarizing_chatbot(options: CompileOptions) -> anyhow::Result<CompiledGraph> {
    let schema = StateSchema::messages().field("summary", Reducer::Overwrite);
    let mut graph = StateGraph::new(schema);
    graph.add_node("conversation", |state| {
        Box::pin(async move {
            let messages = messages_from_value(&state["messages"])?;
            let asked = messages
                .iter()
                .rev()
                .find(|message| message.role == MessageRole::Human)
                .map(|message| message.content.clone())
                .unwrap_or_default();
            let reply = match state["summary"].as_str() {
                Some(summary) => format!("You said: {} (earlier: {})", asked, summary),
                None => format!("You said: {}", asked),
            };
            Ok(json!({"messages": [Message::ai(reply).to_value()]}))
        })
    });
    graph.add_node("summarize_conversation", |state| {
        Box::pin(async move {
            let messages = messages_from_value(&state["messages"])?;
            let topics: Vec<&str> = messages
                .iter()
                .filter(|message| message.role == MessageRole::Human)
                .map(|message| message.content.as_str())
                .collect();
            let summary = match state["summary"].as_str() {
                Some(previous) => format!("{}; then {}", previous, topics.join(", ")),
                None => format!("user talked about {}", topics.join(", ")),
            };
            let keep_from = messages.len().saturating_sub(2);
            let removals: Vec<Value> = messages[..keep_from]
                .iter()
                .filter_map(|message| message.id.clone())
                .map(|id| RemoveMessage::new(id).to_value())
                .collect();
            Ok(json!({"summary": summary, "messages": removals}))
        })
    });
    graph
        .add_edge(START, "conversation")
        .add_conditional_edges(
            "conversation",
            |state: &Value| {
                let count = state["messages"].as_array().map_or(0, Vec::len);
                let target = if count > SUMMARY_THRESHOLD {
                    "summarize_conversation"
                } else {
                    END
                };
                Ok(ConditionalEdgeResult::from(target))
            },
            None,
        )
        .add_edge("summarize_conversation", END);
    Ok(graph.compile_with(options)?)
}

async fn chat_turn(app: &CompiledGraph, config: &CheckpointConfig, text: &str) -> anyhow::Result<Value> {
    let outcome = app
        .invoke_with_config(Some(json!({"messages": [Message::human(text).to_value()]})), config)
        .await?;
    let messages = messages_from_value(&outcome.values["messages"])?;
    println!(
        "> {}
  {} ({} messages kept)",
        text,
        messages.last().map(|message| message.content.as_str()).unwrap_or_default(),
        messages.len()
    );
    Ok(outcome.values)
}

pub async fn summarize(settings: &EngineSettings, turns: Vec<String>) -> anyhow::Result<()> {
    let app = summarizing_chatbot(checkpointed(settings))?;
    let config = CheckpointConfig::for_thread("summarize");
    for text in &turns {
        chat_turn(&app, &config, text).await?;
    }

    let state = app.get_state(&config).await?.context("thread has no state")?;
    println!(
        "summary: {}",
        state.values["summary"].as_str().unwrap_or("(none yet)")
    );
    Ok(())
}

pub async fn external_memory(settings: &EngineSettings, dir: &Path, message: &str) -> anyhow::Result<()> {
    let config = CheckpointConfig::for_thread("5");
    {
        let saver = FileCheckpointSaver::open(dir)
            .await
            .with_context(|| format!("cannot open checkpoints in {}", dir.display()))?;
        let app = summarizing_chatbot(options(settings).with_checkpointer(Arc::new(saver)))?;
        chat_turn(&app, &config, message).await?;
    }

    // A fresh saver on the same directory sees the whole thread
    let saver = FileCheckpointSaver::open(dir).await?;
    let app = summarizing_chatbot(options(settings).with_checkpointer(Arc::new(saver)))?;
    let state = app.get_state(&config).await?.context("thread was not persisted")?;
    let history = app
        .get_state_history(&config, None, None, None)
        .await?
        .collect::<Vec<_>>()
        .await;
    println!(
        "reopened {}: {} checkpoints, summary: {}",
        dir.display(),
        history.len(),
        state.values["summary"].as_str().unwrap_or("(none yet)")
    );
    print_messages(&state.values)
}

pub async fn trim_filter() -> anyhow::Result<()> {
    let history = vec![
        Message::system("You are a helpful assistant").with_id("0"),
        Message::human("Tell me about whales").with_id("1").with_name("Lance"),
        Message::ai("Whales are marine mammals.").with_id("2").with_name("Bot"),
        Message::human("And orcas?").with_id("3").with_name("Lance"),
        Message::ai("Orcas are dolphins.").with_id("4").with_name("Bot"),
        Message::human("Where do they live?").with_id("5").with_name("Lance"),
    ];

    let trimmed = trim_messages(&history, &TrimOptions::last(2));
    println!("trimmed: {:?}", trimmed.iter().map(|m| &m.content).collect::<Vec<_>>());

    let humans = filter_messages(&history, &MessageFilter::new().include_roles([MessageRole::Human]));
    println!("human only: {}", humans.len());

    // Remove the oldest exchange from a stored log
    let schema = StateSchema::messages();
    let mut state = json!({});
    schema.apply(
        &mut state,
        &json!({"messages": history.iter().map(Message::to_value).collect::<Vec<_>>()}),
    )?;
    schema.apply(
        &mut state,
        &json!({"messages": [RemoveMessage::new("1").to_value(), RemoveMessage::new("2").to_value()]}),
    )?;
    println!("after removal:");
    print_messages(&state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demos_run() {
        let settings = EngineSettings::default();
        simple(&settings, "sad").await.unwrap();
        reducers(&settings).await.unwrap();
        parallel(&settings).await.unwrap();
        map_reduce(&settings, vec!["cats".to_string()]).await.unwrap();
        breakpoints(&settings).await.unwrap();
        dynamic_breakpoints(&settings, "hello world").await.unwrap();
        time_travel(&settings).await.unwrap();
        memory(&settings, "tester").await.unwrap();
        stream(&settings).await.unwrap();
        subgraph(&settings).await.unwrap();
        trim_filter().await.unwrap();
    }

    #[tokio::test]
    async fn test_long_conversation_is_summarized() {
        let app = summarizing_chatbot(checkpointed(&EngineSettings::default())).unwrap();
        let config = CheckpointConfig::for_thread("chat");

        for text in ["hi", "I like Rust", "and graphs"] {
            let values = chat_turn(&app, &config, text).await.unwrap();
            assert!(values.get("summary").map_or(true, Value::is_null));
        }

        // The fourth exchange pushes the log past the threshold
        let values = chat_turn(&app, &config, "what next?").await.unwrap();
        let messages = messages_from_value(&values["messages"]).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "what next?");
        assert_eq!(
            values["summary"],
            "user talked about hi, I like Rust, and graphs, what next?"
        );
    }

    #[tokio::test]
    async fn test_external_memory_continues_across_invocations() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = EngineSettings::default();
        external_memory(&settings, dir.path(), "Hi! I am Lance").await.unwrap();
        external_memory(&settings, dir.path(), "What is my name?").await.unwrap();

        let saver = FileCheckpointSaver::open(dir.path()).await.unwrap();
        let app = summarizing_chatbot(options(&settings).with_checkpointer(Arc::new(saver))).unwrap();
        let state = app
            .get_state(&CheckpointConfig::for_thread("5"))
            .await
            .unwrap()
            .unwrap();
        let messages = messages_from_value(&state.values["messages"]).unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].content, "Hi! I am Lance");
    }

    #[tokio::test]
    async fn test_double_texting_strategies() {
        let settings = EngineSettings::default();
        for strategy in [
            MultitaskStrategy::Reject,
            MultitaskStrategy::Enqueue,
            MultitaskStrategy::Interrupt,
            MultitaskStrategy::Rollback,
        ] {
            double_texting(&settings, strategy).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_breakpoint_agent_waits_for_approval() {
        let app = agent_graph(
            arithmetic_model(),
            checkpointed(&EngineSettings::default()).with_interrupt_before(["tools"]),
        )
        .unwrap();
        let config = CheckpointConfig::for_thread("t");
        let input = json!({"messages": [Message::human("Multiply 3 and 4").to_value()]});

        let paused = app.invoke_with_config(Some(input), &config).await.unwrap();
        assert_eq!(paused.next, vec!["tools".to_string()]);

        let done = app.resume(&config).await.unwrap();
        let messages = messages_from_value(&done.values["messages"]).unwrap();
        assert_eq!(messages.last().unwrap().content, "3 multiplied by 4 is 12.");
    }
}
