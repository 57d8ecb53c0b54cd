use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use taskflow_core::{
    init_metrics_from_env, init_telemetry, parse_routing_key, BrokerIngress, ConfigLoader,
    Dispatcher, EventPublisher, ExecutionQueueClient, GraphId, InMemoryBroker,
    InMemoryEntityStore, InMemoryExecutionQueue, InboundEvent, LoggingPublisher, ProgressionEngine,
    RawMessage, SchedulerConfig, Task, TaskGraph, TaskGraphStore, TaskId, TaskStore,
    TelemetryOptions,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "taskflow-worker",
    version,
    about = "Event-driven task-graph scheduler worker"
)]
struct Cli {
    /// Path to a scheduler config.toml. Falls back to TASKFLOW_CONFIG, then
    /// ./config.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler worker loop against its configured backends.
    Serve,
    /// Submit a small demo task graph and drive it through synthetic
    /// completion events, for local smoke-testing without a real broker or
    /// execution queue.
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load(cli.config)?;

    init_telemetry(TelemetryOptions {
        env_filter: Some(config.logging.level.clone()),
        with_ansi: true,
    })?;
    init_metrics_from_env(&config.scheduler.id);

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Demo => demo(config).await,
    }
}

/// Wire up the default in-memory backends and run the dispatch loop until a
/// shutdown signal arrives, then drain in-flight handlers before exiting.
///
/// Production deployments replace [`InMemoryEntityStore`],
/// [`InMemoryExecutionQueue`], [`InMemoryBroker`] and [`LoggingPublisher`]
/// with implementations bound to a real durable store, execution queue and
/// broker — those backends are outside this crate's scope.
async fn serve(config: SchedulerConfig) -> Result<()> {
    let store = Arc::new(InMemoryEntityStore::new());
    let queue: Arc<dyn ExecutionQueueClient> = Arc::new(InMemoryExecutionQueue::new());
    let broker = Arc::new(InMemoryBroker::new());
    let publisher: Arc<dyn EventPublisher> = Arc::new(LoggingPublisher::new());

    let engine = Arc::new(ProgressionEngine::new(
        store.clone() as Arc<dyn TaskStore>,
        store.clone() as Arc<dyn TaskGraphStore>,
        queue,
        publisher,
        Some(config.logging.audit_log_dir.clone()),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        broker.clone() as Arc<dyn BrokerIngress>,
        engine,
        config.scheduler.max_concurrent_handlers,
    ));

    info!(scheduler_id = %config.scheduler.id, "scheduler worker starting");

    let run_dispatcher = dispatcher.clone();
    tokio::select! {
        _ = run_dispatcher.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, draining in-flight handlers");
        }
    }

    dispatcher.drain().await;
    info!("scheduler worker stopped");
    Ok(())
}

/// Submit a three-task linear chain (`a -> b -> c`) and feed synthetic
/// `taskCompleted` events for it through the in-memory broker, exercising
/// the full ingress -> dispatcher -> progression engine path end to end.
async fn demo(config: SchedulerConfig) -> Result<()> {
    let store = Arc::new(InMemoryEntityStore::new());
    let queue: Arc<dyn ExecutionQueueClient> = Arc::new(InMemoryExecutionQueue::new());
    let broker = Arc::new(InMemoryBroker::new());
    let publisher: Arc<dyn EventPublisher> = Arc::new(LoggingPublisher::new());

    let graph_id = GraphId::new("demo-graph");
    let routing = format!("{}.{}", config.scheduler.id, graph_id);
    seed_linear_chain(&store, &graph_id, &routing);

    let engine = Arc::new(ProgressionEngine::new(
        store.clone() as Arc<dyn TaskStore>,
        store.clone() as Arc<dyn TaskGraphStore>,
        queue,
        publisher,
        Some(config.logging.audit_log_dir.clone()),
    ));
    let dispatcher = Dispatcher::new(
        broker.clone() as Arc<dyn BrokerIngress>,
        engine,
        config.scheduler.max_concurrent_handlers,
    );

    for task_id in ["a", "b", "c"] {
        let (_scheduler_id, parsed_graph_id) = parse_routing_key(&routing)?;
        assert_eq!(parsed_graph_id, graph_id);
        let event = InboundEvent::TaskCompleted {
            task_graph_id: graph_id.clone(),
            task_id: TaskId::new(task_id),
            success: true,
            result_url: None,
            logs_url: None,
        };
        let payload = serde_json::to_value(&event)?;
        let outcome = dispatcher
            .dispatch(RawMessage {
                routing_key: format!("{routing}.taskCompleted"),
                payload,
            })
            .await;
        info!(task_id, ?outcome, "demo event processed");
    }

    let graph = TaskGraphStore::load(store.as_ref(), &graph_id).await?;
    info!(?graph, "demo graph final state");
    Ok(())
}

fn seed_linear_chain(store: &InMemoryEntityStore, graph_id: &GraphId, routing: &str) {
    let mut task_a = Task::new(graph_id.clone(), TaskId::new("a"), 0);
    task_a.dependents.insert(TaskId::new("b"));

    let mut task_b = Task::new(graph_id.clone(), TaskId::new("b"), 2);
    task_b.requires.insert(TaskId::new("a"));
    task_b.dependents.insert(TaskId::new("c"));

    let mut task_c = Task::new(graph_id.clone(), TaskId::new("c"), 2);
    task_c.requires.insert(TaskId::new("b"));

    store.put_task(task_a);
    store.put_task(task_b);
    store.put_task(task_c);

    let mut leaves = HashSet::new();
    leaves.insert(TaskId::new("c"));
    store.put_graph(TaskGraph::new(graph_id.clone(), routing, leaves));
}
