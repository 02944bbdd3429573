// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, ConfigAction, ConfigTarget, CronCommands, GatewayCommands, SessionsCommands};

use conduit_agent::service::AgentService;
use conduit_agent::{AgentServiceConfig, ModelAgentRuntime};
use conduit_channels::{ChannelService, DeliveryOptions, InboundMessage, LoopbackChannel, PipelineConfig};
use conduit_config::{Config, Workspace};
use conduit_cron::{CronService, CronTaskInput, FileCronPersist, SystemClock};
use conduit_gateway::ws::WsConn;
use conduit_gateway::{Gateway, InProcessConn, ServiceClient, ServiceHandler};
use conduit_lock::{inspect, LockConfig, ProcessLock};
use conduit_mcp::ToolsService;
use conduit_model::MockProvider;
use conduit_session::service::SessionsService;
use conduit_session::FileSessionStore;
use conduit_tools::{ExecTool, ReadFileTool, ToolRegistry};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Long enough to clear the ingress pipeline's debounce window and a mock
/// agent turn before the CLI gives up waiting for a reply.
const CHAT_REPLY_WAIT: Duration = Duration::from_millis(4000);

fn init_logging() {
    let filter = EnvFilter::try_from_env("CONDUIT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(fmt::layer().with_writer(std::io::stderr)).with(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = conduit_config::load(cli.config.as_deref())?;

    match &cli.command {
        Commands::Chat => run_chat(&config).await,
        Commands::Run { task } => run_once(&config, task).await,
        Commands::Config { target, action } => run_config(&config, *target, *action),
        Commands::Gateway { command } => run_gateway_command(&config, command).await,
        Commands::Health => run_health(&config).await,
        Commands::Cron { command } => run_cron_command(&config, command).await,
        Commands::Sessions { command } => run_sessions_command(&config, command).await,
    }
}

// ─── In-process stack (chat / run) ──────────────────────────────────────────

/// Everything `chat`/`run` need: a gateway and the session/agent/channel
/// services wired to it over the loopback channel.
struct LocalStack {
    _sessions: Arc<SessionsService<InProcessConn>>,
    _agent: Arc<AgentService<InProcessConn>>,
    channel: Arc<ChannelService<InProcessConn, LoopbackChannel>>,
    adapter: Arc<LoopbackChannel>,
}

async fn assemble_local_stack(config: &Config) -> anyhow::Result<LocalStack> {
    let handle = Gateway::spawn(REQUEST_TIMEOUT);
    let workspace = config.paths.resolved_workspace();
    let data_dir = config.paths.resolved_data_dir();

    let store = FileSessionStore::open(data_dir.join("sessions")).await?;

    let sessions_conn = InProcessConn::connect(handle.clone()).await;
    let sessions = SessionsService::connect(sessions_conn, store.clone()).await?;

    let agent_conn = InProcessConn::connect(handle.clone()).await;
    let agent_config = AgentServiceConfig {
        workspace_dir: workspace.display().to_string(),
        model: config.agent.primary.clone().unwrap_or_else(|| "mock".to_string()),
        provider: "mock".to_string(),
        system_prompt: String::new(),
        tools: Vec::new(),
    };
    let runtime = Arc::new(ModelAgentRuntime::new(Arc::new(MockProvider)));
    let agent = AgentService::connect(agent_conn, runtime, store.clone(), agent_config).await?;

    let adapter = Arc::new(LoopbackChannel::new());
    let channel_conn = InProcessConn::connect(handle.clone()).await;
    let channel = ChannelService::connect(channel_conn, adapter.clone(), PipelineConfig::default(), DeliveryOptions::default()).await?;

    Ok(LocalStack {
        _sessions: sessions,
        _agent: agent,
        channel,
        adapter,
    })
}

async fn send_and_wait(stack: &LocalStack, user_id: &str, text: &str) -> Vec<String> {
    let before = stack.adapter.sent_messages().len();
    stack
        .channel
        .accept_inbound(InboundMessage {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            text: text.to_string(),
            metadata: None,
        })
        .await;
    tokio::time::sleep(CHAT_REPLY_WAIT).await;
    stack.adapter.sent_messages().into_iter().skip(before).map(|(_, text)| text).collect()
}

async fn run_chat(config: &Config) -> anyhow::Result<()> {
    let stack = assemble_local_stack(config).await?;
    println!("conduit chat — type a message, Ctrl-D to quit");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        use std::io::Write;
        std::io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        for reply in send_and_wait(&stack, "local", line).await {
            println!("{reply}");
        }
    }
    Ok(())
}

async fn run_once(config: &Config, task: &str) -> anyhow::Result<()> {
    let stack = assemble_local_stack(config).await?;
    for reply in send_and_wait(&stack, "local", task).await {
        println!("{reply}");
    }
    Ok(())
}

// ─── config subcommand ──────────────────────────────────────────────────────

fn run_config(config: &Config, target: ConfigTarget, action: ConfigAction) -> anyhow::Result<()> {
    match target {
        ConfigTarget::Llm => show_config_section("llm", action, || {
            let mut doc = serde_yaml::to_string(&config.agent).unwrap_or_default();
            doc.push_str(&serde_yaml::to_string(&config.models).unwrap_or_default());
            doc
        }),
        ConfigTarget::Channel => show_config_section("channel", action, || serde_yaml::to_string(&config.channels).unwrap_or_default()),
        ConfigTarget::Context => run_config_context(config, action),
    }
}

fn show_config_section(label: &str, action: ConfigAction, render: impl FnOnce() -> String) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", render());
            Ok(())
        }
        ConfigAction::Edit => {
            anyhow::bail!("editing '{label}' is not supported directly yet; edit the config YAML file and re-run `conduit config {label} show` to verify")
        }
    }
}

fn run_config_context(config: &Config, action: ConfigAction) -> anyhow::Result<()> {
    let workspace = Workspace::new(config.paths.resolved_workspace());
    match action {
        ConfigAction::Show => {
            let files = workspace.read_all()?;
            if files.is_empty() {
                println!("no workspace context files found under {}", workspace.root().display());
            }
            for (name, contents) in files {
                println!("── {name} ──");
                println!("{contents}");
            }
            Ok(())
        }
        ConfigAction::Edit => {
            let path = workspace.root().join("AGENTS.md");
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if !path.exists() {
                std::fs::write(&path, "")?;
            }
            let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
            let status = std::process::Command::new(editor).arg(&path).status().context("failed to launch $EDITOR")?;
            if !status.success() {
                anyhow::bail!("editor exited with status {status}");
            }
            Ok(())
        }
    }
}

// ─── gateway daemon ──────────────────────────────────────────────────────────

fn lock_path(config: &Config) -> std::path::PathBuf {
    config.paths.resolved_data_dir().join("gateway.lock")
}

fn bind_addr(config: &Config) -> anyhow::Result<SocketAddr> {
    format!("{}:{}", config.gateway.host, config.gateway.port).parse().context("invalid gateway.host/gateway.port")
}

async fn run_gateway_command(config: &Config, command: &GatewayCommands) -> anyhow::Result<()> {
    match command {
        GatewayCommands::Start => start_gateway_daemon(config).await,
        GatewayCommands::Stop => stop_gateway_daemon(config),
        GatewayCommands::Restart => {
            stop_gateway_daemon(config)?;
            tokio::time::sleep(Duration::from_millis(500)).await;
            start_gateway_daemon(config).await
        }
        GatewayCommands::Status => status_gateway_daemon(config),
    }
}

async fn start_gateway_daemon(config: &Config) -> anyhow::Result<()> {
    let lock = ProcessLock::acquire(LockConfig::new(lock_path(config))).await.map_err(|e| anyhow::anyhow!("could not start gateway: {e}"))?;

    let handle = Gateway::spawn(REQUEST_TIMEOUT);
    let workspace = config.paths.resolved_workspace();
    let data_dir = config.paths.resolved_data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let store = FileSessionStore::open(data_dir.join("sessions")).await?;

    let sessions_conn = InProcessConn::connect(handle.clone()).await;
    let _sessions = SessionsService::connect(sessions_conn, store.clone()).await?;

    let agent_conn = InProcessConn::connect(handle.clone()).await;
    let agent_config = AgentServiceConfig {
        workspace_dir: workspace.display().to_string(),
        model: config.agent.primary.clone().unwrap_or_else(|| "mock".to_string()),
        provider: "mock".to_string(),
        system_prompt: String::new(),
        tools: Vec::new(),
    };
    let runtime = Arc::new(ModelAgentRuntime::new(Arc::new(MockProvider)));
    let _agent = AgentService::connect(agent_conn, runtime, store.clone(), agent_config).await?;

    let persist_path = conduit_cron::persist::default_path(&workspace);
    let persist = Arc::new(FileCronPersist::new(persist_path));
    let saved_tasks = persist.load().unwrap_or_default();

    let cron_conn = InProcessConn::connect(handle.clone()).await;
    let cron = CronService::connect(cron_conn, Some(persist.clone() as Arc<dyn conduit_cron::PersistHook>), Arc::new(SystemClock), "UTC").await?;
    for task in saved_tasks {
        let input = CronTaskInput {
            id: task.id,
            schedule: task.schedule,
            name: Some(task.name),
            description: Some(task.description),
            task: task.task,
            notify: task.notify,
            session_key: task.session_key,
            timezone: Some(task.timezone),
            enabled: Some(task.enabled),
            built_in: Some(task.built_in),
        };
        if let Err(e) = cron.scheduler().add_task(input, false).await {
            tracing::warn!(error = %e, "failed to reload persisted cron task");
        }
    }

    let mut registry = ToolRegistry::new();
    registry.register(ExecTool::default());
    registry.register(ReadFileTool);
    let registry = Arc::new(registry);
    let tools_conn = InProcessConn::connect(handle.clone()).await;
    let _tools = ToolsService::connect(tools_conn, registry).await?;

    let addr = bind_addr(config)?;
    tracing::info!(%addr, "starting conduit gateway daemon");
    let result = conduit_gateway::ws::serve(addr, handle).await;
    lock.release().await;
    result.map_err(Into::into)
}

fn stop_gateway_daemon(config: &Config) -> anyhow::Result<()> {
    let path = lock_path(config);
    let Some(status) = inspect(&path, Duration::from_secs(30))? else {
        println!("gateway is not running");
        return Ok(());
    };
    if status.stale {
        println!("gateway lock is stale (pid {} no longer alive); nothing to stop", status.pid);
        return Ok(());
    }
    #[cfg(unix)]
    {
        let result = unsafe { libc::kill(status.pid as libc::pid_t, libc::SIGTERM) };
        if result != 0 {
            anyhow::bail!("failed to signal pid {}: {}", status.pid, std::io::Error::last_os_error());
        }
    }
    println!("sent shutdown signal to gateway (pid {})", status.pid);
    Ok(())
}

fn status_gateway_daemon(config: &Config) -> anyhow::Result<()> {
    let path = lock_path(config);
    match inspect(&path, Duration::from_secs(30))? {
        None => println!("gateway is not running"),
        Some(status) if status.stale => {
            println!("gateway lock record is stale (last seen pid {}, host {})", status.pid, status.host);
        }
        Some(status) => {
            println!("gateway running: pid {}, host {}, started {}, last heartbeat {}", status.pid, status.host, status.started_at, status.heartbeat);
        }
    }
    Ok(())
}

// ─── remote WS client commands ──────────────────────────────────────────────

/// A pure client role that never answers inbound requests or events —
/// every method on `ServiceHandler` is default-bodied, so this impl is
/// intentionally empty.
struct NoopHandler;
impl ServiceHandler for NoopHandler {}

async fn dial(config: &Config) -> anyhow::Result<Arc<ServiceClient<WsConn>>> {
    let url = format!("ws://{}:{}", config.gateway.host, config.gateway.port);
    let conn = WsConn::dial(&url).await.with_context(|| format!("failed to reach gateway at {url}; is `conduit gateway start` running?"))?;
    let registration = conduit_protocol::ServiceRegistration::new("cli");
    ServiceClient::connect(conn, registration, Arc::new(NoopHandler)).await.map_err(Into::into)
}

async fn run_health(config: &Config) -> anyhow::Result<()> {
    let client = dial(config).await?;
    let stats = client.call("gateway", "gateway.stats", None, REQUEST_TIMEOUT).await?;
    println!("{}", serde_json::to_string_pretty(&stats).unwrap_or_default());
    Ok(())
}

async fn run_cron_command(config: &Config, command: &CronCommands) -> anyhow::Result<()> {
    let client = dial(config).await?;
    let (method, params): (&str, Option<serde_json::Value>) = match command {
        CronCommands::List => ("cron.list", None),
        CronCommands::Add { id, schedule, task, notify, timezone } => (
            "cron.add",
            Some(serde_json::json!({
                "task": {
                    "id": id,
                    "schedule": schedule,
                    "task": task,
                    "notify": notify,
                    "timezone": timezone,
                }
            })),
        ),
        CronCommands::Remove { id } => ("cron.remove", Some(serde_json::json!({ "id": id }))),
        CronCommands::Trigger { id } => ("cron.run", Some(serde_json::json!({ "id": id }))),
        CronCommands::Logs => ("cron.list", None),
    };
    let result = client.call("cron", method, params, REQUEST_TIMEOUT).await?;
    println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
    Ok(())
}

async fn run_sessions_command(config: &Config, command: &SessionsCommands) -> anyhow::Result<()> {
    let client = dial(config).await?;
    let (method, params): (&str, Option<serde_json::Value>) = match command {
        SessionsCommands::List { kind } => ("session.list", Some(serde_json::json!({ "kind": kind }))),
        SessionsCommands::Debug { session_key } => ("session.get", Some(serde_json::json!({ "sessionKey": session_key }))),
    };
    let result = client.call("sessions", method, params, REQUEST_TIMEOUT).await?;
    println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
    Ok(())
}
