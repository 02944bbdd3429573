// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Subcommand, Parser, ValueEnum};

/// Section of the config document a `config` subcommand operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigTarget {
    /// `agent.*` / `models.*` — default and fallback model profiles.
    Llm,
    /// `channels.*` — per-channel allowlist and credentials.
    Channel,
    /// The workspace's markdown context files (AGENTS.md, SOUL.md, ...).
    Context,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigAction {
    /// Print the current value and exit.
    Show,
    /// Open the backing file in `$EDITOR` (falls back to `vi`).
    Edit,
}

#[derive(Subcommand, Debug)]
pub enum GatewayCommands {
    /// Start the gateway as a background-able daemon bound to `gateway.host:port`.
    ///
    /// Acquires the single-instance process lock, assembles the sessions,
    /// agent, cron and tools services against the configured workspace, and
    /// blocks serving WebSocket connections until interrupted.
    Start,
    /// Signal a running gateway daemon to shut down.
    Stop,
    /// `gateway stop` followed by `gateway start`.
    Restart,
    /// Report whether a gateway daemon is running, and since when.
    Status,
}

#[derive(Subcommand, Debug)]
pub enum CronCommands {
    /// List every scheduled task.
    List,
    /// Schedule a new task.
    Add {
        /// Stable task identifier.
        id: String,
        /// Five-or-six field cron expression.
        schedule: String,
        /// Instruction given to the agent as the prompt when this task fires.
        task: String,
        /// Notification targets to deliver the result to, beyond the prompt itself.
        #[arg(long)]
        notify: Vec<String>,
        /// IANA timezone for this task's schedule (defaults to the deployment default).
        #[arg(long)]
        timezone: Option<String>,
    },
    /// Remove a scheduled task by id.
    Remove {
        id: String,
    },
    /// Fire a task immediately, bypassing its schedule.
    Trigger {
        id: String,
    },
    /// Show recent `cron.trigger` activity.
    Logs,
}

#[derive(Subcommand, Debug)]
pub enum SessionsCommands {
    /// List known sessions.
    List {
        /// Only show sessions of this kind (main, subagent, cron).
        #[arg(long)]
        kind: Option<String>,
    },
    /// Print one session's metadata and full message history.
    Debug {
        session_key: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an interactive chat loop against the local loopback channel.
    ///
    /// Assembles the gateway, sessions, agent and channel services
    /// in-process (no daemon required) and reads lines from stdin, each
    /// driven through the same ingress pipeline a real channel adapter
    /// would use. Runs against `conduit-model`'s mock provider until a real
    /// one is wired up in `models.*`.
    Chat,
    /// Run a single task non-interactively and print the reply.
    Run {
        /// The task/message to send.
        task: String,
    },
    /// Inspect or edit the persisted config document.
    Config {
        target: ConfigTarget,
        action: ConfigAction,
    },
    /// Manage the gateway daemon.
    Gateway {
        #[command(subcommand)]
        command: GatewayCommands,
    },
    /// Check whether the gateway daemon is reachable and report its stats.
    Health,
    /// Manage scheduled cron tasks on a running gateway.
    Cron {
        #[command(subcommand)]
        command: CronCommands,
    },
    /// Inspect sessions on a running gateway.
    Sessions {
        #[command(subcommand)]
        command: SessionsCommands,
    },
}

#[derive(Parser, Debug)]
#[command(name = "conduit", about = "A personal agent runtime: gateway, sessions, cron and channels behind one CLI", version)]
pub struct Cli {
    /// Explicit config file, merged on top of the normal search path.
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}
