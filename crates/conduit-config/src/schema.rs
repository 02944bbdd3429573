// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    /// Named model profiles referenced by `agent.primary` / `agent.fallback`.
    #[serde(default)]
    pub models: HashMap<String, ModelProfile>,
    /// Named channel configurations, e.g. `telegram`, `whatsapp`, `cli`.
    #[serde(default)]
    pub channels: HashMap<String, ChannelConfig>,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Name of the model profile in `models.*` used by default.
    pub primary: Option<String>,
    /// Name of the model profile to fall back to if `primary` fails.
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelProfile {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub allow_from: Vec<String>,
    pub bot_token: Option<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_from: Vec::new(),
            bot_token: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}
fn default_gateway_port() -> u16 {
    // Matches conduit_gateway::ws::DEFAULT_BIND_ADDR.
    9000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
        }
    }
}

fn default_mcp_transport() -> String {
    "stdio".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default = "default_mcp_transport")]
    pub transport: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub endpoint: Option<String>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            transport: default_mcp_transport(),
            host: None,
            port: None,
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathsConfig {
    pub data_dir: Option<String>,
    pub workspace: Option<String>,
}

impl PathsConfig {
    /// `data_dir` with `~` expanded, falling back to `~/.local/share/conduit`.
    pub fn resolved_data_dir(&self) -> std::path::PathBuf {
        match &self.data_dir {
            Some(p) => std::path::PathBuf::from(shellexpand::tilde(p).into_owned()),
            None => dirs::data_dir().unwrap_or_else(|| std::path::PathBuf::from(".")).join("conduit"),
        }
    }

    /// `workspace` with `~` expanded, falling back to the current directory.
    pub fn resolved_workspace(&self) -> std::path::PathBuf {
        match &self.workspace {
            Some(p) => std::path::PathBuf::from(shellexpand::tilde(p).into_owned()),
            None => std::path::PathBuf::from("."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_gateway_host_and_port() {
        let c = Config::default();
        assert_eq!(c.gateway.host, "127.0.0.1");
        assert_eq!(c.gateway.port, 9000);
    }

    #[test]
    fn config_default_mcp_transport_is_stdio() {
        let c = Config::default();
        assert_eq!(c.mcp.transport, "stdio");
    }

    #[test]
    fn config_default_models_and_channels_empty() {
        let c = Config::default();
        assert!(c.models.is_empty());
        assert!(c.channels.is_empty());
    }

    #[test]
    fn channel_config_default_enabled_with_no_allowlist() {
        let c = ChannelConfig::default();
        assert!(c.enabled);
        assert!(c.allow_from.is_empty());
    }

    #[test]
    fn config_deserialises_from_yaml() {
        let yaml = r#"
agent:
  primary: main
  fallback: backup
models:
  main:
    provider: anthropic
    model: claude-sonnet-4-5
  backup:
    provider: openai
    model: gpt-4o
channels:
  telegram:
    allowFrom: ["123", "456"]
    botToken: secret
gateway:
  port: 9000
paths:
  dataDir: /var/lib/conduit
"#;
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.agent.primary.as_deref(), Some("main"));
        assert_eq!(c.models.get("main").unwrap().provider, "anthropic");
        assert_eq!(c.channels.get("telegram").unwrap().allow_from, vec!["123", "456"]);
        assert_eq!(c.gateway.port, 9000);
        assert_eq!(c.paths.data_dir.as_deref(), Some("/var/lib/conduit"));
    }

    #[test]
    fn config_partial_yaml_fills_in_defaults() {
        let yaml = "agent:\n  primary: main\n";
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.gateway.port, 9000);
        assert_eq!(c.mcp.transport, "stdio");
    }

    #[test]
    fn resolved_data_dir_expands_tilde() {
        let paths = PathsConfig {
            data_dir: Some("~/custom-data".into()),
            workspace: None,
        };
        let resolved = paths.resolved_data_dir();
        assert!(!resolved.to_string_lossy().starts_with('~'));
        assert!(resolved.ends_with("custom-data"));
    }

    #[test]
    fn resolved_workspace_defaults_to_current_dir() {
        let paths = PathsConfig::default();
        assert_eq!(paths.resolved_workspace(), std::path::PathBuf::from("."));
    }
}
