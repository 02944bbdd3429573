// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Gateway-registered tools service: exposes a [`ToolRegistry`] as the
//! `tool.list` / `tool.execute` / `tool.describe` RPC methods. Holds no
//! client of its own — it answers requests, it never emits.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_gateway::{GatewayConn, ServiceClient, ServiceHandler};
use conduit_protocol::{ErrorCode, FrameError, ServiceRegistration};
use conduit_tools::{ToolCall, ToolOutputPart, ToolRegistry};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

pub struct ToolsService {
    registry: Arc<ToolRegistry>,
}

impl ToolsService {
    /// Registers as the `tools` gateway service and returns its client handle.
    pub async fn connect<C: GatewayConn>(conn: Arc<C>, registry: Arc<ToolRegistry>) -> Result<Arc<ServiceClient<C>>, FrameError> {
        let registration = ServiceRegistration::new("tools").with_methods(["tool.list", "tool.execute", "tool.describe"]);
        let handler = Arc::new(Self { registry });
        ServiceClient::connect(conn, registration, handler).await
    }

    pub(crate) async fn handle_request_inner(&self, method: &str, params: Option<Value>) -> Result<Option<Value>, FrameError> {
        match method {
            "tool.list" => Ok(Some(serde_json::to_value(self.registry.schemas()).unwrap_or(Value::Null))),
            "tool.describe" => {
                #[derive(Deserialize)]
                struct DescribeParams {
                    name: String,
                }
                let params: DescribeParams = deserialize_params(params)?;
                let schema = self
                    .registry
                    .schemas()
                    .into_iter()
                    .find(|s| s.name == params.name)
                    .ok_or_else(|| FrameError::new(ErrorCode::Custom("NOT_FOUND".into()), format!("no tool '{}'", params.name)))?;
                Ok(Some(serde_json::to_value(schema).unwrap_or(Value::Null)))
            }
            "tool.execute" => {
                #[derive(Deserialize)]
                struct ExecuteParams {
                    name: String,
                    #[serde(default)]
                    id: Option<String>,
                    #[serde(default)]
                    args: Value,
                }
                let params: ExecuteParams = deserialize_params(params)?;
                let call = ToolCall { id: params.id.unwrap_or_else(|| Uuid::new_v4().to_string()), name: params.name, args: params.args };
                let output = self.registry.execute(&call).await;
                let parts: Vec<Value> = output
                    .parts
                    .iter()
                    .map(|p| match p {
                        ToolOutputPart::Text(t) => serde_json::json!({ "kind": "text", "text": t }),
                        ToolOutputPart::Image(data_url) => serde_json::json!({ "kind": "image", "dataUrl": data_url }),
                    })
                    .collect();
                Ok(Some(serde_json::json!({
                    "callId": output.call_id,
                    "content": output.content,
                    "isError": output.is_error,
                    "parts": parts,
                })))
            }
            other => Err(FrameError::new(ErrorCode::NoHandler, format!("tools service has no method '{other}'"))),
        }
    }
}

fn deserialize_params<T: for<'de> Deserialize<'de>>(params: Option<Value>) -> Result<T, FrameError> {
    params.and_then(|v| serde_json::from_value(v).ok()).ok_or_else(|| FrameError::new(ErrorCode::Custom("BAD_PARAMS".into()), "malformed params"))
}

#[async_trait]
impl ServiceHandler for ToolsService {
    async fn handle_request(&self, method: &str, params: Option<Value>) -> Result<Option<Value>, FrameError> {
        self.handle_request_inner(method, params).await
    }
}
