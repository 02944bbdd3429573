// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Gateway-registered cron service: exposes task CRUD as RPC methods and
//! fires `cron.trigger` events for the agent service to consume. The cron
//! service itself never runs an agent turn (spec §4.10: "the agent service,
//! not the cron service, subscribes and executes").

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use conduit_gateway::{GatewayConn, ServiceClient, ServiceHandler};
use conduit_protocol::{ErrorCode, FrameError, ServiceRegistration};

use crate::clock::Clock;
use crate::scheduler::{CronScheduler, PersistHook, TriggerSink};
use crate::task::{CronTask, CronTaskInput, CronTaskPatch};

struct GatewayTriggerSink<C: GatewayConn> {
    client: Arc<ServiceClient<C>>,
}

#[async_trait]
impl<C: GatewayConn> TriggerSink for GatewayTriggerSink<C> {
    async fn on_trigger(&self, task: &CronTask) {
        let payload = serde_json::json!({
            "taskId": task.id,
            "task": task,
            "name": task.name,
            "sessionKey": task.session_key,
            "notify": task.notify.clone().unwrap_or_default(),
        });
        let _ = self.client.emit("cron.trigger", Some(payload)).await;
    }
}

pub struct CronService<C: GatewayConn> {
    client: Arc<ServiceClient<C>>,
    scheduler: Arc<CronScheduler>,
}

impl<C: GatewayConn> CronService<C> {
    pub async fn connect(
        conn: Arc<C>,
        persist: Option<Arc<dyn PersistHook>>,
        clock: Arc<dyn Clock>,
        default_timezone: impl Into<String>,
    ) -> Result<Arc<Self>, FrameError> {
        let registration = ServiceRegistration::new("cron").with_methods([
            "cron.add",
            "cron.update",
            "cron.remove",
            "cron.list",
            "cron.run",
            "cron.startAll",
            "cron.stopAll",
        ]);

        let dispatcher = Arc::new(Dispatcher {
            inner: tokio::sync::OnceCell::new(),
        });
        let client = ServiceClient::connect(conn, registration, dispatcher.clone()).await?;

        let sink = Arc::new(GatewayTriggerSink { client: client.clone() });
        let scheduler = CronScheduler::new(sink, persist, clock, default_timezone);

        let service = Arc::new(Self { client, scheduler });
        let _ = dispatcher.inner.set(service.clone());

        Ok(service)
    }

    pub fn scheduler(&self) -> &Arc<CronScheduler> {
        &self.scheduler
    }

    async fn handle_request_inner(&self, method: &str, params: Option<Value>) -> Result<Option<Value>, FrameError> {
        match method {
            "cron.add" => {
                #[derive(Deserialize)]
                struct AddParams {
                    task: CronTaskInput,
                    #[serde(default)]
                    ephemeral: bool,
                }
                let params: AddParams = deserialize_params(params)?;
                let task = self
                    .scheduler
                    .add_task(params.task, params.ephemeral)
                    .await
                    .map_err(|e| FrameError::new(ErrorCode::Custom("INVALID_TASK".into()), e))?;
                Ok(Some(serde_json::to_value(task).unwrap_or(Value::Null)))
            }
            "cron.update" => {
                #[derive(Deserialize)]
                struct UpdateParams {
                    id: String,
                    patch: CronTaskPatch,
                }
                let params: UpdateParams = deserialize_params(params)?;
                match self.scheduler.update_task(&params.id, params.patch).await {
                    Some(task) => Ok(Some(serde_json::to_value(task).unwrap_or(Value::Null))),
                    None => Err(FrameError::new(ErrorCode::Custom("NOT_FOUND".into()), format!("no task '{}'", params.id))),
                }
            }
            "cron.remove" => {
                let id = require_id(params)?;
                let existed = self.scheduler.remove_task(&id).await;
                Ok(Some(serde_json::json!({ "existed": existed })))
            }
            "cron.list" => Ok(Some(serde_json::to_value(self.scheduler.list_tasks().await).unwrap_or(Value::Null))),
            "cron.run" => {
                let id = require_id(params)?;
                let fired = self.scheduler.trigger_task(&id).await;
                Ok(Some(serde_json::json!({ "fired": fired })))
            }
            "cron.startAll" => {
                self.scheduler.start_all().await;
                Ok(None)
            }
            "cron.stopAll" => {
                self.scheduler.stop_all().await;
                Ok(None)
            }
            other => Err(FrameError::new(ErrorCode::NoHandler, format!("cron service has no method '{other}'"))),
        }
    }
}

fn deserialize_params<T: for<'de> Deserialize<'de>>(params: Option<Value>) -> Result<T, FrameError> {
    params
        .and_then(|v| serde_json::from_value(v).ok())
        .ok_or_else(|| FrameError::new(ErrorCode::Custom("BAD_PARAMS".into()), "malformed params"))
}

fn require_id(params: Option<Value>) -> Result<String, FrameError> {
    #[derive(Deserialize)]
    struct IdParams {
        id: String,
    }
    deserialize_params::<IdParams>(params).map(|p| p.id)
}

struct Dispatcher<C: GatewayConn> {
    inner: tokio::sync::OnceCell<Arc<CronService<C>>>,
}

#[async_trait]
impl<C: GatewayConn> ServiceHandler for Dispatcher<C> {
    async fn handle_request(&self, method: &str, params: Option<Value>) -> Result<Option<Value>, FrameError> {
        match self.inner.get() {
            Some(service) => service.handle_request_inner(method, params).await,
            None => Err(FrameError::new(ErrorCode::ServiceUnavailable, "cron service not ready")),
        }
    }
}
