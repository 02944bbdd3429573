// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Gateway-registered sessions service: the RPC front door onto a
//! [`SessionStore`] for any gateway-connected client (the agent service's
//! `session.create` notification, the CLI's `sessions list/debug`, the
//! channels service's liveness `session.ping`). Emits `session.created` /
//! `session.deleted` so subscribers (the agent service, in particular) learn
//! about sessions created or removed by someone else.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use conduit_gateway::{GatewayConn, ServiceClient, ServiceHandler};
use conduit_protocol::{ErrorCode, FrameError, ServiceRegistration};

use crate::store::{CreateOutcome, ListFilter, MessageFilter, MessageRole, Session, SessionKind, SessionPatch, SessionStore};

pub struct SessionsService<C: GatewayConn> {
    client: Arc<ServiceClient<C>>,
    store: Arc<dyn SessionStore>,
}

impl<C: GatewayConn> SessionsService<C> {
    pub async fn connect(conn: Arc<C>, store: Arc<dyn SessionStore>) -> Result<Arc<Self>, FrameError> {
        let registration = ServiceRegistration::new("sessions")
            .with_methods(["session.create", "session.get", "session.update", "session.delete", "session.list", "session.addMessage", "session.getMessages", "session.ping"])
            .with_events(["session.created", "session.deleted"]);

        let dispatcher = Arc::new(Dispatcher { inner: tokio::sync::OnceCell::new() });
        let client = ServiceClient::connect(conn, registration, dispatcher.clone()).await?;

        let service = Arc::new(Self { client, store });
        let _ = dispatcher.inner.set(service.clone());

        Ok(service)
    }

    async fn handle_request_inner(&self, method: &str, params: Option<Value>) -> Result<Option<Value>, FrameError> {
        match method {
            "session.ping" => Ok(Some(serde_json::json!({ "ok": true }))),
            "session.create" => {
                #[derive(Deserialize)]
                struct CreateParams {
                    #[serde(rename = "sessionKey")]
                    session_key: String,
                    #[serde(default)]
                    kind: SessionKind,
                }
                let params: CreateParams = deserialize_params(params)?;
                let session = Session::new(&params.session_key, params.kind, chrono::Utc::now());
                let outcome = self.store.create(session).await.map_err(store_error)?;
                if outcome == CreateOutcome::Created {
                    let _ = self.client.emit("session.created", Some(serde_json::json!({ "sessionKey": params.session_key }))).await;
                }
                Ok(Some(serde_json::json!({ "outcome": format!("{outcome:?}") })))
            }
            "session.get" => {
                let key = require_session_key(params)?;
                let session = self.store.get(&key).await.map_err(store_error)?;
                Ok(Some(serde_json::to_value(session).unwrap_or(Value::Null)))
            }
            "session.update" => {
                #[derive(Deserialize)]
                struct UpdateParams {
                    #[serde(rename = "sessionKey")]
                    session_key: String,
                    #[serde(default)]
                    label: Option<Option<String>>,
                    #[serde(default, rename = "agentId")]
                    agent_id: Option<Option<String>>,
                }
                let params: UpdateParams = deserialize_params(params)?;
                let patch = SessionPatch { label: params.label, agent_id: params.agent_id, metadata: None };
                let session = self.store.update(&params.session_key, patch).await.map_err(store_error)?;
                Ok(Some(serde_json::to_value(session).unwrap_or(Value::Null)))
            }
            "session.delete" => {
                let key = require_session_key(params)?;
                let existed = self.store.delete(&key).await.map_err(store_error)?;
                if existed {
                    let _ = self.client.emit("session.deleted", Some(serde_json::json!({ "sessionKey": key }))).await;
                }
                Ok(Some(serde_json::json!({ "existed": existed })))
            }
            "session.list" => {
                #[derive(Deserialize, Default)]
                struct ListParams {
                    #[serde(default)]
                    kind: Option<SessionKind>,
                    #[serde(default)]
                    limit: Option<usize>,
                }
                let params: ListParams = params.map(|v| serde_json::from_value(v).unwrap_or_default()).unwrap_or_default();
                let sessions = self.store.list(ListFilter { kind: params.kind, limit: params.limit }).await.map_err(store_error)?;
                Ok(Some(serde_json::to_value(sessions).unwrap_or(Value::Null)))
            }
            "session.addMessage" => {
                #[derive(Deserialize)]
                struct AddMessageParams {
                    #[serde(rename = "sessionKey")]
                    session_key: String,
                    role: MessageRole,
                    content: String,
                    #[serde(default)]
                    metadata: Option<Value>,
                }
                let params: AddMessageParams = deserialize_params(params)?;
                let message = self.store.add_message(&params.session_key, params.role, params.content, params.metadata).await.map_err(store_error)?;
                Ok(Some(serde_json::to_value(message).unwrap_or(Value::Null)))
            }
            "session.getMessages" => {
                #[derive(Deserialize)]
                struct GetMessagesParams {
                    #[serde(rename = "sessionKey")]
                    session_key: String,
                    #[serde(default)]
                    limit: Option<usize>,
                }
                let params: GetMessagesParams = deserialize_params(params)?;
                let messages = self.store.get_messages(&params.session_key, MessageFilter { limit: params.limit, before: None }).await.map_err(store_error)?;
                Ok(Some(serde_json::to_value(messages).unwrap_or(Value::Null)))
            }
            other => Err(FrameError::new(ErrorCode::NoHandler, format!("sessions service has no method '{other}'"))),
        }
    }
}

fn store_error(e: crate::store::StoreError) -> FrameError {
    FrameError::new(ErrorCode::Custom("STORE_ERROR".into()), e.to_string())
}

fn deserialize_params<T: for<'de> Deserialize<'de>>(params: Option<Value>) -> Result<T, FrameError> {
    params.and_then(|v| serde_json::from_value(v).ok()).ok_or_else(|| FrameError::new(ErrorCode::Custom("BAD_PARAMS".into()), "malformed params"))
}

fn require_session_key(params: Option<Value>) -> Result<String, FrameError> {
    #[derive(Deserialize)]
    struct KeyParams {
        #[serde(rename = "sessionKey")]
        session_key: String,
    }
    deserialize_params::<KeyParams>(params).map(|p| p.session_key)
}

struct Dispatcher<C: GatewayConn> {
    inner: tokio::sync::OnceCell<Arc<SessionsService<C>>>,
}

#[async_trait]
impl<C: GatewayConn> ServiceHandler for Dispatcher<C> {
    async fn handle_request(&self, method: &str, params: Option<Value>) -> Result<Option<Value>, FrameError> {
        match self.inner.get() {
            Some(service) => service.handle_request_inner(method, params).await,
            None => Err(FrameError::new(ErrorCode::ServiceUnavailable, "sessions service not ready")),
        }
    }
}

impl Default for SessionKind {
    fn default() -> Self {
        SessionKind::Main
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileSessionStore;
    use conduit_gateway::{Gateway, InProcessConn};
    use std::time::Duration;

    async fn new_service() -> Arc<SessionsService<InProcessConn>> {
        let gw = Gateway::spawn(Duration::from_secs(5));
        let conn = InProcessConn::connect(gw).await;
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::open(dir.keep()).await.unwrap();
        SessionsService::connect(conn, store).await.unwrap()
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let service = new_service().await;
        let params = serde_json::json!({"sessionKey": "cli:x"});
        service.handle_request_inner("session.create", Some(params)).await.unwrap();

        let got = service.handle_request_inner("session.get", Some(serde_json::json!({"sessionKey": "cli:x"}))).await.unwrap().unwrap();
        assert_eq!(got["sessionKey"], "cli:x");
    }

    #[tokio::test]
    async fn create_is_idempotent_reported_via_outcome() {
        let service = new_service().await;
        let params = serde_json::json!({"sessionKey": "cli:x"});
        let first = service.handle_request_inner("session.create", Some(params.clone())).await.unwrap().unwrap();
        assert_eq!(first["outcome"], "Created");
        let second = service.handle_request_inner("session.create", Some(params)).await.unwrap().unwrap();
        assert_eq!(second["outcome"], "AlreadyExistsEmpty");
    }

    #[tokio::test]
    async fn add_message_then_get_messages() {
        let service = new_service().await;
        service.handle_request_inner("session.create", Some(serde_json::json!({"sessionKey": "cli:x"}))).await.unwrap();
        service
            .handle_request_inner("session.addMessage", Some(serde_json::json!({"sessionKey": "cli:x", "role": "user", "content": "hi"})))
            .await
            .unwrap();

        let messages = service.handle_request_inner("session.getMessages", Some(serde_json::json!({"sessionKey": "cli:x"}))).await.unwrap().unwrap();
        let messages: Vec<Value> = serde_json::from_value(messages).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["content"], "hi");
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let service = new_service().await;
        service.handle_request_inner("session.create", Some(serde_json::json!({"sessionKey": "cli:x"}))).await.unwrap();
        let result = service.handle_request_inner("session.delete", Some(serde_json::json!({"sessionKey": "cli:x"}))).await.unwrap().unwrap();
        assert_eq!(result["existed"], true);
        let result = service.handle_request_inner("session.delete", Some(serde_json::json!({"sessionKey": "cli:x"}))).await.unwrap().unwrap();
        assert_eq!(result["existed"], false);
    }

    #[tokio::test]
    async fn list_returns_created_sessions() {
        let service = new_service().await;
        service.handle_request_inner("session.create", Some(serde_json::json!({"sessionKey": "cli:a"}))).await.unwrap();
        service.handle_request_inner("session.create", Some(serde_json::json!({"sessionKey": "cli:b"}))).await.unwrap();
        let listed = service.handle_request_inner("session.list", None).await.unwrap().unwrap();
        let sessions: Vec<Value> = serde_json::from_value(listed).unwrap();
        assert_eq!(sessions.len(), 2);
    }

    #[tokio::test]
    async fn ping_reports_ok() {
        let service = new_service().await;
        let result = service.handle_request_inner("session.ping", None).await.unwrap().unwrap();
        assert_eq!(result["ok"], true);
    }

    #[tokio::test]
    async fn unknown_method_returns_no_handler() {
        let service = new_service().await;
        let result = service.handle_request_inner("session.bogus", None).await;
        assert!(matches!(result, Err(e) if e.code.as_str() == "NO_HANDLER"));
    }

    #[tokio::test]
    async fn connect_registers_sessions_service_on_gateway() {
        let service = new_service().await;
        let _ = service;
    }
}
