//! Routes each produced turn message to its conversation's human
//! subscribers: live session first, push-notification fallback,
//! otherwise unreachable.
//!
//! Ordering: within one conversation, dispatch happens in
//! `turnNumber` order because the orchestrator calls `deliver` once
//! per completed turn from its own single-threaded per-conversation
//! driver (teacher's "mutation synchronous between suspension
//! points" discipline) — the coordinator itself imposes no additional
//! serialization across conversations.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Semaphore;

use conclave_domain::config::PushConfig;
use conclave_domain::model::{PushEnvironment, TurnMessage};
use conclave_protocol::{ConversationUpdate, ServerFrame};
use conclave_registry::{ConnectionRegistry, PushTokenStore};

const JWT_LIFETIME_SECS: i64 = 3600;
const JWT_REISSUE_MARGIN_SECS: i64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryVia {
    Live,
    Push,
    None,
}

#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub user_id: String,
    pub via: DeliveryVia,
    pub push_id: Option<String>,
    pub reason: Option<String>,
}

struct CachedJwt {
    token: String,
    issued_at: DateTime<Utc>,
}

/// In-memory, single-writer JWT cache: reissues when within
/// `JWT_REISSUE_MARGIN_SECS` of the one-hour expiry, mirroring the
/// teacher's `fetched_at`/TTL credential-cache idiom.
struct PushJwtSigner {
    team_id: String,
    key_id: String,
    encoding_key: EncodingKey,
    cached: RwLock<Option<CachedJwt>>,
}

#[derive(Serialize)]
struct ApnsClaims {
    iss: String,
    iat: i64,
}

impl PushJwtSigner {
    fn new(team_id: String, key_id: String, private_key_pem: &[u8]) -> conclave_domain::Result<Self> {
        let encoding_key = EncodingKey::from_ec_pem(private_key_pem)
            .map_err(|e| conclave_domain::Error::Config(format!("invalid push private key: {e}")))?;
        Ok(Self {
            team_id,
            key_id,
            encoding_key,
            cached: RwLock::new(None),
        })
    }

    fn token(&self) -> conclave_domain::Result<String> {
        {
            let cached = self.cached.read();
            if let Some(c) = cached.as_ref() {
                let age = Utc::now().signed_duration_since(c.issued_at).num_seconds();
                if age < JWT_LIFETIME_SECS - JWT_REISSUE_MARGIN_SECS {
                    return Ok(c.token.clone());
                }
            }
        }

        let now = Utc::now();
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());
        let claims = ApnsClaims {
            iss: self.team_id.clone(),
            iat: now.timestamp(),
        };
        let token = encode(&header, &claims, &self.encoding_key)
            .map_err(|e| conclave_domain::Error::Config(format!("failed to sign push jwt: {e}")))?;

        *self.cached.write() = Some(CachedJwt {
            token: token.clone(),
            issued_at: now,
        });
        Ok(token)
    }
}

#[derive(Serialize)]
struct ApnsAlert<'a> {
    aps: ApnsBody<'a>,
    #[serde(rename = "conversationId")]
    conversation_id: &'a str,
    #[serde(rename = "messageId")]
    message_id: &'a str,
}

#[derive(Serialize)]
struct ApnsBody<'a> {
    alert: ApnsAlertText<'a>,
}

#[derive(Serialize)]
struct ApnsAlertText<'a> {
    title: &'a str,
    body: &'a str,
}

pub struct DeliveryCoordinator {
    registry: Arc<ConnectionRegistry>,
    push_store: Arc<PushTokenStore>,
    config: PushConfig,
    client: reqwest::Client,
    signer: Option<PushJwtSigner>,
    semaphore: Arc<Semaphore>,
}

impl DeliveryCoordinator {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        push_store: Arc<PushTokenStore>,
        config: PushConfig,
    ) -> conclave_domain::Result<Self> {
        let signer = if config.enabled {
            let pem = std::env::var(&config.private_key_env).map_err(|_| {
                conclave_domain::Error::Config(format!(
                    "push enabled but {} is not set",
                    config.private_key_env
                ))
            })?;
            Some(PushJwtSigner::new(
                config.team_id.clone(),
                config.key_id.clone(),
                pem.as_bytes(),
            )?)
        } else {
            None
        };
        let concurrency = config.max_concurrent_dispatches.max(1);
        Ok(Self {
            registry,
            push_store,
            config,
            client: reqwest::Client::new(),
            signer,
            semaphore: Arc::new(Semaphore::new(concurrency)),
        })
    }

    /// Deliver one turn message to every listed subscriber. Order of
    /// the returned vec matches `user_ids`.
    pub async fn deliver(
        &self,
        conversation_id: &str,
        message: &TurnMessage,
        user_ids: &[String],
    ) -> Vec<DeliveryResult> {
        let frame = ServerFrame::ConversationUpdate {
            conversation_id: conversation_id.to_string(),
            payload: ConversationUpdate::Message {
                message: message.clone(),
            },
            timestamp: Utc::now().timestamp_millis(),
        };

        let futures: Vec<_> = user_ids
            .iter()
            .map(|user_id| self.deliver_one(user_id, frame.clone(), message))
            .collect();
        join_all(futures).await
    }

    async fn deliver_one(
        &self,
        user_id: &str,
        frame: ServerFrame,
        message: &TurnMessage,
    ) -> DeliveryResult {
        if self.registry.send_to_user(user_id, frame) {
            return DeliveryResult {
                user_id: user_id.to_string(),
                via: DeliveryVia::Live,
                push_id: None,
                reason: None,
            };
        }

        let Some(token) = self.push_store.get(user_id) else {
            return DeliveryResult {
                user_id: user_id.to_string(),
                via: DeliveryVia::None,
                push_id: None,
                reason: Some("offline and no push token".to_string()),
            };
        };

        if !self.config.enabled {
            return DeliveryResult {
                user_id: user_id.to_string(),
                via: DeliveryVia::None,
                push_id: None,
                reason: Some("offline and push backend not configured".to_string()),
            };
        }

        let _permit = self.semaphore.acquire().await;
        match self.dispatch_push(&token, message).await {
            Ok(push_id) => DeliveryResult {
                user_id: user_id.to_string(),
                via: DeliveryVia::Push,
                push_id: Some(push_id),
                reason: None,
            },
            Err(reason) => DeliveryResult {
                user_id: user_id.to_string(),
                via: DeliveryVia::None,
                push_id: None,
                reason: Some(reason),
            },
        }
    }

    async fn dispatch_push(
        &self,
        token: &conclave_domain::model::PushToken,
        message: &TurnMessage,
    ) -> Result<String, String> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| "push backend not configured".to_string())?;
        let jwt = signer.token().map_err(|e| e.to_string())?;

        let environment_path = match token.environment {
            PushEnvironment::Production => "",
            PushEnvironment::Sandbox => "sandbox/",
        };
        let url = format!(
            "{}/{}3/device/{}",
            self.config.endpoint.trim_end_matches('/'),
            environment_path,
            token.device_token,
        );

        let body = ApnsAlert {
            aps: ApnsBody {
                alert: ApnsAlertText {
                    title: &message.agent_name,
                    body: &message.content,
                },
            },
            conversation_id: &message.conversation_id,
            message_id: &message.message_id,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(jwt)
            .header("apns-topic", &self.config.topic)
            .header("apns-push-type", "alert")
            .header("apns-priority", "10")
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("push transport error: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(format!("push rejected: {status}: {text}"));
        }

        Ok(response
            .headers()
            .get("apns-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string())
    }
}
