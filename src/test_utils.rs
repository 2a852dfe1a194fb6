//! Scriptable fake transport for testing
//!
//! Channels are told apart by their `target` setting, so a single plugin
//! instance can play a healthy channel and a broken one side by side.

use crate::core::{ChannelConfig, ChannelType, Message, SendResult, Settings};
use crate::error::{DispatchError, Result};
use crate::plugin::{Capability, TransportPlugin};
use crate::schema::{settings, validate_by_schema};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a scripted send does.
#[derive(Debug, Clone)]
pub enum SendScript {
    Succeed,
    /// Returns a failed `SendResult` with this error text.
    Fail(String),
    /// Returns `Err` from `send_message`.
    Error(DispatchError),
    Panic,
    /// Waits (cancellably), then succeeds.
    Delay(Duration),
    /// Never completes until cancelled.
    Hang,
}

/// What a scripted health probe does.
#[derive(Debug, Clone)]
pub enum HealthScript {
    Healthy,
    Unhealthy(String),
    Panic,
    Delay(Duration),
}

struct Script<T> {
    queued: HashMap<String, VecDeque<T>>,
    sticky: HashMap<String, T>,
    calls: HashMap<String, u32>,
}

impl<T> Default for Script<T> {
    fn default() -> Self {
        Self {
            queued: HashMap::new(),
            sticky: HashMap::new(),
            calls: HashMap::new(),
        }
    }
}

impl<T: Clone> Script<T> {
    fn next(&mut self, target: &str) -> Option<T> {
        *self.calls.entry(target.to_string()).or_insert(0) += 1;
        self.queued
            .get_mut(target)
            .and_then(VecDeque::pop_front)
            .or_else(|| self.sticky.get(target).cloned())
    }
}

/// Fake transport plugin for testing
pub struct ScriptedTransport {
    channel_type: ChannelType,
    name: String,
    started: AtomicBool,
    stops: AtomicU32,
    fail_start: bool,
    fail_stop: bool,
    start_delay: Option<Duration>,
    sends: Mutex<Script<SendScript>>,
    probes: Mutex<Script<HealthScript>>,
    initialized_with: Mutex<Option<Settings>>,
}

fn target(config: &ChannelConfig) -> String {
    settings::str(&config.settings, "target")
        .unwrap_or_default()
        .to_string()
}

impl ScriptedTransport {
    pub fn new(channel_type: ChannelType) -> Self {
        Self {
            channel_type,
            name: format!("scripted-{}", channel_type),
            started: AtomicBool::new(false),
            stops: AtomicU32::new(0),
            fail_start: false,
            fail_stop: false,
            start_delay: None,
            sends: Mutex::new(Script::default()),
            probes: Mutex::new(Script::default()),
            initialized_with: Mutex::new(None),
        }
    }

    /// Makes `start` fail with a lifecycle error.
    pub fn fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Makes `stop` fail with a lifecycle error.
    pub fn fail_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    /// Delays `start` by `delay`.
    pub fn slow_start(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    /// Queues a one-shot send behavior for `target`.
    pub fn push_send(&self, target: &str, script: SendScript) {
        self.sends
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queued
            .entry(target.to_string())
            .or_default()
            .push_back(script);
    }

    /// Sets the behavior used once the queue for `target` is drained.
    pub fn always_send(&self, target: &str, script: SendScript) {
        self.sends
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sticky
            .insert(target.to_string(), script);
    }

    pub fn push_health(&self, target: &str, script: HealthScript) {
        self.probes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queued
            .entry(target.to_string())
            .or_default()
            .push_back(script);
    }

    pub fn always_health(&self, target: &str, script: HealthScript) {
        self.probes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sticky
            .insert(target.to_string(), script);
    }

    pub fn send_count(&self, target: &str) -> u32 {
        self.sends
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .get(target)
            .copied()
            .unwrap_or(0)
    }

    pub fn health_count(&self, target: &str) -> u32 {
        self.probes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .get(target)
            .copied()
            .unwrap_or(0)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Number of `stop` calls so far.
    pub fn stop_count(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    /// The options passed to the last `initialize` call.
    pub fn initialized_with(&self) -> Option<Settings> {
        self.initialized_with
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Settings for a scripted channel.
pub fn scripted_config(target: &str) -> ChannelConfig {
    ChannelConfig::with_settings(json!({ "target": target }))
}

#[async_trait]
impl TransportPlugin for ScriptedTransport {
    fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "0.0.0"
    }

    fn description(&self) -> &str {
        "Scripted transport for tests"
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "target": { "type": "string", "minLength": 1 }
            },
            "required": ["target"]
        })
    }

    async fn initialize(&self, options: &Settings) -> Result<()> {
        *self
            .initialized_with
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(options.clone());
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        if let Some(delay) = self.start_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_start {
            return Err(DispatchError::lifecycle(self.name.clone(), "start", "scripted start failure"));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
        if self.fail_stop {
            return Err(DispatchError::lifecycle(self.name.clone(), "stop", "scripted stop failure"));
        }
        Ok(())
    }

    async fn health_check(&self, config: &ChannelConfig) -> Result<()> {
        let target = target(config);
        let script = self
            .probes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next(&target);
        match script.unwrap_or(HealthScript::Healthy) {
            HealthScript::Healthy => Ok(()),
            HealthScript::Unhealthy(reason) => Err(DispatchError::Transport(reason)),
            HealthScript::Panic => panic!("scripted health panic for {}", target),
            HealthScript::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    fn validate_config(&self, settings: &Settings) -> Result<()> {
        Ok(validate_by_schema(settings, &self.config_schema())?)
    }

    async fn send_message(
        &self,
        config: &ChannelConfig,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<SendResult> {
        self.validate_config(&config.settings)?;
        let target = target(config);
        let script = self
            .sends
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next(&target);

        match script.unwrap_or(SendScript::Succeed) {
            SendScript::Succeed => Ok(SendResult::delivered()
                .with_message_id(message.id.clone())
                .with_metadata("target", target)),
            SendScript::Fail(reason) => Ok(SendResult::failed(reason)),
            SendScript::Error(error) => Err(error),
            SendScript::Panic => panic!("scripted send panic for {}", target),
            SendScript::Delay(delay) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(DispatchError::Cancelled),
                    _ = tokio::time::sleep(delay) => Ok(SendResult::delivered()
                        .with_message_id(message.id.clone())
                        .with_metadata("target", target)),
                }
            }
            SendScript::Hang => {
                cancel.cancelled().await;
                Err(DispatchError::Cancelled)
            }
        }
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::TextMessage, Capability::HealthCheck]
    }
}
