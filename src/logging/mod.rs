// Process-wide tracing setup and the chat interaction log


use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::config::InteractionLogConfig;

const DEFAULT_FILTER: &str = "info";
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

static SUBSCRIBER: OnceLock<bool> = OnceLock::new();

/// Install the global tracing subscriber
///
/// Only the first call has an effect. Returns whether this call installed it.
#[inline]
pub fn init() -> bool {
    let mut installed_now = false;

    SUBSCRIBER.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        installed_now = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok();
        installed_now
    });

    if !installed_now {
        debug!("Logging already configured");
    }
    installed_now
}

/// Receives one record per successful chat turn
pub trait InteractionSink: Send + Sync {
    fn record(&self, prompt: &str, response: &str);
}

/// Sink used when interaction logging is disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInteractionLog;

impl InteractionSink for NoopInteractionLog {
    #[inline]
    fn record(&self, _prompt: &str, _response: &str) {}
}

/// GELF 1.1 message carrying one chat turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GelfMessage {
    pub version: &'static str,
    pub host: String,
    pub short_message: String,
    pub timestamp: f64,
    pub level: u8,
    #[serde(rename = "_prompt")]
    pub prompt: String,
    #[serde(rename = "_response")]
    pub response: String,
}

impl GelfMessage {
    #[inline]
    pub fn interaction(host: &str, prompt: &str, response: &str) -> Self {
        let timestamp = Utc::now().timestamp_millis() as f64 / 1000.0;

        Self {
            version: "1.1",
            host: host.to_string(),
            short_message: "chat interaction".to_string(),
            timestamp,
            level: 6,
            prompt: prompt.to_string(),
            response: response.to_string(),
        }
    }
}

/// Posts interaction records to an HTTP GELF input from a blocking task
///
/// Delivery failures are logged and never reach the caller. Dropping the log
/// closes the queue; the task delivers what is left and exits.
#[derive(Debug)]
pub struct HttpInteractionLog {
    host: String,
    sender: Option<UnboundedSender<GelfMessage>>,
    worker: Option<JoinHandle<()>>,
}

impl HttpInteractionLog {
    /// Start the delivery task on the current tokio runtime
    #[inline]
    pub fn new(endpoint: Url) -> Result<Self> {
        let runtime =
            Handle::try_current().context("Interaction log requires a tokio runtime")?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(DELIVERY_TIMEOUT))
            .build()
            .into();

        let worker =
            runtime.spawn_blocking(move || deliver_messages(&agent, &endpoint, receiver));

        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "rag-chat".to_string());

        Ok(Self {
            host,
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Deliver queued records and wait for the delivery task to finish
    #[inline]
    pub async fn shutdown(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!("Interaction log task failed: {}", e);
            }
        }
    }
}

impl InteractionSink for HttpInteractionLog {
    #[inline]
    fn record(&self, prompt: &str, response: &str) {
        let Some(sender) = &self.sender else {
            warn!("Interaction log is shut down, dropping record");
            return;
        };

        if sender
            .send(GelfMessage::interaction(&self.host, prompt, response))
            .is_err()
        {
            warn!("Interaction log task is gone, dropping record");
        }
    }
}

fn deliver_messages(
    agent: &ureq::Agent,
    endpoint: &Url,
    mut receiver: UnboundedReceiver<GelfMessage>,
) {
    while let Some(message) = receiver.blocking_recv() {
        let payload = match serde_json::to_string(&message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize interaction record: {}", e);
                continue;
            }
        };

        match agent
            .post(endpoint.as_str())
            .header("Content-Type", "application/json")
            .send(&payload)
        {
            Ok(_) => debug!("Interaction record delivered to {}", endpoint),
            Err(e) => warn!("Failed to deliver interaction record to {}: {}", endpoint, e),
        }
    }
}

/// Build the sink selected in the configuration
#[inline]
pub fn interaction_sink(config: &InteractionLogConfig) -> Result<Box<dyn InteractionSink>> {
    if !config.enabled {
        return Ok(Box::new(NoopInteractionLog));
    }

    let endpoint = Url::parse(&config.endpoint)
        .with_context(|| format!("Invalid interaction log endpoint: {}", config.endpoint))?;
    Ok(Box::new(HttpInteractionLog::new(endpoint)?))
}
