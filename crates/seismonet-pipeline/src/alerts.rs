//! Alert dispatcher: consumes the store tail, evaluates the configured
//! rule set, deduplicates by key within a window, and delivers to
//! subscribers under per-subscriber rate limits. Delivery is
//! at-least-once; subscribers must be idempotent on `event_id`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use seismonet_models::{Alert, AlertLevel, ClassifiedEvent, EventLabel, SeismoResult};
use seismonet_store::{EventStore, Tail};

/// One alert rule; rules are evaluated top-down, first match wins.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertRule {
    /// Minimum magnitude (value, not CI bound) for the rule to fire
    pub min_magnitude: Option<f64>,
    /// Label the rule applies to; `None` matches any label
    pub label: Option<EventLabel>,
    pub level: AlertLevel,
    /// Dedup key template; `{label}` and `{region}` interpolate
    pub dedup_template: String,
}

impl AlertRule {
    fn matches(&self, event: &ClassifiedEvent) -> bool {
        if let Some(min) = self.min_magnitude {
            if event.magnitude.value < min {
                return false;
            }
        }
        if let Some(label) = self.label {
            if event.label != label {
                return false;
            }
        }
        true
    }

    /// Render the dedup key. `{region}` is the 1-degree lat/lon cell of the
    /// location (or "unlocated").
    fn dedup_key(&self, event: &ClassifiedEvent) -> String {
        let region = match &event.location {
            Some(loc) => format!("{}:{}", loc.latitude.floor(), loc.longitude.floor()),
            None => "unlocated".to_string(),
        };
        self.dedup_template
            .replace("{label}", event.label.as_str())
            .replace("{region}", &region)
    }
}

/// Dispatcher configuration (the `alerts.*` keys).
#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_rules")]
    pub rules: Vec<AlertRule>,
    #[serde(default = "default_dedup_window_s")]
    pub dedup_window_s: u64,
    #[serde(default = "default_per_subscriber_rps")]
    pub per_subscriber_rps: f64,
}

fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule {
            min_magnitude: Some(5.0),
            label: Some(EventLabel::Earthquake),
            level: AlertLevel::Critical,
            dedup_template: "{label}:{region}".to_string(),
        },
        AlertRule {
            min_magnitude: Some(3.5),
            label: Some(EventLabel::Earthquake),
            level: AlertLevel::Warn,
            dedup_template: "{label}:{region}".to_string(),
        },
        AlertRule {
            min_magnitude: None,
            label: None,
            level: AlertLevel::Info,
            dedup_template: "{label}:{region}".to_string(),
        },
    ]
}
fn default_dedup_window_s() -> u64 {
    300
}
fn default_per_subscriber_rps() -> f64 {
    1.0
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            dedup_window_s: default_dedup_window_s(),
            per_subscriber_rps: default_per_subscriber_rps(),
        }
    }
}

/// Outbound delivery target.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, alert: &Alert) -> SeismoResult<()>;
}

struct DedupEntry {
    first_seen: Instant,
    suppressed: u64,
}

struct SubscriberState {
    sink: Arc<dyn AlertSink>,
    tokens: f64,
    last_refill: Instant,
}

/// The dispatcher task. Resumes from a cursor persisted next to the store
/// so a restart re-tails without losing its place.
pub struct AlertDispatcher {
    config: AlertsConfig,
    subscribers: Vec<SubscriberState>,
    dedup: HashMap<String, DedupEntry>,
    cursor_path: PathBuf,
}

impl AlertDispatcher {
    pub fn new(
        config: AlertsConfig,
        subscribers: Vec<Arc<dyn AlertSink>>,
        state_dir: &std::path::Path,
    ) -> Self {
        Self {
            config,
            subscribers: subscribers
                .into_iter()
                .map(|sink| SubscriberState {
                    sink,
                    tokens: 1.0,
                    last_refill: Instant::now(),
                })
                .collect(),
            dedup: HashMap::new(),
            cursor_path: state_dir.join("alerts.cursor"),
        }
    }

    /// Last persisted tail cursor, or 0.
    pub fn recover_cursor(&self) -> u64 {
        std::fs::read_to_string(&self.cursor_path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Consume the store tail until `shutdown` flips.
    pub async fn run(mut self, store: Arc<EventStore>, mut shutdown: watch::Receiver<bool>) {
        let cursor = self.recover_cursor();
        let mut tail: Tail = store.tail(cursor);
        info!(cursor, "alert dispatcher tailing");

        loop {
            tokio::select! {
                item = tail.next() => match item {
                    Some((cursor, event)) => {
                        self.handle_event(&event).await;
                        if let Err(e) = std::fs::write(&self.cursor_path, cursor.to_string()) {
                            warn!("cursor persist failed: {}", e);
                        }
                    }
                    None => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("alert dispatcher stopped");
    }

    /// Evaluate rules and deliver. Public for tests.
    pub async fn handle_event(&mut self, event: &ClassifiedEvent) {
        let Some(rule) = self.config.rules.iter().find(|r| r.matches(event)) else {
            return;
        };
        let rule = rule.clone();
        let dedup_key = rule.dedup_key(event);
        let window = Duration::from_secs(self.config.dedup_window_s);

        // One alert per key per window; later hits bump a counter.
        match self.dedup.get_mut(&dedup_key) {
            Some(entry) if entry.first_seen.elapsed() < window => {
                entry.suppressed += 1;
                metrics::counter!("alerts_suppressed_total").increment(1);
                debug!(%dedup_key, suppressed = entry.suppressed, "alert deduplicated");
                return;
            }
            _ => {
                self.dedup.insert(
                    dedup_key.clone(),
                    DedupEntry {
                        first_seen: Instant::now(),
                        suppressed: 0,
                    },
                );
            }
        }
        self.dedup
            .retain(|_, entry| entry.first_seen.elapsed() < window);

        let alert = Alert {
            event_id: event.event_id,
            level: rule.level,
            issued_at: Utc::now(),
            payload: serde_json::json!({
                "label": event.label.as_str(),
                "magnitude": event.magnitude.value,
                "confidence": event.confidence,
                "location": event.location,
                "trigger_instant": event.trigger_instant(),
            }),
            dedup_key,
        };
        metrics::counter!("alerts_issued_total", "level" => alert.level.to_string())
            .increment(1);

        let rps = self.config.per_subscriber_rps;
        for sub in &mut self.subscribers {
            // Per-subscriber token bucket (burst of one window's refill).
            let elapsed = sub.last_refill.elapsed().as_secs_f64();
            sub.tokens = (sub.tokens + elapsed * rps).min(rps.max(1.0));
            sub.last_refill = Instant::now();
            if sub.tokens < 1.0 {
                let wait = Duration::from_secs_f64((1.0 - sub.tokens) / rps);
                tokio::time::sleep(wait).await;
                sub.tokens = 1.0;
            }
            sub.tokens -= 1.0;

            // At-least-once: two quick retries, then log and move on.
            let mut delivered = false;
            for attempt in 0..3 {
                match sub.sink.deliver(&alert).await {
                    Ok(()) => {
                        delivered = true;
                        break;
                    }
                    Err(e) => {
                        warn!(
                            subscriber = sub.sink.name(),
                            attempt, "alert delivery failed: {}", e
                        );
                        tokio::time::sleep(Duration::from_millis(50 * (attempt + 1))).await;
                    }
                }
            }
            if !delivered {
                metrics::counter!("alerts_delivery_failures_total",
                    "subscriber" => sub.sink.name().to_string())
                .increment(1);
            }
        }
    }
}
