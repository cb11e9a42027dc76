//! Refresh Loop: periodically pulls SIP credentials and the intercom list
//! from the host's REST account service and (re)builds the
//! [`Coordinator`] when credentials rotate (spec §4.7).
//!
//! The REST client itself is out of scope (spec §1) — [`SipAccountSource`]
//! stands in for it, implemented by the host.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::coordinator::Coordinator;
use crate::credentials::Credentials;
use crate::error::VoipResult;
use crate::observer::CoreObserver;

/// Default cycle interval (spec §4.7).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);
/// Minimum cycle interval the host may configure.
pub const MIN_INTERVAL: Duration = Duration::from_secs(600);
/// Bounds of the randomized jitter slept before every cycle but the first.
const JITTER_MIN: Duration = Duration::from_secs(60);
const JITTER_MAX: Duration = Duration::from_secs(180);
/// Retries attempted for transient connection errors on the first cycle
/// only (spec §4.7).
const FIRST_CYCLE_MAX_RETRIES: u32 = 10;
/// `safe_start` retry count passed to a freshly constructed Coordinator.
const COORDINATOR_START_RETRIES: u32 = 10;

/// One registered SIP intercom/door station, as surfaced to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntercomEntry {
    pub stream_url: String,
    pub mute: bool,
    pub sip_login: String,
}

/// The REST account service the refresh loop polls. Implemented by the
/// host; out of scope here beyond this contract (spec §1, §4.7).
#[async_trait::async_trait]
pub trait SipAccountSource: Send + Sync {
    async fn sip_settings(&self) -> VoipResult<Credentials>;
    async fn intercoms(&self) -> VoipResult<HashMap<String, IntercomEntry>>;
}

/// Aggregated state the refresh loop publishes for the host to read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshState {
    pub intercoms: HashMap<String, IntercomEntry>,
    pub last_error: Option<String>,
    /// When the last cycle (successful or not) finished.
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl RefreshState {
    /// Serialize for a host status endpoint.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Periodic task described in spec §4.7. Owns the current [`Coordinator`]
/// and swaps it out when credentials change.
pub struct RefreshLoop {
    source: Arc<dyn SipAccountSource>,
    observer: Arc<dyn CoreObserver>,
    local_ip: String,
    include_video: bool,
    interval: Duration,
    credentials: Mutex<Option<Credentials>>,
    coordinator: Mutex<Option<Arc<Coordinator>>>,
    state: Mutex<RefreshState>,
}

impl RefreshLoop {
    /// `interval` is clamped to [`MIN_INTERVAL`].
    pub fn new(
        source: Arc<dyn SipAccountSource>,
        observer: Arc<dyn CoreObserver>,
        local_ip: String,
        include_video: bool,
        interval: Duration,
    ) -> Arc<RefreshLoop> {
        Arc::new(RefreshLoop {
            source,
            observer,
            local_ip,
            include_video,
            interval: interval.max(MIN_INTERVAL),
            credentials: Mutex::new(None),
            coordinator: Mutex::new(None),
            state: Mutex::new(RefreshState::default()),
        })
    }

    pub async fn state(&self) -> RefreshState {
        self.state.lock().await.clone()
    }

    pub async fn coordinator(&self) -> Option<Arc<Coordinator>> {
        self.coordinator.lock().await.clone()
    }

    /// Run the loop forever. Intended to be spawned as its own task by the
    /// host; returns only if the source never resolves on the first cycle
    /// after exhausting retries.
    pub async fn run(self: Arc<Self>) -> VoipResult<()> {
        self.run_cycle(true).await?;
        loop {
            let jitter = JITTER_MIN + rand_duration_within(JITTER_MAX - JITTER_MIN);
            tokio::time::sleep(jitter).await;
            if let Err(e) = self.run_cycle(false).await {
                warn!(error = %e, "refresh cycle failed, surfacing state flag");
                let mut state = self.state.lock().await;
                state.last_error = Some(e.to_string());
                state.last_checked_at = Some(Utc::now());
            }
            tokio::time::sleep(self.interval - jitter.min(self.interval)).await;
        }
    }

    async fn run_cycle(&self, first: bool) -> VoipResult<()> {
        let settings = if first {
            self.fetch_settings_with_retry().await?
        } else {
            self.source.sip_settings().await?
        };

        let changed = {
            let current = self.credentials.lock().await;
            match current.as_ref() {
                Some(existing) => existing.changed_from(&settings),
                None => true,
            }
        };

        if changed {
            info!("SIP credentials changed, rebuilding coordinator");
            self.rebuild_coordinator(settings.clone()).await;
            *self.credentials.lock().await = Some(settings);
        }

        let intercoms = self.source.intercoms().await?;
        let mut state = self.state.lock().await;
        state.intercoms = intercoms;
        state.last_error = None;
        state.last_checked_at = Some(Utc::now());
        Ok(())
    }

    async fn fetch_settings_with_retry(&self) -> VoipResult<Credentials> {
        let mut attempt = 0;
        loop {
            match self.source.sip_settings().await {
                Ok(settings) => return Ok(settings),
                Err(e) if attempt < FIRST_CYCLE_MAX_RETRIES => {
                    attempt += 1;
                    warn!(error = %e, attempt, "initial sip_settings fetch failed, retrying");
                    tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn rebuild_coordinator(&self, credentials: Credentials) {
        if let Some(old) = self.coordinator.lock().await.take() {
            old.stop().await;
        }
        let coordinator = Coordinator::new(credentials, self.local_ip.clone(), self.include_video, self.observer.clone(), false);
        let started = coordinator.clone();
        tokio::spawn(async move {
            if let Err(e) = started.safe_start(COORDINATOR_START_RETRIES, Duration::from_secs(5)).await {
                warn!(error = %e, "coordinator safe_start exhausted its retries");
            }
        });
        *self.coordinator.lock().await = Some(coordinator);
    }
}

fn rand_duration_within(span: Duration) -> Duration {
    let millis = span.as_millis().max(1) as u64;
    Duration::from_millis(rand::random::<u64>() % millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NullObserver;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSource {
        credentials: Credentials,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SipAccountSource for FixedSource {
        async fn sip_settings(&self) -> VoipResult<Credentials> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.credentials.clone())
        }

        async fn intercoms(&self) -> VoipResult<HashMap<String, IntercomEntry>> {
            Ok(HashMap::new())
        }
    }

    fn creds(password: &str) -> Credentials {
        Credentials::new("217.0.0.1", 9740, "D100000", password, "127.0.0.1", 0)
    }

    #[tokio::test]
    async fn first_cycle_builds_a_coordinator_from_fetched_credentials() {
        let source = Arc::new(FixedSource {
            credentials: creds("a"),
            calls: AtomicUsize::new(0),
        });
        let refresh = RefreshLoop::new(source, Arc::new(NullObserver), "127.0.0.1".into(), false, MIN_INTERVAL);
        refresh.run_cycle(true).await.unwrap();
        assert!(refresh.coordinator().await.is_some());
    }

    #[tokio::test]
    async fn interval_is_clamped_to_the_minimum() {
        let source = Arc::new(FixedSource {
            credentials: creds("a"),
            calls: AtomicUsize::new(0),
        });
        let refresh = RefreshLoop::new(source, Arc::new(NullObserver), "127.0.0.1".into(), false, Duration::from_secs(1));
        assert_eq!(refresh.interval, MIN_INTERVAL);
    }
}
