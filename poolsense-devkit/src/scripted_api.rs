/*!
PoolApi scripté pour tester le coordinator

Each endpoint answers a fixed reply until the test changes it. Optional
per-endpoint delays make concurrency observable: the double tracks how many
profile fetches overlap and how many calls each endpoint received.
*/

use async_trait::async_trait;
use poolsense_kernel::api::{Endpoint, PoolApi};
use poolsense_kernel::error::{ApiResult, PoolApiError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum ScriptedFailure {
    Auth(u16),
    Api(u16, String),
    Network(String),
    Decode(String),
}

impl ScriptedFailure {
    fn into_error(self, endpoint: Endpoint) -> PoolApiError {
        let endpoint = endpoint.name().to_string();
        match self {
            ScriptedFailure::Auth(status) => PoolApiError::Auth { endpoint, status },
            ScriptedFailure::Api(status, body) => PoolApiError::Api {
                endpoint,
                status,
                body,
            },
            ScriptedFailure::Network(message) => PoolApiError::Network {
                endpoint,
                source: message.into(),
            },
            ScriptedFailure::Decode(message) => PoolApiError::Decode { endpoint, message },
        }
    }
}

#[derive(Default)]
struct Script {
    replies: HashMap<Endpoint, Result<Value, ScriptedFailure>>,
    delays: HashMap<Endpoint, Duration>,
    calls: HashMap<Endpoint, usize>,
    params: Vec<(Endpoint, Vec<String>)>,
}

/// Unscripted endpoints answer `{}`.
#[derive(Clone, Default)]
pub struct ScriptedPoolApi {
    script: Arc<Mutex<Script>>,
    profile_in_flight: Arc<AtomicUsize>,
    max_profile_in_flight: Arc<AtomicUsize>,
}

impl ScriptedPoolApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, endpoint: Endpoint, payload: Value) -> &Self {
        self.script.lock().unwrap().replies.insert(endpoint, Ok(payload));
        self
    }

    pub fn fail(&self, endpoint: Endpoint, failure: ScriptedFailure) -> &Self {
        self.script.lock().unwrap().replies.insert(endpoint, Err(failure));
        self
    }

    pub fn delay(&self, endpoint: Endpoint, delay: Duration) -> &Self {
        self.script.lock().unwrap().delays.insert(endpoint, delay);
        self
    }

    /// Every supplementary endpoint fails with the same error.
    pub fn fail_supplementary(&self, failure: ScriptedFailure) -> &Self {
        for endpoint in Endpoint::ALL {
            if endpoint != Endpoint::UserProfile {
                self.fail(endpoint, failure.clone());
            }
        }
        self
    }

    pub fn calls(&self, endpoint: Endpoint) -> usize {
        self.script
            .lock()
            .unwrap()
            .calls
            .get(&endpoint)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.script.lock().unwrap().calls.values().sum()
    }

    pub fn params(&self, endpoint: Endpoint) -> Vec<Vec<String>> {
        self.script
            .lock()
            .unwrap()
            .params
            .iter()
            .filter(|(e, _)| *e == endpoint)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Highest number of profile fetches seen running at once.
    pub fn max_concurrent_profiles(&self) -> usize {
        self.max_profile_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PoolApi for ScriptedPoolApi {
    async fn fetch(&self, endpoint: Endpoint, params: &[&str]) -> ApiResult<Value> {
        let (reply, delay) = {
            let mut script = self.script.lock().unwrap();
            *script.calls.entry(endpoint).or_insert(0) += 1;
            script
                .params
                .push((endpoint, params.iter().map(|p| p.to_string()).collect()));
            let reply = script
                .replies
                .get(&endpoint)
                .cloned()
                .unwrap_or_else(|| Ok(Value::Object(Default::default())));
            (reply, script.delays.get(&endpoint).copied())
        };

        let _guard = if endpoint == Endpoint::UserProfile {
            let now = self.profile_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_profile_in_flight.fetch_max(now, Ordering::SeqCst);
            Some(InFlight(&self.profile_in_flight))
        } else {
            None
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        log::debug!("[scripted] {} -> {}", endpoint.name(), if reply.is_ok() { "ok" } else { "error" });
        reply.map_err(|failure| failure.into_error(endpoint))
    }
}
