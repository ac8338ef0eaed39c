/**
 * BRAIINS POOL API CLIENT - Exécuteur de requêtes stateless
 *
 * ROLE:
 * One authenticated GET per logical endpoint, decoded as JSON, or a typed
 * `PoolApiError`. No retries, no caching, no shared mutable state: the only
 * state is the transport and the credential, both immutable.
 *
 * LAYERS:
 * - `Endpoint` = name + URL template with positional `{}` placeholders
 * - `HttpTransport` / `PoolResponse` = the {status, json, text} seam (reqwest in
 *   production, stubs in tests)
 * - `PoolApi` = the seam the refresh coordinator depends on
 */

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use time::{Date, OffsetDateTime};
use tracing::{debug, error};

use crate::error::{ApiResult, PoolApiError, TransportError};

pub const DEFAULT_BASE_URL: &str = "https://pool.braiins.com";
pub const DEFAULT_COIN: &str = "btc";
pub const DEFAULT_HASH_RATE_GROUP: &str = "user";
pub const DEFAULT_HISTORY_DAYS: u16 = 7;

/// Header name → value template; `{}` is replaced by the raw token.
pub const API_HEADERS: &[(&str, &str)] = &[("Pool-Auth-Token", "{}")];

/// Pool API endpoints, in the order a cycle requests them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    UserProfile,
    PoolStats,
    DailyRewards,
    DailyHashRate,
    BlockRewards,
    Workers,
    Payouts,
}

impl Endpoint {
    pub const ALL: [Endpoint; 7] = [
        Endpoint::UserProfile,
        Endpoint::PoolStats,
        Endpoint::DailyRewards,
        Endpoint::DailyHashRate,
        Endpoint::BlockRewards,
        Endpoint::Workers,
        Endpoint::Payouts,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Endpoint::UserProfile => "user_profile",
            Endpoint::PoolStats => "pool_stats",
            Endpoint::DailyRewards => "daily_rewards",
            Endpoint::DailyHashRate => "daily_hash_rate",
            Endpoint::BlockRewards => "block_rewards",
            Endpoint::Workers => "workers",
            Endpoint::Payouts => "payouts",
        }
    }

    /// Path template. Placeholders are positional.
    pub fn template(self) -> &'static str {
        match self {
            Endpoint::UserProfile => "/accounts/profile/json/{}/",
            Endpoint::PoolStats => "/stats/json/{}/",
            Endpoint::DailyRewards => "/accounts/rewards/json/{}/",
            // group, coin
            Endpoint::DailyHashRate => "/accounts/hash_rate_daily/json/{}/{}/",
            // coin, from, to
            Endpoint::BlockRewards => "/accounts/block_rewards/json/{}?from={}&to={}",
            Endpoint::Workers => "/accounts/workers/json/{}/",
            // coin, from, to
            Endpoint::Payouts => "/accounts/payouts/json/{}?from={}&to={}",
        }
    }

    pub fn placeholder_count(self) -> usize {
        self.template().matches("{}").count()
    }

    /// Substitutes `params` into the template in order. Date ordering is not checked.
    ///
    /// Callers must pass exactly `placeholder_count()` params; only debug builds
    /// assert it, release builds render missing params as empty segments.
    pub fn render(self, params: &[&str]) -> String {
        debug_assert_eq!(
            self.placeholder_count(),
            params.len(),
            "wrong parameter count for {}",
            self.name()
        );
        let template = self.template();
        let mut out = String::with_capacity(template.len() + 24);
        let mut rest = template;
        let mut params = params.iter();
        while let Some(pos) = rest.find("{}") {
            out.push_str(&rest[..pos]);
            out.push_str(params.next().copied().unwrap_or_default());
            rest = &rest[pos + 2..];
        }
        out.push_str(rest);
        out
    }
}

/// Inclusive `from`/`to` pair sent as ISO `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: Date,
    pub to: Date,
}

impl DateRange {
    pub fn ending_on(to: Date, days: u16) -> Self {
        let from = to
            .checked_sub(time::Duration::days(i64::from(days)))
            .unwrap_or(Date::MIN);
        Self { from, to }
    }

    /// Last `days` days ending today (UTC).
    pub fn last_days(days: u16) -> Self {
        Self::ending_on(OffsetDateTime::now_utc().date(), days)
    }

    pub fn params(&self) -> (String, String) {
        (iso_date(self.from), iso_date(self.to))
    }
}

pub fn iso_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Body read failures, split so the client can tell decode errors from transport errors.
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("failed to read response body: {0}")]
    Transport(#[source] TransportError),
    #[error("{0}")]
    Decode(String),
}

/// Minimal view of an HTTP response: {status, read-json, read-text}.
#[async_trait]
pub trait PoolResponse: Send {
    fn status(&self) -> u16;

    async fn text(&mut self) -> Result<String, BodyError>;

    async fn json(&mut self) -> Result<Value, BodyError> {
        let text = self.text().await?;
        serde_json::from_str(&text).map_err(|e| BodyError::Decode(e.to_string()))
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
    ) -> Result<Box<dyn PoolResponse>, TransportError>;
}

/// Production transport backed by a pooled `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("poolsense/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
    ) -> Result<Box<dyn PoolResponse>, TransportError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        let response = request.send().await?;
        Ok(Box::new(ReqwestResponse {
            status: response.status().as_u16(),
            inner: Some(response),
        }))
    }
}

struct ReqwestResponse {
    status: u16,
    inner: Option<reqwest::Response>,
}

impl ReqwestResponse {
    fn take(&mut self) -> Result<reqwest::Response, BodyError> {
        self.inner
            .take()
            .ok_or_else(|| BodyError::Transport("response body already consumed".into()))
    }
}

#[async_trait]
impl PoolResponse for ReqwestResponse {
    fn status(&self) -> u16 {
        self.status
    }

    async fn text(&mut self) -> Result<String, BodyError> {
        self.take()?
            .text()
            .await
            .map_err(|e| BodyError::Transport(Box::new(e)))
    }

    async fn json(&mut self) -> Result<Value, BodyError> {
        self.take()?.json::<Value>().await.map_err(|e| {
            if e.is_decode() {
                BodyError::Decode(e.to_string())
            } else {
                BodyError::Transport(Box::new(e))
            }
        })
    }
}

/// Everything the refresh coordinator needs from the pool.
#[async_trait]
pub trait PoolApi: Send + Sync {
    async fn fetch(&self, endpoint: Endpoint, params: &[&str]) -> ApiResult<Value>;

    async fn user_profile(&self, coin: &str) -> ApiResult<Value> {
        self.fetch(Endpoint::UserProfile, &[coin]).await
    }

    async fn pool_stats(&self, coin: &str) -> ApiResult<Value> {
        self.fetch(Endpoint::PoolStats, &[coin]).await
    }

    async fn daily_rewards(&self, coin: &str) -> ApiResult<Value> {
        self.fetch(Endpoint::DailyRewards, &[coin]).await
    }

    async fn daily_hash_rate(&self, coin: &str, group: &str) -> ApiResult<Value> {
        self.fetch(Endpoint::DailyHashRate, &[group, coin]).await
    }

    async fn block_rewards(&self, coin: &str, range: &DateRange) -> ApiResult<Value> {
        let (from, to) = range.params();
        self.fetch(Endpoint::BlockRewards, &[coin, &from, &to]).await
    }

    async fn workers(&self, coin: &str) -> ApiResult<Value> {
        self.fetch(Endpoint::Workers, &[coin]).await
    }

    async fn payouts(&self, coin: &str, range: &DateRange) -> ApiResult<Value> {
        let (from, to) = range.params();
        self.fetch(Endpoint::Payouts, &[coin, &from, &to]).await
    }
}

pub struct PoolApiClient<T> {
    transport: T,
    base_url: String,
    api_key: String,
}

impl<T: HttpTransport> PoolApiClient<T> {
    pub fn new(transport: T, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            transport,
            base_url,
            api_key: api_key.into(),
        }
    }

    pub fn url_for(&self, endpoint: Endpoint, params: &[&str]) -> String {
        format!("{}{}", self.base_url, endpoint.render(params))
    }

    fn auth_headers(&self) -> Vec<(&'static str, String)> {
        API_HEADERS
            .iter()
            .map(|(name, template)| (*name, template.replace("{}", &self.api_key)))
            .collect()
    }
}

impl PoolApiClient<ReqwestTransport> {
    pub fn with_reqwest(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self::new(ReqwestTransport::new(timeout)?, base_url, api_key))
    }
}

#[async_trait]
impl<T: HttpTransport> PoolApi for PoolApiClient<T> {
    async fn fetch(&self, endpoint: Endpoint, params: &[&str]) -> ApiResult<Value> {
        let name = endpoint.name();
        let url = self.url_for(endpoint, params);
        debug!(endpoint = name, %url, "Making API request");

        let mut response = self
            .transport
            .get(&url, &self.auth_headers())
            .await
            .map_err(|source| {
                error!(endpoint = name, "Network or client error: {}", source);
                PoolApiError::Network {
                    endpoint: name.to_string(),
                    source,
                }
            })?;

        let status = response.status();
        if status == 401 || status == 403 {
            error!(endpoint = name, status, "Braiins Pool API authentication error: invalid API key");
            return Err(PoolApiError::Auth {
                endpoint: name.to_string(),
                status,
            });
        }
        if !(200..300).contains(&status) {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
            error!(endpoint = name, status, "Braiins Pool API error: {}", body);
            return Err(PoolApiError::Api {
                endpoint: name.to_string(),
                status,
                body,
            });
        }

        response.json().await.map_err(|e| match e {
            BodyError::Decode(message) => PoolApiError::Decode {
                endpoint: name.to_string(),
                message,
            },
            BodyError::Transport(source) => PoolApiError::Network {
                endpoint: name.to_string(),
                source,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_templates_render_positionally() {
        assert_eq!(
            Endpoint::UserProfile.render(&["btc"]),
            "/accounts/profile/json/btc/"
        );
        assert_eq!(
            Endpoint::DailyHashRate.render(&["user", "btc"]),
            "/accounts/hash_rate_daily/json/user/btc/"
        );
        assert_eq!(
            Endpoint::Payouts.render(&["btc", "2024-01-01", "2024-01-08"]),
            "/accounts/payouts/json/btc?from=2024-01-01&to=2024-01-08"
        );
    }

    #[test]
    fn test_every_template_has_expected_arity() {
        for endpoint in Endpoint::ALL {
            let expected = match endpoint {
                Endpoint::DailyHashRate => 2,
                Endpoint::BlockRewards | Endpoint::Payouts => 3,
                _ => 1,
            };
            assert_eq!(endpoint.placeholder_count(), expected, "{}", endpoint.name());
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "wrong parameter count for payouts")]
    fn test_render_checks_arity_in_debug_builds() {
        Endpoint::Payouts.render(&["btc"]);
    }

    #[test]
    fn test_date_range_defaults_to_week_window() {
        let range = DateRange::ending_on(date!(2024 - 03 - 05), DEFAULT_HISTORY_DAYS);
        assert_eq!(
            range.params(),
            ("2024-02-27".to_string(), "2024-03-05".to_string())
        );
    }

    #[test]
    fn test_header_template_substitutes_token() {
        struct NoTransport;
        #[async_trait]
        impl HttpTransport for NoTransport {
            async fn get(
                &self,
                _url: &str,
                _headers: &[(&'static str, String)],
            ) -> Result<Box<dyn PoolResponse>, TransportError> {
                Err("unused".into())
            }
        }

        let client = PoolApiClient::new(NoTransport, "https://pool.example/", "secret");
        assert_eq!(
            client.auth_headers(),
            vec![("Pool-Auth-Token", "secret".to_string())]
        );
        assert_eq!(
            client.url_for(Endpoint::Workers, &["btc"]),
            "https://pool.example/accounts/workers/json/btc/"
        );
    }
}
