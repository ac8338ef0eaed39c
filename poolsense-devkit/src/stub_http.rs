/*!
Transport HTTP stub pour tester le client API sans réseau

Routes replies by URL fragment and records every request (URL + headers) so
tests can assert on what the client actually sent.
*/

use async_trait::async_trait;
use poolsense_kernel::api::{BodyError, Endpoint, HttpTransport, PoolResponse};
use poolsense_kernel::error::TransportError;
use serde_json::Value;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub enum StubReply {
    Json(u16, Value),
    Text(u16, String),
    NetworkError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Unrouted URLs answer `200 {}`.
#[derive(Clone, Default)]
pub struct StubTransport {
    routes: Arc<Mutex<Vec<(String, StubReply)>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// Static part of an endpoint path, enough to tell endpoints apart.
pub fn endpoint_fragment(endpoint: Endpoint) -> &'static str {
    let template = endpoint.template();
    match template.find("{}") {
        Some(pos) => &template[..pos],
        None => template,
    }
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later routes for the same fragment replace earlier ones.
    pub fn route(&self, fragment: impl Into<String>, reply: StubReply) -> &Self {
        let fragment = fragment.into();
        let mut routes = self.routes.lock().unwrap();
        routes.retain(|(f, _)| *f != fragment);
        routes.push((fragment, reply));
        self
    }

    pub fn route_endpoint(&self, endpoint: Endpoint, reply: StubReply) -> &Self {
        self.route(endpoint_fragment(endpoint), reply)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, endpoint: Endpoint) -> Vec<RecordedRequest> {
        let fragment = endpoint_fragment(endpoint);
        self.requests()
            .into_iter()
            .filter(|r| r.url.contains(fragment))
            .collect()
    }

    fn reply_for(&self, url: &str) -> StubReply {
        self.routes
            .lock()
            .unwrap()
            .iter()
            .find(|(fragment, _)| url.contains(fragment.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| StubReply::Json(200, Value::Object(Default::default())))
    }
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn get(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
    ) -> Result<Box<dyn PoolResponse>, TransportError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.clone()))
                .collect(),
        });
        log::debug!("[stub] GET {}", url);

        match self.reply_for(url) {
            StubReply::Json(status, body) => Ok(Box::new(StubResponse::new(status, body.to_string()))),
            StubReply::Text(status, body) => Ok(Box::new(StubResponse::new(status, body))),
            StubReply::NetworkError(message) => Err(message.into()),
        }
    }
}

pub struct StubResponse {
    status: u16,
    body: String,
}

impl StubResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

#[async_trait]
impl PoolResponse for StubResponse {
    fn status(&self) -> u16 {
        self.status
    }

    async fn text(&mut self) -> Result<String, BodyError> {
        Ok(self.body.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fragments_do_not_overlap() {
        for a in Endpoint::ALL {
            for b in Endpoint::ALL {
                if a != b {
                    let url = b.render(&vec!["x"; b.placeholder_count()]);
                    assert!(!url.contains(endpoint_fragment(a)), "{} matches {}", a.name(), b.name());
                }
            }
        }
    }

    #[tokio::test]
    async fn test_routes_and_records() {
        let stub = StubTransport::new();
        stub.route_endpoint(Endpoint::Workers, StubReply::Json(200, json!({"workers": {}})));

        let mut resp = stub
            .get("https://pool/accounts/workers/json/btc/", &[("Pool-Auth-Token", "t".into())])
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.json().await.unwrap(), json!({"workers": {}}));

        let mut other = stub.get("https://pool/stats/json/btc/", &[]).await.unwrap();
        assert_eq!(other.json().await.unwrap(), json!({}));

        assert_eq!(stub.requests().len(), 2);
        assert_eq!(
            stub.requests_for(Endpoint::Workers)[0].header("pool-auth-token"),
            Some("t")
        );
    }
}
