/*!
# PoolSense DevKit - Stubs et utilitaires de test

Doubles for exercising the kernel without network or broker:
- stub HTTP transport routed by URL fragment (API client tests)
- scripted `PoolApi` with delays and call counters (coordinator tests)
- MQTT sink mock recording every message
- Braiins Pool payload builders
- test harness wiring all of the above around a real coordinator
*/

pub mod fixtures;
pub mod mqtt_stub;
pub mod scripted_api;
pub mod stub_http;
pub mod test_utils;

pub use mqtt_stub::MockMqttClient;
pub use scripted_api::{ScriptedFailure, ScriptedPoolApi};
pub use stub_http::{StubReply, StubTransport};
pub use test_utils::{RecordingPublisher, TestHarness};
