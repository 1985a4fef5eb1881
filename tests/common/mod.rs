//! Shared test utilities
#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, Response},
};
use dispenser_gateway::api::{self, ApiState};
use dispenser_gateway::{DeviceConnection, DeviceSession, Gateway};
use serde_json::{Value, json};
use tokio::sync::mpsc;

/// Build the full API router around `gateway`
pub fn test_router(gateway: &Gateway) -> Router {
    api::router(Arc::new(ApiState::new(gateway.clone())), None)
}

/// A device attached to a gateway through an in-memory connection
pub struct FakeDevice {
    pub device_id: String,
    pub session: DeviceSession,
    outbound: mpsc::UnboundedReceiver<String>,
    sender: Option<mpsc::UnboundedSender<String>>,
}

impl FakeDevice {
    /// Open a connection and identify it with a status report
    pub async fn connect(gateway: &Gateway, device_id: &str, ball_count: u32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = DeviceSession::open(gateway.clone(), DeviceConnection::new(&tx));
        let mut device = Self {
            device_id: device_id.to_string(),
            session,
            outbound: rx,
            sender: Some(tx),
        };
        device.report(ball_count).await;
        device
    }

    /// Send a status report
    pub async fn report(&mut self, ball_count: u32) {
        let frame = json!({
            "type": "status",
            "device_id": self.device_id,
            "label": "Front desk",
            "uptime_s": 42,
            "free_heap": 180_000,
            "wifi_rssi": -60,
            "ip": "192.168.1.50",
            "cpu_freq_mhz": 240,
            "temp_c": 41.5,
            "ball_count": ball_count,
            "servo_open_angle": 90,
            "servo_settle_ms": 300,
            "dispenser": { "state": "idle", "last_dispense_ts": 0, "total_dispensed": 0, "error": null }
        });
        self.session.handle_text(&frame.to_string()).await;
    }

    /// Wait for the next command frame written to this device
    pub async fn next_command(&mut self) -> Value {
        let frame = self.outbound.recv().await.expect("connection closed");
        serde_json::from_str(&frame).expect("command frame is JSON")
    }

    /// Acknowledge a command
    pub async fn ack(&mut self, cmd_id: &str, success: bool, error: Option<&str>, data: Value) {
        let frame = json!({
            "type": "cmd_ack",
            "device_id": self.device_id,
            "cmd_id": cmd_id,
            "success": success,
            "error": error,
            "data": data,
        });
        self.session.handle_text(&frame.to_string()).await;
    }

    /// Drop the transport without running the close handler
    pub fn drop_transport(&mut self) {
        self.sender = None;
    }

    /// Close the connection, returning how many commands were cancelled
    pub async fn close(self) -> usize {
        self.session.close().await
    }
}

/// Build a GET request
pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("valid request")
}

/// Build a POST request with a raw body
pub fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .expect("valid request")
}

/// Build a POST request with a JSON body
pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    post(uri, body.to_string())
}

/// Read a response body as JSON
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("readable body");
    serde_json::from_slice(&bytes).expect("JSON body")
}
