//! HTTP API application wiring (Axum router + service wiring).
//!
//! Layout:
//! - `services.rs`: infrastructure wiring (event store/bus, projections,
//!   dispatcher, receipt sequencer, scan stations)
//! - `routes/`: HTTP routes + handlers (one file per domain area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app() -> Router {
    let services = Arc::new(services::build_services().await);

    // Protected routes: require the gateway-injected caller context.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn(
            middleware::caller_context_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use koinonia_checkin::ScanPayload;
    use koinonia_core::{AggregateId, ParishId, RecorderId};
    use koinonia_registry::ParticipantId;
    use serde_json::Value;
    use std::time::Duration;

    struct TestServer {
        base: String,
        client: reqwest::Client,
        parish_id: ParishId,
        recorder_id: RecorderId,
    }

    impl TestServer {
        async fn spawn() -> Self {
            let app = build_app().await;
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            Self {
                base: format!("http://{addr}"),
                client: reqwest::Client::new(),
                parish_id: ParishId::new(),
                recorder_id: RecorderId::new(),
            }
        }

        fn post(&self, path: &str) -> reqwest::RequestBuilder {
            self.client
                .post(format!("{}{path}", self.base))
                .header("x-parish-id", self.parish_id.to_string())
                .header("x-recorder-id", self.recorder_id.to_string())
        }

        fn get(&self, path: &str) -> reqwest::RequestBuilder {
            self.client
                .get(format!("{}{path}", self.base))
                .header("x-parish-id", self.parish_id.to_string())
                .header("x-recorder-id", self.recorder_id.to_string())
        }

        /// Wait until the projection pump has caught up with a read.
        async fn wait_until_ok(&self, path: &str) {
            for _ in 0..50 {
                let status = self.get(path).send().await.unwrap().status();
                if status == reqwest::StatusCode::OK {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            panic!("projection never caught up for {path}");
        }

        async fn schedule_activity(&self, required_amount_minor: Option<i64>) -> String {
            let body = serde_json::json!({
                "name": "Sunday school outing",
                "required_amount_minor": required_amount_minor,
                "currency": required_amount_minor.map(|_| "CDF"),
                "starts_at": "2026-08-09T08:00:00Z",
                "ends_at": "2026-08-09T16:00:00Z",
            });
            let resp = self.post("/activities").json(&body).send().await.unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
            let id = resp.json::<Value>().await.unwrap()["id"]
                .as_str()
                .unwrap()
                .to_string();
            self.wait_until_ok(&format!("/activities/{id}")).await;
            id
        }

        async fn enroll_participant(&self, name: &str) -> String {
            let body = serde_json::json!({ "display_name": name, "kind": "child" });
            let resp = self.post("/participants").json(&body).send().await.unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
            let id = resp.json::<Value>().await.unwrap()["id"]
                .as_str()
                .unwrap()
                .to_string();
            self.wait_until_ok(&format!("/participants/{id}")).await;
            id
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn health_is_public_but_domain_routes_require_context() {
        let server = TestServer::spawn().await;

        let health = reqwest::get(format!("{}/health", server.base)).await.unwrap();
        assert_eq!(health.status(), reqwest::StatusCode::OK);

        let bare = reqwest::Client::new()
            .get(format!("{}/activities", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(bare.status(), reqwest::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn attendance_corrections_keep_a_single_record() {
        let server = TestServer::spawn().await;
        let activity = server.schedule_activity(None).await;
        let participant = server.enroll_participant("Grace K.").await;

        let record = |status: &'static str| {
            let server = &server;
            let activity = activity.clone();
            let participant = participant.clone();
            async move {
                let resp = server
                    .post(&format!("/activities/{activity}/attendance"))
                    .json(&serde_json::json!({
                        "participant_id": participant,
                        "status": status,
                    }))
                    .send()
                    .await
                    .unwrap();
                assert_eq!(resp.status(), reqwest::StatusCode::OK);
            }
        };

        record("present").await;
        record("excused").await;

        // The sheet converges to one record with the last write.
        let path = format!("/activities/{activity}/attendance");
        server.wait_until_ok(&path).await;
        for _ in 0..50 {
            let body: Value = server.get(&path).send().await.unwrap().json().await.unwrap();
            let items = body["items"].as_array().unwrap();
            if items.len() == 1 && items[0]["status"] == "excused" {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("attendance sheet never converged to the corrected record");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_participant_is_a_404() {
        let server = TestServer::spawn().await;
        let activity = server.schedule_activity(None).await;
        let ghost = ParticipantId::new(AggregateId::new());

        let resp = server
            .post(&format!("/activities/{activity}/attendance"))
            .json(&serde_json::json!({
                "participant_id": ghost.to_string(),
                "status": "present",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scan_path_accepts_then_debounces_duplicates() {
        let server = TestServer::spawn().await;
        let activity = server.schedule_activity(None).await;
        let participant = server.enroll_participant("Luc M.").await;

        let code = ScanPayload::new(ParticipantId::new(
            participant.parse::<AggregateId>().unwrap(),
        ))
        .encode();
        let scan_path = format!("/activities/{activity}/scan");

        let first: Value = server
            .post(&scan_path)
            .json(&serde_json::json!({ "code": code }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(first["accepted"], true);
        assert_eq!(first["attendance"]["source"], "qr-scan");

        // Camera still pointed at the same badge: debounced, no new write.
        let second: Value = server
            .post(&scan_path)
            .json(&serde_json::json!({ "code": code }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(second["accepted"], false);
        assert_eq!(second["reason"], "duplicate");

        let garbled: Value = server
            .post(&scan_path)
            .json(&serde_json::json!({ "code": "???" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(garbled["accepted"], false);
        assert_eq!(garbled["reason"], "malformed-code");

        // Station teardown is not an error and writes nothing.
        let released = server
            .client
            .delete(format!("{}{scan_path}", server.base))
            .header("x-parish-id", server.parish_id.to_string())
            .header("x-recorder-id", server.recorder_id.to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(released.status(), reqwest::StatusCode::NO_CONTENT);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn payments_accumulate_into_the_combined_status() {
        let server = TestServer::spawn().await;
        let activity = server.schedule_activity(Some(5_000)).await;
        let participant = server.enroll_participant("Esther N.").await;

        let pay = |amount: i64| {
            let server = &server;
            let activity = activity.clone();
            let participant = participant.clone();
            async move {
                let resp = server
                    .post(&format!("/activities/{activity}/contributions"))
                    .json(&serde_json::json!({
                        "participant_id": participant,
                        "amount_minor": amount,
                        "currency": "CDF",
                        "method": "cash",
                    }))
                    .send()
                    .await
                    .unwrap();
                assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
                resp.json::<Value>().await.unwrap()
            }
        };

        let first = pay(2_000).await;
        let receipt = first["receipt_id"].as_str().unwrap();
        assert!(receipt.starts_with("RC-"), "unexpected receipt {receipt}");

        let status_path =
            format!("/activities/{activity}/participants/{participant}/status");

        // Partial after the first payment.
        for _ in 0..50 {
            let body: Value = server
                .get(&status_path)
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if body["status"]["contribution"] == "partial" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let second = pay(3_000).await;
        assert_ne!(second["receipt_id"], first["receipt_id"]);

        server
            .post(&format!("/activities/{activity}/attendance"))
            .json(&serde_json::json!({
                "participant_id": participant,
                "status": "present",
            }))
            .send()
            .await
            .unwrap();

        for _ in 0..50 {
            let body: Value = server
                .get(&status_path)
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if body["status"]["presence"] == "present"
                && body["status"]["contribution"] == "paid"
                && body["total_paid_minor"] == 5_000
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("status never resolved to (present, paid)");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn balance_reports_each_currency_with_zero_defaults() {
        let server = TestServer::spawn().await;
        let activity = server.schedule_activity(Some(10_000)).await;
        let participant = server.enroll_participant("Divine B.").await;

        for (amount, currency) in [(10_000, "CDF"), (50, "USD")] {
            let resp = server
                .post(&format!("/activities/{activity}/contributions"))
                .json(&serde_json::json!({
                    "participant_id": participant,
                    "amount_minor": amount,
                    "currency": currency,
                    "method": "cash",
                }))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
        }

        let today = chrono::Utc::now().date_naive().to_string();
        let resp = server
            .post("/treasury/expenses")
            .json(&serde_json::json!({
                "entry_date": today,
                "amount_minor": 4_000,
                "currency": "CDF",
                "category": "transport",
                "counterparty": "Bus hire",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

        let balance_path = format!("/treasury/balance?period_start={today}&period_end={today}");
        for _ in 0..50 {
            let body: Value = server
                .get(&balance_path)
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            let balances = &body["balances"];
            if balances["CDF"]["income"] == 10_000
                && balances["CDF"]["expense"] == 4_000
                && balances["CDF"]["balance"] == 6_000
                && balances["USD"]["income"] == 50
                && balances["USD"]["expense"] == 0
                && balances["USD"]["balance"] == 50
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("balance never reflected both currencies");
    }
}
