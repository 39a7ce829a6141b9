//! Call endpoints: packet ingestion and call state queries.
//!
//! `POST /v1/call/stream/{call_id}` always answers 202 for a valid packet, whatever
//! its ordering. Enrichment runs afterwards in the background and its outcome is
//! only visible through `GET /v1/call/{call_id}`.

use crate::calls::AudioPacket;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::error::JsonPayloadError;
use actix_web::{web, HttpRequest, HttpResponse};

/// Body extractor config: extractor failures use the service's own error format.
///
/// Oversized bodies are 413, non-JSON content types 415, everything else
/// (malformed or incomplete packets) 400.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req: &HttpRequest| {
        let message = err.to_string();
        let app_err = match err {
            JsonPayloadError::OverflowKnownLength { .. } | JsonPayloadError::Overflow { .. } => {
                AppError::PayloadTooLarge(message)
            }
            JsonPayloadError::ContentType => AppError::UnsupportedMediaType(message),
            _ => AppError::BadRequest(message),
        };
        app_err.into()
    })
}

fn validate_packet(call_id: &str, packet: &AudioPacket) -> AppResult<()> {
    if call_id.trim().is_empty() {
        return Err(AppError::ValidationError(
            "call_id must not be empty".to_string(),
        ));
    }

    if packet.sequence < 1 {
        return Err(AppError::ValidationError(format!(
            "sequence must be >= 1, got {}",
            packet.sequence
        )));
    }

    if !packet.timestamp.is_finite() {
        return Err(AppError::ValidationError(
            "timestamp must be a finite number".to_string(),
        ));
    }

    Ok(())
}

/// Ingest one audio packet.
///
/// POST /v1/call/stream/{call_id}
/// Body: {"sequence": 1, "data": "...", "timestamp": 1700000000.0}
pub async fn ingest_packet(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<AudioPacket>,
) -> AppResult<HttpResponse> {
    let call_id = path.into_inner();
    let packet = body.into_inner();
    validate_packet(&call_id, &packet)?;

    let ingested = state.ingestion.ingest(&call_id, &packet).await?;

    state.record_packet(&ingested);

    Ok(HttpResponse::Accepted().json(ingested.ack))
}

/// Current state of a call.
///
/// GET /v1/call/{call_id}
pub async fn get_call(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let call_id = path.into_inner();

    match state.store.get(&call_id).await? {
        Some(call) => Ok(HttpResponse::Ok().json(call)),
        None => Err(AppError::NotFound(format!("call '{}' does not exist", call_id))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::store::{CallStore, MemoryCallStore};
    use crate::calls::{Call, CallStatus};
    use crate::config::AppConfig;
    use crate::enrichment::client::tests::ScriptedCapability;
    use crate::enrichment::EnrichmentError;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_state(capability: ScriptedCapability) -> (AppState, Arc<MemoryCallStore>) {
        let mut config = AppConfig::default();
        config.enrichment.backoff_unit_ms = 1;
        let store = Arc::new(MemoryCallStore::new());
        let state = AppState::with_components(config, store.clone(), Arc::new(capability));
        (state, store)
    }

    macro_rules! test_app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .app_data(json_config())
                    .route("/v1/call/stream/{call_id}", web::post().to(ingest_packet))
                    .route("/v1/call/{call_id}", web::get().to(get_call)),
            )
            .await
        };
    }

    fn packet_body(sequence: i64) -> serde_json::Value {
        json!({ "sequence": sequence, "data": "chunk", "timestamp": 1700000000.5 })
    }

    async fn wait_for_terminal(store: &MemoryCallStore, call_id: &str) -> Call {
        for _ in 0..500 {
            let call = store.get(call_id).await.unwrap().unwrap();
            if call.status.is_terminal() {
                return call;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("call {} never reached a terminal status", call_id);
    }

    #[actix_web::test]
    async fn test_ingest_returns_accepted() {
        let (state, _store) = test_state(ScriptedCapability::new(vec![]));
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/v1/call/stream/X")
            .set_json(packet_body(1))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(
            body,
            json!({ "status": "accepted", "call_id": "X", "sequence": 1 })
        );
    }

    #[actix_web::test]
    async fn test_out_of_order_packet_is_still_accepted() {
        let (state, store) = test_state(ScriptedCapability::new(vec![]));
        let app = test_app!(state.clone());

        for sequence in [8, 5] {
            let req = test::TestRequest::post()
                .uri("/v1/call/stream/X")
                .set_json(packet_body(sequence))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::ACCEPTED);
        }

        let call = store.get("X").await.unwrap().unwrap();
        assert_eq!(call.last_sequence, 8);
        assert_eq!(call.packet_count, 1);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.packets_accepted, 2);
        assert_eq!(metrics.packets_out_of_order, 1);
        assert_eq!(metrics.gaps_detected, 1);
    }

    #[actix_web::test]
    async fn test_zero_sequence_is_rejected() {
        let (state, store) = test_state(ScriptedCapability::new(vec![]));
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/v1/call/stream/X")
            .set_json(packet_body(0))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "validation_error");
        assert!(store.get("X").await.unwrap().is_none());
    }

    #[actix_web::test]
    async fn test_missing_field_is_rejected() {
        let (state, _store) = test_state(ScriptedCapability::new(vec![]));
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/v1/call/stream/X")
            .set_json(json!({ "sequence": 1, "timestamp": 1.0 }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "bad_request");
    }

    #[actix_web::test]
    async fn test_oversized_body_is_payload_too_large() {
        let (state, store) = test_state(ScriptedCapability::new(vec![]));
        let app = test_app!(state);

        let huge = "a".repeat(3 * 1024 * 1024);
        let req = test::TestRequest::post()
            .uri("/v1/call/stream/X")
            .set_json(json!({ "sequence": 1, "data": huge, "timestamp": 1.0 }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "payload_too_large");
        assert!(store.get("X").await.unwrap().is_none());
    }

    #[actix_web::test]
    async fn test_non_json_content_type_is_unsupported() {
        let (state, _store) = test_state(ScriptedCapability::new(vec![]));
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/v1/call/stream/X")
            .insert_header(("content-type", "text/plain"))
            .set_payload(r#"{"sequence": 1, "data": "x", "timestamp": 1.0}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "unsupported_media_type");
    }

    #[actix_web::test]
    async fn test_get_unknown_call_is_not_found() {
        let (state, _store) = test_state(ScriptedCapability::new(vec![]));
        let app = test_app!(state);

        let req = test::TestRequest::get().uri("/v1/call/nobody").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_threshold_packet_completes_call_in_background() {
        let capability = ScriptedCapability::new(vec![]).with_latency(Duration::from_millis(50));
        let (state, store) = test_state(capability);
        let app = test_app!(state);

        for sequence in 1..=10 {
            let req = test::TestRequest::post()
                .uri("/v1/call/stream/X")
                .set_json(packet_body(sequence))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::ACCEPTED);
        }

        // The tenth request returned before enrichment finished.
        let call = store.get("X").await.unwrap().unwrap();
        assert!(!call.status.is_terminal());

        wait_for_terminal(&store, "X").await;
        let req = test::TestRequest::get().uri("/v1/call/X").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "COMPLETED");
        assert_eq!(body["packet_count"], 10);
        assert_eq!(body["transcription"], "hello");
        assert_eq!(body["sentiment"], "positive");
    }

    #[actix_web::test]
    async fn test_failed_enrichment_is_visible_as_failed() {
        let capability = ScriptedCapability::failing(5, EnrichmentError::transient);
        let (state, store) = test_state(capability);
        let app = test_app!(state);

        for sequence in 1..=10 {
            let req = test::TestRequest::post()
                .uri("/v1/call/stream/X")
                .set_json(packet_body(sequence))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::ACCEPTED);
        }

        let call = wait_for_terminal(&store, "X").await;
        assert_eq!(call.status, CallStatus::Failed);

        let req = test::TestRequest::get().uri("/v1/call/X").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "FAILED");
        assert!(body["transcription"].is_null());
        assert!(body["sentiment"].is_null());
    }
}
