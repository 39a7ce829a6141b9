use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};

/// Per-endpoint request counters.
///
/// Endpoints are keyed by route pattern (`POST /v1/call/stream/{call_id}`), so every
/// call shares one entry instead of growing the map per call id.
pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService { service }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let route = req.match_pattern().unwrap_or_else(|| "unmatched".to_string());
        let endpoint = format!("{} {}", req.method(), route);
        let app_state = req.app_data::<web::Data<AppState>>().cloned();

        if let Some(app_state) = &app_state {
            app_state.increment_request_count();
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            let is_error = match &result {
                Ok(response) => {
                    response.status().is_client_error() || response.status().is_server_error()
                }
                Err(_) => true,
            };

            if let Some(app_state) = app_state {
                app_state.record_endpoint_request(&endpoint, duration_ms, is_error);

                if is_error {
                    app_state.increment_error_count();
                }
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::store::MemoryCallStore;
    use crate::config::AppConfig;
    use crate::enrichment::client::tests::ScriptedCapability;
    use crate::handlers;
    use actix_web::{test, App};
    use serde_json::json;
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_endpoints_are_keyed_by_route_pattern() {
        let state = AppState::with_components(
            AppConfig::default(),
            Arc::new(MemoryCallStore::new()),
            Arc::new(ScriptedCapability::new(vec![])),
        );
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(MetricsMiddleware)
                .route(
                    "/v1/call/stream/{call_id}",
                    web::post().to(handlers::ingest_packet),
                )
                .route("/v1/call/{call_id}", web::get().to(handlers::get_call)),
        )
        .await;

        for call_id in ["A", "B"] {
            let req = test::TestRequest::post()
                .uri(&format!("/v1/call/stream/{}", call_id))
                .set_json(json!({ "sequence": 1, "data": "x", "timestamp": 1.0 }))
                .to_request();
            test::call_service(&app, req).await;
        }
        let req = test::TestRequest::get().uri("/v1/call/missing").to_request();
        test::call_service(&app, req).await;

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 3);
        assert_eq!(metrics.error_count, 1);
        assert_eq!(
            metrics.endpoint_metrics["POST /v1/call/stream/{call_id}"].request_count,
            2
        );
        assert_eq!(
            metrics.endpoint_metrics["GET /v1/call/{call_id}"].error_count,
            1
        );
    }
}
