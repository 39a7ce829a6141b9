use crate::{error::AppResult, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Read-only view of the configuration the process started with.
///
/// Only the storage backend kind is reported, not the database URL, since it may
/// carry credentials.
pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = &state.config;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "database": {
                "backend": if config.uses_memory_store() { "memory" } else { "sqlite" },
                "max_connections": config.database.max_connections
            },
            "enrichment": config.enrichment
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::store::MemoryCallStore;
    use crate::config::AppConfig;
    use crate::enrichment::client::tests::ScriptedCapability;
    use actix_web::{test, App};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_get_config_hides_database_url() {
        let mut config = AppConfig::default();
        config.database.url = "sqlite://secret@host/calls.db".to_string();
        let state = AppState::with_components(
            config,
            Arc::new(MemoryCallStore::new()),
            Arc::new(ScriptedCapability::new(vec![])),
        );
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/v1/config", web::get().to(get_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/config").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["config"]["database"]["backend"], "sqlite");
        assert_eq!(body["config"]["enrichment"]["packet_threshold"], 10);
        assert!(!body.to_string().contains("secret"));
    }
}
