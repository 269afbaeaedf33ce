//! Test utilities for integration testing (available with `test-utils` feature).

use axum_test::TestServer;

use crate::config::{ChatProviderConfig, Config, DatabaseConfig, VoiceProviderConfig, WorkflowProviderConfig};

/// Build a test server around a fresh in-memory store.
pub async fn create_test_app(config: Config) -> TestServer {
    let app = crate::Application::new(config)
        .await
        .expect("Failed to create application");

    app.into_test_server()
}

/// Configuration with an in-memory store and dummy providers for every feature.
pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_url: None,
        database: DatabaseConfig::Memory,
        providers: crate::config::ProvidersConfig {
            chat: ChatProviderConfig::default(),
            workflow: WorkflowProviderConfig::Dummy,
            voice: VoiceProviderConfig::Dummy,
        },
        telephony: None,
        enable_metrics: false,
        enable_otel_export: false,
        ..Default::default()
    }
}
