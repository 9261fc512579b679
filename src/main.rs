mod config;
mod dto;
mod handler;
mod service;
mod transport;

use std::sync::Arc;

use config::TransportConfig;
use service::RelayService;
use transport::{HttpApiTransport, Sender, SmtpTransport, Transport};

#[tokio::main]
async fn main() {
    // Log setup
    tracing_subscriber::fmt().init();

    // Load config
    let cfg = config::load_config().expect("failed to locate or load config file");
    tracing::info!("Successfully loaded email relay config");

    let sender = Sender {
        name: cfg.sender.name.clone(),
        address: cfg
            .sender_address()
            .expect("sender.address must be configured for the http_api transport"),
    };

    // Setup transport
    let transport: Arc<dyn Transport> = match cfg.transport.clone() {
        TransportConfig::Smtp(smtp) => {
            tracing::info!("Using SMTP relay {}", smtp.relay);
            Arc::new(SmtpTransport::new(smtp).unwrap_or_else(|e| {
                tracing::error!("Failed to configure SMTP transport: {e}");
                panic!("failed to configure SMTP transport: {e}");
            }))
        }
        TransportConfig::HttpApi(api) => {
            tracing::info!("Using {} HTTP API at {}", api.service, api.base_url);
            Arc::new(HttpApiTransport::new(api))
        }
    };

    // Setup service
    let service = Arc::new(RelayService::new(sender, transport));

    if cfg.verify_on_startup {
        match service.verify_transport().await {
            Ok(()) => tracing::info!("Email transport verified, ready to send emails"),
            Err(e) => tracing::error!("Email transport verification failed: {e}"),
        }
    }

    // Setup router
    let router = handler::router(service);

    // Start server
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", cfg.port))
        .await
        .expect("Failed to bind to address");
    let addr = listener.local_addr().expect("Failed to read local address");

    tracing::info!("Email relay starting, listening on {}", addr);

    axum::serve(listener, router)
        .await
        .expect("Failed to start server");
}
