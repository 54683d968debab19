pub mod api;
mod config;
mod gtfs;

use std::sync::Arc;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use config::Config;
use gtfs::GtfsService;

#[derive(OpenApi)]
#[openapi(
    info(title = "NextRide API", version = "0.1.0"),
    paths(
        api::stops::search_stops,
        api::stops::nearby_stops,
        api::departures::stop_departures,
        api::health::health_check,
        api::health::service_info,
    ),
    components(schemas(
        api::ErrorResponse,
        api::stops::SearchResponse,
        api::stops::NearbyResponse,
        api::stops::Location,
        api::departures::DeparturesResponse,
        api::health::HealthResponse,
        api::health::ServiceInfo,
        api::health::EndpointGuide,
        gtfs::Departure,
        gtfs::StopMatch,
        gtfs::NearbyStop,
        gtfs::StoreStatistics,
    )),
    tags(
        (name = "stops", description = "Stop search by name and location"),
        (name = "departures", description = "Departure boards from the national schedule"),
        (name = "health", description = "Service health check")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info,sqlx=warn".into()),
        )
        .init();

    // Load config; a missing file is fine, every field has a default
    let config = if std::path::Path::new("config.yaml").exists() {
        Config::load("config.yaml").expect("Failed to load config")
    } else {
        tracing::info!("No config.yaml found, using defaults");
        Config::default()
    };
    let timezone = config
        .feed
        .parsed_timezone()
        .expect("Invalid feed timezone in config");
    tracing::info!(feed = %config.feed.url, %timezone, "Loaded configuration");

    // Build CORS layer based on config
    let cors_layer = if config.cors_permissive {
        tracing::warn!("CORS: Permissive mode enabled (all origins allowed)");
        CorsLayer::permissive()
    } else if !config.cors_origins.is_empty() {
        tracing::info!(origins = ?config.cors_origins, "CORS: Restricting to configured origins");
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([axum::http::Method::GET, axum::http::Method::OPTIONS])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    } else {
        panic!("CORS configuration error: Either set 'cors_origins' with allowed origins, or set 'cors_permissive: true'");
    };

    let listen_addr = config.server.listen_addr.clone();
    let refresh_enabled = config.refresh.enabled;

    // Start the schedule engine
    let service = Arc::new(
        GtfsService::new(config, timezone).expect("Failed to initialize schedule engine"),
    );

    // Bring the store up in the background so the server binds immediately;
    // /api/health answers 503 until the first build lands
    let refresher = service.clone();
    if refresh_enabled {
        tokio::spawn(refresher.run_refresh_loop());
    } else {
        tokio::spawn(async move {
            if let Err(e) = refresher.refresh_if_stale().await {
                tracing::error!(error = %e, "Startup feed refresh failed");
            }
        });
    }

    // Build the app
    let app = Router::new()
        .merge(api::health::root_router(service.clone()))
        .nest("/api", api::router(service))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer)
                .layer(CompressionLayer::new()),
        );

    // Start server
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {listen_addr}: {e}"));

    tracing::info!("Server running on http://{listen_addr}");
    tracing::info!("Swagger UI: http://{listen_addr}/swagger-ui");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
