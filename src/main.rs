use medley::api::{self, AppState};
use medley::config::Config;
use medley::encoder::FfmpegEncoder;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::fmt::init();

    // Staging and output directories must exist before the first upload.
    for dir in [&config.upload_dir, &config.output_dir] {
        if let Err(err) = tokio::fs::create_dir_all(dir).await {
            eprintln!("Failed to create directory {}: {err}", dir.display());
            std::process::exit(1);
        }
    }

    let encoder = Arc::new(FfmpegEncoder::new(
        config.ffmpeg_bin.clone(),
        config.ffprobe_bin.clone(),
    ));
    let state = AppState::new(config.clone(), encoder);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = api::router(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", config.addr, config.port))
        .await
        .expect("Failed to bind TCP listener");
    println!("Listening at {}:{}", config.addr, config.port);
    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}
