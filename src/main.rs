mod config;
mod protocol;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() {
    // A missing .env is fine; real deployments set the environment directly.
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = config::Config::from_env();
    let addr = config.bind_addr();
    tracing::info!(client_channel_capacity = config.client_channel_capacity, static_dir = ?config.static_dir, "config loaded");

    let state = state::AppState::new(config);
    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");

    tracing::info!(%addr, "inkshare listening");
    axum::serve(listener, app).await.expect("server failed");
}
