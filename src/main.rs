use std::sync::Arc;

use lookout_hub::state::AppState;
use lookout_hub::store::Store;
use lookout_hub::{build_router, config, presence};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .init();

    let cfg = config::load_config();
    tracing::info!(
        "Config loaded — port {}, data dir {}, default tenant {}",
        cfg.port,
        cfg.data_dir,
        cfg.default_tenant
    );

    let store = Store::open(&cfg.data_dir, cfg.log_buffer).expect("Cannot open data directory");
    let state = Arc::new(AppState::new(cfg.clone(), store));

    // Background presence sweep
    tokio::spawn(presence::run(state.clone()));

    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Cannot bind address");

    tracing::info!("🚀 Lookout hub listening on http://{addr}");
    axum::serve(listener, app).await.unwrap();
}
