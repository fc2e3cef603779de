//! Jobs UI server - streams runs over SSE and serves the control panel.

mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use clap::Parser;
use jobs::io::config::{DEFAULT_CONFIG_FILE, load_config};
use jobs::io::process::TokioLauncher;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::state::{AppState, SharedLauncher};

const DEFAULT_FILTER: &str = "jobs_ui=info,jobs=info";

#[derive(Parser)]
#[command(name = "jobs-ui")]
#[command(about = "Web control panel for running and watching jobs")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Path to the config file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Directory containing UI static files (defaults to ui/dist in the project)
    #[arg(long)]
    ui_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    jobs::logging::init(DEFAULT_FILTER);

    let args = Args::parse();
    let config = load_config(&args.config)?;
    let project_dir = config.project_dir.clone();
    info!(project_dir = %project_dir.display(), "starting jobs-ui");

    let launcher: SharedLauncher = Arc::new(TokioLauncher);
    let state = AppState::new(config, launcher);
    let ui_dir = args
        .ui_dir
        .unwrap_or_else(|| project_dir.join("ui").join("dist"));
    let app = build_router(state, &ui_dir);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Run stream, API and log routes, plus the static UI when `ui_dir` exists.
fn build_router(state: AppState, ui_dir: &Path) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/run_stream", get(sse::run_stream))
        .nest("/api", routes::api_router())
        .nest("/logs", routes::logs_router())
        .layer(cors)
        .with_state(state);

    if !ui_dir.is_dir() {
        info!(ui_dir = %ui_dir.display(), "UI directory not found, API-only mode");
        return app;
    }
    info!(ui_dir = %ui_dir.display(), "serving static UI files");
    app.fallback_service(ServeDir::new(ui_dir).append_index_html_on_directories(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::scripted_state;

    #[test]
    fn router_builds_with_and_without_ui_dir() {
        let (project, state) = scripted_state(Vec::new());
        let _api_only = build_router(state.clone(), &project.root().join("ui/dist"));

        project.write("ui/dist/index.html", "<html></html>").expect("write");
        let _with_ui = build_router(state, &project.root().join("ui/dist"));
    }
}
