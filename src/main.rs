use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpResponse, HttpServer};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use bazaar::config::AppConfig;
use bazaar::notify::TracingSink;
use bazaar::openapi::ApiDoc;
use bazaar::rate_limit::{InMemoryRateLimiter, RateLimiterFacade};
use bazaar::repo::Repo;
use bazaar::{config, AppState, SecurityHeaders};

#[cfg(not(any(feature = "inmem-store", feature = "postgres-store")))]
compile_error!("enable one of the `inmem-store` or `postgres-store` features");

async fn render_metrics(handle: web::Data<PrometheusHandle>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(handle.render())
}

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use bazaar::repo::inmem::{InMemRepo, SNAPSHOT_FILE};
    info!(data_dir = %cfg.data_dir.display(), "Using in-memory repository backend");
    Ok(Arc::new(InMemRepo::with_snapshot(cfg.data_dir.join(SNAPSHOT_FILE))))
}

#[cfg(feature = "postgres-store")]
async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use bazaar::repo::pg::PgRepo;
    use sqlx::postgres::PgPoolOptions;
    let url = cfg
        .database_url
        .as_deref()
        .ok_or(bazaar::config::ConfigError::Missing("DATABASE_URL"))?;
    let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
    let repo = PgRepo::new(pool);
    repo.migrate().await?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(repo))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds; production sets the environment externally.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    let cfg = match AppConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level)))
        .init();

    info!("Bootstrapping bazaar server");

    let metrics_handle = if cfg.metrics_enabled {
        Some(PrometheusBuilder::new().install_recorder()?)
    } else {
        None
    };

    let repo = build_repo(&cfg).await?;
    let limiter = RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg.rate_limits.clone());
    let state = AppState::new(repo, Arc::new(TracingSink))
        .with_rate_limiter(limiter)
        .with_bootstrap_admins(cfg.bootstrap_admin_ids.clone());
    let openapi = ApiDoc::openapi();

    let frontend_url = cfg.frontend_url.clone();
    let enable_hsts = cfg.enable_hsts;
    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                // local dev frontends
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
                .max_age(3600);
            if let Some(front) = &frontend_url {
                c = c.allowed_origin(front);
            }
            c
        };

        let mut app = App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()));
        if let Some(handle) = &metrics_handle {
            app = app
                .app_data(web::Data::new(handle.clone()))
                .route("/metrics", web::get().to(render_metrics));
        }

        app.wrap(cors)
            .wrap(SecurityHeaders::new(enable_hsts))
            .wrap(Compress::default())
            .wrap(TracingLogger::default())
    })
    .bind(cfg.bind_addr.as_str())?;

    info!("Listening on http://{}", cfg.bind_addr);
    server.run().await?;
    Ok(())
}
