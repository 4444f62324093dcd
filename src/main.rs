use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer, Responder, get};

use parlour::config::Config;
use parlour::db::init_db;
use parlour::docs::ApiDoc;
use parlour::realtime::hub::AttendanceHub;
use parlour::routes::{self, Limiters};
use parlour::utils::account_index::AccountIndex;

use tracing::{error, info};
use tracing_appender::rolling;
use utoipa::OpenApi; // ← needed for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

#[get("/")]
async fn index() -> impl Responder {
    "Parlour API is running"
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(config.log_level)
        .with_ansi(false)
        .with_target(false) // removes module path
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!(addr = %config.server_addr, "Server starting...");

    let pool = init_db(&config.database_url).await?;
    let limiters = Limiters::from_config(&config)?;
    let hub = Data::new(AttendanceHub::new(
        config.hub_channel_capacity,
        config.hub_replay_capacity,
    ));

    let accounts = Data::new(AccountIndex::new());

    let pool_for_warmup = pool.clone();
    let accounts_for_warmup = accounts.clone();
    actix_web::rt::spawn(async move {
        if let Err(e) = accounts_for_warmup.warmup(&pool_for_warmup, 250).await {
            error!(error = %e, "Failed to warm up account index");
        }
    });

    // close the room first so live sockets don't hold up graceful shutdown
    let hub_for_signal = hub.clone();
    actix_web::rt::spawn(async move {
        if actix_web::rt::signal::ctrl_c().await.is_ok() {
            hub_for_signal.shutdown();
        }
    });

    let server_addr = config.server_addr.clone();
    let app_hub = hub.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                // wildcard so the UI's JS/CSS assets resolve
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(Data::new(pool.clone()))
            .app_data(Data::new(config.clone()))
            .app_data(app_hub.clone())
            .app_data(accounts.clone())
            .service(index)
            // auth + protected routes with rate limiting
            .configure(|cfg| routes::configure(cfg, &config, &limiters))
    })
    .bind(server_addr)?
    .run()
    .await?;

    hub.shutdown();
    info!("Server stopped");

    Ok(())
}
