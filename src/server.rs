use actix_cors::Cors;
use actix_web::{web, App, HttpServer};

use crate::config::AppConfig;
use crate::error::Result;
use crate::handlers;
use crate::state::AppContext;

pub async fn run(config: &AppConfig) -> Result<()> {
    let ctx = web::Data::new(AppContext::from_config(config)?);

    tracing::info!(bind = %config.server.bind, "server running at http://{}", config.server.bind);

    let mut server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(cors)
            .app_data(ctx.clone())
            .configure(handlers::configure)
    });
    if config.server.workers > 0 {
        server = server.workers(config.server.workers);
    }

    server.bind(&config.server.bind)?.run().await?;
    Ok(())
}
