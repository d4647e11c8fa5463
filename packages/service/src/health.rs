//! Liveness endpoint.

use actix_web::dev::ServerHandle;
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct Health {
    healthy: bool,
    version: String,
}

/// `GET /health`
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(Health {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health));
}

/// Serves the health endpoint on `port` in the background.
///
/// # Errors
///
/// Returns an error if the port cannot be bound.
pub fn start(port: u16) -> std::io::Result<ServerHandle> {
    let server = HttpServer::new(|| {
        App::new()
            .wrap(middleware::Logger::default())
            .configure(routes)
    })
    .workers(1)
    .disable_signals()
    .bind(("0.0.0.0", port))?
    .run();

    let handle = server.handle();
    tokio::spawn(server);
    log::info!("Health endpoint listening on 0.0.0.0:{port}");

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use actix_web::test;

    use super::*;

    #[actix_web::test]
    async fn reports_healthy_with_version() {
        let app = test::init_service(App::new().configure(routes)).await;

        let response =
            test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert!(response.status().is_success());

        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(body["healthy"], true);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[actix_web::test]
    async fn unknown_paths_are_not_found() {
        let app = test::init_service(App::new().configure(routes)).await;

        let response =
            test::call_service(&app, test::TestRequest::get().uri("/ready").to_request()).await;
        assert_eq!(response.status(), actix_web::http::StatusCode::NOT_FOUND);
    }
}
