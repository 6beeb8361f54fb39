use actix_cors::Cors;
use actix_web::{get, web, App, HttpResponse, HttpServer, Responder};
use std::sync::Arc;

mod api;
mod db;
mod integrations;
mod models;
mod schema;
mod services;

use integrations::mqtt::{MqttCommandPublisher, MqttConfig};
use services::access::AccessPolicy;
use services::automation_engine::AutomationEngine;
use services::webhooks::{HttpWebhookSender, WebhookSender};

#[get("/")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "Home Automation Backend",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn mqtt_config_from_env(host: String) -> MqttConfig {
    let mut config = MqttConfig {
        broker_host: host,
        ..MqttConfig::default()
    };

    if let Ok(port) = std::env::var("MQTT_BROKER_PORT") {
        if let Ok(port) = port.parse() {
            config.broker_port = port;
        }
    }
    config.username = std::env::var("MQTT_USERNAME").ok();
    config.password = std::env::var("MQTT_PASSWORD").ok();
    config.use_tls = std::env::var("MQTT_USE_TLS")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    config
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // DB Pool initialization
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = db::init_pool(&database_url);

    // Unified admin-role capability table
    let policy = AccessPolicy::defaults();

    // MQTT command publishing is optional; the dispatcher degrades to
    // store-only writes without it
    let mut engine = AutomationEngine::new(pool.clone());
    if let Ok(host) = std::env::var("MQTT_BROKER_HOST") {
        match MqttCommandPublisher::connect(mqtt_config_from_env(host)).await {
            Ok(publisher) => {
                engine = engine.with_publisher(Arc::new(publisher));
            }
            Err(e) => {
                log::warn!("MQTT publisher unavailable, continuing without it: {}", e);
            }
        }
    }

    if let Ok(endpoint) = std::env::var("WEBHOOK_URL") {
        let token = std::env::var("WEBHOOK_TOKEN").ok();
        let sender: Arc<dyn WebhookSender> = Arc::new(HttpWebhookSender::new(endpoint, token));
        engine = engine.with_webhooks(sender);
    }

    log::info!("Starting Home Automation Backend at http://0.0.0.0:8080");

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(policy.clone()))
            .app_data(web::Data::new(engine.clone()))
            .service(health_check)
            .configure(api::config)
    })
    .bind(("0.0.0.0", 8080))?
    .run()
    .await
}
