use actix_web::web;

pub mod auth;
pub mod automation;
pub mod discovery;
pub mod mqtt;
pub mod prices;
pub mod products;
pub mod rules;
pub mod sensors;
pub mod switches;

pub fn config(cfg: &mut web::ServiceConfig) {
    // Auth routes (public)
    cfg.service(
        web::scope("/api/auth")
            .service(auth::register)
            .service(auth::login),
    );

    // Switch routes (protected)
    cfg.service(
        web::scope("/api/switches")
            .service(switches::list_switches)
            .service(switches::create_switch)
            .service(switches::get_switch)
            .service(switches::update_switch)
            .service(switches::delete_switch)
            .service(switches::set_switch_state)
            .service(switches::get_switch_history),
    );

    // Sensor routes (protected)
    cfg.service(
        web::scope("/api/sensors")
            .service(sensors::list_sensors)
            .service(sensors::create_sensor)
            .service(sensors::update_sensor)
            .service(sensors::delete_sensor)
            .service(sensors::ingest_reading)
            .service(sensors::latest_reading),
    );

    // Discovery edges (protected)
    cfg.service(
        web::scope("/api/discoveries")
            .service(discovery::register_discovery)
            .service(discovery::list_discoveries),
    );

    // Automation rules routes (protected)
    cfg.service(
        web::scope("/api/rules")
            .service(rules::list_rules)
            .service(rules::get_rule)
            .service(rules::create_rule)
            .service(rules::update_rule)
            .service(rules::delete_rule),
    );

    // Electricity prices
    cfg.service(
        web::scope("/api/prices")
            .service(prices::get_current_price)
            .service(prices::get_price_summary)
            .service(prices::sync_prices)
            .service(prices::get_prices),
    );

    // MQTT credential provisioning (protected)
    cfg.service(
        web::scope("/api/mqtt")
            .service(mqtt::create_mqtt_user)
            .service(mqtt::list_mqtt_users)
            .service(mqtt::delete_mqtt_user)
            .service(mqtt::create_acl)
            .service(mqtt::list_acls),
    );

    // Products and subscriptions (protected)
    cfg.service(
        web::scope("/api/products")
            .service(products::list_products)
            .service(products::create_product)
            .service(products::delete_product),
    );
    cfg.service(
        web::scope("/api/subscriptions")
            .service(products::list_subscriptions)
            .service(products::create_subscription)
            .service(products::cancel_subscription),
    );

    // Automation engine routes (protected)
    cfg.service(web::scope("/api/automation").service(automation::run_automation));
}
