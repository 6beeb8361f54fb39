//! Cron Runner - Scheduled tasks for the home-automation backend
//!
//! This binary runs as a daemon with proper cron scheduling:
//! - sync-prices: Runs at startup and daily at 13:30 (shortly after Nord
//!   Pool publishes tomorrow's day-ahead prices)
//! - evaluate-price-rules: Runs at the start of every hour, when the
//!   applicable electricity price changes
//!
//! Environment variables:
//!   DATABASE_URL  - PostgreSQL connection string (required)
//!   NORDPOOL_AREA - Delivery area for price fetching (default EE)

use chrono::{Local, Timelike};
use std::env;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};

// Import from the library crate
use backend::db::{self, DbPool};
use backend::services::automation_engine::AutomationEngine;
use backend::services::price_fetcher::PriceService;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let database_url = match env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            log::error!("DATABASE_URL environment variable is not set");
            std::process::exit(1);
        }
    };

    let pool = Arc::new(db::init_pool(&database_url));

    log::info!("Starting home-automation cron scheduler...");

    // Run initial sync at startup
    sync_prices_startup(pool.clone()).await;

    let sched = JobScheduler::new().await.expect("Failed to create scheduler");

    // Schedule sync-prices at 13:30 every day
    // Cron: "0 30 13 * * *" = second 0, minute 30, hour 13, every day
    let pool_sync = pool.clone();
    let sync_job = Job::new_async("0 30 13 * * *", move |_uuid, _l| {
        let pool = pool_sync.clone();
        Box::pin(async move {
            log::info!("Scheduled sync-prices triggered (13:30)");
            sync_prices_daily(pool).await;
        })
    })
    .expect("Failed to create sync-prices job");
    sched.add(sync_job).await.expect("Failed to add sync job");

    // Schedule price-rule evaluation at the start of every hour
    // Cron: "0 0 * * * *" = second 0, minute 0, every hour
    let pool_eval = pool.clone();
    let evaluation_job = Job::new_async("0 0 * * * *", move |_uuid, _l| {
        let pool = pool_eval.clone();
        Box::pin(async move {
            log::info!("Scheduled price-rule evaluation triggered (hourly)");
            evaluate_price_rules(pool).await;
        })
    })
    .expect("Failed to create evaluation job");
    sched
        .add(evaluation_job)
        .await
        .expect("Failed to add evaluation job");

    sched.start().await.expect("Failed to start scheduler");

    log::info!("Cron scheduler running. Jobs scheduled:");
    log::info!("  - sync-prices: daily at 13:30");
    log::info!("  - evaluate-price-rules: every hour at :00");

    // Keep the process running
    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(3600)).await;
    }
}

/// Sync prices at startup - loads today's prices and tomorrow's if past 13:30
async fn sync_prices_startup(pool: Arc<DbPool>) {
    let service = PriceService::new((*pool).clone());
    let now = Local::now();
    let today = now.date_naive();
    let tomorrow = today + chrono::Duration::days(1);

    log::info!("Startup sync: checking prices...");

    match service.has_prices_for_date(today) {
        Ok(true) => {
            log::info!("Today's prices ({}) already in database", today);
        }
        Ok(false) => {
            log::info!("Today's prices ({}) missing, fetching from Nord Pool...", today);
            match service.sync_today().await {
                Ok(count) => log::info!("Synced {} prices for today", count),
                Err(e) => log::error!("Failed to sync today's prices: {}", e),
            }
        }
        Err(e) => {
            log::warn!("Could not check today's prices: {}", e);
            if let Err(e) = service.sync_today().await {
                log::error!("Failed to sync today's prices: {}", e);
            }
        }
    }

    // If it's past 13:30, also try to sync tomorrow's prices
    if now.hour() > 13 || (now.hour() == 13 && now.minute() >= 30) {
        match service.has_prices_for_date(tomorrow) {
            Ok(true) => {
                log::info!("Tomorrow's prices ({}) already in database", tomorrow);
            }
            Ok(false) => {
                log::info!(
                    "Tomorrow's prices ({}) missing and it's past 13:30, fetching...",
                    tomorrow
                );
                match service.sync_tomorrow().await {
                    Ok(count) => log::info!("Synced {} prices for tomorrow", count),
                    Err(e) => log::warn!("Could not sync tomorrow's prices: {}", e),
                }
            }
            Err(e) => {
                log::warn!("Could not check tomorrow's prices: {}", e);
            }
        }
    }

    // Evaluate price-referencing rules once at startup to handle the
    // current hour
    log::info!("Running initial price-rule evaluation...");
    evaluate_price_rules(pool).await;
}

/// Daily sync at 13:30 - fetches tomorrow's prices
async fn sync_prices_daily(pool: Arc<DbPool>) {
    let service = PriceService::new((*pool).clone());
    let tomorrow = Local::now().date_naive() + chrono::Duration::days(1);

    log::info!("Daily sync: fetching tomorrow's prices ({})...", tomorrow);
    match service.sync_tomorrow().await {
        Ok(count) => log::info!("Synced {} prices for tomorrow", count),
        Err(e) => log::error!("Failed to sync tomorrow's prices: {}", e),
    }
}

/// Evaluate the rules that reference the electricity-price feed
async fn evaluate_price_rules(pool: Arc<DbPool>) {
    // Make sure this hour's price is available before evaluating
    let service = PriceService::new((*pool).clone());
    let today = Local::now().date_naive();

    match service.has_prices_for_date(today) {
        Ok(false) => {
            log::warn!("Today's prices missing! Attempting to fetch before evaluation...");
            if let Err(e) = service.sync_today().await {
                log::error!("Failed to sync today's prices: {}", e);
                log::warn!("Evaluating without complete price data");
            }
        }
        Err(e) => {
            log::warn!("Could not check today's prices: {}", e);
        }
        Ok(true) => {}
    }

    let engine = AutomationEngine::new((*pool).clone());
    let outcomes = engine.process_price_update().await;

    let dispatched = outcomes.iter().filter(|o| o.dispatched).count();
    let failed = outcomes.len() - dispatched;

    if outcomes.is_empty() {
        log::info!("Price-rule evaluation: nothing triggered");
    } else {
        log::info!(
            "Price-rule evaluation completed: {} triggered, {} dispatched, {} failed",
            outcomes.len(),
            dispatched,
            failed
        );

        for outcome in outcomes.iter().filter(|o| !o.dispatched) {
            log::error!("Rule {} dispatch failed: {}", outcome.rule_id, outcome.detail);
        }
    }
}
