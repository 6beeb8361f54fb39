use crate::{
    db::DbPool,
    services::{auth::Claims, price_fetcher::PriceService},
};
use actix_web::{get, post, web, HttpResponse, Responder};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

// ============================================================================
// Request/Response DTOs
// ============================================================================

#[derive(Deserialize)]
pub struct DateQuery {
    pub date: Option<String>, // Format: YYYY-MM-DD
}

#[derive(Serialize)]
pub struct PriceResponse {
    pub timestamp: String,
    pub hour: u32,
    pub price: f64,
    pub price_formatted: String,
}

#[derive(Serialize)]
pub struct PriceSummary {
    pub date: String,
    pub min_price: f64,
    pub max_price: f64,
    pub avg_price: f64,
    pub cheapest_hour: u32,
    pub most_expensive_hour: u32,
}

// ============================================================================
// Endpoints
// ============================================================================

/// Get prices for a specific date (defaults to today)
#[get("")]
pub async fn get_prices(pool: web::Data<DbPool>, query: web::Query<DateQuery>) -> impl Responder {
    let service = PriceService::new(pool.get_ref().clone());

    let date = match &query.date {
        Some(d) => match NaiveDate::parse_from_str(d, "%Y-%m-%d") {
            Ok(date) => date,
            Err(_) => return HttpResponse::BadRequest().body("Invalid date format. Use YYYY-MM-DD"),
        },
        None => Local::now().date_naive(),
    };

    match service.get_prices_for_date(date) {
        Ok(prices) => {
            let response: Vec<PriceResponse> = prices
                .into_iter()
                .map(|p| PriceResponse {
                    timestamp: p.timestamp.to_string(),
                    hour: p.timestamp.format("%H").to_string().parse().unwrap_or(0),
                    price: p.price,
                    price_formatted: format!("{:.4} €/kWh", p.price),
                })
                .collect();
            HttpResponse::Ok().json(response)
        }
        Err(e) => HttpResponse::InternalServerError().body(e),
    }
}

/// Get current hour's price
#[get("/current")]
pub async fn get_current_price(pool: web::Data<DbPool>) -> impl Responder {
    let service = PriceService::new(pool.get_ref().clone());

    match service.get_current_price() {
        Ok(Some(price)) => {
            let response = PriceResponse {
                timestamp: price.timestamp.to_string(),
                hour: price.timestamp.format("%H").to_string().parse().unwrap_or(0),
                price: price.price,
                price_formatted: format!("{:.4} €/kWh", price.price),
            };
            HttpResponse::Ok().json(response)
        }
        Ok(None) => HttpResponse::NotFound().json(serde_json::json!({
            "error": "No price available for current hour",
            "hint": "Prices may need to be synced. Call POST /api/prices/sync"
        })),
        Err(e) => HttpResponse::InternalServerError().body(e),
    }
}

/// Get summary statistics for a date
#[get("/summary")]
pub async fn get_price_summary(
    pool: web::Data<DbPool>,
    query: web::Query<DateQuery>,
) -> impl Responder {
    let service = PriceService::new(pool.get_ref().clone());

    let date = match &query.date {
        Some(d) => match NaiveDate::parse_from_str(d, "%Y-%m-%d") {
            Ok(date) => date,
            Err(_) => return HttpResponse::BadRequest().body("Invalid date format. Use YYYY-MM-DD"),
        },
        None => Local::now().date_naive(),
    };

    match service.get_prices_for_date(date) {
        Ok(prices) if !prices.is_empty() => {
            let min = prices
                .iter()
                .min_by(|a, b| a.price.partial_cmp(&b.price).unwrap())
                .unwrap();
            let max = prices
                .iter()
                .max_by(|a, b| a.price.partial_cmp(&b.price).unwrap())
                .unwrap();
            let avg = prices.iter().map(|p| p.price).sum::<f64>() / prices.len() as f64;

            let summary = PriceSummary {
                date: date.to_string(),
                min_price: min.price,
                max_price: max.price,
                avg_price: avg,
                cheapest_hour: min.timestamp.format("%H").to_string().parse().unwrap_or(0),
                most_expensive_hour: max.timestamp.format("%H").to_string().parse().unwrap_or(0),
            };
            HttpResponse::Ok().json(summary)
        }
        Ok(_) => HttpResponse::NotFound().body("No prices for that date"),
        Err(e) => HttpResponse::InternalServerError().body(e),
    }
}

/// Fetch and store today's prices from Nord Pool
#[post("/sync")]
pub async fn sync_prices(pool: web::Data<DbPool>, _claims: Claims) -> impl Responder {
    let service = PriceService::new(pool.get_ref().clone());

    match service.sync_today().await {
        Ok(count) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "prices_synced": count,
        })),
        Err(e) => HttpResponse::InternalServerError().body(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_query_parses_optional_date() {
        let query: DateQuery = serde_json::from_str(r#"{"date": "2026-01-15"}"#).unwrap();
        assert_eq!(query.date, Some("2026-01-15".to_string()));

        let query: DateQuery = serde_json::from_str(r#"{}"#).unwrap();
        assert!(query.date.is_none());
    }

    #[test]
    fn test_price_response_formatting() {
        let response = PriceResponse {
            timestamp: "2026-01-15 12:00:00".to_string(),
            hour: 12,
            price: 0.0855,
            price_formatted: format!("{:.4} €/kWh", 0.0855),
        };
        assert_eq!(response.price_formatted, "0.0855 €/kWh");
    }
}
