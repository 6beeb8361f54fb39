use crate::{db::DbPool, models::ElectricityPrice, schema::electricity_prices};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use diesel::prelude::*;
use serde::Deserialize;
use std::collections::HashMap;

pub const PRICE_SOURCE: &str = "nordpool";

#[derive(Deserialize, Debug)]
struct NordPoolResponse {
    #[serde(rename = "multiAreaEntries")]
    entries: Vec<NordPoolEntry>,
}

#[derive(Deserialize, Debug)]
struct NordPoolEntry {
    #[serde(rename = "deliveryStart")]
    delivery_start: String,
    #[serde(rename = "entryPerArea")]
    entry_per_area: HashMap<String, f64>,
}

#[derive(Debug)]
pub struct PriceData {
    pub timestamp: NaiveDateTime,
    pub price: f64,
}

/// Fetch one day of day-ahead prices for a delivery area. Nord Pool
/// quotes €/MWh with UTC delivery starts; rows are converted to €/kWh in
/// the area's wall-clock time.
pub async fn fetch_day_ahead_prices(
    date: NaiveDate,
    area: &str,
    currency: &str,
    timezone: Tz,
) -> Result<Vec<PriceData>, reqwest::Error> {
    let url = format!(
        "https://dataportal-api.nordpoolgroup.com/api/DayAheadPrices?date={}&market=DayAhead&deliveryArea={}&currency={}",
        date, area, currency
    );

    let client = reqwest::Client::new();
    let resp = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json::<NordPoolResponse>()
        .await?;

    Ok(convert_entries(resp, area, timezone))
}

fn convert_entries(resp: NordPoolResponse, area: &str, timezone: Tz) -> Vec<PriceData> {
    resp.entries
        .into_iter()
        .filter_map(|entry| {
            let price = *entry.entry_per_area.get(area)?;
            let delivery_start = entry
                .delivery_start
                .parse::<DateTime<Utc>>()
                .ok()?
                .with_timezone(&timezone)
                .naive_local();

            Some(PriceData {
                timestamp: delivery_start,
                price: price / 1000.0, // €/MWh -> €/kWh
            })
        })
        .collect()
}

/// Store-facing price operations used by the API, the engine and the
/// cron runner.
pub struct PriceService {
    pool: DbPool,
    area: String,
    currency: String,
    timezone: Tz,
}

impl PriceService {
    pub fn new(pool: DbPool) -> Self {
        let area = std::env::var("NORDPOOL_AREA").unwrap_or_else(|_| "EE".to_string());
        let currency = std::env::var("NORDPOOL_CURRENCY").unwrap_or_else(|_| "EUR".to_string());
        let timezone = std::env::var("NORDPOOL_TIMEZONE")
            .ok()
            .and_then(|name| name.parse().ok())
            .unwrap_or(chrono_tz::Europe::Tallinn);

        Self {
            pool,
            area,
            currency,
            timezone,
        }
    }

    pub fn get_prices_for_date(&self, date: NaiveDate) -> Result<Vec<ElectricityPrice>, String> {
        let mut conn = self
            .pool
            .get()
            .map_err(|e| format!("Database connection error: {}", e))?;

        let day_start = date.and_hms_opt(0, 0, 0).unwrap();
        let day_end = date.and_hms_opt(23, 59, 59).unwrap();

        electricity_prices::table
            .filter(electricity_prices::timestamp.ge(day_start))
            .filter(electricity_prices::timestamp.le(day_end))
            .order(electricity_prices::timestamp.asc())
            .load(&mut conn)
            .map_err(|e| format!("Failed to load prices: {}", e))
    }

    pub fn get_current_price(&self) -> Result<Option<ElectricityPrice>, String> {
        use chrono::Timelike;

        let mut conn = self
            .pool
            .get()
            .map_err(|e| format!("Database connection error: {}", e))?;

        let now = Local::now().naive_local();
        let hour_start = now.date().and_hms_opt(now.hour(), 0, 0).unwrap_or(now);

        electricity_prices::table
            .filter(electricity_prices::timestamp.eq(hour_start))
            .first(&mut conn)
            .optional()
            .map_err(|e| format!("Failed to load current price: {}", e))
    }

    pub fn has_prices_for_date(&self, date: NaiveDate) -> Result<bool, String> {
        Ok(!self.get_prices_for_date(date)?.is_empty())
    }

    /// Fetch and upsert one day of prices. Returns the number of rows
    /// written.
    pub async fn sync_date(&self, date: NaiveDate) -> Result<usize, String> {
        let fetched = fetch_day_ahead_prices(date, &self.area, &self.currency, self.timezone)
            .await
            .map_err(|e| format!("Nord Pool request failed: {}", e))?;

        if fetched.is_empty() {
            return Err(format!("Nord Pool returned no prices for {}", date));
        }

        let mut conn = self
            .pool
            .get()
            .map_err(|e| format!("Database connection error: {}", e))?;

        let rows: Vec<ElectricityPrice> = fetched
            .into_iter()
            .map(|p| ElectricityPrice {
                timestamp: p.timestamp,
                price: p.price,
                source: PRICE_SOURCE.to_string(),
            })
            .collect();

        diesel::insert_into(electricity_prices::table)
            .values(&rows)
            .on_conflict(electricity_prices::timestamp)
            .do_update()
            .set((
                electricity_prices::price.eq(diesel::upsert::excluded(electricity_prices::price)),
                electricity_prices::source.eq(diesel::upsert::excluded(electricity_prices::source)),
            ))
            .execute(&mut conn)
            .map_err(|e| format!("Failed to store prices: {}", e))
    }

    pub async fn sync_today(&self) -> Result<usize, String> {
        self.sync_date(Local::now().date_naive()).await
    }

    pub async fn sync_tomorrow(&self) -> Result<usize, String> {
        self.sync_date(Local::now().date_naive() + chrono::Duration::days(1))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response() -> NordPoolResponse {
        serde_json::from_str(
            r#"{
                "multiAreaEntries": [
                    {
                        "deliveryStart": "2026-01-15T10:00:00Z",
                        "entryPerArea": {"EE": 85.5, "FI": 80.0}
                    },
                    {
                        "deliveryStart": "2026-01-15T11:00:00Z",
                        "entryPerArea": {"EE": 120.0, "FI": 115.0}
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_response_parsing() {
        let resp = sample_response();
        assert_eq!(resp.entries.len(), 2);
        assert_eq!(resp.entries[0].entry_per_area["EE"], 85.5);
    }

    #[test]
    fn test_conversion_to_kwh_and_area_selection() {
        let prices = convert_entries(sample_response(), "EE", chrono_tz::Europe::Tallinn);

        assert_eq!(prices.len(), 2);
        assert!((prices[0].price - 0.0855).abs() < 1e-9);
        assert!((prices[1].price - 0.12).abs() < 1e-9);
    }

    #[test]
    fn test_delivery_start_converted_to_area_wall_clock() {
        let prices = convert_entries(sample_response(), "EE", chrono_tz::Europe::Tallinn);

        // 10:00 UTC is 12:00 in Tallinn in January (EET, +2)
        assert_eq!(prices[0].timestamp.format("%H:%M").to_string(), "12:00");
    }

    #[test]
    fn test_unknown_area_yields_no_rows() {
        let prices = convert_entries(sample_response(), "NO1", chrono_tz::Europe::Oslo);
        assert!(prices.is_empty());
    }
}
