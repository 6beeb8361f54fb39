use crate::{
    db::DbPool,
    integrations::mqtt::MqttCommandPublisher,
    models::{AutomationCondition, AutomationRule, NewSwitchStateRecord, Switch},
    schema::{
        automation_conditions, automation_rules, electricity_prices, sensor_readings, switch_states,
        switches,
    },
    services::webhooks::{WebhookEvent, WebhookSender},
};
use chrono::{Local, NaiveDateTime, Timelike};
use diesel::prelude::*;
use log::{error, info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Tolerance for equality/inequality comparisons, absorbing float
/// round-trip noise in stored readings.
pub const EQUALITY_EPSILON: f64 = 0.001;

/// Sentinel sensor id referencing the external electricity-price feed
/// instead of a sensor row.
pub const PRICE_SENSOR_ID: i32 = -1;
pub const PRICE_SENSOR_TYPE: &str = "electricity_price";

pub const SWITCH_ON: &str = "ON";
pub const SWITCH_OFF: &str = "OFF";

/// Structured payload some price feeds publish instead of a bare number.
#[derive(Deserialize)]
struct PricePayload {
    price: Option<f64>,
    value: Option<f64>,
}

/// Resolve a numeric value from a raw reading. Price readings fall back
/// from a bare number to a structured payload (`price`, then `value`);
/// everything else must parse as a float. None means the condition
/// cannot be satisfied.
pub fn parse_sensor_value(sensor_type: &str, raw: &str) -> Option<f64> {
    let trimmed = raw.trim();

    if let Ok(value) = trimmed.parse::<f64>() {
        return Some(value);
    }

    if sensor_type == PRICE_SENSOR_TYPE {
        let payload: PricePayload = serde_json::from_str(trimmed).ok()?;
        return payload.price.or(payload.value);
    }

    None
}

/// Apply a condition operator. Equality and inequality are
/// epsilon-tolerant; ordering comparisons are exact; unknown operators
/// never match.
pub fn compare(value: f64, operator: &str, threshold: f64) -> bool {
    match operator {
        "==" | "=" => (value - threshold).abs() < EQUALITY_EPSILON,
        "!=" | "<>" => (value - threshold).abs() >= EQUALITY_EPSILON,
        ">" => value > threshold,
        "<" => value < threshold,
        ">=" => value >= threshold,
        "<=" => value <= threshold,
        _ => false,
    }
}

/// Evaluate one condition against the latest readings, keyed by sensor
/// id. A missing or unparseable reading fails the condition; an
/// automation that cannot be evaluated never fires.
pub fn evaluate_condition(
    condition: &AutomationCondition,
    readings: &HashMap<i32, String>,
) -> bool {
    let raw = match readings.get(&condition.sensor_id) {
        Some(r) => r,
        None => return false,
    };

    match parse_sensor_value(&condition.sensor_type, raw) {
        Some(value) => compare(value, &condition.condition, condition.threshold),
        None => false,
    }
}

/// Combine the per-condition outcomes: OR fires on any match; AND (the
/// default, including the single-condition case) requires all.
pub fn evaluate_rule(
    rule: &AutomationRule,
    conditions: &[AutomationCondition],
    readings: &HashMap<i32, String>,
) -> bool {
    if conditions.is_empty() {
        return false;
    }

    let outcomes: Vec<bool> = conditions
        .iter()
        .map(|c| evaluate_condition(c, readings))
        .collect();

    match rule.logical_operator.as_deref() {
        Some(op) if op.eq_ignore_ascii_case("OR") => outcomes.iter().any(|&b| b),
        _ => outcomes.iter().all(|&b| b),
    }
}

/// Result of dispatching one triggered rule.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub rule_id: i32,
    pub dispatched: bool,
    pub detail: String,
}

/// Evaluates rules against live readings and dispatches the triggered
/// ones. Dispatch failures are absorbed: they are logged and recorded in
/// the outcome, never raised to the caller.
#[derive(Clone)]
pub struct AutomationEngine {
    pool: DbPool,
    publisher: Option<Arc<MqttCommandPublisher>>,
    webhooks: Option<Arc<dyn WebhookSender>>,
}

impl AutomationEngine {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            publisher: None,
            webhooks: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<MqttCommandPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_webhooks(mut self, webhooks: Arc<dyn WebhookSender>) -> Self {
        self.webhooks = Some(webhooks);
        self
    }

    /// Evaluate every rule. Used by the manual run endpoint and the cron
    /// runner.
    pub async fn run(&self) -> Vec<DispatchOutcome> {
        let rules = match self.load_rules(None) {
            Ok(r) => r,
            Err(e) => {
                error!("Failed to load rules: {}", e);
                return Vec::new();
            }
        };

        info!("Evaluating {} rules", rules.len());
        self.evaluate_batch(rules).await
    }

    /// Evaluate the rules referencing the sensor a new reading arrived
    /// for.
    pub async fn process_reading(&self, sensor_id: i32) -> Vec<DispatchOutcome> {
        let rules = match self.load_rules(Some(sensor_id)) {
            Ok(r) => r,
            Err(e) => {
                error!("Failed to load rules for sensor {}: {}", sensor_id, e);
                return Vec::new();
            }
        };

        if !rules.is_empty() {
            info!("Sensor {} reading fans out to {} rules", sensor_id, rules.len());
        }
        self.evaluate_batch(rules).await
    }

    /// Evaluate the rules referencing the electricity-price feed.
    pub async fn process_price_update(&self) -> Vec<DispatchOutcome> {
        self.process_reading(PRICE_SENSOR_ID).await
    }

    /// Each rule is evaluated independently; a store failure fails only
    /// that rule's evaluation, never the batch.
    async fn evaluate_batch(
        &self,
        rules: Vec<(AutomationRule, Vec<AutomationCondition>)>,
    ) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::new();

        for (rule, conditions) in rules {
            let readings = match self.readings_for(&conditions) {
                Ok(r) => r,
                Err(e) => {
                    error!("Rule {} evaluation failed loading readings: {}", rule.id, e);
                    continue;
                }
            };

            if evaluate_rule(&rule, &conditions, &readings) {
                info!("Rule {} triggered, dispatching '{}'", rule.id, rule.action);
                outcomes.push(self.dispatch(&rule).await);
            }
        }

        outcomes
    }

    /// Load rules with their conditions, optionally restricted to rules
    /// referencing one sensor id.
    fn load_rules(
        &self,
        referencing_sensor: Option<i32>,
    ) -> Result<Vec<(AutomationRule, Vec<AutomationCondition>)>, String> {
        let mut conn = self
            .pool
            .get()
            .map_err(|e| format!("Database connection error: {}", e))?;

        let rules: Vec<AutomationRule> = match referencing_sensor {
            Some(sensor_id) => {
                let rule_ids: Vec<i32> = automation_conditions::table
                    .filter(automation_conditions::sensor_id.eq(sensor_id))
                    .select(automation_conditions::rule_id)
                    .distinct()
                    .load(&mut conn)
                    .map_err(|e| format!("Failed to load referencing rules: {}", e))?;

                automation_rules::table
                    .filter(automation_rules::id.eq_any(rule_ids))
                    .load(&mut conn)
                    .map_err(|e| format!("Failed to load rules: {}", e))?
            }
            None => automation_rules::table
                .load(&mut conn)
                .map_err(|e| format!("Failed to load rules: {}", e))?,
        };

        if rules.is_empty() {
            return Ok(Vec::new());
        }

        let rule_ids: Vec<i32> = rules.iter().map(|r| r.id).collect();
        let conditions: Vec<AutomationCondition> = automation_conditions::table
            .filter(automation_conditions::rule_id.eq_any(&rule_ids))
            .order(automation_conditions::id.asc())
            .load(&mut conn)
            .map_err(|e| format!("Failed to load conditions: {}", e))?;

        let mut by_rule: HashMap<i32, Vec<AutomationCondition>> = HashMap::new();
        for condition in conditions {
            by_rule.entry(condition.rule_id).or_default().push(condition);
        }

        Ok(rules
            .into_iter()
            .map(|rule| {
                let conditions = by_rule.remove(&rule.id).unwrap_or_default();
                (rule, conditions)
            })
            .collect())
    }

    /// Latest raw reading per sensor id referenced by the conditions.
    /// The price sentinel maps to the current hour's electricity price.
    /// Sensors without any reading stay absent from the map.
    fn readings_for(
        &self,
        conditions: &[AutomationCondition],
    ) -> Result<HashMap<i32, String>, String> {
        let mut conn = self
            .pool
            .get()
            .map_err(|e| format!("Database connection error: {}", e))?;

        let mut sensor_ids: Vec<i32> = conditions.iter().map(|c| c.sensor_id).collect();
        sensor_ids.sort_unstable();
        sensor_ids.dedup();

        let mut readings = HashMap::new();

        for sensor_id in sensor_ids {
            if sensor_id == PRICE_SENSOR_ID {
                if let Some(price) = current_price(&mut conn, &Local::now().naive_local()) {
                    readings.insert(PRICE_SENSOR_ID, price.to_string());
                }
                continue;
            }

            let latest: Option<String> = sensor_readings::table
                .filter(sensor_readings::sensor_id.eq(sensor_id))
                .order(sensor_readings::recorded_at.desc())
                .select(sensor_readings::value)
                .first(&mut conn)
                .optional()
                .map_err(|e| format!("Failed to load reading for sensor {}: {}", sensor_id, e))?;

            if let Some(value) = latest {
                readings.insert(sensor_id, value);
            }
        }

        Ok(readings)
    }

    /// Translate a triggered rule into a switch state change: append a
    /// state record, update the switch, then best-effort mirror the
    /// command over MQTT and webhooks. Never raises.
    async fn dispatch(&self, rule: &AutomationRule) -> DispatchOutcome {
        if rule.target_type != "Switch" {
            warn!(
                "Rule {} has unsupported target type '{}', skipping",
                rule.id, rule.target_type
            );
            return DispatchOutcome {
                rule_id: rule.id,
                dispatched: false,
                detail: format!("Unsupported target type '{}'", rule.target_type),
            };
        }

        let mut conn = match self.pool.get() {
            Ok(c) => c,
            Err(e) => {
                error!("Rule {} dispatch failed getting connection: {}", rule.id, e);
                return DispatchOutcome {
                    rule_id: rule.id,
                    dispatched: false,
                    detail: format!("Database connection error: {}", e),
                };
            }
        };

        let target: Option<Switch> = switches::table
            .find(rule.target_id)
            .first(&mut conn)
            .optional()
            .unwrap_or(None);

        let target = match target {
            Some(t) => t,
            None => {
                warn!(
                    "Rule {} target Switch {} not found, skipping dispatch",
                    rule.id, rule.target_id
                );
                return DispatchOutcome {
                    rule_id: rule.id,
                    dispatched: false,
                    detail: "Target not found".to_string(),
                };
            }
        };

        let state = if rule.action.eq_ignore_ascii_case("on") {
            SWITCH_ON
        } else {
            SWITCH_OFF
        };

        let record = NewSwitchStateRecord {
            switch_id: target.id,
            state: state.to_string(),
        };

        if let Err(e) = diesel::insert_into(switch_states::table)
            .values(&record)
            .execute(&mut conn)
        {
            error!("Rule {} dispatch failed writing state record: {}", rule.id, e);
            return DispatchOutcome {
                rule_id: rule.id,
                dispatched: false,
                detail: format!("Failed to write state record: {}", e),
            };
        }

        if let Err(e) = diesel::update(switches::table.find(target.id))
            .set(switches::state.eq(state))
            .execute(&mut conn)
        {
            error!("Rule {} dispatch failed updating switch state: {}", rule.id, e);
        }

        if let Some(ref publisher) = self.publisher {
            if let Err(e) = publisher.publish_state(&target.name, state).await {
                warn!("Rule {} MQTT publish failed: {}", rule.id, e);
            }
        }

        if let Some(ref webhooks) = self.webhooks {
            let event = WebhookEvent::rule_triggered(
                rule.id,
                &target.name,
                state,
                Local::now().naive_local(),
            );
            if let Err(e) = webhooks.notify(&event).await {
                warn!("Rule {} webhook delivery failed: {}", rule.id, e);
            }
        }

        DispatchOutcome {
            rule_id: rule.id,
            dispatched: true,
            detail: format!("Switch '{}' set to {}", target.name, state),
        }
    }
}

/// Electricity price for the current hour, if synced.
fn current_price(
    conn: &mut diesel::pg::PgConnection,
    now: &NaiveDateTime,
) -> Option<f64> {
    let hour_start = now.date().and_hms_opt(now.hour(), 0, 0).unwrap_or(*now);

    electricity_prices::table
        .filter(electricity_prices::timestamp.eq(hour_start))
        .select(electricity_prices::price)
        .first(conn)
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn make_rule(logical_operator: Option<&str>) -> AutomationRule {
        let ts = NaiveDate::from_ymd_opt(2026, 1, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        AutomationRule {
            id: 1,
            target_type: "Switch".to_string(),
            target_id: 7,
            action: "on".to_string(),
            logical_operator: logical_operator.map(|s| s.to_string()),
            created_at: ts,
            updated_at: ts,
        }
    }

    fn make_condition(sensor_id: i32, operator: &str, threshold: f64) -> AutomationCondition {
        AutomationCondition {
            id: sensor_id.abs(),
            rule_id: 1,
            sensor_type: if sensor_id == PRICE_SENSOR_ID {
                PRICE_SENSOR_TYPE.to_string()
            } else {
                "temperature".to_string()
            },
            sensor_id,
            condition: operator.to_string(),
            threshold,
        }
    }

    fn readings(entries: &[(i32, &str)]) -> HashMap<i32, String> {
        entries
            .iter()
            .map(|(id, value)| (*id, value.to_string()))
            .collect()
    }

    #[test]
    fn test_epsilon_equality() {
        assert!(compare(5.0004, "==", 5.0));
        assert!(!compare(5.002, "==", 5.0));
        assert!(compare(5.0004, "=", 5.0));
    }

    #[test]
    fn test_epsilon_inequality() {
        assert!(!compare(5.0004, "!=", 5.0));
        assert!(compare(5.002, "!=", 5.0));
        assert!(compare(5.002, "<>", 5.0));
    }

    #[test]
    fn test_ordering_operators_are_exact() {
        assert!(compare(5.0, ">=", 5.0));
        assert!(compare(5.0, "<=", 5.0));
        assert!(!compare(5.0, ">", 5.0));
        assert!(!compare(5.0, "<", 5.0));
        assert!(compare(5.1, ">", 5.0));
        assert!(compare(4.9, "<", 5.0));
    }

    #[test]
    fn test_unknown_operator_never_matches() {
        assert!(!compare(5.0, "~=", 5.0));
        assert!(!compare(5.0, "", 5.0));
    }

    #[test]
    fn test_parse_plain_numeric_value() {
        assert_eq!(parse_sensor_value("temperature", "23.5"), Some(23.5));
        assert_eq!(parse_sensor_value("temperature", " -4.2 "), Some(-4.2));
        assert_eq!(parse_sensor_value("temperature", "warm"), None);
    }

    #[test]
    fn test_parse_price_value_fallback_chain() {
        assert_eq!(parse_sensor_value(PRICE_SENSOR_TYPE, "0.15"), Some(0.15));
        assert_eq!(
            parse_sensor_value(PRICE_SENSOR_TYPE, r#"{"price": 0.21}"#),
            Some(0.21)
        );
        assert_eq!(
            parse_sensor_value(PRICE_SENSOR_TYPE, r#"{"value": 0.33}"#),
            Some(0.33)
        );
        // price wins over value when both are present
        assert_eq!(
            parse_sensor_value(PRICE_SENSOR_TYPE, r#"{"price": 0.1, "value": 0.9}"#),
            Some(0.1)
        );
        assert_eq!(
            parse_sensor_value(PRICE_SENSOR_TYPE, r#"{"price": null, "value": 0.9}"#),
            Some(0.9)
        );
        assert_eq!(parse_sensor_value(PRICE_SENSOR_TYPE, r#"{"other": 1}"#), None);
        assert_eq!(parse_sensor_value(PRICE_SENSOR_TYPE, "not json"), None);
    }

    #[test]
    fn test_structured_payload_rejected_for_regular_sensors() {
        assert_eq!(parse_sensor_value("temperature", r#"{"value": 0.33}"#), None);
    }

    #[test]
    fn test_condition_fails_without_reading() {
        let condition = make_condition(3, ">", 25.0);
        assert!(!evaluate_condition(&condition, &readings(&[])));
    }

    #[test]
    fn test_condition_fails_on_unparseable_reading() {
        let condition = make_condition(3, ">", 25.0);
        assert!(!evaluate_condition(&condition, &readings(&[(3, "open")])));
    }

    #[test]
    fn test_condition_matches_reading() {
        let condition = make_condition(3, ">", 25.0);
        assert!(evaluate_condition(&condition, &readings(&[(3, "26.1")])));
        assert!(!evaluate_condition(&condition, &readings(&[(3, "24.9")])));
    }

    #[test]
    fn test_single_condition_behaves_as_and() {
        let rule = make_rule(None);
        let conditions = vec![make_condition(3, ">", 25.0)];

        assert!(evaluate_rule(&rule, &conditions, &readings(&[(3, "26.0")])));
        assert!(!evaluate_rule(&rule, &conditions, &readings(&[(3, "24.0")])));
    }

    #[test]
    fn test_and_requires_all_conditions() {
        let rule = make_rule(Some("AND"));
        let conditions = vec![make_condition(3, ">", 25.0), make_condition(4, "<", 50.0)];

        assert!(evaluate_rule(
            &rule,
            &conditions,
            &readings(&[(3, "26.0"), (4, "40.0")])
        ));
        assert!(!evaluate_rule(
            &rule,
            &conditions,
            &readings(&[(3, "26.0"), (4, "60.0")])
        ));
    }

    #[test]
    fn test_or_fires_on_any_condition() {
        let rule = make_rule(Some("OR"));
        let conditions = vec![make_condition(3, ">", 25.0), make_condition(4, "<", 50.0)];

        assert!(evaluate_rule(
            &rule,
            &conditions,
            &readings(&[(3, "20.0"), (4, "40.0")])
        ));
        assert!(!evaluate_rule(
            &rule,
            &conditions,
            &readings(&[(3, "20.0"), (4, "60.0")])
        ));
    }

    #[test]
    fn test_logical_operator_case_insensitive() {
        let rule = make_rule(Some("or"));
        let conditions = vec![make_condition(3, ">", 25.0), make_condition(4, "<", 50.0)];

        assert!(evaluate_rule(
            &rule,
            &conditions,
            &readings(&[(3, "30.0"), (4, "60.0")])
        ));
    }

    #[test]
    fn test_missing_reading_under_and_blocks_rule() {
        let rule = make_rule(Some("AND"));
        let conditions = vec![make_condition(3, ">", 25.0), make_condition(4, "<", 50.0)];

        assert!(!evaluate_rule(&rule, &conditions, &readings(&[(3, "30.0")])));
    }

    #[test]
    fn test_rule_without_conditions_never_fires() {
        let rule = make_rule(None);
        assert!(!evaluate_rule(&rule, &[], &readings(&[(3, "30.0")])));
    }

    #[test]
    fn test_price_sentinel_condition() {
        let rule = make_rule(None);
        let conditions = vec![make_condition(PRICE_SENSOR_ID, "<", 0.12)];

        assert!(evaluate_rule(
            &rule,
            &conditions,
            &readings(&[(PRICE_SENSOR_ID, "0.09")])
        ));
        assert!(!evaluate_rule(&rule, &conditions, &readings(&[])));
    }
}
