use crate::{
    db::DbPool,
    models::{AutomationCondition, AutomationRule, NewAutomationCondition, NewAutomationRule, Switch},
    schema::{automation_conditions, automation_rules, switches},
    services::{
        access::{self, AccessPolicy, DeviceDirectory, DieselDirectory, ResourceKind},
        auth::Claims,
        rule_validation::{self, RuleSubmission},
    },
};
use actix_web::{delete, get, post, put, web, HttpResponse, Responder};
use chrono::Utc;
use diesel::prelude::*;
use serde::Serialize;
use std::collections::HashMap;

// ============================================================================
// Response DTOs
// ============================================================================

#[derive(Serialize)]
pub struct RuleResponse {
    pub id: i32,
    pub target_type: String,
    pub target_id: i32,
    pub action: String,
    pub logical_operator: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub conditions: Vec<AutomationCondition>,
}

impl RuleResponse {
    fn from_parts(rule: AutomationRule, conditions: Vec<AutomationCondition>) -> Self {
        Self {
            id: rule.id,
            target_type: rule.target_type,
            target_id: rule.target_id,
            action: rule.action,
            logical_operator: rule.logical_operator,
            created_at: rule.created_at.to_string(),
            updated_at: rule.updated_at.to_string(),
            conditions,
        }
    }
}

fn load_conditions_for(
    conn: &mut diesel::pg::PgConnection,
    rule_ids: &[i32],
) -> Result<HashMap<i32, Vec<AutomationCondition>>, diesel::result::Error> {
    let conditions: Vec<AutomationCondition> = automation_conditions::table
        .filter(automation_conditions::rule_id.eq_any(rule_ids))
        .order(automation_conditions::id.asc())
        .load(conn)?;

    let mut by_rule: HashMap<i32, Vec<AutomationCondition>> = HashMap::new();
    for condition in conditions {
        by_rule.entry(condition.rule_id).or_default().push(condition);
    }
    Ok(by_rule)
}

// ============================================================================
// Endpoints
// ============================================================================

/// List the rules whose resolved target the principal can act on. The
/// discovery filter is computed once for the whole set, not per rule.
#[get("")]
pub async fn list_rules(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
) -> impl Responder {
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let rules: Vec<AutomationRule> = match automation_rules::table
        .order(automation_rules::id.asc())
        .load(&mut conn)
    {
        Ok(r) => r,
        Err(_) => return HttpResponse::InternalServerError().body("Error fetching rules"),
    };

    // Resolve every target switch in one query
    let target_ids: Vec<i32> = rules
        .iter()
        .filter(|r| r.target_type == "Switch")
        .map(|r| r.target_id)
        .collect();

    let targets: HashMap<i32, Switch> = match switches::table
        .filter(switches::id.eq_any(&target_ids))
        .load::<Switch>(&mut conn)
    {
        Ok(s) => s.into_iter().map(|sw| (sw.id, sw)).collect(),
        Err(_) => return HttpResponse::InternalServerError().body("Error fetching rule targets"),
    };

    let is_admin = policy.is_admin(ResourceKind::Automation, &claims.roles);
    let reachable = if is_admin {
        Default::default()
    } else {
        let dir = DieselDirectory::new(pool.get_ref().clone());
        access::reachable_targets(&claims.roles, &dir)
    };

    let accessible: Vec<AutomationRule> = rules
        .into_iter()
        .filter(|rule| {
            if rule.target_type != "Switch" {
                return false;
            }
            // A rule whose target cannot be resolved is invisible, not an error
            let Some(target) = targets.get(&rule.target_id) else {
                return false;
            };
            is_admin
                || claims
                    .roles
                    .iter()
                    .any(|r| r.eq_ignore_ascii_case(&target.role))
                || reachable.contains(&target.name)
        })
        .collect();

    let rule_ids: Vec<i32> = accessible.iter().map(|r| r.id).collect();
    let mut by_rule = match load_conditions_for(&mut conn, &rule_ids) {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Error fetching conditions"),
    };

    let response: Vec<RuleResponse> = accessible
        .into_iter()
        .map(|rule| {
            let conditions = by_rule.remove(&rule.id).unwrap_or_default();
            RuleResponse::from_parts(rule, conditions)
        })
        .collect();

    HttpResponse::Ok().json(response)
}

/// Get a specific rule by ID
#[get("/{rule_id}")]
pub async fn get_rule(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    path: web::Path<i32>,
) -> impl Responder {
    let rule_id = path.into_inner();
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let rule: AutomationRule = match automation_rules::table.find(rule_id).first(&mut conn) {
        Ok(r) => r,
        Err(_) => return HttpResponse::NotFound().body("Rule not found"),
    };

    let dir = DieselDirectory::new(pool.get_ref().clone());
    if !access::has_rule_access(&policy, &claims.roles, &rule, &dir) {
        return HttpResponse::Forbidden().body("Access denied");
    }

    let mut by_rule = match load_conditions_for(&mut conn, &[rule_id]) {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Error fetching conditions"),
    };
    let conditions = by_rule.remove(&rule_id).unwrap_or_default();

    HttpResponse::Ok().json(RuleResponse::from_parts(rule, conditions))
}

/// Create a rule with its conditions. Validation errors come back as one
/// complete list; nothing is persisted unless every check passes.
#[post("")]
pub async fn create_rule(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    body: web::Json<RuleSubmission>,
) -> impl Responder {
    let dir = DieselDirectory::new(pool.get_ref().clone());

    let validation = rule_validation::validate_create(&body, &dir);
    if !validation.is_valid {
        return HttpResponse::BadRequest().json(validation);
    }

    // Validation established the target exists; now the principal must be
    // allowed to automate it
    let target = match dir.find_switch(body.target_id) {
        Ok(Some(t)) => t,
        _ => return HttpResponse::BadRequest().body("Target could not be resolved"),
    };
    if !access::has_device_access(
        &policy,
        ResourceKind::Automation,
        &claims.roles,
        &target.name,
        &target.role,
        &dir,
    ) {
        return HttpResponse::Forbidden().body("Access denied");
    }

    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let new_rule = NewAutomationRule {
        target_type: body.target_type.clone(),
        target_id: body.target_id,
        action: body.action.to_lowercase(),
        logical_operator: rule_validation::normalized_logical_operator(&body),
    };

    let created = conn.transaction::<(AutomationRule, Vec<AutomationCondition>), diesel::result::Error, _>(
        |conn| {
            let rule: AutomationRule = diesel::insert_into(automation_rules::table)
                .values(&new_rule)
                .get_result(conn)?;

            let new_conditions: Vec<NewAutomationCondition> = body
                .conditions
                .iter()
                .map(|c| NewAutomationCondition {
                    rule_id: rule.id,
                    sensor_type: c.sensor_type.clone(),
                    sensor_id: c.sensor_id,
                    condition: c.condition.trim().to_string(),
                    threshold: c.threshold,
                })
                .collect();

            let conditions: Vec<AutomationCondition> =
                diesel::insert_into(automation_conditions::table)
                    .values(&new_conditions)
                    .get_results(conn)?;

            Ok((rule, conditions))
        },
    );

    match created {
        Ok((rule, conditions)) => {
            HttpResponse::Created().json(RuleResponse::from_parts(rule, conditions))
        }
        Err(e) => HttpResponse::InternalServerError().body(format!("Failed to create rule: {}", e)),
    }
}

/// Update a rule, replacing its whole condition set atomically. A failed
/// update leaves the previous conditions untouched.
#[put("/{rule_id}")]
pub async fn update_rule(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    path: web::Path<i32>,
    body: web::Json<RuleSubmission>,
) -> impl Responder {
    let rule_id = path.into_inner();
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let existing: AutomationRule = match automation_rules::table.find(rule_id).first(&mut conn) {
        Ok(r) => r,
        Err(_) => return HttpResponse::NotFound().body("Rule not found"),
    };

    let dir = DieselDirectory::new(pool.get_ref().clone());
    if !access::has_rule_access(&policy, &claims.roles, &existing, &dir) {
        return HttpResponse::Forbidden().body("Access denied");
    }

    let validation = rule_validation::validate_update(&body, &dir);
    if !validation.is_valid {
        return HttpResponse::BadRequest().json(validation);
    }

    let now = Utc::now().naive_utc();
    let logical_operator = rule_validation::normalized_logical_operator(&body);

    let updated = conn.transaction::<(AutomationRule, Vec<AutomationCondition>), diesel::result::Error, _>(
        |conn| {
            let rule: AutomationRule =
                diesel::update(automation_rules::table.find(rule_id))
                    .set((
                        automation_rules::target_type.eq(&body.target_type),
                        automation_rules::target_id.eq(body.target_id),
                        automation_rules::action.eq(body.action.to_lowercase()),
                        automation_rules::logical_operator.eq(&logical_operator),
                        automation_rules::updated_at.eq(now),
                    ))
                    .get_result(conn)?;

            // Replace-all: old set out, new set in, or neither
            diesel::delete(
                automation_conditions::table.filter(automation_conditions::rule_id.eq(rule_id)),
            )
            .execute(conn)?;

            let new_conditions: Vec<NewAutomationCondition> = body
                .conditions
                .iter()
                .map(|c| NewAutomationCondition {
                    rule_id,
                    sensor_type: c.sensor_type.clone(),
                    sensor_id: c.sensor_id,
                    condition: c.condition.trim().to_string(),
                    threshold: c.threshold,
                })
                .collect();

            let conditions: Vec<AutomationCondition> =
                diesel::insert_into(automation_conditions::table)
                    .values(&new_conditions)
                    .get_results(conn)?;

            Ok((rule, conditions))
        },
    );

    match updated {
        Ok((rule, conditions)) => {
            HttpResponse::Ok().json(RuleResponse::from_parts(rule, conditions))
        }
        Err(e) => HttpResponse::InternalServerError().body(format!("Failed to update rule: {}", e)),
    }
}

/// Delete a rule; its conditions cascade
#[delete("/{rule_id}")]
pub async fn delete_rule(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    path: web::Path<i32>,
) -> impl Responder {
    let rule_id = path.into_inner();
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let rule: AutomationRule = match automation_rules::table.find(rule_id).first(&mut conn) {
        Ok(r) => r,
        Err(_) => return HttpResponse::NotFound().body("Rule not found"),
    };

    let dir = DieselDirectory::new(pool.get_ref().clone());
    if !access::has_rule_access(&policy, &claims.roles, &rule, &dir) {
        return HttpResponse::Forbidden().body("Access denied");
    }

    match diesel::delete(automation_rules::table.find(rule_id)).execute(&mut conn) {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({"deleted": true})),
        Err(_) => HttpResponse::InternalServerError().body("Failed to delete rule"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::rule_validation::RuleSubmission;

    #[test]
    fn test_rule_submission_deserialization() {
        let json = r#"{
            "target_type": "Switch",
            "target_id": 7,
            "action": "on",
            "conditions": [
                {"sensor_type": "temperature", "sensor_id": 3, "condition": ">", "threshold": 25.0}
            ]
        }"#;
        let submission: RuleSubmission = serde_json::from_str(json).unwrap();
        assert_eq!(submission.target_id, 7);
        assert!(submission.logical_operator.is_none());
        assert_eq!(submission.conditions.len(), 1);
        assert_eq!(submission.conditions[0].condition, ">");
    }

    #[test]
    fn test_rule_submission_with_operator() {
        let json = r#"{
            "target_type": "Switch",
            "target_id": 7,
            "action": "off",
            "logical_operator": "or",
            "conditions": [
                {"sensor_type": "temperature", "sensor_id": 3, "condition": ">", "threshold": 25.0},
                {"sensor_type": "electricity_price", "sensor_id": -1, "condition": "<", "threshold": 0.1}
            ]
        }"#;
        let submission: RuleSubmission = serde_json::from_str(json).unwrap();
        assert_eq!(submission.logical_operator, Some("or".to_string()));
        assert_eq!(submission.conditions[1].sensor_id, -1);
    }

    #[test]
    fn test_rule_response_shape() {
        use chrono::NaiveDate;

        let ts = NaiveDate::from_ymd_opt(2026, 1, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let rule = AutomationRule {
            id: 4,
            target_type: "Switch".to_string(),
            target_id: 7,
            action: "on".to_string(),
            logical_operator: None,
            created_at: ts,
            updated_at: ts,
        };

        let response = RuleResponse::from_parts(rule, Vec::new());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["id"], 4);
        assert_eq!(json["logical_operator"], serde_json::Value::Null);
        assert!(json["conditions"].as_array().unwrap().is_empty());
    }
}
