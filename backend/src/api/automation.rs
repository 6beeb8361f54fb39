use crate::services::{
    access::{AccessPolicy, ResourceKind},
    auth::Claims,
    automation_engine::AutomationEngine,
};
use actix_web::{post, web, HttpResponse, Responder};

/// Evaluate every rule and dispatch the triggered ones. Admin tier only.
#[post("/run")]
pub async fn run_automation(
    engine: web::Data<AutomationEngine>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
) -> impl Responder {
    if !policy.is_admin(ResourceKind::Automation, &claims.roles) {
        return HttpResponse::Forbidden().body("Automation admin role required");
    }

    let outcomes = engine.run().await;

    let summary = serde_json::json!({
        "triggered": outcomes.len(),
        "dispatched": outcomes.iter().filter(|o| o.dispatched).count(),
        "results": outcomes.iter().map(|o| {
            serde_json::json!({
                "rule_id": o.rule_id,
                "dispatched": o.dispatched,
                "detail": o.detail,
            })
        }).collect::<Vec<_>>()
    });

    HttpResponse::Ok().json(summary)
}
