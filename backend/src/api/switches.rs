use crate::{
    db::DbPool,
    models::{NewSwitch, NewSwitchStateRecord, Switch, SwitchStateRecord},
    schema::{roles, switch_states, switches},
    services::{
        access::{self, AccessPolicy, DieselDirectory, ResourceKind},
        auth::Claims,
        automation_engine::{SWITCH_OFF, SWITCH_ON},
    },
};
use actix_web::{delete, get, post, put, web, HttpResponse, Responder};
use diesel::prelude::*;
use serde::Deserialize;

#[derive(Deserialize)]
pub struct CreateSwitchRequest {
    pub name: String,
    /// Role granting direct access; defaults to the switch name.
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateSwitchRequest {
    pub name: Option<String>,
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct SetStateRequest {
    pub state: String, // "ON" or "OFF"
}

/// List the switches the principal can act on
#[get("")]
pub async fn list_switches(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
) -> impl Responder {
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let all: Vec<Switch> = match switches::table.order(switches::name.asc()).load(&mut conn) {
        Ok(s) => s,
        Err(_) => return HttpResponse::InternalServerError().body("Error fetching switches"),
    };

    if policy.is_admin(ResourceKind::Switch, &claims.roles) {
        return HttpResponse::Ok().json(all);
    }

    // One discovery pass for the whole list instead of a query per switch
    let dir = DieselDirectory::new(pool.get_ref().clone());
    let reachable = access::reachable_targets(&claims.roles, &dir);

    let visible: Vec<Switch> = all
        .into_iter()
        .filter(|s| {
            claims
                .roles
                .iter()
                .any(|r| r.eq_ignore_ascii_case(&s.role))
                || reachable.contains(&s.name)
        })
        .collect();

    HttpResponse::Ok().json(visible)
}

/// Create a switch, provisioning its role if absent. Admin tier only.
#[post("")]
pub async fn create_switch(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    body: web::Json<CreateSwitchRequest>,
) -> impl Responder {
    if !policy.is_admin(ResourceKind::Switch, &claims.roles) {
        return HttpResponse::Forbidden().body("Switch admin role required");
    }

    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    if body.name.trim().is_empty() {
        return HttpResponse::BadRequest().body("Switch name is required");
    }

    let role = body
        .role
        .clone()
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| body.name.clone());

    // Provision the matching role so it can be granted to users
    if let Err(e) = diesel::insert_into(roles::table)
        .values(roles::name.eq(&role))
        .on_conflict(roles::name)
        .do_nothing()
        .execute(&mut conn)
    {
        log::error!("Failed to provision role '{}': {}", role, e);
        return HttpResponse::InternalServerError().body("Failed to provision role");
    }

    let new_switch = NewSwitch {
        name: body.name.clone(),
        role,
        state: SWITCH_OFF.to_string(),
    };

    match diesel::insert_into(switches::table)
        .values(&new_switch)
        .get_result::<Switch>(&mut conn)
    {
        Ok(switch) => HttpResponse::Created().json(switch),
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => HttpResponse::Conflict().body("Switch name already exists"),
        Err(e) => HttpResponse::InternalServerError().body(format!("Failed to create switch: {}", e)),
    }
}

/// Get a switch by ID
#[get("/{switch_id}")]
pub async fn get_switch(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    path: web::Path<i32>,
) -> impl Responder {
    let switch_id = path.into_inner();
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let switch: Switch = match switches::table.find(switch_id).first(&mut conn) {
        Ok(s) => s,
        Err(_) => return HttpResponse::NotFound().body("Switch not found"),
    };

    let dir = DieselDirectory::new(pool.get_ref().clone());
    if !access::has_switch_access(&policy, &claims.roles, &switch, &dir) {
        return HttpResponse::Forbidden().body("Access denied");
    }

    HttpResponse::Ok().json(switch)
}

/// Update a switch in place
#[put("/{switch_id}")]
pub async fn update_switch(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    path: web::Path<i32>,
    body: web::Json<UpdateSwitchRequest>,
) -> impl Responder {
    let switch_id = path.into_inner();
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let switch: Switch = match switches::table.find(switch_id).first(&mut conn) {
        Ok(s) => s,
        Err(_) => return HttpResponse::NotFound().body("Switch not found"),
    };

    let dir = DieselDirectory::new(pool.get_ref().clone());
    if !access::has_switch_access(&policy, &claims.roles, &switch, &dir) {
        return HttpResponse::Forbidden().body("Access denied");
    }

    if let Some(ref name) = body.name {
        diesel::update(switches::table.find(switch_id))
            .set(switches::name.eq(name))
            .execute(&mut conn)
            .ok();
    }

    if let Some(ref role) = body.role {
        diesel::update(switches::table.find(switch_id))
            .set(switches::role.eq(role))
            .execute(&mut conn)
            .ok();
    }

    match switches::table.find(switch_id).first::<Switch>(&mut conn) {
        Ok(updated) => HttpResponse::Ok().json(updated),
        Err(_) => HttpResponse::InternalServerError().body("Error fetching updated switch"),
    }
}

/// Delete a switch; its state history cascades
#[delete("/{switch_id}")]
pub async fn delete_switch(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    path: web::Path<i32>,
) -> impl Responder {
    let switch_id = path.into_inner();
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let switch: Switch = match switches::table.find(switch_id).first(&mut conn) {
        Ok(s) => s,
        Err(_) => return HttpResponse::NotFound().body("Switch not found"),
    };

    let dir = DieselDirectory::new(pool.get_ref().clone());
    if !access::has_switch_access(&policy, &claims.roles, &switch, &dir) {
        return HttpResponse::Forbidden().body("Access denied");
    }

    match diesel::delete(switches::table.find(switch_id)).execute(&mut conn) {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({"deleted": true})),
        Err(_) => HttpResponse::InternalServerError().body("Failed to delete switch"),
    }
}

/// Record a new state for a switch ("ON"/"OFF")
#[post("/{switch_id}/state")]
pub async fn set_switch_state(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    path: web::Path<i32>,
    body: web::Json<SetStateRequest>,
) -> impl Responder {
    let switch_id = path.into_inner();
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let switch: Switch = match switches::table.find(switch_id).first(&mut conn) {
        Ok(s) => s,
        Err(_) => return HttpResponse::NotFound().body("Switch not found"),
    };

    let dir = DieselDirectory::new(pool.get_ref().clone());
    if !access::has_switch_access(&policy, &claims.roles, &switch, &dir) {
        return HttpResponse::Forbidden().body("Access denied");
    }

    let state = if body.state.eq_ignore_ascii_case(SWITCH_ON) {
        SWITCH_ON
    } else if body.state.eq_ignore_ascii_case(SWITCH_OFF) {
        SWITCH_OFF
    } else {
        return HttpResponse::BadRequest().body("State must be 'ON' or 'OFF'");
    };

    let record = NewSwitchStateRecord {
        switch_id,
        state: state.to_string(),
    };

    if let Err(e) = diesel::insert_into(switch_states::table)
        .values(&record)
        .execute(&mut conn)
    {
        return HttpResponse::InternalServerError().body(format!("Failed to record state: {}", e));
    }

    diesel::update(switches::table.find(switch_id))
        .set(switches::state.eq(state))
        .execute(&mut conn)
        .ok();

    HttpResponse::Ok().json(serde_json::json!({"id": switch_id, "state": state}))
}

/// State history for a switch, newest first
#[get("/{switch_id}/history")]
pub async fn get_switch_history(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    path: web::Path<i32>,
) -> impl Responder {
    let switch_id = path.into_inner();
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let switch: Switch = match switches::table.find(switch_id).first(&mut conn) {
        Ok(s) => s,
        Err(_) => return HttpResponse::NotFound().body("Switch not found"),
    };

    let dir = DieselDirectory::new(pool.get_ref().clone());
    if !access::has_switch_access(&policy, &claims.roles, &switch, &dir) {
        return HttpResponse::Forbidden().body("Access denied");
    }

    let history: Vec<SwitchStateRecord> = match switch_states::table
        .filter(switch_states::switch_id.eq(switch_id))
        .order(switch_states::recorded_at.desc())
        .limit(100)
        .load(&mut conn)
    {
        Ok(h) => h,
        Err(_) => return HttpResponse::InternalServerError().body("Error fetching history"),
    };

    HttpResponse::Ok().json(history)
}
