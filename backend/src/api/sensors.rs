use crate::{
    db::DbPool,
    models::{NewSensor, NewSensorReading, Sensor, SensorReading},
    schema::{roles, sensor_readings, sensors},
    services::{
        access::{self, AccessPolicy, DieselDirectory, ResourceKind},
        auth::Claims,
        automation_engine::AutomationEngine,
    },
};
use actix_web::{delete, get, post, put, web, HttpResponse, Responder};
use diesel::prelude::*;
use serde::Deserialize;

#[derive(Deserialize)]
pub struct CreateSensorRequest {
    pub name: String,
    pub sensor_type: String,
    /// Gateway/hub the sensor hangs off; discovery edges point from it.
    pub parent_name: String,
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateSensorRequest {
    pub name: Option<String>,
    pub sensor_type: Option<String>,
    pub parent_name: Option<String>,
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct IngestReadingRequest {
    pub value: String,
}

/// List the sensors the principal can act on
#[get("")]
pub async fn list_sensors(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
) -> impl Responder {
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let all: Vec<Sensor> = match sensors::table.order(sensors::name.asc()).load(&mut conn) {
        Ok(s) => s,
        Err(_) => return HttpResponse::InternalServerError().body("Error fetching sensors"),
    };

    if policy.is_admin(ResourceKind::Sensor, &claims.roles) {
        return HttpResponse::Ok().json(all);
    }

    let dir = DieselDirectory::new(pool.get_ref().clone());
    let reachable = access::reachable_targets(&claims.roles, &dir);

    let visible: Vec<Sensor> = all
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

/// Create a sensor, provisioning its role if absent. Admin tier only.
#[post("")]
pub async fn create_sensor(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    body: web::Json<CreateSensorRequest>,
) -> impl Responder {
    if !policy.is_admin(ResourceKind::Sensor, &claims.roles) {
        return HttpResponse::Forbidden().body("Sensor admin role required");
    }

    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    if body.name.trim().is_empty() {
        return HttpResponse::BadRequest().body("Sensor name is required");
    }

    let role = body
        .role
        .clone()
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| body.name.clone());

    if let Err(e) = diesel::insert_into(roles::table)
        .values(roles::name.eq(&role))
        .on_conflict(roles::name)
        .do_nothing()
        .execute(&mut conn)
    {
        log::error!("Failed to provision role '{}': {}", role, e);
        return HttpResponse::InternalServerError().body("Failed to provision role");
    }

    let new_sensor = NewSensor {
        name: body.name.clone(),
        role,
        sensor_type: body.sensor_type.clone(),
        parent_name: body.parent_name.clone(),
    };

    match diesel::insert_into(sensors::table)
        .values(&new_sensor)
        .get_result::<Sensor>(&mut conn)
    {
        Ok(sensor) => HttpResponse::Created().json(sensor),
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => HttpResponse::Conflict().body("Sensor name already exists"),
        Err(e) => HttpResponse::InternalServerError().body(format!("Failed to create sensor: {}", e)),
    }
}

/// Update a sensor in place
#[put("/{sensor_id}")]
pub async fn update_sensor(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    path: web::Path<i32>,
    body: web::Json<UpdateSensorRequest>,
) -> impl Responder {
    let sensor_id = path.into_inner();
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let sensor: Sensor = match sensors::table.find(sensor_id).first(&mut conn) {
        Ok(s) => s,
        Err(_) => return HttpResponse::NotFound().body("Sensor not found"),
    };

    let dir = DieselDirectory::new(pool.get_ref().clone());
    if !access::has_sensor_access(&policy, &claims.roles, &sensor, &dir) {
        return HttpResponse::Forbidden().body("Access denied");
    }

    if let Some(ref name) = body.name {
        diesel::update(sensors::table.find(sensor_id))
            .set(sensors::name.eq(name))
            .execute(&mut conn)
            .ok();
    }
    if let Some(ref sensor_type) = body.sensor_type {
        diesel::update(sensors::table.find(sensor_id))
            .set(sensors::sensor_type.eq(sensor_type))
            .execute(&mut conn)
            .ok();
    }
    if let Some(ref parent_name) = body.parent_name {
        diesel::update(sensors::table.find(sensor_id))
            .set(sensors::parent_name.eq(parent_name))
            .execute(&mut conn)
            .ok();
    }
    if let Some(ref role) = body.role {
        diesel::update(sensors::table.find(sensor_id))
            .set(sensors::role.eq(role))
            .execute(&mut conn)
            .ok();
    }

    match sensors::table.find(sensor_id).first::<Sensor>(&mut conn) {
        Ok(updated) => HttpResponse::Ok().json(updated),
        Err(_) => HttpResponse::InternalServerError().body("Error fetching updated sensor"),
    }
}

/// Delete a sensor; its readings cascade
#[delete("/{sensor_id}")]
pub async fn delete_sensor(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    path: web::Path<i32>,
) -> impl Responder {
    let sensor_id = path.into_inner();
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let sensor: Sensor = match sensors::table.find(sensor_id).first(&mut conn) {
        Ok(s) => s,
        Err(_) => return HttpResponse::NotFound().body("Sensor not found"),
    };

    let dir = DieselDirectory::new(pool.get_ref().clone());
    if !access::has_sensor_access(&policy, &claims.roles, &sensor, &dir) {
        return HttpResponse::Forbidden().body("Access denied");
    }

    match diesel::delete(sensors::table.find(sensor_id)).execute(&mut conn) {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({"deleted": true})),
        Err(_) => HttpResponse::InternalServerError().body("Failed to delete sensor"),
    }
}

/// Ingest a reading and fan out to the rules referencing this sensor
#[post("/{sensor_id}/readings")]
pub async fn ingest_reading(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    engine: web::Data<AutomationEngine>,
    claims: Claims,
    path: web::Path<i32>,
    body: web::Json<IngestReadingRequest>,
) -> impl Responder {
    let sensor_id = path.into_inner();
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let sensor: Sensor = match sensors::table.find(sensor_id).first(&mut conn) {
        Ok(s) => s,
        Err(_) => return HttpResponse::NotFound().body("Sensor not found"),
    };

    let dir = DieselDirectory::new(pool.get_ref().clone());
    if !access::has_sensor_access(&policy, &claims.roles, &sensor, &dir) {
        return HttpResponse::Forbidden().body("Access denied");
    }

    let new_reading = NewSensorReading {
        sensor_id,
        value: body.value.clone(),
    };

    let reading: SensorReading = match diesel::insert_into(sensor_readings::table)
        .values(&new_reading)
        .get_result(&mut conn)
    {
        Ok(r) => r,
        Err(e) => {
            return HttpResponse::InternalServerError()
                .body(format!("Failed to store reading: {}", e))
        }
    };

    let outcomes = engine.process_reading(sensor_id).await;

    HttpResponse::Created().json(serde_json::json!({
        "reading": reading,
        "rules_dispatched": outcomes.iter().filter(|o| o.dispatched).count(),
    }))
}

/// Latest reading for a sensor
#[get("/{sensor_id}/readings/latest")]
pub async fn latest_reading(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    path: web::Path<i32>,
) -> impl Responder {
    let sensor_id = path.into_inner();
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let sensor: Sensor = match sensors::table.find(sensor_id).first(&mut conn) {
        Ok(s) => s,
        Err(_) => return HttpResponse::NotFound().body("Sensor not found"),
    };

    let dir = DieselDirectory::new(pool.get_ref().clone());
    if !access::has_sensor_access(&policy, &claims.roles, &sensor, &dir) {
        return HttpResponse::Forbidden().body("Access denied");
    }

    let reading: Option<SensorReading> = sensor_readings::table
        .filter(sensor_readings::sensor_id.eq(sensor_id))
        .order(sensor_readings::recorded_at.desc())
        .first(&mut conn)
        .optional()
        .unwrap_or(None);

    match reading {
        Some(r) => HttpResponse::Ok().json(r),
        None => HttpResponse::NotFound().body("No readings recorded"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_sensor_request_deserialization() {
        let json = r#"{"name": "thermo1", "sensor_type": "temperature", "parent_name": "hub-east"}"#;
        let request: CreateSensorRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.name, "thermo1");
        assert_eq!(request.sensor_type, "temperature");
        assert_eq!(request.parent_name, "hub-east");
        assert!(request.role.is_none());
    }

    #[test]
    fn test_ingest_reading_request_deserialization() {
        let json = r#"{"value": "23.5"}"#;
        let request: IngestReadingRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.value, "23.5");
    }

    #[test]
    fn test_update_sensor_request_partial() {
        let json = r#"{"parent_name": "hub-west"}"#;
        let request: UpdateSensorRequest = serde_json::from_str(json).unwrap();
        assert!(request.name.is_none());
        assert_eq!(request.parent_name, Some("hub-west".to_string()));
    }
}
