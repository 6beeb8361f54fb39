use crate::{
    db::DbPool,
    models::{DiscoveredDevice, NewDiscoveredDevice},
    schema::discovered_devices,
    services::{
        access::{AccessPolicy, DeviceDirectory, DieselDirectory, ResourceKind},
        auth::Claims,
    },
};
use actix_web::{get, post, web, HttpResponse, Responder};
use diesel::prelude::*;

/// Record that a gateway has observed a device. The triple
/// (discovered_by, target, device_type) is unique; re-announcing an edge
/// is a conflict and the original provenance row stays untouched.
#[post("")]
pub async fn register_discovery(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    body: web::Json<NewDiscoveredDevice>,
) -> impl Responder {
    if body.discovered_by.trim().is_empty() || body.target.trim().is_empty() {
        return HttpResponse::BadRequest().body("discovered_by and target are required");
    }

    // The announcing principal must control a sensor on the discovering
    // gateway, unless it holds an admin tier
    if !policy.is_admin(ResourceKind::Sensor, &claims.roles) {
        let dir = DieselDirectory::new(pool.get_ref().clone());
        let parents = match dir.sensor_parents_for_roles(&claims.roles) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("Discovery registration failed loading parents: {}", e);
                return HttpResponse::InternalServerError().body("Error resolving gateways");
            }
        };

        if !parents.contains(&body.discovered_by) {
            return HttpResponse::Forbidden().body("No access to the discovering gateway");
        }
    }

    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    match diesel::insert_into(discovered_devices::table)
        .values(body.into_inner())
        .get_result::<DiscoveredDevice>(&mut conn)
    {
        Ok(edge) => HttpResponse::Created().json(edge),
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => HttpResponse::Conflict().body("Discovery already recorded"),
        Err(e) => {
            HttpResponse::InternalServerError().body(format!("Failed to record discovery: {}", e))
        }
    }
}

/// List discovery edges visible to the principal
#[get("")]
pub async fn list_discoveries(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
) -> impl Responder {
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    if policy.is_admin(ResourceKind::Sensor, &claims.roles) {
        return match discovered_devices::table
            .order(discovered_devices::discovered_at.desc())
            .load::<DiscoveredDevice>(&mut conn)
        {
            Ok(edges) => HttpResponse::Ok().json(edges),
            Err(_) => HttpResponse::InternalServerError().body("Error fetching discoveries"),
        };
    }

    let dir = DieselDirectory::new(pool.get_ref().clone());
    let parents = match dir.sensor_parents_for_roles(&claims.roles) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("Discovery listing failed loading parents: {}", e);
            return HttpResponse::InternalServerError().body("Error resolving gateways");
        }
    };

    match discovered_devices::table
        .filter(discovered_devices::discovered_by.eq_any(&parents))
        .order(discovered_devices::discovered_at.desc())
        .load::<DiscoveredDevice>(&mut conn)
    {
        Ok(edges) => HttpResponse::Ok().json(edges),
        Err(_) => HttpResponse::InternalServerError().body("Error fetching discoveries"),
    }
}

#[cfg(test)]
mod tests {
    use crate::models::NewDiscoveredDevice;

    #[test]
    fn test_new_discovery_deserialization() {
        let json = r#"{"discovered_by": "hub-east", "target": "lamp1", "device_type": "switch"}"#;
        let edge: NewDiscoveredDevice = serde_json::from_str(json).unwrap();
        assert_eq!(edge.discovered_by, "hub-east");
        assert_eq!(edge.target, "lamp1");
        assert_eq!(edge.device_type, "switch");
    }

    #[test]
    fn test_new_discovery_missing_field_fails() {
        let json = r#"{"discovered_by": "hub-east", "target": "lamp1"}"#;
        let result: Result<NewDiscoveredDevice, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
