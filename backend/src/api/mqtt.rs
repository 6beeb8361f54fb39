use crate::{
    db::DbPool,
    models::{MqttAcl, MqttUser, NewMqttAcl, NewMqttUser},
    schema::{mqtt_acls, mqtt_users},
    services::{
        access::{AccessPolicy, ResourceKind},
        auth::{self, Claims},
    },
};
use actix_web::{delete, get, post, web, HttpResponse, Responder};
use diesel::prelude::*;
use rand::RngCore;
use serde::{Deserialize, Serialize};

// ACL access levels, mosquitto-style
pub const ACL_READ: i32 = 1;
pub const ACL_WRITE: i32 = 2;
pub const ACL_READ_WRITE: i32 = 3;

#[derive(Deserialize)]
pub struct CreateMqttUserRequest {
    pub username: String,
    #[serde(default)]
    pub is_superuser: bool,
}

#[derive(Deserialize)]
pub struct CreateAclRequest {
    pub topic: String,
    pub access: i32,
}

/// Returned exactly once at provisioning time; only the hash is stored.
#[derive(Serialize)]
pub struct ProvisionedCredentials {
    pub id: i32,
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct MqttUserResponse {
    pub id: i32,
    pub username: String,
    pub is_superuser: bool,
    pub created_at: String,
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Provision MQTT credentials for a device or bridge
#[post("/users")]
pub async fn create_mqtt_user(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    body: web::Json<CreateMqttUserRequest>,
) -> impl Responder {
    if !policy.is_admin(ResourceKind::Mqtt, &claims.roles) {
        return HttpResponse::Forbidden().body("MQTT admin role required");
    }

    if body.username.trim().is_empty() {
        return HttpResponse::BadRequest().body("Username is required");
    }

    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let password = generate_secret();
    let password_hash = match auth::hash_password(&password) {
        Ok(h) => h,
        Err(_) => return HttpResponse::InternalServerError().body("Error hashing password"),
    };

    let new_user = NewMqttUser {
        username: body.username.clone(),
        password_hash,
        is_superuser: body.is_superuser,
    };

    match diesel::insert_into(mqtt_users::table)
        .values(&new_user)
        .get_result::<MqttUser>(&mut conn)
    {
        Ok(user) => HttpResponse::Created().json(ProvisionedCredentials {
            id: user.id,
            username: user.username,
            password,
        }),
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => HttpResponse::Conflict().body("MQTT username already exists"),
        Err(e) => {
            HttpResponse::InternalServerError().body(format!("Failed to create MQTT user: {}", e))
        }
    }
}

/// List provisioned MQTT users (hashes never leave the store)
#[get("/users")]
pub async fn list_mqtt_users(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
) -> impl Responder {
    if !policy.is_admin(ResourceKind::Mqtt, &claims.roles) {
        return HttpResponse::Forbidden().body("MQTT admin role required");
    }

    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let users: Vec<MqttUser> = match mqtt_users::table
        .order(mqtt_users::username.asc())
        .load(&mut conn)
    {
        Ok(u) => u,
        Err(_) => return HttpResponse::InternalServerError().body("Error fetching MQTT users"),
    };

    let response: Vec<MqttUserResponse> = users
        .into_iter()
        .map(|u| MqttUserResponse {
            id: u.id,
            username: u.username,
            is_superuser: u.is_superuser,
            created_at: u.created_at.to_string(),
        })
        .collect();

    HttpResponse::Ok().json(response)
}

/// Delete an MQTT user; its ACLs cascade
#[delete("/users/{user_id}")]
pub async fn delete_mqtt_user(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    path: web::Path<i32>,
) -> impl Responder {
    if !policy.is_admin(ResourceKind::Mqtt, &claims.roles) {
        return HttpResponse::Forbidden().body("MQTT admin role required");
    }

    let user_id = path.into_inner();
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    match diesel::delete(mqtt_users::table.find(user_id)).execute(&mut conn) {
        Ok(0) => HttpResponse::NotFound().body("MQTT user not found"),
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({"deleted": true})),
        Err(_) => HttpResponse::InternalServerError().body("Failed to delete MQTT user"),
    }
}

/// Grant an MQTT user access to a topic
#[post("/users/{user_id}/acls")]
pub async fn create_acl(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    path: web::Path<i32>,
    body: web::Json<CreateAclRequest>,
) -> impl Responder {
    if !policy.is_admin(ResourceKind::Mqtt, &claims.roles) {
        return HttpResponse::Forbidden().body("MQTT admin role required");
    }

    let user_id = path.into_inner();
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let user_exists = mqtt_users::table
        .find(user_id)
        .select(mqtt_users::id)
        .first::<i32>(&mut conn)
        .is_ok();
    if !user_exists {
        return HttpResponse::NotFound().body("MQTT user not found");
    }

    if ![ACL_READ, ACL_WRITE, ACL_READ_WRITE].contains(&body.access) {
        return HttpResponse::BadRequest().body("Access must be 1 (read), 2 (write) or 3 (both)");
    }

    let new_acl = NewMqttAcl {
        mqtt_user_id: user_id,
        topic: body.topic.clone(),
        access: body.access,
    };

    match diesel::insert_into(mqtt_acls::table)
        .values(&new_acl)
        .get_result::<MqttAcl>(&mut conn)
    {
        Ok(acl) => HttpResponse::Created().json(acl),
        Err(e) => HttpResponse::InternalServerError().body(format!("Failed to create ACL: {}", e)),
    }
}

/// List an MQTT user's topic grants
#[get("/users/{user_id}/acls")]
pub async fn list_acls(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    path: web::Path<i32>,
) -> impl Responder {
    if !policy.is_admin(ResourceKind::Mqtt, &claims.roles) {
        return HttpResponse::Forbidden().body("MQTT admin role required");
    }

    let user_id = path.into_inner();
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    match mqtt_acls::table
        .filter(mqtt_acls::mqtt_user_id.eq(user_id))
        .load::<MqttAcl>(&mut conn)
    {
        Ok(acls) => HttpResponse::Ok().json(acls),
        Err(_) => HttpResponse::InternalServerError().body("Error fetching ACLs"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_secrets_are_unique_hex() {
        let a = generate_secret();
        let b = generate_secret();

        assert_eq!(a.len(), 48); // 24 bytes hex-encoded
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_create_mqtt_user_request_defaults() {
        let json = r#"{"username": "hub-east"}"#;
        let request: CreateMqttUserRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.username, "hub-east");
        assert!(!request.is_superuser);
    }

    #[test]
    fn test_create_acl_request_deserialization() {
        let json = r#"{"topic": "home/switches/lamp1/set", "access": 1}"#;
        let request: CreateAclRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.topic, "home/switches/lamp1/set");
        assert_eq!(request.access, ACL_READ);
    }
}
