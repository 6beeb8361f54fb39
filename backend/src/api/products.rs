use crate::{
    db::DbPool,
    models::{NewProduct, NewSubscription, Product, Subscription},
    schema::{products, subscriptions},
    services::{
        access::{AccessPolicy, ResourceKind},
        auth::Claims,
    },
};
use actix_web::{delete, get, post, web, HttpResponse, Responder};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Deserialize;

#[derive(Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price_cents: i32,
}

#[derive(Deserialize)]
pub struct CreateSubscriptionRequest {
    pub product_id: i32,
    pub expires_at: Option<NaiveDateTime>,
}

/// List available products
#[get("")]
pub async fn list_products(pool: web::Data<DbPool>, _claims: Claims) -> impl Responder {
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    match products::table
        .order(products::name.asc())
        .load::<Product>(&mut conn)
    {
        Ok(p) => HttpResponse::Ok().json(p),
        Err(_) => HttpResponse::InternalServerError().body("Error fetching products"),
    }
}

/// Create a product. Admin tier only.
#[post("")]
pub async fn create_product(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    body: web::Json<CreateProductRequest>,
) -> impl Responder {
    if !policy.is_admin(ResourceKind::Product, &claims.roles) {
        return HttpResponse::Forbidden().body("Product admin role required");
    }

    if body.name.trim().is_empty() {
        return HttpResponse::BadRequest().body("Product name is required");
    }
    if body.price_cents < 0 {
        return HttpResponse::BadRequest().body("Price must not be negative");
    }

    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let new_product = NewProduct {
        name: body.name.clone(),
        description: body.description.clone(),
        price_cents: body.price_cents,
    };

    match diesel::insert_into(products::table)
        .values(&new_product)
        .get_result::<Product>(&mut conn)
    {
        Ok(product) => HttpResponse::Created().json(product),
        Err(e) => {
            HttpResponse::InternalServerError().body(format!("Failed to create product: {}", e))
        }
    }
}

/// Delete a product. Admin tier only.
#[delete("/{product_id}")]
pub async fn delete_product(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    path: web::Path<i32>,
) -> impl Responder {
    if !policy.is_admin(ResourceKind::Product, &claims.roles) {
        return HttpResponse::Forbidden().body("Product admin role required");
    }

    let product_id = path.into_inner();
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    match diesel::delete(products::table.find(product_id)).execute(&mut conn) {
        Ok(0) => HttpResponse::NotFound().body("Product not found"),
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({"deleted": true})),
        Err(_) => HttpResponse::InternalServerError().body("Failed to delete product"),
    }
}

/// List subscriptions: own for regular users, all for the admin tier
#[get("")]
pub async fn list_subscriptions(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
) -> impl Responder {
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    if policy.is_admin(ResourceKind::Subscription, &claims.roles) {
        return match subscriptions::table.load::<Subscription>(&mut conn) {
            Ok(s) => HttpResponse::Ok().json(s),
            Err(_) => HttpResponse::InternalServerError().body("Error fetching subscriptions"),
        };
    }

    let user_id: i32 = match claims.sub.parse() {
        Ok(id) => id,
        Err(_) => return HttpResponse::BadRequest().body("Invalid user ID"),
    };

    match subscriptions::table
        .filter(subscriptions::user_id.eq(user_id))
        .load::<Subscription>(&mut conn)
    {
        Ok(s) => HttpResponse::Ok().json(s),
        Err(_) => HttpResponse::InternalServerError().body("Error fetching subscriptions"),
    }
}

/// Subscribe the authenticated user to a product
#[post("")]
pub async fn create_subscription(
    pool: web::Data<DbPool>,
    claims: Claims,
    body: web::Json<CreateSubscriptionRequest>,
) -> impl Responder {
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let user_id: i32 = match claims.sub.parse() {
        Ok(id) => id,
        Err(_) => return HttpResponse::BadRequest().body("Invalid user ID"),
    };

    let product_exists = products::table
        .find(body.product_id)
        .select(products::id)
        .first::<i32>(&mut conn)
        .is_ok();
    if !product_exists {
        return HttpResponse::NotFound().body("Product not found");
    }

    let new_subscription = NewSubscription {
        user_id,
        product_id: body.product_id,
        expires_at: body.expires_at,
        is_active: true,
    };

    match diesel::insert_into(subscriptions::table)
        .values(&new_subscription)
        .get_result::<Subscription>(&mut conn)
    {
        Ok(subscription) => HttpResponse::Created().json(subscription),
        Err(e) => {
            HttpResponse::InternalServerError().body(format!("Failed to create subscription: {}", e))
        }
    }
}

/// Cancel a subscription: the owner or the admin tier
#[post("/{subscription_id}/cancel")]
pub async fn cancel_subscription(
    pool: web::Data<DbPool>,
    policy: web::Data<AccessPolicy>,
    claims: Claims,
    path: web::Path<i32>,
) -> impl Responder {
    let subscription_id = path.into_inner();
    let mut conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().body("Database connection error"),
    };

    let subscription: Subscription =
        match subscriptions::table.find(subscription_id).first(&mut conn) {
            Ok(s) => s,
            Err(_) => return HttpResponse::NotFound().body("Subscription not found"),
        };

    let user_id: i32 = claims.sub.parse().unwrap_or(-1);
    let is_owner = subscription.user_id == user_id;
    if !is_owner && !policy.is_admin(ResourceKind::Subscription, &claims.roles) {
        return HttpResponse::Forbidden().body("Access denied");
    }

    match diesel::update(subscriptions::table.find(subscription_id))
        .set(subscriptions::is_active.eq(false))
        .get_result::<Subscription>(&mut conn)
    {
        Ok(updated) => HttpResponse::Ok().json(updated),
        Err(_) => HttpResponse::InternalServerError().body("Failed to cancel subscription"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_product_request_defaults_description() {
        let json = r#"{"name": "Premium", "price_cents": 499}"#;
        let request: CreateProductRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.name, "Premium");
        assert_eq!(request.description, "");
        assert_eq!(request.price_cents, 499);
    }

    #[test]
    fn test_create_subscription_request_deserialization() {
        let json = r#"{"product_id": 3}"#;
        let request: CreateSubscriptionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.product_id, 3);
        assert!(request.expires_at.is_none());
    }
}
