use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::users)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub password_hash: String,
    pub created_at: NaiveDateTime,
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::roles)]
pub struct Role {
    pub id: i32,
    pub name: String,
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::user_roles)]
pub struct UserRole {
    pub id: i32,
    pub user_id: i32,
    pub role_id: i32,
}

/// A controllable switch. `role` is the role name granting direct access,
/// defaulting to the switch's own name at creation. `state` is "ON"/"OFF".
#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::switches)]
pub struct Switch {
    pub id: i32,
    pub name: String,
    pub role: String,
    pub state: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::switches)]
pub struct NewSwitch {
    pub name: String,
    pub role: String,
    pub state: String,
}

/// Append-only state history for a switch, written by the dispatcher and
/// the state API.
#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::switch_states)]
pub struct SwitchStateRecord {
    pub id: i32,
    pub switch_id: i32,
    pub state: String,
    pub recorded_at: NaiveDateTime,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::switch_states)]
pub struct NewSwitchStateRecord {
    pub switch_id: i32,
    pub state: String,
}

/// A sensor hanging off the gateway/hub named by `parent_name`. The parent
/// name is what discovery edges point from.
#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::sensors)]
pub struct Sensor {
    pub id: i32,
    pub name: String,
    pub role: String,
    pub sensor_type: String,
    pub parent_name: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::sensors)]
pub struct NewSensor {
    pub name: String,
    pub role: String,
    pub sensor_type: String,
    pub parent_name: String,
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::sensor_readings)]
pub struct SensorReading {
    pub id: i32,
    pub sensor_id: i32,
    pub value: String,
    pub recorded_at: NaiveDateTime,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::sensor_readings)]
pub struct NewSensorReading {
    pub sensor_id: i32,
    pub value: String,
}

/// Directed discovery edge: the device named `discovered_by` has observed
/// a device named `target` of kind `device_type`. The triple is unique;
/// `discovered_at` preserves first-discovery provenance.
#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::discovered_devices)]
pub struct DiscoveredDevice {
    pub id: i32,
    pub discovered_by: String,
    pub target: String,
    pub device_type: String,
    pub discovered_at: NaiveDateTime,
}

#[derive(Insertable, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::discovered_devices)]
pub struct NewDiscoveredDevice {
    pub discovered_by: String,
    pub target: String,
    pub device_type: String,
}

/// An automation rule bound to a target device and an action. The
/// condition list lives in `automation_conditions` and is owned
/// exclusively by the rule. `logical_operator` is "AND"/"OR" and only
/// meaningful with more than one condition; absent means AND.
#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::automation_rules)]
pub struct AutomationRule {
    pub id: i32,
    pub target_type: String,
    pub target_id: i32,
    pub action: String,
    pub logical_operator: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::automation_rules)]
pub struct NewAutomationRule {
    pub target_type: String,
    pub target_id: i32,
    pub action: String,
    pub logical_operator: Option<String>,
}

/// One condition of a rule. `sensor_id` is a sensor row id, or -1 for the
/// external electricity-price feed (with `sensor_type` "electricity_price").
#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::automation_conditions)]
pub struct AutomationCondition {
    pub id: i32,
    pub rule_id: i32,
    pub sensor_type: String,
    pub sensor_id: i32,
    pub condition: String,
    pub threshold: f64,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::automation_conditions)]
pub struct NewAutomationCondition {
    pub rule_id: i32,
    pub sensor_type: String,
    pub sensor_id: i32,
    pub condition: String,
    pub threshold: f64,
}

#[derive(Queryable, Selectable, Insertable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::electricity_prices)]
pub struct ElectricityPrice {
    pub timestamp: NaiveDateTime,
    pub price: f64,
    pub source: String,
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::products)]
pub struct Product {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub price_cents: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::products)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub price_cents: i32,
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::subscriptions)]
pub struct Subscription {
    pub id: i32,
    pub user_id: i32,
    pub product_id: i32,
    pub started_at: NaiveDateTime,
    pub expires_at: Option<NaiveDateTime>,
    pub is_active: bool,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::subscriptions)]
pub struct NewSubscription {
    pub user_id: i32,
    pub product_id: i32,
    pub expires_at: Option<NaiveDateTime>,
    pub is_active: bool,
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::mqtt_users)]
pub struct MqttUser {
    pub id: i32,
    pub username: String,
    pub password_hash: String,
    pub is_superuser: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::mqtt_users)]
pub struct NewMqttUser {
    pub username: String,
    pub password_hash: String,
    pub is_superuser: bool,
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::mqtt_acls)]
pub struct MqttAcl {
    pub id: i32,
    pub mqtt_user_id: i32,
    pub topic: String,
    pub access: i32,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::mqtt_acls)]
pub struct NewMqttAcl {
    pub mqtt_user_id: i32,
    pub topic: String,
    pub access: i32,
}
