use crate::{
    db::DbPool,
    models::{AutomationRule, Sensor, Switch},
    schema::{discovered_devices, sensors, switches},
};
use diesel::prelude::*;
use log::warn;
use std::collections::{HashMap, HashSet};

/// Resource kinds that carry their own admin tier in addition to the
/// global "admin" role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Switch,
    Sensor,
    Automation,
    Mqtt,
    Product,
    Subscription,
}

/// Capability table mapping each resource kind to the role names that
/// grant unconditional access to it. Built once at startup and shared as
/// application data.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    admin_roles: HashMap<ResourceKind, Vec<String>>,
}

impl AccessPolicy {
    pub fn defaults() -> Self {
        let entries = [
            (ResourceKind::Switch, "switch_admin"),
            (ResourceKind::Sensor, "sensor_admin"),
            (ResourceKind::Automation, "automation_admin"),
            (ResourceKind::Mqtt, "mqtt_admin"),
            (ResourceKind::Product, "product_admin"),
            (ResourceKind::Subscription, "subscription_admin"),
        ];

        let mut admin_roles = HashMap::new();
        for (kind, role) in entries {
            admin_roles.insert(kind, vec!["admin".to_string(), role.to_string()]);
        }

        Self { admin_roles }
    }

    /// Replace the admin roles for one resource kind.
    pub fn set_admin_roles(&mut self, kind: ResourceKind, roles: Vec<String>) {
        self.admin_roles.insert(kind, roles);
    }

    /// True when any of the principal's roles is an admin-tier role for
    /// the given resource kind.
    pub fn is_admin(&self, kind: ResourceKind, principal_roles: &[String]) -> bool {
        let Some(admins) = self.admin_roles.get(&kind) else {
            return false;
        };
        principal_roles
            .iter()
            .any(|r| admins.iter().any(|a| a.eq_ignore_ascii_case(r)))
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Lookup seam the access algorithm (and the rule validator) runs
/// against. The production implementation is diesel-backed; tests use
/// in-memory stubs.
pub trait DeviceDirectory {
    fn find_switch(&self, id: i32) -> Result<Option<Switch>, String>;

    /// Distinct `parent_name` values of every sensor whose role is in the
    /// given set.
    fn sensor_parents_for_roles(&self, roles: &[String]) -> Result<Vec<String>, String>;

    /// Whether any discovery edge points from one of the given parents to
    /// the target device name.
    fn any_discovered(&self, discovered_by: &[String], target: &str) -> Result<bool, String>;

    /// All device names reachable through discovery edges from the given
    /// parents. Used by the batched list filters.
    fn discovered_targets(&self, discovered_by: &[String]) -> Result<HashSet<String>, String>;
}

pub struct DieselDirectory {
    pool: DbPool,
}

impl DieselDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl DeviceDirectory for DieselDirectory {
    fn find_switch(&self, id: i32) -> Result<Option<Switch>, String> {
        let mut conn = self
            .pool
            .get()
            .map_err(|e| format!("Database connection error: {}", e))?;

        switches::table
            .find(id)
            .first::<Switch>(&mut conn)
            .optional()
            .map_err(|e| format!("Failed to look up switch {}: {}", id, e))
    }

    fn sensor_parents_for_roles(&self, roles: &[String]) -> Result<Vec<String>, String> {
        if roles.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self
            .pool
            .get()
            .map_err(|e| format!("Database connection error: {}", e))?;

        sensors::table
            .filter(sensors::role.eq_any(roles))
            .select(sensors::parent_name)
            .distinct()
            .load(&mut conn)
            .map_err(|e| format!("Failed to load sensor parents: {}", e))
    }

    fn any_discovered(&self, discovered_by: &[String], target: &str) -> Result<bool, String> {
        if discovered_by.is_empty() {
            return Ok(false);
        }

        let mut conn = self
            .pool
            .get()
            .map_err(|e| format!("Database connection error: {}", e))?;

        diesel::select(diesel::dsl::exists(
            discovered_devices::table
                .filter(discovered_devices::discovered_by.eq_any(discovered_by))
                .filter(discovered_devices::target.eq(target)),
        ))
        .get_result(&mut conn)
        .map_err(|e| format!("Failed to check discovery edges: {}", e))
    }

    fn discovered_targets(&self, discovered_by: &[String]) -> Result<HashSet<String>, String> {
        if discovered_by.is_empty() {
            return Ok(HashSet::new());
        }

        let mut conn = self
            .pool
            .get()
            .map_err(|e| format!("Database connection error: {}", e))?;

        let targets: Vec<String> = discovered_devices::table
            .filter(discovered_devices::discovered_by.eq_any(discovered_by))
            .select(discovered_devices::target)
            .distinct()
            .load(&mut conn)
            .map_err(|e| format!("Failed to load discovery targets: {}", e))?;

        Ok(targets.into_iter().collect())
    }
}

/// Core access decision for a device identified by its name and role.
///
/// Grants when the principal holds an admin-tier role for the resource
/// kind, holds the device's own role (case-insensitive), or controls a
/// sensor whose parent has a discovery edge to the device. Directory
/// failures deny.
pub fn has_device_access(
    policy: &AccessPolicy,
    kind: ResourceKind,
    principal_roles: &[String],
    device_name: &str,
    device_role: &str,
    dir: &dyn DeviceDirectory,
) -> bool {
    if policy.is_admin(kind, principal_roles) {
        return true;
    }

    if principal_roles
        .iter()
        .any(|r| r.eq_ignore_ascii_case(device_role))
    {
        return true;
    }

    let parents = match dir.sensor_parents_for_roles(principal_roles) {
        Ok(p) => p,
        Err(e) => {
            warn!("Access check failed loading sensor parents: {}", e);
            return false;
        }
    };

    if parents.is_empty() {
        return false;
    }

    match dir.any_discovered(&parents, device_name) {
        Ok(found) => found,
        Err(e) => {
            warn!("Access check failed querying discovery edges: {}", e);
            false
        }
    }
}

pub fn has_switch_access(
    policy: &AccessPolicy,
    principal_roles: &[String],
    switch: &Switch,
    dir: &dyn DeviceDirectory,
) -> bool {
    has_device_access(
        policy,
        ResourceKind::Switch,
        principal_roles,
        &switch.name,
        &switch.role,
        dir,
    )
}

pub fn has_sensor_access(
    policy: &AccessPolicy,
    principal_roles: &[String],
    sensor: &Sensor,
    dir: &dyn DeviceDirectory,
) -> bool {
    has_device_access(
        policy,
        ResourceKind::Sensor,
        principal_roles,
        &sensor.name,
        &sensor.role,
        dir,
    )
}

/// Access to an automation rule is access to its resolved target. A rule
/// whose target cannot be resolved is denied, not an error; callers are
/// expected to have validated target existence at write time.
pub fn has_rule_access(
    policy: &AccessPolicy,
    principal_roles: &[String],
    rule: &AutomationRule,
    dir: &dyn DeviceDirectory,
) -> bool {
    if rule.target_type != "Switch" {
        return false;
    }

    match dir.find_switch(rule.target_id) {
        Ok(Some(target)) => has_device_access(
            policy,
            ResourceKind::Automation,
            principal_roles,
            &target.name,
            &target.role,
            dir,
        ),
        Ok(None) => false,
        Err(e) => {
            warn!(
                "Access check failed resolving rule {} target: {}",
                rule.id, e
            );
            false
        }
    }
}

/// Device names the principal can reach through discovery, computed once
/// for batched list filtering.
pub fn reachable_targets(principal_roles: &[String], dir: &dyn DeviceDirectory) -> HashSet<String> {
    let parents = match dir.sensor_parents_for_roles(principal_roles) {
        Ok(p) => p,
        Err(e) => {
            warn!("Failed to load sensor parents for list filter: {}", e);
            return HashSet::new();
        }
    };

    if parents.is_empty() {
        return HashSet::new();
    }

    match dir.discovered_targets(&parents) {
        Ok(t) => t,
        Err(e) => {
            warn!("Failed to load discovery targets for list filter: {}", e);
            HashSet::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    struct MemoryDirectory {
        switches: Vec<Switch>,
        // (role, parent_name) per sensor
        sensors: Vec<(String, String)>,
        // (discovered_by, target) per edge
        edges: Vec<(String, String)>,
    }

    impl MemoryDirectory {
        fn empty() -> Self {
            Self {
                switches: Vec::new(),
                sensors: Vec::new(),
                edges: Vec::new(),
            }
        }
    }

    impl DeviceDirectory for MemoryDirectory {
        fn find_switch(&self, id: i32) -> Result<Option<Switch>, String> {
            Ok(self.switches.iter().find(|s| s.id == id).cloned())
        }

        fn sensor_parents_for_roles(&self, roles: &[String]) -> Result<Vec<String>, String> {
            let mut parents: Vec<String> = self
                .sensors
                .iter()
                .filter(|(role, _)| roles.contains(role))
                .map(|(_, parent)| parent.clone())
                .collect();
            parents.dedup();
            Ok(parents)
        }

        fn any_discovered(&self, discovered_by: &[String], target: &str) -> Result<bool, String> {
            Ok(self
                .edges
                .iter()
                .any(|(by, t)| discovered_by.contains(by) && t == target))
        }

        fn discovered_targets(&self, discovered_by: &[String]) -> Result<HashSet<String>, String> {
            Ok(self
                .edges
                .iter()
                .filter(|(by, _)| discovered_by.contains(by))
                .map(|(_, t)| t.clone())
                .collect())
        }
    }

    fn ts() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn make_switch(id: i32, name: &str, role: &str) -> Switch {
        Switch {
            id,
            name: name.to_string(),
            role: role.to_string(),
            state: "OFF".to_string(),
            created_at: ts(),
        }
    }

    fn make_rule(target_type: &str, target_id: i32) -> AutomationRule {
        AutomationRule {
            id: 1,
            target_type: target_type.to_string(),
            target_id,
            action: "on".to_string(),
            logical_operator: None,
            created_at: ts(),
            updated_at: ts(),
        }
    }

    fn roles(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_global_admin_is_granted_unconditionally() {
        let policy = AccessPolicy::defaults();
        let dir = MemoryDirectory::empty();

        assert!(has_device_access(
            &policy,
            ResourceKind::Switch,
            &roles(&["admin"]),
            "lamp1",
            "lamp1",
            &dir,
        ));
    }

    #[test]
    fn test_resource_admin_is_granted_for_its_kind_only() {
        let policy = AccessPolicy::defaults();
        let dir = MemoryDirectory::empty();
        let principal = roles(&["switch_admin"]);

        assert!(has_device_access(
            &policy,
            ResourceKind::Switch,
            &principal,
            "lamp1",
            "lamp1",
            &dir,
        ));
        assert!(!has_device_access(
            &policy,
            ResourceKind::Sensor,
            &principal,
            "thermo1",
            "thermo1",
            &dir,
        ));
    }

    #[test]
    fn test_direct_role_match_is_case_insensitive() {
        let policy = AccessPolicy::defaults();
        let dir = MemoryDirectory::empty();

        assert!(has_device_access(
            &policy,
            ResourceKind::Switch,
            &roles(&["Lamp1"]),
            "lamp1",
            "lamp1",
            &dir,
        ));
    }

    #[test]
    fn test_discovery_grants_transitive_access() {
        let policy = AccessPolicy::defaults();
        let dir = MemoryDirectory {
            switches: vec![make_switch(1, "lamp1", "lamp1")],
            sensors: vec![("gateway1".to_string(), "hub-east".to_string())],
            edges: vec![("hub-east".to_string(), "lamp1".to_string())],
        };

        // gateway1 controls a sensor on hub-east, and hub-east discovered lamp1
        assert!(has_device_access(
            &policy,
            ResourceKind::Switch,
            &roles(&["gateway1"]),
            "lamp1",
            "lamp1",
            &dir,
        ));

        // gateway2 has no sensor, so no discovery path
        assert!(!has_device_access(
            &policy,
            ResourceKind::Switch,
            &roles(&["gateway2"]),
            "lamp1",
            "lamp1",
            &dir,
        ));
    }

    #[test]
    fn test_no_matching_condition_denies() {
        let policy = AccessPolicy::defaults();
        let dir = MemoryDirectory {
            switches: Vec::new(),
            sensors: vec![("gateway1".to_string(), "hub-east".to_string())],
            edges: vec![("hub-west".to_string(), "lamp1".to_string())],
        };

        // Principal's parent is hub-east, but only hub-west discovered lamp1
        assert!(!has_device_access(
            &policy,
            ResourceKind::Switch,
            &roles(&["gateway1"]),
            "lamp1",
            "lamp1",
            &dir,
        ));
    }

    #[test]
    fn test_rule_access_resolves_target_switch() {
        let policy = AccessPolicy::defaults();
        let dir = MemoryDirectory {
            switches: vec![make_switch(7, "lamp1", "lamp1")],
            sensors: Vec::new(),
            edges: Vec::new(),
        };
        let rule = make_rule("Switch", 7);

        assert!(has_rule_access(&policy, &roles(&["lamp1"]), &rule, &dir));
        assert!(!has_rule_access(&policy, &roles(&["other"]), &rule, &dir));
    }

    #[test]
    fn test_rule_access_denied_when_target_missing() {
        let policy = AccessPolicy::defaults();
        let dir = MemoryDirectory::empty();
        let rule = make_rule("Switch", 99);

        assert!(!has_rule_access(&policy, &roles(&["lamp1"]), &rule, &dir));
    }

    #[test]
    fn test_rule_access_denied_for_unsupported_target_type() {
        let policy = AccessPolicy::defaults();
        let dir = MemoryDirectory::empty();
        let rule = make_rule("Thermostat", 1);

        assert!(!has_rule_access(&policy, &roles(&["lamp1"]), &rule, &dir));
    }

    #[test]
    fn test_reachable_targets_collects_all_discovered_names() {
        let dir = MemoryDirectory {
            switches: Vec::new(),
            sensors: vec![
                ("gateway1".to_string(), "hub-east".to_string()),
                ("gateway1".to_string(), "hub-west".to_string()),
            ],
            edges: vec![
                ("hub-east".to_string(), "lamp1".to_string()),
                ("hub-west".to_string(), "lamp2".to_string()),
                ("hub-north".to_string(), "lamp3".to_string()),
            ],
        };

        let reachable = reachable_targets(&roles(&["gateway1"]), &dir);
        assert!(reachable.contains("lamp1"));
        assert!(reachable.contains("lamp2"));
        assert!(!reachable.contains("lamp3"));
    }

    #[test]
    fn test_reachable_targets_empty_without_sensors() {
        let dir = MemoryDirectory::empty();
        assert!(reachable_targets(&roles(&["gateway1"]), &dir).is_empty());
    }
}
