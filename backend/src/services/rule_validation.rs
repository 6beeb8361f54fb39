use crate::services::access::DeviceDirectory;
use serde::{Deserialize, Serialize};

/// Operators accepted in rule conditions.
pub const ALLOWED_OPERATORS: [&str; 8] = ["==", "=", ">", "<", ">=", "<=", "!=", "<>"];

/// Incoming rule payload, shared by create and update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSubmission {
    pub target_type: String,
    pub target_id: i32,
    pub action: String,
    #[serde(default)]
    pub logical_operator: Option<String>,
    #[serde(default)]
    pub conditions: Vec<ConditionSubmission>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionSubmission {
    pub sensor_type: String,
    pub sensor_id: i32,
    pub condition: String,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

pub fn validate_create(dto: &RuleSubmission, dir: &dyn DeviceDirectory) -> ValidationResult {
    validate(dto, dir)
}

pub fn validate_update(dto: &RuleSubmission, dir: &dyn DeviceDirectory) -> ValidationResult {
    validate(dto, dir)
}

/// The uppercase form of the submitted logical operator, for persistence.
/// Validation has already established it is "AND"/"OR" when required.
pub fn normalized_logical_operator(dto: &RuleSubmission) -> Option<String> {
    dto.logical_operator
        .as_ref()
        .map(|op| op.trim().to_uppercase())
        .filter(|op| !op.is_empty())
}

/// Checks a rule submission against the structural rules and, when the
/// target fields are well-formed, against target existence. Every
/// applicable violation is collected; nothing short-circuits.
fn validate(dto: &RuleSubmission, dir: &dyn DeviceDirectory) -> ValidationResult {
    let mut errors = Vec::new();

    let target_type = dto.target_type.trim();
    if target_type.is_empty() {
        errors.push("Target type is required.".to_string());
    }
    if dto.target_id <= 0 {
        errors.push("Target ID must be a positive integer.".to_string());
    }

    let action = dto.action.trim();
    if action.is_empty() {
        errors.push("Action is required.".to_string());
    } else if !action.eq_ignore_ascii_case("on") && !action.eq_ignore_ascii_case("off") {
        errors.push("Action must be either 'on' or 'off'.".to_string());
    }

    if dto.conditions.is_empty() {
        errors.push("At least one condition is required.".to_string());
    } else {
        if dto.conditions.len() > 1 {
            let operator_ok = dto
                .logical_operator
                .as_deref()
                .map(str::trim)
                .is_some_and(|op| {
                    op.eq_ignore_ascii_case("AND") || op.eq_ignore_ascii_case("OR")
                });
            if !operator_ok {
                errors.push(
                    "Logical operator must be 'AND' or 'OR' when more than one condition is present."
                        .to_string(),
                );
            }
        }

        for (idx, condition) in dto.conditions.iter().enumerate() {
            let n = idx + 1;

            if condition.sensor_type.trim().is_empty() {
                errors.push(format!("Condition {}: sensor type is required.", n));
            }

            // -1 is the electricity-price sentinel; 0 and anything below
            // -1 reference nothing.
            if condition.sensor_id == 0 || condition.sensor_id < -1 {
                errors.push(format!(
                    "Condition {}: sensor ID must be a positive integer, or -1 for the electricity price feed.",
                    n
                ));
            }

            let operator = condition.condition.trim();
            if operator.is_empty() {
                errors.push(format!("Condition {}: operator is required.", n));
            } else if !ALLOWED_OPERATORS.contains(&operator) {
                errors.push(format!(
                    "Condition {}: operator '{}' is not supported.",
                    n, operator
                ));
            }
        }
    }

    // Data-dependent check, only when the target fields are well-formed.
    // Switch is the only supported target type; anything else cannot
    // resolve to a row.
    if !target_type.is_empty() && dto.target_id > 0 {
        if target_type == "Switch" {
            match dir.find_switch(dto.target_id) {
                Ok(Some(_)) => {}
                Ok(None) => errors.push(format!(
                    "Target {} with ID {} does not exist.",
                    target_type, dto.target_id
                )),
                Err(_) => errors.push(format!(
                    "Target {} with ID {} could not be verified.",
                    target_type, dto.target_id
                )),
            }
        } else {
            errors.push(format!(
                "Target {} with ID {} does not exist.",
                target_type, dto.target_id
            ));
        }
    }

    ValidationResult::from_errors(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Switch;
    use chrono::NaiveDate;
    use std::collections::HashSet;

    struct StubDirectory {
        existing_switch_ids: Vec<i32>,
        fail_lookups: bool,
    }

    impl StubDirectory {
        fn with_switches(ids: &[i32]) -> Self {
            Self {
                existing_switch_ids: ids.to_vec(),
                fail_lookups: false,
            }
        }

        fn failing() -> Self {
            Self {
                existing_switch_ids: Vec::new(),
                fail_lookups: true,
            }
        }
    }

    impl DeviceDirectory for StubDirectory {
        fn find_switch(&self, id: i32) -> Result<Option<Switch>, String> {
            if self.fail_lookups {
                return Err("store unavailable".to_string());
            }
            if !self.existing_switch_ids.contains(&id) {
                return Ok(None);
            }
            Ok(Some(Switch {
                id,
                name: format!("switch{}", id),
                role: format!("switch{}", id),
                state: "OFF".to_string(),
                created_at: NaiveDate::from_ymd_opt(2026, 1, 15)
                    .unwrap()
                    .and_hms_opt(12, 0, 0)
                    .unwrap(),
            }))
        }

        fn sensor_parents_for_roles(&self, _roles: &[String]) -> Result<Vec<String>, String> {
            Ok(Vec::new())
        }

        fn any_discovered(&self, _by: &[String], _target: &str) -> Result<bool, String> {
            Ok(false)
        }

        fn discovered_targets(&self, _by: &[String]) -> Result<HashSet<String>, String> {
            Ok(HashSet::new())
        }
    }

    fn condition(sensor_id: i32, operator: &str) -> ConditionSubmission {
        ConditionSubmission {
            sensor_type: "temperature".to_string(),
            sensor_id,
            condition: operator.to_string(),
            threshold: 25.0,
        }
    }

    fn submission(conditions: Vec<ConditionSubmission>) -> RuleSubmission {
        RuleSubmission {
            target_type: "Switch".to_string(),
            target_id: 7,
            action: "on".to_string(),
            logical_operator: None,
            conditions,
        }
    }

    #[test]
    fn test_single_condition_rule_needs_no_logical_operator() {
        let dir = StubDirectory::with_switches(&[7]);
        let dto = submission(vec![condition(3, ">")]);

        let result = validate_create(&dto, &dir);
        assert!(result.is_valid, "errors: {:?}", result.errors);
    }

    #[test]
    fn test_multiple_conditions_require_logical_operator() {
        let dir = StubDirectory::with_switches(&[7]);
        let dto = submission(vec![condition(3, ">"), condition(4, "<")]);

        let result = validate_create(&dto, &dir);
        assert!(!result.is_valid);
        assert!(result.errors.contains(
            &"Logical operator must be 'AND' or 'OR' when more than one condition is present."
                .to_string()
        ));
    }

    #[test]
    fn test_logical_operator_is_case_insensitive() {
        let dir = StubDirectory::with_switches(&[7]);
        let mut dto = submission(vec![condition(3, ">"), condition(4, "<")]);
        dto.logical_operator = Some("or".to_string());

        let result = validate_create(&dto, &dir);
        assert!(result.is_valid, "errors: {:?}", result.errors);
        assert_eq!(normalized_logical_operator(&dto), Some("OR".to_string()));
    }

    #[test]
    fn test_sensor_id_zone() {
        let dir = StubDirectory::with_switches(&[7]);

        for (sensor_id, expect_valid) in [(-2, false), (-1, true), (0, false), (1, true)] {
            let dto = submission(vec![condition(sensor_id, ">")]);
            let result = validate_create(&dto, &dir);
            assert_eq!(
                result.is_valid, expect_valid,
                "sensor_id {} => {:?}",
                sensor_id, result.errors
            );
        }
    }

    #[test]
    fn test_empty_conditions_rejected_and_condition_checks_skipped() {
        let dir = StubDirectory::with_switches(&[7]);
        let dto = submission(Vec::new());

        let result = validate_create(&dto, &dir);
        assert!(!result.is_valid);
        assert_eq!(
            result.errors,
            vec!["At least one condition is required.".to_string()]
        );
    }

    #[test]
    fn test_all_allowed_operators_accepted() {
        let dir = StubDirectory::with_switches(&[7]);

        for op in ALLOWED_OPERATORS {
            let dto = submission(vec![condition(3, op)]);
            let result = validate_create(&dto, &dir);
            assert!(result.is_valid, "operator {} => {:?}", op, result.errors);
        }
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let dir = StubDirectory::with_switches(&[7]);
        let dto = submission(vec![condition(3, "~=")]);

        let result = validate_create(&dto, &dir);
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("operator '~=' is not supported"));
    }

    #[test]
    fn test_missing_target_produces_exact_error() {
        let dir = StubDirectory::with_switches(&[]);
        let dto = submission(vec![condition(3, ">")]);

        let result = validate_create(&dto, &dir);
        assert!(!result.is_valid);
        assert!(result
            .errors
            .contains(&"Target Switch with ID 7 does not exist.".to_string()));
    }

    #[test]
    fn test_unsupported_target_type_treated_as_nonexistent() {
        let dir = StubDirectory::with_switches(&[7]);
        let mut dto = submission(vec![condition(3, ">")]);
        dto.target_type = "Light".to_string();

        let result = validate_create(&dto, &dir);
        assert!(!result.is_valid);
        assert!(result
            .errors
            .contains(&"Target Light with ID 7 does not exist.".to_string()));
    }

    #[test]
    fn test_action_case_insensitive_and_invalid_rejected() {
        let dir = StubDirectory::with_switches(&[7]);

        for action in ["ON", "Off", "on", "OFF"] {
            let mut dto = submission(vec![condition(3, ">")]);
            dto.action = action.to_string();
            assert!(validate_create(&dto, &dir).is_valid, "action {}", action);
        }

        let mut dto = submission(vec![condition(3, ">")]);
        dto.action = "toggle".to_string();
        let result = validate_create(&dto, &dir);
        assert!(!result.is_valid);
        assert!(result
            .errors
            .contains(&"Action must be either 'on' or 'off'.".to_string()));
    }

    #[test]
    fn test_errors_accumulate_without_short_circuit() {
        let dir = StubDirectory::with_switches(&[]);
        let dto = RuleSubmission {
            target_type: "Switch".to_string(),
            target_id: 7,
            action: "toggle".to_string(),
            logical_operator: None,
            conditions: vec![condition(0, "~=")],
        };

        let result = validate_create(&dto, &dir);
        assert!(!result.is_valid);
        // Action, sensor id, operator and target existence all reported together
        assert_eq!(result.errors.len(), 4, "errors: {:?}", result.errors);
    }

    #[test]
    fn test_existence_check_skipped_for_malformed_target() {
        // A failing store would surface as "could not be verified"; with a
        // non-positive target id the lookup must never run.
        let dir = StubDirectory::failing();
        let mut dto = submission(vec![condition(3, ">")]);
        dto.target_id = -5;

        let result = validate_create(&dto, &dir);
        assert!(!result.is_valid);
        assert!(result
            .errors
            .iter()
            .all(|e| !e.contains("could not be verified")));
    }

    #[test]
    fn test_store_failure_reported_distinctly() {
        let dir = StubDirectory::failing();
        let dto = submission(vec![condition(3, ">")]);

        let result = validate_create(&dto, &dir);
        assert!(!result.is_valid);
        assert!(result
            .errors
            .contains(&"Target Switch with ID 7 could not be verified.".to_string()));
    }

    #[test]
    fn test_update_applies_same_rules() {
        let dir = StubDirectory::with_switches(&[7]);
        let dto = submission(vec![condition(3, ">"), condition(-1, "<=")]);

        let result = validate_update(&dto, &dir);
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("Logical operator"));
    }
}
