//! Declarative parameter rules evaluated before a tool call leaves the process.
//!
//! Rules are pure data keyed by tool name. [`evaluate`] never mutates arguments and
//! never performs I/O, so the whole table can be exercised with plain fixtures.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

pub type Arguments = Map<String, Value>;

const REJECTION_PREFIX: &str = "I need some additional information before I can proceed.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleKind {
    /// Every listed parameter must be present.
    Required(Vec<String>),
    /// At least one of the listed parameters must be present.
    OneOf(Vec<String>),
    /// When `trigger` holds one of the case values, that case's parameters are required.
    Conditional { trigger: String, cases: Vec<(String, Vec<String>)> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationRule {
    pub kinds: Vec<RuleKind>,
    pub confirmation_message: String,
}

impl ValidationRule {
    pub fn new(confirmation_message: impl Into<String>) -> Self {
        Self { kinds: Vec::new(), confirmation_message: confirmation_message.into() }
    }

    pub fn required<const N: usize>(mut self, params: [&str; N]) -> Self {
        self.kinds.push(RuleKind::Required(owned(&params)));
        self
    }

    pub fn one_of<const N: usize>(mut self, params: [&str; N]) -> Self {
        self.kinds.push(RuleKind::OneOf(owned(&params)));
        self
    }

    pub fn conditional(mut self, trigger: &str, cases: &[(&str, &[&str])]) -> Self {
        let cases = cases.iter().map(|(value, params)| ((*value).to_string(), owned(params))).collect();
        self.kinds.push(RuleKind::Conditional { trigger: trigger.to_string(), cases });
        self
    }
}

fn owned(params: &[&str]) -> Vec<String> {
    params.iter().map(|param| (*param).to_string()).collect()
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub missing: Vec<String>,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_message: Option<String>,
}

impl ValidationReport {
    fn passed(confirmation_message: Option<String>) -> Self {
        Self { valid: true, missing: Vec::new(), errors: Vec::new(), confirmation_message }
    }

    /// Message shown to the model when the call is rejected.
    pub fn rejection_message(&self) -> String {
        let mut parts = vec![REJECTION_PREFIX.to_string()];
        if !self.missing.is_empty() {
            parts.push(format!("Missing required information: {}", self.missing.join(", ")));
        }
        if !self.errors.is_empty() {
            parts.push(self.errors.join("; "));
        }
        parts.join(" ")
    }
}

/// Presence check shared by every rule kind: null, blank strings and empty arrays are absent.
/// Numbers and booleans always count as supplied, including `0` and `false`.
pub fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(text)) => !text.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

pub fn evaluate(rule: Option<&ValidationRule>, args: &Arguments) -> ValidationReport {
    let Some(rule) = rule else {
        return ValidationReport::passed(None);
    };

    let mut missing = Vec::new();
    let mut errors = Vec::new();

    for kind in &rule.kinds {
        match kind {
            RuleKind::Required(params) => {
                missing.extend(
                    params.iter().filter(|param| !is_present(args.get(param.as_str()))).cloned(),
                );
            }
            RuleKind::OneOf(params) => {
                if !params.iter().any(|param| is_present(args.get(param.as_str()))) {
                    errors.push(format!(
                        "At least one of these is required: {}",
                        params.join(", ")
                    ));
                }
            }
            RuleKind::Conditional { trigger, cases } => {
                let Some(trigger_value) = args.get(trigger.as_str()).and_then(Value::as_str)
                else {
                    continue;
                };
                let Some((_, params)) = cases.iter().find(|(value, _)| value == trigger_value)
                else {
                    continue;
                };
                for param in params {
                    if !is_present(args.get(param.as_str())) {
                        missing.push(format!(
                            "{param} (required for {trigger}={trigger_value})"
                        ));
                    }
                }
            }
        }
    }

    ValidationReport {
        valid: missing.is_empty() && errors.is_empty(),
        missing,
        errors,
        confirmation_message: Some(rule.confirmation_message.clone()),
    }
}

#[derive(Clone, Debug, Default)]
pub struct RuleRegistry {
    rules: HashMap<String, ValidationRule>,
}

impl RuleRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        Self::empty()
            .with_rule(
                "contacts_create-contact",
                ValidationRule::new("I'll create a new contact with the provided information.")
                    .required(["body_firstName", "body_lastName"])
                    .one_of(["body_email", "body_phone"]),
            )
            .with_rule(
                "contacts_add-tags",
                ValidationRule::new("I'll add the specified tags to this contact.")
                    .required(["path_contactId", "body_tags"]),
            )
            .with_rule(
                "contacts_remove-tags",
                ValidationRule::new("I'll remove the specified tags from this contact.")
                    .required(["path_contactId", "body_tags"]),
            )
            .with_rule(
                "contacts_get-all-tasks",
                ValidationRule::new("I'll get all tasks for this contact.")
                    .required(["path_contactId"]),
            )
            .with_rule(
                "conversations_send-a-new-message",
                ValidationRule::new("I'll send the message to this contact.")
                    .required(["body_contactId", "body_type"])
                    .conditional(
                        "body_type",
                        &[
                            ("Email", &["body_subject", "body_message", "body_emailFrom"]),
                            ("SMS", &["body_message"]),
                            ("WhatsApp", &["body_message"]),
                        ],
                    ),
            )
            .with_rule(
                "opportunities_update-opportunity",
                ValidationRule::new("I'll update this opportunity with the new information.")
                    .required(["path_id"]),
            )
            .with_rule(
                "calendars_get-calendars",
                ValidationRule::new("I'll get all available calendars for your location."),
            )
            .with_rule(
                "calendars_get-calendar-details",
                ValidationRule::new("I'll get the details for this calendar.")
                    .required(["path_calendarId"]),
            )
            .with_rule(
                "calendars_get-available-slots",
                ValidationRule::new("I'll check available time slots for this calendar.")
                    .required(["query_calendarId", "query_startDate", "query_endDate"]),
            )
            .with_rule(
                "calendars_create-appointment",
                ValidationRule::new("I'll create a new appointment with the provided details.")
                    .required(["body_calendarId", "body_contactId", "body_startTime"]),
            )
            .with_rule(
                "locations_get-custom-fields",
                ValidationRule::new("I'll retrieve the custom field definitions."),
            )
            .with_rule(
                "payments_get-order-by-id",
                ValidationRule::new("I'll retrieve the order details.")
                    .required(["path_orderId", "query_altId", "query_altType"]),
            )
            .with_rule(
                "payments_list-transactions",
                ValidationRule::new("I'll list transactions based on your criteria.")
                    .required(["query_altId", "query_altType"]),
            )
    }

    pub fn with_rule(mut self, tool_name: impl Into<String>, rule: ValidationRule) -> Self {
        self.rules.insert(tool_name.into(), rule);
        self
    }

    pub fn get(&self, tool_name: &str) -> Option<&ValidationRule> {
        self.rules.get(tool_name)
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn validate(&self, tool_name: &str, args: &Arguments) -> ValidationReport {
        evaluate(self.get(tool_name), args)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{evaluate, is_present, Arguments, RuleRegistry, ValidationRule};

    fn args(value: Value) -> Arguments {
        match value {
            Value::Object(map) => map,
            other => panic!("fixture must be an object, got {other}"),
        }
    }

    #[test]
    fn tools_without_rules_are_always_valid() {
        let registry = RuleRegistry::builtin();
        let report = registry.validate("contacts_get-contacts", &args(json!({})));

        assert!(report.valid);
        assert!(report.missing.is_empty());
        assert_eq!(report.confirmation_message, None);
    }

    #[test]
    fn required_rule_reports_missing_parameters() {
        let rule = ValidationRule::new("ok").required(["a", "b"]);
        let cases = [
            (json!({"a": 1}), false, vec!["b"]),
            (json!({"a": 1, "b": 2}), true, vec![]),
            (json!({"a": 1, "b": []}), false, vec!["b"]),
            (json!({"a": "  ", "b": 0}), false, vec!["a"]),
            (json!({"a": false, "b": null}), false, vec!["b"]),
        ];

        for (input, valid, missing) in cases {
            let report = evaluate(Some(&rule), &args(input.clone()));
            assert_eq!(report.valid, valid, "input {input}");
            assert_eq!(report.missing, missing, "input {input}");
        }
    }

    #[test]
    fn one_of_rule_names_every_alternative() {
        let rule = ValidationRule::new("ok").one_of(["email", "phone"]);

        let report = evaluate(Some(&rule), &args(json!({})));
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["At least one of these is required: email, phone"]);

        assert!(evaluate(Some(&rule), &args(json!({"email": "x"}))).valid);
        assert!(!evaluate(Some(&rule), &args(json!({"email": ""}))).valid);
    }

    #[test]
    fn conditional_rule_applies_only_for_matching_trigger() {
        let rule = ValidationRule::new("ok").conditional("type", &[("Email", &["subject"])]);

        let email = evaluate(Some(&rule), &args(json!({"type": "Email"})));
        assert!(!email.valid);
        assert_eq!(email.missing, vec!["subject (required for type=Email)"]);

        let sms = evaluate(Some(&rule), &args(json!({"type": "SMS"})));
        assert!(sms.valid);
        assert!(sms.missing.is_empty());

        let absent = evaluate(Some(&rule), &args(json!({})));
        assert!(absent.valid);
    }

    #[test]
    fn create_contact_without_email_or_phone_is_rejected() {
        let registry = RuleRegistry::builtin();
        let report = registry.validate(
            "contacts_create-contact",
            &args(json!({"body_firstName": "Jo", "body_lastName": "Park"})),
        );

        assert!(!report.valid);
        assert!(report.missing.is_empty());
        assert_eq!(
            report.rejection_message(),
            "I need some additional information before I can proceed. \
             At least one of these is required: body_email, body_phone"
        );
    }

    #[test]
    fn email_message_requires_subject_body_and_sender() {
        let registry = RuleRegistry::builtin();
        let report = registry.validate(
            "conversations_send-a-new-message",
            &args(json!({"body_contactId": "c1", "body_type": "Email", "body_message": "hi"})),
        );

        assert_eq!(
            report.missing,
            vec![
                "body_subject (required for body_type=Email)",
                "body_emailFrom (required for body_type=Email)",
            ]
        );
        assert_eq!(
            report.rejection_message(),
            "I need some additional information before I can proceed. Missing required \
             information: body_subject (required for body_type=Email), body_emailFrom \
             (required for body_type=Email)"
        );
    }

    #[test]
    fn add_tags_passes_with_contact_and_tags() {
        let registry = RuleRegistry::builtin();
        let report = registry.validate(
            "contacts_add-tags",
            &args(json!({"path_contactId": "123", "body_tags": ["vip"]})),
        );

        assert!(report.valid);
        assert_eq!(
            report.confirmation_message.as_deref(),
            Some("I'll add the specified tags to this contact.")
        );
    }

    #[test]
    fn presence_treats_scalars_as_supplied() {
        assert!(is_present(Some(&json!(0))));
        assert!(is_present(Some(&json!(false))));
        assert!(is_present(Some(&json!({}))));
        assert!(!is_present(Some(&json!(null))));
        assert!(!is_present(Some(&json!(""))));
        assert!(!is_present(None));
    }
}
