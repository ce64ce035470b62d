//! Environment-scoped defaults filled into proposed arguments before validation.

use serde_json::{json, Value};

use crate::validation::{is_present, Arguments};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DefaultContext {
    pub location_id: String,
    pub default_email_from: String,
}

#[derive(Clone, Debug, PartialEq)]
enum DefaultSource {
    HomeLocation,
    EmailSender,
    Literal(Value),
}

#[derive(Clone, Debug, PartialEq)]
struct DefaultEntry {
    tool: &'static str,
    param: &'static str,
    /// Only applies when the named argument holds this string value.
    when: Option<(&'static str, &'static str)>,
    source: DefaultSource,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DefaultPolicy {
    entries: Vec<DefaultEntry>,
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        Self::builtin()
    }
}

fn entry(tool: &'static str, param: &'static str, source: DefaultSource) -> DefaultEntry {
    DefaultEntry { tool, param, when: None, source }
}

impl DefaultPolicy {
    pub fn builtin() -> Self {
        let entries = vec![
            DefaultEntry {
                tool: "conversations_send-a-new-message",
                param: "body_emailFrom",
                when: Some(("body_type", "Email")),
                source: DefaultSource::EmailSender,
            },
            entry("contacts_create-contact", "body_locationId", DefaultSource::HomeLocation),
            entry("calendars_get-calendars", "query_locationId", DefaultSource::HomeLocation),
            entry("locations_get-custom-fields", "path_locationId", DefaultSource::HomeLocation),
            entry("payments_list-transactions", "query_limit", DefaultSource::Literal(json!(10))),
            entry("payments_list-transactions", "query_offset", DefaultSource::Literal(json!(0))),
            entry("payments_list-transactions", "query_altId", DefaultSource::HomeLocation),
            entry(
                "payments_list-transactions",
                "query_altType",
                DefaultSource::Literal(json!("location")),
            ),
        ];
        Self { entries }
    }

    pub fn none() -> Self {
        Self { entries: Vec::new() }
    }

    /// Returns a copy of `args` with absent defaults filled. Supplied values always win.
    pub fn apply(&self, tool_name: &str, args: &Arguments, context: &DefaultContext) -> Arguments {
        let mut resolved = args.clone();

        for entry in self.entries.iter().filter(|entry| entry.tool == tool_name) {
            if let Some((key, expected)) = entry.when {
                if args.get(key).and_then(Value::as_str) != Some(expected) {
                    continue;
                }
            }
            if is_present(resolved.get(entry.param)) {
                continue;
            }

            let value = match &entry.source {
                DefaultSource::HomeLocation => Value::String(context.location_id.clone()),
                DefaultSource::EmailSender => Value::String(context.default_email_from.clone()),
                DefaultSource::Literal(value) => value.clone(),
            };
            resolved.insert(entry.param.to_string(), value);
        }

        resolved
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{DefaultContext, DefaultPolicy};
    use crate::validation::Arguments;

    fn context() -> DefaultContext {
        DefaultContext {
            location_id: "loc-1".to_string(),
            default_email_from: "desk@example.com".to_string(),
        }
    }

    fn args(value: Value) -> Arguments {
        match value {
            Value::Object(map) => map,
            other => panic!("fixture must be an object, got {other}"),
        }
    }

    #[test]
    fn email_sends_receive_configured_sender() {
        let policy = DefaultPolicy::builtin();
        let resolved = policy.apply(
            "conversations_send-a-new-message",
            &args(json!({"body_type": "Email", "body_contactId": "c1"})),
            &context(),
        );

        assert_eq!(resolved["body_emailFrom"], "desk@example.com");
    }

    #[test]
    fn sms_sends_are_left_untouched() {
        let policy = DefaultPolicy::builtin();
        let input = args(json!({"body_type": "SMS", "body_contactId": "c1"}));
        let resolved = policy.apply("conversations_send-a-new-message", &input, &context());

        assert_eq!(resolved, input);
    }

    #[test]
    fn supplied_values_are_never_overridden() {
        let policy = DefaultPolicy::builtin();
        let resolved = policy.apply(
            "payments_list-transactions",
            &args(json!({"query_limit": 50, "query_offset": 0, "query_altId": "loc-9"})),
            &context(),
        );

        assert_eq!(resolved["query_limit"], 50);
        assert_eq!(resolved["query_offset"], 0);
        assert_eq!(resolved["query_altId"], "loc-9");
        assert_eq!(resolved["query_altType"], "location");
    }

    #[test]
    fn list_transactions_gets_full_pagination_window() {
        let policy = DefaultPolicy::builtin();
        let resolved = policy.apply("payments_list-transactions", &Arguments::new(), &context());

        assert_eq!(
            Value::Object(resolved),
            json!({
                "query_limit": 10,
                "query_offset": 0,
                "query_altId": "loc-1",
                "query_altType": "location",
            })
        );
    }

    #[test]
    fn location_scoped_tools_receive_home_location() {
        let policy = DefaultPolicy::builtin();
        for (tool, param) in [
            ("contacts_create-contact", "body_locationId"),
            ("calendars_get-calendars", "query_locationId"),
            ("locations_get-custom-fields", "path_locationId"),
        ] {
            let resolved = policy.apply(tool, &Arguments::new(), &context());
            assert_eq!(resolved[param], "loc-1", "{tool}");
        }
    }

    #[test]
    fn blank_strings_count_as_absent() {
        let policy = DefaultPolicy::builtin();
        let resolved = policy.apply(
            "contacts_create-contact",
            &args(json!({"body_locationId": "  "})),
            &context(),
        );

        assert_eq!(resolved["body_locationId"], "loc-1");
    }

    #[test]
    fn empty_policy_is_identity() {
        let input = args(json!({"body_type": "Email"}));
        let resolved =
            DefaultPolicy::none().apply("conversations_send-a-new-message", &input, &context());

        assert_eq!(resolved, input);
    }
}
