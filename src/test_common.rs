#![cfg(test)]

use maplit::hashmap;
use std::collections::HashMap;

use crate::eval::Evaluator;
use crate::lookup::{Clock, CountryLookup, ParsedUserAgent, UserAgentParser};
use crate::user::User;

pub fn basic_user(user_id: &str) -> User {
    User::with_id(user_id).build()
}

/// An evaluator preloaded with the canned snapshot below.
pub fn test_evaluator() -> Evaluator {
    evaluator_from_json(CANNED_GATES, CANNED_DYNAMIC_CONFIGS)
}

/// An evaluator holding the given gate and dynamic config lists, each a JSON array.
pub fn evaluator_from_json(gates_json: &str, dynamic_configs_json: &str) -> Evaluator {
    let evaluator = Evaluator::new();
    evaluator.install_snapshot(
        serde_json::from_str(gates_json).unwrap(),
        serde_json::from_str(dynamic_configs_json).unwrap(),
    );
    evaluator
}

const CANNED_GATES: &str = r#"[
    {
        "name": "publicGate",
        "enabled": true,
        "salt": "salt_public",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_everyone",
                "passPercentage": 100,
                "returnValue": true,
                "conditions": [{"type": "public"}]
            }
        ]
    },
    {
        "name": "countryGate",
        "enabled": true,
        "salt": "salt_country",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_beta_countries",
                "name": "beta countries",
                "passPercentage": 100,
                "returnValue": true,
                "conditions": [
                    {"type": "user_field", "field": "country", "operator": "any", "targetValue": ["US", "CA"]}
                ]
            }
        ]
    },
    {
        "name": "multiRuleGate",
        "enabled": true,
        "salt": "salt_multi",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_jp",
                "passPercentage": 100,
                "returnValue": true,
                "conditions": [
                    {"type": "user_field", "field": "country", "operator": "any", "targetValue": ["JP"]}
                ]
            },
            {
                "id": "rule_everyone_else",
                "passPercentage": 100,
                "returnValue": true,
                "conditions": [{"type": "public"}]
            }
        ]
    },
    {
        "name": "zeroRolloutGate",
        "enabled": true,
        "salt": "salt_zero",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_none",
                "passPercentage": 0,
                "returnValue": true,
                "conditions": [{"type": "public"}]
            }
        ]
    },
    {
        "name": "dependentGate",
        "enabled": true,
        "salt": "salt_dependent",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_dependent",
                "passPercentage": 100,
                "returnValue": true,
                "conditions": [{"type": "pass_gate", "targetValue": "publicGate"}]
            }
        ]
    },
    {
        "name": "invertedGate",
        "enabled": true,
        "salt": "salt_inverted",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_inverted",
                "passPercentage": 100,
                "returnValue": true,
                "conditions": [{"type": "fail_gate", "targetValue": "countryGate"}]
            }
        ]
    },
    {
        "name": "chainGate",
        "enabled": true,
        "salt": "salt_chain",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_chain",
                "passPercentage": 100,
                "returnValue": true,
                "conditions": [{"type": "pass_gate", "targetValue": "dependentGate"}]
            }
        ]
    },
    {
        "name": "partialRuleGate",
        "enabled": true,
        "salt": "salt_partial",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_partial",
                "passPercentage": 100,
                "returnValue": true,
                "conditions": [
                    {"type": "pass_gate", "targetValue": "publicGate"},
                    {"type": "user_field", "field": "country", "operator": "any", "targetValue": ["XX"]}
                ]
            }
        ]
    },
    {
        "name": "unknownKindGate",
        "enabled": true,
        "salt": "salt_unknown_kind",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_unknown_kind",
                "passPercentage": 100,
                "returnValue": true,
                "conditions": [{"type": "segment_list", "targetValue": "seg_1"}]
            }
        ]
    },
    {
        "name": "unknownOpGate",
        "enabled": true,
        "salt": "salt_unknown_op",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_unknown_op",
                "passPercentage": 100,
                "returnValue": true,
                "conditions": [
                    {"type": "user_field", "field": "country", "operator": "regex_v2", "targetValue": "US"}
                ]
            }
        ]
    },
    {
        "name": "timeGate",
        "enabled": true,
        "salt": "salt_time",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_after_launch",
                "passPercentage": 100,
                "returnValue": true,
                "conditions": [{"type": "current_time", "operator": "after", "targetValue": 1600000000000}]
            }
        ]
    },
    {
        "name": "everyBucketGate",
        "enabled": true,
        "salt": "salt_bucket",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_every_bucket",
                "passPercentage": 100,
                "returnValue": true,
                "conditions": [
                    {
                        "type": "user_bucket",
                        "operator": "lt",
                        "targetValue": 1000,
                        "additionalValues": {"salt": "bucket_salt"}
                    }
                ]
            }
        ]
    },
    {
        "name": "noBucketGate",
        "enabled": true,
        "salt": "salt_bucket",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_no_bucket",
                "passPercentage": 100,
                "returnValue": true,
                "conditions": [
                    {
                        "type": "user_bucket",
                        "operator": "gte",
                        "targetValue": 1000,
                        "additionalValues": {"salt": "bucket_salt"}
                    }
                ]
            }
        ]
    },
    {
        "name": "windowsGate",
        "enabled": true,
        "salt": "salt_windows",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_windows",
                "passPercentage": 100,
                "returnValue": true,
                "conditions": [
                    {"type": "ua_based", "field": "os_name", "operator": "any", "targetValue": ["Windows"]}
                ]
            }
        ]
    },
    {
        "name": "modernBrowserGate",
        "enabled": true,
        "salt": "salt_browser",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_modern_browser",
                "passPercentage": 100,
                "returnValue": true,
                "conditions": [
                    {"type": "ua_based", "field": "browser_version", "operator": "version_gte", "targetValue": "100"}
                ]
            }
        ]
    },
    {
        "name": "kiwiGate",
        "enabled": true,
        "salt": "salt_kiwi",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_kiwi",
                "passPercentage": 100,
                "returnValue": true,
                "conditions": [
                    {"type": "ip_based", "field": "country", "operator": "any", "targetValue": ["NZ"]}
                ]
            }
        ]
    },
    {
        "name": "productionGate",
        "enabled": true,
        "salt": "salt_production",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_production",
                "passPercentage": 100,
                "returnValue": true,
                "conditions": [
                    {"type": "environment_field", "field": "tier", "operator": "any", "targetValue": ["production"]}
                ]
            }
        ]
    },
    {
        "name": "versionGate",
        "enabled": true,
        "salt": "salt_version",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_min_version",
                "passPercentage": 100,
                "returnValue": true,
                "conditions": [
                    {"type": "user_field", "field": "appVersion", "operator": "version_gte", "targetValue": "2.0"}
                ]
            }
        ]
    },
    {
        "name": "optInGate",
        "enabled": true,
        "salt": "salt_opt_in",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_opt_in",
                "passPercentage": 100,
                "returnValue": true,
                "conditions": [
                    {"type": "user_field", "field": "beta_opt_in", "operator": null, "targetValue": null}
                ]
            }
        ]
    },
    {
        "name": "planNoneGate",
        "enabled": true,
        "salt": "salt_plan",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_paid_plans",
                "passPercentage": 100,
                "returnValue": true,
                "conditions": [
                    {"type": "user_field", "field": "plan", "operator": "none", "targetValue": ["free"]}
                ]
            }
        ]
    },
    {
        "name": "deviceGate",
        "enabled": true,
        "salt": "salt_device",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_device",
                "passPercentage": 100,
                "returnValue": true,
                "idType": "stableID",
                "conditions": [
                    {"type": "unit_id", "idType": "stableID", "operator": "any", "targetValue": ["device-17"]}
                ]
            }
        ]
    },
    {
        "name": "internalEmailGate",
        "enabled": true,
        "salt": "salt_email",
        "defaultValue": false,
        "rules": [
            {
                "id": "rule_internal_email",
                "passPercentage": 100,
                "returnValue": true,
                "conditions": [
                    {"type": "user_field", "field": "email", "operator": "str_ends_with_any", "targetValue": ["@example.com"]}
                ]
            }
        ]
    }
]"#;

const CANNED_DYNAMIC_CONFIGS: &str = r#"[
    {
        "name": "menuConfig",
        "enabled": true,
        "salt": "salt_menu",
        "defaultValue": {"items": 3, "theme": "classic"},
        "rules": [
            {
                "id": "rule_us_menu",
                "passPercentage": 100,
                "returnValue": {"items": 5, "theme": "compact"},
                "conditions": [
                    {"type": "user_field", "field": "country", "operator": "any", "targetValue": ["US", "CA"]}
                ]
            }
        ]
    },
    {
        "name": "disabledConfig",
        "enabled": false,
        "salt": "salt_disabled",
        "defaultValue": {"items": 1},
        "rules": [
            {
                "id": "rule_would_match",
                "passPercentage": 100,
                "returnValue": {"items": 9},
                "conditions": [{"type": "public"}]
            }
        ]
    }
]"#;

/// Canned stand-in for a real user agent parser.
#[derive(Default)]
pub struct TestUserAgentParser;

impl UserAgentParser for TestUserAgentParser {
    fn parse(&self, user_agent: &str) -> Option<ParsedUserAgent> {
        match user_agent {
            "test-agent-windows" => Some(ParsedUserAgent {
                platform: "win32".to_string(),
                platform_version: "10.0".to_string(),
                browser: "Chrome".to_string(),
                browser_major_version: "119".to_string(),
            }),
            "test-agent-mac" => Some(ParsedUserAgent {
                platform: "Mac OS X".to_string(),
                platform_version: "10.15.7".to_string(),
                browser: "Safari".to_string(),
                browser_major_version: "17".to_string(),
            }),
            _ => None,
        }
    }
}

/// Canned stand-in for a geo database.
pub struct TestCountryLookup {
    countries: HashMap<String, String>,
}

impl Default for TestCountryLookup {
    fn default() -> Self {
        Self {
            countries: hashmap! {
                "203.0.113.7".to_string() => "NZ".to_string(),
                "198.51.100.1".to_string() => "AU".to_string(),
            },
        }
    }
}

impl CountryLookup for TestCountryLookup {
    fn lookup(&self, ip: &str) -> Option<String> {
        self.countries.get(ip).cloned()
    }
}

/// A clock pinned to the given epoch-milliseconds instant.
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0
    }
}
