use serde::{Deserialize, Deserializer};
use serde_json::Value;
use serde_with::serde_as;
use std::collections::HashMap;

use crate::attribute_value::AttributeValue;
use crate::ops::Op;

fn default_id_type() -> String {
    "userID".to_string()
}

/// A single feature gate or dynamic config definition, as downloaded from the config
/// service. The same shape serves both: a gate is a spec whose values are booleans.
///
/// Specs are immutable once parsed. A refresh never edits a spec in place; it installs a
/// whole new [crate::Snapshot].
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSpec {
    pub name: String,
    /// A disabled spec short-circuits to its default value without consulting rules.
    pub enabled: bool,
    /// Salt mixed into every rollout hash for this spec, so reshuffling one spec's
    /// buckets never moves users in another.
    pub salt: String,
    pub default_value: Value,
    /// Evaluated in order; the first rule whose conditions all pass decides the result.
    pub rules: Vec<Rule>,
    #[serde(default = "default_id_type")]
    pub id_type: String,
}

/// A targeting rule: a conjunction of conditions plus a percentage rollout among the
/// users who match them.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Share of matching users admitted, 0 to 100.
    pub pass_percentage: f64,
    pub return_value: Value,
    pub conditions: Vec<Condition>,
    /// Which identifier the rollout hashes, e.g. "userID" or "stableID".
    #[serde(default = "default_id_type")]
    pub id_type: String,
}

/// A single check within a rule.
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    /// The attribute the condition reads, for the kinds that read one.
    #[serde(default)]
    pub field: Option<String>,
    /// Absent means the resolved value is itself the boolean outcome.
    #[serde(default)]
    pub operator: Option<Op>,
    #[serde(default)]
    pub target_value: AttributeValue,
    /// Kind-specific extras, e.g. the "salt" for user_bucket conditions.
    #[serde_as(deserialize_as = "serde_with::DefaultOnNull")]
    #[serde(default)]
    pub additional_values: HashMap<String, AttributeValue>,
    #[serde(default = "default_id_type")]
    pub id_type: String,
}

/// The closed set of condition types this engine can evaluate locally.
///
/// Parsing is case-insensitive and never fails: a type introduced after this engine was
/// built is preserved as [ConditionKind::Unknown], and evaluation answers it by deferring
/// to the server rather than guessing.
#[derive(Clone, Debug, PartialEq)]
pub enum ConditionKind {
    /// Matches everyone.
    Public,
    /// Passes when the referenced gate evaluates false.
    FailGate,
    /// Passes when the referenced gate evaluates true.
    PassGate,
    /// Reads a user attribute, falling back to IP-derived country.
    IpBased,
    /// Reads a user attribute, falling back to fields parsed from the user agent.
    UaBased,
    /// Reads a user attribute.
    UserField,
    /// Reads the evaluation wall-clock time.
    CurrentTime,
    /// Reads a field of the user's environment bag.
    EnvironmentField,
    /// Reads the user's hash bucket out of 1000.
    UserBucket,
    /// Reads the identifier named by the condition's id type.
    UnitId,
    /// Anything this engine does not recognize.
    Unknown(String),
}

impl ConditionKind {
    fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "public" => ConditionKind::Public,
            "fail_gate" => ConditionKind::FailGate,
            "pass_gate" => ConditionKind::PassGate,
            "ip_based" => ConditionKind::IpBased,
            "ua_based" => ConditionKind::UaBased,
            "user_field" => ConditionKind::UserField,
            "current_time" => ConditionKind::CurrentTime,
            "environment_field" => ConditionKind::EnvironmentField,
            "user_bucket" => ConditionKind::UserBucket,
            "unit_id" => ConditionKind::UnitId,
            _ => ConditionKind::Unknown(name.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for ConditionKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(ConditionKind::from_name(&name))
    }
}

/// The envelope of a spec download. When `has_updates` is false the service sent nothing
/// newer than what the caller already holds and the spec lists are empty.
#[derive(Clone, Debug, Deserialize)]
pub struct DownloadedSpecs {
    #[serde(default)]
    pub feature_gates: Vec<ConfigSpec>,
    #[serde(default)]
    pub dynamic_configs: Vec<ConfigSpec>,
    pub has_updates: bool,
    /// Server timestamp of this download, for staleness bookkeeping.
    #[serde(default)]
    pub time: u64,
}
