use std::collections::HashSet;
use std::sync::Arc;

use log::warn;
use serde::Serialize;
use serde_json::Value;

use crate::attribute_value::AttributeValue;
use crate::bucketing::{self, USER_BUCKET_MODULUS};
use crate::lookup::{Clock, CountryLookup, SystemClock, UserAgentParser};
use crate::ops::Op;
use crate::spec::{Condition, ConditionKind, ConfigSpec, DownloadedSpecs, Rule};
use crate::store::{Snapshot, SpecStore};
use crate::user::User;
use crate::util::is_false;

/// Rule id reported when no rule matched and the default value applies.
pub const DEFAULT_RULE_ID: &str = "default";
/// Rule id reported when the whole spec is disabled.
pub const DISABLED_RULE_ID: &str = "disabled";

const PREALLOCATED_GATE_CHAIN_SIZE: usize = 16;
const MAX_GATE_DEPTH: usize = 64;

pub(crate) struct EvaluationStack {
    gate_chain: HashSet<String>,
}

impl EvaluationStack {
    fn new() -> Self {
        // Preallocate some space for the gate chain. We can get up to that many levels of
        // nested gate dependencies before appending causes a heap allocation.
        Self {
            gate_chain: HashSet::with_capacity(PREALLOCATED_GATE_CHAIN_SIZE),
        }
    }

    // False when entering `gate_name` would revisit a gate already being evaluated, or
    // push the chain past the depth cap.
    fn enter(&mut self, gate_name: &str) -> bool {
        if self.gate_chain.len() >= MAX_GATE_DEPTH || self.gate_chain.contains(gate_name) {
            return false;
        }
        self.gate_chain.insert(gate_name.to_string());
        true
    }

    fn exit(&mut self, gate_name: &str) {
        self.gate_chain.remove(gate_name);
    }
}

impl Default for EvaluationStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Record of a nested gate decision made on the way to some outer result, so the caller
/// can log an exposure for every gate that influenced the outcome.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SecondaryExposure {
    /// Name of the nested gate.
    pub gate: String,
    /// The nested gate's boolean decision, stringified.
    #[serde(rename = "gateValue")]
    pub gate_value: String,
    /// Id of the rule that produced the nested decision.
    #[serde(rename = "ruleID")]
    pub rule_id: String,
}

/// The outcome of evaluating a gate or dynamic config for a user.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EvalResult {
    /// True when the engine cannot decide locally and the caller must consult the remote
    /// evaluation service; none of the other fields is a decision in that case.
    #[serde(rename = "fetchFromServer", skip_serializing_if = "is_false")]
    pub fetch_from_server: bool,
    /// The boolean decision: whether the gate is on, or whether the matched rule's
    /// rollout admitted the user.
    #[serde(rename = "booleanValue")]
    pub bool_value: bool,
    /// The structured payload: the spec's default value, or nothing for an unknown name.
    #[serde(rename = "value")]
    pub json_value: Value,
    /// Id of the rule that decided the result, [DEFAULT_RULE_ID] when no rule matched,
    /// [DISABLED_RULE_ID] when the spec was off, and empty for an unknown name.
    #[serde(rename = "ruleID")]
    pub rule_id: String,
    /// Every nested gate decision made along the way, innermost first.
    #[serde(rename = "secondaryExposures", skip_serializing_if = "Vec::is_empty")]
    pub secondary_exposures: Vec<SecondaryExposure>,
}

impl EvalResult {
    /// A terminal "ask the server" result.
    pub fn fetch_from_server() -> Self {
        Self {
            fetch_from_server: true,
            ..Self::from_bool(false)
        }
    }

    // The defined result for a name the snapshot does not contain: off, with nothing in it.
    fn spec_not_found() -> Self {
        Self::from_bool(false)
    }

    // A bare boolean outcome, used for condition-level results.
    fn from_bool(pass: bool) -> Self {
        Self {
            fetch_from_server: false,
            bool_value: pass,
            json_value: Value::Null,
            rule_id: String::new(),
            secondary_exposures: Vec::new(),
        }
    }
}

/// The evaluation engine. It owns the installed [Snapshot] and the host-supplied
/// collaborators, and answers [Evaluator::check_gate] and [Evaluator::get_config] against
/// them without any I/O.
///
/// Fetching spec payloads and logging exposures stay with the host; the evaluator's whole
/// job is turning a snapshot plus a user into a decision. All methods are safe to call
/// concurrently, and installing a snapshot atomically replaces what later calls observe.
pub struct Evaluator {
    store: SpecStore,
    clock: Box<dyn Clock>,
    user_agent_parser: Option<Box<dyn UserAgentParser>>,
    country_lookup: Option<Box<dyn CountryLookup>>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    /// Create an evaluator with an empty snapshot, the system clock, and no lookup
    /// collaborators.
    pub fn new() -> Self {
        Self {
            store: SpecStore::new(),
            clock: Box::new(SystemClock),
            user_agent_parser: None,
            country_lookup: None,
        }
    }

    /// Supply the parser `ua_based` conditions read user agents through. Without one,
    /// those conditions only see attributes set directly on the user.
    pub fn set_user_agent_parser(&mut self, parser: impl UserAgentParser + 'static) {
        self.user_agent_parser = Some(Box::new(parser));
    }

    /// Supply the IP-to-country lookup `ip_based` conditions fall back to.
    pub fn set_country_lookup(&mut self, lookup: impl CountryLookup + 'static) {
        self.country_lookup = Some(Box::new(lookup));
    }

    /// Replace the wall-clock source `current_time` conditions compare against.
    pub fn set_clock(&mut self, clock: impl Clock + 'static) {
        self.clock = Box::new(clock);
    }

    /// Install a snapshot built from separate gate and dynamic config lists, replacing
    /// the previous one for all subsequent calls. Evaluations already in flight finish
    /// against the snapshot they started with.
    pub fn install_snapshot(&self, gates: Vec<ConfigSpec>, dynamic_configs: Vec<ConfigSpec>) {
        self.store
            .install(Arc::new(Snapshot::new(gates, dynamic_configs)));
    }

    /// Install a download envelope, ignoring it entirely when it carries no updates.
    pub fn install_downloaded(&self, download: DownloadedSpecs) {
        if download.has_updates {
            self.store.install(Arc::new(Snapshot::from_download(download)));
        }
    }

    /// Server timestamp of the installed snapshot, zero before the first install. Hosts
    /// use this as the since-time of their next download.
    pub fn snapshot_time(&self) -> u64 {
        self.store.snapshot().time()
    }

    /// Evaluate the feature gate named `gate_name` for `user`.
    ///
    /// An unknown gate is off, not an error. A result with
    /// [EvalResult::fetch_from_server] set means this snapshot cannot decide the gate
    /// locally.
    pub fn check_gate(&self, user: &User, gate_name: &str) -> EvalResult {
        let snapshot = self.store.snapshot();
        let mut stack = EvaluationStack::default();
        self.eval_gate(&snapshot, user, gate_name, &mut stack)
    }

    /// Evaluate the dynamic config named `config_name` for `user`. The payload of the
    /// result is always the config's default value; rules and rollouts decide the boolean
    /// and the rule id, not the content.
    pub fn get_config(&self, user: &User, config_name: &str) -> EvalResult {
        let snapshot = self.store.snapshot();
        let mut stack = EvaluationStack::default();
        match snapshot.dynamic_config(config_name) {
            Some(spec) => self.eval_spec(&snapshot, user, spec, &mut stack),
            None => EvalResult::spec_not_found(),
        }
    }

    fn eval_gate(
        &self,
        snapshot: &Snapshot,
        user: &User,
        gate_name: &str,
        stack: &mut EvaluationStack,
    ) -> EvalResult {
        match snapshot.gate(gate_name) {
            Some(spec) => self.eval_spec(snapshot, user, spec, stack),
            None => EvalResult::spec_not_found(),
        }
    }

    fn eval_spec(
        &self,
        snapshot: &Snapshot,
        user: &User,
        spec: &ConfigSpec,
        stack: &mut EvaluationStack,
    ) -> EvalResult {
        if !spec.enabled {
            return EvalResult {
                json_value: spec.default_value.clone(),
                rule_id: DISABLED_RULE_ID.to_string(),
                ..EvalResult::from_bool(false)
            };
        }

        let mut exposures = Vec::new();
        for rule in &spec.rules {
            let rule_result = self.eval_rule(snapshot, user, rule, stack);
            if rule_result.fetch_from_server {
                return rule_result;
            }
            exposures.extend(rule_result.secondary_exposures);

            if rule_result.bool_value {
                let unit_id = user.unit_id(&rule.id_type).unwrap_or_default();
                let admitted =
                    bucketing::rollout_passes(&spec.salt, &rule.id, unit_id, rule.pass_percentage);
                // The rollout gates participation, not content: the payload is the
                // spec's default value whether or not the user is admitted.
                return EvalResult {
                    fetch_from_server: false,
                    bool_value: admitted,
                    json_value: spec.default_value.clone(),
                    rule_id: rule.id.clone(),
                    secondary_exposures: exposures,
                };
            }
        }

        EvalResult {
            fetch_from_server: false,
            bool_value: false,
            json_value: spec.default_value.clone(),
            rule_id: DEFAULT_RULE_ID.to_string(),
            secondary_exposures: exposures,
        }
    }

    // A rule result carries the rule's return value and id whether it passed or not, so
    // a caller can see which rule almost matched. The first failing condition
    // short-circuits; nested gate exposures survive either way.
    fn eval_rule(
        &self,
        snapshot: &Snapshot,
        user: &User,
        rule: &Rule,
        stack: &mut EvaluationStack,
    ) -> EvalResult {
        let mut exposures = Vec::new();
        for condition in &rule.conditions {
            let condition_result = self.eval_condition(snapshot, user, condition, stack);
            if condition_result.fetch_from_server {
                return condition_result;
            }
            exposures.extend(condition_result.secondary_exposures);

            if !condition_result.bool_value {
                return EvalResult {
                    fetch_from_server: false,
                    bool_value: false,
                    json_value: rule.return_value.clone(),
                    rule_id: rule.id.clone(),
                    secondary_exposures: exposures,
                };
            }
        }

        EvalResult {
            fetch_from_server: false,
            bool_value: true,
            json_value: rule.return_value.clone(),
            rule_id: rule.id.clone(),
            secondary_exposures: exposures,
        }
    }

    fn eval_condition(
        &self,
        snapshot: &Snapshot,
        user: &User,
        condition: &Condition,
        stack: &mut EvaluationStack,
    ) -> EvalResult {
        let field = condition.field.as_deref().unwrap_or_default();

        let value = match &condition.kind {
            ConditionKind::Public => return EvalResult::from_bool(true),
            ConditionKind::PassGate | ConditionKind::FailGate => {
                return self.eval_nested_gate(snapshot, user, condition, stack);
            }
            ConditionKind::IpBased => user.value_of(field).or_else(|| {
                if field.eq_ignore_ascii_case("country") {
                    self.country_from_ip(user)
                } else {
                    None
                }
            }),
            ConditionKind::UaBased => self.user_agent_field(user, field),
            ConditionKind::UserField => user.value_of(field),
            // Stringified on purpose: numeric and date operators both coerce digit
            // strings, and eq sees the same shape other SDKs produce.
            ConditionKind::CurrentTime => {
                Some(AttributeValue::String(self.clock.now_millis().to_string()))
            }
            ConditionKind::EnvironmentField => user.environment_value(field),
            ConditionKind::UserBucket => {
                let salt = condition
                    .additional_values
                    .get("salt")
                    .and_then(AttributeValue::string_form)
                    .unwrap_or_default();
                let unit_id = user.unit_id(&condition.id_type).unwrap_or_default();
                let input = format!("{}.{}", salt, unit_id);
                Some(AttributeValue::Number(
                    bucketing::bucket(&input, USER_BUCKET_MODULUS) as f64,
                ))
            }
            ConditionKind::UnitId => user.unit_id(&condition.id_type).map(AttributeValue::from),
            ConditionKind::Unknown(name) => {
                warn!("{} conditions are not supported here; deferring to the server", name);
                return EvalResult::fetch_from_server();
            }
        };

        // An unrecognized operator defers whether or not the attribute resolved.
        if let Some(Op::Unknown(name)) = &condition.operator {
            warn!("{} operator is not supported here; deferring to the server", name);
            return EvalResult::fetch_from_server();
        }

        let value = match value {
            Some(value) => value,
            // A value that does not resolve is a non-match, never a deferral, even under
            // negated operators like none.
            None => return EvalResult::from_bool(false),
        };

        match &condition.operator {
            Some(op) => EvalResult::from_bool(op.matches(&value, &condition.target_value)),
            // No operator means the resolved value is itself the outcome.
            None => EvalResult::from_bool(value.as_bool().unwrap_or(false)),
        }
    }

    fn eval_nested_gate(
        &self,
        snapshot: &Snapshot,
        user: &User,
        condition: &Condition,
        stack: &mut EvaluationStack,
    ) -> EvalResult {
        let gate_name = match condition.target_value.as_str() {
            Some(name) => name,
            None => {
                warn!("gate dependency condition without a gate name; deferring to the server");
                return EvalResult::fetch_from_server();
            }
        };

        if !stack.enter(gate_name) {
            warn!(
                "gate dependency on {} caused a circular or over-deep reference; this is \
                 probably a temporary condition due to an incomplete update",
                gate_name
            );
            return EvalResult::fetch_from_server();
        }
        let nested = self.eval_gate(snapshot, user, gate_name, stack);
        stack.exit(gate_name);

        if nested.fetch_from_server {
            return nested;
        }

        let exposure = SecondaryExposure {
            gate: gate_name.to_string(),
            gate_value: nested.bool_value.to_string(),
            rule_id: nested.rule_id,
        };
        let pass = match condition.kind {
            ConditionKind::FailGate => !nested.bool_value,
            _ => nested.bool_value,
        };

        let mut exposures = nested.secondary_exposures;
        exposures.push(exposure);
        // fail_gate negates the decision; the nested value rides along unchanged.
        EvalResult {
            bool_value: pass,
            json_value: nested.json_value,
            secondary_exposures: exposures,
            ..EvalResult::from_bool(pass)
        }
    }

    fn country_from_ip(&self, user: &User) -> Option<AttributeValue> {
        let lookup = self.country_lookup.as_deref()?;
        let ip = user.value_of("ip")?;
        lookup.lookup(ip.as_str()?).map(AttributeValue::from)
    }

    // browser_version is always derived from the user agent; every other field prefers an
    // attribute set directly on the user.
    fn user_agent_field(&self, user: &User, field: &str) -> Option<AttributeValue> {
        if !field.eq_ignore_ascii_case("browser_version") {
            if let Some(value) = user.value_of(field) {
                return Some(value);
            }
        }

        let parser = self.user_agent_parser.as_deref()?;
        let parsed = parser.parse(user.user_agent()?)?;
        let value = match field.to_lowercase().as_str() {
            "os_name" => normalize_platform(parsed.platform),
            "os_version" => parsed.platform_version,
            "browser_name" => parsed.browser,
            "browser_version" => parsed.browser_major_version,
            _ => return None,
        };
        Some(AttributeValue::String(value))
    }
}

// UA parsers report Windows flavors under many names ("win32", "Windows NT"); targeting
// rules expect the single name "Windows".
fn normalize_platform(platform: String) -> String {
    if platform.to_lowercase().starts_with("win") {
        "Windows".to_string()
    } else {
        platform
    }
}
