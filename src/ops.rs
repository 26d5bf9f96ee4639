use chrono::{DateTime, Datelike, Local, Utc};
use log::{error, warn};
use regex::Regex;
use serde::{Deserialize, Deserializer};

use crate::attribute_value::{AttributeValue, Version};

/// A comparison a condition applies between its resolved value and its target.
///
/// Wire names are lowercase snake_case ("version_gt", "str_contains_any"); parsing is
/// case-insensitive and never fails. An operator introduced after this engine was built is
/// preserved as [Op::Unknown], which evaluation answers by deferring to the server.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    Gt,
    Gte,
    Lt,
    Lte,
    VersionGt,
    VersionGte,
    VersionLt,
    VersionLte,
    VersionEq,
    VersionNeq,
    Any,
    None,
    AnyCaseSensitive,
    NoneCaseSensitive,
    StrStartsWithAny,
    StrEndsWithAny,
    StrContainsAny,
    StrContainsNone,
    StrMatches,
    Eq,
    Neq,
    Before,
    After,
    On,
    Unknown(String),
}

impl Op {
    fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "gt" => Op::Gt,
            "gte" => Op::Gte,
            "lt" => Op::Lt,
            "lte" => Op::Lte,
            "version_gt" => Op::VersionGt,
            "version_gte" => Op::VersionGte,
            "version_lt" => Op::VersionLt,
            "version_lte" => Op::VersionLte,
            "version_eq" => Op::VersionEq,
            "version_neq" => Op::VersionNeq,
            "any" => Op::Any,
            "none" => Op::None,
            "any_case_sensitive" => Op::AnyCaseSensitive,
            "none_case_sensitive" => Op::NoneCaseSensitive,
            "str_starts_with_any" => Op::StrStartsWithAny,
            "str_ends_with_any" => Op::StrEndsWithAny,
            "str_contains_any" => Op::StrContainsAny,
            "str_contains_none" => Op::StrContainsNone,
            "str_matches" => Op::StrMatches,
            "eq" => Op::Eq,
            "neq" => Op::Neq,
            "before" => Op::Before,
            "after" => Op::After,
            "on" => Op::On,
            _ => Op::Unknown(name.to_string()),
        }
    }

    /// Apply this operator to a condition's resolved value and target.
    ///
    /// Operands that fail to coerce (a version that is not numeric, a date that does not
    /// parse, an invalid regex) make the comparison false; they never fail the evaluation.
    /// [Op::Unknown] is turned into a server deferral before this point.
    pub fn matches(&self, value: &AttributeValue, target: &AttributeValue) -> bool {
        match self {
            Op::Gt => numeric_op(value, target, |l, r| l > r),
            Op::Gte => numeric_op(value, target, |l, r| l >= r),
            Op::Lt => numeric_op(value, target, |l, r| l < r),
            Op::Lte => numeric_op(value, target, |l, r| l <= r),

            Op::VersionGt => version_op(value, target, |l, r| l > r),
            Op::VersionGte => version_op(value, target, |l, r| l >= r),
            Op::VersionLt => version_op(value, target, |l, r| l < r),
            Op::VersionLte => version_op(value, target, |l, r| l <= r),
            Op::VersionEq => version_op(value, target, |l, r| l == r),
            Op::VersionNeq => version_op(value, target, |l, r| l != r),

            Op::Any => string_list_op(value, target, str_eq_ignoring_case),
            Op::None => !string_list_op(value, target, str_eq_ignoring_case),
            Op::AnyCaseSensitive => string_list_op(value, target, |l, r| l == r),
            Op::NoneCaseSensitive => !string_list_op(value, target, |l, r| l == r),

            Op::StrStartsWithAny => string_list_op(value, target, |l, r| l.starts_with(r)),
            Op::StrEndsWithAny => string_list_op(value, target, |l, r| l.ends_with(r)),
            Op::StrContainsAny => string_list_op(value, target, |l, r| l.contains(r)),
            Op::StrContainsNone => !string_list_op(value, target, |l, r| l.contains(r)),
            Op::StrMatches => regex_full_match(value, target),

            Op::Eq => value == target,
            Op::Neq => value != target,

            Op::Before => time_op(value, target, |l, r| l < r),
            Op::After => time_op(value, target, |l, r| l > r),
            // Calendar-day comparison, in the host's local timezone.
            Op::On => time_op(value, target, |l, r| {
                let (l, r) = (l.with_timezone(&Local), r.with_timezone(&Local));
                l.year() == r.year() && l.ordinal() == r.ordinal()
            }),

            Op::Unknown(name) => {
                error!("{} operator should be special-cased, shouldn't get here", name);
                false
            }
        }
    }
}

impl<'de> Deserialize<'de> for Op {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Op::from_name(&name))
    }
}

fn str_eq_ignoring_case(l: &str, r: &str) -> bool {
    l.to_lowercase() == r.to_lowercase()
}

fn numeric_op<F>(value: &AttributeValue, target: &AttributeValue, f: F) -> bool
where
    F: Fn(f64, f64) -> bool,
{
    match (value.to_f64(), target.to_f64()) {
        (Some(l), Some(r)) => f(l, r),
        _ => false,
    }
}

fn version_op<F>(value: &AttributeValue, target: &AttributeValue, f: F) -> bool
where
    F: Fn(&Version, &Version) -> bool,
{
    match (value.as_version(), target.as_version()) {
        (Some(l), Some(r)) => f(&l, &r),
        _ => false,
    }
}

fn time_op<F>(value: &AttributeValue, target: &AttributeValue, f: F) -> bool
where
    F: Fn(DateTime<Utc>, DateTime<Utc>) -> bool,
{
    match (value.to_datetime(), target.to_datetime()) {
        (Some(l), Some(r)) => f(l, r),
        _ => false,
    }
}

/// Walk a scalar-or-list target; true if any element's string form satisfies `f` against
/// the value's string form.
fn string_list_op<F>(value: &AttributeValue, target: &AttributeValue, f: F) -> bool
where
    F: Fn(&str, &str) -> bool,
{
    let value_str = match value.string_form() {
        Some(s) => s,
        None => return false,
    };
    let satisfied_by = |element: &AttributeValue| match element.string_form() {
        Some(target_str) => f(&value_str, &target_str),
        None => false,
    };
    match target {
        AttributeValue::Array(elements) => elements.iter().any(satisfied_by),
        scalar => satisfied_by(scalar),
    }
}

fn regex_full_match(value: &AttributeValue, target: &AttributeValue) -> bool {
    let (value_str, pattern) = match (value.string_form(), target.as_str()) {
        (Some(v), Some(p)) => (v, p),
        _ => return false,
    };
    // The protocol wants a full match; Regex::is_match is a search, so anchor the pattern.
    match Regex::new(&format!(r"\A(?:{})\z", pattern)) {
        Ok(re) => re.is_match(&value_str),
        Err(e) => {
            warn!("Invalid regex for 'str_matches' operator ({}): {}", e, pattern);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn astring(s: &str) -> AttributeValue {
        AttributeValue::String(s.to_string())
    }

    fn anum(f: f64) -> AttributeValue {
        AttributeValue::Number(f)
    }

    fn alist(elements: Vec<&str>) -> AttributeValue {
        elements.into_iter().collect()
    }

    #[test]
    fn numeric_comparisons_coerce_numeric_strings() {
        assert!(Op::Gt.matches(&anum(10.0), &anum(9.0)));
        assert!(!Op::Gt.matches(&anum(9.0), &anum(9.0)));
        assert!(Op::Gte.matches(&anum(9.0), &anum(9.0)));
        assert!(Op::Lt.matches(&anum(8.5), &anum(9.0)));
        assert!(Op::Lte.matches(&anum(9.0), &anum(9.0)));

        assert!(
            Op::Gt.matches(&astring("10"), &anum(9.0)),
            "numeric strings compare as numbers"
        );
        assert!(Op::Lte.matches(&anum(9.0), &astring("9.0")));
        assert!(
            !Op::Gt.matches(&astring("ten"), &anum(9.0)),
            "non-numeric strings never match"
        );
        assert!(!Op::Lt.matches(&AttributeValue::Bool(true), &anum(9.0)));
        assert!(!Op::Gt.matches(&anum(10.0), &AttributeValue::Null));
    }

    #[test_case("1.2.3", Op::VersionGt, "1.2.2", true)]
    #[test_case("1.2.3", Op::VersionGt, "1.2.3", false)]
    #[test_case("1.10.0", Op::VersionGt, "1.9.9", true; "numeric not lexical")]
    #[test_case("1.2", Op::VersionEq, "1.2.0", true; "zero fill")]
    #[test_case("1.2.3-beta.1", Op::VersionEq, "1.2.3", true; "pre-release tag ignored")]
    #[test_case("1.2.0-beta", Op::VersionEq, "1.2", true; "tag stripped and zero filled")]
    #[test_case("1.2.3", Op::VersionNeq, "1.2.4", true)]
    #[test_case("1.2.3", Op::VersionLt, "1.3", true)]
    #[test_case("1.2.3", Op::VersionLte, "1.2.3", true)]
    #[test_case("1.2.3", Op::VersionGte, "1.2.4", false)]
    #[test_case("not.a.version", Op::VersionGt, "1.0", false; "unparseable value never matches")]
    #[test_case("1.0", Op::VersionGt, "not.a.version", false; "unparseable target never matches")]
    fn version_comparisons(value: &str, op: Op, target: &str, expected: bool) {
        assert_eq!(op.matches(&astring(value), &astring(target)), expected);
    }

    #[test]
    fn any_is_case_insensitive_membership() {
        let countries = alist(vec!["US", "CA"]);
        assert!(Op::Any.matches(&astring("US"), &countries));
        assert!(Op::Any.matches(&astring("us"), &countries), "case insensitive");
        assert!(!Op::Any.matches(&astring("NZ"), &countries));
        assert!(
            Op::Any.matches(&astring("US"), &astring("us")),
            "scalar target works like a one-element list"
        );
        assert!(
            Op::Any.matches(&anum(1.0), &alist(vec!["1"])),
            "numbers compare through their string form"
        );
        assert!(!Op::Any.matches(&AttributeValue::Null, &countries));
    }

    #[test]
    fn none_negates_membership() {
        let countries = alist(vec!["US", "CA"]);
        assert!(!Op::None.matches(&astring("us"), &countries));
        assert!(Op::None.matches(&astring("NZ"), &countries));
    }

    #[test]
    fn case_sensitive_membership_variants() {
        let plans = alist(vec!["Pro", "Enterprise"]);
        assert!(Op::AnyCaseSensitive.matches(&astring("Pro"), &plans));
        assert!(
            !Op::AnyCaseSensitive.matches(&astring("pro"), &plans),
            "case sensitive"
        );
        assert!(Op::NoneCaseSensitive.matches(&astring("pro"), &plans));
        assert!(!Op::NoneCaseSensitive.matches(&astring("Pro"), &plans));
    }

    #[test]
    fn substring_operators_are_case_sensitive() {
        let domains = alist(vec!["@example.com", "@example.org"]);
        assert!(Op::StrEndsWithAny.matches(&astring("alice@example.com"), &domains));
        assert!(
            !Op::StrEndsWithAny.matches(&astring("alice@EXAMPLE.com"), &domains),
            "case sensitive"
        );
        assert!(!Op::StrEndsWithAny.matches(&astring("alice@other.io"), &domains));

        assert!(Op::StrStartsWithAny.matches(&astring("beta-tester"), &alist(vec!["beta"])));
        assert!(!Op::StrStartsWithAny.matches(&astring("tester-beta"), &alist(vec!["beta"])));

        assert!(Op::StrContainsAny.matches(&astring("the beta cohort"), &alist(vec!["beta"])));
        assert!(!Op::StrContainsNone.matches(&astring("the beta cohort"), &alist(vec!["beta"])));
        assert!(Op::StrContainsNone.matches(&astring("the alpha cohort"), &alist(vec!["beta"])));
    }

    #[test]
    fn str_matches_requires_a_full_match() {
        assert!(Op::StrMatches.matches(&astring("hello"), &astring("h.*o")));
        assert!(
            !Op::StrMatches.matches(&astring("hello"), &astring("ell")),
            "a substring hit is not a full match"
        );
        assert!(
            Op::StrMatches.matches(&astring("hello"), &astring("^hello$")),
            "patterns carrying their own anchors still work"
        );
        assert!(!Op::StrMatches.matches(&astring("hello"), &astring("(unclosed")));
        assert!(!Op::StrMatches.matches(&AttributeValue::Null, &astring(".*")));
    }

    #[test]
    fn eq_and_neq_are_structural() {
        assert!(Op::Eq.matches(&astring("a"), &astring("a")));
        assert!(!Op::Eq.matches(&astring("a"), &astring("A")), "case sensitive");
        assert!(Op::Eq.matches(&anum(2.0), &anum(2.0)));
        assert!(
            !Op::Eq.matches(&anum(2.0), &astring("2")),
            "eq does not coerce across shapes"
        );
        assert!(Op::Eq.matches(&alist(vec!["a", "b"]), &alist(vec!["a", "b"])));
        assert!(Op::Eq.matches(&AttributeValue::Null, &AttributeValue::Null));
        assert!(Op::Neq.matches(&astring("a"), &astring("b")));
        assert!(!Op::Neq.matches(&astring("a"), &astring("a")));
    }

    #[test]
    fn before_and_after_compare_instants() {
        let earlier = anum(1_600_000_000_000_f64);
        let later = anum(1_700_000_000_000_f64);
        assert!(Op::Before.matches(&earlier, &later));
        assert!(!Op::Before.matches(&later, &earlier));
        assert!(Op::After.matches(&later, &earlier));

        assert!(
            Op::Before.matches(&anum(1_600_000_000_f64), &later),
            "seconds and millis epochs compare on the same timeline"
        );
        assert!(Op::Before.matches(&astring("2016-04-16T17:09:12-07:00"), &later));
        assert!(!Op::Before.matches(&astring("not a date"), &later));
    }

    #[test]
    fn on_compares_the_calendar_day() {
        let noon = anum(1_700_000_000_000_f64);
        assert!(Op::On.matches(&noon, &noon));
        let ten_days_later = anum(1_700_864_000_000_f64);
        assert!(!Op::On.matches(&noon, &ten_days_later));
    }

    #[test]
    fn unknown_operators_never_match() {
        let op = Op::from_name("in_segment_list");
        assert_eq!(op, Op::Unknown("in_segment_list".to_string()));
        assert!(!op.matches(&astring("a"), &astring("a")));
    }

    #[test]
    fn operator_names_parse_case_insensitively() {
        assert_eq!(Op::from_name("ANY"), Op::Any);
        assert_eq!(Op::from_name("Version_GT"), Op::VersionGt);
        assert_eq!(
            serde_json::from_str::<Op>("\"str_matches\"").unwrap(),
            Op::StrMatches
        );
    }
}
