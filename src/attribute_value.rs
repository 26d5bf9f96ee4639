use chrono::{DateTime, LocalResult, TimeZone, Utc};
use itertools::{EitherOrBoth, Itertools};
use log::warn;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::util::f64_to_i64_safe;

/// Epoch values on the wire are sometimes seconds and sometimes milliseconds. Anything with
/// at least this many decimal digits is taken to be milliseconds.
const EPOCH_MILLIS_DIGIT_THRESHOLD: u32 = 11;

/// A value a condition can resolve or target.
///
/// Attribute values are deserialized from arbitrary JSON, so every JSON shape has a home
/// here. Operators work on these through the fallible coercions below ([AttributeValue::to_f64],
/// [AttributeValue::as_version], [AttributeValue::to_datetime]); a value that does not coerce
/// simply fails the comparison rather than failing the evaluation.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Stores a string value.
    String(String),
    /// Stores an array of attribute values.
    Array(Vec<AttributeValue>),
    /// Stores a number.
    Number(f64),
    /// Stores a boolean.
    Bool(bool),
    /// Stores a map of attribute values.
    Object(HashMap<String, AttributeValue>),
    /// Stores a null value.
    Null,
}

impl Default for AttributeValue {
    fn default() -> Self {
        AttributeValue::Null
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> AttributeValue {
        AttributeValue::String(s.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> AttributeValue {
        AttributeValue::String(s)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> AttributeValue {
        AttributeValue::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Number(i as f64)
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        AttributeValue::Number(f)
    }
}

impl<T: Into<AttributeValue>> From<Vec<T>> for AttributeValue {
    fn from(v: Vec<T>) -> Self {
        v.into_iter().collect()
    }
}

impl From<HashMap<String, AttributeValue>> for AttributeValue {
    fn from(hashmap: HashMap<String, AttributeValue>) -> Self {
        AttributeValue::Object(hashmap)
    }
}

impl<S: Into<AttributeValue>> FromIterator<S> for AttributeValue {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        AttributeValue::Array(iter.into_iter().map(|i| i.into()).collect())
    }
}

impl AttributeValue {
    /// Returns None unless self is a String. It will not convert.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns None unless self is a Bool. It will not convert.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns a float for numbers and for strings that parse as a number ("10" compares
    /// equal to 10), and None for everything else.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(f) => Some(*f),
            AttributeValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// The canonical string form used by membership and substring operators: strings as-is,
    /// numbers and booleans via their display form, nothing for the structured shapes.
    pub fn string_form(&self) -> Option<String> {
        match self {
            AttributeValue::String(s) => Some(s.clone()),
            AttributeValue::Number(f) => Some(f.to_string()),
            AttributeValue::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Attempt to convert any of the following into a chrono::DateTime in UTC:
    ///  * Number values are interpreted as a unix epoch, in seconds or milliseconds
    ///    depending on how many digits they have,
    ///  * String values are tried first as an epoch with the same digit rule, then as an
    ///    RFC 3339 formatted timestamp.
    ///
    /// Returns None for all other shapes and for anything that fails to parse.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            AttributeValue::Number(epoch) => f64_to_i64_safe(*epoch).and_then(datetime_from_epoch),
            AttributeValue::String(s) => match s.trim().parse::<i64>() {
                Ok(epoch) => datetime_from_epoch(epoch),
                Err(_) => DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok(),
            },
            AttributeValue::Null => None,
            other => {
                warn!(
                    "Don't know how or whether to convert attribute value {:?} to datetime",
                    other
                );
                None
            }
        }
    }

    /// Attempt to parse the value's string form as a [Version]. Returns None if the value
    /// has no string form or the string is not a valid version.
    pub fn as_version(&self) -> Option<Version> {
        Version::parse(&self.string_form()?)
    }
}

fn datetime_from_epoch(epoch: i64) -> Option<DateTime<Utc>> {
    let digits = epoch.unsigned_abs().checked_ilog10().map_or(1, |l| l + 1);
    let parsed = if digits < EPOCH_MILLIS_DIGIT_THRESHOLD {
        Utc.timestamp_opt(epoch, 0)
    } else {
        Utc.timestamp_millis_opt(epoch)
    };
    match parsed {
        LocalResult::None | LocalResult::Ambiguous(_, _) => None,
        LocalResult::Single(time) => Some(time),
    }
}

/// A version under the loose dotted-numeric scheme targeting rules use.
///
/// This is not semver: any number of components is allowed, a pre-release tag (everything
/// from the first '-') is ignored entirely, and missing components compare as zero, so
/// "1.2" equals "1.2.0" and "1.2.3-beta" equals "1.2.3".
#[derive(Clone, Debug)]
pub struct Version(Vec<u64>);

impl Version {
    /// Parse a version string, or None if any dotted component is not a plain integer.
    pub fn parse(version_str: &str) -> Option<Self> {
        let numeric = match version_str.find('-') {
            Some(tag_start) => &version_str[..tag_start],
            None => version_str,
        };
        if numeric.is_empty() {
            return None;
        }
        numeric
            .split('.')
            .map(|component| component.parse().ok())
            .collect::<Option<Vec<u64>>>()
            .map(Version)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .iter()
            .zip_longest(other.0.iter())
            .map(|components| match components {
                EitherOrBoth::Both(l, r) => l.cmp(r),
                EitherOrBoth::Left(l) => l.cmp(&0),
                EitherOrBoth::Right(r) => 0.cmp(r),
            })
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}
