use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::attribute_value::AttributeValue;

const USER_CUSTOM_STARTING_CAPACITY: usize = 10;

/// A User contains the attributes of the person (or device, or account) a gate or config
/// is being evaluated for. Only the user id is required; every other attribute is optional
/// and conditions that target a missing attribute simply do not match.
///
/// Attributes live in three places: the well-known fields below, the free-form `custom`
/// bag, and the `private_attributes` bag. Private attributes participate in evaluation
/// exactly like custom ones but are never serialized back out of the process.
///
/// Users are immutable once built; use [User::with_id] to construct one.
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct User {
    #[serde(rename = "userID")]
    _user_id: String,
    #[serde(rename = "email", skip_serializing_if = "Option::is_none", default)]
    _email: Option<String>,
    #[serde(rename = "ip", skip_serializing_if = "Option::is_none", default)]
    _ip: Option<String>,
    #[serde(rename = "userAgent", skip_serializing_if = "Option::is_none", default)]
    _user_agent: Option<String>,
    #[serde(rename = "country", skip_serializing_if = "Option::is_none", default)]
    _country: Option<String>,
    #[serde(rename = "locale", skip_serializing_if = "Option::is_none", default)]
    _locale: Option<String>,
    #[serde(rename = "appVersion", skip_serializing_if = "Option::is_none", default)]
    _app_version: Option<String>,

    #[serde_as(deserialize_as = "serde_with::DefaultOnNull")]
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    custom: HashMap<String, AttributeValue>,

    #[serde_as(deserialize_as = "serde_with::DefaultOnNull")]
    #[serde(rename = "privateAttributes", skip_serializing, default)]
    private_attributes: HashMap<String, AttributeValue>,

    #[serde_as(deserialize_as = "serde_with::DefaultOnNull")]
    #[serde(
        rename = "customIDs",
        skip_serializing_if = "HashMap::is_empty",
        default
    )]
    custom_ids: HashMap<String, String>,

    #[serde_as(deserialize_as = "serde_with::DefaultOnNull")]
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    environment: HashMap<String, String>,
}

impl User {
    /// Create a new user builder with the given user id.
    pub fn with_id(user_id: impl Into<String>) -> UserBuilder {
        UserBuilder::new(user_id)
    }

    /// Returns the id of the user.
    pub fn user_id(&self) -> &str {
        &self._user_id
    }

    /// Returns the email of the user, if any.
    pub fn email(&self) -> Option<&str> {
        self._email.as_deref()
    }

    /// Returns the ip of the user, if any.
    pub fn ip(&self) -> Option<&str> {
        self._ip.as_deref()
    }

    /// Returns the user agent of the user, if any.
    pub fn user_agent(&self) -> Option<&str> {
        self._user_agent.as_deref()
    }

    /// Returns the country of the user, if any.
    pub fn country(&self) -> Option<&str> {
        self._country.as_deref()
    }

    /// Returns the locale of the user, if any.
    pub fn locale(&self) -> Option<&str> {
        self._locale.as_deref()
    }

    /// Returns the app version of the user, if any.
    pub fn app_version(&self) -> Option<&str> {
        self._app_version.as_deref()
    }

    /// Resolve the attribute named `field` against this user.
    ///
    /// Well-known fields match first, case-insensitively and under a few aliases ("ip",
    /// "ipAddress" and "ip_address" are the same field). A well-known name that is unset,
    /// or any other name, falls through to the custom bag and then the private one.
    pub fn value_of(&self, field: &str) -> Option<AttributeValue> {
        let well_known = match field.to_lowercase().as_str() {
            "userid" | "user_id" => Some(AttributeValue::String(self._user_id.clone())),
            "email" => self._email.as_deref().map(AttributeValue::from),
            "ip" | "ipaddress" | "ip_address" => self._ip.as_deref().map(AttributeValue::from),
            "useragent" | "user_agent" => self._user_agent.as_deref().map(AttributeValue::from),
            "country" => self._country.as_deref().map(AttributeValue::from),
            "locale" => self._locale.as_deref().map(AttributeValue::from),
            "appversion" | "app_version" => self._app_version.as_deref().map(AttributeValue::from),
            _ => None,
        };
        well_known
            .or_else(|| self.custom.get(field).cloned())
            .or_else(|| self.private_attributes.get(field).cloned())
    }

    /// Resolve `field` from the environment bag, retrying case-insensitively on a miss.
    pub fn environment_value(&self, field: &str) -> Option<AttributeValue> {
        self.environment
            .get(field)
            .or_else(|| {
                self.environment
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(field))
                    .map(|(_, value)| value)
            })
            .map(|value| AttributeValue::String(value.clone()))
    }

    /// The identifier bucketing uses for `id_type`: the primary user id when `id_type` is
    /// "userID" (any casing), otherwise the matching entry in the custom id map.
    pub fn unit_id(&self, id_type: &str) -> Option<&str> {
        if id_type.eq_ignore_ascii_case("userid") {
            return Some(&self._user_id);
        }
        self.custom_ids
            .get(id_type)
            .or_else(|| {
                self.custom_ids
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(id_type))
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
    }
}

/// Contains methods for configuring a new user.
pub struct UserBuilder {
    user_id: String,
    email: Option<String>,
    ip: Option<String>,
    user_agent: Option<String>,
    country: Option<String>,
    locale: Option<String>,
    app_version: Option<String>,
    custom: HashMap<String, AttributeValue>,
    private_attributes: HashMap<String, AttributeValue>,
    custom_ids: HashMap<String, String>,
    environment: HashMap<String, String>,
}

impl UserBuilder {
    /// Create a new user builder, setting the user id to `user_id`.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            ip: None,
            user_agent: None,
            country: None,
            locale: None,
            app_version: None,
            custom: HashMap::with_capacity(USER_CUSTOM_STARTING_CAPACITY),
            private_attributes: HashMap::new(),
            custom_ids: HashMap::new(),
            environment: HashMap::new(),
        }
    }

    /// Set the email attribute for this builder instance.
    pub fn email(&mut self, email: impl Into<String>) -> &mut Self {
        self.email = Some(email.into());
        self
    }

    /// Set the ip attribute for this builder instance.
    pub fn ip(&mut self, ip: impl Into<String>) -> &mut Self {
        self.ip = Some(ip.into());
        self
    }

    /// Set the user agent attribute for this builder instance.
    pub fn user_agent(&mut self, user_agent: impl Into<String>) -> &mut Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set the country attribute for this builder instance.
    pub fn country(&mut self, country: impl Into<String>) -> &mut Self {
        self.country = Some(country.into());
        self
    }

    /// Set the locale attribute for this builder instance.
    pub fn locale(&mut self, locale: impl Into<String>) -> &mut Self {
        self.locale = Some(locale.into());
        self
    }

    /// Set the app version attribute for this builder instance.
    pub fn app_version(&mut self, app_version: impl Into<String>) -> &mut Self {
        self.app_version = Some(app_version.into());
        self
    }

    /// Set a single custom attribute for this builder instance.
    pub fn custom_attribute(
        &mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> &mut Self {
        self.custom.insert(name.into(), value.into());
        self
    }

    /// Replace the whole custom attribute bag for this builder instance.
    pub fn custom(&mut self, custom: HashMap<String, AttributeValue>) -> &mut Self {
        self.custom = custom;
        self
    }

    /// Set a single private attribute for this builder instance. Private attributes
    /// evaluate like custom ones but are never serialized.
    pub fn private_attribute(
        &mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> &mut Self {
        self.private_attributes.insert(name.into(), value.into());
        self
    }

    /// Set an alternate bucketing id, e.g. a "stableID" or "companyID".
    pub fn custom_id(&mut self, id_type: impl Into<String>, id: impl Into<String>) -> &mut Self {
        self.custom_ids.insert(id_type.into(), id.into());
        self
    }

    /// Set an environment field, e.g. "tier" to "staging".
    pub fn environment_field(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.environment.insert(name.into(), value.into());
        self
    }

    /// Construct a [User] from this builder instance.
    pub fn build(&self) -> User {
        User {
            _user_id: self.user_id.clone(),
            _email: self.email.clone(),
            _ip: self.ip.clone(),
            _user_agent: self.user_agent.clone(),
            _country: self.country.clone(),
            _locale: self.locale.clone(),
            _app_version: self.app_version.clone(),
            custom: self.custom.clone(),
            private_attributes: self.private_attributes.clone(),
            custom_ids: self.custom_ids.clone(),
            environment: self.environment.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;
    use spectral::prelude::*;

    #[test]
    fn builder_sets_every_field() {
        let user = User::with_id("alice")
            .email("alice@example.com")
            .ip("203.0.113.7")
            .user_agent("Mozilla/5.0")
            .country("NZ")
            .locale("en-NZ")
            .app_version("1.4.0")
            .custom_attribute("plan", "enterprise")
            .private_attribute("beta_opt_in", true)
            .custom_id("stableID", "device-17")
            .environment_field("tier", "production")
            .build();

        assert_that!(user.user_id()).is_equal_to("alice");
        assert_that!(user.email()).contains_value("alice@example.com");
        assert_that!(user.ip()).contains_value("203.0.113.7");
        assert_that!(user.user_agent()).contains_value("Mozilla/5.0");
        assert_that!(user.country()).contains_value("NZ");
        assert_that!(user.locale()).contains_value("en-NZ");
        assert_that!(user.app_version()).contains_value("1.4.0");
        assert_that!(user.value_of("plan")).contains_value(AttributeValue::from("enterprise"));
        assert_that!(user.value_of("beta_opt_in")).contains_value(AttributeValue::from(true));
        assert_that!(user.unit_id("stableID")).contains_value("device-17");
        assert_that!(user.environment_value("tier")).contains_value(AttributeValue::from("production"));
    }

    #[test]
    fn minimal_user_resolves_nothing_extra() {
        let user = User::with_id("alice").build();
        assert_that!(user.email()).is_none();
        assert_that!(user.value_of("email")).is_none();
        assert_that!(user.value_of("plan")).is_none();
        assert_that!(user.environment_value("tier")).is_none();
    }

    #[test]
    fn well_known_fields_match_case_insensitively_and_by_alias() {
        let user = User::with_id("alice")
            .ip("203.0.113.7")
            .app_version("1.4.0")
            .build();

        for field in ["ip", "IP", "ipAddress", "ip_address"] {
            asserting!(field)
                .that(&user.value_of(field))
                .contains_value(AttributeValue::from("203.0.113.7"));
        }
        for field in ["appVersion", "app_version", "APPVERSION"] {
            asserting!(field)
                .that(&user.value_of(field))
                .contains_value(AttributeValue::from("1.4.0"));
        }
        for field in ["userID", "userid", "user_id"] {
            asserting!(field)
                .that(&user.value_of(field))
                .contains_value(AttributeValue::from("alice"));
        }
    }

    #[test]
    fn well_known_field_wins_over_custom() {
        let user = User::with_id("alice")
            .country("NZ")
            .custom_attribute("country", "AU")
            .build();
        assert_that!(user.value_of("country")).contains_value(AttributeValue::from("NZ"));
    }

    #[test]
    fn unset_well_known_field_falls_through_to_custom() {
        let user = User::with_id("alice")
            .custom_attribute("country", "AU")
            .build();
        assert_that!(user.value_of("country")).contains_value(AttributeValue::from("AU"));
    }

    #[test]
    fn custom_wins_over_private() {
        let user = User::with_id("alice")
            .custom_attribute("plan", "pro")
            .private_attribute("plan", "enterprise")
            .build();
        assert_that!(user.value_of("plan")).contains_value(AttributeValue::from("pro"));
    }

    #[test]
    fn environment_lookup_retries_case_insensitively() {
        let user = User::with_id("alice")
            .environment_field("tier", "staging")
            .build();
        assert_that!(user.environment_value("tier")).contains_value(AttributeValue::from("staging"));
        assert_that!(user.environment_value("Tier")).contains_value(AttributeValue::from("staging"));
        assert_that!(user.environment_value("region")).is_none();
    }

    #[test]
    fn unit_id_resolution() {
        let user = User::with_id("alice").custom_id("stableID", "device-17").build();

        asserting!("userID in any casing resolves to the primary id")
            .that(&user.unit_id("userID"))
            .contains_value("alice");
        assert_that!(user.unit_id("USERID")).contains_value("alice");

        asserting!("custom id types resolve through the custom id map")
            .that(&user.unit_id("stableID"))
            .contains_value("device-17");
        asserting!("custom id lookup retries case-insensitively")
            .that(&user.unit_id("stableid"))
            .contains_value("device-17");

        assert_that!(user.unit_id("companyID")).is_none();
    }

    #[test]
    fn deserializes_a_full_user() {
        let user: User = serde_json::from_str(
            r#"{
                "userID": "alice",
                "email": "alice@example.com",
                "userAgent": "Mozilla/5.0",
                "appVersion": "1.4.0",
                "custom": {"plan": "enterprise", "seats": 12},
                "privateAttributes": {"beta_opt_in": true},
                "customIDs": {"stableID": "device-17"},
                "environment": {"tier": "production"}
            }"#,
        )
        .unwrap();

        assert_that!(user.user_id()).is_equal_to("alice");
        assert_that!(user.value_of("seats")).contains_value(AttributeValue::from(12));
        assert_that!(user.value_of("beta_opt_in")).contains_value(AttributeValue::from(true));
        assert_that!(user.unit_id("stableID")).contains_value("device-17");
        assert_that!(user.environment_value("tier")).contains_value(AttributeValue::from("production"));
    }

    #[test]
    fn tolerates_explicit_null_bags() {
        let user: User = serde_json::from_str(
            r#"{"userID": "alice", "custom": null, "privateAttributes": null, "customIDs": null}"#,
        )
        .unwrap();
        assert_that!(user.value_of("anything")).is_none();
    }

    #[test]
    fn rejects_a_user_without_an_id() {
        let result = serde_json::from_str::<User>(r#"{"email": "alice@example.com"}"#);
        assert_that!(result).is_err();
    }

    #[test]
    fn serialization_omits_private_attributes_and_empty_bags() {
        let user = User::with_id("alice")
            .country("NZ")
            .private_attribute("salary_band", "L5")
            .build();
        assert_json_eq!(
            serde_json::to_value(&user).unwrap(),
            json!({"userID": "alice", "country": "NZ"})
        );
    }
}
