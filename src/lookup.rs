use chrono::Utc;

/// The structured fields a [UserAgentParser] produces and `ua_based` conditions read.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedUserAgent {
    /// Operating system or platform name as the parser reports it, e.g. "Mac OS X" or
    /// "win32". Windows flavors are normalized during evaluation, not here.
    pub platform: String,
    /// Operating system version string.
    pub platform_version: String,
    /// Browser family name.
    pub browser: String,
    /// Browser major version, e.g. "119".
    pub browser_major_version: String,
}

/// Trait for parsing raw user-agent strings into the fields `ua_based` conditions target.
///
/// The engine ships no parser of its own; hosts that want user-agent targeting plug one in
/// via [crate::Evaluator::set_user_agent_parser]. Without one, `ua_based` conditions only
/// see attributes set directly on the user. Implementations are treated as pure functions
/// during evaluation.
pub trait UserAgentParser: Send + Sync {
    /// Parse `user_agent`, or None if it cannot be parsed.
    fn parse(&self, user_agent: &str) -> Option<ParsedUserAgent>;
}

/// Trait for resolving an IP address to an ISO country code, the fallback source for
/// `ip_based` conditions when the user carries no country attribute.
pub trait CountryLookup: Send + Sync {
    /// Look up the country code for `ip`, or None if unknown.
    fn lookup(&self, ip: &str) -> Option<String>;
}

/// Trait for the wall-clock source `current_time` conditions compare against.
pub trait Clock: Send + Sync {
    /// The current time as milliseconds since the unix epoch.
    fn now_millis(&self) -> i64;
}

/// The default [Clock], backed by the system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}
