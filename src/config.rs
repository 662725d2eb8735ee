//! Config lookup shim (spec C2).
//!
//! Mirrors the two-tier `[libdefaults]` lookup order real Kerberos clients
//! use: a realm-scoped override wins over the realm-less global default.
//! The actual profile/INI parsing is an external concern; this module only
//! defines the lookup contract (`Profile`) and a couple of default-table
//! conveniences the request initializer (C7) and state machine (C10) need.

use std::collections::HashMap;

/// Library-wide configuration defaults, named the way `[libdefaults]` keys
/// are named in a real krb5.conf.
pub struct Defaults;

impl Defaults {
    pub const FORWARDABLE: &'static str = "forwardable";
    pub const PROXIABLE: &'static str = "proxiable";
    pub const CANONICALIZE: &'static str = "canonicalize";
    pub const TICKET_LIFETIME: &'static str = "ticket_lifetime";
    pub const RENEW_LIFETIME: &'static str = "renew_lifetime";
    pub const NOADDRESSES: &'static str = "noaddresses";
    pub const PREFERRED_PREAUTH_TYPES: &'static str = "preferred_preauth_types";
    pub const CLOCKSKEW: &'static str = "clockskew";
    pub const KDC_TIMESYNC: &'static str = "kdc_timesync";

    pub const DEFAULT_TICKET_LIFETIME_SECS: i64 = 86_400;
    pub const DEFAULT_RENEW_LIFETIME_SECS: i64 = 0;
    pub const DEFAULT_CLOCKSKEW_SECS: i32 = 300;
    pub const DEFAULT_PREFERRED_PREAUTH_TYPES: &'static str = "17, 16, 15, 14";
    pub const DEFAULT_KDC_TIMESYNC: bool = true;
}

/// A read-only source of `[libdefaults]`-shaped configuration. Implementations
/// back this with a real profile file, environment variables, or (in tests)
/// the bundled [`StaticProfile`].
pub trait Profile: Send + Sync {
    /// Resolve a string value for `key`, preferring the realm-scoped entry.
    fn get_string(&self, realm: &str, key: &str) -> Option<String>;

    /// Resolve and parse a boolean value, defaulting to `false` on anything
    /// unrecognized, matching `krb5_libdefault_boolean`'s historical leniency.
    fn get_bool(&self, realm: &str, key: &str) -> Option<bool> {
        self.get_string(realm, key).map(|v| parse_bool(&v))
    }

    /// Resolve and parse an integer value.
    fn get_int(&self, realm: &str, key: &str) -> Option<i64> {
        self.get_string(realm, key).and_then(|v| v.parse().ok())
    }
}

/// Case-insensitive boolean parsing matching the truthy/falsy word lists a
/// real profile parser accepts; anything else defaults to `false`.
pub fn parse_bool(value: &str) -> bool {
    const TRUE_WORDS: &[&str] = &["y", "yes", "true", "t", "1", "on"];
    const FALSE_WORDS: &[&str] = &["n", "no", "false", "nil", "0", "off"];
    let lower = value.to_ascii_lowercase();
    if TRUE_WORDS.contains(&lower.as_str()) {
        true
    } else if FALSE_WORDS.contains(&lower.as_str()) {
        false
    } else {
        false
    }
}

/// An in-memory `Profile` implementation: a realm-scoped table that falls
/// back to a global table, suitable for tests and small embeddings that
/// don't want to parse a real krb5.conf.
#[derive(Debug, Default, Clone)]
pub struct StaticProfile {
    global: HashMap<String, String>,
    per_realm: HashMap<String, HashMap<String, String>>,
}

impl StaticProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_global(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.global.insert(key.into(), value.into());
        self
    }

    pub fn set_realm(&mut self, realm: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.per_realm
            .entry(realm.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }
}

impl Profile for StaticProfile {
    fn get_string(&self, realm: &str, key: &str) -> Option<String> {
        self.per_realm
            .get(realm)
            .and_then(|m| m.get(key))
            .or_else(|| self.global.get(key))
            .cloned()
    }
}
