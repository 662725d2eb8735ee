//! Principal data model and the cross-realm rewriter (spec C3, §3).

use tracing::trace;

/// RFC 4120 `NameType` values the client cares about. Everything else is
/// preserved numerically but has no special handling.
pub const NT_PRINCIPAL: i32 = 1;
pub const NT_SRV_INST: i32 = 2;
pub const NT_SRV_HST: i32 = 3;
pub const NT_ENTERPRISE_PRINCIPAL: i32 = 10;

/// An ordered sequence of name components plus a realm. Equality is
/// component-wise and realm-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name_type: i32,
    pub components: Vec<String>,
    pub realm: String,
}

impl Principal {
    pub fn new(name_type: i32, components: Vec<String>, realm: impl Into<String>) -> Self {
        Principal {
            name_type,
            components,
            realm: realm.into(),
        }
    }

    /// `name@REALM` shaped enterprise principal (RFC 6806): a single
    /// component carrying the embedded "@realm".
    pub fn enterprise(upn: impl Into<String>, realm: impl Into<String>) -> Self {
        Principal::new(NT_ENTERPRISE_PRINCIPAL, vec![upn.into()], realm)
    }

    pub fn principal(name: impl Into<String>, realm: impl Into<String>) -> Self {
        Principal::new(NT_PRINCIPAL, vec![name.into()], realm)
    }

    /// `krbtgt/REALM@REALM`, the canonical TGT server principal for `realm`.
    pub fn krbtgt(realm: impl Into<String>) -> Self {
        let realm = realm.into();
        Principal::new(NT_SRV_INST, vec!["krbtgt".to_string(), realm.clone()], realm)
    }

    pub fn is_enterprise(&self) -> bool {
        self.name_type == NT_ENTERPRISE_PRINCIPAL
    }

    /// True when this principal is `krbtgt/<realm>@<realm>` for its own realm,
    /// i.e. it names a ticket-granting-service instance.
    pub fn is_tgs(&self) -> bool {
        self.components.len() == 2
            && self.components[0] == "krbtgt"
            && self.components[1] == self.realm
    }

    /// Concatenation of realm then each component, with no delimiters — the
    /// default Kerberos salt for a principal lacking an ETYPE-INFO2 hint.
    pub fn default_salt(&self) -> String {
        let mut salt = self.realm.clone();
        for component in &self.components {
            salt.push_str(component);
        }
        salt
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.components.join("/"), self.realm)
    }
}

/// Deep-copy `old_server`, replacing its realm with `new_realm`. When
/// `is_tgs` is true (the old server named a `krbtgt/REALM@REALM` instance)
/// the second name component is rewritten too, so a referral from `A.COM` to
/// `B.COM` turns `krbtgt/A.COM@A.COM` into `krbtgt/B.COM@B.COM` rather than
/// the nonsensical `krbtgt/A.COM@B.COM`.
pub fn rewrite_server_realm(old_server: &Principal, new_realm: &str, is_tgs: bool) -> Principal {
    let mut components = old_server.components.clone();
    if is_tgs && components.len() == 2 {
        components[1] = new_realm.to_string();
    }

    let rewritten = Principal::new(old_server.name_type, components, new_realm);
    trace!(?old_server, ?rewritten, "rewrote server realm for referral");
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tgs_detection() {
        let tgt = Principal::krbtgt("EXAMPLE.COM");
        assert!(tgt.is_tgs());

        let not_tgt = Principal::principal("alice", "EXAMPLE.COM");
        assert!(!not_tgt.is_tgs());
    }

    #[test]
    fn enterprise_detection() {
        let ent = Principal::enterprise("alice@EXAMPLE.COM", "EXAMPLE.COM");
        assert!(ent.is_enterprise());
        assert!(!Principal::principal("alice", "EXAMPLE.COM").is_enterprise());
    }

    #[test]
    fn rewrite_carries_tgs_component() {
        let old_server = Principal::krbtgt("A.EXAMPLE.COM");
        let rewritten = rewrite_server_realm(&old_server, "B.EXAMPLE.COM", true);

        assert_eq!(rewritten.realm, "B.EXAMPLE.COM");
        assert_eq!(rewritten.components, vec!["krbtgt", "B.EXAMPLE.COM"]);
        // Original is untouched.
        assert_eq!(old_server.realm, "A.EXAMPLE.COM");
    }

    #[test]
    fn rewrite_leaves_non_tgs_components_alone() {
        let old_server = Principal::principal("host/svc", "A.EXAMPLE.COM");
        let rewritten = rewrite_server_realm(&old_server, "B.EXAMPLE.COM", false);

        assert_eq!(rewritten.realm, "B.EXAMPLE.COM");
        assert_eq!(rewritten.components, old_server.components);
    }

    #[test]
    fn default_salt_concatenates_realm_then_components() {
        let principal = Principal::principal("alice", "EXAMPLE.COM");
        assert_eq!(principal.default_salt(), "EXAMPLE.COMalice");
    }
}
