//! AS-REQ request initializer (spec C7, §4.8).
//!
//! Builds the initial [`super::Request`] aggregate from caller-supplied
//! options, falling back to realm/global [`Profile`](crate::config::Profile)
//! configuration, and finally to the hard-coded defaults in §6's table.

use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::trace;

use super::{KdcOptions, Request};
use crate::config::{Defaults, Profile};
use crate::error::KrbError;
use crate::principal::Principal;
use crate::wire::encryption_type;

/// Caller-supplied options for an AS-REQ. Every field is optional; when
/// unset the request initializer falls through to [`Profile`] lookups and
/// then to hard-coded defaults, per §4.8's precedence rule.
#[derive(Debug, Clone, Default)]
pub struct AsReqOptions {
    pub forwardable: Option<bool>,
    pub proxiable: Option<bool>,
    pub canonicalize: Option<bool>,
    pub ticket_lifetime_secs: Option<i64>,
    pub renew_lifetime_secs: Option<i64>,
    pub start_time: Option<i64>,
    pub noaddresses: Option<bool>,
    pub addresses: Option<Vec<(i32, Vec<u8>)>>,
    pub etypes: Option<Vec<i32>>,
    pub server: Option<Principal>,
}

/// The library's own supported enctypes, most preferred first. Used both as
/// the request default and as the filter a caller-supplied list is
/// reordered against.
pub const DEFAULT_ETYPES: &[i32] = &[encryption_type::AES256_CTS_HMAC_SHA1_96];

fn resolve_bool(explicit: Option<bool>, profile: &dyn Profile, realm: &str, key: &str, default: bool) -> bool {
    explicit
        .or_else(|| profile.get_bool(realm, key))
        .unwrap_or(default)
}

fn resolve_i64(explicit: Option<i64>, profile: &dyn Profile, realm: &str, key: &str, default: i64) -> i64 {
    explicit
        .or_else(|| profile.get_int(realm, key))
        .unwrap_or(default)
}

/// §4.8's `ktype` rule: keep only enctypes this library supports, preserving
/// the caller's preferred order, then append any library defaults the
/// caller didn't mention so a serviceable fallback always exists.
fn resolve_etypes(caller: Option<&[i32]>) -> Vec<i32> {
    let Some(caller) = caller else {
        return DEFAULT_ETYPES.to_vec();
    };

    let mut resolved: Vec<i32> = caller
        .iter()
        .copied()
        .filter(|e| DEFAULT_ETYPES.contains(e))
        .collect();

    for &default in DEFAULT_ETYPES {
        if !resolved.contains(&default) {
            resolved.push(default);
        }
    }
    resolved
}

/// §4.8's nonce rule: 31-bit unsigned drawn from a CSPRNG, falling back to
/// the wall-clock second count (masked to 31 bits) if the RNG is
/// unavailable — this crate's `rand::rngs::OsRng`-backed `thread_rng` is not
/// expected to fail in practice, but the fallback keeps the contract honest
/// for embedded/no-std-adjacent callers that might substitute a fallible RNG.
pub fn draw_nonce() -> u32 {
    let mut buf = [0u8; 4];
    match rand::thread_rng().try_fill_bytes(&mut buf) {
        Ok(()) => u32::from_be_bytes(buf) & 0x7fff_ffff,
        Err(_) => {
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            (secs as u32) & 0x7fff_ffff
        }
    }
}

/// Build the initial [`Request`] for `client`, applying §4.8's options
/// precedence. `server` defaults to `krbtgt/CLIENTREALM@CLIENTREALM` (a TGT
/// request) when the caller didn't name one explicitly.
///
/// §3 invariant 1: `client.realm == server.realm` on entry. The default
/// server is always same-realm by construction; a caller-supplied `server`
/// naming a different realm is rejected here rather than silently sent to
/// the wrong KDC — cross-realm routing only ever happens as a `WRONG_REALM`
/// referral the state machine follows explicitly (§4.11).
pub fn build_as_req(client: Principal, options: &AsReqOptions, profile: &dyn Profile) -> Result<Request, KrbError> {
    let realm = client.realm.clone();
    let server = options
        .server
        .clone()
        .unwrap_or_else(|| Principal::krbtgt(&realm));
    if server.realm != realm {
        return Err(KrbError::RealmMismatch);
    }

    let forwardable = resolve_bool(options.forwardable, profile, &realm, Defaults::FORWARDABLE, false);
    let proxiable = resolve_bool(options.proxiable, profile, &realm, Defaults::PROXIABLE, false);
    let canonicalize = resolve_bool(options.canonicalize, profile, &realm, Defaults::CANONICALIZE, false)
        || client.is_enterprise();

    let ticket_lifetime = resolve_i64(
        options.ticket_lifetime_secs,
        profile,
        &realm,
        Defaults::TICKET_LIFETIME,
        Defaults::DEFAULT_TICKET_LIFETIME_SECS,
    );
    let renew_lifetime = resolve_i64(
        options.renew_lifetime_secs,
        profile,
        &realm,
        Defaults::RENEW_LIFETIME,
        Defaults::DEFAULT_RENEW_LIFETIME_SECS,
    );

    let noaddresses = resolve_bool(options.noaddresses, profile, &realm, Defaults::NOADDRESSES, true);
    let addresses = if options.addresses.is_some() {
        options.addresses.clone()
    } else if noaddresses {
        None
    } else {
        // Populating OS-local addresses is an external concern (DNS/locator,
        // per spec §1); callers that want addresses supply them explicitly.
        None
    };

    let start_time = options.start_time.unwrap_or(0);
    let mut kdc_options = KdcOptions {
        forwardable,
        proxiable,
        canonicalize,
        renewable: renew_lifetime > 0,
        renewable_ok: renew_lifetime > 0,
        ..Default::default()
    };
    if start_time > 0 {
        kdc_options.allow_postdate = true;
        kdc_options.postdated = true;
    }

    let etypes = resolve_etypes(options.etypes.as_deref());

    trace!(?client, ?server, ?kdc_options, ticket_lifetime, renew_lifetime, "built AS-REQ skeleton");

    // `from`/`till`/`rtime` are plain second-counts here (a postdate offset, a
    // ticket lifetime, a renew lifetime) — the data model promises absolute
    // epoch seconds, but that anchor (`request_time`) isn't captured until
    // the state machine's first step (§4.11), which turns these into
    // absolute times via `addint32` before the request is ever serialized.
    Ok(Request {
        client,
        server,
        kdc_options,
        from: start_time,
        till: ticket_lifetime,
        rtime: if renew_lifetime > 0 { renew_lifetime } else { 0 },
        nonce: draw_nonce(),
        etypes,
        addresses,
        padata: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticProfile;
    use crate::wire::encryption_type;

    #[test]
    fn defaults_to_tgt_server_and_library_etypes() {
        let profile = StaticProfile::new();
        let client = Principal::principal("alice", "EXAMPLE.COM");
        let req = build_as_req(client, &AsReqOptions::default(), &profile).unwrap();

        assert_eq!(req.server, Principal::krbtgt("EXAMPLE.COM"));
        assert_eq!(req.etypes, vec![encryption_type::AES256_CTS_HMAC_SHA1_96]);
        assert_eq!(req.till, Defaults::DEFAULT_TICKET_LIFETIME_SECS);
        assert!(!req.kdc_options.forwardable);
    }

    #[test]
    fn caller_option_wins_over_profile() {
        let mut profile = StaticProfile::new();
        profile.set_global(Defaults::FORWARDABLE, "false");

        let client = Principal::principal("alice", "EXAMPLE.COM");
        let options = AsReqOptions {
            forwardable: Some(true),
            ..Default::default()
        };
        let req = build_as_req(client, &options, &profile).unwrap();
        assert!(req.kdc_options.forwardable);
    }

    #[test]
    fn profile_wins_over_hardcoded_default() {
        let mut profile = StaticProfile::new();
        profile.set_realm("EXAMPLE.COM", Defaults::PROXIABLE, "true");

        let client = Principal::principal("alice", "EXAMPLE.COM");
        let req = build_as_req(client, &AsReqOptions::default(), &profile).unwrap();
        assert!(req.kdc_options.proxiable);
    }

    #[test]
    fn enterprise_client_forces_canonicalize() {
        let profile = StaticProfile::new();
        let client = Principal::enterprise("alice@EXAMPLE.COM", "EXAMPLE.COM");
        let req = build_as_req(client, &AsReqOptions::default(), &profile).unwrap();
        assert!(req.kdc_options.canonicalize);
    }

    #[test]
    fn start_time_sets_postdate_options() {
        let profile = StaticProfile::new();
        let client = Principal::principal("alice", "EXAMPLE.COM");
        let options = AsReqOptions {
            start_time: Some(1_700_000_000),
            ..Default::default()
        };
        let req = build_as_req(client, &options, &profile).unwrap();
        assert!(req.kdc_options.allow_postdate);
        assert!(req.kdc_options.postdated);
    }

    #[test]
    fn caller_etypes_are_filtered_and_library_default_appended() {
        let profile = StaticProfile::new();
        let client = Principal::principal("alice", "EXAMPLE.COM");
        let options = AsReqOptions {
            etypes: Some(vec![999, encryption_type::AES256_CTS_HMAC_SHA1_96]),
            ..Default::default()
        };
        let req = build_as_req(client, &options, &profile).unwrap();
        assert_eq!(req.etypes, vec![encryption_type::AES256_CTS_HMAC_SHA1_96]);
    }

    #[test]
    fn nonce_is_31_bits() {
        for _ in 0..16 {
            assert!(draw_nonce() <= 0x7fff_ffff);
        }
    }

    #[test]
    fn explicit_cross_realm_server_is_rejected() {
        let profile = StaticProfile::new();
        let client = Principal::principal("alice", "EXAMPLE.COM");
        let options = AsReqOptions {
            server: Some(Principal::krbtgt("OTHER.COM")),
            ..Default::default()
        };
        let err = build_as_req(client, &options, &profile).unwrap_err();
        assert!(matches!(err, crate::error::KrbError::RealmMismatch));
    }
}
