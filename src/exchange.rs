//! The AS-exchange state machine (spec C10, §4.11).
//!
//! Drives one client through AS-REQ/AS-REP, handling pre-auth negotiation,
//! cross-realm referrals and the RESPONSE_TOO_BIG UDP-to-TCP upgrade, without
//! itself touching a socket — [`AsExchange::step`] takes the last raw
//! response (if any) and returns either the next request to send or the
//! finished credential. A caller (or the convenience driver in
//! [`crate::transport`]) owns the actual network round trip.

use tracing::{info, warn};

use crate::config::{Defaults, Profile};
use crate::crypto::{GetAsKey, ReplyDecryptor};
use crate::creds::{stash_credentials, Credential, CredentialCache};
use crate::error::KrbError;
use crate::fast::FastArmor;
use crate::preauth::{parse_preauth_hints, PreauthRegistry};
use crate::principal::{rewrite_server_realm, Principal};
use crate::proto::{build_as_req, draw_nonce, AsReqOptions, Request};
use crate::reply::{classify, decrypt_enc_part, validate_reply, AsRepInfo, Classified, ErrorInfo};
use crate::time::{addint32, parse_preauth_preference, sort_padata_by_preference};
use crate::wire::{self, error_code, pa_data_type, PaData};

/// RFC draft-ietf-krb-wg-kerberos-referrals / MIT krb5's
/// `KRB5_REFERRAL_MAXHOPS`: a referral chain longer than this is treated as
/// a misconfigured or hostile KDC loop rather than followed further.
pub const MAX_REFERRAL_HOPS: u32 = 5;

/// libkrb5's historical bound on AS-REQ retries within one `get_in_tkt`
/// call, guarding against a KDC that keeps demanding "just one more"
/// pre-auth round.
pub const MAX_IN_TKT_LOOPS: u32 = 16;

/// Where an [`AsExchange`] is in its lifecycle. Exposed for callers that want
/// to assert on progress; the state machine itself only branches on whether
/// [`AsExchange::step`] has produced [`StepResult::Complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    NeedRequest,
    AwaitReply,
    Complete,
    Failed,
}

/// What [`AsExchange::step`] wants the caller to do next.
pub enum StepResult {
    /// Send `bytes` to the KDC for `realm`, then call `step` again with the
    /// response. `force_tcp` is set after a `RESPONSE_TOO_BIG` KRB-ERROR:
    /// the caller must resend this exact buffer over TCP, not UDP.
    SendRequest {
        bytes: Vec<u8>,
        realm: String,
        force_tcp: bool,
    },
    /// The exchange finished successfully.
    Complete(Box<Credential>),
}

/// Capabilities the state machine needs but does not implement itself
/// (spec §1's external collaborators, bundled as a capability record per
/// the REDESIGN FLAGS note on "callback soup").
pub struct AsExchangeDeps<'a> {
    pub profile: &'a dyn Profile,
    pub preauth: &'a PreauthRegistry,
    pub fast: &'a dyn FastArmor,
    pub reply_decryptor: &'a dyn ReplyDecryptor,
    pub get_as_key: &'a dyn GetAsKey,
    pub cache: Option<&'a dyn CredentialCache>,
}

/// The mutable context driving one AS-REQ/AS-REP negotiation to completion.
pub struct AsExchange<'a> {
    request: Request,
    state: State,

    preauth_to_use: Vec<PaData>,
    err_reply: Option<ErrorInfo>,
    salt: Option<Vec<u8>>,
    s2kparams: Option<Vec<u8>>,
    etype: Option<i32>,

    last_request_bytes: Option<Vec<u8>>,
    loopcount: u32,
    referral_count: u32,
    request_time: Option<i64>,
    clock_offset: i64,
    clockskew: i32,
    sync_kdctime: bool,

    deps: AsExchangeDeps<'a>,
}

impl<'a> AsExchange<'a> {
    pub fn new(client: Principal, options: &AsReqOptions, deps: AsExchangeDeps<'a>) -> Result<Self, KrbError> {
        let request = build_as_req(client, options, deps.profile)?;
        let clockskew = deps
            .profile
            .get_int(&request.client.realm, Defaults::CLOCKSKEW)
            .map(|v| v as i32)
            .unwrap_or(Defaults::DEFAULT_CLOCKSKEW_SECS);
        let sync_kdctime = deps
            .profile
            .get_bool(&request.client.realm, Defaults::KDC_TIMESYNC)
            .unwrap_or(Defaults::DEFAULT_KDC_TIMESYNC);

        Ok(AsExchange {
            request,
            state: State::NeedRequest,
            preauth_to_use: Vec::new(),
            err_reply: None,
            salt: None,
            s2kparams: None,
            etype: None,
            last_request_bytes: None,
            loopcount: 0,
            referral_count: 0,
            request_time: None,
            clock_offset: 0,
            clockskew,
            sync_kdctime,
            deps,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Advance the exchange. `response` is `None` on the very first call
    /// (nothing has been sent yet) and `Some(bytes)` on every call after,
    /// carrying the KDC's last raw reply.
    pub fn step(&mut self, response: Option<&[u8]>) -> Result<StepResult, KrbError> {
        if self.state == State::Complete {
            return Err(KrbError::InvalidMessageDirection);
        }

        if let Some(bytes) = response {
            self.state = State::AwaitReply;
            match classify(bytes)? {
                Classified::Error(err) if err.error_code == error_code::KRB_ERR_RESPONSE_TOO_BIG => {
                    let bytes = self
                        .last_request_bytes
                        .clone()
                        .ok_or(KrbError::MalformedReply)?;
                    info!("KDC asked for TCP retry (RESPONSE_TOO_BIG), resending without counting a loop");
                    return Ok(StepResult::SendRequest {
                        bytes,
                        realm: self.request.client.realm.clone(),
                        force_tcp: true,
                    });
                }
                Classified::Error(err) => {
                    if let Err(e) = self.handle_error(err) {
                        self.state = State::Failed;
                        return Err(e);
                    }
                }
                Classified::AsRep(as_rep) => {
                    return match self.finalize(as_rep) {
                        Ok(credential) => {
                            self.state = State::Complete;
                            Ok(StepResult::Complete(Box::new(credential)))
                        }
                        Err(e) => {
                            self.state = State::Failed;
                            Err(e)
                        }
                    };
                }
            }
        }

        match self.build_next_request() {
            Ok(result) => {
                self.state = State::AwaitReply;
                Ok(result)
            }
            Err(e) => {
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    fn preauth_preference(&self) -> Vec<i32> {
        let raw = self
            .deps
            .profile
            .get_string(&self.request.client.realm, Defaults::PREFERRED_PREAUTH_TYPES)
            .unwrap_or_else(|| Defaults::DEFAULT_PREFERRED_PREAUTH_TYPES.to_string());
        parse_preauth_preference(&raw)
    }

    fn handle_error(&mut self, err: ErrorInfo) -> Result<(), KrbError> {
        match err.error_code {
            code if code == error_code::KDC_ERR_PREAUTH_REQUIRED => {
                let e_data = err.e_data.as_deref().ok_or(KrbError::MissingPaData)?;
                let methoddata: wire::MethodData =
                    wire::decode_der(e_data).map_err(|_| KrbError::DerDecodePaData)?;
                self.preauth_to_use = methoddata;
                let preference = self.preauth_preference();
                sort_padata_by_preference(&mut self.preauth_to_use, &preference, |p| p.padata_type);
                self.adopt_etype_info2_hint()?;
                self.err_reply = Some(err);
                Ok(())
            }
            code if code == error_code::KDC_ERR_WRONG_REALM
                && (self.request.kdc_options.canonicalize || self.request.client.is_enterprise()) =>
            {
                if self.referral_count >= MAX_REFERRAL_HOPS {
                    return Err(KrbError::ReferralLoop);
                }
                let new_realm = err
                    .client
                    .as_ref()
                    .map(|c| c.realm.clone())
                    .ok_or(KrbError::WrongRealm)?;
                if new_realm == self.request.client.realm {
                    return Err(KrbError::ReferralLoop);
                }
                let is_tgt = self.request.is_tgt_request();
                warn!(old_realm = %self.request.client.realm, new_realm, "following cross-realm referral");
                self.request.client.realm = new_realm.clone();
                self.request.server = rewrite_server_realm(&self.request.server, &new_realm, is_tgt);
                self.referral_count += 1;
                self.err_reply = Some(err);
                Ok(())
            }
            code if code == error_code::KDC_ERR_C_PRINCIPAL_UNKNOWN => {
                Err(KrbError::PrincipalUnknown(self.request.client.to_string()))
            }
            other => {
                let (fast_padata, fast_retry) = self.deps.fast.process_error(&err);
                if fast_retry {
                    self.request.padata = fast_padata;
                    self.err_reply = Some(err);
                    return Ok(());
                }
                if !self.preauth_to_use.is_empty() {
                    self.err_reply = Some(err);
                    return Ok(());
                }
                Err(KrbError::KdcError(other))
            }
        }
    }

    /// Pull `salt`/`s2kparams`/`etype` out of any `PA-ETYPE-INFO2` hint in
    /// `preauth_to_use`, so a later `as_key` derivation uses the KDC's
    /// stated parameters instead of the principal's default salt.
    fn adopt_etype_info2_hint(&mut self) -> Result<(), KrbError> {
        let hints = parse_preauth_hints(&self.preauth_to_use)?;
        if let Some(entry) = hints.etype_info2.first() {
            self.salt = entry.salt.as_ref().map(|s| s.to_string().into_bytes());
            self.s2kparams = entry.s2kparams.as_ref().map(|p| p.to_vec());
            self.etype = Some(entry.etype);
        }
        Ok(())
    }

    fn build_next_request(&mut self) -> Result<StepResult, KrbError> {
        self.loopcount += 1;
        if self.loopcount > MAX_IN_TKT_LOOPS {
            return Err(KrbError::GetInTktLoop);
        }

        if self.loopcount == 1 {
            let request_time = now_unix_seconds();
            self.request_time = Some(request_time);
            self.finalize_times(request_time);
            self.deps.fast.armor(&mut self.request);
        }

        // §3 invariant 4 / §4.8: the nonce is freshly drawn per attempt, not
        // reused across pre-auth retries or referrals.
        self.request.nonce = draw_nonce();

        self.preauth_prep()?;

        let as_req = self.request.to_wire()?;
        let bytes = wire::encode_der(&as_req).map_err(|_| KrbError::DerEncodeRequest)?;
        let bytes = self.deps.fast.prep_req_body(&bytes);
        self.last_request_bytes = Some(bytes.clone());

        Ok(StepResult::SendRequest {
            bytes,
            realm: self.request.client.realm.clone(),
            force_tcp: false,
        })
    }

    /// §4.11 step 2: anchor the durations `build_as_req` resolved (ticket
    /// lifetime, postdate offset, renew lifetime — still sitting in
    /// `request.till`/`from`/`rtime` as plain seconds-counts) onto the
    /// request time captured for this attempt, turning them into the
    /// absolute `KerberosTime`s the data model promises. Runs once, on the
    /// first loop iteration, so a pre-auth retry reuses the same anchor
    /// rather than drifting forward on every round trip.
    ///
    /// `from = addint32(request_time, start_time)` per §4.1/§4.11 — even when
    /// `start_time == 0` this is `request_time`, and `rtime` is anchored off
    /// that value. The wire-encoded `from` is still omitted (left `0`) when no
    /// postdating was requested, matching `to_wire_body`'s `if self.from != 0`
    /// convention; only the arithmetic anchor, not the emitted field, always
    /// equals `request_time`.
    fn finalize_times(&mut self, request_time: i64) {
        let start_offset = self.request.from;
        let anchor_from = addint32(request_time as i32, start_offset as i32) as i64;
        self.request.from = if start_offset != 0 { anchor_from } else { 0 };

        let ticket_lifetime = self.request.till;
        self.request.till = addint32(request_time as i32, ticket_lifetime as i32) as i64;

        if self.request.rtime > 0 {
            let renew_life = self.request.rtime;
            let mut rtime = addint32(anchor_from as i32, renew_life as i32) as i64;
            if self.request.till != 0 && rtime < self.request.till {
                rtime = self.request.till;
            }
            self.request.rtime = rtime;
        }
    }

    fn preauth_prep(&mut self) -> Result<(), KrbError> {
        if self.preauth_to_use.is_empty() {
            self.request.padata.clear();
            return Ok(());
        }

        let hints = parse_preauth_hints(&self.preauth_to_use)?;
        let mechanism = self
            .preauth_to_use
            .iter()
            .find_map(|p| self.deps.preauth.find(p.padata_type))
            .ok_or(KrbError::PreauthUnsupported)?;

        let salt = self
            .salt
            .clone()
            .unwrap_or_else(|| self.request.client.default_salt().into_bytes());
        let request_time = self.request_time.unwrap_or(0);

        let padata = mechanism.prepare(
            &hints,
            &salt,
            request_time,
            0,
            self.deps.get_as_key,
            self.deps.reply_decryptor,
        )?;

        let mut out = vec![padata];
        if let Some(cookie) = &hints.fx_cookie {
            out.push(PaData {
                padata_type: pa_data_type::PA_FX_COOKIE,
                padata_value: cookie.clone().into(),
            });
        }
        self.request.padata = out;
        Ok(())
    }

    fn finalize(&mut self, as_rep: AsRepInfo) -> Result<Credential, KrbError> {
        let strengthen_key = self.deps.fast.strengthen_key_from_reply(&as_rep);

        let preference = self.preauth_preference();
        let mut padata = as_rep.padata.clone();
        sort_padata_by_preference(&mut padata, &preference, |p| p.padata_type);

        if self.etype.is_none() {
            if let Ok(hints) = parse_preauth_hints(&padata) {
                if let Some(entry) = hints.etype_info2.first() {
                    self.salt = entry.salt.as_ref().map(|s| s.to_string().into_bytes());
                    self.s2kparams = entry.s2kparams.as_ref().map(|p| p.to_vec());
                    self.etype = Some(entry.etype);
                }
            }
        }

        let salt = self
            .salt
            .clone()
            .unwrap_or_else(|| self.request.client.default_salt().into_bytes());
        let etype = self
            .etype
            .unwrap_or_else(|| *self.request.etypes.first().unwrap_or(&wire::encryption_type::AES256_CTS_HMAC_SHA1_96));

        let as_key = self.deps.get_as_key.get_as_key(&salt, self.s2kparams.as_deref(), etype)?;
        let encrypting_key = self.deps.fast.reply_key(strengthen_key.as_ref(), &as_key);

        let mut enc_part = match decrypt_enc_part(&as_rep.enc_part, &encrypting_key, self.deps.reply_decryptor) {
            Ok(part) => part,
            Err(_) => {
                // One retry: re-invoke GAK (it may prompt the caller again /
                // pick a different salt) and try once more.
                let as_key = self.deps.get_as_key.get_as_key(&salt, self.s2kparams.as_deref(), etype)?;
                let encrypting_key = self.deps.fast.reply_key(strengthen_key.as_ref(), &as_key);
                decrypt_enc_part(&as_rep.enc_part, &encrypting_key, self.deps.reply_decryptor)?
            }
        };

        validate_reply(
            &self.request,
            &as_rep,
            &mut enc_part,
            self.clockskew,
            self.sync_kdctime,
            now_unix_seconds(),
            &mut self.clock_offset,
        )?;

        stash_credentials(&as_rep, &enc_part, self.deps.cache)
    }
}

fn now_unix_seconds() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticProfile;
    use crate::crypto::Aes256CtsHmacSha1;
    use crate::creds::MemoryCredentialCache;
    use crate::fast::NoFast;

    fn deps<'a>(
        profile: &'a StaticProfile,
        preauth: &'a PreauthRegistry,
        fast: &'a NoFast,
        deriver: &'a Aes256CtsHmacSha1,
        gak: &'a dyn GetAsKey,
        cache: &'a MemoryCredentialCache,
    ) -> AsExchangeDeps<'a> {
        AsExchangeDeps {
            profile,
            preauth,
            fast,
            reply_decryptor: deriver,
            get_as_key: gak,
            cache: Some(cache),
        }
    }

    #[test]
    fn first_step_with_no_response_emits_a_request() {
        let profile = StaticProfile::new();
        let preauth = PreauthRegistry::default();
        let fast = NoFast;
        let deriver = Aes256CtsHmacSha1;
        use crate::crypto::PassphraseKey;
        let gak = PassphraseKey::new(b"password".to_vec(), &deriver);
        let cache = MemoryCredentialCache::new();

        let client = Principal::principal("alice", "EXAMPLE.COM");
        let mut exchange = AsExchange::new(
            client,
            &AsReqOptions::default(),
            deps(&profile, &preauth, &fast, &deriver, &gak, &cache),
        )
        .unwrap();

        match exchange.step(None).unwrap() {
            StepResult::SendRequest { bytes, force_tcp, .. } => {
                assert!(!bytes.is_empty());
                assert!(!force_tcp);
            }
            StepResult::Complete(_) => panic!("should not complete on the first step"),
        }
        assert_eq!(exchange.state(), State::AwaitReply);
    }

    #[test]
    fn referral_loop_bound_is_enforced() {
        let profile = StaticProfile::new();
        let preauth = PreauthRegistry::default();
        let fast = NoFast;
        let deriver = Aes256CtsHmacSha1;
        use crate::crypto::PassphraseKey;
        let gak = PassphraseKey::new(b"password".to_vec(), &deriver);
        let cache = MemoryCredentialCache::new();

        let mut client = Principal::principal("alice", "A.EXAMPLE.COM");
        client.name_type = crate::principal::NT_ENTERPRISE_PRINCIPAL;
        let mut exchange = AsExchange::new(
            client,
            &AsReqOptions::default(),
            deps(&profile, &preauth, &fast, &deriver, &gak, &cache),
        )
        .unwrap();

        exchange.step(None).unwrap();

        for hop in 0..=MAX_REFERRAL_HOPS {
            let err = ErrorInfo {
                error_code: error_code::KDC_ERR_WRONG_REALM,
                client: Some(Principal::principal("alice", format!("REALM{hop}.COM"))),
                e_data: None,
            };
            let bytes = wire::encode_der(&to_wire_error(&err)).unwrap();
            let result = exchange.step(Some(&bytes));
            if hop == MAX_REFERRAL_HOPS {
                assert!(matches!(result, Err(KrbError::ReferralLoop)));
            } else {
                assert!(result.is_ok());
            }
        }
    }

    fn to_wire_error(err: &ErrorInfo) -> wire::KrbError {
        wire::KrbError {
            pvno: 5.into(),
            msg_type: (wire::message_type::KRB_ERROR as i64).into(),
            ctime: None,
            cusec: None,
            stime: wire::KerberosTime::from_unix_seconds(1_700_000_000).unwrap(),
            susec: 0.into(),
            error_code: err.error_code,
            crealm: err.client.as_ref().map(|c| wire::Realm(wire::KerberosString::new(c.realm.clone()).unwrap())),
            cname: err.client.as_ref().map(|c| wire::PrincipalName {
                name_type: c.name_type,
                name_string: c
                    .components
                    .iter()
                    .map(|s| wire::KerberosString::new(s.clone()).unwrap())
                    .collect(),
            }),
            realm: wire::Realm(wire::KerberosString::new("EXAMPLE.COM").unwrap()),
            sname: wire::PrincipalName {
                name_type: crate::principal::NT_SRV_INST,
                name_string: vec![
                    wire::KerberosString::new("krbtgt").unwrap(),
                    wire::KerberosString::new("EXAMPLE.COM").unwrap(),
                ],
            },
            e_text: None,
            e_data: err.e_data.clone().map(|d| d.into()),
        }
    }
}
