//! Reply classifier, decryptor and validator (spec C9, C5, C4).

use tracing::{trace, warn};

use crate::crypto::{DerivedKey, ReplyDecryptor};
use crate::error::KrbError;
use crate::principal::Principal;
use crate::proto::{principal_from_wire, Request};
use crate::wire::{self, message_type, ticket_flags, KerberosFlags, PaData};

/// Key usage 3 (RFC 4120 §7.5.1): the AS-REP `enc-part`, encrypted under the
/// client's long-term key (or a pre-auth-derived one).
pub const KEY_USAGE_AS_REP_ENC_PART: i32 = 3;

/// A decoded KRB-ERROR, stripped to the fields the state machine consults.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub error_code: i32,
    pub client: Option<Principal>,
    pub e_data: Option<Vec<u8>>,
}

/// An AS-REP with its header fields decoded but `enc-part` still encrypted.
#[derive(Debug, Clone)]
pub struct AsRepInfo {
    pub client: Principal,
    pub server: Principal,
    pub ticket_server: Principal,
    pub ticket_bytes: Vec<u8>,
    pub padata: Vec<PaData>,
    pub(crate) enc_part: wire::EncryptedData,
}

/// The decrypted `EncASRepPart` (spec §3 "AS-REP").
#[derive(Debug, Clone)]
pub struct DecodedEncPart {
    pub session_key: DerivedKey,
    pub flags: KerberosFlags,
    pub server: Principal,
    pub authtime: i64,
    pub starttime: Option<i64>,
    pub endtime: i64,
    pub renew_till: Option<i64>,
    pub nonce: u32,
    pub caddr: Option<Vec<(i32, Vec<u8>)>>,
}

impl DecodedEncPart {
    pub fn is_renewable(&self) -> bool {
        wire::flag_is_set(&self.flags, ticket_flags::RENEWABLE)
    }
}

/// The outcome of classifying one raw KDC response (spec C9).
pub enum Classified {
    Error(ErrorInfo),
    AsRep(AsRepInfo),
}

/// Classify a raw response buffer as a KRB-ERROR or an AS-REP, per §4.10.
/// The Kerberos v4 heuristic (first byte `0x04`, second byte's low bit
/// clear and high nibble `5<<1`) must run before giving up as malformed, so
/// a v4 KDC's error doesn't get reported as an opaque decode failure.
pub fn classify(bytes: &[u8]) -> Result<Classified, KrbError> {
    if let Ok(err) = wire::decode_der::<wire::KrbError>(bytes) {
        trace!(error_code = err.error_code, "classified response as KRB-ERROR");
        let client = match (err.cname, err.crealm) {
            (Some(cname), Some(crealm)) => Some(principal_from_wire(cname, crealm)),
            _ => None,
        };
        return Ok(Classified::Error(ErrorInfo {
            error_code: err.error_code,
            client,
            e_data: err.e_data.map(|o| o.to_vec()),
        }));
    }

    if bytes.len() >= 2 && bytes[0] == 4 && (bytes[1] & !1) == (5 << 1) {
        warn!("response looks like a Kerberos v4 reply");
        return Err(KrbError::V4Reply);
    }

    let wire::AsRep(rep) = wire::decode_der::<wire::AsRep>(bytes).map_err(|_| KrbError::MalformedReply)?;

    if rep.msg_type != (message_type::AS_REP as i64).into() {
        return Err(KrbError::InvalidMessageType);
    }

    let client = principal_from_wire(rep.cname, rep.crealm);
    let ticket_server = principal_from_wire(rep.ticket.sname.clone(), rep.ticket.realm.clone());
    let server = ticket_server.clone();
    let ticket_bytes = wire::encode_der(&rep.ticket).map_err(|_| KrbError::DerEncodeRequest)?;

    trace!(?client, ?server, "classified response as AS-REP");

    Ok(Classified::AsRep(AsRepInfo {
        client,
        server,
        ticket_server,
        ticket_bytes,
        padata: rep.padata.unwrap_or_default(),
        enc_part: rep.enc_part,
    }))
}

/// Derive a salt from a principal per §4.5: realm then each component, no
/// delimiters.
pub fn default_salt(principal: &Principal) -> Vec<u8> {
    principal.default_salt().into_bytes()
}

/// Decrypt an AS-REP's `enc-part` under `key`, decoding the result as an
/// `EncASRepPart` (spec C5). Not idempotent by itself — the state machine
/// caches the result so a repeat call is a no-op, matching §3 invariant 6.
pub fn decrypt_enc_part(
    enc_part: &wire::EncryptedData,
    key: &DerivedKey,
    decryptor: &dyn ReplyDecryptor,
) -> Result<DecodedEncPart, KrbError> {
    let cipher = enc_part.cipher.to_vec();
    let plaintext = decryptor.decrypt(key, KEY_USAGE_AS_REP_ENC_PART, &cipher)?;

    let part: wire::EncKdcRepPart = wire::decode_der(&plaintext).map_err(|_| KrbError::DerDecodeEncKdcRepPart)?;

    let session_key = DerivedKey {
        etype: part.key.key_type,
        key: part.key.key_value.to_vec(),
    };
    let server = principal_from_wire(part.sname, part.srealm);

    Ok(DecodedEncPart {
        session_key,
        flags: part.flags,
        server,
        authtime: part.auth_time.to_unix_seconds(),
        starttime: part.start_time.map(|t| t.to_unix_seconds()),
        endtime: part.end_time.to_unix_seconds(),
        renew_till: part.renew_till.map(|t| t.to_unix_seconds()),
        nonce: part.nonce,
        caddr: part.caddr.map(|addrs| {
            addrs
                .into_iter()
                .map(|a| (a.addr_type, a.address.to_vec()))
                .collect()
        }),
    })
}

/// Enforce the reply validator's integrity/freshness/canonicalization rules
/// (spec C4, §4.6). `enc_part.starttime` is post-filled to `authtime` here
/// if the KDC omitted it; every other mismatch yields `KDCREP_MODIFIED` or
/// `KDCREP_SKEW`.
#[allow(clippy::too_many_arguments)]
pub fn validate_reply(
    request: &Request,
    as_rep: &AsRepInfo,
    enc_part: &mut DecodedEncPart,
    clockskew: i32,
    sync_kdctime: bool,
    now: i64,
    clock_offset: &mut i64,
) -> Result<(), KrbError> {
    if enc_part.starttime.is_none() {
        enc_part.starttime = Some(enc_part.authtime);
    }
    let starttime = enc_part.starttime.unwrap_or(enc_part.authtime);

    let canon_requested = request.kdc_options.canonicalize || request.client.is_enterprise();
    let canon_ok = canon_requested && request.server.is_tgs() && enc_part.server.is_tgs();

    if !canon_ok {
        if as_rep.client != request.client {
            warn!(?as_rep.client, ?request.client, "AS-REP client principal was rewritten without consent");
            return Err(KrbError::KdcRepModified);
        }
        if enc_part.server != request.server {
            warn!(?enc_part.server, ?request.server, "AS-REP server principal was rewritten without consent");
            return Err(KrbError::KdcRepModified);
        }
    }

    if enc_part.server != as_rep.ticket_server {
        return Err(KrbError::KdcRepModified);
    }

    if request.nonce != enc_part.nonce {
        return Err(KrbError::KdcRepModified);
    }

    if request.kdc_options.postdated && request.from != 0 && starttime != request.from {
        return Err(KrbError::KdcRepModified);
    }

    if request.till != 0 && enc_part.endtime > request.till {
        return Err(KrbError::KdcRepModified);
    }

    if request.kdc_options.renewable && request.rtime != 0 {
        if enc_part.renew_till.unwrap_or(0) > request.rtime {
            return Err(KrbError::KdcRepModified);
        }
    } else if request.kdc_options.renewable_ok
        && !request.kdc_options.renewable
        && enc_part.is_renewable()
        && request.till != 0
        && enc_part.renew_till.unwrap_or(0) > request.till
    {
        return Err(KrbError::KdcRepModified);
    }

    if sync_kdctime {
        *clock_offset = enc_part.authtime - now;
    } else if request.from == 0 && (starttime - now).abs() > clockskew as i64 {
        return Err(KrbError::KdcRepSkew);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::KdcOptions;

    fn base_request() -> Request {
        Request {
            client: Principal::principal("alice", "EXAMPLE.COM"),
            server: Principal::krbtgt("EXAMPLE.COM"),
            kdc_options: KdcOptions::default(),
            from: 0,
            till: 1_700_100_000,
            rtime: 0,
            nonce: 42,
            etypes: vec![18],
            addresses: None,
            padata: Vec::new(),
        }
    }

    fn base_enc_part(nonce: u32) -> DecodedEncPart {
        DecodedEncPart {
            session_key: DerivedKey { etype: 18, key: vec![0u8; 32] },
            flags: wire::flags_set(&[]),
            server: Principal::krbtgt("EXAMPLE.COM"),
            authtime: 1_700_000_000,
            starttime: Some(1_700_000_000),
            endtime: 1_700_086_400,
            renew_till: None,
            nonce,
            caddr: None,
        }
    }

    fn base_as_rep() -> AsRepInfo {
        AsRepInfo {
            client: Principal::principal("alice", "EXAMPLE.COM"),
            server: Principal::krbtgt("EXAMPLE.COM"),
            ticket_server: Principal::krbtgt("EXAMPLE.COM"),
            ticket_bytes: Vec::new(),
            padata: Vec::new(),
            enc_part: wire::EncryptedData { etype: 18, kvno: None, cipher: Vec::new().into() },
        }
    }

    #[test]
    fn rejects_nonce_mismatch() {
        let request = base_request();
        let as_rep = base_as_rep();
        let mut enc_part = base_enc_part(43);
        let mut offset = 0;
        let err = validate_reply(&request, &as_rep, &mut enc_part, 300, false, 1_700_000_000, &mut offset)
            .unwrap_err();
        assert!(matches!(err, KrbError::KdcRepModified));
    }

    #[test]
    fn accepts_matching_reply() {
        let request = base_request();
        let as_rep = base_as_rep();
        let mut enc_part = base_enc_part(42);
        let mut offset = 0;
        validate_reply(&request, &as_rep, &mut enc_part, 300, false, 1_700_000_000, &mut offset).unwrap();
    }

    #[test]
    fn rejects_canonicalization_without_consent() {
        let request = base_request();
        let mut as_rep = base_as_rep();
        as_rep.client = Principal::principal("alice", "OTHER.COM");
        let mut enc_part = base_enc_part(42);
        let mut offset = 0;
        let err = validate_reply(&request, &as_rep, &mut enc_part, 300, false, 1_700_000_000, &mut offset)
            .unwrap_err();
        assert!(matches!(err, KrbError::KdcRepModified));
    }

    #[test]
    fn rejects_clock_skew_when_not_syncing() {
        let mut request = base_request();
        request.from = 0;
        let as_rep = base_as_rep();
        let mut enc_part = base_enc_part(42);
        enc_part.starttime = Some(1_700_001_000);
        let mut offset = 0;
        let err = validate_reply(&request, &as_rep, &mut enc_part, 300, false, 1_700_000_000, &mut offset)
            .unwrap_err();
        assert!(matches!(err, KrbError::KdcRepSkew));
    }

    #[test]
    fn postfills_missing_starttime_from_authtime() {
        let request = base_request();
        let as_rep = base_as_rep();
        let mut enc_part = base_enc_part(42);
        enc_part.starttime = None;
        let mut offset = 0;
        validate_reply(&request, &as_rep, &mut enc_part, 300, false, 1_700_000_000, &mut offset).unwrap();
        assert_eq!(enc_part.starttime, Some(enc_part.authtime));
    }
}
