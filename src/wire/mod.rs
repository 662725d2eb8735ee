//! RFC 4120 wire shapes (spec C12).
//!
//! This is the one place the crate speaks raw ASN.1 APPLICATION/context
//! tags. Everything in the rest of the crate works against these typed
//! structures; nothing above this module parses a tag number by hand. The
//! ASN.1 *codec itself* is out of scope for this crate (spec §1) — we lean
//! on `rasn`'s derive macros and DER codec rather than hand-rolling one.

use rasn::prelude::*;

pub type KerberosFlags = BitString;
pub type KerberosString = Ia5String;
pub type MethodData = SequenceOf<PaData>;
pub type HostAddresses = SequenceOf<HostAddress>;

#[derive(AsnType, Decode, Encode, Debug, Clone)]
pub struct Realm(pub KerberosString);

#[derive(AsnType, Decode, Encode, Debug, Clone)]
pub struct PrincipalName {
    #[rasn(tag(0))]
    pub name_type: i32,
    #[rasn(tag(1))]
    pub name_string: SequenceOf<KerberosString>,
}

#[derive(AsnType, Decode, Encode, Debug, Clone)]
#[rasn(delegate)]
pub struct KerberosTime(pub GeneralizedTime);

impl KerberosTime {
    /// Build a `KerberosTime` from whole seconds since the Unix epoch.
    /// `KerberosTime` carries no sub-second precision (RFC 4120 §5.2.3).
    pub fn from_unix_seconds(secs: i64) -> Result<Self, crate::error::KrbError> {
        use chrono::{TimeZone, Utc};
        Utc.timestamp_opt(secs, 0)
            .single()
            .map(|dt| KerberosTime(dt.fixed_offset()))
            .ok_or(crate::error::KrbError::PreauthInvalidUnixTs)
    }

    /// Seconds since the Unix epoch this timestamp represents.
    pub fn to_unix_seconds(&self) -> i64 {
        self.0.timestamp()
    }
}

#[derive(AsnType, Decode, Encode, Debug, Clone)]
pub struct HostAddress {
    #[rasn(tag(0))]
    pub addr_type: i32,
    #[rasn(tag(1))]
    pub address: OctetString,
}

#[derive(AsnType, Decode, Encode, Debug, Clone)]
pub struct PaData {
    #[rasn(tag(1))]
    pub padata_type: i32,
    #[rasn(tag(2))]
    pub padata_value: OctetString,
}

#[derive(AsnType, Decode, Encode, Debug, Clone)]
pub struct EncryptedData {
    #[rasn(tag(0))]
    pub etype: i32,
    #[rasn(tag(1))]
    pub kvno: Option<u32>,
    #[rasn(tag(2))]
    pub cipher: OctetString,
}

#[derive(AsnType, Decode, Encode, Debug, Clone)]
pub struct EncryptionKey {
    #[rasn(tag(0))]
    pub key_type: i32,
    #[rasn(tag(1))]
    pub key_value: OctetString,
}

#[derive(AsnType, Decode, Encode, Debug, Clone)]
#[rasn(tag(application, 1))]
pub struct Ticket {
    #[rasn(tag(0))]
    pub tkt_vno: Integer,
    #[rasn(tag(1))]
    pub realm: Realm,
    #[rasn(tag(2))]
    pub sname: PrincipalName,
    #[rasn(tag(3))]
    pub enc_part: EncryptedData,
}

#[derive(AsnType, Decode, Encode, Debug, Clone)]
pub struct KdcReqBody {
    #[rasn(tag(0))]
    pub kdc_options: KerberosFlags,
    #[rasn(tag(1))]
    pub cname: Option<PrincipalName>,
    #[rasn(tag(2))]
    pub realm: Realm,
    #[rasn(tag(3))]
    pub sname: Option<PrincipalName>,
    #[rasn(tag(4))]
    pub from: Option<KerberosTime>,
    #[rasn(tag(5))]
    pub till: KerberosTime,
    #[rasn(tag(6))]
    pub rtime: Option<KerberosTime>,
    #[rasn(tag(7))]
    pub nonce: u32,
    #[rasn(tag(8))]
    pub etype: SequenceOf<i32>,
    #[rasn(tag(9))]
    pub addresses: Option<HostAddresses>,
    #[rasn(tag(10))]
    pub enc_authorization_data: Option<EncryptedData>,
    #[rasn(tag(11))]
    pub additional_tickets: Option<SequenceOf<Ticket>>,
}

#[derive(AsnType, Decode, Encode, Debug, Clone)]
pub struct KdcReq {
    #[rasn(tag(1))]
    pub pvno: Integer,
    #[rasn(tag(2))]
    pub msg_type: Integer,
    #[rasn(tag(3))]
    pub padata: Option<SequenceOf<PaData>>,
    #[rasn(tag(4))]
    pub req_body: KdcReqBody,
}

#[derive(AsnType, Decode, Encode, Debug, Clone)]
#[rasn(tag(application, 10), delegate)]
pub struct AsReq(pub KdcReq);

#[derive(AsnType, Decode, Encode, Debug, Clone)]
pub struct KdcRep {
    #[rasn(tag(0))]
    pub pvno: Integer,
    #[rasn(tag(1))]
    pub msg_type: Integer,
    #[rasn(tag(2))]
    pub padata: Option<SequenceOf<PaData>>,
    #[rasn(tag(3))]
    pub crealm: Realm,
    #[rasn(tag(4))]
    pub cname: PrincipalName,
    #[rasn(tag(5))]
    pub ticket: Ticket,
    #[rasn(tag(6))]
    pub enc_part: EncryptedData,
}

#[derive(AsnType, Decode, Encode, Debug, Clone)]
#[rasn(tag(application, 11), delegate)]
pub struct AsRep(pub KdcRep);

#[derive(AsnType, Decode, Encode, Debug, Clone)]
pub struct EncKdcRepPart {
    #[rasn(tag(0))]
    pub key: EncryptionKey,
    #[rasn(tag(1))]
    pub last_req: SequenceOf<LastReqItem>,
    #[rasn(tag(2))]
    pub nonce: u32,
    #[rasn(tag(3))]
    pub key_expiration: Option<KerberosTime>,
    #[rasn(tag(4))]
    pub flags: KerberosFlags,
    #[rasn(tag(5))]
    pub auth_time: KerberosTime,
    #[rasn(tag(6))]
    pub start_time: Option<KerberosTime>,
    #[rasn(tag(7))]
    pub end_time: KerberosTime,
    #[rasn(tag(8))]
    pub renew_till: Option<KerberosTime>,
    #[rasn(tag(9))]
    pub srealm: Realm,
    #[rasn(tag(10))]
    pub sname: PrincipalName,
    #[rasn(tag(11))]
    pub caddr: Option<HostAddresses>,
}

#[derive(AsnType, Decode, Encode, Debug, Clone)]
#[rasn(tag(application, 25), delegate)]
pub struct EncAsRepPart(pub EncKdcRepPart);

#[derive(AsnType, Decode, Encode, Debug, Clone)]
pub struct LastReqItem {
    #[rasn(tag(0))]
    pub lr_type: i32,
    #[rasn(tag(1))]
    pub lr_value: KerberosTime,
}

#[derive(AsnType, Decode, Encode, Debug, Clone)]
#[rasn(tag(application, 30))]
pub struct KrbError {
    #[rasn(tag(0))]
    pub pvno: Integer,
    #[rasn(tag(1))]
    pub msg_type: Integer,
    #[rasn(tag(2))]
    pub ctime: Option<KerberosTime>,
    #[rasn(tag(3))]
    pub cusec: Option<Integer>,
    #[rasn(tag(4))]
    pub stime: KerberosTime,
    #[rasn(tag(5))]
    pub susec: Integer,
    #[rasn(tag(6))]
    pub error_code: i32,
    #[rasn(tag(7))]
    pub crealm: Option<Realm>,
    #[rasn(tag(8))]
    pub cname: Option<PrincipalName>,
    #[rasn(tag(9))]
    pub realm: Realm,
    #[rasn(tag(10))]
    pub sname: PrincipalName,
    #[rasn(tag(11))]
    pub e_text: Option<KerberosString>,
    #[rasn(tag(12))]
    pub e_data: Option<OctetString>,
}

#[derive(AsnType, Decode, Encode, Debug, Clone)]
pub struct PaEncTsEnc {
    #[rasn(tag(0))]
    pub patimestamp: KerberosTime,
    #[rasn(tag(1))]
    pub pausec: Option<Integer>,
}

#[derive(AsnType, Decode, Encode, Debug, Clone)]
pub struct EtypeInfo2Entry {
    #[rasn(tag(0))]
    pub etype: i32,
    #[rasn(tag(1))]
    pub salt: Option<KerberosString>,
    #[rasn(tag(2))]
    pub s2kparams: Option<OctetString>,
}

pub type EtypeInfo2 = SequenceOf<EtypeInfo2Entry>;

/// RFC 4120 message type numbers this client sends or must recognize.
pub mod message_type {
    pub const AS_REQ: i32 = 10;
    pub const AS_REP: i32 = 11;
    pub const KRB_ERROR: i32 = 30;
}

/// A subset of RFC 4120 §7.5.9 error codes the state machine treats specially.
pub mod error_code {
    pub const KDC_ERR_PREAUTH_REQUIRED: i32 = 25;
    pub const KDC_ERR_WRONG_REALM: i32 = 68;
    pub const KDC_ERR_C_PRINCIPAL_UNKNOWN: i32 = 6;
    pub const KRB_ERR_RESPONSE_TOO_BIG: i32 = 52;
}

/// A subset of RFC 4120 §7.5.4 pre-authentication data types.
pub mod pa_data_type {
    pub const PA_TGS_REQ: i32 = 1;
    pub const PA_ENC_TIMESTAMP: i32 = 2;
    pub const PA_ETYPE_INFO2: i32 = 19;
    pub const PA_FX_COOKIE: i32 = 133;
    pub const PA_FX_FAST: i32 = 136;
}

/// RFC 3962 / RFC 8429 encryption type identifiers this client is aware of.
pub mod encryption_type {
    pub const AES256_CTS_HMAC_SHA1_96: i32 = 18;
    pub const AES128_CTS_HMAC_SHA1_96: i32 = 17;
}

/// `KDCOptions` / `TicketFlags` bit positions (RFC 4120 §5.4.1, big-endian bit
/// numbering: bit 0 is the high-order bit of the `BIT STRING`).
pub mod kdc_options {
    pub const FORWARDABLE: usize = 1;
    pub const PROXIABLE: usize = 3;
    pub const ALLOW_POSTDATE: usize = 5;
    pub const POSTDATED: usize = 6;
    pub const RENEWABLE: usize = 8;
    pub const CANONICALIZE: usize = 15;
    pub const RENEWABLE_OK: usize = 27;
}

/// `TicketFlags` bit positions that matter to the reply validator (RFC 4120
/// §5.4.1, same big-endian bit numbering as `kdc_options`).
pub mod ticket_flags {
    pub const RENEWABLE: usize = 8;
}

/// A minimum-length big-endian `BIT STRING` backing store for `KDCOptions` /
/// `TicketFlags`, built and read bit-by-bit with RFC 4120's numbering (bit 0
/// is the high-order bit of the first octet).
pub fn flags_set(bits: &[usize]) -> KerberosFlags {
    let highest = bits.iter().copied().max().unwrap_or(0);
    let nbytes = highest / 8 + 1;
    let mut bytes = vec![0u8; nbytes.max(4)];
    for &pos in bits {
        bytes[pos / 8] |= 0x80 >> (pos % 8);
    }
    KerberosFlags::from_vec(bytes)
}

pub fn flag_is_set(flags: &KerberosFlags, pos: usize) -> bool {
    flags.get(pos).map(|b| *b).unwrap_or(false)
}

pub fn encode_der<T: Encode>(value: &T) -> Result<Vec<u8>, rasn::error::EncodeError> {
    rasn::der::encode(value)
}

pub fn decode_der<T: Decode>(bytes: &[u8]) -> Result<T, rasn::error::DecodeError> {
    rasn::der::decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions_match_rfc4120() {
        // Spot check a couple of well known flag positions rather than the
        // whole table.
        assert_eq!(kdc_options::FORWARDABLE, 1);
        assert_eq!(kdc_options::RENEWABLE_OK, 27);
    }

    #[test]
    fn flags_roundtrip_through_bytes() {
        let flags = flags_set(&[kdc_options::FORWARDABLE, kdc_options::RENEWABLE_OK]);
        assert!(flag_is_set(&flags, kdc_options::FORWARDABLE));
        assert!(flag_is_set(&flags, kdc_options::RENEWABLE_OK));
        assert!(!flag_is_set(&flags, kdc_options::CANONICALIZE));
    }

    #[test]
    fn kerberos_time_roundtrips_unix_seconds() {
        let t = KerberosTime::from_unix_seconds(1_700_000_000).unwrap();
        assert_eq!(t.to_unix_seconds(), 1_700_000_000);
    }
}
