//! Crate-wide error taxonomy (spec §7).
//!
//! Every failure the AS-exchange core can produce funnels through this one
//! enum so callers get a single `match`able surface instead of picking
//! through several ad-hoc error types.

use thiserror::Error;

/// Errors produced while building, driving, or finishing an AS exchange.
#[derive(Debug, Error)]
pub enum KrbError {
    // -- Transport -----------------------------------------------------
    #[error("transport failure: {0}")]
    Transport(String),

    // -- Protocol encoding ----------------------------------------------
    #[error("malformed KDC reply")]
    MalformedReply,
    #[error("reply has unexpected message type")]
    InvalidMessageType,
    #[error("response looks like a Kerberos v4 reply")]
    V4Reply,
    #[error("failed to DER-encode request body")]
    DerEncodeRequest,
    #[error("failed to DER-decode pre-authentication data")]
    DerDecodePaData,
    #[error("failed to DER-decode ETYPE-INFO2")]
    DerDecodeEtypeInfo2,
    #[error("failed to DER-encode PA-ENC-TS-ENC")]
    DerEncodePaEncTsEnc,
    #[error("failed to DER-decode PA-ENC-TS-ENC")]
    DerDecodePaEncTsEnc,
    #[error("failed to DER-decode encrypted KDC reply part")]
    DerDecodeEncKdcRepPart,
    #[error("failed to build an octet string")]
    DerEncodeOctetString,

    // -- KDC protocol (error code sourced from KRB-ERROR) ----------------
    #[error("KDC returned error code {0}")]
    KdcError(i32),
    #[error("client principal {0} is unknown to the KDC")]
    PrincipalUnknown(String),

    // -- Recoverable-KDC, should never escape a successful exchange ------
    #[error("pre-authentication required")]
    PreauthRequired,
    #[error("KDC redirected to a different realm")]
    WrongRealm,
    #[error("reply too large for UDP, retry over TCP")]
    ResponseTooBig,

    // -- Validation -------------------------------------------------------
    #[error("AS reply failed integrity/consistency validation")]
    KdcRepModified,
    #[error("AS reply start time is outside the allowed clock skew")]
    KdcRepSkew,
    #[error("client and server principals are in different realms")]
    RealmMismatch,
    #[error("exceeded the maximum number of AS-exchange loop iterations")]
    GetInTktLoop,
    #[error("exceeded the maximum number of cross-realm referral hops")]
    ReferralLoop,

    // -- Crypto -----------------------------------------------------------
    #[error("unsupported or unrecognized encryption type")]
    UnsupportedEncryption,
    #[error("encryption key has the wrong length for its type")]
    InvalidEncryptionKey,
    #[error("message authentication failed")]
    MessageAuthenticationFailed,
    #[error("ciphertext is too short to be valid")]
    CiphertextInvalid,
    #[error("pre-authentication method is not supported by this client")]
    PreauthUnsupported,
    #[error("KDC did not supply ETYPE-INFO2 needed for pre-authentication")]
    PreauthMissingEtypeInfo2,
    #[error("invalid string-to-key parameters in pre-authentication hint")]
    PreauthInvalidS2KParams,
    #[error("timestamp could not be represented as Kerberos time")]
    PreauthInvalidUnixTs,
    #[error("no pre-authentication data was available to retry with")]
    MissingPaData,

    // -- Resource / programmer errors -------------------------------------
    #[error("invalid Kerberos protocol version number")]
    InvalidPvno,
    #[error("message type inconsistent with message direction")]
    InvalidMessageDirection,
    #[error("request is missing a client principal")]
    MissingClientName,
    #[error("request is missing a service principal")]
    MissingServiceNameWithRealm,
    #[error("principal name is not a simple principal")]
    NameNotPrincipal,
    #[error("invalid value {1} for enum {0}")]
    InvalidEnumValue(String, i32),
    #[error("credential cache write failed: {0}")]
    CacheWrite(String),
    #[error("random number generation failed")]
    Rng,
}
