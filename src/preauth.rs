//! Pre-authentication mechanism plugin surface (spec C8).
//!
//! Mirrors a real Kerberos client's clpreauth plugin table: a small
//! registry of mechanisms keyed by padata type, each able to inspect the
//! KDC's hints (an `ETYPE-INFO2` entry, a cookie, ...) and produce the
//! padata to retry the AS-REQ with. Only `PA-ENC-TIMESTAMP` is implemented
//! end to end; other mechanisms (PKINIT, SPAKE, ...) are contract-only,
//! left for a caller to register its own [`PreauthMechanism`] for.

use tracing::debug;

use crate::crypto::{GetAsKey, ReplyDecryptor};
use crate::error::KrbError;
use crate::wire::{pa_data_type, EtypeInfo2Entry, PaData, PaEncTsEnc};

/// Usage number used in RFC 4120 for PA-ENC-TIMESTAMP encryption.
pub const KEY_USAGE_AS_REQ_PA_ENC_TIMESTAMP: i32 = 1;

/// Hints a KDC supplied alongside `KDC_ERR_PREAUTH_REQUIRED`, parceled out
/// to whichever mechanism asks for them.
#[derive(Debug, Default)]
pub struct PreauthHints {
    pub etype_info2: Vec<EtypeInfo2Entry>,
    pub fx_cookie: Option<Vec<u8>>,
}

/// A single pre-authentication mechanism. Implementations are expected to
/// be stateless with respect to the exchange; any cookie/state a mechanism
/// needs across a retry round trip travels through [`PreauthHints`] /
/// `PaData` rather than `&mut self`.
pub trait PreauthMechanism: Send + Sync {
    /// The `padata-type` this mechanism answers for.
    fn padata_type(&self) -> i32;

    /// Produce the padata entry to attach to a retried AS-REQ, given the
    /// hints the KDC returned with its `PREAUTH_REQUIRED` error and the
    /// client's long-term key.
    fn prepare(
        &self,
        hints: &PreauthHints,
        salt: &[u8],
        request_time_secs: i64,
        request_time_usecs: i32,
        get_as_key: &dyn GetAsKey,
        reply_decryptor: &dyn ReplyDecryptor,
    ) -> Result<PaData, KrbError>;
}

/// RFC 4120 §5.2.7.2: the client encrypts a timestamp under its long-term
/// key as proof of knowledge of the password.
#[derive(Debug, Default, Clone, Copy)]
pub struct EncTimestampMechanism;

impl PreauthMechanism for EncTimestampMechanism {
    fn padata_type(&self) -> i32 {
        pa_data_type::PA_ENC_TIMESTAMP
    }

    fn prepare(
        &self,
        hints: &PreauthHints,
        salt: &[u8],
        request_time_secs: i64,
        request_time_usecs: i32,
        get_as_key: &dyn GetAsKey,
        reply_decryptor: &dyn ReplyDecryptor,
    ) -> Result<PaData, KrbError> {
        let entry = hints
            .etype_info2
            .first()
            .ok_or(KrbError::PreauthMissingEtypeInfo2)?;

        let effective_salt = entry
            .salt
            .as_ref()
            .map(|s| s.to_string().into_bytes())
            .unwrap_or_else(|| salt.to_vec());
        let s2kparams = entry.s2kparams.as_ref().map(|p| p.as_ref());

        let key = get_as_key.get_as_key(&effective_salt, s2kparams, entry.etype)?;

        let patimestamp = crate::wire::KerberosTime::from_unix_seconds(request_time_secs)?;
        let ts_enc = PaEncTsEnc {
            patimestamp,
            pausec: Some(request_time_usecs.into()),
        };
        let plaintext =
            crate::wire::encode_der(&ts_enc).map_err(|_| KrbError::DerEncodePaEncTsEnc)?;

        let cipher = reply_decryptor.encrypt(&key, KEY_USAGE_AS_REQ_PA_ENC_TIMESTAMP, &plaintext)?;
        let encrypted = crate::wire::EncryptedData {
            etype: entry.etype,
            kvno: None,
            cipher: cipher.into(),
        };
        let padata_value =
            crate::wire::encode_der(&encrypted).map_err(|_| KrbError::DerEncodeRequest)?;

        debug!(etype = entry.etype, "prepared PA-ENC-TIMESTAMP padata");
        Ok(PaData {
            padata_type: pa_data_type::PA_ENC_TIMESTAMP,
            padata_value: padata_value.into(),
        })
    }
}

/// Decode the `PA-ETYPE-INFO2` and `PA-FX-COOKIE` entries out of a KDC's
/// pre-auth hint list (typically a `METHOD-DATA` carried as a
/// `KRB-ERROR`'s `e-data`, or an AS-REP's top-level `padata`) into the
/// [`PreauthHints`] a mechanism's [`PreauthMechanism::prepare`] consumes.
pub fn parse_preauth_hints(padata: &[PaData]) -> Result<PreauthHints, KrbError> {
    let mut hints = PreauthHints::default();

    for pa in padata {
        match pa.padata_type {
            pa_data_type::PA_ETYPE_INFO2 => {
                let entries: crate::wire::EtypeInfo2 = crate::wire::decode_der(&pa.padata_value)
                    .map_err(|_| KrbError::DerDecodeEtypeInfo2)?;
                hints.etype_info2 = entries;
            }
            pa_data_type::PA_FX_COOKIE => {
                hints.fx_cookie = Some(pa.padata_value.to_vec());
            }
            _ => {}
        }
    }

    Ok(hints)
}

/// An ordered table of mechanisms, consulted in registration order. The
/// default table carries only [`EncTimestampMechanism`]; a caller wanting
/// PKINIT or another mechanism registers it alongside.
pub struct PreauthRegistry {
    mechanisms: Vec<Box<dyn PreauthMechanism>>,
}

impl Default for PreauthRegistry {
    fn default() -> Self {
        PreauthRegistry {
            mechanisms: vec![Box::new(EncTimestampMechanism)],
        }
    }
}

impl PreauthRegistry {
    pub fn new() -> Self {
        PreauthRegistry { mechanisms: Vec::new() }
    }

    pub fn register(&mut self, mechanism: Box<dyn PreauthMechanism>) -> &mut Self {
        self.mechanisms.push(mechanism);
        self
    }

    pub fn find(&self, padata_type: i32) -> Option<&dyn PreauthMechanism> {
        self.mechanisms
            .iter()
            .find(|m| m.padata_type() == padata_type)
            .map(|m| m.as_ref())
    }
}
