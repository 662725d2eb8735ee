//! FAST armor hook (spec C11, §4.12).
//!
//! RFC 6113 FAST wraps the whole exchange in an armored, integrity-protected
//! channel and can "strengthen" the reply key with an armor key. The
//! concrete armor negotiation (anonymous PKINIT, armor-ticket acquisition,
//! ...) is out of scope for this crate; [`FastArmor`] is the seam a caller
//! wires a real FAST implementation into. [`NoFast`] is the default:
//! everything it does is a no-op, so the exchange behaves exactly like a
//! non-FAST client.

use crate::crypto::DerivedKey;
use crate::proto::Request;
use crate::reply::{AsRepInfo, ErrorInfo};
use crate::wire::PaData;

/// Armor/strengthen hooks the AS-exchange state machine calls at fixed
/// points (request build, error handling, reply-key finalization).
pub trait FastArmor: Send + Sync {
    /// Wrap `request` in FAST armor before it's sent, e.g. by attaching
    /// `PA-FX-FAST` padata. The default does nothing.
    fn armor(&self, request: &mut Request) {
        let _ = request;
    }

    /// Transform the DER-encoded request body before it's used as the
    /// PA-ENC-TIMESTAMP/checksum input, e.g. to bind it to the armor key.
    /// The default passes the body through unchanged.
    fn prep_req_body(&self, body: &[u8]) -> Vec<u8> {
        body.to_vec()
    }

    /// Combine an optional armor-derived `strengthen_key` with the
    /// plain `as_key` into the key actually used to decrypt the AS-REP's
    /// `enc-part`. The default ignores `strengthen_key` and returns
    /// `as_key` unchanged, which is correct whenever no armor was applied.
    fn reply_key(&self, strengthen_key: Option<&DerivedKey>, as_key: &DerivedKey) -> DerivedKey {
        let _ = strengthen_key;
        as_key.clone()
    }

    /// Inspect a KRB-ERROR for FAST-specific recovery data, returning any
    /// padata to retry with and whether a retry is warranted. The default
    /// never recovers anything.
    fn process_error(&self, error: &ErrorInfo) -> (Vec<PaData>, bool) {
        let _ = error;
        (Vec::new(), false)
    }

    /// Derive an optional strengthen-key from a validated AS-REP's armor
    /// fields. The default never produces one.
    fn strengthen_key_from_reply(&self, as_rep: &AsRepInfo) -> Option<DerivedKey> {
        let _ = as_rep;
        None
    }
}

/// The armor-free default: every hook is a pass-through.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFast;

impl FastArmor for NoFast {}
