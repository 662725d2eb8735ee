//! Convenience driver over [`AsExchange`] (spec C15).
//!
//! Opening sockets, choosing UDP vs. TCP, and following the locator to a
//! realm's KDC are all out of scope for this crate (spec §1); [`SendToKdc`]
//! is the seam a caller's transport plugs into. [`get_as_reply`] is the
//! `krb5_get_init_creds`-shaped loop that drives an [`AsExchange`] to
//! completion by repeatedly calling [`SendToKdc::send`].

use tracing::debug;

use crate::creds::Credential;
use crate::error::KrbError;
use crate::exchange::{AsExchange, StepResult};

/// One round trip to a KDC for `realm`. `force_tcp` is set once the state
/// machine has seen a `RESPONSE_TOO_BIG` KRB-ERROR and must not retry over
/// UDP. Implementations own address resolution (spec §1's DNS/locator
/// collaborator) and the actual socket I/O.
pub trait SendToKdc: Send + Sync {
    fn send(&self, realm: &str, request: &[u8], force_tcp: bool) -> Result<Vec<u8>, KrbError>;
}

/// Drive `exchange` to completion against `transport`, feeding each reply
/// back into [`AsExchange::step`] until it returns [`StepResult::Complete`]
/// or a fatal error. This is the one place in the crate that performs more
/// than one network round trip per call.
pub fn get_as_reply(exchange: &mut AsExchange<'_>, transport: &dyn SendToKdc) -> Result<Credential, KrbError> {
    let mut response: Option<Vec<u8>> = None;

    loop {
        match exchange.step(response.as_deref())? {
            StepResult::Complete(credential) => return Ok(*credential),
            StepResult::SendRequest { bytes, realm, force_tcp } => {
                debug!(realm, force_tcp, len = bytes.len(), "sending AS-REQ");
                let reply = transport.send(&realm, &bytes, force_tcp)?;
                response = Some(reply);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// A transport stub that replays a fixed script of responses in order,
    /// ignoring the request bytes.
    struct ScriptedTransport {
        replies: Mutex<Vec<Vec<u8>>>,
    }

    impl SendToKdc for ScriptedTransport {
        fn send(&self, _realm: &str, _request: &[u8], _force_tcp: bool) -> Result<Vec<u8>, KrbError> {
            let mut replies = self.replies.lock().map_err(|_| KrbError::Transport("poisoned".into()))?;
            if replies.is_empty() {
                return Err(KrbError::Transport("no more scripted replies".into()));
            }
            Ok(replies.remove(0))
        }
    }

    #[test]
    fn empty_script_surfaces_transport_error() {
        let transport = ScriptedTransport { replies: Mutex::new(Vec::new()) };

        use crate::config::StaticProfile;
        use crate::creds::MemoryCredentialCache;
        use crate::crypto::{Aes256CtsHmacSha1, PassphraseKey};
        use crate::exchange::AsExchangeDeps;
        use crate::fast::NoFast;
        use crate::preauth::PreauthRegistry;
        use crate::principal::Principal;
        use crate::proto::AsReqOptions;

        let profile = StaticProfile::new();
        let preauth = PreauthRegistry::default();
        let fast = NoFast;
        let deriver = Aes256CtsHmacSha1;
        let gak = PassphraseKey::new(b"password".to_vec(), &deriver);
        let cache = MemoryCredentialCache::new();

        let deps = AsExchangeDeps {
            profile: &profile,
            preauth: &preauth,
            fast: &fast,
            reply_decryptor: &deriver,
            get_as_key: &gak,
            cache: Some(&cache),
        };

        let client = Principal::principal("alice", "EXAMPLE.COM");
        let mut exchange = AsExchange::new(client, &AsReqOptions::default(), deps).unwrap();

        let err = get_as_reply(&mut exchange, &transport).unwrap_err();
        assert!(matches!(err, KrbError::Transport(_)));
    }
}
