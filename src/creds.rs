//! Credential record, stasher, and the credential-cache capability (spec C6, C16).

use std::sync::Mutex;

use tracing::debug;

use crate::crypto::DerivedKey;
use crate::error::KrbError;
use crate::principal::Principal;
use crate::reply::{AsRepInfo, DecodedEncPart};
use crate::wire::KerberosFlags;

/// A finished set of AS-exchange credentials, ready to stash in a ccache.
/// Mirrors the `krb5_creds` shape a real client persists: the ticket is kept
/// as its original encoded bytes rather than re-decoded, since nothing past
/// this point needs to read inside it.
#[derive(Debug, Clone)]
pub struct Credential {
    pub client: Principal,
    pub server: Principal,
    pub session_key: DerivedKey,
    pub is_skey: bool,
    pub flags: KerberosFlags,
    pub authtime: i64,
    pub starttime: i64,
    pub endtime: i64,
    pub renew_till: Option<i64>,
    pub caddr: Option<Vec<(i32, Vec<u8>)>>,
    pub ticket: Vec<u8>,
    pub second_ticket: Option<Vec<u8>>,
}

/// Destination for a finished [`Credential`] (spec §1: persistence/storage
/// format is an external collaborator; this trait is the seam).
pub trait CredentialCache: Send + Sync {
    fn store(&self, credential: &Credential) -> Result<(), KrbError>;
}

/// A `Mutex<Vec<Credential>>`-backed cache, useful for tests and for
/// embedders that want the credential in memory rather than on disk.
#[derive(Debug, Default)]
pub struct MemoryCredentialCache {
    entries: Mutex<Vec<Credential>>,
}

impl MemoryCredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credentials(&self) -> Vec<Credential> {
        self.entries.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl CredentialCache for MemoryCredentialCache {
    fn store(&self, credential: &Credential) -> Result<(), KrbError> {
        self.entries
            .lock()
            .map_err(|_| KrbError::CacheWrite("mutex poisoned".to_string()))?
            .push(credential.clone());
        Ok(())
    }
}

/// Build the final [`Credential`] from a validated AS-REP and its decrypted
/// `enc-part`, and hand it to `cache` if one was supplied (spec C6). The
/// client/server principals come from the reply rather than the original
/// request, so a canonicalizing KDC's rewrite is honored.
pub fn stash_credentials(
    as_rep: &AsRepInfo,
    enc_part: &DecodedEncPart,
    cache: Option<&dyn CredentialCache>,
) -> Result<Credential, KrbError> {
    let credential = Credential {
        client: as_rep.client.clone(),
        server: enc_part.server.clone(),
        session_key: enc_part.session_key.clone(),
        is_skey: false,
        flags: enc_part.flags.clone(),
        authtime: enc_part.authtime,
        starttime: enc_part.starttime.unwrap_or(enc_part.authtime),
        endtime: enc_part.endtime,
        renew_till: enc_part.renew_till,
        caddr: enc_part.caddr.clone(),
        ticket: as_rep.ticket_bytes.clone(),
        second_ticket: None,
    };

    debug!(client = %credential.client, server = %credential.server, "stashing AS-exchange credential");

    if let Some(cache) = cache {
        cache.store(&credential)?;
    }

    Ok(credential)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire;

    fn as_rep() -> AsRepInfo {
        AsRepInfo {
            client: Principal::principal("alice", "EXAMPLE.COM"),
            server: Principal::krbtgt("EXAMPLE.COM"),
            ticket_server: Principal::krbtgt("EXAMPLE.COM"),
            ticket_bytes: vec![1, 2, 3],
            padata: Vec::new(),
            enc_part: wire::EncryptedData { etype: 18, kvno: None, cipher: Vec::new().into() },
        }
    }

    fn enc_part() -> DecodedEncPart {
        DecodedEncPart {
            session_key: DerivedKey { etype: 18, key: vec![0u8; 32] },
            flags: wire::flags_set(&[]),
            server: Principal::krbtgt("EXAMPLE.COM"),
            authtime: 1_700_000_000,
            starttime: Some(1_700_000_000),
            endtime: 1_700_086_400,
            renew_till: None,
            nonce: 7,
            caddr: None,
        }
    }

    #[test]
    fn stash_stores_into_cache() {
        let cache = MemoryCredentialCache::new();
        let credential = stash_credentials(&as_rep(), &enc_part(), Some(&cache)).unwrap();
        assert_eq!(credential.ticket, vec![1, 2, 3]);
        assert_eq!(cache.credentials().len(), 1);
    }

    #[test]
    fn stash_without_cache_still_returns_credential() {
        let credential = stash_credentials(&as_rep(), &enc_part(), None).unwrap();
        assert_eq!(credential.client, Principal::principal("alice", "EXAMPLE.COM"));
    }
}
