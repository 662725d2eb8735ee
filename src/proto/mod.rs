//! Credentials-request data model and conversions to/from wire types (spec §3, C7).

mod request;

pub use request::{build_as_req, draw_nonce, AsReqOptions};

use crate::principal::Principal;
use crate::wire::{self, kdc_options, KerberosFlags, KerberosTime, PaData, PrincipalName, Realm};
use crate::error::KrbError;

/// `KDCOptions` the request initializer and state machine reason about as
/// plain booleans; [`KdcOptions::to_wire`] renders them into the `BIT
/// STRING` the wire format actually carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KdcOptions {
    pub forwardable: bool,
    pub proxiable: bool,
    pub allow_postdate: bool,
    pub postdated: bool,
    pub renewable: bool,
    pub renewable_ok: bool,
    pub canonicalize: bool,
}

impl KdcOptions {
    pub fn to_wire(self) -> KerberosFlags {
        let mut bits = Vec::with_capacity(7);
        if self.forwardable {
            bits.push(kdc_options::FORWARDABLE);
        }
        if self.proxiable {
            bits.push(kdc_options::PROXIABLE);
        }
        if self.allow_postdate {
            bits.push(kdc_options::ALLOW_POSTDATE);
        }
        if self.postdated {
            bits.push(kdc_options::POSTDATED);
        }
        if self.renewable {
            bits.push(kdc_options::RENEWABLE);
        }
        if self.renewable_ok {
            bits.push(kdc_options::RENEWABLE_OK);
        }
        if self.canonicalize {
            bits.push(kdc_options::CANONICALIZE);
        }
        wire::flags_set(&bits)
    }

    pub fn from_wire(flags: &KerberosFlags) -> Self {
        KdcOptions {
            forwardable: wire::flag_is_set(flags, kdc_options::FORWARDABLE),
            proxiable: wire::flag_is_set(flags, kdc_options::PROXIABLE),
            allow_postdate: wire::flag_is_set(flags, kdc_options::ALLOW_POSTDATE),
            postdated: wire::flag_is_set(flags, kdc_options::POSTDATED),
            renewable: wire::flag_is_set(flags, kdc_options::RENEWABLE),
            renewable_ok: wire::flag_is_set(flags, kdc_options::RENEWABLE_OK),
            canonicalize: wire::flag_is_set(flags, kdc_options::CANONICALIZE),
        }
    }
}

/// The mutable AS-REQ aggregate the state machine rebuilds on every loop
/// iteration (spec §3 "Credentials request").
#[derive(Debug, Clone)]
pub struct Request {
    pub client: Principal,
    pub server: Principal,
    pub kdc_options: KdcOptions,
    pub from: i64,
    pub till: i64,
    pub rtime: i64,
    pub nonce: u32,
    pub etypes: Vec<i32>,
    pub addresses: Option<Vec<(i32, Vec<u8>)>>,
    pub padata: Vec<PaData>,
}

impl Request {
    /// `true` when `server` is the `krbtgt/REALM@REALM` of `client`'s own
    /// realm, i.e. this is an ordinary TGT request rather than a referral
    /// already in flight.
    pub fn is_tgt_request(&self) -> bool {
        self.server.is_tgs()
    }

    pub fn to_wire_body(&self) -> Result<wire::KdcReqBody, KrbError> {
        let (cname, crealm) = principal_to_wire(&self.client)?;
        let (sname, _srealm) = principal_to_wire(&self.server)?;

        Ok(wire::KdcReqBody {
            kdc_options: self.kdc_options.to_wire(),
            cname: Some(cname),
            realm: crealm,
            sname: Some(sname),
            from: if self.from != 0 {
                Some(KerberosTime::from_unix_seconds(self.from)?)
            } else {
                None
            },
            till: KerberosTime::from_unix_seconds(self.till)?,
            rtime: if self.rtime != 0 {
                Some(KerberosTime::from_unix_seconds(self.rtime)?)
            } else {
                None
            },
            nonce: self.nonce,
            etype: self.etypes.clone(),
            addresses: self.addresses.as_ref().map(|addrs| {
                addrs
                    .iter()
                    .map(|(addr_type, address)| wire::HostAddress {
                        addr_type: *addr_type,
                        address: address.clone().into(),
                    })
                    .collect()
            }),
            enc_authorization_data: None,
            additional_tickets: None,
        })
    }

    pub fn to_wire(&self) -> Result<wire::AsReq, KrbError> {
        let req_body = self.to_wire_body()?;
        Ok(wire::AsReq(wire::KdcReq {
            pvno: 5.into(),
            msg_type: (wire::message_type::AS_REQ as i64).into(),
            padata: if self.padata.is_empty() {
                None
            } else {
                Some(self.padata.clone())
            },
            req_body,
        }))
    }
}

/// Render a [`Principal`] as the `(PrincipalName, Realm)` pair RFC 4120
/// splits name and realm into on the wire.
pub fn principal_to_wire(principal: &Principal) -> Result<(PrincipalName, Realm), KrbError> {
    let name_string = principal
        .components
        .iter()
        .map(|c| wire::KerberosString::new(c.clone()).map_err(|_| KrbError::DerEncodeOctetString))
        .collect::<Result<Vec<_>, _>>()?;

    let realm = Realm(
        wire::KerberosString::new(principal.realm.clone())
            .map_err(|_| KrbError::DerEncodeOctetString)?,
    );

    Ok((
        PrincipalName {
            name_type: principal.name_type,
            name_string,
        },
        realm,
    ))
}

/// Inverse of [`principal_to_wire`].
pub fn principal_from_wire(name: PrincipalName, realm: Realm) -> Principal {
    let name_type = name.name_type;
    let components: Vec<String> = name.name_string.iter().map(|s| s.to_string()).collect();
    let realm: String = realm.0.to_string();
    Principal::new(name_type, components, realm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdc_options_roundtrip() {
        let opts = KdcOptions {
            forwardable: true,
            canonicalize: true,
            ..Default::default()
        };
        let wire = opts.to_wire();
        let back = KdcOptions::from_wire(&wire);
        assert_eq!(opts, back);
    }

    #[test]
    fn principal_roundtrips_through_wire() {
        let principal = Principal::principal("alice", "EXAMPLE.COM");
        let (name, realm) = principal_to_wire(&principal).unwrap();
        let back = principal_from_wire(name, realm);
        assert_eq!(principal.components, back.components);
        assert_eq!(principal.realm, back.realm);
    }
}
