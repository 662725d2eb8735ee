// #![deny(warnings)]

#![warn(unused_extern_crates)]
// Enable some groups of clippy lints.
#![deny(clippy::suspicious)]
#![deny(clippy::perf)]
// Specific lints to enforce.
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]
#![deny(clippy::disallowed_types)]
#![deny(clippy::manual_let_else)]
#![allow(clippy::unreachable)]

//! A Kerberos 5 AS-exchange client core (RFC 4120 §3.1): the state machine
//! that turns a client principal and a secret into a TGT, handling
//! pre-authentication negotiation, cross-realm referrals, reply validation
//! and decryption along the way.
//!
//! This crate does not open sockets, parse a `krb5.conf`, read a terminal,
//! resolve a realm's KDC, or persist a credential cache to disk — those are
//! all external collaborators a caller wires in through the capability
//! traits in [`config`], [`crypto`], [`creds`], [`fast`] and [`transport`].
//! What it owns is [`exchange::AsExchange`]: the sequence of AS-REQ/AS-REP
//! round trips, the pre-auth retry logic, and the validation that turns an
//! untrusted reply into a credential worth trusting.

pub mod config;
pub mod creds;
pub mod crypto;
pub mod error;
pub mod exchange;
pub mod fast;
pub mod preauth;
pub mod principal;
pub mod proto;
pub mod reply;
pub mod time;
pub mod transport;
pub mod wire;

pub use creds::Credential;
pub use error::KrbError;
pub use exchange::{AsExchange, AsExchangeDeps, State, StepResult};
pub use principal::Principal;
pub use proto::AsReqOptions;
