//! Authentication core: signing-secret strength checks, the server-tracked
//! renewal-token lifecycle, session issuance, and the security event log
//! shared with the real-time gateway.
//!
//! Primary credentials are verified upstream; this crate only mints and
//! tracks tokens for identities that have already been proven.

pub mod error;
pub mod events;
pub mod renewal;
pub mod secret_strength;
pub mod session;
pub mod signer;
pub mod startup;

pub use {
    error::TokenError,
    events::{SecurityEvent, SecurityEventKind, SecurityLog, Severity},
    renewal::{RenewalTokenRecord, RenewalTokenStore},
    secret_strength::{SecretValidator, StrengthSeverity, ValidationReport, validate},
    session::{SessionIssuer, TokenPair},
    signer::{HmacSigner, SignError, TokenClaims, TokenKind, TokenSigner},
};
