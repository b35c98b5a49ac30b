//! Agent identity resolution (ERC-8004).
//!
//! # Architecture
//!
//! Each agent identity is:
//! - An ERC-721 token in an Identity Registry on some chain
//! - A global identifier naming that token (`global_id`)
//! - A registration file the token's `tokenURI` points at (`registration`)
//!
//! `verifier` ties the three together: it reads ownership and the URI from
//! the chain, fetches and parses the file, and checks the file refers back
//! to the token it was reached through.

pub mod global_id;
pub mod registration;
pub mod verifier;

pub use global_id::{AgentRef, GlobalIdError, format_global_id};
pub use registration::{Registration, RegistrationError, RegistrationFile, Service, parse_registration};
pub use verifier::{FailureKind, IdentityVerifier, VerificationResult, VerifyFailure, VerifyOptions};
