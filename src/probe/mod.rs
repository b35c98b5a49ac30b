//! Read-only capability probe.
//!
//! `probe` verifies an identity, reports what its registration file claims
//! (endpoints, flags, services, registrations), and, for agents that accept
//! payment and declare an MCP endpoint, sends one request to that endpoint
//! to read the x402 price out of a `402 Payment Required` answer.
//!
//! Claimed services are reported, not contacted; the payment request is the
//! only outbound call besides verification, and its failure only leaves
//! `paymentRequirements` empty.

pub mod payment;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use serde::Serialize;
use tracing::{debug, info};

use crate::identity::registration::{Registration, Service};
use crate::identity::verifier::IdentityVerifier;
use crate::transport::ChallengeTransport;
use payment::PaymentRequirements;

/// Endpoints resolved from the reserved service names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Endpoints {
    pub mcp: Option<String>,
    pub a2a: Option<String>,
    pub web: Option<String>,
}

/// Outcome of the advisory payment request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum PaymentProbe {
    /// No MCP endpoint, payment not accepted, or identity not verified.
    #[default]
    NotAttempted,
    Discovered(PaymentRequirements),
    /// The request was made but no requirements could be read.
    Unavailable(String),
}

/// Probe report. Every field has a "not known" default, so consumers can
/// read it without checking which stage the probe reached.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProbeResult {
    pub global_id: String,
    pub verified: bool,
    pub error: Option<String>,
    pub owner: Option<Address>,
    pub payment_wallet: Option<Address>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub endpoints: Endpoints,
    pub accepts_payment: bool,
    pub active: bool,
    pub services: Vec<Service>,
    pub registrations: Vec<Registration>,
    pub payment_requirements: Option<PaymentRequirements>,
    pub payment_probe: PaymentProbe,
}

/// Probe knobs.
#[derive(Debug, Clone, Copy)]
pub struct ProbeOptions {
    /// Hard bound on the single payment request.
    pub payment_timeout: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            payment_timeout: Duration::from_secs(5),
        }
    }
}

/// Verifies an agent and reports its declared capabilities.
#[derive(Clone)]
pub struct CapabilityProbe {
    verifier: IdentityVerifier,
    transport: Arc<dyn ChallengeTransport>,
    options: ProbeOptions,
}

impl CapabilityProbe {
    pub fn new(verifier: IdentityVerifier, transport: Arc<dyn ChallengeTransport>) -> Self {
        Self {
            verifier,
            transport,
            options: ProbeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ProbeOptions) -> Self {
        self.options = options;
        self
    }

    /// Probe one global identifier. Never fails.
    pub async fn probe(&self, global_id: &str) -> AgentProbeResult {
        let mut result = AgentProbeResult {
            global_id: global_id.to_string(),
            ..Default::default()
        };

        let verification = self.verifier.verify(global_id).await;
        let registration = match verification.registration {
            Some(registration) if verification.valid => registration,
            _ => {
                result.error = verification
                    .error
                    .or_else(|| Some("verification failed".to_string()));
                return result;
            }
        };

        result.verified = true;
        result.owner = verification.owner;
        result.payment_wallet = verification.payment_wallet;
        result.endpoints = Endpoints {
            mcp: registration.mcp().map(str::to_string),
            a2a: registration.a2a().map(str::to_string),
            web: registration.web().map(str::to_string),
        };
        result.accepts_payment = registration.x402_support;
        result.active = registration.active;
        result.name = Some(registration.name);
        result.description = Some(registration.description);
        result.services = registration.services;
        result.registrations = registration.registrations;

        result.payment_probe = match (&result.endpoints.mcp, result.accepts_payment) {
            (Some(endpoint), true) => self.probe_payment(endpoint).await,
            _ => PaymentProbe::NotAttempted,
        };
        if let PaymentProbe::Discovered(requirements) = &result.payment_probe {
            result.payment_requirements = Some(requirements.clone());
        }

        info!(
            "Probed {}: mcp={} a2a={} web={} payment={}",
            global_id,
            result.endpoints.mcp.is_some(),
            result.endpoints.a2a.is_some(),
            result.endpoints.web.is_some(),
            result.payment_requirements.is_some()
        );
        result
    }

    /// One bounded request, no retries. Every failure is folded into
    /// [`PaymentProbe::Unavailable`].
    async fn probe_payment(&self, endpoint: &str) -> PaymentProbe {
        let timeout = self.options.payment_timeout;
        let response =
            match tokio::time::timeout(timeout, self.transport.send_probe(endpoint, timeout)).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    debug!("Payment probe of {} failed: {}", endpoint, e);
                    return PaymentProbe::Unavailable(e.to_string());
                }
                Err(_) => {
                    debug!("Payment probe of {} timed out after {:?}", endpoint, timeout);
                    return PaymentProbe::Unavailable(format!("timed out after {:?}", timeout));
                }
            };

        match PaymentRequirements::from_challenge(&response) {
            Ok(requirements) => PaymentProbe::Discovered(requirements),
            Err(e) => {
                debug!("No payment requirements from {}: {}", endpoint, e);
                PaymentProbe::Unavailable(e.to_string())
            }
        }
    }
}
