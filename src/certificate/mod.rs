//! Minting and verification against the external certificate service.

mod client;
mod id;

pub use client::{CertificateClient, MintedCertificate, QrImage, VerifyOutcome};
pub use id::{CertificateId, IdRules};

#[cfg(test)]
pub(crate) use client::tests as fake_service;
