//! Wire types for the certificate authority HTTP endpoints.
//!
//! Request bodies use the field names the browser client posts
//! (`key_length`, `digest`, `lifetime`, `domain_names`, `csr_contents`,
//! `cert_contents`, `key_contents`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::bundle::{validate_name, Bundle, Category, FileRole};
use crate::error::CaError;
use crate::openssl_config::{DigestAlgorithm, Subject};

/// Smallest RSA key accepted for a new certificate.
pub const MIN_KEY_LENGTH: u32 = 1024;
/// Largest RSA key accepted for a new certificate.
pub const MAX_KEY_LENGTH: u32 = 16384;

/// The certificate that signs (or signed) another one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SignerRef {
    #[serde(rename = "type")]
    pub category: Category,
    pub name: String,
}

// ── Request parameters ──────────────────────────────────────────────

/// Parameters shared by every request that generates a new key.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CertParams {
    pub name: String,
    pub key_length: u32,
    #[serde(default)]
    pub digest: DigestAlgorithm,
    /// Validity in days.
    pub lifetime: u32,
    #[serde(flatten)]
    pub subject: Subject,
}

impl CertParams {
    pub fn validate(&self) -> Result<(), CaError> {
        validate_name(&self.name)?;
        if !(MIN_KEY_LENGTH..=MAX_KEY_LENGTH).contains(&self.key_length) {
            return Err(CaError::InvalidRequest(format!(
                "key_length must be between {MIN_KEY_LENGTH} and {MAX_KEY_LENGTH}, got {}",
                self.key_length
            )));
        }
        validate_lifetime(self.lifetime)?;
        self.subject.validate()
    }
}

/// Parameters for signing a CSR the requester generated themselves.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CsrParams {
    pub name: String,
    #[serde(default)]
    pub digest: DigestAlgorithm,
    pub lifetime: u32,
    /// PEM encoded certificate signing request.
    pub csr_contents: String,
}

impl CsrParams {
    pub fn validate(&self) -> Result<(), CaError> {
        validate_name(&self.name)?;
        validate_lifetime(self.lifetime)?;
        if self.csr_contents.trim().is_empty() {
            return Err(CaError::InvalidRequest("csr_contents is empty".into()));
        }
        Ok(())
    }
}

/// An existing certificate (and optionally its key) to verify and import.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ImportParams {
    pub name: String,
    pub cert_contents: String,
    #[serde(default)]
    pub key_contents: Option<String>,
    #[serde(default)]
    pub intermediate_only: bool,
}

impl ImportParams {
    pub fn validate(&self) -> Result<(), CaError> {
        validate_name(&self.name)?;
        if self.cert_contents.trim().is_empty() {
            return Err(CaError::InvalidRequest("cert_contents is empty".into()));
        }
        Ok(())
    }

    /// The private key, treating an empty string as absent.
    pub fn key(&self) -> Option<&str> {
        self.key_contents
            .as_deref()
            .filter(|key| !key.trim().is_empty())
    }
}

fn validate_lifetime(lifetime: u32) -> Result<(), CaError> {
    if lifetime == 0 {
        return Err(CaError::InvalidRequest("lifetime must be at least one day".into()));
    }
    Ok(())
}

/// Check names destined for a `subjectAltName = DNS:...` line.
pub fn validate_domain_names(names: &[String]) -> Result<(), CaError> {
    for name in names {
        let bad = name.is_empty()
            || name
                .chars()
                .any(|c| c == ',' || c.is_whitespace() || c.is_control());
        if bad {
            return Err(CaError::InvalidRequest(format!("invalid domain name: {name:?}")));
        }
    }
    Ok(())
}

// ── Request bodies ──────────────────────────────────────────────────

/// POST /root/create-cert-file
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateRootRequest {
    #[serde(flatten)]
    pub cert: CertParams,
    /// Restrict this root to signing intermediates.
    #[serde(default)]
    pub intermediate_only: bool,
}

/// POST /intermediate/create-cert-file
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateIntermediateRequest {
    pub signer: SignerRef,
    #[serde(flatten)]
    pub cert: CertParams,
}

/// POST /server/create-cert-file and /client/create-cert-file
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateLeafRequest {
    pub signer: SignerRef,
    #[serde(flatten)]
    pub cert: CertParams,
    /// Extra DNS names for the `subjectAltName` extension.
    #[serde(default)]
    pub domain_names: Vec<String>,
}

/// POST /server/sign-csr and /client/sign-csr
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignCsrRequest {
    pub signer: SignerRef,
    #[serde(flatten)]
    pub csr: CsrParams,
}

/// POST /{intermediate,server,client}/upload-cert-file
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadSignedRequest {
    pub signer: SignerRef,
    #[serde(flatten)]
    pub upload: ImportParams,
}

// ── Responses ───────────────────────────────────────────────────────

/// Returned by every successful create, sign and upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NewCertResponse {
    /// Download name of the new certificate, `<name>.crt`.
    pub new_cert: String,
}

impl NewCertResponse {
    pub fn for_name(name: &str) -> Self {
        Self {
            new_cert: format!("{name}.crt"),
        }
    }
}

/// A listed certificate: its attributes plus which downloads exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CertSummary {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signer_type: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub intermediate_only: Option<bool>,
    pub has_key: bool,
    /// Only reported for certificates signed by an intermediate, where
    /// the chain is needed to reach a trusted root.
    pub has_chain: bool,
}

impl From<&Bundle> for CertSummary {
    fn from(cert: &Bundle) -> Self {
        let attributes = &cert.attributes;
        Self {
            signer_type: attributes.signer_type,
            signer_name: attributes.signer_name.clone(),
            intermediate_only: attributes.intermediate_only,
            has_key: cert.files.contains(&FileRole::Key),
            has_chain: attributes.signer_type == Some(Category::Intermediate)
                && cert.files.contains(&FileRole::Chain),
        }
    }
}

/// GET /api/{category}: name to summary.
pub type CertList = BTreeMap<String, CertSummary>;

/// GET /api/have_certs
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HaveCertsResponse {
    pub have_certs: bool,
}

/// Query of GET /api/have_certs.
#[derive(Debug, Clone, Deserialize)]
pub struct HaveCertsQuery {
    /// `root,intermediate` or a JSON array such as `["root"]`.
    #[serde(default)]
    pub types: String,
}

impl HaveCertsQuery {
    /// Parse the requested categories. Unknown names are skipped.
    pub fn categories(&self) -> Vec<Category> {
        let raw = self.types.trim();
        let names: Vec<String> = if raw.starts_with('[') {
            serde_json::from_str(raw).unwrap_or_default()
        } else {
            raw.split(',').map(|s| s.trim().to_string()).collect()
        };
        names.iter().filter_map(|name| name.parse().ok()).collect()
    }
}
