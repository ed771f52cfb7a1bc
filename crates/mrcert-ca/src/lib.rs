//! mrcert certificate authority core.
//!
//! Keeps root, intermediate, server and client certificates in one
//! directory-backed [`CertStore`](store::CertStore) per category and
//! drives `openssl` to create, sign and import them. [`CaCore`] is the
//! facade the binary crate and the HTTP routes go through.

pub mod authority;
pub mod bundle;
pub mod error;
pub mod file;
pub mod http;
pub mod openssl;
pub mod openssl_config;
pub mod protocol;
pub mod store;

#[cfg(test)]
pub(crate) mod fake;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;

pub use error::CaError;

use authority::CertificateAuthority;
use bundle::{validate_name, Category, FileRole};
use protocol::{
    CertList, CertSummary, CreateIntermediateRequest, CreateLeafRequest, CreateRootRequest,
    ImportParams, SignCsrRequest, UploadSignedRequest,
};
use store::CertStore;

// ── Shared state ────────────────────────────────────────────────────

struct CaState {
    root: CertStore,
    intermediate: CertStore,
    server: CertStore,
    client: CertStore,
    authority: CertificateAuthority,
}

// ── Domain facade ───────────────────────────────────────────────────

/// The certificate authority facade.
///
/// Every operation that fails is logged here before the error is
/// returned, so callers only need to report it.
#[derive(Clone)]
pub struct CaCore {
    state: Arc<CaState>,
}

impl CaCore {
    /// Stores live in `<storage_dir>/<category dir>`, which must exist.
    pub fn new(storage_dir: &Path, authority: CertificateAuthority) -> Self {
        let store = |category: Category| {
            CertStore::new(category, storage_dir.join(category.dir_name()))
        };
        Self {
            state: Arc::new(CaState {
                root: store(Category::Root),
                intermediate: store(Category::Intermediate),
                server: store(Category::Server),
                client: store(Category::Client),
                authority,
            }),
        }
    }

    /// Build the HTTP router for this domain.
    pub fn routes(&self) -> Router {
        http::routes(self.clone())
    }

    pub fn store(&self, category: Category) -> &CertStore {
        match category {
            Category::Root => &self.state.root,
            Category::Intermediate => &self.state.intermediate,
            Category::Server => &self.state.server,
            Category::Client => &self.state.client,
        }
    }

    pub fn authority(&self) -> &CertificateAuthority {
        &self.state.authority
    }

    // ── Creation and signing ────────────────────────────────────────

    pub async fn create_root(&self, request: &CreateRootRequest) -> Result<String, CaError> {
        let result = self
            .authority()
            .make_root_cert(request, self.store(Category::Root))
            .await;
        logged("create_root", result)
    }

    pub async fn create_intermediate(
        &self,
        request: &CreateIntermediateRequest,
    ) -> Result<String, CaError> {
        let signer = &request.signer;
        let result = self
            .store(signer.category)
            .with_cert(&signer.name, |cert| async move {
                self.authority()
                    .make_intermediate_cert(
                        &request.cert,
                        &cert,
                        signer.category,
                        self.store(Category::Intermediate),
                    )
                    .await
            })
            .await;
        logged("create_intermediate", result)
    }

    pub async fn create_server(&self, request: &CreateLeafRequest) -> Result<String, CaError> {
        let signer = &request.signer;
        let result = self
            .store(signer.category)
            .with_cert(&signer.name, |cert| async move {
                self.authority()
                    .make_server_cert(
                        &request.cert,
                        &request.domain_names,
                        &cert,
                        signer.category,
                        self.store(Category::Server),
                    )
                    .await
            })
            .await;
        logged("create_server", result)
    }

    pub async fn create_client(&self, request: &CreateLeafRequest) -> Result<String, CaError> {
        let signer = &request.signer;
        let result = self
            .store(signer.category)
            .with_cert(&signer.name, |cert| async move {
                self.authority()
                    .make_client_cert(
                        &request.cert,
                        &request.domain_names,
                        &cert,
                        signer.category,
                        self.store(Category::Client),
                    )
                    .await
            })
            .await;
        logged("create_client", result)
    }

    pub async fn sign_server_csr(&self, request: &SignCsrRequest) -> Result<String, CaError> {
        let signer = &request.signer;
        let result = self
            .store(signer.category)
            .with_cert(&signer.name, |cert| async move {
                self.authority()
                    .sign_server_csr(
                        &request.csr,
                        &cert,
                        signer.category,
                        self.store(Category::Server),
                    )
                    .await
            })
            .await;
        logged("sign_server_csr", result)
    }

    pub async fn sign_client_csr(&self, request: &SignCsrRequest) -> Result<String, CaError> {
        let signer = &request.signer;
        let result = self
            .store(signer.category)
            .with_cert(&signer.name, |cert| async move {
                self.authority()
                    .sign_client_csr(
                        &request.csr,
                        &cert,
                        signer.category,
                        self.store(Category::Client),
                    )
                    .await
            })
            .await;
        logged("sign_client_csr", result)
    }

    // ── Imports ─────────────────────────────────────────────────────

    /// Import a self-signed root. Index and serial are always created.
    pub async fn upload_root(&self, upload: &ImportParams) -> Result<String, CaError> {
        let result = self
            .authority()
            .verify_and_store_cert(upload, None, true, self.store(Category::Root))
            .await;
        logged("upload_root", result)
    }

    /// Import a certificate issued by one of our signers into `category`.
    ///
    /// Only intermediates get an index and serial, since leaves never sign.
    pub async fn upload_signed(
        &self,
        category: Category,
        request: &UploadSignedRequest,
    ) -> Result<String, CaError> {
        let result = if category == Category::Root {
            Err(CaError::InvalidRequest(
                "root certificates are imported self-signed".into(),
            ))
        } else {
            let signer = &request.signer;
            self.store(signer.category)
                .with_cert(&signer.name, |cert| async move {
                    self.authority()
                        .verify_and_store_cert(
                            &request.upload,
                            Some((&cert, signer.category)),
                            category == Category::Intermediate,
                            self.store(category),
                        )
                        .await
                })
                .await
        };
        logged("upload_signed", result)
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Every valid certificate in `category` with its summary.
    pub async fn list(&self, category: Category) -> Result<CertList, CaError> {
        let result = self.store(category).get_certs(None).await.map(|certs| {
            certs
                .iter()
                .map(|cert| (cert.name.clone(), CertSummary::from(cert)))
                .collect::<CertList>()
        });
        logged("list", result)
    }

    pub async fn get(&self, category: Category, name: &str) -> Result<CertSummary, CaError> {
        let result = self
            .store(category)
            .get_cert(name)
            .await
            .and_then(|cert| {
                cert.map(|cert| CertSummary::from(&cert))
                    .ok_or_else(|| CaError::NotFound(format!("{category}/{name}")))
            });
        logged("get", result)
    }

    /// `openssl x509 -text` dump of a stored certificate.
    pub async fn certificate_text(&self, category: Category, name: &str) -> Result<String, CaError> {
        let result = match self.file_path(category, name, FileRole::Certificate).await {
            Ok(path) => self.authority().get_text(&path).await,
            Err(e) => Err(e),
        };
        logged("certificate_text", result)
    }

    /// Path of one file of a valid certificate, if that file exists.
    pub async fn file_path(
        &self,
        category: Category,
        name: &str,
        role: FileRole,
    ) -> Result<PathBuf, CaError> {
        validate_name(name)?;
        match self.store(category).get_cert(name).await? {
            Some(cert) if cert.files.contains(&role) => Ok(cert.file_path(role)),
            _ => Err(CaError::NotFound(format!("{category}/{name} {role}"))),
        }
    }

    /// Whether any of `categories` holds at least one valid certificate.
    pub async fn have_certs(&self, categories: &[Category]) -> Result<bool, CaError> {
        for category in categories {
            let certs = logged("have_certs", self.store(*category).get_certs(Some(1)).await)?;
            if !certs.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Number of valid certificates per category.
    pub async fn counts(&self) -> Result<Vec<(Category, usize)>, CaError> {
        let mut counts = Vec::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            let certs = logged("counts", self.store(category).get_certs(None).await)?;
            counts.push((category, certs.len()));
        }
        Ok(counts)
    }
}

fn logged<T>(operation: &'static str, result: Result<T, CaError>) -> Result<T, CaError> {
    if let Err(e) = &result {
        if e.is_invariant() {
            tracing::error!(operation, error = %e, invariant = true, "Certificate store invariant violated");
        } else {
            tracing::error!(operation, error = %e, "Certificate operation failed");
        }
    }
    result
}
