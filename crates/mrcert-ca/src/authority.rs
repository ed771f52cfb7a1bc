//! Certificate generation and signing workflows.
//!
//! Every workflow runs inside its own scratch directory. Keys, requests,
//! configs and certificates are produced there and only moved into a
//! [`CertStore`] once every step has succeeded, so a failure never leaves
//! a visible bundle behind.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rand::RngCore;

use mrcert_common::encoding::hex_encode;
use mrcert_common::id::scratch_name;

use crate::bundle::{Attributes, Bundle, Category, FileRole};
use crate::error::CaError;
use crate::file;
use crate::openssl::{CaSignArgs, OpenSsl};
use crate::openssl_config::{
    certificate_signing_request_config, loose_ca_config, strict_ca_config, CaPaths,
    SignedType,
};
use crate::protocol::{
    validate_domain_names, CertParams, CreateRootRequest, CsrParams, ImportParams,
};
use crate::store::CertStore;

/// Bytes of randomness a new serial file starts from.
const SERIAL_BYTES: usize = 2;

/// Attempts at picking an unused scratch directory name.
const SCRATCH_ATTEMPTS: usize = 8;

const INTERMEDIATE_EXTENSIONS: &str = "v3_intermediate_ca";

/// Scratch file names.
mod scratch {
    pub const CSR_CONFIG: &str = "csr.conf";
    pub const CA_CONFIG: &str = "ca.conf";
    pub const CSR: &str = "csr";
}

pub struct CertificateAuthority {
    scratch_root: PathBuf,
    openssl: OpenSsl,
    keep_scratch: bool,
}

impl CertificateAuthority {
    pub fn new(scratch_root: impl Into<PathBuf>, openssl: OpenSsl) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            openssl,
            keep_scratch: false,
        }
    }

    /// Keep every workflow's scratch directory for inspection.
    pub fn keep_scratch(mut self, keep: bool) -> Self {
        self.keep_scratch = keep;
        self
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    pub fn openssl(&self) -> &OpenSsl {
        &self.openssl
    }

    /// Run `action` in a fresh scratch directory, removed afterwards
    /// whether or not the action succeeds.
    pub async fn with_scratch_dir<F, Fut, T>(&self, action: F) -> Result<T, CaError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<T, CaError>>,
    {
        self.run_in_scratch(self.keep_scratch, action).await
    }

    /// Like [`with_scratch_dir`](Self::with_scratch_dir) but the directory
    /// is left in place.
    pub async fn with_scratch_dir_retained<F, Fut, T>(&self, action: F) -> Result<T, CaError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<T, CaError>>,
    {
        self.run_in_scratch(true, action).await
    }

    async fn run_in_scratch<F, Fut, T>(&self, keep: bool, action: F) -> Result<T, CaError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<T, CaError>>,
    {
        let dir = self.create_scratch_dir().await?;
        let result = action(dir.clone()).await;

        if keep {
            tracing::debug!(dir = %dir.display(), "Keeping scratch directory");
        } else if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove scratch directory");
        }
        result
    }

    async fn create_scratch_dir(&self) -> Result<PathBuf, CaError> {
        for _ in 0..SCRATCH_ATTEMPTS {
            let dir = self.scratch_root.join(scratch_name());
            match tokio::fs::create_dir(&dir).await {
                Ok(()) => return Ok(dir),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(CaError::Invariant(format!(
            "no free scratch directory name under {}",
            self.scratch_root.display()
        )))
    }

    // ── Workflows ───────────────────────────────────────────────────

    /// Create a self-signed root certificate.
    pub async fn make_root_cert(
        &self,
        request: &CreateRootRequest,
        store: &CertStore,
    ) -> Result<String, CaError> {
        let params = &request.cert;
        params.validate()?;
        ensure_absent(store, &params.name).await?;

        let name = self
            .with_scratch_dir(|scratch| async move {
                let csr_config = scratch.join(scratch::CSR_CONFIG);
                let key = scratch.join(FileRole::Key.file_name());
                let certificate = scratch.join(FileRole::Certificate.file_name());
                let index = scratch.join(FileRole::Index.file_name());
                let serial = scratch.join(FileRole::Serial.file_name());

                let config =
                    certificate_signing_request_config(params.digest, &params.subject, true, &[]);
                tokio::try_join!(
                    write(&csr_config, config),
                    self.openssl.generate_key(&key, params.key_length),
                )?;

                tokio::try_join!(
                    self.openssl
                        .self_sign(&csr_config, params.lifetime, &key, &certificate),
                    write_ca_files(&index, &serial),
                )?;

                let files = BTreeMap::from([
                    (FileRole::Certificate, certificate),
                    (FileRole::Key, key),
                    (FileRole::Index, index),
                    (FileRole::Serial, serial),
                ]);
                let attributes = Attributes::intermediate_only(request.intermediate_only);
                store.store_cert(&params.name, &files, Some(&attributes)).await
            })
            .await?;

        tracing::info!(
            name = %name,
            intermediate_only = request.intermediate_only,
            "Root certificate created"
        );
        Ok(name)
    }

    /// Create an intermediate CA signed by `signer`.
    ///
    /// The new bundle gets its own index and serial so it can sign in turn.
    pub async fn make_intermediate_cert(
        &self,
        params: &CertParams,
        signer: &Bundle,
        signer_type: Category,
        store: &CertStore,
    ) -> Result<String, CaError> {
        params.validate()?;
        check_signer(signer, signer_type, false)?;
        ensure_absent(store, &params.name).await?;

        let name = self
            .with_scratch_dir(|scratch| async move {
                let csr_config = scratch.join(scratch::CSR_CONFIG);
                let ca_config = scratch.join(scratch::CA_CONFIG);
                let csr = scratch.join(scratch::CSR);
                let key = scratch.join(FileRole::Key.file_name());
                let certificate = scratch.join(FileRole::Certificate.file_name());
                let chain = scratch.join(FileRole::Chain.file_name());
                let index = scratch.join(FileRole::Index.file_name());
                let serial = scratch.join(FileRole::Serial.file_name());

                let config =
                    certificate_signing_request_config(params.digest, &params.subject, false, &[]);
                write(&csr_config, config).await?;

                let signer_paths = SignerPaths::of(signer);
                tokio::try_join!(
                    self.openssl
                        .create_csr(&csr_config, params.key_length, &key, &csr),
                    write(&ca_config, strict_ca_config(&signer_paths.ca_paths(&scratch))),
                )?;

                tokio::try_join!(
                    self.openssl.ca_sign(CaSignArgs {
                        config: &ca_config,
                        extensions: Some(INTERMEDIATE_EXTENSIONS),
                        days: Some(params.lifetime),
                        digest: Some(params.digest),
                        csr: &csr,
                        out: &certificate,
                        batch: true,
                    }),
                    write_ca_files(&index, &serial),
                )?;

                file::concat_files(&chain, &[certificate.clone(), signer_paths.certificate]).await?;

                let files = BTreeMap::from([
                    (FileRole::Certificate, certificate),
                    (FileRole::Key, key),
                    (FileRole::Index, index),
                    (FileRole::Serial, serial),
                    (FileRole::Chain, chain),
                ]);
                let attributes = Attributes::signed_by(signer_type, &signer.name);
                store.store_cert(&params.name, &files, Some(&attributes)).await
            })
            .await?;

        tracing::info!(
            name = %name,
            signer = %signer.name,
            %signer_type,
            "Intermediate certificate created"
        );
        Ok(name)
    }

    /// Create a server certificate and key signed by `signer`.
    pub async fn make_server_cert(
        &self,
        params: &CertParams,
        domain_names: &[String],
        signer: &Bundle,
        signer_type: Category,
        store: &CertStore,
    ) -> Result<String, CaError> {
        self.make_leaf_cert(SignedType::Server, params, domain_names, signer, signer_type, store)
            .await
    }

    /// Create a client certificate and key signed by `signer`.
    pub async fn make_client_cert(
        &self,
        params: &CertParams,
        domain_names: &[String],
        signer: &Bundle,
        signer_type: Category,
        store: &CertStore,
    ) -> Result<String, CaError> {
        self.make_leaf_cert(SignedType::Client, params, domain_names, signer, signer_type, store)
            .await
    }

    async fn make_leaf_cert(
        &self,
        signed_type: SignedType,
        params: &CertParams,
        domain_names: &[String],
        signer: &Bundle,
        signer_type: Category,
        store: &CertStore,
    ) -> Result<String, CaError> {
        params.validate()?;
        validate_domain_names(domain_names)?;
        check_signer(signer, signer_type, true)?;
        ensure_absent(store, &params.name).await?;

        let name = self
            .with_scratch_dir(|scratch| async move {
                let csr_config = scratch.join(scratch::CSR_CONFIG);
                let ca_config = scratch.join(scratch::CA_CONFIG);
                let csr = scratch.join(scratch::CSR);
                let key = scratch.join(FileRole::Key.file_name());
                let certificate = scratch.join(FileRole::Certificate.file_name());
                let chain = scratch.join(FileRole::Chain.file_name());

                let config = certificate_signing_request_config(
                    params.digest,
                    &params.subject,
                    false,
                    domain_names,
                );
                write(&csr_config, config).await?;

                let signer_paths = SignerPaths::of(signer);
                let ca = loose_ca_config(
                    &signer_paths.ca_paths(&scratch),
                    params.digest,
                    params.lifetime,
                    signed_type,
                );
                tokio::try_join!(
                    self.openssl
                        .create_csr(&csr_config, params.key_length, &key, &csr),
                    write(&ca_config, ca),
                )?;

                self.openssl.ca_sign(leaf_sign_args(&ca_config, &csr, &certificate)).await?;
                file::concat_files(&chain, &[certificate.clone(), signer_paths.certificate]).await?;

                let files = BTreeMap::from([
                    (FileRole::Certificate, certificate),
                    (FileRole::Key, key),
                    (FileRole::Chain, chain),
                ]);
                let attributes = Attributes::signed_by(signer_type, &signer.name);
                store.store_cert(&params.name, &files, Some(&attributes)).await
            })
            .await?;

        tracing::info!(
            name = %name,
            kind = ?signed_type,
            signer = %signer.name,
            "Leaf certificate created"
        );
        Ok(name)
    }

    /// Sign an externally generated server CSR. No key is stored.
    pub async fn sign_server_csr(
        &self,
        params: &CsrParams,
        signer: &Bundle,
        signer_type: Category,
        store: &CertStore,
    ) -> Result<String, CaError> {
        self.sign_csr(SignedType::Server, params, signer, signer_type, store).await
    }

    /// Sign an externally generated client CSR. No key is stored.
    pub async fn sign_client_csr(
        &self,
        params: &CsrParams,
        signer: &Bundle,
        signer_type: Category,
        store: &CertStore,
    ) -> Result<String, CaError> {
        self.sign_csr(SignedType::Client, params, signer, signer_type, store).await
    }

    async fn sign_csr(
        &self,
        signed_type: SignedType,
        params: &CsrParams,
        signer: &Bundle,
        signer_type: Category,
        store: &CertStore,
    ) -> Result<String, CaError> {
        params.validate()?;
        check_signer(signer, signer_type, true)?;
        ensure_absent(store, &params.name).await?;

        let name = self
            .with_scratch_dir(|scratch| async move {
                let ca_config = scratch.join(scratch::CA_CONFIG);
                let csr = scratch.join(scratch::CSR);
                let certificate = scratch.join(FileRole::Certificate.file_name());
                let chain = scratch.join(FileRole::Chain.file_name());

                let signer_paths = SignerPaths::of(signer);
                let ca = loose_ca_config(
                    &signer_paths.ca_paths(&scratch),
                    params.digest,
                    params.lifetime,
                    signed_type,
                );
                tokio::try_join!(
                    write(&csr, params.csr_contents.as_bytes()),
                    write(&ca_config, ca),
                )?;

                self.openssl.ca_sign(leaf_sign_args(&ca_config, &csr, &certificate)).await?;
                file::concat_files(&chain, &[certificate.clone(), signer_paths.certificate]).await?;

                let files = BTreeMap::from([
                    (FileRole::Certificate, certificate),
                    (FileRole::Chain, chain),
                ]);
                let attributes = Attributes::signed_by(signer_type, &signer.name);
                store.store_cert(&params.name, &files, Some(&attributes)).await
            })
            .await?;

        tracing::info!(name = %name, kind = ?signed_type, signer = %signer.name, "CSR signed");
        Ok(name)
    }

    /// Import an existing certificate after checking it verifies.
    ///
    /// With a signer the certificate is verified against the signer's
    /// certificate and a chain is built. Without one it must verify
    /// against itself. `create_ca_files` adds an empty index and a random
    /// serial so the import can sign.
    pub async fn verify_and_store_cert(
        &self,
        params: &ImportParams,
        signer: Option<(&Bundle, Category)>,
        create_ca_files: bool,
        store: &CertStore,
    ) -> Result<String, CaError> {
        params.validate()?;
        if let Some((cert, category)) = signer {
            if !category.can_sign() {
                return Err(CaError::SignerNotEligible {
                    name: cert.name.clone(),
                    reason: format!("{category} certificates cannot sign"),
                });
            }
            if !cert.has_files(&[FileRole::Certificate]) {
                return Err(CaError::NotFound(format!("{category}/{}", cert.name)));
            }
        }

        let mut roles = vec![FileRole::Certificate];
        if params.key().is_some() {
            roles.push(FileRole::Key);
        }
        if create_ca_files {
            roles.extend([FileRole::Index, FileRole::Serial]);
        }
        if signer.is_some() {
            roles.push(FileRole::Chain);
        }
        if let Some(role) = store.required_files().iter().find(|r| !roles.contains(r)) {
            return Err(CaError::MissingRequiredFile { role: *role });
        }
        ensure_absent(store, &params.name).await?;

        let name = self
            .with_scratch_dir(|scratch| async move {
                let files: BTreeMap<FileRole, PathBuf> = roles
                    .iter()
                    .map(|role| (*role, scratch.join(role.file_name())))
                    .collect();
                let path = |role: FileRole| scratch.join(role.file_name());
                let certificate = path(FileRole::Certificate);

                tokio::try_join!(
                    write(&certificate, params.cert_contents.as_bytes()),
                    async {
                        match params.key() {
                            Some(key) => write(&path(FileRole::Key), key.as_bytes()).await,
                            None => Ok(()),
                        }
                    },
                    async {
                        if create_ca_files {
                            write_ca_files(&path(FileRole::Index), &path(FileRole::Serial))
                                .await
                        } else {
                            Ok(())
                        }
                    },
                    async {
                        match signer {
                            // Built from the uploaded text so it does not
                            // race the certificate write above.
                            Some((cert, _)) => {
                                let signer_cert =
                                    file::read_file(&cert.file_path(FileRole::Certificate)).await?;
                                let mut chain = params.cert_contents.as_bytes().to_vec();
                                chain.extend_from_slice(&signer_cert);
                                write(&path(FileRole::Chain), chain).await
                            }
                            None => Ok(()),
                        }
                    },
                )?;

                let anchor = match signer {
                    Some((cert, _)) => cert.file_path(FileRole::Certificate),
                    None => certificate.clone(),
                };
                self.openssl.verify(&anchor, &certificate).await?;

                let mut attributes = match signer {
                    Some((cert, category)) => Attributes::signed_by(category, &cert.name),
                    None => Attributes::default(),
                };
                attributes.intermediate_only = Some(params.intermediate_only);
                store.store_cert(&params.name, &files, Some(&attributes)).await
            })
            .await?;

        tracing::info!(
            name = %name,
            category = %store.category(),
            signer = ?signer.map(|(cert, _)| cert.name.as_str()),
            "Certificate imported"
        );
        Ok(name)
    }

    /// Human readable dump of a certificate file.
    pub async fn get_text(&self, certificate: &Path) -> Result<String, CaError> {
        self.openssl.render_text(certificate).await
    }
}

/// Paths inside a signer's bundle that a CA config refers to.
struct SignerPaths {
    index: PathBuf,
    serial: PathBuf,
    rand: PathBuf,
    key: PathBuf,
    certificate: PathBuf,
}

impl SignerPaths {
    fn of(signer: &Bundle) -> Self {
        Self {
            index: signer.file_path(FileRole::Index),
            serial: signer.file_path(FileRole::Serial),
            rand: signer.rand_path(),
            key: signer.file_path(FileRole::Key),
            certificate: signer.file_path(FileRole::Certificate),
        }
    }

    fn ca_paths<'a>(&'a self, new_certs_dir: &'a Path) -> CaPaths<'a> {
        CaPaths {
            index: &self.index,
            serial: &self.serial,
            rand: &self.rand,
            key: &self.key,
            certificate: &self.certificate,
            new_certs_dir,
        }
    }
}

/// Leaf signing takes lifetime and digest from the loose config.
fn leaf_sign_args<'a>(config: &'a Path, csr: &'a Path, out: &'a Path) -> CaSignArgs<'a> {
    CaSignArgs {
        config,
        extensions: None,
        days: None,
        digest: None,
        csr,
        out,
        batch: true,
    }
}

/// Refuse signers that cannot issue the requested certificate.
fn check_signer(signer: &Bundle, signer_type: Category, leaf: bool) -> Result<(), CaError> {
    if !signer_type.can_sign() {
        return Err(CaError::SignerNotEligible {
            name: signer.name.clone(),
            reason: format!("{signer_type} certificates cannot sign"),
        });
    }
    if signer.files.is_empty() {
        return Err(CaError::NotFound(format!("{signer_type}/{}", signer.name)));
    }
    if !signer.is_signing_capable() {
        return Err(CaError::SignerNotEligible {
            name: signer.name.clone(),
            reason: "missing certificate, key, index or serial".into(),
        });
    }
    if leaf && signer.intermediate_only() {
        return Err(CaError::SignerNotEligible {
            name: signer.name.clone(),
            reason: "restricted to signing intermediate certificates".into(),
        });
    }
    Ok(())
}

/// Fail early when `name` is taken, before any tool runs.
async fn ensure_absent(store: &CertStore, name: &str) -> Result<(), CaError> {
    if tokio::fs::try_exists(store.cert_dir(name)).await? {
        return Err(CaError::AlreadyExists(name.to_string()));
    }
    Ok(())
}

/// Write an empty index and a randomly seeded serial file.
pub async fn write_ca_files(index: &Path, serial: &Path) -> Result<(), CaError> {
    let mut seed = [0u8; SERIAL_BYTES];
    OsRng.fill_bytes(&mut seed);
    let serial_hex = format!("{}\n", hex_encode(&seed));

    tokio::try_join!(write(index, ""), write(serial, serial_hex))?;
    Ok(())
}

async fn write(path: &Path, contents: impl AsRef<[u8]>) -> Result<(), CaError> {
    file::write_file(path, contents).await.map_err(CaError::from)
}
