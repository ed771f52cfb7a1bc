//! Directory-backed certificate storage for one category.
//!
//! Layout: `<storage_dir>/<name>/{certificate,key,index,serial,chain,_attributes_}`.
//! A bundle is only visible through `get_certs`/`get_cert` once it holds
//! every file in the store's required set.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use futures_util::future::try_join_all;

use crate::bundle::{validate_name, Attributes, Bundle, Category, FileRole, ATTRIBUTES_FILE_NAME};
use crate::error::CaError;
use crate::file;

/// Per-name lock table. One async mutex per name, created on first use
/// and kept for the life of the store.
type LockTable = std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

pub struct CertStore {
    category: Category,
    storage_dir: PathBuf,
    required_files: Vec<FileRole>,
    locks: LockTable,
}

impl CertStore {
    /// Store for `category`, requiring that category's default file set.
    pub fn new(category: Category, storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            category,
            storage_dir: storage_dir.into(),
            required_files: category.required_files().to_vec(),
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Override the files a bundle must have to be listed.
    pub fn with_required_files(mut self, required_files: &[FileRole]) -> Self {
        self.required_files = required_files.to_vec();
        self
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn required_files(&self) -> &[FileRole] {
        &self.required_files
    }

    /// Directory for a bundle. Does not check that it exists.
    pub fn cert_dir(&self, name: &str) -> PathBuf {
        self.storage_dir.join(name)
    }

    /// Path to one of a bundle's files. Does not check that it exists.
    pub fn file_path(&self, name: &str, role: FileRole) -> PathBuf {
        self.cert_dir(name).join(role.file_name())
    }

    /// List up to `max` valid bundles in directory enumeration order.
    ///
    /// Directories missing a required file are skipped silently.
    pub async fn get_certs(&self, max: Option<usize>) -> Result<Vec<Bundle>, CaError> {
        let max = max.unwrap_or(usize::MAX);
        let mut certs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.storage_dir).await?;

        while certs.len() < max {
            let Some(entry) = entries.next_entry().await? else {
                break;
            };
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                return Err(CaError::Invariant(format!(
                    "non UTF-8 bundle directory in {}: {:?}",
                    self.storage_dir.display(),
                    file_name
                )));
            };
            if validate_name(name).is_err() {
                tracing::debug!(name, dir = %self.storage_dir.display(), "Skipping unaddressable directory");
                continue;
            }
            if let Some(cert) = self.load_cert(name, entry.path()).await? {
                certs.push(cert);
            }
        }

        Ok(certs)
    }

    /// Load one bundle. `None` when it is absent or incomplete.
    pub async fn get_cert(&self, name: &str) -> Result<Option<Bundle>, CaError> {
        validate_name(name)?;
        self.load_cert(name, self.cert_dir(name)).await
    }

    /// Run `action` with exclusive access to the named bundle.
    ///
    /// At most one `with_cert` action runs per name at a time within this
    /// store. The action receives [`Bundle::missing`] if the name does not
    /// resolve to a valid bundle.
    pub async fn with_cert<F, Fut, T>(&self, name: &str, action: F) -> Result<T, CaError>
    where
        F: FnOnce(Bundle) -> Fut,
        Fut: Future<Output = Result<T, CaError>>,
    {
        validate_name(name)?;
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let cert = self
            .load_cert(name, self.cert_dir(name))
            .await?
            .unwrap_or_else(|| Bundle::missing(name, self.cert_dir(name)));
        action(cert).await
    }

    /// Move `files` into a new bundle directory and write `attributes`.
    ///
    /// Fails without touching the filesystem when a required role is
    /// missing, and refuses to overwrite an existing bundle.
    pub async fn store_cert(
        &self,
        name: &str,
        files: &BTreeMap<FileRole, PathBuf>,
        attributes: Option<&Attributes>,
    ) -> Result<String, CaError> {
        validate_name(name)?;
        if let Some(role) = self
            .required_files
            .iter()
            .find(|role| !files.contains_key(role))
        {
            return Err(CaError::MissingRequiredFile { role: *role });
        }

        let cert_dir = self.cert_dir(name);
        match tokio::fs::create_dir(&cert_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(CaError::AlreadyExists(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let dir = &cert_dir;
        let moves = try_join_all(files.iter().map(|(role, source)| async move {
            file::move_file(source, &dir.join(role.file_name())).await
        }));
        let sidecar = async {
            if let Some(attributes) = attributes {
                let json = serde_json::to_vec(attributes)?;
                file::write_file(&dir.join(ATTRIBUTES_FILE_NAME), json).await?;
            }
            Ok::<(), CaError>(())
        };
        tokio::try_join!(async { moves.await.map_err(CaError::from) }, sidecar)?;

        tracing::info!(
            category = %self.category,
            name,
            files = files.len(),
            "Certificate stored"
        );
        Ok(name.to_string())
    }

    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    async fn load_cert(&self, name: &str, cert_dir: PathBuf) -> Result<Option<Bundle>, CaError> {
        match tokio::fs::metadata(&cert_dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let mut cert = Bundle::missing(name, cert_dir);
        let mut entries = tokio::fs::read_dir(&cert.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                return Err(CaError::Invariant(format!(
                    "non UTF-8 file in bundle {}: {:?}",
                    cert.dir.display(),
                    file_name
                )));
            };

            if file_name == ATTRIBUTES_FILE_NAME {
                cert.attributes = read_attributes(&entry.path()).await;
            } else if let Some(role) = FileRole::from_file_name(file_name) {
                cert.files.insert(role);
            } else {
                cert.extra_files.push(file_name.to_string());
            }
        }

        if !cert.has_files(&self.required_files) {
            tracing::trace!(category = %self.category, name, "Skipping incomplete bundle");
            return Ok(None);
        }
        Ok(Some(cert))
    }
}

/// A sidecar that cannot be read or parsed is logged and treated as empty.
async fn read_attributes(path: &Path) -> Attributes {
    let parsed = match file::read_file(path).await {
        Ok(bytes) => serde_json::from_slice::<Attributes>(&bytes).map_err(CaError::from),
        Err(e) => Err(CaError::from(e)),
    };
    parsed.unwrap_or_else(|e| {
        tracing::error!(path = %path.display(), error = %e, "Unreadable attributes file");
        Attributes::default()
    })
}
