//! Certificate bundle model.
//!
//! A bundle is one named directory inside a category's storage directory,
//! holding role-named files (`certificate`, `key`, `index`, `serial`,
//! `chain`) and an `_attributes_` JSON sidecar.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::CaError;

/// Reserved sidecar file holding a bundle's JSON attributes.
pub const ATTRIBUTES_FILE_NAME: &str = "_attributes_";

/// RANDFILE the tool maintains inside a signing bundle. Not a role.
pub const RAND_FILE_NAME: &str = "random";

/// Files a bundle must have to sign other certificates.
pub const SIGNING_FILES: [FileRole; 4] = [
    FileRole::Certificate,
    FileRole::Key,
    FileRole::Index,
    FileRole::Serial,
];

const LEAF_FILES: [FileRole; 1] = [FileRole::Certificate];

const MAX_NAME_LEN: usize = 255;

/// Storage partition for certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Root,
    Intermediate,
    Server,
    Client,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Root,
        Category::Intermediate,
        Category::Server,
        Category::Client,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Root => "root",
            Category::Intermediate => "intermediate",
            Category::Server => "server",
            Category::Client => "client",
        }
    }

    /// Subdirectory of the storage root holding this category's bundles.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::Root => "root_certs",
            Category::Intermediate => "intermediate_certs",
            Category::Server => "server_certs",
            Category::Client => "client_certs",
        }
    }

    /// Files every listed bundle of this category must have.
    pub fn required_files(&self) -> &'static [FileRole] {
        match self {
            Category::Root | Category::Intermediate => &SIGNING_FILES,
            Category::Server | Category::Client => &LEAF_FILES,
        }
    }

    /// Only root and intermediate certificates may act as signers.
    pub fn can_sign(&self) -> bool {
        matches!(self, Category::Root | Category::Intermediate)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = CaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(Category::Root),
            "intermediate" => Ok(Category::Intermediate),
            "server" => Ok(Category::Server),
            "client" => Ok(Category::Client),
            other => Err(CaError::InvalidRequest(format!(
                "unknown certificate type: {other:?}"
            ))),
        }
    }
}

/// Logical file held by a bundle. Each role maps to exactly one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRole {
    Certificate,
    Key,
    Index,
    Serial,
    Chain,
}

impl FileRole {
    pub fn file_name(&self) -> &'static str {
        match self {
            FileRole::Certificate => "certificate",
            FileRole::Key => "key",
            FileRole::Index => "index",
            FileRole::Serial => "serial",
            FileRole::Chain => "chain",
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        match name {
            "certificate" => Some(FileRole::Certificate),
            "key" => Some(FileRole::Key),
            "index" => Some(FileRole::Index),
            "serial" => Some(FileRole::Serial),
            "chain" => Some(FileRole::Chain),
            _ => None,
        }
    }
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Metadata stored in a bundle's sidecar file.
///
/// Keys this crate does not know about are kept in `extra` and written
/// back unchanged, so sidecars from other versions survive a round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signer_type: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub intermediate_only: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Attributes {
    /// Attributes of a certificate issued by `signer`.
    pub fn signed_by(signer_type: Category, signer_name: &str) -> Self {
        Self {
            signer_type: Some(signer_type),
            signer_name: Some(signer_name.to_string()),
            ..Self::default()
        }
    }

    pub fn intermediate_only(flag: bool) -> Self {
        Self {
            intermediate_only: Some(flag),
            ..Self::default()
        }
    }
}

/// A loaded certificate bundle. Read-only to the signing workflows.
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    pub name: String,
    /// The bundle's own directory (`<storage>/<category dir>/<name>`).
    pub dir: PathBuf,
    pub files: BTreeSet<FileRole>,
    /// Files present in the directory that map to no role (e.g. the
    /// tool's `index.attr`, `serial.old`, RANDFILE).
    pub extra_files: Vec<String>,
    pub attributes: Attributes,
}

impl Bundle {
    /// A bundle for a name that did not resolve: no files, no attributes.
    pub fn missing(name: &str, dir: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            dir,
            files: BTreeSet::new(),
            extra_files: Vec::new(),
            attributes: Attributes::default(),
        }
    }

    pub fn has_files(&self, roles: &[FileRole]) -> bool {
        roles.iter().all(|role| self.files.contains(role))
    }

    /// Path of a role's file. Does not check that it exists.
    pub fn file_path(&self, role: FileRole) -> PathBuf {
        self.dir.join(role.file_name())
    }

    pub fn rand_path(&self) -> PathBuf {
        self.dir.join(RAND_FILE_NAME)
    }

    pub fn is_signing_capable(&self) -> bool {
        self.has_files(&SIGNING_FILES)
    }

    pub fn intermediate_only(&self) -> bool {
        self.attributes.intermediate_only.unwrap_or(false)
    }
}

/// Check that `name` is usable as a single directory name.
pub fn validate_name(name: &str) -> Result<(), CaError> {
    let invalid = name.is_empty()
        || name.len() > MAX_NAME_LEN
        || name.starts_with('.')
        || name == ATTRIBUTES_FILE_NAME
        || name
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control());
    if invalid {
        return Err(CaError::InvalidName(name.to_string()));
    }
    Ok(())
}
