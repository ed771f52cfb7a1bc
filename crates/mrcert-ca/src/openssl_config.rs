//! Configuration text for the `openssl` command.
//!
//! Everything here is pure string building. Callers write the result to a
//! scratch file and pass its path to `req -config` or `ca -config`.

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::CaError;

/// Message digest names accepted by `openssl` for `default_md` and `-md`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha224 => "sha224",
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha384 => "sha384",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }
}

/// Kind of end-entity certificate a loose CA config signs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedType {
    Server,
    Client,
}

/// Distinguished name of a certificate request.
///
/// `organizational_unit` and `email_address` may be empty, in which case
/// they are left out of the generated config entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Subject {
    pub common_name: String,
    pub country: String,
    pub state: String,
    pub locality: String,
    pub organization: String,
    #[serde(default)]
    pub organizational_unit: String,
    #[serde(default)]
    pub email_address: String,
}

impl Subject {
    /// Reject values that would break or inject lines into a config file.
    pub fn validate(&self) -> Result<(), CaError> {
        let required = [
            ("common_name", &self.common_name),
            ("country", &self.country),
            ("state", &self.state),
            ("locality", &self.locality),
            ("organization", &self.organization),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(CaError::InvalidRequest(format!("{field} is required")));
            }
        }

        let all = required.into_iter().chain([
            ("organizational_unit", &self.organizational_unit),
            ("email_address", &self.email_address),
        ]);
        for (field, value) in all {
            if value.chars().any(char::is_control) {
                return Err(CaError::InvalidRequest(format!(
                    "{field} must not contain control characters"
                )));
            }
        }
        Ok(())
    }
}

/// Files of the signing certificate a CA config points `openssl ca` at.
#[derive(Debug, Clone, Copy)]
pub struct CaPaths<'a> {
    pub index: &'a Path,
    pub serial: &'a Path,
    pub rand: &'a Path,
    pub key: &'a Path,
    pub certificate: &'a Path,
    /// Where `openssl ca` drops its `<serial>.pem` copies.
    pub new_certs_dir: &'a Path,
}

const ROOT_CA_EXTENSIONS: &str = "\
subjectKeyIdentifier = hash
authorityKeyIdentifier = keyid:always,issuer
basicConstraints = critical, CA:true
keyUsage = critical, digitalSignature, cRLSign, keyCertSign
";

const INTERMEDIATE_CA_EXTENSIONS: &str = "\
subjectKeyIdentifier   = hash
authorityKeyIdentifier = keyid:always,issuer
basicConstraints       = critical, CA:true, pathlen:0
keyUsage               = critical, digitalSignature, cRLSign, keyCertSign
";

const SERVER_EXTENSIONS: &str = "\
basicConstraints = CA:FALSE
nsCertType = server
nsComment = \"OpenSSL Generated Server Certificate\"
subjectKeyIdentifier = hash
authorityKeyIdentifier = keyid,issuer:always
keyUsage = critical, digitalSignature, keyEncipherment
extendedKeyUsage = serverAuth
";

const CLIENT_EXTENSIONS: &str = "\
basicConstraints = CA:FALSE
nsCertType = client, email
nsComment = \"OpenSSL Generated Client Certificate\"
subjectKeyIdentifier = hash
authorityKeyIdentifier = keyid,issuer
keyUsage = critical, nonRepudiation, digitalSignature, keyEncipherment
extendedKeyUsage = clientAuth, emailProtection
";

/// Config for `openssl req`, both for CSRs and for self-signed roots.
///
/// A `[ req_ext ]` section with one `subjectAltName` line is added when
/// `alternate_domain_names` is non-empty. The `[ x509_ext ]` CA block is
/// only present for a root, which has no CA config to supply it.
pub fn certificate_signing_request_config(
    digest: DigestAlgorithm,
    subject: &Subject,
    is_root_ca: bool,
    alternate_domain_names: &[String],
) -> String {
    let has_sans = !alternate_domain_names.is_empty();

    let mut config = String::new();
    config.push_str("[ req ]\n");
    config.push_str("prompt = no\n");
    config.push_str("encrypt_key = no\n");
    let _ = writeln!(config, "default_md = {}", digest.as_str());
    config.push_str("distinguished_name = dn\n");
    if has_sans {
        config.push_str("req_extensions = req_ext\n");
    }
    if is_root_ca {
        config.push_str("x509_extensions = x509_ext\n");
    }

    config.push_str("\n[ dn ]\n");
    let _ = writeln!(config, "CN = {}", escape_value(&subject.common_name));
    let _ = writeln!(config, "O = {}", escape_value(&subject.organization));
    if !subject.organizational_unit.is_empty() {
        let _ = writeln!(config, "OU = {}", escape_value(&subject.organizational_unit));
    }
    let _ = writeln!(config, "C = {}", escape_value(&subject.country));
    let _ = writeln!(config, "ST = {}", escape_value(&subject.state));
    let _ = writeln!(config, "L = {}", escape_value(&subject.locality));
    if !subject.email_address.is_empty() {
        let _ = writeln!(config, "emailAddress = {}", escape_value(&subject.email_address));
    }

    if has_sans {
        let sans = alternate_domain_names
            .iter()
            .map(|name| format!("DNS:{}", escape_value(name)))
            .collect::<Vec<_>>()
            .join(", ");
        config.push_str("\n[ req_ext ]\n");
        let _ = writeln!(config, "subjectAltName = {sans}");
    }

    if is_root_ca {
        config.push_str("\n[ x509_ext ]\n");
        config.push_str(ROOT_CA_EXTENSIONS);
    }

    config
}

/// CA config used when a root or intermediate signs an intermediate.
///
/// The new certificate's country, state, locality and organization must
/// match the signer's.
pub fn strict_ca_config(paths: &CaPaths<'_>) -> String {
    let mut config = ca_section(paths);
    config.push_str("preserve               = no\n");
    config.push_str("policy                 = policy_strict\n");
    config.push_str("x509_extensions        = v3_intermediate_ca\n");

    config.push_str(
        "\n[ policy_strict ]
commonName             = supplied
organizationName       = match
organizationalUnitName = optional
countryName            = match
stateOrProvinceName    = match
localityName           = match
emailAddress           = optional
",
    );

    config.push_str("\n[ v3_intermediate_ca ]\n");
    config.push_str(INTERMEDIATE_CA_EXTENSIONS);
    config
}

/// CA config used when signing server and client certificates.
///
/// Subject fields are free apart from the common name. Extensions in the
/// request (notably `subjectAltName`) are copied unless the leaf block
/// already sets them.
pub fn loose_ca_config(
    paths: &CaPaths<'_>,
    digest: DigestAlgorithm,
    lifetime_days: u32,
    signed_type: SignedType,
) -> String {
    let mut config = ca_section(paths);
    let _ = writeln!(config, "default_md             = {}", digest.as_str());
    let _ = writeln!(config, "default_days           = {lifetime_days}");
    config.push_str("preserve               = no\n");
    config.push_str("unique_subject         = no\n");
    config.push_str("copy_extensions        = copy\n");
    config.push_str("policy                 = policy_loose\n");
    config.push_str("x509_extensions        = x509_ext\n");

    config.push_str(
        "\n[ policy_loose ]
countryName            = optional
stateOrProvinceName    = optional
localityName           = optional
organizationName       = optional
organizationalUnitName = optional
commonName             = supplied
emailAddress           = optional
",
    );

    config.push_str("\n[ x509_ext ]\n");
    config.push_str(match signed_type {
        SignedType::Server => SERVER_EXTENSIONS,
        SignedType::Client => CLIENT_EXTENSIONS,
    });
    config
}

fn ca_section(paths: &CaPaths<'_>) -> String {
    let mut config = String::new();
    config.push_str("[ ca ]\n");
    config.push_str("default_ca             = CA_default\n");
    config.push_str("\n[ CA_default ]\n");
    let _ = writeln!(config, "new_certs_dir          = {}", escape_path(paths.new_certs_dir));
    let _ = writeln!(config, "database               = {}", escape_path(paths.index));
    let _ = writeln!(config, "serial                 = {}", escape_path(paths.serial));
    let _ = writeln!(config, "RANDFILE               = {}", escape_path(paths.rand));
    let _ = writeln!(config, "private_key            = {}", escape_path(paths.key));
    let _ = writeln!(config, "certificate            = {}", escape_path(paths.certificate));
    config
}

/// Backslash-escape characters the config parser treats specially.
///
/// `#` opens a comment, `$` expands a variable and quotes are stripped.
/// The parser removes the backslash again, so the value reaches `req` and
/// `ca` unchanged.
fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '#' | '$' | '"' | '\'') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn escape_path(path: &Path) -> String {
    escape_value(&path.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn subject() -> Subject {
        Subject {
            common_name: "Example Root".into(),
            country: "US".into(),
            state: "Oregon".into(),
            locality: "Portland".into(),
            organization: "Example Co".into(),
            organizational_unit: String::new(),
            email_address: String::new(),
        }
    }

    fn section_lines<'a>(config: &'a str, header: &str) -> Vec<&'a str> {
        config
            .lines()
            .skip_while(|line| *line != header)
            .skip(1)
            .take_while(|line| !line.starts_with('['))
            .filter(|line| !line.is_empty())
            .collect()
    }

    struct Paths {
        index: PathBuf,
        serial: PathBuf,
        rand: PathBuf,
        key: PathBuf,
        cert: PathBuf,
        out: PathBuf,
    }

    impl Paths {
        fn new() -> Self {
            Self {
                index: "/s/ca1/index".into(),
                serial: "/s/ca1/serial".into(),
                rand: "/s/ca1/random".into(),
                key: "/s/ca1/key".into(),
                cert: "/s/ca1/certificate".into(),
                out: "/tmp/scratch".into(),
            }
        }

        fn ca_paths(&self) -> CaPaths<'_> {
            CaPaths {
                index: &self.index,
                serial: &self.serial,
                rand: &self.rand,
                key: &self.key,
                certificate: &self.cert,
                new_certs_dir: &self.out,
            }
        }
    }

    #[test]
    fn alternate_names_produce_one_san_line() {
        let sans = vec!["a.example".to_string(), "b.example".to_string()];
        let config =
            certificate_signing_request_config(DigestAlgorithm::Sha256, &subject(), false, &sans);

        let san_lines: Vec<_> = config
            .lines()
            .filter(|line| line.contains("subjectAltName"))
            .collect();
        assert_eq!(san_lines, vec!["subjectAltName = DNS:a.example, DNS:b.example"]);
        assert_eq!(config.matches("[ req_ext ]").count(), 1);
        assert!(config.contains("req_extensions = req_ext"));
    }

    #[test]
    fn no_alternate_names_means_no_req_ext() {
        let config =
            certificate_signing_request_config(DigestAlgorithm::Sha256, &subject(), false, &[]);
        assert!(!config.contains("req_ext"));
        assert!(!config.contains("subjectAltName"));
    }

    #[test]
    fn only_root_gets_ca_extensions() {
        let root = certificate_signing_request_config(DigestAlgorithm::Sha512, &subject(), true, &[]);
        let ext = section_lines(&root, "[ x509_ext ]");
        assert!(ext.iter().any(|line| line.contains("CA:true")));
        assert!(root.contains("x509_extensions = x509_ext"));

        let sans = vec!["svc.local".to_string()];
        for names in [&[][..], &sans[..]] {
            for digest in [DigestAlgorithm::Sha224, DigestAlgorithm::Sha384] {
                let leaf = certificate_signing_request_config(digest, &subject(), false, names);
                assert!(!leaf.contains("x509_ext"));
                assert!(!leaf.contains("CA:true"));
            }
        }
    }

    #[test]
    fn optional_dn_fields_are_omitted_when_empty() {
        let config =
            certificate_signing_request_config(DigestAlgorithm::Sha256, &subject(), false, &[]);
        let dn = section_lines(&config, "[ dn ]");
        assert_eq!(
            dn,
            vec![
                "CN = Example Root",
                "O = Example Co",
                "C = US",
                "ST = Oregon",
                "L = Portland",
            ]
        );

        let mut full = subject();
        full.organizational_unit = "Ops".into();
        full.email_address = "ops@example.com".into();
        let config = certificate_signing_request_config(DigestAlgorithm::Sha256, &full, false, &[]);
        let dn = section_lines(&config, "[ dn ]");
        assert!(dn.contains(&"OU = Ops"));
        assert!(dn.contains(&"emailAddress = ops@example.com"));
    }

    #[test]
    fn digest_goes_into_req_section() {
        let config =
            certificate_signing_request_config(DigestAlgorithm::Sha384, &subject(), false, &[]);
        assert!(section_lines(&config, "[ req ]").contains(&"default_md = sha384"));
    }

    #[test]
    fn strict_config_matches_signer_identity() {
        let paths = Paths::new();
        let config = strict_ca_config(&paths.ca_paths());

        assert!(config.contains("database               = /s/ca1/index"));
        assert!(config.contains("private_key            = /s/ca1/key"));
        assert!(config.contains("new_certs_dir          = /tmp/scratch"));
        assert!(config.contains("policy                 = policy_strict"));
        assert!(config.contains("x509_extensions        = v3_intermediate_ca"));

        let policy = section_lines(&config, "[ policy_strict ]");
        for field in ["organizationName", "countryName", "stateOrProvinceName", "localityName"] {
            assert!(
                policy.iter().any(|l| l.starts_with(field) && l.ends_with("match")),
                "{field} should be matched"
            );
        }
        let ext = section_lines(&config, "[ v3_intermediate_ca ]");
        assert!(ext.iter().any(|l| l.contains("CA:true, pathlen:0")));
    }

    #[test]
    fn loose_server_config_is_not_a_ca() {
        let paths = Paths::new();
        let config = loose_ca_config(&paths.ca_paths(), DigestAlgorithm::Sha256, 90, SignedType::Server);

        assert!(config.contains("default_days           = 90"));
        assert!(config.contains("default_md             = sha256"));
        assert!(config.contains("copy_extensions        = copy"));
        assert!(config.contains("policy                 = policy_loose"));

        let ext = section_lines(&config, "[ x509_ext ]");
        assert!(ext.contains(&"basicConstraints = CA:FALSE"));
        assert!(ext.contains(&"extendedKeyUsage = serverAuth"));
        assert!(!config.contains("CA:true"));
    }

    #[test]
    fn loose_client_config_encodes_client_usage() {
        let paths = Paths::new();
        let config = loose_ca_config(&paths.ca_paths(), DigestAlgorithm::Sha512, 30, SignedType::Client);

        let ext = section_lines(&config, "[ x509_ext ]");
        assert!(ext.contains(&"basicConstraints = CA:FALSE"));
        assert!(ext.contains(&"extendedKeyUsage = clientAuth, emailProtection"));
        assert!(!ext.iter().any(|l| l.contains("serverAuth")));
    }

    #[test]
    fn dn_values_escape_comment_and_variable_characters() {
        let mut special = subject();
        special.organization = "R&D #2 Labs".into();
        special.organizational_unit = "Cash $ Co".into();
        special.locality = r#"St. John's "Old" Town"#.into();
        special.common_name = r"dept\ca".into();
        let sans = vec!["a#b.example".to_string()];
        let config = certificate_signing_request_config(DigestAlgorithm::Sha256, &special, false, &sans);

        let dn = section_lines(&config, "[ dn ]");
        assert!(dn.contains(&r"O = R&D \#2 Labs"));
        assert!(dn.contains(&r"OU = Cash \$ Co"));
        assert!(dn.contains(&r#"L = St. John\'s \"Old\" Town"#));
        assert!(dn.contains(&r"CN = dept\\ca"));
        assert_eq!(
            section_lines(&config, "[ req_ext ]"),
            vec![r"subjectAltName = DNS:a\#b.example"]
        );
    }

    #[test]
    fn ca_paths_escape_comment_and_variable_characters() {
        let mut paths = Paths::new();
        paths.index = "/s/ca#1/index".into();
        paths.key = "/s/$ca/key".into();
        let config = strict_ca_config(&paths.ca_paths());

        let section = section_lines(&config, "[ CA_default ]");
        assert!(section.contains(&r"database               = /s/ca\#1/index"));
        assert!(section.contains(&r"private_key            = /s/\$ca/key"));
        assert!(section.contains(&"serial                 = /s/ca1/serial"));
    }

    #[test]
    fn subject_validation() {
        assert!(subject().validate().is_ok());

        let mut missing = subject();
        missing.locality = "  ".into();
        assert!(matches!(missing.validate(), Err(CaError::InvalidRequest(_))));

        let mut injected = subject();
        injected.organizational_unit = "Ops\n[ x509_ext ]".into();
        assert!(matches!(injected.validate(), Err(CaError::InvalidRequest(_))));
    }

    #[test]
    fn digest_wire_names() {
        let d: DigestAlgorithm = serde_json::from_str("\"sha384\"").unwrap();
        assert_eq!(d, DigestAlgorithm::Sha384);
        assert_eq!(DigestAlgorithm::default().as_str(), "sha256");
    }
}
