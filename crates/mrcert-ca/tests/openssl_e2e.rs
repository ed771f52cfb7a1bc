//! Certificate workflows against the real `openssl` binary.
//!
//! Every test returns early when `openssl version` cannot be run.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use mrcert_ca::authority::CertificateAuthority;
use mrcert_ca::bundle::{Category, FileRole};
use mrcert_ca::openssl::OpenSsl;
use mrcert_ca::openssl_config::{DigestAlgorithm, Subject};
use mrcert_ca::protocol::{
    CertParams, CreateIntermediateRequest, CreateLeafRequest, CreateRootRequest, ImportParams,
    SignerRef,
};
use mrcert_ca::{CaCore, CaError};

fn openssl_available() -> bool {
    let available = std::process::Command::new("openssl")
        .arg("version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false);
    if !available {
        eprintln!("openssl not available, skipping");
    }
    available
}

fn core() -> (CaCore, PathBuf) {
    let base = mrcert_common::test::temp_dir("mrcert-e2e");
    for category in Category::ALL {
        std::fs::create_dir_all(base.join(category.dir_name())).unwrap();
    }
    let scratch = base.join("scratch");
    std::fs::create_dir_all(&scratch).unwrap();

    let openssl = OpenSsl::system("openssl", Some(Duration::from_secs(60)));
    let core = CaCore::new(&base, CertificateAuthority::new(scratch, openssl));
    (core, base)
}

fn params(name: &str, lifetime: u32) -> CertParams {
    CertParams {
        name: name.to_string(),
        key_length: 2048,
        digest: DigestAlgorithm::Sha256,
        lifetime,
        subject: Subject {
            common_name: name.to_string(),
            country: "US".to_string(),
            state: "Oregon".to_string(),
            locality: "Portland".to_string(),
            organization: "Example Co".to_string(),
            organizational_unit: "Platform".to_string(),
            email_address: "pki@example.com".to_string(),
        },
    }
}

fn signer(category: Category, name: &str) -> SignerRef {
    SignerRef {
        category,
        name: name.to_string(),
    }
}

fn roles(roles: &[FileRole]) -> BTreeSet<FileRole> {
    roles.iter().copied().collect()
}

async fn create_ca1(core: &CaCore) {
    let request = CreateRootRequest {
        cert: params("ca1", 3650),
        intermediate_only: false,
    };
    core.create_root(&request).await.unwrap();
}

#[tokio::test]
async fn root_certificate_is_a_signer() {
    if !openssl_available() {
        return;
    }
    let (core, base) = core();
    create_ca1(&core).await;

    let ca1 = core.store(Category::Root).get_cert("ca1").await.unwrap().unwrap();
    assert_eq!(
        ca1.files,
        roles(&[FileRole::Certificate, FileRole::Key, FileRole::Index, FileRole::Serial])
    );
    assert_eq!(ca1.attributes.intermediate_only, Some(false));
    assert_eq!(ca1.attributes.signer_type, None);

    let text = core.certificate_text(Category::Root, "ca1").await.unwrap();
    assert!(text.contains("CA:TRUE"), "{text}");
    let _ = std::fs::remove_dir_all(&base);
}

#[tokio::test]
async fn server_certificate_chain_ends_in_root() {
    if !openssl_available() {
        return;
    }
    let (core, base) = core();
    create_ca1(&core).await;

    let request = CreateLeafRequest {
        signer: signer(Category::Root, "ca1"),
        cert: params("svc1", 90),
        domain_names: vec!["svc1.local".to_string()],
    };
    assert_eq!(core.create_server(&request).await.unwrap(), "svc1");

    let svc1 = core.store(Category::Server).get_cert("svc1").await.unwrap().unwrap();
    assert_eq!(
        svc1.files,
        roles(&[FileRole::Certificate, FileRole::Key, FileRole::Chain])
    );
    assert_eq!(svc1.attributes.signer_type, Some(Category::Root));
    assert_eq!(svc1.attributes.signer_name.as_deref(), Some("ca1"));

    let own = std::fs::read(svc1.file_path(FileRole::Certificate)).unwrap();
    let root = std::fs::read(core.store(Category::Root).file_path("ca1", FileRole::Certificate)).unwrap();
    let chain = std::fs::read(svc1.file_path(FileRole::Chain)).unwrap();
    assert_eq!(chain, [own, root].concat());

    let text = core.certificate_text(Category::Server, "svc1").await.unwrap();
    assert!(text.contains("DNS:svc1.local"), "{text}");
    assert!(text.contains("CA:FALSE"), "{text}");

    // A leaf cannot sign.
    let request = CreateLeafRequest {
        signer: signer(Category::Server, "svc1"),
        cert: params("x", 90),
        domain_names: Vec::new(),
    };
    let err = core.create_server(&request).await.unwrap_err();
    assert!(matches!(err, CaError::SignerNotEligible { .. }), "{err}");
    assert!(core.store(Category::Server).get_cert("x").await.unwrap().is_none());
    assert!(!core.store(Category::Server).cert_dir("x").exists());
    let _ = std::fs::remove_dir_all(&base);
}

#[tokio::test]
async fn intermediate_signs_clients() {
    if !openssl_available() {
        return;
    }
    let (core, base) = core();
    create_ca1(&core).await;

    let request = CreateIntermediateRequest {
        signer: signer(Category::Root, "ca1"),
        cert: params("int1", 1825),
    };
    core.create_intermediate(&request).await.unwrap();
    let int1 = core
        .store(Category::Intermediate)
        .get_cert("int1")
        .await
        .unwrap()
        .unwrap();
    assert!(int1.is_signing_capable());
    assert!(int1.files.contains(&FileRole::Chain));

    let request = CreateLeafRequest {
        signer: signer(Category::Intermediate, "int1"),
        cert: params("alice", 30),
        domain_names: Vec::new(),
    };
    core.create_client(&request).await.unwrap();

    let summary = core.get(Category::Client, "alice").await.unwrap();
    assert!(summary.has_chain);
    let text = core.certificate_text(Category::Client, "alice").await.unwrap();
    assert!(text.contains("TLS Web Client Authentication"), "{text}");
    let _ = std::fs::remove_dir_all(&base);
}

#[tokio::test]
async fn self_signed_import_gets_ca_files() {
    if !openssl_available() {
        return;
    }
    let (core, base) = core();
    create_ca1(&core).await;

    let root = core.store(Category::Root);
    let cert_contents = std::fs::read_to_string(root.file_path("ca1", FileRole::Certificate)).unwrap();
    let key_contents = std::fs::read_to_string(root.file_path("ca1", FileRole::Key)).unwrap();

    let upload = ImportParams {
        name: "imported".to_string(),
        cert_contents,
        key_contents: Some(key_contents),
        intermediate_only: false,
    };
    core.upload_root(&upload).await.unwrap();

    let imported = root.get_cert("imported").await.unwrap().unwrap();
    assert_eq!(
        imported.files,
        roles(&[FileRole::Certificate, FileRole::Key, FileRole::Index, FileRole::Serial])
    );
    assert_eq!(imported.attributes.signer_type, None);

    // Garbage does not verify and leaves nothing behind.
    let upload = ImportParams {
        name: "garbage".to_string(),
        cert_contents: "not a certificate\n".to_string(),
        key_contents: Some("not a key\n".to_string()),
        intermediate_only: false,
    };
    assert!(core.upload_root(&upload).await.is_err());
    assert!(!root.cert_dir("garbage").exists());
    let _ = std::fs::remove_dir_all(&base);
}

#[tokio::test]
async fn config_special_characters_survive_signing() {
    if !openssl_available() {
        return;
    }
    let (core, base) = core();
    let mut cert = params("ca#1", 3650);
    cert.subject.organization = "R&D #2 Labs".to_string();
    cert.subject.organizational_unit = "Cash $ Co".to_string();
    let request = CreateRootRequest {
        cert,
        intermediate_only: false,
    };
    core.create_root(&request).await.unwrap();

    let text = core.certificate_text(Category::Root, "ca#1").await.unwrap();
    assert!(text.contains("R&D #2 Labs"), "{text}");
    assert!(text.contains("Cash $ Co"), "{text}");

    let request = CreateLeafRequest {
        signer: signer(Category::Root, "ca#1"),
        cert: params("svc1", 90),
        domain_names: vec!["svc1.local".to_string()],
    };
    assert_eq!(core.create_server(&request).await.unwrap(), "svc1");
    let svc1 = core.store(Category::Server).get_cert("svc1").await.unwrap().unwrap();
    assert_eq!(svc1.attributes.signer_name.as_deref(), Some("ca#1"));
    let _ = std::fs::remove_dir_all(&base);
}
