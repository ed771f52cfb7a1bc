//! Subprocess facade over the `openssl` command line tool.

use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::error::CaError;
use crate::openssl_config::DigestAlgorithm;

/// Captured output of a successful tool run.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs one external program to completion.
///
/// Implementations must report a non-zero exit as [`CaError::Tool`].
pub trait CommandRunner: Send + Sync {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
    ) -> BoxFuture<'a, Result<ToolOutput, CaError>>;
}

/// Runs programs as child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    /// Kill the child and fail once this elapses. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for ProcessRunner {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
    ) -> BoxFuture<'a, Result<ToolOutput, CaError>> {
        async move {
            let command_name = describe(program, args);
            let mut command = tokio::process::Command::new(program);
            command
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let output = command.output();
            let output = match self.timeout {
                Some(limit) => tokio::time::timeout(limit, output)
                    .await
                    .map_err(|_| CaError::Timeout {
                        command: command_name.clone(),
                    })??,
                None => output.await?,
            };

            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            if !output.status.success() {
                return Err(CaError::Tool {
                    command: command_name,
                    status: output.status.to_string(),
                    stderr: stderr.trim().to_string(),
                });
            }
            Ok(ToolOutput { stdout, stderr })
        }
        .boxed()
    }
}

/// `openssl <subcommand>` for error messages and logs.
fn describe(program: &str, args: &[OsString]) -> String {
    match args.first() {
        Some(subcommand) => format!("{program} {}", subcommand.to_string_lossy()),
        None => program.to_string(),
    }
}

/// Arguments of `openssl ca`.
#[derive(Debug, Clone, Copy)]
pub struct CaSignArgs<'a> {
    pub config: &'a Path,
    /// Extension section of `config` to apply, overriding `x509_extensions`.
    pub extensions: Option<&'a str>,
    pub days: Option<u32>,
    pub digest: Option<DigestAlgorithm>,
    pub csr: &'a Path,
    pub out: &'a Path,
    /// Answer every prompt with yes.
    pub batch: bool,
}

/// The `openssl` operations the signing workflows need.
#[derive(Clone)]
pub struct OpenSsl {
    program: String,
    runner: Arc<dyn CommandRunner>,
}

impl OpenSsl {
    pub fn new(program: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    /// Run `program` as a child process with an optional timeout.
    pub fn system(program: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self::new(program, Arc::new(ProcessRunner::new(timeout)))
    }

    /// `genrsa -out <key> <bits>`
    pub async fn generate_key(&self, key_out: &Path, bits: u32) -> Result<(), CaError> {
        let argv = Args::new("genrsa").arg("-out").arg(key_out).arg(bits.to_string());
        self.run(argv).await.map(drop)
    }

    /// `req -new -config <conf> -newkey rsa:<bits> -keyout <key> -out <csr>`
    pub async fn create_csr(
        &self,
        config: &Path,
        bits: u32,
        key_out: &Path,
        csr_out: &Path,
    ) -> Result<(), CaError> {
        let argv = Args::new("req")
            .arg("-new")
            .arg("-config")
            .arg(config)
            .arg("-newkey")
            .arg(format!("rsa:{bits}"))
            .arg("-keyout")
            .arg(key_out)
            .arg("-out")
            .arg(csr_out);
        self.run(argv).await.map(drop)
    }

    /// `req -x509 -new -config <conf> -days <days> -key <key> -out <cert>`
    pub async fn self_sign(
        &self,
        config: &Path,
        days: u32,
        key: &Path,
        cert_out: &Path,
    ) -> Result<(), CaError> {
        let argv = Args::new("req")
            .arg("-x509")
            .arg("-new")
            .arg("-config")
            .arg(config)
            .arg("-days")
            .arg(days.to_string())
            .arg("-key")
            .arg(key)
            .arg("-out")
            .arg(cert_out);
        self.run(argv).await.map(drop)
    }

    /// `ca [-batch] -config <conf> [-extensions <sect>] [-days <n>] -notext [-md <digest>] -in <csr> -out <cert>`
    pub async fn ca_sign(&self, sign: CaSignArgs<'_>) -> Result<(), CaError> {
        let mut argv = Args::new("ca");
        if sign.batch {
            argv = argv.arg("-batch");
        }
        argv = argv.arg("-config").arg(sign.config);
        if let Some(section) = sign.extensions {
            argv = argv.arg("-extensions").arg(section);
        }
        if let Some(days) = sign.days {
            argv = argv.arg("-days").arg(days.to_string());
        }
        argv = argv.arg("-notext");
        if let Some(digest) = sign.digest {
            argv = argv.arg("-md").arg(digest.as_str());
        }
        argv = argv.arg("-in").arg(sign.csr).arg("-out").arg(sign.out);
        self.run(argv).await.map(drop)
    }

    /// `verify -CAfile <anchor> <target>`
    ///
    /// A non-zero exit becomes [`CaError::Verification`].
    pub async fn verify(&self, anchor: &Path, target: &Path) -> Result<(), CaError> {
        let argv = Args::new("verify").arg("-CAfile").arg(anchor).arg(target);
        match self.run(argv).await {
            Ok(_) => Ok(()),
            Err(CaError::Tool { stderr, .. }) => Err(CaError::Verification { stderr }),
            Err(e) => Err(e),
        }
    }

    /// `x509 -text -noout -in <cert>`, returning the dump.
    pub async fn render_text(&self, cert: &Path) -> Result<String, CaError> {
        let argv = Args::new("x509").arg("-text").arg("-noout").arg("-in").arg(cert);
        Ok(self.run(argv).await?.stdout)
    }

    async fn run(&self, argv: Args) -> Result<ToolOutput, CaError> {
        let argv = argv.0;
        tracing::debug!(program = %self.program, args = ?argv, "Running openssl");
        let result = self.runner.run(&self.program, &argv).await;
        if let Err(e) = &result {
            tracing::warn!(
                program = %self.program,
                subcommand = ?argv.first(),
                error = %e,
                "openssl failed"
            );
        }
        result
    }
}

/// Argument list builder, subcommand first.
struct Args(Vec<OsString>);

impl Args {
    fn new(subcommand: &str) -> Self {
        Self(vec![subcommand.into()])
    }

    fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.0.push(arg.as_ref().to_os_string());
        self
    }
}
