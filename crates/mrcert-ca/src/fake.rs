//! Recording stand-in for the `openssl` binary.

use std::ffi::OsString;
use std::path::Path;
use std::sync::Mutex;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::error::CaError;
use crate::openssl::{CommandRunner, ToolOutput};

/// Records every invocation and writes plausible output files.
///
/// Certificates are unique per call so chain contents can be checked
/// byte for byte.
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<Vec<String>>>,
    fail_on: Mutex<Option<String>>,
}

impl FakeRunner {
    /// Every recorded argument list, subcommand first.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn subcommands(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call[0].clone()).collect()
    }

    /// Make every later call of `subcommand` exit non-zero.
    pub fn fail_on(&self, subcommand: &str) {
        *self.fail_on.lock().unwrap() = Some(subcommand.to_string());
    }

    fn handle(&self, args: Vec<String>) -> Result<ToolOutput, CaError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(args.clone());
            calls.len()
        };

        let subcommand = args[0].as_str();
        if self.fail_on.lock().unwrap().as_deref() == Some(subcommand) {
            return Err(CaError::Tool {
                command: format!("openssl {subcommand}"),
                status: "exit status: 1".into(),
                stderr: format!("fake {subcommand} failure"),
            });
        }

        let value_of = |flag: &str| {
            args.iter()
                .position(|arg| arg == flag)
                .and_then(|i| args.get(i + 1))
                .map(Path::new)
        };

        match subcommand {
            "genrsa" => write(value_of("-out"), &fake_pem("PRIVATE KEY", index))?,
            "req" if args.iter().any(|a| a == "-x509") => {
                write(value_of("-out"), &fake_pem("CERTIFICATE", index))?
            }
            "req" => {
                write(value_of("-keyout"), &fake_pem("PRIVATE KEY", index))?;
                write(value_of("-out"), &fake_pem("CERTIFICATE REQUEST", index))?;
            }
            "ca" => write(value_of("-out"), &fake_pem("CERTIFICATE", index))?,
            "x509" => {
                let cert = value_of("-in").map(|p| p.display().to_string());
                return Ok(ToolOutput {
                    stdout: format!("Certificate:\n    fake dump of {}\n", cert.unwrap_or_default()),
                    stderr: String::new(),
                });
            }
            _ => {}
        }
        Ok(ToolOutput::default())
    }
}

impl CommandRunner for FakeRunner {
    fn run<'a>(
        &'a self,
        _program: &'a str,
        args: &'a [OsString],
    ) -> BoxFuture<'a, Result<ToolOutput, CaError>> {
        let args = args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        async move {
            tokio::task::yield_now().await;
            self.handle(args)
        }
        .boxed()
    }
}

pub fn fake_pem(label: &str, index: usize) -> String {
    format!("-----BEGIN {label}-----\nfake-{index}\n-----END {label}-----\n")
}

fn write(path: Option<&Path>, contents: &str) -> Result<(), CaError> {
    let path = path.ok_or_else(|| CaError::Invariant("fake openssl: missing output flag".into()))?;
    std::fs::write(path, contents)?;
    Ok(())
}
