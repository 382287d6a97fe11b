//! External proxy certificate generator

use crate::config::schema::ProxyConfig;
use crate::error::{CertcacheError, CertcacheResult};
use crate::proxy::material::CredentialPaths;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info};

/// Runs `grid-proxy-init` (or a compatible command) over credential files
#[derive(Debug, Clone)]
pub struct ProxyGenerator {
    program: String,
    leading_args: Vec<String>,
    validity: String,
}

impl ProxyGenerator {
    /// `command` is the program optionally followed by fixed arguments
    pub fn new(command: &str, validity: impl Into<String>) -> Self {
        let mut words = command.split_whitespace().map(str::to_string);
        let program = words.next().unwrap_or_default();
        Self {
            program,
            leading_args: words.collect(),
            validity: validity.into(),
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(&config.generator, config.validity.clone())
    }

    /// Generate the proxy from the certificate, key and passphrase in `paths`
    ///
    /// Returns the proxy path. The passphrase is fed on stdin.
    pub async fn generate(&self, paths: &CredentialPaths) -> CertcacheResult<PathBuf> {
        let passphrase = paths.read_passphrase().await?;
        let key = paths.private_key();
        let cert = paths.certificate();
        let proxy = paths.proxy();
        paths.clear_proxy().await?;

        debug!("Running {} -valid {}", self.program, self.validity);
        let mut child = Command::new(&self.program)
            .args(&self.leading_args)
            .arg("-valid")
            .arg(&self.validity)
            .arg("-key")
            .arg(&key)
            .arg("-cert")
            .arg(&cert)
            .arg("-out")
            .arg(&proxy)
            .arg("-pwstdin")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CertcacheError::Generator {
                program: self.program.clone(),
                code: -1,
                stderr: e.to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // The generator may exit without reading its input
            match stdin.write_all(passphrase.as_bytes()).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                Err(e) => return Err(CertcacheError::io("writing generator stdin", e)),
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CertcacheError::command_failed(&self.program, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            error!("{} failed with exit code {}", self.program, code);
            error!("{} stdout: {}", self.program, stdout.trim());
            error!("{} stderr: {}", self.program, stderr.trim());
            return Err(CertcacheError::Generator {
                program: self.program.clone(),
                code,
                stderr: stderr.trim().to_string(),
            });
        }

        if !proxy.exists() {
            return Err(CertcacheError::GeneratorOutputMissing {
                program: self.program.clone(),
                path: proxy,
            });
        }

        info!("Proxy generated at {}", proxy.display());
        Ok(proxy)
    }
}
