//! Credential material in the working directory
//!
//! | File | Contents |
//! |------|----------|
//! | `output.json` | raw TTS bundle; its mtime is the bundle age |
//! | `usercert.crt` | certificate (entry 0) |
//! | `userkey.key` | private key (entry 1), mode 0600 |
//! | `userpasswd.txt` | key passphrase (entry 2) |
//! | `userproxy.pem` | generated proxy |
//! | `refresh_token` | scratch copy of the refresh token |
//! | `exchanged_token` | last access token, mode 0600 |
//! | `lock` | refresh lock marker |

use crate::error::{CertcacheError, CertcacheResult};
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Paths of all credential files under one working directory
#[derive(Debug, Clone)]
pub struct CredentialPaths {
    work_dir: PathBuf,
}

impl CredentialPaths {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn bundle(&self) -> PathBuf {
        self.work_dir.join("output.json")
    }

    pub fn certificate(&self) -> PathBuf {
        self.work_dir.join("usercert.crt")
    }

    pub fn private_key(&self) -> PathBuf {
        self.work_dir.join("userkey.key")
    }

    pub fn passphrase(&self) -> PathBuf {
        self.work_dir.join("userpasswd.txt")
    }

    pub fn proxy(&self) -> PathBuf {
        self.work_dir.join("userproxy.pem")
    }

    pub fn refresh_token(&self) -> PathBuf {
        self.work_dir.join("refresh_token")
    }

    pub fn exchanged_token(&self) -> PathBuf {
        self.work_dir.join("exchanged_token")
    }

    pub fn lock(&self) -> PathBuf {
        self.work_dir.join("lock")
    }

    /// Create the working directory if needed
    pub async fn ensure_work_dir(&self) -> CertcacheResult<()> {
        fs::create_dir_all(&self.work_dir).await.map_err(|e| {
            CertcacheError::io(
                format!("creating working directory {}", self.work_dir.display()),
                e,
            )
        })
    }

    /// Time since the bundle was last written, or `None` without a bundle
    pub async fn bundle_age(&self) -> CertcacheResult<Option<Duration>> {
        let path = self.bundle();
        match fs::metadata(&path).await {
            Ok(meta) => {
                let modified = meta
                    .modified()
                    .map_err(|e| CertcacheError::io("reading bundle mtime", e))?;
                Ok(Some(
                    SystemTime::now()
                        .duration_since(modified)
                        .unwrap_or(Duration::ZERO),
                ))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CertcacheError::io(
                format!("checking bundle {}", path.display()),
                e,
            )),
        }
    }

    /// Decompose `raw` into credential files, then record the bundle
    ///
    /// The bundle file is written last so that a fresh bundle always has
    /// its certificate, key and passphrase next to it.
    pub async fn store_bundle(&self, raw: &[u8]) -> CertcacheResult<CredentialBundle> {
        let bundle = CredentialBundle::parse(raw)?;

        write_file(&self.certificate(), bundle.certificate.as_bytes()).await?;
        write_private(&self.private_key(), bundle.private_key.as_bytes()).await?;
        write_file(&self.passphrase(), bundle.passphrase.as_bytes()).await?;
        write_file(&self.bundle(), raw).await?;

        debug!("Credential material written to {}", self.work_dir.display());
        Ok(bundle)
    }

    /// Read the key passphrase fed to the generator
    pub async fn read_passphrase(&self) -> CertcacheResult<String> {
        let path = self.passphrase();
        fs::read_to_string(&path)
            .await
            .map_err(|e| CertcacheError::io(format!("reading {}", path.display()), e))
    }

    /// Scratch copy of the refresh token, if present and non-blank
    pub async fn read_refresh_token(&self) -> CertcacheResult<Option<String>> {
        let path = self.refresh_token();
        match fs::read_to_string(&path).await {
            Ok(raw) => {
                let token = raw.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CertcacheError::io(format!("reading {}", path.display()), e)),
        }
    }

    pub async fn write_refresh_token(&self, token: &str) -> CertcacheResult<()> {
        write_private(&self.refresh_token(), token.as_bytes()).await
    }

    pub async fn write_exchanged_token(&self, token: &str) -> CertcacheResult<()> {
        write_private(&self.exchanged_token(), token.as_bytes()).await
    }

    /// Remove a leftover proxy so only a fresh one is ever returned
    pub async fn clear_proxy(&self) -> CertcacheResult<()> {
        match fs::remove_file(self.proxy()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CertcacheError::io("removing previous proxy", e)),
        }
    }
}

#[derive(Deserialize)]
struct RawBundle {
    credential: RawCredential,
}

#[derive(Deserialize)]
struct RawCredential {
    entries: Vec<RawEntry>,
}

#[derive(Deserialize)]
struct RawEntry {
    value: serde_json::Value,
}

/// Certificate, key and passphrase taken from a TTS bundle
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    pub certificate: String,
    pub private_key: String,
    pub passphrase: String,
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("certificate", &format!("{} bytes", self.certificate.len()))
            .field("private_key", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

impl CredentialBundle {
    /// Parse `credential.entries[0..3]` from bundle JSON
    pub fn parse(raw: &[u8]) -> CertcacheResult<Self> {
        let bundle: RawBundle = serde_json::from_slice(raw)
            .map_err(|e| CertcacheError::BundleInvalid(e.to_string()))?;

        let mut values = bundle.credential.entries.into_iter().map(|e| e.value);
        let mut next = |what: &str| {
            values
                .next()
                .map(entry_text)
                .ok_or_else(|| CertcacheError::BundleInvalid(format!("missing {} entry", what)))
        };

        Ok(Self {
            certificate: next("certificate")?,
            private_key: next("private key")?,
            passphrase: next("passphrase")?,
        })
    }
}

fn entry_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> CertcacheResult<()> {
    fs::write(path, contents)
        .await
        .map_err(|e| CertcacheError::io(format!("writing {}", path.display()), e))
}

/// Write a secret, creating the file as owner-only
///
/// The mode is tightened before any contents land, so a file left over with
/// looser permissions never holds the new secret.
async fn write_private(path: &Path, contents: &[u8]) -> CertcacheResult<()> {
    let writing = |e: std::io::Error| CertcacheError::io(format!("writing {}", path.display()), e);

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await.map_err(writing)?;
    restrict(path, &file).await?;
    file.write_all(contents).await.map_err(writing)?;
    file.flush().await.map_err(writing)
}

/// Make an open file readable and writable by the owner only
async fn restrict(path: &Path, file: &fs::File) -> CertcacheResult<()> {
    let denied = |source: std::io::Error| CertcacheError::Permission {
        path: path.to_path_buf(),
        source,
    };

    #[cfg(test)]
    if DENY_RESTRICT.with(std::cell::Cell::get) {
        return Err(denied(std::io::Error::from(ErrorKind::PermissionDenied)));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(denied)?;
    }
    #[cfg(not(unix))]
    let _ = (file, denied);
    Ok(())
}

#[cfg(test)]
thread_local! {
    static DENY_RESTRICT: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Make permission changes on this thread fail until reset
#[cfg(test)]
pub(crate) fn deny_restrict(deny: bool) {
    DENY_RESTRICT.with(|d| d.set(deny));
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::TempDir;

    const BUNDLE: &str = r#"{"credential":{"entries":[
        {"name":"Certificate","type":"textfile","value":"CERT"},
        {"name":"Private Key","type":"textfile","value":"KEY"},
        {"name":"Passphrase","type":"text","value":"secret"}
    ]}}"#;

    #[test]
    fn parse_takes_first_three_entries() {
        let bundle = CredentialBundle::parse(BUNDLE.as_bytes()).unwrap();
        assert_eq!(bundle.certificate, "CERT");
        assert_eq!(bundle.private_key, "KEY");
        assert_eq!(bundle.passphrase, "secret");
    }

    #[test]
    fn parse_rejects_short_bundle() {
        let raw = br#"{"credential":{"entries":[{"value":"CERT"}]}}"#;
        let err = CredentialBundle::parse(raw).unwrap_err();
        assert!(matches!(err, CertcacheError::BundleInvalid(msg) if msg.contains("private key")));
    }

    #[test]
    fn parse_rejects_non_json() {
        let err = CredentialBundle::parse(b"<html>").unwrap_err();
        assert!(matches!(err, CertcacheError::BundleInvalid(_)));
    }

    #[test]
    fn debug_hides_secrets() {
        let bundle = CredentialBundle::parse(BUNDLE.as_bytes()).unwrap();
        let shown = format!("{:?}", bundle);
        assert!(!shown.contains("KEY"));
        assert!(!shown.contains("secret"));
    }

    #[tokio::test]
    async fn store_bundle_writes_material() {
        let dir = TempDir::new().unwrap();
        let paths = CredentialPaths::new(dir.path());

        paths.store_bundle(BUNDLE.as_bytes()).await.unwrap();

        assert_eq!(std::fs::read_to_string(paths.certificate()).unwrap(), "CERT");
        assert_eq!(std::fs::read_to_string(paths.private_key()).unwrap(), "KEY");
        assert_eq!(paths.read_passphrase().await.unwrap(), "secret");
        assert!(paths.bundle().exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(paths.private_key())
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn existing_key_file_is_tightened_before_write() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let paths = CredentialPaths::new(dir.path());
        std::fs::write(paths.private_key(), "OLD").unwrap();
        std::fs::set_permissions(paths.private_key(), std::fs::Permissions::from_mode(0o644))
            .unwrap();

        paths.store_bundle(BUNDLE.as_bytes()).await.unwrap();

        let meta = std::fs::metadata(paths.private_key()).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        assert_eq!(std::fs::read_to_string(paths.private_key()).unwrap(), "KEY");

        paths.write_exchanged_token("access").await.unwrap();
        let meta = std::fs::metadata(paths.exchanged_token()).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[tokio::test]
    async fn permission_failure_writes_no_key_or_bundle() {
        let dir = TempDir::new().unwrap();
        let paths = CredentialPaths::new(dir.path());

        deny_restrict(true);
        let result = paths.store_bundle(BUNDLE.as_bytes()).await;
        deny_restrict(false);

        assert!(matches!(result, Err(CertcacheError::Permission { .. })));
        assert_eq!(std::fs::read_to_string(paths.private_key()).unwrap(), "");
        assert!(!paths.bundle().exists());
    }

    #[tokio::test]
    async fn invalid_bundle_leaves_no_bundle_file() {
        let dir = TempDir::new().unwrap();
        let paths = CredentialPaths::new(dir.path());

        assert!(paths.store_bundle(b"{}").await.is_err());
        assert!(!paths.bundle().exists());
    }

    #[tokio::test]
    async fn bundle_age_tracks_mtime() {
        let dir = TempDir::new().unwrap();
        let paths = CredentialPaths::new(dir.path());
        assert_eq!(paths.bundle_age().await.unwrap(), None);

        std::fs::write(paths.bundle(), BUNDLE).unwrap();
        let when = SystemTime::now() - Duration::from_secs(3600);
        filetime::set_file_mtime(paths.bundle(), FileTime::from_system_time(when)).unwrap();

        let age = paths.bundle_age().await.unwrap().unwrap();
        assert!(age >= Duration::from_secs(3599));
    }

    #[tokio::test]
    async fn refresh_token_scratch_file() {
        let dir = TempDir::new().unwrap();
        let paths = CredentialPaths::new(dir.path());
        assert_eq!(paths.read_refresh_token().await.unwrap(), None);

        paths.write_refresh_token("rt-1\n").await.unwrap();
        assert_eq!(
            paths.read_refresh_token().await.unwrap().as_deref(),
            Some("rt-1")
        );

        std::fs::write(paths.refresh_token(), "  \n").unwrap();
        assert_eq!(paths.read_refresh_token().await.unwrap(), None);
    }
}
