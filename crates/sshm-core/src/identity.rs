// ABOUTME: Copies identity files from the key repository into the SSH directory.
// ABOUTME: Private keys land as <ssh_dir>/<alias>/<name> with 0600, public keys beside them with 0644.

use crate::error::{Result, SshmError};
use crate::registry::{validate_alias, HostEntry};
use crate::repo::AuthIdentity;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Sets the permission bits of a copied key file.
pub type SetMode = fn(&Path, u32) -> io::Result<()>;

/// Places identity files where SSH will look for them.
#[derive(Debug, Clone)]
pub struct IdentityMaterializer {
    ssh_dir: PathBuf,
    dry_run: bool,
    set_mode: SetMode,
}

impl IdentityMaterializer {
    pub fn new(ssh_dir: impl Into<PathBuf>) -> Self {
        Self {
            ssh_dir: ssh_dir.into(),
            dry_run: false,
            set_mode: apply_mode,
        }
    }

    /// Only check sources and compute target paths; never touch the filesystem.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_set_mode(mut self, set_mode: SetMode) -> Self {
        self.set_mode = set_mode;
        self
    }

    pub fn ssh_dir(&self) -> &Path {
        &self.ssh_dir
    }

    /// Directory holding the copied keys of one host: always a direct child
    /// of the SSH directory.
    pub fn host_dir(&self, host_alias: &str) -> Result<PathBuf> {
        validate_alias(host_alias)?;
        Ok(self.ssh_dir.join(host_alias))
    }

    /// Where `auth`'s private key ends up for `host_alias`.
    pub fn target_path(&self, auth: &AuthIdentity, host_alias: &str) -> Result<PathBuf> {
        let name = auth
            .private_key_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "identity".into());
        Ok(self.host_dir(host_alias)?.join(name))
    }

    /// Copy the private key (and public key, if any) for `host_alias`.
    ///
    /// Safe to repeat: existing copies are overwritten and re-secured.
    pub fn materialize(&self, auth: &AuthIdentity, host_alias: &str) -> Result<PathBuf> {
        let source = &auth.private_key_path;
        let target = self.target_path(auth, host_alias)?;

        if self.dry_run {
            fs::File::open(source).map_err(|e| SshmError::IdentityFileMissing {
                path: source.clone(),
                source: e,
            })?;
            return Ok(target);
        }

        let key = fs::read(source).map_err(|e| SshmError::IdentityFileMissing {
            path: source.clone(),
            source: e,
        })?;

        let dir = self.host_dir(host_alias)?;
        fs::create_dir_all(&dir).map_err(|e| SshmError::io(&dir, e))?;
        write_file(&target, &key)?;
        self.secure(&target, 0o600)?;
        tracing::info!(host = %host_alias, path = %target.display(), "identity file installed");

        if let Some(public) = public_key_source(auth) {
            let public_target = public_copy_path(&target);
            match fs::read(&public) {
                Ok(bytes) => {
                    write_file(&public_target, &bytes)?;
                    self.secure(&public_target, 0o644)?;
                }
                Err(e) if auth.public_key_path.is_some() => {
                    return Err(SshmError::IdentityFileMissing {
                        path: public,
                        source: e,
                    });
                }
                Err(e) => {
                    tracing::warn!(path = %public.display(), "skipping public key: {e}");
                }
            }
        }

        Ok(target)
    }

    /// Delete the key copies of a removed host.
    ///
    /// Only files inside this materializer's per-host directory are touched;
    /// the directory goes too once it is empty.
    pub fn discard(&self, entry: &HostEntry) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        let Some(key) = &entry.materialized_key_path else {
            return Ok(());
        };

        let dir = match self.host_dir(&entry.host_alias) {
            Ok(dir) if dir.parent() == Some(self.ssh_dir.as_path()) => dir,
            _ => {
                tracing::warn!(
                    host = %entry.host_alias,
                    "alias does not name a directory inside the SSH directory; leaving its files"
                );
                return Ok(());
            }
        };
        if key.parent() != Some(dir.as_path()) {
            tracing::warn!(
                host = %entry.host_alias,
                path = %key.display(),
                "identity file is outside the managed directory; leaving it"
            );
            return Ok(());
        }

        for path in [key.clone(), public_copy_path(key)] {
            match fs::remove_file(&path) {
                Ok(()) => tracing::info!(path = %path.display(), "identity file removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(SshmError::io(&path, e)),
            }
        }

        // Non-empty directories are left in place.
        if fs::remove_dir(&dir).is_ok() {
            tracing::debug!(dir = %dir.display(), "host directory removed");
        }
        Ok(())
    }

    fn secure(&self, path: &Path, mode: u32) -> Result<()> {
        (self.set_mode)(path, mode).map_err(|e| SshmError::Permission {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

fn public_key_source(auth: &AuthIdentity) -> Option<PathBuf> {
    if let Some(explicit) = &auth.public_key_path {
        return Some(explicit.clone());
    }
    let sibling = public_copy_path(&auth.private_key_path);
    sibling.is_file().then_some(sibling)
}

fn public_copy_path(private: &Path) -> PathBuf {
    let mut name = private.as_os_str().to_os_string();
    name.push(".pub");
    PathBuf::from(name)
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;

        // Created owner-only so the key is never briefly world-readable.
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| SshmError::io(path, e))?;
        file.write_all(bytes).map_err(|e| SshmError::io(path, e))
    }
    #[cfg(not(unix))]
    {
        fs::write(path, bytes).map_err(|e| SshmError::io(path, e))
    }
}

fn apply_mode(path: &Path, mode: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn auth(dir: &Path, name: &str) -> AuthIdentity {
        AuthIdentity {
            id: "0".to_string(),
            user: None,
            private_key_path: dir.join(name),
            public_key_path: None,
            comment: None,
        }
    }

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let temp = TempDir::new().expect("should create temp dir");
        let repo = temp.path().join("repo");
        let ssh = temp.path().join("ssh");
        fs::create_dir_all(&repo).unwrap();
        (temp, repo, ssh)
    }

    #[test]
    fn test_materialize_copies_key_and_public_sibling() {
        let (_temp, repo, ssh) = setup();
        fs::write(repo.join("id_web"), "PRIVATE").unwrap();
        fs::write(repo.join("id_web.pub"), "PUBLIC").unwrap();

        let path = IdentityMaterializer::new(&ssh)
            .materialize(&auth(&repo, "id_web"), "prod-web")
            .expect("should materialize");

        assert_eq!(path, ssh.join("prod-web").join("id_web"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "PRIVATE");
        assert_eq!(
            fs::read_to_string(ssh.join("prod-web").join("id_web.pub")).unwrap(),
            "PUBLIC"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_private_key_is_0600_regardless_of_source_mode() {
        use std::os::unix::fs::PermissionsExt;

        let (_temp, repo, ssh) = setup();
        let source = repo.join("id_web");
        fs::write(&source, "PRIVATE").unwrap();
        fs::set_permissions(&source, fs::Permissions::from_mode(0o644)).unwrap();
        fs::write(repo.join("id_web.pub"), "PUBLIC").unwrap();

        let materializer = IdentityMaterializer::new(&ssh);
        let path = materializer.materialize(&auth(&repo, "id_web"), "h").unwrap();
        // Loosen the copy, then materialize again: it must be re-secured.
        fs::set_permissions(&path, fs::Permissions::from_mode(0o666)).unwrap();
        materializer.materialize(&auth(&repo, "id_web"), "h").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "private key should have 0600 permissions");
        let pub_mode = fs::metadata(ssh.join("h").join("id_web.pub"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(pub_mode, 0o644);
    }

    #[test]
    fn test_explicit_public_key_path() {
        let (_temp, repo, ssh) = setup();
        fs::write(repo.join("key"), "PRIVATE").unwrap();
        fs::write(repo.join("other.pub"), "PUBLIC").unwrap();
        let mut auth = auth(&repo, "key");
        auth.public_key_path = Some(repo.join("other.pub"));

        IdentityMaterializer::new(&ssh).materialize(&auth, "h").unwrap();

        assert_eq!(fs::read_to_string(ssh.join("h").join("key.pub")).unwrap(), "PUBLIC");
    }

    #[test]
    fn test_missing_explicit_public_key_fails() {
        let (_temp, repo, ssh) = setup();
        fs::write(repo.join("key"), "PRIVATE").unwrap();
        let mut auth = auth(&repo, "key");
        auth.public_key_path = Some(repo.join("gone.pub"));

        let err = IdentityMaterializer::new(&ssh).materialize(&auth, "h").unwrap_err();
        assert!(matches!(err, SshmError::IdentityFileMissing { .. }));
    }

    #[test]
    fn test_missing_private_key_touches_nothing() {
        let (_temp, repo, ssh) = setup();

        let err = IdentityMaterializer::new(&ssh)
            .materialize(&auth(&repo, "absent"), "h")
            .unwrap_err();

        assert!(matches!(err, SshmError::IdentityFileMissing { .. }));
        assert!(!ssh.exists());
    }

    #[test]
    fn test_dry_run_checks_source_only() {
        let (_temp, repo, ssh) = setup();
        fs::write(repo.join("key"), "PRIVATE").unwrap();
        let materializer = IdentityMaterializer::new(&ssh).dry_run(true);

        let path = materializer.materialize(&auth(&repo, "key"), "h").unwrap();
        assert_eq!(path, ssh.join("h").join("key"));
        assert!(!ssh.exists());

        let err = materializer.materialize(&auth(&repo, "absent"), "h").unwrap_err();
        assert!(matches!(err, SshmError::IdentityFileMissing { .. }));
    }

    #[test]
    fn test_discard_removes_copies_and_empty_dir() {
        let (_temp, repo, ssh) = setup();
        fs::write(repo.join("key"), "PRIVATE").unwrap();
        fs::write(repo.join("key.pub"), "PUBLIC").unwrap();
        let materializer = IdentityMaterializer::new(&ssh);
        let path = materializer.materialize(&auth(&repo, "key"), "h").unwrap();

        let entry = HostEntry {
            host_alias: "h".to_string(),
            remote_config_name: "r".to_string(),
            endpoint_id: None,
            auth_id: Some("0".to_string()),
            materialized_key_path: Some(path),
        };
        materializer.discard(&entry).expect("should discard");

        assert!(!ssh.join("h").exists());
        assert!(repo.join("key").exists(), "source must survive");
    }

    #[test]
    fn test_discard_keeps_foreign_files() {
        let (_temp, _repo, ssh) = setup();
        let elsewhere = ssh.join("other").join("key");
        fs::create_dir_all(elsewhere.parent().unwrap()).unwrap();
        fs::write(&elsewhere, "PRIVATE").unwrap();

        let entry = HostEntry {
            host_alias: "h".to_string(),
            remote_config_name: "r".to_string(),
            endpoint_id: None,
            auth_id: None,
            materialized_key_path: Some(elsewhere.clone()),
        };
        IdentityMaterializer::new(&ssh).discard(&entry).unwrap();

        assert!(elsewhere.exists());
    }

    fn entry(alias: &str, key: PathBuf) -> HostEntry {
        HostEntry {
            host_alias: alias.to_string(),
            remote_config_name: "r".to_string(),
            endpoint_id: None,
            auth_id: Some("0".to_string()),
            materialized_key_path: Some(key),
        }
    }

    #[test]
    fn test_alias_cannot_leave_the_ssh_dir() {
        let (_temp, repo, ssh) = setup();
        fs::write(repo.join("id_ed25519"), "REPO KEY").unwrap();
        fs::create_dir_all(&ssh).unwrap();
        fs::write(ssh.join("id_ed25519"), "USER KEY").unwrap();
        let materializer = IdentityMaterializer::new(&ssh);

        for alias in [".", "..", "a/b", "../x"] {
            let err = materializer
                .materialize(&auth(&repo, "id_ed25519"), alias)
                .unwrap_err();
            assert!(matches!(err, SshmError::InvalidAlias(_)), "alias {alias:?}");
        }

        assert_eq!(fs::read_to_string(ssh.join("id_ed25519")).unwrap(), "USER KEY");
        assert!(!repo.parent().unwrap().join("id_ed25519").exists());
    }

    #[test]
    fn test_discard_ignores_escaping_alias() {
        let (_temp, _repo, ssh) = setup();
        fs::create_dir_all(&ssh).unwrap();
        let user_key = ssh.join("id_ed25519");
        fs::write(&user_key, "USER KEY").unwrap();

        IdentityMaterializer::new(&ssh)
            .discard(&entry(".", user_key.clone()))
            .unwrap();

        assert!(user_key.exists(), "user key must survive");
    }

    #[test]
    fn test_failed_chmod_is_permission_error() {
        let (_temp, repo, ssh) = setup();
        fs::write(repo.join("key"), "PRIVATE").unwrap();
        let materializer = IdentityMaterializer::new(&ssh)
            .with_set_mode(|_, _| Err(io::Error::from(io::ErrorKind::PermissionDenied)));

        let err = materializer.materialize(&auth(&repo, "key"), "h").unwrap_err();

        match err {
            SshmError::Permission { path, .. } => assert_eq!(path, ssh.join("h").join("key")),
            other => panic!("expected Permission, got {other:?}"),
        }
    }
}
