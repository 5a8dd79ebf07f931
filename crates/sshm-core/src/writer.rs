// ABOUTME: Reconciles the host registry into the destination SSH config file.
// ABOUTME: Plans the new content, backs up the old file and swaps in the result atomically.

use crate::block::{self, Segment};
use crate::diff::line_diff;
use crate::error::{Result, SshmError};
use crate::identity::IdentityMaterializer;
use crate::registry::{validate_alias, HostEntry, HostRegistry};
use crate::repo::{AuthIdentity, Endpoint, RemoteConfig, RepoConfig};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Final step of a flush: make `contents` the new content of `dest`.
pub trait Persist {
    fn persist(&self, dest: &Path, contents: &[u8]) -> io::Result<()>;
}

/// Writes a temp file next to the destination, syncs it and renames it over.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtomicPersist;

impl Persist for AtomicPersist {
    fn persist(&self, dest: &Path, contents: &[u8]) -> io::Result<()> {
        let parent = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(contents)?;
        if let Ok(meta) = fs::metadata(dest) {
            fs::set_permissions(temp.path(), meta.permissions())?;
        }
        temp.as_file().sync_all()?;
        temp.persist(dest).map_err(|e| e.error)?;
        Ok(())
    }
}

/// What a flush did (or, in dry-run mode, would do).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub destination: PathBuf,
    pub backup: Option<PathBuf>,
    pub changed: bool,
    pub dry_run: bool,
    /// Line diff of the change; only computed for dry runs.
    pub diff: String,
    pub managed_blocks: usize,
}

type Clock = Box<dyn Fn() -> DateTime<Utc>>;

/// Owns the destination config file.
pub struct ConfigWriter {
    destination: PathBuf,
    materializer: IdentityMaterializer,
    dry_run: bool,
    persist: Box<dyn Persist>,
    clock: Clock,
}

impl ConfigWriter {
    pub fn new(destination: impl Into<PathBuf>, ssh_dir: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            materializer: IdentityMaterializer::new(ssh_dir),
            dry_run: false,
            persist: Box::new(AtomicPersist),
            clock: Box::new(Utc::now),
        }
    }

    /// Compute and report the change without backing up, copying keys or writing.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self.materializer = self.materializer.dry_run(dry_run);
        self
    }

    pub fn with_materializer(mut self, materializer: IdentityMaterializer) -> Self {
        self.materializer = materializer.dry_run(self.dry_run);
        self
    }

    pub fn with_persist(mut self, persist: impl Persist + 'static) -> Self {
        self.persist = Box::new(persist);
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn materializer(&self) -> &IdentityMaterializer {
        &self.materializer
    }

    /// Current destination text; an absent file reads as empty.
    pub fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.destination) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(SshmError::io(&self.destination, e)),
        }
    }

    /// Parsed segments of the destination.
    pub fn segments(&self) -> Result<Vec<Segment>> {
        Ok(block::parse(&self.read()?))
    }

    /// Registry rebuilt from the destination's managed blocks.
    pub fn load_registry(&self) -> Result<HostRegistry> {
        let registry = HostRegistry::from_segments(&self.segments()?);
        tracing::debug!(
            path = %self.destination.display(),
            hosts = registry.len(),
            "loaded managed hosts"
        );
        Ok(registry)
    }

    /// Bring the destination in line with `registry`.
    ///
    /// Foreign text is kept byte for byte, live blocks are regenerated in
    /// place, blocks for unregistered aliases are dropped and new entries are
    /// appended at the end. Every reference and identity file is checked
    /// before anything is written; on error the destination is untouched.
    pub fn flush(&self, registry: &mut HostRegistry, repo: &RepoConfig) -> Result<FlushReport> {
        let current = self.read()?;
        let segments = block::parse(&current);

        let planned = self.plan(registry, repo)?;
        let output = assemble(&current, &segments, registry, &planned);

        let mut report = FlushReport {
            destination: self.destination.clone(),
            backup: None,
            changed: output != current,
            dry_run: self.dry_run,
            diff: if self.dry_run {
                line_diff(&current, &output)
            } else {
                String::new()
            },
            managed_blocks: registry.len(),
        };

        if !report.changed {
            tracing::debug!(path = %self.destination.display(), "ssh config already up to date");
        } else if !self.dry_run {
            if !current.is_empty() {
                report.backup = Some(self.backup()?);
            }
            self.persist
                .persist(&self.destination, output.as_bytes())
                .map_err(|e| SshmError::io(&self.destination, e))?;
            tracing::info!(
                path = %self.destination.display(),
                hosts = registry.len(),
                "ssh config written"
            );
        }

        for (alias, plan) in planned {
            if let Some(entry) = registry.get_mut(&alias) {
                entry.materialized_key_path = plan.key_path;
            }
        }
        Ok(report)
    }

    fn plan(&self, registry: &HostRegistry, repo: &RepoConfig) -> Result<HashMap<String, Planned>> {
        let mut resolved = Vec::with_capacity(registry.len());
        for entry in registry.iter() {
            validate_alias(&entry.host_alias)?;
            let (remote, endpoint, auth) = resolve(entry, repo)?;
            if let Some(auth) = auth {
                fs::File::open(&auth.private_key_path).map_err(|e| {
                    SshmError::IdentityFileMissing {
                        path: auth.private_key_path.clone(),
                        source: e,
                    }
                })?;
            }
            resolved.push((entry, remote, endpoint, auth));
        }

        let mut planned = HashMap::with_capacity(resolved.len());
        for (entry, remote, endpoint, auth) in resolved {
            let key_path = match auth {
                Some(auth) => Some(self.materializer.materialize(auth, &entry.host_alias)?),
                None => None,
            };
            let rendered_entry = HostEntry {
                materialized_key_path: key_path.clone(),
                ..entry.clone()
            };
            let text = block::render(&rendered_entry, remote, endpoint, auth);
            tracing::debug!(host = %entry.host_alias, "planned host block");
            planned.insert(entry.host_alias.clone(), Planned { text, key_path });
        }
        Ok(planned)
    }

    fn backup(&self) -> Result<PathBuf> {
        let stamp = (self.clock)().format("%Y%m%dT%H%M%S%.3fZ").to_string();
        let mut base = OsString::from(self.destination.as_os_str());
        base.push(".bak.");
        base.push(&stamp);

        let mut candidate = PathBuf::from(&base);
        let mut n = 1;
        while candidate.exists() {
            let mut name = base.clone();
            name.push(format!(".{n}"));
            candidate = PathBuf::from(name);
            n += 1;
        }

        fs::copy(&self.destination, &candidate).map_err(|e| SshmError::io(&candidate, e))?;
        tracing::info!(path = %candidate.display(), "backup created");
        Ok(candidate)
    }
}

struct Planned {
    text: String,
    key_path: Option<PathBuf>,
}

fn resolve<'r>(
    entry: &HostEntry,
    repo: &'r RepoConfig,
) -> Result<(&'r RemoteConfig, Option<&'r Endpoint>, Option<&'r AuthIdentity>)> {
    let remote = repo.remote(&entry.remote_config_name)?;
    let unknown = |kind: &'static str, value: &str| SshmError::UnknownReference {
        kind,
        value: value.to_string(),
        context: Some(remote.name.clone()),
    };
    let endpoint = match entry.endpoint_id.as_deref() {
        Some(id) => Some(remote.endpoint(id).ok_or_else(|| unknown("endpoint", id))?),
        None => None,
    };
    let auth = match entry.auth_id.as_deref() {
        Some(id) => Some(remote.auth(id).ok_or_else(|| unknown("auth identity", id))?),
        None => None,
    };
    Ok((remote, endpoint, auth))
}

fn assemble(
    current: &str,
    segments: &[Segment],
    registry: &HostRegistry,
    planned: &HashMap<String, Planned>,
) -> String {
    let crlf = current.contains("\r\n");
    let eol = |text: &str| {
        if crlf {
            text.replace('\n', "\r\n")
        } else {
            text.to_string()
        }
    };

    let mut out = String::with_capacity(current.len());
    let mut emitted: HashSet<&str> = HashSet::new();

    for segment in segments {
        match segment {
            Segment::Foreign(text) => out.push_str(text),
            Segment::Managed(managed) => {
                let alias = managed.header.alias.as_str();
                match planned.get(alias) {
                    Some(plan) if emitted.insert(alias) => {
                        if managed.edited {
                            tracing::warn!(
                                host = %alias,
                                "managed block was edited by hand; regenerating it (the backup keeps the edits)"
                            );
                        }
                        out.push_str(&eol(&plan.text));
                    }
                    _ => tracing::debug!(host = %alias, "dropping stale managed block"),
                }
            }
        }
    }

    let newline = if crlf { "\r\n" } else { "\n" };
    for entry in registry.iter() {
        if emitted.contains(entry.host_alias.as_str()) {
            continue;
        }
        let Some(plan) = planned.get(&entry.host_alias) else {
            continue;
        };
        if !out.is_empty() {
            if !out.ends_with('\n') {
                out.push_str(newline);
            }
            if !out.ends_with(&format!("{newline}{newline}")) {
                out.push_str(newline);
            }
        }
        out.push_str(&eol(&plan.text));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        dest: PathBuf,
        ssh: PathBuf,
        repo: RepoConfig,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().expect("should create temp dir");
        let repo_dir = temp.path().join("repo");
        let ssh = temp.path().join("ssh");
        fs::create_dir_all(repo_dir.join("keys")).unwrap();
        fs::create_dir_all(&ssh).unwrap();
        fs::write(repo_dir.join("keys/web"), "PRIVATE").unwrap();
        let json = r#"[
            {"ServerName": "web",
             "Endpoint": [{"HostName": "10.0.0.1", "Port": 22}],
             "Authentication": [{"User": "deploy", "IdentityFile": "keys/web"}]},
            {"ServerName": "bare", "Endpoint": [{"HostName": "10.0.0.9"}]}
        ]"#;
        let repo = RepoConfig::parse(json, &repo_dir.join("config.json"), &repo_dir).unwrap();
        Fixture {
            dest: ssh.join("config"),
            ssh,
            repo,
            _temp: temp,
        }
    }

    fn fixed_clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
    }

    #[test]
    fn test_flush_into_absent_file() {
        let f = fixture();
        let mut registry = HostRegistry::new();
        registry.add("prod-web", "web", None, None, &f.repo).unwrap();

        let report = ConfigWriter::new(&f.dest, &f.ssh)
            .flush(&mut registry, &f.repo)
            .expect("flush should succeed");

        assert!(report.changed);
        assert_eq!(report.backup, None);
        let text = fs::read_to_string(&f.dest).unwrap();
        assert!(text.starts_with("# >>> ssh-manager v1 host=prod-web"));
        assert!(text.contains("    IdentityFile "));
        assert_eq!(
            registry.get("prod-web").unwrap().materialized_key_path,
            Some(f.ssh.join("prod-web").join("web"))
        );
    }

    #[test]
    fn test_second_flush_is_noop() {
        let f = fixture();
        let mut registry = HostRegistry::new();
        registry.add("a", "web", None, None, &f.repo).unwrap();
        registry.add("b", "bare", None, None, &f.repo).unwrap();
        let writer = ConfigWriter::new(&f.dest, &f.ssh);
        writer.flush(&mut registry, &f.repo).unwrap();
        let first = fs::read_to_string(&f.dest).unwrap();

        let mut reloaded = writer.load_registry().unwrap();
        let report = writer.flush(&mut reloaded, &f.repo).unwrap();

        assert!(!report.changed);
        assert!(report.diff.is_empty());
        assert_eq!(report.backup, None);
        assert_eq!(fs::read_to_string(&f.dest).unwrap(), first);
    }

    #[test]
    fn test_backup_name_uses_clock_and_avoids_collisions() {
        let f = fixture();
        fs::write(&f.dest, "Host mine\n").unwrap();
        let writer = ConfigWriter::new(&f.dest, &f.ssh).with_clock(fixed_clock);

        let mut registry = HostRegistry::new();
        registry.add("a", "bare", None, None, &f.repo).unwrap();
        let first = writer.flush(&mut registry, &f.repo).unwrap().backup.unwrap();
        registry.remove("a").unwrap();
        let second = writer.flush(&mut registry, &f.repo).unwrap().backup.unwrap();

        assert_eq!(
            first.file_name().unwrap().to_str().unwrap(),
            "config.bak.20240501T123000.000Z"
        );
        assert_eq!(
            second.file_name().unwrap().to_str().unwrap(),
            "config.bak.20240501T123000.000Z.1"
        );
        assert_eq!(fs::read_to_string(&first).unwrap(), "Host mine\n");
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let f = fixture();
        fs::write(&f.dest, "Host mine\n").unwrap();
        let mut registry = HostRegistry::new();
        registry.add("prod-web", "web", None, None, &f.repo).unwrap();

        let report = ConfigWriter::new(&f.dest, &f.ssh)
            .dry_run(true)
            .flush(&mut registry, &f.repo)
            .unwrap();

        assert!(report.changed);
        assert!(report.dry_run);
        assert_eq!(report.backup, None);
        assert!(report.diff.contains("+Host prod-web"));
        assert_eq!(fs::read_to_string(&f.dest).unwrap(), "Host mine\n");
        assert!(!f.ssh.join("prod-web").exists());
        assert_eq!(fs::read_dir(&f.ssh).unwrap().count(), 1);
    }

    #[test]
    fn test_appended_block_is_separated_from_foreign_text() {
        let f = fixture();
        fs::write(&f.dest, "Host mine\n    User me").unwrap();
        let mut registry = HostRegistry::new();
        registry.add("b", "bare", None, None, &f.repo).unwrap();

        ConfigWriter::new(&f.dest, &f.ssh).flush(&mut registry, &f.repo).unwrap();

        let text = fs::read_to_string(&f.dest).unwrap();
        assert!(text.starts_with("Host mine\n    User me\n\n# >>> ssh-manager v1 host=b "));
    }

    #[test]
    fn test_unknown_reference_at_flush_leaves_file() {
        let f = fixture();
        fs::write(&f.dest, "Host mine\n").unwrap();
        let mut registry = HostRegistry::from_segments(&block::parse(
            "# >>> ssh-manager v1 host=x remote=gone endpoint=- auth=- sum=0000000000000000\n\
             Host x\n\
             # <<< ssh-manager host=x\n",
        ));

        let err = ConfigWriter::new(&f.dest, &f.ssh)
            .flush(&mut registry, &f.repo)
            .unwrap_err();

        assert!(matches!(err, SshmError::UnknownReference { .. }));
        assert_eq!(fs::read_to_string(&f.dest).unwrap(), "Host mine\n");
    }

    #[test]
    fn test_diff_only_computed_for_dry_run() {
        let f = fixture();
        let mut registry = HostRegistry::new();
        registry.add("b", "bare", None, None, &f.repo).unwrap();

        let report = ConfigWriter::new(&f.dest, &f.ssh)
            .flush(&mut registry, &f.repo)
            .unwrap();

        assert!(report.changed);
        assert!(report.diff.is_empty());
    }

    #[test]
    fn test_failed_chmod_aborts_flush() {
        let f = fixture();
        fs::write(&f.dest, "Host mine\n").unwrap();
        let mut registry = HostRegistry::new();
        registry.add("prod-web", "web", None, None, &f.repo).unwrap();
        let materializer = IdentityMaterializer::new(&f.ssh)
            .with_set_mode(|_, _| Err(io::Error::from(io::ErrorKind::PermissionDenied)));

        let err = ConfigWriter::new(&f.dest, &f.ssh)
            .with_materializer(materializer)
            .flush(&mut registry, &f.repo)
            .unwrap_err();

        assert!(matches!(err, SshmError::Permission { .. }));
        assert_eq!(fs::read_to_string(&f.dest).unwrap(), "Host mine\n");
        let backups = fs::read_dir(&f.ssh)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".bak."))
            .count();
        assert_eq!(backups, 0);
    }

    #[test]
    fn test_block_alias_naming_parent_dir_is_rejected() {
        let f = fixture();
        let text = "# >>> ssh-manager v1 host=.. remote=web endpoint=0 auth=0 sum=0000000000000000\n\
                    Host ..\n\
                    # <<< ssh-manager host=..\n";
        fs::write(&f.dest, text).unwrap();
        let writer = ConfigWriter::new(&f.dest, &f.ssh);
        let mut registry = writer.load_registry().unwrap();

        let err = writer.flush(&mut registry, &f.repo).unwrap_err();

        assert!(matches!(err, SshmError::InvalidAlias(_)));
        assert_eq!(fs::read_to_string(&f.dest).unwrap(), text);
        assert!(!f.ssh.parent().unwrap().join("web").exists());
    }
}
