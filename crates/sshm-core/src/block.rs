// ABOUTME: Managed host block rendering and marker-based segment parsing.
// ABOUTME: Turns HostEntries into SSH Host blocks and splits config text into foreign/managed parts.

//! # Managed block format
//!
//! Every block this tool owns is wrapped in a pair of marker comments:
//!
//! ```text
//! # >>> ssh-manager v1 host=prod-web remote=web endpoint=0 auth=0 sum=3f1c0e7a9b2d4c61
//! Host prod-web
//!     HostName 10.0.0.1
//!     Port 22
//!     User deploy
//!     IdentityFile /home/me/.ssh/prod-web/id_ed25519
//! # <<< ssh-manager host=prod-web
//! ```
//!
//! Header values are percent-encoded so they never contain whitespace;
//! `endpoint=-`/`auth=-` means none was selected. `sum` is the first 16 hex
//! digits of SHA-256 over the body lines, which lets a later parse notice hand
//! edits. Blocks carrying another version tag are left alone as foreign text.
//!
//! Parsing is fail-soft: a begin marker without its end marker turns the rest
//! of the file into foreign text instead of raising an error.

use crate::registry::HostEntry;
use crate::repo::{AuthIdentity, Endpoint, RemoteConfig};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Version tag written into every begin marker.
pub const MARKER_VERSION: &str = "v1";

const BEGIN_PREFIX: &str = "# >>> ssh-manager ";
const END_PREFIX: &str = "# <<< ssh-manager ";
const INDENT: &str = "    ";
const NO_ID: &str = "-";

const MARKER_VALUE: &AsciiSet = &CONTROLS.add(b' ').add(b'%').add(b'=').add(b'"').add(b'#');

/// Identity recorded in a managed block's begin marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub alias: String,
    pub remote: String,
    pub endpoint_id: Option<String>,
    pub auth_id: Option<String>,
    pub checksum: String,
}

/// A block owned by this tool, exactly as it appeared in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedBlock {
    pub header: BlockHeader,
    /// Raw text from the begin marker through the end marker's line ending.
    pub text: String,
    /// True when the body no longer matches the recorded checksum.
    pub edited: bool,
}

impl ManagedBlock {
    /// The `IdentityFile` value inside the block, if any.
    pub fn identity_file(&self) -> Option<String> {
        self.text.lines().find_map(|line| {
            let line = line.trim();
            let (key, value) = line.split_once(char::is_whitespace)?;
            key.eq_ignore_ascii_case("IdentityFile")
                .then(|| value.trim().trim_matches('"').to_string())
        })
    }
}

/// One piece of an SSH config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Text this tool does not own; preserved byte for byte.
    Foreign(String),
    Managed(ManagedBlock),
}

impl Segment {
    pub fn text(&self) -> &str {
        match self {
            Segment::Foreign(text) => text,
            Segment::Managed(block) => &block.text,
        }
    }
}

/// Render the canonical block for `entry`.
///
/// `endpoint` and `auth` are the entry's references already resolved against
/// `remote`. The output is byte-identical for identical inputs and always ends
/// with a newline.
pub fn render(
    entry: &HostEntry,
    remote: &RemoteConfig,
    endpoint: Option<&Endpoint>,
    auth: Option<&AuthIdentity>,
) -> String {
    let mut body = Vec::new();

    if let Some(comment) = &remote.comment {
        body.push(format!("# {comment}"));
    }
    body.push(format!("Host {}", entry.host_alias));

    if let Some(endpoint) = endpoint {
        if let Some(comment) = &endpoint.comment {
            body.push(format!("{INDENT}# {comment}"));
        }
        body.push(format!("{INDENT}HostName {}", endpoint.host));
        if let Some(port) = endpoint.port {
            body.push(format!("{INDENT}Port {port}"));
        }
    }

    if let Some(comment) = auth.and_then(|a| a.comment.as_ref()) {
        body.push(format!("{INDENT}# {comment}"));
    }
    let user = auth
        .and_then(|a| a.user.as_ref())
        .or_else(|| endpoint.and_then(|e| e.user.as_ref()));
    if let Some(user) = user {
        body.push(format!("{INDENT}User {user}"));
    }
    if let Some(path) = &entry.materialized_key_path {
        body.push(format!("{INDENT}IdentityFile {}", quote_path(path)));
    }

    for extra in &remote.extra_options {
        if let Some(comment) = &extra.comment {
            body.push(format!("{INDENT}# {comment}"));
        }
        body.push(format!("{INDENT}{} {}", extra.key, extra.value));
    }

    let header = BlockHeader {
        alias: entry.host_alias.clone(),
        remote: entry.remote_config_name.clone(),
        endpoint_id: entry.endpoint_id.clone(),
        auth_id: entry.auth_id.clone(),
        checksum: checksum(body.iter().map(String::as_str)),
    };

    let mut out = begin_marker(&header);
    out.push('\n');
    for line in &body {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&end_marker(&header.alias));
    out.push('\n');
    out
}

/// Split config text into foreign and managed segments.
///
/// Concatenating the segments' text reproduces `text` exactly.
pub fn parse(text: &str) -> Vec<Segment> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut segments = Vec::new();
    let mut foreign = String::new();
    let mut i = 0;

    while i < lines.len() {
        let Some(header) = parse_begin(trim_eol(lines[i])) else {
            foreign.push_str(lines[i]);
            i += 1;
            continue;
        };

        let end = end_marker(&header.alias);
        let close = lines[i + 1..]
            .iter()
            .map(|line| trim_eol(line))
            .take_while(|line| !line.starts_with(BEGIN_PREFIX))
            .position(|line| line == end)
            .map(|offset| i + 1 + offset);

        let Some(close) = close else {
            tracing::warn!(
                host = %header.alias,
                "unterminated managed block; keeping the rest of the file as-is"
            );
            foreign.push_str(&lines[i..].concat());
            break;
        };

        if !foreign.is_empty() {
            segments.push(Segment::Foreign(std::mem::take(&mut foreign)));
        }
        let body = lines[i + 1..close].iter().map(|line| trim_eol(line));
        let edited = checksum(body) != header.checksum;
        segments.push(Segment::Managed(ManagedBlock {
            header,
            text: lines[i..=close].concat(),
            edited,
        }));
        i = close + 1;
    }

    if !foreign.is_empty() {
        segments.push(Segment::Foreign(foreign));
    }
    segments
}

/// Concatenate segments back into file text.
pub fn serialize(segments: &[Segment]) -> String {
    segments.iter().map(Segment::text).collect()
}

fn begin_marker(header: &BlockHeader) -> String {
    format!(
        "{BEGIN_PREFIX}{MARKER_VERSION} host={} remote={} endpoint={} auth={} sum={}",
        encode(&header.alias),
        encode(&header.remote),
        encode_id(header.endpoint_id.as_deref()),
        encode_id(header.auth_id.as_deref()),
        header.checksum,
    )
}

fn end_marker(alias: &str) -> String {
    format!("{END_PREFIX}host={}", encode(alias))
}

fn parse_begin(line: &str) -> Option<BlockHeader> {
    let rest = line.strip_prefix(BEGIN_PREFIX)?;
    let mut tokens = rest.split_whitespace();
    if tokens.next()? != MARKER_VERSION {
        return None;
    }

    let (mut alias, mut remote, mut endpoint, mut auth, mut sum) = (None, None, None, None, None);
    for token in tokens {
        let (key, raw) = token.split_once('=')?;
        let value = percent_decode_str(raw).decode_utf8().ok()?.into_owned();
        match key {
            "host" => alias = Some(value),
            "remote" => remote = Some(value),
            "endpoint" => endpoint = Some((raw != NO_ID).then_some(value)),
            "auth" => auth = Some((raw != NO_ID).then_some(value)),
            "sum" => sum = Some(value),
            _ => {}
        }
    }

    let alias = alias.filter(|a| !a.is_empty())?;
    Some(BlockHeader {
        alias,
        remote: remote?,
        endpoint_id: endpoint?,
        auth_id: auth?,
        checksum: sum?,
    })
}

fn checksum<'a>(lines: impl Iterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for line in lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, MARKER_VALUE).to_string()
}

fn encode_id(id: Option<&str>) -> String {
    match id {
        None => NO_ID.to_string(),
        Some(NO_ID) => "%2D".to_string(),
        Some(id) => encode(id),
    }
}

fn trim_eol(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

fn quote_path(path: &Path) -> String {
    let text = path.to_string_lossy();
    if text.contains(char::is_whitespace) {
        format!("\"{text}\"")
    } else {
        text.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::ExtraOption;
    use std::path::PathBuf;

    fn remote() -> RemoteConfig {
        RemoteConfig {
            name: "web".to_string(),
            comment: None,
            endpoints: vec![Endpoint {
                id: "1".to_string(),
                host: "10.0.0.1".to_string(),
                port: Some(22),
                user: Some("ops".to_string()),
                comment: None,
            }],
            auth_identities: vec![AuthIdentity {
                id: "1".to_string(),
                user: Some("deploy".to_string()),
                private_key_path: PathBuf::from("/repo/keys/id_ed25519"),
                public_key_path: None,
                comment: None,
            }],
            extra_options: vec![],
        }
    }

    fn entry(alias: &str) -> HostEntry {
        HostEntry {
            host_alias: alias.to_string(),
            remote_config_name: "web".to_string(),
            endpoint_id: Some("1".to_string()),
            auth_id: Some("1".to_string()),
            materialized_key_path: Some(PathBuf::from("/home/me/.ssh/prod-web/id_ed25519")),
        }
    }

    fn render_entry(alias: &str) -> String {
        let remote = remote();
        render(
            &entry(alias),
            &remote,
            remote.endpoints.first(),
            remote.auth_identities.first(),
        )
    }

    #[test]
    fn test_render_directives() {
        let text = render_entry("prod-web");
        let lines: Vec<&str> = text.lines().collect();

        assert!(lines[0].starts_with("# >>> ssh-manager v1 host=prod-web remote=web endpoint=1 auth=1 sum="));
        assert_eq!(
            &lines[1..],
            &[
                "Host prod-web",
                "    HostName 10.0.0.1",
                "    Port 22",
                "    User deploy",
                "    IdentityFile /home/me/.ssh/prod-web/id_ed25519",
                "# <<< ssh-manager host=prod-web",
            ]
        );
    }

    #[test]
    fn test_render_is_deterministic() {
        assert_eq!(render_entry("prod-web"), render_entry("prod-web"));
    }

    #[test]
    fn test_render_endpoint_user_fallback_and_extras() {
        let mut remote = remote();
        remote.auth_identities.clear();
        remote.comment = Some("web tier".to_string());
        remote.extra_options.push(ExtraOption {
            key: "ForwardAgent".to_string(),
            value: "no".to_string(),
            comment: Some("never".to_string()),
        });
        let mut e = entry("w");
        e.auth_id = None;
        e.materialized_key_path = None;

        let text = render(&e, &remote, remote.endpoints.first(), None);

        assert!(text.contains("remote=web endpoint=1 auth=- sum="));
        assert!(text.contains("# web tier\nHost w\n"));
        assert!(text.contains("    User ops\n"));
        assert!(!text.contains("IdentityFile"));
        assert!(text.contains("    # never\n    ForwardAgent no\n"));
    }

    #[test]
    fn test_render_quotes_paths_with_spaces() {
        let remote = remote();
        let mut e = entry("w");
        e.materialized_key_path = Some(PathBuf::from("/home/my user/.ssh/w/key"));
        let text = render(&e, &remote, None, None);
        assert!(text.contains("IdentityFile \"/home/my user/.ssh/w/key\""));
    }

    #[test]
    fn test_header_values_are_encoded() {
        let mut remote = remote();
        remote.name = "web servers".to_string();
        let mut e = entry("w");
        e.remote_config_name = "web servers".to_string();
        let text = render(&e, &remote, None, None);
        assert!(text.starts_with("# >>> ssh-manager v1 host=w remote=web%20servers "));

        let segments = parse(&text);
        match &segments[0] {
            Segment::Managed(block) => assert_eq!(block.header.remote, "web servers"),
            other => panic!("expected managed block, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_and_dash_ids_roundtrip() {
        let remote = remote();
        let mut e = entry("w");
        e.endpoint_id = Some("-".to_string());
        e.auth_id = None;
        let text = render(&e, &remote, None, None);
        assert!(text.contains(" endpoint=%2D auth=- "));

        match &parse(&text)[..] {
            [Segment::Managed(b)] => {
                assert_eq!(b.header.endpoint_id.as_deref(), Some("-"));
                assert_eq!(b.header.auth_id, None);
            }
            other => panic!("expected one managed block, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_roundtrip_preserves_foreign_text() {
        let block = render_entry("prod-web");
        let text = format!(
            "# my own stuff\nHost github.com\n  User git\n\n{block}\nHost *\n    ServerAliveInterval 30\n"
        );

        let segments = parse(&text);

        assert_eq!(segments.len(), 3);
        assert_eq!(
            segments[0],
            Segment::Foreign("# my own stuff\nHost github.com\n  User git\n\n".to_string())
        );
        match &segments[1] {
            Segment::Managed(b) => {
                assert_eq!(b.header.alias, "prod-web");
                assert_eq!(b.header.endpoint_id.as_deref(), Some("1"));
                assert_eq!(b.text, block);
                assert!(!b.edited);
            }
            other => panic!("expected managed block, got {other:?}"),
        }
        assert_eq!(serialize(&segments), text);
    }

    #[test]
    fn test_parse_detects_hand_edit() {
        let block = render_entry("prod-web").replace("Port 22", "Port 2200");
        let segments = parse(&block);
        match &segments[0] {
            Segment::Managed(b) => assert!(b.edited),
            other => panic!("expected managed block, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_unterminated_block_is_foreign_to_eof() {
        let good = render_entry("b");
        let broken: String = render_entry("a")
            .lines()
            .filter(|l| !l.starts_with("# <<<"))
            .map(|l| format!("{l}\n"))
            .collect();
        let text = format!("top\n{broken}{good}");

        let segments = parse(&text);

        assert_eq!(segments, vec![Segment::Foreign(text.clone())]);
    }

    #[test]
    fn test_parse_unknown_version_is_foreign() {
        let text = render_entry("a").replace("ssh-manager v1 ", "ssh-manager v9 ");
        assert_eq!(parse(&text), vec![Segment::Foreign(text.clone())]);
    }

    #[test]
    fn test_parse_orphan_end_marker_is_foreign() {
        let text = "# <<< ssh-manager host=x\nHost x\n";
        assert_eq!(parse(text), vec![Segment::Foreign(text.to_string())]);
    }

    #[test]
    fn test_parse_crlf_block() {
        let text = render_entry("prod-web").replace('\n', "\r\n");
        let segments = parse(&text);
        match &segments[..] {
            [Segment::Managed(b)] => {
                assert!(!b.edited);
                assert_eq!(b.text, text);
            }
            other => panic!("expected one managed block, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_without_trailing_newline() {
        let text = render_entry("a");
        let trimmed = text.trim_end_matches('\n');
        let segments = parse(trimmed);
        assert!(matches!(&segments[..], [Segment::Managed(_)]));
        assert_eq!(serialize(&segments), trimmed);
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse("").is_empty());
    }

    #[test]
    fn test_identity_file_lookup() {
        let segments = parse(&render_entry("prod-web"));
        match &segments[0] {
            Segment::Managed(b) => assert_eq!(
                b.identity_file().as_deref(),
                Some("/home/me/.ssh/prod-web/id_ed25519")
            ),
            other => panic!("expected managed block, got {other:?}"),
        }
    }
}
