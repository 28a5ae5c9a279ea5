//! permit-api: Shared types for the permit capability broker
//!
//! This crate defines the vocabulary spoken between a script-execution host
//! and the broker: which capability is being requested, how it is scoped,
//! and what the broker decided. It performs no I/O.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Category of sensitive operation a script can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    /// Connect to or listen on a network address
    NetworkAccess,
    /// Read from the filesystem
    FileRead,
    /// Write to the filesystem
    FileWrite,
    /// Read environment variables
    EnvironmentRead,
    /// Load a native plugin
    PluginLoad,
    /// Use high-resolution timers
    HighResTime,
}

impl PermissionKind {
    /// Every kind, in display order
    pub const ALL: [PermissionKind; 6] = [
        Self::NetworkAccess,
        Self::FileRead,
        Self::FileWrite,
        Self::EnvironmentRead,
        Self::PluginLoad,
        Self::HighResTime,
    ];

    /// Short name used in command-line flags (`--allow-net`, `--deny-read`)
    pub fn flag_name(&self) -> &'static str {
        match self {
            Self::NetworkAccess => "net",
            Self::FileRead => "read",
            Self::FileWrite => "write",
            Self::EnvironmentRead => "env",
            Self::PluginLoad => "plugin",
            Self::HighResTime => "hrtime",
        }
    }

    /// Human-readable description of the capability
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkAccess => "network access",
            Self::FileRead => "read access",
            Self::FileWrite => "write access",
            Self::EnvironmentRead => "environment access",
            Self::PluginLoad => "plugin access",
            Self::HighResTime => "high-resolution time access",
        }
    }

    /// Whether this kind accepts a scope qualifier
    pub fn supports_scope(&self) -> bool {
        !matches!(self, Self::HighResTime)
    }

    /// Look up a kind by its flag name
    pub fn from_flag_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.flag_name() == name)
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag_name())
    }
}

impl FromStr for PermissionKind {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(kind) = Self::from_flag_name(s) {
            return Ok(kind);
        }
        match s {
            "network_access" => Ok(Self::NetworkAccess),
            "file_read" => Ok(Self::FileRead),
            "file_write" => Ok(Self::FileWrite),
            "environment_read" => Ok(Self::EnvironmentRead),
            "plugin_load" => Ok(Self::PluginLoad),
            "high_res_time" => Ok(Self::HighResTime),
            other => Err(ScopeError::UnknownKind(other.to_string())),
        }
    }
}

/// Errors produced while parsing kinds and scope qualifiers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("unknown permission kind: {0}")]
    UnknownKind(String),

    #[error("empty scope qualifier for {0}")]
    Empty(PermissionKind),

    #[error("{0} does not accept a scope qualifier")]
    Unscoped(PermissionKind),

    #[error("path must be absolute: {0}")]
    RelativePath(String),

    #[error("invalid host: {0}")]
    InvalidHost(String),

    #[error("invalid port in: {0}")]
    InvalidPort(String),

    #[error("invalid environment variable name: {0}")]
    InvalidEnvName(String),
}

/// A normalized scope qualifier narrowing a permission kind
///
/// Construct through [`Scope::net`], [`Scope::path`], [`Scope::env`] or
/// [`Scope::parse`]; each produces the canonical form the broker keys on.
/// There is no standalone `Deserialize`: normalization depends on the kind,
/// so scopes are decoded as part of a [`PermissionRequest`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Scope(String);

impl Scope {
    /// Network scope: `host` or `host:port`
    pub fn net(host: &str, port: Option<u16>) -> Result<Self, ScopeError> {
        let host = normalize_host(host)?;
        Ok(match port {
            Some(port) => Self(format!("{}:{}", host, port)),
            None => Self(host),
        })
    }

    /// Filesystem scope: an absolute, lexically normalized path
    pub fn path(path: impl AsRef<Path>) -> Result<Self, ScopeError> {
        let path = path.as_ref();
        if !path.has_root() {
            return Err(ScopeError::RelativePath(path.display().to_string()));
        }
        Ok(Self(normalize_path(path).to_string_lossy().into_owned()))
    }

    /// Environment variable scope
    pub fn env(name: &str) -> Result<Self, ScopeError> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ScopeError::InvalidEnvName(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    /// Parse a raw qualifier for the given kind
    pub fn parse(kind: PermissionKind, raw: &str) -> Result<Self, ScopeError> {
        let raw = raw.trim();
        if !kind.supports_scope() {
            return Err(ScopeError::Unscoped(kind));
        }
        if raw.is_empty() {
            return Err(ScopeError::Empty(kind));
        }
        match kind {
            PermissionKind::NetworkAccess => {
                let (host, port) = split_host_port(raw)?;
                Self::net(host, port)
            }
            PermissionKind::FileRead | PermissionKind::FileWrite | PermissionKind::PluginLoad => {
                Self::path(raw)
            }
            PermissionKind::EnvironmentRead => Self::env(raw),
            PermissionKind::HighResTime => Err(ScopeError::Unscoped(kind)),
        }
    }

    /// The canonical string form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Broader scopes that also apply to this one, most specific first
    ///
    /// For paths these are the ancestor directories; for `host:port` it is
    /// the bare host. Other kinds have no broader scope.
    pub fn broader(&self, kind: PermissionKind) -> Vec<Scope> {
        match kind {
            PermissionKind::FileRead | PermissionKind::FileWrite | PermissionKind::PluginLoad => {
                Path::new(&self.0)
                    .ancestors()
                    .skip(1)
                    .map(|p| Scope(p.to_string_lossy().into_owned()))
                    .collect()
            }
            PermissionKind::NetworkAccess => match split_host_port(&self.0) {
                Ok((host, Some(_))) => vec![Scope(host.to_string())],
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Scope {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// State of a permission entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    Denied,
    /// Ask the controlling user on first use
    #[default]
    Prompt,
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Prompt => "prompt",
        })
    }
}

/// Outcome of a permission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// A single capability request: kind plus optional scope
///
/// Deserializing runs the scope through [`Scope::parse`] for the kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRequest")]
pub struct PermissionRequest {
    pub kind: PermissionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
}

#[derive(Deserialize)]
struct RawRequest {
    kind: PermissionKind,
    #[serde(default)]
    scope: Option<String>,
}

impl TryFrom<RawRequest> for PermissionRequest {
    type Error = ScopeError;

    fn try_from(raw: RawRequest) -> Result<Self, Self::Error> {
        let scope = raw
            .scope
            .map(|scope| Scope::parse(raw.kind, &scope))
            .transpose()?;
        Ok(Self {
            kind: raw.kind,
            scope,
        })
    }
}

impl PermissionRequest {
    /// Create an unscoped request
    pub fn new(kind: PermissionKind) -> Self {
        Self { kind, scope: None }
    }

    /// Create a scoped request
    pub fn scoped(kind: PermissionKind, scope: Scope) -> Self {
        Self {
            kind,
            scope: Some(scope),
        }
    }

    /// Network request for `host:port`
    pub fn net(host: &str, port: u16) -> Result<Self, ScopeError> {
        Ok(Self::scoped(
            PermissionKind::NetworkAccess,
            Scope::net(host, Some(port))?,
        ))
    }

    /// File read request
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ScopeError> {
        Ok(Self::scoped(PermissionKind::FileRead, Scope::path(path)?))
    }

    /// File write request
    pub fn write(path: impl AsRef<Path>) -> Result<Self, ScopeError> {
        Ok(Self::scoped(PermissionKind::FileWrite, Scope::path(path)?))
    }

    /// Environment variable read request
    pub fn env(name: &str) -> Result<Self, ScopeError> {
        Ok(Self::scoped(
            PermissionKind::EnvironmentRead,
            Scope::env(name)?,
        ))
    }

    /// Human-readable description, e.g. `network access to "0.0.0.0:8000"`
    pub fn describe(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{} to \"{}\"", self.kind.description(), scope),
            None => self.kind.description().to_string(),
        }
    }
}

impl fmt::Display for PermissionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}:{}", self.kind, scope),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Parses `kind` or `kind:scope`, e.g. `net:0.0.0.0:8000` or `read:/etc`
impl FromStr for PermissionRequest {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((kind, scope)) => {
                let kind: PermissionKind = kind.parse()?;
                Ok(Self::scoped(kind, Scope::parse(kind, scope)?))
            }
            None => Ok(Self::new(s.parse()?)),
        }
    }
}

/// Error surfaced to script code when the broker denies a request
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Requires {}, run again with the --allow-{} flag", .request.describe(), .request.kind.flag_name())]
pub struct PermissionDenied {
    pub request: PermissionRequest,
}

impl PermissionDenied {
    pub fn new(request: PermissionRequest) -> Self {
        Self { request }
    }

    pub fn kind(&self) -> PermissionKind {
        self.request.kind
    }

    pub fn scope(&self) -> Option<&Scope> {
        self.request.scope.as_ref()
    }
}

// ============================================================================
// Normalization helpers
// ============================================================================

fn normalize_host(host: &str) -> Result<String, ScopeError> {
    let host = host.trim();
    if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        return normalize_ipv6(inner, host);
    }
    if host.contains(':') {
        return normalize_ipv6(host, host);
    }
    if host.is_empty()
        || !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
    {
        return Err(ScopeError::InvalidHost(host.to_string()));
    }
    Ok(host.to_ascii_lowercase())
}

fn normalize_ipv6(inner: &str, original: &str) -> Result<String, ScopeError> {
    let addr: std::net::Ipv6Addr = inner
        .parse()
        .map_err(|_| ScopeError::InvalidHost(original.to_string()))?;
    Ok(format!("[{}]", addr))
}

/// Split `host[:port]`, accepting bracketed IPv6 (`[::1]:8000`)
fn split_host_port(raw: &str) -> Result<(&str, Option<u16>), ScopeError> {
    let parse_port = |p: &str| {
        p.parse::<u16>()
            .map_err(|_| ScopeError::InvalidPort(raw.to_string()))
    };

    if raw.starts_with('[') {
        let end = raw
            .find(']')
            .ok_or_else(|| ScopeError::InvalidHost(raw.to_string()))?;
        let (host, rest) = raw.split_at(end + 1);
        return match rest.strip_prefix(':') {
            Some(port) => Ok((host, Some(parse_port(port)?))),
            None if rest.is_empty() => Ok((host, None)),
            None => Err(ScopeError::InvalidHost(raw.to_string())),
        };
    }

    match raw.matches(':').count() {
        0 => Ok((raw, None)),
        1 => {
            let (host, port) = raw.split_once(':').unwrap_or((raw, ""));
            Ok((host, Some(parse_port(port)?)))
        }
        // Bare IPv6 without brackets has no port
        _ => Ok((raw, None)),
    }
}

/// Lexical normalization: drops `.`, resolves `..`, never climbs above root
fn normalize_path(path: &Path) -> PathBuf {
    let mut components: Vec<Component> = Vec::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                }
            }
            Component::CurDir => {}
            _ => components.push(component),
        }
    }

    components.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_flag_names_round_trip() {
        for kind in PermissionKind::ALL {
            assert_eq!(PermissionKind::from_flag_name(kind.flag_name()), Some(kind));
        }
        assert_eq!(
            "file_read".parse::<PermissionKind>().unwrap(),
            PermissionKind::FileRead
        );
        assert!("ffi".parse::<PermissionKind>().is_err());
    }

    #[test]
    fn test_net_scope_normalization() {
        let scope = Scope::parse(PermissionKind::NetworkAccess, "Deno.Land:443").unwrap();
        assert_eq!(scope.as_str(), "deno.land:443");

        let scope = Scope::parse(PermissionKind::NetworkAccess, "[::1]:8000").unwrap();
        assert_eq!(scope.as_str(), "[::1]:8000");

        let scope = Scope::parse(PermissionKind::NetworkAccess, "0:0:0:0:0:0:0:1").unwrap();
        assert_eq!(scope.as_str(), "[::1]");

        assert!(matches!(
            Scope::parse(PermissionKind::NetworkAccess, "localhost:http"),
            Err(ScopeError::InvalidPort(_))
        ));
        assert!(matches!(
            Scope::parse(PermissionKind::NetworkAccess, "bad host"),
            Err(ScopeError::InvalidHost(_))
        ));
    }

    #[test]
    #[cfg(unix)]
    fn test_path_scope_normalization() {
        let scope = Scope::parse(PermissionKind::FileRead, "/tmp/./data/../logs/").unwrap();
        assert_eq!(scope.as_str(), "/tmp/logs");

        let scope = Scope::path("/../etc").unwrap();
        assert_eq!(scope.as_str(), "/etc");

        assert!(matches!(
            Scope::parse(PermissionKind::FileWrite, "./relative"),
            Err(ScopeError::RelativePath(_))
        ));
    }

    #[test]
    fn test_scope_rejected_for_unscoped_kind() {
        assert_eq!(
            Scope::parse(PermissionKind::HighResTime, "anything"),
            Err(ScopeError::Unscoped(PermissionKind::HighResTime))
        );
        assert_eq!(
            Scope::parse(PermissionKind::EnvironmentRead, "  "),
            Err(ScopeError::Empty(PermissionKind::EnvironmentRead))
        );
        assert!(Scope::env("MY-VAR").is_err());
    }

    #[test]
    #[cfg(unix)]
    fn test_broader_scopes() {
        let scope = Scope::path("/tmp/data/file.txt").unwrap();
        let broader: Vec<String> = scope
            .broader(PermissionKind::FileRead)
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(broader, vec!["/tmp/data", "/tmp", "/"]);

        let scope = Scope::net("example.com", Some(443)).unwrap();
        assert_eq!(
            scope.broader(PermissionKind::NetworkAccess),
            vec![Scope::net("example.com", None).unwrap()]
        );

        let scope = Scope::env("HOME").unwrap();
        assert!(scope.broader(PermissionKind::EnvironmentRead).is_empty());
    }

    #[test]
    fn test_request_parse_and_display() {
        let request: PermissionRequest = "net:0.0.0.0:8000".parse().unwrap();
        assert_eq!(request.kind, PermissionKind::NetworkAccess);
        assert_eq!(request.scope.as_ref().unwrap().as_str(), "0.0.0.0:8000");
        assert_eq!(request.to_string(), "net:0.0.0.0:8000");

        let request: PermissionRequest = "hrtime".parse().unwrap();
        assert_eq!(request, PermissionRequest::new(PermissionKind::HighResTime));
    }

    #[test]
    fn test_permission_denied_message() {
        let err = PermissionDenied::new(PermissionRequest::net("0.0.0.0", 8000).unwrap());
        assert_eq!(err.kind(), PermissionKind::NetworkAccess);
        assert_eq!(err.scope().unwrap().as_str(), "0.0.0.0:8000");
        assert_eq!(
            err.to_string(),
            "Requires network access to \"0.0.0.0:8000\", run again with the --allow-net flag"
        );

        let err = PermissionDenied::new(PermissionRequest::new(PermissionKind::HighResTime));
        assert_eq!(
            err.to_string(),
            "Requires high-resolution time access, run again with the --allow-hrtime flag"
        );
    }

    #[test]
    fn test_request_serialization() {
        let request = PermissionRequest::env("HOME").unwrap();
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"kind":"environment_read","scope":"HOME"}"#);

        let decoded: PermissionRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    #[cfg(unix)]
    fn test_request_deserialization_normalizes_scope() {
        let decoded: PermissionRequest =
            serde_json::from_str(r#"{"kind":"file_read","scope":"/tmp/../etc/"}"#).unwrap();
        assert_eq!(decoded, PermissionRequest::read("/etc").unwrap());

        let decoded: PermissionRequest =
            serde_json::from_str(r#"{"kind":"network_access","scope":"Deno.Land:443"}"#).unwrap();
        assert_eq!(decoded.scope.unwrap().as_str(), "deno.land:443");

        assert!(serde_json::from_str::<PermissionRequest>(
            r#"{"kind":"file_read","scope":"relative/dir"}"#
        )
        .is_err());
        assert!(serde_json::from_str::<PermissionRequest>(
            r#"{"kind":"high_res_time","scope":"x"}"#
        )
        .is_err());
    }
}
