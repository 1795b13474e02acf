//! Configuration loading, validation and serialization.
//!
//! The configuration is a line-oriented `key value...` text format. Lines
//! whose first non-blank character is `#` are comments. List keys
//! (`hostlist`, `host`, `surrogate`, ...) may appear any number of times
//! and accumulate.

use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;

/// A listen or forward address as `host:port`, with a per-key default port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addr {
    pub host: String,
    pub port: u16,
}

impl Addr {
    /// Parse `host[:port]`, falling back to `default_port` when the port is
    /// omitted. Bare IPv6 addresses must be bracketed to carry a port.
    pub fn parse(s: &str, default_port: u16) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidAddr(s.to_string());

        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            let port = match tail.strip_prefix(':') {
                Some(p) => p.parse().map_err(|_| invalid())?,
                None if tail.is_empty() => default_port,
                None => return Err(invalid()),
            };
            return Ok(Self {
                host: host.to_string(),
                port,
            });
        }

        match s.rsplit_once(':') {
            // More than one colon and no brackets: a bare IPv6 address.
            Some((head, _)) if head.contains(':') => Ok(Self {
                host: s.to_string(),
                port: default_port,
            }),
            Some((host, port)) => Ok(Self {
                host: host.to_string(),
                port: port.parse().map_err(|_| invalid())?,
            }),
            None => Ok(Self {
                host: s.to_string(),
                port: default_port,
            }),
        }
    }

    /// The host part parsed as an IP address, if it is one.
    pub fn ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Format of a blocklist source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFormat {
    /// Standard UNIX hosts file: `<ip> <name...>` per line.
    Hosts,
    /// One entry per non-empty line.
    Plain,
}

impl FromStr for ListFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hosts" => Ok(Self::Hosts),
            "plain" => Ok(Self::Plain),
            other => Err(ConfigError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for ListFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hosts => f.write_str("hosts"),
            Self::Plain => f.write_str("plain"),
        }
    }
}

/// A single list source: a format plus a `file://` or `http(s)://` location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub format: ListFormat,
    pub location: String,
}

/// Parse a duration like `10s`, `1h`, `1d`, `10y`; a bare integer is seconds.
pub fn parse_duration(s: &str) -> Result<u64, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(s.to_string());

    if s.is_empty() {
        return Err(invalid());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(secs);
    }

    let mut chars = s.chars();
    let unit = chars.next_back().ok_or_else(invalid)?;
    let number: u64 = chars.as_str().parse().map_err(|_| invalid())?;
    let factor = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        'w' => 604_800,
        'y' => 31_536_000,
        _ => return Err(invalid()),
    };
    Ok(number * factor)
}

/// Main configuration for the trackwall daemon.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// TCP address of the control channel.
    pub control_listen: Addr,
    /// DNS listen address (port defaults to 53).
    pub dns_listen: Addr,
    /// Upstream resolver; discovered from `/etc/resolv.conf` when unset.
    pub dns_forward: Option<Addr>,
    /// Plaintext HTTP listener for blocked hosts.
    pub http_listen: Addr,
    /// TLS HTTP listener for blocked hosts.
    pub https_listen: Addr,
    /// PEM root CA certificate used to sign minted leaf certificates.
    pub root_cert: PathBuf,
    /// PEM root CA private key.
    pub root_key: PathBuf,
    /// Privilege drop target; acted on by the process supervisor.
    pub user: Option<String>,
    /// Optional chroot directory.
    pub chroot: Option<PathBuf>,
    /// State directory holding the compiled snapshot, list mirrors and certs.
    pub cache_dir: PathBuf,
    /// Host-list cache lifetime in seconds.
    pub cache_hosts: u64,
    /// Upper bound on cached DNS answer TTLs, in seconds.
    pub cache_dns: u64,
    /// Colorize log output.
    pub color: bool,
    /// Enable the `$@_list` introspection pages.
    pub list_pages: bool,

    pub hostlists: Vec<Source>,
    pub unhostlists: Vec<Source>,
    pub regexplists: Vec<Source>,
    pub unregexplists: Vec<Source>,

    pub hosts: Vec<String>,
    pub unhosts: Vec<String>,
    pub regexps: Vec<String>,
    pub unregexps: Vec<String>,

    /// `(pattern, script)` pairs registered with the surrogate compiler.
    pub surrogates: Vec<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_listen: Addr {
                host: "127.0.0.1".into(),
                port: 1000,
            },
            dns_listen: Addr {
                host: "127.0.0.1".into(),
                port: 53,
            },
            dns_forward: None,
            http_listen: Addr {
                host: "127.0.0.1".into(),
                port: 80,
            },
            https_listen: Addr {
                host: "127.0.0.1".into(),
                port: 443,
            },
            root_cert: PathBuf::from("/etc/trackwall/rootCA.pem"),
            root_key: PathBuf::from("/etc/trackwall/rootCA.key"),
            user: None,
            chroot: None,
            cache_dir: default_cache_dir(),
            cache_hosts: 86400,
            cache_dns: 3600,
            color: true,
            list_pages: false,
            hostlists: Vec::new(),
            unhostlists: Vec::new(),
            regexplists: Vec::new(),
            unregexplists: Vec::new(),
            hosts: Vec::new(),
            unhosts: Vec::new(),
            regexps: Vec::new(),
            unregexps: Vec::new(),
            surrogates: Vec::new(),
        }
    }
}

/// Returns the default state directory.
///
/// Falls back to `./cache` if the OS cache directory cannot be determined.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir().map_or_else(|| PathBuf::from("./cache"), |p| p.join("trackwall"))
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    /// Parse configuration from a string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let lineno = index + 1;
            let mut words = line.split_whitespace();
            let key = words.next().expect("non-empty line has a first word");
            let rest: Vec<&str> = words.collect();

            config.apply(lineno, key, &rest)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, line: usize, key: &str, rest: &[&str]) -> Result<(), ConfigError> {
        let one = |expected: &'static str| {
            rest.first()
                .copied()
                .ok_or_else(|| ConfigError::MissingValue {
                    line,
                    key: key.to_string(),
                    expected,
                })
        };

        match key {
            "control-listen" => self.control_listen = Addr::parse(one("host:port")?, 1000)?,
            "dns-listen" => self.dns_listen = Addr::parse(one("host:port")?, 53)?,
            "dns-forward" => self.dns_forward = Some(Addr::parse(one("host:port")?, 53)?),
            "http-listen" => self.http_listen = Addr::parse(one("host:port")?, 80)?,
            "https-listen" => self.https_listen = Addr::parse(one("host:port")?, 443)?,
            "root-cert" => self.root_cert = PathBuf::from(one("path")?),
            "root-key" => self.root_key = PathBuf::from(one("path")?),
            "user" => self.user = Some(one("username")?.to_string()),
            "chroot" => self.chroot = Some(PathBuf::from(one("path")?)),
            "cache-dir" => self.cache_dir = PathBuf::from(one("path")?),
            "cache-hosts" => self.cache_hosts = parse_duration(one("duration")?)?,
            "cache-dns" => self.cache_dns = parse_duration(one("duration")?)?,
            "color" => self.color = parse_bool(one("bool")?)?,
            "list-pages" => self.list_pages = parse_bool(one("bool")?)?,
            "hostlist" => push_sources(&mut self.hostlists, line, key, rest)?,
            "unhostlist" => push_sources(&mut self.unhostlists, line, key, rest)?,
            "regexplist" => push_sources(&mut self.regexplists, line, key, rest)?,
            "unregexplist" => push_sources(&mut self.unregexplists, line, key, rest)?,
            "host" => self.hosts.extend(rest.iter().map(ToString::to_string)),
            "unhost" => self.unhosts.extend(rest.iter().map(ToString::to_string)),
            "regexp" => self.regexps.extend(rest.iter().map(ToString::to_string)),
            "unregexp" => self.unregexps.extend(rest.iter().map(ToString::to_string)),
            "surrogate" => {
                let pattern = one("pattern script")?;
                if rest.len() < 2 {
                    return Err(ConfigError::MissingValue {
                        line,
                        key: key.to_string(),
                        expected: "pattern script",
                    });
                }
                self.surrogates
                    .push((pattern.to_string(), rest[1..].join(" ")));
            }
            other => {
                return Err(ConfigError::UnknownKey {
                    line,
                    key: other.to_string(),
                })
            }
        }

        Ok(())
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_hosts == 0 {
            return Err(ConfigError::Validation("cache-hosts must be > 0".into()));
        }
        if self.cache_dns == 0 {
            return Err(ConfigError::Validation("cache-dns must be > 0".into()));
        }
        if self.http_listen.ip().is_none() {
            return Err(ConfigError::Validation(
                "http-listen host must be an IP address".into(),
            ));
        }
        for (pattern, _) in &self.surrogates {
            if pattern.is_empty() {
                return Err(ConfigError::Validation("empty surrogate pattern".into()));
            }
        }
        Ok(())
    }

    /// Serialize back to the line-oriented text format.
    ///
    /// Parsing the output yields a configuration equal to `self`.
    #[must_use]
    pub fn serialize(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "control-listen {}", self.control_listen);
        let _ = writeln!(out, "dns-listen {}", self.dns_listen);
        if let Some(forward) = &self.dns_forward {
            let _ = writeln!(out, "dns-forward {forward}");
        }
        let _ = writeln!(out, "http-listen {}", self.http_listen);
        let _ = writeln!(out, "https-listen {}", self.https_listen);
        let _ = writeln!(out, "root-cert {}", self.root_cert.display());
        let _ = writeln!(out, "root-key {}", self.root_key.display());
        if let Some(user) = &self.user {
            let _ = writeln!(out, "user {user}");
        }
        if let Some(chroot) = &self.chroot {
            let _ = writeln!(out, "chroot {}", chroot.display());
        }
        let _ = writeln!(out, "cache-dir {}", self.cache_dir.display());
        let _ = writeln!(out, "cache-hosts {}", self.cache_hosts);
        let _ = writeln!(out, "cache-dns {}", self.cache_dns);
        let _ = writeln!(out, "color {}", if self.color { "yes" } else { "no" });
        let _ = writeln!(
            out,
            "list-pages {}",
            if self.list_pages { "yes" } else { "no" }
        );
        for (key, sources) in [
            ("hostlist", &self.hostlists),
            ("unhostlist", &self.unhostlists),
            ("regexplist", &self.regexplists),
            ("unregexplist", &self.unregexplists),
        ] {
            for source in sources {
                let _ = writeln!(out, "{key} {} {}", source.format, source.location);
            }
        }
        for (key, entries) in [
            ("host", &self.hosts),
            ("unhost", &self.unhosts),
            ("regexp", &self.regexps),
            ("unregexp", &self.unregexps),
        ] {
            for entry in entries {
                let _ = writeln!(out, "{key} {entry}");
            }
        }
        for (pattern, script) in &self.surrogates {
            let _ = writeln!(out, "surrogate {pattern} {script}");
        }
        out
    }
}

fn parse_bool(s: &str) -> Result<bool, ConfigError> {
    match s {
        "yes" | "true" | "on" | "1" => Ok(true),
        "no" | "false" | "off" | "0" => Ok(false),
        other => Err(ConfigError::InvalidBool(other.to_string())),
    }
}

fn push_sources(
    target: &mut Vec<Source>,
    line: usize,
    key: &str,
    rest: &[&str],
) -> Result<(), ConfigError> {
    let (format, locations) = rest
        .split_first()
        .ok_or_else(|| ConfigError::MissingValue {
            line,
            key: key.to_string(),
            expected: "format url...",
        })?;
    if locations.is_empty() {
        return Err(ConfigError::MissingValue {
            line,
            key: key.to_string(),
            expected: "format url...",
        });
    }

    let format: ListFormat = format.parse()?;
    for location in locations {
        target.push(Source {
            format,
            location: (*location).to_string(),
        });
    }
    Ok(())
}
