//! Probe domain model

use regex::Regex;
use serde::{Serialize, Serializer};
use std::fmt;

/// What a probe checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// Shell command on the target host; ready when it exits zero
    Command,
    /// Local file that must exist and be non-empty
    FileExists,
    /// HTTP GET; ready on a 2xx status
    HttpCheck,
    /// TCP connect to `host:port`
    PortOpen,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProbeKind::Command => "command",
            ProbeKind::FileExists => "file",
            ProbeKind::HttpCheck => "http",
            ProbeKind::PortOpen => "port",
        };
        f.write_str(s)
    }
}

/// Pattern applied to a successful probe's output (not serializable due to Regex)
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Exit status / HTTP status alone decides
    Success,
    /// Output contains the substring
    Contains(String),
    /// Output matches the regular expression
    Regex(Regex),
    /// At least `min` output lines contain `pattern`
    CountAtLeast { pattern: String, min: usize },
}

impl Matcher {
    /// Check if the matcher accepts the given output
    pub fn matches(&self, output: &str) -> bool {
        match self {
            Matcher::Success => true,
            Matcher::Contains(pattern) => output.contains(pattern.as_str()),
            Matcher::Regex(regex) => regex.is_match(output),
            Matcher::CountAtLeast { pattern, min } => {
                output.lines().filter(|line| line.contains(pattern.as_str())).count() >= *min
            }
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Success => f.write_str("success"),
            Matcher::Contains(s) => write!(f, "contains {:?}", s),
            Matcher::Regex(r) => write!(f, "[regex: {}]", r.as_str()),
            Matcher::CountAtLeast { pattern, min } => {
                write!(f, "at least {} line(s) containing {:?}", min, pattern)
            }
        }
    }
}

impl Serialize for Matcher {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A single stateless readiness check
#[derive(Debug, Clone, Serialize)]
pub struct Probe {
    pub kind: ProbeKind,

    /// Command line, path, URL or `host:port` depending on `kind`
    pub spec: String,

    pub expected: Matcher,
}

impl Probe {
    pub fn new(kind: ProbeKind, spec: impl Into<String>) -> Self {
        Self {
            kind,
            spec: spec.into(),
            expected: Matcher::Success,
        }
    }

    pub fn command(spec: impl Into<String>) -> Self {
        Self::new(ProbeKind::Command, spec)
    }

    pub fn file_exists(path: impl Into<String>) -> Self {
        Self::new(ProbeKind::FileExists, path)
    }

    pub fn http(url: impl Into<String>) -> Self {
        Self::new(ProbeKind::HttpCheck, url)
    }

    pub fn port(addr: impl Into<String>) -> Self {
        Self::new(ProbeKind::PortOpen, addr)
    }

    pub fn expecting(mut self, matcher: Matcher) -> Self {
        self.expected = matcher;
        self
    }

    /// Check whether a successful probe output satisfies the expectation
    pub fn accepts(&self, output: &ProbeOutput) -> bool {
        self.expected.matches(&output.stdout)
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} `{}`", self.kind, self.spec)
    }
}

/// Output of a probe that completed successfully
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeOutput {
    /// Exit code for commands, HTTP status for HTTP checks
    pub status: Option<i32>,

    /// Captured stdout, response body or file content
    pub stdout: String,
}

impl ProbeOutput {
    pub fn new(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
        }
    }
}
