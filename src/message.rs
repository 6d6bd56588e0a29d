//! Immutable report payload with derived summary and body texts.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

static HOSTNAME: LazyLock<String> = LazyLock::new(|| {
    nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string())
});

static USERNAME: LazyLock<String> = LazyLock::new(|| {
    nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|user| user.name)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "unknown".to_string())
});

/// Name of the machine the watcher runs on.
pub fn hostname() -> &'static str {
    &HOSTNAME
}

/// Name of the user the watcher runs as.
pub fn username() -> &'static str {
    &USERNAME
}

const DEFAULT_SERVICE_NAME: &str = "service_not_set";
const DEFAULT_PREFIX: &str = "[cwatcher]:";
const DISPLAY_WIDTH: usize = 64;

/// Monitoring status, ordered by severity as in Nagios/Icinga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Status {
    #[default]
    Ok = 0,
    Warning = 1,
    Critical = 2,
    Unknown = 3,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Warning => "WARNING",
            Status::Critical => "CRITICAL",
            Status::Unknown => "UNKNOWN",
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Status {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Status::Ok),
            1 => Ok(Status::Warning),
            2 => Ok(Status::Critical),
            3 => Ok(Status::Unknown),
            other => Err(ValidationError::InvalidStatus(other)),
        }
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> Self {
        status.code()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Malformed message fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidStatus(u8),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidStatus(code) => {
                write!(f, "invalid status {code}, expected 0 (OK) to 3 (UNKNOWN)")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// A single performance-data value.
#[derive(Debug, Clone, PartialEq)]
pub enum PerfValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for PerfValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerfValue::Int(v) => write!(f, "{v}"),
            // Keeps the fractional part of whole numbers: `1.0`, not `1`.
            PerfValue::Float(v) => write!(f, "{v:?}"),
            PerfValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for PerfValue {
    fn from(v: i64) -> Self {
        PerfValue::Int(v)
    }
}

impl From<i32> for PerfValue {
    fn from(v: i32) -> Self {
        PerfValue::Int(v.into())
    }
}

impl From<u32> for PerfValue {
    fn from(v: u32) -> Self {
        PerfValue::Int(v.into())
    }
}

impl From<f64> for PerfValue {
    fn from(v: f64) -> Self {
        PerfValue::Float(v)
    }
}

impl From<&str> for PerfValue {
    fn from(v: &str) -> Self {
        PerfValue::Text(v.to_string())
    }
}

impl From<String> for PerfValue {
    fn from(v: String) -> Self {
        PerfValue::Text(v)
    }
}

/// Performance metrics keyed by name; iterates in key order.
pub type PerformanceData = BTreeMap<String, PerfValue>;

/// The raw field set a [`Message`] is built from. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageParams {
    /// 0 (OK), 1 (WARNING), 2 (CRITICAL) or 3 (UNKNOWN). Defaults to 0.
    pub status: Option<u8>,
    pub service_name: Option<String>,
    pub service_display_name: Option<String>,
    pub custom_message: Option<String>,
    /// Leading token of the summary line. Defaults to `[cwatcher]:`.
    pub prefix: Option<String>,
    pub body: Option<String>,
    pub performance_data: PerformanceData,
    /// Normalized argument vectors of the commands run in the session.
    pub processes: Vec<Vec<String>>,
    /// Formatted log records, one per line.
    pub log_records: Option<String>,
}

/// An immutable snapshot of a reportable event.
///
/// All text accessors are pure functions of the fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    status: Status,
    service_name: String,
    service_display_name: Option<String>,
    custom_message: String,
    prefix: String,
    body: String,
    performance_data: PerformanceData,
    processes: Vec<Vec<String>>,
    log_records: String,
}

impl Message {
    pub fn new(params: MessageParams) -> Result<Self, ValidationError> {
        let status = match params.status {
            Some(code) => Status::try_from(code)?,
            None => Status::default(),
        };
        Ok(Self {
            status,
            service_name: params
                .service_name
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            service_display_name: params.service_display_name,
            custom_message: params.custom_message.unwrap_or_default(),
            prefix: params.prefix.unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            body: params.body.unwrap_or_default(),
            performance_data: params.performance_data,
            processes: params.processes,
            log_records: params.log_records.unwrap_or_default(),
        })
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn status_text(&self) -> &'static str {
        self.status.as_str()
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn service_display_name(&self) -> Option<&str> {
        self.service_display_name.as_deref()
    }

    pub fn custom_message(&self) -> &str {
        &self.custom_message
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn performance_data_map(&self) -> &PerformanceData {
        &self.performance_data
    }

    /// Performance data as `key=value` pairs separated by spaces.
    pub fn performance_data(&self) -> String {
        self.performance_data
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// One-line summary: `{prefix} {SERVICE} {STATUS} - {custom_message}`.
    pub fn message(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if !self.prefix.is_empty() {
            parts.push(self.prefix.clone());
        }
        parts.push(self.service_name.to_uppercase());
        parts.push(self.status_text().to_string());
        if !self.custom_message.is_empty() {
            parts.push(format!("- {}", self.custom_message));
        }
        parts.join(" ")
    }

    /// Summary followed by `| {performance_data}` when there is any.
    pub fn message_monitoring(&self) -> String {
        let perf = self.performance_data();
        if perf.is_empty() {
            self.message()
        } else {
            format!("{} | {perf}", self.message())
        }
    }

    /// Long-form text: host, user, service, metrics, custom body, log dump.
    pub fn body(&self) -> String {
        let mut lines = vec![
            format!("Host: {}", hostname()),
            format!("User: {}", username()),
            format!("Service name: {}", self.service_name),
        ];

        let perf = self.performance_data();
        if !perf.is_empty() {
            lines.push(format!("Performance data: {perf}"));
        }

        if !self.body.is_empty() {
            lines.push(String::new());
            lines.push(self.body.clone());
        }

        if !self.log_records.is_empty() {
            lines.push(String::new());
            lines.push("Log records:".to_string());
            lines.push(String::new());
            lines.push(self.log_records.clone());
        }

        lines.join("\n")
    }

    /// Commands of the session, e.g. `(ls; ls -a)`.
    pub fn processes(&self) -> Option<String> {
        if self.processes.is_empty() {
            return None;
        }
        let joined: Vec<String> = self.processes.iter().map(|argv| argv.join(" ")).collect();
        Some(format!("({})", joined.join("; ")))
    }

    pub fn user(&self) -> String {
        format!("[user:{}]", username())
    }

    pub fn log_records(&self) -> &str {
        &self.log_records
    }
}

impl Default for Message {
    fn default() -> Self {
        Self {
            status: Status::default(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_display_name: None,
            custom_message: String::new(),
            prefix: DEFAULT_PREFIX.to_string(),
            body: String::new(),
            performance_data: PerformanceData::new(),
            processes: Vec::new(),
            log_records: String::new(),
        }
    }
}

/// `[Message] name: 'value', ...` over every non-empty attribute, in
/// name order, each value shortened to fit one log line.
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.status == Status::Ok {
            String::new()
        } else {
            self.status.code().to_string()
        };
        let attributes = [
            ("body", self.body()),
            ("custom_message", self.custom_message.clone()),
            ("message", self.message()),
            ("message_monitoring", self.message_monitoring()),
            ("performance_data", self.performance_data()),
            ("prefix", self.prefix.clone()),
            ("processes", self.processes().unwrap_or_default()),
            (
                "service_display_name",
                self.service_display_name.clone().unwrap_or_default(),
            ),
            ("service_name", self.service_name.clone()),
            ("status", status),
            ("status_text", self.status_text().to_string()),
            ("user", self.user()),
        ];
        let rendered: Vec<String> = attributes
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| format!("{name}: '{}'", shorten(value, DISPLAY_WIDTH)))
            .collect();
        write!(f, "[Message] {}", rendered.join(", "))
    }
}

/// Collapse whitespace and cut at a word boundary so the result fits in
/// `width` characters, marking truncation with ` [...]`.
fn shorten(text: &str, width: usize) -> String {
    const PLACEHOLDER: &str = " [...]";
    let words: Vec<&str> = text.split_whitespace().collect();
    let collapsed = words.join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }

    let budget = width.saturating_sub(PLACEHOLDER.len());
    let mut out = String::new();
    for word in words {
        let extra = usize::from(!out.is_empty()) + word.chars().count();
        if out.chars().count() + extra > budget {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    if out.is_empty() {
        PLACEHOLDER.trim_start().to_string()
    } else {
        out + PLACEHOLDER
    }
}
