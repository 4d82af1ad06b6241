//! Structured message-lifecycle logging.
//!
//! The pipeline hands a format string plus positional arguments to a
//! [`LogSink`]. Placeholders:
//!
//! - `{}`: next argument as-is
//! - `{,N}`: next argument aligned to width `N` (right-aligned for positive
//!   `N`, left-aligned for negative `N`)
//! - `{,N:F0}`: next argument as a number with zero decimals, aligned to `N`
//! - `{{` / `}}`: literal braces

use std::fmt;

use {
    courier_protocol::{Envelope, now_ms},
    serde::{Deserialize, Serialize},
    tracing::{debug, error, info, trace, warn},
};

/// Target used by [`TracingSink`] for every message line.
pub const MESSAGE_LOG_TARGET: &str = "courier::messages";

// ── Severity ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

// ── LogArg ──────────────────────────────────────────────────────────────────

/// A positional argument for [`render_format`].
#[derive(Debug, Clone, PartialEq)]
pub enum LogArg {
    Text(String),
    Number(f64),
}

impl LogArg {
    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for LogArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for LogArg {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for LogArg {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for LogArg {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<u64> for LogArg {
    fn from(value: u64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<i64> for LogArg {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

// ── LogSink ─────────────────────────────────────────────────────────────────

/// Destination for pipeline diagnostics.
pub trait LogSink: Send + Sync {
    fn log(&self, severity: Severity, format: &str, args: &[LogArg]);
}

/// Renders each line and forwards it to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, severity: Severity, format: &str, args: &[LogArg]) {
        let line = render_format(format, args);
        match severity {
            Severity::Trace => trace!(target: MESSAGE_LOG_TARGET, "{line}"),
            Severity::Debug => debug!(target: MESSAGE_LOG_TARGET, "{line}"),
            Severity::Info => info!(target: MESSAGE_LOG_TARGET, "{line}"),
            Severity::Warn => warn!(target: MESSAGE_LOG_TARGET, "{line}"),
            Severity::Error => error!(target: MESSAGE_LOG_TARGET, "{line}"),
        }
    }
}

// ── Formatting ──────────────────────────────────────────────────────────────

/// Substitute positional placeholders. Missing arguments render empty and
/// malformed placeholders are copied through verbatim.
pub fn render_format(format: &str, args: &[LogArg]) -> String {
    let mut out = String::with_capacity(format.len() + args.len() * 8);
    let mut args = args.iter();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            },
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            },
            '{' => {
                let mut body = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    body.push(c);
                }
                if !closed {
                    out.push('{');
                    out.push_str(&body);
                    continue;
                }
                match Placeholder::parse(&body) {
                    Some(placeholder) => placeholder.write(&mut out, args.next()),
                    None => {
                        out.push('{');
                        out.push_str(&body);
                        out.push('}');
                    },
                }
            },
            c => out.push(c),
        }
    }
    out
}

struct Placeholder {
    width: i32,
    decimals: Option<usize>,
}

impl Placeholder {
    fn parse(body: &str) -> Option<Self> {
        let (align, format) = match body.split_once(':') {
            Some((align, format)) => (align, Some(format)),
            None => (body, None),
        };

        let width = match align.trim() {
            "" => 0,
            a => a.strip_prefix(',')?.trim().parse().ok()?,
        };

        let decimals = match format {
            None => None,
            Some(f) => {
                let digits = f.strip_prefix('F').or_else(|| f.strip_prefix('f'))?;
                Some(if digits.is_empty() {
                    2
                } else {
                    digits.parse().ok()?
                })
            },
        };

        Some(Self { width, decimals })
    }

    fn write(&self, out: &mut String, arg: Option<&LogArg>) {
        let value = match (arg, self.decimals) {
            (None, _) => String::new(),
            (Some(arg), Some(decimals)) => match arg.as_number() {
                Some(n) => format!("{n:.decimals$}"),
                None => arg.to_string(),
            },
            (Some(arg), None) => arg.to_string(),
        };

        let width = self.width.unsigned_abs() as usize;
        if self.width < 0 {
            out.push_str(&format!("{value:<width$}"));
        } else {
            out.push_str(&format!("{value:>width$}"));
        }
    }
}

/// Build the format string and arguments describing `envelope`.
///
/// `source` and `target` only appear when they differ from `pipeline_id`, so
/// purely local hops stay short.
pub fn describe<T>(
    pipeline_id: &str,
    envelope: &Envelope<T>,
    text: Option<&str>,
    now: u64,
) -> (String, Vec<LogArg>) {
    let mut format = String::from("{} +{,5:F0}ms");
    let mut args: Vec<LogArg> = vec![
        envelope.id.as_str().into(),
        envelope.age_ms(now).into(),
    ];

    if let Some(source) = envelope.source.as_deref().filter(|s| *s != pipeline_id) {
        format.push_str(" from {}");
        args.push(source.into());
    }
    if let Some(target) = envelope.target.as_deref().filter(|t| *t != pipeline_id) {
        format.push_str(" to {}");
        args.push(target.into());
    }
    if let Some(op) = envelope.operation_id.as_deref() {
        format.push_str(" op={}");
        args.push(op.into());
    }
    if let Some(name) = envelope.operation_name.as_deref() {
        format.push_str(" {}");
        args.push(name.into());
    }
    if let Some(description) = envelope.operation_description.as_deref() {
        format.push_str(" ({})");
        args.push(description.into());
    }
    if let Some(text) = text {
        format.push_str(" {}");
        args.push(text.into());
    }

    (format, args)
}

/// Log `envelope` to `sink`, if any.
pub(crate) fn log_envelope<T>(
    sink: Option<&dyn LogSink>,
    pipeline_id: &str,
    envelope: &Envelope<T>,
    text: Option<&str>,
    severity: Severity,
) {
    let Some(sink) = sink else {
        return;
    };
    let (format, args) = describe(pipeline_id, envelope, text, now_ms());
    sink.log(severity, &format, &args);
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        courier_protocol::OperationInfo,
        rstest::rstest,
        std::sync::Mutex,
    };

    #[rstest]
    #[case("{}", vec!["a".into()], "a")]
    #[case("{} and {}", vec!["a".into(), "b".into()], "a and b")]
    #[case("[{,5}]", vec!["ab".into()], "[   ab]")]
    #[case("[{,-5}]", vec!["ab".into()], "[ab   ]")]
    #[case("[{,6:F0}]", vec![LogArg::Number(12.4)], "[    12]")]
    #[case("{:F0}ms", vec![LogArg::Number(1234.0)], "1234ms")]
    #[case("{:F2}", vec![LogArg::Number(1.0)], "1.00")]
    #[case("{,4:F0}", vec!["7".into()], "   7")]
    #[case("{:F0}", vec!["n/a".into()], "n/a")]
    #[case("{{literal}}", vec![], "{literal}")]
    #[case("{} {}", vec!["only".into()], "only ")]
    #[case("{bogus}", vec!["x".into()], "{bogus}")]
    #[case("open {", vec![], "open {")]
    #[case("[{,2}]", vec!["longer".into()], "[longer]")]
    fn renders_placeholders(
        #[case] format: &str,
        #[case] args: Vec<LogArg>,
        #[case] expected: &str,
    ) {
        assert_eq!(render_format(format, &args), expected);
    }

    #[test]
    fn numbers_render_without_trailing_zeroes() {
        assert_eq!(render_format("{}", &[LogArg::from(3u64)]), "3");
        assert_eq!(render_format("{}", &[LogArg::Number(2.25)]), "2.25");
    }

    #[test]
    fn describe_hides_local_endpoints() {
        let mut env = Envelope::new(()).with_source("me").with_target("me");
        env.timestamp = 1_000;
        let (format, args) = describe("me", &env, None, 1_020);
        assert_eq!(
            render_format(&format, &args),
            format!("{} +   20ms", env.id)
        );
    }

    #[test]
    fn describe_includes_remote_endpoints_and_operation() {
        let mut env = Envelope::new(())
            .with_source("client")
            .with_target("server")
            .with_operation("op-9", OperationInfo::named("get").with_description("read x"));
        env.timestamp = 500;
        let (format, args) = describe("me", &env, Some("received"), 503);
        assert_eq!(
            render_format(&format, &args),
            format!(
                "{} +    3ms from client to server op=op-9 get (read x) received",
                env.id
            )
        );
    }

    #[derive(Default)]
    struct Capture(Mutex<Vec<(Severity, String)>>);

    impl LogSink for Capture {
        fn log(&self, severity: Severity, format: &str, args: &[LogArg]) {
            self.0
                .lock()
                .unwrap()
                .push((severity, render_format(format, args)));
        }
    }

    #[test]
    fn log_envelope_without_sink_is_a_noop() {
        log_envelope(None, "me", &Envelope::new(()), Some("x"), Severity::Error);
    }

    #[test]
    fn log_envelope_forwards_severity_and_text() {
        let sink = Capture::default();
        let env = Envelope::new(());
        log_envelope(Some(&sink), "me", &env, Some("boom"), Severity::Error);
        let lines = sink.0.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, Severity::Error);
        assert!(lines[0].1.starts_with(&env.id));
        assert!(lines[0].1.ends_with(" boom"));
    }

    #[test]
    fn severity_parses_lowercase() {
        let s: Severity = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(s, Severity::Warn);
        assert_eq!(Severity::default(), Severity::Info);
    }
}
