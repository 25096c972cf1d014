// dbrotate/src/utils/logging.rs
use anyhow::{Context, Result};
use regex::Regex;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::{LazyLock, Mutex};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::{DefaultFields, Writer};
use tracing_subscriber::fmt::{self, FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

/// Tag prefixed to every diagnostic line.
pub const LOG_TAG: &str = "dbrotate";

const RESET: &str = "\x1b[0m";

static CONTROL_SEQUENCES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\x1b\[[0-?]*[ -/]*[@-~]",          // CSI, colors included
        r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)", // OSC
        r"|\x1b[@-Z\\-_]",
        r"|[\x00-\x08\x0b-\x1f\x7f]",
    ))
    .expect("control sequence pattern is valid")
});

/// `[dbrotate] message`, colored by level when the writer supports ANSI.
struct TaggedFormat;

impl<S, N> FormatEvent<S, N> for TaggedFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let color = match *event.metadata().level() {
            Level::ERROR => "\x1b[31m",
            Level::WARN => "\x1b[33m",
            _ => "\x1b[36m",
        };
        let ansi = writer.has_ansi_escapes();
        if ansi {
            write!(writer, "{}", color)?;
        }
        write!(writer, "[{}] ", LOG_TAG)?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        if ansi {
            write!(writer, "{}", RESET)?;
        }
        writeln!(writer)
    }
}

/// `TaggedFormat` layer over `writer`, colored only when `ansi` is set.
fn tagged_layer<S, W>(writer: W, ansi: bool) -> fmt::Layer<S, DefaultFields, TaggedFormat, W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + 'static,
{
    fmt::layer()
        .with_ansi(ansi)
        .with_writer(writer)
        .event_format(TaggedFormat)
}

/// Installs the global subscriber: colored lines on stderr, and plain lines
/// appended to `log_file` when given.
pub fn init(log_file: Option<&Path>) -> Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create log directory {}", parent.display())
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(tagged_layer(Mutex::new(file), false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(LevelFilter::INFO)
        .with(tagged_layer(std::io::stderr, true))
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))
}

/// Removes terminal control sequences, keeping newlines and tabs.
pub fn strip_control_sequences(text: &str) -> String {
    CONTROL_SEQUENCES.replace_all(text, "").into_owned()
}

/// Rewrites the persisted log at `path` without terminal control sequences.
pub fn sanitize_log(path: &Path) -> Result<()> {
    let raw = fs::read(path).with_context(|| format!("Failed to read log file {}", path.display()))?;
    let text = String::from_utf8_lossy(&raw);
    fs::write(path, strip_control_sequences(&text))
        .with_context(|| format!("Failed to rewrite log file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_strip_control_sequences() {
        let colored = "\x1b[36m[dbrotate] foo\x1b[0m\n\x1b[1;33m[dbrotate] foo\x1b[0m\r\n";
        assert_eq!(
            strip_control_sequences(colored),
            "[dbrotate] foo\n[dbrotate] foo\n"
        );
        assert_eq!(strip_control_sequences("a\tb\x07c\x1b]0;title\x07"), "a\tbc");
    }

    #[test]
    fn test_file_layer_writes_plain_lines() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let log = tmp.path().join("dbrotate.log");
        let file = OpenOptions::new().create(true).append(true).open(&log)?;
        let subscriber = tracing_subscriber::registry().with(tagged_layer(Mutex::new(file), false));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("foo");
            tracing::warn!("bar");
        });

        let text = fs::read_to_string(&log)?;
        assert!(!text.contains('\x1b'));
        assert_eq!(text, "[dbrotate] foo\n[dbrotate] bar\n");
        Ok(())
    }

    #[test]
    fn test_sanitize_log_rewrites_file() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let log = tmp.path().join("dbrotate.log");
        fs::write(
            &log,
            "foo\n\x1b[36m[dbrotate] foo\x1b[0m\n\x1b[33m[dbrotate] foo\x1b[0m\n",
        )?;

        sanitize_log(&log)?;

        let lines: Vec<String> = fs::read_to_string(&log)?
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(lines, vec!["foo", "[dbrotate] foo", "[dbrotate] foo"]);
        Ok(())
    }
}
