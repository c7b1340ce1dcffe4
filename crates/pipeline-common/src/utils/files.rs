use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use regex::{NoExpand, Regex};
use thiserror::Error;
use tracing::{debug, error};

/// Stem used when a template cannot be rendered.
pub const DEFAULT_FILE_STEM: &str = "stream";

/// Characters replaced with `_` in a channel name before substitution.
const CHANNEL_ILLEGAL_CHARS: &[char] = &['/', '\\', '?', '%', '*', ':', '|', '"', '<', '>'];

/// Characters illegal on every target. Also the Windows set.
const COMMON_ILLEGAL_CHARS: &[char] = &['?', '%', '*', ':', '|', '"', '<', '>'];

/// Characters replaced on POSIX-style targets.
const POSIX_ILLEGAL_CHARS: &[char] = &[
    '!', '?', '%', '*', ':', ';', '|', '"', '\'', '<', '>', '`', '\0',
];

static DRIVE_LETTER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z])-\\").expect("valid drive letter regex"));

/// Placeholder tokens in substitution order. `:date` must run before `:day`.
static TOKEN_REGEXES: LazyLock<Vec<(Token, Regex)>> = LazyLock::new(|| {
    [
        (Token::Channel, ":channel"),
        (Token::Date, ":date"),
        (Token::Time, ":time"),
        (Token::Day, ":day"),
        (Token::Month, ":month"),
        (Token::Year, ":year"),
        (Token::ShortYear, ":shortYear"),
        (Token::Period, ":period"),
    ]
    .into_iter()
    .map(|(token, pattern)| {
        let regex = Regex::new(&format!("(?i){pattern}")).expect("valid token regex");
        (token, regex)
    })
    .collect()
});

#[derive(Debug, Clone, Copy)]
enum Token {
    Channel,
    Date,
    Time,
    Day,
    Month,
    Year,
    ShortYear,
    Period,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("invalid timezone `{0}`")]
    InvalidTimezone(String),
    #[error("template is empty")]
    EmptyTemplate,
}

/// File naming rules to apply to a rendered path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOs {
    Windows,
    Posix,
}

impl TargetOs {
    /// The rules of the platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(windows) {
            TargetOs::Windows
        } else {
            TargetOs::Posix
        }
    }
}

/// Locale used to format the `:time` token.
///
/// `en-GB` renders a 24 hour clock (`21-05-09`), `en-US` a 12 hour clock
/// without leading zero (`9-05-09`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeFormat {
    #[default]
    EnGb,
    EnUs,
}

impl TimeFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFormat::EnGb => "en-GB",
            TimeFormat::EnUs => "en-US",
        }
    }
}

impl FromStr for TimeFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("en-GB") {
            Ok(TimeFormat::EnGb)
        } else if s.eq_ignore_ascii_case("en-US") {
            Ok(TimeFormat::EnUs)
        } else {
            Err(format!("unsupported time format `{s}`, expected en-GB or en-US"))
        }
    }
}

/// Inputs of a template expansion.
#[derive(Debug, Clone)]
pub struct TemplateContext<'a> {
    pub channel: &'a str,
    pub timestamp: DateTime<Utc>,
    pub timezone: &'a str,
    pub time_format: TimeFormat,
}

/// Replace characters that may not appear in a channel name used as a path segment.
pub fn sanitize_channel_name(name: &str) -> String {
    replace_chars(name, CHANNEL_ILLEGAL_CHARS, '_')
}

/// Normalize separators and strip illegal characters for the target's naming rules.
pub fn sanitize_path(input: &str, target: TargetOs) -> String {
    let common = replace_chars(input, COMMON_ILLEGAL_CHARS, '-');

    match target {
        TargetOs::Windows => {
            let normalized = common.replace('/', "\\");
            let stripped = replace_chars(&normalized, COMMON_ILLEGAL_CHARS, '-');
            DRIVE_LETTER_REGEX
                .replace(&stripped, "${1}:\\")
                .into_owned()
        }
        TargetOs::Posix => {
            let normalized = common.replace('\\', "/");
            replace_chars(&normalized, POSIX_ILLEGAL_CHARS, '-')
        }
    }
}

/// Expand the placeholder tokens of `template`.
///
/// Recognized tokens (case-insensitive): `:channel`, `:date`, `:time`, `:day`,
/// `:month`, `:year`, `:shortYear`, `:period`. The timestamp is shifted into
/// `context.timezone` before formatting. The result is deterministic for a
/// fixed context.
pub fn render_template(
    template: &str,
    context: &TemplateContext<'_>,
    target: TargetOs,
) -> Result<String, TemplateError> {
    if template.trim().is_empty() {
        return Err(TemplateError::EmptyTemplate);
    }

    let tz: Tz = context
        .timezone
        .parse()
        .map_err(|_| TemplateError::InvalidTimezone(context.timezone.to_string()))?;
    let local = context.timestamp.with_timezone(&tz);

    let time_pattern = match context.time_format {
        TimeFormat::EnGb => "%H-%M-%S",
        TimeFormat::EnUs => "%-I-%M-%S",
    };
    let period = if local.hour() < 12 { "AM" } else { "PM" };

    let mut rendered = template.to_string();
    for (token, regex) in TOKEN_REGEXES.iter() {
        let value = match token {
            Token::Channel => sanitize_channel_name(context.channel),
            Token::Date => local.format("%d.%m.%Y").to_string(),
            Token::Time => local.format(time_pattern).to_string(),
            Token::Day => local.format("%d").to_string(),
            Token::Month => local.format("%m").to_string(),
            Token::Year => local.format("%Y").to_string(),
            Token::ShortYear => local.format("%y").to_string(),
            Token::Period => period.to_string(),
        };
        rendered = regex.replace_all(&rendered, NoExpand(&value)).into_owned();
    }

    Ok(sanitize_path(&rendered, target))
}

/// Expand only the `:channel` token, e.g. for a log directory.
///
/// Falls back to `fallback` when the result would be empty.
pub fn render_channel_template(
    template: &str,
    channel: &str,
    target: TargetOs,
    fallback: &str,
) -> String {
    let (_, channel_regex) = &TOKEN_REGEXES[0];
    let name = sanitize_channel_name(channel);
    let rendered = channel_regex.replace_all(template, NoExpand(&name));
    let sanitized = sanitize_path(&rendered, target);
    if sanitized.trim().is_empty() {
        fallback.to_string()
    } else {
        sanitized
    }
}

/// Render `<output_dir>/<template>.<extension>` into a concrete path.
///
/// A render failure does not abort the recording: it is logged and the
/// default `stream.<extension>` is returned instead.
pub fn resolve_output_path(
    output_dir: &str,
    template: &str,
    extension: &str,
    context: &TemplateContext<'_>,
    target: TargetOs,
) -> PathBuf {
    let full_template = if output_dir.is_empty() {
        format!("{template}.{extension}")
    } else {
        format!(
            "{}/{template}.{extension}",
            output_dir.trim_end_matches(['/', '\\'])
        )
    };

    match render_template(&full_template, context, target) {
        Ok(rendered) => PathBuf::from(rendered),
        Err(e) => {
            error!(error = %e, template = %full_template, "Failed to render output template");
            PathBuf::from(format!("{DEFAULT_FILE_STEM}.{extension}"))
        }
    }
}

/// Path for part `part` of `path`: `dir/name (part N).ext`.
pub fn part_path(path: &Path, part: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_FILE_STEM.to_string());

    let file_name = match path.extension() {
        Some(ext) => format!("{stem} (part {part}).{}", ext.to_string_lossy()),
        None => format!("{stem} (part {part})"),
    };

    path.with_file_name(file_name)
}

/// Return the first path not occupied on disk, starting with `path` itself
/// and continuing with `(part 2)`, `(part 3)`, ...
///
/// Calling this twice against an unchanged filesystem returns the same path.
pub fn reserve_file(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let mut part = 2u32;
    loop {
        let candidate = part_path(path, part);
        if !candidate.exists() {
            debug!(
                "Reserved {} ({} is taken)",
                candidate.display(),
                path.display()
            );
            return candidate;
        }
        part = part.saturating_add(1);
    }
}

fn replace_chars(input: &str, illegal: &[char], replacement: char) -> String {
    input
        .chars()
        .map(|c| if illegal.contains(&c) { replacement } else { c })
        .collect()
}
