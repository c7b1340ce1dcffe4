use std::{
    backtrace::Backtrace,
    fs::OpenOptions,
    io::Write,
    panic::{PanicHookInfo, take_hook},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use chrono::Utc;
use chrono_tz::Tz;

pub const PARTIAL_RECORDING_NOTICE: &str =
    "• Recording of live stream aborted; a partial recording has been saved";

const PANIC_LOG: &str = "err.log";

/// Installs a global panic hook that treats any panic as fatal.
///
/// The hook logs the panic, prints the partial-recording notice when
/// `recording` is set, and exits with status 1. The record and the notice are
/// also appended to `err.log` in `log_dir` directly, since the non-blocking
/// writers may not flush before the process exits.
pub fn install(log_dir: impl AsRef<Path>, timezone: Tz, recording: Arc<AtomicBool>) {
    let log_dir = log_dir.as_ref().to_path_buf();
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |panic_info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut record = format_panic_record(panic_info, timezone);
            tracing::error!(target: "trec::panic", "{record}");

            if let Some(notice) = fault_notice(recording.load(Ordering::SeqCst)) {
                tracing::warn!("{notice}");
                eprintln!("{notice}");
                record.push('\n');
                record.push_str(notice);
            }

            let _ = append_panic_record(&log_dir, &record);
        }));

        previous_hook(panic_info);
        std::process::exit(1);
    }));
}

/// Notice printed on a fatal fault, if a recording was in progress.
pub fn fault_notice(recording: bool) -> Option<&'static str> {
    recording.then_some(PARTIAL_RECORDING_NOTICE)
}

fn append_panic_record(log_dir: &Path, record: &str) -> std::io::Result<()> {
    let path = PathBuf::from(log_dir).join(PANIC_LOG);
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{record}")?;
    file.flush()
}

fn format_panic_record(panic_info: &PanicHookInfo<'_>, timezone: Tz) -> String {
    let payload = panic_payload_to_string(panic_info);
    let location = panic_info
        .location()
        .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
        .unwrap_or_else(|| "<unknown>".to_string());

    let thread_name = thread::current()
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| "<unnamed>".to_string());

    let backtrace = Backtrace::force_capture();
    let ts = Utc::now()
        .with_timezone(&timezone)
        .format("%Y-%m-%dT%H:%M:%S%.3f%:z");

    format!(
        "{ts} PANIC thread={thread_name} location={location} payload={payload}\nBacktrace:\n{backtrace}"
    )
}

fn panic_payload_to_string(panic_info: &PanicHookInfo<'_>) -> String {
    if let Some(s) = panic_info.payload().downcast_ref::<&'static str>() {
        return (*s).to_string();
    }
    if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        return s.clone();
    }
    panic_info.to_string()
}
