//! Panic reporting.

use std::any::Any;
use std::backtrace::Backtrace;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::{PanicHookInfo, take_hook};
use std::path::{Path, PathBuf};
use std::thread;

use chrono::{Local, NaiveDate};

use crate::logging::LOG_FILE_PREFIX;

/// Log panics through `tracing` and, in `panic = "abort"` builds, append them
/// to today's log file directly since the non-blocking writer may not flush
/// before the abort.
pub fn install(log_dir: impl AsRef<Path>) {
    let log_dir = log_dir.as_ref().to_path_buf();
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |panic_info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let record = panic_record(panic_info);
            tracing::error!(target: "scrabble_bot::panic", "{record}");

            if cfg!(panic = "abort") {
                let path = daily_log_path(&log_dir, Local::now().date_naive());
                let _ = append_line(&path, &record);
            }
        }));

        previous_hook(panic_info);
    }));
}

/// Path `tracing_appender::rolling::daily` writes to on `date`.
fn daily_log_path(log_dir: &Path, date: NaiveDate) -> PathBuf {
    log_dir.join(format!("{LOG_FILE_PREFIX}.{}", date.format("%Y-%m-%d")))
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    file.flush()
}

fn panic_record(panic_info: &PanicHookInfo<'_>) -> String {
    let payload = payload_text(panic_info.payload()).unwrap_or_else(|| panic_info.to_string());
    let location = panic_info
        .location()
        .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
        .unwrap_or_else(|| "<unknown>".to_string());
    let thread_name = thread::current()
        .name()
        .unwrap_or("<unnamed>")
        .to_string();

    format!(
        "{} PANIC thread={thread_name} location={location} payload={payload}\nBacktrace:\n{}",
        Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
        Backtrace::force_capture()
    )
}

fn payload_text(payload: &(dyn Any + Send)) -> Option<String> {
    payload
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
}
