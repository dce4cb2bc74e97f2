// Leveled console logging: request/response lines, faults, slow-accept sessions
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::SystemTime;

use crate::colors::*;

static ENABLED: AtomicBool = AtomicBool::new(true);
static MIN_LEVEL: AtomicU8 = AtomicU8::new(Level::Debug as u8);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Level {
    fn parse(s: &str) -> Level {
        match s.to_ascii_lowercase().as_str() {
            "debug" | "trace" => Level::Debug,
            "warn" | "warning" => Level::Warn,
            "error" => Level::Error,
            _ => Level::Info,
        }
    }
}

pub fn init(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

/// Unknown names fall back to `info`.
pub fn set_level(level: &str) {
    MIN_LEVEL.store(Level::parse(level) as u8, Ordering::Relaxed);
}

fn enabled_for(level: Level) -> bool {
    // errors ignore the level filter
    ENABLED.load(Ordering::Relaxed)
        && (level == Level::Error || level as u8 >= MIN_LEVEL.load(Ordering::Relaxed))
}

/// Timestamped line; warnings and errors go to stderr.
fn emit(level: Level, line: std::fmt::Arguments<'_>) {
    if !enabled_for(level) { return; }
    let ts = timestamp();
    if level >= Level::Warn {
        let mut err = io::stderr().lock();
        let _ = writeln!(err, "{DIM}{ts}{RESET} {line}");
    } else {
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{DIM}{ts}{RESET} {line}");
        let _ = out.flush();
    }
}

/// UTC `YYYY-MM-DD HH:MM:SS.mmm`.
fn timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = now.as_secs();
    let (year, month, day) = civil_date((secs / 86_400) as i64);
    let tod = secs % 86_400;
    format!(
        "{year:04}-{month:02}-{day:02} {:02}:{:02}:{:02}.{:03}",
        tod / 3600,
        (tod % 3600) / 60,
        tod % 60,
        now.subsec_millis()
    )
}

/// Days since 1970-01-01 to a proleptic Gregorian date.
pub(crate) fn civil_date(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

pub fn debug(msg: &str) {
    emit(Level::Debug, format_args!("{DIM}DBG {msg}{RESET}"));
}

pub fn info(msg: &str) {
    emit(Level::Info, format_args!("{BOLD}{CYAN}{msg}{RESET}"));
}

pub fn warn(msg: &str) {
    emit(Level::Warn, format_args!("{YELLOW}⚠ {msg}{RESET}"));
}

pub fn error(msg: &str) {
    emit(Level::Error, format_args!("{RED}✗ {msg}{RESET}"));
}

pub fn module_loaded(name: &str) {
    if !ENABLED.load(Ordering::Relaxed) { return; }
    let _ = writeln!(io::stdout().lock(), "  {GREEN}✓{RESET} {name}");
}

pub fn request(method: &str, path: &str, peer: &str) {
    emit(Level::Info, format_args!("{YELLOW}→{RESET} {BOLD}{method}{RESET} {path} from {peer}"));
}

pub fn response(status: u16, ms: u128, streamed: bool) {
    let col = status_color(status);
    let tag = if streamed { " [STREAM]" } else { "" };
    emit(Level::Info, format_args!("{GREEN}←{RESET} {BOLD}{col}{status}{RESET} ({ms}ms){CYAN}{tag}{RESET}"));
}

/// An injected fault fired.
pub fn fault(route: &str, status: u16, processed: usize, threshold: usize) {
    emit(
        Level::Info,
        format_args!("{MAGENTA}⚡ {route}: fault {status} after {processed} bytes (threshold {threshold}){RESET}"),
    );
}

/// Connection-level events: identity registry and slow-accept sessions.
pub fn session(event: &str, peer: &str) {
    emit(Level::Debug, format_args!("{DIM}SESS{RESET} {event} {peer}"));
}

pub fn separator() {
    if !enabled_for(Level::Debug) { return; }
    let _ = writeln!(io::stdout().lock(), "{SEPARATOR}");
}
