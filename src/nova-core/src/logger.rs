use chrono::Local;
use fnv::FnvHashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::fmt::Arguments;
use std::io::Write;
use std::sync::Arc;
use std::thread::ThreadId;
use std::{fmt, thread};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

#[derive(Copy, Clone)]
pub enum Severity {
    Verbose,
    Info,
    Warn,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Severity::Verbose => write!(f, "verbose"),
            Severity::Info => write!(f, "info"),
            Severity::Warn => write!(f, "warn"),
            Severity::Error => write!(f, "error"),
            Severity::Fatal => write!(f, "fatal"),
        }
    }
}

#[derive(Clone)]
pub struct Message {
    pub severity: Severity,
    pub crate_name: String,
    pub message: String,
    pub time: chrono::DateTime<Local>,
    pub thread: ThreadId,
}

/// Receives messages from the logging macros. E.g: print to stdout, write to a file
pub trait Sink: Send + Sync {
    fn log(&self, message: &Message);
}

static SINKS: Lazy<RwLock<Vec<Arc<dyn Sink>>>> = Lazy::new(RwLock::default);

/// How threads are labelled in log output. Thread ids are never reused, so
/// entries are kept for the process lifetime.
static THREAD_NAMES: Lazy<RwLock<FnvHashMap<ThreadId, String>>> = Lazy::new(RwLock::default);

/// Label the calling thread in every message it logs from now on
pub fn set_current_thread_name(name: impl Into<String>) {
    THREAD_NAMES
        .write()
        .insert(thread::current().id(), name.into());
}

fn thread_name(id: ThreadId) -> String {
    THREAD_NAMES
        .read()
        .get(&id)
        .cloned()
        .unwrap_or_else(|| "Unknown Thread".to_string())
}

#[doc(hidden)]
pub fn internal_log(severity: Severity, crate_name: &str, args: Arguments) {
    let message = Message {
        severity,
        crate_name: crate_name.to_string(),
        message: args.to_string(),
        time: Local::now(),
        thread: thread::current().id(),
    };

    for sink in SINKS.read().iter() {
        sink.log(&message);
    }

    if matches!(message.severity, Severity::Fatal) {
        panic!("{}", message.message);
    }
}

pub fn register_sink(sink: Arc<dyn Sink>) {
    SINKS.write().push(sink);
}

/** Default logging macros */
#[macro_export]
macro_rules! nova_verbose {
    ($($arg:tt)*) => ({
        $crate::logger::internal_log($crate::logger::Severity::Verbose, env!("CARGO_PKG_NAME"), format_args!($($arg)*));
    })
}

#[macro_export]
macro_rules! nova_info {
    ($($arg:tt)*) => ({
        $crate::logger::internal_log($crate::logger::Severity::Info, env!("CARGO_PKG_NAME"), format_args!($($arg)*));
    })
}

#[macro_export]
macro_rules! nova_warn {
    ($($arg:tt)*) => ({
        $crate::logger::internal_log($crate::logger::Severity::Warn, env!("CARGO_PKG_NAME"), format_args!($($arg)*));
    })
}

#[macro_export]
macro_rules! nova_error {
    ($($arg:tt)*) => ({
        $crate::logger::internal_log($crate::logger::Severity::Error, env!("CARGO_PKG_NAME"), format_args!($($arg)*));
    })
}

#[macro_export]
macro_rules! nova_fatal {
    ($($arg:tt)*) => ({
        $crate::logger::internal_log($crate::logger::Severity::Fatal, env!("CARGO_PKG_NAME"), format_args!($($arg)*));
        unreachable!();
    })
}

/** Default sinks */
pub struct StdoutSink;

impl StdoutSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {})
    }
}

impl Sink for StdoutSink {
    fn log(&self, message: &Message) {
        let mut stdout = StandardStream::stdout(ColorChoice::Auto);

        stdout
            .set_color(
                ColorSpec::new().set_fg(Option::from(match message.severity {
                    Severity::Verbose => Color::Cyan,
                    Severity::Info => Color::White,
                    Severity::Warn => Color::Yellow,
                    Severity::Error => Color::Red,
                    Severity::Fatal => Color::Rgb(255, 15, 15),
                })),
            )
            .unwrap();

        writeln!(
            &mut stdout,
            "[{}] [{}/{}] ({}) {}",
            message.time.format("%H:%M:%S"),
            message.severity,
            thread_name(message.thread),
            message.crate_name,
            message.message
        )
        .unwrap();
        stdout.flush().unwrap();
    }
}
