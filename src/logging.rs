use core::fmt::{self, Write};

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Once;

/// Destination for all console output of the boot path.
///
/// The bare-metal image installs its UART here before the first CPU enters;
/// until a sink is installed all output is dropped. Sinks must tolerate
/// concurrent writers, one per CPU.
pub trait ConsoleSink: Sync {
    fn write_str(&self, s: &str);
}

static CONSOLE: Once<&'static dyn ConsoleSink> = Once::new();

pub fn set_console(console: &'static dyn ConsoleSink) {
    CONSOLE.call_once(|| console);
}

struct SinkWriter(&'static dyn ConsoleSink);

impl Write for SinkWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

pub fn print(args: fmt::Arguments) {
    if let Some(console) = CONSOLE.get() {
        SinkWriter(*console).write_fmt(args).ok();
    }
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::logging::print(core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => {
        $crate::logging::print(core::format_args!("{}\n", core::format_args!($($arg)*)))
    };
}

struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        println!(
            "[{:>5}] {}",
            level_tag(record.level()),
            record.args()
        );
    }

    fn flush(&self) {}
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

static LOGGER: SimpleLogger = SimpleLogger;
static LOG_INIT: Once = Once::new();

/// Install the logger. Safe to call from multiple CPUs; only the first call
/// takes effect.
pub fn init() {
    LOG_INIT.call_once(|| {
        log::set_logger(&LOGGER).ok();
        log::set_max_level(match option_env!("LOG") {
            Some("error") => LevelFilter::Error,
            Some("warn") => LevelFilter::Warn,
            Some("info") => LevelFilter::Info,
            Some("debug") => LevelFilter::Debug,
            Some("trace") => LevelFilter::Trace,
            _ => LevelFilter::Warn,
        });
    });
}
