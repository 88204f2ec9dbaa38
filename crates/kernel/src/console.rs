//! Defines the kernel console that the `log` facade writes to.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::{fmt::Write, sync::atomic::AtomicBool};

#[cfg(debug_assertions)]
use log::LevelFilter;
use spin::{Mutex, Once};

/// An output the console copies every log line to.
pub type Sink = Box<dyn Write + Send>;

pub struct Console {
    has_output: AtomicBool,
    sinks: Mutex<Vec<Sink>>,
}

static DEFAULT: Once<Console> = Once::new();

impl Console {
    pub const fn new() -> Self {
        Self {
            has_output: AtomicBool::new(false),
            sinks: Mutex::new(Vec::new()),
        }
    }

    pub fn init() -> &'static Self {
        let console = Self::global();
        console.install();
        console
    }

    pub fn global() -> &'static Self {
        DEFAULT.call_once(Console::new)
    }

    pub fn install(&'static self) {
        if log::set_logger(self).is_err() {
            return;
        }

        #[cfg(debug_assertions)]
        log::set_max_level(LevelFilter::Trace);

        #[cfg(not(debug_assertions))]
        log::set_max_level(log::LevelFilter::Info);
    }

    pub fn has_output(&self) -> bool {
        self.has_output.load(core::sync::atomic::Ordering::SeqCst)
    }

    pub fn attach(&self, sink: Sink) {
        self.sinks.lock().push(sink);
        self.has_output
            .store(true, core::sync::atomic::Ordering::SeqCst);
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl log::Log for Console {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        for sink in self.sinks.lock().iter_mut() {
            // A sink that cannot keep up loses the line; there is nowhere to report it.
            let _ = write_log_entry_to(sink.as_mut(), record);
        }
    }

    fn flush(&self) {}
}

fn write_log_entry_to(
    writer: &mut (impl core::fmt::Write + ?Sized),
    record: &log::Record,
) -> core::fmt::Result {
    #[cfg(any(debug_assertions, feature = "detailed-logging"))]
    return writeln!(
        writer,
        "[{} {}:{} {}] {}",
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.target(),
        record.args()
    );
    #[cfg(not(any(debug_assertions, feature = "detailed-logging")))]
    return writeln!(writer, "[{:5}] {}", record.level(), record.args());
}
