//! The early debug console, fanning log records out to COM1 and the framebuffer.

use core::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use spin::{Mutex, Once};

use crate::{arch, framebuffer::FrameBufferWriter, serial::SerialWriter};

pub struct Console {
    has_output: AtomicBool,
    framebuffer: Mutex<Option<FrameBufferWriter>>,
    serial: Mutex<Option<SerialWriter>>,
}

static DEFAULT: Once<Console> = Once::new();

impl Console {
    pub fn init() -> &'static Self {
        let console = Self::get();
        console.install();
        console
    }

    pub fn get() -> &'static Self {
        DEFAULT.call_once(|| Console {
            has_output: AtomicBool::new(false),
            framebuffer: Mutex::new(None),
            serial: Mutex::new(None),
        })
    }

    fn install(&'static self) {
        if log::set_logger(self).is_err() {
            return;
        }

        if cfg!(debug_assertions) {
            log::set_max_level(LevelFilter::Trace);
        } else {
            log::set_max_level(LevelFilter::Info);
        }
    }

    pub fn has_output(&self) -> bool {
        self.has_output.load(Ordering::SeqCst)
    }

    pub fn attach_serial(&self, serial: SerialWriter) {
        *self.serial.lock() = Some(serial);
        self.has_output.store(true, Ordering::SeqCst);
    }

    pub fn attach_framebuffer(&self, fb: FrameBufferWriter) {
        *self.framebuffer.lock() = Some(fb);
        self.has_output.store(true, Ordering::SeqCst);
    }
}

impl log::Log for Console {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        self.has_output()
    }

    fn log(&self, record: &log::Record) {
        // Handlers log too; taking a writer lock with interrupts on could deadlock.
        arch::without_interrupts(|| {
            if let Some(serial) = &mut *self.serial.lock() {
                write_log_entry_to(serial, record).ok();
            }
            if let Some(fb) = &mut *self.framebuffer.lock() {
                write_log_entry_to(fb, record).ok();
            }
        });
    }

    fn flush(&self) {}
}

fn write_log_entry_to(
    writer: &mut impl core::fmt::Write,
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
