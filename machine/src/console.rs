//! Console interfaces, mirrored on the teacher's `console` module: a small
//! `Write` trait, a process-wide registration slot guarded by a
//! [`NullLock`](crate::sync::NullLock), and a swappable backing sink.

use crate::sync::NullLock;
use std::fmt;

pub mod interface {
    use std::fmt;

    /// A sink that can receive formatted kernel log output.
    pub trait Write {
        fn write_fmt(&self, args: fmt::Arguments) -> fmt::Result;
    }
}

/// A console that discards everything written to it; the default until
/// something registers a real one.
pub struct NullConsole;

impl interface::Write for NullConsole {
    fn write_fmt(&self, _args: fmt::Arguments) -> fmt::Result {
        Ok(())
    }
}

/// A console that writes to the process's standard output. Stands in for the
/// teacher's UART/mini-UART drivers in a hosted build: there is no serial
/// line off real hardware, so the kernel log goes to stdout instead.
pub struct StdoutConsole;

impl interface::Write for StdoutConsole {
    fn write_fmt(&self, args: fmt::Arguments) -> fmt::Result {
        use std::io::Write as _;
        print!("{args}");
        std::io::stdout().flush().ok();
        Ok(())
    }
}

static CONSOLE: NullLock<&'static (dyn interface::Write + Sync)> = NullLock::new(&NullConsole);

/// Register the global console sink. Kernel boot calls this once with a
/// [`StdoutConsole`] (or a test-only capturing console).
pub fn register_console(new_console: &'static (dyn interface::Write + Sync)) {
    CONSOLE.lock(|slot| *slot = new_console);
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    CONSOLE.read(|console| console.write_fmt(args).ok());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_console_swallows_output() {
        // Doesn't panic, doesn't write anywhere interesting.
        _print(format_args!("probe"));
    }
}
