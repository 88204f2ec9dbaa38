use crate::console::Console;

/// COM1.
const SERIAL_PORT: u16 = 0x3F8;

pub struct SerialWriter {
    port: uart_16550::SerialPort,
}

impl core::fmt::Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.port.write_str(s)
    }
}

// cSpell:ignore uart
pub fn init(console: &Console) {
    // SAFETY: COM1 is a standard PC port and nothing else drives it.
    let mut port = unsafe { uart_16550::SerialPort::new(SERIAL_PORT) };
    port.init();
    console.attach(alloc::boxed::Box::new(SerialWriter { port }));
}
