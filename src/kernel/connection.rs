//! Terminal connections
//!
//! A [`Connection`] is the host's end of a shell session. Behind it runs a
//! bridge process that spawns the shell on a fresh PTY and keeps reading
//! the master, turning output into text for the `on_data` callback. Text
//! the host writes goes into the master, i.e. to the shell's stdin.
//!
//! Output is decoded without ever splitting a code point across reads: an
//! incomplete trailing sequence is held back and completed by the next
//! chunk. Bytes that can never be valid become U+FFFD.

use super::executor::Priority;
use super::process::{Fd, Pid};
use super::syscall::fs;
use super::task::{Program, Sys};
use super::{Kernel, ProcessContext};
use crate::error::{KResult, KernelError};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

type DataCallback = Box<dyn FnMut(&str)>;

/// Incremental UTF-8 decoder
#[derive(Debug, Default)]
struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode `chunk` after whatever was held back from the last call
    fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        let mut out = String::new();
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    return out;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.carry = after.to_vec();
                            return out;
                        }
                    }
                }
            }
        }
    }
}

/// State shared by the bridge process and the host handle
struct Bridge {
    master: Cell<Option<Fd>>,
    /// Host input written before the master was open
    outbox: RefCell<Vec<u8>>,
    on_data: RefCell<Option<DataCallback>>,
    /// Output that arrived before a callback was set
    unclaimed: RefCell<String>,
}

impl Bridge {
    fn deliver(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.on_data.borrow_mut().as_mut() {
            Some(callback) => callback(text),
            None => self.unclaimed.borrow_mut().push_str(text),
        }
    }

    async fn run(&self, sys: Sys, shell: Program, chunk: usize) -> i32 {
        let (shell_pid, master) = match sys.spawn_pty(shell, Vec::new()).await {
            Ok(spawned) => spawned,
            Err(e) => {
                log::error!("terminal: spawning shell: {}", e);
                return 1;
            }
        };
        self.master.set(Some(master));
        log::debug!("terminal: shell {} on master fd {}", shell_pid, master);

        let queued = std::mem::take(&mut *self.outbox.borrow_mut());
        if !queued.is_empty() {
            if let Err(e) = sys.write_all(master, &queued).await {
                log::warn!("terminal: dropped {} queued bytes: {}", queued.len(), e);
            }
        }

        let mut decoder = Utf8Decoder::default();
        loop {
            match sys.read(master, chunk).await {
                Ok(data) if data.is_empty() => return 0,
                Ok(data) => self.deliver(&decoder.decode(&data)),
                Err(e) => {
                    log::warn!("terminal: read failed: {}", e);
                    return 1;
                }
            }
        }
    }
}

/// Host-side handle to a shell running on a PTY
pub struct Connection {
    kernel: Weak<Kernel>,
    pid: Pid,
    bridge: Rc<Bridge>,
}

impl Connection {
    /// pid of the bridge process
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Route shell output to `callback`, starting with anything already
    /// received
    pub fn on_data(&self, mut callback: impl FnMut(&str) + 'static) {
        let pending = std::mem::take(&mut *self.bridge.unclaimed.borrow_mut());
        if !pending.is_empty() {
            callback(&pending);
        }
        *self.bridge.on_data.borrow_mut() = Some(Box::new(callback));
    }

    /// Send `text` to the shell. Queued until the PTY is up; delivered on
    /// the next kernel tick after that.
    pub fn write(&self, text: &str) {
        let Some(master) = self.bridge.master.get() else {
            self.bridge.outbox.borrow_mut().extend_from_slice(text.as_bytes());
            return;
        };
        let Some(kernel) = self.kernel.upgrade() else {
            log::warn!("terminal: kernel gone, dropped {:?}", text);
            return;
        };
        let ctx = ProcessContext::new(kernel.clone(), self.pid);
        let data = text.as_bytes().to_vec();
        kernel.spawner().spawn_with_priority(
            async move {
                if let Err(e) = fs::write_all(&ctx, master, &data).await {
                    log::warn!("terminal: dropped {} bytes: {}", data.len(), e);
                }
            },
            Priority::Background,
        );
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("pid", &self.pid)
            .field("master", &self.bridge.master.get())
            .finish()
    }
}

impl Kernel {
    /// Start the configured shell behind a new terminal connection
    pub fn new_connection(self: &Rc<Self>) -> KResult<Connection> {
        let ctx = self.context();
        let shell_path = self.config().shell.clone();
        let shell = super::syscall::proc::find_executable(&ctx, &shell_path)?
            .ok_or(KernelError::NoEntry(shell_path))?;

        let bridge = Rc::new(Bridge {
            master: Cell::new(None),
            outbox: RefCell::new(Vec::new()),
            on_data: RefCell::new(None),
            unclaimed: RefCell::new(String::new()),
        });
        let chunk = self.config().read_chunk.max(1);
        let shared = bridge.clone();
        let program = Program::new("connection", move |sys, _args| {
            let bridge = shared.clone();
            let shell = shell.clone();
            async move { bridge.run(sys, shell, chunk).await }
        });
        let pid = self.spawn_program(program, Vec::new())?;
        log::info!("terminal connection on {}", pid);

        Ok(Connection {
            kernel: Rc::downgrade(self),
            pid,
            bridge,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_ascii() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"hello"), "hello");
        assert!(decoder.carry.is_empty());
    }

    #[test]
    fn test_decoder_holds_split_code_point() {
        let bytes = "aé€".as_bytes();
        let mut decoder = Utf8Decoder::default();
        let mut out = String::new();
        for byte in bytes {
            out.push_str(&decoder.decode(std::slice::from_ref(byte)));
        }
        assert_eq!(out, "aé€");
        assert!(decoder.carry.is_empty());
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{fffd}b");
        // A lone continuation byte can never start a sequence
        assert_eq!(decoder.decode(b"\x80"), "\u{fffd}");
    }

    #[test]
    fn test_decoder_carry_then_invalid() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"x\xe2\x82"), "x");
        assert_eq!(decoder.carry, vec![0xe2, 0x82]);
        assert_eq!(decoder.decode(b"y"), "\u{fffd}y");
    }

    #[test]
    fn test_missing_shell() {
        let kernel = crate::kernel::KernelBuilder::new().build().unwrap();
        let err = kernel.new_connection().unwrap_err();
        assert_eq!(err.code(), "ENOENT");
    }
}
