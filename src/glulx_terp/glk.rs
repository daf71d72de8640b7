//! The external I/O capability. The VM core consumes this trait and nothing
//! else: character output for the string decoder, byte streams for the
//! save/restore opcodes, and the selector-dispatched `glk` opcode itself.
//!
//! The provider must not touch VM registers; it sees main memory only through
//! the `dispatch` argument, for selectors that marshal buffers.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use log::warn;

use super::memory::Memory;

// The selectors the bundled providers answer. A full windowing provider
// would dispatch many more; unknown selectors are reported once per call and
// produce 0, which well-behaved game code treats as "unsupported".
pub const SEL_EXIT: u32 = 0x0001;
pub const SEL_PUT_CHAR: u32 = 0x0080;
pub const SEL_PUT_BUFFER: u32 = 0x0084;
pub const SEL_PUT_CHAR_UNI: u32 = 0x0128;

pub trait GlkSystem {
    /// Write one byte-sized character to the current output.
    fn put_char(&mut self, ch: u8);

    /// Write one Unicode character to the current output.
    fn put_char_uni(&mut self, ch: u32);

    /// Write a run of byte characters to the current output.
    fn put_buffer(&mut self, buf: &[u8]);

    /// Append to a byte stream (save-file plumbing).
    fn put_buffer_stream(&mut self, str_id: u32, buf: &[u8]);

    /// Read from a byte stream at its current position; returns the count
    /// actually read.
    fn get_buffer_stream(&mut self, str_id: u32, buf: &mut [u8]) -> u32;

    fn stream_set_position(&mut self, str_id: u32, pos: u32);

    /// The `glk` opcode: selector plus popped arguments, one 32-bit result.
    fn dispatch(&mut self, mem: &mut Memory, selector: u32, args: &[u32]) -> u32;
}

struct StreamBuf {
    data: Vec<u8>,
    pos: usize,
}

fn stream_put(streams: &mut HashMap<u32, StreamBuf>, str_id: u32, buf: &[u8]) {
    let stream = streams.entry(str_id).or_insert_with(|| StreamBuf { data: Vec::new(), pos: 0 });
    let end = stream.pos + buf.len();
    if end > stream.data.len() {
        stream.data.resize(end, 0);
    }
    stream.data[stream.pos..end].copy_from_slice(buf);
    stream.pos = end;
}

fn stream_get(streams: &mut HashMap<u32, StreamBuf>, str_id: u32, buf: &mut [u8]) -> u32 {
    let Some(stream) = streams.get_mut(&str_id) else {
        return 0;
    };
    let avail = stream.data.len().saturating_sub(stream.pos);
    let count = avail.min(buf.len());
    buf[..count].copy_from_slice(&stream.data[stream.pos..stream.pos + count]);
    stream.pos += count;
    count as u32
}

fn dispatch_common(
    glk: &mut dyn GlkSystem,
    mem: &mut Memory,
    selector: u32,
    args: &[u32],
) -> Option<u32> {
    match selector {
        SEL_PUT_CHAR => {
            glk.put_char(*args.first().unwrap_or(&0) as u8);
            Some(0)
        }
        SEL_PUT_CHAR_UNI => {
            glk.put_char_uni(*args.first().unwrap_or(&0));
            Some(0)
        }
        SEL_PUT_BUFFER => {
            if let (Some(&addr), Some(&len)) = (args.first(), args.get(1)) {
                let mut bytes = Vec::new();
                for offset in 0..len {
                    match mem.get_u8(addr.wrapping_add(offset)) {
                        Ok(ch) => bytes.push(ch),
                        Err(_) => break,
                    }
                }
                glk.put_buffer(&bytes);
            }
            Some(0)
        }
        _ => None,
    }
}

/// The provider the command-line binary uses: characters to stdout, streams
/// in memory.
pub struct StdioGlk {
    streams: HashMap<u32, StreamBuf>,
}

impl StdioGlk {
    pub fn new() -> Self {
        Self { streams: HashMap::new() }
    }
}

impl Default for StdioGlk {
    fn default() -> Self {
        Self::new()
    }
}

impl GlkSystem for StdioGlk {
    fn put_char(&mut self, ch: u8) {
        let mut out = std::io::stdout();
        let _ = out.write_all(&[ch]);
    }

    fn put_char_uni(&mut self, ch: u32) {
        let mut out = std::io::stdout();
        match char::from_u32(ch) {
            Some(ch) => {
                let _ = write!(out, "{ch}");
            }
            None => {
                let _ = write!(out, "?");
            }
        }
    }

    fn put_buffer(&mut self, buf: &[u8]) {
        let mut out = std::io::stdout();
        let _ = out.write_all(buf);
    }

    fn put_buffer_stream(&mut self, str_id: u32, buf: &[u8]) {
        stream_put(&mut self.streams, str_id, buf);
    }

    fn get_buffer_stream(&mut self, str_id: u32, buf: &mut [u8]) -> u32 {
        stream_get(&mut self.streams, str_id, buf)
    }

    fn stream_set_position(&mut self, str_id: u32, pos: u32) {
        if let Some(stream) = self.streams.get_mut(&str_id) {
            stream.pos = (pos as usize).min(stream.data.len());
        }
    }

    fn dispatch(&mut self, mem: &mut Memory, selector: u32, args: &[u32]) -> u32 {
        if let Some(res) = dispatch_common(self, mem, selector, args) {
            return res;
        }
        warn!("unhandled glk selector 0x{selector:04X} ({} args)", args.len());
        0
    }
}

/// A fully in-memory provider: output is captured instead of printed. This is
/// what the test suites drive the VM with; the output handle stays usable
/// after the provider is boxed into the interpreter.
pub struct MemGlk {
    output: Rc<RefCell<Vec<u8>>>,
    streams: HashMap<u32, StreamBuf>,
}

impl MemGlk {
    pub fn new() -> Self {
        Self { output: Rc::new(RefCell::new(Vec::new())), streams: HashMap::new() }
    }

    pub fn output_handle(&self) -> Rc<RefCell<Vec<u8>>> {
        Rc::clone(&self.output)
    }
}

impl Default for MemGlk {
    fn default() -> Self {
        Self::new()
    }
}

impl GlkSystem for MemGlk {
    fn put_char(&mut self, ch: u8) {
        self.output.borrow_mut().push(ch);
    }

    fn put_char_uni(&mut self, ch: u32) {
        match char::from_u32(ch) {
            Some(ch) => {
                let mut buf = [0u8; 4];
                self.output.borrow_mut().extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            }
            None => self.output.borrow_mut().push(b'?'),
        }
    }

    fn put_buffer(&mut self, buf: &[u8]) {
        self.output.borrow_mut().extend_from_slice(buf);
    }

    fn put_buffer_stream(&mut self, str_id: u32, buf: &[u8]) {
        stream_put(&mut self.streams, str_id, buf);
    }

    fn get_buffer_stream(&mut self, str_id: u32, buf: &mut [u8]) -> u32 {
        stream_get(&mut self.streams, str_id, buf)
    }

    fn stream_set_position(&mut self, str_id: u32, pos: u32) {
        if let Some(stream) = self.streams.get_mut(&str_id) {
            stream.pos = (pos as usize).min(stream.data.len());
        }
    }

    fn dispatch(&mut self, mem: &mut Memory, selector: u32, args: &[u32]) -> u32 {
        if let Some(res) = dispatch_common(self, mem, selector, args) {
            return res;
        }
        warn!("unhandled glk selector 0x{selector:04X} ({} args)", args.len());
        0
    }
}
