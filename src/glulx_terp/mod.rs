pub mod blorb;
pub mod float;
pub mod gestalt;
pub mod glk;
pub mod memory;
pub mod operations;

mod accel;
mod funcs;
mod heap;
mod rand;
mod search;
mod serial;
mod stack;
mod string;

#[cfg(test)]
pub(crate) mod test_image;

use std::fmt;
use std::io::Read;

use log::error;

use self::accel::AccelTable;
use self::glk::GlkSystem;
use self::heap::Heap;
use self::memory::{Memory, MemoryError};
use self::operations::exec::Outcome;
use self::operations::{OPCode, OperandList};
use self::rand::GlulxRandom;
use self::serial::UndoChain;
use self::stack::Stack;
use self::string::StringCache;

/// A fatal VM error: the message plus the address it concerns (usually the
/// program counter at the faulting instruction). Execution does not resume
/// after one of these; most of them mean the memory map or stack is corrupt.
#[derive(Debug, Clone)]
pub struct Fault {
    pub message: String,
    pub addr: Option<u32>,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), addr: None }
    }

    pub fn at(message: impl Into<String>, addr: u32) -> Self {
        Self { message: message.into(), addr: Some(addr) }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.addr {
            Some(addr) => write!(f, "{} (0x{addr:X})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

#[derive(Debug)]
pub enum Errors {
    IOError(std::io::Error),
    Memory(MemoryError),
    Blorb(blorb::BlorbError),
    Fatal(Fault),
}

/// The whole machine: registers, memory map, stack, heap, RNG, undo chain,
/// string-decoder cache, and the external I/O capability. Every operation
/// threads through this one value.
pub struct GlulxTerp {
    pub(crate) mem: Memory,
    pub(crate) stack: Stack,
    pub(crate) glk: Box<dyn GlkSystem>,

    // Registers.
    pub(crate) pc: u32,
    pub(crate) stackptr: u32,
    pub(crate) frameptr: u32,
    pub(crate) valstackbase: u32,
    pub(crate) localsbase: u32,
    pub(crate) stringtable: u32,
    pub(crate) iosys_mode: u32,
    pub(crate) iosys_rock: u32,
    pub(crate) protect_start: u32,
    pub(crate) protect_end: u32,

    pub(crate) heap: Heap,
    pub(crate) rng: GlulxRandom,
    pub(crate) undo: UndoChain,
    pub(crate) accel: AccelTable,
    pub(crate) strcache: StringCache,

    fast_ops: Box<[Option<(OPCode, OperandList)>; 0x80]>,
}

impl GlulxTerp {
    pub fn from_reader<T: Read>(source: &mut T, glk: Box<dyn GlkSystem>) -> Result<Self, Errors> {
        let mut raw: Vec<u8> = Vec::new();
        source.read_to_end(&mut raw).map_err(Errors::IOError)?;
        Self::from_image(raw, glk)
    }

    pub fn from_image(file: Vec<u8>, glk: Box<dyn GlkSystem>) -> Result<Self, Errors> {
        let file = blorb::unwrap_game_image(file).map_err(Errors::Blorb)?;
        let mem = Memory::new(file).map_err(Errors::Memory)?;
        let stack = Stack::new(mem.stack_size());

        let mut terp = Self {
            mem,
            stack,
            glk,
            pc: 0,
            stackptr: 0,
            frameptr: 0,
            valstackbase: 0,
            localsbase: 0,
            stringtable: 0,
            iosys_mode: 0,
            iosys_rock: 0,
            protect_start: 0,
            protect_end: 0,
            heap: Heap::new(),
            rng: GlulxRandom::new(),
            undo: UndoChain::new(),
            accel: AccelTable::new(),
            strcache: StringCache::new(),
            fast_ops: operations::build_fast_table(),
        };
        terp.vm_restart().map_err(Errors::Fatal)?;
        Ok(terp)
    }

    /// Put the machine into its boot state: original memory size, pristine
    /// image (minus the protect range), cleared registers, and the start
    /// function entered. Both startup and the `restart` opcode come through
    /// here.
    pub(crate) fn vm_restart(&mut self) -> Result<(), Fault> {
        self.heap.clear(&mut self.mem);
        if self.mem.change_memsize(self.mem.orig_end_mem(), true, false) != 0 {
            return Err(Fault::new("memory could not be reset to its original size"));
        }
        self.mem.reload_image(self.protect_start, self.protect_end);

        self.stackptr = 0;
        self.frameptr = 0;
        self.pc = 0;
        self.valstackbase = 0;
        self.localsbase = 0;
        self.iosys_mode = 0;
        self.iosys_rock = 0;
        self.set_string_table(self.mem.decoding_tree());

        let start = self.mem.start_func();
        self.enter_function(start, &[])
    }

    /// Run until `quit` (or an equivalent final return) or a fatal error.
    pub fn run(&mut self) -> Result<(), Errors> {
        loop {
            match self.step() {
                Ok(Outcome::Continue) => {}
                Ok(Outcome::Quit) => return Ok(()),
                Err(fault) => {
                    error!("fatal: {fault} [pc = 0x{:X}]", self.pc);
                    return Err(Errors::Fatal(fault));
                }
            }
        }
    }

    pub(crate) fn fast_op(&self, byte: u8) -> Option<(OPCode, OperandList)> {
        self.fast_ops[byte as usize]
    }

    // Read-only views, mainly for the test suites.

    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    pub fn program_counter(&self) -> u32 {
        self.pc
    }

    pub fn stack_pointer(&self) -> u32 {
        self.stackptr
    }
}
