//! String and text output. The compressed-string decoder is not a
//! coroutine: whenever it must hand control to a function (an indirect leaf,
//! or the filter output discipline) it records its bit cursor in a call stub
//! and returns; `pop_callstub` re-enters it when the function finishes.

use log::warn;

use super::glk::GlkSystem;
use super::memory::Memory;
use super::stack::desttype;
use super::{Fault, GlulxTerp};

pub(crate) const IOSYS_NULL: u32 = 0;
pub(crate) const IOSYS_FILTER: u32 = 1;
pub(crate) const IOSYS_GLK: u32 = 2;

/// How many branch levels one cache step collapses.
const CACHEBITS: u32 = 4;
const CACHESIZE: usize = 1 << CACHEBITS;
/// A decoding tree bigger than this is almost certainly cyclic.
const MAX_CACHE_TABLES: usize = 4096;

/// A parsed decoding-table leaf.
#[derive(Debug, Clone, Copy)]
enum Leaf {
    Terminator,
    Char(u8),
    UniChar(u32),
    CStr(u32),
    UniStr(u32),
    Indirect { double: bool, operand: u32, argc: u32, argv: u32 },
}

fn parse_leaf(mem: &Memory, node: u32) -> Result<Leaf, Fault> {
    let ntype = mem.get_u8(node)?;
    Ok(match ntype {
        0x01 => Leaf::Terminator,
        0x02 => Leaf::Char(mem.get_u8(node + 1)?),
        0x03 => Leaf::CStr(node + 1),
        0x04 => Leaf::UniChar(mem.get_u32(node + 1)?),
        0x05 => Leaf::UniStr(node + 1),
        0x08 => Leaf::Indirect { double: false, operand: mem.get_u32(node + 1)?, argc: 0, argv: 0 },
        0x09 => Leaf::Indirect { double: true, operand: mem.get_u32(node + 1)?, argc: 0, argv: 0 },
        0x0A => Leaf::Indirect {
            double: false,
            operand: mem.get_u32(node + 1)?,
            argc: mem.get_u32(node + 5)?,
            argv: node + 9,
        },
        0x0B => Leaf::Indirect {
            double: true,
            operand: mem.get_u32(node + 1)?,
            argc: mem.get_u32(node + 5)?,
            argv: node + 9,
        },
        _ => return Err(Fault::at("unknown entity in string decoding table", node)),
    })
}

#[derive(Clone, Copy, Debug)]
enum CacheNode {
    Branch(usize),
    Leaf(Leaf),
}

#[derive(Clone, Copy, Debug)]
struct CacheEntry {
    bits: u8,
    node: CacheNode,
}

struct CacheTable {
    entries: [CacheEntry; CACHESIZE],
}

/// The lazily built lookup cache for a decoding table that lives entirely in
/// ROM. Tables are an arena indexed by position; entry 0 is the root table.
pub(crate) struct StringCache {
    examined_for: Option<u32>,
    tables: Vec<CacheTable>,
}

impl StringCache {
    pub(crate) fn new() -> Self {
        Self { examined_for: None, tables: Vec::new() }
    }

    pub(crate) fn invalidate(&mut self) {
        self.examined_for = None;
        self.tables.clear();
    }

    fn is_ready(&self) -> bool {
        !self.tables.is_empty()
    }

    fn entry(&self, table: usize, slot: usize) -> CacheEntry {
        self.tables[table].entries[slot]
    }
}

fn build_cache_table(mem: &Memory, node: u32, tables: &mut Vec<CacheTable>) -> Result<usize, Fault> {
    if tables.len() >= MAX_CACHE_TABLES {
        return Err(Fault::new("string decoding table too large to cache"));
    }
    let ix = tables.len();
    let filler = CacheEntry { bits: 0, node: CacheNode::Leaf(Leaf::Terminator) };
    tables.push(CacheTable { entries: [filler; CACHESIZE] });
    fill_cache(mem, node, tables, ix, 0, 0)?;
    Ok(ix)
}

fn fill_cache(
    mem: &Memory,
    node: u32,
    tables: &mut Vec<CacheTable>,
    table_ix: usize,
    depth: u32,
    prefix: u32,
) -> Result<(), Fault> {
    let ntype = mem.get_u8(node)?;
    if ntype == 0x00 && depth < CACHEBITS {
        // Bit 0 descends left, bit 1 right; the bit at this depth is the
        // next one read from the stream.
        fill_cache(mem, mem.get_u32(node + 1)?, tables, table_ix, depth + 1, prefix)?;
        fill_cache(mem, mem.get_u32(node + 5)?, tables, table_ix, depth + 1, prefix | (1 << depth))
    } else {
        let entry = if ntype == 0x00 {
            let sub = build_cache_table(mem, node, tables)?;
            CacheEntry { bits: depth as u8, node: CacheNode::Branch(sub) }
        } else {
            CacheEntry { bits: depth as u8, node: CacheNode::Leaf(parse_leaf(mem, node)?) }
        };
        // Every slot whose low `depth` bits match this prefix resolves here.
        let step = 1usize << depth;
        let mut slot = prefix as usize;
        while slot < CACHESIZE {
            tables[table_ix].entries[slot] = entry;
            slot += step;
        }
        Ok(())
    }
}

/// What a decode pass tells the outer loop to do next.
enum StrPhase {
    /// This string (or sub-string) ran out; pop a stub or finish.
    Done,
    /// Control was handed to a function; unwind out of the decoder.
    Suspend,
    /// Switch to another string context.
    Jump { addr: u32, inmiddle: u32, bitnum: u32 },
}

impl GlulxTerp {
    pub(crate) fn set_iosys(&mut self, mode: u32, rock: u32) {
        let (mode, rock) = match mode {
            IOSYS_NULL | IOSYS_FILTER | IOSYS_GLK => (mode, rock),
            _ => {
                warn!("unsupported I/O system {mode} requested, falling back to null");
                (IOSYS_NULL, 0)
            }
        };
        self.iosys_mode = mode;
        self.iosys_rock = rock;
    }

    pub(crate) fn set_string_table(&mut self, addr: u32) {
        self.stringtable = addr;
        self.strcache.invalidate();
    }

    /// Emit one byte character through the current output discipline.
    pub(crate) fn stream_char(&mut self, ch: u8) -> Result<(), Fault> {
        match self.iosys_mode {
            IOSYS_GLK => {
                self.glk.put_char(ch);
                Ok(())
            }
            IOSYS_FILTER => {
                self.push_callstub(desttype::DISCARD, 0)?;
                let rock = self.iosys_rock;
                self.enter_function(rock, &[ch as u32])
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn stream_unichar(&mut self, ch: u32) -> Result<(), Fault> {
        match self.iosys_mode {
            IOSYS_GLK => {
                self.glk.put_char_uni(ch);
                Ok(())
            }
            IOSYS_FILTER => {
                self.push_callstub(desttype::DISCARD, 0)?;
                let rock = self.iosys_rock;
                self.enter_function(rock, &[ch])
            }
            _ => Ok(()),
        }
    }

    /// Print a signed decimal number. Under the filter discipline each digit
    /// is a function call; the number itself rides in the stub's pc field
    /// and `charnum` counts the digits already delivered.
    pub(crate) fn stream_num(&mut self, val: i32, inmiddle: bool, charnum: u32) -> Result<(), Fault> {
        let mut buf = [0u8; 16];
        let mut len = 0usize;
        if val == 0 {
            buf[0] = b'0';
            len = 1;
        } else {
            let mut ival = val.unsigned_abs();
            while ival != 0 {
                buf[len] = b'0' + (ival % 10) as u8;
                len += 1;
                ival /= 10;
            }
            if val < 0 {
                buf[len] = b'-';
                len += 1;
            }
        }

        match self.iosys_mode {
            IOSYS_GLK => {
                for ix in (0..len).rev() {
                    self.glk.put_char(buf[ix]);
                }
                Ok(())
            }
            IOSYS_FILTER => {
                if (charnum as usize) < len {
                    if !inmiddle {
                        self.push_callstub(desttype::RESUME_FUNC, 0)?;
                    }
                    let ch = buf[len - 1 - charnum as usize];
                    self.pc = val as u32;
                    self.push_callstub(desttype::RESUME_NUMBER, charnum + 1)?;
                    let rock = self.iosys_rock;
                    self.enter_function(rock, &[ch as u32])
                } else {
                    if inmiddle {
                        let stub = self.pop_stub_raw()?;
                        if stub.desttype != desttype::RESUME_FUNC {
                            return Err(Fault::new("illegal call stub at end of number print"));
                        }
                        self.pc = stub.pc;
                    }
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// Print the string object at `addr`. `inmiddle` is zero for a fresh
    /// string, or the string-type byte being resumed (with `addr` pointing
    /// into the body and `bitnum` positioning the bit cursor for 0xE1).
    pub(crate) fn stream_string(&mut self, addr: u32, inmiddle: u32, bitnum: u32) -> Result<(), Fault> {
        if addr == 0 {
            return Err(Fault::new("attempt to print a string at address 0"));
        }

        let mut addr = addr;
        let mut bitnum = bitnum;
        let mut inmiddle = inmiddle;
        let mut substring = inmiddle != 0;

        loop {
            let strtype = if inmiddle == 0 {
                let t = self.mem.get_u8(addr)? as u32;
                addr += if t == 0xE2 { 4 } else { 1 };
                bitnum = 0;
                t
            } else {
                inmiddle
            };

            let phase = match strtype {
                0xE1 => self.decode_compressed(&mut addr, &mut bitnum, &mut substring)?,
                0xE0 => self.decode_cstr(&mut addr, &mut substring)?,
                0xE2 => self.decode_unistr(&mut addr, &mut substring)?,
                0xE0..=0xFF => {
                    return Err(Fault::at("attempt to print unknown type of string", addr))
                }
                _ => return Err(Fault::at("attempt to print a non-string object", addr)),
            };

            match phase {
                StrPhase::Suspend => return Ok(()),
                StrPhase::Jump { addr: a, inmiddle: t, bitnum: b } => {
                    addr = a;
                    inmiddle = t;
                    bitnum = b;
                }
                StrPhase::Done => {
                    if !substring {
                        return Ok(());
                    }
                    // A sub-print ended; the stub below says what comes next.
                    let stub = self.pop_stub_raw()?;
                    match stub.desttype {
                        desttype::RESUME_FUNC => {
                            self.pc = stub.pc;
                            return Ok(());
                        }
                        desttype::RESUME_HUFFSTR => {
                            addr = stub.pc;
                            bitnum = stub.destaddr;
                            inmiddle = 0xE1;
                        }
                        desttype::RESUME_CSTR => {
                            addr = stub.pc;
                            inmiddle = 0xE0;
                        }
                        desttype::RESUME_UNISTR => {
                            addr = stub.pc;
                            inmiddle = 0xE2;
                        }
                        _ => {
                            return Err(Fault::new(
                                "function-terminator call stub at end of string",
                            ))
                        }
                    }
                }
            }
        }
    }

    fn decode_compressed(
        &mut self,
        addr: &mut u32,
        bitnum: &mut u32,
        substring: &mut bool,
    ) -> Result<StrPhase, Fault> {
        if self.stringtable == 0 {
            return Err(Fault::new("no string-decoding table is set"));
        }
        self.ensure_string_cache()?;
        if self.strcache.is_ready() {
            self.decode_cached(addr, bitnum, substring)
        } else {
            let root = self.mem.get_u32(self.stringtable + 8)?;
            self.decode_tree(root, addr, bitnum, substring)
        }
    }

    fn decode_tree(
        &mut self,
        root: u32,
        addr: &mut u32,
        bitnum: &mut u32,
        substring: &mut bool,
    ) -> Result<StrPhase, Fault> {
        let mut node = root;
        loop {
            let ntype = self.mem.get_u8(node)?;
            if ntype == 0x00 {
                let byte = self.mem.get_u8(*addr)?;
                let bit = (byte >> *bitnum) & 1;
                *bitnum += 1;
                if *bitnum == 8 {
                    *bitnum = 0;
                    *addr += 1;
                }
                node = self.mem.get_u32(node + if bit == 0 { 1 } else { 5 })?;
            } else {
                let leaf = parse_leaf(&self.mem, node)?;
                match self.handle_leaf(leaf, addr, bitnum, substring)? {
                    Some(phase) => return Ok(phase),
                    None => node = root,
                }
            }
        }
    }

    fn decode_cached(
        &mut self,
        addr: &mut u32,
        bitnum: &mut u32,
        substring: &mut bool,
    ) -> Result<StrPhase, Fault> {
        let mut table = 0usize;
        loop {
            let b0 = self.mem.get_u8(*addr)? as u32;
            let b1 = if *bitnum + CACHEBITS > 8 {
                self.mem.get_u8(*addr + 1).unwrap_or(0) as u32
            } else {
                0
            };
            let slot = ((b0 >> *bitnum) | (b1 << (8 - *bitnum))) as usize & (CACHESIZE - 1);

            let entry = self.strcache.entry(table, slot);
            *bitnum += entry.bits as u32;
            if *bitnum >= 8 {
                *bitnum -= 8;
                *addr += 1;
            }

            match entry.node {
                CacheNode::Branch(sub) => table = sub,
                CacheNode::Leaf(leaf) => match self.handle_leaf(leaf, addr, bitnum, substring)? {
                    Some(phase) => return Ok(phase),
                    None => table = 0,
                },
            }
        }
    }

    /// Process one leaf; `None` means keep decoding from the root.
    fn handle_leaf(
        &mut self,
        leaf: Leaf,
        addr: &mut u32,
        bitnum: &mut u32,
        substring: &mut bool,
    ) -> Result<Option<StrPhase>, Fault> {
        match leaf {
            Leaf::Terminator => Ok(Some(StrPhase::Done)),

            Leaf::Char(ch) => match self.iosys_mode {
                IOSYS_GLK => {
                    self.glk.put_char(ch);
                    Ok(None)
                }
                IOSYS_FILTER => {
                    self.suspend_for_filter(ch as u32, *addr, *bitnum, substring)?;
                    Ok(Some(StrPhase::Suspend))
                }
                _ => Ok(None),
            },

            Leaf::UniChar(ch) => match self.iosys_mode {
                IOSYS_GLK => {
                    self.glk.put_char_uni(ch);
                    Ok(None)
                }
                IOSYS_FILTER => {
                    self.suspend_for_filter(ch, *addr, *bitnum, substring)?;
                    Ok(Some(StrPhase::Suspend))
                }
                _ => Ok(None),
            },

            Leaf::CStr(straddr) => match self.iosys_mode {
                IOSYS_GLK => {
                    let mut pos = straddr;
                    loop {
                        let ch = self.mem.get_u8(pos)?;
                        if ch == 0 {
                            break;
                        }
                        self.glk.put_char(ch);
                        pos += 1;
                    }
                    Ok(None)
                }
                IOSYS_FILTER => {
                    // Treat the inline string as a substring so each char can
                    // suspend into the filter function.
                    if !*substring {
                        self.push_callstub(desttype::RESUME_FUNC, 0)?;
                        *substring = true;
                    }
                    self.pc = *addr;
                    self.push_callstub(desttype::RESUME_HUFFSTR, *bitnum)?;
                    Ok(Some(StrPhase::Jump { addr: straddr, inmiddle: 0xE0, bitnum: 0 }))
                }
                _ => Ok(None),
            },

            Leaf::UniStr(straddr) => match self.iosys_mode {
                IOSYS_GLK => {
                    let mut pos = straddr;
                    loop {
                        let ch = self.mem.get_u32(pos)?;
                        if ch == 0 {
                            break;
                        }
                        self.glk.put_char_uni(ch);
                        pos += 4;
                    }
                    Ok(None)
                }
                IOSYS_FILTER => {
                    if !*substring {
                        self.push_callstub(desttype::RESUME_FUNC, 0)?;
                        *substring = true;
                    }
                    self.pc = *addr;
                    self.push_callstub(desttype::RESUME_HUFFSTR, *bitnum)?;
                    Ok(Some(StrPhase::Jump { addr: straddr, inmiddle: 0xE2, bitnum: 0 }))
                }
                _ => Ok(None),
            },

            Leaf::Indirect { double, operand, argc, argv } => {
                let target = if double { self.mem.get_u32(operand)? } else { operand };
                let mut args = Vec::new();
                for ix in 0..argc {
                    args.push(self.mem.get_u32(argv.wrapping_add(ix.wrapping_mul(4)))?);
                }

                if !*substring {
                    self.push_callstub(desttype::RESUME_FUNC, 0)?;
                    *substring = true;
                }
                self.pc = *addr;
                self.push_callstub(desttype::RESUME_HUFFSTR, *bitnum)?;

                let objtype = self.mem.get_u8(target)?;
                match objtype {
                    0xE0 | 0xE1 | 0xE2 => {
                        Ok(Some(StrPhase::Jump { addr: target, inmiddle: 0, bitnum: 0 }))
                    }
                    0xC0 | 0xC1 => {
                        self.enter_function(target, &args)?;
                        Ok(Some(StrPhase::Suspend))
                    }
                    _ => Err(Fault::at("indirect reference to a non-printable object", target)),
                }
            }
        }
    }

    /// Push the resume stubs for a single filtered character and enter the
    /// filter function.
    fn suspend_for_filter(
        &mut self,
        ch: u32,
        addr: u32,
        bitnum: u32,
        substring: &mut bool,
    ) -> Result<(), Fault> {
        if !*substring {
            self.push_callstub(desttype::RESUME_FUNC, 0)?;
            *substring = true;
        }
        self.pc = addr;
        self.push_callstub(desttype::RESUME_HUFFSTR, bitnum)?;
        let rock = self.iosys_rock;
        self.enter_function(rock, &[ch])
    }

    fn decode_cstr(&mut self, addr: &mut u32, substring: &mut bool) -> Result<StrPhase, Fault> {
        match self.iosys_mode {
            IOSYS_FILTER => {
                let ch = self.mem.get_u8(*addr)?;
                if ch == 0 {
                    return Ok(StrPhase::Done);
                }
                if !*substring {
                    self.push_callstub(desttype::RESUME_FUNC, 0)?;
                    *substring = true;
                }
                self.pc = *addr + 1;
                self.push_callstub(desttype::RESUME_CSTR, 0)?;
                let rock = self.iosys_rock;
                self.enter_function(rock, &[ch as u32])?;
                Ok(StrPhase::Suspend)
            }
            mode => {
                loop {
                    let ch = self.mem.get_u8(*addr)?;
                    *addr += 1;
                    if ch == 0 {
                        break;
                    }
                    if mode == IOSYS_GLK {
                        self.glk.put_char(ch);
                    }
                }
                Ok(StrPhase::Done)
            }
        }
    }

    fn decode_unistr(&mut self, addr: &mut u32, substring: &mut bool) -> Result<StrPhase, Fault> {
        match self.iosys_mode {
            IOSYS_FILTER => {
                let ch = self.mem.get_u32(*addr)?;
                if ch == 0 {
                    return Ok(StrPhase::Done);
                }
                if !*substring {
                    self.push_callstub(desttype::RESUME_FUNC, 0)?;
                    *substring = true;
                }
                self.pc = *addr + 4;
                self.push_callstub(desttype::RESUME_UNISTR, 0)?;
                let rock = self.iosys_rock;
                self.enter_function(rock, &[ch])?;
                Ok(StrPhase::Suspend)
            }
            mode => {
                loop {
                    let ch = self.mem.get_u32(*addr)?;
                    *addr += 4;
                    if ch == 0 {
                        break;
                    }
                    if mode == IOSYS_GLK {
                        self.glk.put_char_uni(ch);
                    }
                }
                Ok(StrPhase::Done)
            }
        }
    }

    fn ensure_string_cache(&mut self) -> Result<(), Fault> {
        if self.strcache.examined_for == Some(self.stringtable) {
            return Ok(());
        }
        self.strcache.invalidate();
        self.strcache.examined_for = Some(self.stringtable);

        // Only a table that lies entirely in ROM can be cached; RAM tables
        // are walked live since the game may rewrite them.
        let table = self.stringtable;
        let len = self.mem.get_u32(table)?;
        if table as u64 + len as u64 > self.mem.ram_start() as u64 {
            return Ok(());
        }
        let root = self.mem.get_u32(table + 8)?;
        let mut tables = Vec::new();
        build_cache_table(&self.mem, root, &mut tables)?;
        self.strcache.tables = tables;
        Ok(())
    }
}
