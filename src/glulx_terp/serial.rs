//! Saving and restoring the machine. Disk saves are an IFF `FORM/IFZS`
//! file; undo snapshots keep the same memory encoding but stay structured
//! in memory. Memory images are XOR-ed against the pristine game file and
//! run-length coded, so a barely-changed RAM costs almost nothing.
//!
//! Because the stack buffer is big-endian by construction, the portable
//! `Stks` chunk and the undo stack image are both verbatim copies.

use std::collections::VecDeque;
use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};
use log::{debug, warn};

use super::glk::GlkSystem;
use super::heap::HeapSummary;
use super::{Fault, GlulxTerp};

/// How many undo states the chain retains.
const MAX_UNDO_LEVEL: usize = 8;

const MT_TABLE_LEN: usize = 624;

struct Snapshot {
    mem: Vec<u8>,
    heap: Option<HeapSummary>,
    stack: Vec<u8>,
}

pub(crate) struct UndoChain {
    chain: VecDeque<Snapshot>,
}

impl UndoChain {
    pub(crate) fn new() -> Self {
        Self { chain: VecDeque::new() }
    }

    fn push(&mut self, snapshot: Snapshot) {
        self.chain.push_front(snapshot);
        self.chain.truncate(MAX_UNDO_LEVEL);
    }

    fn pop(&mut self) -> Option<Snapshot> {
        self.chain.pop_front()
    }

    pub(crate) fn available(&self) -> bool {
        !self.chain.is_empty()
    }

    pub(crate) fn discard(&mut self) {
        self.chain.pop_front();
    }
}

fn push_chunk(out: &mut Vec<u8>, id: &[u8; 4], body: &[u8]) {
    out.extend_from_slice(id);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    if body.len() & 1 != 0 {
        out.push(0);
    }
}

impl GlulxTerp {
    /// Encode RAM as `endmem` followed by the XOR-against-image RLE stream.
    /// A zero byte plus `k-1` stands for `k` zeros; a trailing run is
    /// dropped entirely.
    fn write_memstate(&self) -> Result<Vec<u8>, Fault> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.mem.end_mem().to_be_bytes());

        let mut runlen: u32 = 0;
        for pos in self.mem.ram_start()..self.mem.end_mem() {
            let mut ch = self.mem.get_u8(pos)?;
            if pos < self.mem.ext_start() {
                ch ^= self.mem.image_byte(pos);
            }
            if ch == 0 {
                runlen += 1;
            } else {
                while runlen > 0 {
                    let n = runlen.min(0x100);
                    out.push(0);
                    out.push((n - 1) as u8);
                    runlen -= n;
                }
                out.push(ch);
            }
        }
        Ok(out)
    }

    /// Decode a memory chunk back over RAM, resizing first. Bytes inside the
    /// protect range are consumed from the stream but not written.
    fn read_memstate(&mut self, data: &[u8]) -> Result<(), Fault> {
        let mut cur = Cursor::new(data);
        let newlen = cur
            .read_u32::<BigEndian>()
            .map_err(|_| Fault::new("memory chunk is truncated"))?;
        if self.mem.change_memsize(newlen, true, false) != 0 {
            return Err(Fault::new("saved memory size is impossible"));
        }

        let mut runlen: u32 = 0;
        for pos in self.mem.ram_start()..self.mem.end_mem() {
            let base = if pos < self.mem.ext_start() { self.mem.image_byte(pos) } else { 0 };
            let ch = if cur.position() as usize >= data.len() {
                // The final, unstored run.
                base
            } else if runlen > 0 {
                runlen -= 1;
                base
            } else {
                let b = cur
                    .read_u8()
                    .map_err(|_| Fault::new("memory chunk is truncated"))?;
                if b == 0 {
                    runlen = cur
                        .read_u8()
                        .map_err(|_| Fault::new("memory chunk is truncated"))?
                        as u32;
                    base
                } else {
                    base ^ b
                }
            };
            if pos >= self.protect_start && pos < self.protect_end {
                continue;
            }
            self.mem.set_u8_unchecked(pos, ch)?;
        }
        Ok(())
    }

    /// Install a stack image. The frame registers are left invalid; the
    /// call-stub pop that follows every successful restore rebuilds them.
    fn restore_stack_image(&mut self, image: &[u8]) -> Result<(), Fault> {
        if image.len() as u64 > self.stack.size() as u64 {
            return Err(Fault::new("saved stack is larger than the stack"));
        }
        self.stack.restore(image)?;
        self.stackptr = image.len() as u32;
        self.frameptr = 0;
        self.valstackbase = 0;
        self.localsbase = 0;
        Ok(())
    }

    pub(crate) fn perform_saveundo(&mut self) -> u32 {
        match self.write_memstate() {
            Ok(mem) => {
                let snapshot = Snapshot {
                    mem,
                    heap: self.heap.summary(),
                    stack: self.stack.snapshot(self.stackptr).to_vec(),
                };
                self.undo.push(snapshot);
                0
            }
            Err(fault) => {
                warn!("saveundo failed: {fault}");
                1
            }
        }
    }

    pub(crate) fn perform_restoreundo(&mut self) -> u32 {
        let Some(snapshot) = self.undo.pop() else {
            return 1;
        };
        self.heap.clear(&mut self.mem);
        if let Err(fault) = self.read_memstate(&snapshot.mem) {
            warn!("restoreundo failed: {fault}");
            return 1;
        }
        if let Some(summary) = snapshot.heap {
            if let Err(fault) = self.heap.apply_summary(&mut self.mem, summary) {
                warn!("restoreundo failed: {fault}");
                return 1;
            }
        }
        if let Err(fault) = self.restore_stack_image(&snapshot.stack) {
            warn!("restoreundo failed: {fault}");
            return 1;
        }
        0
    }

    pub(crate) fn perform_save(&mut self, strid: u32) -> u32 {
        match self.build_save_file() {
            Ok(file) => {
                self.glk.put_buffer_stream(strid, &file);
                0
            }
            Err(fault) => {
                warn!("save failed: {fault}");
                1
            }
        }
    }

    pub(crate) fn perform_restore(&mut self, strid: u32) -> u32 {
        let data = self.read_stream_all(strid);
        match self.apply_save_file(&data) {
            Ok(()) => 0,
            Err(fault) => {
                warn!("restore failed: {fault}");
                1
            }
        }
    }

    fn build_save_file(&mut self) -> Result<Vec<u8>, Fault> {
        let mut body = Vec::new();
        body.extend_from_slice(b"IFZS");

        // IFhd: the first 128 bytes of the story, for identity checking.
        let mut ifhd = Vec::with_capacity(128);
        for pos in 0..128 {
            ifhd.push(self.mem.get_u8(pos)?);
        }
        push_chunk(&mut body, b"IFhd", &ifhd);

        push_chunk(&mut body, b"CMem", &self.write_memstate()?);

        if let Some(summary) = self.heap.summary() {
            let mut mall = Vec::new();
            mall.extend_from_slice(&summary.start.to_be_bytes());
            mall.extend_from_slice(&(summary.blocks.len() as u32).to_be_bytes());
            for (addr, len) in summary.blocks {
                mall.extend_from_slice(&addr.to_be_bytes());
                mall.extend_from_slice(&len.to_be_bytes());
            }
            push_chunk(&mut body, b"MAll", &mall);
        }

        if let Some((table, index)) = self.rng.seeded_state() {
            let mut mtre = Vec::new();
            mtre.extend_from_slice(&(table.len() as u32).to_be_bytes());
            for word in table.iter() {
                mtre.extend_from_slice(&word.to_be_bytes());
            }
            mtre.extend_from_slice(&index.to_be_bytes());
            push_chunk(&mut body, b"MTre", &mtre);
        }

        push_chunk(&mut body, b"Stks", self.stack.snapshot(self.stackptr));

        let mut file = Vec::with_capacity(body.len() + 8);
        file.extend_from_slice(b"FORM");
        file.extend_from_slice(&(body.len() as u32).to_be_bytes());
        file.extend_from_slice(&body);
        Ok(file)
    }

    fn apply_save_file(&mut self, data: &[u8]) -> Result<(), Fault> {
        if data.len() < 12 || &data[0..4] != b"FORM" || &data[8..12] != b"IFZS" {
            return Err(Fault::new("not a saved-game file"));
        }

        let mut ifhd: Option<&[u8]> = None;
        let mut cmem: Option<&[u8]> = None;
        let mut mall: Option<&[u8]> = None;
        let mut mtre: Option<&[u8]> = None;
        let mut stks: Option<&[u8]> = None;

        let mut pos = 12usize;
        while pos + 8 <= data.len() {
            let id: [u8; 4] = data[pos..pos + 4].try_into().unwrap_or([0; 4]);
            let len = u32::from_be_bytes(data[pos + 4..pos + 8].try_into().unwrap_or([0; 4]))
                as usize;
            let body_start = pos + 8;
            if body_start + len > data.len() {
                return Err(Fault::new("saved-game file is truncated"));
            }
            let body = &data[body_start..body_start + len];
            match &id {
                b"IFhd" => ifhd = Some(body),
                b"CMem" => cmem = Some(body),
                b"MAll" => mall = Some(body),
                b"MTre" => mtre = Some(body),
                b"Stks" => stks = Some(body),
                _ => debug!("skipping save chunk {:?}", String::from_utf8_lossy(&id)),
            }
            pos = body_start + len + (len & 1);
        }

        let ifhd = ifhd.ok_or_else(|| Fault::new("saved game lacks an IFhd chunk"))?;
        if ifhd.len() != 128 {
            return Err(Fault::new("saved game has a malformed IFhd chunk"));
        }
        for (pos, &byte) in ifhd.iter().enumerate() {
            if self.mem.get_u8(pos as u32)? != byte {
                return Err(Fault::new("saved game belongs to a different story file"));
            }
        }

        let cmem = cmem.ok_or_else(|| Fault::new("saved game lacks a CMem chunk"))?;
        let stks = stks.ok_or_else(|| Fault::new("saved game lacks a Stks chunk"))?;

        self.heap.clear(&mut self.mem);
        self.read_memstate(cmem)?;

        if let Some(mall) = mall {
            self.apply_heap_chunk(mall)?;
        }
        if let Some(mtre) = mtre {
            self.apply_rng_chunk(mtre);
        }

        self.restore_stack_image(stks)
    }

    fn apply_heap_chunk(&mut self, data: &[u8]) -> Result<(), Fault> {
        let mut cur = Cursor::new(data);
        let err = || Fault::new("saved game has a malformed MAll chunk");
        let start = cur.read_u32::<BigEndian>().map_err(|_| err())?;
        let count = cur.read_u32::<BigEndian>().map_err(|_| err())?;
        let mut blocks = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let addr = cur.read_u32::<BigEndian>().map_err(|_| err())?;
            let len = cur.read_u32::<BigEndian>().map_err(|_| err())?;
            blocks.push((addr, len));
        }
        self.heap.apply_summary(&mut self.mem, HeapSummary { start, blocks })
    }

    /// The RNG chunk is best-effort: a damaged one costs determinism, not
    /// the restore.
    fn apply_rng_chunk(&mut self, data: &[u8]) {
        let mut cur = Cursor::new(data);
        let Ok(count) = cur.read_u32::<BigEndian>() else {
            warn!("malformed MTre chunk ignored");
            return;
        };
        if count as usize != MT_TABLE_LEN {
            warn!("malformed MTre chunk ignored");
            return;
        }
        let mut table = vec![0u32; MT_TABLE_LEN];
        for slot in table.iter_mut() {
            match cur.read_u32::<BigEndian>() {
                Ok(word) => *slot = word,
                Err(_) => {
                    warn!("malformed MTre chunk ignored");
                    return;
                }
            }
        }
        let Ok(index) = cur.read_u32::<BigEndian>() else {
            warn!("malformed MTre chunk ignored");
            return;
        };
        if !self.rng.restore_seeded(&table, index) {
            warn!("malformed MTre chunk ignored");
        }
    }

    fn read_stream_all(&mut self, strid: u32) -> Vec<u8> {
        self.glk.stream_set_position(strid, 0);
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = self.glk.get_buffer_stream(strid, &mut buf);
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n as usize]);
        }
        data
    }
}
