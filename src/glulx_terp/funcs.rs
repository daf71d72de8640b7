//! The call protocol. A single 16-byte call stub encodes where a return
//! value goes *and* how to resume whatever was suspended: ordinary opcode
//! stores, string decoding mid-bitstream, number printing mid-digit, and
//! filter-function re-entry all unwind through `pop_callstub`.

use super::stack::{desttype, CallStub, CALL_STUB_LEN};
use super::{Fault, GlulxTerp};

/// Function-header type bytes.
pub(crate) const FUNC_STACK_ARGS: u8 = 0xC0;
pub(crate) const FUNC_LOCAL_ARGS: u8 = 0xC1;

impl GlulxTerp {
    pub(crate) fn push_callstub(&mut self, dtype: u32, daddr: u32) -> Result<(), Fault> {
        if self.stackptr + CALL_STUB_LEN > self.stack.size() {
            return Err(Fault::new("stack overflow in call stub"));
        }
        let stub = CallStub {
            desttype: dtype,
            destaddr: daddr,
            pc: self.pc,
            frameptr: self.frameptr,
        };
        self.stack.write_stub(self.stackptr, stub)?;
        self.stackptr += CALL_STUB_LEN;
        Ok(())
    }

    /// Pop 16 bytes without interpreting them; the string decoder picks the
    /// fields it wants.
    pub(crate) fn pop_stub_raw(&mut self) -> Result<CallStub, Fault> {
        if self.stackptr < CALL_STUB_LEN {
            return Err(Fault::new("stack underflow in call stub"));
        }
        self.stackptr -= CALL_STUB_LEN;
        self.stack.read_stub(self.stackptr)
    }

    /// Pop a call stub and deliver `retval` through it. Restores `pc` and
    /// `frameptr`, rebuilds the frame bases, and re-enters the string
    /// decoder when the stub marks a suspended print.
    pub(crate) fn pop_callstub(&mut self, retval: u32) -> Result<(), Fault> {
        let stub = self.pop_stub_raw()?;

        self.pc = stub.pc;
        self.frameptr = stub.frameptr;
        self.rebuild_frame_bases()?;

        match stub.desttype {
            desttype::RESUME_FUNC => {
                Err(Fault::new("string-terminator call stub at end of function call"))
            }
            desttype::RESUME_HUFFSTR => self.stream_string(stub.pc, 0xE1, stub.destaddr),
            desttype::RESUME_NUMBER => self.stream_num(stub.pc as i32, true, stub.destaddr),
            desttype::RESUME_CSTR => self.stream_string(stub.pc, 0xE0, 0),
            desttype::RESUME_UNISTR => self.stream_string(stub.pc, 0xE2, 0),
            _ => self.store_operand(stub.desttype, stub.destaddr, retval),
        }
    }

    pub(crate) fn rebuild_frame_bases(&mut self) -> Result<(), Fault> {
        self.valstackbase = self.frameptr.wrapping_add(self.stack.get_u32(self.frameptr)?);
        self.localsbase = self.frameptr.wrapping_add(self.stack.get_u32(self.frameptr + 4)?);
        Ok(())
    }

    /// Pop `count` arguments off the value stack; slot 0 of the result is
    /// the value that was topmost.
    pub(crate) fn pop_arguments(&mut self, count: u32) -> Result<Vec<u32>, Fault> {
        if (self.stackptr as u64) < self.valstackbase as u64 + 4 * count as u64 {
            return Err(Fault::new("stack underflow in arguments"));
        }
        self.stackptr -= 4 * count;
        let mut args = Vec::with_capacity(count as usize);
        for ix in 0..count {
            let argptr = self.stackptr + 4 * ((count - 1) - ix);
            args.push(self.stack.get_u32(argptr)?);
        }
        Ok(args)
    }

    /// Build a call frame for the function at `addr` and point `pc` at its
    /// first opcode. Registered accelerated addresses short-circuit through
    /// the built-in instead.
    pub(crate) fn enter_function(&mut self, addr: u32, args: &[u32]) -> Result<(), Fault> {
        if let Some(index) = self.accel.func_at(addr) {
            if let Some(val) = self.call_accel(index, args)? {
                return self.pop_callstub(val);
            }
        }

        let functype = self.mem.get_u8(addr)?;
        if functype != FUNC_STACK_ARGS && functype != FUNC_LOCAL_ARGS {
            return Err(if (0xC0..=0xDF).contains(&functype) {
                Fault::at("call to unknown type of function", addr)
            } else {
                Fault::at("call to non-function", addr)
            });
        }

        self.frameptr = self.stackptr;

        // Walk the locals-format list, accumulating the locals-segment
        // length as we go.
        let mut format: Vec<(u8, u8)> = Vec::new();
        let mut fmtaddr = addr + 1;
        let mut locallen: u32 = 0;
        loop {
            let size = self.mem.get_u8(fmtaddr)?;
            let count = self.mem.get_u8(fmtaddr + 1)?;
            fmtaddr += 2;
            format.push((size, count));
            if size == 0 {
                break;
            }
            match size {
                1 => locallen += count as u32,
                2 => {
                    locallen = (locallen + 1) & !1;
                    locallen += 2 * count as u32;
                }
                4 => {
                    locallen = (locallen + 3) & !3;
                    locallen += 4 * count as u32;
                }
                _ => {
                    return Err(Fault::at("invalid local size in function header", addr));
                }
            }
        }
        locallen = (locallen + 3) & !3;

        let fmtlen = 2 * format.len() as u32;
        let localspos = 8 + ((fmtlen + 3) & !3);
        let framelen = localspos + locallen;

        if self.frameptr as u64 + framelen as u64 > self.stack.size() as u64 {
            return Err(Fault::new("stack overflow in function call"));
        }

        self.stack.set_u32(self.frameptr, framelen)?;
        self.stack.set_u32(self.frameptr + 4, localspos)?;
        let mut off = self.frameptr + 8;
        for &(size, count) in &format {
            self.stack.set_u8(off, size)?;
            self.stack.set_u8(off + 1, count)?;
            off += 2;
        }
        self.stack.zero_range(off, self.frameptr + framelen)?;

        self.localsbase = self.frameptr + localspos;
        self.stackptr = self.frameptr + framelen;
        self.valstackbase = self.stackptr;

        if functype == FUNC_STACK_ARGS {
            // Arguments go onto the value stack, reversed, with the count on
            // top.
            let argc = args.len() as u32;
            if self.stackptr as u64 + 4 * (argc as u64 + 1) > self.stack.size() as u64 {
                return Err(Fault::new("stack overflow in function arguments"));
            }
            for &val in args.iter().rev() {
                self.stack.set_u32(self.stackptr, val)?;
                self.stackptr += 4;
            }
            self.stack.set_u32(self.stackptr, argc)?;
            self.stackptr += 4;
        } else {
            // Arguments fill the locals in declaration order; extras are
            // dropped, the remainder stays zeroed.
            let mut argix = 0usize;
            let mut off = 0u32;
            'outer: for &(size, count) in &format {
                if size == 0 {
                    break;
                }
                for _ in 0..count {
                    if argix >= args.len() {
                        break 'outer;
                    }
                    let val = args[argix];
                    argix += 1;
                    match size {
                        1 => {
                            self.stack.set_u8(self.localsbase + off, val as u8)?;
                            off += 1;
                        }
                        2 => {
                            off = (off + 1) & !1;
                            self.stack.set_u16(self.localsbase + off, val as u16)?;
                            off += 2;
                        }
                        _ => {
                            off = (off + 3) & !3;
                            self.stack.set_u32(self.localsbase + off, val)?;
                            off += 4;
                        }
                    }
                }
            }
        }

        self.pc = fmtaddr;
        Ok(())
    }

    /// Discard the current frame. The caller decides whether a stub pop (and
    /// so a value delivery) follows; `tailcall` does not pop one.
    pub(crate) fn leave_function(&mut self) {
        self.stackptr = self.frameptr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glulx_terp::glk::MemGlk;
    use crate::glulx_terp::test_image::ImageBuilder;
    use crate::glulx_terp::GlulxTerp;

    // A start function with one 4-byte local and one 1-byte local, whose
    // body is a bare `quit`.
    fn terp_with_locals() -> GlulxTerp {
        let mut image = ImageBuilder::new();
        let func = 0x200;
        image.at(func, &[0xC1, 4, 1, 1, 1, 0, 0, 0x81, 0x20]);
        image.start_func(func);
        GlulxTerp::from_image(image.finish(), Box::new(MemGlk::new())).unwrap()
    }

    #[test]
    fn frame_layout_after_entry() {
        let terp = terp_with_locals();
        // Header (8) + format ((4,1),(1,1),(0,0) = 6 bytes, padded to 8).
        let framelen = terp.stack.get_u32(terp.frameptr).unwrap();
        let localspos = terp.stack.get_u32(terp.frameptr + 4).unwrap();
        assert_eq!(localspos, 16);
        // Locals: 4 bytes aligned, then 1 byte, padded to 4 -> 8.
        assert_eq!(framelen, 24);
        assert_eq!(terp.localsbase, terp.frameptr + localspos);
        assert_eq!(terp.valstackbase, terp.frameptr + framelen);
        assert_eq!(terp.stackptr, terp.valstackbase);
        // pc sits just past the format terminator.
        assert_eq!(terp.program_counter(), 0x200 + 7);
    }

    #[test]
    fn local_args_are_copied_and_truncated() {
        let mut terp = terp_with_locals();
        terp.enter_function(0x200, &[0x11223344, 0xAABBCCDD, 0x5]).unwrap();
        assert_eq!(terp.stack.get_u32(terp.localsbase).unwrap(), 0x11223344);
        // Second argument lands in the 1-byte local, truncated; the third is
        // dropped.
        assert_eq!(terp.stack.get_u8(terp.localsbase + 4).unwrap(), 0xDD);
    }

    #[test]
    fn stack_args_functions_push_count_on_top() {
        let mut image = ImageBuilder::new();
        let func = 0x200;
        image.at(func, &[0xC0, 0, 0, 0x81, 0x20]);
        image.start_func(func);
        let mut terp = GlulxTerp::from_image(image.finish(), Box::new(MemGlk::new())).unwrap();

        terp.enter_function(func, &[7, 8, 9]).unwrap();
        assert_eq!(terp.stack.get_u32(terp.stackptr - 4).unwrap(), 3);
        // First argument is nearest the count.
        assert_eq!(terp.stack.get_u32(terp.stackptr - 8).unwrap(), 7);
        assert_eq!(terp.stack.get_u32(terp.stackptr - 16).unwrap(), 9);
        let args = terp.pop_arguments(0).unwrap();
        assert!(args.is_empty());
    }

    #[test]
    fn stub_round_trip_restores_registers() {
        let mut terp = terp_with_locals();
        let pc = terp.pc;
        let frameptr = terp.frameptr;
        terp.push_callstub(desttype::STACK, 0).unwrap();
        terp.pc = 0xDEAD;
        terp.pop_callstub(42).unwrap();
        assert_eq!(terp.pc, pc);
        assert_eq!(terp.frameptr, frameptr);
        // The return value was pushed on the value stack.
        assert_eq!(terp.stack.get_u32(terp.stackptr - 4).unwrap(), 42);
    }

    #[test]
    fn calling_a_non_function_faults() {
        let mut terp = terp_with_locals();
        let ram = terp.mem.ram_start();
        assert!(terp.enter_function(ram, &[]).is_err());
    }
}
