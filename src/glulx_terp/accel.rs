//! Accelerated functions: bytecode addresses the game registers as standing
//! for well-known Inform veneer routines, which we then run natively. The
//! nine accel parameters describe the compiled object layout; built-ins 2-7
//! assume the classic seven-attribute-byte layout and fall back to bytecode
//! when the layout says otherwise.

use std::collections::HashMap;

use log::debug;

use super::glk::GlkSystem;
use super::search;
use super::{Fault, GlulxTerp};

const PARAM_COUNT: usize = 9;
const CLASSES_TABLE: usize = 0;
const INDIV_PROP_START: usize = 1;
const CLASS_METACLASS: usize = 2;
const OBJECT_METACLASS: usize = 3;
const ROUTINE_METACLASS: usize = 4;
const STRING_METACLASS: usize = 5;
const SELF: usize = 6;
const NUM_ATTR_BYTES: usize = 7;
const CPV_START: usize = 8;

const NUM_ATTR_BYTES_DEFAULT: u32 = 7;

/// True if this interpreter implements accelerated function `index` (the
/// AccelFunc gestalt).
pub fn builtin_supported(index: u32) -> bool {
    (1..=13).contains(&index)
}

pub(crate) struct AccelTable {
    params: [u32; PARAM_COUNT],
    funcs: HashMap<u32, u32>,
}

impl AccelTable {
    pub(crate) fn new() -> Self {
        let mut params = [0u32; PARAM_COUNT];
        params[NUM_ATTR_BYTES] = NUM_ATTR_BYTES_DEFAULT;
        Self { params, funcs: HashMap::new() }
    }

    pub(crate) fn set_param(&mut self, index: u32, value: u32) {
        if let Some(slot) = self.params.get_mut(index as usize) {
            *slot = value;
        }
    }

    /// Bind (or with index 0, unbind) the function at `addr`. Unknown
    /// built-in numbers are ignored; the game is expected to probe the
    /// AccelFunc gestalt first.
    pub(crate) fn set_func(&mut self, index: u32, addr: u32) {
        if index == 0 {
            self.funcs.remove(&addr);
        } else if builtin_supported(index) {
            self.funcs.insert(addr, index);
        } else {
            debug!("request for unknown accelerated function {index} ignored");
        }
    }

    pub(crate) fn func_at(&self, addr: u32) -> Option<u32> {
        self.funcs.get(&addr).copied()
    }
}

impl GlulxTerp {
    /// Run accelerated function `index`. `Ok(None)` means the parameter
    /// check failed and the caller should execute the bytecode instead.
    pub(crate) fn call_accel(&mut self, index: u32, args: &[u32]) -> Result<Option<u32>, Fault> {
        // The classic built-ins bake in the default attribute-byte count.
        if (2..=7).contains(&index)
            && self.accel.params[NUM_ATTR_BYTES] != NUM_ATTR_BYTES_DEFAULT
        {
            return Ok(None);
        }

        let arg = |ix: usize| args.get(ix).copied().unwrap_or(0);
        let val = match index {
            1 => {
                if args.is_empty() {
                    0
                } else {
                    self.accel_z_region(arg(0))?
                }
            }
            2..=13 if args.len() < 2 => 0,
            2 | 8 => self.accel_cp_tab(arg(0), arg(1))?,
            3 | 9 => self.accel_ra_pr(arg(0), arg(1))?,
            4 | 10 => self.accel_rl_pr(arg(0), arg(1))?,
            5 | 11 => self.accel_oc_cl(arg(0), arg(1))?,
            6 | 12 => self.accel_rv_pr(arg(0), arg(1))?,
            7 | 13 => self.accel_op_pr(arg(0), arg(1))?,
            _ => return Ok(None),
        };
        Ok(Some(val))
    }

    fn accel_error(&mut self, msg: &str) {
        self.glk.put_buffer(msg.as_bytes());
        self.glk.put_char(b'\n');
    }

    fn param(&self, index: usize) -> u32 {
        self.accel.params[index]
    }

    /// Whether the object's parent is Class.
    fn obj_in_class(&self, obj: u32) -> Result<bool, Fault> {
        let parent = self.mem.get_u32(obj.wrapping_add(13 + self.param(NUM_ATTR_BYTES)))?;
        Ok(parent == self.param(CLASS_METACLASS))
    }

    /// Z__Region: 1 for objects, 2 for functions, 3 for strings, 0 otherwise.
    fn accel_z_region(&mut self, addr: u32) -> Result<u32, Fault> {
        if addr < 36 || addr >= self.mem.end_mem() {
            return Ok(0);
        }
        let tb = self.mem.get_u8(addr)?;
        Ok(if tb >= 0xE0 {
            3
        } else if tb >= 0xC0 {
            2
        } else if (0x70..=0x7F).contains(&tb) && addr >= self.mem.ram_start() {
            1
        } else {
            0
        })
    }

    /// CP__Tab: the 10-byte property record for `id`, or 0.
    fn accel_cp_tab(&mut self, obj: u32, id: u32) -> Result<u32, Fault> {
        if self.accel_z_region(obj)? != 1 {
            self.accel_error("[** Programming error: tried to find the \".\" of (something) **]");
            return Ok(0);
        }
        let otab = self.mem.get_u32(obj.wrapping_add(9 + self.param(NUM_ATTR_BYTES)))?;
        if otab == 0 {
            return Ok(0);
        }
        let max = self.mem.get_u32(otab)?;
        search::binary_search(&self.mem, id, 2, otab.wrapping_add(4), 10, max, 0, 0)
    }

    /// The common property lookup behind RA__Pr and friends. Resolves
    /// class-shifted property ids and enforces visibility.
    fn accel_get_prop(&mut self, obj: u32, id: u32) -> Result<u32, Fault> {
        let mut obj = obj;
        let mut id = id;
        let mut cla = 0u32;

        if id & 0xFFFF_0000 != 0 {
            cla = self.mem.get_u32(self.param(CLASSES_TABLE).wrapping_add((id & 0xFFFF) * 4))?;
            if self.accel_oc_cl(obj, cla)? == 0 {
                return Ok(0);
            }
            id >>= 16;
            obj = cla;
        }

        let prop = self.accel_cp_tab(obj, id)?;
        if prop == 0 {
            return Ok(0);
        }

        if self.obj_in_class(obj)? && cla == 0 {
            let indiv = self.param(INDIV_PROP_START);
            if id < indiv || id >= indiv + 8 {
                return Ok(0);
            }
        }

        if self.mem.get_u32(self.param(SELF))? != obj {
            // Bit 0 of the flags word marks a private property.
            if self.mem.get_u8(prop.wrapping_add(9))? & 1 != 0 {
                return Ok(0);
            }
        }
        Ok(prop)
    }

    /// RA__Pr: property data address.
    fn accel_ra_pr(&mut self, obj: u32, id: u32) -> Result<u32, Fault> {
        let prop = self.accel_get_prop(obj, id)?;
        if prop == 0 {
            return Ok(0);
        }
        self.mem.get_u32(prop.wrapping_add(4))
    }

    /// RL__Pr: property data length in bytes.
    fn accel_rl_pr(&mut self, obj: u32, id: u32) -> Result<u32, Fault> {
        let prop = self.accel_get_prop(obj, id)?;
        if prop == 0 {
            return Ok(0);
        }
        Ok(4 * self.mem.get_u16(prop.wrapping_add(2))? as u32)
    }

    /// OC__Cl: the `ofclass` test.
    fn accel_oc_cl(&mut self, obj: u32, cla: u32) -> Result<u32, Fault> {
        match self.accel_z_region(obj)? {
            3 => return Ok((cla == self.param(STRING_METACLASS)) as u32),
            2 => return Ok((cla == self.param(ROUTINE_METACLASS)) as u32),
            1 => {}
            _ => return Ok(0),
        }

        let is_meta = |c: u32| {
            c == self.param(CLASS_METACLASS)
                || c == self.param(OBJECT_METACLASS)
                || c == self.param(ROUTINE_METACLASS)
                || c == self.param(STRING_METACLASS)
        };

        if cla == self.param(CLASS_METACLASS) {
            return Ok((self.obj_in_class(obj)? || is_meta(obj)) as u32);
        }
        if cla == self.param(OBJECT_METACLASS) {
            return Ok((!self.obj_in_class(obj)? && !is_meta(obj)) as u32);
        }
        if cla == self.param(STRING_METACLASS) || cla == self.param(ROUTINE_METACLASS) {
            return Ok(0);
        }

        if !self.obj_in_class(cla)? {
            self.accel_error("[** Programming error: tried to apply 'ofclass' with non-class **]");
            return Ok(0);
        }

        // Property 2 lists the classes this object inherits from.
        let prop = self.accel_get_prop(obj, 2)?;
        if prop == 0 {
            return Ok(0);
        }
        let inlist = self.mem.get_u32(prop.wrapping_add(4))?;
        let inlistlen = self.mem.get_u16(prop.wrapping_add(2))? as u32;
        for jx in 0..inlistlen {
            if self.mem.get_u32(inlist.wrapping_add(4 * jx))? == cla {
                return Ok(1);
            }
        }
        Ok(0)
    }

    /// RV__Pr: property value, with the common-property defaults table as
    /// the fallback.
    fn accel_rv_pr(&mut self, obj: u32, id: u32) -> Result<u32, Fault> {
        let addr = self.accel_ra_pr(obj, id)?;
        if addr != 0 {
            return self.mem.get_u32(addr);
        }
        if id > 0 && id < self.param(INDIV_PROP_START) {
            return self.mem.get_u32(self.param(CPV_START).wrapping_add(id.wrapping_mul(4)));
        }
        self.accel_error("[** Programming error: tried to read (something) **]");
        Ok(0)
    }

    /// OP__Pr: the `provides` test.
    fn accel_op_pr(&mut self, obj: u32, id: u32) -> Result<u32, Fault> {
        let indiv = self.param(INDIV_PROP_START);
        match self.accel_z_region(obj)? {
            3 => {
                // Strings provide print and print_to_array.
                return Ok((id == indiv + 6 || id == indiv + 7) as u32);
            }
            2 => {
                // Functions provide call.
                return Ok((id == indiv + 5) as u32);
            }
            1 => {}
            _ => return Ok(0),
        }

        if id >= indiv && id < indiv + 8 && self.obj_in_class(obj)? {
            return Ok(1);
        }
        Ok((self.accel_ra_pr(obj, id)? != 0) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glulx_terp::glk::MemGlk;
    use crate::glulx_terp::test_image::ImageBuilder;

    fn bare_terp() -> GlulxTerp {
        let mut image = ImageBuilder::new();
        let func = 0x200;
        image.at(func, &[0xC1, 0, 0, 0x81, 0x20]);
        image.start_func(func);
        GlulxTerp::from_image(image.finish(), Box::new(MemGlk::new())).unwrap()
    }

    #[test]
    fn registry_binds_and_unbinds() {
        let mut table = AccelTable::new();
        table.set_func(1, 0x1000);
        assert_eq!(table.func_at(0x1000), Some(1));
        table.set_func(0, 0x1000);
        assert_eq!(table.func_at(0x1000), None);
        // Unknown built-ins never bind.
        table.set_func(99, 0x2000);
        assert_eq!(table.func_at(0x2000), None);
    }

    #[test]
    fn z_region_classifies_type_bytes() {
        let mut terp = bare_terp();
        let ram = terp.mem.ram_start();
        terp.mem.set_u8(ram + 0x10, 0xE0).unwrap();
        terp.mem.set_u8(ram + 0x20, 0xC1).unwrap();
        terp.mem.set_u8(ram + 0x30, 0x70).unwrap();
        terp.mem.set_u8(ram + 0x40, 0x42).unwrap();
        assert_eq!(terp.accel_z_region(ram + 0x10).unwrap(), 3);
        assert_eq!(terp.accel_z_region(ram + 0x20).unwrap(), 2);
        assert_eq!(terp.accel_z_region(ram + 0x30).unwrap(), 1);
        assert_eq!(terp.accel_z_region(ram + 0x40).unwrap(), 0);
        assert_eq!(terp.accel_z_region(4).unwrap(), 0);
        assert_eq!(terp.accel_z_region(0xFFFF_0000).unwrap(), 0);
    }

    #[test]
    fn classic_builtins_require_default_layout() {
        let mut terp = bare_terp();
        terp.accel.set_param(NUM_ATTR_BYTES as u32, 9);
        assert!(terp.call_accel(2, &[0, 0]).unwrap().is_none());
        // The parameterized twin still runs.
        assert!(terp.call_accel(8, &[0, 0]).unwrap().is_some());
        terp.accel.set_param(NUM_ATTR_BYTES as u32, 7);
        assert!(terp.call_accel(2, &[0, 0]).unwrap().is_some());
    }

    #[test]
    fn property_lookup_via_object_table() {
        let mut terp = bare_terp();
        let ram = terp.mem.ram_start();

        // An object with the classic layout: type byte, 7 attribute bytes,
        // then next/name/proptab/parent words.
        let obj = ram + 0x100;
        let proptab = ram + 0x180;
        terp.mem.set_u8(obj, 0x70).unwrap();
        terp.mem.set_u32(obj + 16, proptab).unwrap();
        terp.mem.set_u32(obj + 20, 0).unwrap();

        // Two sorted property records: id 4 and id 9.
        let propdata = ram + 0x1C0;
        terp.mem.set_u32(proptab, 2).unwrap();
        let rec = proptab + 4;
        terp.mem.set_u16(rec, 4).unwrap();
        terp.mem.set_u16(rec + 2, 1).unwrap();
        terp.mem.set_u32(rec + 4, propdata).unwrap();
        terp.mem.set_u16(rec + 8, 0).unwrap();
        terp.mem.set_u16(rec + 10, 9).unwrap();
        terp.mem.set_u16(rec + 12, 2).unwrap();
        terp.mem.set_u32(rec + 14, propdata + 8).unwrap();
        terp.mem.set_u16(rec + 18, 0).unwrap();
        terp.mem.set_u32(propdata, 0xCAFEF00D).unwrap();

        // Make the self cell point elsewhere; the properties are public, and
        // the object is not contained in Class.
        terp.accel.set_param(SELF as u32, ram + 0x40);
        terp.accel.set_param(INDIV_PROP_START as u32, 100);
        terp.accel.set_param(CLASS_METACLASS as u32, ram + 0x60);

        assert_eq!(terp.accel_cp_tab(obj, 4).unwrap(), rec);
        assert_eq!(terp.accel_cp_tab(obj, 9).unwrap(), rec + 10);
        assert_eq!(terp.accel_cp_tab(obj, 5).unwrap(), 0);
        assert_eq!(terp.accel_ra_pr(obj, 4).unwrap(), propdata);
        assert_eq!(terp.accel_rl_pr(obj, 4).unwrap(), 4);
        assert_eq!(terp.accel_rl_pr(obj, 9).unwrap(), 8);
        assert_eq!(terp.accel_rv_pr(obj, 4).unwrap(), 0xCAFEF00D);
        assert_eq!(terp.accel_op_pr(obj, 4).unwrap(), 1);
        assert_eq!(terp.accel_op_pr(obj, 5).unwrap(), 0);
    }
}
