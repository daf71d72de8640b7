//! The three search opcodes. All share one key discipline: a direct key is
//! the low `keysize` bytes of the operand (big-endian), an indirect key is
//! read from memory, and candidates compare bytewise unsigned.

use std::cmp::Ordering;

use super::memory::Memory;
use super::Fault;

pub const KEY_INDIRECT: u32 = 0x01;
pub const ZERO_KEY_TERMINATES: u32 = 0x02;
pub const RETURN_INDEX: u32 = 0x04;

fn fetch_key(mem: &Memory, key: u32, keysize: u32, options: u32) -> Result<Vec<u8>, Fault> {
    if options & KEY_INDIRECT != 0 {
        let mut buf = Vec::with_capacity(keysize as usize);
        for ix in 0..keysize {
            buf.push(mem.get_u8(key.wrapping_add(ix))?);
        }
        Ok(buf)
    } else {
        if !matches!(keysize, 1 | 2 | 4) {
            return Err(Fault::new("direct search key must hold one, two, or four bytes"));
        }
        Ok(key.to_be_bytes()[(4 - keysize as usize)..].to_vec())
    }
}

fn compare_key(mem: &Memory, addr: u32, keybuf: &[u8]) -> Result<Ordering, Fault> {
    for (ix, &kb) in keybuf.iter().enumerate() {
        let cb = mem.get_u8(addr.wrapping_add(ix as u32))?;
        match cb.cmp(&kb) {
            Ordering::Equal => {}
            other => return Ok(other),
        }
    }
    Ok(Ordering::Equal)
}

fn key_is_zero(mem: &Memory, addr: u32, keysize: u32) -> Result<bool, Fault> {
    for ix in 0..keysize {
        if mem.get_u8(addr.wrapping_add(ix))? != 0 {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Walk `numstructs` records of `structsize` bytes from `start`.
/// `numstructs` of -1 means unbounded, which only terminates through
/// `ZeroKeyTerminates`.
#[allow(clippy::too_many_arguments)]
pub fn linear_search(
    mem: &Memory,
    key: u32,
    keysize: u32,
    start: u32,
    structsize: u32,
    numstructs: u32,
    keyoffset: u32,
    options: u32,
) -> Result<u32, Fault> {
    let keybuf = fetch_key(mem, key, keysize, options)?;
    let return_index = options & RETURN_INDEX != 0;
    let zeroterm = options & ZERO_KEY_TERMINATES != 0;
    let nolimit = numstructs == 0xFFFF_FFFF;

    let mut ix = 0u32;
    while nolimit || ix < numstructs {
        let addr = start.wrapping_add(ix.wrapping_mul(structsize));
        let keyaddr = addr.wrapping_add(keyoffset);
        if compare_key(mem, keyaddr, &keybuf)? == Ordering::Equal {
            return Ok(if return_index { ix } else { addr });
        }
        if zeroterm && key_is_zero(mem, keyaddr, keysize)? {
            break;
        }
        ix = ix.wrapping_add(1);
    }
    Ok(if return_index { 0xFFFF_FFFF } else { 0 })
}

/// Bisect `numstructs` records sorted ascending by key (unsigned).
#[allow(clippy::too_many_arguments)]
pub fn binary_search(
    mem: &Memory,
    key: u32,
    keysize: u32,
    start: u32,
    structsize: u32,
    numstructs: u32,
    keyoffset: u32,
    options: u32,
) -> Result<u32, Fault> {
    let keybuf = fetch_key(mem, key, keysize, options)?;
    let return_index = options & RETURN_INDEX != 0;

    let mut bot = 0u32;
    let mut top = numstructs;
    while bot < top {
        let mid = bot + (top - bot) / 2;
        let addr = start.wrapping_add(mid.wrapping_mul(structsize));
        match compare_key(mem, addr.wrapping_add(keyoffset), &keybuf)? {
            Ordering::Equal => return Ok(if return_index { mid } else { addr }),
            Ordering::Less => bot = mid + 1,
            Ordering::Greater => top = mid,
        }
    }
    Ok(if return_index { 0xFFFF_FFFF } else { 0 })
}

/// Follow a chain of nodes, each holding its successor at `nextoffset`,
/// until a zero link. `ReturnIndex` does not apply to chains.
pub fn linked_search(
    mem: &Memory,
    key: u32,
    keysize: u32,
    start: u32,
    keyoffset: u32,
    nextoffset: u32,
    options: u32,
) -> Result<u32, Fault> {
    let keybuf = fetch_key(mem, key, keysize, options)?;
    let zeroterm = options & ZERO_KEY_TERMINATES != 0;

    let mut addr = start;
    while addr != 0 {
        let keyaddr = addr.wrapping_add(keyoffset);
        if compare_key(mem, keyaddr, &keybuf)? == Ordering::Equal {
            return Ok(addr);
        }
        if zeroterm && key_is_zero(mem, keyaddr, keysize)? {
            break;
        }
        addr = mem.get_u32(addr.wrapping_add(nextoffset))?;
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glulx_terp::test_image::ImageBuilder;

    // Records of 8 bytes: a 2-byte key at offset 2, filler elsewhere.
    fn table_mem() -> (Memory, u32) {
        let mut mem = Memory::new(ImageBuilder::new().finish()).unwrap();
        let start = mem.ram_start();
        for (ix, key) in [0x0010u16, 0x0020, 0x0300, 0x0455, 0x8000].iter().enumerate() {
            let base = start + 8 * ix as u32;
            mem.set_u32(base, 0xAAAAAAAA).unwrap();
            mem.set_u16(base + 2, *key).unwrap();
        }
        (mem, start)
    }

    #[test]
    fn linear_finds_and_misses() {
        let (mem, start) = table_mem();
        let hit = linear_search(&mem, 0x0300, 2, start, 8, 5, 2, 0).unwrap();
        assert_eq!(hit, start + 16);
        let ix = linear_search(&mem, 0x0300, 2, start, 8, 5, 2, RETURN_INDEX).unwrap();
        assert_eq!(ix, 2);
        assert_eq!(linear_search(&mem, 0x0999, 2, start, 8, 5, 2, 0).unwrap(), 0);
        assert_eq!(
            linear_search(&mem, 0x0999, 2, start, 8, 5, 2, RETURN_INDEX).unwrap(),
            0xFFFF_FFFF
        );
    }

    #[test]
    fn linear_zero_key_terminates() {
        let (mut mem, start) = table_mem();
        mem.set_u16(start + 8 * 2 + 2, 0).unwrap();
        // The zero key at index 2 stops the scan before the 0x455 record.
        let res = linear_search(
            &mem,
            0x0455,
            2,
            start,
            8,
            0xFFFF_FFFF,
            2,
            ZERO_KEY_TERMINATES,
        )
        .unwrap();
        assert_eq!(res, 0);
    }

    #[test]
    fn binary_finds_each_key() {
        let (mem, start) = table_mem();
        for (ix, key) in [0x0010u32, 0x0020, 0x0300, 0x0455, 0x8000].iter().enumerate() {
            let hit = binary_search(&mem, *key, 2, start, 8, 5, 2, RETURN_INDEX).unwrap();
            assert_eq!(hit, ix as u32);
        }
        assert_eq!(binary_search(&mem, 0x0025, 2, start, 8, 5, 2, 0).unwrap(), 0);
    }

    #[test]
    fn indirect_keys_compare_bytes() {
        let (mut mem, start) = table_mem();
        let keyaddr = start + 0x80;
        mem.set_u16(keyaddr, 0x0455).unwrap();
        let hit =
            binary_search(&mem, keyaddr, 2, start, 8, 5, 2, KEY_INDIRECT | RETURN_INDEX).unwrap();
        assert_eq!(hit, 3);
    }

    #[test]
    fn linked_walks_the_chain() {
        let mut mem = Memory::new(ImageBuilder::new().finish()).unwrap();
        let start = mem.ram_start();
        // Nodes: 4-byte key, then next pointer.
        let a = start;
        let b = start + 0x10;
        let c = start + 0x20;
        mem.set_u32(a, 111).unwrap();
        mem.set_u32(a + 4, b).unwrap();
        mem.set_u32(b, 222).unwrap();
        mem.set_u32(b + 4, c).unwrap();
        mem.set_u32(c, 333).unwrap();
        mem.set_u32(c + 4, 0).unwrap();

        assert_eq!(linked_search(&mem, 222, 4, a, 0, 4, 0).unwrap(), b);
        assert_eq!(linked_search(&mem, 999, 4, a, 0, 4, 0).unwrap(), 0);
    }

    #[test]
    fn direct_key_sizes_are_validated() {
        let (mem, start) = table_mem();
        assert!(linear_search(&mem, 1, 3, start, 8, 5, 2, 0).is_err());
    }
}
