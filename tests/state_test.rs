//! Game-state opcodes end to end: undo, disk save/restore through a Glk
//! stream, the protect range across restart, and heap-aware memory sizing.

mod common;

use common::{Code, ImageBuilder, RAM_START};
use glulx_vm::glulx_terp::glk::MemGlk;
use glulx_vm::GlulxTerp;
use test_log::test;

fn run(image: Vec<u8>) -> GlulxTerp {
    let mut terp = GlulxTerp::from_image(image, Box::new(MemGlk::new())).unwrap();
    terp.run().unwrap();
    terp
}

#[test]
fn saveundo_restoreundo_round_trip() {
    let ram = RAM_START;
    let mut image = ImageBuilder::new();

    let mut main = Code::func_local_args(&[]);
    main.op(0x4C).modes(&[3, 1, 3]).w(ram).b(0).w(0xCAFE); // astore ram 0 0xCAFE
    main.op(0x125).modes(&[8]); // saveundo -> push
    main.op(0x23).modes(&[8, 1]).b(13); // jnz pop -> quit (taken on resume)
    main.op(0x4C).modes(&[3, 1, 0]).w(ram).b(0); // astore ram 0 0
    main.op(0x126).modes(&[0]); // restoreundo (resumes at the jnz with -1)
    main.op(0x120); // quit
    image.at(0x200, &main.bytes);
    image.start_func(0x200);

    let terp = run(image.finish());
    assert_eq!(terp.memory().get_u32(ram).unwrap(), 0xCAFE);
}

#[test]
fn hasundo_and_discardundo() {
    let ram = RAM_START;
    let mut image = ImageBuilder::new();

    let mut main = Code::func_local_args(&[]);
    main.op(0x128).modes(&[7]).w(ram + 0x20); // hasundo: nothing yet
    main.op(0x125).modes(&[0]); // saveundo, result dropped
    main.op(0x128).modes(&[7]).w(ram + 0x24); // hasundo: one state
    main.op(0x129); // discardundo
    main.op(0x128).modes(&[7]).w(ram + 0x28); // hasundo: spent
    main.op(0x120);
    image.at(0x200, &main.bytes);
    image.start_func(0x200);

    let terp = run(image.finish());
    assert_eq!(terp.memory().get_u32(ram + 0x20).unwrap(), 1);
    assert_eq!(terp.memory().get_u32(ram + 0x24).unwrap(), 0);
    assert_eq!(terp.memory().get_u32(ram + 0x28).unwrap(), 1);
}

#[test]
fn save_and_restore_through_a_stream() {
    let ram = RAM_START;
    let mut image = ImageBuilder::new();

    let mut main = Code::func_local_args(&[]);
    main.op(0x4C).modes(&[3, 1, 3]).w(ram).b(0).w(0x1111); // astore ram 0 0x1111
    main.op(0x123).modes(&[1, 8]).b(5); // save to stream 5 -> push
    main.op(0x23).modes(&[8, 1]).b(18); // jnz pop -> quit (taken on resume)
    main.op(0x4C).modes(&[3, 1, 3]).w(ram).b(0).w(0x2222); // clobber
    main.op(0x124).modes(&[1, 0]).b(5); // restore from stream 5
    main.op(0x120);
    image.at(0x200, &main.bytes);
    image.start_func(0x200);

    let terp = run(image.finish());
    // The restore rewound RAM to the saved value and resumed after the save.
    assert_eq!(terp.memory().get_u32(ram).unwrap(), 0x1111);
}

#[test]
fn protect_survives_restart() {
    let ram = RAM_START;
    let p = ram + 0x20;
    let mut image = ImageBuilder::new();

    let mut main = Code::func_local_args(&[]);
    main.op(0x4A).modes(&[3, 1, 8]).w(p).b(2); // aloadb p 2 -> push (flag)
    main.op(0x23).modes(&[8, 1]).b(48); // jnz pop -> quit (second pass)
    main.op(0x4E).modes(&[3, 1, 1]).w(p).b(0).b(0xDE); // astoreb
    main.op(0x4E).modes(&[3, 1, 1]).w(p).b(1).b(0xAD); // astoreb
    main.op(0x127).modes(&[3, 1]).w(p).b(3); // protect p 3
    main.op(0x4E).modes(&[3, 1, 1]).w(p).b(2).b(1); // flag inside the range
    main.op(0x4E).modes(&[3, 1, 1]).w(ram + 0x50).b(0).b(0x77); // unprotected
    main.op(0x122); // restart
    main.op(0x120); // quit
    image.at(0x200, &main.bytes);
    image.start_func(0x200);

    let terp = run(image.finish());
    let mem = terp.memory();
    assert_eq!(mem.get_u8(p).unwrap(), 0xDE);
    assert_eq!(mem.get_u8(p + 1).unwrap(), 0xAD);
    assert_eq!(mem.get_u8(p + 2).unwrap(), 1);
    // Unprotected RAM went back to its image value.
    assert_eq!(mem.get_u8(ram + 0x50).unwrap(), 0);
}

#[test]
fn memsize_and_heap_interaction() {
    let ram = RAM_START;
    let mut image = ImageBuilder::new();

    let mut main = Code::func_local_args(&[]);
    main.op(0x102).modes(&[7]).w(ram); // getmemsize -> ram
    main.op(0x102).modes(&[8]); // getmemsize -> push
    main.op(0x10).modes(&[8, 2, 8]).h(0x100); // add pop 0x100 -> push
    main.op(0x103).modes(&[8, 7]).w(ram + 4); // setmemsize pop (succeeds)
    main.op(0x102).modes(&[7]).w(ram + 8); // getmemsize
    main.op(0x178).modes(&[2, 7]).h(0x40).w(ram + 12); // malloc 0x40
    main.op(0x102).modes(&[8]); // getmemsize -> push
    main.op(0x10).modes(&[8, 2, 8]).h(0x100); // add pop 0x100 -> push
    main.op(0x103).modes(&[8, 7]).w(ram + 16); // setmemsize: heap active
    main.op(0x48).modes(&[3, 1, 8]).w(ram).b(3); // aload ram 3 -> push (addr)
    main.op(0x179).modes(&[8]); // mfree pop
    main.op(0x102).modes(&[7]).w(ram + 20); // getmemsize after heap clears
    main.op(0x120);
    image.at(0x200, &main.bytes);
    image.start_func(0x200);

    let terp = run(image.finish());
    let mem = terp.memory();
    let orig = mem.get_u32(ram).unwrap();
    assert_eq!(mem.get_u32(ram + 4).unwrap(), 0, "resize succeeds");
    assert_eq!(mem.get_u32(ram + 8).unwrap(), orig + 0x100);
    // The heap opened at the grown end of memory.
    assert_eq!(mem.get_u32(ram + 12).unwrap(), orig + 0x100);
    assert_eq!(mem.get_u32(ram + 16).unwrap(), 1, "resize fails while the heap is active");
    // Freeing the only block deactivates the heap and shrinks memory back.
    assert_eq!(mem.get_u32(ram + 20).unwrap(), orig + 0x100);
}
