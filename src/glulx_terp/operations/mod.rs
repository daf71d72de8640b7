pub mod exec;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The most operands any opcode carries (`linearsearch`: seven loads and a
/// store).
pub const MAX_OPERANDS: usize = 8;

/// One decoded operand: the loaded value for a load operand, or the
/// `(desttype, destaddr)` pair for a store operand.
#[derive(Debug, Clone, Copy, Default)]
pub struct Oparg {
    pub desttype: u32,
    pub value: u32,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Form {
    Load,
    Store,
}

/// The immutable shape of an opcode's operands: their forms in encoding
/// order, and the dereference width used by memory and locals addressing
/// modes (2 for `copys`, 1 for `copyb`, 4 for everything else).
#[derive(Debug, Clone, Copy)]
pub struct OperandList {
    pub arg_size: u8,
    pub forms: &'static [Form],
}

use self::Form::{Load as L, Store as S};

const F_NONE: &[Form] = &[];
const F_L: &[Form] = &[L];
const F_S: &[Form] = &[S];
const F_SS: &[Form] = &[S, S];
const F_SL: &[Form] = &[S, L];
const F_LL: &[Form] = &[L, L];
const F_LS: &[Form] = &[L, S];
const F_LSS: &[Form] = &[L, S, S];
const F_LLL: &[Form] = &[L, L, L];
const F_LLS: &[Form] = &[L, L, S];
const F_LLSS: &[Form] = &[L, L, S, S];
const F_LLLL: &[Form] = &[L, L, L, L];
const F_LLLS: &[Form] = &[L, L, L, S];
const F_LLLLS: &[Form] = &[L, L, L, L, S];
const F_LLLLSS: &[Form] = &[L, L, L, L, S, S];
const F_LLLLL: &[Form] = &[L, L, L, L, L];
const F_LLLLLLS: &[Form] = &[L, L, L, L, L, L, S];
const F_LLLLLLL: &[Form] = &[L, L, L, L, L, L, L];
const F_LLLLLLLS: &[Form] = &[L, L, L, L, L, L, L, S];

const fn list(arg_size: u8, forms: &'static [Form]) -> OperandList {
    OperandList { arg_size, forms }
}

#[repr(u32)]
#[derive(Eq, PartialEq, IntoPrimitive, TryFromPrimitive, Copy, Clone, Debug)]
#[allow(clippy::upper_case_acronyms)]
pub enum OPCode {
    // 2.1. Integer Math
    ADD = 0x10,
    SUB,
    MUL,
    DIV,
    MOD,
    NEG,

    BITAND = 0x18,
    BITOR,
    BITXOR,
    BITNOT,
    SHIFTL,
    SSHIFTR,
    USHIFTR,

    // 2.2. Branches
    JUMP = 0x20,
    JZ   = 0x22,
    JNZ,
    JEQ,
    JNE,
    JLT,
    JGE,
    JGT,
    JLE,
    JLTU,
    JGEU,
    JGTU,
    JLEU,
    JUMPABS = 0x104,

    // 2.3. Moving Data
    COPY = 0x40,
    COPYS,
    COPYB,
    SEXS = 0x44,
    SEXB,

    // 2.4. Array Data
    ALOAD = 0x48,
    ALOADS,
    ALOADB,
    ALOADBIT,
    ASTORE,
    ASTORES,
    ASTOREB,
    ASTOREBIT,

    // 2.5. The Stack
    STKCOUNT = 0x50,
    STKPEEK,
    STKSWAP,
    STKROLL,
    STKCOPY,

    // 2.6. Functions
    CALL = 0x30,
    RETURN,
    TAILCALL = 0x34,
    CALLF = 0x160,
    CALLFI,
    CALLFII,
    CALLFIII,

    // 2.7. Continuations
    CATCH = 0x32,
    THROW,

    // 2.8. Memory Map
    GETMEMSIZE = 0x102,
    SETMEMSIZE,

    // 2.9. Memory Allocation Heap
    MALLOC = 0x178,
    MFREE,

    // 2.10. Game State
    QUIT = 0x120,
    VERIFY,
    RESTART,
    SAVE,
    RESTORE,
    SAVEUNDO,
    RESTOREUNDO,
    PROTECT,
    HASUNDO,
    DISCARDUNDO,

    // 2.11. Output
    GETIOSYS = 0x148,
    SETIOSYS,
    STREAMCHAR = 0x70,
    STREAMNUM,
    STREAMSTR,
    STREAMUNICHAR,
    GETSTRINGTBL = 0x140,
    SETSTRINGTBL,

    // 2.12. Floating-Point Math
    NUMTOF = 0x190,
    FTONUMZ,
    FTONUMN,
    CEIL = 0x198,
    FLOOR,
    FADD = 0x1A0,
    FSUB,
    FMUL,
    FDIV,
    FMOD,
    SQRT = 0x1A8,
    EXP,
    LOG,
    POW,
    SIN = 0x1B0,
    COS,
    TAN,
    ASIN,
    ACOS,
    ATAN,
    ATAN2,

    // 2.13. Double-Precision Math
    NUMTOD = 0x200,
    DTONUMZ,
    DTONUMN,
    FTOD,
    DTOF,
    DCEIL = 0x208,
    DFLOOR,
    DADD = 0x210,
    DSUB,
    DMUL,
    DDIV,
    DMODR,
    DMODQ,
    DSQRT = 0x218,
    DEXP,
    DLOG = 0x21A,
    DPOW,
    DSIN = 0x220,
    DCOS,
    DTAN,
    DASIN,
    DACOS,
    DATAN,
    DATAN2,

    // 2.14. Floating-Point Comparisons
    JFEQ = 0x1C0,
    JFNE,
    JFLT,
    JFLE,
    JFGT,
    JFGE,
    JISNAN = 0x1C8,
    JISINF,

    // 2.15. Double-Precision Comparisons
    JDEQ = 0x230,
    JDNE,
    JDLT,
    JDLE,
    JDGT,
    JDGE,
    JDISNAN = 0x238,
    JDISINF,

    // 2.16. Random Number Generator
    RANDOM = 0x110,
    SETRANDOM,

    // 2.17. Block Copy and Clear
    MZERO = 0x170,
    MCOPY,

    // 2.18. Searching
    LINEARSEARCH = 0x150,
    BINARYSEARCH,
    LINKEDSEARCH,

    // 2.19. Accelerated Functions
    ACCELFUNC = 0x180,
    ACCELPARAM,

    // 2.20. Miscellaneous
    NOP = 0x00,
    GESTALT = 0x100,
    DEBUGTRAP,
    GLK = 0x130,
}

impl OPCode {
    /// The operand list for this opcode. `catch` is the one opcode whose
    /// store operand precedes its load operand in the encoding.
    pub fn operand_list(self) -> OperandList {
        match self {
            Self::NOP |
            Self::STKSWAP |
            Self::QUIT |
            Self::RESTART |
            Self::DISCARDUNDO => list(4, F_NONE),

            Self::STKCOUNT |
            Self::GETMEMSIZE |
            Self::SAVEUNDO |
            Self::RESTOREUNDO |
            Self::HASUNDO |
            Self::VERIFY |
            Self::GETSTRINGTBL => list(4, F_S),

            Self::GETIOSYS => list(4, F_SS),

            // S1 before L1: https://eblong.com/zarf/glulx/Glulx-Spec.html#continuations
            Self::CATCH => list(4, F_SL),

            Self::JUMP |
            Self::JUMPABS |
            Self::STKCOPY |
            Self::RETURN |
            Self::MFREE |
            Self::STREAMCHAR |
            Self::STREAMUNICHAR |
            Self::STREAMNUM |
            Self::STREAMSTR |
            Self::SETSTRINGTBL |
            Self::SETRANDOM |
            Self::DEBUGTRAP => list(4, F_L),

            Self::NEG |
            Self::BITNOT |
            Self::COPY |
            Self::SEXS |
            Self::SEXB |
            Self::STKPEEK |
            Self::CALLF |
            Self::SETMEMSIZE |
            Self::MALLOC |
            Self::SAVE |
            Self::RESTORE |
            Self::NUMTOF |
            Self::FTONUMZ |
            Self::FTONUMN |
            Self::CEIL |
            Self::FLOOR |
            Self::SQRT |
            Self::EXP |
            Self::LOG |
            Self::SIN |
            Self::COS |
            Self::TAN |
            Self::ACOS |
            Self::ASIN |
            Self::ATAN |
            Self::RANDOM => list(4, F_LS),

            Self::COPYS => list(2, F_LS),
            Self::COPYB => list(1, F_LS),

            Self::NUMTOD |
            Self::FTOD => list(4, F_LSS),

            Self::JZ |
            Self::JNZ |
            Self::STKROLL |
            Self::TAILCALL |
            Self::THROW |
            Self::PROTECT |
            Self::SETIOSYS |
            Self::JISNAN |
            Self::JISINF |
            Self::MZERO |
            Self::ACCELFUNC |
            Self::ACCELPARAM => list(4, F_LL),

            Self::ADD |
            Self::SUB |
            Self::MUL |
            Self::DIV |
            Self::MOD |
            Self::BITAND |
            Self::BITOR |
            Self::BITXOR |
            Self::SHIFTL |
            Self::USHIFTR |
            Self::SSHIFTR |
            Self::ALOAD |
            Self::ALOADS |
            Self::ALOADB |
            Self::ALOADBIT |
            Self::CALL |
            Self::CALLFI |
            Self::FADD |
            Self::FSUB |
            Self::FMUL |
            Self::FDIV |
            Self::POW |
            Self::ATAN2 |
            Self::DTONUMZ |
            Self::DTONUMN |
            Self::DTOF |
            Self::GESTALT |
            Self::GLK => list(4, F_LLS),

            Self::FMOD |
            Self::DCEIL |
            Self::DFLOOR |
            Self::DSQRT |
            Self::DEXP |
            Self::DLOG |
            Self::DSIN |
            Self::DCOS |
            Self::DTAN |
            Self::DACOS |
            Self::DASIN |
            Self::DATAN => list(4, F_LLSS),

            Self::JEQ |
            Self::JNE |
            Self::JLT |
            Self::JLE |
            Self::JGT |
            Self::JGE |
            Self::JLTU |
            Self::JLEU |
            Self::JGTU |
            Self::JGEU |
            Self::ASTORE |
            Self::ASTORES |
            Self::ASTOREB |
            Self::ASTOREBIT |
            Self::JFLT |
            Self::JFLE |
            Self::JFGT |
            Self::JFGE |
            Self::JDISNAN |
            Self::JDISINF |
            Self::MCOPY => list(4, F_LLL),

            Self::CALLFII => list(4, F_LLLS),

            Self::JFEQ |
            Self::JFNE => list(4, F_LLLL),

            Self::CALLFIII => list(4, F_LLLLS),

            Self::DADD |
            Self::DSUB |
            Self::DMUL |
            Self::DDIV |
            Self::DMODR |
            Self::DMODQ |
            Self::DPOW |
            Self::DATAN2 => list(4, F_LLLLSS),

            Self::JDLT |
            Self::JDLE |
            Self::JDGT |
            Self::JDGE => list(4, F_LLLLL),

            Self::LINKEDSEARCH => list(4, F_LLLLLLS),

            Self::JDEQ |
            Self::JDNE => list(4, F_LLLLLLL),

            Self::LINEARSEARCH |
            Self::BINARYSEARCH => list(4, F_LLLLLLLS),
        }
    }
}

/// The fast-lookup table for the one-byte opcode range, built once at
/// startup so the common path skips the full match.
pub fn build_fast_table() -> Box<[Option<(OPCode, OperandList)>; 0x80]> {
    let mut table: Box<[Option<(OPCode, OperandList)>; 0x80]> = Box::new([None; 0x80]);
    for (ix, slot) in table.iter_mut().enumerate() {
        *slot = OPCode::try_from(ix as u32).ok().map(|op| (op, op.operand_list()));
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_table_matches_lookup() {
        let table = build_fast_table();
        assert!(table[0x00].is_some()); // nop
        assert!(table[0x10].is_some()); // add
        assert!(table[0x7F].is_none());
        let (op, oplist) = table[0x10].unwrap();
        assert_eq!(op, OPCode::ADD);
        assert_eq!(oplist.forms, F_LLS);
    }

    #[test]
    fn operand_shapes() {
        assert_eq!(OPCode::QUIT.operand_list().forms.len(), 0);
        assert_eq!(OPCode::CATCH.operand_list().forms, F_SL);
        assert_eq!(OPCode::COPYS.operand_list().arg_size, 2);
        assert_eq!(OPCode::COPYB.operand_list().arg_size, 1);
        assert_eq!(OPCode::LINEARSEARCH.operand_list().forms.len(), MAX_OPERANDS);
        assert_eq!(OPCode::DADD.operand_list().forms, F_LLLLSS);
        assert_eq!(OPCode::JDEQ.operand_list().forms.len(), 7);
    }

    #[test]
    fn opcode_values_round_trip() {
        assert_eq!(u32::from(OPCode::QUIT), 0x120);
        assert_eq!(OPCode::try_from(0x130u32).unwrap(), OPCode::GLK);
        assert_eq!(OPCode::try_from(0x149u32).unwrap(), OPCode::SETIOSYS);
        assert!(OPCode::try_from(0x7Fu32).is_err());
    }
}
