use num_enum::TryFromPrimitive;

/// Glulx specification version this interpreter implements.
pub const GLULX_VERSION: u32 = 0x0003_0103;
/// Version of this interpreter.
pub const TERP_VERSION: u32 = 0x0000_0600;

#[repr(u32)]
#[derive(Eq, PartialEq, Copy, Clone, Debug, TryFromPrimitive)]
pub enum Selector {
    GlulxVersion = 0,
    TerpVersion,
    ResizeMem,
    Undo,
    IoSystem,
    Unicode,
    MemCopy,
    MAlloc,
    MAllocHeap,
    Acceleration,
    AccelFunc,
    Float,
    ExtUndo,
    Double,
}

/// The read-only capability table. `heap_start` and the accel lookup are the
/// only pieces of live state a query can observe.
pub fn query(val: u32, val2: u32, heap_start: u32, accel_supported: bool) -> u32 {
    let Ok(selector) = Selector::try_from(val) else {
        return 0;
    };
    match selector {
        Selector::GlulxVersion => GLULX_VERSION,
        Selector::TerpVersion => TERP_VERSION,
        Selector::ResizeMem => 1,
        Selector::Undo => 1,
        Selector::IoSystem => match val2 {
            0 | 1 | 2 => 1,
            _ => 0,
        },
        Selector::Unicode => 1,
        Selector::MemCopy => 1,
        Selector::MAlloc => 1,
        Selector::MAllocHeap => heap_start,
        Selector::Acceleration => 1,
        Selector::AccelFunc => accel_supported as u32,
        Selector::Float => 1,
        Selector::ExtUndo => 1,
        Selector::Double => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_capabilities_present() {
        assert_eq!(query(0, 0, 0, false), GLULX_VERSION);
        assert_eq!(query(2, 0, 0, false), 1);
        assert_eq!(query(3, 0, 0, false), 1);
        assert_eq!(query(11, 0, 0, false), 1);
        assert_eq!(query(13, 0, 0, false), 1);
    }

    #[test]
    fn iosystem_arg_is_checked() {
        assert_eq!(query(4, 0, 0, false), 1);
        assert_eq!(query(4, 2, 0, false), 1);
        assert_eq!(query(4, 3, 0, false), 0);
    }

    #[test]
    fn heap_and_accel_reflect_state() {
        assert_eq!(query(8, 0, 0x5000, false), 0x5000);
        assert_eq!(query(10, 3, 0, true), 1);
        assert_eq!(query(10, 99, 0, false), 0);
        assert_eq!(query(999, 0, 0, false), 0);
    }
}
