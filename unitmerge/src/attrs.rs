use bitflags::bitflags;

bitflags! {
    /// Declaration attributes attached by the emitter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Attr: u16 {
        /// The only declaration with this name in the whole program.
        const UNIQUE         = 1 << 0;
        /// May live in a process-wide slot (authoritative mode only).
        const PERSISTENT     = 1 << 1;
        const INTERFACE      = 1 << 2;
        const TRAIT          = 1 << 3;
        const FINAL          = 1 << 4;
        const ABSTRACT       = 1 << 5;
        /// Builtin functions that user code may replace.
        const ALLOW_OVERRIDE = 1 << 6;
    }
}
