/// log2 of the number of bits in a byte
pub const LOG_BITS_IN_BYTE: u8 = 3;
/// The number of bits in a byte
pub const BITS_IN_BYTE: usize = 1 << LOG_BITS_IN_BYTE;

/// log2 of the number of bytes in a megabyte
pub const LOG_BYTES_IN_MBYTE: u8 = 20;
/// The number of bytes in a megabyte
pub const BYTES_IN_MBYTE: usize = 1 << LOG_BYTES_IN_MBYTE;

/// log2 of the number of bytes in a kilobyte
pub const LOG_BYTES_IN_KBYTE: u8 = 10;
/// The number of bytes in a kilobyte
pub const BYTES_IN_KBYTE: usize = 1 << LOG_BYTES_IN_KBYTE;

#[cfg(target_pointer_width = "32")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 2;
#[cfg(target_pointer_width = "64")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 3;
/// The number of bytes in an address
pub const BYTES_IN_ADDRESS: usize = 1 << LOG_BYTES_IN_ADDRESS;

/// log2 of the number of bytes in a word
pub const LOG_BYTES_IN_WORD: u8 = LOG_BYTES_IN_ADDRESS;
/// The number of bytes in a word
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;
/// log2 of the number of bits in a word
pub const LOG_BITS_IN_WORD: usize = LOG_BITS_IN_BYTE as usize + LOG_BYTES_IN_WORD as usize;
/// The number of bits in a word. This is also the number of zones in a zone set.
pub const BITS_IN_WORD: usize = 1 << LOG_BITS_IN_WORD;

/// log2 of the arena grain. Segments are always a multiple of this, even when the platform pages
/// are smaller.
pub const LOG_BYTES_IN_PAGE: u8 = 12;
/// The number of bytes in an arena grain.
pub const BYTES_IN_PAGE: usize = 1 << LOG_BYTES_IN_PAGE;

/// The default log2 of the number of bytes in a zone stripe.
pub const DEFAULT_ZONE_SHIFT: usize = 20;

/// The maximum number of traces that can exist at once. Trace identifiers are bits in a
/// [`crate::trace::TraceSet`], so this is bounded by the width of that set.
pub const TRACE_MAX: usize = 8;

/// Width in bits of the per-segment exposure depth counter.
pub const SHIELD_DEPTH_WIDTH: u32 = 4;
/// The maximum exposure depth of a segment.
pub const SHIELD_DEPTH_MAX: u8 = (1 << SHIELD_DEPTH_WIDTH) - 1;

/// Default number of segments the shield keeps exposed after they are covered.
pub const DEFAULT_SHIELD_CACHE_SIZE: usize = 16;

/// Default bytes of segments scanned per trace step.
pub const DEFAULT_TRACE_QUANTUM: usize = 64 << LOG_BYTES_IN_KBYTE;

/// Default bytes of allocation between two polls that do collection work.
pub const DEFAULT_POLL_THRESHOLD: usize = 64 << LOG_BYTES_IN_KBYTE;

/// Default bytes of free memory kept committed by the arena.
pub const DEFAULT_SPARE_COMMIT_LIMIT: usize = 10 << LOG_BYTES_IN_MBYTE;

/// Default size of the first address space reservation of an arena.
pub const DEFAULT_ARENA_SIZE: usize = 64 << LOG_BYTES_IN_MBYTE;

/// Default minimum size of every later reservation.
pub const DEFAULT_ARENA_EXTEND_BY: usize = 16 << LOG_BYTES_IN_MBYTE;

/// Default capacity of the nursery generation of the default chain.
pub const DEFAULT_NURSERY_CAPACITY: usize = 4 << LOG_BYTES_IN_MBYTE;

/// Number of finished traces the arena remembers.
pub const TRACE_HISTORY_LENGTH: usize = 4;

/// Number of epochs of moved zones kept for location dependencies. Older dependencies are
/// checked against every zone ever moved.
pub const LD_HISTORY_LENGTH: usize = 4;
