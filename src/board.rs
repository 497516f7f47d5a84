/// Board profiles for supported targets.
///
/// Each board module sizes the fixed-capacity device table and the heap
/// for its memory budget, selected at compile time via feature flags.

#[cfg(feature = "board-xiao")]
mod hw {
    /// Maximum number of distinct devices tracked at once
    pub const TABLE_CAPACITY: usize = 128;
    pub const HEAP_SIZE: usize = 128 * 1024;
    pub const BOARD_NAME: &str = "xiao_esp32s3";
}

#[cfg(all(feature = "board-m5stickc", not(feature = "board-xiao")))]
mod hw {
    /// ESP32 is tighter on DRAM than the S3
    pub const TABLE_CAPACITY: usize = 64;
    pub const HEAP_SIZE: usize = 64 * 1024;
    pub const BOARD_NAME: &str = "m5stickc_plus2";
}

#[cfg(not(any(feature = "board-xiao", feature = "board-m5stickc")))]
mod hw {
    pub const TABLE_CAPACITY: usize = 64;
    pub const HEAP_SIZE: usize = 64 * 1024;
    pub const BOARD_NAME: &str = "unknown";
}

pub use hw::*;
