/// Width in bytes of an on-disk page pointer.
pub const INDEX_SIZE: usize = 4;
