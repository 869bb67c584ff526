//! Byte-level I/O helpers: transparent decompression and file discovery.

pub mod compression;
pub mod glob;
