//! Common utilities for Leshy.
//!
//! This crate provides foundational types and utilities used across all
//! Leshy crates:
//!
//! - [`BinaryReader`] - Zero-copy, endian-switchable binary reading
//! - [`Platform`] - Source platform descriptors (byte order, word size)
//! - [`crc`] - CRC32C hashing for resource name lookup

mod error;
mod platform;
mod reader;

pub mod crc;

pub use error::{Error, Result};
pub use platform::{Endian, Platform, PointerWidth};
pub use reader::BinaryReader;

/// Re-export zerocopy traits for convenience
pub use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Re-export memchr for SIMD-accelerated byte searching
pub use memchr;
