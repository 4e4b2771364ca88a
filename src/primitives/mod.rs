//! Low-level primitives for building the storage engine.
//!
//! Includes byte utilities, I/O operations, concurrency controls,
//! and the page storage backends.

/// Byte-level utilities and encoding/decoding.
///
/// Varints and a bounds-checked read cursor used by every page codec.
pub mod bytes;

/// Concurrency primitives and synchronization.
///
/// Single-writer admission and reader accounting.
pub mod concurrency;

/// I/O abstractions and utilities.
///
/// Interfaces for positioned reads and writes on files.
pub mod io;

/// Page storage backends.
///
/// Durable key assignment, checksums and the uber page pointer.
pub mod storage;
