// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs, enums and traits describing what the
// experiment works with. No Burn types, no file I/O here.

// Scans, label maps and the scanner (acquisition) enum
pub mod scan;

// Patches, feature rows and tissue classes
pub mod patch;

// The result mapping written at the end of a run
pub mod results;

// Core abstractions that other layers implement
pub mod traits;
