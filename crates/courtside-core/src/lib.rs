// Shared infrastructure for the courtside pipeline: configuration and
// versioned dataset files.

pub mod config;
pub mod snapshot;
