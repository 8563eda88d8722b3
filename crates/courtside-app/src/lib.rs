// Courtside pipeline: snapshot fetch and the stage runner behind the
// `courtside` binary.

pub mod fetch;
pub mod pipeline;
