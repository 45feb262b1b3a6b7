mod transcripts;
mod watch;

pub use transcripts::*;
pub use watch::*;
