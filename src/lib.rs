//! Single-active-timer tracking: a small set of named counters of which at
//! most one runs, driven by an injected tick source.

pub mod clock;
pub mod logging;
pub mod render;
pub mod session;
pub mod timer;
