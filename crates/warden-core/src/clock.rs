//! Wall-clock helpers shared across the workspace.

pub use warden_sandbox::clock::now_ms;
