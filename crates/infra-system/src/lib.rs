// Corral Infrastructure - System Adapter
// Implements: ScriptRunner via tokio::process

mod process_runner;

pub use process_runner::ProcessRunner;
