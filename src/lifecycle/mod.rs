//! Process lifecycle management
//!
//! Signal-driven shutdown so the daemon can release the instance lock,
//! restore desktop routing, and stop the audio engine before exiting.

mod shutdown;

pub use shutdown::ShutdownSignal;
