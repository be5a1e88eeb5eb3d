//! The core module holds everything the synchronization core needs from outside of it: the device seam, queue
//! topology, settings and error handling.

pub mod device;
pub mod diagnostics;
pub mod error;
pub mod headless;
pub mod queue;
pub mod settings;
