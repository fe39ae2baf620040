pub mod diagnostics;
pub mod handler;
pub mod transport;
