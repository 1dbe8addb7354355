#[macro_use]
extern crate log;
extern crate arrayvec;

pub mod disc;
pub mod mech;
pub mod port;
pub mod psnee;
pub mod shared;
pub mod streamer;
pub mod subq;

mod timekeeper;

pub use timekeeper::MicroSeconds;

/// Version of the spindle library set in Cargo.toml
pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");
