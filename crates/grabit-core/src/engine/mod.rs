//! Download Engine
//!
//! - `transfer`: one HTTP session streaming into the destination file, with
//!   byte-range resume and cooperative pause/cancel
//! - `controller`: the download state machine driving those sessions

mod controller;
mod transfer;

pub use controller::*;
