pub mod config;
pub mod error;
pub mod flow;
pub mod io;
pub mod scheduler;
pub mod signal;
mod test;
pub mod testkit;
pub mod utils;

pub mod prelude;
