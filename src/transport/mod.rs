//! Transport module - TCP listening and connecting.

mod tcp;

pub use tcp::{advertised_addr, bind_in_range, connect, random_port};
