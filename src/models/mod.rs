pub mod quote;
pub mod topics;

pub use quote::{Direction, Quote};
