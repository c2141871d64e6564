pub mod reopen;
pub mod tell;

pub use reopen::*;
pub use tell::*;
