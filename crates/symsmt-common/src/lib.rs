pub mod dbg;
pub mod logger;
