pub mod defs;
pub mod device;
pub mod eval;
pub mod run;
