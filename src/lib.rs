#[macro_use]
pub mod macros;

pub mod codegen;
pub mod errors;
pub mod hir;
pub mod lir;
pub mod logger;
pub mod options;
pub mod target;
pub mod utils;
