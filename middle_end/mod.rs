pub mod build;
pub mod dom;
pub mod ir;
pub mod opt;
pub mod ssa;
