//! Translation of JVM bytecode into block-structured tree IL
//!
//! The entry point is [`ilgen::generate_il`], which walks the bytecode of one method once and
//! produces a [`il::MethodIl`]: a control flow graph of blocks, each holding a list of trees.
//! Everything the translator needs to know about classes, constant pools, and live heap state
//! comes through the [`frontend::FrontEnd`] trait.

pub mod frontend;
pub mod il;
pub mod ilgen;
pub mod jvm;
pub mod util;
