//! Model of the JVM side of translation
//!
//! This covers everything the translator reads about the method being compiled: names and
//! descriptors, the resolved constant pool, the bytecode instruction set, and the graph of classes
//! loaded into the VM. None of this is mutated by the translator, except for the class graph which
//! is only ever appended to (hence the arenas).

mod access_flags;
mod class_graph;
mod constants;
mod descriptors;
mod method;
mod names;
mod opcodes;

pub use crate::util::{Offset, OffsetResult, OffsetVec, Width};
pub use access_flags::*;
pub use class_graph::*;
pub use constants::*;
pub use descriptors::*;
pub use method::*;
pub use names::*;
pub use opcodes::*;
