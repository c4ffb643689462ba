//! Compiled property trees and the access-checked operations on instances.

pub mod access;
pub mod definition;
pub mod export;
pub mod hooks;
pub mod kind;
pub mod lifecycle;
pub mod node;
pub mod ordered;
pub mod read;
pub mod remove;
pub mod selection;
pub mod tree;
pub mod types;
pub mod validate;
pub mod walk;
pub mod write;

pub use definition::{ObjectTypeDef, PropertyDef, SetShapeDef, TypeDef};
pub use node::{DocCursor, Node, NodeId};
pub use selection::Selection;
pub use tree::{CompileOptions, RootKind, SchemaTree};
pub use write::WriteOptions;
