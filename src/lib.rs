//! Max-flow based nullability inference for a statically typed
//! object-oriented language.
//!
//! The engine builds a directed flow graph with one node per reference-typed
//! syntactic position, connects the positions with assignment-compatible flow
//! edges, computes a maximum flow between a nullable and a non-null sink, and
//! labels every position from the residual graph. A node labelled non-null is
//! a recommendation for a warning-free annotation, not a soundness proof.

pub mod binder;
pub mod diagnostics;
pub mod edge_builder;
pub mod engine;
pub mod graph;
pub mod maxflow;
pub mod node_builder;
pub mod parse;
pub mod propagate;
pub mod rewrite;
pub mod semantic;
pub mod syntax;
#[cfg(test)]
mod test_harness;

pub use engine::{analyze, Analysis, CancellationToken, Cancelled};
pub use graph::{NullType, TypeSystem};
