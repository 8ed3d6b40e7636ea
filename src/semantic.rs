use std::collections::BTreeMap;

use crate::syntax::{Location, SyntaxId};

/// Fully resolved type of a symbol or expression.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResolvedType {
    Void,
    /// Value types; never nullable, never inferred.
    Value(ValueKind),
    /// Class or interface reference, possibly instantiated.
    Named {
        name: String,
        args: Vec<ResolvedType>,
    },
    /// Unconstrained class type parameter.
    TypeParam {
        owner: String,
        index: usize,
        name: String,
    },
    Array(Box<ResolvedType>),
    /// The type of a `null` literal before it flows anywhere.
    Null,
    /// Unresolved; analysed positions of this type are oblivious.
    Error,
}

/// Builtin value kinds of the host language.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueKind {
    Int,
    Bool,
}

impl ResolvedType {
    /// Generic arguments, or the array element as a single-element slice.
    pub fn args(&self) -> &[ResolvedType] {
        match self {
            ResolvedType::Named { args, .. } => args,
            ResolvedType::Array(elem) => std::slice::from_ref(elem),
            _ => &[],
        }
    }
}

/// Nullability knowledge the host's flow analysis has at a use site.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlowState {
    DefinitelyNotNull,
    MaybeNull,
    Unknown,
}

/// Stable symbol identity, interned by the binder.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SymbolId(pub(crate) u32);

/// Symbol classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SymbolKind {
    Class,
    Method,
    Field,
    Parameter,
    Local,
}

/// Everything the engine needs to know about one symbol.
#[derive(Clone, Debug)]
pub struct SymbolInfo {
    pub id: SymbolId,
    pub kind: SymbolKind,
    /// Display name, e.g. `Box.Get` or `Box.Get#x`.
    pub name: String,
    pub container: Option<String>,
    /// Declared type; the return type for methods.
    pub declared_type: ResolvedType,
    /// Parameter symbols, in order, for methods.
    pub params: Vec<SymbolId>,
    pub is_static: bool,
    /// Where the symbol's type is written, for symbols declared in source.
    pub declaration: Option<Declaration>,
    pub location: Location,
}

/// Source declaration site of a symbol.
#[derive(Clone, Copy, Debug)]
pub struct Declaration {
    /// Index of the declaring translation unit.
    pub unit: usize,
    /// The declared type syntax (`None` for `var` locals and constructors).
    pub type_syntax: Option<SyntaxId>,
    /// The declaring statement or declaration node.
    pub syntax: SyntaxId,
}

/// Resolved view of one compilation: symbols, expression types, flow facts.
///
/// Built once by the binder, then shared read-only across analysis threads.
#[derive(Debug, Default)]
pub struct SemanticModel {
    pub(crate) symbols: Vec<SymbolInfo>,
    pub(crate) symbol_of_syntax: BTreeMap<SyntaxId, SymbolId>,
    pub(crate) expr_types: BTreeMap<SyntaxId, ResolvedType>,
    pub(crate) type_syntax_types: BTreeMap<SyntaxId, ResolvedType>,
    pub(crate) flow_states: BTreeMap<SyntaxId, FlowState>,
    pub(crate) overrides: BTreeMap<SymbolId, SymbolId>,
}

impl SemanticModel {
    /// The symbol a declaration or reference resolves to, if any.
    pub fn symbol_for(&self, syntax: SyntaxId) -> Option<SymbolId> {
        self.symbol_of_syntax.get(&syntax).copied()
    }

    /// The resolved type of an expression. Unresolved expressions are `Error`.
    pub fn type_for(&self, expr: SyntaxId) -> &ResolvedType {
        self.expr_types.get(&expr).unwrap_or(&ResolvedType::Error)
    }

    /// The resolved type of a type syntax node, recorded during binding.
    pub fn type_for_syntax(&self, syntax: SyntaxId) -> &ResolvedType {
        self.type_syntax_types
            .get(&syntax)
            .unwrap_or(&ResolvedType::Error)
    }

    pub fn is_reference_type(&self, ty: &ResolvedType) -> bool {
        matches!(
            ty,
            ResolvedType::Named { .. } | ResolvedType::Array(_) | ResolvedType::Null
        )
    }

    /// Whether a `?` annotation is meaningful on this type: reference types
    /// and unconstrained type parameters qualify.
    pub fn can_be_made_nullable(&self, ty: &ResolvedType) -> bool {
        matches!(
            ty,
            ResolvedType::Named { .. }
                | ResolvedType::Array(_)
                | ResolvedType::TypeParam { .. }
                | ResolvedType::Null
        )
    }

    /// What the host's flow analysis knows just before evaluating `expr`.
    pub fn flow_state_before(&self, expr: SyntaxId) -> FlowState {
        self.flow_states
            .get(&expr)
            .copied()
            .unwrap_or(FlowState::Unknown)
    }

    pub fn symbol(&self, id: SymbolId) -> &SymbolInfo {
        &self.symbols[id.0 as usize]
    }

    pub fn symbols(&self) -> impl Iterator<Item = &SymbolInfo> {
        self.symbols.iter()
    }

    /// The base-class or interface method this method overrides, if any.
    pub fn override_of(&self, method: SymbolId) -> Option<SymbolId> {
        self.overrides.get(&method).copied()
    }
}
