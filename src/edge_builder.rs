use std::collections::BTreeMap;

use crate::graph::{
    NodeId, NullabilityEdge, PendingEdges, TypeSystem, TypeWithNode, INFINITE_CAPACITY,
};
use crate::semantic::{FlowState, ResolvedType, SemanticModel, SymbolId, SymbolKind};
use crate::syntax::{
    ClassDecl, Expr, ExprKind, MethodDecl, Stmt, TranslationUnit, TypeSyntax,
};

/// Second pass over one translation unit: every syntax node's nullability
/// node is resolvable through the published mapping, every symbol's type
/// through the store, so this pass only emits flow constraints.
pub fn build_edges(
    unit: usize,
    tu: &TranslationUnit,
    model: &SemanticModel,
    ts: &TypeSystem,
) -> PendingEdges {
    let mut walker = EdgeWalker {
        unit,
        model,
        ts,
        pending: PendingEdges::default(),
    };
    for &node in ts.explicit_nullable(unit) {
        walker.pending.push(NullabilityEdge::new(
            ts.nullable_sink(),
            node,
            INFINITE_CAPACITY,
            "explicit nullable annotation",
        ));
    }
    for class in &tu.classes {
        walker.walk_class(class);
    }
    walker.pending
}

type Substitution = BTreeMap<(String, usize), TypeWithNode>;

struct EdgeWalker<'a> {
    unit: usize,
    model: &'a SemanticModel,
    ts: &'a TypeSystem,
    pending: PendingEdges,
}

impl EdgeWalker<'_> {
    fn walk_class(&mut self, class: &ClassDecl) {
        for field in &class.fields {
            self.walk_field(class, field);
        }
        for method in &class.methods {
            self.walk_method(method);
        }
    }

    fn walk_field(&mut self, class: &ClassDecl, field: &crate::syntax::FieldDecl) {
        let Some(symbol) = self.model.symbol_for(field.id) else {
            return;
        };
        let Some(declared) = self.ts.symbol_type(symbol) else {
            return;
        };
        let declared = declared.clone();
        match &field.initializer {
            Some(init) => {
                let value = self.expr_type(init);
                self.assign(&value, &declared, "field initializer");
            }
            None => {
                // A reference field nobody assigns in any constructor
                // observably holds null.
                if declared.node != self.ts.oblivious_node()
                    && !self.assigned_in_constructors(class, symbol)
                {
                    self.pending.push(
                        NullabilityEdge::new(
                            self.ts.nullable_sink(),
                            declared.node,
                            1,
                            format!("field {} never initialized", field.name),
                        )
                        .at(field.location),
                    );
                }
            }
        }
    }

    fn assigned_in_constructors(&self, class: &ClassDecl, field: SymbolId) -> bool {
        class
            .methods
            .iter()
            .filter(|m| m.is_constructor())
            .any(|ctor| stmts_assign(self.model, &ctor.body, field))
    }

    fn walk_method(&mut self, method: &MethodDecl) {
        let symbol = self.model.symbol_for(method.id);
        if let Some(symbol) = symbol {
            if let Some(base) = self.model.override_of(symbol) {
                self.unify_override(symbol, base);
            }
        }
        let return_type = symbol
            .and_then(|s| self.ts.symbol_type(s))
            .cloned();
        self.walk_stmts(&method.body, return_type.as_ref());
    }

    /// Overridden members must agree with their base declaration:
    /// contravariant unification for parameters, covariant for returns.
    fn unify_override(&mut self, derived: SymbolId, base: SymbolId) {
        if let (Some(derived_ret), Some(base_ret)) =
            (self.ts.symbol_type(derived), self.ts.symbol_type(base))
        {
            self.unify_types(&derived_ret.clone(), &base_ret.clone(), "override return");
        }
        let derived_params = self.model.symbol(derived).params.clone();
        let base_params = self.model.symbol(base).params.clone();
        for (d, b) in derived_params.iter().zip(&base_params) {
            if let (Some(dt), Some(bt)) = (self.ts.symbol_type(*d), self.ts.symbol_type(*b)) {
                self.unify_types(&dt.clone(), &bt.clone(), "override parameter");
            }
        }
    }

    fn unify_types(&mut self, a: &TypeWithNode, b: &TypeWithNode, label: &str) {
        self.pending.unify(a.node, b.node, label);
        for (x, y) in a.args.iter().zip(&b.args) {
            self.unify_types(x, y, label);
        }
    }

    fn walk_stmts(&mut self, stmts: &[Stmt], return_type: Option<&TypeWithNode>) {
        for stmt in stmts {
            match stmt {
                Stmt::Local(local) => {
                    let Some(init) = &local.initializer else {
                        continue;
                    };
                    let value = self.expr_type(init);
                    let declared = self
                        .model
                        .symbol_for(local.id)
                        .and_then(|s| self.ts.symbol_type(s))
                        .cloned();
                    if let Some(declared) = declared {
                        self.assign(&value, &declared, "initialization");
                    }
                }
                Stmt::Expr(expr) => {
                    self.expr_type(expr);
                }
                Stmt::Return { value, .. } => {
                    if let Some(value) = value {
                        let twn = self.expr_type(value);
                        if let Some(return_type) = return_type {
                            self.assign(&twn, return_type, "return value");
                        }
                    }
                }
                Stmt::If {
                    condition,
                    then_branch,
                    else_branch,
                } => {
                    self.expr_type(condition);
                    self.walk_stmts(then_branch, return_type);
                    self.walk_stmts(else_branch, return_type);
                }
            }
        }
    }

    /// Assignment flow `source -> target`. Generic argument layers are
    /// invariant (edges both ways); array elements flow covariantly.
    fn assign(&mut self, source: &TypeWithNode, target: &TypeWithNode, label: &str) {
        self.pending
            .push(NullabilityEdge::new(source.node, target.node, 1, label));
        for (s, t) in source.args.iter().zip(&target.args) {
            let arrays = matches!(source.ty, ResolvedType::Array(_))
                && matches!(target.ty, ResolvedType::Array(_));
            if arrays {
                self.assign(s, t, label);
            } else {
                self.invariant(s, t, label);
            }
        }
    }

    fn invariant(&mut self, a: &TypeWithNode, b: &TypeWithNode, label: &str) {
        self.pending
            .push(NullabilityEdge::new(a.node, b.node, 1, label));
        self.pending
            .push(NullabilityEdge::new(b.node, a.node, 1, label));
        for (x, y) in a.args.iter().zip(&b.args) {
            self.invariant(x, y, label);
        }
    }

    /// Flow a value into a declared position, e.g. an argument into a
    /// parameter. When substitution replaced a type-parameter layer, the
    /// declaration's own occurrence node is constrained as well.
    fn flow_into_declared(
        &mut self,
        source: &TypeWithNode,
        declared: &TypeWithNode,
        subst: &Substitution,
        label: &str,
    ) {
        let substituted = declared.substitute(subst);
        self.assign(source, &substituted, label);
        if substituted.node != declared.node {
            self.pending
                .push(NullabilityEdge::new(source.node, declared.node, 1, label));
        }
    }

    /// Flow a declared position out to a fresh result node, e.g. a callee
    /// return into a call site.
    fn flow_from_declared(
        &mut self,
        declared: &TypeWithNode,
        subst: &Substitution,
        result: NodeId,
        label: &str,
    ) -> TypeWithNode {
        let substituted = declared.substitute(subst);
        self.pending
            .push(NullabilityEdge::new(substituted.node, result, 1, label));
        if substituted.node != declared.node {
            self.pending
                .push(NullabilityEdge::new(declared.node, result, 1, label));
        }
        TypeWithNode {
            ty: substituted.ty,
            node: result,
            args: substituted.args,
        }
    }

    /// Non-null dereference context. A receiver the host's flow analysis
    /// already proved non-null gets a zero-capacity edge instead of an
    /// error-sensitive one.
    fn dereference(&mut self, receiver: &Expr, twn: &TypeWithNode, what: &str) {
        if twn.node == self.ts.oblivious_node() {
            return;
        }
        match self.model.flow_state_before(receiver.id) {
            FlowState::DefinitelyNotNull => {
                self.pending.push(NullabilityEdge::new(
                    twn.node,
                    self.ts.non_null_sink(),
                    0,
                    format!("checked {what}"),
                ));
            }
            FlowState::MaybeNull | FlowState::Unknown => {
                self.pending.push(
                    NullabilityEdge::new(twn.node, self.ts.non_null_sink(), 1, what)
                        .error()
                        .at(receiver.location),
                );
            }
        }
    }

    fn oblivious_of(&self, expr: &Expr) -> TypeWithNode {
        TypeWithNode::oblivious(self.model.type_for(expr.id).clone())
    }

    fn mapped(&self, expr: &Expr) -> Option<NodeId> {
        self.ts.node_for_syntax(self.unit, expr.id)
    }

    fn subst_of(&self, receiver: &TypeWithNode) -> Substitution {
        let ResolvedType::Named { name, .. } = &receiver.ty else {
            return Substitution::new();
        };
        receiver
            .args
            .iter()
            .enumerate()
            .map(|(index, arg)| ((name.clone(), index), arg.clone()))
            .collect()
    }

    fn twn_for_type_syntax(&self, ty: &TypeSyntax) -> TypeWithNode {
        let node = self
            .ts
            .node_for_syntax(self.unit, ty.id)
            .unwrap_or_else(|| self.ts.oblivious_node());
        TypeWithNode {
            ty: self.model.type_for_syntax(ty.id).clone(),
            node,
            args: ty
                .children()
                .iter()
                .map(|child| self.twn_for_type_syntax(child))
                .collect(),
        }
    }

    fn symbol_twn(&self, symbol: SymbolId) -> Option<TypeWithNode> {
        self.ts.symbol_type(symbol).cloned()
    }

    fn expr_type(&mut self, expr: &Expr) -> TypeWithNode {
        match &expr.kind {
            ExprKind::Null => {
                let Some(node) = self.mapped(expr) else {
                    return self.oblivious_of(expr);
                };
                self.pending.push(
                    NullabilityEdge::new(self.ts.nullable_sink(), node, 1, "null literal")
                        .at(expr.location),
                );
                TypeWithNode {
                    ty: ResolvedType::Null,
                    node,
                    args: Vec::new(),
                }
            }
            ExprKind::StringLit(_) | ExprKind::IntLit(_) | ExprKind::BoolLit(_) => {
                self.oblivious_of(expr)
            }
            ExprKind::Ident(_) => {
                let Some(symbol) = self.model.symbol_for(expr.id) else {
                    return self.oblivious_of(expr);
                };
                match self.model.symbol(symbol).kind {
                    SymbolKind::Local | SymbolKind::Parameter | SymbolKind::Field => self
                        .symbol_twn(symbol)
                        .unwrap_or_else(|| self.oblivious_of(expr)),
                    SymbolKind::Class | SymbolKind::Method => self.oblivious_of(expr),
                }
            }
            ExprKind::Member {
                receiver,
                name,
                conditional,
            } => {
                let receiver_twn = self.expr_type(receiver);
                if !*conditional {
                    self.dereference(receiver, &receiver_twn, &format!("member access {name}"));
                }
                let subst = self.subst_of(&receiver_twn);
                let declared = self
                    .model
                    .symbol_for(expr.id)
                    .and_then(|s| self.symbol_twn(s));
                let (Some(declared), Some(node)) = (declared, self.mapped(expr)) else {
                    return self.oblivious_of(expr);
                };
                let result =
                    self.flow_from_declared(&declared, &subst, node, &format!("value of {name}"));
                if *conditional {
                    self.pending.push(NullabilityEdge::new(
                        self.ts.nullable_sink(),
                        node,
                        1,
                        "conditional access",
                    ));
                }
                result
            }
            ExprKind::Call {
                receiver,
                method,
                args,
                conditional,
            } => {
                let receiver_twn = receiver.as_ref().map(|r| self.expr_type(r));
                let arg_twns = args.iter().map(|a| self.expr_type(a)).collect::<Vec<_>>();
                if let (Some(receiver), Some(twn)) = (receiver, &receiver_twn) {
                    if !*conditional {
                        self.dereference(receiver, twn, &format!("call to {method}"));
                    }
                }
                let subst = receiver_twn
                    .as_ref()
                    .map(|twn| self.subst_of(twn))
                    .unwrap_or_default();
                let Some(symbol) = self.model.symbol_for(expr.id) else {
                    return self.oblivious_of(expr);
                };
                let params = self.model.symbol(symbol).params.clone();
                for (arg, param) in arg_twns.iter().zip(&params) {
                    if let Some(declared) = self.symbol_twn(*param) {
                        self.flow_into_declared(
                            arg,
                            &declared,
                            &subst,
                            &format!("argument of {method}"),
                        );
                    }
                }
                let declared_return = self.symbol_twn(symbol);
                let (Some(declared_return), Some(node)) = (declared_return, self.mapped(expr))
                else {
                    return self.oblivious_of(expr);
                };
                let result = self.flow_from_declared(
                    &declared_return,
                    &subst,
                    node,
                    &format!("return value of {method}"),
                );
                if *conditional {
                    self.pending.push(NullabilityEdge::new(
                        self.ts.nullable_sink(),
                        node,
                        1,
                        "conditional access",
                    ));
                }
                result
            }
            ExprKind::New { ty, args } => {
                let arg_twns = args.iter().map(|a| self.expr_type(a)).collect::<Vec<_>>();
                let twn = self.twn_for_type_syntax(ty);
                let subst = self.subst_of(&twn);
                if let Some(ctor) = self.model.symbol_for(expr.id) {
                    let params = self.model.symbol(ctor).params.clone();
                    for (arg, param) in arg_twns.iter().zip(&params) {
                        if let Some(declared) = self.symbol_twn(*param) {
                            self.flow_into_declared(arg, &declared, &subst, "constructor argument");
                        }
                    }
                }
                twn
            }
            ExprKind::Assign { target, value } => {
                let value_twn = self.expr_type(value);
                match &target.kind {
                    ExprKind::Ident(_) => {
                        let declared = self
                            .model
                            .symbol_for(target.id)
                            .and_then(|s| self.symbol_twn(s));
                        let Some(declared) = declared else {
                            return value_twn;
                        };
                        self.assign(&value_twn, &declared, "assignment");
                        declared
                    }
                    ExprKind::Member {
                        receiver,
                        name,
                        conditional,
                    } => {
                        let receiver_twn = self.expr_type(receiver);
                        if !*conditional {
                            self.dereference(
                                receiver,
                                &receiver_twn,
                                &format!("member access {name}"),
                            );
                        }
                        let subst = self.subst_of(&receiver_twn);
                        let declared = self
                            .model
                            .symbol_for(target.id)
                            .and_then(|s| self.symbol_twn(s));
                        let Some(declared) = declared else {
                            return value_twn;
                        };
                        self.flow_into_declared(&value_twn, &declared, &subst, "assignment");
                        declared.substitute(&subst)
                    }
                    _ => {
                        let target_twn = self.expr_type(target);
                        self.assign(&value_twn, &target_twn, "assignment");
                        target_twn
                    }
                }
            }
            ExprKind::Coalesce { left, right } => {
                let left_twn = self.expr_type(left);
                let right_twn = self.expr_type(right);
                let Some(node) = self.mapped(expr) else {
                    return right_twn;
                };
                // The construct itself keeps the left operand's null away
                // from the result.
                self.pending.push(NullabilityEdge::new(
                    left_twn.node,
                    node,
                    0,
                    "null-coalescing left operand",
                ));
                self.pending.push(NullabilityEdge::new(
                    right_twn.node,
                    node,
                    1,
                    "null-coalescing right operand",
                ));
                let args = if right_twn.args.is_empty() {
                    left_twn.args
                } else {
                    right_twn.args
                };
                TypeWithNode {
                    ty: self.model.type_for(expr.id).clone(),
                    node,
                    args,
                }
            }
            ExprKind::NotNull(inner) => {
                let inner_twn = self.expr_type(inner);
                let Some(node) = self.mapped(expr) else {
                    return inner_twn;
                };
                if inner_twn.node != self.ts.oblivious_node() {
                    self.pending.push(
                        NullabilityEdge::new(
                            inner_twn.node,
                            self.ts.non_null_sink(),
                            1,
                            "null-forgiving operator",
                        )
                        .error()
                        .at(expr.location),
                    );
                }
                self.pending.push(NullabilityEdge::new(
                    inner_twn.node,
                    node,
                    0,
                    "suppressed value",
                ));
                TypeWithNode {
                    ty: inner_twn.ty,
                    node,
                    args: inner_twn.args,
                }
            }
            ExprKind::Equality { left, right, .. } => {
                self.expr_type(left);
                self.expr_type(right);
                self.oblivious_of(expr)
            }
        }
    }
}

fn stmts_assign(model: &SemanticModel, stmts: &[Stmt], field: SymbolId) -> bool {
    stmts.iter().any(|stmt| match stmt {
        Stmt::Local(local) => local
            .initializer
            .as_ref()
            .is_some_and(|e| expr_assigns(model, e, field)),
        Stmt::Expr(expr) => expr_assigns(model, expr, field),
        Stmt::Return { value, .. } => value
            .as_ref()
            .is_some_and(|e| expr_assigns(model, e, field)),
        Stmt::If {
            condition,
            then_branch,
            else_branch,
        } => {
            expr_assigns(model, condition, field)
                || stmts_assign(model, then_branch, field)
                || stmts_assign(model, else_branch, field)
        }
    })
}

fn expr_assigns(model: &SemanticModel, expr: &Expr, field: SymbolId) -> bool {
    match &expr.kind {
        ExprKind::Assign { target, value } => {
            model.symbol_for(target.id) == Some(field)
                || expr_assigns(model, target, field)
                || expr_assigns(model, value, field)
        }
        ExprKind::Member { receiver, .. } | ExprKind::NotNull(receiver) => {
            expr_assigns(model, receiver, field)
        }
        ExprKind::Call { receiver, args, .. } => {
            receiver
                .as_ref()
                .is_some_and(|r| expr_assigns(model, r, field))
                || args.iter().any(|a| expr_assigns(model, a, field))
        }
        ExprKind::New { args, .. } => args.iter().any(|a| expr_assigns(model, a, field)),
        ExprKind::Coalesce { left, right } | ExprKind::Equality { left, right, .. } => {
            expr_assigns(model, left, field) || expr_assigns(model, right, field)
        }
        ExprKind::Null
        | ExprKind::StringLit(_)
        | ExprKind::IntLit(_)
        | ExprKind::BoolLit(_)
        | ExprKind::Ident(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::bind;
    use crate::node_builder::build_nodes;
    use crate::parse::parse_compilation;
    use crate::syntax::Compilation;

    fn graph_for(text: &str) -> (Compilation, SemanticModel, TypeSystem) {
        let compilation = parse_compilation(&[("test.cs", text)]).expect("parse");
        let model = bind(&compilation);
        let mut ts = TypeSystem::new(compilation.units.len());
        for (unit, tu) in compilation.units.iter().enumerate() {
            ts.merge_nodes(build_nodes(unit, tu, &model));
        }
        ts.synthesize_external_symbols(&model);
        for (unit, tu) in compilation.units.iter().enumerate() {
            let pending = build_edges(unit, tu, &model, &ts);
            ts.merge_edges(pending);
        }
        (compilation, model, ts)
    }

    fn param_node(ts: &TypeSystem, compilation: &Compilation, class: usize, method: usize) -> NodeId {
        let param = &compilation.units[0].classes[class].methods[method].params[0];
        ts.node_for_syntax(0, param.ty.id).expect("param node")
    }

    fn return_node(ts: &TypeSystem, compilation: &Compilation, class: usize, method: usize) -> NodeId {
        let ret = &compilation.units[0].classes[class].methods[method].return_type;
        ts.node_for_syntax(0, ret.id).expect("return node")
    }

    #[test]
    fn identity_method_connects_parameter_to_return() {
        let (compilation, _, ts) = graph_for("class C { static string Id(string x) => x; }");
        let param = param_node(&ts, &compilation, 0, 0);
        let ret = return_node(&ts, &compilation, 0, 0);
        assert!(ts.path_exists(param, ret));
        assert!(!ts.path_exists(ret, param));
    }

    #[test]
    fn null_literal_connects_the_nullable_sink() {
        let (compilation, _, ts) =
            graph_for("class C { static void M() { string s = null; } }");
        let method = &compilation.units[0].classes[0].methods[0];
        let Stmt::Local(local) = &method.body[0] else {
            panic!("expected local");
        };
        let ty = local.ty.as_ref().expect("written type");
        let local_node = ts.node_for_syntax(0, ty.id).expect("local node");
        assert!(ts.path_exists(ts.nullable_sink(), local_node));
    }

    #[test]
    fn unchecked_dereference_emits_an_error_edge() {
        let (compilation, _, ts) =
            graph_for("class C { static int M(string s) => s.Length; }");
        let param = param_node(&ts, &compilation, 0, 0);
        let edge = ts
            .all_edges()
            .find(|e| e.source == param && e.target == ts.non_null_sink())
            .expect("dereference edge");
        assert!(edge.is_error);
        assert_eq!(edge.capacity, 1);
    }

    #[test]
    fn checked_dereference_is_protected_instead_of_error() {
        let (compilation, _, ts) = graph_for(
            "class C { static int M(string s) { if (s == null) return 0; return s.Length; } }",
        );
        let param = param_node(&ts, &compilation, 0, 0);
        let edge = ts
            .all_edges()
            .find(|e| e.source == param && e.target == ts.non_null_sink())
            .expect("protected edge");
        assert!(!edge.is_error);
        assert_eq!(edge.capacity, 0);
    }

    #[test]
    fn coalesce_left_operand_cannot_carry_flow() {
        let (compilation, _, ts) =
            graph_for("class C { static string M(string x) => x ?? \"\"; }");
        let param = param_node(&ts, &compilation, 0, 0);
        let ret = return_node(&ts, &compilation, 0, 0);
        assert!(!ts.path_exists(param, ret));
    }

    #[test]
    fn explicit_annotation_feeds_an_uncuttable_edge() {
        let (compilation, _, ts) = graph_for("class C { static void M(string? x) { } }");
        let param = param_node(&ts, &compilation, 0, 0);
        let edge = ts
            .all_edges()
            .find(|e| e.source == ts.nullable_sink() && e.target == param)
            .expect("pre-label edge");
        assert_eq!(edge.capacity, INFINITE_CAPACITY);
    }

    #[test]
    fn uninitialized_reference_field_becomes_null_fed() {
        let (compilation, model, ts) =
            graph_for("class C { string f; } class D { string g; public D(string s) { g = s; } }");
        let f = &compilation.units[0].classes[0].fields[0];
        let f_node = ts
            .symbol_type(model.symbol_for(f.id).expect("field symbol"))
            .expect("field type")
            .node;
        assert!(ts.path_exists(ts.nullable_sink(), f_node));

        let g = &compilation.units[0].classes[1].fields[0];
        let g_node = ts
            .symbol_type(model.symbol_for(g.id).expect("field symbol"))
            .expect("field type")
            .node;
        let direct = ts
            .all_edges()
            .any(|e| e.source == ts.nullable_sink() && e.target == g_node);
        assert!(!direct, "constructor-assigned field must not be null-fed");
    }

    #[test]
    fn override_unifies_parameter_nodes() {
        let (compilation, _, ts) = graph_for(
            "class Base { string M(string x) => x; } \
             class Derived : Base { string M(string x) => x; }",
        );
        let base_param = param_node(&ts, &compilation, 0, 0);
        let derived_param = param_node(&ts, &compilation, 1, 0);
        assert_eq!(ts.representative(base_param), ts.representative(derived_param));
        assert!(ts.path_exists(base_param, derived_param));
        assert!(ts.path_exists(derived_param, base_param));
    }

    #[test]
    fn generic_substitution_routes_field_flow_to_the_call_site() {
        let (compilation, _, ts) = graph_for(
            "class Box<T> { T v; T Get() => v; } \
             class P { static void Main() { var b = new Box<string>(); b.Get().ToString(); } }",
        );
        let box_class = &compilation.units[0].classes[0];
        let v_node = ts
            .node_for_syntax(0, box_class.fields[0].ty.id)
            .expect("field node");
        assert!(ts.path_exists(v_node, ts.non_null_sink()));
        assert!(ts.path_exists(ts.nullable_sink(), ts.non_null_sink()));
    }
}
