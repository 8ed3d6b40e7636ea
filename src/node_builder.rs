use crate::graph::{Builder, TypeWithNode};
use crate::semantic::{ResolvedType, SemanticModel};
use crate::syntax::{Expr, ExprKind, LocalDecl, MethodDecl, Stmt, TranslationUnit, TypeSyntax};

/// First pass over one translation unit: create a nullability node for every
/// reference-capable position, register declared symbol types and record the
/// syntax-to-node mapping. No edges are produced here.
pub fn build_nodes(unit: usize, tu: &TranslationUnit, model: &SemanticModel) -> Builder {
    let mut walker = NodeWalker {
        model,
        builder: Builder::new(unit),
    };
    for class in &tu.classes {
        walker.walk_class(class);
    }
    walker.builder
}

struct NodeWalker<'a> {
    model: &'a SemanticModel,
    builder: Builder,
}

impl NodeWalker<'_> {
    fn walk_class(&mut self, class: &crate::syntax::ClassDecl) {
        for base in &class.bases {
            self.type_with_node(base, &format!("base of {}", class.name));
        }
        for field in &class.fields {
            let ty = self.type_with_node(&field.ty, &format!("{}.{}", class.name, field.name));
            self.register_declared(field.id, ty);
            if let Some(init) = &field.initializer {
                self.walk_expr(init);
            }
        }
        for method in &class.methods {
            self.walk_method(class, method);
        }
    }

    fn walk_method(&mut self, class: &crate::syntax::ClassDecl, method: &MethodDecl) {
        let display = format!("{}.{}", class.name, method.name);
        let return_type = self.type_with_node(&method.return_type, &format!("return of {display}"));
        self.register_declared(method.id, return_type);
        for param in &method.params {
            let ty = self.type_with_node(&param.ty, &format!("parameter {} of {display}", param.name));
            if ty.node != self.builder.oblivious() {
                self.builder.mark_input_position(ty.node);
            }
            self.register_declared(param.id, ty);
        }
        self.walk_stmts(&method.body);
    }

    fn register_declared(&mut self, syntax: crate::syntax::SyntaxId, ty: TypeWithNode) {
        if let Some(symbol) = self.model.symbol_for(syntax) {
            self.builder.register_symbol(symbol, ty);
        }
    }

    fn walk_stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            match stmt {
                Stmt::Local(local) => self.walk_local(local),
                Stmt::Expr(expr) => self.walk_expr(expr),
                Stmt::Return { value, .. } => {
                    if let Some(value) = value {
                        self.walk_expr(value);
                    }
                }
                Stmt::If {
                    condition,
                    then_branch,
                    else_branch,
                } => {
                    self.walk_expr(condition);
                    self.walk_stmts(then_branch);
                    self.walk_stmts(else_branch);
                }
            }
        }
    }

    fn walk_local(&mut self, local: &LocalDecl) {
        if let Some(init) = &local.initializer {
            self.walk_expr(init);
        }
        let ty = match &local.ty {
            Some(ty) => {
                let twn = self.type_with_node(ty, &format!("local {}", local.name));
                self.builder.map_syntax(local.id, twn.node);
                twn
            }
            None => {
                // `var`: no written type, so the layers get fresh nodes shaped
                // by the initializer's resolved type.
                let symbol = self.model.symbol_for(local.id);
                let resolved = symbol
                    .map(|s| self.model.symbol(s).declared_type.clone())
                    .unwrap_or(ResolvedType::Error);
                let twn = self.fresh_type(&resolved, &format!("local {}", local.name), local);
                self.builder.map_syntax(local.id, twn.node);
                twn
            }
        };
        self.register_declared(local.id, ty);
    }

    /// Build the node layers for a written type. Value-typed layers share the
    /// oblivious singleton; a user-written `?` is recorded for pre-labeling.
    fn type_with_node(&mut self, ty: &TypeSyntax, name: &str) -> TypeWithNode {
        let resolved = self.model.type_for_syntax(ty.id).clone();
        let node = if self.model.can_be_made_nullable(&resolved) {
            let node = self.builder.new_node(Some(ty.location), name);
            if ty.nullable && !ty.synthesized {
                self.builder.mark_explicit_nullable(node);
            }
            node
        } else {
            self.builder.oblivious()
        };
        self.builder.map_syntax(ty.id, node);
        let args = ty
            .children()
            .iter()
            .map(|child| self.type_with_node(child, name))
            .collect();
        TypeWithNode {
            ty: resolved,
            node,
            args,
        }
    }

    fn fresh_type(&mut self, ty: &ResolvedType, name: &str, local: &LocalDecl) -> TypeWithNode {
        let node = if self.model.can_be_made_nullable(ty) {
            self.builder.new_node(Some(local.location), name)
        } else {
            self.builder.oblivious()
        };
        let args = ty
            .args()
            .iter()
            .map(|arg| self.fresh_type(arg, name, local))
            .collect();
        TypeWithNode {
            ty: ty.clone(),
            node,
            args,
        }
    }

    /// Value-producing expressions get result nodes here so that the edge
    /// pass runs against a fully published, read-only node graph.
    fn walk_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Null => {
                let node = self.builder.new_node(Some(expr.location), "null literal");
                self.builder.map_syntax(expr.id, node);
            }
            ExprKind::Member { receiver, name, .. } => {
                self.walk_expr(receiver);
                self.map_result_node(expr, &format!("member {name}"));
            }
            ExprKind::Call {
                receiver,
                method,
                args,
                ..
            } => {
                if let Some(receiver) = receiver {
                    self.walk_expr(receiver);
                }
                for arg in args {
                    self.walk_expr(arg);
                }
                self.map_result_node(expr, &format!("call {method}"));
            }
            ExprKind::New { ty, args } => {
                for arg in args {
                    self.walk_expr(arg);
                }
                let twn = self.type_with_node(ty, "object creation");
                self.builder.map_syntax(expr.id, twn.node);
            }
            ExprKind::Assign { target, value } => {
                self.walk_expr(target);
                self.walk_expr(value);
            }
            ExprKind::Coalesce { left, right } => {
                self.walk_expr(left);
                self.walk_expr(right);
                self.map_result_node(expr, "null-coalescing result");
            }
            ExprKind::NotNull(inner) => {
                self.walk_expr(inner);
                self.map_result_node(expr, "null-forgiving result");
            }
            ExprKind::Equality { left, right, .. } => {
                self.walk_expr(left);
                self.walk_expr(right);
            }
            ExprKind::Ident(_)
            | ExprKind::StringLit(_)
            | ExprKind::IntLit(_)
            | ExprKind::BoolLit(_) => {}
        }
    }

    fn map_result_node(&mut self, expr: &Expr, name: &str) {
        let ty = self.model.type_for(expr.id);
        if self.model.can_be_made_nullable(ty) {
            let node = self.builder.new_node(Some(expr.location), name);
            self.builder.map_syntax(expr.id, node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::bind;
    use crate::graph::TypeSystem;
    use crate::parse::parse_compilation;
    use crate::syntax::Compilation;

    fn build_one(text: &str) -> (Compilation, SemanticModel, TypeSystem) {
        let compilation = parse_compilation(&[("test.cs", text)]).expect("parse");
        let model = bind(&compilation);
        let mut ts = TypeSystem::new(compilation.units.len());
        for (unit, tu) in compilation.units.iter().enumerate() {
            let built = build_nodes(unit, tu, &model);
            ts.merge_nodes(built);
        }
        ts.synthesize_external_symbols(&model);
        (compilation, model, ts)
    }

    #[test]
    fn value_typed_positions_share_the_oblivious_node() {
        let (compilation, _, ts) = build_one("class C { static int Add(int a, int b) => a; }");
        let method = &compilation.units[0].classes[0].methods[0];
        let node = ts
            .node_for_syntax(0, method.return_type.id)
            .expect("mapped return");
        assert_eq!(node, ts.oblivious_node());
        assert!(ts.nodes_in_input_positions().is_empty());
    }

    #[test]
    fn parameters_are_registered_as_input_positions() {
        let (compilation, model, ts) = build_one("class C { static string Id(string x) => x; }");
        let method = &compilation.units[0].classes[0].methods[0];
        let param = &method.params[0];
        let node = ts.node_for_syntax(0, param.ty.id).expect("mapped param");
        assert_eq!(ts.nodes_in_input_positions(), &[node]);
        let symbol = model.symbol_for(param.id).expect("param symbol");
        assert_eq!(ts.symbol_type(symbol).expect("registered").node, node);
    }

    #[test]
    fn generic_type_arguments_get_their_own_layer_nodes() {
        let (compilation, model, ts) =
            build_one("class Box<T> { T v; } class C { Box<string> b; }");
        let field = &compilation.units[0].classes[1].fields[0];
        let symbol = model.symbol_for(field.id).expect("field symbol");
        let twn = ts.symbol_type(symbol).expect("registered");
        assert_ne!(twn.node, ts.oblivious_node());
        assert_eq!(twn.args.len(), 1);
        assert_ne!(twn.args[0].node, ts.oblivious_node());
        assert_ne!(twn.args[0].node, twn.node);
    }

    #[test]
    fn user_written_nullable_is_recorded_for_pre_labeling() {
        let (compilation, _, ts) = build_one("class C { string? f; }");
        let field = &compilation.units[0].classes[0].fields[0];
        let node = ts.node_for_syntax(0, field.ty.id).expect("mapped field");
        assert_eq!(ts.explicit_nullable(0), &[node]);
    }

    #[test]
    fn external_symbols_get_synthesized_types() {
        let (_, model, ts) = build_one("class C { static string M(object o) => o.ToString(); }");
        let to_string = model
            .symbols()
            .find(|s| s.name == "object.ToString")
            .map(|s| s.id)
            .expect("builtin symbol");
        let twn = ts.symbol_type(to_string).expect("synthesized");
        assert_ne!(twn.node, ts.oblivious_node());
        // Memoised: repeated lookups return the identical node.
        let again = ts.symbol_type(to_string).expect("synthesized");
        assert_eq!(again.node, twn.node);
    }
}
