use std::fmt::Write;

use crate::graph::{NullType, TypeSystem};
use crate::syntax::{
    ClassDecl, Compilation, Expr, ExprKind, FieldDecl, LocalDecl, MethodDecl, Stmt,
    TranslationUnit, TypeSyntax, TypeSyntaxKind, CONSTRUCTOR_NAME,
};

/// Normalise a compilation so every reference-capable type syntax carries a
/// `?`. The added markers are synthesized: they carry no user intent and do
/// not pre-label anything, which is what keeps inference free to remove them.
pub fn make_all_reference_types_nullable(compilation: &Compilation) -> Compilation {
    let mut normalised = compilation.clone();
    for tu in &mut normalised.units {
        for class in &mut tu.classes {
            visit_class_types(class, &mut |ty| {
                if is_value_keyword(ty) {
                    return;
                }
                ty.nullable = true;
                ty.synthesized = true;
            });
        }
    }
    normalised
}

/// Rewrite one unit so each mapped type syntax is written `T?` iff its node
/// was labelled nullable. Oblivious positions keep whatever they had.
pub fn rewrite_with_annotations(
    unit: usize,
    tu: &TranslationUnit,
    ts: &TypeSystem,
) -> TranslationUnit {
    let mut rewritten = tu.clone();
    for class in &mut rewritten.classes {
        visit_class_types(class, &mut |ty| {
            let Some(node) = ts.node_for_syntax(unit, ty.id) else {
                return;
            };
            match ts.node(node).null_type {
                NullType::Nullable => {
                    ty.nullable = true;
                    ty.synthesized = false;
                }
                NullType::NonNull => {
                    ty.nullable = false;
                    ty.synthesized = false;
                }
                NullType::Oblivious | NullType::Infer => {}
            }
        });
    }
    rewritten
}

fn is_value_keyword(ty: &TypeSyntax) -> bool {
    match &ty.kind {
        TypeSyntaxKind::Named { name, .. } => {
            matches!(name.as_str(), "int" | "bool" | "void")
        }
        TypeSyntaxKind::Array(_) => false,
    }
}

fn visit_class_types(class: &mut ClassDecl, visit: &mut impl FnMut(&mut TypeSyntax)) {
    for base in &mut class.bases {
        visit_type(base, visit);
    }
    for field in &mut class.fields {
        visit_type(&mut field.ty, visit);
        if let Some(init) = &mut field.initializer {
            visit_expr_types(init, visit);
        }
    }
    for method in &mut class.methods {
        visit_type(&mut method.return_type, visit);
        for param in &mut method.params {
            visit_type(&mut param.ty, visit);
        }
        visit_stmt_types(&mut method.body, visit);
    }
}

fn visit_type(ty: &mut TypeSyntax, visit: &mut impl FnMut(&mut TypeSyntax)) {
    visit(ty);
    match &mut ty.kind {
        TypeSyntaxKind::Named { args, .. } => {
            for arg in args {
                visit_type(arg, visit);
            }
        }
        TypeSyntaxKind::Array(elem) => visit_type(elem, visit),
    }
}

fn visit_stmt_types(stmts: &mut [Stmt], visit: &mut impl FnMut(&mut TypeSyntax)) {
    for stmt in stmts {
        match stmt {
            Stmt::Local(local) => {
                if let Some(ty) = &mut local.ty {
                    visit_type(ty, visit);
                }
                if let Some(init) = &mut local.initializer {
                    visit_expr_types(init, visit);
                }
            }
            Stmt::Expr(expr) => visit_expr_types(expr, visit),
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    visit_expr_types(value, visit);
                }
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                visit_expr_types(condition, visit);
                visit_stmt_types(then_branch, visit);
                visit_stmt_types(else_branch, visit);
            }
        }
    }
}

fn visit_expr_types(expr: &mut Expr, visit: &mut impl FnMut(&mut TypeSyntax)) {
    match &mut expr.kind {
        ExprKind::New { ty, args } => {
            visit_type(ty, visit);
            for arg in args {
                visit_expr_types(arg, visit);
            }
        }
        ExprKind::Member { receiver, .. } | ExprKind::NotNull(receiver) => {
            visit_expr_types(receiver, visit);
        }
        ExprKind::Call { receiver, args, .. } => {
            if let Some(receiver) = receiver {
                visit_expr_types(receiver, visit);
            }
            for arg in args {
                visit_expr_types(arg, visit);
            }
        }
        ExprKind::Assign { target, value } => {
            visit_expr_types(target, visit);
            visit_expr_types(value, visit);
        }
        ExprKind::Coalesce { left, right } | ExprKind::Equality { left, right, .. } => {
            visit_expr_types(left, visit);
            visit_expr_types(right, visit);
        }
        ExprKind::Null
        | ExprKind::StringLit(_)
        | ExprKind::IntLit(_)
        | ExprKind::BoolLit(_)
        | ExprKind::Ident(_) => {}
    }
}

/// Render a unit back to source text. Stable output: two runs over the same
/// tree produce identical text, and the result parses back to the same tree
/// shape, which is what the round-trip tests compare.
pub fn render(tu: &TranslationUnit) -> String {
    let mut out = String::new();
    for class in &tu.classes {
        render_class(&mut out, class);
    }
    out
}

fn render_class(out: &mut String, class: &ClassDecl) {
    let _ = write!(out, "class {}", class.name);
    if !class.type_params.is_empty() {
        let _ = write!(out, "<{}>", class.type_params.join(", "));
    }
    if !class.bases.is_empty() {
        let bases = class
            .bases
            .iter()
            .map(type_text)
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(out, " : {bases}");
    }
    out.push_str(" {\n");
    for field in &class.fields {
        render_field(out, field);
    }
    for method in &class.methods {
        render_method(out, class, method);
    }
    out.push_str("}\n");
}

fn render_field(out: &mut String, field: &FieldDecl) {
    let _ = write!(out, "    {} {}", type_text(&field.ty), field.name);
    if let Some(init) = &field.initializer {
        let _ = write!(out, " = {}", expr_text(init, 0));
    }
    out.push_str(";\n");
}

fn render_method(out: &mut String, class: &ClassDecl, method: &MethodDecl) {
    let params = method
        .params
        .iter()
        .map(|p| format!("{} {}", type_text(&p.ty), p.name))
        .collect::<Vec<_>>()
        .join(", ");
    if method.name == CONSTRUCTOR_NAME {
        let _ = write!(out, "    {}({params})", class.name);
    } else {
        let modifier = if method.is_static { "static " } else { "" };
        let _ = write!(
            out,
            "    {modifier}{} {}({params})",
            type_text(&method.return_type),
            method.name
        );
    }
    out.push_str(" {\n");
    render_stmts(out, &method.body, 2);
    out.push_str("    }\n");
}

fn render_stmts(out: &mut String, stmts: &[Stmt], depth: usize) {
    let indent = "    ".repeat(depth);
    for stmt in stmts {
        match stmt {
            Stmt::Local(local) => render_local(out, local, &indent),
            Stmt::Expr(expr) => {
                let _ = writeln!(out, "{indent}{};", expr_text(expr, 0));
            }
            Stmt::Return { value, .. } => match value {
                Some(value) => {
                    let _ = writeln!(out, "{indent}return {};", expr_text(value, 0));
                }
                None => {
                    let _ = writeln!(out, "{indent}return;");
                }
            },
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let _ = writeln!(out, "{indent}if ({}) {{", expr_text(condition, 0));
                render_stmts(out, then_branch, depth + 1);
                if else_branch.is_empty() {
                    let _ = writeln!(out, "{indent}}}");
                } else {
                    let _ = writeln!(out, "{indent}}} else {{");
                    render_stmts(out, else_branch, depth + 1);
                    let _ = writeln!(out, "{indent}}}");
                }
            }
        }
    }
}

fn render_local(out: &mut String, local: &LocalDecl, indent: &str) {
    match &local.ty {
        Some(ty) => {
            let _ = write!(out, "{indent}{} {}", type_text(ty), local.name);
        }
        None => {
            let _ = write!(out, "{indent}var {}", local.name);
        }
    }
    if let Some(init) = &local.initializer {
        let _ = write!(out, " = {}", expr_text(init, 0));
    }
    out.push_str(";\n");
}

fn type_text(ty: &TypeSyntax) -> String {
    let mut text = match &ty.kind {
        TypeSyntaxKind::Named { name, args } => {
            if args.is_empty() {
                name.clone()
            } else {
                let args = args.iter().map(type_text).collect::<Vec<_>>().join(", ");
                format!("{name}<{args}>")
            }
        }
        TypeSyntaxKind::Array(elem) => format!("{}[]", type_text(elem)),
    };
    if ty.nullable {
        text.push('?');
    }
    text
}

/// Precedence levels: 0 assignment, 1 coalescing, 2 equality, 3 postfix.
fn expr_text(expr: &Expr, min_level: u8) -> String {
    let (text, level) = match &expr.kind {
        ExprKind::Null => ("null".to_string(), 3),
        ExprKind::StringLit(value) => (format!("\"{value}\""), 3),
        ExprKind::IntLit(value) => (value.to_string(), 3),
        ExprKind::BoolLit(value) => (value.to_string(), 3),
        ExprKind::Ident(name) => (name.clone(), 3),
        ExprKind::Member {
            receiver,
            name,
            conditional,
        } => {
            let op = if *conditional { "?." } else { "." };
            (format!("{}{op}{name}", expr_text(receiver, 3)), 3)
        }
        ExprKind::Call {
            receiver,
            method,
            args,
            conditional,
        } => {
            let args = args
                .iter()
                .map(|a| expr_text(a, 0))
                .collect::<Vec<_>>()
                .join(", ");
            let text = match receiver {
                Some(receiver) => {
                    let op = if *conditional { "?." } else { "." };
                    format!("{}{op}{method}({args})", expr_text(receiver, 3))
                }
                None => format!("{method}({args})"),
            };
            (text, 3)
        }
        ExprKind::New { ty, args } => {
            let args = args
                .iter()
                .map(|a| expr_text(a, 0))
                .collect::<Vec<_>>()
                .join(", ");
            (format!("new {}({args})", type_text(ty)), 3)
        }
        ExprKind::NotNull(inner) => (format!("{}!", expr_text(inner, 3)), 3),
        ExprKind::Equality {
            left,
            right,
            negated,
        } => {
            let op = if *negated { "!=" } else { "==" };
            (
                format!("{} {op} {}", expr_text(left, 3), expr_text(right, 3)),
                2,
            )
        }
        ExprKind::Coalesce { left, right } => (
            format!("{} ?? {}", expr_text(left, 2), expr_text(right, 1)),
            1,
        ),
        ExprKind::Assign { target, value } => (
            format!("{} = {}", expr_text(target, 1), expr_text(value, 0)),
            0,
        ),
    };
    if level < min_level {
        format!("({text})")
    } else {
        text
    }
}
