use std::collections::{BTreeMap, BTreeSet};

use crate::semantic::{
    Declaration, FlowState, ResolvedType, SemanticModel, SymbolId, SymbolInfo, SymbolKind,
    ValueKind,
};
use crate::syntax::{
    ClassDecl, Compilation, Expr, ExprKind, Location, MethodDecl, Stmt, TypeSyntax, TypeSyntaxKind,
};

/// Build the semantic model for a compilation.
///
/// Binding never fails: unresolved names produce `ResolvedType::Error`
/// positions, which the inference engine treats as oblivious.
pub fn bind(compilation: &Compilation) -> SemanticModel {
    let mut binder = Binder {
        compilation,
        model: SemanticModel::default(),
        classes: BTreeMap::new(),
        to_string_method: SymbolId(0),
        string_length_field: SymbolId(0),
    };
    binder.declare_builtins();
    binder.index_classes();
    binder.declare_members();
    binder.resolve_overrides();
    binder.bind_bodies();
    binder.model
}

struct Binder<'a> {
    compilation: &'a Compilation,
    model: SemanticModel,
    classes: BTreeMap<String, ClassEntry>,
    to_string_method: SymbolId,
    string_length_field: SymbolId,
}

struct ClassEntry {
    symbol: SymbolId,
    unit: usize,
    type_params: Vec<String>,
    bases: Vec<ResolvedType>,
    fields: BTreeMap<String, SymbolId>,
    methods: BTreeMap<String, Vec<SymbolId>>,
    constructors: Vec<SymbolId>,
}

/// Accumulated type-parameter substitution, keyed by declaring class.
type Substitution = BTreeMap<(String, usize), ResolvedType>;

fn substitute(ty: &ResolvedType, subst: &Substitution) -> ResolvedType {
    match ty {
        ResolvedType::TypeParam { owner, index, .. } => subst
            .get(&(owner.clone(), *index))
            .cloned()
            .unwrap_or_else(|| ty.clone()),
        ResolvedType::Named { name, args } => ResolvedType::Named {
            name: name.clone(),
            args: args.iter().map(|a| substitute(a, subst)).collect(),
        },
        ResolvedType::Array(elem) => ResolvedType::Array(Box::new(substitute(elem, subst))),
        other => other.clone(),
    }
}

impl Binder<'_> {
    fn intern(&mut self, info: SymbolInfo) -> SymbolId {
        let id = SymbolId(self.model.symbols.len() as u32);
        let mut info = info;
        info.id = id;
        self.model.symbols.push(info);
        id
    }

    fn declare_builtins(&mut self) {
        self.to_string_method = self.intern(SymbolInfo {
            id: SymbolId(0),
            kind: SymbolKind::Method,
            name: "object.ToString".to_string(),
            container: Some("object".to_string()),
            declared_type: ResolvedType::Named {
                name: "string".to_string(),
                args: Vec::new(),
            },
            params: Vec::new(),
            is_static: false,
            declaration: None,
            location: Location::default(),
        });
        self.string_length_field = self.intern(SymbolInfo {
            id: SymbolId(0),
            kind: SymbolKind::Field,
            name: "string.Length".to_string(),
            container: Some("string".to_string()),
            declared_type: ResolvedType::Value(ValueKind::Int),
            params: Vec::new(),
            is_static: false,
            declaration: None,
            location: Location::default(),
        });
    }

    fn index_classes(&mut self) {
        let compilation = self.compilation;
        for (unit, tu) in compilation.units.iter().enumerate() {
            for class in &tu.classes {
                if self.classes.contains_key(&class.name) {
                    continue;
                }
                let symbol = self.intern(SymbolInfo {
                    id: SymbolId(0),
                    kind: SymbolKind::Class,
                    name: class.name.clone(),
                    container: None,
                    declared_type: ResolvedType::Named {
                        name: class.name.clone(),
                        args: Vec::new(),
                    },
                    params: Vec::new(),
                    is_static: false,
                    declaration: Some(Declaration {
                        unit,
                        type_syntax: None,
                        syntax: class.id,
                    }),
                    location: class.location,
                });
                self.model.symbol_of_syntax.insert(class.id, symbol);
                self.classes.insert(
                    class.name.clone(),
                    ClassEntry {
                        symbol,
                        unit,
                        type_params: class.type_params.clone(),
                        bases: Vec::new(),
                        fields: BTreeMap::new(),
                        methods: BTreeMap::new(),
                        constructors: Vec::new(),
                    },
                );
            }
        }
    }

    /// Resolve a type syntax and record the resolution for every visited
    /// node; the node builder later reads it back per syntax identity.
    fn resolve_type(&mut self, ty: &TypeSyntax, type_params: &[String], owner: &str) -> ResolvedType {
        let resolved = match &ty.kind {
            TypeSyntaxKind::Named { name, args } => match name.as_str() {
                "int" => ResolvedType::Value(ValueKind::Int),
                "bool" => ResolvedType::Value(ValueKind::Bool),
                "void" => ResolvedType::Void,
                _ => {
                    if let Some(index) = type_params.iter().position(|p| p == name) {
                        ResolvedType::TypeParam {
                            owner: owner.to_string(),
                            index,
                            name: name.clone(),
                        }
                    } else if self.classes.contains_key(name)
                        || name == "string"
                        || name == "object"
                    {
                        ResolvedType::Named {
                            name: name.clone(),
                            args: args
                                .iter()
                                .map(|a| self.resolve_type(a, type_params, owner))
                                .collect(),
                        }
                    } else {
                        ResolvedType::Error
                    }
                }
            },
            TypeSyntaxKind::Array(elem) => {
                ResolvedType::Array(Box::new(self.resolve_type(elem, type_params, owner)))
            }
        };
        self.model
            .type_syntax_types
            .insert(ty.id, resolved.clone());
        resolved
    }

    fn declare_members(&mut self) {
        let compilation = self.compilation;
        for (unit, tu) in compilation.units.iter().enumerate() {
            for class in &tu.classes {
                if self.classes[&class.name].unit != unit {
                    continue;
                }
                self.declare_class_members(unit, class);
            }
        }
    }

    fn declare_class_members(&mut self, unit: usize, class: &ClassDecl) {
        let type_params = class.type_params.clone();
        let bases = class
            .bases
            .iter()
            .map(|b| self.resolve_type(b, &type_params, &class.name))
            .collect::<Vec<_>>();
        self.classes.get_mut(&class.name).expect("indexed class").bases = bases;

        for field in &class.fields {
            let declared_type = self.resolve_type(&field.ty, &type_params, &class.name);
            let symbol = self.intern(SymbolInfo {
                id: SymbolId(0),
                kind: SymbolKind::Field,
                name: format!("{}.{}", class.name, field.name),
                container: Some(class.name.clone()),
                declared_type,
                params: Vec::new(),
                is_static: false,
                declaration: Some(Declaration {
                    unit,
                    type_syntax: Some(field.ty.id),
                    syntax: field.id,
                }),
                location: field.location,
            });
            self.model.symbol_of_syntax.insert(field.id, symbol);
            let entry = self.classes.get_mut(&class.name).expect("indexed class");
            entry.fields.insert(field.name.clone(), symbol);
        }

        for method in &class.methods {
            let display = format!("{}.{}", class.name, method.name);
            let return_type = self.resolve_type(&method.return_type, &type_params, &class.name);
            let mut params = Vec::with_capacity(method.params.len());
            for param in &method.params {
                let declared_type = self.resolve_type(&param.ty, &type_params, &class.name);
                let symbol = self.intern(SymbolInfo {
                    id: SymbolId(0),
                    kind: SymbolKind::Parameter,
                    name: format!("{display}#{}", param.name),
                    container: Some(class.name.clone()),
                    declared_type,
                    params: Vec::new(),
                    is_static: false,
                    declaration: Some(Declaration {
                        unit,
                        type_syntax: Some(param.ty.id),
                        syntax: param.id,
                    }),
                    location: param.location,
                });
                self.model.symbol_of_syntax.insert(param.id, symbol);
                params.push(symbol);
            }
            let symbol = self.intern(SymbolInfo {
                id: SymbolId(0),
                kind: SymbolKind::Method,
                name: display,
                container: Some(class.name.clone()),
                declared_type: return_type,
                params,
                is_static: method.is_static,
                declaration: Some(Declaration {
                    unit,
                    type_syntax: Some(method.return_type.id),
                    syntax: method.id,
                }),
                location: method.location,
            });
            self.model.symbol_of_syntax.insert(method.id, symbol);
            let entry = self.classes.get_mut(&class.name).expect("indexed class");
            if method.is_constructor() {
                entry.constructors.push(symbol);
            } else {
                entry.methods.entry(method.name.clone()).or_default().push(symbol);
            }
        }
    }

    /// Pair each method with the base member it overrides, matching by name
    /// and arity along the base-class and interface chain.
    fn resolve_overrides(&mut self) {
        let mut found = Vec::new();
        for entry in self.classes.values() {
            for overloads in entry.methods.values() {
                for &method in overloads {
                    let info = self.model.symbol(method);
                    if info.is_static {
                        continue;
                    }
                    let arity = info.params.len();
                    let name = info
                        .name
                        .rsplit('.')
                        .next()
                        .expect("method display name")
                        .to_string();
                    if let Some(base) = self.find_base_method(&entry.bases, &name, arity) {
                        found.push((method, base));
                    }
                }
            }
        }
        self.model.overrides.extend(found);
    }

    fn find_base_method(&self, bases: &[ResolvedType], name: &str, arity: usize) -> Option<SymbolId> {
        for base in bases {
            let ResolvedType::Named { name: base_name, .. } = base else {
                continue;
            };
            let Some(entry) = self.classes.get(base_name) else {
                continue;
            };
            if let Some(overloads) = entry.methods.get(name) {
                for &candidate in overloads {
                    if self.model.symbol(candidate).params.len() == arity {
                        return Some(candidate);
                    }
                }
            }
            if let Some(found) = self.find_base_method(&entry.bases, name, arity) {
                return Some(found);
            }
        }
        None
    }

    /// Look a field up along the inheritance chain, accumulating generic
    /// substitutions on the way down.
    fn lookup_field(
        &self,
        class: &str,
        args: &[ResolvedType],
        name: &str,
    ) -> Option<(SymbolId, ResolvedType)> {
        let entry = self.classes.get(class)?;
        let mut subst = Substitution::new();
        for (index, arg) in args.iter().enumerate() {
            subst.insert((class.to_string(), index), arg.clone());
        }
        if let Some(&symbol) = entry.fields.get(name) {
            let declared = &self.model.symbol(symbol).declared_type;
            return Some((symbol, substitute(declared, &subst)));
        }
        for base in &entry.bases {
            let base = substitute(base, &subst);
            if let ResolvedType::Named { name: base_name, args: base_args } = &base {
                if let Some(found) = self.lookup_field(base_name, base_args, name) {
                    return Some(found);
                }
            }
        }
        None
    }

    fn lookup_method(
        &self,
        class: &str,
        args: &[ResolvedType],
        name: &str,
        arity: usize,
    ) -> Option<(SymbolId, Substitution)> {
        let entry = self.classes.get(class)?;
        let mut subst = Substitution::new();
        for (index, arg) in args.iter().enumerate() {
            subst.insert((class.to_string(), index), arg.clone());
        }
        if let Some(overloads) = entry.methods.get(name) {
            for &candidate in overloads {
                if self.model.symbol(candidate).params.len() == arity {
                    return Some((candidate, subst));
                }
            }
        }
        for base in &entry.bases {
            let base = substitute(base, &subst);
            if let ResolvedType::Named { name: base_name, args: base_args } = &base {
                if let Some((symbol, mut inner)) =
                    self.lookup_method(base_name, base_args, name, arity)
                {
                    inner.extend(subst.clone());
                    return Some((symbol, inner));
                }
            }
        }
        None
    }

    fn bind_bodies(&mut self) {
        let compilation = self.compilation;
        for (unit, tu) in compilation.units.iter().enumerate() {
            for class in &tu.classes {
                if self.classes[&class.name].unit != unit {
                    continue;
                }
                for method in &class.methods {
                    self.bind_method_body(unit, class, method);
                    self.analyze_flow(method);
                }
            }
        }
    }

    fn bind_method_body(&mut self, unit: usize, class: &ClassDecl, method: &MethodDecl) {
        let method_symbol = self.model.symbol_of_syntax[&method.id];
        let mut env = MethodEnv {
            unit,
            class: class.name.clone(),
            type_params: class.type_params.clone(),
            locals: BTreeMap::new(),
        };
        let param_symbols = self.model.symbol(method_symbol).params.clone();
        for (param, symbol) in method.params.iter().zip(param_symbols) {
            env.locals.insert(param.name.clone(), symbol);
        }
        self.bind_stmts(&method.body, &mut env);
    }

    fn bind_stmts(&mut self, stmts: &[Stmt], env: &mut MethodEnv) {
        for stmt in stmts {
            match stmt {
                Stmt::Local(local) => {
                    let initializer_type = local
                        .initializer
                        .as_ref()
                        .map(|init| self.bind_expr(init, env));
                    let declared_type = match &local.ty {
                        Some(ty) => self.resolve_type(ty, &env.type_params, &env.class),
                        None => match initializer_type {
                            Some(ResolvedType::Null) | None => ResolvedType::Error,
                            Some(ty) => ty,
                        },
                    };
                    let symbol = self.intern(SymbolInfo {
                        id: SymbolId(0),
                        kind: SymbolKind::Local,
                        name: local.name.clone(),
                        container: Some(env.class.clone()),
                        declared_type,
                        params: Vec::new(),
                        is_static: false,
                        declaration: Some(Declaration {
                            unit: env.unit,
                            type_syntax: local.ty.as_ref().map(|t| t.id),
                            syntax: local.id,
                        }),
                        location: local.location,
                    });
                    self.model.symbol_of_syntax.insert(local.id, symbol);
                    env.locals.insert(local.name.clone(), symbol);
                }
                Stmt::Expr(expr) => {
                    self.bind_expr(expr, env);
                }
                Stmt::Return { value, .. } => {
                    if let Some(value) = value {
                        self.bind_expr(value, env);
                    }
                }
                Stmt::If {
                    condition,
                    then_branch,
                    else_branch,
                } => {
                    self.bind_expr(condition, env);
                    self.bind_stmts(then_branch, env);
                    self.bind_stmts(else_branch, env);
                }
            }
        }
    }

    fn bind_expr(&mut self, expr: &Expr, env: &mut MethodEnv) -> ResolvedType {
        let ty = match &expr.kind {
            ExprKind::Null => ResolvedType::Null,
            ExprKind::StringLit(_) => ResolvedType::Named {
                name: "string".to_string(),
                args: Vec::new(),
            },
            ExprKind::IntLit(_) => ResolvedType::Value(ValueKind::Int),
            ExprKind::BoolLit(_) => ResolvedType::Value(ValueKind::Bool),
            ExprKind::Ident(name) => {
                if let Some(&symbol) = env.locals.get(name) {
                    self.model.symbol_of_syntax.insert(expr.id, symbol);
                    self.model.symbol(symbol).declared_type.clone()
                } else if let Some((symbol, ty)) =
                    self.lookup_field(&env.class.clone(), &env.identity_args(), name)
                {
                    self.model.symbol_of_syntax.insert(expr.id, symbol);
                    ty
                } else if let Some(entry) = self.classes.get(name) {
                    // Static access through the class name.
                    let symbol = entry.symbol;
                    self.model.symbol_of_syntax.insert(expr.id, symbol);
                    ResolvedType::Named {
                        name: name.clone(),
                        args: Vec::new(),
                    }
                } else {
                    ResolvedType::Error
                }
            }
            ExprKind::Member { receiver, name, .. } => {
                let receiver_type = self.bind_expr(receiver, env);
                self.bind_member(expr, &receiver_type, name)
            }
            ExprKind::Call {
                receiver,
                method,
                args,
                ..
            } => {
                for arg in args {
                    self.bind_expr(arg, env);
                }
                let receiver_type = match receiver {
                    Some(receiver) => self.bind_expr(receiver, env),
                    None => ResolvedType::Named {
                        name: env.class.clone(),
                        args: env.identity_args(),
                    },
                };
                self.bind_call(expr, &receiver_type, method, args.len())
            }
            ExprKind::New { ty, args } => {
                for arg in args {
                    self.bind_expr(arg, env);
                }
                let resolved = self.resolve_type(ty, &env.type_params, &env.class);
                if let ResolvedType::Named { name, .. } = &resolved {
                    let ctor = self.classes.get(name).and_then(|entry| {
                        entry
                            .constructors
                            .iter()
                            .copied()
                            .find(|&c| self.model.symbol(c).params.len() == args.len())
                    });
                    if let Some(ctor) = ctor {
                        self.model.symbol_of_syntax.insert(expr.id, ctor);
                    }
                }
                resolved
            }
            ExprKind::Assign { target, value } => {
                self.bind_expr(value, env);
                self.bind_expr(target, env)
            }
            ExprKind::Coalesce { left, right } => {
                let left_type = self.bind_expr(left, env);
                let right_type = self.bind_expr(right, env);
                match left_type {
                    ResolvedType::Null | ResolvedType::Error => right_type,
                    other => other,
                }
            }
            ExprKind::NotNull(inner) => self.bind_expr(inner, env),
            ExprKind::Equality { left, right, .. } => {
                self.bind_expr(left, env);
                self.bind_expr(right, env);
                ResolvedType::Value(ValueKind::Bool)
            }
        };
        self.model.expr_types.insert(expr.id, ty.clone());
        ty
    }

    fn bind_member(&mut self, expr: &Expr, receiver_type: &ResolvedType, name: &str) -> ResolvedType {
        if let ResolvedType::Named { name: class, args } = receiver_type {
            if let Some((symbol, ty)) = self.lookup_field(class, args, name) {
                self.model.symbol_of_syntax.insert(expr.id, symbol);
                return ty;
            }
            if class == "string" && name == "Length" {
                let symbol = self.string_length_field;
                self.model.symbol_of_syntax.insert(expr.id, symbol);
                return ResolvedType::Value(ValueKind::Int);
            }
        }
        ResolvedType::Error
    }

    fn bind_call(
        &mut self,
        expr: &Expr,
        receiver_type: &ResolvedType,
        method: &str,
        arity: usize,
    ) -> ResolvedType {
        if let ResolvedType::Named { name: class, args } = receiver_type {
            if let Some((symbol, subst)) = self.lookup_method(class, args, method, arity) {
                self.model.symbol_of_syntax.insert(expr.id, symbol);
                let declared = self.model.symbol(symbol).declared_type.clone();
                return substitute(&declared, &subst);
            }
        }
        if method == "ToString" && arity == 0 {
            let symbol = self.to_string_method;
            self.model.symbol_of_syntax.insert(expr.id, symbol);
            return ResolvedType::Named {
                name: "string".to_string(),
                args: Vec::new(),
            };
        }
        ResolvedType::Error
    }

    /// Record what the null-check flow analysis knows before each identifier
    /// use. Mirrors branch refinement: `if (x == null)`/`if (x != null)`
    /// narrows the tested name in each branch, and a terminating branch
    /// narrows the code that follows the `if`.
    fn analyze_flow(&mut self, method: &MethodDecl) {
        let mut state = FlowEnv::default();
        self.flow_stmts(&method.body, &mut state);
    }

    fn flow_stmts(&mut self, stmts: &[Stmt], state: &mut FlowEnv) {
        for stmt in stmts {
            self.flow_stmt(stmt, state);
        }
    }

    fn flow_stmt(&mut self, stmt: &Stmt, state: &mut FlowEnv) {
        match stmt {
            Stmt::Local(local) => {
                if let Some(init) = &local.initializer {
                    self.flow_expr(init, state);
                    if is_definitely_non_null(init) {
                        state.known.insert(local.name.clone());
                    } else {
                        state.known.remove(&local.name);
                    }
                }
            }
            Stmt::Expr(expr) => self.flow_expr(expr, state),
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    self.flow_expr(value, state);
                }
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.flow_expr(condition, state);
                let test = null_test(condition);
                let mut then_state = state.clone();
                let mut else_state = state.clone();
                if let Some((name, negated)) = &test {
                    if *negated {
                        then_state.known.insert(name.clone());
                        else_state.maybe.insert(name.clone());
                    } else {
                        then_state.maybe.insert(name.clone());
                        else_state.known.insert(name.clone());
                    }
                }
                self.flow_stmts(then_branch, &mut then_state);
                self.flow_stmts(else_branch, &mut else_state);
                for name in assigned_names(then_branch).union(&assigned_names(else_branch)) {
                    state.known.remove(name);
                }
                if let Some((name, negated)) = test {
                    if !negated && terminates(then_branch) {
                        state.known.insert(name);
                    } else if negated && terminates(else_branch) {
                        state.known.insert(name);
                    }
                }
            }
        }
    }

    fn flow_expr(&mut self, expr: &Expr, state: &mut FlowEnv) {
        match &expr.kind {
            ExprKind::Ident(name) => {
                if state.known.contains(name) {
                    self.model
                        .flow_states
                        .insert(expr.id, FlowState::DefinitelyNotNull);
                } else if state.maybe.contains(name) {
                    self.model.flow_states.insert(expr.id, FlowState::MaybeNull);
                }
            }
            ExprKind::Member { receiver, .. } | ExprKind::NotNull(receiver) => {
                self.flow_expr(receiver, state);
            }
            ExprKind::Call { receiver, args, .. } => {
                if let Some(receiver) = receiver {
                    self.flow_expr(receiver, state);
                }
                for arg in args {
                    self.flow_expr(arg, state);
                }
            }
            ExprKind::New { args, .. } => {
                for arg in args {
                    self.flow_expr(arg, state);
                }
            }
            ExprKind::Assign { target, value } => {
                self.flow_expr(value, state);
                self.flow_expr(target, state);
                if let Some(name) = target.as_ident() {
                    if is_definitely_non_null(value) {
                        state.known.insert(name.to_string());
                    } else {
                        state.known.remove(name);
                    }
                }
            }
            ExprKind::Coalesce { left, right } => {
                self.flow_expr(left, state);
                self.flow_expr(right, state);
            }
            ExprKind::Equality { left, right, .. } => {
                self.flow_expr(left, state);
                self.flow_expr(right, state);
            }
            ExprKind::Null
            | ExprKind::StringLit(_)
            | ExprKind::IntLit(_)
            | ExprKind::BoolLit(_) => {}
        }
    }
}

struct MethodEnv {
    unit: usize,
    class: String,
    type_params: Vec<String>,
    locals: BTreeMap<String, SymbolId>,
}

impl MethodEnv {
    /// The enclosing class instantiated with its own parameters, for
    /// unqualified member lookup.
    fn identity_args(&self) -> Vec<ResolvedType> {
        self.type_params
            .iter()
            .enumerate()
            .map(|(index, name)| ResolvedType::TypeParam {
                owner: self.class.clone(),
                index,
                name: name.clone(),
            })
            .collect()
    }
}

#[derive(Clone, Default)]
struct FlowEnv {
    known: BTreeSet<String>,
    maybe: BTreeSet<String>,
}

/// Recognise `x == null` / `null == x` / `x != null` / `null != x`.
/// Returns the tested name and whether the test was negated.
fn null_test(condition: &Expr) -> Option<(String, bool)> {
    let ExprKind::Equality { left, right, negated } = &condition.kind else {
        return None;
    };
    let name = match (&left.kind, &right.kind) {
        (ExprKind::Ident(name), ExprKind::Null) => name,
        (ExprKind::Null, ExprKind::Ident(name)) => name,
        _ => return None,
    };
    Some((name.clone(), *negated))
}

fn is_definitely_non_null(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::StringLit(_) | ExprKind::New { .. } | ExprKind::NotNull(_) => true,
        ExprKind::Coalesce { right, .. } => is_definitely_non_null(right),
        _ => false,
    }
}

fn terminates(stmts: &[Stmt]) -> bool {
    stmts.iter().any(|stmt| match stmt {
        Stmt::Return { .. } => true,
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => terminates(then_branch) && terminates(else_branch),
        _ => false,
    })
}

fn assigned_names(stmts: &[Stmt]) -> BTreeSet<String> {
    fn expr_targets(expr: &Expr, out: &mut BTreeSet<String>) {
        if let ExprKind::Assign { target, value } = &expr.kind {
            if let Some(name) = target.as_ident() {
                out.insert(name.to_string());
            }
            expr_targets(value, out);
        }
    }
    let mut out = BTreeSet::new();
    for stmt in stmts {
        match stmt {
            Stmt::Local(local) => {
                out.insert(local.name.clone());
            }
            Stmt::Expr(expr) => expr_targets(expr, &mut out),
            Stmt::Return { value: Some(expr), .. } => expr_targets(expr, &mut out),
            Stmt::Return { value: None, .. } => {}
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                expr_targets(condition, &mut out);
                out.extend(assigned_names(then_branch));
                out.extend(assigned_names(else_branch));
            }
        }
    }
    out
}
