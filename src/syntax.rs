/// Identity of a syntax node, unique within one compilation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SyntaxId(pub(crate) u32);

/// Source position used for diagnostics.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Location {
    /// Index of the translation unit within its compilation.
    pub unit: u32,
    pub line: u32,
    pub column: u32,
}

/// A set of translation units analysed together.
#[derive(Clone, Debug)]
pub struct Compilation {
    pub units: Vec<TranslationUnit>,
}

/// One source file worth of declarations.
#[derive(Clone, Debug)]
pub struct TranslationUnit {
    pub name: String,
    pub classes: Vec<ClassDecl>,
}

/// Class declaration with optional type parameters and base list.
#[derive(Clone, Debug)]
pub struct ClassDecl {
    pub id: SyntaxId,
    pub name: String,
    pub type_params: Vec<String>,
    pub bases: Vec<TypeSyntax>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<MethodDecl>,
    pub location: Location,
}

/// Field declaration with an optional initializer.
#[derive(Clone, Debug)]
pub struct FieldDecl {
    pub id: SyntaxId,
    pub name: String,
    pub ty: TypeSyntax,
    pub initializer: Option<Expr>,
    pub location: Location,
}

/// Method declaration. Expression bodies are normalised to a single return.
#[derive(Clone, Debug)]
pub struct MethodDecl {
    pub id: SyntaxId,
    pub name: String,
    pub is_static: bool,
    pub return_type: TypeSyntax,
    pub params: Vec<ParamDecl>,
    pub body: Vec<Stmt>,
    pub location: Location,
}

impl MethodDecl {
    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR_NAME
    }
}

/// Method name used for constructors after parsing.
pub const CONSTRUCTOR_NAME: &str = ".ctor";

/// Parameter declaration.
#[derive(Clone, Debug)]
pub struct ParamDecl {
    pub id: SyntaxId,
    pub name: String,
    pub ty: TypeSyntax,
    pub location: Location,
}

/// A type as written in source, with its nullability marker.
#[derive(Clone, Debug)]
pub struct TypeSyntax {
    pub id: SyntaxId,
    pub kind: TypeSyntaxKind,
    /// The type was written (or rewritten) with a trailing `?`.
    pub nullable: bool,
    /// The `?` was added by the normaliser, not the user.
    pub synthesized: bool,
    pub location: Location,
}

/// Shape of a type reference.
#[derive(Clone, Debug)]
pub enum TypeSyntaxKind {
    Named { name: String, args: Vec<TypeSyntax> },
    Array(Box<TypeSyntax>),
}

impl TypeSyntax {
    /// Child type syntaxes: generic arguments, or the array element.
    pub fn children(&self) -> &[TypeSyntax] {
        match &self.kind {
            TypeSyntaxKind::Named { args, .. } => args,
            TypeSyntaxKind::Array(elem) => std::slice::from_ref(elem),
        }
    }
}

/// Statement forms.
#[derive(Clone, Debug)]
pub enum Stmt {
    Local(LocalDecl),
    Expr(Expr),
    Return {
        value: Option<Expr>,
        location: Location,
    },
    If {
        condition: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
    },
}

/// Local variable declaration; `ty` is `None` for `var`.
#[derive(Clone, Debug)]
pub struct LocalDecl {
    pub id: SyntaxId,
    pub name: String,
    pub ty: Option<TypeSyntax>,
    pub initializer: Option<Expr>,
    pub location: Location,
}

/// Expression node.
#[derive(Clone, Debug)]
pub struct Expr {
    pub id: SyntaxId,
    pub kind: ExprKind,
    pub location: Location,
}

/// Expression forms.
#[derive(Clone, Debug)]
pub enum ExprKind {
    Null,
    StringLit(String),
    IntLit(i64),
    BoolLit(bool),
    Ident(String),
    Member {
        receiver: Box<Expr>,
        name: String,
        /// `receiver?.name` rather than `receiver.name`.
        conditional: bool,
    },
    Call {
        /// `None` for unqualified calls to methods of the enclosing class.
        receiver: Option<Box<Expr>>,
        method: String,
        args: Vec<Expr>,
        conditional: bool,
    },
    New {
        ty: TypeSyntax,
        args: Vec<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Coalesce {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Postfix `!` null-forgiving operator.
    NotNull(Box<Expr>),
    Equality {
        left: Box<Expr>,
        right: Box<Expr>,
        negated: bool,
    },
}

impl Expr {
    /// The bare identifier name, if this expression is one.
    pub fn as_ident(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Ident(name) => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn is_null_literal(&self) -> bool {
        matches!(self.kind, ExprKind::Null)
    }
}
