use anyhow::{bail, Result};

use crate::syntax::{
    ClassDecl, Compilation, Expr, ExprKind, FieldDecl, LocalDecl, Location, MethodDecl, ParamDecl,
    Stmt, SyntaxId, TranslationUnit, TypeSyntax, TypeSyntaxKind, CONSTRUCTOR_NAME,
};

/// Parse a set of named sources into one compilation.
///
/// Syntax identities are unique across all units of the returned compilation.
pub fn parse_compilation(sources: &[(&str, &str)]) -> Result<Compilation> {
    let mut ids = IdSource::default();
    let mut units = Vec::with_capacity(sources.len());
    for (index, (name, text)) in sources.iter().enumerate() {
        units.push(parse_unit(index as u32, name, text, &mut ids)?);
    }
    Ok(Compilation { units })
}

fn parse_unit(index: u32, name: &str, text: &str, ids: &mut IdSource) -> Result<TranslationUnit> {
    let tokens = lex(index, name, text)?;
    let mut parser = Parser {
        unit: name,
        tokens,
        pos: 0,
        ids,
    };
    let mut classes = Vec::new();
    while !parser.at_end() {
        classes.push(parser.class_decl()?);
    }
    Ok(TranslationUnit {
        name: name.to_string(),
        classes,
    })
}

#[derive(Default)]
struct IdSource {
    next: u32,
}

impl IdSource {
    fn fresh(&mut self) -> SyntaxId {
        let id = SyntaxId(self.next);
        self.next += 1;
        id
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Str(String),
    KwClass,
    KwStatic,
    KwPublic,
    KwNew,
    KwReturn,
    KwIf,
    KwElse,
    KwVar,
    KwNull,
    KwTrue,
    KwFalse,
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Lt,
    Gt,
    Comma,
    Semi,
    Colon,
    Dot,
    Question,
    QuestionDot,
    QuestionQuestion,
    Bang,
    Eq,
    EqEq,
    BangEq,
    Arrow,
}

#[derive(Clone, Debug)]
struct Token {
    tok: Tok,
    location: Location,
}

fn lex(unit_index: u32, unit: &str, text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1u32;
    let mut column = 1u32;

    macro_rules! push {
        ($tok:expr, $loc:expr) => {
            tokens.push(Token {
                tok: $tok,
                location: $loc,
            })
        };
    }

    while let Some(&c) = chars.peek() {
        let location = Location {
            unit: unit_index,
            line,
            column,
        };
        match c {
            ' ' | '\t' | '\r' => {
                chars.next();
                column += 1;
            }
            '\n' => {
                chars.next();
                line += 1;
                column = 1;
            }
            '/' => {
                chars.next();
                column += 1;
                if chars.peek() == Some(&'/') {
                    for c in chars.by_ref() {
                        if c == '\n' {
                            line += 1;
                            column = 1;
                            break;
                        }
                    }
                } else {
                    bail!("{unit}:{line}:{column}: unexpected character '/'");
                }
            }
            '"' => {
                chars.next();
                column += 1;
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('"') => {
                            column += 1;
                            break;
                        }
                        Some('\n') | None => {
                            bail!("{unit}:{line}:{column}: unterminated string literal")
                        }
                        Some(c) => {
                            value.push(c);
                            column += 1;
                        }
                    }
                }
                push!(Tok::Str(value), location);
            }
            c if c.is_ascii_digit() => {
                let mut value = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        value.push(d);
                        chars.next();
                        column += 1;
                    } else {
                        break;
                    }
                }
                let parsed = value
                    .parse::<i64>()
                    .map_err(|_| anyhow::anyhow!("{unit}:{line}:{column}: integer out of range"))?;
                push!(Tok::Int(parsed), location);
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        word.push(d);
                        chars.next();
                        column += 1;
                    } else {
                        break;
                    }
                }
                let tok = match word.as_str() {
                    "class" => Tok::KwClass,
                    "static" => Tok::KwStatic,
                    "public" => Tok::KwPublic,
                    "new" => Tok::KwNew,
                    "return" => Tok::KwReturn,
                    "if" => Tok::KwIf,
                    "else" => Tok::KwElse,
                    "var" => Tok::KwVar,
                    "null" => Tok::KwNull,
                    "true" => Tok::KwTrue,
                    "false" => Tok::KwFalse,
                    _ => Tok::Ident(word),
                };
                push!(tok, location);
            }
            _ => {
                chars.next();
                column += 1;
                let tok = match c {
                    '{' => Tok::LBrace,
                    '}' => Tok::RBrace,
                    '(' => Tok::LParen,
                    ')' => Tok::RParen,
                    '[' => Tok::LBracket,
                    ']' => Tok::RBracket,
                    '<' => Tok::Lt,
                    '>' => Tok::Gt,
                    ',' => Tok::Comma,
                    ';' => Tok::Semi,
                    ':' => Tok::Colon,
                    '.' => Tok::Dot,
                    '?' => match chars.peek() {
                        Some('.') => {
                            chars.next();
                            column += 1;
                            Tok::QuestionDot
                        }
                        Some('?') => {
                            chars.next();
                            column += 1;
                            Tok::QuestionQuestion
                        }
                        _ => Tok::Question,
                    },
                    '!' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            column += 1;
                            Tok::BangEq
                        } else {
                            Tok::Bang
                        }
                    }
                    '=' => match chars.peek() {
                        Some('=') => {
                            chars.next();
                            column += 1;
                            Tok::EqEq
                        }
                        Some('>') => {
                            chars.next();
                            column += 1;
                            Tok::Arrow
                        }
                        _ => Tok::Eq,
                    },
                    other => bail!("{unit}:{line}:{column}: unexpected character '{other}'"),
                };
                push!(tok, location);
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    unit: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    ids: &'a mut IdSource,
}

impl Parser<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn peek_at(&self, offset: usize) -> Option<&Tok> {
        self.tokens.get(self.pos + offset).map(|t| &t.tok)
    }

    fn location(&self) -> Location {
        self.tokens
            .get(self.pos)
            .map(|t| t.location)
            .or_else(|| self.tokens.last().map(|t| t.location))
            .unwrap_or_default()
    }

    fn advance(&mut self) -> Result<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("{}: unexpected end of input", self.unit))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, tok: Tok) -> Result<Token> {
        let found = self.advance()?;
        if found.tok != tok {
            bail!(
                "{}:{}:{}: expected {:?}, found {:?}",
                self.unit,
                found.location.line,
                found.location.column,
                tok,
                found.tok
            );
        }
        Ok(found)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Result<(String, Location)> {
        let token = self.advance()?;
        match token.tok {
            Tok::Ident(name) => Ok((name, token.location)),
            other => bail!(
                "{}:{}:{}: expected identifier, found {:?}",
                self.unit,
                token.location.line,
                token.location.column,
                other
            ),
        }
    }

    fn class_decl(&mut self) -> Result<ClassDecl> {
        let location = self.location();
        self.expect(Tok::KwClass)?;
        let (name, _) = self.ident()?;
        let mut type_params = Vec::new();
        if self.eat(&Tok::Lt) {
            loop {
                type_params.push(self.ident()?.0);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
            self.expect(Tok::Gt)?;
        }
        let mut bases = Vec::new();
        if self.eat(&Tok::Colon) {
            loop {
                bases.push(self.type_syntax()?);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
        }
        self.expect(Tok::LBrace)?;
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        while !self.eat(&Tok::RBrace) {
            self.member(&name, &mut fields, &mut methods)?;
        }
        Ok(ClassDecl {
            id: self.ids.fresh(),
            name,
            type_params,
            bases,
            fields,
            methods,
            location,
        })
    }

    fn member(
        &mut self,
        class_name: &str,
        fields: &mut Vec<FieldDecl>,
        methods: &mut Vec<MethodDecl>,
    ) -> Result<()> {
        let location = self.location();
        let mut is_static = false;
        loop {
            if self.eat(&Tok::KwStatic) {
                is_static = true;
            } else if self.eat(&Tok::KwPublic) {
                // Accepted and ignored; accessibility plays no role here.
            } else {
                break;
            }
        }

        // Constructor: the class name followed directly by a parameter list.
        if let (Some(Tok::Ident(name)), Some(Tok::LParen)) = (self.peek(), self.peek_at(1)) {
            if name == class_name {
                self.advance()?;
                let params = self.param_list()?;
                let body = self.method_body()?;
                methods.push(MethodDecl {
                    id: self.ids.fresh(),
                    name: CONSTRUCTOR_NAME.to_string(),
                    is_static: false,
                    return_type: self.void_type(location),
                    params,
                    body,
                    location,
                });
                return Ok(());
            }
        }

        let ty = self.type_syntax()?;
        let (name, _) = self.ident()?;
        if self.peek() == Some(&Tok::LParen) {
            let params = self.param_list()?;
            let body = self.method_body()?;
            methods.push(MethodDecl {
                id: self.ids.fresh(),
                name,
                is_static,
                return_type: ty,
                params,
                body,
                location,
            });
        } else {
            let initializer = if self.eat(&Tok::Eq) {
                Some(self.expr()?)
            } else {
                None
            };
            self.expect(Tok::Semi)?;
            fields.push(FieldDecl {
                id: self.ids.fresh(),
                name,
                ty,
                initializer,
                location,
            });
        }
        Ok(())
    }

    fn void_type(&mut self, location: Location) -> TypeSyntax {
        TypeSyntax {
            id: self.ids.fresh(),
            kind: TypeSyntaxKind::Named {
                name: "void".to_string(),
                args: Vec::new(),
            },
            nullable: false,
            synthesized: false,
            location,
        }
    }

    fn param_list(&mut self) -> Result<Vec<ParamDecl>> {
        self.expect(Tok::LParen)?;
        let mut params = Vec::new();
        if !self.eat(&Tok::RParen) {
            loop {
                let location = self.location();
                let ty = self.type_syntax()?;
                let (name, _) = self.ident()?;
                params.push(ParamDecl {
                    id: self.ids.fresh(),
                    name,
                    ty,
                    location,
                });
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
            self.expect(Tok::RParen)?;
        }
        Ok(params)
    }

    fn method_body(&mut self) -> Result<Vec<Stmt>> {
        if self.eat(&Tok::Arrow) {
            let location = self.location();
            let value = self.expr()?;
            self.expect(Tok::Semi)?;
            return Ok(vec![Stmt::Return {
                value: Some(value),
                location,
            }]);
        }
        self.block()
    }

    fn block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(Tok::LBrace)?;
        let mut stmts = Vec::new();
        while !self.eat(&Tok::RBrace) {
            stmts.push(self.stmt()?);
        }
        Ok(stmts)
    }

    fn block_or_stmt(&mut self) -> Result<Vec<Stmt>> {
        if self.peek() == Some(&Tok::LBrace) {
            self.block()
        } else {
            Ok(vec![self.stmt()?])
        }
    }

    fn stmt(&mut self) -> Result<Stmt> {
        let location = self.location();
        match self.peek() {
            Some(Tok::KwReturn) => {
                self.advance()?;
                let value = if self.peek() == Some(&Tok::Semi) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(Tok::Semi)?;
                Ok(Stmt::Return { value, location })
            }
            Some(Tok::KwIf) => {
                self.advance()?;
                self.expect(Tok::LParen)?;
                let condition = self.expr()?;
                self.expect(Tok::RParen)?;
                let then_branch = self.block_or_stmt()?;
                let else_branch = if self.eat(&Tok::KwElse) {
                    self.block_or_stmt()?
                } else {
                    Vec::new()
                };
                Ok(Stmt::If {
                    condition,
                    then_branch,
                    else_branch,
                })
            }
            Some(Tok::KwVar) => {
                self.advance()?;
                let (name, _) = self.ident()?;
                self.expect(Tok::Eq)?;
                let initializer = Some(self.expr()?);
                self.expect(Tok::Semi)?;
                Ok(Stmt::Local(LocalDecl {
                    id: self.ids.fresh(),
                    name,
                    ty: None,
                    initializer,
                    location,
                }))
            }
            Some(Tok::Ident(_)) if self.starts_local_decl() => {
                let ty = self.type_syntax()?;
                let (name, _) = self.ident()?;
                let initializer = if self.eat(&Tok::Eq) {
                    Some(self.expr()?)
                } else {
                    None
                };
                self.expect(Tok::Semi)?;
                Ok(Stmt::Local(LocalDecl {
                    id: self.ids.fresh(),
                    name,
                    ty: Some(ty),
                    initializer,
                    location,
                }))
            }
            _ => {
                let expr = self.expr()?;
                self.expect(Tok::Semi)?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    /// Lookahead test distinguishing `T x = ...;` from an expression statement.
    /// The subset has no comparison operators, so `Ident <` always opens a
    /// generic type.
    fn starts_local_decl(&self) -> bool {
        match self.peek_at(1) {
            Some(Tok::Ident(_)) => true,
            Some(Tok::Lt) => true,
            Some(Tok::Question) => matches!(self.peek_at(2), Some(Tok::Ident(_))),
            Some(Tok::LBracket) => matches!(self.peek_at(2), Some(Tok::RBracket)),
            _ => false,
        }
    }

    fn type_syntax(&mut self) -> Result<TypeSyntax> {
        let location = self.location();
        // Builtin type names lex as plain identifiers.
        let (name, _) = self.ident()?;
        let mut args = Vec::new();
        if self.eat(&Tok::Lt) {
            loop {
                args.push(self.type_syntax()?);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
            self.expect(Tok::Gt)?;
        }
        let mut ty = TypeSyntax {
            id: self.ids.fresh(),
            kind: TypeSyntaxKind::Named { name, args },
            nullable: false,
            synthesized: false,
            location,
        };
        loop {
            if self.eat(&Tok::Question) {
                ty.nullable = true;
            } else if self.peek() == Some(&Tok::LBracket)
                && self.peek_at(1) == Some(&Tok::RBracket)
            {
                self.advance()?;
                self.advance()?;
                ty = TypeSyntax {
                    id: self.ids.fresh(),
                    kind: TypeSyntaxKind::Array(Box::new(ty)),
                    nullable: false,
                    synthesized: false,
                    location,
                };
            } else {
                break;
            }
        }
        Ok(ty)
    }

    fn expr(&mut self) -> Result<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr> {
        let target = self.coalesce()?;
        if self.eat(&Tok::Eq) {
            let location = target.location;
            let value = self.assignment()?;
            return Ok(Expr {
                id: self.ids.fresh(),
                kind: ExprKind::Assign {
                    target: Box::new(target),
                    value: Box::new(value),
                },
                location,
            });
        }
        Ok(target)
    }

    fn coalesce(&mut self) -> Result<Expr> {
        let left = self.equality()?;
        if self.eat(&Tok::QuestionQuestion) {
            let location = left.location;
            let right = self.coalesce()?;
            return Ok(Expr {
                id: self.ids.fresh(),
                kind: ExprKind::Coalesce {
                    left: Box::new(left),
                    right: Box::new(right),
                },
                location,
            });
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr> {
        let left = self.postfix()?;
        let negated = match self.peek() {
            Some(Tok::EqEq) => false,
            Some(Tok::BangEq) => true,
            _ => return Ok(left),
        };
        self.advance()?;
        let location = left.location;
        let right = self.postfix()?;
        Ok(Expr {
            id: self.ids.fresh(),
            kind: ExprKind::Equality {
                left: Box::new(left),
                right: Box::new(right),
                negated,
            },
            location,
        })
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Tok::Dot) | Some(Tok::QuestionDot) => {
                    let conditional = self.peek() == Some(&Tok::QuestionDot);
                    self.advance()?;
                    let (name, location) = self.ident()?;
                    if self.peek() == Some(&Tok::LParen) {
                        let args = self.call_args()?;
                        expr = Expr {
                            id: self.ids.fresh(),
                            kind: ExprKind::Call {
                                receiver: Some(Box::new(expr)),
                                method: name,
                                args,
                                conditional,
                            },
                            location,
                        };
                    } else {
                        expr = Expr {
                            id: self.ids.fresh(),
                            kind: ExprKind::Member {
                                receiver: Box::new(expr),
                                name,
                                conditional,
                            },
                            location,
                        };
                    }
                }
                Some(Tok::Bang) => {
                    self.advance()?;
                    let location = expr.location;
                    expr = Expr {
                        id: self.ids.fresh(),
                        kind: ExprKind::NotNull(Box::new(expr)),
                        location,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn call_args(&mut self) -> Result<Vec<Expr>> {
        self.expect(Tok::LParen)?;
        let mut args = Vec::new();
        if !self.eat(&Tok::RParen) {
            loop {
                args.push(self.expr()?);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
            self.expect(Tok::RParen)?;
        }
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr> {
        let token = self.advance()?;
        let location = token.location;
        let kind = match token.tok {
            Tok::KwNull => ExprKind::Null,
            Tok::KwTrue => ExprKind::BoolLit(true),
            Tok::KwFalse => ExprKind::BoolLit(false),
            Tok::Int(value) => ExprKind::IntLit(value),
            Tok::Str(value) => ExprKind::StringLit(value),
            Tok::KwNew => {
                let ty = self.type_syntax()?;
                let args = self.call_args()?;
                ExprKind::New { ty, args }
            }
            Tok::LParen => {
                let inner = self.expr()?;
                self.expect(Tok::RParen)?;
                return Ok(inner);
            }
            Tok::Ident(name) => {
                if self.peek() == Some(&Tok::LParen) {
                    let args = self.call_args()?;
                    ExprKind::Call {
                        receiver: None,
                        method: name,
                        args,
                        conditional: false,
                    }
                } else {
                    ExprKind::Ident(name)
                }
            }
            other => bail!(
                "{}:{}:{}: unexpected token {:?} in expression",
                self.unit,
                location.line,
                location.column,
                other
            ),
        };
        Ok(Expr {
            id: self.ids.fresh(),
            kind,
            location,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(text: &str) -> TranslationUnit {
        let compilation = parse_compilation(&[("test.cs", text)]).expect("parse");
        compilation.units.into_iter().next().expect("one unit")
    }

    #[test]
    fn parses_class_with_field_and_method() {
        let unit = parse_one(
            "class C { string? f = null; static int Test(string? s) { return s.Length; } }",
        );
        let class = &unit.classes[0];
        assert_eq!(class.name, "C");
        assert_eq!(class.fields.len(), 1);
        assert!(class.fields[0].ty.nullable);
        assert_eq!(class.methods.len(), 1);
        assert_eq!(class.methods[0].params.len(), 1);
    }

    #[test]
    fn expression_body_normalises_to_return() {
        let unit = parse_one("class C { static string Id(string x) => x; }");
        let method = &unit.classes[0].methods[0];
        assert!(matches!(method.body[0], Stmt::Return { .. }));
    }

    #[test]
    fn parses_generic_types_and_object_creation() {
        let unit = parse_one(
            "class Program { static void Main() { var b = new Box<string?>(); b.Get().ToString(); } }",
        );
        let body = &unit.classes[0].methods[0].body;
        assert_eq!(body.len(), 2);
        let Stmt::Local(local) = &body[0] else {
            panic!("expected local declaration");
        };
        assert!(local.ty.is_none());
        let Some(init) = &local.initializer else {
            panic!("expected initializer");
        };
        let ExprKind::New { ty, .. } = &init.kind else {
            panic!("expected object creation");
        };
        assert_eq!(ty.children().len(), 1);
        assert!(ty.children()[0].nullable);
    }

    #[test]
    fn parses_conditional_access_and_coalesce() {
        let unit = parse_one(
            "class C { static string Test(string? x) { return x?.ToString() ?? \"\"; } }",
        );
        let Stmt::Return { value: Some(expr), .. } = &unit.classes[0].methods[0].body[0] else {
            panic!("expected return");
        };
        let ExprKind::Coalesce { left, .. } = &expr.kind else {
            panic!("expected coalesce");
        };
        let ExprKind::Call { conditional, .. } = &left.kind else {
            panic!("expected conditional call");
        };
        assert!(*conditional);
    }

    #[test]
    fn parses_constructor_and_field_assignment() {
        let unit = parse_one("class C { string? f; public C(string? s) { f = s; } }");
        let class = &unit.classes[0];
        assert_eq!(class.methods.len(), 1);
        assert!(class.methods[0].is_constructor());
    }

    #[test]
    fn local_declaration_lookahead_keeps_assignments_as_expressions() {
        let unit = parse_one(
            "class C { static void M(string? a) { string b = \"\"; b = a ?? b; } }",
        );
        let body = &unit.classes[0].methods[0].body;
        assert!(matches!(body[0], Stmt::Local(_)));
        assert!(matches!(body[1], Stmt::Expr(_)));
    }

    #[test]
    fn null_forgiving_binds_before_member_access() {
        let unit = parse_one("class C { static int M(string? s) => s!.Length; }");
        let Stmt::Return { value: Some(expr), .. } = &unit.classes[0].methods[0].body[0] else {
            panic!("expected return");
        };
        let ExprKind::Member { receiver, .. } = &expr.kind else {
            panic!("expected member access");
        };
        assert!(matches!(receiver.kind, ExprKind::NotNull(_)));
    }

    #[test]
    fn rejects_unterminated_string() {
        let err = parse_compilation(&[("bad.cs", "class C { string f = \"oops; }")])
            .expect_err("lex error");
        assert!(err.to_string().contains("unterminated"));
    }
}
