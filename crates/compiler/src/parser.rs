//! Parser (§4.3 global grammar, §4.4 function-body grammar)
//!
//! Two passes over the same token stream, a "collect declarations, then
//! compile bodies" split (satisfying §4.3's explicit requirement that
//! forward references among functions work): the first
//! pass walks top-level declarations and *delimits* each function body by
//! matching braces without parsing it; the second pass parses each
//! delimited body into a [`Statement`] list using the function grammar.

use jit_core::Type;

use crate::ast::{
    AssignOp, BinOp, BufferDecl, Expr, ExprKind, FunctionDef, GlobalDecl, IncDecOp, IncDecPos,
    Literal, Param, Program, Statement, UnaryOp,
};
use crate::lexer::{Token, TokenKind};

/// A parse failure together with the byte offset it was detected at, so the
/// top-level `compile()` entry point can turn it into "Line N: …" (§4.7).
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

type PResult<T> = Result<T, ParseError>;

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Parser { tokens, pos: 0 }
    }

    // -- token stream helpers ---------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            offset: self.cur_offset(),
        }
    }

    fn expect(&mut self, text: &str) -> PResult<Token> {
        if self.peek().is(text) {
            Ok(self.advance())
        } else {
            Err(self.err(format!(
                "Found \"{}\" when expecting \"{}\"",
                self.peek().text,
                text
            )))
        }
    }

    fn expect_identifier(&mut self) -> PResult<String> {
        if self.peek().kind == TokenKind::Identifier {
            Ok(self.advance().text)
        } else {
            Err(self.err(format!("Found \"{}\" when expecting an identifier", self.peek().text)))
        }
    }

    fn cur_offset(&self) -> usize {
        self.peek().offset
    }

    fn try_parse_type(&mut self) -> Option<Type> {
        if self.peek().kind == TokenKind::Keyword {
            if let Some(ty) = Type::from_keyword(&self.peek().text) {
                self.advance();
                return Some(ty);
            }
        }
        None
    }

    // -- top level (§4.3) --------------------------------------------------

    /// Parse a full program. Accepts either the raw form or the
    /// `class Name { public: … };` wrapper (§4.3, §6) — the wrapper is
    /// unwrapped to the same contents before the body grammar runs.
    pub fn parse_program(&mut self) -> PResult<Program> {
        if self.peek().is("class") {
            self.advance();
            let _name = self.expect_identifier()?;
            self.expect("{")?;
            if self.peek().is("public") || self.peek().is("private") {
                self.advance();
                self.expect(":")?;
            }
            let program = self.parse_body_items()?;
            self.expect("}")?;
            if self.peek().is(";") {
                self.advance();
            }
            Ok(program)
        } else {
            self.parse_body_items()
        }
    }

    fn parse_body_items(&mut self) -> PResult<Program> {
        let mut program = Program::default();

        while !self.at_end() && !self.peek().is("}") {
            if self.peek().is("public") || self.peek().is("private") {
                self.advance();
                self.expect(":")?;
                continue;
            }

            let offset = self.cur_offset();
            let is_const = if self.peek().is("const") {
                self.advance();
                true
            } else {
                false
            };

            if self.peek().is("Buffer") {
                self.advance();
                let name = self.expect_identifier()?;
                self.expect("(")?;
                let size_tok = self.advance();
                let size: usize = size_tok
                    .text
                    .parse()
                    .map_err(|_| self.err("Buffer size must be an integer literal"))?;
                self.expect(")")?;
                self.expect(";")?;
                program.buffers.push(BufferDecl { name, size, offset });
                continue;
            }

            let ty = self
                .try_parse_type()
                .ok_or_else(|| self.err(format!("Found \"{}\" when expecting a type", self.peek().text)))?;

            let name = self.expect_identifier()?;

            // function: `type ident(params) { body }`
            if self.peek().is("(") {
                let func = self.parse_function(ty, name, offset)?;
                program.functions.push(func);
                continue;
            }

            // one or more comma-separated global declarators
            self.parse_global_declarators(ty, is_const, name, offset, &mut program)?;
        }

        Ok(program)
    }

    fn parse_global_declarators(
        &mut self,
        ty: Type,
        is_const: bool,
        first_name: String,
        offset: usize,
        program: &mut Program,
    ) -> PResult<()> {
        let mut name = first_name;
        loop {
            let init = if self.peek().is("=") {
                self.advance();
                Some(self.parse_literal()?)
            } else {
                None
            };
            program.globals.push(GlobalDecl {
                name,
                ty,
                is_const,
                init,
                offset,
            });

            if self.peek().is(",") {
                self.advance();
                name = self.expect_identifier()?;
                continue;
            }
            break;
        }
        self.expect(";")?;
        Ok(())
    }

    fn parse_literal(&mut self) -> PResult<Literal> {
        let offset = self.cur_offset();
        let tok = self.advance();
        literal_from_token(&tok).map_err(|message| ParseError { message, offset })
    }

    fn parse_function(&mut self, return_type: Type, name: String, offset: usize) -> PResult<FunctionDef> {
        self.expect("(")?;
        let mut params = Vec::new();
        while !self.peek().is(")") {
            let ty = self.try_parse_type().ok_or_else(|| {
                self.err(format!("Found \"{}\" when expecting a parameter type", self.peek().text))
            })?;
            let pname = self.expect_identifier()?;
            params.push(Param { name: pname, ty });
            if self.peek().is(",") {
                self.advance();
            }
        }
        self.expect(")")?;
        if params.len() > 2 {
            return Err(self.err(format!(
                "Function \"{name}\" has too many parameters (max 2 supported)"
            )));
        }

        self.expect("{")?;
        let body_start = self.pos;
        let mut depth = 1usize;
        while depth > 0 {
            if self.at_end() {
                return Err(self.err(format!("Unterminated function body for \"{name}\"")));
            }
            if self.peek().is("{") {
                depth += 1;
            } else if self.peek().is("}") {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            self.advance();
        }
        let body_end = self.pos;
        self.expect("}")?;
        if self.peek().is(";") {
            self.advance();
        }

        let body_tokens = &self.tokens[body_start..body_end];
        let mut body_parser = FunctionBodyParser::new(body_tokens);
        let mut body = body_parser.parse_statements()?;

        if return_type == Type::Void {
            let ends_in_return = matches!(body.last(), Some(Statement::Return { .. }));
            if !ends_in_return {
                let end_offset = body_tokens.last().map(|t| t.offset).unwrap_or(offset);
                body.push(Statement::Return {
                    value: None,
                    offset: end_offset,
                    synthetic: true,
                });
            }
        }

        Ok(FunctionDef {
            name,
            return_type,
            params,
            body,
            offset,
        })
    }
}

fn literal_from_token(tok: &Token) -> Result<Literal, String> {
    match tok.kind {
        TokenKind::IntLiteral => tok
            .text
            .parse::<i32>()
            .map(Literal::Int)
            .map_err(|_| "Syntax error in numeric constant".to_string()),
        TokenKind::FloatLiteral => {
            let digits = tok.text.trim_end_matches(['f', 'F']);
            digits
                .parse::<f32>()
                .map(Literal::Float)
                .map_err(|_| "Syntax error in numeric constant".to_string())
        }
        TokenKind::DoubleLiteral => tok
            .text
            .parse::<f64>()
            .map(Literal::Double)
            .map_err(|_| "Syntax error in numeric constant".to_string()),
        TokenKind::BoolLiteral => Ok(Literal::Bool(tok.text == "true")),
        _ => Err(format!("Found \"{}\" when expecting a literal", tok.text)),
    }
}

/// Parses one function body's statement grammar (§4.4). A private helper
/// type, not exposed outside the parser module — the global parser is the
/// only thing that constructs one, over an already-delimited token slice.
struct FunctionBodyParser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> FunctionBodyParser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        FunctionBodyParser { tokens, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_text(&self) -> &str {
        self.tokens.get(self.pos).map(|t| t.text.as_str()).unwrap_or("")
    }

    fn peek_at(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        self.pos += 1;
        t
    }

    fn expect(&mut self, text: &str) -> PResult<Token> {
        if self.peek_text() == text {
            Ok(self.advance())
        } else {
            Err(self.err(format!(
                "Found \"{}\" when expecting \"{}\"",
                self.peek_text(),
                text
            )))
        }
    }

    fn cur_offset(&self) -> usize {
        self.peek().map(|t| t.offset).unwrap_or(0)
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            offset: self.cur_offset(),
        }
    }

    fn try_parse_type(&mut self) -> Option<Type> {
        if let Some(t) = self.peek() {
            if t.kind == TokenKind::Keyword {
                if let Some(ty) = Type::from_keyword(&t.text) {
                    self.advance();
                    return Some(ty);
                }
            }
        }
        None
    }

    fn parse_statements(&mut self) -> PResult<Vec<Statement>> {
        let mut out = Vec::new();
        while !self.at_end() {
            out.push(self.parse_statement()?);
        }
        Ok(out)
    }

    fn parse_statement(&mut self) -> PResult<Statement> {
        let offset = self.cur_offset();

        if self.peek_text() == "return" {
            self.advance();
            if self.peek_text() == ";" {
                self.advance();
                return Ok(Statement::Return {
                    value: None,
                    offset,
                    synthetic: false,
                });
            }
            let value = self.parse_expr()?;
            self.expect(";")?;
            return Ok(Statement::Return {
                value: Some(value),
                offset,
                synthetic: false,
            });
        }

        // declaration: ['const'] type ident [ '=' expr ] ';'
        let is_const = self.peek_text() == "const";
        let save = self.pos;
        if is_const {
            self.advance();
        }
        if let Some(ty) = self.try_parse_type() {
            let name = self.expect_identifier()?;
            let init = if self.peek_text() == "=" {
                self.advance();
                Some(self.parse_expr()?)
            } else {
                None
            };
            self.expect(";")?;
            return Ok(Statement::Declaration {
                is_const,
                ty,
                name,
                init,
                offset,
            });
        }
        self.pos = save;

        // ident-leading statements: assignment / buffer-op / inc-dec / bare expr
        if self.peek().map(|t| t.kind) == Some(TokenKind::Identifier) {
            let name = self.advance().text;

            if self.peek_text() == "[" {
                self.advance();
                let index = self.parse_expr()?;
                self.expect("]")?;
                if let Some(op) = assign_op(self.peek_text()) {
                    self.advance();
                    let value = self.parse_expr()?;
                    self.expect(";")?;
                    return Ok(Statement::IndexAssign {
                        buffer: name,
                        index,
                        op,
                        value,
                        offset,
                    });
                }
                self.expect(";")?;
                return Ok(Statement::Expr(Expr {
                    kind: ExprKind::Index {
                        buffer: name,
                        index: Box::new(index),
                    },
                    offset,
                }));
            }

            if self.peek_text() == "." {
                self.advance();
                let method = self.expect_identifier()?;
                self.expect("(")?;
                let args = self.parse_arg_list()?;
                self.expect(")")?;
                self.expect(";")?;
                return Ok(Statement::BufferMethodCall {
                    target: name,
                    method,
                    args,
                    offset,
                });
            }

            if self.peek_text() == "++" || self.peek_text() == "--" {
                let op = if self.advance().text == "++" {
                    IncDecOp::Inc
                } else {
                    IncDecOp::Dec
                };
                self.expect(";")?;
                return Ok(Statement::IncDecStatement { name, op, offset });
            }

            if let Some(op) = assign_op(self.peek_text()) {
                self.advance();
                let value = self.parse_expr()?;
                self.expect(";")?;
                return Ok(Statement::Assign { name, op, value, offset });
            }

            // not actually a statement-level construct: re-parse as a
            // general expression statement starting from this identifier.
            self.pos -= 1;
        }

        let expr = self.parse_expr()?;
        self.expect(";")?;
        Ok(Statement::Expr(expr))
    }

    fn expect_identifier(&mut self) -> PResult<String> {
        if self.peek().map(|t| t.kind) == Some(TokenKind::Identifier) {
            Ok(self.advance().text)
        } else {
            Err(self.err(format!("Found \"{}\" when expecting an identifier", self.peek_text())))
        }
    }

    fn parse_arg_list(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.peek_text() == ")" {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if self.peek_text() == "," {
                self.advance();
                continue;
            }
            break;
        }
        Ok(args)
    }

    // -- expression grammar, precedence low -> high (§4.4) -----------------

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> PResult<Expr> {
        let offset = self.cur_offset();
        let cond = self.parse_logic_or()?;
        if self.peek_text() == "?" {
            self.advance();
            let if_true = self.parse_expr()?;
            self.expect(":")?;
            let if_false = self.parse_expr()?;
            return Ok(Expr {
                kind: ExprKind::Ternary {
                    cond: Box::new(cond),
                    if_true: Box::new(if_true),
                    if_false: Box::new(if_false),
                },
                offset,
            });
        }
        Ok(cond)
    }

    fn parse_logic_or(&mut self) -> PResult<Expr> {
        let offset = self.cur_offset();
        let mut left = self.parse_logic_and()?;
        while self.peek_text() == "||" {
            self.advance();
            let right = self.parse_logic_and()?;
            left = Expr {
                kind: ExprKind::Binary(BinOp::Or, Box::new(left), Box::new(right)),
                offset,
            };
        }
        Ok(left)
    }

    fn parse_logic_and(&mut self) -> PResult<Expr> {
        let offset = self.cur_offset();
        let mut left = self.parse_compare()?;
        while self.peek_text() == "&&" {
            self.advance();
            let right = self.parse_compare()?;
            left = Expr {
                kind: ExprKind::Binary(BinOp::And, Box::new(left), Box::new(right)),
                offset,
            };
        }
        Ok(left)
    }

    fn parse_compare(&mut self) -> PResult<Expr> {
        let offset = self.cur_offset();
        let left = self.parse_sum()?;
        let op = match self.peek_text() {
            "<" => Some(BinOp::Lt),
            "<=" => Some(BinOp::Le),
            ">" => Some(BinOp::Gt),
            ">=" => Some(BinOp::Ge),
            "==" => Some(BinOp::Eq),
            "!=" => Some(BinOp::Ne),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let right = self.parse_sum()?;
            return Ok(Expr {
                kind: ExprKind::Binary(op, Box::new(left), Box::new(right)),
                offset,
            });
        }
        Ok(left)
    }

    fn parse_sum(&mut self) -> PResult<Expr> {
        let offset = self.cur_offset();
        let mut left = self.parse_product()?;
        loop {
            let op = match self.peek_text() {
                "+" => BinOp::Add,
                "-" => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_product()?;
            left = Expr {
                kind: ExprKind::Binary(op, Box::new(left), Box::new(right)),
                offset,
            };
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> PResult<Expr> {
        let offset = self.cur_offset();
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek_text() {
                "*" => BinOp::Mul,
                "/" => BinOp::Div,
                "%" => BinOp::Rem,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            left = Expr {
                kind: ExprKind::Binary(op, Box::new(left), Box::new(right)),
                offset,
            };
        }
        Ok(left)
    }

    /// `term := '(' cast-or-expr ')' | unary`
    fn parse_term(&mut self) -> PResult<Expr> {
        if self.peek_text() == "(" {
            // try a cast: '(' type ')' unary
            if let Some(t) = self.peek_at(1) {
                if t.kind == TokenKind::Keyword && Type::from_keyword(&t.text).is_some() {
                    if self.peek_at(2).map(|t| t.text.as_str()) == Some(")") {
                        let offset = self.cur_offset();
                        self.advance(); // (
                        let ty = Type::from_keyword(&self.advance().text).unwrap();
                        self.advance(); // )
                        let inner = self.parse_unary()?;
                        return Ok(Expr {
                            kind: ExprKind::Cast(ty, Box::new(inner)),
                            offset,
                        });
                    }
                }
            }
        }
        self.parse_unary()
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let offset = self.cur_offset();
        match self.peek_text() {
            "!" => {
                self.advance();
                let inner = self.parse_unary()?;
                Ok(Expr {
                    kind: ExprKind::Unary(UnaryOp::Not, Box::new(inner)),
                    offset,
                })
            }
            "-" => {
                self.advance();
                let inner = self.parse_primary()?;
                Ok(Expr {
                    kind: ExprKind::Unary(UnaryOp::Neg, Box::new(inner)),
                    offset,
                })
            }
            "++" | "--" => {
                let op = if self.advance().text == "++" {
                    IncDecOp::Inc
                } else {
                    IncDecOp::Dec
                };
                let name = self.expect_identifier()?;
                Ok(Expr {
                    kind: ExprKind::IncDec {
                        target: name,
                        op,
                        pos: IncDecPos::Pre,
                    },
                    offset,
                })
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let offset = self.cur_offset();
        if self.peek_text() == "(" {
            self.advance();
            let inner = self.parse_expr()?;
            self.expect(")")?;
            return Ok(inner);
        }

        let kind = self.peek().map(|t| t.kind);
        if matches!(
            kind,
            Some(TokenKind::IntLiteral)
                | Some(TokenKind::FloatLiteral)
                | Some(TokenKind::DoubleLiteral)
                | Some(TokenKind::BoolLiteral)
        ) {
            let tok = self.advance();
            let lit = literal_from_token(&tok).map_err(|message| ParseError { message, offset })?;
            return Ok(Expr {
                kind: ExprKind::Literal(lit),
                offset,
            });
        }

        if kind == Some(TokenKind::Identifier) {
            let name = self.advance().text;

            if self.peek_text() == "(" {
                self.advance();
                let args = self.parse_arg_list()?;
                self.expect(")")?;
                return Ok(Expr {
                    kind: ExprKind::Call { name, args },
                    offset,
                });
            }

            if self.peek_text() == "[" {
                self.advance();
                let index = self.parse_expr()?;
                self.expect("]")?;
                return Ok(Expr {
                    kind: ExprKind::Index {
                        buffer: name,
                        index: Box::new(index),
                    },
                    offset,
                });
            }

            if self.peek_text() == "." {
                self.advance();
                let method = self.expect_identifier()?;
                self.expect("(")?;
                let args = self.parse_arg_list()?;
                self.expect(")")?;
                return Ok(Expr {
                    kind: ExprKind::MethodCall {
                        target: name,
                        method,
                        args,
                    },
                    offset,
                });
            }

            if self.peek_text() == "++" || self.peek_text() == "--" {
                let op = if self.advance().text == "++" {
                    IncDecOp::Inc
                } else {
                    IncDecOp::Dec
                };
                return Ok(Expr {
                    kind: ExprKind::IncDec {
                        target: name,
                        op,
                        pos: IncDecPos::Post,
                    },
                    offset,
                });
            }

            return Ok(Expr {
                kind: ExprKind::Ident(name),
                offset,
            });
        }

        Err(self.err(format!("Found \"{}\" when expecting an expression", self.peek_text())))
    }
}

fn assign_op(text: &str) -> Option<AssignOp> {
    match text {
        "=" => Some(AssignOp::Assign),
        "+=" => Some(AssignOp::AddAssign),
        "-=" => Some(AssignOp::SubAssign),
        "*=" => Some(AssignOp::MulAssign),
        "/=" => Some(AssignOp::DivAssign),
        "%=" => Some(AssignOp::RemAssign),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse(src: &str) -> Program {
        let tokens = tokenize(src).unwrap();
        Parser::new(&tokens).parse_program().unwrap()
    }

    #[test]
    fn parses_gain_example() {
        let program = parse(
            r#"
            float x = 0.5f;
            float process(float input) { return input * x; }
            "#,
        );
        assert_eq!(program.globals.len(), 1);
        assert_eq!(program.functions.len(), 1);
        assert_eq!(program.functions[0].params.len(), 1);
    }

    #[test]
    fn parses_buffer_decl() {
        let program = parse("Buffer b(1024);");
        assert_eq!(program.buffers.len(), 1);
        assert_eq!(program.buffers[0].size, 1024);
    }

    #[test]
    fn parses_multi_declarator_globals() {
        let program = parse("float k, saturationAmount;");
        assert_eq!(program.globals.len(), 2);
    }

    #[test]
    fn void_function_gets_synthetic_return() {
        let program = parse("void init() { }");
        let body = &program.functions[0].body;
        match body.last() {
            Some(Statement::Return { synthetic: true, .. }) => {}
            other => panic!("expected synthetic return, got {:?}", other),
        }
    }

    #[test]
    fn class_wrapper_form_parses_same_contents() {
        let program = parse(
            r#"
            class MyDsp {
            public:
                float x = 0.5f;
                float process(float input) { return input * x; }
            };
            "#,
        );
        assert_eq!(program.globals.len(), 1);
        assert_eq!(program.functions.len(), 1);
    }

    #[test]
    fn too_many_parameters_rejected() {
        let tokens = tokenize("float f(int a, int b, int c) { return 0.0f; }").unwrap();
        let err = Parser::new(&tokens).parse_program().unwrap_err();
        assert!(err.message.contains("too many parameters"));
    }

    #[test]
    fn ternary_and_modulo_parse() {
        let program = parse("int test(int a, int b) { return (a > b ? a : b) % 4; }");
        assert_eq!(program.functions[0].body.len(), 1);
    }
}
