//! Expression grammar.
//!
//! Precedence, lowest to highest: inline-if, `or`, `and`, `not`,
//! comparison (`== != < > <= >=` plus `in` / `is`), `~`, `+ -`,
//! `* / // %`, `**`, unary `+ -`, postfix (filter, call, lookup),
//! primary.

use super::*;
use crate::compiler::ast::{
    BinOp, CmpOp, CompareOperand, Expr, Literal, Pair, UnaryOp,
};
use crate::compiler::syntax::is_block_keyword;

impl Parser {
    pub(super) fn parse_expression(&mut self) -> Result<Expr> {
        self.parse_inline_if()
    }

    fn parse_inline_if(&mut self) -> Result<Expr> {
        let body = self.parse_or()?;
        if !self.at_symbol("if") {
            return Ok(body);
        }
        let span = body.span();
        self.next_token();
        let cond = self.parse_or()?;
        let else_expr = if self.eat_symbol("else") {
            Some(Box::new(self.parse_inline_if()?))
        } else {
            None
        };
        Ok(Expr::InlineIf {
            cond: Box::new(cond),
            body: Box::new(body),
            else_expr,
            span,
        })
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.at_symbol("or") {
            let span = left.span();
            self.next_token();
            let right = self.parse_and()?;
            left = Expr::BinOp {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.at_symbol("and") {
            let span = left.span();
            self.next_token();
            let right = self.parse_not()?;
            left = Expr::BinOp {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        // `not in` belongs to the comparison level, not here.
        if self.at_symbol("not") && !self.second_is_symbol("in") {
            let span = self.here();
            self.next_token();
            let operand = self.parse_not()?;
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(operand),
                span,
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut expr = self.parse_concat()?;
        loop {
            if let Some(op) = self.current_cmp_op() {
                self.next_token();
                let right = self.parse_concat()?;
                let operand = CompareOperand { op, expr: right };
                expr = match expr {
                    Expr::Compare {
                        first,
                        mut rest,
                        span,
                    } => {
                        rest.push(operand);
                        Expr::Compare { first, rest, span }
                    }
                    other => Expr::Compare {
                        span: other.span(),
                        first: Box::new(other),
                        rest: vec![operand],
                    },
                };
            } else if self.at_symbol("in") {
                self.next_token();
                let haystack = self.parse_concat()?;
                expr = Expr::In {
                    span: expr.span(),
                    needle: Box::new(expr),
                    haystack: Box::new(haystack),
                    negated: false,
                };
            } else if self.at_symbol("not") && self.second_is_symbol("in") {
                self.next_token();
                self.next_token();
                let haystack = self.parse_concat()?;
                expr = Expr::In {
                    span: expr.span(),
                    needle: Box::new(expr),
                    haystack: Box::new(haystack),
                    negated: true,
                };
            } else if self.at_symbol("is") {
                self.next_token();
                let negated = self.eat_symbol("not");
                let test = self.parse_test_name()?;
                let args = if self.at(TokenKind::LeftParen) {
                    self.parse_call_args()?
                } else {
                    Vec::new()
                };
                expr = Expr::Is {
                    span: expr.span(),
                    value: Box::new(expr),
                    test,
                    args,
                    negated,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Test names are symbols, plus `none` which lexes as a literal.
    fn parse_test_name(&mut self) -> Result<String> {
        match self.next_token() {
            Some(t) if t.kind == TokenKind::Symbol => Ok(t.text),
            Some(t) if t.kind == TokenKind::None => Ok("none".to_string()),
            Some(t) => Err(Error::parse(
                format!("expected test name, got {}", t.kind.describe()),
                t.span,
            )),
            None => Err(Error::parse("expected test name, got end of input", self.here())),
        }
    }

    fn parse_concat(&mut self) -> Result<Expr> {
        let mut left = self.parse_add_sub()?;
        while self.at(TokenKind::Tilde) {
            let span = left.span();
            self.next_token();
            let right = self.parse_add_sub()?;
            left = Expr::BinOp {
                op: BinOp::Concat,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_add_sub(&mut self) -> Result<Expr> {
        let mut left = self.parse_mul_div()?;
        loop {
            let op = if self.at_operator("+") {
                BinOp::Add
            } else if self.at_operator("-") {
                BinOp::Sub
            } else {
                return Ok(left);
            };
            let span = left.span();
            self.next_token();
            let right = self.parse_mul_div()?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
    }

    fn parse_mul_div(&mut self) -> Result<Expr> {
        let mut left = self.parse_pow()?;
        loop {
            let op = if self.at_operator("*") {
                BinOp::Mul
            } else if self.at_operator("/") {
                BinOp::Div
            } else if self.at_operator("//") {
                BinOp::FloorDiv
            } else if self.at_operator("%") {
                BinOp::Mod
            } else {
                return Ok(left);
            };
            let span = left.span();
            self.next_token();
            let right = self.parse_pow()?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
    }

    fn parse_pow(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while self.at_operator("**") {
            let span = left.span();
            self.next_token();
            let right = self.parse_unary()?;
            left = Expr::BinOp {
                op: BinOp::Pow,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let span = self.here();
        let op = if self.at_operator("-") {
            Some(UnaryOp::Neg)
        } else if self.at_operator("+") {
            Some(UnaryOp::Pos)
        } else {
            None
        };
        if let Some(op) = op {
            self.next_token();
            let operand = self.parse_unary()?;
            return Ok(Expr::UnaryOp {
                op,
                operand: Box::new(operand),
                span,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.at(TokenKind::LeftParen) {
                let span = self.here();
                let args = self.parse_call_args()?;
                expr = self.make_call(expr, args, span)?;
            } else if self.at_operator(".") {
                self.next_token();
                let name = self.expect(TokenKind::Symbol)?;
                expr = Expr::LookupVal {
                    span: expr.span(),
                    target: Box::new(expr),
                    val: Box::new(Expr::Literal {
                        value: Literal::Str(name.text),
                        span: name.span,
                    }),
                };
            } else if self.at(TokenKind::LeftBracket) {
                self.next_token();
                let key = self.parse_expression()?;
                self.expect(TokenKind::RightBracket)?;
                expr = Expr::LookupVal {
                    span: expr.span(),
                    target: Box::new(expr),
                    val: Box::new(key),
                };
            } else if self.at(TokenKind::Pipe) {
                self.next_token();
                let name = self.expect(TokenKind::Symbol)?;
                let mut args = vec![expr];
                if self.at(TokenKind::LeftParen) {
                    args.extend(self.parse_call_args()?);
                }
                expr = Expr::Filter {
                    name: name.text,
                    args,
                    span: name.span,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Builds a call node, special-casing `super()`.
    fn make_call(&mut self, callee: Expr, args: Vec<Expr>, span: Span) -> Result<Expr> {
        if let Expr::Symbol { name, .. } = &callee {
            if name == "super" {
                if !args.is_empty() {
                    return Err(Error::parse("super() takes no arguments", span));
                }
                let Some(block_name) = self.block_stack.last().cloned() else {
                    return Err(Error::parse("super() outside a block", span));
                };
                self.super_count += 1;
                return Ok(Expr::Super {
                    block_name,
                    symbol: format!("t_super_{}", self.super_count),
                    span,
                });
            }
        }
        Ok(Expr::FunCall {
            callee: Box::new(callee),
            args,
            span,
        })
    }

    /// Parses `( ... )` call arguments. Trailing `name=value` pairs
    /// collapse into one [`Expr::KeywordArgs`] appended last.
    pub(super) fn parse_call_args(&mut self) -> Result<Vec<Expr>> {
        let open = self.expect(TokenKind::LeftParen)?;
        let mut args = Vec::new();
        let mut kwargs: Vec<Pair> = Vec::new();
        loop {
            if self.at(TokenKind::RightParen) {
                self.next_token();
                break;
            }
            if !args.is_empty() || !kwargs.is_empty() {
                self.expect(TokenKind::Comma)?;
                // Tolerate a trailing comma before the closing paren.
                if self.at(TokenKind::RightParen) {
                    self.next_token();
                    break;
                }
            }
            if self.current().is_some_and(|t| t.kind == TokenKind::Symbol)
                && self.second_is_operator("=")
            {
                let name = self.expect(TokenKind::Symbol)?;
                self.next_token(); // `=`
                let value = self.parse_expression()?;
                kwargs.push(Pair {
                    key: name.text,
                    value,
                    span: name.span,
                });
            } else {
                args.push(self.parse_expression()?);
            }
        }
        if !kwargs.is_empty() {
            args.push(Expr::KeywordArgs {
                pairs: kwargs,
                span: open.span,
            });
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let Some(token) = self.next_token() else {
            return Err(Error::parse("expected expression, got end of input", self.here()));
        };
        let span = token.span;
        match token.kind {
            TokenKind::Str => Ok(Expr::Literal {
                value: Literal::Str(token.text),
                span,
            }),
            TokenKind::Int => {
                let value = token.text.parse::<i64>().map_err(|_| {
                    Error::parse(format!("integer literal `{}` out of range", token.text), span)
                })?;
                Ok(Expr::Literal {
                    value: Literal::Int(value),
                    span,
                })
            }
            TokenKind::Float => {
                let value = token.text.parse::<f64>().map_err(|_| {
                    Error::parse(format!("bad float literal `{}`", token.text), span)
                })?;
                Ok(Expr::Literal {
                    value: Literal::Float(value),
                    span,
                })
            }
            TokenKind::Boolean => Ok(Expr::Literal {
                value: Literal::Bool(token.text == "true"),
                span,
            }),
            TokenKind::None => Ok(Expr::Literal {
                value: Literal::None,
                span,
            }),
            TokenKind::Symbol => {
                if is_block_keyword(&token.text) {
                    return Err(Error::parse(
                        format!("unexpected keyword `{}`", token.text),
                        span,
                    ));
                }
                Ok(Expr::Symbol {
                    name: token.text,
                    span,
                })
            }
            TokenKind::LeftParen => {
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RightParen)?;
                Ok(Expr::Group {
                    inner: Box::new(inner),
                    span,
                })
            }
            TokenKind::LeftBracket => {
                let mut items = Vec::new();
                loop {
                    if self.at(TokenKind::RightBracket) {
                        self.next_token();
                        break;
                    }
                    if !items.is_empty() {
                        self.expect(TokenKind::Comma)?;
                        if self.at(TokenKind::RightBracket) {
                            self.next_token();
                            break;
                        }
                    }
                    items.push(self.parse_expression()?);
                }
                Ok(Expr::Array { items, span })
            }
            TokenKind::LeftBrace => {
                let mut pairs = Vec::new();
                loop {
                    if self.at(TokenKind::RightBrace) {
                        self.next_token();
                        break;
                    }
                    if !pairs.is_empty() {
                        self.expect(TokenKind::Comma)?;
                        if self.at(TokenKind::RightBrace) {
                            self.next_token();
                            break;
                        }
                    }
                    pairs.push(self.parse_pair()?);
                }
                Ok(Expr::Dict { pairs, span })
            }
            other => Err(Error::parse(
                format!("expected expression, got {}", other.describe()),
                span,
            )),
        }
    }

    /// Dict entries: keys are string literals or bare symbols, never
    /// general expressions.
    fn parse_pair(&mut self) -> Result<Pair> {
        let token = self.next_token().ok_or_else(|| {
            Error::parse("expected dict key, got end of input", self.here())
        })?;
        let key = match token.kind {
            TokenKind::Str | TokenKind::Symbol => token.text,
            other => {
                return Err(Error::parse(
                    format!("dict keys must be strings, got {}", other.describe()),
                    token.span,
                ));
            }
        };
        self.expect(TokenKind::Colon)?;
        let value = self.parse_expression()?;
        Ok(Pair {
            key,
            value,
            span: token.span,
        })
    }

    /// True when the token after the current one is the symbol `name`.
    fn second_is_symbol(&self, name: &str) -> bool {
        self.tokens[self.pos..]
            .iter()
            .filter(|t| t.kind != TokenKind::Whitespace)
            .nth(1)
            .is_some_and(|t| t.kind == TokenKind::Symbol && t.text == name)
    }

    /// True when the token after the current one is the operator `op`.
    fn second_is_operator(&self, op: &str) -> bool {
        self.tokens[self.pos..]
            .iter()
            .filter(|t| t.kind != TokenKind::Whitespace)
            .nth(1)
            .is_some_and(|t| t.kind == TokenKind::Operator && t.text == op)
    }

    fn current_cmp_op(&self) -> Option<CmpOp> {
        let t = self.current()?;
        if t.kind != TokenKind::Operator {
            return None;
        }
        match t.text.as_str() {
            "==" => Some(CmpOp::Eq),
            "!=" => Some(CmpOp::Ne),
            "<" => Some(CmpOp::Lt),
            ">" => Some(CmpOp::Gt),
            "<=" => Some(CmpOp::Le),
            ">=" => Some(CmpOp::Ge),
            _ => None,
        }
    }
}
