//! Fortran expression grammar.
//!
//! Precedence, loosest first: assignment, `.EQV.`/`.NEQV.`, `.OR.`,
//! `.AND.`, `.NOT.`, comparisons, `//`, additive (with a leading sign),
//! multiplicative, `**` (right associative), casts and kind suffixes,
//! postfix `(...)` and `%member`, primary.
//!
//! Parentheses after a name mean different things depending on what the
//! name is: subscripts for arrays and strings, arguments for functions and
//! intrinsics, component values for derived types.

use gimli::constants;

use crate::error::{FerruleError, FerruleResult};
use crate::expr::eval::static_type;
use crate::expr::parser::{is_type_die, ParseResult, Parser};
use crate::expr::token::TokenKind;
use crate::expr::{BinaryOp, Node, Subscript, UnaryOp};
use crate::variant::TypeKind;

impl Parser<'_, '_>
{
    pub(crate) fn fortran_expression(&mut self) -> ParseResult
    {
        let target = self.equivalence()?;
        if !self.eat(&TokenKind::Assign) {
            return Ok(target);
        }
        let value = self.fortran_expression()?;
        Ok(Node::Assign {
            op: None,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn equivalence(&mut self) -> ParseResult
    {
        self.binary_chain(Self::disjunction, |token| match token {
            TokenKind::Equiv => Some(BinaryOp::Equiv),
            TokenKind::Nequiv => Some(BinaryOp::Nequiv),
            _ => None,
        })
    }

    fn disjunction(&mut self) -> ParseResult
    {
        self.binary_chain(Self::conjunction, |token| (*token == TokenKind::Pipe).then_some(BinaryOp::LogOr))
    }

    fn conjunction(&mut self) -> ParseResult
    {
        self.binary_chain(Self::negation, |token| (*token == TokenKind::Amp).then_some(BinaryOp::LogAnd))
    }

    fn negation(&mut self) -> ParseResult
    {
        if self.eat(&TokenKind::Bang) {
            let operand = self.negation()?;
            return Ok(Node::unary(UnaryOp::Not, operand));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> ParseResult
    {
        self.binary_chain(Self::concatenation, |token| match token {
            TokenKind::EqEq => Some(BinaryOp::Eq),
            TokenKind::NotEq => Some(BinaryOp::Ne),
            TokenKind::Lt => Some(BinaryOp::Lt),
            TokenKind::Le => Some(BinaryOp::Le),
            TokenKind::Gt => Some(BinaryOp::Gt),
            TokenKind::Ge => Some(BinaryOp::Ge),
            _ => None,
        })
    }

    fn concatenation(&mut self) -> ParseResult
    {
        self.binary_chain(Self::sum, |token| (*token == TokenKind::Concat).then_some(BinaryOp::Concat))
    }

    /// Additive level; a leading sign applies to the first term
    fn sum(&mut self) -> ParseResult
    {
        let mut left = if self.eat(&TokenKind::Minus) {
            Node::unary(UnaryOp::Neg, self.product()?)
        } else if self.eat(&TokenKind::Plus) {
            Node::unary(UnaryOp::Plus, self.product()?)
        } else {
            self.product()?
        };
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.product()?;
            left = Node::binary(op, left, right);
        }
    }

    fn product(&mut self) -> ParseResult
    {
        self.binary_chain(Self::power, |token| match token {
            TokenKind::Star => Some(BinaryOp::Mul),
            TokenKind::Slash => Some(BinaryOp::Div),
            _ => None,
        })
    }

    fn power(&mut self) -> ParseResult
    {
        let base = self.kind_suffix()?;
        if !self.eat(&TokenKind::Power) {
            return Ok(base);
        }
        let exponent = if self.eat(&TokenKind::Minus) {
            Node::unary(UnaryOp::Neg, self.power()?)
        } else {
            self.power()?
        };
        Ok(Node::binary(BinaryOp::Power, base, exponent))
    }

    /// `operand_kind`
    fn kind_suffix(&mut self) -> ParseResult
    {
        let mut node = self.fortran_postfix()?;
        while self.eat(&TokenKind::Underscore) {
            let kind = self.fortran_primary()?;
            node = Node::KindCast {
                operand: Box::new(node),
                kind: Box::new(kind),
            };
        }
        Ok(node)
    }

    fn fortran_postfix(&mut self) -> ParseResult
    {
        let mut node = self.fortran_primary()?;
        loop {
            if self.eat(&TokenKind::LParen) {
                let slots = self.slots()?;
                node = self.apply_parentheses(node, slots)?;
            } else if self.eat(&TokenKind::Percent) {
                let name = self.name("Expected component name after %")?;
                node = Node::Member {
                    object: Box::new(node),
                    name,
                };
            } else {
                return Ok(node);
            }
        }
    }

    /// Comma-separated slots up to `)`: expressions or `lo:hi` ranges
    fn slots(&mut self) -> FerruleResult<Vec<Subscript>>
    {
        let mut slots = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok(slots);
        }
        loop {
            let lower = if matches!(self.peek(), TokenKind::Colon) {
                None
            } else {
                Some(self.equivalence()?)
            };
            let slot = if self.eat(&TokenKind::Colon) {
                let upper = if matches!(self.peek(), TokenKind::Comma | TokenKind::RParen) {
                    None
                } else {
                    Some(self.equivalence()?)
                };
                Subscript::Range { lower, upper }
            } else {
                match lower {
                    Some(index) => Subscript::Index(index),
                    None => return Err(FerruleError::syntax("Expression syntax error")),
                }
            };
            slots.push(slot);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "Missing ) in subscript or argument list")?;
        Ok(slots)
    }

    /// Turn `node(slots)` into a call, subscript or constructor
    fn apply_parentheses(&self, node: Node, slots: Vec<Subscript>) -> ParseResult
    {
        let arguments = |slots: Vec<Subscript>| -> FerruleResult<Vec<Node>> {
            slots
                .into_iter()
                .map(|slot| match slot {
                    Subscript::Index(node) => Ok(node),
                    Subscript::Range { .. } => Err(FerruleError::syntax("Invalid use of : in argument list")),
                })
                .collect()
        };
        match node {
            Node::Intrinsic(intrinsic) => {
                return Ok(Node::IntrinsicCall {
                    intrinsic,
                    args: arguments(slots)?,
                });
            }
            Node::IdentifierSet(_) => {
                return Ok(Node::Call {
                    function: Box::new(node),
                    args: arguments(slots)?,
                });
            }
            Node::Identifier(id) if is_type_die(self.ctx.unit().die(id)) => {
                return Ok(Node::Constructor {
                    ty: id,
                    values: arguments(slots)?,
                });
            }
            _ => {}
        }

        let ty = match static_type(self.ctx, &node)? {
            Some(ty) => ty.strip_references()?,
            None => return Err(FerruleError::eval("Invalid use of () - not an array or callable")),
        };
        let pointee = if ty.kind() == TypeKind::Pointer {
            ty.target()?.map(|t| t.strip()).transpose()?
        } else {
            None
        };
        let callable = ty.kind() == TypeKind::Subroutine || pointee.is_some_and(|t| t.kind() == TypeKind::Subroutine);
        if callable {
            return Ok(Node::Call {
                function: Box::new(node),
                args: arguments(slots)?,
            });
        }
        let indexable = matches!(ty.kind(), TypeKind::Array | TypeKind::String)
            || pointee.is_some_and(|t| matches!(t.kind(), TypeKind::Array | TypeKind::String))
            || ty.die().tag() == constants::DW_TAG_base_type && ty.capabilities()?.char;
        if indexable {
            return Ok(Node::Array {
                array: Box::new(node),
                subscripts: slots,
            });
        }
        Err(FerruleError::eval("Invalid use of () - not an array or callable"))
    }

    fn fortran_primary(&mut self) -> ParseResult
    {
        match self.advance() {
            TokenKind::LParen if self.starts_fortran_type(0) => {
                let ty = self.fortran_type()?;
                self.expect(&TokenKind::RParen, "Missing ) in cast")?;
                let operand = self.fortran_postfix()?;
                Ok(Node::Cast {
                    ty: ty.map(|t| t.die().id()),
                    operand: Box::new(operand),
                })
            }
            TokenKind::LParen => {
                let inner = self.fortran_expression()?;
                self.expect(&TokenKind::RParen, "Missing ) in expression")?;
                Ok(inner)
            }
            TokenKind::LBrace => {
                let mut items = Vec::new();
                if !self.eat(&TokenKind::RBrace) {
                    loop {
                        items.push(self.equivalence()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RBrace, "Missing /) in array constructor")?;
                }
                Ok(Node::Vector(items))
            }
            TokenKind::Logical(value) => Ok(Node::LogicalConstant(value)),
            TokenKind::Int(value) => Ok(Node::IntConstant {
                value,
                size: if i32::try_from(value).is_ok() { 4 } else { 8 },
            }),
            TokenKind::Real { value, double } => Ok(Node::RealConstant {
                value,
                size: if double { 8 } else { 4 },
            }),
            TokenKind::Str(text) => Ok(Node::StringConstant(text)),
            TokenKind::Char(byte) => Ok(Node::CharConstant(byte)),
            TokenKind::Ident(name) => self.identifier(&name),
            TokenKind::Register { id, name } => Ok(Node::Register { id, name }),
            TokenKind::Variable(name) => Ok(Node::DebuggerVariable(name)),
            other => Err(FerruleError::syntax(format!("Expression syntax error near `{other}'"))),
        }
    }
}
