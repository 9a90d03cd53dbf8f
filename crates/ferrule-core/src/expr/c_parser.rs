//! C and C++ expression grammar.
//!
//! Precedence, loosest first: comma, assignment (right associative),
//! conditional, `||`, `&&`, `|`, `^`, `&`, equality, relational, shift,
//! additive, multiplicative, unary and cast, postfix, primary.

use crate::error::FerruleError;
use crate::expr::parser::{ParseResult, Parser};
use crate::expr::token::TokenKind;
use crate::expr::{BinaryOp, Node, Subscript, UnaryOp};

/// Keywords that can start a C type name
pub(crate) const TYPE_KEYWORDS: &[&str] = &[
    "void", "char", "short", "int", "long", "float", "double", "signed", "unsigned", "bool", "_Bool", "wchar_t", "const",
    "volatile", "struct", "class", "union", "enum",
];

impl Parser<'_, '_>
{
    pub(crate) fn c_expression(&mut self) -> ParseResult
    {
        self.binary_chain(Self::assignment, |token| (*token == TokenKind::Comma).then_some(BinaryOp::Comma))
    }

    fn assignment(&mut self) -> ParseResult
    {
        let target = self.conditional()?;
        let op = match self.peek() {
            TokenKind::Assign => None,
            TokenKind::AssignOp(op) => Some(*op),
            _ => return Ok(target),
        };
        self.advance();
        let value = self.assignment()?;
        Ok(Node::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn conditional(&mut self) -> ParseResult
    {
        let condition = self.logical_or()?;
        if !self.eat(&TokenKind::Question) {
            return Ok(condition);
        }
        let then = self.c_expression()?;
        self.expect(&TokenKind::Colon, "Missing : for conditional expression")?;
        let otherwise = self.conditional()?;
        Ok(Node::Conditional {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn logical_or(&mut self) -> ParseResult
    {
        self.binary_chain(Self::logical_and, |token| (*token == TokenKind::OrOr).then_some(BinaryOp::LogOr))
    }

    fn logical_and(&mut self) -> ParseResult
    {
        self.binary_chain(Self::bit_or, |token| (*token == TokenKind::AndAnd).then_some(BinaryOp::LogAnd))
    }

    fn bit_or(&mut self) -> ParseResult
    {
        self.binary_chain(Self::bit_xor, |token| (*token == TokenKind::Pipe).then_some(BinaryOp::BitOr))
    }

    fn bit_xor(&mut self) -> ParseResult
    {
        self.binary_chain(Self::bit_and, |token| (*token == TokenKind::Caret).then_some(BinaryOp::BitXor))
    }

    fn bit_and(&mut self) -> ParseResult
    {
        self.binary_chain(Self::equality, |token| (*token == TokenKind::Amp).then_some(BinaryOp::BitAnd))
    }

    fn equality(&mut self) -> ParseResult
    {
        self.binary_chain(Self::relational, |token| match token {
            TokenKind::EqEq => Some(BinaryOp::Eq),
            TokenKind::NotEq => Some(BinaryOp::Ne),
            _ => None,
        })
    }

    fn relational(&mut self) -> ParseResult
    {
        self.binary_chain(Self::shift, |token| match token {
            TokenKind::Lt => Some(BinaryOp::Lt),
            TokenKind::Le => Some(BinaryOp::Le),
            TokenKind::Gt => Some(BinaryOp::Gt),
            TokenKind::Ge => Some(BinaryOp::Ge),
            _ => None,
        })
    }

    fn shift(&mut self) -> ParseResult
    {
        self.binary_chain(Self::additive, |token| match token {
            TokenKind::Shl => Some(BinaryOp::Shl),
            TokenKind::Shr => Some(BinaryOp::Shr),
            _ => None,
        })
    }

    fn additive(&mut self) -> ParseResult
    {
        self.binary_chain(Self::multiplicative, |token| match token {
            TokenKind::Plus => Some(BinaryOp::Add),
            TokenKind::Minus => Some(BinaryOp::Sub),
            _ => None,
        })
    }

    fn multiplicative(&mut self) -> ParseResult
    {
        self.binary_chain(Self::unary, |token| match token {
            TokenKind::Star => Some(BinaryOp::Mul),
            TokenKind::Slash => Some(BinaryOp::Div),
            TokenKind::Percent => Some(BinaryOp::Rem),
            _ => None,
        })
    }

    /// Whether the tokens `ahead` positions on begin a type name
    pub(crate) fn starts_type(&self, ahead: usize) -> bool
    {
        match self.peek_at(ahead) {
            TokenKind::Ident(word) if TYPE_KEYWORDS.contains(&word.as_str()) => true,
            TokenKind::Ident(_) => self.named_type_at(ahead).is_some(),
            _ => false,
        }
    }

    fn unary(&mut self) -> ParseResult
    {
        let op = match self.peek() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Tilde => UnaryOp::BitNot,
            TokenKind::Star => UnaryOp::Deref,
            TokenKind::Amp => UnaryOp::AddressOf,
            TokenKind::Inc => UnaryOp::PreInc,
            TokenKind::Dec => UnaryOp::PreDec,
            TokenKind::Ident(word) if word == "sizeof" => return self.sizeof(),
            TokenKind::LParen if self.starts_type(1) => return self.cast(),
            _ => return self.postfix(),
        };
        self.advance();
        let operand = self.unary()?;
        Ok(Node::unary(op, operand))
    }

    /// `sizeof (type)`, `sizeof expr` and `sizeof (expr)`
    fn sizeof(&mut self) -> ParseResult
    {
        self.advance();
        if *self.peek() == TokenKind::LParen && self.starts_type(1) {
            self.advance();
            let ty = self.type_name()?;
            self.expect(&TokenKind::RParen, "Missing ) in sizeof")?;
            return Ok(Node::SizeofType(ty.map(|t| t.die().id())));
        }
        let operand = self.unary()?;
        Ok(Node::SizeofExpr(Box::new(operand)))
    }

    fn cast(&mut self) -> ParseResult
    {
        self.advance();
        let ty = self.type_name()?;
        self.expect(&TokenKind::RParen, "Missing ) in cast")?;
        let operand = self.unary()?;
        Ok(Node::Cast {
            ty: ty.map(|t| t.die().id()),
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> ParseResult
    {
        let mut node = self.primary()?;
        loop {
            node = match self.peek() {
                TokenKind::LParen => {
                    self.advance();
                    let args = self.arguments(&TokenKind::RParen, "Missing ) in function call")?;
                    Node::Call {
                        function: Box::new(node),
                        args,
                    }
                }
                TokenKind::LBracket => {
                    let mut subscripts = Vec::new();
                    while self.eat(&TokenKind::LBracket) {
                        subscripts.push(self.subscript()?);
                        self.expect(&TokenKind::RBracket, "Missing ] in subscript")?;
                    }
                    Node::Array {
                        array: Box::new(node),
                        subscripts,
                    }
                }
                TokenKind::Dot => {
                    self.advance();
                    Node::Member {
                        object: Box::new(node),
                        name: self.member_name()?,
                    }
                }
                TokenKind::Arrow => {
                    self.advance();
                    Node::Member {
                        object: Box::new(Node::unary(UnaryOp::Deref, node)),
                        name: self.member_name()?,
                    }
                }
                TokenKind::Inc => {
                    self.advance();
                    Node::unary(UnaryOp::PostInc, node)
                }
                TokenKind::Dec => {
                    self.advance();
                    Node::unary(UnaryOp::PostDec, node)
                }
                _ => return Ok(node),
            };
        }
    }

    /// `name` or `Base::name` after `.` or `->`
    fn member_name(&mut self) -> Result<String, FerruleError>
    {
        let mut name = self.name("Expected member name")?;
        while *self.peek() == TokenKind::ColonColon {
            self.advance();
            name.push_str("::");
            name.push_str(&self.name("Expected member name")?);
        }
        Ok(name)
    }

    /// `index` or `lo:hi` inside brackets; either bound may be omitted
    fn subscript(&mut self) -> Result<Subscript, FerruleError>
    {
        if self.eat(&TokenKind::Colon) {
            let upper = self.range_bound()?;
            return Ok(Subscript::Range { lower: None, upper });
        }
        let index = self.assignment()?;
        if self.eat(&TokenKind::Colon) {
            let upper = self.range_bound()?;
            return Ok(Subscript::Range {
                lower: Some(index),
                upper,
            });
        }
        Ok(Subscript::Index(index))
    }

    fn range_bound(&mut self) -> Result<Option<Node>, FerruleError>
    {
        match self.peek() {
            TokenKind::RBracket | TokenKind::Comma => Ok(None),
            _ => Ok(Some(self.assignment()?)),
        }
    }

    /// Comma-separated expressions up to `close`, which is consumed
    fn arguments(&mut self, close: &TokenKind, message: &str) -> Result<Vec<Node>, FerruleError>
    {
        let mut args = Vec::new();
        if self.eat(close) {
            return Ok(args);
        }
        loop {
            args.push(self.assignment()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(close, message)?;
        Ok(args)
    }

    fn primary(&mut self) -> ParseResult
    {
        match self.advance() {
            TokenKind::LParen => {
                let inner = self.c_expression()?;
                self.expect(&TokenKind::RParen, "Missing ) in expression")?;
                Ok(inner)
            }
            TokenKind::ColonColon => {
                let name = self.name("Expected identifier after ::")?;
                self.global(&name)
            }
            TokenKind::Ident(name) => {
                if TYPE_KEYWORDS.contains(&name.as_str()) {
                    // a bare type, as in `sizeof int` or `ptype unsigned`
                    self.pos -= 1;
                    let ty = self.type_name()?;
                    return Ok(Node::Cast {
                        ty: ty.map(|t| t.die().id()),
                        operand: Box::new(Node::IntConstant { value: 0, size: 4 }),
                    });
                }
                if *self.peek() == TokenKind::ColonColon {
                    self.pos -= 1;
                    if let Some((segments, used)) = self.scoped_name_at(0) {
                        self.pos += used;
                        return self.qualified(&segments);
                    }
                    self.pos += 1;
                }
                self.identifier(&name)
            }
            TokenKind::Register { id, name } => Ok(Node::Register { id, name }),
            TokenKind::Variable(name) => Ok(Node::DebuggerVariable(name)),
            TokenKind::Int(value) => Ok(Node::IntConstant {
                value,
                size: if i32::try_from(value).is_ok() { 4 } else { 8 },
            }),
            TokenKind::Real { value, .. } => Ok(Node::RealConstant { value, size: 8 }),
            TokenKind::Char(byte) => Ok(Node::CharConstant(byte)),
            TokenKind::Str(mut text) => {
                if self.eat(&TokenKind::ColonColon) {
                    let name = self.name("Expected identifier after ::")?;
                    return self.file_scoped(&text, &name);
                }
                while let TokenKind::Str(next) = self.peek() {
                    text.push_str(next);
                    self.advance();
                }
                Ok(Node::StringConstant(text))
            }
            TokenKind::LBrace => {
                let items = self.arguments(&TokenKind::RBrace, "Missing } in vector")?;
                Ok(Node::Vector(items))
            }
            other => Err(FerruleError::syntax(format!("Expression syntax error near `{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests
{
    use gimli::constants::*;
    use pretty_assertions::assert_eq;

    use crate::context::EvalContext;
    use crate::dwarf::{CompUnit, UnitBuilder};
    use crate::expr::{BinaryOp, Expression, Node, Subscript, UnaryOp};
    use crate::types::SourceLanguage;

    /// `struct pt { int x; } p, *pp; int a[4]; int n;`
    fn unit() -> CompUnit
    {
        let mut b = UnitBuilder::new(SourceLanguage::C, 8);
        let root = b.root();
        let int = b.add(root, DW_TAG_base_type);
        b.set_name(int, "int").set_int(int, DW_AT_byte_size, 4);
        b.set_int(int, DW_AT_encoding, i64::from(DW_ATE_signed.0));
        let pt = b.add(root, DW_TAG_structure_type);
        b.set_name(pt, "pt").set_int(pt, DW_AT_byte_size, 4);
        let x = b.add(pt, DW_TAG_member);
        b.set_name(x, "x").set_ref(x, DW_AT_type, int).set_int(x, DW_AT_data_member_location, 0);
        let ptr = b.add(root, DW_TAG_pointer_type);
        b.set_ref(ptr, DW_AT_type, pt).set_int(ptr, DW_AT_byte_size, 8);
        let arr = b.add(root, DW_TAG_array_type);
        b.set_ref(arr, DW_AT_type, int);
        let sub = b.add(arr, DW_TAG_subrange_type);
        b.set_int(sub, DW_AT_upper_bound, 3);
        for (name, ty) in [("p", pt), ("pp", ptr), ("a", arr), ("n", int)] {
            let var = b.add(root, DW_TAG_variable);
            b.set_name(var, name).set_ref(var, DW_AT_type, ty);
        }
        CompUnit::new(b.build()).unwrap()
    }

    fn parse(unit: &CompUnit, text: &str) -> Node
    {
        let ctx = EvalContext::new(unit);
        Expression::parse(&ctx, text).unwrap().root().clone()
    }

    fn int(value: i64) -> Node
    {
        Node::IntConstant { value, size: 4 }
    }

    #[test]
    fn test_precedence()
    {
        let unit = unit();
        assert_eq!(
            parse(&unit, "1 + 2 * 3 << 1"),
            Node::binary(
                BinaryOp::Shl,
                Node::binary(BinaryOp::Add, int(1), Node::binary(BinaryOp::Mul, int(2), int(3))),
                int(1)
            )
        );
        assert!(matches!(parse(&unit, "1 || 0 && 2"), Node::Binary { op: BinaryOp::LogOr, .. }));
        assert!(matches!(parse(&unit, "1 , 2"), Node::Binary { op: BinaryOp::Comma, .. }));
    }

    #[test]
    fn test_assignment_is_right_associative()
    {
        let unit = unit();
        let Node::Assign { op: None, value, .. } = parse(&unit, "n = n += 2") else {
            panic!("expected assignment");
        };
        assert!(matches!(*value, Node::Assign { op: Some(BinaryOp::Add), .. }));
    }

    #[test]
    fn test_conditional()
    {
        let unit = unit();
        assert!(matches!(parse(&unit, "n ? 1 : 2"), Node::Conditional { .. }));
        let ctx = EvalContext::new(&unit);
        let err = Expression::parse(&ctx, "n ? 1").unwrap_err();
        assert_eq!(err.to_string(), "Missing : for conditional expression");
    }

    #[test]
    fn test_postfix_forms()
    {
        let unit = unit();
        let Node::Member { object, name } = parse(&unit, "pp->x") else {
            panic!("expected member");
        };
        assert_eq!(name, "x");
        assert!(matches!(*object, Node::Unary { op: UnaryOp::Deref, .. }));

        let Node::Array { subscripts, .. } = parse(&unit, "a[1][2]") else {
            panic!("expected array");
        };
        assert_eq!(subscripts, vec![Subscript::Index(int(1)), Subscript::Index(int(2))]);

        let Node::Array { subscripts, .. } = parse(&unit, "a[1:]") else {
            panic!("expected array");
        };
        assert_eq!(subscripts, vec![Subscript::Range { lower: Some(int(1)), upper: None }]);

        assert!(matches!(parse(&unit, "n++"), Node::Unary { op: UnaryOp::PostInc, .. }));
    }

    #[test]
    fn test_casts_and_sizeof()
    {
        let unit = unit();
        assert!(matches!(parse(&unit, "(struct pt *) 0"), Node::Cast { ty: Some(_), .. }));
        assert!(matches!(parse(&unit, "(unsigned long) n"), Node::Cast { ty: Some(_), .. }));
        assert!(matches!(parse(&unit, "sizeof (int)"), Node::SizeofType(Some(_))));
        assert!(matches!(parse(&unit, "sizeof n"), Node::SizeofExpr(_)));
        // a parenthesized variable is not a cast
        assert!(matches!(parse(&unit, "(n) - 1"), Node::Binary { op: BinaryOp::Sub, .. }));
    }

    #[test]
    fn test_literals()
    {
        let unit = unit();
        assert_eq!(parse(&unit, "\"ab\" \"cd\""), Node::StringConstant("abcd".to_string()));
        assert_eq!(parse(&unit, "5000000000"), Node::IntConstant { value: 5_000_000_000, size: 8 });
        assert_eq!(parse(&unit, "{1, 2}"), Node::Vector(vec![int(1), int(2)]));
        assert_eq!(parse(&unit, "'a'"), Node::CharConstant(b'a'));
    }

    #[test]
    fn test_trailing_tokens_are_rejected()
    {
        let unit = unit();
        let ctx = EvalContext::new(&unit);
        let err = Expression::parse(&ctx, "n n").unwrap_err();
        assert_eq!(err.to_string(), "A syntax error in expression, near `n'.");

        let prefix = Expression::parse_prefix(&ctx, "n + 1 if x").unwrap();
        assert_eq!(prefix.consumed(), 6);
        assert_eq!(prefix.text(), "n + 1");
    }
}
