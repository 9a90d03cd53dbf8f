//! # Expressions
//!
//! Two front ends, one tree. The C dialect and the Fortran dialect each have
//! their own tokenizer rules and recursive-descent grammar, and both build
//! the same [`Node`] tree. Evaluation walks that tree against an
//! [`EvalContext`] and produces a [`Value`] together with its static type.
//!
//! Symbols are resolved while parsing: identifiers become [`Node::Identifier`]
//! holding the entry's [`DieId`], so a parsed expression is only meaningful
//! for the unit it was parsed against.
//!
//! ## Example
//!
//! ```rust
//! use ferrule_core::context::EvalContext;
//! use ferrule_core::dwarf::{CompUnit, UnitBuilder};
//! use ferrule_core::expr::{BinaryOp, Expression, Node};
//! use ferrule_core::types::SourceLanguage;
//! use ferrule_core::value::Value;
//!
//! let unit = CompUnit::new(UnitBuilder::new(SourceLanguage::C, 8).build()).unwrap();
//! let mut ctx = EvalContext::new(&unit);
//!
//! let expr = Expression::parse(&ctx, "1 + 2 * 3").unwrap();
//! assert!(matches!(expr.root(), Node::Binary { op: BinaryOp::Add, .. }));
//! assert_eq!(expr.evaluate(&mut ctx).unwrap().value, Value::Integer(7));
//! ```

use tracing::debug;

use crate::context::EvalContext;
use crate::dwarf::DieId;
use crate::error::FerruleResult;
use crate::types::RegisterId;
use crate::value::Value;
use crate::variant::{declare, display, Type};

mod c_parser;
mod call;
mod eval;
mod fortran_parser;
mod intrinsic;
mod parser;
pub mod token;
mod typespec;

pub use eval::Evaluated;
pub use intrinsic::Intrinsic;

/// Prefix operators and the four increment forms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp
{
    Neg,
    Plus,
    Not,
    BitNot,
    Deref,
    AddressOf,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp
{
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    /// Fortran `**`
    Power,
    /// Fortran `//`
    Concat,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    /// Fortran `.EQV.`
    Equiv,
    /// Fortran `.NEQV.`
    Nequiv,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogAnd,
    LogOr,
    Comma,
}

impl BinaryOp
{
    /// C spelling of the operator
    #[must_use]
    pub const fn symbol(self) -> &'static str
    {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Power => "**",
            BinaryOp::Concat => "//",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Equiv => ".EQV.",
            BinaryOp::Nequiv => ".NEQV.",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::LogAnd => "&&",
            BinaryOp::LogOr => "||",
            BinaryOp::Comma => ",",
        }
    }

    /// Relational operators, which produce a boolean
    #[must_use]
    pub const fn is_comparison(self) -> bool
    {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    /// Operators defined only on integral operands
    #[must_use]
    pub const fn needs_integers(self) -> bool
    {
        matches!(
            self,
            BinaryOp::Rem | BinaryOp::Shl | BinaryOp::Shr | BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor
        )
    }

    /// Name of the C++ member or free function overloading this operator
    #[must_use]
    pub fn overload_name(self) -> Option<String>
    {
        match self {
            BinaryOp::Power | BinaryOp::Concat | BinaryOp::Equiv | BinaryOp::Nequiv | BinaryOp::Comma => None,
            other => Some(format!("operator{}", other.symbol())),
        }
    }
}

/// One slot of a subscript list
#[derive(Debug, Clone, PartialEq)]
pub enum Subscript
{
    Index(Node),
    /// `lo:hi`; a missing bound is the dimension's own bound
    Range
    {
        lower: Option<Node>, upper: Option<Node>
    },
}

/// Expression tree shared by both dialects
#[derive(Debug, Clone, PartialEq)]
pub enum Node
{
    IntConstant
    {
        value: i64, size: usize
    },
    RealConstant
    {
        value: f64, size: usize
    },
    CharConstant(u8),
    StringConstant(String),
    /// Fortran `.TRUE.` / `.FALSE.`
    LogicalConstant(bool),
    /// A variable, parameter, enumerator, function or type name
    Identifier(DieId),
    /// Several entries share the name (overloaded functions)
    IdentifierSet(Vec<DieId>),
    /// A Fortran intrinsic named without arguments
    Intrinsic(Intrinsic),
    Register
    {
        id: RegisterId, name: String
    },
    /// Debugger convenience variable, spelled with its `$`
    DebuggerVariable(String),
    Unary
    {
        op: UnaryOp, operand: Box<Node>
    },
    Binary
    {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Conditional
    {
        condition: Box<Node>,
        then: Box<Node>,
        otherwise: Box<Node>,
    },
    /// `target = value`, or `target op= value` when `op` is set
    Assign
    {
        op: Option<BinaryOp>,
        target: Box<Node>,
        value: Box<Node>,
    },
    Member
    {
        object: Box<Node>, name: String
    },
    Array
    {
        array: Box<Node>, subscripts: Vec<Subscript>
    },
    Call
    {
        function: Box<Node>, args: Vec<Node>
    },
    IntrinsicCall
    {
        intrinsic: Intrinsic, args: Vec<Node>
    },
    /// `(type) operand`; `None` is `void`
    Cast
    {
        ty: Option<DieId>, operand: Box<Node>
    },
    /// Fortran `operand_kind`
    KindCast
    {
        operand: Box<Node>, kind: Box<Node>
    },
    SizeofType(Option<DieId>),
    SizeofExpr(Box<Node>),
    /// `{a, b}` in C, `(/ a, b /)` in Fortran
    Vector(Vec<Node>),
    /// Fortran derived-type constructor `point(1, 2)`
    Constructor
    {
        ty: DieId, values: Vec<Node>
    },
}

impl Node
{
    pub(crate) fn unary(op: UnaryOp, operand: Node) -> Self
    {
        Node::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub(crate) fn binary(op: BinaryOp, left: Node, right: Node) -> Self
    {
        Node::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Evaluate to a value, loading lvalues
    ///
    /// ## Errors
    ///
    /// Any evaluation failure: missing process, unreadable memory, type
    /// errors in operators, unresolved members.
    pub fn evaluate(&self, ctx: &mut EvalContext<'_>) -> FerruleResult<Value>
    {
        Ok(eval::evaluate(ctx, self)?.value)
    }
}

/// A parsed expression together with its source text
#[derive(Debug, Clone, PartialEq)]
pub struct Expression
{
    text: String,
    root: Node,
    consumed: usize,
}

impl Expression
{
    /// Parse all of `text` in the context's dialect
    ///
    /// Names are resolved against the context's unit and selected frame.
    ///
    /// ## Errors
    ///
    /// [`FerruleError::Syntax`](crate::error::FerruleError::Syntax) for
    /// malformed input or trailing text, and lookup errors for unknown names.
    pub fn parse(ctx: &EvalContext<'_>, text: &str) -> FerruleResult<Self>
    {
        let (root, consumed) = parser::Parser::new(ctx, text)?.parse_all()?;
        debug!(expression = text, "parsed expression");
        Ok(Self {
            text: text.to_string(),
            root,
            consumed,
        })
    }

    /// Parse the longest expression at the start of `text`
    ///
    /// [`Expression::consumed`] tells where parsing stopped, for commands that
    /// take an expression followed by more arguments.
    ///
    /// ## Errors
    ///
    /// See [`Expression::parse`].
    pub fn parse_prefix(ctx: &EvalContext<'_>, text: &str) -> FerruleResult<Self>
    {
        let (root, consumed) = parser::Parser::new(ctx, text)?.parse_prefix()?;
        Ok(Self {
            text: text[..consumed].trim_end().to_string(),
            root,
            consumed,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Node
    {
        &self.root
    }

    #[must_use]
    pub fn text(&self) -> &str
    {
        &self.text
    }

    /// Bytes of the input used by the expression
    #[must_use]
    pub fn consumed(&self) -> usize
    {
        self.consumed
    }

    /// Evaluate to a value and its static type
    ///
    /// ## Errors
    ///
    /// See [`Node::evaluate`].
    pub fn evaluate<'a>(&self, ctx: &mut EvalContext<'a>) -> FerruleResult<Evaluated<'a>>
    {
        eval::evaluate(ctx, &self.root).inspect_err(|err| {
            debug!(expression = %self.text, error = %err, "evaluation failed");
        })
    }

    /// Type of the expression without evaluating it
    ///
    /// `None` when the type is `void` or cannot be known statically.
    ///
    /// ## Errors
    ///
    /// Propagates decoding failures.
    pub fn static_type<'a>(&self, ctx: &EvalContext<'a>) -> FerruleResult<Option<Type<'a>>>
    {
        eval::static_type(ctx, &self.root)
    }

    /// Name of the expression's type in the context's language
    ///
    /// ## Errors
    ///
    /// Propagates decoding failures.
    pub fn type_name(&self, ctx: &EvalContext<'_>) -> FerruleResult<String>
    {
        declare::type_name(self.static_type(ctx)?, ctx.language)
    }

    /// Evaluate and render the result for display
    ///
    /// ## Errors
    ///
    /// See [`Node::evaluate`] and [`display::print_value`].
    pub fn print(&self, ctx: &mut EvalContext<'_>) -> FerruleResult<String>
    {
        let result = self.evaluate(ctx)?;
        display::print_value(ctx, result.ty, &result.value, 0).inspect_err(|err| {
            debug!(expression = %self.text, error = %err, "printing failed");
        })
    }
}
