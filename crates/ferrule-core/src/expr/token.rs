//! Tokenizer for both expression dialects.
//!
//! The whole input is split up front; parsers walk the token vector with
//! arbitrary lookahead. Keywords are not distinguished here: C type names and
//! Fortran type names arrive as [`TokenKind::Ident`] and the grammar decides.

use std::fmt;

use crate::error::{FerruleError, FerruleResult};
use crate::expr::BinaryOp;
use crate::types::{Architecture, RegisterId};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind
{
    Ident(String),
    Int(i64),
    Real
    {
        value: f64,
        /// Fortran `d` exponent
        double: bool,
    },
    Char(u8),
    Str(String),
    /// `$name` naming a register of the target architecture
    Register
    {
        id: RegisterId, name: String
    },
    /// Any other `$name`, spelled with its dollar signs
    Variable(String),
    /// Fortran `.TRUE.` and `.FALSE.`
    Logical(bool),

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Power,
    Concat,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    AndAnd,
    OrOr,
    Shl,
    Shr,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Equiv,
    Nequiv,
    Assign,
    /// Compound assignment such as `+=`
    AssignOp(BinaryOp),
    Inc,
    Dec,
    Question,
    Colon,
    ColonColon,
    Comma,
    Dot,
    Arrow,
    At,
    /// Fortran kind separator in `4_8`
    Underscore,
    LParen,
    RParen,
    LBracket,
    RBracket,
    /// `{` in C, `(/` in Fortran
    LBrace,
    /// `}` in C, `/)` in Fortran
    RBrace,
    Eof,
}

impl fmt::Display for TokenKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let text = match self {
            TokenKind::Ident(name) | TokenKind::Variable(name) => return f.write_str(name),
            TokenKind::Register { name, .. } => return write!(f, "${name}"),
            TokenKind::Int(v) => return write!(f, "{v}"),
            TokenKind::Real { value, .. } => return write!(f, "{value}"),
            TokenKind::Char(c) => return write!(f, "'{}'", char::from(*c)),
            TokenKind::Str(s) => return write!(f, "\"{s}\""),
            TokenKind::Logical(true) => ".TRUE.",
            TokenKind::Logical(false) => ".FALSE.",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Power => "**",
            TokenKind::Concat => "//",
            TokenKind::Amp => "&",
            TokenKind::Pipe => "|",
            TokenKind::Caret => "^",
            TokenKind::Tilde => "~",
            TokenKind::Bang => "!",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Shl => "<<",
            TokenKind::Shr => ">>",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::Equiv => ".EQV.",
            TokenKind::Nequiv => ".NEQV.",
            TokenKind::Assign => "=",
            TokenKind::AssignOp(op) => return write!(f, "{}=", op.symbol()),
            TokenKind::Inc => "++",
            TokenKind::Dec => "--",
            TokenKind::Question => "?",
            TokenKind::Colon => ":",
            TokenKind::ColonColon => "::",
            TokenKind::Comma => ",",
            TokenKind::Dot => ".",
            TokenKind::Arrow => "->",
            TokenKind::At => "@",
            TokenKind::Underscore => "_",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Eof => "end of expression",
        };
        f.write_str(text)
    }
}

/// A token and the byte offset it starts at
#[derive(Debug, Clone, PartialEq)]
pub struct Token
{
    pub kind: TokenKind,
    pub offset: usize,
}

pub struct Lexer<'t>
{
    bytes: &'t [u8],
    pos: usize,
    fortran: bool,
    arch: Architecture,
}

const C_OPERATORS: &[(&str, TokenKind)] = &[
    ("<<=", TokenKind::AssignOp(BinaryOp::Shl)),
    (">>=", TokenKind::AssignOp(BinaryOp::Shr)),
    ("->", TokenKind::Arrow),
    ("++", TokenKind::Inc),
    ("--", TokenKind::Dec),
    ("+=", TokenKind::AssignOp(BinaryOp::Add)),
    ("-=", TokenKind::AssignOp(BinaryOp::Sub)),
    ("*=", TokenKind::AssignOp(BinaryOp::Mul)),
    ("/=", TokenKind::AssignOp(BinaryOp::Div)),
    ("%=", TokenKind::AssignOp(BinaryOp::Rem)),
    ("&=", TokenKind::AssignOp(BinaryOp::BitAnd)),
    ("|=", TokenKind::AssignOp(BinaryOp::BitOr)),
    ("^=", TokenKind::AssignOp(BinaryOp::BitXor)),
    ("&&", TokenKind::AndAnd),
    ("||", TokenKind::OrOr),
    ("<<", TokenKind::Shl),
    (">>", TokenKind::Shr),
    ("<=", TokenKind::Le),
    (">=", TokenKind::Ge),
    ("==", TokenKind::EqEq),
    ("!=", TokenKind::NotEq),
    ("::", TokenKind::ColonColon),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
    ("%", TokenKind::Percent),
    ("&", TokenKind::Amp),
    ("|", TokenKind::Pipe),
    ("^", TokenKind::Caret),
    ("~", TokenKind::Tilde),
    ("!", TokenKind::Bang),
    ("<", TokenKind::Lt),
    (">", TokenKind::Gt),
    ("=", TokenKind::Assign),
    ("?", TokenKind::Question),
    (":", TokenKind::Colon),
    (",", TokenKind::Comma),
    (".", TokenKind::Dot),
    ("@", TokenKind::At),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    ("[", TokenKind::LBracket),
    ("]", TokenKind::RBracket),
    ("{", TokenKind::LBrace),
    ("}", TokenKind::RBrace),
];

const FORTRAN_OPERATORS: &[(&str, TokenKind)] = &[
    ("**", TokenKind::Power),
    ("//", TokenKind::Concat),
    ("/=", TokenKind::NotEq),
    ("(/", TokenKind::LBrace),
    ("/)", TokenKind::RBrace),
    ("==", TokenKind::EqEq),
    ("<=", TokenKind::Le),
    (">=", TokenKind::Ge),
    ("<<", TokenKind::Shl),
    (">>", TokenKind::Shr),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
    ("%", TokenKind::Percent),
    ("<", TokenKind::Lt),
    (">", TokenKind::Gt),
    ("=", TokenKind::Assign),
    (":", TokenKind::Colon),
    (",", TokenKind::Comma),
    ("_", TokenKind::Underscore),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
];

/// Fortran `.OP.` keyword
fn dotted_operator(word: &str) -> Option<TokenKind>
{
    Some(match word.to_ascii_uppercase().as_str() {
        "LT" => TokenKind::Lt,
        "GT" => TokenKind::Gt,
        "LE" => TokenKind::Le,
        "GE" => TokenKind::Ge,
        "EQ" => TokenKind::EqEq,
        "NE" => TokenKind::NotEq,
        "NOT" => TokenKind::Bang,
        "AND" => TokenKind::Amp,
        "OR" => TokenKind::Pipe,
        "EQV" => TokenKind::Equiv,
        "NEQV" => TokenKind::Nequiv,
        "TRUE" => TokenKind::Logical(true),
        "FALSE" => TokenKind::Logical(false),
        _ => return None,
    })
}

impl<'t> Lexer<'t>
{
    pub fn new(text: &'t str, fortran: bool, arch: Architecture) -> Self
    {
        Self {
            bytes: text.as_bytes(),
            pos: 0,
            fortran,
            arch,
        }
    }

    /// Split the whole input, ending with [`TokenKind::Eof`]
    ///
    /// ## Errors
    ///
    /// Returns [`FerruleError::Syntax`] on malformed literals and characters
    /// that start no token.
    pub fn tokenize(mut self) -> FerruleResult<Vec<Token>>
    {
        let mut tokens = Vec::new();
        loop {
            while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
                self.pos += 1;
            }
            let offset = self.pos;
            let Some(byte) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    offset,
                });
                return Ok(tokens);
            };
            let kind = self.token(byte)?;
            tokens.push(Token { kind, offset });
        }
    }

    fn peek(&self) -> Option<u8>
    {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8>
    {
        self.bytes.get(self.pos + offset).copied()
    }

    fn text(&self, start: usize) -> String
    {
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    fn token(&mut self, byte: u8) -> FerruleResult<TokenKind>
    {
        match byte {
            b'0'..=b'9' => self.number(),
            b'.' if self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) => self.number(),
            b'.' if self.fortran => self.dotted(),
            b'$' => Ok(self.dollar()),
            b'"' => self.string(b'"', true),
            b'\'' if self.fortran => self.string(b'\'', false),
            b'\'' => self.character(),
            b'a'..=b'z' | b'A'..=b'Z' => self.word(),
            b'_' if !self.fortran => self.word(),
            _ => self.operator(),
        }
    }

    fn word(&mut self) -> FerruleResult<TokenKind>
    {
        let start = self.pos;
        if self.fortran && matches!(self.peek_at(1), Some(b'\'' | b'"')) {
            let radix = match self.peek().map(|b| b.to_ascii_uppercase()) {
                Some(b'B') => Some((2, "binary")),
                Some(b'O') => Some((8, "octal")),
                Some(b'Z') => Some((16, "hex")),
                _ => None,
            };
            if let Some((radix, name)) = radix {
                self.pos += 1;
                return self.based_literal(radix, name);
            }
        }
        while self.peek().is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_') {
            self.pos += 1;
        }
        Ok(TokenKind::Ident(self.text(start)))
    }

    /// `B'101'`, `O'17'`, `Z'ff'`; the position is on the quote
    fn based_literal(&mut self, radix: u32, name: &str) -> FerruleResult<TokenKind>
    {
        let invalid = || FerruleError::syntax(format!("Invalid {name} number"));
        let quote = self.peek().ok_or_else(invalid)?;
        self.pos += 1;
        let start = self.pos;
        while self.peek().is_some_and(|b| b != quote) {
            self.pos += 1;
        }
        let digits = self.text(start);
        if self.peek() != Some(quote) {
            return Err(invalid());
        }
        self.pos += 1;
        let value = u64::from_str_radix(&digits, radix).map_err(|_| invalid())?;
        #[allow(clippy::cast_possible_wrap)]
        let value = value as i64;
        Ok(TokenKind::Int(value))
    }

    fn digits(&mut self, accept: impl Fn(u8) -> bool)
    {
        while self.peek().is_some_and(&accept) {
            self.pos += 1;
        }
    }

    fn number(&mut self) -> FerruleResult<TokenKind>
    {
        let start = self.pos;
        if !self.fortran && self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.pos += 2;
            let digits_start = self.pos;
            self.digits(|b| b.is_ascii_hexdigit());
            let digits = self.text(digits_start);
            let value = u64::from_str_radix(&digits, 16)
                .map_err(|_| FerruleError::syntax(format!("Invalid number \"{}\"", self.text(start))))?;
            self.integer_suffix();
            #[allow(clippy::cast_possible_wrap)]
            let value = value as i64;
            return Ok(TokenKind::Int(value));
        }

        self.digits(|b| b.is_ascii_digit());
        let mut real = false;
        if self.peek() == Some(b'.') && !self.dotted_operator_follows() {
            real = true;
            self.pos += 1;
            self.digits(|b| b.is_ascii_digit());
        }
        let mut double = false;
        if let Some(marker) = self.peek() {
            let exponent = matches!(marker, b'e' | b'E') || (self.fortran && matches!(marker, b'd' | b'D'));
            let sign = usize::from(matches!(self.peek_at(1), Some(b'+' | b'-')));
            if exponent && self.peek_at(1 + sign).is_some_and(|b| b.is_ascii_digit()) {
                real = true;
                double = matches!(marker, b'd' | b'D');
                self.pos += 1 + sign;
                self.digits(|b| b.is_ascii_digit());
            }
        }
        let text = self.text(start);
        if real {
            let value: f64 = text
                .replace(['d', 'D'], "e")
                .parse()
                .map_err(|_| FerruleError::syntax(format!("Invalid number \"{text}\"")))?;
            return Ok(TokenKind::Real { value, double });
        }
        let value = if !self.fortran && text.len() > 1 && text.starts_with('0') {
            u64::from_str_radix(&text[1..], 8)
        } else {
            text.parse::<u64>()
        }
        .map_err(|_| FerruleError::syntax(format!("Invalid number \"{text}\"")))?;
        if !self.fortran {
            self.integer_suffix();
        }
        #[allow(clippy::cast_possible_wrap)]
        let value = value as i64;
        Ok(TokenKind::Int(value))
    }

    fn integer_suffix(&mut self)
    {
        self.digits(|b| matches!(b, b'u' | b'U' | b'l' | b'L'));
    }

    /// Fortran `1.lt.2`: the dot after the digits starts an operator
    fn dotted_operator_follows(&self) -> bool
    {
        if !self.fortran {
            return false;
        }
        let mut i = 1;
        while self.peek_at(i).is_some_and(|b| b.is_ascii_alphabetic()) {
            i += 1;
        }
        if i == 1 || self.peek_at(i) != Some(b'.') {
            return false;
        }
        let word = String::from_utf8_lossy(&self.bytes[self.pos + 1..self.pos + i]).into_owned();
        dotted_operator(&word).is_some()
    }

    fn dotted(&mut self) -> FerruleResult<TokenKind>
    {
        self.pos += 1;
        let start = self.pos;
        self.digits(|b| b.is_ascii_alphabetic());
        let word = self.text(start);
        if self.peek() != Some(b'.') {
            return Err(FerruleError::syntax("Missing . for operator"));
        }
        self.pos += 1;
        dotted_operator(&word).ok_or_else(|| FerruleError::syntax(format!("No such operator: {}", word.to_ascii_uppercase())))
    }

    fn dollar(&mut self) -> TokenKind
    {
        let start = self.pos;
        self.pos += 1;
        if self.peek() == Some(b'$') {
            self.pos += 1;
        }
        let name_start = self.pos;
        self.digits(|b| b.is_ascii_alphanumeric() || b == b'_');
        let name = self.text(name_start);
        let spelled = self.text(start);
        if name_start == start + 1 && !name.is_empty() {
            if let Some(id) = self.arch.register_by_name(&name) {
                return TokenKind::Register { id, name };
            }
        }
        TokenKind::Variable(spelled)
    }

    fn escape(&mut self) -> FerruleResult<u8>
    {
        let byte = self
            .peek()
            .ok_or_else(|| FerruleError::syntax("Unterminated string/character constant"))?;
        self.pos += 1;
        Ok(match byte {
            b'n' => b'\n',
            b't' => b'\t',
            b'r' => b'\r',
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0c,
            b'v' => 0x0b,
            b'x' => {
                let start = self.pos;
                self.digits(|b| b.is_ascii_hexdigit());
                u8::from_str_radix(&self.text(start), 16).map_err(|_| FerruleError::syntax("Invalid escape sequence"))?
            }
            b'0'..=b'7' => {
                let start = self.pos - 1;
                while self.pos - start < 3 && self.peek().is_some_and(|b| (b'0'..=b'7').contains(&b)) {
                    self.pos += 1;
                }
                u8::from_str_radix(&self.text(start), 8).map_err(|_| FerruleError::syntax("Invalid escape sequence"))?
            }
            other => other,
        })
    }

    fn quoted(&mut self, quote: u8, escapes: bool) -> FerruleResult<Vec<u8>>
    {
        self.pos += 1;
        let mut bytes = Vec::new();
        loop {
            match self.peek() {
                None => return Err(FerruleError::syntax("Unterminated string/character constant")),
                Some(b) if b == quote => {
                    self.pos += 1;
                    return Ok(bytes);
                }
                Some(b'\\') if escapes => {
                    self.pos += 1;
                    bytes.push(self.escape()?);
                }
                Some(b) => {
                    self.pos += 1;
                    bytes.push(b);
                }
            }
        }
    }

    fn string(&mut self, quote: u8, escapes: bool) -> FerruleResult<TokenKind>
    {
        let bytes = self.quoted(quote, escapes)?;
        Ok(TokenKind::Str(String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn character(&mut self) -> FerruleResult<TokenKind>
    {
        let bytes = self.quoted(b'\'', true)?;
        match bytes.as_slice() {
            [single] => Ok(TokenKind::Char(*single)),
            _ => Ok(TokenKind::Str(String::from_utf8_lossy(&bytes).into_owned())),
        }
    }

    fn operator(&mut self) -> FerruleResult<TokenKind>
    {
        let table = if self.fortran { FORTRAN_OPERATORS } else { C_OPERATORS };
        let rest = &self.bytes[self.pos..];
        for (spelling, kind) in table {
            if rest.starts_with(spelling.as_bytes()) {
                self.pos += spelling.len();
                return Ok(kind.clone());
            }
        }
        let shown = String::from_utf8_lossy(rest).chars().next().unwrap_or(char::REPLACEMENT_CHARACTER);
        Err(FerruleError::syntax(format!("Illegal character '{shown}'")))
    }
}

/// Tokenize `text` in one dialect
///
/// ## Errors
///
/// See [`Lexer::tokenize`].
pub fn tokenize(text: &str, fortran: bool, arch: Architecture) -> FerruleResult<Vec<Token>>
{
    Lexer::new(text, fortran, arch).tokenize()
}
