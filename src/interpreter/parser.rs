use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::error::{ParseError, ParseResult};

use super::ast::{BinaryOp, NodeId, NodeKind, RuleTree, UnaryOp};
use super::value::Value;

/// Lexical category of a [`Token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier or integer lexeme.
    Id,
    /// `.`
    Dot,
    /// `(`
    OpenPar,
    /// `)`
    ClosePar,
    /// `==`
    Equals,
    /// `!=`
    NotEquals,
    /// `>`
    Greater,
    /// `>=`
    GreaterEquals,
    /// `<`
    Less,
    /// `<=`
    LessEquals,
    /// `!`
    Not,
    /// `,`
    Comma,
}

impl TokenKind {
    fn binary_op(self) -> Option<BinaryOp> {
        match self {
            TokenKind::Equals => Some(BinaryOp::Equals),
            TokenKind::NotEquals => Some(BinaryOp::NotEquals),
            TokenKind::Greater => Some(BinaryOp::Greater),
            TokenKind::GreaterEquals => Some(BinaryOp::GreaterEquals),
            TokenKind::Less => Some(BinaryOp::Less),
            TokenKind::LessEquals => Some(BinaryOp::LessEquals),
            _ => None,
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Id => "ID",
            TokenKind::Dot => "DOT",
            TokenKind::OpenPar => "OPENPAR",
            TokenKind::ClosePar => "CLOSEPAR",
            TokenKind::Equals => "EQUALS",
            TokenKind::NotEquals => "NOTEQUALS",
            TokenKind::Greater => "GREATER",
            TokenKind::GreaterEquals => "GREATEREQUALS",
            TokenKind::Less => "LESS",
            TokenKind::LessEquals => "LESSEQUALS",
            TokenKind::Not => "NOT",
            TokenKind::Comma => "COMMA",
        };
        f.write_str(name)
    }
}

/// A lexeme tagged with its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Category.
    pub kind: TokenKind,
    /// Matched text.
    pub lexeme: String,
    /// Byte offset into the input.
    pub offset: usize,
}

// Priority order matters: two-character operators precede their prefixes.
const PATTERNS: &[(TokenKind, &str)] = &[
    (TokenKind::Id, r"^[A-Za-z0-9_]+"),
    (TokenKind::Dot, r"^\."),
    (TokenKind::OpenPar, r"^\("),
    (TokenKind::ClosePar, r"^\)"),
    (TokenKind::Equals, r"^=="),
    (TokenKind::NotEquals, r"^!="),
    (TokenKind::Not, r"^!"),
    (TokenKind::GreaterEquals, r"^>="),
    (TokenKind::Greater, r"^>"),
    (TokenKind::LessEquals, r"^<="),
    (TokenKind::Less, r"^<"),
    (TokenKind::Comma, r"^,"),
];

fn patterns() -> &'static [(TokenKind, Regex)] {
    static COMPILED: OnceLock<Vec<(TokenKind, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        PATTERNS
            .iter()
            .filter_map(|(kind, pattern)| Regex::new(pattern).ok().map(|re| (*kind, re)))
            .collect()
    })
}

/// Split an expression string into tokens, skipping whitespace.
pub fn tokenize(input: &str) -> ParseResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut offset = 0;
    while offset < input.len() {
        let rest = &input[offset..];
        let trimmed = rest.trim_start();
        if trimmed.is_empty() {
            break;
        }
        offset += rest.len() - trimmed.len();

        let matched = patterns()
            .iter()
            .find_map(|(kind, re)| re.find(trimmed).map(|m| (*kind, m.as_str())));
        let Some((kind, lexeme)) = matched else {
            return Err(ParseError::Syntax {
                input: input.to_string(),
                position: offset,
                detail: format!(
                    "unexpected character '{}'",
                    trimmed.chars().next().unwrap_or_default()
                ),
            });
        };
        tokens.push(Token {
            kind,
            lexeme: lexeme.to_string(),
            offset,
        });
        offset += lexeme.len();
    }
    Ok(tokens)
}

/// Parse `input` into expression nodes appended to `tree`, returning the
/// top node.
pub fn parse_expression(tree: &mut RuleTree, input: &str) -> ParseResult<NodeId> {
    let tokens = tokenize(input)?;
    let mut parser = ExprParser {
        tree,
        input,
        tokens,
        pos: 0,
    };
    let node = parser.expression()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(node)
}

struct ExprParser<'a> {
    tree: &'a mut RuleTree,
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser<'_> {
    fn peek(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos).map(|token| token.kind)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<Token> {
        match self.next() {
            Some(token) if token.kind == kind => Ok(token),
            Some(token) => {
                self.pos -= 1;
                Err(self.error(&format!("expected {} but found '{}'", kind, token.lexeme)))
            }
            None => Err(self.error(&format!("expected {} but input ended", kind))),
        }
    }

    fn error(&self, detail: &str) -> ParseError {
        ParseError::Syntax {
            input: self.input.to_string(),
            position: self.pos,
            detail: detail.to_string(),
        }
    }

    // E -> T (BIN T)*
    fn expression(&mut self) -> ParseResult<NodeId> {
        let mut lhs = self.term()?;
        while let Some(op) = self.peek().and_then(TokenKind::binary_op) {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = self.tree.push(NodeKind::Binary { op, lhs, rhs });
        }
        Ok(lhs)
    }

    // T -> '!' T | '(' E ')' | F
    fn term(&mut self) -> ParseResult<NodeId> {
        match self.peek() {
            Some(TokenKind::Not) => {
                self.pos += 1;
                let operand = self.term()?;
                Ok(self.tree.push(NodeKind::Unary {
                    op: UnaryOp::Not,
                    operand,
                }))
            }
            Some(TokenKind::OpenPar) => {
                self.pos += 1;
                let inner = self.expression()?;
                self.expect(TokenKind::ClosePar)?;
                Ok(inner)
            }
            Some(TokenKind::Id) => self.path(),
            Some(_) => {
                let lexeme = self.tokens[self.pos].lexeme.clone();
                Err(self.error(&format!("unexpected '{}'", lexeme)))
            }
            None => Err(self.error("expected an expression")),
        }
    }

    // F -> P ('.' P)*
    fn path(&mut self) -> ParseResult<NodeId> {
        let head = self.expect(TokenKind::Id)?;
        let mut current = if self.peek() == Some(TokenKind::OpenPar) {
            let args = self.arguments()?;
            self.tree.push(NodeKind::FunctionCall {
                receiver: None,
                name: head.lexeme,
                args,
            })
        } else {
            let kind = atom(&head.lexeme)
                .map(NodeKind::Literal)
                .unwrap_or(NodeKind::Variable(head.lexeme));
            self.tree.push(kind)
        };

        while self.peek() == Some(TokenKind::Dot) {
            self.pos += 1;
            let member = self.expect(TokenKind::Id)?;
            current = if self.peek() == Some(TokenKind::OpenPar) {
                let args = self.arguments()?;
                self.tree.push(NodeKind::FunctionCall {
                    receiver: Some(current),
                    name: member.lexeme,
                    args,
                })
            } else {
                let key = match member.lexeme.parse::<i64>() {
                    Ok(index) => NodeKind::Literal(Value::Int(index)),
                    Err(_) => NodeKind::Variable(member.lexeme),
                };
                let rhs = self.tree.push(key);
                self.tree.push(NodeKind::Binary {
                    op: BinaryOp::Dot,
                    lhs: current,
                    rhs,
                })
            };
        }
        Ok(current)
    }

    // '(' [E (',' E)*] ')'
    fn arguments(&mut self) -> ParseResult<Vec<NodeId>> {
        self.expect(TokenKind::OpenPar)?;
        let mut args = Vec::new();
        if self.peek() == Some(TokenKind::ClosePar) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            match self.peek() {
                Some(TokenKind::Comma) => self.pos += 1,
                _ => break,
            }
        }
        self.expect(TokenKind::ClosePar)?;
        Ok(args)
    }
}

fn atom(lexeme: &str) -> Option<Value> {
    match lexeme {
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        _ if lexeme.bytes().all(|b| b.is_ascii_digit()) => lexeme.parse().ok().map(Value::Int),
        _ => None,
    }
}
