//! The Prolog reader: a `nom` tokenizer feeding an operator precedence parser.

use crate::error::ParseError;
use crate::ops::{self, OpDef};
use crate::term::{is_symbol_char, Term};
use nom::branch::alt;
use nom::bytes::complete::{tag, take_until, take_while, take_while1};
use nom::character::complete::{
    char as pchar, digit1, hex_digit1, multispace1, not_line_ending, oct_digit1, one_of, satisfy,
};
use nom::combinator::{map, map_opt, map_res, opt, recognize, value};
use nom::multi::many0_count;
use nom::sequence::{delimited, pair, preceded, terminated, tuple};
use nom::IResult;

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Name(String),
    Var(String),
    Int(u64),
    Float(f64),
    Str(String),
    Open,
    Close,
    OpenList,
    CloseList,
    OpenCurly,
    CloseCurly,
    Comma,
    Bar,
    End,
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
    layout_before: bool,
}

fn fail(input: &str) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Char))
}

fn layout(input: &str) -> IResult<&str, &str> {
    recognize(many0_count(alt((
        multispace1,
        recognize(pair(pchar('%'), not_line_ending)),
        recognize(tuple((tag("/*"), take_until("*/"), tag("*/")))),
    ))))(input)
}

fn is_alnum(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn escape(input: &str) -> IResult<&str, Option<char>> {
    alt((
        value(None, pchar('\n')),
        map(one_of("ntrabfv\\'\"`"), |c| {
            Some(match c {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                'a' => '\u{7}',
                'b' => '\u{8}',
                'f' => '\u{c}',
                'v' => '\u{b}',
                other => other,
            })
        }),
        map_opt(delimited(pchar('x'), hex_digit1, pchar('\\')), |digits| {
            u32::from_str_radix(digits, 16)
                .ok()
                .and_then(char::from_u32)
                .map(Some)
        }),
        map_opt(terminated(oct_digit1, pchar('\\')), |digits| {
            u32::from_str_radix(digits, 8)
                .ok()
                .and_then(char::from_u32)
                .map(Some)
        }),
    ))(input)
}

/// Text between `quote` characters, with escapes and doubled quotes.
fn quoted(quote: char, input: &str) -> IResult<&str, String> {
    let (mut rest, _) = pchar(quote)(input)?;
    let mut text = String::new();
    loop {
        let mut chars = rest.chars();
        match chars.next() {
            None => return Err(fail(rest)),
            Some(c) if c == quote => {
                let after = chars.as_str();
                if after.starts_with(quote) {
                    text.push(quote);
                    rest = &after[quote.len_utf8()..];
                } else {
                    return Ok((after, text));
                }
            }
            Some('\\') => {
                let (after, escaped) = escape(chars.as_str())?;
                text.extend(escaped);
                rest = after;
            }
            Some(c) => {
                text.push(c);
                rest = chars.as_str();
            }
        }
    }
}

fn char_code(input: &str) -> IResult<&str, TokenKind> {
    let (rest, _) = tag("0'")(input)?;
    let code = |c: char| TokenKind::Int(u64::from(u32::from(c)));
    if let Some(after) = rest.strip_prefix("''") {
        return Ok((after, code('\'')));
    }
    if let Some(after) = rest.strip_prefix('\\') {
        let (after, escaped) = escape(after)?;
        let c = escaped.ok_or_else(|| fail(rest))?;
        return Ok((after, code(c)));
    }
    let mut chars = rest.chars();
    match chars.next() {
        Some(c) if c != '\'' => Ok((chars.as_str(), code(c))),
        _ => Err(fail(rest)),
    }
}

fn based_integer<'a>(
    prefix: &'static str,
    radix: u32,
    input: &'a str,
) -> IResult<&'a str, TokenKind> {
    map_res(
        preceded(tag(prefix), take_while1(move |c: char| c.is_digit(radix))),
        move |digits: &str| u64::from_str_radix(digits, radix).map(TokenKind::Int),
    )(input)
}

fn radix_integer(input: &str) -> IResult<&str, TokenKind> {
    alt((
        |input| based_integer("0x", 16, input),
        |input| based_integer("0o", 8, input),
        |input| based_integer("0b", 2, input),
    ))(input)
}

fn float(input: &str) -> IResult<&str, TokenKind> {
    map_res(
        recognize(tuple((
            digit1,
            pchar('.'),
            digit1,
            opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        ))),
        |text: &str| text.parse::<f64>().map(TokenKind::Float),
    )(input)
}

fn integer(input: &str) -> IResult<&str, TokenKind> {
    map_res(digit1, |digits: &str| digits.parse::<u64>().map(TokenKind::Int))(input)
}

fn number(input: &str) -> IResult<&str, TokenKind> {
    alt((char_code, radix_integer, float, integer))(input)
}

fn variable(input: &str) -> IResult<&str, TokenKind> {
    map(
        recognize(pair(
            satisfy(|c| c.is_uppercase() || c == '_'),
            take_while(is_alnum),
        )),
        |name: &str| TokenKind::Var(name.to_string()),
    )(input)
}

fn symbol_or_end(input: &str) -> IResult<&str, TokenKind> {
    let (rest, text) = take_while1(is_symbol_char)(input)?;
    let terminates = rest
        .chars()
        .next()
        .map_or(true, |c| c.is_whitespace() || c == '%');
    if text == "." && terminates {
        Ok((rest, TokenKind::End))
    } else {
        Ok((rest, TokenKind::Name(text.to_string())))
    }
}

fn name(input: &str) -> IResult<&str, TokenKind> {
    alt((
        map(
            recognize(pair(satisfy(char::is_lowercase), take_while(is_alnum))),
            |name: &str| TokenKind::Name(name.to_string()),
        ),
        map(|input| quoted('\'', input), TokenKind::Name),
        symbol_or_end,
        map(one_of("!;"), |c| TokenKind::Name(c.to_string())),
    ))(input)
}

fn punct(input: &str) -> IResult<&str, TokenKind> {
    map(one_of("()[]{},|"), |c| match c {
        '(' => TokenKind::Open,
        ')' => TokenKind::Close,
        '[' => TokenKind::OpenList,
        ']' => TokenKind::CloseList,
        '{' => TokenKind::OpenCurly,
        '}' => TokenKind::CloseCurly,
        ',' => TokenKind::Comma,
        _ => TokenKind::Bar,
    })(input)
}

fn token(input: &str) -> IResult<&str, TokenKind> {
    alt((
        number,
        variable,
        name,
        map(|input| quoted('"', input), TokenKind::Str),
        punct,
    ))(input)
}

fn lex_error(source: &str, rest: &str) -> ParseError {
    let offset = source.len() - rest.len();
    let message = match rest.chars().next() {
        Some('\'') => "unterminated quoted atom".to_string(),
        Some('"') => "unterminated string".to_string(),
        Some(c) if c.is_ascii_digit() => "malformed number".to_string(),
        Some(c) => format!("illegal character `{c}`"),
        None => "unexpected end of file".to_string(),
    };
    ParseError::at(source, offset, message)
}

fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut rest = source;
    loop {
        let (after, skipped) = layout(rest).map_err(|_| lex_error(source, rest))?;
        rest = after;
        let offset = source.len() - rest.len();
        let layout_before = offset == 0 || !skipped.is_empty();
        if rest.is_empty() {
            tokens.push(Token {
                kind: TokenKind::Eof,
                offset,
                layout_before,
            });
            return Ok(tokens);
        }
        if rest.starts_with("/*") {
            return Err(ParseError::at(source, offset, "unterminated block comment"));
        }
        let (after, kind) = token(rest).map_err(|_| lex_error(source, rest))?;
        tokens.push(Token {
            kind,
            offset,
            layout_before,
        });
        rest = after;
    }
}

/// Deepest operand nesting the reader accepts.
const MAX_DEPTH: usize = 512;

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Result<Self, ParseError> {
        Ok(Self {
            source,
            tokens: tokenize(source)?,
            pos: 0,
            depth: 0,
        })
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        &self.tokens[(self.pos + ahead).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error(&self, token: &Token, message: impl Into<String>) -> ParseError {
        ParseError::at(self.source, token.offset, message)
    }

    fn unexpected(&self, token: &Token) -> ParseError {
        let message = match &token.kind {
            TokenKind::Eof => "unexpected end of file".to_string(),
            TokenKind::End => "unexpected end of clause".to_string(),
            TokenKind::Close => "unexpected `)`".to_string(),
            TokenKind::CloseList => "unexpected `]`".to_string(),
            TokenKind::CloseCurly => "unexpected `}`".to_string(),
            TokenKind::Comma => "unexpected `,`".to_string(),
            TokenKind::Bar => "unexpected `|`".to_string(),
            _ => "operator expected".to_string(),
        };
        self.error(token, message)
    }

    fn expect(&mut self, kind: &TokenKind, text: &str) -> Result<(), ParseError> {
        if &self.peek().kind == kind {
            self.advance();
            Ok(())
        } else {
            let token = self.peek().clone();
            Err(self.error(&token, format!("expected `{text}`")))
        }
    }

    /// The infix operator name the next token stands for, if any.
    fn infix_name(&self) -> Option<&str> {
        match &self.peek().kind {
            TokenKind::Name(name) => Some(name),
            TokenKind::Comma => Some(","),
            TokenKind::Bar => Some("|"),
            _ => None,
        }
    }

    /// True when the next token cannot begin an operand, so a preceding
    /// prefix operator must be read as an atom.
    fn at_term_boundary(&self) -> bool {
        match &self.peek().kind {
            TokenKind::Close
            | TokenKind::CloseList
            | TokenKind::CloseCurly
            | TokenKind::Comma
            | TokenKind::Bar
            | TokenKind::End
            | TokenKind::Eof => true,
            TokenKind::Name(name) => {
                let functional =
                    self.peek_at(1).kind == TokenKind::Open && !self.peek_at(1).layout_before;
                !functional && ops::infix(name).is_some() && ops::prefix(name).is_none()
            }
            _ => false,
        }
    }

    fn parse(&mut self, max: u32) -> Result<Term, ParseError> {
        if self.depth >= MAX_DEPTH {
            let token = self.peek().clone();
            return Err(self.error(&token, "term nesting too deep"));
        }
        self.depth += 1;
        let term = self.parse_operand(max);
        self.depth -= 1;
        term
    }

    /// Reads operands and infix operators left to right. Right operands
    /// wait on `pending` until no operator fits, so long operator chains
    /// such as clause bodies do not nest calls.
    fn parse_operand(&mut self, mut max: u32) -> Result<Term, ParseError> {
        let mut pending: Vec<(Term, String, u32, u32)> = Vec::new();
        loop {
            let (mut left, mut left_priority) = self.parse_primary(max)?;
            loop {
                if let Some((name, op)) = self.infix_op(max, left_priority) {
                    self.advance();
                    pending.push((left, name, op.priority, max));
                    max = op.right_max();
                    break;
                }
                let Some((lhs, name, priority, outer)) = pending.pop() else {
                    return Ok(left);
                };
                left = Term::compound(name, vec![lhs, left]);
                left_priority = priority;
                max = outer;
            }
        }
    }

    /// The next infix operator, if it may follow an operand of
    /// `left_priority` under `max`.
    fn infix_op(&self, max: u32, left_priority: u32) -> Option<(String, OpDef)> {
        let name = self.infix_name()?;
        let op = ops::infix(name)?;
        if op.priority > max || left_priority > op.left_max() {
            return None;
        }
        let name = if name == "|" { ";" } else { name };
        Some((name.to_string(), op))
    }

    fn parse_arguments(&mut self, close: &TokenKind, text: &str) -> Result<Vec<Term>, ParseError> {
        let mut args = vec![self.parse(999)?];
        while self.peek().kind == TokenKind::Comma {
            self.advance();
            args.push(self.parse(999)?);
        }
        self.expect(close, text)?;
        Ok(args)
    }

    fn parse_list(&mut self) -> Result<Term, ParseError> {
        let mut items = vec![self.parse(999)?];
        while self.peek().kind == TokenKind::Comma {
            self.advance();
            items.push(self.parse(999)?);
        }
        let tail = if self.peek().kind == TokenKind::Bar {
            self.advance();
            self.parse(999)?
        } else {
            Term::nil()
        };
        self.expect(&TokenKind::CloseList, "]")?;
        Ok(Term::list_with_tail(items, tail))
    }

    fn integer(&self, token: &Token, magnitude: u64, negative: bool) -> Result<Term, ParseError> {
        let value = if negative {
            -i128::from(magnitude)
        } else {
            i128::from(magnitude)
        };
        i64::try_from(value)
            .map(Term::Integer)
            .map_err(|_| self.error(token, "integer too large"))
    }

    fn parse_primary(&mut self, max: u32) -> Result<(Term, u32), ParseError> {
        let token = self.advance();
        let term = match token.kind.clone() {
            TokenKind::Int(value) => self.integer(&token, value, false)?,
            TokenKind::Float(value) => Term::Float(value),
            TokenKind::Var(name) => Term::Var(name),
            TokenKind::Str(text) => Term::list(
                text.chars()
                    .map(|c| Term::Atom(c.to_string()))
                    .collect(),
            ),
            TokenKind::Open => {
                let inner = self.parse(1200)?;
                self.expect(&TokenKind::Close, ")")?;
                inner
            }
            TokenKind::OpenList => {
                if self.peek().kind == TokenKind::CloseList {
                    self.advance();
                    Term::nil()
                } else {
                    self.parse_list()?
                }
            }
            TokenKind::OpenCurly => {
                if self.peek().kind == TokenKind::CloseCurly {
                    self.advance();
                    Term::atom("{}")
                } else {
                    let inner = self.parse(1200)?;
                    self.expect(&TokenKind::CloseCurly, "}")?;
                    Term::compound("{}", vec![inner])
                }
            }
            TokenKind::Name(name) => return self.parse_name(name, max),
            _ => return Err(self.unexpected(&token)),
        };
        Ok((term, 0))
    }

    fn parse_name(&mut self, name: String, max: u32) -> Result<(Term, u32), ParseError> {
        let next = self.peek().clone();
        if next.kind == TokenKind::Open && !next.layout_before {
            self.advance();
            let args = self.parse_arguments(&TokenKind::Close, ")")?;
            return Ok((Term::compound(name, args), 0));
        }
        if name == "-" && !next.layout_before {
            match next.kind {
                TokenKind::Int(value) => {
                    self.advance();
                    return Ok((self.integer(&next, value, true)?, 0));
                }
                TokenKind::Float(value) => {
                    self.advance();
                    return Ok((Term::Float(-value), 0));
                }
                _ => {}
            }
        }
        let Some(op) = ops::prefix(&name) else {
            return Ok((Term::Atom(name), 0));
        };
        if self.at_term_boundary() {
            return Ok((Term::Atom(name), 0));
        }
        let (priority, arg_max) = if op.priority > max {
            (max, op.right_max().min(max))
        } else {
            (op.priority, op.right_max())
        };
        let arg = self.parse(arg_max)?;
        Ok((Term::compound(name, vec![arg]), priority))
    }

    fn finish_clause(&mut self) -> Result<(), ParseError> {
        match self.peek().kind {
            TokenKind::End => {
                self.advance();
                Ok(())
            }
            _ => {
                let token = self.peek().clone();
                Err(match token.kind {
                    TokenKind::Eof => self.error(&token, "expected `.` at end of clause"),
                    _ => self.unexpected(&token),
                })
            }
        }
    }
}

/// Reads every clause of a program, with the byte offset where each starts.
pub(crate) fn read_program(source: &str) -> Result<Vec<(Term, usize)>, ParseError> {
    let mut parser = Parser::new(source)?;
    let mut clauses = Vec::new();
    while parser.peek().kind != TokenKind::Eof {
        let offset = parser.peek().offset;
        let clause = parser.parse(1200)?;
        parser.finish_clause()?;
        clauses.push((clause, offset));
    }
    Ok(clauses)
}

/// Reads exactly one term; the terminating `.` is optional.
pub(crate) fn read_term(source: &str) -> Result<Term, ParseError> {
    let mut parser = Parser::new(source)?;
    let term = parser.parse(1200)?;
    if parser.peek().kind == TokenKind::End {
        parser.advance();
    }
    let token = parser.peek().clone();
    if token.kind == TokenKind::Eof {
        Ok(term)
    } else {
        Err(parser.unexpected(&token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(text: &str) -> Term {
        read_term(text).unwrap()
    }

    #[test]
    fn test_reads_facts_and_rules() {
        let clauses = read_program(
            "parent(tom, bob).\n% comment\nancestor(X, Y) :- parent(X, Z), /* inline */ ancestor(Z, Y).\n",
        )
        .unwrap();
        assert_eq!(clauses.len(), 2);
        assert_eq!(
            clauses[0].0,
            Term::compound("parent", vec![Term::atom("tom"), Term::atom("bob")])
        );
        assert_eq!(clauses[1].1, 18 + 10);
        let (name, args) = clauses[1].0.as_compound().unwrap();
        assert_eq!(name, ":-");
        assert_eq!(args[1].as_compound().unwrap().0, ",");
    }

    #[test]
    fn test_operator_precedence_and_associativity() {
        assert_eq!(
            read("1 + 2 * 3"),
            Term::compound(
                "+",
                vec![
                    Term::Integer(1),
                    Term::compound("*", vec![Term::Integer(2), Term::Integer(3)])
                ]
            )
        );
        assert_eq!(
            read("a - b - c"),
            Term::compound(
                "-",
                vec![
                    Term::compound("-", vec![Term::atom("a"), Term::atom("b")]),
                    Term::atom("c")
                ]
            )
        );
        assert_eq!(read("a , b , c").to_string(), "a,b,c");
        assert_eq!(read("2 ** 3").as_compound().unwrap().0, "**");
        assert_eq!(read("(a | b)").as_compound().unwrap().0, ";");
    }

    #[test]
    fn test_negative_numbers() {
        assert_eq!(read("-1"), Term::Integer(-1));
        assert_eq!(read("-2.5"), Term::Float(-2.5));
        assert_eq!(read("- 1"), Term::compound("-", vec![Term::Integer(1)]));
        assert_eq!(read("-9223372036854775808"), Term::Integer(i64::MIN));
        assert!(read_term("9223372036854775808").is_err());
        assert_eq!(
            read("3-1"),
            Term::compound("-", vec![Term::Integer(3), Term::Integer(1)])
        );
    }

    #[test]
    fn test_number_forms() {
        assert_eq!(read("0'a"), Term::Integer(97));
        assert_eq!(read("0' "), Term::Integer(32));
        assert_eq!(read("0'\\n"), Term::Integer(10));
        assert_eq!(read("0xff"), Term::Integer(255));
        assert_eq!(read("0o17"), Term::Integer(15));
        assert_eq!(read("0b101"), Term::Integer(5));
        assert_eq!(read("1.5e3"), Term::Float(1500.0));
    }

    #[test]
    fn test_quoted_atoms_and_strings() {
        assert_eq!(read("'hello world'"), Term::atom("hello world"));
        assert_eq!(read("'it''s'"), Term::atom("it's"));
        assert_eq!(read("'a\\nb'"), Term::atom("a\nb"));
        assert_eq!(read("''"), Term::atom(""));
        assert_eq!(
            read("\"hi\""),
            Term::list(vec![Term::atom("h"), Term::atom("i")])
        );
        assert_eq!(read("\"\""), Term::nil());
    }

    #[test]
    fn test_lists_and_curly_terms() {
        assert_eq!(
            read("[1, 2 | T]"),
            Term::list_with_tail(vec![Term::Integer(1), Term::Integer(2)], Term::var("T"))
        );
        assert_eq!(read("[]"), Term::nil());
        assert_eq!(read("{a}"), Term::compound("{}", vec![Term::atom("a")]));
        assert_eq!(read("[a|[b]]"), Term::list(vec![Term::atom("a"), Term::atom("b")]));
    }

    #[test]
    fn test_prefix_operators() {
        assert_eq!(read("\\+ a"), Term::compound("\\+", vec![Term::atom("a")]));
        assert_eq!(
            read(":- dynamic foo/1"),
            Term::compound(
                ":-",
                vec![Term::compound(
                    "dynamic",
                    vec![Term::compound("/", vec![Term::atom("foo"), Term::Integer(1)])]
                )]
            )
        );
        assert_eq!(read("f(-)"), Term::compound("f", vec![Term::atom("-")]));
        assert_eq!(read("- = X").as_compound().unwrap().0, "=");
        assert_eq!(read("-(1)"), Term::compound("-", vec![Term::Integer(1)]));
        assert_eq!(read("- (1)"), Term::compound("-", vec![Term::Integer(1)]));
        assert_eq!(read("-a"), Term::compound("-", vec![Term::atom("a")]));
    }

    #[test]
    fn test_query_terminator_is_optional() {
        assert_eq!(read("foo(X)."), read("foo(X)"));
        assert!(read_term("foo(X). bar").is_err());
    }

    #[test]
    fn test_syntax_errors_carry_positions() {
        let error = read_program("parent(tom, bob).\nparent(tom bob).").unwrap_err();
        assert_eq!(error.line, 2);
        assert_eq!(error.column, 12);
        let error = read_program("foo(").unwrap_err();
        assert_eq!(error.message, "unexpected end of file");
        let error = read_program("foo").unwrap_err();
        assert_eq!(error.message, "expected `.` at end of clause");
        let error = read_program("a = b = c.").unwrap_err();
        assert_eq!((error.line, error.column), (1, 7));
        let error = read_program("x :- 'abc").unwrap_err();
        assert_eq!(error.message, "unterminated quoted atom");
        let error = read_program("/* open").unwrap_err();
        assert_eq!(error.message, "unterminated block comment");
    }

    #[test]
    fn test_long_operator_chains_read_without_nesting() {
        let goals: Vec<String> = (0..20_000).map(|i| format!("g{i}")).collect();
        let clause = read(&format!("p :- {}", goals.join(", ")));
        let (_, args) = clause.as_compound().unwrap();
        let mut body = &args[1];
        let mut count = 1;
        while let Some((",", [_, rest])) = body.as_compound() {
            body = rest;
            count += 1;
        }
        assert_eq!(count, 20_000);
        assert_eq!(body, &Term::atom("g19999"));
        assert_eq!(read("a - b - c"), read("(a - b) - c"));
        assert_eq!(read("a ^ b ^ c"), read("a ^ (b ^ c)"));
    }

    #[test]
    fn test_deep_nesting_is_a_syntax_error() {
        let depth = 100_000;
        let text = format!("{}z{}", "s(".repeat(depth), ")".repeat(depth));
        let error = read_term(&text).unwrap_err();
        assert_eq!(error.message, "term nesting too deep");
        let text = format!("{}z{}", "[".repeat(depth), "]".repeat(depth));
        assert!(read_term(&text).is_err());
        assert!(read_term(&format!("{}z{}", "f(".repeat(100), ")".repeat(100))).is_ok());
    }
}
