// Parser for .ugs graph description files.
//
// Parses a token stream (from the lexer) into an AST. Uses chumsky
// combinators. Grammar:
//
//   program   = NL* (statement (NL+ statement)*)? NL*
//   statement = 'let' IDENT '=' expr
//             | 'control' IDENT ('.' IDENT)? '=' (NUMBER | '[' NUMBER (',' NUMBER)* ']')
//             | expr
//   expr      = atom ('[' NUMBER ']')*
//   atom      = NUMBER | '[' (expr (',' expr)*)? ']' | call | IDENT
//   call      = IDENT ('.' IDENT)? '(' (arg (',' arg)*)? ')'
//   arg       = IDENT ':' expr | expr
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub program: Option<Program>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a graph description. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = program_parser(source);
    let (program, parse_errors) = parser.parse(stream).into_output_errors();

    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        program,
        errors: all_errors,
    }
}

// ── Main parser builder ──
//
// All rules are built inside `program_parser` so that the `source` reference
// is captured once and shared by every combinator that slices identifiers.

fn program_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Program, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Newlines ──

    let nl = just(Token::Newline).repeated().ignored();

    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    let number = select! { Token::Number(n) => n };

    // ── Optional rate suffix: '.' IDENT ──

    let rate = just(Token::Dot).ignore_then(ident.clone()).or_not();

    // ── Expressions ──

    let expr = recursive(|expr| {
        let array = expr
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBracket), just(Token::RBracket))
            .map(ExprKind::Array);

        let arg = ident
            .clone()
            .then_ignore(just(Token::Colon))
            .then(expr.clone())
            .map(|(name, value)| CallArg::Named(name, value))
            .or(expr.clone().map(CallArg::Positional));

        // Tried before a bare reference: both start with an identifier.
        let call = ident
            .clone()
            .then(rate.clone())
            .then(
                arg.separated_by(just(Token::Comma))
                    .allow_trailing()
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map(|((name, rate), args)| ExprKind::Call(Call { name, rate, args }));

        let atom = choice((
            number.clone().map(ExprKind::Number),
            array,
            call,
            ident.clone().map(ExprKind::Ref),
        ))
        .map_with(|kind, e| Expr {
            kind,
            span: e.span(),
        });

        let index = select! {
            Token::Number(n) if n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64 => n as u32,
        }
        .delimited_by(just(Token::LBracket), just(Token::RBracket))
        .map_with(|n, e| {
            let span: SimpleSpan = e.span();
            (n, span)
        });

        atom.foldl(index.repeated(), |inner: Expr, (index, index_span)| {
            let span: SimpleSpan = (inner.span.start()..index_span.end()).into();
            Expr {
                kind: ExprKind::Channel {
                    source: Box::new(inner),
                    index,
                },
                span,
            }
        })
    });

    // ── Statements ──

    let let_stmt = just(Token::Let)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Equals))
        .then(expr.clone())
        .map(|(name, value)| StatementKind::Let(LetStmt { name, value }));

    let defaults = number
        .clone()
        .map(|n| vec![n])
        .or(number
            .separated_by(just(Token::Comma))
            .at_least(1)
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBracket), just(Token::RBracket)))
        .map_with(|values, e| {
            let span: SimpleSpan = e.span();
            (values, span)
        });

    let control_stmt = just(Token::Control)
        .ignore_then(ident.clone())
        .then(rate)
        .then_ignore(just(Token::Equals))
        .then(defaults)
        .map(|((name, rate), (defaults, defaults_span))| {
            StatementKind::Control(ControlStmt {
                name,
                rate,
                defaults,
                defaults_span,
            })
        });

    let expr_stmt = expr.map(StatementKind::Expr);

    // ── Statement dispatch ──

    let statement = choice((let_stmt, control_stmt, expr_stmt)).map_with(|kind, e| Statement {
        kind,
        span: e.span(),
    });

    // ── Program ──

    nl.clone()
        .ignore_then(
            statement
                .separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl)
        .map_with(move |statements, e| Program {
            statements,
            span: e.span(),
        })
}

// ── Tests ──
