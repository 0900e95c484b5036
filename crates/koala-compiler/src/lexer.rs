//! Lexer for the Koala language
//!
//! Tokenization is generated with logos; the public entry point collects
//! tokens with byte spans and reports unrecognized input through the
//! shared diagnostic buffer.

use logos::Logos;

use crate::diag::{DiagBag, Span};

/// Token enumeration
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*[^*]*\*+(?:[^/*][^*]*\*+)*/")]
pub enum Token {
    // ===== Keywords =====
    #[token("var")]
    Var,
    #[token("func")]
    Func,
    #[token("class")]
    Class,
    #[token("trait")]
    Trait,
    #[token("extends")]
    Extends,
    #[token("with")]
    With,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("do")]
    Do,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("switch")]
    Switch,
    #[token("case")]
    Case,
    #[token("default")]
    Default,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("return")]
    Return,
    #[token("go")]
    Go,
    #[token("import")]
    Import,
    #[token("typealias")]
    TypeAlias,
    #[token("const")]
    Const,
    #[token("self")]
    SelfKw,
    #[token("super")]
    SuperKw,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("nil")]
    Nil,

    // ===== Primitive type names =====
    #[token("int")]
    IntType,
    #[token("float")]
    FloatType,
    #[token("bool")]
    BoolType,
    #[token("string")]
    StringType,
    #[token("any")]
    AnyType,

    // ===== Literals =====
    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    FloatLit(f64),
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    IntLit(i64),
    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    StrLit(String),
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // ===== Operators =====
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token(">=")]
    GtEq,
    #[token("<=")]
    LtEq,
    #[token(">")]
    Gt,
    #[token("<")]
    Lt,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Not,
    #[token("~")]
    Tilde,
    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("%=")]
    PercentAssign,

    // ===== Punctuation =====
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token("...")]
    Ellipsis,
}

fn unescape(quoted: &str) -> Option<String> {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            '0' => out.push('\0'),
            other => out.push(other),
        }
    }
    Some(out)
}

/// Tokenize a whole source file
///
/// Unrecognized characters become errors in `diags`; lexing continues so
/// later errors are still reported.
pub fn tokenize(source: &str, diags: &mut DiagBag) -> Vec<(Token, Span)> {
    let mut tokens = Vec::new();
    for (result, range) in Token::lexer(source).spanned() {
        let span = Span::from(range);
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => diags.error(
                span,
                format!("unrecognized character '{}'", &source[span.start..span.end]),
            ),
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<Token> {
        let mut diags = DiagBag::new();
        let tokens = tokenize(src, &mut diags);
        assert!(!diags.has_errors(), "unexpected lex errors");
        tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn test_keywords_and_idents() {
        let tokens = lex("var x int = 1");
        assert_eq!(
            tokens,
            vec![
                Token::Var,
                Token::Ident("x".into()),
                Token::IntType,
                Token::Assign,
                Token::IntLit(1),
            ]
        );
    }

    #[test]
    fn test_operators() {
        let tokens = lex("a >= b && c != d");
        assert_eq!(
            tokens,
            vec![
                Token::Ident("a".into()),
                Token::GtEq,
                Token::Ident("b".into()),
                Token::AndAnd,
                Token::Ident("c".into()),
                Token::NotEq,
                Token::Ident("d".into()),
            ]
        );
    }

    #[test]
    fn test_literals() {
        let tokens = lex(r#"3.5 42 "hi\n" true nil"#);
        assert_eq!(
            tokens,
            vec![
                Token::FloatLit(3.5),
                Token::IntLit(42),
                Token::StrLit("hi\n".into()),
                Token::True,
                Token::Nil,
            ]
        );
    }

    #[test]
    fn test_comments_skipped() {
        let tokens = lex("a // line\n/* block\n */ b");
        assert_eq!(
            tokens,
            vec![Token::Ident("a".into()), Token::Ident("b".into())]
        );
    }

    #[test]
    fn test_unrecognized_character() {
        let mut diags = DiagBag::new();
        tokenize("a @ b", &mut diags);
        assert!(diags.has_errors());
    }

    #[test]
    fn test_ellipsis() {
        let tokens = lex("func f(a int, rest ...string)");
        assert!(tokens.contains(&Token::Ellipsis));
    }
}
