use logos::{FilterResult, Lexer, Logos};

#[derive(Logos, Debug, PartialEq, Eq, Clone, Copy)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    // Preprocessor lines are kept whole and split by the parser.
    #[regex(r"#[^\n]*")]
    Directive,

    // Never emitted; the callback skips to the closing `*/`.
    #[token("/*", block_comment)]
    BlockComment,

    #[token("layout")]
    Layout,
    #[token("buffer")]
    Buffer,
    #[token("uniform")]
    Uniform,
    #[token("in")]
    In,
    #[token("precision")]
    Precision,
    #[token("void")]
    Void,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("return")]
    Return,
    #[token("true")]
    True,
    #[token("false")]
    False,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,
    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?[fF]?")]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?[fF]?")]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+[fF]?")]
    FloatLit,
    #[regex(r"0[xX][0-9a-fA-F]+[uU]?")]
    #[regex(r"[0-9]+[uU]?")]
    IntLit,

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
    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,

    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,

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
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("!")]
    Bang,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("<=")]
    LessEqual,
    #[token(">=")]
    GreaterEqual,
    #[token("==")]
    Equal,
    #[token("!=")]
    NotEqual,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
}

fn block_comment(lex: &mut Lexer<Token>) -> FilterResult<(), ()> {
    match lex.remainder().find("*/") {
        Some(end) => {
            lex.bump(end + 2);
            FilterResult::Skip
        }
        None => {
            lex.bump(lex.remainder().len());
            FilterResult::Error(())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub lexeme: String,
    pub line: u32,
    pub column: u32,
}

/// An input character that starts no token.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub line: u32,
    pub column: u32,
    pub text: String,
}

pub fn tokenize(input: &str) -> Result<Vec<SpannedToken>, LexError> {
    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(input.match_indices('\n').map(|(i, _)| i + 1))
        .collect();
    let position = |offset: usize| {
        let line = line_starts.partition_point(|&start| start <= offset);
        let column = offset - line_starts[line - 1] + 1;
        (line as u32, column as u32)
    };

    let mut lex = Token::lexer(input);
    let mut out = Vec::new();
    while let Some(res) = lex.next() {
        let (line, column) = position(lex.span().start);
        match res {
            Ok(token) => out.push(SpannedToken {
                token,
                lexeme: lex.slice().to_string(),
                line,
                column,
            }),
            Err(()) => {
                return Err(LexError {
                    line,
                    column,
                    text: lex.slice().to_string(),
                });
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_directives_and_comments() {
        let src = "#version 310 es\n// line\n/* block\n * comment */ layout";
        let toks = tokenize(src).unwrap();
        assert_eq!(toks[0].token, Token::Directive);
        assert_eq!(toks[0].lexeme, "#version 310 es");
        assert_eq!(toks[1].token, Token::Layout);
        assert_eq!((toks[1].line, toks[1].column), (4, 15));
    }

    #[test]
    fn test_block_comment_forms() {
        assert_eq!(kinds("/* a */ x"), vec![Token::Ident]);
        assert_eq!(kinds("/** doc */ x"), vec![Token::Ident]);
        assert_eq!(kinds("/* a **/ x"), vec![Token::Ident]);
        assert_eq!(kinds("a /**/ / b"), vec![Token::Ident, Token::Slash, Token::Ident]);
    }

    #[test]
    fn test_unterminated_block_comment() {
        let err = tokenize("x\n  /* open").unwrap_err();
        assert_eq!((err.line, err.column), (2, 3));
    }

    #[test]
    fn test_numeric_literals() {
        assert_eq!(
            kinds("3 3u 0x1Fu 1.0 .5 2e3 1.5f"),
            vec![
                Token::IntLit,
                Token::IntLit,
                Token::IntLit,
                Token::FloatLit,
                Token::FloatLit,
                Token::FloatLit,
                Token::FloatLit,
            ]
        );
    }

    #[test]
    fn test_longest_operator_wins() {
        assert_eq!(
            kinds("a <<= b"),
            vec![Token::Ident, Token::Shl, Token::Assign, Token::Ident]
        );
        assert_eq!(
            kinds("x += y >= z && !w"),
            vec![
                Token::Ident,
                Token::PlusAssign,
                Token::Ident,
                Token::GreaterEqual,
                Token::Ident,
                Token::AndAnd,
                Token::Bang,
                Token::Ident,
            ]
        );
    }

    #[test]
    fn test_keywords_are_not_identifier_prefixes() {
        assert_eq!(kinds("index inout"), vec![Token::Ident, Token::Ident]);
        assert_eq!(kinds("in"), vec![Token::In]);
    }

    #[test]
    fn test_unknown_character_reports_position() {
        let err = tokenize("uint x;\n  x = @;").unwrap_err();
        assert_eq!((err.line, err.column), (2, 7));
        assert_eq!(err.text, "@");
    }
}
