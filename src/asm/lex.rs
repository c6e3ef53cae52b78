use logos::{Lexer, Logos};

fn lex_reg_index<'a>(lex: &mut Lexer<'a, Token<'a>>) -> Result<u32, LexError> {
    lex.slice()[1..]
        .parse()
        .map_err(|_| LexError::ParseRegister)
}

fn lex_reg_range<'a>(lex: &mut Lexer<'a, Token<'a>>) -> Result<(u32, u32), LexError> {
    let s = lex.slice();
    let inner = &s[2..s.len() - 1];
    let Some((first, last)) = inner.split_once(':') else {
        return Err(LexError::ParseRegister);
    };
    let first: u32 = first.parse().map_err(|_| LexError::ParseRegister)?;
    let last: u32 = last.parse().map_err(|_| LexError::ParseRegister)?;
    if last < first {
        return Err(LexError::ParseRegister);
    }
    Ok((first, last))
}

fn lex_integer<'a>(lex: &mut Lexer<'a, Token<'a>>) -> Result<i64, LexError> {
    let s = lex.slice();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let value = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => digits.parse(),
    }
    .map_err(|_| LexError::ParseInteger)?;
    Ok(if negative { -value } else { value })
}

fn lex_float<'a>(lex: &mut Lexer<'a, Token<'a>>) -> Result<f32, LexError> {
    lex.slice().parse().map_err(|_| LexError::ParseFloat)
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum LexError {
    ParseRegister,
    ParseInteger,
    ParseFloat,
    #[default]
    Unknown,
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
impl std::error::Error for LexError {}

#[derive(Logos, Debug, PartialEq, Clone, Copy)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(error = LexError)]
pub enum Token<'a> {
    #[token("vcc")]
    Vcc,
    #[token("vccz")]
    Vccz,
    #[token("exec")]
    Exec,
    #[token("execz")]
    Execz,
    #[token("scc")]
    Scc,
    #[token("m0")]
    M0,

    #[regex(r"s[0-9]+", lex_reg_index, priority = 4)]
    Sgpr(u32),
    #[regex(r"v[0-9]+", lex_reg_index, priority = 4)]
    Vgpr(u32),
    #[regex(r"s\[[0-9]+:[0-9]+\]", lex_reg_range)]
    SgprRange((u32, u32)),

    #[regex(r"\.[a-z_]+", |lex| &lex.slice()[1..])]
    Directive(&'a str),
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice())]
    Identifier(&'a str),

    #[regex(r"-?[0-9]+", lex_integer, priority = 2)]
    #[regex(r"-?0[xX][0-9a-fA-F]+", lex_integer)]
    Integer(i64),
    #[regex(r"-?[0-9]+\.[0-9]+", lex_float)]
    Float(f32),

    #[token(",")]
    Comma,
    #[token(":")]
    Colon,

    #[regex(r"//[^\n]*", logos::skip)]
    #[regex(r";[^\n]*", logos::skip)]
    Skip,
}

impl<'a> std::fmt::Display for Token<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
