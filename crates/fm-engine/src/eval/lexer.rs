use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub tok: Tok,
    pub offset: usize,
}

// Longest first so `===` wins over `==` and `=`.
const PUNCTS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "(", ")", "[", "]", "{", "}", ",", ";", ".",
    "?", ":", "=", "<", ">", "+", "-", "*", "/", "%", "!",
];

pub(crate) fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let bytes = src.as_bytes();
    let mut pos = 0;

    while pos < src.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        if src[pos..].starts_with("//") {
            pos = src[pos..].find('\n').map_or(src.len(), |n| pos + n);
            continue;
        }

        let offset = pos;
        let tok = if c.is_ascii_digit() || (c == b'.' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit)) {
            let end = scan_number(src, pos);
            let text = &src[pos..end];
            pos = end;
            Tok::Num(text.parse().map_err(|_| Error::Parse {
                offset,
                message: format!("bad number literal {text:?}"),
            })?)
        } else if c == b'"' || c == b'\'' {
            let (value, end) = scan_string(src, pos)?;
            pos = end;
            Tok::Str(value)
        } else if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            let end = src[pos..]
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'))
                .map_or(src.len(), |n| pos + n);
            let ident = src[pos..end].to_string();
            pos = end;
            Tok::Ident(ident)
        } else if let Some(p) = PUNCTS.iter().find(|p| src[pos..].starts_with(**p)) {
            pos += p.len();
            Tok::Punct(*p)
        } else {
            let ch = src[pos..].chars().next().unwrap_or('?');
            return Err(Error::Parse {
                offset,
                message: format!("unexpected character {ch:?}"),
            });
        };
        tokens.push(Token { tok, offset });
    }

    tokens.push(Token {
        tok: Tok::Eof,
        offset: src.len(),
    });
    Ok(tokens)
}

fn scan_number(src: &str, start: usize) -> usize {
    let bytes = src.as_bytes();
    let mut end = start;
    let mut seen_dot = false;
    let mut seen_exp = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => {}
            b'.' if !seen_dot && !seen_exp => seen_dot = true,
            b'e' | b'E' if !seen_exp => {
                seen_exp = true;
                if matches!(bytes.get(end + 1), Some(b'+' | b'-')) {
                    end += 1;
                }
            }
            _ => break,
        }
        end += 1;
    }
    end
}

fn scan_string(src: &str, start: usize) -> Result<(String, usize)> {
    let mut chars = src[start..].char_indices();
    let quote = chars.next().map(|(_, q)| q).unwrap_or('"');
    let mut out = String::new();

    while let Some((i, ch)) = chars.next() {
        match ch {
            c if c == quote => return Ok((out, start + i + c.len_utf8())),
            '\\' => {
                let Some((_, esc)) = chars.next() else { break };
                out.push(match esc {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                });
            }
            c => out.push(c),
        }
    }

    Err(Error::Parse {
        offset: start,
        message: "unterminated string".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn punctuation_prefers_longest() {
        assert_eq!(
            toks("a === b"),
            vec![
                Tok::Ident("a".into()),
                Tok::Punct("==="),
                Tok::Ident("b".into()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn strings_and_numbers() {
        assert_eq!(
            toks(r#"'it\'s' "a\nb" 1.5e3 .5"#),
            vec![
                Tok::Str("it's".into()),
                Tok::Str("a\nb".into()),
                Tok::Num(1500.0),
                Tok::Num(0.5),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn dotted_identifiers_split() {
        assert_eq!(
            toks("x.y"),
            vec![
                Tok::Ident("x".into()),
                Tok::Punct("."),
                Tok::Ident("y".into()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn reports_offset_of_bad_input() {
        let err = tokenize("print(#)").unwrap_err();
        assert!(matches!(err, Error::Parse { offset: 6, .. }));
        assert!(matches!(tokenize("'open").unwrap_err(), Error::Parse { offset: 0, .. }));
    }
}
