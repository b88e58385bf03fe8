//! Quote-aware splitting of a command line on the pipe delimiter.

use crate::error::ProcError;

/// Splits `input` on unquoted `|`. Quotes and escapes are kept verbatim so each
/// stage can be tokenized afterwards. Errors on empty stages or open quotes.
pub fn split_stages(input: &str) -> Result<Vec<String>, ProcError> {
    if input.trim().is_empty() {
        return Err(ProcError::InvalidInput("empty command".into()));
    }
    let mut stages: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut quote: Option<char> = None;
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        match (quote, ch) {
            // single quotes: everything literal until the closing quote
            (Some('\''), '\'') => { quote = None; cur.push(ch); }
            (Some('\''), _) => cur.push(ch),
            (_, '\\') => {
                cur.push(ch);
                if let Some(next) = chars.next() { cur.push(next); }
            }
            (Some('"'), '"') => { quote = None; cur.push(ch); }
            (Some(_), _) => cur.push(ch),
            (None, '\'') | (None, '"') => { quote = Some(ch); cur.push(ch); }
            (None, '|') => stages.push(std::mem::take(&mut cur)),
            (None, _) => cur.push(ch),
        }
    }
    if let Some(q) = quote {
        return Err(ProcError::InvalidInput(format!("unterminated {} quote in {:?}", q, input)));
    }
    stages.push(cur);

    let mut out = Vec::with_capacity(stages.len());
    for (i, stage) in stages.into_iter().enumerate() {
        let stage = stage.trim();
        if stage.is_empty() {
            return Err(ProcError::InvalidInput(format!("empty pipeline stage {} in {:?}", i, input)));
        }
        out.push(stage.to_string());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_plain_stages() {
        let got = split_stages("echo a | grep a|wc -l").unwrap();
        assert_eq!(got, vec!["echo a", "grep a", "wc -l"]);
    }

    #[test]
    fn quoted_and_escaped_pipes_are_literal() {
        assert_eq!(split_stages(r#"echo "a|b""#).unwrap(), vec![r#"echo "a|b""#]);
        assert_eq!(split_stages("echo 'x | y' | cat").unwrap(), vec!["echo 'x | y'", "cat"]);
        assert_eq!(split_stages(r"echo a\|b").unwrap(), vec![r"echo a\|b"]);
    }

    #[test]
    fn single_quote_ignores_backslash() {
        assert_eq!(split_stages(r"echo 'a\' | cat").unwrap(), vec![r"echo 'a\'", "cat"]);
    }

    #[test]
    fn rejects_empty_and_dangling() {
        assert!(matches!(split_stages(""), Err(ProcError::InvalidInput(_))));
        assert!(matches!(split_stages("echo a |"), Err(ProcError::InvalidInput(_))));
        assert!(matches!(split_stages("| cat"), Err(ProcError::InvalidInput(_))));
        assert!(matches!(split_stages("echo \"open | cat"), Err(ProcError::InvalidInput(_))));
    }
}
