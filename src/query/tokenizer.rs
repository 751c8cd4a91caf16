//! Query tokenizer. Lexes an OData filter string into an ordered list of
//! token texts, handling typed literals (`datetime'...'`, `guid'...'`,
//! `binary'...'`, `X'...'`, `NNNL`) and `''`-escaped quotes.

/// Lowercase keyword -> rewritten token text. Keys are matched
/// case-sensitively, matching the OData filter grammar's reserved words.
fn remap_keyword(word: &str) -> String {
    match word {
        "TableName" => "name".to_string(),
        "eq" => "===".to_string(),
        "ne" => "!==".to_string(),
        "gt" => ">".to_string(),
        "ge" => ">=".to_string(),
        "lt" => "<".to_string(),
        "le" => "<=".to_string(),
        "and" => "&&".to_string(),
        "or" => "||".to_string(),
        "not" => "!".to_string(),
        other => other.to_string(),
    }
}

/// Tokenize an OData filter expression. Returns an ordered list of token
/// texts; the rewriter classifies and composes them.
pub fn tokenize(filter: &str) -> Vec<String> {
    // Rule 1: double any backslash that directly precedes a backtick, so a
    // literal backtick surviving into a value can't break the rewriter's
    // later backtick-quoting.
    let filter = filter.replace("\\`", "\\\\`");

    let chars: Vec<char> = filter.chars().collect();
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    let flush = |current: &mut String, tokens: &mut Vec<String>| {
        if !current.is_empty() {
            tokens.push(remap_keyword(current));
            current.clear();
        }
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' => {
                // `current` holds whatever prefix text preceded the quote
                // (e.g. "datetime", "guid", "binary", "X", or nothing).
                let prefix = std::mem::take(&mut current);
                let mut body = String::new();
                i += 1;
                loop {
                    if i >= chars.len() {
                        break;
                    }
                    if chars[i] == '\'' {
                        if i + 1 < chars.len() && chars[i + 1] == '\'' {
                            // `''` inside a string is a literal quote.
                            body.push('\'');
                            i += 2;
                            continue;
                        } else {
                            i += 1; // consume closing quote
                            break;
                        }
                    }
                    body.push(chars[i]);
                    i += 1;
                }
                // Rule 5: guid literals are stripped of their type marker
                // entirely and compared as plain strings; every other
                // prefix (including none) keeps its prefix text glued to a
                // backtick-quoted body.
                if prefix == "guid" {
                    tokens.push(format!("`{body}`"));
                } else {
                    tokens.push(format!("{prefix}`{body}`"));
                }
                continue; // `i` already advanced past the closing quote
            }
            '(' | ')' => {
                // Rule 3: parens are always their own token, flushing
                // whatever preceded them first regardless of whitespace.
                flush(&mut current, &mut tokens);
                tokens.push(c.to_string());
                i += 1;
            }
            c if c.is_whitespace() => {
                flush(&mut current, &mut tokens);
                i += 1;
            }
            _ => {
                current.push(c);
                i += 1;
            }
        }
    }
    flush(&mut current, &mut tokens);

    tokens.into_iter().filter(|t| !t.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_simple_comparison() {
        let toks = tokenize("RowKey eq 'b'");
        assert_eq!(toks, vec!["RowKey", "===", "`b`"]);
    }

    #[test]
    fn escaped_quote_inside_string() {
        let toks = tokenize("RowKey eq 'it''s'");
        assert_eq!(toks, vec!["RowKey", "===", "`it's`"]);
    }

    #[test]
    fn guid_prefix_is_stripped() {
        let toks = tokenize("Id eq guid'00000000-0000-0000-0000-000000000000'");
        assert_eq!(toks[2], "`00000000-0000-0000-0000-000000000000`");
    }

    #[test]
    fn datetime_prefix_is_kept() {
        let toks = tokenize("When gt datetime'2024-01-01T00:00:00Z'");
        assert_eq!(toks[2], "datetime`2024-01-01T00:00:00Z`");
    }

    #[test]
    fn parens_break_tokens_without_whitespace() {
        let toks = tokenize("(RowKey eq 'b')and(PartitionKey eq 'p')");
        assert_eq!(
            toks,
            vec!["(", "RowKey", "===", "`b`", ")", "&&", "(", "PartitionKey", "===", "`p`", ")"]
        );
    }

    #[test]
    fn long_int_literal_passes_through_unchanged() {
        let toks = tokenize("Count eq 42L");
        assert_eq!(toks, vec!["Count", "===", "42L"]);
    }

    #[test]
    fn keyword_table_remaps_logical_and_comparison_operators() {
        let toks = tokenize("A eq 1 and not (B ne 2)");
        assert_eq!(toks, vec!["A", "===", "1", "&&", "!", "(", "B", "!==", "2", ")"]);
    }

    #[test]
    fn table_name_identifier_is_remapped() {
        let toks = tokenize("TableName eq 'foo'");
        assert_eq!(toks[0], "name");
    }
}
