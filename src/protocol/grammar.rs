//! Line tokenizer: verb + shell-quoted arguments (spec.md §4.I).
//!
//! Grounded on `original_source/command_parser.rs`'s `possibly_quoted_string`
//! and its `peg::parser!` scaffold. The teacher built a fully-typed grammar
//! per command (mostly left as `todo!()`); here the grammar only tokenizes —
//! per-verb argument typing belongs to the Protocol Codec's `Command::parse`
//! (spec.md §4.H/§4.I split: tokenizing is codec, argument semantics is
//! dispatch), which keeps one grammar serving all thirty-odd verbs instead
//! of duplicating `todo!()` rules.

use peg::str::LineCol;

peg::parser! {
    grammar line_grammar() for str {
        pub rule line() -> (String, Vec<String>)
            = _ verb:word() args:(_ a:argument() {a})* _ { (verb, args) }

        rule word() -> String
            = s:$(['a'..='z' | 'A'..='Z' | '_']+) { s.to_owned() }

        rule argument() -> String
            = #{ quoted_or_bare }

        rule _() = quiet!{[' ' | '\t']*}
    }
}

/// One token: a `"quoted string"` with backslash escapes for `\` and `"`,
/// or a bare run of non-whitespace characters.
fn quoted_or_bare(input: &str, pos: usize) -> peg::RuleResult<String> {
    use peg::RuleResult::{Failed, Matched};

    let rest = &input[pos..];
    if !rest.starts_with('"') {
        let len = rest.find(char::is_whitespace).unwrap_or(rest.len());
        if len == 0 {
            return Failed;
        }
        return Matched(pos + len, rest[..len].to_owned());
    }

    let mut out = String::new();
    let mut chars = rest.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    out.push(escaped);
                } else {
                    return Failed;
                }
            }
            '"' => return Matched(pos + i + 1, out),
            c => out.push(c),
        }
    }
    Failed
}

/// Tokenizes one command line into `(verb, args)`. Parse failures are
/// reported as `ACK` replies (*bad-argument*), never printed out-of-band —
/// unlike the teacher's CLI-oriented parser, which pretty-prints via
/// `ariadne` to stdout, a long-lived server must not write diagnostics to
/// the client's transport.
pub fn tokenize(line: &str) -> Result<(String, Vec<String>), String> {
    line_grammar::line(line.trim_end_matches(['\r', '\n']))
        .map_err(|e: peg::error::ParseError<LineCol>| format!("could not parse command: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_bare_words() {
        let (verb, args) = tokenize("add foo.mp3").unwrap();
        assert_eq!(verb, "add");
        assert_eq!(args, vec!["foo.mp3".to_string()]);
    }

    #[test]
    fn tokenizes_quoted_argument_with_spaces() {
        let (verb, args) = tokenize(r#"add "Lukas Graham/7 Years.mp3""#).unwrap();
        assert_eq!(verb, "add");
        assert_eq!(args, vec!["Lukas Graham/7 Years.mp3".to_string()]);
    }

    #[test]
    fn honors_backslash_escapes_inside_quotes() {
        let (_, args) = tokenize(r#"find artist "asdf\"asdf""#).unwrap();
        assert_eq!(args[1], "asdf\"asdf");
    }

    #[test]
    fn verb_with_no_arguments() {
        let (verb, args) = tokenize("  status  ").unwrap();
        assert_eq!(verb, "status");
        assert!(args.is_empty());
    }
}
