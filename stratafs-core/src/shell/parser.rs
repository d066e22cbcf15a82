//! Single-line command parsing.
//!
//! Tokenization honors single quotes (no escapes inside), double quotes
//! (backslash escapes), and backslash escaping outside quotes. `|`, `<`,
//! `>`, `>>`, `2>`, `2>>`, and a trailing `&` are structural only when
//! unquoted. Short flag clusters expand to individual flags unless the flag
//! is known to take a value for that command.

use std::collections::BTreeMap;

use stratafs_model::{FsError, FsResult};

/// One parsed command, possibly the head of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedCommand {
    pub command: String,
    pub args: Vec<String>,
    /// Flag name to value; `None` marks a boolean flag.
    pub flags: BTreeMap<String, Option<String>>,
    pub stdin_redirect: Option<String>,
    pub stdout_redirect: Option<String>,
    pub stderr_redirect: Option<String>,
    pub append_stdout: bool,
    pub append_stderr: bool,
    pub pipes: Vec<ParsedCommand>,
    pub background: bool,
}

impl ParsedCommand {
    pub fn flag(&self, name: &str) -> bool {
        self.flags.contains_key(name)
    }

    pub fn flag_value(&self, name: &str) -> Option<&str> {
        self.flags.get(name).and_then(|v| v.as_deref())
    }

    /// This command followed by its pipeline continuations.
    pub fn segments(&self) -> Vec<&ParsedCommand> {
        let mut out = vec![self];
        out.extend(self.pipes.iter());
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word { text: String, quoted: bool },
    Pipe,
    RedirIn,
    RedirOut { append: bool },
    RedirErr { append: bool },
    Background,
}

/// Flags that consume a value token, per command.
fn flag_takes_value(command: &str, flag: char) -> bool {
    matches!((command, flag), ("head" | "tail", 'n') | ("mkdir", 'm'))
}

pub fn parse(line: &str) -> FsResult<ParsedCommand> {
    let tokens = tokenize(line)?;
    if tokens.is_empty() {
        return Err(FsError::invalid_argument("empty command"));
    }

    let mut segments: Vec<Vec<Token>> = vec![Vec::new()];
    let mut background = false;
    for token in tokens {
        match token {
            Token::Pipe => segments.push(Vec::new()),
            Token::Background => background = true,
            other => {
                if background {
                    return Err(FsError::invalid_argument(
                        "tokens after background marker",
                    ));
                }
                segments.last_mut().expect("non-empty").push(other);
            }
        }
    }

    let mut parsed: Vec<ParsedCommand> = Vec::with_capacity(segments.len());
    for segment in segments {
        parsed.push(parse_segment(segment)?);
    }

    let mut head = parsed.remove(0);
    head.pipes = parsed;
    head.background = background;
    Ok(head)
}

fn parse_segment(tokens: Vec<Token>) -> FsResult<ParsedCommand> {
    let mut out = ParsedCommand::default();
    let mut iter = tokens.into_iter().peekable();
    let mut positional_only = false;

    while let Some(token) = iter.next() {
        match token {
            Token::RedirIn => out.stdin_redirect = Some(redirect_target(&mut iter, "<")?),
            Token::RedirOut { append } => {
                out.stdout_redirect = Some(redirect_target(&mut iter, ">")?);
                out.append_stdout = append;
            }
            Token::RedirErr { append } => {
                out.stderr_redirect = Some(redirect_target(&mut iter, "2>")?);
                out.append_stderr = append;
            }
            Token::Word { text, quoted } => {
                if out.command.is_empty() {
                    out.command = text;
                    continue;
                }
                // `test` operators all look like flags; keep them positional.
                if positional_only || quoted || matches!(out.command.as_str(), "test" | "[") {
                    out.args.push(text);
                    continue;
                }
                if text == "--" {
                    positional_only = true;
                } else if let Some(rest) = text.strip_prefix("--") {
                    match rest.split_once('=') {
                        Some((name, value)) => {
                            out.flags.insert(name.to_string(), Some(value.to_string()));
                        }
                        None => {
                            out.flags.insert(rest.to_string(), None);
                        }
                    }
                } else if is_short_flag_cluster(&text) {
                    parse_short_flags(&mut out, &text[1..], &mut iter)?;
                } else {
                    out.args.push(text);
                }
            }
            Token::Pipe | Token::Background => unreachable!("split before parse_segment"),
        }
    }

    if out.command.is_empty() {
        return Err(FsError::invalid_argument("empty pipeline segment"));
    }
    Ok(out)
}

/// `-x`, `-rf`, `-n10`. A bare `-` or a negative number is an argument.
fn is_short_flag_cluster(text: &str) -> bool {
    text.len() > 1
        && text.starts_with('-')
        && !text[1..].chars().next().is_some_and(|c| c.is_ascii_digit())
}

fn parse_short_flags(
    out: &mut ParsedCommand,
    cluster: &str,
    iter: &mut std::iter::Peekable<std::vec::IntoIter<Token>>,
) -> FsResult<()> {
    let mut chars = cluster.char_indices();
    while let Some((idx, flag)) = chars.next() {
        if flag_takes_value(&out.command, flag) {
            let inline = &cluster[idx + flag.len_utf8()..];
            let value = if !inline.is_empty() {
                inline.to_string()
            } else {
                match iter.next() {
                    Some(Token::Word { text, .. }) => text,
                    _ => {
                        return Err(FsError::invalid_argument(format!(
                            "flag -{flag} expects a value"
                        )));
                    }
                }
            };
            out.flags.insert(flag.to_string(), Some(value));
            return Ok(());
        }
        out.flags.insert(flag.to_string(), None);
    }
    Ok(())
}

fn redirect_target(
    iter: &mut std::iter::Peekable<std::vec::IntoIter<Token>>,
    op: &str,
) -> FsResult<String> {
    match iter.next() {
        Some(Token::Word { text, .. }) => Ok(text),
        _ => Err(FsError::invalid_argument(format!(
            "redirect {op} expects a target"
        ))),
    }
}

fn tokenize(line: &str) -> FsResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut word_open = false;
    let mut word_quoted = false;
    let mut chars = line.chars().peekable();

    macro_rules! flush {
        () => {
            if word_open {
                tokens.push(Token::Word {
                    text: std::mem::take(&mut word),
                    quoted: word_quoted,
                });
                word_open = false;
                word_quoted = false;
            }
        };
    }

    while let Some(ch) = chars.next() {
        match ch {
            '\'' => {
                word_open = true;
                word_quoted = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => word.push(inner),
                        None => {
                            return Err(FsError::invalid_argument("unterminated single quote"));
                        }
                    }
                }
            }
            '"' => {
                word_open = true;
                word_quoted = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => word.push(escaped),
                            None => {
                                return Err(FsError::invalid_argument(
                                    "dangling escape in double quotes",
                                ));
                            }
                        },
                        Some(inner) => word.push(inner),
                        None => {
                            return Err(FsError::invalid_argument("unterminated double quote"));
                        }
                    }
                }
            }
            '\\' => {
                word_open = true;
                match chars.next() {
                    Some(escaped) => word.push(escaped),
                    None => return Err(FsError::invalid_argument("dangling escape")),
                }
            }
            c if c.is_whitespace() => flush!(),
            '|' => {
                flush!();
                tokens.push(Token::Pipe);
            }
            '<' => {
                flush!();
                tokens.push(Token::RedirIn);
            }
            '>' => {
                // An unquoted bare "2" immediately before '>' selects stderr.
                let stderr = word_open && !word_quoted && word == "2";
                if stderr {
                    word.clear();
                    word_open = false;
                } else {
                    flush!();
                }
                let append = chars.peek() == Some(&'>');
                if append {
                    chars.next();
                }
                tokens.push(if stderr {
                    Token::RedirErr { append }
                } else {
                    Token::RedirOut { append }
                });
            }
            '&' => {
                flush!();
                if chars.peek() == Some(&'&') {
                    return Err(FsError::invalid_argument(
                        "'&&' chaining is not supported",
                    ));
                }
                tokens.push(Token::Background);
            }
            other => {
                word_open = true;
                word.push(other);
            }
        }
    }
    flush!();
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratafs_model::FsErrorKind;

    #[test]
    fn splits_command_args_and_flags() {
        let cmd = parse("ls -la /tmp /var").unwrap();
        assert_eq!(cmd.command, "ls");
        assert!(cmd.flag("l"));
        assert!(cmd.flag("a"));
        assert_eq!(cmd.args, vec!["/tmp", "/var"]);
    }

    #[test]
    fn expands_short_flag_clusters() {
        let cmd = parse("rm -rf /tmp/x").unwrap();
        assert!(cmd.flag("r"));
        assert!(cmd.flag("f"));
        assert_eq!(cmd.args, vec!["/tmp/x"]);
    }

    #[test]
    fn value_taking_flags_consume_the_next_token() {
        let cmd = parse("head -n 10 file.txt").unwrap();
        assert_eq!(cmd.flag_value("n"), Some("10"));
        assert_eq!(cmd.args, vec!["file.txt"]);

        let cmd = parse("tail -n25 file.txt").unwrap();
        assert_eq!(cmd.flag_value("n"), Some("25"));

        let cmd = parse("mkdir -m 700 /secret").unwrap();
        assert_eq!(cmd.flag_value("m"), Some("700"));
        assert_eq!(cmd.args, vec!["/secret"]);
    }

    #[test]
    fn quotes_group_words_and_suppress_operators() {
        let cmd = parse("echo 'a | b' \"c > d\"").unwrap();
        assert_eq!(cmd.args, vec!["a | b", "c > d"]);
        assert!(cmd.pipes.is_empty());
        assert!(cmd.stdout_redirect.is_none());
    }

    #[test]
    fn double_quotes_allow_escapes_single_quotes_do_not() {
        let cmd = parse(r#"echo "quote: \" done" 'back\slash'"#).unwrap();
        assert_eq!(cmd.args, vec![r#"quote: " done"#, r"back\slash"]);
    }

    #[test]
    fn backslash_escapes_outside_quotes() {
        let cmd = parse(r"cat file\ with\ spaces.txt").unwrap();
        assert_eq!(cmd.args, vec!["file with spaces.txt"]);
    }

    #[test]
    fn quoted_words_are_never_flags() {
        let cmd = parse("echo '-n'").unwrap();
        assert!(!cmd.flag("n"));
        assert_eq!(cmd.args, vec!["-n"]);
    }

    #[test]
    fn pipelines_chain_in_order() {
        let cmd = parse("cat a.txt | head -n 3 | wc -l").unwrap();
        assert_eq!(cmd.command, "cat");
        assert_eq!(cmd.pipes.len(), 2);
        assert_eq!(cmd.pipes[0].command, "head");
        assert_eq!(cmd.pipes[1].command, "wc");
        assert_eq!(cmd.segments().len(), 3);
    }

    #[test]
    fn redirections_bind_to_their_segment() {
        let cmd = parse("cat < in.txt | wc -l > out.txt 2>> err.txt").unwrap();
        assert_eq!(cmd.stdin_redirect.as_deref(), Some("in.txt"));
        let tail = &cmd.pipes[0];
        assert_eq!(tail.stdout_redirect.as_deref(), Some("out.txt"));
        assert!(!tail.append_stdout);
        assert_eq!(tail.stderr_redirect.as_deref(), Some("err.txt"));
        assert!(tail.append_stderr);
    }

    #[test]
    fn append_redirect_is_distinct() {
        let cmd = parse("echo hi >> log.txt").unwrap();
        assert_eq!(cmd.stdout_redirect.as_deref(), Some("log.txt"));
        assert!(cmd.append_stdout);
    }

    #[test]
    fn trailing_ampersand_marks_background() {
        let cmd = parse("sleep 5 &").unwrap();
        assert!(cmd.background);
    }

    #[test]
    fn negative_numbers_are_arguments() {
        let cmd = parse("test 1 -lt 2").unwrap();
        assert_eq!(cmd.args, vec!["1", "-lt", "2"]);

        let cmd = parse("echo -5").unwrap();
        assert_eq!(cmd.args, vec!["-5"]);
    }

    #[test]
    fn long_flags_support_values() {
        let cmd = parse("ls --color=auto --all").unwrap();
        assert_eq!(cmd.flag_value("color"), Some("auto"));
        assert!(cmd.flag("all"));
    }

    #[test]
    fn syntax_errors_are_einval() {
        for bad in [
            "echo 'unterminated",
            "echo \"unterminated",
            "cat |",
            "| cat",
            "echo >",
            "a && b",
            "",
            "   ",
        ] {
            let err = parse(bad).unwrap_err();
            assert_eq!(err.kind(), FsErrorKind::InvalidArgument, "input: {bad:?}");
        }
    }
}
