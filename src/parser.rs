//! Command-spec mini-language: `[key][#color][+delay]*[<redirect][>onoutput][:dep]*[|action]*=argv`.
//!
//! The `argv` portion reuses a POSIX-style quote/backslash tokenizer; the
//! prefix portion (everything before the first unescaped `=`) is a small
//! hand-rolled grammar with no quoting of its own.

use crate::error::ParseError;

/// Which standard stream a `RedirectSource`/`StartOnOutputSource` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout = 1,
    Stderr = 2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    pub key: String,
    pub wait_for_start: bool,
    pub delays: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectSource {
    pub key: String,
    pub stream: Stream,
}

pub type StartOnOutputSource = RedirectSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub sources: Vec<RedirectSource>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOnOutput {
    pub sources: Vec<StartOnOutputSource>,
}

/// A parsed command-spec. `key` is filled in with the spec's ordinal in its
/// batch by the caller when the grammar didn't supply one.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub key: Option<String>,
    pub color: Option<String>,
    pub start_delay: f64,
    pub dependencies: Vec<Dependency>,
    pub redirects: Option<Redirect>,
    pub start_on_output: Option<StartOnOutput>,
    pub actions: Vec<String>,
    pub argv: Vec<String>,
}

impl CommandSpec {
    pub fn is_silent(&self) -> bool {
        self.actions.iter().any(|a| a == "silent")
    }

    pub fn ends_supervisor(&self) -> bool {
        self.actions.iter().any(|a| a == "end")
    }
}

/// Sum of `Nm`/`Ns`/`Nms`/bare-`N` components, e.g. `1m30s` = 90, `2m15s500ms` = 135.5.
pub fn parse_delay(input: &str) -> Result<f64, ParseError> {
    let bytes = input.as_bytes();
    let mut pos = 0usize;
    let mut total = 0.0f64;
    let mut consumed_any = false;

    while pos < bytes.len() {
        let start = pos;
        while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
            pos += 1;
        }
        if pos == start {
            return Err(ParseError::InvalidDelay {
                fragment: input.to_string(),
                offset: start,
            });
        }
        let number: f64 = input[start..pos]
            .parse()
            .map_err(|_| ParseError::InvalidDelay {
                fragment: input.to_string(),
                offset: start,
            })?;

        if input[pos..].starts_with("ms") {
            total += number / 1000.0;
            pos += 2;
        } else if input[pos..].starts_with('m') {
            total += number * 60.0;
            pos += 1;
        } else if input[pos..].starts_with('s') {
            total += number;
            pos += 1;
        } else if pos == bytes.len() {
            total += number;
        } else {
            return Err(ParseError::InvalidDelay {
                fragment: input.to_string(),
                offset: pos,
            });
        }
        consumed_any = true;
    }

    if !consumed_any {
        return Err(ParseError::InvalidDelay {
            fragment: input.to_string(),
            offset: 0,
        });
    }

    Ok(total)
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Cursor over the prefix substring (before the split `=`). No quoting here.
struct Prefix<'a> {
    chars: std::str::CharIndices<'a>,
    input: &'a str,
    peeked: Option<(usize, char)>,
}

impl<'a> Prefix<'a> {
    fn new(input: &'a str) -> Self {
        let mut chars = input.char_indices();
        let peeked = chars.next();
        Prefix {
            chars,
            input,
            peeked,
        }
    }

    fn peek(&self) -> Option<char> {
        self.peeked.map(|(_, c)| c)
    }

    fn pos(&self) -> usize {
        self.peeked.map(|(i, _)| i).unwrap_or(self.input.len())
    }

    fn bump(&mut self) -> Option<char> {
        let current = self.peeked;
        self.peeked = self.chars.next();
        current.map(|(_, c)| c)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos();
        while self.peek().map(&pred).unwrap_or(false) {
            self.bump();
        }
        &self.input[start..self.pos()]
    }

    fn eof(&self) -> bool {
        self.peeked.is_none()
    }
}

fn parse_key(p: &mut Prefix) -> Option<String> {
    let key = p.take_while(is_key_char);
    if key.is_empty() { None } else { Some(key.to_string()) }
}

fn parse_color(p: &mut Prefix) -> Result<Option<String>, ParseError> {
    if p.peek() != Some('#') {
        return Ok(None);
    }
    let hash_pos = p.pos();
    p.bump();
    let color = p.take_while(is_key_char);
    if color.is_empty() {
        return Err(ParseError::InvalidColor {
            fragment: "#".to_string(),
            offset: hash_pos,
        });
    }
    Ok(Some(color.to_string()))
}

/// Consume every `'+' delay` group present, summing them into one total —
/// used both for the top-level `start_delay` and (via the caller looping
/// itself) for dependency delays.
fn parse_plus_delays(p: &mut Prefix) -> Result<Vec<f64>, ParseError> {
    let mut delays = Vec::new();
    while p.peek() == Some('+') {
        p.bump();
        let token_start = p.pos();
        let token = p.take_while(|c| c.is_ascii_alphanumeric() || c == '.');
        if token.is_empty() {
            return Err(ParseError::InvalidDelay {
                fragment: String::new(),
                offset: token_start,
            });
        }
        delays.push(parse_delay(token)?);
    }
    Ok(delays)
}

fn parse_redirect_like(p: &mut Prefix) -> Result<Option<Vec<RedirectSource>>, ParseError> {
    if p.peek() == Some('(') {
        p.bump();
        let group_start = p.pos();
        if p.peek() == Some(')') {
            p.bump();
            return Ok(None);
        }
        let mut sources = Vec::new();
        loop {
            sources.push(parse_atom(p)?);
            match p.peek() {
                Some(',') => {
                    p.bump();
                }
                Some(')') => {
                    p.bump();
                    break;
                }
                _ => {
                    return Err(ParseError::UnterminatedGroup {
                        offset: group_start,
                    });
                }
            }
        }
        Ok(Some(sources))
    } else {
        Ok(Some(vec![parse_atom(p)?]))
    }
}

fn parse_atom(p: &mut Prefix) -> Result<RedirectSource, ParseError> {
    let stream = match p.peek() {
        Some('1') => {
            p.bump();
            Stream::Stdout
        }
        Some('2') => {
            p.bump();
            Stream::Stderr
        }
        _ => Stream::Stdout,
    };
    let key_start = p.pos();
    let key = p.take_while(is_key_char);
    if key.is_empty() {
        return Err(ParseError::MalformedPrefix {
            fragment: "atom".to_string(),
            offset: key_start,
        });
    }
    Ok(RedirectSource {
        key: key.to_string(),
        stream,
    })
}

fn parse_dependency(p: &mut Prefix) -> Result<Dependency, ParseError> {
    let key = parse_key(p).unwrap_or_default();
    let wait_for_start = if p.peek() == Some('&') {
        p.bump();
        true
    } else {
        false
    };
    let delays = parse_plus_delays(p)?;
    Ok(Dependency {
        key,
        wait_for_start,
        delays,
    })
}

fn parse_action(p: &mut Prefix) -> String {
    p.take_while(|c| c != '|' && c != '=').to_string()
}

/// Parse the prefix substring (everything before the split `=`). An empty
/// string is valid and yields every field at its zero value.
fn parse_prefix(input: &str) -> Result<CommandSpec, ParseError> {
    let mut p = Prefix::new(input);

    let key = parse_key(&mut p);
    let color = parse_color(&mut p)?;

    let start_delay: f64 = parse_plus_delays(&mut p)?.iter().sum();

    let redirects = if p.peek() == Some('<') {
        p.bump();
        parse_redirect_like(&mut p)?.map(|sources| Redirect { sources })
    } else {
        None
    };

    let start_on_output = if p.peek() == Some('>') {
        p.bump();
        parse_redirect_like(&mut p)?.map(|sources| StartOnOutput { sources })
    } else {
        None
    };

    let mut dependencies = Vec::new();
    while p.peek() == Some(':') {
        p.bump();
        dependencies.push(parse_dependency(&mut p)?);
    }

    let mut actions = Vec::new();
    while p.peek() == Some('|') {
        p.bump();
        let action = parse_action(&mut p);
        if !action.is_empty() {
            actions.push(action);
        }
    }

    if !p.eof() {
        return Err(ParseError::MalformedPrefix {
            fragment: input[p.pos()..].to_string(),
            offset: p.pos(),
        });
    }

    Ok(CommandSpec {
        key,
        color,
        start_delay,
        dependencies,
        redirects,
        start_on_output,
        actions,
        argv: Vec::new(),
    })
}

/// States for the argv tokenizer state machine.
enum State {
    Normal,
    InWord,
    InDoubleQuote,
    InSingleQuote,
}

/// Tokenize the `argv` portion of a spec: POSIX-ish quoting and backslash
/// escaping, same rules as an interactive shell's word splitting.
pub fn tokenize_argv(input: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut state = State::Normal;
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        match (&state, ch) {
            (State::Normal, ' ' | '\t') => {}
            (State::Normal, '"') => state = State::InDoubleQuote,
            (State::Normal, '\'') => state = State::InSingleQuote,
            (State::Normal, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                state = State::InWord;
            }
            (State::Normal, c) => {
                current.push(c);
                state = State::InWord;
            }

            (State::InWord, ' ' | '\t') => {
                tokens.push(std::mem::take(&mut current));
                state = State::Normal;
            }
            (State::InWord, '"') => state = State::InDoubleQuote,
            (State::InWord, '\'') => state = State::InSingleQuote,
            (State::InWord, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (State::InWord, c) => current.push(c),

            (State::InDoubleQuote, '"') => state = State::InWord,
            (State::InDoubleQuote, '\\') => match chars.peek() {
                Some(&'"' | &'\\' | &'$' | &'`') => {
                    current.push(chars.next().unwrap());
                }
                _ => current.push('\\'),
            },
            (State::InDoubleQuote, c) => current.push(c),

            (State::InSingleQuote, '\'') => state = State::InWord,
            (State::InSingleQuote, c) => current.push(c),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// Find the byte offset of the first `=` in the raw spec string, outside of
/// the argv's own quoting (the prefix grammar never quotes, so this is a
/// plain scan).
fn find_split(input: &str) -> Option<usize> {
    input.find('=')
}

/// Treats the whole string as a bare argv with no prefix at all.
fn parse_as_bare_argv(input: &str) -> Result<CommandSpec, ParseError> {
    let argv = tokenize_argv(input);
    if argv.is_empty() {
        return Err(ParseError::EmptyCommand);
    }
    Ok(CommandSpec {
        key: None,
        color: None,
        start_delay: 0.0,
        dependencies: Vec::new(),
        redirects: None,
        start_on_output: None,
        actions: Vec::new(),
        argv,
    })
}

/// Parse one command-spec string into a `CommandSpec`. `key` is left as
/// whatever the grammar produced (possibly `None`); the caller assigns the
/// batch ordinal when it's still unset.
///
/// The first `=` is only treated as the prefix/argv separator when the text
/// before it is actually well-formed prefix grammar. Argv frequently
/// contains its own `=` (`env FOO=bar cmd`, `myserver --port=8080`): once
/// the leading text hits a character the prefix grammar can't consume (a
/// space, a bare `-`, ...) it can't be a prefix at all, so the whole string
/// falls back to being tokenized as argv instead of erroring out.
pub fn parse(input: &str) -> Result<CommandSpec, ParseError> {
    let Some(split) = find_split(input) else {
        return parse_as_bare_argv(input);
    };

    let prefix_str = &input[..split];
    let argv_str = &input[split + 1..];

    match parse_prefix(prefix_str) {
        Ok(mut spec) => {
            spec.argv = tokenize_argv(argv_str);
            if spec.argv.is_empty() {
                return Err(ParseError::EmptyCommand);
            }
            Ok(spec)
        }
        Err(ParseError::MalformedPrefix { .. }) => parse_as_bare_argv(input),
        Err(other) => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(words: &[&str]) -> Vec<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn basic_command_no_prefix() {
        let spec = parse("python -m http.server").unwrap();
        assert_eq!(spec.key, None);
        assert_eq!(spec.argv, argv(&["python", "-m", "http.server"]));
    }

    #[test]
    fn named_command() {
        let spec = parse("A=python -m http.server").unwrap();
        assert_eq!(spec.key, Some("A".to_string()));
        assert_eq!(spec.start_delay, 0.0);
    }

    #[test]
    fn empty_prefix_with_embedded_equals() {
        let spec = parse("=echo =").unwrap();
        assert_eq!(spec.key, None);
        assert_eq!(spec.argv, argv(&["echo", "="]));
    }

    #[test]
    fn delay_seconds_and_float() {
        assert_eq!(parse("+5=echo test").unwrap().start_delay, 5.0);
        assert_eq!(parse("+1.5=echo test").unwrap().start_delay, 1.5);
    }

    #[test]
    fn delay_suffix_combinations() {
        assert_eq!(parse_delay("500ms").unwrap(), 0.5);
        assert_eq!(parse_delay("5s").unwrap(), 5.0);
        assert_eq!(parse_delay("2m").unwrap(), 120.0);
        assert_eq!(parse_delay("1m30s").unwrap(), 90.0);
        assert_eq!(parse_delay("2m15s").unwrap(), 135.0);
        assert_eq!(parse_delay("1m1s1ms").unwrap(), 61.001);
        assert_eq!(parse_delay("2s500ms").unwrap(), 2.5);
        assert_eq!(parse_delay("1m500ms").unwrap(), 60.5);
        assert_eq!(parse_delay("2m30s750ms").unwrap(), 150.75);
    }

    #[test]
    fn named_start_delay_is_rejected() {
        let err = parse("+A=echo test").unwrap_err();
        assert!(matches!(err, ParseError::InvalidDelay { .. }));
    }

    #[test]
    fn actions_single_and_multiple() {
        let spec = parse("|silent=python -m http.server").unwrap();
        assert_eq!(spec.actions, vec!["silent".to_string()]);

        let spec = parse("|silent|end=python -m http.server").unwrap();
        assert_eq!(spec.actions, vec!["silent".to_string(), "end".to_string()]);
        assert!(spec.is_silent());
        assert!(spec.ends_supervisor());
    }

    #[test]
    fn color_named_and_hex() {
        assert_eq!(parse("a#red=ls -la").unwrap().color, Some("red".to_string()));
        assert_eq!(
            parse("a#00FF00=ls -la").unwrap().color,
            Some("00FF00".to_string())
        );
        assert_eq!(
            parse("b#AbCdEf=echo hello").unwrap().color,
            Some("AbCdEf".to_string())
        );
    }

    #[test]
    fn simple_dependency() {
        let spec = parse(":A=echo hello").unwrap();
        assert_eq!(
            spec.dependencies,
            vec![Dependency {
                key: "A".to_string(),
                wait_for_start: false,
                delays: vec![]
            }]
        );
    }

    #[test]
    fn dependency_with_start_indicator_and_delay() {
        let spec = parse(":A&+500ms=echo hello").unwrap();
        assert_eq!(spec.dependencies[0].wait_for_start, true);
        assert_eq!(spec.dependencies[0].delays, vec![0.5]);
    }

    #[test]
    fn multiple_delays_on_one_dependency() {
        let spec = parse(":A+1s+500ms=echo hello").unwrap();
        assert_eq!(spec.dependencies[0].delays, vec![1.0, 0.5]);
    }

    #[test]
    fn multiple_dependencies() {
        let spec = parse(":A:B&=echo hello").unwrap();
        assert_eq!(spec.dependencies.len(), 2);
        assert_eq!(spec.dependencies[1].key, "B");
        assert_eq!(spec.dependencies[1].wait_for_start, true);
    }

    #[test]
    fn simple_stdout_redirect() {
        let spec = parse("<A=echo hello").unwrap();
        let redirects = spec.redirects.unwrap();
        assert_eq!(redirects.sources.len(), 1);
        assert_eq!(redirects.sources[0].key, "A");
        assert_eq!(redirects.sources[0].stream, Stream::Stdout);
    }

    #[test]
    fn explicit_stream_redirect() {
        let spec = parse("<2A=echo hello").unwrap();
        assert_eq!(spec.redirects.unwrap().sources[0].stream, Stream::Stderr);
    }

    #[test]
    fn combined_streams_redirect() {
        let spec = parse("<(1A,2A)=echo hello").unwrap();
        let sources = spec.redirects.unwrap().sources;
        assert_eq!(sources[0].stream, Stream::Stdout);
        assert_eq!(sources[1].stream, Stream::Stderr);
    }

    #[test]
    fn multiple_processes_redirect() {
        let spec = parse("<(A,B)=echo hello").unwrap();
        let sources = spec.redirects.unwrap().sources;
        assert_eq!(sources[0].key, "A");
        assert_eq!(sources[1].key, "B");
    }

    #[test]
    fn start_on_output_mirrors_redirect_grammar() {
        let spec = parse(">A=echo hello").unwrap();
        let sources = spec.start_on_output.unwrap().sources;
        assert_eq!(sources[0].key, "A");
        assert_eq!(sources[0].stream, Stream::Stdout);
    }

    #[test]
    fn full_command_format() {
        let spec = parse("worker#blue:A+1s:B&|silent=python script.py").unwrap();
        assert_eq!(spec.key, Some("worker".to_string()));
        assert_eq!(spec.color, Some("blue".to_string()));
        assert_eq!(spec.dependencies.len(), 2);
        assert_eq!(spec.actions, vec!["silent".to_string()]);
        assert_eq!(spec.argv, argv(&["python", "script.py"]));
    }

    #[test]
    fn quoting_in_argv() {
        let spec = parse(r#"echo "hello   world""#).unwrap();
        assert_eq!(spec.argv, argv(&["echo", "hello   world"]));

        let spec = parse("echo 'hello   world'").unwrap();
        assert_eq!(spec.argv, argv(&["echo", "hello   world"]));
    }

    #[test]
    fn empty_command_is_an_error() {
        assert!(matches!(parse(""), Err(ParseError::EmptyCommand)));
        assert!(matches!(parse("   "), Err(ParseError::EmptyCommand)));
    }

    #[test]
    fn argv_with_embedded_equals_is_not_mistaken_for_a_prefix() {
        let spec = parse("env FOO=bar cmd").unwrap();
        assert_eq!(spec.key, None);
        assert_eq!(spec.argv, argv(&["env", "FOO=bar", "cmd"]));

        let spec = parse("myserver --port=8080").unwrap();
        assert_eq!(spec.argv, argv(&["myserver", "--port=8080"]));

        let spec = parse("curl --data=x http://h").unwrap();
        assert_eq!(spec.argv, argv(&["curl", "--data=x", "http://h"]));
    }
}
