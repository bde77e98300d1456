//! Translates `(stream-kind, key, payload)` events into the product's
//! stdout event stream: `[timestamp|]SIGIL│KEY│PAYLOAD\n`.
//!
//! This is distinct from the crate's internal `log`/`env_logger`
//! diagnostics — this is the output contract, not a log.

use std::io::Write;
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use owo_colors::{DynColors, OwoColorize};

const SEP: char = '\u{2502}'; // │

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampMode {
    Off,
    Absolute,
    Relative,
}

/// Stateless per-call translator; holds only configuration (timestamp mode,
/// the formatter-construction instant for relative mode) and a serialized
/// byte sink.
pub struct Formatter {
    sink: Mutex<Box<dyn Write + Send>>,
    mode: TimestampMode,
    started_at: Instant,
}

impl Formatter {
    pub fn new(sink: Box<dyn Write + Send>, mode: TimestampMode) -> Self {
        Formatter {
            sink: Mutex::new(sink),
            mode,
            started_at: Instant::now(),
        }
    }

    pub fn start(&self, key: &str, color: Option<&str>, argv: &[String]) {
        let payload = argv.join(" ");
        self.emit('$', key, color, payload.as_bytes());
    }

    pub fn out(&self, key: &str, color: Option<&str>, data: &[u8]) {
        self.emit('<', key, color, data);
    }

    pub fn err(&self, key: &str, color: Option<&str>, data: &[u8]) {
        self.emit('!', key, color, data);
    }

    pub fn end(&self, key: &str, color: Option<&str>, exit_code: i32) {
        self.emit('=', key, color, exit_code.to_string().as_bytes());
    }

    fn emit(&self, sigil: char, key: &str, color: Option<&str>, payload: &[u8]) {
        let colored_key = colorize(key, color);
        let timestamp = self.timestamp_prefix();
        let mut lines: Vec<&[u8]> = payload.split(|b| *b == b'\n').collect();
        if payload.ends_with(b"\n") {
            lines.pop();
        }

        let mut sink = self.sink.lock().unwrap_or_else(|poison| poison.into_inner());
        for line in lines {
            let _ = write!(sink, "{timestamp}{sigil}{SEP}{colored_key}{SEP}");
            let _ = sink.write_all(line);
            let _ = sink.write_all(b"\n");
        }
        let _ = sink.flush();
    }

    fn timestamp_prefix(&self) -> String {
        match self.mode {
            TimestampMode::Off => String::new(),
            TimestampMode::Absolute => format!("{}|", hhmmss(wall_clock_seconds())),
            TimestampMode::Relative => {
                format!("{}|", hhmmss(self.started_at.elapsed().as_secs()))
            }
        }
    }
}

fn wall_clock_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() % 86_400)
        .unwrap_or(0)
}

fn hhmmss(total_seconds: u64) -> String {
    let hours = (total_seconds / 3600) % 100; // saturating display, never overflows in practice
    let minutes = (total_seconds / 60) % 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// Wrap `key` in SGR codes per `color`. Named 16-color (incl. `bright_*`) or
/// 6-hex truecolor; an unrecognized name disables coloring.
fn colorize(key: &str, color: Option<&str>) -> String {
    match color.and_then(parse_color) {
        Some(dyn_color) => key.color(dyn_color).to_string(),
        None => key.to_string(),
    }
}

fn parse_color(name: &str) -> Option<DynColors> {
    if let Some(rgb) = parse_hex(name) {
        return Some(DynColors::Rgb(rgb.0, rgb.1, rgb.2));
    }
    named_ansi_color(name).map(DynColors::Ansi)
}

fn parse_hex(name: &str) -> Option<(u8, u8, u8)> {
    if name.len() != 6 || !name.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let r = u8::from_str_radix(&name[0..2], 16).ok()?;
    let g = u8::from_str_radix(&name[2..4], 16).ok()?;
    let b = u8::from_str_radix(&name[4..6], 16).ok()?;
    Some((r, g, b))
}

fn named_ansi_color(name: &str) -> Option<owo_colors::AnsiColors> {
    use owo_colors::AnsiColors::*;
    Some(match name {
        "black" => Black,
        "red" => Red,
        "green" => Green,
        "yellow" => Yellow,
        "blue" => Blue,
        "magenta" => Magenta,
        "cyan" => Cyan,
        "white" => White,
        "bright_black" => BrightBlack,
        "bright_red" => BrightRed,
        "bright_green" => BrightGreen,
        "bright_yellow" => BrightYellow,
        "bright_blue" => BrightBlue,
        "bright_magenta" => BrightMagenta,
        "bright_cyan" => BrightCyan,
        "bright_white" => BrightWhite,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<StdMutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn captured(f: impl FnOnce(&Formatter)) -> String {
        let buf = SharedBuf::default();
        let formatter = Formatter::new(Box::new(buf.clone()), TimestampMode::Off);
        f(&formatter);
        String::from_utf8(buf.0.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn out_splits_on_newlines_and_drops_trailing_empty() {
        let output = captured(|f| f.out("A", None, b"one\ntwo\n"));
        assert_eq!(output, "<\u{2502}A\u{2502}one\n<\u{2502}A\u{2502}two\n");
    }

    #[test]
    fn end_emits_decimal_exit_code() {
        let output = captured(|f| f.end("A", None, 42));
        assert_eq!(output, "=\u{2502}A\u{2502}42\n");
    }

    #[test]
    fn start_joins_argv_with_spaces() {
        let output = captured(|f| f.start("0", None, &["echo".to_string(), "hi".to_string()]));
        assert_eq!(output, "$\u{2502}0\u{2502}echo hi\n");
    }

    #[test]
    fn named_color_wraps_only_the_key() {
        let output = captured(|f| f.out("test", Some("red"), b"Hello World"));
        assert!(output.contains("\x1b[31mtest\x1b[0m"));
        assert!(output.contains("Hello World"));
    }

    #[test]
    fn hex_color_produces_truecolor_sgr() {
        let output = captured(|f| f.out("test", Some("FF0000"), b"x"));
        assert!(output.contains("\x1b[38;2;255;0;0m"));
    }

    #[test]
    fn invalid_color_name_disables_coloring() {
        let output = captured(|f| f.out("test", Some("not-a-color"), b"x"));
        assert!(!output.contains("\x1b["));
    }
}
