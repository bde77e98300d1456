//! Redirect fabric: pumps loop over a consumer's listed sources in order,
//! marshalling each source's stdout/stderr into the consumer's stdin pipe.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use os_pipe::PipeWriter;

use crate::child::{ManagedChild, StopFlag};
use crate::parser::Stream;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// One listed source: which child, and which of its streams.
pub struct PumpSource {
    pub child: Arc<ManagedChild>,
    pub stream: Stream,
}

/// Drains `sources` in declaration order on every tick, writing accumulated
/// bytes to `writer`. Per-source FIFO and no starvation follow directly
/// from visiting every source, in order, each tick. Stops silently on a
/// broken pipe (consumer gone) or when every source has ended and its
/// backlog is fully drained.
pub fn run_pump(sources: Vec<PumpSource>, mut writer: PipeWriter, stop: Arc<StopFlag>) {
    let mut cursors = vec![0u64; sources.len()];

    loop {
        if stop.is_set() {
            return;
        }

        let mut any_pending = false;
        for (source, cursor) in sources.iter().zip(cursors.iter_mut()) {
            let buf = match source.stream {
                Stream::Stdout => &source.child.stdout_buf,
                Stream::Stderr => &source.child.stderr_buf,
            };
            let (chunk, new_cursor) = buf.read_since(*cursor);
            *cursor = new_cursor;
            if chunk.is_empty() {
                continue;
            }
            if let Err(err) = writer.write_all(&chunk) {
                if err.kind() == io::ErrorKind::BrokenPipe {
                    return;
                }
            }
            any_pending = true;
        }
        let _ = writer.flush();

        if !any_pending && all_sources_drained(&sources, &cursors) {
            return;
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

fn all_sources_drained(sources: &[PumpSource], cursors: &[u64]) -> bool {
    sources.iter().zip(cursors.iter()).all(|(source, cursor)| {
        let buf = match source.stream {
            Stream::Stdout => &source.child.stdout_buf,
            Stream::Stderr => &source.child.stderr_buf,
        };
        buf.has_ended() && buf.read_since(*cursor).0.is_empty()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::CommandSpec;
    use std::io::Read;

    fn spec() -> CommandSpec {
        CommandSpec {
            key: None,
            color: None,
            start_delay: 0.0,
            dependencies: vec![],
            redirects: None,
            start_on_output: None,
            actions: vec![],
            argv: vec!["true".to_string()],
        }
    }

    #[test]
    fn pumps_single_source_in_order() {
        let source_child = Arc::new(ManagedChild::new("A".to_string(), spec()));
        source_child.stdout_buf.push(b"one");
        source_child.stdout_buf.push(b"two");
        source_child.stdout_buf.mark_ended();

        let (mut reader, writer) = os_pipe::pipe().unwrap();
        let stop = Arc::new(StopFlag::new());
        let sources = vec![PumpSource {
            child: source_child,
            stream: Stream::Stdout,
        }];

        let handle = std::thread::spawn(move || run_pump(sources, writer, stop));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        handle.join().unwrap();

        assert_eq!(out, b"onetwo");
    }
}
