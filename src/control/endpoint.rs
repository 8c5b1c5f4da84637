//! Unix domain socket endpoint serving the control protocol

use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{error, info, warn};

use crate::control::handler::ControlHandler;
use crate::control::{Error, MAX_LINE_BYTES};
use crate::core::metrics::MetricsSource;

/// Listens on a Unix socket and serves control clients
///
/// Each client connection is handled on its own thread; concurrency on the
/// registry is resolved by the profiler, not here. Dropping the endpoint
/// stops the accept loop and removes the socket file.
pub struct ControlEndpoint {
    path: PathBuf,
    stop: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl ControlEndpoint {
    /// Binds the control socket and starts accepting clients in the
    /// background
    ///
    /// A stale socket file from a previous run is replaced.
    pub fn launch<S>(path: PathBuf, handler: ControlHandler<S>) -> io::Result<Self>
    where
        S: MetricsSource + Send + Sync + 'static,
    {
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        let handler = Arc::new(handler);
        let stop = Arc::new(AtomicBool::new(false));

        let accept_stop = Arc::clone(&stop);
        let accept_path = path.clone();
        let accept_thread = thread::Builder::new()
            .name("pfprof-control".to_string())
            .spawn(move || accept_clients(listener, handler, accept_stop, accept_path))?;

        info!("Control endpoint listening on {:?}", path);

        Ok(ControlEndpoint {
            path,
            stop,
            accept_thread: Some(accept_thread),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Drop for ControlEndpoint {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);

        // The accept loop blocks in accept(); a throwaway connection wakes it
        // so it can observe the stop flag
        let _ = UnixStream::connect(&self.path);

        if let Some(accept_thread) = self.accept_thread.take() {
            if accept_thread.join().is_err() {
                warn!("The control accept thread panicked");
            }
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Could not remove control socket {:?}: {}", self.path, e);
            }
        }
    }
}

fn accept_clients<S>(
    listener: UnixListener,
    handler: Arc<ControlHandler<S>>,
    stop: Arc<AtomicBool>,
    path: PathBuf,
) where
    S: MetricsSource + Send + Sync + 'static,
{
    for stream in listener.incoming() {
        if stop.load(Ordering::Acquire) {
            break;
        }

        match stream {
            Ok(stream) => {
                let client_handler = Arc::clone(&handler);
                if let Err(e) = thread::Builder::new()
                    .name("pfprof-client".to_string())
                    .spawn(move || serve_client(stream, client_handler))
                {
                    error!("Could not spawn client thread: {}", e);
                }
            }
            Err(e) => {
                error!("Control endpoint on {:?} stopped accepting: {}", path, e);
                break;
            }
        }
    }
}

/// Outcome of reading one line from a client, with the line length capped
enum ClientLine {
    Line(String),
    Oversized,
    Closed,
}

/// Reads one newline-terminated line, buffering at most `MAX_LINE_BYTES`
/// bytes of it
///
/// A client streaming an overlong line must not grow our memory with it: the
/// read stops at the cap and the line is reported oversized without holding
/// its remainder.
fn next_line(reader: &mut impl BufRead) -> ClientLine {
    let mut raw = Vec::with_capacity(MAX_LINE_BYTES);
    // One byte of headroom so a maximum-length line still fits with its
    // newline
    let mut capped = reader.take(MAX_LINE_BYTES as u64 + 1);

    match capped.read_until(b'\n', &mut raw) {
        Ok(0) | Err(_) => ClientLine::Closed,
        Ok(_) => {
            if raw.last() == Some(&b'\n') {
                raw.pop();
            } else if raw.len() > MAX_LINE_BYTES {
                return ClientLine::Oversized;
            }

            ClientLine::Line(String::from_utf8_lossy(&raw).into_owned())
        }
    }
}

/// Consumes input up to and including the next newline without buffering it
fn discard_rest_of_line(reader: &mut impl BufRead) -> io::Result<()> {
    loop {
        let buffered = reader.fill_buf()?;
        if buffered.is_empty() {
            return Ok(());
        }

        match buffered.iter().position(|byte| *byte == b'\n') {
            Some(newline) => {
                reader.consume(newline + 1);
                return Ok(());
            }
            None => {
                let consumed = buffered.len();
                reader.consume(consumed);
            }
        }
    }
}

fn serve_client<S>(stream: UnixStream, handler: Arc<ControlHandler<S>>)
where
    S: MetricsSource + Send + Sync + 'static,
{
    let mut reader = match stream.try_clone() {
        Ok(read_half) => BufReader::new(read_half),
        Err(e) => {
            warn!("Could not clone client stream: {}", e);
            return;
        }
    };
    let mut writer = stream;

    loop {
        let response = match next_line(&mut reader) {
            ClientLine::Line(line) => handler.handle_line(&line),
            ClientLine::Oversized => {
                if discard_rest_of_line(&mut reader).is_err() {
                    break;
                }
                format!("ERR {}\n", Error::OversizedLine)
            }
            ClientLine::Closed => break,
        };

        if writer.write_all(response.as_bytes()).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod test_bounded_reads {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_next_line_should_return_a_line_within_the_limit() {
        let mut reader = Cursor::new(b"R 123\nU 456\n".to_vec());

        assert!(matches!(next_line(&mut reader), ClientLine::Line(line) if line == "R 123"));
        assert!(matches!(next_line(&mut reader), ClientLine::Line(line) if line == "U 456"));
        assert!(matches!(next_line(&mut reader), ClientLine::Closed));
    }

    #[test]
    fn test_next_line_should_accept_a_line_of_exactly_the_limit() {
        let mut content = vec![b'1'; MAX_LINE_BYTES];
        content.push(b'\n');
        let mut reader = Cursor::new(content);

        assert!(matches!(next_line(&mut reader), ClientLine::Line(line) if line.len() == MAX_LINE_BYTES));
    }

    #[test]
    fn test_next_line_should_stop_buffering_an_overlong_line_at_the_limit() {
        let mut reader = Cursor::new(vec![b'1'; 64 * 1024]);

        assert!(matches!(next_line(&mut reader), ClientLine::Oversized));
        assert_eq!(reader.position(), MAX_LINE_BYTES as u64 + 1);
    }

    #[test]
    fn test_discard_should_resynchronize_on_the_next_line() {
        let mut content = vec![b'1'; 64 * 1024];
        content.extend_from_slice(b"\nR 123\n");
        let mut reader = Cursor::new(content);

        assert!(matches!(next_line(&mut reader), ClientLine::Oversized));
        discard_rest_of_line(&mut reader).unwrap();

        assert!(matches!(next_line(&mut reader), ClientLine::Line(line) if line == "R 123"));
    }
}
