//! Applies parsed control commands to the profiler

use std::fmt::Write;
use std::sync::Arc;

use log::debug;

use crate::control::Command;
use crate::core::metrics::MetricsSource;
use crate::profiler::Profiler;

/// Turns control protocol lines into profiler operations and responses
///
/// Transport framing (sockets, line splitting) lives in the endpoint; the
/// handler itself is transport-agnostic and usable from tests directly.
pub struct ControlHandler<S> {
    profiler: Arc<Profiler<S>>,
}

impl<S> ControlHandler<S>
where
    S: MetricsSource + Send + Sync + 'static,
{
    pub fn new(profiler: Arc<Profiler<S>>) -> Self {
        ControlHandler { profiler }
    }

    /// Handles one protocol line and renders the response to send back
    ///
    /// An empty line is a read request answered with the PID listing; any
    /// other line is a command answered with `OK` or `ERR <reason>`.
    pub fn handle_line(&self, line: &str) -> String {
        if line.trim().is_empty() {
            return self.render_pids();
        }

        match line.parse::<Command>() {
            Ok(command) => {
                debug!("Control command: {:?}", command);
                self.apply(command)
            }
            Err(e) => format!("ERR {}\n", e),
        }
    }

    /// Renders the registered PIDs, one decimal per line, terminated by an
    /// empty line
    ///
    /// An empty registry renders as the terminator alone, which is an empty
    /// result rather than an error.
    pub fn render_pids(&self) -> String {
        let mut rendered = String::new();

        for pid in self.profiler.pids() {
            writeln!(rendered, "{}", pid).expect("Could not render PID listing");
        }
        rendered.push('\n');

        rendered
    }

    fn apply(&self, command: Command) -> String {
        let result = match command {
            Command::Register(pid) => self.profiler.register(pid),
            Command::Unregister(pid) => {
                self.profiler.unregister(pid);
                Ok(())
            }
        };

        match result {
            Ok(()) => "OK\n".to_string(),
            Err(e) => format!("ERR {}\n", e),
        }
    }
}
