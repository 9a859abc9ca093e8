#![forbid(unsafe_code)]

//! Feature-gated active terminal probing.
//!
//! Sends two fingerprinting queries and reads the replies within a
//! bounded timeout: the ENQ answerback enquiry (PuTTY identifies itself
//! here) and secondary device attributes (`ESC [ > c`), whose terminal
//! type field distinguishes most emulator families.
//!
//! # Safety contract
//!
//! - **Bounded timeouts**: every probe has a hard timeout (default
//!   250 ms). On timeout the probe yields `None` and detection proceeds
//!   with the environment-derived guess.
//! - **Exclusive ownership**: probing must run while the caller holds the
//!   terminal in raw mode, before any event loop starts; replies arrive
//!   on the input stream and would otherwise be consumed as keystrokes.
//! - **Fail-open**: malformed replies are treated as absent.

use std::time::Duration;

use crate::detect::ProbeOutcome;

/// Maximum bytes accepted in a single probe reply.
const MAX_RESPONSE_LEN: usize = 256;

/// Default per-probe timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(250);

/// ENQ: terminals with an answerback message reply with it.
const ANSWERBACK_QUERY: &[u8] = b"\x05";

/// Secondary device attributes query.
const SECONDARY_DA_QUERY: &[u8] = b"\x1b[>c";

/// Probe configuration.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Timeout per individual probe query.
    pub timeout: Duration,
    /// Send the ENQ answerback enquiry.
    pub answerback: bool,
    /// Send the secondary device attributes query.
    pub secondary_da: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            answerback: true,
            secondary_da: true,
        }
    }
}

/// Run the configured probes against the controlling terminal.
pub fn run(config: &ProbeConfig) -> ProbeOutcome {
    #[cfg(unix)]
    return run_unix(config);

    #[cfg(not(unix))]
    {
        let _ = config;
        ProbeOutcome::default()
    }
}

#[cfg(unix)]
fn run_unix(config: &ProbeConfig) -> ProbeOutcome {
    let mut outcome = ProbeOutcome::default();

    if config.answerback {
        // Answerback has no terminator; accept whatever arrives in time.
        outcome.answerback = send_probe(ANSWERBACK_QUERY, config.timeout, |_| false)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .filter(|s| !s.is_empty());
        crate::trace!(got = outcome.answerback.is_some(), "answerback probe");
    }

    if config.secondary_da {
        outcome.secondary_da = send_probe(SECONDARY_DA_QUERY, config.timeout, |bytes| {
            bytes.ends_with(b"c")
        })
        .and_then(|bytes| parse_secondary_da(&bytes));
        crate::trace!(got = outcome.secondary_da.is_some(), "secondary DA probe");
    }

    outcome
}

/// Parse a secondary DA reply: `ESC [ > Pp ; Pv ; Pc c`.
pub fn parse_secondary_da(bytes: &[u8]) -> Option<(u32, u32, u32)> {
    let start = find_subsequence(bytes, b"\x1b[>")?;
    let payload = &bytes[start + 3..];
    let end = payload.iter().position(|&b| b == b'c')?;

    let mut parts = payload[..end].split(|&b| b == b';').filter_map(|chunk| {
        std::str::from_utf8(chunk)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
    });

    let term_type = parts.next()?;
    let version = parts.next()?;
    let hardware = parts.next().unwrap_or(0);
    Some((term_type, version, hardware))
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// --- Probe I/O (Unix only) ---
//
// The query is written straight to /dev/tty and the reply read back from
// it on a helper thread, so a terminal that never answers costs exactly
// the timeout and nothing is left blocked on stdin.

#[cfg(unix)]
fn send_probe(
    query: &[u8],
    timeout: Duration,
    complete: impl Fn(&[u8]) -> bool + Send + 'static,
) -> Option<Vec<u8>> {
    use std::io::Write;

    let mut tty_write = std::fs::OpenOptions::new()
        .write(true)
        .open("/dev/tty")
        .ok()?;
    tty_write.write_all(query).ok()?;
    tty_write.flush().ok()?;
    drop(tty_write);

    read_tty_response(timeout, complete)
}

/// Read a reply from /dev/tty with a hard timeout.
///
/// The blocking read happens on a background thread; the thread is
/// abandoned on timeout (it holds only its own tty handle).
#[cfg(unix)]
fn read_tty_response(
    timeout: Duration,
    complete: impl Fn(&[u8]) -> bool + Send + 'static,
) -> Option<Vec<u8>> {
    use std::io::Read;
    use std::sync::mpsc;

    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        let Ok(mut tty) = std::fs::File::open("/dev/tty") else {
            let _ = tx.send(Vec::new());
            return;
        };
        let mut response = Vec::new();
        let mut byte = [0u8; 1];
        while response.len() < MAX_RESPONSE_LEN {
            match tty.read(&mut byte) {
                Ok(1) => {
                    response.push(byte[0]);
                    if complete(&response) {
                        break;
                    }
                }
                _ => break,
            }
        }
        let _ = tx.send(response);
    });

    match rx.recv_timeout(timeout) {
        Ok(bytes) if !bytes.is_empty() => Some(bytes),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_xterm_style_reply() {
        assert_eq!(
            parse_secondary_da(b"\x1b[>41;372;0c"),
            Some((41, 372, 0))
        );
    }

    #[test]
    fn parses_reply_with_leading_noise() {
        // A stray keystroke before the reply must not break parsing.
        assert_eq!(parse_secondary_da(b"q\x1b[>85;95;0c"), Some((85, 95, 0)));
    }

    #[test]
    fn parses_two_field_reply() {
        assert_eq!(parse_secondary_da(b"\x1b[>83;40201c"), Some((83, 40201, 0)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_secondary_da(b"hello"), None);
        assert_eq!(parse_secondary_da(b"\x1b[>c"), None);
        assert_eq!(parse_secondary_da(b"\x1b[>41;372;0"), None);
    }

    #[test]
    fn default_config_is_bounded() {
        let cfg = ProbeConfig::default();
        assert!(cfg.timeout <= Duration::from_millis(500));
        assert!(cfg.answerback && cfg.secondary_da);
    }
}
