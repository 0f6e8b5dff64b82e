// MIT License - Copyright (c) 2017 Doug Rathbone
// Rust translation

use std::collections::VecDeque;

use tracing::{debug, error, info, warn};

use crate::protocol::CbusEvent;

/// Object status report.
const CODE_STATUS: u16 = 300;
/// Tree transfer: begin / line / end.
const CODE_TREE_BEGIN: u16 = 343;
const CODE_TREE_LINE: u16 = 347;
const CODE_TREE_END: u16 = 344;

/// What a processed command-channel line means for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseAction {
    /// A `300` status line carried a parseable object event.
    Event(CbusEvent),
    /// A `344` closed a tree transfer; the buffered XML is handed back with
    /// the network it was requested for.
    Tree { network: String, xml: String },
    /// Nothing for the caller to do (logged internally as appropriate).
    None,
}

/// Classifies command-channel response lines by their three-digit code and
/// runs the small state machine for `343`/`347`/`344` tree transfers.
///
/// Tree responses carry no network identifier, so requested networks are
/// remembered in FIFO order: each `343` consumes the oldest outstanding
/// request. Responses on the shared command channel are line-ordered, which
/// makes the pairing sound even across pool members.
#[derive(Debug, Default)]
pub struct ResponseProcessor {
    tree_buffer: String,
    tree_network: Option<String>,
    requested_networks: VecDeque<String>,
}

impl ResponseProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note that a TREEXML request for `network` was enqueued.
    pub fn tree_requested(&mut self, network: String) {
        self.requested_networks.push_back(network);
    }

    /// Process one line from the command channel.
    pub fn process_line(&mut self, line: &str) -> ResponseAction {
        let Some((code, rest)) = split_code(line) else {
            debug!("response: skipping uncoded line: {line}");
            return ResponseAction::None;
        };

        match code {
            CODE_STATUS => match parse_status_event(rest) {
                Some(event) => ResponseAction::Event(event),
                None => {
                    debug!("response: unparseable 300 payload: {rest}");
                    ResponseAction::None
                }
            },
            CODE_TREE_BEGIN => {
                self.tree_buffer.clear();
                self.tree_network = self.requested_networks.pop_front();
                if self.tree_network.is_none() {
                    warn!("response: tree transfer began without a pending request");
                }
                ResponseAction::None
            }
            CODE_TREE_LINE => {
                self.tree_buffer.push_str(rest);
                self.tree_buffer.push('\n');
                ResponseAction::None
            }
            CODE_TREE_END => {
                let xml = std::mem::take(&mut self.tree_buffer);
                match self.tree_network.take() {
                    Some(network) => ResponseAction::Tree { network, xml },
                    None => {
                        warn!("response: tree transfer ended without a network, dropping");
                        ResponseAction::None
                    }
                }
            }
            400..=599 => {
                match error_hint(code) {
                    Some(hint) => error!("response: C-Gate error {code} ({hint}): {rest}"),
                    None => error!("response: C-Gate error {code}: {rest}"),
                }
                ResponseAction::None
            }
            _ => {
                info!("response: {code} {rest}");
                ResponseAction::None
            }
        }
    }
}

/// Split `<code>-<rest>` or `<code> <rest>` where `<code>` is three digits
/// with a leading 1-6. Anything else is skipped.
fn split_code(line: &str) -> Option<(u16, &str)> {
    let (code, rest) = match line.split_once('-') {
        Some((digits, rest)) if is_code(digits) => (digits, rest),
        _ => match line.split_once(' ') {
            Some((digits, rest)) if is_code(digits) => (digits, rest),
            _ => {
                if is_code(line) {
                    (line, "")
                } else {
                    return None;
                }
            }
        },
    };
    Some((code.parse().ok()?, rest))
}

fn is_code(s: &str) -> bool {
    s.len() == 3
        && s.bytes().all(|b| b.is_ascii_digit())
        && (b'1'..=b'6').contains(&s.as_bytes()[0])
}

/// A `300` payload is usually `//<project>/<n>/<a>/<g>: level=<L>`, but
/// object events echoed onto the command channel use the plain event shape.
fn parse_status_event(payload: &str) -> Option<CbusEvent> {
    if payload.contains("level=") {
        CbusEvent::parse_status(payload)
    } else {
        CbusEvent::parse(payload)
    }
}

/// Human hint for C-Gate 4xx/5xx response codes.
fn error_hint(code: u16) -> Option<&'static str> {
    match code {
        400 => Some("bad request"),
        401 => Some("unauthorized"),
        404 => Some("not found"),
        406 => Some("bad parameter"),
        500 => Some("internal server error"),
        503 => Some("service unavailable"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Address;

    #[test]
    fn test_split_code_forms() {
        assert_eq!(split_code("300-//HOME/254/56/4: level=128").unwrap().0, 300);
        assert_eq!(split_code("300 //HOME/254/56/4: level=128").unwrap().0, 300);
        assert_eq!(split_code("200 OK").unwrap(), (200, "OK"));
        assert!(split_code("abc def").is_none());
        assert!(split_code("99 too-short").is_none());
        assert!(split_code("700 out-of-range").is_none());
        assert!(split_code("3000 four-digits").is_none());
    }

    #[test]
    fn test_status_line_yields_event() {
        let mut processor = ResponseProcessor::new();
        let action = processor.process_line("300-//HOME/254/56/4: level=128");
        let ResponseAction::Event(event) = action else {
            panic!("expected event, got {action:?}");
        };
        assert_eq!(event.address, Address::new("254", "56", "4"));
        assert_eq!(event.level, Some(128));
        assert_eq!(event.action, "on");
    }

    #[test]
    fn test_status_line_event_shape() {
        let mut processor = ResponseProcessor::new();
        let action = processor.process_line("300 lighting on 254/56/4");
        assert!(matches!(action, ResponseAction::Event(_)));
    }

    #[test]
    fn test_unparseable_status_dropped() {
        let mut processor = ResponseProcessor::new();
        assert_eq!(processor.process_line("300-garbage"), ResponseAction::None);
    }

    #[test]
    fn test_tree_transfer() {
        let mut processor = ResponseProcessor::new();
        processor.tree_requested("254".to_string());

        assert_eq!(processor.process_line("343-Begin XML snippet"), ResponseAction::None);
        assert_eq!(processor.process_line("347-<Network>"), ResponseAction::None);
        assert_eq!(processor.process_line("347-</Network>"), ResponseAction::None);
        let action = processor.process_line("344-End XML snippet");
        assert_eq!(
            action,
            ResponseAction::Tree { network: "254".into(), xml: "<Network>\n</Network>\n".into() }
        );
    }

    #[test]
    fn test_tree_begin_resets_buffer() {
        let mut processor = ResponseProcessor::new();
        processor.tree_requested("254".to_string());
        processor.tree_requested("200".to_string());

        processor.process_line("343-Begin");
        processor.process_line("347-stale");
        // A second transfer begins before the first ended; the buffer resets
        // and the next pending network takes over.
        processor.process_line("343-Begin");
        processor.process_line("347-<fresh/>");
        let action = processor.process_line("344-End");
        assert_eq!(action, ResponseAction::Tree { network: "200".into(), xml: "<fresh/>\n".into() });
    }

    #[test]
    fn test_tree_end_without_begin_dropped() {
        let mut processor = ResponseProcessor::new();
        assert_eq!(processor.process_line("344-End"), ResponseAction::None);
    }

    #[test]
    fn test_errors_and_noise_are_none() {
        let mut processor = ResponseProcessor::new();
        assert_eq!(processor.process_line("400-Bad request syntax"), ResponseAction::None);
        assert_eq!(processor.process_line("503 busy"), ResponseAction::None);
        assert_eq!(processor.process_line("201 Service ready"), ResponseAction::None);
        assert_eq!(processor.process_line("nonsense"), ResponseAction::None);
    }
}
