//! IDE-side control commands.
//!
//! IDEs register with the proxy over a short-lived TCP connection carrying a
//! single line-oriented command:
//!
//! ```text
//! proxyinit -p 9010 -k alice [-m 1]
//! proxystop -k alice
//! ```
//!
//! The response is one XML document, written raw on the same socket (this
//! channel does not use packet framing). Note the registering IDE does not
//! name its own host: the proxy takes it from the connection's peer address.

use crate::error::CommandError;
use crate::xml::{escape_attr, escape_text, XML_PROLOG};

/// A parsed control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// `proxyinit`: register an IDE under a key.
    Init {
        /// Port the IDE listens on for debugger sessions.
        port: u16,
        /// The key engines will use to reach this IDE.
        ide_key: String,
        /// Multi-session hint, stored but not interpreted.
        multi: Option<String>,
    },
    /// `proxystop`: drop a registration.
    Stop { ide_key: String },
}

/// Extract the command token from a raw request: the maximal run of
/// `[A-Za-z0-9_]` at the start of its first line.
pub fn command_token(request: &str) -> Option<&str> {
    let line = request.lines().next().unwrap_or("").trim();
    let token_len = line
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(line.len());
    if token_len == 0 {
        None
    } else {
        Some(&line[..token_len])
    }
}

/// Parse the first line of a control request.
///
/// The remainder after the command token is a whitespace-split argument
/// list with short-option semantics. Unrecognized tokens are ignored.
pub fn parse_command(request: &str) -> Result<ControlCommand, CommandError> {
    let line = request.lines().next().unwrap_or("").trim();
    let command = command_token(request).ok_or(CommandError::Empty)?;
    let args: Vec<&str> = line[command.len()..].split_whitespace().collect();

    match command {
        "proxyinit" => {
            let port_arg = flag_value(&args, "-p").ok_or(CommandError::MissingPort)?;
            let port: u16 = port_arg
                .parse()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| CommandError::InvalidPort(port_arg.to_string()))?;
            let ide_key = flag_value(&args, "-k").ok_or(CommandError::MissingIdeKey)?;
            Ok(ControlCommand::Init {
                port,
                ide_key: ide_key.to_string(),
                multi: flag_value(&args, "-m").map(str::to_string),
            })
        }
        "proxystop" => {
            let ide_key = flag_value(&args, "-k").ok_or(CommandError::MissingIdeKey)?;
            Ok(ControlCommand::Stop {
                ide_key: ide_key.to_string(),
            })
        }
        other => Err(CommandError::UnknownCommand(other.to_string())),
    }
}

fn flag_value<'a>(args: &[&'a str], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| *arg == flag)
        .and_then(|at| args.get(at + 1))
        .copied()
}

/// Successful `proxyinit` response.
///
/// `address` and `port` are the engine-side endpoint the proxy advertises,
/// the address debugger engines should be pointed at, not the IDE's own.
pub fn init_success_response(ide_key: &str, address: &str, port: u16) -> String {
    format!(
        "{XML_PROLOG}<proxyinit success=\"1\" idekey=\"{}\" address=\"{}\" port=\"{}\"/>",
        escape_attr(ide_key),
        escape_attr(address),
        port
    )
}

/// Successful `proxystop` response.
pub fn stop_success_response(ide_key: &str) -> String {
    format!(
        "{XML_PROLOG}<proxystop success=\"1\" idekey=\"{}\"/>",
        escape_attr(ide_key)
    )
}

/// Failure response for either command.
///
/// The response element echoes the command token when it forms a valid
/// element name, so callers can correlate the error with what they sent.
pub fn failure_response(command: &str, message: &str) -> String {
    let element = if !command.is_empty()
        && !command.starts_with(|c: char| c.is_ascii_digit())
        && command
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        command
    } else {
        "proxyerror"
    };
    format!(
        "{XML_PROLOG}<{element} success=\"0\"><error id=\"0\"><message>{}</message></error></{element}>",
        escape_text(message)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_token_extraction() {
        assert_eq!(command_token("proxyinit -p 1 -k a"), Some("proxyinit"));
        assert_eq!(command_token("proxystop\t-k a"), Some("proxystop"));
        assert_eq!(command_token("  "), None);
        assert_eq!(command_token("-k a"), None);
    }

    #[test]
    fn parses_proxyinit() {
        let parsed = parse_command("proxyinit -p 9010 -k alice").unwrap();
        assert_eq!(
            parsed,
            ControlCommand::Init {
                port: 9010,
                ide_key: "alice".to_string(),
                multi: None,
            }
        );
    }

    #[test]
    fn parses_proxyinit_with_multi() {
        let parsed = parse_command("proxyinit -p 9010 -k alice -m 1\r\n").unwrap();
        assert_eq!(
            parsed,
            ControlCommand::Init {
                port: 9010,
                ide_key: "alice".to_string(),
                multi: Some("1".to_string()),
            }
        );
    }

    #[test]
    fn ignores_unknown_flags() {
        let parsed = parse_command("proxyinit -z 3 -p 9010 -v -k alice").unwrap();
        assert!(matches!(parsed, ControlCommand::Init { port: 9010, .. }));
    }

    #[test]
    fn only_first_line_is_parsed() {
        let parsed = parse_command("proxystop -k bob\nproxyinit -p 1 -k x").unwrap();
        assert_eq!(
            parsed,
            ControlCommand::Stop {
                ide_key: "bob".to_string()
            }
        );
    }

    #[test]
    fn missing_port_and_key() {
        assert_eq!(
            parse_command("proxyinit -k alice"),
            Err(CommandError::MissingPort)
        );
        assert_eq!(
            parse_command("proxyinit -p 9010"),
            Err(CommandError::MissingIdeKey)
        );
        assert_eq!(parse_command("proxystop"), Err(CommandError::MissingIdeKey));
    }

    #[test]
    fn rejects_bad_ports() {
        assert_eq!(
            parse_command("proxyinit -p nine -k a"),
            Err(CommandError::InvalidPort("nine".to_string()))
        );
        assert_eq!(
            parse_command("proxyinit -p 0 -k a"),
            Err(CommandError::InvalidPort("0".to_string()))
        );
        assert_eq!(
            parse_command("proxyinit -p 70000 -k a"),
            Err(CommandError::InvalidPort("70000".to_string()))
        );
    }

    #[test]
    fn rejects_unknown_and_empty_commands() {
        assert_eq!(
            parse_command("proxylist -k a"),
            Err(CommandError::UnknownCommand("proxylist".to_string()))
        );
        assert_eq!(parse_command(""), Err(CommandError::Empty));
        assert_eq!(parse_command("  \r\n"), Err(CommandError::Empty));
        assert_eq!(
            parse_command("-k alice"),
            Err(CommandError::Empty)
        );
    }

    #[test]
    fn success_responses() {
        assert_eq!(
            init_success_response("alice", "127.0.0.1", 9000),
            format!(
                "{XML_PROLOG}<proxyinit success=\"1\" idekey=\"alice\" address=\"127.0.0.1\" port=\"9000\"/>"
            )
        );
        assert_eq!(
            stop_success_response("alice"),
            format!("{XML_PROLOG}<proxystop success=\"1\" idekey=\"alice\"/>")
        );
    }

    #[test]
    fn failure_response_echoes_command() {
        let response = failure_response("proxyinit", "IDE Key already exists");
        assert_eq!(
            response,
            format!(
                "{XML_PROLOG}<proxyinit success=\"0\"><error id=\"0\"><message>IDE Key already exists</message></error></proxyinit>"
            )
        );
    }

    #[test]
    fn failure_response_sanitizes_bad_element_names() {
        assert!(failure_response("", "msg").contains("<proxyerror success=\"0\">"));
        assert!(failure_response("9bad", "msg").contains("<proxyerror success=\"0\">"));
        assert!(failure_response("a b", "msg").contains("<proxyerror success=\"0\">"));
    }

    #[test]
    fn failure_response_escapes_message() {
        let response = failure_response("proxystop", "key <x> & co");
        assert!(response.contains("<message>key &lt;x&gt; &amp; co</message>"));
    }
}
