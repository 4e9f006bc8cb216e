// ABOUTME: Factory functions for the SIM800 AT command set used by the session layer
// ABOUTME: One small constructor per command kind instead of a subclass hierarchy

use std::time::Duration;

use crate::command::{CommandSpec, LineMatcher, DEFAULT_TIMEOUT};

pub const OK: &str = "OK";
pub const ERROR: &str = "ERROR";

/// Message format selected with `AT+CMGF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmgfMode {
    Pdu = 0,
    Text = 1,
}

/// Storage filter for `AT+CMGL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmglStat {
    ReceivedUnread = 0,
    ReceivedRead = 1,
    StoredUnsent = 2,
    StoredSent = 3,
    All = 4,
}

fn base(command: &str) -> CommandSpec {
    CommandSpec {
        command: command.to_string(),
        arg: None,
        complete_when: Some(LineMatcher::literal(OK)),
        error_when: Some(LineMatcher::literal(ERROR)),
        expected_data: Vec::new(),
        input_mode: false,
        timeout: DEFAULT_TIMEOUT,
        observer: None,
    }
}

/// Bare `AT` handshake confirming an AT-capable device is on the line.
pub fn handshake() -> CommandSpec {
    base("AT")
}

/// `AT+CPIN?` PIN status query; completes on the status line, not on `OK`.
pub fn pin_status() -> CommandSpec {
    CommandSpec {
        complete_when: Some(LineMatcher::predicate(|line| line.contains("+CPIN: "))),
        ..base("AT+CPIN?")
    }
}

/// `AT+CPIN=<pin>` SIM unlock.
pub fn pin_unlock(pin: &str) -> CommandSpec {
    CommandSpec {
        arg: Some(pin.to_string()),
        complete_when: Some(LineMatcher::literal("+CPIN: READY")),
        ..base("AT+CPIN=")
    }
}

/// `AT+CREG?` network registration query.
pub fn registration_status() -> CommandSpec {
    CommandSpec {
        complete_when: Some(LineMatcher::predicate(|line| line.starts_with("+CREG:"))),
        ..base("AT+CREG?")
    }
}

/// `AT+CNMI=<mode>` unsolicited notification routing.
pub fn notification_mode(cnmi: &str) -> CommandSpec {
    CommandSpec {
        arg: Some(cnmi.to_string()),
        ..base("AT+CNMI=")
    }
}

/// `AT+CMGF=<mode>` message format selection.
pub fn message_format(mode: CmgfMode) -> CommandSpec {
    CommandSpec {
        arg: Some((mode as u8).to_string()),
        ..base("AT+CMGF=")
    }
}

/// `AT+CMGS=<len>` length announcement before a PDU payload.
///
/// The modem answers with the `> ` prompt rather than `OK`, so this command
/// completes on its own echo; the payload follows as a separate input-mode
/// command.
pub fn send_length(tpdu_length: usize) -> CommandSpec {
    CommandSpec {
        arg: Some(tpdu_length.to_string()),
        complete_when: Some(LineMatcher::predicate(|line| line.starts_with("AT+CMGS"))),
        ..base("AT+CMGS=")
    }
}

/// Raw PDU payload written in input mode after [`send_length`].
///
/// The response of interest is the `+CMGS: <reference>` line carrying the
/// modem-assigned message reference. Transmission over a congested network
/// can be slow, so the budget is generous.
pub fn send_payload(payload: &str) -> CommandSpec {
    CommandSpec {
        expected_data: vec![LineMatcher::literal("+CMGS:")],
        input_mode: true,
        timeout: Duration::from_secs(60),
        ..base(payload)
    }
}

/// `AT+CMGR=<slot>` read one stored message.
///
/// Captures the `+CMGR: ` header line and the hex PDU line that follows it.
pub fn read_message(slot: u32) -> CommandSpec {
    CommandSpec {
        arg: Some(slot.to_string()),
        expected_data: vec![
            LineMatcher::literal("+CMGR: "),
            LineMatcher::predicate(looks_like_pdu),
        ],
        ..base("AT+CMGR=")
    }
}

/// `AT+CMGD=<slot>` delete one stored message.
pub fn delete_message(slot: u32) -> CommandSpec {
    CommandSpec {
        arg: Some(slot.to_string()),
        ..base("AT+CMGD=")
    }
}

/// `AT+CMGDA=6` wipe all stored messages.
pub fn wipe_storage() -> CommandSpec {
    CommandSpec {
        arg: Some("6".to_string()),
        ..base("AT+CMGDA=")
    }
}

/// `AT+CMGL=<stat>` list stored messages.
pub fn list_messages(stat: CmglStat) -> CommandSpec {
    CommandSpec {
        arg: Some((stat as u8).to_string()),
        expected_data: vec![LineMatcher::literal("+CMGL:")],
        ..base("AT+CMGL=")
    }
}

/// `AT+CFUN=1,1` full-functionality restart of the modem.
pub fn hardware_reset() -> CommandSpec {
    CommandSpec {
        arg: Some("1,1".to_string()),
        ..base("AT+CFUN=")
    }
}

fn looks_like_pdu(line: &str) -> bool {
    !line.is_empty() && line.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_length_completes_on_echo() {
        let spec = send_length(23);
        assert_eq!(spec.wire_bytes(), b"AT+CMGS=23\n".to_vec());
        let complete = spec.complete_when.unwrap();
        assert!(complete.is_terminal_match("AT+CMGS=23"));
        assert!(!complete.is_terminal_match("OK"));
    }

    #[test]
    fn send_payload_is_input_mode_with_long_budget() {
        let spec = send_payload("0011000B91");
        assert!(spec.input_mode);
        assert_eq!(spec.timeout, Duration::from_secs(60));
        assert_eq!(spec.wire_bytes(), b"0011000B91\x1A".to_vec());
        assert!(spec.expected_data[0].is_data_match("+CMGS: 42"));
    }

    #[test]
    fn read_message_captures_header_and_pdu_lines() {
        let spec = read_message(4);
        assert!(spec.expected_data.iter().any(|m| m.is_data_match("+CMGR: 0,,25")));
        assert!(spec.expected_data.iter().any(|m| m.is_data_match("07913366003000F0")));
        assert!(!spec.expected_data.iter().any(|m| m.is_data_match("OK")));
    }

    #[test]
    fn enum_args_render_as_digits() {
        assert_eq!(message_format(CmgfMode::Pdu).arg.as_deref(), Some("0"));
        assert_eq!(list_messages(CmglStat::All).arg.as_deref(), Some("4"));
    }
}
