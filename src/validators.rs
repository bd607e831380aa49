//! Input validation and sanitization functions for wfkit
//!
//! This module provides centralized validation for user inputs before they
//! are turned into engine descriptors.

use ipnetwork::IpNetwork;
use uuid::Uuid;

/// Longest display name accepted from the command line, in characters.
pub const MAX_DISPLAY_NAME_LEN: usize = 256;

/// Strips control characters from a display name.
///
/// Engine display names are wide strings, so non-ASCII text is kept.
///
/// # Examples
///
/// ```
/// use wfkit::validators::sanitize_display_name;
///
/// assert_eq!(sanitize_display_name("Block telnet"), "Block telnet");
///
/// let safe = sanitize_display_name("Line\nBreak\0");
/// assert!(!safe.contains('\n'));
/// assert!(!safe.contains('\0'));
/// ```
pub fn sanitize_display_name(input: &str) -> String {
    input.chars().filter(|c| !c.is_control()).collect()
}

/// Validates and sanitizes an engine object display name.
///
/// # Errors
///
/// Returns `Err` if:
/// - Name exceeds [`MAX_DISPLAY_NAME_LEN`] characters
/// - Name is empty or blank after sanitization
pub fn validate_display_name(input: &str) -> Result<String, String> {
    if input.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(format!(
            "Name too long (max {} characters)",
            MAX_DISPLAY_NAME_LEN
        ));
    }

    let sanitized = sanitize_display_name(input);
    let trimmed = sanitized.trim();

    if trimmed.is_empty() {
        return Err("Name must not be empty".to_string());
    }

    Ok(trimmed.to_string())
}

/// Parses an object key in hyphenated, simple, URN or braced form.
///
/// # Errors
///
/// Returns `Err` if the text is not a GUID or is the nil GUID.
pub fn validate_guid(input: &str) -> Result<Uuid, String> {
    let id = Uuid::parse_str(input.trim()).map_err(|e| format!("Invalid GUID '{input}': {e}"))?;
    if id.is_nil() {
        return Err("The nil GUID is not a valid object key".to_string());
    }
    Ok(id)
}

/// Validates a single port number.
///
/// # Errors
///
/// Returns `Err` if port is 0 (reserved).
pub fn validate_port(port: u16) -> Result<u16, String> {
    if port == 0 {
        Err("Port must be between 1 and 65535".to_string())
    } else {
        Ok(port)
    }
}

/// Validates a port range.
///
/// # Errors
///
/// Returns `Err` if:
/// - Either port is 0
/// - Start port is greater than end port
pub fn validate_port_range(start: u16, end: u16) -> Result<(u16, u16), String> {
    validate_port(start)?;
    validate_port(end)?;

    if start > end {
        Err("Start port must be less than or equal to end port".to_string())
    } else {
        Ok((start, end))
    }
}

/// Parses a `START-END` port range. A single port is a one-port range.
///
/// # Errors
///
/// Returns `Err` if either bound is not a port or the range is invalid.
pub fn parse_port_range(input: &str) -> Result<(u16, u16), String> {
    let (start, end) = input.split_once('-').unwrap_or((input, input));
    let parse = |s: &str| {
        s.trim()
            .parse::<u16>()
            .map_err(|e| format!("Invalid port '{}': {e}", s.trim()))
    };
    validate_port_range(parse(start)?, parse(end)?)
}

/// Parses an address or CIDR network, clearing host bits.
///
/// A bare address is a full-length prefix.
///
/// # Errors
///
/// Returns `Err` if the text is not an IPv4 or IPv6 address or network.
pub fn validate_cidr(input: &str) -> Result<IpNetwork, String> {
    let net: IpNetwork = input
        .trim()
        .parse()
        .map_err(|e| format!("Invalid network '{input}': {e}"))?;
    IpNetwork::new(net.network(), net.prefix()).map_err(|e| e.to_string())
}

/// Checks if a port is well-known and returns an informational note.
pub fn check_well_known_port(port: u16) -> Option<String> {
    if port <= 1024 {
        let name = match port {
            22 => "SSH",
            80 => "HTTP",
            443 => "HTTPS",
            53 => "DNS",
            25 => "SMTP",
            21 => "FTP",
            _ => return Some(format!("Privileged port {}", port)),
        };
        Some(format!("Port {}: {}", port, name))
    } else {
        None
    }
}

/// Checks if a network is in a reserved range and returns informational warning.
///
/// This is informational only and does not block adding the rule.
pub fn check_reserved_ip(ip: IpNetwork) -> Option<String> {
    use std::net::IpAddr;

    match ip.ip() {
        IpAddr::V4(ipv4) => {
            let octets = ipv4.octets();

            // RFC 1918 private ranges
            if octets[0] == 10
                || (octets[0] == 172 && (16..=31).contains(&octets[1]))
                || (octets[0] == 192 && octets[1] == 168)
            {
                return Some("Private IP range (RFC 1918)".to_string());
            }

            if octets[0] == 127 {
                return Some("Loopback range (127.x) - never leaves the host".to_string());
            }

            if octets[0] == 169 && octets[1] == 254 {
                return Some("Link-local range (169.254.x.x) - APIPA addresses".to_string());
            }

            None
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() {
                return Some("IPv6 loopback (::1) - never leaves the host".to_string());
            }

            if ipv6.segments()[0] & 0xffc0 == 0xfe80 {
                return Some("IPv6 link-local (fe80::/10) - local network only".to_string());
            }

            None
        }
    }
}
