//! Listening-port scanner over the kernel socket tables.
//!
//! Scope is host-wide rather than per supervised process: a supervised dev
//! server frequently forks children that hold the actual listening socket,
//! so inspecting `/proc/net/tcp` and `/proc/net/tcp6` is the only reliable
//! way to see what actually came up. Stateless; recomputed on every call.

use std::collections::BTreeSet;

/// Inclusive application port range. Anything outside is never reported.
pub const PORT_MIN: u16 = 3000;
pub const PORT_MAX: u16 = 9999;

/// TCP state nibble for LISTEN in the proc socket tables.
const STATE_LISTEN: &str = "0A";

/// Scan the kernel socket tables for LISTEN ports in the application range.
pub fn scan_listening_ports() -> BTreeSet<u16> {
    let mut ports = BTreeSet::new();
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        if let Ok(text) = std::fs::read_to_string(table) {
            ports.extend(parse_socket_table(&text));
        }
    }
    ports
}

/// Parse one proc socket table, yielding qualifying local ports.
///
/// Each data line looks like:
/// `0: 0100007F:0BB8 00000000:0000 0A ...` where the second column is
/// `local_address:port` (port in hex) and the fourth is the state.
fn parse_socket_table(text: &str) -> BTreeSet<u16> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 4 {
                return None;
            }
            if !cols[3].eq_ignore_ascii_case(STATE_LISTEN) {
                return None;
            }
            let port_hex = cols[1].rsplit(':').next()?;
            let port = u16::from_str_radix(port_hex, 16).ok()?;
            (PORT_MIN..=PORT_MAX).contains(&port).then_some(port)
        })
        .collect()
}
