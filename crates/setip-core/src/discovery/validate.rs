//! Dotted-quad validation for candidate addresses

use std::net::Ipv4Addr;

/// Accept a candidate if it is a dotted-quad IPv4 address
///
/// Surrounding whitespace (echo services end with a newline) is ignored.
/// The candidate must be exactly four dot-separated groups of one to three
/// ASCII digits, and every group must be in 0..=255. Leading zeros are
/// allowed and read as decimal (`010` is 10), unlike `Ipv4Addr::from_str`.
pub fn validate_candidate(candidate: &str) -> Option<Ipv4Addr> {
    let candidate = candidate.trim();
    let mut octets = [0u8; 4];
    let mut groups = candidate.split('.');

    for octet in octets.iter_mut() {
        let group = groups.next()?;
        if group.is_empty() || group.len() > 3 || !group.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *octet = group.parse().ok()?;
    }

    if groups.next().is_some() {
        return None;
    }

    Some(Ipv4Addr::from(octets))
}
