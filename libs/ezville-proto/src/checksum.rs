//! Checksum Codec
//!
//! Every EzVille frame carries a two-byte trailer: an XOR checksum over all
//! preceding bytes, followed by an additive checksum over all bytes up to and
//! including the XOR byte (mod 256). Mismatches are never fatal; callers
//! discard the candidate and resume scanning.

/// Compute the two trailer bytes for a frame body (marker through payload,
/// without the trailer itself).
pub fn generate_checksum(body: &[u8]) -> (u8, u8) {
    let xor = body.iter().fold(0u8, |acc, b| acc ^ b);
    let sum: u32 = body.iter().map(|&b| b as u32).sum();
    let add = ((sum + xor as u32) & 0xFF) as u8;
    (xor, add)
}

/// Verify a full candidate frame including its two trailer bytes.
///
/// Returns `false` for malformed input; never panics.
pub fn verify_checksum(candidate: &[u8]) -> bool {
    if candidate.len() < 2 {
        return false;
    }
    let (body, trailer) = candidate.split_at(candidate.len() - 2);
    let (xor, add) = generate_checksum(body);
    trailer[0] == xor && trailer[1] == add
}

/// Append the trailer to a frame body, returning the complete frame.
pub fn seal(mut body: Vec<u8>) -> Vec<u8> {
    let (xor, add) = generate_checksum(&body);
    body.push(xor);
    body.push(add);
    body
}
