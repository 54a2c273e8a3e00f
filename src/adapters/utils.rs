//! Shared validation helpers for credential and identity strings.

/// Returns `true` if every byte of `s` is in the printable ASCII range
/// `0x20..=0x7E` (space through tilde, inclusive).
///
/// Used to validate broker hostnames read back from the store or supplied
/// by a provisioning payload.
pub(crate) fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

/// Write `bytes` as uppercase hex into `out`.  Returns `false` if `out`
/// ran out of room.
pub(crate) fn push_hex_upper<const N: usize>(out: &mut heapless::String<N>, bytes: &[u8]) -> bool {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    bytes.iter().all(|b| {
        out.push(DIGITS[usize::from(b >> 4)] as char).is_ok()
            && out.push(DIGITS[usize::from(b & 0x0F)] as char).is_ok()
    })
}
