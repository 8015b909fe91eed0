//! Internet checksum helpers. Values are handled in host order, the
//! one's complement arithmetic does not depend on the byte order.

use crate::hdr::Ipv4Hdr;
use zerocopy::IntoBytes;

#[inline(always)]
pub fn csum_fold_32_to_16(mut csum: u32) -> u16 {
    // Two folds cover any carry out of the first one
    csum = (csum & 0xffff) + (csum >> 16);
    csum = (csum & 0xffff) + (csum >> 16);
    csum as u16
}

/// Adds the 16-bit words of `data` to `csum`, an odd trailing byte is
/// padded with zero.
pub fn csum_add_bytes(mut csum: u32, data: &[u8]) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for w in &mut chunks {
        csum = csum.wrapping_add(u32::from(u16::from_be_bytes([w[0], w[1]])));
        csum = (csum & 0xffff) + (csum >> 16);
    }
    if let [b] = chunks.remainder() {
        csum += u32::from(*b) << 8;
    }
    csum
}

/// Replaces `old` with `new` in the checksum as per RFC 1624 eqn. 3
#[inline(always)]
pub fn csum_update_u16(check: u16, old: u16, new: u16) -> u16 {
    let csum = u32::from(!check) + u32::from(!old) + u32::from(new);
    !csum_fold_32_to_16(csum)
}

#[inline(always)]
pub fn csum_update_u32(check: u16, old: u32, new: u32) -> u16 {
    let csum = u32::from(!check)
        + u32::from(!((old >> 16) as u16))
        + u32::from(!(old as u16))
        + u32::from((new >> 16) as u16)
        + u32::from(new as u16);
    !csum_fold_32_to_16(csum)
}

/// Computes the header checksum of a header with the check field set to 0
pub fn ipv4_new_csum(iph: &Ipv4Hdr) -> u16 {
    !csum_fold_32_to_16(csum_add_bytes(0, iph.as_bytes()))
}

/// Returns true if the header checksum verifies
pub fn ipv4_csum_ok(iph: &Ipv4Hdr) -> bool {
    csum_fold_32_to_16(csum_add_bytes(0, iph.as_bytes())) == 0xffff
}

/// Decrements the TTL and patches the checksum for the 0x0100 change in
/// the ttl/protocol word. A 0xffff result is stored as 0.
pub fn ip_decrease_ttl(iph: &mut Ipv4Hdr) {
    let check = u32::from(iph.check.get()) + 0x0100;
    iph.check.set((check + u32::from(check >= 0xffff)) as u16);
    iph.ttl = iph.ttl.wrapping_sub(1);
}
