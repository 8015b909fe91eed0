//! Frame builders shared by the unit tests

use crate::csum::{csum_add_bytes, csum_fold_32_to_16, ipv4_new_csum};
use crate::hdr::*;
use zerocopy::network_endian::{U16, U32};
use zerocopy::IntoBytes;

pub const CLIENT_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
pub const ROUTER_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0xfe];
pub const SERVER_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];
pub const CLIENT_IP: u32 = 0x0a000001;
pub const SERVER_IP: u32 = 0x0a000102;
pub const VIP: u32 = 0x14141414;

pub fn eth_hdr(dst: [u8; 6], src: [u8; 6], proto: u16) -> Vec<u8> {
    EthHdr {
        dst,
        src,
        proto: U16::new(proto),
    }
    .as_bytes()
    .to_vec()
}

pub fn vlan_hdr(tci: u16, proto: u16) -> Vec<u8> {
    VlanHdr {
        tci: U16::new(tci),
        encap_proto: U16::new(proto),
    }
    .as_bytes()
    .to_vec()
}

pub fn arp_request(sha: [u8; 6], spa: u32, tpa: u32) -> Vec<u8> {
    ArpHdr {
        htype: U16::new(1),
        ptype: U16::new(ETH_P_IP),
        hlen: 6,
        plen: 4,
        oper: U16::new(1),
        sha,
        spa: U32::new(spa),
        tha: [0; 6],
        tpa: U32::new(tpa),
    }
    .as_bytes()
    .to_vec()
}

/// Sums the pseudo header and the L4 bytes
pub fn l4_csum(saddr: u32, daddr: u32, proto: u8, l4: &[u8]) -> u16 {
    let mut csum = csum_add_bytes(0, &saddr.to_be_bytes());
    csum = csum_add_bytes(csum, &daddr.to_be_bytes());
    csum = csum_add_bytes(csum, &[0, proto]);
    csum = csum_add_bytes(csum, &(l4.len() as u16).to_be_bytes());
    csum = csum_add_bytes(csum, l4);
    !csum_fold_32_to_16(csum)
}

/// Builds an IP packet around `l4` with valid IP and TCP/UDP checksums
pub fn ipv4_pkt(saddr: u32, daddr: u32, proto: u8, l4: &[u8]) -> Vec<u8> {
    let mut iph = Ipv4Hdr {
        ver_ihl: 0x45,
        tos: 0,
        tot_len: U16::new((20 + l4.len()) as u16),
        id: U16::new(1),
        frag_off: U16::new(0x4000),
        ttl: 64,
        protocol: proto,
        check: U16::ZERO,
        saddr: U32::new(saddr),
        daddr: U32::new(daddr),
    };
    iph.check.set(ipv4_new_csum(&iph));

    let mut l4 = l4.to_vec();
    let check_off = match proto {
        IPPROTO_TCP => Some(16),
        IPPROTO_UDP => Some(6),
        _ => None,
    };
    if let Some(co) = check_off {
        l4[co..co + 2].fill(0);
        let c = l4_csum(saddr, daddr, proto, &l4);
        l4[co..co + 2].copy_from_slice(&c.to_be_bytes());
    }

    let mut pkt = iph.as_bytes().to_vec();
    pkt.extend(l4);
    pkt
}

pub fn tcp_seg(sport: u16, dport: u16, flags: u8, seq: u32, ack: u32) -> Vec<u8> {
    TcpHdr {
        source: U16::new(sport),
        dest: U16::new(dport),
        seq: U32::new(seq),
        ack_seq: U32::new(ack),
        doff_res: 5 << 4,
        flags,
        window: U16::new(65535),
        check: U16::ZERO,
        urg_ptr: U16::ZERO,
    }
    .as_bytes()
    .to_vec()
}

pub fn udp_dgram(sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
    let mut d = UdpHdr {
        source: U16::new(sport),
        dest: U16::new(dport),
        len: U16::new((8 + payload.len()) as u16),
        check: U16::ZERO,
    }
    .as_bytes()
    .to_vec();
    d.extend(payload);
    d
}

pub fn ipv4_udp(saddr: u32, daddr: u32, sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
    ipv4_pkt(saddr, daddr, IPPROTO_UDP, &udp_dgram(sport, dport, payload))
}

#[allow(clippy::too_many_arguments)]
pub fn tcp4_frame_macs(
    dmac: [u8; 6],
    smac: [u8; 6],
    saddr: u32,
    daddr: u32,
    sport: u16,
    dport: u16,
    flags: u8,
    seq: u32,
    ack: u32,
) -> Vec<u8> {
    let mut f = eth_hdr(dmac, smac, ETH_P_IP);
    f.extend(ipv4_pkt(
        saddr,
        daddr,
        IPPROTO_TCP,
        &tcp_seg(sport, dport, flags, seq, ack),
    ));
    f
}

/// A TCP frame sent by the client towards the router
pub fn tcp4_frame(
    saddr: u32,
    daddr: u32,
    sport: u16,
    dport: u16,
    flags: u8,
    seq: u32,
    ack: u32,
) -> Vec<u8> {
    tcp4_frame_macs(
        ROUTER_MAC, CLIENT_MAC, saddr, daddr, sport, dport, flags, seq, ack,
    )
}

pub fn udp4_frame(saddr: u32, daddr: u32, sport: u16, dport: u16) -> Vec<u8> {
    let mut f = eth_hdr(ROUTER_MAC, CLIENT_MAC, ETH_P_IP);
    f.extend(ipv4_udp(saddr, daddr, sport, dport, &[0xab; 16]));
    f
}

pub fn icmp4_frame(saddr: u32, daddr: u32, icmp_type: u8, id: u16, seq: u16) -> Vec<u8> {
    let mut icmp = IcmpHdr {
        icmp_type,
        code: 0,
        checksum: U16::ZERO,
        id: U16::new(id),
        sequence: U16::new(seq),
    }
    .as_bytes()
    .to_vec();
    let c = !csum_fold_32_to_16(csum_add_bytes(0, &icmp));
    icmp[2..4].copy_from_slice(&c.to_be_bytes());

    let mut f = eth_hdr(ROUTER_MAC, CLIENT_MAC, ETH_P_IP);
    f.extend(ipv4_pkt(saddr, daddr, IPPROTO_ICMP, &icmp));
    f
}

/// An SCTP frame with a single chunk, `init_tag` fills the body of the
/// INIT and INIT-ACK chunks and the cookie of COOKIE-ECHO.
#[allow(clippy::too_many_arguments)]
pub fn sctp4_frame(
    saddr: u32,
    daddr: u32,
    sport: u16,
    dport: u16,
    vtag: u32,
    chunk_type: u8,
    init_tag: u32,
) -> Vec<u8> {
    let mut l4 = SctpHdr {
        source: U16::new(sport),
        dest: U16::new(dport),
        vtag: U32::new(vtag),
        checksum: U32::ZERO,
    }
    .as_bytes()
    .to_vec();
    let body = match chunk_type {
        SCTP_INIT_CHUNK | SCTP_INIT_CHUNK_ACK => SctpInitChunk {
            tag: U32::new(init_tag),
            adv_rwc: U32::new(65535),
            n_ostr: U16::new(10),
            n_istr: U16::new(10),
            init_tsn: U32::new(1),
        }
        .as_bytes()
        .to_vec(),
        SCTP_COOKIE_ECHO => init_tag.to_be_bytes().to_vec(),
        _ => vec![],
    };
    l4.extend(
        SctpChunk {
            chunk_type,
            flags: 0,
            len: U16::new((4 + body.len()) as u16),
        }
        .as_bytes(),
    );
    l4.extend(body);

    let mut f = eth_hdr(ROUTER_MAC, CLIENT_MAC, ETH_P_IP);
    f.extend(ipv4_pkt(saddr, daddr, IPPROTO_SCTP, &l4));
    f
}

/// Wraps `inner` in eth/ip/udp/vxlan towards the VXLAN port
pub fn vxlan_frame(saddr: u32, daddr: u32, sport: u16, vni: u32, inner: &[u8]) -> Vec<u8> {
    let mut payload = VxlanHdr {
        flags: U32::new(VXLAN_VI_FLAG_ON),
        vni: U32::new(vni << 8),
    }
    .as_bytes()
    .to_vec();
    payload.extend(inner);

    let mut f = eth_hdr(ROUTER_MAC, CLIENT_MAC, ETH_P_IP);
    f.extend(ipv4_udp(saddr, daddr, sport, VXLAN_UDP_DPORT, &payload));
    f
}

/// Wraps the IP packet `inner` in a GTP-U header, with a PDU session
/// container when `qfi` is set
pub fn gtp_frame(saddr: u32, daddr: u32, teid: u32, qfi: Option<u8>, inner: &[u8]) -> Vec<u8> {
    let mut g = vec![];
    let ext = match qfi {
        Some(qfi) => {
            let mut e = GtpExtHdr {
                seq: U16::ZERO,
                npdu: 0,
                next_hdr: GTP_NH_PDU_SESS,
            }
            .as_bytes()
            .to_vec();
            e.extend(
                GtpPduSessHdr {
                    len: 1,
                    pdu_type: GTP_PDU_SESS_UL << 4,
                    qfi,
                    next_hdr: 0,
                }
                .as_bytes(),
            );
            e
        }
        None => vec![],
    };
    let flags = if qfi.is_some() { 0x34 } else { 0x30 };
    g.extend(
        GtpHdr {
            flags,
            mt: GTP_MT_TPDU,
            mlen: U16::new((ext.len() + inner.len()) as u16),
            teid: U32::new(teid),
        }
        .as_bytes(),
    );
    g.extend(ext);
    g.extend(inner);

    let mut f = eth_hdr(ROUTER_MAC, CLIENT_MAC, ETH_P_IP);
    f.extend(ipv4_udp(saddr, daddr, GTPU_UDP_SPORT, GTPU_UDP_DPORT, &g));
    f
}

/// Verifies the IP and, for TCP and UDP, the L4 checksum of the IPv4
/// packet at `l3_off`
pub fn ipv4_csums_ok(frame: &[u8], l3_off: usize) -> bool {
    let ip = &frame[l3_off..l3_off + 20];
    if csum_fold_32_to_16(csum_add_bytes(0, ip)) != 0xffff {
        return false;
    }
    let tot_len = usize::from(u16::from_be_bytes([ip[2], ip[3]]));
    let proto = ip[9];
    let saddr = u32::from_be_bytes([ip[12], ip[13], ip[14], ip[15]]);
    let daddr = u32::from_be_bytes([ip[16], ip[17], ip[18], ip[19]]);
    let l4 = &frame[l3_off + 20..l3_off + tot_len];
    match proto {
        // A zero UDP checksum means the sender did not compute it
        IPPROTO_UDP if l4[6..8] == [0, 0] => true,
        IPPROTO_TCP | IPPROTO_UDP => l4_csum(saddr, daddr, proto, l4) == 0,
        _ => true,
    }
}
