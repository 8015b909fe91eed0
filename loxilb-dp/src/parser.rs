use crate::{
    ctx::{PktCtx, PktError, PortHint},
    hdr::*,
    xfi::{L3Meta, Xfi},
};
use log::{debug, log_enabled, Level};
use loxilb_common::{PipeRc, TcpFlags, TunType, GTP_MAX_EXTH, MAX_STACKED_VLANS};
use std::mem::size_of;

const ETH_HLEN: usize = size_of::<EthHdr>();
const VLAN_HLEN: usize = size_of::<VlanHdr>();

fn is_vlan(proto: u16) -> bool {
    proto == ETH_P_8021Q || proto == ETH_P_8021AD
}

/// Classifies the frame and fills the outer and, for VXLAN and GTP, the
/// inner metadata. Truncated mandatory headers mark the packet for drop
/// while the parser verdicts (trap, pass, redirect) are left in pipe_act.
pub fn parse_packet(ctx: &mut PktCtx, xf: &mut Xfi) {
    // A port chosen ahead of the pipeline is used once
    if let Some(hint) = ctx.hint.take() {
        match hint {
            PortHint::Rewire(port) => {
                xf.pm.oport = port;
                xf.set_rewire();
            }
            PortHint::Redirect(port) => {
                xf.pm.oport = port;
                xf.set_rdr();
            }
        }
        debug!("[prsr] port hint {:?}", hint);
        return;
    }

    if let Err(e) = parse_l2(ctx, xf) {
        debug!("[prsr] drop, {}", e);
        xf.set_drop();
    }
}

fn parse_l2(ctx: &mut PktCtx, xf: &mut Xfi) -> Result<(), PktError> {
    xf.pm.py_bytes = ctx.len() as u16;

    let eth = ctx.read::<EthHdr>(0)?;
    xf.l2m.valid = true;
    xf.l2m.dl_dst = eth.dst;
    xf.l2m.dl_src = eth.src;
    xf.pm.lkup_dmac = eth.dst;
    xf.l2m.dl_type = eth.proto.get();

    // 802.2
    if xf.l2m.dl_type < 1536 {
        xf.set_trap();
        return Ok(());
    }

    if ctx.mirr != 0 {
        xf.pm.mirr = ctx.mirr;
        debug!("[prsr] mirror {} if:{}", ctx.mirr, ctx.ifindex);
    }

    let mut proto = xf.l2m.dl_type;
    let mut off = ETH_HLEN;
    for i in 0..MAX_STACKED_VLANS {
        if !is_vlan(proto) {
            break;
        }
        let Ok(vlh) = ctx.read::<VlanHdr>(off) else {
            break;
        };
        proto = vlh.encap_proto.get();
        xf.l2m.vlan[i] = vlh.tci.get() & VLAN_VID_MASK;
        off += VLAN_HLEN;
    }

    xf.pm.l3_off = off as u16;
    xf.l2m.dl_type = proto;

    match proto {
        ETH_P_ARP => {
            parse_arp(ctx, off, &mut xf.l3m)?;
            xf.set_trapc(PipeRc::PARSER);
            return Ok(());
        }
        ETH_P_MPLS_UC | ETH_P_MPLS_MC => {
            let mpls = ctx.read::<MplsHdr>(off)?;
            xf.l2m.mpls_label = mpls.label();
            xf.l2m.mpls_tc = mpls.tc();
            xf.l2m.mpls_bos = mpls.bos();
        }
        ETH_P_IP => {
            if parse_ipv4(ctx, off, xf)? {
                return Ok(());
            }
        }
        ETH_P_IPV6 => parse_ipv6(ctx, off, xf)?,
        ETH_TYPE_LLB => return parse_llb_shim(ctx, xf),
        _ => {}
    }

    if is_l2_mcbc(&xf.l2m.dl_dst) {
        debug!("[prsr] bcmc");
        xf.set_trap();
    }

    Ok(())
}

fn parse_arp(ctx: &PktCtx, off: usize, l3m: &mut L3Meta) -> Result<(), PktError> {
    let arp = ctx.read::<ArpHdr>(off)?;
    if arp.ptype.get() == ETH_P_IP && arp.plen == 4 {
        l3m.saddr = arp.spa.get();
        l3m.daddr = arp.tpa.get();
    }
    l3m.nw_proto = (arp.oper.get() & 0xff) as u8;
    Ok(())
}

/// Returns true when the outer UDP dispatch consumed the rest of the frame
fn parse_ipv4(ctx: &PktCtx, off: usize, xf: &mut Xfi) -> Result<bool, PktError> {
    let iph = ctx.read::<Ipv4Hdr>(off)?;
    let iphl = iph.hlen();
    if iphl < size_of::<Ipv4Hdr>() {
        return Err(PktError::OutOfBounds { off, len: iphl });
    }
    ctx.check(off, iphl)?;

    xf.pm.l3_len = iph.tot_len.get();
    xf.l3m.valid = true;
    xf.l3m.tos = iph.tos & 0xfc;
    xf.l3m.nw_proto = iph.protocol;
    xf.l3m.saddr = iph.saddr.get();
    xf.l3m.daddr = iph.daddr.get();

    // Later fragments carry no L4 header, leave them untracked
    if !iph.is_first_fragment() {
        return Ok(false);
    }

    let l4_off = off + iphl;
    xf.pm.l4_off = l4_off as u16;

    match iph.protocol {
        IPPROTO_TCP => {
            if let Ok(tcp) = ctx.read::<TcpHdr>(l4_off) {
                xf.pm.tcp_flags = TcpFlags::from_bits_truncate(tcp.flags);
                xf.pm.l4fin = xf.pm.tcp_flags.intersects(TcpFlags::FIN | TcpFlags::RST);
                xf.l3m.source = tcp.source.get();
                xf.l3m.dest = tcp.dest.get();
            }
        }
        IPPROTO_UDP => {
            let Ok(udp) = ctx.read::<UdpHdr>(l4_off) else {
                return Ok(false);
            };
            xf.l3m.source = udp.source.get();
            xf.l3m.dest = udp.dest.get();

            if is_l2_mcbc(&xf.l2m.dl_dst) {
                debug!("[prsr] bcmc");
                xf.set_trap();
            }

            if iph.is_fragment() {
                xf.l3m.source = 0;
                xf.l3m.dest = 0;
            } else {
                parse_outer_udp(ctx, l4_off + size_of::<UdpHdr>(), xf)?;
            }
            return Ok(true);
        }
        IPPROTO_ICMP => {
            if let Ok(icmp) = ctx.read::<IcmpHdr>(l4_off) {
                if icmp.icmp_type == ICMP_ECHO || icmp.icmp_type == ICMP_ECHOREPLY {
                    xf.l3m.source = icmp.id.get();
                    xf.l3m.dest = icmp.id.get();
                }
            }
        }
        IPPROTO_SCTP => {
            if let Ok(sctp) = ctx.read::<SctpHdr>(l4_off) {
                xf.l3m.source = sctp.source.get();
                xf.l3m.dest = sctp.dest.get();

                // Chunks need not be present in all sctp packets
                let coff = l4_off + size_of::<SctpHdr>();
                if let Ok(c) = ctx.read::<SctpChunk>(coff) {
                    xf.pm.l4fin = c.is_finishing();
                }
            }
        }
        _ => {}
    }

    if iph.is_fragment() {
        xf.l3m.source = 0;
        xf.l3m.dest = 0;
    }

    Ok(false)
}

fn parse_ipv6(ctx: &PktCtx, off: usize, xf: &mut Xfi) -> Result<(), PktError> {
    let ip6 = ctx.read::<Ipv6Hdr>(off)?;

    xf.pm.l3_len = ip6.payload_len.get() + size_of::<Ipv6Hdr>() as u16;
    xf.l3m.valid = true;
    xf.l3m.tos = ip6.tos();
    xf.l3m.nw_proto = ip6.nexthdr;
    xf.l3m.saddr6 = ip6.saddr;
    xf.l3m.daddr6 = ip6.daddr;

    let l4_off = off + size_of::<Ipv6Hdr>();
    xf.pm.l4_off = l4_off as u16;

    match ip6.nexthdr {
        IPPROTO_TCP => {
            let tcp = ctx.read::<TcpHdr>(l4_off)?;
            xf.pm.tcp_flags = TcpFlags::from_bits_truncate(tcp.flags);
            xf.l3m.source = tcp.source.get();
            xf.l3m.dest = tcp.dest.get();
        }
        IPPROTO_UDP => {
            let udp = ctx.read::<UdpHdr>(l4_off)?;
            xf.l3m.source = udp.source.get();
            xf.l3m.dest = udp.dest.get();
        }
        _ => {}
    }

    Ok(())
}

/// Frames from the host carry the egress port in a shim header which is
/// removed before forwarding.
fn parse_llb_shim(ctx: &mut PktCtx, xf: &mut Xfi) -> Result<(), PktError> {
    let shim_len = size_of::<LlbShim>();
    let llb = ctx.read::<LlbShim>(ETH_HLEN)?;

    xf.pm.oport = llb.oport.get();
    xf.pm.iport = llb.iport.get();

    let eth = EthHdr {
        dst: xf.l2m.dl_dst,
        src: xf.l2m.dl_src,
        proto: llb.next_eth_type,
    };
    ctx.write(shim_len, &eth)?;
    ctx.adjust_head(shim_len as isize)?;

    xf.l2m.dl_type = llb.next_eth_type.get();
    xf.set_rdr();

    debug!("[prsr] llb shim iport:{} oport:{}", xf.pm.iport, xf.pm.oport);
    Ok(())
}

fn parse_outer_udp(ctx: &PktCtx, off: usize, xf: &mut Xfi) -> Result<(), PktError> {
    match xf.l3m.dest {
        VXLAN_UDP_DPORT => {
            let vx = ctx.read::<VxlanHdr>(off)?;
            xf.tm.tunnel_id = (vx.vni.get() >> 8) & 0xffffff;
            xf.tm.tun_type = TunType::Vxlan;
            let vx_next = off + size_of::<VxlanHdr>();
            xf.pm.tun_off = vx_next as u16;

            debug!("[prsr] udp vxlan {}", xf.tm.tunnel_id);
            parse_inner_packet(ctx, vx_next, false, xf)
        }
        GTPU_UDP_DPORT | GTPC_UDP_DPORT => parse_gtp(ctx, off, xf),
        _ => Ok(()),
    }
}

fn parse_gtp(ctx: &PktCtx, off: usize, xf: &mut Xfi) -> Result<(), PktError> {
    let gh = ctx.read::<GtpHdr>(off)?;

    if gh.ver() != GTP_VER_1 {
        return Ok(());
    }

    let mut hlen = size_of::<GtpHdr>();
    if gh.espn() != 0 {
        hlen += size_of::<GtpExtHdr>();
    }

    xf.tm.tunnel_id = gh.teid.get();
    xf.tm.tun_type = TunType::Gtp;

    if gh.espn() & GTP_EXT_FM != 0 {
        let geh = ctx.read::<GtpExtHdr>(off + size_of::<GtpHdr>())?;
        let mut nh = off + size_of::<GtpHdr>() + size_of::<GtpExtHdr>();
        let mut next_hdr = geh.next_hdr;

        // The PDU session container is always first
        if next_hdr == GTP_NH_PDU_SESS {
            let pch = ctx.read::<GtpPduSessHdr>(nh)?;
            if pch.len != 1 {
                return Err(PktError::OutOfBounds {
                    off: nh,
                    len: usize::from(pch.len) << 2,
                });
            }
            match pch.pdu_type() {
                GTP_PDU_SESS_UL | GTP_PDU_SESS_DL => {
                    hlen += size_of::<GtpPduSessHdr>();
                    xf.qm.qfi = pch.qfi();
                    nh += size_of::<GtpPduSessHdr>();
                    next_hdr = pch.next_hdr;
                }
                t => {
                    debug!("[prsr] gtp bad pdu type {}", t);
                    return Err(PktError::OutOfBounds { off: nh, len: 0 });
                }
            }
        }

        if next_hdr != 0 {
            // Each extension is a length in 4-byte units followed by the
            // content, the last byte holding the next extension type
            let mut depth = 0;
            while depth < GTP_MAX_EXTH {
                let elen = usize::from(ctx.read::<u8>(nh)?) << 2;
                if elen == 0 {
                    return Err(PktError::OutOfBounds { off: nh, len: 0 });
                }
                ctx.check(nh, elen)?;
                hlen += elen;
                if ctx.read::<u8>(nh + elen - 1)? == 0 {
                    break;
                }
                nh += elen;
                depth += 1;
            }

            if depth >= GTP_MAX_EXTH {
                xf.set_pass();
                return Ok(());
            }
        }
    }

    let gtp_next = off + hlen;
    xf.pm.tun_off = gtp_next as u16;

    let Ok(nv) = ctx.read::<u8>(gtp_next) else {
        return Ok(());
    };

    xf.il2m.dl_type = match nv >> 4 {
        4 => ETH_P_IP,
        6 => ETH_P_IPV6,
        _ => return Ok(()),
    };

    if log_enabled!(Level::Debug) {
        debug!(
            "[prsr] gtp teid 0x{:x} qfi {} hlen {}",
            xf.tm.tunnel_id, xf.qm.qfi, hlen
        );
    }

    parse_inner_packet(ctx, gtp_next, true, xf)
}

fn parse_inner_packet(
    ctx: &PktCtx,
    off: usize,
    skip_l2: bool,
    xf: &mut Xfi,
) -> Result<(), PktError> {
    let mut off = off;

    if skip_l2 {
        if xf.il2m.dl_type == 0 {
            return Ok(());
        }
    } else {
        let ieth = ctx.read::<EthHdr>(off)?;
        xf.il2m.valid = true;
        xf.il2m.dl_dst = ieth.dst;
        xf.il2m.dl_src = ieth.src;
        xf.il2m.dl_type = ieth.proto.get();

        // 802.2
        if xf.il2m.dl_type < 1536 {
            return Ok(());
        }

        off += ETH_HLEN;

        // Only one inner vlan is supported
        if is_vlan(xf.il2m.dl_type) {
            let ivlh = ctx.read::<VlanHdr>(off)?;
            xf.il2m.dl_type = ivlh.encap_proto.get();
            xf.il2m.vlan[0] = ivlh.tci.get() & VLAN_VID_MASK;
            off += VLAN_HLEN;
        }
    }

    match xf.il2m.dl_type {
        ETH_P_ARP => parse_arp(ctx, off, &mut xf.il3m),
        ETH_P_IP => {
            let iph = ctx.read::<Ipv4Hdr>(off)?;
            let iphl = iph.hlen();
            if iphl < size_of::<Ipv4Hdr>() {
                return Err(PktError::OutOfBounds { off, len: iphl });
            }
            ctx.check(off, iphl)?;

            xf.pm.il3_off = off as u16;
            xf.il3m.valid = true;
            xf.il3m.tos = iph.tos & 0xfc;
            xf.il3m.nw_proto = iph.protocol;
            xf.il3m.saddr = iph.saddr.get();
            xf.il3m.daddr = iph.daddr.get();

            // Inner fragments are left to the host stack
            if iph.is_fragment() {
                return Ok(());
            }

            let l4_off = off + iphl;
            xf.pm.il4_off = l4_off as u16;
            parse_inner_l4(ctx, l4_off, xf)
        }
        ETH_P_IPV6 => {
            let ip6 = ctx.read::<Ipv6Hdr>(off)?;
            let l4_off = off + size_of::<Ipv6Hdr>();
            xf.pm.il4_off = l4_off as u16;
            xf.il3m.valid = true;
            xf.il3m.tos = ip6.tos();
            xf.il3m.nw_proto = ip6.nexthdr;
            xf.il3m.saddr6 = ip6.saddr;
            xf.il3m.daddr6 = ip6.daddr;

            match ip6.nexthdr {
                IPPROTO_TCP => {
                    let tcp = ctx.read::<TcpHdr>(l4_off)?;
                    xf.il3m.source = tcp.source.get();
                    xf.il3m.dest = tcp.dest.get();
                }
                IPPROTO_UDP => {
                    let udp = ctx.read::<UdpHdr>(l4_off)?;
                    xf.il3m.source = udp.source.get();
                    xf.il3m.dest = udp.dest.get();
                }
                _ => {}
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn parse_inner_l4(ctx: &PktCtx, l4_off: usize, xf: &mut Xfi) -> Result<(), PktError> {
    match xf.il3m.nw_proto {
        IPPROTO_TCP => {
            let tcp = ctx.read::<TcpHdr>(l4_off)?;
            xf.pm.itcp_flags = TcpFlags::from_bits_truncate(tcp.flags);
            xf.pm.il4fin = xf.pm.itcp_flags.intersects(TcpFlags::FIN | TcpFlags::RST);
            xf.il3m.source = tcp.source.get();
            xf.il3m.dest = tcp.dest.get();
        }
        IPPROTO_UDP => {
            let udp = ctx.read::<UdpHdr>(l4_off)?;
            xf.il3m.source = udp.source.get();
            xf.il3m.dest = udp.dest.get();
        }
        IPPROTO_ICMP => {
            let icmp = ctx.read::<IcmpHdr>(l4_off)?;
            if icmp.icmp_type == ICMP_ECHO || icmp.icmp_type == ICMP_ECHOREPLY {
                xf.il3m.source = icmp.id.get();
                xf.il3m.dest = icmp.id.get();
            }
        }
        IPPROTO_SCTP => {
            let sctp = ctx.read::<SctpHdr>(l4_off)?;
            xf.il3m.source = sctp.source.get();
            xf.il3m.dest = sctp.dest.get();

            if let Ok(c) = ctx.read::<SctpChunk>(l4_off + size_of::<SctpHdr>()) {
                xf.pm.il4fin = c.is_finishing();
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use loxilb_common::PipeAct;

    fn parse(frame: &[u8]) -> (PktCtx, Xfi) {
        let mut ctx = PktCtx::new(2, frame);
        let mut xf = Xfi::default();
        parse_packet(&mut ctx, &mut xf);
        (ctx, xf)
    }

    #[test]
    fn test_tcp_syn() {
        let frame = tcp4_frame(CLIENT_IP, SERVER_IP, 40000, 80, TCP_SYN, 100, 0);
        let (_, xf) = parse(&frame);
        assert_eq!(xf.pm.pipe_act, PipeAct::empty());
        assert_eq!(xf.l2m.dl_type, ETH_P_IP);
        assert_eq!(xf.l3m.saddr, CLIENT_IP);
        assert_eq!(xf.l3m.daddr, SERVER_IP);
        assert_eq!((xf.l3m.source, xf.l3m.dest), (40000, 80));
        assert_eq!(xf.pm.tcp_flags, TcpFlags::SYN);
        assert!(!xf.pm.l4fin);
        assert_eq!(xf.pm.l3_off, 14);
        assert_eq!(xf.pm.l4_off, 34);
        assert_eq!(xf.pm.l3_len, 40);
    }

    #[test]
    fn test_truncated_mandatory_headers_drop() {
        let frame = tcp4_frame(CLIENT_IP, SERVER_IP, 40000, 80, TCP_SYN, 100, 0);
        // Every cut inside the MAC or the IP header must drop
        for len in 0..34 {
            let (_, xf) = parse(&frame[..len]);
            assert!(xf.is_dropped(), "len {len}");
        }
        // A cut L4 header is kept for the fragment handling
        let (_, xf) = parse(&frame[..40]);
        assert!(!xf.is_dropped());
        assert_eq!(xf.pm.tcp_flags, TcpFlags::empty());
    }

    #[test]
    fn test_stacked_vlans() {
        let mut frame = eth_hdr(ROUTER_MAC, CLIENT_MAC, ETH_P_8021AD);
        frame.extend(vlan_hdr(100, ETH_P_8021Q));
        frame.extend(vlan_hdr(200, ETH_P_IP));
        frame.extend(ipv4_udp(CLIENT_IP, SERVER_IP, 5000, 53, &[0; 8]));
        let (_, xf) = parse(&frame);
        assert_eq!(xf.l2m.vlan, [100, 200, 0]);
        assert_eq!(xf.l2m.dl_type, ETH_P_IP);
        assert_eq!(xf.pm.l3_off, 22);
        assert_eq!(xf.l3m.dest, 53);
    }

    #[test]
    fn test_arp_traps() {
        let mut frame = eth_hdr([0xff; 6], CLIENT_MAC, ETH_P_ARP);
        frame.extend(arp_request(CLIENT_MAC, CLIENT_IP, SERVER_IP));
        let (_, xf) = parse(&frame);
        assert!(xf.pm.pipe_act.contains(PipeAct::TRAP));
        assert!(xf.pm.rcode.contains(PipeRc::PARSER));
        assert_eq!(xf.l3m.saddr, CLIENT_IP);
        assert_eq!(xf.l3m.daddr, SERVER_IP);
        assert_eq!(xf.l3m.nw_proto, 1);
    }

    #[test]
    fn test_bcast_traps() {
        let mut frame = tcp4_frame(CLIENT_IP, SERVER_IP, 1, 2, TCP_ACK, 0, 0);
        frame[..6].copy_from_slice(&[0xff; 6]);
        let (_, xf) = parse(&frame);
        assert!(xf.pm.pipe_act.contains(PipeAct::TRAP));
    }

    #[test]
    fn test_mpls() {
        let mut frame = eth_hdr(ROUTER_MAC, CLIENT_MAC, ETH_P_MPLS_UC);
        // label 1000, tc 5, bos 1, ttl 64
        let tag: u32 = (1000 << 12) | (5 << 9) | (1 << 8) | 64;
        frame.extend(tag.to_be_bytes());
        let (_, xf) = parse(&frame);
        assert_eq!(xf.l2m.mpls_label, 1000);
        assert_eq!(xf.l2m.mpls_tc, 5);
        assert_eq!(xf.l2m.mpls_bos, 1);
    }

    #[test]
    fn test_fragments() {
        let mut frame = tcp4_frame(CLIENT_IP, SERVER_IP, 40000, 80, TCP_SYN, 1, 0);
        // First fragment, more fragments set
        frame[20] = 0x20;
        let (_, xf) = parse(&frame);
        assert_eq!((xf.l3m.source, xf.l3m.dest), (0, 0));
        assert_eq!(xf.pm.l4_off, 34);

        // Later fragment
        frame[20] = 0x00;
        frame[21] = 0x10;
        let (_, xf) = parse(&frame);
        assert_eq!((xf.l3m.source, xf.l3m.dest), (0, 0));
        assert_eq!(xf.pm.l4_off, 0);
        assert_eq!(xf.l3m.daddr, SERVER_IP);
        assert!(!xf.is_dropped());
    }

    #[test]
    fn test_vxlan_inner_tcp() {
        let inner = tcp4_frame_macs(
            [0x02, 0, 0, 0, 0, 0xaa],
            [0x02, 0, 0, 0, 0, 0xbb],
            0xc0a80002,
            0xc0a80101,
            33000,
            80,
            TCP_SYN,
            7,
            0,
        );
        let frame = vxlan_frame(0x0a000001, 0x0a000002, 5000, 100, &inner);
        let (_, xf) = parse(&frame);

        assert!(!xf.is_dropped());
        assert_eq!(xf.tm.tun_type, TunType::Vxlan);
        assert_eq!(xf.tm.tunnel_id, 100);
        let outer_len = 14 + 20 + 8;
        assert_eq!(xf.pm.tun_off as usize, outer_len + 8);
        assert!(xf.il2m.valid && xf.il3m.valid);
        assert_eq!(xf.il3m.daddr, 0xc0a80101);
        assert_eq!(xf.il3m.dest, 80);
        assert_eq!(xf.pm.itcp_flags, TcpFlags::SYN);
        assert_eq!(xf.pm.il3_off as usize, outer_len + 8 + 14);
        assert_eq!(xf.pm.il4_off as usize, outer_len + 8 + 14 + 20);
        // Outer metadata is untouched
        assert_eq!(xf.l3m.dest, VXLAN_UDP_DPORT);
        assert_eq!(xf.pm.tcp_flags, TcpFlags::empty());
    }

    #[test]
    fn test_vxlan_truncated_inner_drops() {
        let inner = tcp4_frame(CLIENT_IP, SERVER_IP, 1, 2, TCP_SYN, 0, 0);
        let frame = vxlan_frame(0x0a000001, 0x0a000002, 5000, 100, &inner);
        let (_, xf) = parse(&frame[..frame.len() - 4]);
        assert!(xf.is_dropped());
    }

    #[test]
    fn test_gtp_pdu_session() {
        let inner = ipv4_udp(0x0a0a0001, 0x08080808, 1000, 53, &[0; 4]);
        let frame = gtp_frame(0x0a000001, 0x0a000002, 0x1234, Some(9), &inner);
        let (_, xf) = parse(&frame);

        assert!(!xf.is_dropped());
        assert_eq!(xf.tm.tun_type, TunType::Gtp);
        assert_eq!(xf.tm.tunnel_id, 0x1234);
        assert_eq!(xf.qm.qfi, 9);
        assert_eq!(xf.pm.tun_off as usize, 14 + 20 + 8 + 16);
        assert_eq!(xf.il2m.dl_type, ETH_P_IP);
        assert_eq!(xf.il3m.daddr, 0x08080808);
        assert_eq!(xf.il3m.dest, 53);
    }

    #[test]
    fn test_gtp_plain() {
        let inner = ipv4_udp(0x0a0a0001, 0x08080808, 1000, 53, &[0; 4]);
        let frame = gtp_frame(0x0a000001, 0x0a000002, 77, None, &inner);
        let (_, xf) = parse(&frame);
        assert_eq!(xf.tm.tunnel_id, 77);
        assert_eq!(xf.pm.tun_off as usize, 14 + 20 + 8 + 8);
        assert_eq!(xf.il3m.saddr, 0x0a0a0001);
    }

    #[test]
    fn test_port_hint_used_once() {
        let frame = udp4_frame(CLIENT_IP, SERVER_IP, 5000, 53);
        let mut ctx = PktCtx::new(2, &frame);
        ctx.hint = Some(PortHint::Rewire(4));
        let mut xf = Xfi::default();
        parse_packet(&mut ctx, &mut xf);
        assert_eq!(xf.pm.pipe_act, PipeAct::REWIRE);
        assert_eq!(xf.pm.oport, 4);
        assert!(!xf.l2m.valid);

        let mut xf = Xfi::default();
        parse_packet(&mut ctx, &mut xf);
        assert!(xf.pm.pipe_act.is_empty());
        assert!(xf.l2m.valid);
    }

    #[test]
    fn test_llb_shim_stripped() {
        let inner = tcp4_frame(CLIENT_IP, SERVER_IP, 1, 2, TCP_ACK, 0, 0);
        let mut frame = inner[..12].to_vec();
        frame.extend(ETH_TYPE_LLB.to_be_bytes());
        frame.extend(3_u16.to_be_bytes());
        frame.extend(7_u16.to_be_bytes());
        frame.extend([0, 0]);
        frame.extend(ETH_P_IP.to_be_bytes());
        frame.extend(&inner[14..]);

        let (ctx, xf) = parse(&frame);
        assert!(xf.pm.pipe_act.contains(PipeAct::RDR));
        assert_eq!((xf.pm.iport, xf.pm.oport), (3, 7));
        assert_eq!(ctx.data(), &inner[..]);
    }
}
