//! Egress rewrites: NAT with incremental checksum updates, tunnel
//! termination and origination, and the outer VLAN tag. The rewrites run
//! in order NAT, GTP, VXLAN and VLAN since each step relies on the offsets
//! left by the previous one.

use crate::{
    csum::{csum_update_u16, csum_update_u32, ipv4_new_csum},
    ctx::{PktCtx, PktError},
    hdr::*,
    xfi::Xfi,
};
use log::debug;
use loxilb_common::{NatFlags, TunType};
use std::mem::size_of;
use zerocopy::network_endian::{U16, U32};

const IP_HLEN: usize = size_of::<Ipv4Hdr>();
const UDP_HLEN: usize = size_of::<UdpHdr>();

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Src,
    Dst,
}

/// Patches the L4 checksum at `l4_off` with `f`. UDP datagrams sent
/// without a checksum keep it disabled and SCTP checksums are cleared.
fn update_l4_csum<F>(ctx: &mut PktCtx, xf: &Xfi, f: F) -> Result<(), PktError>
where
    F: Fn(u16) -> u16,
{
    // Later fragments have no L4 header
    if xf.pm.l4_off == 0 {
        return Ok(());
    }
    let l4_off = usize::from(xf.pm.l4_off);
    match xf.l3m.nw_proto {
        IPPROTO_TCP => {
            let tcp = ctx.hdr_mut::<TcpHdr>(l4_off)?;
            tcp.check.set(f(tcp.check.get()));
        }
        IPPROTO_UDP => {
            let udp = ctx.hdr_mut::<UdpHdr>(l4_off)?;
            let check = udp.check.get();
            if check != 0 {
                let check = f(check);
                udp.check.set(if check == 0 { 0xffff } else { check });
            }
        }
        IPPROTO_SCTP => {
            ctx.hdr_mut::<SctpHdr>(l4_off)?.checksum = U32::ZERO;
        }
        _ => {}
    }
    Ok(())
}

fn set_ip(ctx: &mut PktCtx, xf: &mut Xfi, side: Side, xip: u32) -> Result<(), PktError> {
    let iph = ctx.hdr_mut::<Ipv4Hdr>(usize::from(xf.pm.l3_off))?;
    let field = match side {
        Side::Src => &mut iph.saddr,
        Side::Dst => &mut iph.daddr,
    };
    let old = field.get();
    field.set(xip);
    iph.check.set(csum_update_u32(iph.check.get(), old, xip));

    // ICMP checksums do not cover the pseudo header
    if xf.l3m.nw_proto != IPPROTO_ICMP {
        update_l4_csum(ctx, xf, |c| csum_update_u32(c, old, xip))?;
    }

    match side {
        Side::Src => xf.l3m.saddr = xip,
        Side::Dst => xf.l3m.daddr = xip,
    }
    Ok(())
}

/// A zero port, or a packet without L4 header, leaves the port in place
fn set_port(ctx: &mut PktCtx, xf: &mut Xfi, side: Side, xport: u16) -> Result<(), PktError> {
    if xport == 0 || xf.pm.l4_off == 0 {
        return Ok(());
    }

    // Source and destination ports lead all of TCP, UDP and SCTP headers
    let off = usize::from(xf.pm.l4_off) + if side == Side::Src { 0 } else { 2 };
    let port = ctx.hdr_mut::<U16>(off)?;
    let old = port.get();
    port.set(xport);
    update_l4_csum(ctx, xf, |c| csum_update_u16(c, old, xport))?;

    match side {
        Side::Src => xf.l3m.source = xport,
        Side::Dst => xf.l3m.dest = xport,
    }
    Ok(())
}

fn check_l4(ctx: &PktCtx, xf: &Xfi) -> Result<(), PktError> {
    if xf.pm.l4_off == 0 {
        return Ok(());
    }
    let l4_off = usize::from(xf.pm.l4_off);
    match xf.l3m.nw_proto {
        IPPROTO_TCP => ctx.check(l4_off, size_of::<TcpHdr>()),
        IPPROTO_UDP => ctx.check(l4_off, UDP_HLEN),
        IPPROTO_SCTP => ctx.check(l4_off, size_of::<SctpHdr>()),
        _ => Ok(()),
    }
}

/// Translation of one side of the flow. A zero address means hairpin,
/// the packet goes back to its sender from the address it was sent to.
/// Only the addresses of non-first fragments are translated.
fn do_nat(ctx: &mut PktCtx, xf: &mut Xfi, side: Side, xip: u32, xport: u16) -> Result<(), PktError> {
    match xf.l3m.nw_proto {
        IPPROTO_TCP | IPPROTO_UDP | IPPROTO_SCTP => {
            check_l4(ctx, xf)?;
            if xip == 0 {
                let (saddr, daddr) = (xf.l3m.saddr, xf.l3m.daddr);
                set_ip(ctx, xf, Side::Src, daddr)?;
                set_ip(ctx, xf, Side::Dst, saddr)?;
            } else {
                set_ip(ctx, xf, side, xip)?;
            }
            set_port(ctx, xf, side, xport)
        }
        IPPROTO_ICMP => set_ip(ctx, xf, side, xip),
        _ => Ok(()),
    }
}

pub fn do_dnat(ctx: &mut PktCtx, xf: &mut Xfi, xip: u32, xport: u16) -> Result<(), PktError> {
    do_nat(ctx, xf, Side::Dst, xip, xport)
}

pub fn do_snat(ctx: &mut PktCtx, xf: &mut Xfi, xip: u32, xport: u16) -> Result<(), PktError> {
    do_nat(ctx, xf, Side::Src, xip, xport)
}

/// Removes the outermost VLAN tag and rewrites the MAC header
pub fn remove_vlan_tag(ctx: &mut PktCtx, xf: &Xfi) -> Result<(), PktError> {
    ctx.check(0, ETH_HLEN + size_of::<VlanHdr>())?;
    ctx.delete_room(2 * ETH_ALEN, size_of::<VlanHdr>())?;
    let eth = EthHdr {
        dst: xf.l2m.dl_dst,
        src: xf.l2m.dl_src,
        proto: U16::new(xf.l2m.dl_type),
    };
    ctx.write(0, &eth)
}

pub fn insert_vlan_tag(ctx: &mut PktCtx, xf: &Xfi, vlan: u16) -> Result<(), PktError> {
    ctx.add_room(2 * ETH_ALEN, size_of::<VlanHdr>())?;
    let veth = VlanEthHdr {
        dst: xf.l2m.dl_dst,
        src: xf.l2m.dl_src,
        proto: U16::new(ETH_P_8021Q),
        tci: U16::new(vlan & VLAN_VID_MASK),
        encap_proto: U16::new(xf.l2m.dl_type),
    };
    ctx.write(0, &veth)
}

pub fn swap_vlan_tag(ctx: &mut PktCtx, xf: &Xfi, vlan: u16) -> Result<(), PktError> {
    let veth = ctx.hdr_mut::<VlanEthHdr>(0)?;
    veth.dst = xf.l2m.dl_dst;
    veth.src = xf.l2m.dl_src;
    veth.tci.set(vlan & VLAN_VID_MASK);
    Ok(())
}

/// Writes the egress MAC header, tagged with the egress bridge domain
/// unless it is 0
pub fn do_out_vlan(ctx: &mut PktCtx, xf: &Xfi) -> Result<(), PktError> {
    let vlan = xf.pm.bd;
    let tagged = xf.l2m.vlan[0] != 0;

    match (vlan, tagged) {
        (0, true) => remove_vlan_tag(ctx, xf),
        (0, false) => {
            let eth = ctx.hdr_mut::<EthHdr>(0)?;
            eth.dst = xf.l2m.dl_dst;
            eth.src = xf.l2m.dl_src;
            Ok(())
        }
        (vlan, true) => swap_vlan_tag(ctx, xf, vlan),
        (vlan, false) => insert_vlan_tag(ctx, xf, vlan),
    }
}

fn shift_offsets(xf: &mut Xfi, delta: isize) {
    let shift = |off: &mut u16| {
        if *off != 0 {
            *off = (*off as isize + delta) as u16;
        }
    };
    shift(&mut xf.pm.l3_off);
    shift(&mut xf.pm.l4_off);
}

/// Removes everything in front of the inner MAC header at `olen`
pub fn strip_vxlan(ctx: &mut PktCtx, xf: &mut Xfi, olen: usize) -> Result<(), PktError> {
    ctx.delete_room(0, olen)?;

    let eth = ctx.hdr_mut::<EthHdr>(0)?;
    eth.dst = xf.il2m.dl_dst;
    eth.src = xf.il2m.dl_src;
    if xf.il2m.vlan[0] != 0 {
        ctx.hdr_mut::<VlanHdr>(ETH_HLEN)?
            .encap_proto
            .set(xf.il2m.dl_type);
    } else {
        ctx.hdr_mut::<EthHdr>(0)?.proto.set(xf.il2m.dl_type);
    }

    // The egress tag handling applies to the inner frame from now on
    xf.l2m.vlan = xf.il2m.vlan;
    xf.pm.tun_off = 0;
    shift_offsets(xf, -(olen as isize));
    debug!("[dprs] vxlan stripped, {} bytes", olen);
    Ok(())
}

/// Wraps the frame in MAC/IP/UDP/VXLAN headers. The inner MAC header is
/// rebuilt from the inner metadata and never carries a VLAN tag.
pub fn ins_vxlan(
    ctx: &mut PktCtx,
    xf: &mut Xfi,
    rip: u32,
    sip: u32,
    tid: u32,
) -> Result<(), PktError> {
    if xf.l2m.vlan[0] != 0 {
        remove_vlan_tag(ctx, xf)?;
        shift_offsets(xf, -(size_of::<VlanHdr>() as isize));
    }

    let olen = ETH_HLEN + IP_HLEN + UDP_HLEN + size_of::<VxlanHdr>();
    ctx.add_room(0, olen)?;

    let outer_len = xf.pm.l3_len + olen as u16;
    ctx.write(
        0,
        &EthHdr {
            dst: xf.l2m.dl_dst,
            src: xf.l2m.dl_src,
            proto: U16::new(ETH_P_IP),
        },
    )?;

    let mut iph = Ipv4Hdr {
        ver_ihl: 0x45,
        tos: 0,
        tot_len: U16::new(outer_len),
        id: U16::ZERO,
        frag_off: U16::ZERO,
        ttl: 64,
        protocol: IPPROTO_UDP,
        check: U16::ZERO,
        saddr: U32::new(sip),
        daddr: U32::new(rip),
    };
    iph.check.set(ipv4_new_csum(&iph));
    ctx.write(ETH_HLEN, &iph)?;

    let udp = UdpHdr {
        source: U16::new(xf.l3m.source.wrapping_add(VXLAN_UDP_SPORT)),
        dest: U16::new(VXLAN_UDP_DPORT),
        len: U16::new(outer_len - IP_HLEN as u16),
        check: U16::ZERO,
    };
    ctx.write(ETH_HLEN + IP_HLEN, &udp)?;

    let vx = VxlanHdr {
        flags: U32::new(VXLAN_VI_FLAG_ON),
        vni: U32::new(tid << 8),
    };
    ctx.write(ETH_HLEN + IP_HLEN + UDP_HLEN, &vx)?;

    // The old MAC header becomes the inner one
    ctx.write(
        olen,
        &EthHdr {
            dst: xf.il2m.dl_dst,
            src: xf.il2m.dl_src,
            proto: U16::new(xf.il2m.dl_type),
        },
    )?;

    xf.tm.tun_type = TunType::Vxlan;
    xf.tm.tunnel_id = tid;
    xf.tm.tun_encap = true;
    xf.pm.tun_off = (ETH_HLEN + IP_HLEN + UDP_HLEN) as u16;
    xf.l2m.vlan[0] = 0;
    xf.l2m.dl_type = ETH_P_IP;
    shift_offsets(xf, olen as isize);

    debug!("[dprs] vxlan {} added {:x} -> {:x}", tid, sip, rip);
    Ok(())
}

/// Removes the outer IP/UDP/GTP headers in front of the inner IP packet
/// at `olen` and rebuilds an untagged MAC header
pub fn strip_gtp(ctx: &mut PktCtx, xf: &mut Xfi, olen: usize) -> Result<(), PktError> {
    if olen < ETH_HLEN {
        return Err(PktError::OutOfBounds { off: 0, len: olen });
    }
    let delta = olen - ETH_HLEN;
    ctx.delete_room(0, delta)?;
    ctx.write(
        0,
        &EthHdr {
            dst: xf.l2m.dl_dst,
            src: xf.l2m.dl_src,
            proto: U16::new(xf.l2m.dl_type),
        },
    )?;

    // Tags are pushed back by the egress bridge domain
    xf.l2m.vlan[0] = 0;
    xf.l2m.vlan[1] = 0;
    xf.pm.tun_off = 0;
    shift_offsets(xf, -(delta as isize));
    debug!("[dprs] gtp stripped, {} bytes", delta);
    Ok(())
}

/// Inserts IP/UDP/GTP-U headers between the MAC header and the IP packet,
/// with a downlink PDU session container when `qfi` is set
pub fn ins_gtp(
    ctx: &mut PktCtx,
    xf: &mut Xfi,
    rip: u32,
    sip: u32,
    tid: u32,
    qfi: u8,
) -> Result<(), PktError> {
    let ghlen = if qfi != 0 {
        size_of::<GtpHdr>() + size_of::<GtpExtHdr>() + size_of::<GtpPduSessHdr>()
    } else {
        size_of::<GtpHdr>()
    };
    let olen = IP_HLEN + UDP_HLEN + ghlen;
    let l3_off = usize::from(xf.pm.l3_off);
    ctx.add_room(l3_off, olen)?;

    let outer_len = xf.pm.l3_len + olen as u16;
    let mut iph = Ipv4Hdr {
        ver_ihl: 0x45,
        tos: 0,
        tot_len: U16::new(outer_len),
        id: U16::ZERO,
        frag_off: U16::ZERO,
        ttl: 64,
        protocol: IPPROTO_UDP,
        check: U16::ZERO,
        saddr: U32::new(sip),
        daddr: U32::new(rip),
    };
    iph.check.set(ipv4_new_csum(&iph));
    ctx.write(l3_off, &iph)?;

    let udp_off = l3_off + IP_HLEN;
    ctx.write(
        udp_off,
        &UdpHdr {
            source: U16::new(GTPU_UDP_SPORT),
            dest: U16::new(GTPU_UDP_DPORT),
            len: U16::new(outer_len - IP_HLEN as u16),
            check: U16::ZERO,
        },
    )?;

    let gh_off = udp_off + UDP_HLEN;
    let espn = if qfi != 0 { GTP_EXT_FM } else { 0 };
    ctx.write(
        gh_off,
        &GtpHdr {
            // Version 1, protocol type GTP
            flags: (GTP_VER_1 << 5) | 0x10 | espn,
            mt: GTP_MT_TPDU,
            mlen: U16::new(xf.pm.l3_len + (ghlen - size_of::<GtpHdr>()) as u16),
            teid: U32::new(tid),
        },
    )?;

    if qfi != 0 {
        let geh_off = gh_off + size_of::<GtpHdr>();
        ctx.write(
            geh_off,
            &GtpExtHdr {
                seq: U16::ZERO,
                npdu: 0,
                next_hdr: GTP_NH_PDU_SESS,
            },
        )?;
        ctx.write(
            geh_off + size_of::<GtpExtHdr>(),
            &GtpPduSessHdr {
                len: 1,
                pdu_type: GTP_PDU_SESS_DL << 4,
                qfi: qfi & 0x3f,
                next_hdr: 0,
            },
        )?;
    }

    xf.tm.tun_type = TunType::Gtp;
    xf.tm.tunnel_id = tid;
    xf.tm.tun_encap = true;
    xf.pm.tun_off = (udp_off + UDP_HLEN) as u16;
    xf.pm.l4_off = udp_off as u16;

    debug!("[dprs] gtp teid 0x{:x} qfi {} added", tid, qfi);
    Ok(())
}

/// Rewrites that apply to every forwarded or trapped packet: NAT and the
/// GTP tunnel handling
pub fn unparse_always(ctx: &mut PktCtx, xf: &mut Xfi) -> Result<(), PktError> {
    let (nxip, nxport) = (xf.l4m.nxip, xf.l4m.nxport);
    if xf.pm.nf.contains(NatFlags::SRC) {
        do_snat(ctx, xf, nxip, nxport)?;
    } else if xf.pm.nf.contains(NatFlags::DST) {
        do_dnat(ctx, xf, nxip, nxport)?;
    }

    let tm = xf.tm;
    if tm.tun_decap {
        if tm.tun_type == TunType::Gtp {
            let olen = usize::from(xf.pm.tun_off);
            strip_gtp(ctx, xf, olen)?;
        }
    } else if tm.new_tunnel_id != 0 && tm.tun_type == TunType::Gtp {
        let qfi = xf.qm.qfi;
        ins_gtp(ctx, xf, tm.tun_rip, tm.tun_sip, tm.new_tunnel_id, qfi)?;
    }
    Ok(())
}

/// Rewrites for packets leaving through a port: VXLAN and the MAC header
pub fn unparse(ctx: &mut PktCtx, xf: &mut Xfi) -> Result<(), PktError> {
    let tm = xf.tm;
    if tm.tun_decap {
        if tm.tun_type == TunType::Vxlan {
            let olen = usize::from(xf.pm.tun_off);
            strip_vxlan(ctx, xf, olen)?;
        }
    } else if tm.new_tunnel_id != 0 && tm.tun_type == TunType::Vxlan {
        ins_vxlan(ctx, xf, tm.tun_rip, tm.tun_sip, tm.new_tunnel_id)?;
    }

    do_out_vlan(ctx, xf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        csum::{csum_add_bytes, csum_fold_32_to_16, ipv4_csum_ok},
        parser::parse_packet,
        testutil::*,
    };

    fn parsed(frame: &[u8]) -> (PktCtx, Xfi) {
        let mut ctx = PktCtx::new(1, frame);
        let mut xf = Xfi::default();
        parse_packet(&mut ctx, &mut xf);
        (ctx, xf)
    }

    #[test]
    fn test_dnat_tcp_checksums() {
        let frame = tcp4_frame(CLIENT_IP, VIP, 40000, 80, TCP_SYN, 100, 0);
        let (mut ctx, mut xf) = parsed(&frame);
        do_dnat(&mut ctx, &mut xf, SERVER_IP, 8080).unwrap();

        let iph = ctx.read::<Ipv4Hdr>(14).unwrap();
        assert_eq!(iph.daddr.get(), SERVER_IP);
        let tcp = ctx.read::<TcpHdr>(34).unwrap();
        assert_eq!(tcp.dest.get(), 8080);
        assert_eq!((xf.l3m.daddr, xf.l3m.dest), (SERVER_IP, 8080));
        assert!(ipv4_csums_ok(ctx.data(), 14));
    }

    #[test]
    fn test_snat_udp_checksums() {
        let frame = udp4_frame(CLIENT_IP, SERVER_IP, 5000, 53);
        let (mut ctx, mut xf) = parsed(&frame);
        do_snat(&mut ctx, &mut xf, VIP, 30000).unwrap();

        let iph = ctx.read::<Ipv4Hdr>(14).unwrap();
        assert_eq!(iph.saddr.get(), VIP);
        assert_eq!(ctx.read::<UdpHdr>(34).unwrap().source.get(), 30000);
        assert!(ipv4_csums_ok(ctx.data(), 14));
    }

    #[test]
    fn test_hairpin_swaps_addresses() {
        let frame = tcp4_frame(CLIENT_IP, VIP, 40000, 80, TCP_ACK, 1, 1);
        let (mut ctx, mut xf) = parsed(&frame);
        do_dnat(&mut ctx, &mut xf, 0, 8080).unwrap();

        let iph = ctx.read::<Ipv4Hdr>(14).unwrap();
        assert_eq!((iph.saddr.get(), iph.daddr.get()), (VIP, CLIENT_IP));
        assert!(ipv4_csums_ok(ctx.data(), 14));
    }

    #[test]
    fn test_dnat_later_fragment_ip_only() {
        let mut frame = tcp4_frame(CLIENT_IP, VIP, 40000, 80, TCP_ACK, 1, 1);
        // Fragment offset 185, what follows the IP header is payload
        frame[20..22].copy_from_slice(&185u16.to_be_bytes());
        frame[24..26].fill(0);
        let c = !csum_fold_32_to_16(csum_add_bytes(0, &frame[14..34]));
        frame[24..26].copy_from_slice(&c.to_be_bytes());

        let (mut ctx, mut xf) = parsed(&frame);
        assert_eq!(xf.pm.l4_off, 0);
        do_dnat(&mut ctx, &mut xf, SERVER_IP, 8080).unwrap();

        let iph = ctx.read::<Ipv4Hdr>(14).unwrap();
        assert_eq!(iph.daddr.get(), SERVER_IP);
        assert_eq!(iph.tot_len.get(), (frame.len() - 14) as u16);
        assert!(ipv4_csum_ok(&iph));
        assert_eq!(xf.l3m.dest, 0);

        // Only the destination address and the header checksum change
        let out = ctx.data();
        let diff: Vec<_> = (0..frame.len()).filter(|&i| frame[i] != out[i]).collect();
        assert!(
            diff.iter().all(|i| (24..26).contains(i) || (30..34).contains(i)),
            "{diff:?}"
        );
    }

    #[test]
    fn test_nat_truncated_l4_fails() {
        let frame = tcp4_frame(CLIENT_IP, VIP, 40000, 80, TCP_SYN, 100, 0);
        let (_, mut xf) = parsed(&frame);
        let mut ctx = PktCtx::new(1, &frame[..40]);
        assert!(do_dnat(&mut ctx, &mut xf, SERVER_IP, 8080).is_err());
    }

    #[test]
    fn test_icmp_dnat_ip_only() {
        let frame = icmp4_frame(CLIENT_IP, VIP, ICMP_ECHO, 7, 1);
        let (mut ctx, mut xf) = parsed(&frame);
        let icmp_before = ctx.read::<IcmpHdr>(34).unwrap().checksum.get();
        do_dnat(&mut ctx, &mut xf, SERVER_IP, 0).unwrap();
        assert_eq!(ctx.read::<Ipv4Hdr>(14).unwrap().daddr.get(), SERVER_IP);
        assert_eq!(ctx.read::<IcmpHdr>(34).unwrap().checksum.get(), icmp_before);
        assert!(ipv4_csums_ok(ctx.data(), 14));
    }

    #[test]
    fn test_out_vlan_insert_swap_remove() {
        let frame = udp4_frame(CLIENT_IP, SERVER_IP, 5000, 53);
        let (mut ctx, mut xf) = parsed(&frame);
        xf.l2m.dl_dst = SERVER_MAC;
        xf.l2m.dl_src = ROUTER_MAC;

        xf.pm.bd = 100;
        do_out_vlan(&mut ctx, &xf).unwrap();
        assert_eq!(ctx.len(), frame.len() + 4);
        let veth = ctx.read::<VlanEthHdr>(0).unwrap();
        assert_eq!(veth.dst, SERVER_MAC);
        assert_eq!(veth.proto.get(), ETH_P_8021Q);
        assert_eq!(veth.tci.get(), 100);
        assert_eq!(veth.encap_proto.get(), ETH_P_IP);
        assert_eq!(&ctx.data()[18..], &frame[14..]);

        xf.l2m.vlan[0] = 100;
        xf.pm.bd = 200;
        do_out_vlan(&mut ctx, &xf).unwrap();
        assert_eq!(ctx.read::<VlanEthHdr>(0).unwrap().tci.get(), 200);

        xf.pm.bd = 0;
        do_out_vlan(&mut ctx, &xf).unwrap();
        assert_eq!(ctx.len(), frame.len());
        assert_eq!(&ctx.data()[12..], &frame[12..]);
        assert_eq!(ctx.read::<EthHdr>(0).unwrap().src, ROUTER_MAC);
    }

    #[test]
    fn test_vxlan_encap_then_strip() {
        let frame = tcp4_frame(CLIENT_IP, SERVER_IP, 40000, 80, TCP_SYN, 1, 0);
        let (mut ctx, mut xf) = parsed(&frame);
        xf.il2m = xf.l2m;
        ins_vxlan(&mut ctx, &mut xf, 0x0b000002, 0x0b000001, 100).unwrap();

        assert_eq!(ctx.len(), frame.len() + 50);
        assert_eq!(&ctx.data()[50..], &frame[..]);
        assert!(ipv4_csums_ok(ctx.data(), 14));

        // The result parses back as the same inner flow
        let data = ctx.data().to_vec();
        let (mut ctx, mut xf) = parsed(&data);
        assert_eq!(xf.tm.tun_type, TunType::Vxlan);
        assert_eq!(xf.tm.tunnel_id, 100);
        assert_eq!(xf.il3m.daddr, SERVER_IP);
        assert_eq!(xf.pm.l3_len as usize, data.len() - 14);

        xf.pop_outer_metadata(true);
        let olen = usize::from(xf.pm.tun_off);
        strip_vxlan(&mut ctx, &mut xf, olen).unwrap();
        assert_eq!(ctx.data(), &frame[..]);
        assert_eq!(xf.pm.l3_off, 14);
        assert_eq!(xf.pm.l4_off, 34);
    }

    #[test]
    fn test_gtp_encap_then_strip() {
        let frame = udp4_frame(0x0a0a0001, 0x08080808, 1000, 53);
        let (mut ctx, mut xf) = parsed(&frame);
        ins_gtp(&mut ctx, &mut xf, 0x0b000002, 0x0b000001, 0x77, 5).unwrap();
        assert_eq!(ctx.len(), frame.len() + 20 + 8 + 16);

        let data = ctx.data().to_vec();
        let (mut ctx, mut xf) = parsed(&data);
        assert!(!xf.is_dropped());
        assert_eq!(xf.tm.tun_type, TunType::Gtp);
        assert_eq!(xf.tm.tunnel_id, 0x77);
        assert_eq!(xf.qm.qfi, 5);
        assert_eq!(xf.il3m.daddr, 0x08080808);
        assert!(ipv4_csums_ok(&data, 14));

        xf.pop_outer_metadata(false);
        let olen = usize::from(xf.pm.tun_off);
        strip_gtp(&mut ctx, &mut xf, olen).unwrap();
        assert_eq!(&ctx.data()[14..], &frame[14..]);
        assert_eq!(ctx.read::<EthHdr>(0).unwrap().proto.get(), ETH_P_IP);
    }
}
