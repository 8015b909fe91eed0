//! IPv4 stage: the ACL and connection tracking gate, sessions and routing

use crate::{
    csum::ip_decrease_ttl,
    ct::AclAct,
    ctx::PktCtx,
    hdr::Ipv4Hdr,
    maps::{rtv4_key, Dataplane},
    sess,
    tables::lock,
    xfi::Xfi,
};
use log::debug;
use loxilb_common::{
    CtKey, FcAct, FcActs, NatAct, NatFlags, PipeHit, PipeRc, RtAct, RtNhAct, TableId, TunType,
};

/// What follows a forwarding stage
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Next {
    Done,
    /// The packet continues in the connection tracking stage
    Ct,
}

/// Records the translation to apply once the packet is deparsed
pub(crate) fn set_nat(xf: &mut Xfi, na: &NatAct, snat: bool) {
    xf.pm.nf = if snat { NatFlags::SRC } else { NatFlags::DST };
    xf.l4m.nxip = na.xip;
    xf.l4m.nxport = na.xport;
    debug!(
        "[nat] {} xip {:#x} xport {}",
        if snat { "snat" } else { "dnat" },
        na.xip,
        na.xport
    );
}

/// Applies a NAT action hit and returns true if the packet still needs
/// connection tracking
fn acl_nat_hit(dp: &Dataplane, xf: &mut Xfi, fa: &mut FcActs, na: &mut NatAct, snat: bool) -> bool {
    fa.set(if snat { FcAct::Snat(*na) } else { FcAct::Dnat(*na) });
    if xf.pm.l4fin {
        na.fr = true;
    }
    set_nat(xf, na, snat);
    dp.do_map_stats(TableId::Nat4Stats, na.rid, xf.pm.py_bytes);
    na.fr || na.doct
}

fn aclv4_lkup(dp: &Dataplane, xf: &mut Xfi, fa: &mut FcActs, now: u64) -> Next {
    let key = CtKey {
        daddr: xf.l3m.daddr,
        saddr: xf.l3m.saddr,
        sport: xf.l3m.source,
        dport: xf.l3m.dest,
        l4proto: xf.l3m.nw_proto,
        zone: xf.pm.zone,
    };
    xf.pm.table_id = TableId::Aclv4;

    let Some(entry) = dp.aclv4.get(&key) else {
        debug!("[acl4] {:?} miss", key);
        return Next::Ct;
    };

    let mut ent = lock(&entry);
    xf.pm.phit |= PipeHit::ACL;
    ent.lts = now;
    fa.ca.cidx = ent.ca.cidx;
    let cidx = ent.ca.cidx;
    let l4fin = xf.pm.l4fin;

    debug!("[acl4] {:?} hit {:?}", key, ent.act);
    let to_ct = match &mut ent.act {
        AclAct::DoCt => true,
        AclAct::Nop(ar) => {
            ar.fr |= l4fin;
            ar.fr
        }
        AclAct::RdrPort(ar) => {
            ar.fr |= l4fin;
            if !ar.fr {
                xf.set_rdr_prio();
                xf.pm.oport = ar.oport;
            }
            ar.fr
        }
        AclAct::Snat(na) => acl_nat_hit(dp, xf, fa, na, true),
        AclAct::Dnat(na) => acl_nat_hit(dp, xf, fa, na, false),
        AclAct::ToCp => {
            xf.set_trapc(PipeRc::ACL_MISS);
            false
        }
        AclAct::SessFwd(sa) => {
            xf.pm.sess_id = sa.sess_id;
            false
        }
        AclAct::Drop => {
            xf.set_drop();
            false
        }
    };
    drop(ent);

    if to_ct {
        return Next::Ct;
    }
    dp.do_map_stats(TableId::Aclv4Stats, cidx, xf.pm.py_bytes);
    Next::Done
}

/// Routes into a tunnel, the egress BD comes from the tunnel next hop
/// once it is resolved
pub(crate) fn set_l32_tun_nh(xf: &mut Xfi, rnh: &RtNhAct) {
    xf.pm.nh_num = rnh.nh_num;
    xf.tm.new_tunnel_id = rnh.tid;
    xf.l2m.dl_dst = rnh.l2nh.dmac;
    xf.l2m.dl_src = rnh.l2nh.smac;
    xf.pm.lkup_dmac = rnh.l2nh.dmac;
    xf.pm.bd = rnh.l2nh.bd;
    debug!("[rtv4] tun nh {}", xf.pm.nh_num);
}

fn rtv4_fwd(ctx: &mut PktCtx, xf: &mut Xfi) {
    match ctx.hdr_mut::<Ipv4Hdr>(usize::from(xf.pm.l3_off)) {
        Ok(iph) => ip_decrease_ttl(iph),
        Err(e) => {
            debug!("[rtv4] ttl {}", e);
            xf.set_drop();
        }
    }
}

fn rtv4_addr(xf: &Xfi) -> u32 {
    if xf.pm.nf.contains(NatFlags::DST) {
        if xf.l4m.nxip != 0 {
            xf.l4m.nxip
        } else {
            xf.l3m.saddr
        }
    } else if xf.pm.nf.contains(NatFlags::SRC) && xf.l4m.nxip == 0 {
        xf.l3m.saddr
    } else if xf.tm.new_tunnel_id != 0 && xf.tm.tun_type == TunType::Gtp {
        // GTP end-points have no host interface, route to the remote one
        xf.tm.tun_rip
    } else {
        xf.l3m.daddr
    }
}

fn rtv4_lkup(dp: &Dataplane, ctx: &mut PktCtx, xf: &mut Xfi, fa: &mut FcActs) {
    let addr = rtv4_addr(xf);
    xf.pm.table_id = TableId::Rtv4;

    let Some(rta) = dp.rtv4.lookup(rtv4_key(xf.pm.zone, addr)) else {
        debug!("[rtv4] zone {} {:#x} miss", xf.pm.zone, addr);
        xf.pm.nf.remove(NatFlags::SRC);
        return;
    };

    xf.pm.phit |= PipeHit::RT;
    dp.do_map_stats(TableId::Rtv4Stats, rta.ca.cidx, xf.pm.py_bytes);

    debug!("[rtv4] zone {} {:#x} {:?}", xf.pm.zone, addr, rta.act);
    match rta.act {
        RtAct::Drop => xf.set_drop(),
        RtAct::ToCp => xf.set_trap(),
        RtAct::RdrPort(ra) => {
            xf.set_rdr();
            xf.pm.oport = ra.oport;
        }
        RtAct::RtNhNum(nh_num) => {
            xf.pm.nh_num = nh_num;
            rtv4_fwd(ctx, xf);
        }
        RtAct::L3RtTunNh(rnh) => {
            fa.set(FcAct::L3RtTunNh(rnh));
            set_l32_tun_nh(xf, &rnh);
        }
    }
}

/// Session and route lookups of an IPv4 packet
pub fn ipv4_fwd(dp: &Dataplane, ctx: &mut PktCtx, xf: &mut Xfi, fa: &mut FcActs) {
    if xf.tm.tunnel_id == 0 || xf.tm.tun_type != TunType::Gtp {
        sess::sess4_lkup(dp, xf);
    }

    if xf.pm.phit.contains(PipeHit::TMAC) && !xf.has_rdr() {
        rtv4_lkup(dp, ctx, xf, fa);
    }
}

pub fn ing_ipv4(dp: &Dataplane, ctx: &mut PktCtx, xf: &mut Xfi, fa: &mut FcActs, now: u64) -> Next {
    if xf.tm.tunnel_id != 0 && xf.tm.tun_type == TunType::Gtp {
        sess::sess4_lkup(dp, xf);
        if xf.is_dropped() {
            return Next::Done;
        }
    }

    if aclv4_lkup(dp, xf, fa, now) == Next::Ct {
        return Next::Ct;
    }
    ipv4_fwd(dp, ctx, xf, fa);
    Next::Done
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        csum::ipv4_csum_ok,
        hdr::IPPROTO_TCP,
        maps::MapEntry,
        parser::parse_packet,
        testutil::*,
    };
    use loxilb_common::{PipeAct, RdrAct, Tact};

    fn parsed(frame: &[u8]) -> (PktCtx, Xfi) {
        let mut ctx = PktCtx::new(2, frame);
        let mut xf = Xfi::default();
        parse_packet(&mut ctx, &mut xf);
        (ctx, xf)
    }

    fn acl_key(sport: u16) -> CtKey {
        CtKey {
            daddr: VIP,
            saddr: CLIENT_IP,
            sport,
            dport: 80,
            l4proto: IPPROTO_TCP,
            zone: 0,
        }
    }

    #[test]
    fn test_acl_miss_goes_to_ct() {
        let dp = Dataplane::new();
        let (mut ctx, mut xf) = parsed(&tcp4_frame(CLIENT_IP, VIP, 40000, 80, 0x02, 1, 0));
        let mut fa = FcActs::default();
        assert_eq!(ing_ipv4(&dp, &mut ctx, &mut xf, &mut fa, 5), Next::Ct);
        assert!(!xf.pm.phit.contains(PipeHit::ACL));
    }

    #[test]
    fn test_acl_dnat_established() {
        let dp = Dataplane::new();
        let na = NatAct {
            xip: SERVER_IP,
            xport: 8080,
            rid: 3,
            ..Default::default()
        };
        dp.add(MapEntry::acl(acl_key(40000), AclAct::Dnat(na), 10))
            .unwrap();

        let (mut ctx, mut xf) = parsed(&tcp4_frame(CLIENT_IP, VIP, 40000, 80, 0x10, 1, 1));
        let mut fa = FcActs::default();
        assert_eq!(ing_ipv4(&dp, &mut ctx, &mut xf, &mut fa, 5), Next::Done);

        assert_eq!(xf.pm.nf, NatFlags::DST);
        assert_eq!((xf.l4m.nxip, xf.l4m.nxport), (SERVER_IP, 8080));
        assert_eq!(fa.ca.cidx, 10);
        assert!(matches!(fa.get(loxilb_common::ActType::Dnat), Some(FcAct::Dnat(_))));
        assert_eq!(dp.aclv4_stats.get(10).map(|s| s.packets), Some(1));
        assert_eq!(dp.nat4_stats.get(3).map(|s| s.packets), Some(1));

        let ent = dp.aclv4.lookup(&acl_key(40000)).unwrap();
        assert_eq!(ent.lts, 5);
    }

    #[test]
    fn test_acl_fin_marks_entry() {
        let dp = Dataplane::new();
        dp.add(MapEntry::acl(
            acl_key(40001),
            AclAct::RdrPort(RdrAct { oport: 4, fr: false }),
            12,
        ))
        .unwrap();

        let (mut ctx, mut xf) = parsed(&tcp4_frame(CLIENT_IP, VIP, 40001, 80, 0x10, 1, 1));
        assert_eq!(
            ing_ipv4(&dp, &mut ctx, &mut xf, &mut FcActs::default(), 1),
            Next::Done
        );
        assert!(xf.pm.pipe_act.contains(PipeAct::RDR_PRIO));
        assert_eq!(xf.pm.oport, 4);

        // FIN goes back to tracking and the entry keeps the mark
        let (mut ctx, mut xf) = parsed(&tcp4_frame(CLIENT_IP, VIP, 40001, 80, 0x11, 2, 1));
        assert_eq!(
            ing_ipv4(&dp, &mut ctx, &mut xf, &mut FcActs::default(), 2),
            Next::Ct
        );
        let (mut ctx, mut xf) = parsed(&tcp4_frame(CLIENT_IP, VIP, 40001, 80, 0x10, 3, 1));
        assert_eq!(
            ing_ipv4(&dp, &mut ctx, &mut xf, &mut FcActs::default(), 3),
            Next::Ct
        );
        assert_eq!(dp.aclv4_stats.get(12).map(|s| s.packets), Some(1));
    }

    #[test]
    fn test_acl_tocp_traps() {
        let dp = Dataplane::new();
        dp.add(MapEntry::acl(acl_key(40002), AclAct::ToCp, 0)).unwrap();
        let (mut ctx, mut xf) = parsed(&tcp4_frame(CLIENT_IP, VIP, 40002, 80, 0x10, 1, 1));
        ing_ipv4(&dp, &mut ctx, &mut xf, &mut FcActs::default(), 1);
        assert!(xf.pm.pipe_act.contains(PipeAct::TRAP));
        assert!(xf.pm.rcode.contains(PipeRc::ACL_MISS));
    }

    #[test]
    fn test_route_to_next_hop() {
        let dp = Dataplane::new();
        dp.add(MapEntry::Rtv4 {
            zone: 0,
            addr: 0x0a000100,
            plen: 24,
            act: Tact::with_cidx(RtAct::RtNhNum(7), 2),
        })
        .unwrap();

        let (mut ctx, mut xf) = parsed(&tcp4_frame(CLIENT_IP, VIP, 40000, 80, 0x10, 1, 1));
        xf.pm.phit |= PipeHit::TMAC;
        set_nat(
            &mut xf,
            &NatAct {
                xip: SERVER_IP,
                xport: 8080,
                ..Default::default()
            },
            false,
        );
        ipv4_fwd(&dp, &mut ctx, &mut xf, &mut FcActs::default());

        assert!(xf.pm.phit.contains(PipeHit::RT));
        assert_eq!(xf.pm.nh_num, 7);
        let l3 = usize::from(xf.pm.l3_off);
        let iph = ctx.hdr::<Ipv4Hdr>(l3).unwrap();
        assert_eq!(iph.ttl, 63);
        assert!(ipv4_csum_ok(iph));
        assert_eq!(dp.rtv4_stats.get(2).map(|s| s.packets), Some(1));
    }

    #[test]
    fn test_route_miss_clears_snat() {
        let dp = Dataplane::new();
        let (mut ctx, mut xf) = parsed(&tcp4_frame(CLIENT_IP, VIP, 40000, 80, 0x10, 1, 1));
        xf.pm.phit |= PipeHit::TMAC;
        xf.pm.nf = NatFlags::SRC;
        xf.l4m.nxip = 0x0b000001;
        ipv4_fwd(&dp, &mut ctx, &mut xf, &mut FcActs::default());
        assert!(xf.pm.nf.is_empty());
        assert!(!xf.pm.phit.contains(PipeHit::RT));
    }

    #[test]
    fn test_rtv4_addr_selection() {
        let mut xf = Xfi::default();
        xf.l3m.saddr = CLIENT_IP;
        xf.l3m.daddr = VIP;
        assert_eq!(rtv4_addr(&xf), VIP);

        xf.pm.nf = NatFlags::DST;
        assert_eq!(rtv4_addr(&xf), CLIENT_IP);
        xf.l4m.nxip = SERVER_IP;
        assert_eq!(rtv4_addr(&xf), SERVER_IP);

        xf.pm.nf = NatFlags::empty();
        xf.tm.new_tunnel_id = 5;
        xf.tm.tun_type = TunType::Gtp;
        xf.tm.tun_rip = 0x0c000001;
        assert_eq!(rtv4_addr(&xf), 0x0c000001);
    }
}
