//! MAC level forwarding: source admission, the tunnel termination MACs,
//! next hop resolution and the egress bridge domain lookup.

use crate::{
    ctx::PktCtx,
    hdr::ETH_P_IP,
    l3fwd::{self, Next},
    maps::Dataplane,
    xfi::Xfi,
};
use log::debug;
use loxilb_common::{
    DmacAct, DmacKey, FcAct, FcActs, NhAct, PipeHit, RtL2NhAct, RtL2VxNhAct, RtNhAct, SmacAct,
    SmacKey, TableId, TmacAct, TmacKey, TunType,
};

fn smac_lkup(dp: &Dataplane, xf: &mut Xfi) {
    // Only tagged traffic is admitted by source
    if xf.l2m.vlan[0] == 0 {
        return;
    }

    let key = SmacKey {
        smac: xf.l2m.dl_src,
        bd: xf.pm.bd,
    };
    xf.pm.table_id = TableId::Smac;

    let Some(sma) = dp.smac.lookup(&key) else {
        debug!("[smac] {:02x?} bd {} miss", key.smac, key.bd);
        xf.set_pass();
        return;
    };

    match sma.act {
        SmacAct::Drop => xf.set_drop(),
        SmacAct::ToCp => xf.set_trap(),
        SmacAct::Nop => {}
    }
}

/// Next hop of a terminated tunnel, the egress BD is only known after the
/// next hop lookup
pub(crate) fn set_l22_tun_nh(xf: &mut Xfi, rnh: &RtNhAct) {
    xf.pm.nh_num = rnh.nh_num;
    xf.tm.new_tunnel_id = rnh.tid;
    debug!("[tmac] new-vx nh {}", xf.pm.nh_num);
}

pub(crate) fn set_rm_vx_tun(xf: &mut Xfi, rnh: &RtNhAct) {
    xf.pm.phit.remove(PipeHit::TMAC);
    xf.pm.bd = rnh.bd;
    debug!("[tmac] rm-vx newbd {}", xf.pm.bd);
    xf.pop_outer_metadata(true);
}

fn tmac_lkup_with(dp: &Dataplane, xf: &mut Xfi, fa: &mut FcActs, tun_lkup: bool) {
    let key = TmacKey {
        mac: xf.l2m.dl_dst,
        tun_type: if tun_lkup {
            xf.tm.tun_type
        } else {
            TunType::None
        },
        tunnel_id: if tun_lkup { xf.tm.tunnel_id } else { 0 },
    };
    xf.pm.table_id = TableId::Tmac;

    // No L3 lookup on a miss
    let Some(tma) = dp.tmac.lookup(&key) else {
        return;
    };

    debug!("[tmac] {:02x?} {:?} cidx {}", key.mac, tma.act, tma.ca.cidx);
    if tma.ca.cidx != 0 {
        dp.do_map_stats(TableId::TmacStats, tma.ca.cidx, xf.pm.py_bytes);
    }

    match tma.act {
        TmacAct::Drop => xf.set_drop(),
        TmacAct::ToCp => xf.set_trap(),
        TmacAct::RtTunNh(rnh) => {
            fa.set(FcAct::RtTunNh(rnh));
            set_l22_tun_nh(xf, &rnh);
        }
        TmacAct::L3En => xf.pm.phit |= PipeHit::TMAC,
        TmacAct::RmVxlan(rnh) => {
            fa.set(FcAct::RmVxlan(rnh));
            set_rm_vx_tun(xf, &rnh);
        }
    }
}

fn tmac_lkup(dp: &Dataplane, xf: &mut Xfi, fa: &mut FcActs) {
    tmac_lkup_with(dp, xf, fa, false)
}

fn tun_lkup(dp: &Dataplane, xf: &mut Xfi, fa: &mut FcActs) {
    if xf.tm.tunnel_id != 0 {
        tmac_lkup_with(dp, xf, fa, true)
    }
}

pub(crate) fn set_egr_vlan(xf: &mut Xfi, vlan: u16, oport: u16) {
    xf.set_rdr();
    xf.pm.oport = oport;
    xf.pm.bd = vlan;
}

fn dmac_lkup(dp: &Dataplane, xf: &mut Xfi, fa: &mut FcActs) {
    let key = DmacKey {
        dmac: xf.pm.lkup_dmac,
        bd: xf.pm.bd,
    };
    xf.pm.table_id = TableId::Dmac;

    let Some(dma) = dp.dmac.lookup(&key) else {
        debug!("[dmac] {:02x?} bd {} miss", key.dmac, key.bd);
        xf.set_pass();
        return;
    };

    match dma.act {
        DmacAct::Drop => xf.set_drop(),
        DmacAct::ToCp => xf.set_trap(),
        DmacAct::RdrPort(ra) => {
            xf.set_rdr();
            xf.pm.oport = ra.oport;
        }
        DmacAct::AddL2Vlan(va) => {
            fa.set(FcAct::AddL2Vlan(va));
            set_egr_vlan(xf, va.vlan, va.oport);
        }
        DmacAct::RmL2Vlan(va) => {
            fa.set(FcAct::RmL2Vlan(va));
            set_egr_vlan(xf, 0, va.oport);
        }
    }
}

/// Applies the L2 rewrite of a neighbor and returns the next hop to
/// resolve after it, 0 for none
pub(crate) fn rt_l2_nh(xf: &mut Xfi, nl2: &RtL2NhAct) -> u16 {
    xf.l2m.dl_dst = nl2.dmac;
    xf.l2m.dl_src = nl2.smac;
    xf.pm.lkup_dmac = nl2.dmac;
    xf.pm.bd = nl2.bd;
    nl2.rnh_num
}

/// The current MAC header moves inside the tunnel and the neighbor
/// rewrite applies to the outer one
pub(crate) fn rt_l2_vxlan_nh(xf: &mut Xfi, nvx: &RtL2VxNhAct) {
    xf.tm.tun_rip = nvx.l3t.rip;
    xf.tm.tun_sip = nvx.l3t.sip;
    xf.tm.new_tunnel_id = nvx.l3t.tid;
    xf.tm.tun_type = TunType::Vxlan;

    xf.il2m = xf.l2m;
    xf.il2m.vlan[0] = 0;

    rt_l2_nh(xf, &nvx.l2nh);
}

fn nh_lkup(dp: &Dataplane, xf: &mut Xfi, fa: &mut FcActs) {
    let nh_num = u32::from(xf.pm.nh_num);
    xf.pm.table_id = TableId::Nh;

    let Some(mut nha) = dp.nh.lookup(&nh_num) else {
        debug!("[nhfw] {} miss", nh_num);
        xf.set_trap();
        return;
    };

    match nha.act {
        NhAct::Drop => xf.set_drop(),
        NhAct::ToCp => xf.set_trap(),
        NhAct::NeighL2(nl2) => {
            fa.set(FcAct::NeighL2(nl2));
            let rnh = rt_l2_nh(xf, &nl2);
            // One level of recursion, the resolved neighbor can only be
            // a tunnel one
            if rnh != 0 {
                match dp.nh.lookup(&u32::from(rnh)) {
                    Some(r) => nha = r,
                    None => {
                        debug!("[nhfw] recursive {} miss", rnh);
                        xf.set_trap();
                        return;
                    }
                }
            }
        }
        NhAct::NeighVxlan(_) => {}
    }

    if let NhAct::NeighVxlan(nvx) = nha.act {
        fa.set(FcAct::NeighVxlan(nvx));
        rt_l2_vxlan_nh(xf, &nvx);
    }
}

/// Egress L2 resolution of the packets not redirected yet
pub fn eg_l2(dp: &Dataplane, xf: &mut Xfi, fa: &mut FcActs) {
    if xf.has_rdr() {
        return;
    }

    if xf.pm.nh_num != 0 {
        nh_lkup(dp, xf, fa);
    }

    dp.do_map_stats(TableId::TxBdStats, u32::from(xf.pm.bd), xf.pm.py_bytes);
    dmac_lkup(dp, xf, fa);
}

pub fn ing_fwd(dp: &Dataplane, ctx: &mut PktCtx, xf: &mut Xfi, fa: &mut FcActs, now: u64) -> Next {
    if xf.l2m.dl_type == ETH_P_IP && l3fwd::ing_ipv4(dp, ctx, xf, fa, now) == Next::Ct {
        return Next::Ct;
    }
    eg_l2(dp, xf, fa);
    Next::Done
}

/// Runs the ingress MAC lookups, twice when a tunnel was terminated so the
/// inner MAC header gets the same treatment
pub fn ing_l2_top(dp: &Dataplane, xf: &mut Xfi, fa: &mut FcActs) {
    smac_lkup(dp, xf);
    tmac_lkup(dp, xf, fa);
    tun_lkup(dp, xf, fa);

    if xf.tm.tun_decap {
        smac_lkup(dp, xf);
        tmac_lkup(dp, xf, fa);
    }
}

pub fn ing_l2(dp: &Dataplane, ctx: &mut PktCtx, xf: &mut Xfi, fa: &mut FcActs, now: u64) -> Next {
    debug!("[ing] l2");
    ing_l2_top(dp, xf, fa);
    if xf.is_dropped() {
        return Next::Done;
    }
    ing_fwd(dp, ctx, xf, fa, now)
}
