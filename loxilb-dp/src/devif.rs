//! Port level processing: the ingress interface binding, mirroring, the
//! host trap and the final disposition of a packet.

use crate::{
    ctx::PktCtx,
    deparse::{unparse, unparse_always},
    hdr::{EthHdr, LlbShim, ETH_HLEN, ETH_TYPE_LLB},
    l2fwd::set_egr_vlan,
    maps::Dataplane,
    pipeline::Verdict,
    policer::do_policer,
    xfi::Xfi,
};
use log::debug;
use loxilb_common::{
    stats, IntfAct, IntfKey, MirrAct, PipeAct, PipeRc, TableId, PORT_NO,
};
use std::mem::size_of;
use zerocopy::network_endian::U16;

fn if_lkup(dp: &Dataplane, ctx: &PktCtx, xf: &mut Xfi) {
    let key = IntfKey {
        ifindex: ctx.ifindex,
        ing_vid: xf.l2m.vlan[0],
    };
    xf.pm.table_id = TableId::Intf;

    let Some(l2a) = dp.intf.lookup(&key) else {
        debug!("[intf] ifidx {} vid {} not found", key.ifindex, key.ing_vid);
        xf.set_pass();
        return;
    };

    match l2a.act {
        IntfAct::Drop => xf.set_drop(),
        IntfAct::ToCp => xf.set_trap(),
        IntfAct::SetIfi(ifi) => {
            xf.pm.iport = ifi.xdp_ifidx;
            xf.pm.zone = ifi.zone;
            xf.pm.bd = ifi.bd;
            xf.pm.mirr = ifi.mirr;
            xf.pm.pprop = ifi.pprop;
            xf.qm.polid = ifi.polid;
        }
    }
}

/// Ingress port binding, counters, mirroring and policing
pub fn ing(dp: &Dataplane, ctx: &mut PktCtx, xf: &mut Xfi, now: u64) {
    if_lkup(dp, ctx, xf);
    dp.do_map_stats(TableId::IntfStats, u32::from(xf.pm.iport), xf.pm.py_bytes);
    dp.do_map_stats(TableId::BdStats, u32::from(xf.pm.bd), xf.pm.py_bytes);

    if xf.pm.mirr != 0 {
        // The copy is looped back through the mirror port and comes in
        // again carrying the mirror id
        ctx.mirr_clone = dp.tx_intf.lookup(&u32::from(PORT_NO));
        debug!("[mirr] {} clone to {:?}", xf.pm.mirr, ctx.mirr_clone);
    }

    if xf.qm.polid != 0 {
        do_policer(dp, xf, now);
    }
}

/// Egress of a mirrored copy
pub fn mirr_lkup(dp: &Dataplane, xf: &mut Xfi) {
    let Some(ma) = dp.mirr.lookup(&u32::from(xf.pm.mirr)) else {
        xf.set_drop();
        return;
    };

    match ma.act {
        MirrAct::AddL2Vlan(va) => set_egr_vlan(xf, va.vlan, va.oport),
        MirrAct::RmL2Vlan(va) => set_egr_vlan(xf, 0, va.oport),
        MirrAct::Drop => xf.set_drop(),
    }
}

/// Hands the packet to the host with a shim header telling where it came
/// from and why
pub fn trap_packet(dp: &Dataplane, ctx: &mut PktCtx, xf: &mut Xfi) -> Verdict {
    let Ok(oeth) = ctx.read::<EthHdr>(0) else {
        return Verdict::Drop;
    };
    xf.l2m.dl_dst = oeth.dst;
    xf.l2m.dl_src = oeth.src;

    // Pushing the shim can fail on tunneled packets, the host still gets
    // the packet without it
    if ctx.add_room(ETH_HLEN, size_of::<LlbShim>()).is_err() {
        return Verdict::Pass;
    }

    let neth = EthHdr {
        proto: U16::new(ETH_TYPE_LLB),
        ..oeth
    };
    let mut rcode = xf.pm.rcode;
    if xf.tm.tun_decap {
        rcode |= PipeRc::TUN_DECAP;
    }
    let shim = LlbShim {
        iport: U16::new(xf.pm.iport),
        oport: U16::new(xf.pm.oport),
        miss_table: xf.pm.table_id as u8,
        rcode: rcode.bits(),
        next_eth_type: oeth.proto,
    };
    if ctx.write(0, &neth).is_err() || ctx.write(ETH_HLEN, &shim).is_err() {
        return Verdict::Drop;
    }

    debug!(
        "[trap] iport {} table {:?} rc {:?}",
        xf.pm.iport, xf.pm.table_id, rcode
    );
    xf.pm.oport = PORT_NO;
    dp.stats_inc(stats::TRAPS);
    redir(dp, xf)
}

/// Sends the packet out of the egress port
pub fn redir(dp: &Dataplane, xf: &Xfi) -> Verdict {
    let Some(oif) = dp.tx_intf.lookup(&u32::from(xf.pm.oport)) else {
        debug!("[redi] oport {} has no interface", xf.pm.oport);
        dp.stats_inc(stats::REDIRECT_ERRORS);
        return Verdict::Drop;
    };
    dp.do_map_stats(TableId::TxIntfStats, u32::from(xf.pm.oport), xf.pm.py_bytes);
    Verdict::Redirect(oif)
}

pub fn rewire(dp: &Dataplane, xf: &Xfi) -> Verdict {
    let Some(oif) = dp.tx_intf.lookup(&u32::from(xf.pm.oport)) else {
        debug!("[rewr] oport {} has no interface", xf.pm.oport);
        dp.stats_inc(stats::REDIRECT_ERRORS);
        return Verdict::Drop;
    };
    Verdict::Rewire(oif)
}

/// Turns the accumulated pipeline actions into the packet verdict,
/// rewriting the packet on the way out
pub fn check_res(dp: &Dataplane, ctx: &mut PktCtx, xf: &mut Xfi) -> Verdict {
    let act = xf.pm.pipe_act;
    debug!("[pipe] act {:?}", act);

    if act.is_empty() {
        return Verdict::Pass;
    }
    if act.contains(PipeAct::DROP) {
        return Verdict::Drop;
    }

    if let Err(e) = unparse_always(ctx, xf) {
        debug!("[pipe] deparse {}", e);
        dp.stats_inc(stats::DEPARSE_ERRORS);
        return Verdict::Drop;
    }

    if act.contains(PipeAct::TRAP) {
        return trap_packet(dp, ctx, xf);
    }
    if act.contains(PipeAct::PASS) {
        return Verdict::Pass;
    }

    if act.intersects(PipeAct::RDR_MASK) {
        if let Err(e) = unparse(ctx, xf) {
            debug!("[pipe] deparse {}", e);
            dp.stats_inc(stats::DEPARSE_ERRORS);
            return Verdict::Drop;
        }
        return redir(dp, xf);
    }

    Verdict::Pass
}
