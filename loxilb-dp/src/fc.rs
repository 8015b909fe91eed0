//! Flow cache: replays the actions resolved by the slow path for the
//! established flows of a redirect only pipeline.

use crate::{
    ctx::{PktCtx, PktError},
    deparse::{unparse, unparse_always},
    l2fwd::{rt_l2_nh, rt_l2_vxlan_nh, set_egr_vlan, set_l22_tun_nh, set_rm_vx_tun},
    l3fwd::{set_l32_tun_nh, set_nat},
    maps::Dataplane,
    tables::{lock, UPDATE_NOEXIST},
    xfi::Xfi,
};
use log::debug;
use loxilb_common::{
    stats, ActType, FcAct, FcActs, FcKey, PipeAct, PipeHit, TableId, FC_V4_DPTO,
};

pub fn fcv4_key(xf: &Xfi) -> FcKey {
    FcKey {
        smac: xf.l2m.dl_src,
        dmac: xf.l2m.dl_dst,
        in_smac: xf.il2m.dl_src,
        in_dmac: xf.il2m.dl_dst,
        daddr: xf.l3m.daddr,
        saddr: xf.l3m.saddr,
        sport: xf.l3m.source,
        dport: xf.l3m.dest,
        l4proto: xf.l3m.nw_proto,
        // Cached flows are shared by all ports and domains
        in_port: 0,
        bd: 0,
        in_daddr: xf.il3m.daddr,
        in_saddr: xf.il3m.saddr,
        in_sport: xf.il3m.source,
        in_dport: xf.il3m.dest,
        in_l4proto: xf.il3m.nw_proto,
    }
}

/// Replays the cached actions on the metadata. Returns false if the
/// entry has no egress action.
fn replay(xf: &mut Xfi, acts: &FcActs) -> bool {
    if let Some(FcAct::RmVxlan(rnh)) = acts.get(ActType::RmVxlan) {
        set_rm_vx_tun(xf, rnh);
    }

    if let Some(FcAct::Snat(na)) = acts.get(ActType::Snat) {
        set_nat(xf, na, true);
    } else if let Some(FcAct::Dnat(na)) = acts.get(ActType::Dnat) {
        set_nat(xf, na, false);
    }

    if let Some(FcAct::RtTunNh(rnh)) = acts.get(ActType::RtTunNh) {
        set_l22_tun_nh(xf, rnh);
    } else if let Some(FcAct::L3RtTunNh(rnh)) = acts.get(ActType::L3RtTunNh) {
        set_l32_tun_nh(xf, rnh);
    }

    if let Some(FcAct::NeighL2(nl2)) = acts.get(ActType::NeighL2) {
        rt_l2_nh(xf, nl2);
    } else if let Some(FcAct::NeighVxlan(nvx)) = acts.get(ActType::NeighVxlan) {
        rt_l2_vxlan_nh(xf, nvx);
    }

    match (acts.get(ActType::AddL2Vlan), acts.get(ActType::RmL2Vlan)) {
        (Some(FcAct::AddL2Vlan(va)), _) => set_egr_vlan(xf, va.vlan, va.oport),
        (_, Some(FcAct::RmL2Vlan(va))) => set_egr_vlan(xf, 0, va.oport),
        _ => return false,
    }
    true
}

/// Looks up the flow of the packet and, on a hit, deparses the packet
/// with the cached actions. Returns the egress interface of a hit.
///
/// A miss can leave the metadata partially updated so the packet must be
/// parsed again before it goes through the slow path.
pub fn fcv4_lkup(
    dp: &Dataplane,
    ctx: &mut PktCtx,
    xf: &mut Xfi,
    key: &FcKey,
    now: u64,
) -> Result<Option<u32>, PktError> {
    xf.pm.table_id = TableId::Fcv4;

    let Some(entry) = dp.fcv4.get(key) else {
        return Ok(None);
    };
    let acts = *lock(&entry);

    if acts.its != 0 && now.saturating_sub(acts.its) > FC_V4_DPTO {
        debug!("[fch4] {:?} expired", key);
        let _ = dp.fcv4.remove(key);
        return Ok(None);
    }

    if acts.ca.ftrap {
        return Ok(None);
    }

    if !replay(xf, &acts) {
        let _ = dp.fcv4.remove(key);
        return Ok(None);
    }

    // Finishing flows go through connection tracking from now on
    if xf.pm.l4fin {
        lock(&entry).ca.ftrap = true;
        return Ok(None);
    }

    xf.pm.phit |= PipeHit::FC;
    debug!("[fch4] hit oif {}", acts.ca.oif);
    unparse_always(ctx, xf)?;
    unparse(ctx, xf)?;

    dp.do_map_stats(TableId::Aclv4Stats, acts.ca.cidx, xf.pm.py_bytes);
    Ok(Some(acts.ca.oif))
}

/// Caches the actions collected by the slow path when the packet is a
/// plain redirect of an ACL hit not owned by a session, not policed and
/// not mirrored
pub fn fcv4_insert(dp: &Dataplane, xf: &Xfi, key: &FcKey, fa: &mut FcActs) {
    if xf.pm.pipe_act != PipeAct::RDR
        || !xf.pm.phit.contains(PipeHit::ACL)
        || xf.pm.phit.contains(PipeHit::SESS)
        || xf.qm.polid != 0
        || xf.pm.mirr != 0
    {
        return;
    }

    let Some(oif) = dp.tx_intf.lookup(&u32::from(xf.pm.oport)) else {
        return;
    };
    fa.ca.oif = oif;

    match dp.fcv4.insert(*key, *fa, UPDATE_NOEXIST) {
        Ok(()) => {
            debug!("[fch4] {:?} cached, oif {}", key, oif);
            dp.stats_inc(stats::FC_INSERTS);
        }
        Err(e) => debug!("[fch4] {}", e),
    }
}
