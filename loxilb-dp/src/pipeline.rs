//! Packet entry point. A packet is parsed, looked up in the flow cache and
//! on a miss goes through the slow path stages, the connection tracking
//! stage included when the ACL asks for it.

use crate::{
    ct::{ctv4_in, CtSmr},
    ctx::PktCtx,
    devif::{check_res, ing, mirr_lkup, redir, rewire},
    fc::{fcv4_insert, fcv4_key, fcv4_lkup},
    hdr::ETH_P_IP,
    l2fwd::{eg_l2, ing_l2},
    l3fwd::{ipv4_fwd, Next},
    maps::Dataplane,
    nat::nat4_rule_lkup,
    parser::parse_packet,
    xfi::Xfi,
};
use libc::{clock_gettime, timespec, CLOCK_MONOTONIC};
use log::debug;
use loxilb_common::{stats, CtSts, FcActs, FcKey, PipeAct, PipeHit, TableId};
use std::cell::RefCell;

thread_local! {
    /// Actions collected by the slow path for the flow cache
    static FCAS: RefCell<FcActs> = RefCell::new(FcActs::default());
}

/// What to do with a processed packet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Drop,
    /// Hand over to the host stack
    Pass,
    /// Send out of the interface after the egress rewrites
    Redirect(u32),
    /// Send out of the interface as is
    Rewire(u32),
}

enum Stage {
    Slow,
    Ct,
    Done(Verdict),
}

/// Monotonic clock in nanoseconds
pub fn ktime_get_ns() -> u64 {
    let mut tp = timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    if 0 != unsafe { clock_gettime(CLOCK_MONOTONIC, &mut tp) } {
        return 0;
    }
    (tp.tv_sec as u64) * 1_000_000_000 + tp.tv_nsec as u64
}

fn slow_main(
    dp: &Dataplane,
    ctx: &mut PktCtx,
    xf: &mut Xfi,
    fa: &mut FcActs,
    key: &FcKey,
    now: u64,
) -> Stage {
    fa.reset(now);

    // Mirrored copies only need their egress
    if xf.pm.mirr != 0 {
        mirr_lkup(dp, xf);
        return Stage::Done(check_res(dp, ctx, xf));
    }

    ing(dp, ctx, xf, now);
    if !xf.pm.pipe_act.is_empty() {
        return Stage::Done(check_res(dp, ctx, xf));
    }

    if ing_l2(dp, ctx, xf, fa, now) == Next::Ct {
        return Stage::Ct;
    }

    fcv4_insert(dp, xf, key, fa);
    Stage::Done(check_res(dp, ctx, xf))
}

fn ct_main(dp: &Dataplane, ctx: &mut PktCtx, xf: &mut Xfi, fa: &mut FcActs, now: u64) -> Verdict {
    if xf.is_dropped() {
        return check_res(dp, ctx, xf);
    }

    // An ACL hit sending the packet here only asks for tracking
    if !xf.pm.phit.contains(PipeHit::ACL) {
        nat4_rule_lkup(dp, xf);
        if xf.pm.pipe_act.intersects(PipeAct::DROP | PipeAct::TRAP) {
            return check_res(dp, ctx, xf);
        }
    }

    if ctv4_in(dp, ctx, xf, now) == CtSmr::Err {
        return if xf.is_dropped() {
            Verdict::Drop
        } else {
            Verdict::Pass
        };
    }
    xf.l4m.ct_sts = CtSts::InProgress;

    if xf.l2m.dl_type == ETH_P_IP {
        ipv4_fwd(dp, ctx, xf, fa);
    }
    eg_l2(dp, xf, fa);
    check_res(dp, ctx, xf)
}

fn pkt_main(dp: &Dataplane, ctx: &mut PktCtx, now: u64) -> Verdict {
    let mut xf = Xfi::default();
    parse_packet(ctx, &mut xf);

    let act = xf.pm.pipe_act;
    if act.contains(PipeAct::REWIRE) {
        return rewire(dp, &xf);
    }
    if act.contains(PipeAct::RDR) {
        return redir(dp, &xf);
    }
    if act.intersects(PipeAct::PASS | PipeAct::TRAP) {
        return Verdict::Pass;
    }
    if act.contains(PipeAct::DROP) {
        dp.stats_inc(stats::PARSER_DROPS);
        return Verdict::Drop;
    }

    let key = fcv4_key(&xf);
    match fcv4_lkup(dp, ctx, &mut xf, &key, now) {
        Ok(Some(oif)) => {
            dp.stats_inc(stats::FC_HITS);
            dp.do_map_stats(TableId::TxIntfStats, u32::from(xf.pm.oport), xf.pm.py_bytes);
            return Verdict::Redirect(oif);
        }
        Ok(None) => dp.stats_inc(stats::FC_MISSES),
        Err(e) => {
            debug!("[fch4] deparse {}", e);
            dp.stats_inc(stats::DEPARSE_ERRORS);
            return Verdict::Drop;
        }
    }

    // The cache lookup may have left partial metadata behind
    let mut xf = Xfi::default();
    parse_packet(ctx, &mut xf);

    FCAS.with(|fa| {
        let fa = &mut *fa.borrow_mut();
        let mut stage = Stage::Slow;
        loop {
            stage = match stage {
                Stage::Slow => slow_main(dp, ctx, &mut xf, fa, &key, now),
                Stage::Ct => Stage::Done(ct_main(dp, ctx, &mut xf, fa, now)),
                Stage::Done(v) => return v,
            };
        }
    })
}

/// Runs the packet through the pipeline at time `now` (ns) and returns
/// its verdict. A mirrored copy to send is left in `ctx.mirr_clone`.
pub fn process_at(dp: &Dataplane, ctx: &mut PktCtx, now: u64) -> Verdict {
    dp.stats_inc(stats::PACKETS);

    let v = pkt_main(dp, ctx, now);
    let ctr = match v {
        Verdict::Drop => stats::DROPS,
        Verdict::Pass => stats::PASSES,
        Verdict::Redirect(_) => stats::REDIRECTS,
        Verdict::Rewire(_) => stats::REWIRES,
    };
    dp.stats_inc(ctr);
    v
}

pub fn process(dp: &Dataplane, ctx: &mut PktCtx) -> Verdict {
    process_at(dp, ctx, ktime_get_ns())
}
