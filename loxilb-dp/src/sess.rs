//! Mobile user plane sessions, GTP tunnels terminated or originated per
//! user address pair

use crate::{maps::Dataplane, xfi::Xfi};
use log::debug;
use loxilb_common::{NatFlags, PipeHit, SessAct, SessKey, TableId, TunType};

fn sess4_key(xf: &Xfi) -> SessKey {
    if xf.tm.tunnel_id != 0 {
        return SessKey {
            daddr: xf.il3m.daddr,
            saddr: xf.il3m.saddr,
            teid: xf.tm.tunnel_id,
        };
    }

    let (daddr, saddr) = if xf.pm.nf == NatFlags::SRC {
        (xf.l3m.daddr, xf.l4m.nxip)
    } else if xf.pm.nf == NatFlags::DST {
        (xf.l4m.nxip, xf.l3m.saddr)
    } else {
        (xf.l3m.daddr, xf.l3m.saddr)
    };
    SessKey {
        daddr,
        saddr,
        teid: 0,
    }
}

pub fn sess4_lkup(dp: &Dataplane, xf: &mut Xfi) {
    let key = sess4_key(xf);
    xf.pm.table_id = TableId::Sess4;

    let Some(sa) = dp.sess4.lookup(&key) else {
        return;
    };

    debug!("[sess] {:?} {:?}", key, sa.act);
    xf.pm.phit |= PipeHit::SESS;
    dp.do_map_stats(TableId::Sess4Stats, sa.ca.cidx, xf.pm.py_bytes);

    match sa.act {
        SessAct::Drop => xf.set_drop(),
        SessAct::RmGtp { qfi } => {
            xf.pop_outer_metadata(false);
            xf.tm.tun_type = TunType::Gtp;
            xf.qm.qfi = qfi;
        }
        SessAct::AddGtp(g) => {
            xf.tm.new_tunnel_id = g.teid;
            xf.tm.tun_type = TunType::Gtp;
            xf.qm.qfi = g.qfi;
            xf.tm.tun_rip = g.rip;
            xf.tm.tun_sip = g.sip;
        }
    }
}
