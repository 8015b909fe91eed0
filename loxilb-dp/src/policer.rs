//! Two rate three color marker applied to the ingress traffic of the
//! interfaces bound to a policer.

use crate::{maps::Dataplane, tables::lock, xfi::Xfi};
use log::debug;
use loxilb_common::{Color, PolicerCfg};

const NSECS_IN_USEC: u64 = 1000;

/// A policer table value, the configuration with its token buckets
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PolAct {
    pub cfg: PolicerCfg,
    pub tok_c: u64,
    pub tok_e: u64,
    /// Last refill of the committed bucket (ns)
    pub lastc_ts: u64,
    /// Last refill of the excess bucket (ns)
    pub laste_ts: u64,
    pub drop_packets: u64,
    pub pass_packets: u64,
}

impl PolAct {
    /// A policer with full buckets
    pub fn new(cfg: PolicerCfg, now: u64) -> Self {
        Self {
            cfg,
            tok_c: u64::from(cfg.cbs),
            tok_e: u64::from(cfg.ebs),
            lastc_ts: now,
            laste_ts: now,
            ..Default::default()
        }
    }

    fn refill(tok: &mut u64, last: &mut u64, cap: u32, toks_pus: u64, now: u64) {
        let elapsed = now.saturating_sub(*last) / NSECS_IN_USEC;
        let acc = toks_pus.saturating_mul(elapsed);
        // The timestamp only moves when tokens were credited so slow rates
        // still accumulate over several packets
        if acc == 0 {
            return;
        }
        *last = now;
        let cap = u64::from(cap);
        if cap > *tok {
            *tok += acc.min(cap - *tok);
        }
    }

    /// Colors a packet of `inbytes` bytes with input color `icol`.
    /// Returns the output color and whether the packet must be dropped.
    pub fn color(&mut self, inbytes: u64, icol: Color, now: u64) -> (Color, bool) {
        Self::refill(
            &mut self.tok_c,
            &mut self.lastc_ts,
            self.cfg.cbs,
            self.cfg.toksc_pus,
            now,
        );
        Self::refill(
            &mut self.tok_e,
            &mut self.laste_ts,
            self.cfg.ebs,
            self.cfg.tokse_pus,
            now,
        );

        let ocol = if !self.cfg.color_aware {
            if self.tok_e < inbytes {
                Color::Red
            } else if self.tok_c < inbytes {
                self.tok_e -= inbytes;
                Color::Yellow
            } else {
                self.tok_c -= inbytes;
                self.tok_e -= inbytes;
                Color::Green
            }
        } else {
            match icol {
                // Uncolored packets are not policed in color aware mode
                Color::None => Color::None,
                Color::Red => Color::Red,
                _ if self.tok_e < inbytes => Color::Red,
                _ if self.tok_c < inbytes => {
                    self.tok_e -= inbytes;
                    if icol == Color::Green {
                        Color::Yellow
                    } else {
                        icol
                    }
                }
                _ => {
                    self.tok_c -= inbytes;
                    self.tok_e -= inbytes;
                    icol
                }
            }
        };

        let drop = self.cfg.drop_prio < ocol;
        if drop {
            self.drop_packets += 1;
        } else {
            self.pass_packets += 1;
        }
        (ocol, drop)
    }
}

/// Runs the policer bound to the packet, a missing policer lets the
/// packet through.
pub fn do_policer(dp: &Dataplane, xf: &mut Xfi, now: u64) {
    let Some(pla) = dp.pol.get(&u32::from(xf.qm.polid)) else {
        return;
    };

    let (ocol, drop) = lock(&pla).color(u64::from(xf.pm.l3_len), xf.qm.icol, now);
    xf.qm.ocol = ocol;
    if drop {
        debug!("[pol] {} drop, color {:?}", xf.qm.polid, ocol);
        xf.set_drop();
    }
}
