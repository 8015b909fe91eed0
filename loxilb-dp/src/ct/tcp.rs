use super::{count, CtPair, CtPinf, CtSmr};
use crate::{
    ctx::{PktCtx, PktError},
    hdr::TcpHdr,
    tables::lock,
    xfi::Xfi,
};
use loxilb_common::{CtDir, TcpFlags};
use std::{fmt, sync::Mutex};

/// ACKs to see in both directions before a flow whose handshake was
/// missed is considered established
const INIT_ACK_THRESHOLD: u32 = 3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TcpState {
    #[default]
    Closed,
    /// SYN seen
    SynSent,
    /// SYN-ACK seen
    SynAck,
    Est,
    /// FIN seen
    Fini,
    /// FIN acked
    Fini2,
    /// FIN seen in both directions
    Fini3,
    /// Closed or reset
    Cw,
    Err,
}

impl TcpState {
    pub fn is_closing(&self) -> bool {
        matches!(
            self,
            Self::Fini | Self::Fini2 | Self::Fini3 | Self::Cw | Self::Err
        )
    }

    fn smr(&self) -> CtSmr {
        match self {
            Self::Est => CtSmr::Est,
            Self::Cw => CtSmr::Ctd,
            Self::Err => CtSmr::Err,
            Self::Fini | Self::Fini2 | Self::Fini3 => CtSmr::Fin,
            _ => CtSmr::InProg,
        }
    }
}

impl fmt::Display for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::SynSent => "sync-sent",
            Self::SynAck => "sync-ack",
            Self::Est => "est",
            Self::Fini => "fin-1",
            Self::Fini2 => "fin-2",
            Self::Fini3 => "fin-3",
            Self::Cw => "closed-wait",
            Self::Err => "error",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TcpDirInf {
    /// Last sequence number seen
    pub seq: u32,
    pub init_acks: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TcpPinf {
    pub state: TcpState,
    /// Direction that sent the first FIN
    pub fndir: CtDir,
    pub dirs: [TcpDirInf; 2],
}

impl TcpPinf {
    /// Advances the state for a segment sent in `dir`
    pub fn step(&mut self, dir: CtDir, flags: TcpFlags, seq: u32, ack: u32) -> CtSmr {
        self.state = self.next(dir, flags, seq, ack);
        self.state.smr()
    }

    fn next(&mut self, dir: CtDir, flags: TcpFlags, seq: u32, ack: u32) -> TcpState {
        use TcpState::*;

        if flags.contains(TcpFlags::RST) {
            return Cw;
        }

        let rseq = self.dirs[dir.reverse() as usize].seq;
        let rinit_acks = self.dirs[dir.reverse() as usize].init_acks;
        let acks_rseq = ack == rseq.wrapping_add(1);
        let syn = flags.contains(TcpFlags::SYN);
        let synack = flags.contains(TcpFlags::SYN | TcpFlags::ACK);
        let td = &mut self.dirs[dir as usize];

        match self.state {
            Closed => {
                // Flows picked up after their handshake
                if flags.contains(TcpFlags::ACK) && !syn {
                    if td.init_acks != 0 && ack > rseq.wrapping_add(2) {
                        return Err;
                    }
                    td.seq = seq;
                    td.init_acks += 1;
                    if td.init_acks >= INIT_ACK_THRESHOLD && rinit_acks >= INIT_ACK_THRESHOLD {
                        return Est;
                    }
                    return Closed;
                }
                if !syn || (ack != 0 && dir != CtDir::In) {
                    return Err;
                }
                td.seq = seq;
                SynSent
            }
            SynSent => {
                if dir != CtDir::Out {
                    if !syn {
                        return Err;
                    }
                    td.seq = seq;
                    return SynSent;
                }
                if !synack || !acks_rseq {
                    return Err;
                }
                td.seq = seq;
                SynAck
            }
            SynAck => {
                if dir != CtDir::In {
                    if !synack || !acks_rseq {
                        return Err;
                    }
                    return SynAck;
                }
                if syn {
                    td.seq = seq;
                    return SynSent;
                }
                if !flags.contains(TcpFlags::ACK) || !acks_rseq {
                    return Err;
                }
                td.seq = seq;
                Est
            }
            Est => {
                if flags.contains(TcpFlags::FIN) {
                    td.seq = seq;
                    self.fndir = dir;
                    return Fini;
                }
                Est
            }
            Fini if self.fndir != dir => {
                if !flags.contains(TcpFlags::ACK) {
                    return Fini;
                }
                if !acks_rseq {
                    return Err;
                }
                td.seq = seq;
                if flags.contains(TcpFlags::FIN) {
                    Fini3
                } else {
                    Fini2
                }
            }
            Fini2 if self.fndir != dir && flags.contains(TcpFlags::FIN) => {
                td.seq = seq;
                Fini3
            }
            Fini3 if self.fndir == dir && flags.contains(TcpFlags::ACK) => {
                if !acks_rseq {
                    return Err;
                }
                Cw
            }
            state => state,
        }
    }
}

pub(super) fn tcp_sm(
    ctx: &PktCtx,
    xf: &Xfi,
    pair: &Mutex<CtPair>,
    dir: CtDir,
) -> Result<CtSmr, PktError> {
    let t = ctx.read::<TcpHdr>(usize::from(xf.pm.l4_off))?;
    let flags = TcpFlags::from_bits_truncate(t.flags);

    let mut p = lock(pair);
    count(&mut p, xf, dir);
    if !matches!(p.pi, CtPinf::Tcp(_)) {
        p.pi = CtPinf::Tcp(TcpPinf::default());
    }
    let CtPinf::Tcp(ts) = &mut p.pi else {
        return Ok(CtSmr::Untracked);
    };
    Ok(ts.step(dir, flags, t.seq.get(), t.ack_seq.get()))
}
