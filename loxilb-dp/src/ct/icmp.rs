use super::{count, CtPair, CtPinf, CtSmr};
use crate::{
    ctx::{PktCtx, PktError},
    hdr::{
        IcmpHdr, ICMP_DEST_UNREACH, ICMP_ECHO, ICMP_ECHOREPLY, ICMP_REDIRECT, ICMP_TIME_EXCEEDED,
    },
    tables::lock,
    xfi::Xfi,
};
use loxilb_common::CtDir;
use std::{fmt, sync::Mutex};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IcmpState {
    #[default]
    Closed,
    /// Echo request seen
    Reqs,
    /// Matching echo reply seen
    Reps,
}

impl fmt::Display for IcmpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Reqs => "req-sent",
            Self::Reps => "bidir",
        };
        f.write_str(s)
    }
}

bitflags::bitflags! {
/// Non echo messages seen on the flow
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IcmpInfo: u8 {
    const DUNR = 0x01;
    const TTL = 0x02;
    const RDR = 0x04;
    const UNK = 0x08;
}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IcmpPinf {
    pub state: IcmpState,
    pub info: IcmpInfo,
    /// Set when a reply did not match the request
    pub errs: bool,
    /// Sequence of the last request
    pub lseq: u16,
}

impl IcmpPinf {
    pub fn step(&mut self, icmp_type: u8, seq: u16) -> CtSmr {
        let info = match icmp_type {
            ICMP_DEST_UNREACH => Some(IcmpInfo::DUNR),
            ICMP_TIME_EXCEEDED => Some(IcmpInfo::TTL),
            ICMP_REDIRECT => Some(IcmpInfo::RDR),
            ICMP_ECHO | ICMP_ECHOREPLY => None,
            _ => Some(IcmpInfo::UNK),
        };

        match info {
            Some(info) => self.info |= info,
            None => match self.state {
                IcmpState::Closed if icmp_type != ICMP_ECHO => self.errs = true,
                IcmpState::Closed => {
                    self.state = IcmpState::Reqs;
                    self.lseq = seq;
                }
                IcmpState::Reqs if icmp_type == ICMP_ECHO => self.lseq = seq,
                IcmpState::Reqs if self.lseq != seq => self.errs = true,
                IcmpState::Reqs => self.state = IcmpState::Reps,
                IcmpState::Reps => {}
            },
        }

        match self.state {
            IcmpState::Reps => CtSmr::Est,
            _ => CtSmr::InProg,
        }
    }
}

pub(super) fn icmp_sm(
    ctx: &PktCtx,
    xf: &Xfi,
    pair: &Mutex<CtPair>,
    dir: CtDir,
) -> Result<CtSmr, PktError> {
    let i = ctx.read::<IcmpHdr>(usize::from(xf.pm.l4_off))?;

    let mut p = lock(pair);
    count(&mut p, xf, dir);
    if !matches!(p.pi, CtPinf::Icmp(_)) {
        p.pi = CtPinf::Icmp(IcmpPinf::default());
    }
    match &mut p.pi {
        CtPinf::Icmp(is) => Ok(is.step(i.icmp_type, i.sequence.get())),
        _ => Ok(CtSmr::Untracked),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo() {
        let mut is = IcmpPinf::default();
        assert_eq!(is.step(ICMP_ECHO, 1), CtSmr::InProg);
        assert_eq!(is.step(ICMP_ECHO, 2), CtSmr::InProg);
        assert_eq!(is.lseq, 2);
        assert_eq!(is.step(ICMP_ECHOREPLY, 2), CtSmr::Est);
        assert!(!is.errs);
    }

    #[test]
    fn test_reply_mismatch() {
        let mut is = IcmpPinf::default();
        is.step(ICMP_ECHO, 7);
        assert_eq!(is.step(ICMP_ECHOREPLY, 8), CtSmr::InProg);
        assert!(is.errs);
        assert_eq!(is.state, IcmpState::Reqs);
    }

    #[test]
    fn test_unsolicited_reply() {
        let mut is = IcmpPinf::default();
        assert_eq!(is.step(ICMP_ECHOREPLY, 1), CtSmr::InProg);
        assert!(is.errs);
        assert_eq!(is.state, IcmpState::Closed);
    }

    #[test]
    fn test_info_kept_along_state() {
        let mut is = IcmpPinf::default();
        is.step(ICMP_ECHO, 1);
        assert_eq!(is.step(ICMP_DEST_UNREACH, 0), CtSmr::InProg);
        assert_eq!(is.step(13, 0), CtSmr::InProg);
        assert_eq!(is.info, IcmpInfo::DUNR | IcmpInfo::UNK);
        assert_eq!(is.state, IcmpState::Reqs);
        assert_eq!(is.step(ICMP_ECHOREPLY, 1), CtSmr::Est);
    }
}
