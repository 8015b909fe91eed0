use super::{count, CtPair, CtPinf, CtSmr};
use crate::{tables::lock, xfi::Xfi};
use loxilb_common::CtDir;
use std::{fmt, sync::Mutex};

/// Packets seen from the initiator only after which the flow counts as
/// established one way. The state changes on the packet that exceeds it,
/// the fifth one.
const CONN_THRESHOLD: u32 = 4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UdpState {
    #[default]
    Cni,
    Uest,
    Est,
}

impl fmt::Display for UdpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cni => "conn-init",
            Self::Uest => "udp-uest",
            Self::Est => "udp-est",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UdpPinf {
    pub state: UdpState,
    pub pkts_seen: u32,
    pub rpkts_seen: u32,
}

impl UdpPinf {
    pub fn step(&mut self, dir: CtDir) -> CtSmr {
        match dir {
            CtDir::In => self.pkts_seen = self.pkts_seen.saturating_add(1),
            CtDir::Out => self.rpkts_seen = self.rpkts_seen.saturating_add(1),
        }

        self.state = match self.state {
            UdpState::Cni if self.pkts_seen != 0 && self.rpkts_seen != 0 => UdpState::Est,
            UdpState::Cni if self.pkts_seen > CONN_THRESHOLD => UdpState::Uest,
            UdpState::Uest if self.rpkts_seen != 0 => UdpState::Est,
            state => state,
        };

        match self.state {
            UdpState::Uest => CtSmr::Uest,
            UdpState::Est => CtSmr::Est,
            UdpState::Cni => CtSmr::InProg,
        }
    }
}

pub(super) fn udp_sm(xf: &Xfi, pair: &Mutex<CtPair>, dir: CtDir) -> CtSmr {
    let mut p = lock(pair);
    count(&mut p, xf, dir);
    if !matches!(p.pi, CtPinf::Udp(_)) {
        p.pi = CtPinf::Udp(UdpPinf::default());
    }
    match &mut p.pi {
        CtPinf::Udp(us) => us.step(dir),
        _ => CtSmr::Untracked,
    }
}
