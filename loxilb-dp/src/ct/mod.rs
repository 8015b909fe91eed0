//! Connection tracking. The tracked flows live in the ACL table as pairs
//! of entries, one per direction, sharing a single protocol state behind
//! one lock.

mod icmp;
mod sctp;
mod tcp;
mod udp;

pub use icmp::{IcmpInfo, IcmpPinf, IcmpState};
pub use sctp::{SctpPinf, SctpState};
pub use tcp::{TcpPinf, TcpState};
pub use udp::{UdpPinf, UdpState};

use crate::{
    ctx::{PktCtx, PktError},
    hdr::{IPPROTO_ICMP, IPPROTO_SCTP, IPPROTO_TCP, IPPROTO_UDP},
    maps::Dataplane,
    tables::{lock, PbStats},
    xfi::Xfi,
};
use log::{debug, log_enabled, warn, Level};
use loxilb_common::{
    stats, CmnAct, CtDir, CtKey, NatAct, NatFlags, NxfrmInf, RdrAct, SessFwdAct, CT_ICMP_FN_CPTO,
    CT_SCTP_FN_CPTO, CT_TCP_FN_CPTO, CT_UDP_FN_CPTO, CT_V4_CPTO,
};
use std::{
    fmt,
    sync::{Arc, Mutex},
};

/// Result of a state machine step
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CtSmr {
    Err,
    InProg,
    Est,
    /// Traffic was seen in one direction only
    Uest,
    Fin,
    /// Torn down
    Ctd,
    Untracked,
    #[default]
    Init,
}

impl fmt::Display for CtSmr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Err => "err",
            Self::InProg => "inprog",
            Self::Est => "est",
            Self::Uest => "uest",
            Self::Fin => "fin",
            Self::Ctd => "ctd",
            Self::Untracked => "untracked",
            Self::Init => "init",
        };
        f.write_str(s)
    }
}

/// Protocol state of a tracked pair
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CtPinf {
    #[default]
    None,
    Tcp(TcpPinf),
    Udp(UdpPinf),
    Icmp(IcmpPinf),
    Sctp(SctpPinf),
}

impl CtPinf {
    /// The timeout after which an idle pair in this state is aged out
    pub fn timeout(&self) -> u64 {
        match self {
            Self::Tcp(t) if t.state == TcpState::Closed || t.state.is_closing() => CT_TCP_FN_CPTO,
            Self::Udp(_) => CT_UDP_FN_CPTO,
            Self::Icmp(_) => CT_ICMP_FN_CPTO,
            Self::Sctp(s) if s.state == SctpState::Closed || s.state.is_closing() => {
                CT_SCTP_FN_CPTO
            }
            _ => CT_V4_CPTO,
        }
    }
}

impl fmt::Display for CtPinf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("-"),
            Self::Tcp(t) => write!(f, "{}", t.state),
            Self::Udp(u) => write!(f, "{}", u.state),
            Self::Icmp(i) => write!(f, "{}", i.state),
            Self::Sctp(s) => write!(f, "{}", s.state),
        }
    }
}

/// State shared by both entries of a tracked pair
#[derive(Clone, Copy, Debug, Default)]
pub struct CtPair {
    pub pi: CtPinf,
    /// Fragments were seen on the flow
    pub frag: bool,
    /// Counters per direction
    pub pb: [PbStats; 2],
}

/// Connection tracking data of one direction
#[derive(Clone, Debug)]
pub struct CtDat {
    pub dir: CtDir,
    pub smr: CtSmr,
    /// Translation applied to the packets matching this entry
    pub xi: NxfrmInf,
    /// NAT rule and end-point the pair was created for
    pub rid: u32,
    pub aid: u16,
    /// Key of the other direction
    pub peer: CtKey,
    pub pair: Arc<Mutex<CtPair>>,
}

impl CtDat {
    pub fn pair_state(&self) -> CtPair {
        *lock(&self.pair)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AclAct {
    Drop,
    ToCp,
    Nop(RdrAct),
    RdrPort(RdrAct),
    Snat(NatAct),
    Dnat(NatAct),
    DoCt,
    SessFwd(SessFwdAct),
}

/// Value of the ACL table
#[derive(Clone, Debug)]
pub struct AclTact {
    pub ca: CmnAct,
    pub act: AclAct,
    /// Last time the entry was hit (ns)
    pub lts: u64,
    /// Set for the entries created by connection tracking
    pub ctd: Option<CtDat>,
}

impl AclTact {
    pub fn new(act: AclAct) -> Self {
        Self {
            ca: CmnAct::default(),
            act,
            lts: 0,
            ctd: None,
        }
    }

    pub fn with_cidx(act: AclAct, cidx: u32) -> Self {
        Self {
            ca: CmnAct {
                cidx,
                ..Default::default()
            },
            ..Self::new(act)
        }
    }

    /// Lets an established flow skip the connection tracking, the
    /// translation itself is kept.
    fn set_established(&mut self) {
        match &mut self.act {
            AclAct::Snat(na) | AclAct::Dnat(na) => na.doct = false,
            act => *act = AclAct::Nop(RdrAct::default()),
        }
    }
}

fn nat_act(xi: &NxfrmInf, rid: u32, aid: u16) -> AclAct {
    if xi.nat_flags.is_empty() {
        return AclAct::DoCt;
    }
    let na = NatAct {
        xip: xi.nat_xip,
        xport: xi.nat_xport,
        fr: false,
        doct: true,
        rid,
        aid,
    };
    if xi.nat_flags.intersects(NatFlags::DST | NatFlags::HDST) {
        AclAct::Dnat(na)
    } else {
        AclAct::Snat(na)
    }
}

/// Computes the key of the reply direction and its translation. A missing
/// translated port is filled from the original key so both directions
/// agree on it.
pub fn xfk_init(key: &CtKey, xi: &mut NxfrmInf) -> (CtKey, NxfrmInf) {
    let mut xkey = key.reversed();
    let mut xxi = NxfrmInf::default();
    let has_ports = key.l4proto != IPPROTO_ICMP;

    if xi.nat_flags.contains(NatFlags::DST) {
        xkey.saddr = xi.nat_xip;
        if has_ports {
            if xi.nat_xport != 0 {
                xkey.sport = xi.nat_xport;
            } else {
                xi.nat_xport = key.dport;
            }
            xxi.nat_xport = key.dport;
        }
        xxi.nat_flags = NatFlags::SRC;
        xxi.nat_xip = key.daddr;
    }
    if xi.nat_flags.contains(NatFlags::SRC) {
        xkey.daddr = xi.nat_xip;
        if has_ports {
            if xi.nat_xport != 0 {
                xkey.dport = xi.nat_xport;
            } else {
                xi.nat_xport = key.sport;
            }
            xxi.nat_xport = key.sport;
        }
        xxi.nat_flags = NatFlags::DST;
        xxi.nat_xip = key.saddr;
    }
    if xi.nat_flags.contains(NatFlags::HDST) {
        xkey.saddr = key.saddr;
        xkey.daddr = key.daddr;
        if has_ports {
            if xi.nat_xport != 0 {
                xkey.sport = xi.nat_xport;
            } else {
                xi.nat_xport = key.dport;
            }
            xxi.nat_xport = key.dport;
        }
        xxi.nat_flags = NatFlags::HSRC;
        xxi.nat_xip = 0;
        xi.nat_xip = 0;
    }
    if xi.nat_flags.contains(NatFlags::HSRC) {
        xkey.saddr = key.saddr;
        xkey.daddr = key.daddr;
        if has_ports {
            if xi.nat_xport != 0 {
                xkey.dport = xi.nat_xport;
            } else {
                xi.nat_xport = key.sport;
            }
            xxi.nat_xport = key.sport;
        }
        xxi.nat_flags = NatFlags::HDST;
        xxi.nat_xip = 0;
        xi.nat_xip = 0;
    }

    (xkey, xxi)
}

/// Runs the protocol state machine of the pair for one packet
fn ct_sm(ctx: &PktCtx, xf: &Xfi, pair: &Mutex<CtPair>, dir: CtDir) -> Result<CtSmr, PktError> {
    if xf.pm.l4_off == 0 {
        lock(pair).frag = true;
        return Ok(CtSmr::Untracked);
    }

    match xf.l3m.nw_proto {
        IPPROTO_TCP => tcp::tcp_sm(ctx, xf, pair, dir),
        IPPROTO_UDP => Ok(udp::udp_sm(xf, pair, dir)),
        IPPROTO_ICMP => icmp::icmp_sm(ctx, xf, pair, dir),
        IPPROTO_SCTP => sctp::sctp_sm(ctx, xf, pair, dir),
        _ => Ok(CtSmr::Untracked),
    }
}

/// Counts a packet in the pair stats, called with the pair lock held
#[inline(always)]
fn count(p: &mut CtPair, xf: &Xfi, dir: CtDir) {
    let pb = &mut p.pb[dir as usize];
    pb.bytes += u64::from(xf.pm.l3_len);
    pb.packets += 1;
}

/// Tracks the IPv4 packet, creating the entry pair on the first packet
/// of a flow. A bounds violation in the L4 headers marks the packet for
/// drop and leaves the flow state untouched.
pub fn ctv4_in(dp: &Dataplane, ctx: &PktCtx, xf: &mut Xfi, now: u64) -> CtSmr {
    let proto = xf.l3m.nw_proto;
    if !matches!(proto, IPPROTO_TCP | IPPROTO_UDP | IPPROTO_ICMP | IPPROTO_SCTP) {
        return CtSmr::Untracked;
    }

    let mut xi = NxfrmInf {
        nat_flags: xf.pm.nf,
        nat_xip: xf.l4m.nxip,
        nat_xport: xf.l4m.nxport,
        ..Default::default()
    };
    if xi.nat_xip == 0 {
        if xf.pm.nf == NatFlags::DST {
            xi.nat_flags = NatFlags::HDST;
        } else if xf.pm.nf == NatFlags::SRC {
            xi.nat_flags = NatFlags::HSRC;
        }
    }

    let key = CtKey {
        daddr: xf.l3m.daddr,
        saddr: xf.l3m.saddr,
        sport: xf.l3m.source,
        dport: xf.l3m.dest,
        l4proto: proto,
        zone: xf.pm.zone,
    };
    let (xkey, xxi) = xfk_init(&key, &mut xi);

    let tracked = |k: &CtKey| {
        dp.aclv4
            .get(k)
            .filter(|e| lock(e).ctd.is_some())
    };

    let (atdat, axtdat) = match (tracked(&key), tracked(&xkey)) {
        (Some(a), Some(x)) => (a, x),
        _ => {
            match new_pair(dp, xf, &key, &xkey, xi, xxi, now) {
                Ok(true) => {}
                Ok(false) => debug!("[ctrk] pair created by another worker"),
                Err(e) => {
                    warn!("[ctrk] new pair failed, {}", e);
                    return CtSmr::Err;
                }
            }
            match (tracked(&key), tracked(&xkey)) {
                (Some(a), Some(x)) => (a, x),
                _ => return CtSmr::Err,
            }
        }
    };

    let ctd = {
        let mut a = lock(&atdat);
        a.lts = now;
        a.ctd.clone()
    };
    lock(&axtdat).lts = now;
    let Some(ctd) = ctd else {
        return CtSmr::Err;
    };

    let smr = match ct_sm(ctx, xf, &ctd.pair, ctd.dir) {
        Ok(smr) => smr,
        Err(e) => {
            debug!("[ctrk] drop, {}", e);
            xf.set_drop();
            return CtSmr::Err;
        }
    };

    if log_enabled!(Level::Debug) {
        debug!(
            "[ctrk] {:x}:{} -> {:x}:{} {:?} smr {}",
            key.saddr, key.sport, key.daddr, key.dport, ctd.dir, smr
        );
    }

    for e in [&atdat, &axtdat] {
        let mut a = lock(e);
        match smr {
            CtSmr::Est => a.set_established(),
            CtSmr::Err => a.act = AclAct::ToCp,
            _ => {}
        }
        if let Some(ctd) = a.ctd.as_mut() {
            ctd.smr = smr;
        }
    }

    smr
}

/// Both entries sharing one pair state, as left by `new_pair`
fn is_pair(a: Option<&AclTact>, b: Option<&AclTact>) -> bool {
    match (
        a.and_then(|a| a.ctd.as_ref()),
        b.and_then(|b| b.ctd.as_ref()),
    ) {
        (Some(x), Some(y)) => Arc::ptr_eq(&x.pair, &y.pair),
        _ => false,
    }
}

/// Inserts the entries of both directions at once. Returns false, with
/// nothing changed, when a complete pair for the flow is already there.
fn new_pair(
    dp: &Dataplane,
    xf: &Xfi,
    key: &CtKey,
    xkey: &CtKey,
    xi: NxfrmInf,
    xxi: NxfrmInf,
    now: u64,
) -> Result<bool, crate::tables::TableError> {
    let cidx = dp.new_ct_cidx();
    let rid = xf.pm.rule_id;
    let aid = xf.l4m.sel_aid;
    let pair = Arc::new(Mutex::new(CtPair::default()));

    let fwd = AclTact {
        ca: CmnAct {
            cidx,
            ..Default::default()
        },
        act: nat_act(&xi, rid, aid),
        lts: now,
        ctd: Some(CtDat {
            dir: CtDir::In,
            smr: CtSmr::Init,
            xi,
            rid,
            aid,
            peer: *xkey,
            pair: pair.clone(),
        }),
    };
    let rev = AclTact {
        ca: CmnAct {
            cidx: cidx + 1,
            ..Default::default()
        },
        act: nat_act(&xxi, rid, aid),
        lts: now,
        ctd: Some(CtDat {
            dir: CtDir::Out,
            smr: CtSmr::Init,
            xi: xxi,
            rid,
            aid,
            peer: *key,
            pair,
        }),
    };

    if !dp.aclv4.insert_pair((*key, fwd), (*xkey, rev), is_pair)? {
        return Ok(false);
    }

    // Stats of recycled counter indexes start over
    dp.aclv4_stats.clear(cidx);
    dp.aclv4_stats.clear(cidx + 1);
    dp.stats_inc(stats::CT_NEW);
    debug!("[ctrk] new pair cidx {}", cidx);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hdr::*, parser::parse_packet, testutil::*};
    use loxilb_common::CT_CTR_MAX_SID;

    fn track(dp: &Dataplane, frame: &[u8], nat: Option<(NatFlags, u32, u16)>) -> (Xfi, CtSmr) {
        let mut ctx = PktCtx::new(1, frame);
        let mut xf = Xfi::default();
        parse_packet(&mut ctx, &mut xf);
        if let Some((nf, xip, xport)) = nat {
            xf.pm.nf = nf;
            xf.l4m.nxip = xip;
            xf.l4m.nxport = xport;
        }
        let smr = ctv4_in(dp, &ctx, &mut xf, 1000);
        (xf, smr)
    }

    #[test]
    fn test_xfk_dnat() {
        let key = CtKey {
            daddr: VIP,
            saddr: CLIENT_IP,
            sport: 40000,
            dport: 80,
            l4proto: IPPROTO_TCP,
            zone: 0,
        };
        let mut xi = NxfrmInf {
            nat_flags: NatFlags::DST,
            nat_xip: SERVER_IP,
            nat_xport: 8080,
            ..Default::default()
        };
        let (xkey, xxi) = xfk_init(&key, &mut xi);
        assert_eq!(
            xkey,
            CtKey {
                daddr: CLIENT_IP,
                saddr: SERVER_IP,
                sport: 8080,
                dport: 40000,
                l4proto: IPPROTO_TCP,
                zone: 0,
            }
        );
        assert_eq!(xxi.nat_flags, NatFlags::SRC);
        assert_eq!((xxi.nat_xip, xxi.nat_xport), (VIP, 80));
    }

    #[test]
    fn test_xfk_fills_missing_port() {
        let key = CtKey {
            daddr: VIP,
            saddr: CLIENT_IP,
            sport: 40000,
            dport: 80,
            l4proto: IPPROTO_UDP,
            zone: 3,
        };
        let mut xi = NxfrmInf {
            nat_flags: NatFlags::SRC,
            nat_xip: 0x01010101,
            ..Default::default()
        };
        let (xkey, xxi) = xfk_init(&key, &mut xi);
        assert_eq!(xi.nat_xport, 40000);
        assert_eq!((xkey.daddr, xkey.dport), (0x01010101, 40000));
        assert_eq!(xxi.nat_flags, NatFlags::DST);
        assert_eq!((xxi.nat_xip, xxi.nat_xport), (CLIENT_IP, 40000));
    }

    #[test]
    fn test_xfk_hairpin() {
        let key = CtKey {
            daddr: VIP,
            saddr: CLIENT_IP,
            sport: 40000,
            dport: 80,
            l4proto: IPPROTO_TCP,
            zone: 0,
        };
        let mut xi = NxfrmInf {
            nat_flags: NatFlags::HDST,
            nat_xport: 8080,
            ..Default::default()
        };
        let (xkey, xxi) = xfk_init(&key, &mut xi);
        assert_eq!((xkey.saddr, xkey.daddr), (CLIENT_IP, VIP));
        assert_eq!((xkey.sport, xkey.dport), (8080, 40000));
        assert_eq!(xxi.nat_flags, NatFlags::HSRC);
        assert_eq!(xxi.nat_xport, 80);
    }

    #[test]
    fn test_pair_symmetry() {
        let dp = Dataplane::new();
        let syn = tcp4_frame(CLIENT_IP, VIP, 40000, 80, TCP_SYN, 100, 0);
        let (_, smr) = track(&dp, &syn, Some((NatFlags::DST, SERVER_IP, 8080)));
        assert_eq!(smr, CtSmr::InProg);
        assert_eq!(dp.aclv4.len(), 2);

        let entries = dp.aclv4.entries();
        let (fk, fwd) = entries
            .iter()
            .find(|(_, a)| a.ctd.as_ref().map(|c| c.dir) == Some(CtDir::In))
            .unwrap();
        let (rk, rev) = entries
            .iter()
            .find(|(_, a)| a.ctd.as_ref().map(|c| c.dir) == Some(CtDir::Out))
            .unwrap();

        assert_eq!((fk.saddr, fk.daddr, fk.sport, fk.dport), (CLIENT_IP, VIP, 40000, 80));
        assert_eq!(
            (rk.saddr, rk.daddr, rk.sport, rk.dport),
            (SERVER_IP, CLIENT_IP, 8080, 40000)
        );
        assert_eq!(fwd.ctd.as_ref().unwrap().peer, *rk);
        assert_eq!(rev.ctd.as_ref().unwrap().peer, *fk);
        assert_eq!(rev.ca.cidx, fwd.ca.cidx + 1);
        assert!(matches!(fwd.act, AclAct::Dnat(na) if na.xip == SERVER_IP && na.doct));
        assert!(matches!(rev.act, AclAct::Snat(na) if na.xip == VIP && na.xport == 80));
        assert!(Arc::ptr_eq(
            &fwd.ctd.as_ref().unwrap().pair,
            &rev.ctd.as_ref().unwrap().pair
        ));
    }

    #[test]
    fn test_tcp_handshake_established() {
        let dp = Dataplane::new();
        let nat = Some((NatFlags::DST, SERVER_IP, 8080));
        let (_, smr) = track(&dp, &tcp4_frame(CLIENT_IP, VIP, 40000, 80, TCP_SYN, 100, 0), nat);
        assert_eq!(smr, CtSmr::InProg);

        // Reply from the server as translated back by the reverse entry
        let rnat = Some((NatFlags::SRC, VIP, 80));
        let synack = tcp4_frame(SERVER_IP, CLIENT_IP, 8080, 40000, TCP_SYN | TCP_ACK, 300, 101);
        let (_, smr) = track(&dp, &synack, rnat);
        assert_eq!(smr, CtSmr::InProg);

        let ack = tcp4_frame(CLIENT_IP, VIP, 40000, 80, TCP_ACK, 101, 301);
        let (_, smr) = track(&dp, &ack, nat);
        assert_eq!(smr, CtSmr::Est);

        for (_, a) in dp.aclv4.entries() {
            match a.act {
                AclAct::Snat(na) | AclAct::Dnat(na) => assert!(!na.doct),
                act => panic!("unexpected {act:?}"),
            }
            let p = a.ctd.unwrap().pair_state();
            assert!(matches!(p.pi, CtPinf::Tcp(t) if t.state == TcpState::Est));
            assert_eq!(p.pb[0].packets, 2);
            assert_eq!(p.pb[1].packets, 1);
        }
    }

    #[test]
    fn test_error_traps_flow() {
        let dp = Dataplane::new();
        // A flow can't start without a SYN
        let (_, smr) = track(
            &dp,
            &tcp4_frame(CLIENT_IP, SERVER_IP, 1, 2, TCP_PSH, 1, 0),
            None,
        );
        assert_eq!(smr, CtSmr::Err);
        for (_, a) in dp.aclv4.entries() {
            assert_eq!(a.act, AclAct::ToCp);
        }
    }

    #[test]
    fn test_truncated_l4_drops_without_state_change() {
        let dp = Dataplane::new();
        let syn = tcp4_frame(CLIENT_IP, SERVER_IP, 1, 2, TCP_SYN, 1, 0);
        let (xf, smr) = track(&dp, &syn[..40], None);
        assert_eq!(smr, CtSmr::Err);
        assert!(xf.is_dropped());
        for (_, a) in dp.aclv4.entries() {
            assert_eq!(a.act, AclAct::DoCt);
        }
    }

    #[test]
    fn test_fragment_untracked() {
        let dp = Dataplane::new();
        let mut frame = udp4_frame(CLIENT_IP, SERVER_IP, 5000, 53);
        frame[20] = 0x00;
        frame[21] = 0x10;
        let (_, smr) = track(&dp, &frame, None);
        assert_eq!(smr, CtSmr::Untracked);
        let (_, a) = dp.aclv4.entries().pop().unwrap();
        assert!(a.ctd.unwrap().pair_state().frag);
    }

    #[test]
    fn test_other_protocols_untracked() {
        let dp = Dataplane::new();
        let mut f = eth_hdr(ROUTER_MAC, CLIENT_MAC, ETH_P_IP);
        f.extend(ipv4_pkt(CLIENT_IP, SERVER_IP, 47, &[0; 8]));
        let (_, smr) = track(&dp, &f, None);
        assert_eq!(smr, CtSmr::Untracked);
        assert!(dp.aclv4.is_empty());
    }

    #[test]
    fn test_ct_counter_wraps() {
        let dp = Dataplane::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..CT_CTR_MAX_SID / 2 {
            let cidx = dp.new_ct_cidx();
            assert!(cidx + 1 < CT_CTR_MAX_SID);
            assert_eq!(cidx % 2, 0);
            assert!(seen.insert(cidx), "{cidx} reused");
        }
        // Index 0 is handed out last, then the sequence starts over
        assert!(seen.contains(&0));
        assert_eq!(dp.new_ct_cidx(), 2);
    }

    #[test]
    fn test_existing_pair_kept() {
        let dp = Dataplane::new();
        let (xf, _) = track(&dp, &udp4_frame(CLIENT_IP, SERVER_IP, 5000, 53), None);
        let key = CtKey {
            daddr: SERVER_IP,
            saddr: CLIENT_IP,
            sport: 5000,
            dport: 53,
            l4proto: IPPROTO_UDP,
            zone: 0,
        };
        let before = dp.aclv4.lookup(&key).unwrap().ctd.unwrap().pair;

        let mut xi = NxfrmInf::default();
        let (xkey, xxi) = xfk_init(&key, &mut xi);
        assert_eq!(new_pair(&dp, &xf, &key, &xkey, xi, xxi, 2000), Ok(false));
        let after = dp.aclv4.lookup(&key).unwrap().ctd.unwrap().pair;
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(dp.global_stats()[stats::CT_NEW as usize], 1);
    }

    #[test]
    fn test_concurrent_first_packets_share_pair() {
        let dp = Dataplane::new();
        let frame = udp4_frame(CLIENT_IP, SERVER_IP, 5000, 53);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| track(&dp, &frame, None));
            }
        });

        assert_eq!(dp.aclv4.len(), 2);
        assert_eq!(dp.global_stats()[stats::CT_NEW as usize], 1);
        let mut pairs = dp.aclv4.entries().into_iter().map(|(_, a)| a.ctd.unwrap().pair);
        let (a, b) = (pairs.next().unwrap(), pairs.next().unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(lock(&a).pb[0].packets, 8);
    }
}
