#![no_std]

pub const VERSION: u32 = 0x0000001;

pub const MAX_INTERFACES: u32 = 512;
/// The port used to hand packets over to the host stack
pub const PORT_NO: u16 = (MAX_INTERFACES - 1) as u16;
pub const MAX_STACKED_VLANS: usize = 3;
/// Max NAT end-points per NAT rule
pub const MAX_NXFRMS: usize = 16;
/// Max GTP extension headers walked after the PDU session container
pub const GTP_MAX_EXTH: usize = 2;
/// The route key is 16-bit zone followed by the 32-bit address
pub const RTV4_PREFIX_LEN: u8 = 48;

pub const MAX_INTF_ENTRIES: u32 = 6 * 1024;
pub const MAX_MIRR_ENTRIES: u32 = 32;
pub const MAX_NH_ENTRIES: u32 = 4 * 1024;
pub const MAX_RTV4_ENTRIES: u32 = 32 * 1024;
pub const MAX_ACLV4_ENTRIES: u32 = 256 * 1024;
pub const MAX_TMAC_ENTRIES: u32 = 2 * 1024;
pub const MAX_DMAC_ENTRIES: u32 = 8 * 1024;
pub const MAX_SMAC_ENTRIES: u32 = MAX_DMAC_ENTRIES;
pub const MAX_NATV4_ENTRIES: u32 = 4 * 1024;
pub const MAX_NATV4_STAT_ENTRIES: u32 = 4 * 16 * 1024;
pub const MAX_FCV4_ENTRIES: u32 = 256 * 1024;
pub const MAX_POL_ENTRIES: u32 = 8 * 1024;
pub const MAX_SESS_ENTRIES: u32 = 20 * 1024;

/// Flow cache entries older than this are evicted by the fast path (ns)
pub const FC_V4_DPTO: u64 = 40_000_000_000;
/// Flow cache entries not hit for this long are aged out by the sweeper (ns)
pub const FC_V4_CPTO: u64 = 120_000_000_000;
/// Idle timeout for established connections (ns)
pub const CT_V4_CPTO: u64 = 1_800_000_000_000;
pub const CT_TCP_FN_CPTO: u64 = 60_000_000_000;
pub const CT_SCTP_FN_CPTO: u64 = 60_000_000_000;
pub const CT_UDP_FN_CPTO: u64 = 60_000_000_000;
pub const CT_ICMP_FN_CPTO: u64 = 40_000_000_000;

/// The CT counter index wraps at this value
pub const CT_CTR_MAX_SID: u32 = 250_000;

pub mod stats {
    pub const PACKETS: u32 = 0;
    pub const DROPS: u32 = 1;
    pub const TRAPS: u32 = 2;
    pub const PASSES: u32 = 3;
    pub const REDIRECTS: u32 = 4;
    pub const REWIRES: u32 = 5;
    pub const FC_HITS: u32 = 6;
    pub const FC_MISSES: u32 = 7;
    pub const FC_INSERTS: u32 = 8;
    pub const CT_NEW: u32 = 9;
    pub const PARSER_DROPS: u32 = 10;
    pub const REDIRECT_ERRORS: u32 = 11;
    pub const DEPARSE_ERRORS: u32 = 12;
    pub const MAX: u32 = 13;
}

bitflags::bitflags! {
/// Accumulated forwarding intents of a packet
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipeAct: u8 {
    const TRAP = 0x01;
    const DROP = 0x02;
    const RDR = 0x04;
    const PASS = 0x08;
    const REWIRE = 0x10;
    const RDR_PRIO = 0x20;
    const SET_CT = 0x40;
    const RDR_MASK = Self::RDR.bits() | Self::RDR_PRIO.bits();
}
}

bitflags::bitflags! {
/// Reason codes carried to the host along with trapped packets
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipeRc: u8 {
    const PARSER = 0x01;
    const ACL_MISS = 0x02;
    const TUN_DECAP = 0x04;
}
}

bitflags::bitflags! {
/// Tables matched by a packet
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipeHit: u8 {
    const TMAC = 0x01;
    const ACL = 0x02;
    const RT = 0x08;
    const FC = 0x10;
    const SESS = 0x20;
}
}

bitflags::bitflags! {
/// NAT direction, the H* variants are the hairpin (host) cases
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NatFlags: u8 {
    const DST = 0x01;
    const SRC = 0x02;
    const HDST = 0x04;
    const HSRC = 0x08;
}
}

bitflags::bitflags! {
/// Compacted TCP header flags
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TcpFlags: u8 {
    const FIN = 0x01;
    const SYN = 0x02;
    const RST = 0x04;
    const PSH = 0x08;
    const ACK = 0x10;
    const URG = 0x20;
}
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TunType {
    #[default]
    None = 0,
    Vxlan = 1,
    Gtp = 2,
    Stt = 3,
    Gre = 4,
}

/// Table ids used for stats attribution and trap reasons
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TableId {
    #[default]
    Intf = 0,
    IntfStats,
    BdStats,
    Smac,
    Tmac,
    Aclv4,
    Rtv4,
    Nh,
    Dmac,
    TxIntf,
    Mirror,
    TxIntfStats,
    TxBdStats,
    PktPerfRing,
    Rtv4Stats,
    Rtv6Stats,
    Aclv4Stats,
    Aclv6Stats,
    TmacStats,
    Fcv4,
    Fcv4Stats,
    Pgm,
    Pol,
    Ctv4,
    Nat4,
    Nat4Stats,
    Sess4,
    Sess4Stats,
}

/// Action type ids. The flow cache keeps one action slot per id below `ToCp`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActType {
    Drop = 0,
    RmVxlan = 1,
    RtTunNh = 2,
    L3RtTunNh = 3,
    Snat = 4,
    Dnat = 5,
    NeighL2 = 6,
    NeighVxlan = 7,
    AddL2Vlan = 8,
    RmL2Vlan = 9,
    ToCp = 10,
    SetIfi = 11,
    Nop = 12,
    LocalStack = 13,
    L3En = 14,
    RtNhNum = 15,
    SessFwd = 16,
    RdrPort = 17,
    Policer = 18,
    DoPolicer = 19,
    FcAct = 20,
    DoCt = 21,
    RmGtp = 22,
    AddGtp = 23,
}

pub const FCV4_MAP_ACTS: usize = ActType::ToCp as usize;

#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CtDir {
    #[default]
    In = 0,
    Out = 1,
}

impl CtDir {
    pub fn reverse(self) -> Self {
        match self {
            Self::In => Self::Out,
            Self::Out => Self::In,
        }
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Color {
    #[default]
    None = 0,
    Green = 1,
    Yellow = 2,
    Red = 3,
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NatSel {
    #[default]
    RoundRobin = 0,
    Hash = 1,
    Prio = 2,
}

/// Connection tracking status of the packet being processed
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CtSts {
    #[default]
    None = 0,
    InProgress = 1,
    Established = 2,
}

// Table keys. Addresses and ports are kept in host byte order.

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct IntfKey {
    pub ifindex: u32,
    pub ing_vid: u16,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SmacKey {
    pub smac: [u8; 6],
    pub bd: u16,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TmacKey {
    pub mac: [u8; 6],
    pub tun_type: TunType,
    pub tunnel_id: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DmacKey {
    pub dmac: [u8; 6],
    pub bd: u16,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NatKey {
    pub daddr: u32,
    pub dport: u16,
    pub zone: u16,
    pub l4proto: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SessKey {
    pub daddr: u32,
    pub saddr: u32,
    pub teid: u32,
}

/// Key of the ACL table which also stores the connection tracking pairs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CtKey {
    pub daddr: u32,
    pub saddr: u32,
    pub sport: u16,
    pub dport: u16,
    pub l4proto: u8,
    pub zone: u16,
}

impl CtKey {
    /// The key of the same flow seen from the other end, without NAT
    pub fn reversed(&self) -> Self {
        Self {
            daddr: self.saddr,
            saddr: self.daddr,
            sport: self.dport,
            dport: self.sport,
            l4proto: self.l4proto,
            zone: self.zone,
        }
    }
}

/// Flow cache key made of both the outer and the inner headers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FcKey {
    pub smac: [u8; 6],
    pub dmac: [u8; 6],
    pub in_smac: [u8; 6],
    pub in_dmac: [u8; 6],
    pub daddr: u32,
    pub saddr: u32,
    pub sport: u16,
    pub dport: u16,
    pub l4proto: u8,
    pub in_port: u16,
    pub bd: u16,
    pub in_daddr: u32,
    pub in_saddr: u32,
    pub in_sport: u16,
    pub in_dport: u16,
    pub in_l4proto: u8,
}

// Table actions

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CmnAct {
    /// Forces the flow cache entry back to the slow path
    pub ftrap: bool,
    /// Egress interface index resolved when the flow was cached
    pub oif: u32,
    /// Stats index
    pub cidx: u32,
}

/// A table value: the common part and the table specific action
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tact<A> {
    pub ca: CmnAct,
    pub act: A,
}

impl<A> Tact<A> {
    pub fn new(act: A) -> Self {
        Self {
            ca: CmnAct::default(),
            act,
        }
    }

    pub fn with_cidx(act: A, cidx: u32) -> Self {
        Self {
            ca: CmnAct {
                cidx,
                ..Default::default()
            },
            act,
        }
    }
}

/// Interface binding attributes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetIfi {
    /// Port number used by the pipeline
    pub xdp_ifidx: u16,
    pub zone: u16,
    pub bd: u16,
    /// Mirror id applied to ingress packets
    pub mirr: u16,
    /// Policer id applied to ingress packets
    pub polid: u16,
    pub pprop: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntfAct {
    Drop,
    ToCp,
    SetIfi(SetIfi),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmacAct {
    Drop,
    ToCp,
    Nop,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RtL2NhAct {
    pub dmac: [u8; 6],
    pub smac: [u8; 6],
    pub bd: u16,
    /// Next hop to resolve after this one, 0 for none
    pub rnh_num: u16,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RtNhAct {
    pub nh_num: u16,
    pub bd: u16,
    pub tid: u32,
    pub l2nh: RtL2NhAct,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct L3TunAct {
    /// Remote tunnel end-point
    pub rip: u32,
    /// Local tunnel end-point
    pub sip: u32,
    pub tid: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RtL2VxNhAct {
    pub l3t: L3TunAct,
    pub l2nh: RtL2NhAct,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TmacAct {
    Drop,
    ToCp,
    /// Terminate and create the tunnel next hop
    RtTunNh(RtNhAct),
    /// Enable routing for packets to this MAC
    L3En,
    RmVxlan(RtNhAct),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RdrAct {
    pub oport: u16,
    /// Set once a finishing packet was seen on the flow
    pub fr: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct L2VlanAct {
    pub vlan: u16,
    pub oport: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmacAct {
    Drop,
    ToCp,
    RdrPort(RdrAct),
    AddL2Vlan(L2VlanAct),
    RmL2Vlan(L2VlanAct),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NhAct {
    Drop,
    ToCp,
    NeighL2(RtL2NhAct),
    NeighVxlan(RtL2VxNhAct),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RtAct {
    Drop,
    ToCp,
    RdrPort(RdrAct),
    RtNhNum(u16),
    L3RtTunNh(RtNhAct),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MirrAct {
    Drop,
    AddL2Vlan(L2VlanAct),
    RmL2Vlan(L2VlanAct),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GtpTunAct {
    pub rip: u32,
    pub sip: u32,
    pub teid: u32,
    pub qfi: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessAct {
    Drop,
    RmGtp { qfi: u8 },
    AddGtp(GtpTunAct),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NatAct {
    pub xip: u32,
    pub xport: u16,
    /// Set once a finishing packet was seen on the flow
    pub fr: bool,
    /// Every packet must go through connection tracking
    pub doct: bool,
    /// NAT rule stats index
    pub rid: u32,
    /// Selected end-point index
    pub aid: u16,
}

/// One NAT end-point, also used as the translation info of a CT entry
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NxfrmInf {
    pub nat_flags: NatFlags,
    pub inactive: bool,
    pub wprio: u16,
    pub nat_xport: u16,
    pub nat_xip: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NatKind {
    Snat,
    Dnat,
    Drop,
}

/// A NAT rule with its end-points and the selection state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NatTact {
    pub kind: NatKind,
    pub sel_type: NatSel,
    /// Next end-point candidate for round robin
    pub sel_hint: u16,
    /// Used entries in `nxfrms`
    pub nxfrm: u16,
    pub nxfrms: [NxfrmInf; MAX_NXFRMS],
}

impl NatTact {
    pub fn new(kind: NatKind, sel_type: NatSel, eps: &[NxfrmInf]) -> Self {
        let mut nxfrms = [NxfrmInf::default(); MAX_NXFRMS];
        let n = eps.len().min(MAX_NXFRMS);
        nxfrms[..n].copy_from_slice(&eps[..n]);
        Self {
            kind,
            sel_type,
            sel_hint: 0,
            nxfrm: n as u16,
            nxfrms,
        }
    }

    pub fn endpoints(&self) -> &[NxfrmInf] {
        &self.nxfrms[..self.nxfrm as usize]
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessFwdAct {
    pub sess_id: u32,
}

/// Two rate three color policer parameters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PolicerCfg {
    pub trtcm: bool,
    pub color_aware: bool,
    /// Packets colored above this are dropped
    pub drop_prio: Color,
    /// Committed burst size in bytes
    pub cbs: u32,
    /// Excess burst size in bytes
    pub ebs: u32,
    /// Committed tokens per micro-second
    pub toksc_pus: u64,
    /// Excess tokens per micro-second
    pub tokse_pus: u64,
}

/// Actions replayed by the flow cache, each owns the slot of its action type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FcAct {
    RmVxlan(RtNhAct),
    RtTunNh(RtNhAct),
    L3RtTunNh(RtNhAct),
    Snat(NatAct),
    Dnat(NatAct),
    NeighL2(RtL2NhAct),
    NeighVxlan(RtL2VxNhAct),
    AddL2Vlan(L2VlanAct),
    RmL2Vlan(L2VlanAct),
}

impl FcAct {
    pub fn act_type(&self) -> ActType {
        match self {
            Self::RmVxlan(_) => ActType::RmVxlan,
            Self::RtTunNh(_) => ActType::RtTunNh,
            Self::L3RtTunNh(_) => ActType::L3RtTunNh,
            Self::Snat(_) => ActType::Snat,
            Self::Dnat(_) => ActType::Dnat,
            Self::NeighL2(_) => ActType::NeighL2,
            Self::NeighVxlan(_) => ActType::NeighVxlan,
            Self::AddL2Vlan(_) => ActType::AddL2Vlan,
            Self::RmL2Vlan(_) => ActType::RmL2Vlan,
        }
    }
}

/// The value of a flow cache entry
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FcActs {
    pub ca: CmnAct,
    /// Creation time (ns)
    pub its: u64,
    pub fcta: [Option<FcAct>; FCV4_MAP_ACTS],
}

impl FcActs {
    pub fn reset(&mut self, now: u64) {
        self.ca.ftrap = false;
        self.ca.cidx = 0;
        self.its = now;
        self.fcta = [None; FCV4_MAP_ACTS];
    }

    pub fn get(&self, act_type: ActType) -> Option<&FcAct> {
        self.fcta.get(act_type as usize).and_then(|a| a.as_ref())
    }

    pub fn set(&mut self, act: FcAct) {
        if let Some(slot) = self.fcta.get_mut(act.act_type() as usize) {
            *slot = Some(act);
        }
    }

    pub fn count(&self) -> usize {
        self.fcta.iter().filter(|a| a.is_some()).count()
    }
}
