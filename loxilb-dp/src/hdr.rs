//! Wire formats of the headers handled by the pipeline. All multi-byte
//! fields are big-endian and every struct is byte aligned so it can be
//! viewed at any packet offset.

use zerocopy::network_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const ETH_ALEN: usize = 6;
pub const ETH_HLEN: usize = 14;

pub const ETH_P_IP: u16 = 0x0800;
pub const ETH_P_ARP: u16 = 0x0806;
pub const ETH_P_8021Q: u16 = 0x8100;
pub const ETH_P_8021AD: u16 = 0x88A8;
pub const ETH_P_IPV6: u16 = 0x86DD;
pub const ETH_P_MPLS_UC: u16 = 0x8847;
pub const ETH_P_MPLS_MC: u16 = 0x8848;
/// Internal shim carrying port hints between the host and the pipeline
pub const ETH_TYPE_LLB: u16 = 0x9999;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_SCTP: u8 = 132;

pub const ICMP_ECHOREPLY: u8 = 0;
pub const ICMP_DEST_UNREACH: u8 = 3;
pub const ICMP_REDIRECT: u8 = 5;
pub const ICMP_ECHO: u8 = 8;
pub const ICMP_TIME_EXCEEDED: u8 = 11;

pub const VXLAN_UDP_DPORT: u16 = 4789;
pub const VXLAN_UDP_SPORT: u16 = 4788;
pub const VXLAN_VI_FLAG_ON: u32 = 0x08 << 24;

pub const GTPU_UDP_SPORT: u16 = 2152;
pub const GTPU_UDP_DPORT: u16 = 2152;
pub const GTPC_UDP_DPORT: u16 = 2153;
pub const GTP_VER_1: u8 = 0x1;
/// Extension header flag in the espn bits
pub const GTP_EXT_FM: u8 = 0x4;
pub const GTP_MT_TPDU: u8 = 0xff;
pub const GTP_NH_PDU_SESS: u8 = 0x85;
pub const GTP_PDU_SESS_DL: u8 = 0;
pub const GTP_PDU_SESS_UL: u8 = 1;

pub const VLAN_VID_MASK: u16 = 0x0fff;

pub const IP_MF: u16 = 0x2000;
pub const IP_OFFSET: u16 = 0x1fff;

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct EthHdr {
    pub dst: [u8; ETH_ALEN],
    pub src: [u8; ETH_ALEN],
    pub proto: U16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct VlanHdr {
    pub tci: U16,
    pub encap_proto: U16,
}

/// A MAC header followed by one 802.1Q tag
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct VlanEthHdr {
    pub dst: [u8; ETH_ALEN],
    pub src: [u8; ETH_ALEN],
    pub proto: U16,
    pub tci: U16,
    pub encap_proto: U16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct MplsHdr {
    pub tag: U32,
}

impl MplsHdr {
    pub fn label(&self) -> u32 {
        self.tag.get() >> 12
    }

    pub fn tc(&self) -> u8 {
        ((self.tag.get() >> 9) & 0x7) as u8
    }

    pub fn bos(&self) -> u8 {
        ((self.tag.get() >> 8) & 0x1) as u8
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct ArpHdr {
    /// Hardware address type; e.g. Ethernet 1
    pub htype: U16,
    /// Protocol type, same as EtherType values; e.g. 0x800 for Ipv4
    pub ptype: U16,
    /// Hardware address length; e.g. the Ethernet addr is 6
    pub hlen: u8,
    /// Protocol address length; e.g. the Ipv4 addr is 4
    pub plen: u8,
    /// Operation, 1 for request and 2 for reply
    pub oper: U16,
    /// Sender hw address
    pub sha: [u8; ETH_ALEN],
    /// Sender protocol address
    pub spa: U32,
    /// Target hw address
    pub tha: [u8; ETH_ALEN],
    /// Target protocol address
    pub tpa: U32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct Ipv4Hdr {
    pub ver_ihl: u8,
    pub tos: u8,
    pub tot_len: U16,
    pub id: U16,
    pub frag_off: U16,
    pub ttl: u8,
    pub protocol: u8,
    pub check: U16,
    pub saddr: U32,
    pub daddr: U32,
}

impl Ipv4Hdr {
    /// Header length in bytes
    pub fn hlen(&self) -> usize {
        ((self.ver_ihl & 0xf) as usize) << 2
    }

    pub fn is_fragment(&self) -> bool {
        self.frag_off.get() & (IP_MF | IP_OFFSET) != 0
    }

    pub fn is_first_fragment(&self) -> bool {
        self.frag_off.get() & IP_OFFSET == 0
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct Ipv6Hdr {
    pub vtc_flow: U32,
    pub payload_len: U16,
    pub nexthdr: u8,
    pub hop_limit: u8,
    pub saddr: [u8; 16],
    pub daddr: [u8; 16],
}

impl Ipv6Hdr {
    /// The traffic class with the ECN bits cleared
    pub fn tos(&self) -> u8 {
        ((self.vtc_flow.get() >> 20) as u8) & 0xfc
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct TcpHdr {
    pub source: U16,
    pub dest: U16,
    pub seq: U32,
    pub ack_seq: U32,
    pub doff_res: u8,
    pub flags: u8,
    pub window: U16,
    pub check: U16,
    pub urg_ptr: U16,
}

pub const TCP_FIN: u8 = 0x01;
pub const TCP_SYN: u8 = 0x02;
pub const TCP_RST: u8 = 0x04;
pub const TCP_PSH: u8 = 0x08;
pub const TCP_ACK: u8 = 0x10;
pub const TCP_URG: u8 = 0x20;

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct UdpHdr {
    pub source: U16,
    pub dest: U16,
    pub len: U16,
    pub check: U16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct IcmpHdr {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: U16,
    /// Echo identifier
    pub id: U16,
    /// Echo sequence
    pub sequence: U16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct SctpHdr {
    pub source: U16,
    pub dest: U16,
    /// Verification tag
    pub vtag: U32,
    pub checksum: U32,
}

pub const SCTP_INIT_CHUNK: u8 = 1;
pub const SCTP_INIT_CHUNK_ACK: u8 = 2;
pub const SCTP_ABORT: u8 = 6;
pub const SCTP_SHUT: u8 = 7;
pub const SCTP_SHUT_ACK: u8 = 8;
pub const SCTP_ERROR: u8 = 9;
pub const SCTP_COOKIE_ECHO: u8 = 10;
pub const SCTP_COOKIE_ACK: u8 = 11;
pub const SCTP_SHUT_COMPLETE: u8 = 14;

/// SCTP chunk header
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct SctpChunk {
    pub chunk_type: u8,
    pub flags: u8,
    pub len: U16,
}

impl SctpChunk {
    /// Chunk types ending the association
    pub fn is_finishing(&self) -> bool {
        matches!(
            self.chunk_type,
            SCTP_ERROR | SCTP_ABORT | SCTP_SHUT | SCTP_SHUT_ACK | SCTP_SHUT_COMPLETE
        )
    }
}

/// Body of the INIT and INIT-ACK chunks
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct SctpInitChunk {
    /// Initiate tag
    pub tag: U32,
    pub adv_rwc: U32,
    pub n_ostr: U16,
    pub n_istr: U16,
    pub init_tsn: U32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct SctpCookie {
    pub cookie: U32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct VxlanHdr {
    pub flags: U32,
    /// The VNI is kept in the upper 24 bits
    pub vni: U32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct GtpHdr {
    /// ver(3) | pt(1) | reserved(1) | espn(3)
    pub flags: u8,
    /// Message type
    pub mt: u8,
    /// Length of the payload following the mandatory header
    pub mlen: U16,
    pub teid: U32,
}

impl GtpHdr {
    pub fn ver(&self) -> u8 {
        self.flags >> 5
    }

    pub fn espn(&self) -> u8 {
        self.flags & 0x7
    }
}

/// Optional fields present when any of the espn bits is set
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct GtpExtHdr {
    pub seq: U16,
    pub npdu: u8,
    pub next_hdr: u8,
}

/// PDU session container, the layout of the uplink and downlink variants
/// only differs in the meaning of the upper bits of `qfi`
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct GtpPduSessHdr {
    /// Length in 4-byte units
    pub len: u8,
    /// PDU type in the upper nibble
    pub pdu_type: u8,
    /// ppp(1) | rqi(1) | qfi(6)
    pub qfi: u8,
    pub next_hdr: u8,
}

impl GtpPduSessHdr {
    pub fn pdu_type(&self) -> u8 {
        self.pdu_type >> 4
    }

    pub fn qfi(&self) -> u8 {
        self.qfi & 0x3f
    }
}

/// Shim header placed after the MAC header of packets exchanged with the host
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct LlbShim {
    pub iport: U16,
    pub oport: U16,
    /// Table id of the last lookup before the trap
    pub miss_table: u8,
    /// Reason code
    pub rcode: u8,
    /// Ether type of the frame after the shim
    pub next_eth_type: U16,
}

pub fn is_l2_mcbc(mac: &[u8; ETH_ALEN]) -> bool {
    mac[0] & 0x1 != 0
}
