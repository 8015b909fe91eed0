use loxilb_common::{
    Color, CtSts, NatFlags, PipeAct, PipeHit, PipeRc, TableId, TcpFlags, TunType,
    MAX_STACKED_VLANS,
};

#[derive(Clone, Copy, Debug, Default)]
pub struct L2Meta {
    pub valid: bool,
    pub dl_dst: [u8; 6],
    pub dl_src: [u8; 6],
    pub dl_type: u16,
    /// VLAN ids of the stacked tags, 0 when not tagged
    pub vlan: [u16; MAX_STACKED_VLANS],
    pub mpls_label: u32,
    pub mpls_tc: u8,
    pub mpls_bos: u8,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct L3Meta {
    pub valid: bool,
    pub tos: u8,
    pub nw_proto: u8,
    pub saddr: u32,
    pub daddr: u32,
    pub saddr6: [u8; 16],
    pub daddr6: [u8; 16],
    /// L4 source port or the ICMP echo id
    pub source: u16,
    /// L4 destination port or the ICMP echo id
    pub dest: u16,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TunMeta {
    pub tun_type: TunType,
    /// VNI or TEID of the received tunnel
    pub tunnel_id: u32,
    /// VNI or TEID of the tunnel to add on egress
    pub new_tunnel_id: u32,
    pub tun_encap: bool,
    pub tun_decap: bool,
    pub tun_rip: u32,
    pub tun_sip: u32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct L4Meta {
    /// NAT translated address, 0 for the hairpin cases
    pub nxip: u32,
    pub nxport: u16,
    pub ct_sts: CtSts,
    /// Selected NAT end-point
    pub sel_aid: u16,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct QosMeta {
    pub tc: u8,
    pub icol: Color,
    pub ocol: Color,
    pub qfi: u8,
    pub polid: u16,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PipeMeta {
    pub pipe_act: PipeAct,
    pub rcode: PipeRc,
    pub tcp_flags: TcpFlags,
    pub itcp_flags: TcpFlags,
    /// Outer flow is finishing (TCP FIN/RST or SCTP shutdown chunks)
    pub l4fin: bool,
    pub il4fin: bool,
    pub nf: NatFlags,
    pub phit: PipeHit,
    pub table_id: TableId,
    /// Frame length as received
    pub py_bytes: u16,
    /// IP length, header included
    pub l3_len: u16,
    pub l3_off: u16,
    /// 0 when the L4 header can't be used
    pub l4_off: u16,
    pub il3_off: u16,
    pub il4_off: u16,
    /// Offset of the tunnel payload
    pub tun_off: u16,
    pub iport: u16,
    pub oport: u16,
    pub zone: u16,
    pub bd: u16,
    pub nh_num: u16,
    pub mirr: u16,
    pub pprop: u8,
    pub rule_id: u32,
    pub sess_id: u32,
    /// MAC used for the egress DMAC lookup
    pub lkup_dmac: [u8; 6],
}

/// Per-packet metadata threaded through all the pipeline stages
#[derive(Clone, Copy, Debug, Default)]
pub struct Xfi {
    pub l2m: L2Meta,
    pub l3m: L3Meta,
    pub il2m: L2Meta,
    pub il3m: L3Meta,
    pub tm: TunMeta,
    pub l4m: L4Meta,
    pub qm: QosMeta,
    pub pm: PipeMeta,
}

impl Xfi {
    #[inline(always)]
    pub fn set_drop(&mut self) {
        self.pm.pipe_act |= PipeAct::DROP;
    }

    #[inline(always)]
    pub fn set_trap(&mut self) {
        self.pm.pipe_act |= PipeAct::TRAP;
    }

    /// Traps the packet with a reason code
    #[inline(always)]
    pub fn set_trapc(&mut self, rc: PipeRc) {
        self.pm.pipe_act |= PipeAct::TRAP;
        self.pm.rcode |= rc;
    }

    #[inline(always)]
    pub fn set_pass(&mut self) {
        self.pm.pipe_act |= PipeAct::PASS;
    }

    #[inline(always)]
    pub fn set_rdr(&mut self) {
        self.pm.pipe_act |= PipeAct::RDR;
    }

    #[inline(always)]
    pub fn set_rdr_prio(&mut self) {
        self.pm.pipe_act |= PipeAct::RDR_PRIO;
    }

    #[inline(always)]
    pub fn set_rewire(&mut self) {
        self.pm.pipe_act |= PipeAct::REWIRE;
    }

    pub fn is_dropped(&self) -> bool {
        self.pm.pipe_act.contains(PipeAct::DROP)
    }

    pub fn has_rdr(&self) -> bool {
        self.pm.pipe_act.intersects(PipeAct::RDR_MASK)
    }

    /// Promotes the inner headers metadata after a tunnel is terminated.
    /// With `l2tun` the inner MAC header replaces the outer one as well.
    pub fn pop_outer_metadata(&mut self, l2tun: bool) {
        self.l3m = self.il3m;
        self.il3m.valid = false;

        self.pm.tcp_flags = self.pm.itcp_flags;
        self.pm.l4fin = self.pm.il4fin;
        self.pm.l3_off = self.pm.il3_off;
        self.pm.l4_off = self.pm.il4_off;
        self.tm.tun_decap = true;

        if l2tun {
            let vlan = self.l2m.vlan;
            self.l2m = self.il2m;
            self.l2m.vlan = vlan;
            self.pm.lkup_dmac = self.il2m.dl_dst;
            self.il2m.valid = false;
        }
    }
}
