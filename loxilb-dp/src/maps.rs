//! The dataplane tables and the control plane access to them

use crate::{
    ct::{AclAct, AclTact},
    policer::PolAct,
    tables::{lock, LpmTable, PbStats, StatsTable, Table, TableError, UPDATE_ANY},
};
use log::{debug, info};
use loxilb_common::*;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};

/// Builds the route table key: the zone followed by the address
#[inline(always)]
pub fn rtv4_key(zone: u16, addr: u32) -> u64 {
    (u64::from(zone) << 32) | u64::from(addr)
}

/// All the tables used by the pipeline. The packet path only reads the
/// control plane owned tables; it creates and updates the connection
/// tracking entries in `aclv4` and the flow cache entries in `fcv4`.
pub struct Dataplane {
    pub intf: Table<IntfKey, Tact<IntfAct>>,
    /// Egress port to interface index
    pub tx_intf: Table<u32, u32>,
    pub smac: Table<SmacKey, Tact<SmacAct>>,
    pub tmac: Table<TmacKey, Tact<TmacAct>>,
    pub dmac: Table<DmacKey, Tact<DmacAct>>,
    pub nh: Table<u32, Tact<NhAct>>,
    pub rtv4: LpmTable<Tact<RtAct>>,
    pub mirr: Table<u32, Tact<MirrAct>>,
    pub sess4: Table<SessKey, Tact<SessAct>>,
    pub nat4: Table<NatKey, Tact<NatTact>>,
    pub aclv4: Table<CtKey, AclTact>,
    pub fcv4: Table<FcKey, FcActs>,
    pub pol: Table<u32, PolAct>,

    pub intf_stats: StatsTable,
    pub bd_stats: StatsTable,
    pub tx_intf_stats: StatsTable,
    pub tx_bd_stats: StatsTable,
    pub rtv4_stats: StatsTable,
    pub aclv4_stats: StatsTable,
    pub tmac_stats: StatsTable,
    pub nat4_stats: StatsTable,
    pub sess4_stats: StatsTable,

    counters: [AtomicU64; stats::MAX as usize],
    ct_ctr: Mutex<u32>,
}

impl Default for Dataplane {
    fn default() -> Self {
        Self::new()
    }
}

impl Dataplane {
    pub fn new() -> Self {
        Self {
            intf: Table::new("intf", MAX_INTF_ENTRIES),
            tx_intf: Table::new("tx_intf", MAX_INTERFACES),
            smac: Table::new("smac", MAX_SMAC_ENTRIES),
            tmac: Table::new("tmac", MAX_TMAC_ENTRIES),
            dmac: Table::new("dmac", MAX_DMAC_ENTRIES),
            nh: Table::new("nh", MAX_NH_ENTRIES),
            rtv4: LpmTable::new("rtv4", MAX_RTV4_ENTRIES, RTV4_PREFIX_LEN),
            mirr: Table::new("mirr", MAX_MIRR_ENTRIES),
            sess4: Table::new("sess4", MAX_SESS_ENTRIES),
            nat4: Table::new("nat4", MAX_NATV4_ENTRIES),
            aclv4: Table::new("aclv4", MAX_ACLV4_ENTRIES),
            fcv4: Table::new("fcv4", MAX_FCV4_ENTRIES),
            pol: Table::new("pol", MAX_POL_ENTRIES),

            intf_stats: StatsTable::new("intf_stats", MAX_INTERFACES),
            bd_stats: StatsTable::new("bd_stats", MAX_INTF_ENTRIES),
            tx_intf_stats: StatsTable::new("tx_intf_stats", MAX_INTERFACES),
            tx_bd_stats: StatsTable::new("tx_bd_stats", MAX_INTF_ENTRIES),
            rtv4_stats: StatsTable::new("rtv4_stats", MAX_RTV4_ENTRIES),
            aclv4_stats: StatsTable::new("aclv4_stats", MAX_ACLV4_ENTRIES),
            tmac_stats: StatsTable::new("tmac_stats", MAX_TMAC_ENTRIES),
            nat4_stats: StatsTable::new("nat4_stats", MAX_NATV4_STAT_ENTRIES),
            sess4_stats: StatsTable::new("sess4_stats", MAX_SESS_ENTRIES),

            counters: std::array::from_fn(|_| AtomicU64::new(0)),
            ct_ctr: Mutex::new(0),
        }
    }

    /// The stats table of a stats table id
    pub fn stats(&self, id: TableId) -> Option<&StatsTable> {
        let st = match id {
            TableId::IntfStats => &self.intf_stats,
            TableId::BdStats => &self.bd_stats,
            TableId::TxIntfStats => &self.tx_intf_stats,
            TableId::TxBdStats => &self.tx_bd_stats,
            TableId::Rtv4Stats => &self.rtv4_stats,
            TableId::Aclv4Stats => &self.aclv4_stats,
            TableId::TmacStats => &self.tmac_stats,
            TableId::Nat4Stats => &self.nat4_stats,
            TableId::Sess4Stats => &self.sess4_stats,
            _ => return None,
        };
        Some(st)
    }

    /// Counts a packet of `bytes` at `idx` of the stats table `id`
    #[inline]
    pub fn do_map_stats(&self, id: TableId, idx: u32, bytes: u16) {
        if let Some(st) = self.stats(id) {
            st.inc(idx, u64::from(bytes));
        }
    }

    #[inline(always)]
    pub fn stats_inc(&self, idx: u32) {
        if let Some(c) = self.counters.get(idx as usize) {
            c.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn global_stats(&self) -> [u64; stats::MAX as usize] {
        std::array::from_fn(|i| self.counters[i].load(Ordering::Relaxed))
    }

    /// Allocates the stats indexes of a new connection tracking pair, the
    /// returned index for the forward direction and the next one for the
    /// reverse direction. Both stay below `CT_CTR_MAX_SID`.
    pub fn new_ct_cidx(&self) -> u32 {
        let mut ctr = lock(&self.ct_ctr);
        *ctr = (*ctr + 1) % (CT_CTR_MAX_SID / 2);
        *ctr << 1
    }

    /// Adds or replaces a control plane owned entry. Stats indexes carried
    /// by the new entry start from zero.
    pub fn add(&self, e: MapEntry) -> Result<(), TableError> {
        debug!("[map] add {:?}", e.table_id());
        match e {
            MapEntry::Intf(k, v) => self.intf.insert(k, v, UPDATE_ANY),
            MapEntry::TxIntf(port, ifindex) => self.tx_intf.insert(port, ifindex, UPDATE_ANY),
            MapEntry::Smac(k, v) => self.smac.insert(k, v, UPDATE_ANY),
            MapEntry::Tmac(k, v) => {
                self.tmac_stats.clear(v.ca.cidx);
                self.tmac.insert(k, v, UPDATE_ANY)
            }
            MapEntry::Dmac(k, v) => self.dmac.insert(k, v, UPDATE_ANY),
            MapEntry::Nh(k, v) => self.nh.insert(k, v, UPDATE_ANY),
            MapEntry::Rtv4 {
                zone,
                addr,
                plen,
                act,
            } => {
                self.rtv4_stats.clear(act.ca.cidx);
                self.rtv4.insert(
                    rtv4_key(zone, addr),
                    RTV4_PREFIX_LEN - 32 + plen.min(32),
                    act,
                    UPDATE_ANY,
                )
            }
            MapEntry::Mirr(k, v) => self.mirr.insert(k, v, UPDATE_ANY),
            MapEntry::Sess4(k, v) => {
                self.sess4_stats.clear(v.ca.cidx);
                self.sess4.insert(k, v, UPDATE_ANY)
            }
            MapEntry::Nat4(k, v) => {
                let rid = v.ca.cidx;
                let inactive: Vec<u16> = v
                    .act
                    .endpoints()
                    .iter()
                    .enumerate()
                    .filter(|(_, ep)| ep.inactive)
                    .map(|(aid, _)| aid as u16)
                    .collect();
                self.nat4_stats.clear(rid);
                self.nat4.insert(k, v, UPDATE_ANY)?;
                if !inactive.is_empty() {
                    let n = self.rm_related_ct(rid, &inactive);
                    info!("[map] nat rule {} removed {} flows of inactive end-points", rid, n);
                }
                Ok(())
            }
            MapEntry::Aclv4(k, v) => {
                self.aclv4_stats.clear(v.ca.cidx);
                self.aclv4.insert(k, v, UPDATE_ANY)
            }
            MapEntry::Pol(id, cfg, now) => self.pol.insert(id, PolAct::new(cfg, now), UPDATE_ANY),
        }
    }

    /// Deletes a control plane owned entry. Deleting a NAT rule removes the
    /// tracked flows created for it.
    pub fn del(&self, k: MapKey) -> Result<(), TableError> {
        debug!("[map] del {:?}", k);
        match k {
            MapKey::Intf(k) => self.intf.remove(&k),
            MapKey::TxIntf(port) => self.tx_intf.remove(&port),
            MapKey::Smac(k) => self.smac.remove(&k),
            MapKey::Tmac(k) => self.tmac.remove(&k),
            MapKey::Dmac(k) => self.dmac.remove(&k),
            MapKey::Nh(k) => self.nh.remove(&k),
            MapKey::Rtv4 { zone, addr, plen } => self
                .rtv4
                .remove(rtv4_key(zone, addr), RTV4_PREFIX_LEN - 32 + plen.min(32)),
            MapKey::Mirr(k) => self.mirr.remove(&k),
            MapKey::Sess4(k) => self.sess4.remove(&k),
            MapKey::Nat4(k) => {
                let Some(nat) = self.nat4.lookup(&k) else {
                    return Err(TableError::KeyNotFound(self.nat4.name()));
                };
                self.nat4.remove(&k)?;
                let rid = nat.ca.cidx;
                if rid > 0 {
                    let n = self.aclv4.delete_if(|_, a| match &a.ctd {
                        Some(ctd) if ctd.rid == rid => {
                            self.aclv4_stats.clear(a.ca.cidx);
                            true
                        }
                        _ => false,
                    });
                    self.nat4_stats.clear(rid);
                    info!("[map] nat rule {} removed with {} flow entries", rid, n);
                }
                Ok(())
            }
            MapKey::Aclv4(k) => self.aclv4.remove(&k),
            MapKey::Pol(id) => self.pol.remove(&id),
        }
    }

    /// Removes the tracked flows of rule `rid` bound to one of the
    /// end-points `aids`
    pub fn rm_related_ct(&self, rid: u32, aids: &[u16]) -> usize {
        self.aclv4.delete_if(|k, a| match &a.ctd {
            Some(ctd) if ctd.rid == rid && aids.contains(&ctd.aid) => {
                debug!(
                    "[map] related ct rm {:x}:{} -> {:x}:{} ({})",
                    k.saddr, k.sport, k.daddr, k.dport, k.l4proto
                );
                self.aclv4_stats.clear(a.ca.cidx);
                true
            }
            _ => false,
        })
    }

    /// Policer pass and drop counters
    pub fn pol_stats(&self, id: u32) -> Option<(u64, u64)> {
        self.pol
            .lookup(&id)
            .map(|p| (p.pass_packets, p.drop_packets))
    }

    /// Counters of both directions of the flow `key`
    pub fn ct_stats(&self, key: &CtKey) -> Option<[PbStats; 2]> {
        let a = self.aclv4.lookup(key)?;
        a.ctd.map(|ctd| ctd.pair_state().pb)
    }

    /// Evicts the flow cache entries created more than `FC_V4_CPTO` ago
    pub fn age_fcv4(&self, now: u64) -> usize {
        self.fcv4
            .delete_if(|_, fc| fc.its != 0 && now.saturating_sub(fc.its) > FC_V4_CPTO)
    }

    /// Removes the idle tracked flows. A pair is idle when none of its
    /// entries was hit for the timeout of its state and its counters were
    /// not updated since the previous sweep.
    pub fn age_ctv4(&self, now: u64) -> usize {
        let mut aged = 0;

        for (key, a) in self.aclv4.entries() {
            let Some(ctd) = a.ctd else {
                continue;
            };

            let rev = self.aclv4.lookup(&ctd.peer).filter(|r| r.ctd.is_some());
            let Some(rev) = rev else {
                debug!(
                    "[age] rdir ct4 not found {:x}:{} -> {:x}:{}",
                    ctd.peer.saddr, ctd.peer.sport, ctd.peer.daddr, ctd.peer.dport
                );
                self.aclv4_stats.clear(a.ca.cidx);
                if self.aclv4.remove(&key).is_ok() {
                    aged += 1;
                }
                continue;
            };

            if ctd.dir == CtDir::Out {
                continue;
            }

            let latest = a.lts.max(rev.lts);
            if now < latest {
                continue;
            }

            let to = ctd.pair_state().pi.timeout();
            let used1 = self.aclv4_stats.fetch_used(a.ca.cidx, true);
            let used2 = self.aclv4_stats.fetch_used(rev.ca.cidx, true);

            if now - latest > to && !used1 && !used2 {
                info!(
                    "[age] {:x}:{} -> {:x}:{} ({}) rid {} aged",
                    key.saddr, key.sport, key.daddr, key.dport, key.l4proto, ctd.rid
                );
                self.aclv4_stats.clear(a.ca.cidx);
                self.aclv4_stats.clear(rev.ca.cidx);
                let _ = self.aclv4.remove(&key);
                let _ = self.aclv4.remove(&ctd.peer);
                aged += 2;
            }
        }

        aged
    }
}

/// An entry of a control plane owned table
#[derive(Clone, Debug)]
pub enum MapEntry {
    Intf(IntfKey, Tact<IntfAct>),
    TxIntf(u32, u32),
    Smac(SmacKey, Tact<SmacAct>),
    Tmac(TmacKey, Tact<TmacAct>),
    Dmac(DmacKey, Tact<DmacAct>),
    Nh(u32, Tact<NhAct>),
    /// Route to `addr/plen` in `zone`
    Rtv4 {
        zone: u16,
        addr: u32,
        plen: u8,
        act: Tact<RtAct>,
    },
    Mirr(u32, Tact<MirrAct>),
    Sess4(SessKey, Tact<SessAct>),
    Nat4(NatKey, Tact<NatTact>),
    Aclv4(CtKey, AclTact),
    /// Policer id, configuration and creation time (ns)
    Pol(u32, PolicerCfg, u64),
}

impl MapEntry {
    pub fn table_id(&self) -> TableId {
        match self {
            Self::Intf(..) => TableId::Intf,
            Self::TxIntf(..) => TableId::TxIntf,
            Self::Smac(..) => TableId::Smac,
            Self::Tmac(..) => TableId::Tmac,
            Self::Dmac(..) => TableId::Dmac,
            Self::Nh(..) => TableId::Nh,
            Self::Rtv4 { .. } => TableId::Rtv4,
            Self::Mirr(..) => TableId::Mirror,
            Self::Sess4(..) => TableId::Sess4,
            Self::Nat4(..) => TableId::Nat4,
            Self::Aclv4(..) => TableId::Aclv4,
            Self::Pol(..) => TableId::Pol,
        }
    }

    /// ACL entry set by the control plane
    pub fn acl(key: CtKey, act: AclAct, cidx: u32) -> Self {
        Self::Aclv4(key, AclTact::with_cidx(act, cidx))
    }
}

/// The key of a control plane owned table entry
#[derive(Clone, Copy, Debug)]
pub enum MapKey {
    Intf(IntfKey),
    TxIntf(u32),
    Smac(SmacKey),
    Tmac(TmacKey),
    Dmac(DmacKey),
    Nh(u32),
    Rtv4 { zone: u16, addr: u32, plen: u8 },
    Mirr(u32),
    Sess4(SessKey),
    Nat4(NatKey),
    Aclv4(CtKey),
    Pol(u32),
}
