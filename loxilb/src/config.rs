use crate::{
    helpers::{ifindex, parse_prefix, parse_unicast_mac},
    protocols::Protocol,
};
use anyhow::{anyhow, Context};
use loxilb_common::{
    Color, CtKey, DmacAct, DmacKey, IntfAct, IntfKey, L2VlanAct, MirrAct, NatKey, NatKind,
    NatSel, NatTact, NhAct, NxfrmInf, PolicerCfg, RdrAct, RtAct, RtL2NhAct, SetIfi, Tact,
    TmacAct, TmacKey, MAX_NXFRMS,
};
use loxilb_dp::{
    ct::AclAct,
    pdi::{Masked, PdiData, PdiFar, PdiKey, PdiRule, Port},
    Dataplane, MapEntry,
};
use serde::Deserialize;
use std::{fs::OpenOptions, io::Read, net::Ipv4Addr, path::Path};

const DEF_AGING_INTERVAL: u64 = 10;

fn def_aging_interval() -> u64 {
    DEF_AGING_INTERVAL
}

#[derive(Deserialize, Debug)]
pub struct Aging {
    /// Seconds between two sweeps
    #[serde(default = "def_aging_interval")]
    pub interval: u64,
}

impl Default for Aging {
    fn default() -> Self {
        Self {
            interval: DEF_AGING_INTERVAL,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IfAction {
    #[default]
    Bind,
    Drop,
    Trap,
}

/// Binds an interface and VLAN to a pipeline port
#[derive(Deserialize, Debug)]
pub struct Interface {
    pub ifname: String,
    #[serde(default)]
    pub vlan: u16,
    pub port: u16,
    #[serde(default)]
    pub zone: u16,
    #[serde(default)]
    pub bd: u16,
    #[serde(default)]
    pub mirror: u16,
    #[serde(default)]
    pub policer: u16,
    #[serde(default)]
    pub action: IfAction,
}

/// The interface a pipeline port transmits on
#[derive(Deserialize, Debug)]
pub struct TxPort {
    pub port: u16,
    pub ifname: String,
}

#[derive(Deserialize, Debug)]
pub struct RouterMac {
    pub mac: String,
    #[serde(default)]
    pub stats_id: u32,
}

#[derive(Deserialize, Debug)]
pub struct Neighbor {
    pub id: u32,
    pub dmac: String,
    pub smac: String,
    pub bd: u16,
}

/// A forwarding database entry, `vlan` tags the egress packets
#[derive(Deserialize, Debug)]
pub struct Fdb {
    pub mac: String,
    pub bd: u16,
    pub port: u16,
    #[serde(default)]
    pub vlan: u16,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RtAction {
    Drop,
    Trap,
}

#[derive(Deserialize, Debug)]
pub struct Route {
    pub prefix: String,
    #[serde(default)]
    pub zone: u16,
    pub nexthop: Option<u16>,
    pub port: Option<u16>,
    pub action: Option<RtAction>,
    #[serde(default)]
    pub stats_id: u32,
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NatMode {
    #[default]
    Dnat,
    Snat,
    Drop,
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NatSelCfg {
    #[default]
    Rr,
    Hash,
    Prio,
}

#[derive(Deserialize, Debug)]
pub struct Endpoint {
    pub ip: Ipv4Addr,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub inactive: bool,
    #[serde(default)]
    pub weight: u16,
}

/// A load balanced service
#[derive(Deserialize, Debug)]
pub struct Nat {
    pub vip: Ipv4Addr,
    #[serde(default)]
    pub port: u16,
    pub proto: Protocol,
    #[serde(default)]
    pub zone: u16,
    #[serde(default)]
    pub mode: NatMode,
    #[serde(default)]
    pub sel: NatSelCfg,
    pub rule_id: u32,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AclAction {
    Forward,
    Drop,
    Trap,
}

#[derive(Deserialize, Debug)]
pub struct Acl {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    #[serde(default)]
    pub sport: u16,
    #[serde(default)]
    pub dport: u16,
    pub proto: Protocol,
    #[serde(default)]
    pub zone: u16,
    pub action: AclAction,
    /// Egress port of forwarded packets, routed when not set
    pub port: Option<u16>,
    #[serde(default)]
    pub stats_id: u32,
}

#[derive(Deserialize, Debug)]
pub struct Mirror {
    pub id: u32,
    pub port: u16,
    #[serde(default)]
    pub vlan: u16,
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColorCfg {
    Green,
    Yellow,
    #[default]
    Red,
}

#[derive(Deserialize, Debug)]
pub struct Policer {
    pub id: u32,
    /// Committed and peak rates in bits per second
    pub cir: u64,
    #[serde(default)]
    pub pir: u64,
    pub cbs: u32,
    #[serde(default)]
    pub ebs: u32,
    #[serde(default)]
    pub trtcm: bool,
    #[serde(default)]
    pub color_aware: bool,
    #[serde(default)]
    pub drop_prio: ColorCfg,
}

/// A packet detection rule, ports are `N` or `MIN-MAX`
#[derive(Deserialize, Debug)]
pub struct Pdi {
    pub dest: Option<String>,
    pub source: Option<String>,
    pub dport: Option<String>,
    pub sport: Option<String>,
    pub proto: Option<Protocol>,
    #[serde(default)]
    pub pref: u32,
    pub rid: u32,
    #[serde(default)]
    pub qfi: u32,
    #[serde(default)]
    pub policer: u16,
    #[serde(default)]
    pub mirror: u16,
    #[serde(default)]
    pub port: u32,
    #[serde(default)]
    pub teid: u32,
}

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub aging: Aging,
    #[serde(default)]
    pub interface: Vec<Interface>,
    #[serde(default)]
    pub tx_port: Vec<TxPort>,
    #[serde(default)]
    pub router_mac: Vec<RouterMac>,
    #[serde(default)]
    pub neighbor: Vec<Neighbor>,
    #[serde(default)]
    pub fdb: Vec<Fdb>,
    #[serde(default)]
    pub route: Vec<Route>,
    #[serde(default)]
    pub nat: Vec<Nat>,
    #[serde(default)]
    pub acl: Vec<Acl>,
    #[serde(default)]
    pub mirror: Vec<Mirror>,
    #[serde(default)]
    pub policer: Vec<Policer>,
    #[serde(default)]
    pub pdi: Vec<Pdi>,
}

fn vlan_act(vlan: u16, oport: u16, tag: u16) -> L2VlanAct {
    L2VlanAct {
        vlan: if tag != 0 { tag } else { vlan },
        oport,
    }
}

fn port_match(input: &str) -> Result<Port, anyhow::Error> {
    match input.split_once('-') {
        Some((min, max)) => Ok(Port::range(min.trim().parse()?, max.trim().parse()?)),
        None => Ok(Port::exact(input.trim().parse()?)),
    }
}

fn addr_match(input: &str) -> Result<Masked<u32>, anyhow::Error> {
    let (addr, plen) = parse_prefix(input)?;
    let mask = u32::MAX.checked_shl(32 - u32::from(plen)).unwrap_or(0);
    Ok(Masked::new(addr, mask))
}

impl Config {
    pub fn parse(contents: &str) -> Result<Self, anyhow::Error> {
        Ok(toml::from_str(contents)?)
    }

    pub fn description(&self) -> String {
        format!(
            "{} interfaces, {} routes, {} neighbors, {} services, {} acls, {} pdi rules",
            self.interface.len(),
            self.route.len(),
            self.neighbor.len(),
            self.nat.len(),
            self.acl.len(),
            self.pdi.len()
        )
    }

    /// The table entries to program, policers are created at `now` (ns)
    pub fn entries(&self, now: u64) -> Result<Vec<MapEntry>, anyhow::Error> {
        let mut entries = vec![];

        for i in &self.interface {
            let act = match i.action {
                IfAction::Drop => IntfAct::Drop,
                IfAction::Trap => IntfAct::ToCp,
                IfAction::Bind => IntfAct::SetIfi(SetIfi {
                    xdp_ifidx: i.port,
                    zone: i.zone,
                    bd: i.bd,
                    mirr: i.mirror,
                    polid: i.policer,
                    pprop: 0,
                }),
            };
            let key = IntfKey {
                ifindex: ifindex(&i.ifname)?,
                ing_vid: i.vlan,
            };
            entries.push(MapEntry::Intf(key, Tact::new(act)));
        }

        for p in &self.tx_port {
            entries.push(MapEntry::TxIntf(u32::from(p.port), ifindex(&p.ifname)?));
        }

        for r in &self.router_mac {
            let key = TmacKey {
                mac: parse_unicast_mac(&r.mac)?,
                ..Default::default()
            };
            entries.push(MapEntry::Tmac(key, Tact::with_cidx(TmacAct::L3En, r.stats_id)));
        }

        for n in &self.neighbor {
            let nh = RtL2NhAct {
                dmac: parse_unicast_mac(&n.dmac)?,
                smac: parse_unicast_mac(&n.smac)?,
                bd: n.bd,
                rnh_num: 0,
            };
            entries.push(MapEntry::Nh(n.id, Tact::new(NhAct::NeighL2(nh))));
        }

        for f in &self.fdb {
            let key = DmacKey {
                dmac: parse_unicast_mac(&f.mac)?,
                bd: f.bd,
            };
            let va = vlan_act(f.bd, f.port, f.vlan);
            let act = if f.vlan != 0 {
                DmacAct::AddL2Vlan(va)
            } else {
                DmacAct::RmL2Vlan(va)
            };
            entries.push(MapEntry::Dmac(key, Tact::new(act)));
        }

        for r in &self.route {
            let (addr, plen) = parse_prefix(&r.prefix)?;
            let act = match (r.action, r.nexthop, r.port) {
                (Some(RtAction::Drop), ..) => RtAct::Drop,
                (Some(RtAction::Trap), ..) => RtAct::ToCp,
                (None, Some(nh), _) => RtAct::RtNhNum(nh),
                (None, None, Some(oport)) => RtAct::RdrPort(RdrAct { oport, fr: false }),
                (None, None, None) => return Err(anyhow!("route {} has no action", r.prefix)),
            };
            entries.push(MapEntry::Rtv4 {
                zone: r.zone,
                addr,
                plen,
                act: Tact::with_cidx(act, r.stats_id),
            });
        }

        for n in &self.nat {
            let kind = match n.mode {
                NatMode::Dnat => NatKind::Dnat,
                NatMode::Snat => NatKind::Snat,
                NatMode::Drop => NatKind::Drop,
            };
            let sel = match n.sel {
                NatSelCfg::Rr => NatSel::RoundRobin,
                NatSelCfg::Hash => NatSel::Hash,
                NatSelCfg::Prio => NatSel::Prio,
            };
            if n.endpoints.len() > MAX_NXFRMS {
                return Err(anyhow!(
                    "service {}:{} has more than {} end-points",
                    n.vip,
                    n.port,
                    MAX_NXFRMS
                ));
            }
            if n.endpoints.is_empty() && kind != NatKind::Drop {
                return Err(anyhow!("service {}:{} has no end-points", n.vip, n.port));
            }
            let eps: Vec<NxfrmInf> = n
                .endpoints
                .iter()
                .map(|ep| NxfrmInf {
                    nat_xip: u32::from(ep.ip),
                    nat_xport: ep.port,
                    inactive: ep.inactive,
                    wprio: ep.weight,
                    ..Default::default()
                })
                .collect();
            let key = NatKey {
                daddr: u32::from(n.vip),
                dport: if n.proto.has_ports() { n.port } else { 0 },
                zone: n.zone,
                l4proto: n.proto as u8,
            };
            entries.push(MapEntry::Nat4(
                key,
                Tact::with_cidx(NatTact::new(kind, sel, &eps), n.rule_id),
            ));
        }

        for a in &self.acl {
            let act = match (a.action, a.port) {
                (AclAction::Drop, _) => AclAct::Drop,
                (AclAction::Trap, _) => AclAct::ToCp,
                (AclAction::Forward, Some(oport)) => AclAct::RdrPort(RdrAct { oport, fr: false }),
                (AclAction::Forward, None) => AclAct::Nop(RdrAct::default()),
            };
            let key = CtKey {
                daddr: u32::from(a.dst),
                saddr: u32::from(a.src),
                sport: a.sport,
                dport: a.dport,
                l4proto: a.proto as u8,
                zone: a.zone,
            };
            entries.push(MapEntry::acl(key, act, a.stats_id));
        }

        for m in &self.mirror {
            let va = vlan_act(0, m.port, m.vlan);
            let act = if m.vlan != 0 {
                MirrAct::AddL2Vlan(va)
            } else {
                MirrAct::RmL2Vlan(va)
            };
            entries.push(MapEntry::Mirr(m.id, Tact::new(act)));
        }

        for p in &self.policer {
            let cfg = PolicerCfg {
                trtcm: p.trtcm,
                color_aware: p.color_aware,
                drop_prio: match p.drop_prio {
                    ColorCfg::Green => Color::Green,
                    ColorCfg::Yellow => Color::Yellow,
                    ColorCfg::Red => Color::Red,
                },
                cbs: p.cbs,
                ebs: p.ebs,
                // Bytes per micro-second
                toksc_pus: p.cir / 8_000_000,
                tokse_pus: p.pir / 8_000_000,
            };
            entries.push(MapEntry::Pol(p.id, cfg, now));
        }

        Ok(entries)
    }

    pub fn pdi_rules(&self) -> Result<Vec<PdiRule>, anyhow::Error> {
        self.pdi
            .iter()
            .map(|p| -> Result<PdiRule, anyhow::Error> {
                let key = PdiKey {
                    dest: p.dest.as_deref().map(addr_match).transpose()?.unwrap_or_default(),
                    source: p.source.as_deref().map(addr_match).transpose()?.unwrap_or_default(),
                    dport: p.dport.as_deref().map(port_match).transpose()?.unwrap_or_default(),
                    sport: p.sport.as_deref().map(port_match).transpose()?.unwrap_or_default(),
                    protocol: p
                        .proto
                        .map(|pr| Masked::exact(pr as u8))
                        .unwrap_or_default(),
                    ..Default::default()
                };
                let data = PdiData {
                    pref: p.pref,
                    rid: p.rid,
                    far: PdiFar {
                        qfi: p.qfi,
                        polid: p.policer,
                        mirrid: p.mirror,
                        port: p.port,
                        teid: p.teid,
                        ..Default::default()
                    },
                };
                Ok(PdiRule::new(key, data))
            })
            .collect()
    }

    /// Programs the dataplane, returns the number of entries added
    pub fn apply(&self, dp: &Dataplane, now: u64) -> Result<usize, anyhow::Error> {
        let entries = self.entries(now)?;
        let count = entries.len();
        for e in entries {
            let id = e.table_id();
            dp.add(e)
                .with_context(|| format!("Failed to add {:?} entry", id))?;
        }
        Ok(count)
    }
}

pub struct ConfigFile {
    path: String,
}

impl ConfigFile {
    pub fn new<S: AsRef<str>>(filename: &S) -> Self {
        Self {
            path: String::from(filename.as_ref()),
        }
    }

    pub fn load(&self) -> Result<Config, anyhow::Error> {
        if !Path::new(&self.path).try_exists()? {
            return Err(anyhow!("Config file does not exist, {}", self.path));
        }
        let mut file = OpenOptions::new()
            .read(true)
            .open(&self.path)
            .context(format!("Can't read config file: {}", self.path))?;
        let mut contents = String::new();
        let size = file.read_to_string(&mut contents)?;

        log::info!("Read {} bytes from: {}", size, self.path);

        let cfg = Config::parse(&contents)?;

        log::info!("Found in config: {}", cfg.description());
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loxilb_common::TableId;

    const LB_CONFIG: &str = r#"
[aging]
interval = 5

[[interface]]
ifname = "if#2"
port = 1
bd = 1

[[tx_port]]
port = 3
ifname = "if#30"

[[router_mac]]
mac = "02:00:00:00:00:fe"

[[neighbor]]
id = 1
dmac = "02:00:00:00:00:02"
smac = "02:00:00:00:00:fe"
bd = 10

[[fdb]]
mac = "02:00:00:00:00:02"
bd = 10
port = 3

[[route]]
prefix = "10.0.1.0/24"
nexthop = 1

[[route]]
prefix = "192.168.0.0/16"
action = "drop"

[[nat]]
vip = "20.20.20.20"
port = 53
proto = "udp"
rule_id = 1
sel = "hash"
endpoints = [{ ip = "10.0.1.2", port = 8053 }, { ip = "10.0.1.3", inactive = true }]

[[acl]]
src = "10.0.0.1"
dst = "20.20.20.21"
dport = 22
proto = "tcp"
action = "trap"

[[policer]]
id = 3
cir = 80000000
cbs = 10000

[[pdi]]
dest = "10.10.10.0/24"
dport = "100-200"
pref = 100
rid = 7
"#;

    #[test]
    fn test_parse_and_convert() {
        let cfg = Config::parse(LB_CONFIG).unwrap();
        assert_eq!(cfg.aging.interval, 5);
        let entries = cfg.entries(0).unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.table_id()).collect();
        assert_eq!(
            ids,
            [
                TableId::Intf,
                TableId::TxIntf,
                TableId::Tmac,
                TableId::Nh,
                TableId::Dmac,
                TableId::Rtv4,
                TableId::Rtv4,
                TableId::Nat4,
                TableId::Aclv4,
                TableId::Pol,
            ]
        );

        match &entries[7] {
            MapEntry::Nat4(key, nat) => {
                assert_eq!((key.daddr, key.dport, key.l4proto), (0x14141414, 53, 17));
                assert_eq!(nat.act.sel_type, NatSel::Hash);
                assert_eq!(nat.ca.cidx, 1);
                let eps = nat.act.endpoints();
                assert_eq!((eps[0].nat_xip, eps[0].nat_xport), (0x0a000102, 8053));
                assert!(eps[1].inactive);
            }
            e => panic!("unexpected {:?}", e),
        }
        match &entries[9] {
            MapEntry::Pol(3, cfg, 0) => {
                assert_eq!(cfg.toksc_pus, 10);
                assert_eq!(cfg.drop_prio, Color::Red);
            }
            e => panic!("unexpected {:?}", e),
        }
    }

    #[test]
    fn test_apply() {
        let dp = Dataplane::new();
        let cfg = Config::parse(LB_CONFIG).unwrap();
        assert_eq!(cfg.apply(&dp, 0).unwrap(), 10);
        assert!(dp.nat4.contains_key(&NatKey {
            daddr: 0x14141414,
            dport: 53,
            zone: 0,
            l4proto: 17,
        }));
        assert_eq!(dp.tx_intf.lookup(&3), Some(30));
    }

    #[test]
    fn test_pdi_rules() {
        let cfg = Config::parse(LB_CONFIG).unwrap();
        let rules = cfg.pdi_rules().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].key.dest, Masked::new(0x0a0a0a00, 0xffffff00));
        assert_eq!(rules[0].key.dport, Port::range(100, 200));
        assert_eq!(rules[0].data.rid, 7);
    }

    #[test]
    fn test_invalid_entries() {
        let cfg = Config::parse("[[route]]\nprefix = \"10.0.0.0/8\"\n").unwrap();
        assert!(cfg.entries(0).is_err());

        let cfg = Config::parse(
            "[[nat]]\nvip = \"1.1.1.1\"\nport = 80\nproto = \"tcp\"\nrule_id = 1\n",
        )
        .unwrap();
        assert!(cfg.entries(0).is_err());

        assert!(Config::parse("[[fdb]]\nmac = 1\n").is_err());
    }
}
