//! NAT rule lookup and the load balancing of the rule end-points

use crate::{hdr::IPPROTO_ICMP, maps::Dataplane, tables::lock, xfi::Xfi};
use log::debug;
use loxilb_common::{NatFlags, NatKey, NatKind, NatSel, NatTact, TableId, MAX_NXFRMS};

const JHASH_INITVAL: u32 = 0xdeadbeef;

/// Final mix of the kernel `jhash` over three words
fn jhash_3words(mut a: u32, mut b: u32, mut c: u32, initval: u32) -> u32 {
    let iv = initval.wrapping_add(JHASH_INITVAL).wrapping_add(3 << 2);
    a = a.wrapping_add(iv);
    b = b.wrapping_add(iv);
    c = c.wrapping_add(iv);

    c ^= b;
    c = c.wrapping_sub(b.rotate_left(14));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(11));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(25));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(16));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(4));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(14));
    c ^= b;
    c.wrapping_sub(b.rotate_left(24))
}

/// Flow hash of the packet, stable for all the packets of a flow and
/// across builds
pub fn pkt_hash(xf: &Xfi) -> u32 {
    let ports = (u32::from(xf.l3m.source) << 16) | u32::from(xf.l3m.dest);
    jhash_3words(
        xf.l3m.saddr,
        xf.l3m.daddr,
        ports,
        u32::from(xf.l3m.nw_proto),
    )
}

/// Selects the end-point of a rule. Round robin starts at the hint and
/// moves it past the selected end-point, hashing falls back to the first
/// active end-point when the hashed one is inactive.
pub fn sel_nat_ep(nat: &mut NatTact, hash: u32) -> Option<usize> {
    let n = usize::from(nat.nxfrm).min(MAX_NXFRMS);
    if n == 0 {
        return None;
    }

    match nat.sel_type {
        NatSel::RoundRobin => {
            let mut i = usize::from(nat.sel_hint) % n;
            for _ in 0..n {
                if !nat.nxfrms[i].inactive {
                    nat.sel_hint = ((i + 1) % n) as u16;
                    return Some(i);
                }
                i = (i + 1) % n;
            }
            None
        }
        NatSel::Hash => {
            let sel = hash as usize % n;
            if !nat.nxfrms[sel].inactive {
                return Some(sel);
            }
            nat.endpoints().iter().position(|ep| !ep.inactive)
        }
        // End-points are kept in priority order
        NatSel::Prio => nat.endpoints().iter().position(|ep| !ep.inactive),
    }
}

/// Looks up the NAT rule of the packet destination service and records
/// the translation of the selected end-point
pub fn nat4_rule_lkup(dp: &Dataplane, xf: &mut Xfi) {
    let key = NatKey {
        daddr: xf.l3m.daddr,
        dport: if xf.l3m.nw_proto != IPPROTO_ICMP {
            xf.l3m.dest
        } else {
            0
        },
        zone: xf.pm.zone,
        l4proto: xf.l3m.nw_proto,
    };
    xf.pm.table_id = TableId::Nat4;

    let Some(entry) = dp.nat4.get(&key) else {
        xf.pm.nf.remove(NatFlags::SRC);
        return;
    };

    let hash = pkt_hash(xf);
    let mut ent = lock(&entry);
    let cidx = ent.ca.cidx;
    let snat = match ent.act.kind {
        NatKind::Snat => true,
        NatKind::Dnat => false,
        NatKind::Drop => {
            xf.set_drop();
            return;
        }
    };

    // The host may know more about the service
    let Some(sel) = sel_nat_ep(&mut ent.act, hash) else {
        debug!("[nat4] {:?} no active end-point", key);
        xf.set_trap();
        return;
    };
    let ep = ent.act.nxfrms[sel];
    drop(ent);

    xf.pm.nf = if snat { NatFlags::SRC } else { NatFlags::DST };
    xf.l4m.nxip = ep.nat_xip;
    xf.l4m.nxport = ep.nat_xport;
    xf.l4m.sel_aid = sel as u16;
    xf.pm.rule_id = cidx;

    // A host reaching itself through the service
    if xf.l3m.saddr == xf.l4m.nxip && xf.pm.nf == NatFlags::DST {
        xf.l4m.nxip = 0;
    }
    debug!("[nat4] {:?} sel {} {:?}", key, sel, xf.pm.nf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hdr::IPPROTO_TCP, maps::MapEntry, testutil::*};
    use loxilb_common::{NxfrmInf, Tact};

    fn ep(ip: u32, inactive: bool) -> NxfrmInf {
        NxfrmInf {
            nat_xip: ip,
            nat_xport: 8080,
            inactive,
            ..Default::default()
        }
    }

    fn service_xf(sport: u16) -> Xfi {
        let mut xf = Xfi::default();
        xf.l3m.saddr = CLIENT_IP;
        xf.l3m.daddr = VIP;
        xf.l3m.source = sport;
        xf.l3m.dest = 80;
        xf.l3m.nw_proto = IPPROTO_TCP;
        xf
    }

    fn service_key() -> NatKey {
        NatKey {
            daddr: VIP,
            dport: 80,
            zone: 0,
            l4proto: IPPROTO_TCP,
        }
    }

    #[test]
    fn test_round_robin_fairness() {
        let eps: Vec<_> = (0..5).map(|i| ep(0x0a000100 + i, false)).collect();
        let mut nat = NatTact::new(NatKind::Dnat, NatSel::RoundRobin, &eps);
        let mut hits = [0u32; 5];
        for m in 0..1003 {
            let sel = sel_nat_ep(&mut nat, 0).unwrap();
            assert_eq!(sel, m % 5);
            hits[sel] += 1;
        }
        assert!(hits.iter().all(|h| (200..=201).contains(h)));
    }

    #[test]
    fn test_round_robin_skips_inactive() {
        let eps = [ep(1, false), ep(2, true), ep(3, false)];
        let mut nat = NatTact::new(NatKind::Dnat, NatSel::RoundRobin, &eps);
        let sels: Vec<_> = (0..4).map(|_| sel_nat_ep(&mut nat, 0).unwrap()).collect();
        assert_eq!(sels, [0, 2, 0, 2]);

        nat.nxfrms[0].inactive = true;
        nat.nxfrms[2].inactive = true;
        assert_eq!(sel_nat_ep(&mut nat, 0), None);
    }

    #[test]
    fn test_hash_fallback() {
        let eps = [ep(1, true), ep(2, false), ep(3, false)];
        let mut nat = NatTact::new(NatKind::Dnat, NatSel::Hash, &eps);
        assert_eq!(sel_nat_ep(&mut nat, 2), Some(2));
        assert_eq!(sel_nat_ep(&mut nat, 3), Some(1));
        assert_eq!(nat.sel_hint, 0);
    }

    #[test]
    fn test_hash_is_per_flow() {
        assert_eq!(pkt_hash(&service_xf(1000)), pkt_hash(&service_xf(1000)));
        assert_ne!(pkt_hash(&service_xf(1000)), pkt_hash(&service_xf(1001)));
    }

    #[test]
    fn test_jhash_fixed_values() {
        assert_eq!(jhash_3words(0, 0, 0, 0), 0x1b68e557);
        assert_eq!(pkt_hash(&service_xf(1000)), 0x4f89c2ab);
        assert_ne!(jhash_3words(1, 2, 3, 6), jhash_3words(1, 2, 3, 17));
        // Spread over a handful of end-points
        let mut hits = [0u32; 4];
        for sport in 0..400u16 {
            hits[pkt_hash(&service_xf(30000 + sport)) as usize % 4] += 1;
        }
        assert!(hits.iter().all(|&h| h > 50), "{hits:?}");
    }

    #[test]
    fn test_rule_lookup() {
        let dp = Dataplane::new();
        dp.add(MapEntry::Nat4(
            service_key(),
            Tact::with_cidx(
                NatTact::new(
                    NatKind::Dnat,
                    NatSel::RoundRobin,
                    &[ep(SERVER_IP, false), ep(CLIENT_IP, false)],
                ),
                9,
            ),
        ))
        .unwrap();

        let mut xf = service_xf(1000);
        nat4_rule_lkup(&dp, &mut xf);
        assert_eq!(xf.pm.nf, NatFlags::DST);
        assert_eq!((xf.l4m.nxip, xf.l4m.nxport), (SERVER_IP, 8080));
        assert_eq!((xf.l4m.sel_aid, xf.pm.rule_id), (0, 9));

        // The client itself is selected next, a hairpin
        let mut xf = service_xf(1001);
        nat4_rule_lkup(&dp, &mut xf);
        assert_eq!((xf.l4m.nxip, xf.l4m.sel_aid), (0, 1));
    }

    #[test]
    fn test_rule_miss_and_drop() {
        let dp = Dataplane::new();
        let mut xf = service_xf(1000);
        xf.pm.nf = NatFlags::SRC;
        nat4_rule_lkup(&dp, &mut xf);
        assert!(xf.pm.nf.is_empty());

        dp.add(MapEntry::Nat4(
            service_key(),
            Tact::new(NatTact::new(NatKind::Drop, NatSel::RoundRobin, &[])),
        ))
        .unwrap();
        let mut xf = service_xf(1000);
        nat4_rule_lkup(&dp, &mut xf);
        assert!(xf.is_dropped());
    }

    #[test]
    fn test_rule_without_active_end_point_traps() {
        let dp = Dataplane::new();
        dp.add(MapEntry::Nat4(
            service_key(),
            Tact::new(NatTact::new(
                NatKind::Dnat,
                NatSel::Hash,
                &[ep(SERVER_IP, true)],
            )),
        ))
        .unwrap();

        let mut xf = service_xf(1000);
        nat4_rule_lkup(&dp, &mut xf);
        assert!(xf.pm.pipe_act.contains(loxilb_common::PipeAct::TRAP));
        assert!(xf.pm.nf.is_empty());
    }
}
