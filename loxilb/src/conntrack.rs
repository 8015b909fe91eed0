use crate::{helpers::ip_to_str, info::InfoTable, protocols::Protocol};
use log::info;
use loxilb_common::{CtDir, CtKey, NatFlags, NxfrmInf};
use loxilb_dp::Dataplane;

fn endpoint(addr: u32, port: u16, proto: Protocol) -> String {
    if proto.has_ports() {
        format!("{}:{}", ip_to_str(addr), port)
    } else {
        ip_to_str(addr)
    }
}

fn xlate(xi: &NxfrmInf, proto: Protocol) -> String {
    if xi.nat_flags.contains(NatFlags::DST) {
        format!("dnat {}", endpoint(xi.nat_xip, xi.nat_xport, proto))
    } else if xi.nat_flags.contains(NatFlags::SRC) {
        format!("snat {}", endpoint(xi.nat_xip, xi.nat_xport, proto))
    } else {
        "-".to_string()
    }
}

/// One row per tracked pair, keyed by the direction that created it
pub fn conntrack_table(dp: &Dataplane) -> InfoTable {
    let mut tab = InfoTable::new(vec![
        "proto", "src", "dst", "xlate", "state", "rule", "packets", "bytes",
    ]);
    let mut pairs: Vec<(CtKey, _)> = dp
        .aclv4
        .entries()
        .into_iter()
        .filter_map(|(key, a)| a.ctd.filter(|ctd| ctd.dir == CtDir::In).map(|ctd| (key, ctd)))
        .collect();
    pairs.sort_by_key(|(k, _)| (k.zone, k.saddr, k.sport, k.daddr, k.dport));

    for (key, ctd) in pairs {
        let proto = Protocol::from(key.l4proto);
        let pair = ctd.pair_state();
        tab.push_row(vec![
            proto.to_string(),
            endpoint(key.saddr, key.sport, proto),
            endpoint(key.daddr, key.dport, proto),
            xlate(&ctd.xi, proto),
            pair.pi.to_string(),
            ctd.rid.to_string(),
            format!("{}/{}", pair.pb[0].packets, pair.pb[1].packets),
            format!("{}/{}", pair.pb[0].bytes, pair.pb[1].bytes),
        ]);
    }
    tab
}

pub fn conntrack_list(dp: &Dataplane) {
    conntrack_table(dp).print("Connection tracking IPv4 table");
}

/// Removes every tracked flow, the control plane entries are kept
pub fn remove_all(dp: &Dataplane) -> usize {
    let count = dp.aclv4.delete_if(|_, a| match &a.ctd {
        Some(_) => {
            dp.aclv4_stats.clear(a.ca.cidx);
            true
        }
        None => false,
    });

    info!("[ct] Remove summary, count: {}", count);
    count
}
