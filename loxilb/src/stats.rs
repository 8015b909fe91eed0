use crate::info::InfoTable;
use loxilb_common::{stats, TableId};
use loxilb_dp::Dataplane;

static STATS_NAMES: [&str; stats::MAX as usize] = [
    "packets",
    "drops",
    "traps",
    "passes",
    "redirects",
    "rewires",
    "fc_hits",
    "fc_misses",
    "fc_inserts",
    "ct_new",
    "parser_drops",
    "redirect_errors",
    "deparse_errors",
];

/// The per entry counters shown by `print_tables`
const STATS_TABLES: [TableId; 9] = [
    TableId::IntfStats,
    TableId::BdStats,
    TableId::TxIntfStats,
    TableId::TxBdStats,
    TableId::TmacStats,
    TableId::Rtv4Stats,
    TableId::Aclv4Stats,
    TableId::Nat4Stats,
    TableId::Sess4Stats,
];

pub struct Stats<'a> {
    dp: &'a Dataplane,
}

impl<'a> Stats<'a> {
    pub fn new(dp: &'a Dataplane) -> Self {
        Self { dp }
    }

    pub fn as_str(stat_idx: u32) -> &'static str {
        STATS_NAMES[stat_idx as usize]
    }

    pub fn global(&self) -> InfoTable {
        let mut sinfo = InfoTable::new(vec!["stat", "count"]);
        for (idx, value) in self.dp.global_stats().iter().enumerate() {
            sinfo.push_row(vec![Self::as_str(idx as u32).to_string(), value.to_string()]);
        }
        sinfo
    }

    /// The used counters of every stats table
    pub fn tables(&self) -> InfoTable {
        let mut sinfo = InfoTable::new(vec!["table", "index", "packets", "bytes"]);
        for id in STATS_TABLES {
            let Some(st) = self.dp.stats(id) else {
                continue;
            };
            for (idx, pb) in st.entries() {
                sinfo.push_row(vec![
                    st.name().to_string(),
                    idx.to_string(),
                    pb.packets.to_string(),
                    pb.bytes.to_string(),
                ]);
            }
        }

        let mut pols = self.dp.pol.entries();
        pols.sort_by_key(|(id, _)| *id);
        for (id, _) in pols {
            if let Some((pass, drop)) = self.dp.pol_stats(id) {
                sinfo.push_row(vec![
                    "policer".to_string(),
                    id.to_string(),
                    format!("{}/{}", pass, drop),
                    String::new(),
                ]);
            }
        }
        sinfo
    }

    pub fn print_all(&self) {
        self.global().print("");
        let tables = self.tables();
        if !tables.is_empty() {
            tables.print("");
        }
    }
}
