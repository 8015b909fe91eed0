use log::{debug, info};
use loxilb_dp::{ktime_get_ns, pdi::PdiMap, Dataplane};
use std::{fmt, sync::Arc, time::Duration};
use tokio::time;

/// Entries removed by one sweep
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Aged {
    pub fc: usize,
    pub ct: usize,
    pub pdi: usize,
}

impl Aged {
    pub fn total(&self) -> usize {
        self.fc + self.ct + self.pdi
    }
}

impl fmt::Display for Aged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fc: {}, ct: {}, pdi: {}", self.fc, self.ct, self.pdi)
    }
}

/// Ages out the flow cache, the tracked flows and the pdi values
pub fn sweep(dp: &Dataplane, pdi: &PdiMap, now: u64) -> Aged {
    Aged {
        fc: dp.age_fcv4(now),
        ct: dp.age_ctv4(now),
        pdi: pdi.run(now),
    }
}

/// Sweeps every `period` until the task is dropped
pub async fn run(dp: Arc<Dataplane>, pdi: Arc<PdiMap>, period: Duration) {
    info!("[age] sweeping every {:?}", period);
    let mut tick = time::interval(period);
    tick.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        let aged = sweep(&dp, &pdi, ktime_get_ns());
        if aged.total() > 0 {
            info!("[age] removed {}", aged);
        } else {
            debug!("[age] nothing to remove");
        }
    }
}
