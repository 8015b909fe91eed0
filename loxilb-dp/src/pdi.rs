//! Packet detection rules: prioritized wildcard rules over the flow tuple
//! and the exact flow values learned under each of them.

use log::{debug, info};
use std::{
    collections::HashMap,
    fmt,
    hash::Hash,
    ops::BitAnd,
    sync::{PoisonError, RwLock},
};
use thiserror::Error;

/// Idle time after which a learned value is expired (ns)
pub const PDI_VAL_INACT_TO: u64 = 60_000_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PdiError {
    #[error("pdi entry exists")]
    Exists,
    #[error("no pdi rule matches")]
    NoRule,
    #[error("pdi entry not found")]
    NotFound,
}

pub trait Field: Copy + Default + Eq + Hash + BitAnd<Output = Self> + fmt::LowerHex {
    const ALL: Self;
    const NONE: Self;
}

macro_rules! field {
    ($($t:ty),*) => {
        $(impl Field for $t {
            const ALL: Self = <$t>::MAX;
            const NONE: Self = 0;
        })*
    };
}

field!(u8, u16, u32);

/// A value with the mask of its significant bits. No significant bits
/// matches anything.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Masked<T> {
    pub val: T,
    pub valid: T,
}

impl<T: Field> Masked<T> {
    pub fn new(val: T, valid: T) -> Self {
        Self {
            val: val & valid,
            valid,
        }
    }

    pub fn exact(val: T) -> Self {
        Self {
            val,
            valid: T::ALL,
        }
    }

    pub fn matches(&self, v: T) -> bool {
        self.valid == T::NONE || (v & self.valid) == self.val
    }
}

/// A port match, masked or an inclusive range
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Port {
    Masked(Masked<u16>),
    Range { min: u16, max: u16 },
}

impl Default for Port {
    fn default() -> Self {
        Self::Masked(Masked::default())
    }
}

impl Port {
    pub fn exact(port: u16) -> Self {
        Self::Masked(Masked::exact(port))
    }

    pub fn range(min: u16, max: u16) -> Self {
        Self::Range { min, max }
    }

    /// The port a packet carries
    fn value(&self) -> u16 {
        match self {
            Self::Masked(m) => m.val,
            Self::Range { min, .. } => *min,
        }
    }

    pub fn matches(&self, port: u16) -> bool {
        match self {
            Self::Masked(m) => m.matches(port),
            Self::Range { min, max } => (*min..=*max).contains(&port),
        }
    }
}

/// Rule key when the fields are masked, packet key when they are exact
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PdiKey {
    pub dest: Masked<u32>,
    pub source: Masked<u32>,
    pub dport: Port,
    pub sport: Port,
    pub qos: Masked<u16>,
    pub protocol: Masked<u8>,
    pub dir: Masked<u8>,
    pub ident: Masked<u32>,
}

impl PdiKey {
    /// The key of a packet
    pub fn exact(dest: u32, source: u32, dport: u16, sport: u16, protocol: u8) -> Self {
        Self {
            dest: Masked::exact(dest),
            source: Masked::exact(source),
            dport: Port::exact(dport),
            sport: Port::exact(sport),
            protocol: Masked::exact(protocol),
            ..Default::default()
        }
    }

    /// True if the packet key `pkt` falls under this rule key
    pub fn matches(&self, pkt: &PdiKey) -> bool {
        self.dest.matches(pkt.dest.val)
            && self.source.matches(pkt.source.val)
            && self.dport.matches(pkt.dport.value())
            && self.sport.matches(pkt.sport.value())
            && self.qos.matches(pkt.qos.val)
            && self.protocol.matches(pkt.protocol.val)
            && self.dir.matches(pkt.dir.val)
            && self.ident.matches(pkt.ident.val)
    }
}

impl fmt::Display for PdiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn masked<T: Field>(f: &mut fmt::Formatter<'_>, name: &str, m: &Masked<T>) -> fmt::Result {
            if m.valid != T::NONE {
                write!(f, "{}:{:#x},", name, m.val & m.valid)?;
            }
            Ok(())
        }
        fn port(f: &mut fmt::Formatter<'_>, name: &str, p: &Port) -> fmt::Result {
            match p {
                Port::Masked(m) => masked(f, name, m),
                Port::Range { min, max } => write!(f, "{}:{}-{},", name, min, max),
            }
        }

        masked(f, "dest", &self.dest)?;
        masked(f, "source", &self.source)?;
        port(f, "dport", &self.dport)?;
        port(f, "sport", &self.sport)?;
        masked(f, "qos", &self.qos)?;
        masked(f, "prot", &self.protocol)?;
        masked(f, "dir", &self.dir)?;
        masked(f, "ident", &self.ident)
    }
}

/// Forwarding applied to the packets of a rule
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PdiFar {
    pub qfi: u32,
    pub polid: u16,
    pub qid: u16,
    pub mirrid: u16,
    pub port: u32,
    pub teid: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PdiData {
    /// Rules with a higher preference are matched first
    pub pref: u32,
    pub rid: u32,
    pub far: PdiFar,
}

#[derive(Clone, Debug, Default)]
pub struct PdiRule {
    pub key: PdiKey,
    pub data: PdiData,
    /// Learned packet keys and the last time they were seen (ns)
    vals: HashMap<PdiKey, u64>,
}

impl PdiRule {
    pub fn new(key: PdiKey, data: PdiData) -> Self {
        Self {
            key,
            data,
            vals: HashMap::new(),
        }
    }

    pub fn vals(&self) -> usize {
        self.vals.len()
    }
}

/// Installs and removes the learned values in the packet path
pub trait PdiOps: Send + Sync {
    fn add(&self, key: &PdiKey, data: &PdiData);
    fn del(&self, key: &PdiKey);
}

/// The rules ordered by decreasing preference. Rules of the same
/// preference keep their insertion order.
#[derive(Default)]
pub struct PdiMap {
    rules: RwLock<Vec<PdiRule>>,
    ops: Option<Box<dyn PdiOps>>,
}

impl PdiMap {
    pub fn new(ops: Option<Box<dyn PdiOps>>) -> Self {
        Self {
            rules: RwLock::new(vec![]),
            ops,
        }
    }

    pub fn insert(&self, rule: PdiRule) -> Result<(), PdiError> {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        let pref = rule.data.pref;

        if rules
            .iter()
            .any(|r| r.data.pref == pref && r.key == rule.key)
        {
            return Err(PdiError::Exists);
        }

        let pos = rules
            .iter()
            .position(|r| pref > r.data.pref)
            .unwrap_or(rules.len());
        debug!("[pdi] ({}){} at {}", rule.key, pref, pos);
        rules.insert(pos, rule);
        Ok(())
    }

    /// Removes the rule and every value learned under it
    pub fn delete(&self, key: &PdiKey, pref: u32) -> Result<(), PdiError> {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        let Some(pos) = rules
            .iter()
            .position(|r| r.data.pref == pref && r.key == *key)
        else {
            return Err(PdiError::NotFound);
        };

        let rule = rules.remove(pos);
        info!("[pdi] ({}){} deleted", rule.key, pref);
        if let Some(ops) = &self.ops {
            rule.vals.keys().for_each(|v| ops.del(v));
        }
        Ok(())
    }

    /// The data of the first rule matching the packet key
    pub fn get(&self, pkt: &PdiKey) -> Option<PdiData> {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        rules.iter().find(|r| r.key.matches(pkt)).map(|r| r.data)
    }

    /// Learns the packet key under its rule. A known key is refreshed and
    /// installed again.
    pub fn add_val(&self, pkt: &PdiKey, now: u64) -> Result<(), PdiError> {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        let rule = rules
            .iter_mut()
            .find(|r| r.key.matches(pkt))
            .ok_or(PdiError::NoRule)?;

        let known = rule.vals.insert(*pkt, now).is_some();
        if let Some(ops) = &self.ops {
            ops.add(pkt, &rule.data);
        }
        if known {
            return Err(PdiError::Exists);
        }
        debug!("[pdi] {} learned by rule {}", pkt, rule.data.rid);
        Ok(())
    }

    pub fn del_val(&self, pkt: &PdiKey) -> Result<(), PdiError> {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        let rule = rules
            .iter_mut()
            .find(|r| r.key.matches(pkt))
            .ok_or(PdiError::NoRule)?;

        rule.vals.remove(pkt).ok_or(PdiError::NotFound)?;
        if let Some(ops) = &self.ops {
            ops.del(pkt);
        }
        Ok(())
    }

    /// Expires the values idle for more than `PDI_VAL_INACT_TO` and
    /// returns how many were removed
    pub fn run(&self, now: u64) -> usize {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        let mut expired = 0;

        for rule in rules.iter_mut() {
            rule.vals.retain(|v, lts| {
                if now.saturating_sub(*lts) <= PDI_VAL_INACT_TO {
                    return true;
                }
                info!("[pdi] expired {}", v);
                if let Some(ops) = &self.ops {
                    ops.del(v);
                }
                expired += 1;
                false
            });
        }
        expired
    }

    /// Rules in match order as `(key, data, learned values)`
    pub fn rules(&self) -> Vec<(PdiKey, PdiData, usize)> {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        rules.iter().map(|r| (r.key, r.data, r.vals())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    const SEC: u64 = 1_000_000_000;

    #[derive(Default)]
    struct Recorder {
        added: Mutex<Vec<PdiKey>>,
        deleted: Mutex<Vec<PdiKey>>,
    }

    impl PdiOps for Arc<Recorder> {
        fn add(&self, key: &PdiKey, _data: &PdiData) {
            self.added.lock().unwrap().push(*key);
        }

        fn del(&self, key: &PdiKey) {
            self.deleted.lock().unwrap().push(*key);
        }
    }

    fn subnet_rule(dport: Port, pref: u32) -> PdiRule {
        PdiRule::new(
            PdiKey {
                dest: Masked::new(0x0a0a0a0a, 0xffffff00),
                dport,
                ..Default::default()
            },
            PdiData {
                pref,
                rid: pref + 1,
                ..Default::default()
            },
        )
    }

    fn pkt(dport: u16, sport: u16) -> PdiKey {
        PdiKey::exact(0x0a0a0a0a, 0x0b0b0b0b, dport, sport, 17)
    }

    #[test]
    fn test_masked_match() {
        let m = Masked::new(0x0a0a0a0au32, 0xffffff00);
        assert_eq!(m.val, 0x0a0a0a00);
        assert!(m.matches(0x0a0a0aff));
        assert!(!m.matches(0x0a0a0b01));
        assert!(Masked::<u8>::default().matches(6));
        assert!(Port::range(100, 200).matches(200));
        assert!(!Port::range(100, 200).matches(201));
    }

    #[test]
    fn test_rules_ordered_by_pref() {
        let map = PdiMap::default();
        map.insert(subnet_rule(Port::range(100, 200), 0)).unwrap();
        map.insert(subnet_rule(Port::range(100, 200), 100)).unwrap();
        map.insert(subnet_rule(Port::Masked(Masked::new(100, 0xffff)), 0))
            .unwrap();
        assert_eq!(
            map.insert(subnet_rule(Port::Masked(Masked::new(100, 0xffff)), 0)),
            Err(PdiError::Exists)
        );

        let prefs: Vec<_> = map.rules().iter().map(|r| r.1.pref).collect();
        assert_eq!(prefs, [100, 0, 0]);
        assert_eq!(map.get(&pkt(150, 1)).map(|d| d.rid), Some(101));

        map.delete(&subnet_rule(Port::range(100, 200), 100).key, 100)
            .unwrap();
        assert_eq!(map.get(&pkt(150, 1)).map(|d| d.rid), Some(1));
        assert_eq!(map.get(&pkt(100, 1)).map(|d| d.rid), Some(1));
        assert_eq!(map.get(&pkt(300, 1)), None);
        assert_eq!(
            map.delete(&subnet_rule(Port::range(100, 200), 100).key, 100),
            Err(PdiError::NotFound)
        );
    }

    #[test]
    fn test_learned_values() {
        let rec = Arc::new(Recorder::default());
        let map = PdiMap::new(Some(Box::new(rec.clone())));
        let mut rule = subnet_rule(Port::range(500, 600), 0);
        rule.key.source = Masked::new(0x0b0b0b00, 0xffffff00);
        rule.key.sport = Port::range(500, 600);
        let key = rule.key;
        map.insert(rule).unwrap();

        map.add_val(&pkt(501, 501), 0).unwrap();
        map.add_val(&pkt(502, 502), 0).unwrap();
        assert_eq!(map.add_val(&pkt(502, 502), SEC), Err(PdiError::Exists));
        assert_eq!(map.add_val(&pkt(700, 501), 0), Err(PdiError::NoRule));
        assert_eq!(rec.added.lock().unwrap().len(), 3);
        assert_eq!(map.rules()[0].2, 2);

        map.del_val(&pkt(501, 501)).unwrap();
        assert_eq!(map.del_val(&pkt(501, 501)), Err(PdiError::NotFound));

        map.delete(&key, 0).unwrap();
        assert_eq!(*rec.deleted.lock().unwrap(), [pkt(501, 501), pkt(502, 502)]);
    }

    #[test]
    fn test_idle_values_expire() {
        let map = PdiMap::default();
        map.insert(subnet_rule(Port::range(1, 1000), 0)).unwrap();
        map.add_val(&pkt(10, 1), 0).unwrap();
        map.add_val(&pkt(20, 1), 30 * SEC).unwrap();

        assert_eq!(map.run(PDI_VAL_INACT_TO), 0);
        assert_eq!(map.run(PDI_VAL_INACT_TO + 1), 1);
        assert_eq!(map.rules()[0].2, 1);
        assert_eq!(map.run(100 * SEC), 1);
    }

    #[test]
    fn test_key_display() {
        let r = subnet_rule(Port::range(100, 200), 0);
        assert_eq!(r.key.to_string(), "dest:0xa0a0a00,dport:100-200,");
    }
}
