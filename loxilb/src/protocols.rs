use serde::Deserialize;
use std::fmt;

/// The L4 protocols the dataplane tracks, values as in /etc/protocols
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Any protocol
    #[default]
    None = 0,
    /// Icmp 1 ICMP # internet control message protocol
    Icmp = 1,
    /// Tcp 6 TCP # transmission control protocol
    Tcp = 6,
    /// Udp 17 UDP # user datagram protocol
    Udp = 17,
    /// Sctp 132 SCTP # Stream Control Transmission Protocol
    Sctp = 132,
}

impl Protocol {
    const ALL: [Self; 5] = [Self::None, Self::Icmp, Self::Tcp, Self::Udp, Self::Sctp];

    /// ICMP has no ports, the identifier takes their place in the flow key
    pub fn has_ports(self) -> bool {
        !matches!(self, Self::Icmp | Self::None)
    }
}

impl From<u8> for Protocol {
    fn from(v: u8) -> Self {
        Self::ALL
            .into_iter()
            .find(|p| *p as u8 == v)
            .unwrap_or(Self::None)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "any",
            Self::Icmp => "icmp",
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Sctp => "sctp",
        };
        f.write_str(s)
    }
}
