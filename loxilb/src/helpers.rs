use anyhow::anyhow;
use std::net::Ipv4Addr;

pub fn mac_to_str(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Accepts `aa:bb:cc:dd:ee:ff`, `aa-bb-cc-dd-ee-ff` or `aabbccddeeff`
pub fn parse_mac<T: AsRef<str>>(input: T) -> Result<[u8; 6], anyhow::Error> {
    let input = input.as_ref();
    let groups: Vec<&str> = input.split(|c: char| c == ':' || c == '-').collect();
    let octets: Vec<&str> = match groups.len() {
        6 => groups,
        1 if input.len() == 12 && input.is_ascii() => {
            (0..6).map(|i| &input[2 * i..2 * i + 2]).collect()
        }
        _ => return Err(anyhow!("invalid mac address '{}'", input)),
    };

    let mut mac = [0; 6];
    for (b, o) in mac.iter_mut().zip(octets) {
        if o.is_empty() || o.len() > 2 || !o.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(anyhow!("invalid mac address '{}'", input));
        }
        *b = u8::from_str_radix(o, 16)?;
    }
    Ok(mac)
}

pub fn is_unicast_mac(mac: &[u8; 6]) -> bool {
    *mac != [0_u8; 6] && (mac[0] & 0x1) == 0_u8
}

pub fn parse_unicast_mac<T: AsRef<str>>(input: T) -> Result<[u8; 6], anyhow::Error> {
    let mac = parse_mac(input)?;
    if is_unicast_mac(&mac) {
        return Ok(mac);
    }

    Err(anyhow!("Not a unicast address, {}", mac_to_str(&mac)))
}

/// Parses `a.b.c.d/len`, a plain address is a host route
pub fn parse_prefix<T: AsRef<str>>(input: T) -> Result<(u32, u8), anyhow::Error> {
    let input = input.as_ref();
    let (addr, plen) = match input.split_once('/') {
        Some((addr, plen)) => (addr, plen.parse::<u8>()?),
        None => (input, 32),
    };
    if plen > 32 {
        return Err(anyhow!("invalid prefix length in '{}'", input));
    }
    let addr = u32::from(addr.parse::<Ipv4Addr>()?);
    let mask = u32::MAX.checked_shl(32 - u32::from(plen)).unwrap_or(0);
    Ok((addr & mask, plen))
}

pub fn ip_to_str(addr: u32) -> String {
    Ipv4Addr::from(addr).to_string()
}

/// Decodes a frame written as hex digits, whitespace and `:` are ignored
pub fn parse_hex<T: AsRef<str>>(input: T) -> Result<Vec<u8>, anyhow::Error> {
    let digits: Vec<u8> = input
        .as_ref()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .map(|c| {
            c.to_digit(16)
                .map(|d| d as u8)
                .ok_or(anyhow!("non hex digit '{}'", c))
        })
        .collect::<Result<_, _>>()?;

    if digits.len() % 2 != 0 {
        return Err(anyhow!("odd number of hex digits"));
    }
    Ok(digits.chunks(2).map(|p| p[0] << 4 | p[1]).collect())
}

pub fn if_index_to_name(index: u32) -> Option<String> {
    let mut buf = [0 as libc::c_char; libc::IF_NAMESIZE];
    // On success the name is written nul terminated into `buf`
    let name = unsafe { libc::if_indextoname(index, buf.as_mut_ptr()) };
    if name.is_null() {
        return None;
    }
    let name = unsafe { std::ffi::CStr::from_ptr(name) };
    Some(name.to_string_lossy().into_owned())
}

pub fn if_name_or_default(index: u32) -> String {
    if_index_to_name(index).unwrap_or(format!("if#{}", index))
}

/// Resolves an interface name. An index given as `if#<index>` or as a
/// plain number is taken as is, without a host interface behind it.
pub fn ifindex(ifname: &str) -> Result<u32, anyhow::Error> {
    let index = ifname.strip_prefix("if#").unwrap_or(ifname);
    if let Ok(index) = index.parse::<u32>() {
        return Ok(index);
    }

    let name = std::ffi::CString::new(ifname)?;
    match unsafe { libc::if_nametoindex(name.as_ptr()) } {
        0 => Err(anyhow!("No interface named {}", ifname)),
        index => Ok(index),
    }
}
