//! Link types and the demotion chain used when converting packets to ERF.
//!
//! ERF only has record types for a handful of link layers. Packets captured
//! on anything else are walked down an explicit chain of simpler
//! representations (strip a pseudo-header, rebuild a plain Ethernet header)
//! until one of them has an ERF type or the chain runs out.

use std::borrow::Cow;

use super::record::erf_type;

/// Link-layer type of a packet, independent of the trace format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    /// Ethernet II
    Ethernet,
    /// PPP/Cisco HDLC over SONET
    HdlcPos,
    /// Raw ATM cells
    Atm,
    /// Reassembled AAL5 frames
    Aal5,
    /// Raw IP, no link-layer header
    None,
    /// Linux cooked capture
    LinuxSll,
    /// OpenBSD packet filter log
    Pflog,
    /// IEEE 802.11 without radio headers
    Ieee80211,
    /// IEEE 802.11 with a Prism monitoring header
    Ieee80211Prism,
    /// IEEE 802.11 with a radiotap header
    Ieee80211Radiotap,
}

/// pcap DLT values understood by [`LinkType::from_dlt`].
pub mod dlt {
    pub const EN10MB: u16 = 1;
    pub const RAW: u16 = 12;
    pub const C_HDLC: u16 = 104;
    pub const IEEE802_11: u16 = 105;
    pub const LINUX_SLL: u16 = 113;
    pub const PFLOG: u16 = 117;
    pub const PRISM_HEADER: u16 = 119;
    pub const IEEE802_11_RADIO: u16 = 127;
    pub const RAW_ALT: u16 = 101;
}

/// ARPHRD value for Ethernet in a Linux SLL header.
const ARPHRD_ETHER: u16 = 1;

/// Linux SLL header length in bytes.
pub const LINUX_SLL_HEADER_LEN: usize = 16;

/// Prism monitoring header length in bytes.
pub const PRISM_HEADER_LEN: usize = 144;

/// Ethernet header length in bytes.
const ETHERNET_HEADER_LEN: usize = 14;

impl LinkType {
    /// Map an ERF record type to a link type.
    pub fn from_erf_type(code: u8) -> Option<Self> {
        match code {
            erf_type::HDLC_POS => Some(LinkType::HdlcPos),
            erf_type::ETH => Some(LinkType::Ethernet),
            erf_type::ATM => Some(LinkType::Atm),
            erf_type::AAL5 => Some(LinkType::Aal5),
            _ => None,
        }
    }

    /// ERF record type for this link type, if ERF has one.
    pub fn to_erf_type(self) -> Option<u8> {
        match self {
            LinkType::HdlcPos => Some(erf_type::HDLC_POS),
            LinkType::Ethernet => Some(erf_type::ETH),
            LinkType::Atm => Some(erf_type::ATM),
            LinkType::Aal5 => Some(erf_type::AAL5),
            _ => None,
        }
    }

    /// Map a pcap data-link type to a link type.
    pub fn from_dlt(value: u16) -> Option<Self> {
        match value {
            dlt::EN10MB => Some(LinkType::Ethernet),
            dlt::RAW | dlt::RAW_ALT => Some(LinkType::None),
            dlt::C_HDLC => Some(LinkType::HdlcPos),
            dlt::IEEE802_11 => Some(LinkType::Ieee80211),
            dlt::LINUX_SLL => Some(LinkType::LinuxSll),
            dlt::PFLOG => Some(LinkType::Pflog),
            dlt::PRISM_HEADER => Some(LinkType::Ieee80211Prism),
            dlt::IEEE802_11_RADIO => Some(LinkType::Ieee80211Radiotap),
            _ => None,
        }
    }

    /// Alignment padding ERF inserts between header and payload.
    #[inline]
    pub fn erf_padding(self) -> usize {
        match self {
            LinkType::Ethernet => 2,
            _ => 0,
        }
    }
}

/// One step of the demotion chain: a link type and the frame bytes in that
/// representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demotion<'a> {
    pub link_type: LinkType,
    pub frame: Cow<'a, [u8]>,
}

impl<'a> Demotion<'a> {
    pub fn new(link_type: LinkType, frame: &'a [u8]) -> Self {
        Self {
            link_type,
            frame: Cow::Borrowed(frame),
        }
    }

    /// The next, simpler representation of this frame, if there is one.
    pub fn demote(&self) -> Option<Demotion<'a>> {
        let frame = self.frame.as_ref();
        match self.link_type {
            LinkType::LinuxSll => {
                if frame.len() < LINUX_SLL_HEADER_LEN {
                    return None;
                }
                let hatype = u16::from_be_bytes([frame[2], frame[3]]);
                let halen = u16::from_be_bytes([frame[4], frame[5]]);
                let payload = &frame[LINUX_SLL_HEADER_LEN..];
                if hatype == ARPHRD_ETHER && halen == 6 {
                    // Cooked headers only carry the sender address
                    let mut eth = Vec::with_capacity(ETHERNET_HEADER_LEN + payload.len());
                    eth.extend_from_slice(&[0u8; 6]);
                    eth.extend_from_slice(&frame[6..12]);
                    eth.extend_from_slice(&frame[14..16]);
                    eth.extend_from_slice(payload);
                    Some(Demotion {
                        link_type: LinkType::Ethernet,
                        frame: Cow::Owned(eth),
                    })
                } else {
                    Some(self.strip(LINUX_SLL_HEADER_LEN, LinkType::None))
                }
            }
            LinkType::Pflog => {
                let hdrlen = *frame.first()? as usize;
                // BPF_WORDALIGN
                let aligned = (hdrlen + 3) & !3;
                if aligned == 0 || frame.len() < aligned {
                    return None;
                }
                Some(self.strip(aligned, LinkType::None))
            }
            LinkType::Ieee80211Prism => {
                if frame.len() < PRISM_HEADER_LEN {
                    return None;
                }
                Some(self.strip(PRISM_HEADER_LEN, LinkType::Ieee80211))
            }
            LinkType::Ieee80211Radiotap => {
                if frame.len() < 4 {
                    return None;
                }
                let it_len = u16::from_le_bytes([frame[2], frame[3]]) as usize;
                if it_len < 4 || frame.len() < it_len {
                    return None;
                }
                Some(self.strip(it_len, LinkType::Ieee80211))
            }
            _ => None,
        }
    }

    fn strip(&self, len: usize, link_type: LinkType) -> Demotion<'a> {
        let frame = match &self.frame {
            Cow::Borrowed(b) => Cow::Borrowed(&b[len..]),
            Cow::Owned(v) => Cow::Owned(v[len..].to_vec()),
        };
        Demotion { link_type, frame }
    }
}

/// Walk the demotion chain until a representation with an ERF type appears.
///
/// Returns the ERF type together with the representation it applies to, or
/// the last link type tried when the chain is exhausted.
pub fn find_erf_representation(
    start: Demotion<'_>,
) -> std::result::Result<(u8, Demotion<'_>), LinkType> {
    let mut last = start.link_type;
    for step in std::iter::successors(Some(start), |d| d.demote()) {
        last = step.link_type;
        if let Some(code) = step.link_type.to_erf_type() {
            return Ok((code, step));
        }
        tracing::debug!("no ERF type for {:?}, demoting", step.link_type);
    }
    Err(last)
}
