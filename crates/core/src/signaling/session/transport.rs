use crate::config::LowerTransport;

/// Negotiated RTP/RTCP transport for one stream of a session (RFC 2326 §12.39).
///
/// ## Wire format examples
///
/// ```text
/// UDP:
///   C->S  Transport: RTP/AVP;unicast;client_port=8000-8001
///   S->C  Transport: RTP/AVP;unicast;client_port=8000-8001;server_port=5000-5001
///
/// TCP interleaved:
///   C->S  Transport: RTP/AVP/TCP;unicast;interleaved=0-1
///   S->C  Transport: RTP/AVP/TCP;unicast;interleaved=0-1
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Udp {
        /// Client's RTP receive port.
        client_rtp_port: u16,
        /// Client's RTCP receive port (typically `client_rtp_port + 1`).
        client_rtcp_port: u16,
        /// Server's RTP send port (advertised to the client).
        server_rtp_port: u16,
        /// Server's RTCP port (advertised to the client).
        server_rtcp_port: u16,
    },
    Interleaved {
        rtp_channel: u8,
        rtcp_channel: u8,
    },
}

impl Transport {
    /// Value of the `Transport` response header.
    pub fn response_header(&self) -> String {
        match self {
            Self::Udp {
                client_rtp_port,
                client_rtcp_port,
                server_rtp_port,
                server_rtcp_port,
            } => format!(
                "RTP/AVP;unicast;client_port={client_rtp_port}-{client_rtcp_port};server_port={server_rtp_port}-{server_rtcp_port}"
            ),
            Self::Interleaved {
                rtp_channel,
                rtcp_channel,
            } => format!("RTP/AVP/TCP;unicast;interleaved={rtp_channel}-{rtcp_channel}"),
        }
    }
}

/// Client-side transport request parsed from the RTSP `Transport` header.
///
/// The header may list several comma-separated alternatives; the first one
/// that can be understood wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportHeader {
    Udp {
        client_rtp_port: u16,
        client_rtcp_port: u16,
    },
    /// `interleaved` is optional; the server picks channels when absent.
    Interleaved { channels: Option<(u8, u8)> },
}

impl TransportHeader {
    /// Parse the `Transport` header value (RFC 2326 §12.39).
    ///
    /// ## Examples
    ///
    /// ```
    /// use screencast::signaling::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(th, TransportHeader::Udp { client_rtp_port: 8000, client_rtcp_port: 8001 });
    ///
    /// let th = TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=2-3").unwrap();
    /// assert_eq!(th, TransportHeader::Interleaved { channels: Some((2, 3)) });
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        header.split(',').find_map(Self::parse_alternative)
    }

    fn parse_alternative(alt: &str) -> Option<Self> {
        let mut parts = alt.split(';').map(str::trim);
        let profile = parts.next()?;

        if profile.eq_ignore_ascii_case("RTP/AVP/TCP") {
            let channels = parts
                .find_map(|p| p.strip_prefix("interleaved="))
                .and_then(parse_pair::<u8>);
            return Some(Self::Interleaved { channels });
        }

        if profile.eq_ignore_ascii_case("RTP/AVP") || profile.eq_ignore_ascii_case("RTP/AVP/UDP") {
            let (client_rtp_port, client_rtcp_port) = parts
                .find_map(|p| p.strip_prefix("client_port="))
                .and_then(parse_pair::<u16>)?;
            return Some(Self::Udp {
                client_rtp_port,
                client_rtcp_port,
            });
        }

        None
    }

    pub fn lower(&self) -> LowerTransport {
        match self {
            Self::Udp { .. } => LowerTransport::Udp,
            Self::Interleaved { .. } => LowerTransport::Tcp,
        }
    }
}

/// `"a-b"` or `"a"` (which implies `a+1`).
fn parse_pair<T>(value: &str) -> Option<(T, T)>
where
    T: std::str::FromStr + Copy + TryFrom<u32>,
    u32: From<T>,
{
    match value.split_once('-') {
        Some((a, b)) => Some((a.trim().parse().ok()?, b.trim().parse().ok()?)),
        None => {
            let a: T = value.trim().parse().ok()?;
            let b = T::try_from(u32::from(a) + 1).ok()?;
            Some((a, b))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_udp() {
        let th = TransportHeader::parse("RTP/AVP;unicast;client_port=5000-5001").unwrap();
        assert_eq!(
            th,
            TransportHeader::Udp {
                client_rtp_port: 5000,
                client_rtcp_port: 5001
            }
        );
        assert_eq!(th.lower(), LowerTransport::Udp);
    }

    #[test]
    fn parse_no_client_port() {
        assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    }

    #[test]
    fn parse_single_port_implies_rtcp() {
        let th = TransportHeader::parse("RTP/AVP;unicast;client_port=6000").unwrap();
        assert_eq!(
            th,
            TransportHeader::Udp {
                client_rtp_port: 6000,
                client_rtcp_port: 6001
            }
        );
    }

    #[test]
    fn parse_interleaved_without_channels() {
        let th = TransportHeader::parse("RTP/AVP/TCP;unicast").unwrap();
        assert_eq!(th, TransportHeader::Interleaved { channels: None });
        assert_eq!(th.lower(), LowerTransport::Tcp);
    }

    #[test]
    fn first_understood_alternative_wins() {
        let th =
            TransportHeader::parse("RTP/SAVP;unicast;client_port=1-2,RTP/AVP/TCP;interleaved=0-1")
                .unwrap();
        assert_eq!(th, TransportHeader::Interleaved { channels: Some((0, 1)) });
    }

    #[test]
    fn interleaved_channel_overflow() {
        let th = TransportHeader::parse("RTP/AVP/TCP;interleaved=255").unwrap();
        assert_eq!(th, TransportHeader::Interleaved { channels: None });
    }

    #[test]
    fn response_headers() {
        let udp = Transport::Udp {
            client_rtp_port: 8000,
            client_rtcp_port: 8001,
            server_rtp_port: 5000,
            server_rtcp_port: 5001,
        };
        assert_eq!(
            udp.response_header(),
            "RTP/AVP;unicast;client_port=8000-8001;server_port=5000-5001"
        );

        let tcp = Transport::Interleaved {
            rtp_channel: 2,
            rtcp_channel: 3,
        };
        assert_eq!(tcp.response_header(), "RTP/AVP/TCP;unicast;interleaved=2-3");
    }
}
