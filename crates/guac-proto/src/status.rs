//! Protocol status codes carried by `error` and `ack` instructions.

/// Status of an operation or stream, as reported in-band to the remote
/// display. The numeric ranges group codes by origin: 0x01xx unsupported,
/// 0x02xx server/upstream, 0x03xx client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Status {
    Success = 0x0000,
    Unsupported = 0x0100,
    ServerError = 0x0200,
    ServerBusy = 0x0201,
    UpstreamTimeout = 0x0202,
    UpstreamError = 0x0203,
    ResourceNotFound = 0x0204,
    ResourceConflict = 0x0205,
    ResourceClosed = 0x0206,
    UpstreamNotFound = 0x0207,
    UpstreamUnavailable = 0x0208,
    SessionConflict = 0x0209,
    SessionTimeout = 0x020A,
    SessionClosed = 0x020B,
    ClientBadRequest = 0x0300,
    ClientUnauthorized = 0x0301,
    ClientForbidden = 0x0303,
    ClientTimeout = 0x0308,
    ClientOverrun = 0x030D,
    ClientBadType = 0x030F,
    ClientTooMany = 0x031D,
}

impl Status {
    /// The numeric code sent on the wire.
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Status> {
        use Status::*;
        Some(match code {
            0x0000 => Success,
            0x0100 => Unsupported,
            0x0200 => ServerError,
            0x0201 => ServerBusy,
            0x0202 => UpstreamTimeout,
            0x0203 => UpstreamError,
            0x0204 => ResourceNotFound,
            0x0205 => ResourceConflict,
            0x0206 => ResourceClosed,
            0x0207 => UpstreamNotFound,
            0x0208 => UpstreamUnavailable,
            0x0209 => SessionConflict,
            0x020A => SessionTimeout,
            0x020B => SessionClosed,
            0x0300 => ClientBadRequest,
            0x0301 => ClientUnauthorized,
            0x0303 => ClientForbidden,
            0x0308 => ClientTimeout,
            0x030D => ClientOverrun,
            0x030F => ClientBadType,
            0x031D => ClientTooMany,
            _ => return None,
        })
    }

    /// Whether the status indicates an error attributable to the client.
    pub fn is_client_error(self) -> bool {
        (0x0300..0x0400).contains(&self.code())
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Success => "SUCCESS",
            Status::Unsupported => "UNSUPPORTED",
            Status::ServerError => "SERVER_ERROR",
            Status::ServerBusy => "SERVER_BUSY",
            Status::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            Status::UpstreamError => "UPSTREAM_ERROR",
            Status::ResourceNotFound => "RESOURCE_NOT_FOUND",
            Status::ResourceConflict => "RESOURCE_CONFLICT",
            Status::ResourceClosed => "RESOURCE_CLOSED",
            Status::UpstreamNotFound => "UPSTREAM_NOT_FOUND",
            Status::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            Status::SessionConflict => "SESSION_CONFLICT",
            Status::SessionTimeout => "SESSION_TIMEOUT",
            Status::SessionClosed => "SESSION_CLOSED",
            Status::ClientBadRequest => "CLIENT_BAD_REQUEST",
            Status::ClientUnauthorized => "CLIENT_UNAUTHORIZED",
            Status::ClientForbidden => "CLIENT_FORBIDDEN",
            Status::ClientTimeout => "CLIENT_TIMEOUT",
            Status::ClientOverrun => "CLIENT_OVERRUN",
            Status::ClientBadType => "CLIENT_BAD_TYPE",
            Status::ClientTooMany => "CLIENT_TOO_MANY",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for code in [0x0000, 0x0100, 0x0204, 0x020B, 0x0300, 0x031D] {
            let status = Status::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert!(Status::from_code(0x0299).is_none());
    }

    #[test]
    fn client_range_classified() {
        assert!(Status::ClientOverrun.is_client_error());
        assert!(!Status::UpstreamTimeout.is_client_error());
    }
}
