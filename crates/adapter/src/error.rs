use ethereal_bridge::BridgeError;
use ethereal_core::VenueError;
use ethereal_rounding::RoundingError;

/// Errors returned by the [`crate::Ethereal`] facade, named after the
/// exchange-interface error vocabulary.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("Authentication required: {0}")]
    Authentication(String),
    #[error("Invalid order: {0}")]
    InvalidOrder(String),
    #[error("Order not found: {0}")]
    OrderNotFound(String),
    #[error("Unknown symbol: {0}")]
    BadSymbol(String),
    #[error("Not supported: {0}")]
    NotSupported(String),
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error(transparent)]
    Rounding(#[from] RoundingError),
    #[error(transparent)]
    Bridge(BridgeError),
    #[error("Venue error: {0}")]
    Venue(VenueError),
}

impl From<VenueError> for ExchangeError {
    fn from(err: VenueError) -> Self {
        match err {
            VenueError::Unauthorized(message) => ExchangeError::Authentication(message),
            other => ExchangeError::Venue(other),
        }
    }
}

impl From<BridgeError> for ExchangeError {
    /// Venue failures carried through the bridge surface as venue errors.
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Remote(cause) => match cause.downcast::<VenueError>() {
                Ok(venue) => (*venue).into(),
                Err(other) => ExchangeError::Bridge(BridgeError::Remote(other)),
            },
            other => ExchangeError::Bridge(other),
        }
    }
}

impl ExchangeError {
    /// The venue error behind this one, if any.
    pub fn venue(&self) -> Option<&VenueError> {
        match self {
            ExchangeError::Venue(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_bridge_closed(&self) -> bool {
        matches!(self, ExchangeError::Bridge(BridgeError::BridgeClosed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_venue_error_unwraps() {
        let err: ExchangeError =
            BridgeError::remote(VenueError::NotFound("Order not found".to_string())).into();
        assert!(matches!(err.venue(), Some(VenueError::NotFound(_))));
    }

    #[test]
    fn test_unauthorized_maps_to_authentication() {
        let err: ExchangeError =
            BridgeError::remote(VenueError::Unauthorized("bad signature".to_string())).into();
        assert!(matches!(err, ExchangeError::Authentication(m) if m == "bad signature"));
    }

    #[test]
    fn test_other_remote_errors_stay_bridge_errors() {
        let err: ExchangeError = BridgeError::remote(std::io::Error::other("io")).into();
        assert!(matches!(err, ExchangeError::Bridge(BridgeError::Remote(_))));

        let err: ExchangeError = BridgeError::BridgeClosed.into();
        assert!(err.is_bridge_closed());
    }
}
