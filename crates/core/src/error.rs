/// Errors surfaced by the position engine.
///
/// Validation variants are raised before anything is written. `Internal`
/// wraps storage and lookup failures; the engine never retries them.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FleetError {
    /// Latitude outside [-90, 90] or longitude outside [-180, 180].
    #[error("invalid coordinates: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    /// A request parameter is out of range or malformed (limit, date, interval, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The route cannot be simulated: fewer than two stops or a non-increasing schedule.
    #[error("invalid route: {0}")]
    InvalidRoute(String),

    /// A vehicle, trip, route or sample does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage or lookup failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FleetError {
    pub fn not_found(what: impl Into<String>) -> Self {
        FleetError::NotFound(what.into())
    }

    pub fn invalid_argument(what: impl Into<String>) -> Self {
        FleetError::InvalidArgument(what.into())
    }

    pub fn invalid_route(what: impl Into<String>) -> Self {
        FleetError::InvalidRoute(what.into())
    }

    /// True for errors caused by the caller's input rather than the system.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, FleetError::Internal(_))
    }
}
