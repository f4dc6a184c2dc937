use fleetline_core::FleetError;

/// All errors that can be returned by a PositionStore implementation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    /// Latitude outside [-90, 90] or longitude outside [-180, 180]. Nothing was stored.
    #[error("invalid coordinates: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    /// A sample field or query parameter is out of range. Nothing was stored.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No sample has ever been recorded for this vehicle.
    #[error("no position samples for vehicle {vehicle_id}")]
    NotFound { vehicle_id: String },

    /// A backend-specific storage error (connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StorageError> for FleetError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidCoordinates {
                latitude,
                longitude,
            } => FleetError::InvalidCoordinates {
                latitude,
                longitude,
            },
            StorageError::InvalidArgument(msg) => FleetError::InvalidArgument(msg),
            StorageError::NotFound { vehicle_id } => {
                FleetError::NotFound(format!("no position samples for vehicle {vehicle_id}"))
            }
            StorageError::Backend(msg) => FleetError::Internal(msg),
        }
    }
}
