use thiserror::Error;

/// Error taxonomy for the balancer core.
///
/// `Internal` carries the recovered-panic prefixes (`Balancer.Do:`,
/// `Picker.Pick:`, `Doctor.Ping:`) so callers can still grep for the call
/// boundary a fault came from. A status >= 400 on an otherwise successful
/// exchange ("HttpStatusError") is a liveness-accounting *kind*, not a
/// variant here: the response is still handed back to the caller, so it's
/// carried as a plain `Response` with its status intact rather than boxed
/// into this enum.
#[derive(Debug, Error, Clone)]
pub enum BalancerError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("Picker.Pick: no backend available")]
    NoBackendAvailable,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("Doctor.Ping: {0}")]
    PingFailure(String),

    #[error("{0}")]
    Internal(String),
}
