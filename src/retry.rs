use crate::error::AppError;

/// Upstream HTTP statuses absorbed by the attempt loop when retry
/// budget remains (transient errors / rate limiting).
const RETRYABLE_STATUSES: [u16; 7] = [408, 425, 429, 500, 502, 503, 504];

/// Whether an error observed mid-attempt should consume one retry
/// rather than be surfaced downstream as a terminal SSE error event.
pub fn is_retryable(error: &AppError) -> bool {
    match error {
        AppError::UpstreamStatus { status, .. } => {
            RETRYABLE_STATUSES.contains(&status.as_u16())
        }
        AppError::UpstreamTransport(_) => true,
        AppError::InvalidRequest(_) | AppError::EngineFatal(_) | AppError::Internal(_) => false,
    }
}
