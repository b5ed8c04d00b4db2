/// Recoverable allocation failures.
///
/// Both variants guarantee that the node's state is exactly as it was before
/// the failing call. Misuse (double free, freeing a pinned page, registering
/// a misaligned arena) is not reported here; it panics.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PmmError {
    /// The free pool cannot satisfy the request.
    #[error("out of physical memory")]
    NoMemory,
    /// The requested address range or an aligned contiguous run is unavailable.
    #[error("requested physical pages not available")]
    NotFound,
}

pub type PmmResult<T> = Result<T, PmmError>;
