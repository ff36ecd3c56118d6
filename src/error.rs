/// Errors surfaced by the INS command surface.
///
/// Transient sensing problems never show up here; they are absorbed by the
/// filter. Loss of lock is handled internally and reported in the update
/// report instead.
#[derive(thiserror_no_std::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InsError {
    #[error("invalid baud rate")]
    InvalidBaud,
    #[error("invalid argument")]
    InvalidArg,
    #[error("invalid command")]
    InvalidCmd,
    #[error("null pointer")]
    NullPtr,
    #[error("out of heap")]
    OutOfHeap,
    #[error("sensor bus transaction failed after retries")]
    Bus,
    #[error("state transition not permitted")]
    InvalidTransition,
}

impl InsError {
    /// Negative status code as seen by ioctl-style callers.
    pub const fn code(self) -> i32 {
        match self {
            InsError::InvalidBaud => -6,
            InsError::InvalidArg => -5,
            InsError::InvalidCmd => -4,
            InsError::NullPtr => -3,
            InsError::OutOfHeap => -1,
            InsError::Bus => -7,
            InsError::InvalidTransition => -8,
        }
    }
}

/// Reasons an ellipsoid fit is rejected.
#[derive(thiserror_no_std::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalError {
    #[error("need {0} samples for a fit")]
    NotEnoughSamples(usize),
    #[error("fit matrix is singular")]
    Singular,
    #[error("fitted ellipsoid has a non-positive axis")]
    NonPositiveAxis,
    #[error("eigen iteration did not converge")]
    NoConvergence,
    #[error("axis scale does not fit the fixed-point format")]
    ScaleOutOfRange,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_status_table() {
        assert_eq!(InsError::InvalidBaud.code(), -6);
        assert_eq!(InsError::InvalidArg.code(), -5);
        assert_eq!(InsError::InvalidCmd.code(), -4);
        assert_eq!(InsError::NullPtr.code(), -3);
        assert_eq!(InsError::OutOfHeap.code(), -1);
        assert!(InsError::Bus.code() < 0);
        assert!(InsError::InvalidTransition.code() < 0);
    }
}
