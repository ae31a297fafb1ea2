#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// The run completed but some attempts failed.
    AttemptsFailed = 10,

    /// Invalid CLI flags or scenario (bad durations, unknown task kinds, impossible splits, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, agents failing a phase, panics caught at top-level).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_failed_attempts(failed: u64) -> Self {
        if failed == 0 {
            Self::Success
        } else {
            Self::AttemptsFailed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_attempts_map_to_10() {
        assert_eq!(ExitCode::from_failed_attempts(0), ExitCode::Success);
        assert_eq!(ExitCode::from_failed_attempts(3).as_i32(), 10);
    }
}
