//! Shared deterministic types for the test engine core.
//!
//! These types define the contract between assertions, fixtures and the
//! runner. They carry no I/O and no hidden state.

/// Why an assertion stopped the current test.
///
/// Returned as the error half of [`Outcome`]. Receiving one means "this call
/// just caused a new failure or ignore"; the caller must return immediately,
/// which `?` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abort {
    /// The test is now marked failed and its diagnostic has been printed.
    Failed,
    /// The test is now marked ignored.
    Ignored,
}

/// Signal returned by every assertion-evaluating call.
///
/// `Ok(())` means no new failure: either the check passed or the test was
/// already failed/ignored and the check was skipped. Setup, body and teardown
/// functions propagate `Err` with `?` so no statement after a failed check runs.
pub type Outcome = Result<(), Abort>;

/// Counters accumulated across the tests of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    /// Tests that were selected (including ignored registrations).
    pub tests: u32,
    /// Tests concluded as failed.
    pub failures: u32,
    /// Tests concluded as ignored.
    pub ignores: u32,
}

/// Final classification of a concluded test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestVerdict {
    Passed,
    Failed,
    Ignored,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stops_at_first_abort(steps: &[Outcome], ran: &mut usize) -> Outcome {
        for step in steps {
            (*step)?;
            *ran += 1;
        }
        Ok(())
    }

    #[test]
    fn question_mark_short_circuits_remaining_steps() {
        let mut ran = 0;
        let result = stops_at_first_abort(&[Ok(()), Err(Abort::Failed), Ok(())], &mut ran);
        assert_eq!(result, Err(Abort::Failed));
        assert_eq!(ran, 1);
    }

    #[test]
    fn counts_start_at_zero() {
        assert_eq!(
            RunCounts::default(),
            RunCounts {
                tests: 0,
                failures: 0,
                ignores: 0
            }
        );
    }
}
