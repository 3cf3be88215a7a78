use super::ControlLimits;

/// Lock state of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LockStatus {
    /// No usable feedback yet, or feedback was lost.
    Unlocked,
    /// Feedback present, phase error not yet consistently small.
    Acquiring,
    Locked,
}

/// Advances the lock state machine by one valid sample.
///
/// `good` is the running count of consecutive samples below the lock
/// threshold.
pub(super) fn advance(status: LockStatus, good: &mut u32, phase_error: i32, limits: &ControlLimits) -> LockStatus {
    let err = phase_error.unsigned_abs();
    match status {
        LockStatus::Unlocked | LockStatus::Acquiring => {
            if err < limits.lock_threshold {
                *good = good.saturating_add(1);
            } else {
                *good = 0;
            }
            if *good >= limits.lock_sample_count {
                LockStatus::Locked
            } else {
                LockStatus::Acquiring
            }
        }
        LockStatus::Locked => {
            if err > limits.unlock_threshold {
                *good = 0;
                LockStatus::Acquiring
            } else {
                if err < limits.lock_threshold {
                    *good = good.saturating_add(1);
                } else {
                    *good = 0;
                }
                LockStatus::Locked
            }
        }
    }
}
