/// Polls `ready` until it returns `true` or `max_polls` attempts have been made.
///
/// Returns the number of polls it took.
#[inline]
pub(crate) fn poll_until<F>(mut ready: F, max_polls: u32) -> Result<u32, ()>
where
    F: FnMut() -> bool,
{
    for polls in 1..=max_polls {
        if ready() {
            return Ok(polls);
        }
        core::hint::spin_loop();
    }

    Err(())
}

/// Rounds to the nearest whole tick, half away from zero.
///
/// `f32::round` lives in `std`, so this is done by hand. Out-of-range values
/// saturate and NaN maps to zero, as `as` casts do.
#[inline]
pub(crate) fn round_ticks(x: f32) -> i32 {
    let whole = x as i32;
    // exact for every |x| below 2^23; larger values have no fraction
    let frac = x - whole as f32;
    if frac >= 0.5 {
        whole.saturating_add(1)
    } else if frac <= -0.5 {
        whole.saturating_sub(1)
    } else {
        whole
    }
}
