//! Failover search

/// Next healthy slot after `active`, wrapping around
///
/// Visits `active + 1, active + 2, ..., active` (mod n), so the active slot
/// itself is considered last. Returns `None` when no slot is healthy.
pub fn next_healthy(health: &[bool], active: usize) -> Option<usize> {
    let n = health.len();
    if n == 0 {
        return None;
    }

    (1..=n)
        .map(|offset| (active + offset) % n)
        .find(|&index| health[index])
}
