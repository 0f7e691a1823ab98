use super::stats::Statistics;

/// Total penalty of a node without statistics or marked unavailable.
///
/// Such a node is still a candidate, just the worst possible one.
pub const SENTINEL_PENALTY: i32 = i32::MAX - 1;

/// Penalties derived from a node's statistics.
///
/// Always computed fresh from the latest snapshot; never cached between
/// selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadBalancer {
    pub player_penalty: i32,
    pub cpu_penalty: i32,
    pub deficit_frame_penalty: i32,
    pub null_frame_penalty: i32,
    total: i32,
}

impl LoadBalancer {
    pub fn compute(stats: Option<&Statistics>, available: bool) -> Self {
        let stats = match stats {
            Some(stats) if available => stats,
            _ => return Self::unusable(),
        };

        let player_penalty = saturate(f64::from(stats.playing_players));
        let cpu_penalty = saturate((1.05f64.powf(100.0 * stats.cpu.system_load) * 10.0).floor()) - 10;

        let (deficit_frame_penalty, null_frame_penalty) = match &stats.frame_stats {
            Some(frames) => {
                let deficit =
                    saturate((1.03f64.powf(500.0 * (frames.deficit / 3000.0)) * 600.0).floor()) - 600;
                let nulled =
                    (saturate((1.03f64.powf(500.0 * (frames.nulled / 3000.0)) * 300.0).floor()) - 300)
                        .saturating_mul(2);
                (deficit, nulled)
            }
            None => (0, 0),
        };

        // A live node always ranks ahead of the sentinel, however loaded.
        let total = player_penalty
            .saturating_add(cpu_penalty)
            .saturating_add(deficit_frame_penalty)
            .saturating_add(null_frame_penalty)
            .min(SENTINEL_PENALTY - 1);

        Self {
            player_penalty,
            cpu_penalty,
            deficit_frame_penalty,
            null_frame_penalty,
            total,
        }
    }

    fn unusable() -> Self {
        Self {
            player_penalty: 0,
            cpu_penalty: 0,
            deficit_frame_penalty: 0,
            null_frame_penalty: 0,
            total: SENTINEL_PENALTY,
        }
    }

    pub fn total(&self) -> i32 {
        self.total
    }

    pub fn is_sentinel(&self) -> bool {
        self.total == SENTINEL_PENALTY
    }
}

// `as` saturates on overflow and maps NaN to 0.
fn saturate(value: f64) -> i32 {
    value as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::stats::{Cpu, Frames, Memory};

    fn stats(playing: u32, system_load: f64, frames: Option<(f64, f64)>) -> Statistics {
        Statistics {
            players: playing,
            playing_players: playing,
            uptime: 0,
            memory: Memory {
                free: 0,
                used: 0,
                allocated: 0,
                reservable: 0,
            },
            cpu: Cpu {
                cores: 4,
                system_load,
                lavalink_load: 0.0,
            },
            frame_stats: frames.map(|(nulled, deficit)| Frames {
                sent: 3000.0,
                nulled,
                deficit,
            }),
        }
    }

    #[test]
    fn idle_node_only_pays_for_players() {
        let lb = LoadBalancer::compute(Some(&stats(5, 0.0, None)), true);
        assert_eq!(lb.player_penalty, 5);
        assert_eq!(lb.cpu_penalty, 0);
        assert_eq!(lb.deficit_frame_penalty, 0);
        assert_eq!(lb.null_frame_penalty, 0);
        assert_eq!(lb.total(), 5);
    }

    #[test]
    fn cpu_penalty_grows_exponentially() {
        assert_eq!(LoadBalancer::compute(Some(&stats(0, 0.1, None)), true).cpu_penalty, 6);
        assert_eq!(LoadBalancer::compute(Some(&stats(0, 0.5, None)), true).cpu_penalty, 104);
        assert_eq!(LoadBalancer::compute(Some(&stats(0, 1.0, None)), true).cpu_penalty, 1305);
    }

    #[test]
    fn frame_penalties_follow_formulas() {
        let lb = LoadBalancer::compute(Some(&stats(0, 0.0, Some((0.0, 0.0)))), true);
        assert_eq!(lb.null_frame_penalty, 0);
        assert_eq!(lb.deficit_frame_penalty, 0);

        let lb = LoadBalancer::compute(Some(&stats(0, 0.0, Some((300.0, 300.0)))), true);
        assert_eq!(lb.deficit_frame_penalty, 2030);
        assert_eq!(lb.null_frame_penalty, 2030);
        assert_eq!(lb.total(), 4060);

        let lb = LoadBalancer::compute(Some(&stats(0, 0.0, Some((30.0, 30.0)))), true);
        assert_eq!(lb.deficit_frame_penalty, 95);
        assert_eq!(lb.null_frame_penalty, 94);
    }

    // The exponential formula gives ~1.57e9 for 3000 deficit frames, not the
    // 600 sometimes quoted for this case; the formula is what is implemented.
    #[test]
    fn full_deficit_saturates_below_sentinel() {
        let lb = LoadBalancer::compute(Some(&stats(0, 0.0, Some((3000.0, 3000.0)))), true);
        assert_eq!(lb.deficit_frame_penalty, 1_573_125_740);
        assert_eq!(lb.total(), SENTINEL_PENALTY - 1);
        assert!(!lb.is_sentinel());
    }

    #[test]
    fn missing_stats_or_unavailable_is_sentinel() {
        assert!(LoadBalancer::compute(None, true).is_sentinel());
        assert!(LoadBalancer::compute(Some(&stats(0, 0.0, None)), false).is_sentinel());
        assert_eq!(LoadBalancer::compute(None, false).total(), i32::MAX - 1);
    }
}
