use std::collections::HashSet;

use crate::config::GuardrailConfig;

/// One agent-to-agent delivery made during a round (after `all` expansion).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub from: String,
    pub to: String,
    pub content: String,
}

/// A tripped guardrail, reported as a `guardrail` event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailTrip {
    pub guard: &'static str,
    pub detail: String,
}

/// Cross-round loop detection.
///
/// Ping-pong: every delivery in a round is between the same two agents, for
/// more than `ping_pong_threshold` consecutive rounds. No-progress: mail is
/// still pending but the round produced no message content not seen before,
/// for `no_progress_threshold` consecutive rounds.
#[derive(Debug)]
pub struct Guardrails {
    config: GuardrailConfig,
    pair: Option<(String, String)>,
    ping_pong_streak: u32,
    no_progress_streak: u32,
    seen: HashSet<String>,
}

impl Guardrails {
    pub fn new(config: GuardrailConfig) -> Self {
        Self {
            config,
            pair: None,
            ping_pong_streak: 0,
            no_progress_streak: 0,
            seen: HashSet::new(),
        }
    }

    /// Feed one finished round. `pending` is the queue size after the round.
    pub fn observe_round(&mut self, deliveries: &[Delivery], pending: usize) -> Option<GuardrailTrip> {
        let mut fresh = false;
        for delivery in deliveries {
            fresh |= self.seen.insert(delivery.content.clone());
        }

        let pair = round_pair(deliveries);
        self.ping_pong_streak = match &pair {
            Some(_) if pair == self.pair => self.ping_pong_streak + 1,
            Some(_) => 1,
            None => 0,
        };
        self.pair = pair;
        if self.ping_pong_streak > self.config.ping_pong_threshold {
            let (a, b) = self.pair.clone().unwrap_or_default();
            return Some(GuardrailTrip {
                guard: "ping_pong",
                detail: format!(
                    "{a} and {b} exchanged messages for {} consecutive turns with no one else",
                    self.ping_pong_streak
                ),
            });
        }

        if pending > 0 && !fresh {
            self.no_progress_streak += 1;
        } else {
            self.no_progress_streak = 0;
        }
        if self.config.no_progress_threshold > 0
            && self.no_progress_streak >= self.config.no_progress_threshold
        {
            return Some(GuardrailTrip {
                guard: "no_progress",
                detail: format!(
                    "No new message content for {} consecutive turns",
                    self.no_progress_streak
                ),
            });
        }
        None
    }
}

/// The unordered agent pair if every delivery in the round is between the same two agents.
fn round_pair(deliveries: &[Delivery]) -> Option<(String, String)> {
    let mut pair: Option<(String, String)> = None;
    for d in deliveries {
        if d.from == d.to {
            return None;
        }
        let key = if d.from < d.to {
            (d.from.clone(), d.to.clone())
        } else {
            (d.to.clone(), d.from.clone())
        };
        match &pair {
            Some(existing) if *existing != key => return None,
            Some(_) => {}
            None => pair = Some(key),
        }
    }
    pair
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(from: &str, to: &str, content: &str) -> Delivery {
        Delivery {
            from: from.into(),
            to: to.into(),
            content: content.into(),
        }
    }

    fn guards() -> Guardrails {
        Guardrails::new(GuardrailConfig::default())
    }

    #[test]
    fn ping_pong_trips_after_threshold() {
        let mut g = guards();
        for round in 0..4 {
            let delivery = if round % 2 == 0 {
                d("a.x", "b.y", &format!("point {round}"))
            } else {
                d("b.y", "a.x", &format!("counter {round}"))
            };
            assert_eq!(g.observe_round(&[delivery], 1), None, "round {round}");
        }
        let trip = g.observe_round(&[d("a.x", "b.y", "point 4")], 1).unwrap();
        assert_eq!(trip.guard, "ping_pong");
        assert!(trip.detail.contains("a.x and b.y"));
    }

    #[test]
    fn third_party_resets_ping_pong() {
        let mut g = guards();
        for round in 0..4 {
            g.observe_round(&[d("a.x", "b.y", &format!("m{round}"))], 1);
        }
        assert_eq!(g.observe_round(&[d("a.x", "c.z", "new")], 1), None);
        assert_eq!(g.observe_round(&[d("a.x", "b.y", "again")], 1), None);
    }

    #[test]
    fn no_progress_on_repeated_content() {
        let mut g = guards();
        assert_eq!(g.observe_round(&[d("a.x", "b.y", "same")], 1), None);
        assert_eq!(g.observe_round(&[d("b.y", "c.z", "same")], 1), None);
        let trip = g.observe_round(&[d("c.z", "a.x", "same")], 1).unwrap();
        assert_eq!(trip.guard, "no_progress");
    }

    #[test]
    fn empty_queue_is_not_stalled() {
        let mut g = guards();
        for _ in 0..5 {
            assert_eq!(g.observe_round(&[], 0), None);
        }
    }

    #[test]
    fn silent_round_with_pending_mail_counts() {
        let mut g = guards();
        assert_eq!(g.observe_round(&[], 2), None);
        assert!(g.observe_round(&[], 2).is_some());
    }
}
