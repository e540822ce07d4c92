//! Thompson-sampling bandit arm and multi-arm agent (spec §4.6).

use rand::Rng;
use rand_distr::Beta;
use rand_distr::Distribution;

use crate::error::FuzzError;

/// A single Beta-Bernoulli arm. `a` and `b` are the (decayed) pseudo-counts
/// of reward-1 and reward-0 observations; sampling draws from
/// `Beta(a+1, b+1)`.
#[derive(Debug, Clone, Copy)]
pub struct ThompsonArm {
    a: f64,
    b: f64,
    decay: f64,
}

impl ThompsonArm {
    /// Default decay factor used when an arm is created without an
    /// explicit one (spec §3).
    pub const DEFAULT_DECAY: f64 = 0.95;

    /// Creates a fresh arm with `a = b = 0`.
    pub fn new(decay: f64) -> Self {
        debug_assert!(decay > 0.0 && decay < 1.0);
        ThompsonArm {
            a: 0.0,
            b: 0.0,
            decay,
        }
    }

    /// The current `(a, b)` pseudo-counts, for diagnostics.
    pub fn ab(&self) -> (f64, f64) {
        (self.a, self.b)
    }

    /// Draws a sample from `Beta(a+1, b+1)` using `rng`.
    pub fn sample_with(&self, rng: &mut impl Rng) -> f64 {
        let beta = Beta::new(self.a + 1.0, self.b + 1.0)
            .expect("a and b are non-negative, so a+1 and b+1 are always > 0");
        beta.sample(rng)
    }

    /// Draws a sample using the thread-local RNG.
    pub fn sample(&self) -> f64 {
        self.sample_with(&mut rand::thread_rng())
    }

    /// Applies a reward of `0` or `1` with exponential decay on the other
    /// pseudo-count, per spec §4.6. Any other value is a programmer error.
    pub fn receive_reward(&mut self, reward: i32) -> Result<(), FuzzError> {
        match reward {
            0 => {
                self.a *= self.decay;
                self.b = 1.0 + self.decay * self.b;
            }
            1 => {
                self.a = 1.0 + self.decay * self.a;
                self.b *= self.decay;
            }
            other => return Err(FuzzError::InvalidReward(other)),
        }
        Ok(())
    }
}

/// An ordered collection of named arms; never grows after construction.
#[derive(Debug, Clone)]
pub struct BanditAgent {
    arms: Vec<(String, ThompsonArm)>,
}

impl BanditAgent {
    /// Builds an agent with one fresh [`ThompsonArm`] per name, in the
    /// given order. Arm names must be unique.
    pub fn new<I, S>(arm_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let arms = arm_names
            .into_iter()
            .map(|name| (name.into(), ThompsonArm::new(ThompsonArm::DEFAULT_DECAY)))
            .collect::<Vec<_>>();
        debug_assert!({
            let mut seen = std::collections::HashSet::new();
            arms.iter().all(|(name, _)| seen.insert(name.clone()))
        });
        BanditAgent { arms }
    }

    /// Samples every arm once and returns the name of the arm with the
    /// maximum sample, ties broken by first-occurrence order.
    pub fn sample_action(&self) -> &str {
        self.sample_action_with(&mut rand::thread_rng())
    }

    /// Same as [`Self::sample_action`] but with an explicit RNG, for tests.
    pub fn sample_action_with(&self, rng: &mut impl Rng) -> &str {
        let mut best_index = 0;
        let mut best_sample = f64::MIN;
        for (index, (_, arm)) in self.arms.iter().enumerate() {
            let sample = arm.sample_with(rng);
            if sample > best_sample {
                best_sample = sample;
                best_index = index;
            }
        }
        &self.arms[best_index].0
    }

    /// Applies a reward to the named arm.
    pub fn receive_reward(&mut self, arm_name: &str, reward: i32) -> Result<(), FuzzError> {
        let arm = self
            .arms
            .iter_mut()
            .find(|(name, _)| name == arm_name)
            .map(|(_, arm)| arm)
            .expect("arm_name must be one this agent was constructed with");
        arm.receive_reward(reward)
    }

    /// The arm names, in construction order.
    pub fn arm_names(&self) -> impl Iterator<Item = &str> {
        self.arms.iter().map(|(name, _)| name.as_str())
    }

    /// Looks up an arm's current state by name, for diagnostics/tests.
    pub fn arm(&self, arm_name: &str) -> Option<&ThompsonArm> {
        self.arms
            .iter()
            .find(|(name, _)| name == arm_name)
            .map(|(_, arm)| arm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn beta_draws_lie_in_unit_interval() {
        let arm = ThompsonArm::new(0.95);
        let mut rng = SmallRng::seed_from_u64(42);
        for _ in 0..1000 {
            let sample = arm.sample_with(&mut rng);
            assert!((0.0..=1.0).contains(&sample));
        }
    }

    #[test]
    fn ten_thousand_successes_favor_a_over_b() {
        let mut arm = ThompsonArm::new(0.95);
        for _ in 0..10_000 {
            arm.receive_reward(1).unwrap();
        }
        let (a, b) = arm.ab();
        assert!(a > b, "a={a} b={b}");
    }

    #[test]
    fn invalid_reward_is_rejected() {
        let mut arm = ThompsonArm::new(0.95);
        let err = arm.receive_reward(2).unwrap_err();
        assert!(matches!(err, FuzzError::InvalidReward(2)));
    }

    #[test]
    fn agent_picks_max_sample_with_first_occurrence_tiebreak() {
        let agent = BanditAgent::new(["generate", "mutate"]);
        let mut rng = SmallRng::seed_from_u64(7);
        let action = agent.sample_action_with(&mut rng);
        assert!(action == "generate" || action == "mutate");
    }
}
