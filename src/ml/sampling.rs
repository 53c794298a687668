// ============================================================
// Layer 5 — Next-Token Selection
// ============================================================
// Picks the token the evaluation loop (and `generate`) feeds
// back into the model.
//
//   Greedy → arg-max of the logits
//   TopP   → softmax(logits / temperature), keep the smallest
//            set of most likely tokens whose cumulative
//            probability reaches p, renormalise, sample
//
// The sampler owns a seeded StdRng so a fixed seed gives the
// same generations run after run.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SamplingStrategy {
    Greedy,
    TopP { p: f32, temperature: f32 },
}

impl SamplingStrategy {
    /// top_p >= 1 or temperature <= 0 selects greedy decoding.
    pub fn from_settings(top_p: f32, temperature: f32) -> Self {
        if top_p >= 1.0 || temperature <= 0.0 {
            Self::Greedy
        } else {
            Self::TopP { p: top_p.max(f32::EPSILON), temperature }
        }
    }
}

pub struct Sampler {
    strategy: SamplingStrategy,
    rng:      StdRng,
}

impl Sampler {
    pub fn new(strategy: SamplingStrategy, seed: u64) -> Self {
        Self { strategy, rng: StdRng::seed_from_u64(seed) }
    }

    /// Choose the next token from one row of logits. `banned`
    /// (the pad id) is never returned.
    pub fn sample(&mut self, logits: &[f32], banned: Option<u32>) -> u32 {
        match self.strategy {
            SamplingStrategy::Greedy => argmax(logits, banned),
            SamplingStrategy::TopP { p, temperature } => {
                let probs  = softmax(logits, temperature, banned);
                let nucleus = top_p_filter(&probs, p);
                if nucleus.is_empty() {
                    return argmax(logits, banned);
                }
                let mass: f32 = nucleus.iter().map(|&(_, pr)| pr).sum();
                let mut draw  = self.rng.gen::<f32>() * mass;
                for &(id, pr) in &nucleus {
                    if draw < pr {
                        return id as u32;
                    }
                    draw -= pr;
                }
                nucleus[nucleus.len() - 1].0 as u32
            }
        }
    }
}

/// Index of the largest finite logit; lowest index wins ties.
pub fn argmax(logits: &[f32], banned: Option<u32>) -> u32 {
    let mut best    = 0usize;
    let mut best_lg = f32::NEG_INFINITY;
    for (i, &lg) in logits.iter().enumerate() {
        if Some(i as u32) == banned || lg.is_nan() {
            continue;
        }
        if lg > best_lg {
            best    = i;
            best_lg = lg;
        }
    }
    best as u32
}

/// Temperature-scaled softmax. The banned id gets probability 0.
pub fn softmax(logits: &[f32], temperature: f32, banned: Option<u32>) -> Vec<f32> {
    let t   = temperature.max(f32::EPSILON);
    let max = logits
        .iter()
        .enumerate()
        .filter(|&(i, _)| Some(i as u32) != banned)
        .map(|(_, &lg)| lg)
        .fold(f32::NEG_INFINITY, f32::max);

    let mut exps: Vec<f32> = logits
        .iter()
        .enumerate()
        .map(|(i, &lg)| {
            if Some(i as u32) == banned || !lg.is_finite() {
                0.0
            } else {
                ((lg - max) / t).exp()
            }
        })
        .collect();

    let sum: f32 = exps.iter().sum();
    if sum > 0.0 {
        exps.iter_mut().for_each(|e| *e /= sum);
    }
    exps
}

/// Smallest set of (id, prob), most likely first, whose
/// cumulative probability reaches `p`.
pub fn top_p_filter(probs: &[f32], p: f32) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = probs
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, pr)| pr > 0.0)
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut cumulative = 0.0f32;
    let mut keep       = 0usize;
    for &(_, pr) in &ranked {
        cumulative += pr;
        keep       += 1;
        if cumulative >= p {
            break;
        }
    }
    ranked.truncate(keep);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_prefers_lowest_index_on_tie() {
        assert_eq!(argmax(&[0.1, 0.9, 0.9, 0.2], None), 1);
    }

    #[test]
    fn test_argmax_skips_banned() {
        assert_eq!(argmax(&[5.0, 1.0, 2.0], Some(0)), 2);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0], 1.0, None);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_top_p_keeps_smallest_nucleus() {
        let nucleus = top_p_filter(&[0.05, 0.6, 0.25, 0.1], 0.8);
        let ids: Vec<usize> = nucleus.iter().map(|&(i, _)| i).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_top_p_sampling_stays_in_nucleus() {
        let logits  = [0.0, 4.0, 3.5, -2.0, -3.0];
        let mut smp = Sampler::new(SamplingStrategy::TopP { p: 0.9, temperature: 1.0 }, 42);
        for _ in 0..200 {
            let t = smp.sample(&logits, None);
            assert!(t == 1 || t == 2, "sampled {t} outside nucleus");
        }
    }

    #[test]
    fn test_same_seed_same_samples() {
        let logits = [1.0, 1.1, 0.9, 1.05];
        let mut a  = Sampler::new(SamplingStrategy::TopP { p: 0.95, temperature: 1.0 }, 9);
        let mut b  = Sampler::new(SamplingStrategy::TopP { p: 0.95, temperature: 1.0 }, 9);
        let sa: Vec<u32> = (0..50).map(|_| a.sample(&logits, None)).collect();
        let sb: Vec<u32> = (0..50).map(|_| b.sample(&logits, None)).collect();
        assert_eq!(sa, sb);
    }

    #[test]
    fn test_from_settings() {
        assert_eq!(SamplingStrategy::from_settings(1.0, 1.0), SamplingStrategy::Greedy);
        assert_eq!(SamplingStrategy::from_settings(0.9, 0.0), SamplingStrategy::Greedy);
        assert_eq!(
            SamplingStrategy::from_settings(0.9, 0.7),
            SamplingStrategy::TopP { p: 0.9, temperature: 0.7 },
        );
    }
}
