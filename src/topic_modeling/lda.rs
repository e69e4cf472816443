use chrono::Utc;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Gamma};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::special::{digamma, trigamma};
use super::vocabulary::{EncodedCorpus, WordId};
use super::InferenceStrategy;
use crate::config::{DocTopicPrior, LdaConfig};
use crate::error::{Result, TopicError};
use crate::models::{BagOfWords, Hyperparameters, Provenance, TrainedModel};

/// Per-document convergence threshold used for held-out inference.
pub(crate) const GAMMA_THRESHOLD: f64 = 0.001;

// Gamma(100, 1/100) draws: mean 1, small spread around it.
const INIT_SHAPE: f64 = 100.0;
const INIT_SCALE: f64 = 0.01;

const PHI_FLOOR: f64 = 1e-100;

/// Latent Dirichlet Allocation fitted by batch variational EM.
pub struct VariationalLda {
    config: LdaConfig,
}

/// Variational posterior of a single document, private to one E-step.
#[derive(Debug, Clone)]
pub(crate) struct DocPosterior {
    pub gamma: Vec<f64>,
    exp_elog_theta: Vec<f64>,
    phinorm: Vec<f64>, // Per distinct word: sum_k exp(E[log theta_k]) exp(E[log beta_kw])
}

/// Expected sufficient statistics of one pass, owned by a single fit.
struct SufficientStats {
    sstats: Vec<Vec<f64>>,     // Topics x Words expected counts (before the beta factor)
    log_theta_sum: Vec<f64>,   // Sum over documents of E[log theta_dk]
    num_docs: usize,
}

impl SufficientStats {
    fn new(num_topics: usize, vocab_size: usize) -> Self {
        SufficientStats {
            sstats: vec![vec![0.0; vocab_size]; num_topics],
            log_theta_sum: vec![0.0; num_topics],
            num_docs: 0,
        }
    }

    fn absorb(&mut self, bow: &BagOfWords, posterior: &DocPosterior) {
        for (&(word_id, count), &norm) in bow.entries().iter().zip(&posterior.phinorm) {
            let weight = count as f64 / norm;
            for (topic, row) in self.sstats.iter_mut().enumerate() {
                row[word_id] += posterior.exp_elog_theta[topic] * weight;
            }
        }
        for (acc, elog) in self
            .log_theta_sum
            .iter_mut()
            .zip(dirichlet_expectation(&posterior.gamma))
        {
            *acc += elog;
        }
        self.num_docs += 1;
    }

    /// lambda = eta + sstats * exp(E[log beta]), the batch M-step.
    fn into_lambda(self, exp_elog_beta: &[Vec<f64>], eta: f64) -> Vec<Vec<f64>> {
        self.sstats
            .into_iter()
            .zip(exp_elog_beta)
            .map(|(row, beta_row)| {
                row.into_iter()
                    .zip(beta_row)
                    .map(|(s, b)| eta + s * b)
                    .collect()
            })
            .collect()
    }

    fn mean_log_theta(&self) -> Vec<f64> {
        let n = self.num_docs.max(1) as f64;
        self.log_theta_sum.iter().map(|s| s / n).collect()
    }
}

impl VariationalLda {
    pub fn new(config: LdaConfig) -> Self {
        VariationalLda { config }
    }

    pub fn fit(&self, corpus: &EncodedCorpus, num_topics: usize) -> Result<TrainedModel> {
        if num_topics < 1 {
            return Err(TopicError::InvalidTopicCount { k: num_topics });
        }
        if corpus.is_empty() {
            return Err(TopicError::EmptyCorpus);
        }
        if self.config.passes == 0 {
            return Err(TopicError::Config("passes must be at least 1".into()));
        }

        let k = num_topics;
        let vocab_size = corpus.vocabulary().len();
        let docs = corpus.documents();
        let eta = self.config.eta.unwrap_or(1.0 / k as f64);
        let mut alpha = match self.config.alpha {
            DocTopicPrior::Symmetric(value) => vec![value; k],
            DocTopicPrior::Auto => vec![1.0 / k as f64; k],
        };
        let unstable = |stage: &'static str| TopicError::NumericInstability { k, stage };

        // Step 1: Seeded initialization of the topic-word variational parameters
        let init = Gamma::new(INIT_SHAPE, INIT_SCALE).map_err(|_| unstable("initialization"))?;
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut lambda: Vec<Vec<f64>> = (0..k)
            .map(|_| (0..vocab_size).map(|_| init.sample(&mut rng)).collect())
            .collect();

        let mut posteriors: Vec<DocPosterior> = Vec::new();
        let mut exp_elog_beta: Vec<Vec<f64>> = Vec::new();
        let mut previous_ll: Option<f64> = None;
        let mut log_likelihood = 0.0;
        let mut passes_run = 0;
        let mut converged = false;

        for pass in 0..self.config.passes {
            exp_elog_beta = lambda.iter().map(|row| dirichlet_expectation_exp(row)).collect();

            // Step 2: E-step. Each document yields a private posterior
            posteriors = docs
                .par_iter()
                .enumerate()
                .map(|(doc_id, bow)| {
                    let gamma = initial_gamma(self.config.seed, pass, doc_id, docs.len(), k, &init);
                    infer_document(
                        bow,
                        &exp_elog_beta,
                        &alpha,
                        gamma,
                        self.config.iterations,
                        self.config.gamma_threshold,
                    )
                })
                .collect();

            // Step 3: Reduce into the pass accumulator in document order
            let mut stats = SufficientStats::new(k, vocab_size);
            for (bow, posterior) in docs.iter().zip(&posteriors) {
                stats.absorb(bow, posterior);
            }
            if posteriors.iter().flat_map(|p| &p.gamma).any(|g| !g.is_finite()) {
                return Err(unstable("e-step"));
            }

            // Step 4: M-step
            let mean_log_theta = stats.mean_log_theta();
            let num_docs = stats.num_docs;
            lambda = stats.into_lambda(&exp_elog_beta, eta);
            if lambda.iter().flatten().any(|v| !v.is_finite()) {
                return Err(unstable("m-step"));
            }

            // A single topic gets theta = [1] whatever the prior, and the Newton step is singular.
            if self.config.alpha == DocTopicPrior::Auto && k > 1 {
                let rho = (1.0 + pass as f64).powf(-0.5);
                match update_dirichlet_prior(&alpha, num_docs as f64, &mean_log_theta, rho) {
                    Some(updated) => alpha = updated,
                    None => warn!(k, pass, "rejected alpha update with non-positive component"),
                }
                if alpha.iter().any(|a| !a.is_finite()) {
                    return Err(unstable("alpha update"));
                }
            }

            // Step 5: Convergence check on the per-word log-likelihood
            let topic_word: Vec<Vec<f64>> = lambda.iter().map(|row| normalize(row)).collect();
            let thetas: Vec<Vec<f64>> = posteriors.iter().map(|p| normalize(&p.gamma)).collect();
            log_likelihood = per_word_log_likelihood(docs, &thetas, &topic_word);
            if !log_likelihood.is_finite() {
                return Err(unstable("log-likelihood"));
            }
            passes_run = pass + 1;
            debug!(k, pass, log_likelihood, "pass complete");

            if let Some(previous) = previous_ll {
                if (log_likelihood - previous).abs() < self.config.convergence_threshold {
                    converged = true;
                    break;
                }
            }
            previous_ll = Some(log_likelihood);
        }

        // Step 6: Convert variational parameters to distributions
        let topic_word: Vec<Vec<f64>> = lambda.iter().map(|row| normalize(row)).collect();
        let doc_topic: Vec<Vec<f64>> = posteriors.iter().map(|p| normalize(&p.gamma)).collect();
        if topic_word.iter().chain(&doc_topic).flatten().any(|p| !p.is_finite()) {
            return Err(unstable("normalization"));
        }
        let word_topics = docs
            .iter()
            .zip(&posteriors)
            .map(|(bow, posterior)| most_likely_topics(bow, posterior, &exp_elog_beta))
            .collect();

        info!(k, passes_run, converged, log_likelihood, "LDA fit complete");

        Ok(TrainedModel {
            vocabulary: corpus.vocabulary().clone(),
            lambda,
            topic_word,
            doc_topic,
            word_topics,
            topic_coherence: None,
            hyperparameters: Hyperparameters {
                num_topics: k,
                alpha_mode: self.config.alpha,
                alpha,
                eta,
                passes: self.config.passes,
                iterations: self.config.iterations,
                seed: self.config.seed,
            },
            provenance: Provenance {
                seed: self.config.seed,
                passes_run,
                converged,
                per_word_log_likelihood: log_likelihood,
                trained_at: Utc::now(),
            },
        })
    }
}

impl InferenceStrategy for VariationalLda {
    fn fit(&self, corpus: &EncodedCorpus, num_topics: usize) -> Result<TrainedModel> {
        VariationalLda::fit(self, corpus, num_topics)
    }
}

/// Starting gamma for one document in one pass, drawn from its own ChaCha stream
/// so the result does not depend on which worker handles the document.
fn initial_gamma(
    seed: u64,
    pass: usize,
    doc_id: usize,
    num_docs: usize,
    num_topics: usize,
    init: &Gamma<f64>,
) -> Vec<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    // Stream 0 belongs to the lambda initialization.
    rng.set_stream(1 + (pass as u64) * (num_docs as u64) + doc_id as u64);
    (0..num_topics).map(|_| init.sample(&mut rng)).collect()
}

/// Iterate the per-document variational updates against fixed topics.
pub(crate) fn infer_document(
    bow: &BagOfWords,
    exp_elog_beta: &[Vec<f64>],
    alpha: &[f64],
    mut gamma: Vec<f64>,
    iterations: usize,
    threshold: f64,
) -> DocPosterior {
    let entries = bow.entries();
    if entries.is_empty() {
        let gamma = alpha.to_vec();
        return DocPosterior {
            exp_elog_theta: dirichlet_expectation_exp(&gamma),
            gamma,
            phinorm: Vec::new(),
        };
    }

    let mut exp_elog_theta = dirichlet_expectation_exp(&gamma);
    let mut phinorm = phi_normalizers(entries, &exp_elog_theta, exp_elog_beta);

    for _ in 0..iterations {
        let last_gamma = gamma.clone();
        for (topic, g) in gamma.iter_mut().enumerate() {
            let dot: f64 = entries
                .iter()
                .zip(&phinorm)
                .map(|(&(word_id, count), &norm)| count as f64 / norm * exp_elog_beta[topic][word_id])
                .sum();
            *g = alpha[topic] + exp_elog_theta[topic] * dot;
        }
        exp_elog_theta = dirichlet_expectation_exp(&gamma);
        phinorm = phi_normalizers(entries, &exp_elog_theta, exp_elog_beta);

        let mean_change = gamma
            .iter()
            .zip(&last_gamma)
            .map(|(a, b)| (a - b).abs())
            .sum::<f64>()
            / gamma.len() as f64;
        if mean_change < threshold {
            break;
        }
    }

    DocPosterior {
        gamma,
        exp_elog_theta,
        phinorm,
    }
}

fn phi_normalizers(
    entries: &[(WordId, usize)],
    exp_elog_theta: &[f64],
    exp_elog_beta: &[Vec<f64>],
) -> Vec<f64> {
    entries
        .iter()
        .map(|&(word_id, _)| {
            exp_elog_theta
                .iter()
                .zip(exp_elog_beta)
                .map(|(t, beta_row)| t * beta_row[word_id])
                .sum::<f64>()
                + PHI_FLOOR
        })
        .collect()
}

fn most_likely_topics(
    bow: &BagOfWords,
    posterior: &DocPosterior,
    exp_elog_beta: &[Vec<f64>],
) -> Vec<(WordId, usize)> {
    bow.entries()
        .iter()
        .map(|&(word_id, _)| {
            let topic = posterior
                .exp_elog_theta
                .iter()
                .zip(exp_elog_beta)
                .map(|(t, beta_row)| t * beta_row[word_id])
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))
                .map(|(i, _)| i)
                .unwrap_or(0);
            (word_id, topic)
        })
        .collect()
}

/// One damped Newton step on a Dirichlet prior given mean E[log theta].
/// Returns `None` when the step would make any component non-positive.
pub(crate) fn update_dirichlet_prior(
    prior: &[f64],
    num_docs: f64,
    mean_log_theta: &[f64],
    rho: f64,
) -> Option<Vec<f64>> {
    let total: f64 = prior.iter().sum();
    let grad: Vec<f64> = prior
        .iter()
        .zip(mean_log_theta)
        .map(|(&a, &logp)| num_docs * (digamma(total) - digamma(a) + logp))
        .collect();
    let c = num_docs * trigamma(total);
    let q: Vec<f64> = prior.iter().map(|&a| -num_docs * trigamma(a)).collect();
    let b = grad.iter().zip(&q).map(|(g, q)| g / q).sum::<f64>()
        / (1.0 / c + q.iter().map(|q| 1.0 / q).sum::<f64>());

    let updated: Vec<f64> = prior
        .iter()
        .zip(grad.iter().zip(&q))
        .map(|(&a, (g, q))| a + rho * (-(g - b) / q))
        .collect();

    if updated.iter().all(|&a| a > 0.0 && a.is_finite()) {
        Some(updated)
    } else {
        None
    }
}

/// E[log x] for x ~ Dirichlet(params).
pub(crate) fn dirichlet_expectation(params: &[f64]) -> Vec<f64> {
    let psi_total = digamma(params.iter().sum());
    params.iter().map(|&p| digamma(p) - psi_total).collect()
}

pub(crate) fn dirichlet_expectation_exp(params: &[f64]) -> Vec<f64> {
    dirichlet_expectation(params).into_iter().map(f64::exp).collect()
}

pub(crate) fn normalize(values: &[f64]) -> Vec<f64> {
    let total: f64 = values.iter().sum();
    values.iter().map(|v| v / total).collect()
}

/// Sum of n_dw * ln(sum_k theta_dk * beta_kw) over the corpus, per token.
pub(crate) fn per_word_log_likelihood(
    docs: &[BagOfWords],
    thetas: &[Vec<f64>],
    topic_word: &[Vec<f64>],
) -> f64 {
    let mut total = 0.0;
    let mut tokens = 0usize;
    for (bow, theta) in docs.iter().zip(thetas) {
        for &(word_id, count) in bow.entries() {
            let p: f64 = theta
                .iter()
                .zip(topic_word)
                .map(|(t, row)| t * row[word_id])
                .sum();
            total += count as f64 * p.ln();
            tokens += count;
        }
    }
    if tokens == 0 {
        0.0
    } else {
        total / tokens as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bow(entries: &[(usize, usize)]) -> BagOfWords {
        BagOfWords::from_sorted(entries.to_vec())
    }

    #[test]
    fn dirichlet_expectation_of_uniform_is_symmetric() {
        let e = dirichlet_expectation(&[2.0, 2.0, 2.0]);
        assert!((e[0] - e[1]).abs() < 1e-12);
        assert!(e.iter().all(|v| *v < 0.0));
    }

    #[test]
    fn empty_document_posterior_is_the_prior() {
        let beta = vec![vec![0.5, 0.5], vec![0.5, 0.5]];
        let posterior = infer_document(&bow(&[]), &beta, &[0.3, 0.7], vec![1.0, 1.0], 50, 1e-3);
        assert_eq!(posterior.gamma, vec![0.3, 0.7]);
    }

    #[test]
    fn document_mass_moves_toward_matching_topic() {
        // Topic 0 only emits word 0, topic 1 only emits word 1
        let beta = vec![vec![1.0, 1e-6], vec![1e-6, 1.0]];
        let posterior = infer_document(&bow(&[(0, 5)]), &beta, &[0.1, 0.1], vec![1.0, 1.0], 100, 1e-6);
        let theta = normalize(&posterior.gamma);
        assert!(theta[0] > 0.9, "theta = {theta:?}");
    }

    #[test]
    fn prior_update_stays_positive() {
        let alpha = update_dirichlet_prior(&[0.5, 0.5], 10.0, &[-0.5, -1.5], 1.0)
            .expect("step should be accepted");
        assert!(alpha.iter().all(|a| *a > 0.0));
        assert!(alpha[0] > alpha[1], "topic with higher mean log theta gets more prior mass");
    }

    #[test]
    fn stream_seeded_gamma_is_reproducible() {
        let init = Gamma::new(INIT_SHAPE, INIT_SCALE).unwrap();
        let a = initial_gamma(7, 2, 3, 10, 4, &init);
        let b = initial_gamma(7, 2, 3, 10, 4, &init);
        let c = initial_gamma(7, 2, 4, 10, 4, &init);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn log_likelihood_of_certain_model_is_zero() {
        let docs = vec![bow(&[(0, 3)])];
        let ll = per_word_log_likelihood(&docs, &[vec![1.0]], &[vec![1.0, 0.0]]);
        assert!(ll.abs() < 1e-12);
    }
}
