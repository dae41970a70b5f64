//! Real-coded genetic algorithm: elitism, tournament selection, BLX-α
//! crossover and Gaussian mutation.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use cr_types::{
    config_error, BoundedVariable, CrResult, Metadata, SearchResult, UniformSource, XorShift32,
};

use crate::search::{EvaluationLog, Objective, Optimizer, RunControl, SearchRequest};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GeneticConfig {
    pub pop_size: usize,
    /// Individuals copied unchanged into the next generation.
    pub elite: usize,
    /// Individuals sampled per tournament.
    pub tournament: usize,
    pub cx_prob: f64,
    /// Per-gene mutation probability.
    pub mut_prob: f64,
    /// Mutation standard deviation as a fraction of each variable's range.
    pub mut_sigma: f64,
    /// BLX-α interval extension, as a fraction of the two parents' spread
    /// `|a - c|` per gene (not of the variable's range).
    pub blend_alpha: f64,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            pop_size: 40,
            elite: 4,
            tournament: 3,
            cx_prob: 0.9,
            mut_prob: 0.2,
            mut_sigma: 0.1,
            blend_alpha: 0.2,
        }
    }
}

impl GeneticConfig {
    pub fn with_pop_size(mut self, pop_size: usize) -> Self {
        self.pop_size = pop_size;
        self
    }

    pub fn with_elite(mut self, elite: usize) -> Self {
        self.elite = elite;
        self
    }

    pub fn with_tournament(mut self, tournament: usize) -> Self {
        self.tournament = tournament;
        self
    }

    pub fn with_rates(mut self, cx_prob: f64, mut_prob: f64) -> Self {
        self.cx_prob = cx_prob;
        self.mut_prob = mut_prob;
        self
    }

    pub fn validate(&self) -> CrResult<()> {
        if self.pop_size < 2 {
            return Err(config_error!("population size must be at least 2"));
        }
        if self.elite >= self.pop_size {
            return Err(config_error!(
                "elite count {} must be below population size {}",
                self.elite,
                self.pop_size
            ));
        }
        if self.tournament == 0 {
            return Err(config_error!("tournament size must be positive"));
        }
        for (name, p) in [("crossover", self.cx_prob), ("mutation", self.mut_prob)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(config_error!("{name} probability must be in [0, 1], got {p}"));
            }
        }
        if !self.mut_sigma.is_finite() || self.mut_sigma < 0.0 {
            return Err(config_error!("mutation sigma must be a non-negative number"));
        }
        if !self.blend_alpha.is_finite() || self.blend_alpha < 0.0 {
            return Err(config_error!("blend alpha must be a non-negative number"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Individual {
    genes: Vec<f64>,
    fitness: f64,
}

/// Population-based stochastic search.
#[derive(Debug, Clone, Default)]
pub struct GeneticAlgorithm {
    config: GeneticConfig,
}

impl GeneticAlgorithm {
    pub fn new(config: GeneticConfig) -> Self {
        Self { config }
    }

    /// Keep the fittest of `tournament` uniformly sampled individuals.
    fn tournament<'p>(
        &self,
        population: &'p [Individual],
        rng: &mut XorShift32,
    ) -> &'p Individual {
        let mut winner = &population[rng.index(population.len())];
        for _ in 1..self.config.tournament {
            let challenger = &population[rng.index(population.len())];
            if challenger.fitness > winner.fitness {
                winner = challenger;
            }
        }
        winner
    }

    fn blend(
        &self,
        a: &[f64],
        b: &[f64],
        bounds: &[BoundedVariable],
        rng: &mut XorShift32,
    ) -> Vec<f64> {
        let alpha = self.config.blend_alpha;
        a.iter()
            .zip(b)
            .zip(bounds)
            .map(|((&x, &y), var)| {
                let (lo, hi) = (x.min(y), x.max(y));
                let spread = hi - lo;
                var.clamp(rng.uniform(lo - alpha * spread, hi + alpha * spread))
            })
            .collect()
    }

    fn mutate(&self, genes: &mut [f64], bounds: &[BoundedVariable], rng: &mut XorShift32) {
        for (gene, var) in genes.iter_mut().zip(bounds) {
            if rng.next_f64() < self.config.mut_prob {
                let noise = rng.normal() * self.config.mut_sigma * var.range();
                *gene = var.clamp(*gene + noise);
            }
        }
    }
}

impl Optimizer for GeneticAlgorithm {
    fn name(&self) -> &str {
        "genetic-algorithm"
    }

    fn run(
        &self,
        objective: &mut dyn Objective,
        request: &SearchRequest,
        control: &RunControl,
    ) -> CrResult<SearchResult> {
        request.validate()?;
        self.config.validate()?;

        let seed = request.seed_or_default();
        let space = &request.space;
        let bounds = &space.variables;
        let mut rng = XorShift32::new(seed);
        info!(
            budget = request.budget,
            seed,
            pop_size = self.config.pop_size,
            "starting genetic algorithm"
        );

        let mut log = EvaluationLog::new(objective, request, control);

        let mut population = Vec::with_capacity(self.config.pop_size);
        while population.len() < self.config.pop_size && !log.is_exhausted() {
            let genes: Vec<f64> = bounds.iter().map(|v| rng.uniform(v.min, v.max)).collect();
            let fitness = log.evaluate(space.point_from_values(&genes))?;
            population.push(Individual { genes, fitness });
        }

        let mut generation = 0usize;
        while !log.is_exhausted() {
            // Stable sort keeps ties in insertion order.
            population.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));

            let mut next: Vec<Individual> =
                population.iter().take(self.config.elite).cloned().collect();

            while next.len() < self.config.pop_size && !log.is_exhausted() {
                let first = self.tournament(&population, &mut rng);
                let second = self.tournament(&population, &mut rng);

                let mut genes = if rng.next_f64() < self.config.cx_prob {
                    self.blend(&first.genes, &second.genes, bounds, &mut rng)
                } else {
                    first.genes.clone()
                };
                self.mutate(&mut genes, bounds, &mut rng);

                let fitness = log.evaluate(space.point_from_values(&genes))?;
                next.push(Individual { genes, fitness });
            }

            population = next;
            generation += 1;
            debug!(
                generation,
                evaluations = log.count(),
                best = ?log.best().map(|b| b.value),
                "generation complete"
            );
        }

        let mut metadata = Metadata::new();
        metadata.insert("method".into(), self.name().into());
        metadata.insert("seed".into(), seed.into());
        metadata.insert("generations".into(), generation.into());
        metadata.insert("hyperparameters".into(), serde_json::to_value(&self.config)?);

        let result = log.finish(metadata)?;
        info!(
            evaluations = result.evaluation_count,
            generations = generation,
            best = result.best.value,
            "genetic algorithm finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::CancellationToken;
    use cr_types::{Point, SearchSpace};

    fn sphere(p: &Point) -> CrResult<f64> {
        Ok(-((p["x"] - 1.0).powi(2) + (p["y"] + 2.0).powi(2)))
    }

    fn plane_request(budget: usize, seed: u32) -> SearchRequest {
        let space = SearchSpace::new().add("x", -5.0, 5.0).add("y", -5.0, 5.0);
        SearchRequest::new(space, budget).with_seed(seed)
    }

    #[test]
    fn exact_budget_is_spent() {
        for budget in [1, 39, 40, 41, 77, 200] {
            let result = GeneticAlgorithm::default()
                .run(&mut sphere, &plane_request(budget, 1), &RunControl::new())
                .unwrap();
            assert_eq!(result.evaluation_count, budget);
            assert_eq!(result.history.len(), budget);
        }
    }

    #[test]
    fn population_only_budget_runs_no_generation() {
        let result = GeneticAlgorithm::default()
            .run(&mut sphere, &plane_request(40, 3), &RunControl::new())
            .unwrap();
        assert_eq!(result.evaluation_count, 40);
        assert_eq!(result.metadata["generations"], 0);
    }

    #[test]
    fn best_is_history_maximum() {
        let result = GeneticAlgorithm::default()
            .run(&mut sphere, &plane_request(300, 9), &RunControl::new())
            .unwrap();
        let max = result
            .history
            .iter()
            .map(|r| r.value)
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(result.best.value, max);
    }

    #[test]
    fn same_seed_same_history() {
        let ga = GeneticAlgorithm::default();
        let a = ga
            .run(&mut sphere, &plane_request(150, 2025), &RunControl::new())
            .unwrap();
        let b = ga
            .run(&mut sphere, &plane_request(150, 2025), &RunControl::new())
            .unwrap();
        assert_eq!(a.history, b.history);
        assert_eq!(a.best, b.best);

        let c = ga
            .run(&mut sphere, &plane_request(150, 2026), &RunControl::new())
            .unwrap();
        assert_ne!(a.history, c.history);
    }

    #[test]
    fn points_stay_within_bounds() {
        let result = GeneticAlgorithm::new(GeneticConfig {
            mut_prob: 1.0,
            mut_sigma: 2.0,
            ..GeneticConfig::default()
        })
        .run(&mut sphere, &plane_request(200, 4), &RunControl::new())
        .unwrap();
        for record in &result.history {
            assert!((-5.0..=5.0).contains(&record.point["x"]));
            assert!((-5.0..=5.0).contains(&record.point["y"]));
        }
    }

    #[test]
    fn converges_toward_optimum() {
        let result = GeneticAlgorithm::default()
            .run(&mut sphere, &plane_request(800, 11), &RunControl::new())
            .unwrap();
        assert!(result.best.value > -0.1, "best {}", result.best.value);
    }

    #[test]
    fn invalid_config_rejected() {
        assert!(GeneticConfig::default().with_elite(40).validate().is_err());
        assert!(GeneticConfig::default().with_pop_size(1).validate().is_err());
        assert!(GeneticConfig::default().with_tournament(0).validate().is_err());
        assert!(GeneticConfig::default().with_rates(1.5, 0.2).validate().is_err());
        assert!(GeneticConfig::default().validate().is_ok());

        let ga = GeneticAlgorithm::new(GeneticConfig::default().with_elite(50));
        assert!(ga
            .run(&mut sphere, &plane_request(10, 1), &RunControl::new())
            .is_err());
    }

    #[test]
    fn cancellation_interrupts_generation() {
        let token = CancellationToken::new();
        let control = RunControl::new().with_cancellation(token.clone());
        let mut calls = 0;
        let mut objective = |p: &Point| -> CrResult<f64> {
            calls += 1;
            if calls == 45 {
                token.cancel();
            }
            sphere(p)
        };
        let err = GeneticAlgorithm::default()
            .run(&mut objective, &plane_request(200, 1), &control)
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.partial_history().map(<[_]>::len), Some(45));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: GeneticConfig = serde_json::from_str(r#"{"popSize": 10, "elite": 2}"#).unwrap();
        assert_eq!(config.pop_size, 10);
        assert_eq!(config.elite, 2);
        assert_eq!(config.tournament, 3);
        assert_eq!(config.cx_prob, 0.9);
    }
}
