//! Parallel tempering over a ladder of annealing exponents.
//!
//! Every temperature runs `P` independent replicas ("slots"). A scan moves
//! every replica with local MCMC updates at its own exponent, records the
//! replicas of the posterior chain, and then proposes to exchange the states
//! of adjacent chains within each slot.

use anyhow::{bail, Context, Result};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, instrument};

use crate::engine::InferenceEngine;
use crate::error::EngineError;
use crate::model::AnnealedModel;
use crate::parallel::{slot_streams, WorkerPool};
use crate::settings::{PtSettings, TemperatureLadder};
use crate::storage::{Namespace, ResultSink};
use crate::tables::{write_sample, CHAIN_COLUMN, PARAMETER_COLUMN, PR_COLUMN, SWAP_TABLE};

/// Running mean of swap outcomes for one pair of adjacent chains.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AcceptanceAccumulator {
    n_accepted: u64,
    n_proposed: u64,
}

impl AcceptanceAccumulator {
    pub fn add(&mut self, accepted: bool) {
        self.n_proposed += 1;
        if accepted {
            self.n_accepted += 1;
        }
    }

    pub fn n_proposed(&self) -> u64 {
        self.n_proposed
    }

    /// Fraction of accepted proposals, NaN before the first proposal.
    pub fn mean(&self) -> f64 {
        if self.n_proposed == 0 {
            return f64::NAN;
        }
        self.n_accepted as f64 / self.n_proposed as f64
    }
}

/// One replica together with the random stream that drives its updates.
#[derive(Debug)]
struct Cell<M> {
    replica: Box<M>,
    rng: ChaCha8Rng,
}

/// All chains of one slot, ordered by exponent.
#[derive(Debug)]
struct SlotColumn<M> {
    cells: Vec<Cell<M>>,
    swap_rng: ChaCha8Rng,
}

/// The replicas of a tempering run, `states[chain][slot]`.
///
/// Stored slot by slot, so that the chains one swap phase touches are owned
/// by a single column and columns can be processed in parallel.
#[derive(Debug)]
pub struct ReplicaGrid<M> {
    columns: Vec<SlotColumn<M>>,
}

impl<M: AnnealedModel> ReplicaGrid<M> {
    /// Forward-sample `n_slots` replicas for every chain of the ladder and set
    /// each to its chain's exponent.
    pub fn initialize(
        template: &M,
        ladder: &TemperatureLadder,
        n_slots: usize,
        seed: u64,
        pool: &WorkerPool,
    ) -> Result<Self> {
        let n_chains = ladder.n_chains();
        let n_cells = n_chains * n_slots;
        let mut streams = slot_streams(seed, n_cells + n_slots).into_iter();

        let mut cells: Vec<Cell<M>> = streams
            .by_ref()
            .take(n_cells)
            .map(|rng| Cell {
                replica: Box::new(template.clone()),
                rng,
            })
            .collect();

        pool.for_each_slot(&mut cells, |idx, cell| {
            let chain = idx % n_chains;
            cell.replica.set_exponent(0.);
            cell.replica
                .forward_sample(&mut cell.rng, false)
                .context("Failed to initialize a replica from the prior")?;
            cell.replica.set_exponent(ladder.exponent(chain));
            Ok(())
        })?;

        let mut cells = cells.into_iter();
        let columns = streams
            .map(|swap_rng| SlotColumn {
                cells: cells.by_ref().take(n_chains).collect(),
                swap_rng,
            })
            .collect();
        Ok(Self { columns })
    }
}

impl<M> ReplicaGrid<M> {
    pub fn n_slots(&self) -> usize {
        self.columns.len()
    }

    pub fn n_chains(&self) -> usize {
        self.columns.first().map_or(0, |column| column.cells.len())
    }

    pub fn state(&self, chain: usize, slot: usize) -> &M {
        &self.columns[slot].cells[chain].replica
    }

    pub fn state_mut(&mut self, chain: usize, slot: usize) -> &mut M {
        &mut self.columns[slot].cells[chain].replica
    }

    /// The replicas of one chain, in slot order.
    pub fn chain_states(&self, chain: usize) -> impl Iterator<Item = &M> {
        self.columns
            .iter()
            .map(move |column| &*column.cells[chain].replica)
    }
}

/// Run `n_passes` local update sweeps on every replica, all replicas in
/// parallel.
pub fn move_kernel<M: AnnealedModel>(
    grid: &mut ReplicaGrid<M>,
    n_passes: usize,
    pool: &WorkerPool,
) -> Result<()> {
    let mut cells: Vec<&mut Cell<M>> = grid
        .columns
        .iter_mut()
        .flat_map(|column| column.cells.iter_mut())
        .collect();
    pool.for_each_slot(&mut cells, |_, cell| {
        for _ in 0..n_passes {
            cell.replica.posterior_sampling_scan(&mut cell.rng)?;
        }
        Ok(())
    })
}

/// Log Metropolis ratio for exchanging the states of chains `i` and `i + 1`.
pub fn swap_log_ratio<M: AnnealedModel>(
    lower: &M,
    upper: &M,
    lower_exponent: f64,
    upper_exponent: f64,
) -> Result<f64> {
    let proposed = lower.log_density_at(upper_exponent)? + upper.log_density_at(lower_exponent)?;
    let current = lower.log_density_at(lower_exponent)? + upper.log_density_at(upper_exponent)?;
    Ok(proposed - current)
}

fn swap_column<M: AnnealedModel>(
    column: &mut SlotColumn<M>,
    ladder: &TemperatureLadder,
) -> Result<Vec<bool>> {
    let n_pairs = ladder.n_chains().saturating_sub(1);
    let mut outcomes = Vec::with_capacity(n_pairs);
    for i in 0..n_pairs {
        let (lower_exponent, upper_exponent) = (ladder.exponent(i), ladder.exponent(i + 1));
        let (head, tail) = column.cells.split_at_mut(i + 1);
        let lower = &mut head[i].replica;
        let upper = &mut tail[0].replica;

        let log_ratio = swap_log_ratio(&**lower, &**upper, lower_exponent, upper_exponent)?;
        if log_ratio.is_nan() {
            bail!("Swap acceptance ratio between chains {} and {} is NaN", i, i + 1);
        }
        let accept_pr = log_ratio.min(0.).exp();
        let accepted = column.swap_rng.random::<f64>() < accept_pr;
        if accepted {
            std::mem::swap(lower, upper);
            lower.set_exponent(lower_exponent);
            upper.set_exponent(upper_exponent);
        }
        outcomes.push(accepted);
    }
    Ok(outcomes)
}

/// Propose exchanges between every pair of adjacent chains in every slot.
///
/// Slots run in parallel, the pairs of a slot in ladder order. Returns one
/// batch of outcomes per adjacent pair, each with one entry per slot. A
/// single chain gives no batches.
pub fn swap_kernel<M: AnnealedModel>(
    grid: &mut ReplicaGrid<M>,
    ladder: &TemperatureLadder,
    pool: &WorkerPool,
) -> Result<Vec<Vec<bool>>> {
    let n_pairs = ladder.n_chains().saturating_sub(1);
    let per_slot = {
        let mut outcomes = vec![Vec::new(); grid.n_slots()];
        let mut work: Vec<_> = grid.columns.iter_mut().zip(outcomes.iter_mut()).collect();
        pool.for_each_slot(&mut work, |_, (column, out)| {
            **out = swap_column(column, ladder)?;
            Ok(())
        })?;
        outcomes
    };
    Ok((0..n_pairs)
        .map(|pair| per_slot.iter().map(|slot| slot[pair]).collect())
        .collect())
}

/// Summary of a parallel tempering run.
#[derive(Debug, Clone)]
pub struct TemperingReport {
    /// Mean swap acceptance for each adjacent pair of chains.
    pub swap_acceptance: Vec<f64>,
    /// Number of rows written to the samples table.
    pub n_samples: usize,
}

/// Parallel tempering engine.
pub struct ParallelTempering<M> {
    settings: PtSettings,
    model: Option<M>,
    grid: Option<ReplicaGrid<M>>,
    acceptance: Vec<AcceptanceAccumulator>,
}

impl<M: AnnealedModel> ParallelTempering<M> {
    pub fn new(settings: PtSettings) -> Self {
        Self {
            settings,
            model: None,
            grid: None,
            acceptance: Vec::new(),
        }
    }

    pub fn settings(&self) -> &PtSettings {
        &self.settings
    }

    /// The replicas after the last run, if any.
    pub fn grid(&self) -> Option<&ReplicaGrid<M>> {
        self.grid.as_ref()
    }

    /// The replicas of the chain targeting the posterior, in slot order.
    pub fn target_states(&self) -> Vec<&M> {
        match &self.grid {
            Some(grid) => grid
                .chain_states(self.settings.ladder.target_chain())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn acceptance(&self) -> &[AcceptanceAccumulator] {
        &self.acceptance
    }

    fn record_scan(
        &self,
        grid: &ReplicaGrid<M>,
        sink: &mut impl ResultSink,
        sample_index: &mut usize,
    ) -> Result<usize> {
        let ladder = &self.settings.ladder;
        let mut n_rows = 0;
        for slot in 0..grid.n_slots() {
            if self.settings.print_all_temperatures {
                for (chain, &exponent) in ladder.exponents().iter().enumerate() {
                    let state = grid.state(chain, slot);
                    let log_density = state.log_density_at(exponent)?;
                    write_sample(sink, *sample_index, Some(exponent), &state.sample_row(), log_density)?;
                    n_rows += 1;
                }
            } else {
                let state = grid.state(ladder.target_chain(), slot);
                let log_density = state.log_density()?;
                write_sample(sink, *sample_index, None, &state.sample_row(), log_density)?;
                n_rows += 1;
            }
            *sample_index += 1;
        }
        Ok(n_rows)
    }

    fn report_acceptance(&self, sink: &mut impl ResultSink) -> Result<Vec<f64>> {
        let ladder = &self.settings.ladder;
        let mut means = Vec::with_capacity(self.acceptance.len());
        for (chain, accumulator) in self.acceptance.iter().enumerate() {
            let pr = accumulator.mean();
            info!(chain, parameter = ladder.exponent(chain), pr, "Swap acceptance");
            sink.write(
                Namespace::Monitoring,
                SWAP_TABLE,
                vec![
                    (CHAIN_COLUMN, chain.into()),
                    (PARAMETER_COLUMN, ladder.exponent(chain).into()),
                    (PR_COLUMN, pr.into()),
                ],
            )?;
            means.push(pr);
        }
        Ok(means)
    }
}

impl<M: AnnealedModel> InferenceEngine<M> for ParallelTempering<M> {
    type Report = TemperingReport;

    fn bind_model(&mut self, model: M) {
        self.model = Some(model);
    }

    fn validate(&self) -> Result<(), EngineError> {
        self.settings.validate()
    }

    #[instrument(name = "parallel_tempering", skip_all)]
    fn run(&mut self, sink: &mut impl ResultSink) -> Result<TemperingReport> {
        self.validate()?;
        let Some(model) = self.model.as_ref() else {
            return Err(EngineError::ModelNotBound.into());
        };
        let settings = &self.settings;
        let ladder = &settings.ladder;
        let pool = WorkerPool::new(settings.num_threads)?;
        info!(
            n_chains = ladder.n_chains(),
            n_slots = settings.n_particles_per_temperature,
            n_threads = pool.num_threads(),
            "Parallel tempering started"
        );

        let mut grid = ReplicaGrid::initialize(
            model,
            ladder,
            settings.n_particles_per_temperature,
            settings.seed,
            &pool,
        )?;
        self.acceptance = vec![AcceptanceAccumulator::default(); ladder.n_chains() - 1];

        let mut sample_index = 0;
        let mut n_samples = 0;
        for scan in 0..settings.n_scans {
            move_kernel(&mut grid, settings.n_passes_per_scan, &pool)
                .with_context(|| format!("Move phase of scan {} failed", scan))?;
            n_samples += self.record_scan(&grid, sink, &mut sample_index)?;
            let batches = swap_kernel(&mut grid, ladder, &pool)
                .with_context(|| format!("Swap phase of scan {} failed", scan))?;
            for (accumulator, batch) in self.acceptance.iter_mut().zip(batches) {
                for accepted in batch {
                    accumulator.add(accepted);
                }
            }
            debug!(scan, "Scan finished");
        }

        let swap_acceptance = self.report_acceptance(sink)?;
        sink.flush()?;
        self.grid = Some(grid);
        Ok(TemperingReport {
            swap_acceptance,
            n_samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_models::NormalMeanModel;
    use pretty_assertions::assert_eq;

    fn grid(n_chains: usize, n_slots: usize) -> (ReplicaGrid<NormalMeanModel>, TemperatureLadder) {
        let ladder = TemperatureLadder::equally_spaced(n_chains).unwrap();
        let pool = WorkerPool::new(2).unwrap();
        let model = NormalMeanModel::new(vec![0.5, 1.0, 0.2], 1.0, 0.5);
        let grid = ReplicaGrid::initialize(&model, &ladder, n_slots, 5, &pool).unwrap();
        (grid, ladder)
    }

    #[test]
    fn accumulator_mean() {
        let mut acc = AcceptanceAccumulator::default();
        assert!(acc.mean().is_nan());
        acc.add(true);
        acc.add(false);
        acc.add(true);
        acc.add(true);
        assert_eq!(acc.mean(), 0.75);
        assert_eq!(acc.n_proposed(), 4);
    }

    #[test]
    fn initial_exponents_follow_ladder() {
        let (grid, ladder) = grid(4, 3);
        assert_eq!(grid.n_chains(), 4);
        assert_eq!(grid.n_slots(), 3);
        for slot in 0..3 {
            for chain in 0..4 {
                assert_eq!(grid.state(chain, slot).exponent(), ladder.exponent(chain));
            }
        }
    }

    #[test]
    fn swap_kernel_batches() {
        let pool = WorkerPool::new(2).unwrap();
        for n_chains in 1..5 {
            let (mut grid, ladder) = grid(n_chains, 3);
            let batches = swap_kernel(&mut grid, &ladder, &pool).unwrap();
            assert_eq!(batches.len(), n_chains - 1);
            assert!(batches.iter().all(|batch| batch.len() == 3));
        }
    }

    #[test]
    fn swaps_keep_exponents_and_replicas() {
        let pool = WorkerPool::new(2).unwrap();
        let (mut grid, ladder) = grid(4, 2);
        let mut before: Vec<f64> = (0..4).map(|c| grid.state(c, 1).mu()).collect();
        for _ in 0..20 {
            swap_kernel(&mut grid, &ladder, &pool).unwrap();
        }
        let mut after: Vec<f64> = (0..4).map(|c| grid.state(c, 1).mu()).collect();
        for chain in 0..4 {
            assert_eq!(grid.state(chain, 1).exponent(), ladder.exponent(chain));
        }
        // Swaps permute the states of a slot without creating or losing any.
        before.sort_by(f64::total_cmp);
        after.sort_by(f64::total_cmp);
        assert_eq!(before, after);
    }

    #[test]
    fn swap_ratio_is_zero_for_identical_exponents() {
        let model = NormalMeanModel::new(vec![1.0], 1.0, 0.5);
        let mut other = model.clone();
        other.set_mu(2.0);
        let ratio = swap_log_ratio(&model, &other, 0.3, 0.3).unwrap();
        assert!(ratio.abs() < 1e-12);
    }
}
