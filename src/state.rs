use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::composition::{Composition, almost_equals};
use crate::config::{Configuration, TransferModel};
use crate::error::{BlendError, Result};
use crate::model::{Combine, Fill, Group, Operation, Split, Transfer};

/// Snapshot of every container's content. Applying an operation never
/// modifies a state; it produces the next one.
#[derive(Clone)]
pub struct BlendState {
    configuration: Arc<Configuration>,
    contents: Vec<Option<Composition>>,
    depth: usize,
    occupied_volume: u32,
    occupied_count: usize,
    total_liquid: f64,
    best_container: Option<usize>,
    best_distance: f64,
    average_mix: Option<Composition>,
    average_distance: f64,
    transfers: OnceLock<Vec<Transfer>>,
}

impl BlendState {
    /// The root state: all containers empty, or with `prefill_liquids` the
    /// first K containers holding the K pure liquids.
    pub fn create(configuration: Arc<Configuration>) -> Self {
        let mut contents = vec![None; configuration.containers()];
        if configuration.options().prefill_liquids {
            let liquids = configuration.liquids();
            for (liquid, slot) in contents.iter_mut().enumerate().take(liquids) {
                let capacity = configuration.capacity(liquid) as f64;
                *slot = Some(Composition::pure(liquid, liquids).scale(capacity));
            }
        }
        Self::with_contents(configuration, contents, 0)
    }

    pub fn with_contents(
        configuration: Arc<Configuration>,
        contents: Vec<Option<Composition>>,
        depth: usize,
    ) -> Self {
        debug_assert_eq!(contents.len(), configuration.containers());

        let mut occupied_volume = 0;
        let mut occupied_count = 0;
        let mut total_liquid = 0.0;
        let mut best_container = None;
        let mut best_distance = f64::MAX;
        for (i, mix) in contents.iter().enumerate() {
            let Some(mix) = mix else { continue };
            occupied_volume += configuration.capacity(i);
            occupied_count += 1;
            total_liquid += mix.sum();
            let distance = configuration.target_distance(Some(mix));
            if distance < best_distance {
                best_distance = distance;
                best_container = Some(i);
            }
        }
        let proportions: Vec<Composition> = contents.iter().flatten().map(|m| m.sum_normalized()).collect();
        let average_mix = Composition::average(&proportions);
        let average_distance = configuration.target_distance(average_mix.as_ref());

        Self {
            configuration,
            contents,
            depth,
            occupied_volume,
            occupied_count,
            total_liquid,
            best_container,
            best_distance,
            average_mix,
            average_distance,
            transfers: OnceLock::new(),
        }
    }

    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.configuration
    }

    pub fn contents(&self) -> &[Option<Composition>] {
        &self.contents
    }

    pub fn content(&self, container: usize) -> Option<&Composition> {
        self.contents[container].as_ref()
    }

    pub fn is_occupied(&self, container: usize) -> bool {
        self.contents[container].is_some()
    }

    pub fn is_group_occupied(&self, group: &Group) -> bool {
        group.containers().iter().all(|&c| self.is_occupied(c))
    }

    pub fn is_group_empty(&self, group: &Group) -> bool {
        !group.containers().iter().any(|&c| self.is_occupied(c))
    }

    /// Number of operations applied since the root state.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn occupied_volume(&self) -> u32 {
        self.occupied_volume
    }

    pub fn occupied_count(&self) -> usize {
        self.occupied_count
    }

    pub fn total_liquid(&self) -> f64 {
        self.total_liquid
    }

    /// The occupied container whose proportions are closest to the target.
    pub fn best_container(&self) -> Option<usize> {
        self.best_container
    }

    pub fn best_mix(&self) -> Option<&Composition> {
        self.best_container.and_then(|i| self.content(i))
    }

    pub fn best_distance(&self) -> f64 {
        self.best_distance
    }

    pub fn average_mix(&self) -> Option<&Composition> {
        self.average_mix.as_ref()
    }

    pub fn average_distance(&self) -> f64 {
        self.average_distance
    }

    pub fn target_distance(&self, mix: &Composition) -> f64 {
        self.configuration.target_distance(Some(mix))
    }

    /// Pooled content of a group of containers.
    pub fn mix_of(&self, group: &Group) -> Composition {
        group
            .containers()
            .iter()
            .filter_map(|&c| self.content(c))
            .fold(Composition::zero(self.configuration.liquids()), |acc, m| &acc + m)
    }

    pub fn valid_fills(&self) -> impl Iterator<Item = Fill> + '_ {
        self.configuration
            .fills()
            .iter()
            .filter(|f| !self.is_occupied(f.container))
            .copied()
    }

    pub fn valid_combines(&self) -> impl Iterator<Item = Combine> + '_ {
        self.configuration
            .combines()
            .iter()
            .filter(|c| self.is_combine_ready(c))
            .copied()
    }

    pub fn valid_splits(&self) -> impl Iterator<Item = Split> + '_ {
        self.configuration
            .splits()
            .iter()
            .filter(|s| {
                self.is_occupied(s.input)
                    && !self.is_occupied(s.output_a)
                    && !self.is_occupied(s.output_b)
            })
            .copied()
    }

    fn is_combine_ready(&self, combine: &Combine) -> bool {
        self.is_occupied(combine.input_a)
            && self.is_occupied(combine.input_b)
            && !self.is_occupied(combine.output)
    }

    /// Group transfers from occupied groups into empty groups of equal volume.
    /// Computed on first use and kept for the lifetime of the state.
    pub fn valid_transfers(&self) -> &[Transfer] {
        self.transfers.get_or_init(|| self.compute_transfers())
    }

    fn compute_transfers(&self) -> Vec<Transfer> {
        let max = self.configuration.options().max_containers_per_transfer;
        let finder = self.configuration.subset_finder();
        let mut transfers = Vec::new();
        for inputs in self.configuration.groups() {
            if !self.is_group_occupied(inputs) {
                continue;
            }
            for outputs in finder.subsets_of_volume_up_to(inputs.volume(), max) {
                if !self.is_group_empty(&outputs) {
                    continue;
                }
                let transfer = Transfer::new(inputs.clone(), outputs);
                if !transfer.is_degenerate() {
                    transfers.push(transfer);
                }
            }
        }
        transfers
    }

    /// Every operation that may be applied to this state.
    ///
    /// The pairwise model offers fills and combines. The group model adds
    /// splits and the group transfers not already shaped like a combine or split.
    pub fn valid_operations(&self) -> Vec<Operation> {
        let mut operations: Vec<Operation> = self.valid_fills().map(Operation::from).collect();
        operations.extend(self.valid_combines().map(Operation::from));
        if self.configuration.options().transfer_model == TransferModel::Group {
            operations.extend(self.valid_splits().map(Operation::from));
            operations.extend(
                self.valid_transfers()
                    .iter()
                    .filter(|t| !is_pairwise_shaped(t))
                    .cloned()
                    .map(Operation::from),
            );
        }
        operations
    }

    pub fn is_valid_operation(&self, operation: &Operation) -> bool {
        let capacity = |c: usize| self.configuration.capacity(c);
        match operation {
            Operation::Fill(fill) => {
                self.configuration.contains_all(&[fill.container])
                    && fill.liquid < self.configuration.liquids()
                    && !self.is_occupied(fill.container)
            }
            Operation::Combine(combine) => {
                self.configuration.is_valid_combine(combine) && self.is_combine_ready(combine)
            }
            Operation::Split(split) => {
                self.configuration.is_valid_split(split)
                    && self.is_occupied(split.input)
                    && !self.is_occupied(split.output_a)
                    && !self.is_occupied(split.output_b)
            }
            Operation::MultiTransfer(transfer) => {
                if !self.configuration.contains_all(transfer.inputs.containers())
                    || !self.configuration.contains_all(transfer.outputs.containers())
                {
                    return false;
                }
                let input_volume: u32 = transfer.inputs.containers().iter().map(|&c| capacity(c)).sum();
                let output_volume: u32 = transfer.outputs.containers().iter().map(|&c| capacity(c)).sum();
                !transfer.inputs.is_empty()
                    && input_volume == output_volume
                    && transfer.inputs.is_valid()
                    && transfer.outputs.is_valid()
                    && transfer.inputs.is_disjoint(&transfer.outputs)
                    && !transfer.is_degenerate()
                    && self.is_group_occupied(&transfer.inputs)
                    && self.is_group_empty(&transfer.outputs)
            }
        }
    }

    /// Produces the state after `operation`. The operation must come from
    /// [`valid_operations`](Self::valid_operations) or pass
    /// [`is_valid_operation`](Self::is_valid_operation).
    pub fn apply(&self, operation: &Operation) -> BlendState {
        debug_assert!(self.is_valid_operation(operation), "invalid operation: {operation}");
        let capacity = |c: usize| self.configuration.capacity(c) as f64;
        let mut contents = self.contents.clone();

        match operation {
            Operation::Fill(fill) => {
                let pure = Composition::pure(fill.liquid, self.configuration.liquids());
                contents[fill.container] = Some(pure.scale(capacity(fill.container)));
            }
            Operation::Combine(combine) => {
                let (Some(a), Some(b)) = (
                    contents[combine.input_a].take(),
                    contents[combine.input_b].take(),
                ) else {
                    unreachable!("combine inputs must be occupied");
                };
                let mixed = Composition::combine(
                    &a,
                    capacity(combine.input_a),
                    &b,
                    capacity(combine.input_b),
                );
                contents[combine.output] = Some(mixed);
            }
            Operation::Split(split) => {
                let Some(mix) = contents[split.input].take() else {
                    unreachable!("split input must be occupied");
                };
                let total = capacity(split.input);
                for output in [split.output_a, split.output_b] {
                    contents[output] = Some(mix.scale(capacity(output) / total));
                }
            }
            Operation::MultiTransfer(transfer) => {
                let pooled = self.mix_of(&transfer.inputs);
                for &input in transfer.inputs.containers() {
                    contents[input] = None;
                }
                let total = transfer.outputs.volume() as f64;
                debug_assert!(almost_equals(pooled.sum(), total));
                let mut redistributed = 0.0;
                for &output in transfer.outputs.containers() {
                    debug_assert!(contents[output].is_none(), "transfer into occupied container {output}");
                    let share = pooled.scale(capacity(output) / total);
                    redistributed += share.sum();
                    contents[output] = Some(share);
                }
                debug_assert!(almost_equals(redistributed, total));
            }
        }

        let next = BlendState::with_contents(Arc::clone(&self.configuration), contents, self.depth + 1);
        if !matches!(operation, Operation::Fill(_)) {
            debug_assert!(
                almost_equals(next.total_liquid, self.total_liquid),
                "liquid not conserved by {operation}"
            );
        }
        next
    }

    pub fn next_states(&self) -> Vec<BlendState> {
        self.valid_operations().iter().map(|op| self.apply(op)).collect()
    }

    pub fn check_total_liquid(&self, expected: f64) -> Result<()> {
        if almost_equals(self.total_liquid, expected) {
            Ok(())
        } else {
            Err(BlendError::Invariant(format!(
                "expected {expected} units of liquid but found {}",
                self.total_liquid
            )))
        }
    }

    /// Every occupied container holds exactly its capacity.
    pub fn check_capacities(&self) -> Result<()> {
        for (i, mix) in self.contents.iter().enumerate() {
            let Some(mix) = mix else { continue };
            let capacity = self.configuration.capacity(i) as f64;
            if !almost_equals(mix.sum(), capacity) {
                return Err(BlendError::Invariant(format!(
                    "container {i} holds {} but has capacity {capacity}",
                    mix.sum()
                )));
            }
        }
        Ok(())
    }

    /// All states reachable from this one through combines alone.
    pub fn combine_tree(&self) -> Vec<BlendState> {
        let mut states = Vec::new();
        let mut pending = vec![self.clone()];
        while let Some(state) = pending.pop() {
            for combine in state.valid_combines() {
                let next = state.apply(&Operation::Combine(combine));
                pending.push(next.clone());
                states.push(next);
            }
        }
        states
    }

    /// All states reachable within `max_depth` operations, root excluded.
    pub fn operation_tree(&self, max_depth: usize) -> Vec<BlendState> {
        let mut states = Vec::new();
        let mut pending = vec![(self.clone(), max_depth)];
        while let Some((state, remaining)) = pending.pop() {
            if remaining == 0 {
                continue;
            }
            for op in state.valid_operations() {
                let next = state.apply(&op);
                pending.push((next.clone(), remaining - 1));
                states.push(next);
            }
        }
        states
    }
}

fn is_pairwise_shaped(transfer: &Transfer) -> bool {
    matches!((transfer.inputs.len(), transfer.outputs.len()), (2, 1) | (1, 2))
}

impl fmt::Display for BlendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "depth={} volume={} containers={}/{}",
            self.depth,
            self.occupied_volume,
            self.occupied_count,
            self.contents.len()
        )?;
        for (i, mix) in self.contents.iter().enumerate() {
            if let Some(mix) = mix {
                writeln!(
                    f,
                    "container {i} (size {}) holds {} at distance {:.4}",
                    self.configuration.capacity(i),
                    mix.sum_normalized(),
                    self.target_distance(mix)
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchOptions;

    fn config(capacities: Vec<u32>, target: Vec<f64>, options: SearchOptions) -> Arc<Configuration> {
        Arc::new(Configuration::new(capacities, Composition::new(target), options).unwrap())
    }

    fn fill(container: usize, liquid: usize) -> Operation {
        Operation::Fill(Fill { container, liquid })
    }

    #[test]
    fn root_is_empty_by_default() {
        let state = BlendState::create(config(vec![1, 1, 2], vec![0.5, 0.5], SearchOptions::default()));
        assert_eq!(state.occupied_count(), 0);
        assert_eq!(state.depth(), 0);
        assert_eq!(state.best_distance(), f64::MAX);
        assert!(state.best_mix().is_none());
        assert_eq!(state.valid_fills().count(), 6);
        assert_eq!(state.valid_combines().count(), 0);
    }

    #[test]
    fn prefilled_root_holds_pure_liquids() {
        let options = SearchOptions::default().with_prefilled_liquids(true);
        let state = BlendState::create(config(vec![2, 3, 5], vec![0.4, 0.6], options));
        assert_eq!(state.occupied_count(), 2);
        assert_eq!(state.content(0).unwrap().values(), &[2.0, 0.0]);
        assert_eq!(state.content(1).unwrap().values(), &[0.0, 3.0]);
        assert!(!state.is_occupied(2));
        assert!(almost_equals(state.total_liquid(), 5.0));
    }

    #[test]
    fn combine_blends_and_clears_inputs() {
        let root = BlendState::create(config(vec![1, 1, 2], vec![0.5, 0.5], SearchOptions::default()));
        let state = root.apply(&fill(0, 0)).apply(&fill(1, 1));
        let combine = Operation::Combine(Combine { input_a: 0, input_b: 1, output: 2 });
        assert!(state.is_valid_operation(&combine));
        let mixed = state.apply(&combine);
        assert!(!mixed.is_occupied(0));
        assert!(!mixed.is_occupied(1));
        assert_eq!(mixed.content(2).unwrap().values(), &[1.0, 1.0]);
        assert!(almost_equals(mixed.best_distance(), 0.0));
        assert_eq!(mixed.depth(), 3);
        assert!(mixed.check_capacities().is_ok());
        assert!(mixed.check_total_liquid(2.0).is_ok());
    }

    #[test]
    fn split_divides_by_capacity() {
        let options = SearchOptions::default().with_transfer_model(TransferModel::Group);
        let root = BlendState::create(config(vec![1, 3, 4], vec![0.5, 0.5], options));
        let full = root.apply(&fill(2, 0));
        let split = Operation::Split(Split { input: 2, output_a: 0, output_b: 1 });
        assert!(full.valid_operations().contains(&split));
        let next = full.apply(&split);
        assert!(almost_equals(next.content(0).unwrap().sum(), 1.0));
        assert!(almost_equals(next.content(1).unwrap().sum(), 3.0));
        assert!(next.check_capacities().is_ok());
    }

    #[test]
    fn group_transfer_redistributes_pooled_mix() {
        let options = SearchOptions::default().with_transfer_model(TransferModel::Group);
        let root = BlendState::create(config(vec![1, 2, 1, 2], vec![0.5, 0.5], options));
        let state = root.apply(&fill(0, 0)).apply(&fill(1, 1));
        let transfer = Transfer::new(Group::new(3, vec![0, 1]), Group::new(3, vec![2, 3]));
        assert!(state.valid_transfers().contains(&transfer));
        let next = state.apply(&Operation::MultiTransfer(transfer));
        let small = next.content(2).unwrap();
        let large = next.content(3).unwrap();
        assert!(almost_equals(small.sum(), 1.0));
        assert!(almost_equals(large.sum(), 2.0));
        assert!(almost_equals(small.values()[0] * 3.0, 1.0));
        assert!(next.check_total_liquid(state.total_liquid()).is_ok());
    }

    #[test]
    fn degenerate_transfers_are_excluded() {
        let options = SearchOptions::default().with_transfer_model(TransferModel::Group);
        let root = BlendState::create(config(vec![2, 2], vec![1.0], options));
        let state = root.apply(&fill(0, 0));
        assert!(state.valid_transfers().is_empty());
        let one_to_one = Transfer::new(Group::new(2, vec![0]), Group::new(2, vec![1]));
        assert!(!state.is_valid_operation(&Operation::MultiTransfer(one_to_one)));
    }

    #[test]
    fn out_of_range_containers_are_invalid() {
        let options = SearchOptions::default().with_transfer_model(TransferModel::Group);
        let state = BlendState::create(config(vec![1, 1, 2], vec![0.5, 0.5], options)).apply(&fill(0, 0));
        let invalid = [
            fill(3, 0),
            Operation::Combine(Combine { input_a: 0, input_b: 1, output: 7 }),
            Operation::Split(Split { input: 9, output_a: 0, output_b: 1 }),
            Operation::MultiTransfer(Transfer::new(Group::new(2, vec![2]), Group::new(2, vec![1, 5]))),
        ];
        for op in &invalid {
            assert!(!state.is_valid_operation(op), "{op}");
        }
    }

    #[test]
    fn large_capacities_enumerate_transfers() {
        let options = SearchOptions::default().with_transfer_model(TransferModel::Group);
        let root = BlendState::create(config(vec![1, 20000, 20000], vec![1.0], options));
        let state = root.apply(&fill(1, 0));
        assert!(state.valid_transfers().is_empty());
        let finder = state.configuration().subset_finder();
        assert_eq!(finder.subsets_of_volume(20001).len(), 2);
    }

    #[test]
    fn occupied_targets_are_invalid() {
        let root = BlendState::create(config(vec![1, 1, 2], vec![0.5, 0.5], SearchOptions::default()));
        let state = root.apply(&fill(0, 0));
        assert!(!state.is_valid_operation(&fill(0, 1)));
        let combine = Operation::Combine(Combine { input_a: 0, input_b: 1, output: 2 });
        assert!(!state.is_valid_operation(&combine));
    }

    #[test]
    fn combine_tree_reaches_nested_blends() {
        let root = BlendState::create(config(vec![1, 1, 2, 1, 3], vec![0.5, 0.5], SearchOptions::default()));
        let state = root.apply(&fill(0, 0)).apply(&fill(1, 1)).apply(&fill(3, 0));
        let tree = state.combine_tree();
        assert!(tree.iter().any(|s| s.is_occupied(4)));
        for s in &tree {
            assert!(s.check_total_liquid(state.total_liquid()).is_ok());
        }
    }

    #[test]
    fn operation_tree_is_depth_bounded() {
        let root = BlendState::create(config(vec![1, 1, 2], vec![0.5, 0.5], SearchOptions::default()));
        let tree = root.operation_tree(2);
        assert!(tree.iter().all(|s| s.depth() <= 2));
        // 6 fills, then for each 4 more fills on the remaining empties
        assert_eq!(tree.len(), 6 + 6 * 4);
    }
}
