use std::fmt;

/// An ascending, duplicate-free list of container indices with its total capacity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Group {
    volume: u32,
    containers: Vec<usize>,
}

impl Group {
    pub fn new(volume: u32, containers: Vec<usize>) -> Self {
        let group = Self { volume, containers };
        debug_assert!(group.is_valid(), "group indices must be strictly ascending");
        group
    }

    /// Builds a group from arbitrary indices, sorting them and summing capacities.
    pub fn from_indices(mut containers: Vec<usize>, capacities: &[u32]) -> Self {
        containers.sort_unstable();
        containers.dedup();
        let volume = containers.iter().map(|&i| capacities[i]).sum();
        Self { volume, containers }
    }

    pub fn volume(&self) -> u32 {
        self.volume
    }

    pub fn containers(&self) -> &[usize] {
        &self.containers
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn last(&self) -> Option<usize> {
        self.containers.last().copied()
    }

    pub fn contains(&self, container: usize) -> bool {
        self.containers.binary_search(&container).is_ok()
    }

    pub fn is_disjoint(&self, other: &Group) -> bool {
        !self.containers.iter().any(|&c| other.contains(c))
    }

    pub fn is_valid(&self) -> bool {
        self.containers.windows(2).all(|w| w[0] < w[1])
    }

    /// A copy of this group with `container` appended; it must be greater than the last index.
    pub fn extended(&self, container: usize, capacity: u32) -> Group {
        let mut containers = self.containers.clone();
        containers.push(container);
        Group::new(self.volume + capacity, containers)
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.containers.iter().map(|c| c.to_string()).collect();
        write!(f, "({})", parts.join(","))
    }
}

/// Fill an empty container completely with one pure liquid.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fill {
    pub container: usize,
    pub liquid: usize,
}

/// Pour two occupied containers into an empty one of exactly their combined capacity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Combine {
    pub input_a: usize,
    pub input_b: usize,
    pub output: usize,
}

impl Combine {
    pub fn inputs(&self) -> [usize; 2] {
        [self.input_a, self.input_b]
    }
}

/// Divide one occupied container between two empty ones whose capacities add up to it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Split {
    pub input: usize,
    pub output_a: usize,
    pub output_b: usize,
}

/// Pool a group of occupied containers and redistribute into a group of empty ones.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Transfer {
    pub inputs: Group,
    pub outputs: Group,
}

impl Transfer {
    pub fn new(inputs: Group, outputs: Group) -> Self {
        debug_assert_eq!(inputs.volume(), outputs.volume());
        Self { inputs, outputs }
    }

    /// A single container poured into a single container of equal size changes nothing.
    pub fn is_degenerate(&self) -> bool {
        self.inputs.len() <= 1 && self.outputs.len() <= 1
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Fill(Fill),
    Combine(Combine),
    Split(Split),
    MultiTransfer(Transfer),
}

impl From<Fill> for Operation {
    fn from(fill: Fill) -> Self {
        Operation::Fill(fill)
    }
}

impl From<Combine> for Operation {
    fn from(combine: Combine) -> Self {
        Operation::Combine(combine)
    }
}

impl From<Split> for Operation {
    fn from(split: Split) -> Self {
        Operation::Split(split)
    }
}

impl From<Transfer> for Operation {
    fn from(transfer: Transfer) -> Self {
        Operation::MultiTransfer(transfer)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Fill(op) => write!(f, "Fill container {} with liquid {}", op.container, op.liquid),
            Operation::Combine(op) => write!(
                f,
                "Combine containers {} and {} into container {}",
                op.input_a, op.input_b, op.output
            ),
            Operation::Split(op) => write!(
                f,
                "Split container {} into containers {} and {}",
                op.input, op.output_a, op.output_b
            ),
            Operation::MultiTransfer(op) => write!(f, "Transfer {} -> {}", op.inputs, op.outputs),
        }
    }
}
