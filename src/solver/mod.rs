use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

use crate::error::{Error, Result};

pub mod config;
pub mod monte_carlo;

// Number of actions available in every state.
pub const ACTION_COUNT: usize = 2;

// An action of a two-action game, addressable by its table index.
pub trait BinaryAction: Copy + Eq + Debug {
    fn index(self) -> usize;

    // Panics if index is not below ACTION_COUNT.
    fn from_index(index: usize) -> Self;
}

#[derive(Clone, Debug, PartialEq)]
pub struct Step<S> {
    // Meaningful only if the episode hasn't terminated.
    pub state: S,
    pub reward: f64,
    pub terminated: bool,
}

// Stochastic episodic simulator driven by the solver.
pub trait Environment {
    type State: Copy + Eq + Hash + Debug;
    type Action: BinaryAction;

    // Starts a new episode and returns its initial state.
    fn reset(&mut self) -> Self::State;

    // Applies the action to the episode in flight.
    fn step(&mut self, action: Self::Action) -> Result<Step<Self::State>>;

    // Releases the environment once a run is over.
    fn close(&mut self);

    // Rewards the environment is allowed to report.
    fn valid_rewards(&self) -> &[f64] {
        &[-1.0, 0.0, 1.0]
    }
}

// Fails with InvalidReward unless the reward is one the environment declared.
pub fn check_reward<E: Environment>(env: &E, reward: f64) -> Result<f64> {
    let allowed = env.valid_rewards();
    if allowed.iter().any(|r| (r - reward).abs() < 1e-9) {
        Ok(reward)
    } else {
        Err(Error::InvalidReward {
            reward,
            allowed: allowed.to_vec(),
        })
    }
}

// Index of the maximal value. Ties go to the lowest index.
pub fn greedy_index(values: &[f64; ACTION_COUNT]) -> usize {
    let mut best = 0;
    for i in 1..ACTION_COUNT {
        if values[i] > values[best] {
            best = i;
        }
    }
    best
}

fn unknown_state<S: Debug>(state: &S) -> Error {
    Error::UnknownState(format!("{:?}", state))
}

// Policy (P), action values (Q) and visit counts (N) over a fixed state space.
//
// States are only added while the space is enumerated; every lookup of a state
// that was never inserted fails with `Error::UnknownState`.
#[derive(Clone, Debug)]
pub struct Tables<S: Eq + Hash, A> {
    policy: HashMap<S, A>,
    values: HashMap<S, [f64; ACTION_COUNT]>,
    counts: HashMap<S, [u64; ACTION_COUNT]>,
    // States whose policy and values are given rather than learned.
    fixed: HashSet<S>,
}

impl<S, A> Tables<S, A>
where
    S: Copy + Eq + Hash + Debug,
    A: BinaryAction,
{
    pub fn new() -> Self {
        Tables {
            policy: HashMap::new(),
            values: HashMap::new(),
            counts: HashMap::new(),
            fixed: HashSet::new(),
        }
    }

    // Adds a learned state with zero values and counts.
    // Returns false if the state was already present (the tables are left unchanged).
    pub fn insert(&mut self, state: S, action: A) -> bool {
        if self.contains(&state) {
            return false;
        }
        self.policy.insert(state, action);
        self.values.insert(state, [0.0; ACTION_COUNT]);
        self.counts.insert(state, [0; ACTION_COUNT]);
        true
    }

    // Adds a state whose policy and values training must not change.
    pub fn insert_fixed(&mut self, state: S, action: A, values: [f64; ACTION_COUNT]) -> bool {
        if !self.insert(state, action) {
            return false;
        }
        self.values.insert(state, values);
        self.fixed.insert(state);
        true
    }

    pub fn contains(&self, state: &S) -> bool {
        self.policy.contains_key(state)
    }

    pub fn ensure_known(&self, state: &S) -> Result<()> {
        if self.contains(state) {
            Ok(())
        } else {
            Err(unknown_state(state))
        }
    }

    pub fn is_fixed(&self, state: &S) -> bool {
        self.fixed.contains(state)
    }

    pub fn len(&self) -> usize {
        self.policy.len()
    }

    pub fn policy(&self, state: &S) -> Result<A> {
        self.policy
            .get(state)
            .copied()
            .ok_or_else(|| unknown_state(state))
    }

    pub fn values(&self, state: &S) -> Result<[f64; ACTION_COUNT]> {
        self.values
            .get(state)
            .copied()
            .ok_or_else(|| unknown_state(state))
    }

    pub fn counts(&self, state: &S) -> Result<[u64; ACTION_COUNT]> {
        self.counts
            .get(state)
            .copied()
            .ok_or_else(|| unknown_state(state))
    }

    pub fn states(&self) -> impl Iterator<Item = &S> {
        self.policy.keys()
    }
}
