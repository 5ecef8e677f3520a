use std::fmt::Debug;
use std::hash::Hash;

use log::{debug, info};
use rand::prelude::*;

use crate::error::Result;
use crate::solver::config::Config;
use crate::solver::*;

// (state, action, immediate reward) of every step, in the order they were taken.
pub type Episode<S, A> = Vec<(S, A, f64)>;

#[derive(Clone, Debug, Default)]
pub struct ValueEstimate {
    pub avg: f64,
    pub count: u64,
}

impl ValueEstimate {
    pub fn update(&mut self, value: f64) {
        self.count += 1;
        self.avg = incremental_mean(self.avg, value, self.count);
    }
}

// Mean of `count` samples given the mean of the first `count - 1` and the last one.
fn incremental_mean(avg: f64, value: f64, count: u64) -> f64 {
    avg + (value - avg) / count as f64
}

// Result of running a fixed policy.
#[derive(Clone, Debug)]
pub struct Evaluation {
    pub average_reward: f64,
    // Running average after every `sample_interval` episodes.
    pub samples: Vec<f64>,
    pub sample_interval: u64,
}

// Plays one episode. The first action is chosen uniformly at random regardless of the
// policy (exploring starts), every later one is taken from the policy table.
pub fn generate_episode<E, R>(
    env: &mut E,
    tables: &Tables<E::State, E::Action>,
    rng: &mut R,
) -> Result<Episode<E::State, E::Action>>
where
    E: Environment,
    R: Rng,
{
    let mut state = env.reset();
    tables.ensure_known(&state)?;
    let mut action = E::Action::from_index(rng.gen_range(0..ACTION_COUNT));

    let mut episode = Vec::new();
    loop {
        let step = env.step(action)?;
        let reward = check_reward(env, step.reward)?;
        episode.push((state, action, reward));
        if step.terminated {
            break;
        }
        state = step.state;
        action = tables.policy(&state)?;
    }
    Ok(episode)
}

// Replays the episode backward, accumulating the discounted return and folding it into
// the running mean of every (state, action) taken. The policy of each touched state is
// made greedy right after its update.
pub fn update_action_values<S, A>(
    tables: &mut Tables<S, A>,
    episode: &[(S, A, f64)],
    discount: f64,
) -> Result<()>
where
    S: Copy + Eq + Hash + Debug,
    A: BinaryAction,
{
    let max_reward = episode.iter().fold(0.0_f64, |m, (_, _, r)| m.max(r.abs()));
    let mut horizon = episode.len() as f64;
    if discount < 1.0 {
        horizon = horizon.min(1.0 / (1.0 - discount));
    }
    let bound = max_reward * horizon;

    let mut returns = 0.0;
    for (state, action, reward) in episode.iter().rev() {
        returns = reward + discount * returns;
        debug_assert!(
            returns.abs() <= bound + 1e-9,
            "Return {} escapes bound {}",
            returns,
            bound
        );

        let a = action.index();
        let counts = tables
            .counts
            .get_mut(state)
            .ok_or_else(|| unknown_state(state))?;
        counts[a] += 1;
        let count = counts[a];

        if tables.is_fixed(state) {
            continue;
        }

        let values = tables
            .values
            .get_mut(state)
            .ok_or_else(|| unknown_state(state))?;
        values[a] = incremental_mean(values[a], returns, count);

        improve_policy(tables, state)?;
    }
    Ok(())
}

// Makes the policy greedy with respect to the current action values of the state.
pub fn improve_policy<S, A>(tables: &mut Tables<S, A>, state: &S) -> Result<()>
where
    S: Copy + Eq + Hash + Debug,
    A: BinaryAction,
{
    let best = A::from_index(greedy_index(&tables.values(state)?));
    let current = tables
        .policy
        .get_mut(state)
        .ok_or_else(|| unknown_state(state))?;
    if *current != best {
        *current = best;
    }
    Ok(())
}

// Monte Carlo control with exploring starts for `config.episode_count` episodes.
// The environment is closed once the run is over, whether it completed or failed.
pub fn train<E, R>(
    env: &mut E,
    mut tables: Tables<E::State, E::Action>,
    config: &Config,
    rng: &mut R,
) -> Result<Tables<E::State, E::Action>>
where
    E: Environment,
    R: Rng,
{
    config.validate()?;
    info!(
        "Training on {} episodes, discount {}",
        config.episode_count, config.discount_factor
    );

    let result = train_episodes(env, &mut tables, config, rng);
    env.close();
    result.map(|_| tables)
}

fn train_episodes<E, R>(
    env: &mut E,
    tables: &mut Tables<E::State, E::Action>,
    config: &Config,
    rng: &mut R,
) -> Result<()>
where
    E: Environment,
    R: Rng,
{
    let report_interval = (config.episode_count / 10).max(1);
    for i in 1..=config.episode_count {
        let episode = generate_episode(env, tables, rng)?;
        update_action_values(tables, &episode, config.discount_factor)?;
        if i % report_interval == 0 {
            info!("Trained on {}/{} episodes", i, config.episode_count);
        }
    }
    Ok(())
}

// Runs a fixed policy and tracks the running average of the terminal reward.
// No table is involved; the policy may be any function of the state.
pub fn evaluate_policy<E, P>(env: &mut E, mut policy: P, config: &Config) -> Result<Evaluation>
where
    E: Environment,
    P: FnMut(&E::State) -> Result<E::Action>,
{
    config.validate()?;
    debug!(
        "Evaluating a policy on {} episodes, sampling every {}",
        config.episode_count, config.sample_interval
    );

    let result = evaluate_episodes(env, &mut policy, config);
    env.close();
    result
}

fn evaluate_episodes<E, P>(env: &mut E, policy: &mut P, config: &Config) -> Result<Evaluation>
where
    E: Environment,
    P: FnMut(&E::State) -> Result<E::Action>,
{
    let mut average = ValueEstimate::default();
    let mut samples =
        Vec::with_capacity((config.episode_count / config.sample_interval) as usize);
    for _ in 0..config.episode_count {
        let mut state = env.reset();
        loop {
            let action = policy(&state)?;
            let step = env.step(action)?;
            let reward = check_reward(env, step.reward)?;
            if step.terminated {
                average.update(reward);
                if average.count % config.sample_interval == 0 {
                    samples.push(average.avg);
                }
                break;
            }
            state = step.state;
        }
    }

    Ok(Evaluation {
        average_reward: average.avg,
        samples,
        sample_interval: config.sample_interval,
    })
}
