use log::{debug, info};
use plotlib::{
    page::Page,
    repr::Plot,
    style::{PointMarker, PointStyle},
    view::ContinuousView,
};
use prettytable::{Cell, Row, Table};
use rand::prelude::*;

use crate::error::{Error, Result};
use crate::solver::config::Config;
use crate::solver::monte_carlo::{self, Evaluation};
use crate::solver::*;

const TRAINING_EPISODES: u64 = 4_000_000;
const EVALUATION_EPISODES: u64 = 100_000;
const DISCOUNT: f64 = 0.95;
const SAMPLE_INTERVAL: u64 = 100;
// Fixed seed for a reproducible run; entropy when None.
const SEED: Option<u64> = None;
// Pay the natural bonus.
const NATURAL: bool = false;

// Reward of a winning two-card 21 when the natural rule is on.
const NATURAL_REWARD: f64 = 1.5;

static REWARDS: [f64; 3] = [-1.0, 0.0, 1.0];
static NATURAL_REWARDS: [f64; 4] = [-1.0, 0.0, 1.0, NATURAL_REWARD];

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Card {
    Ace,
    Value(u32),
    Face,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Action {
    Stand,
    Hit,
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Hand {
    // Value counts usable ace as 11.
    value: u32,
    usable_ace: bool,
}

// What the player sees: own total, the dealer's face-up card (ace is 1) and
// whether an ace in the hand is counted as 11.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct State {
    pub player_total: u32,
    pub dealer_card: u32,
    pub usable_ace: bool,
}

impl Card {
    // Face value, with ace counted as 1.
    pub fn value(&self) -> u32 {
        match self {
            Card::Ace => 1,
            Card::Value(v) => *v,
            Card::Face => 10,
        }
    }
}

impl BinaryAction for Action {
    fn index(self) -> usize {
        match self {
            Action::Stand => 0,
            Action::Hit => 1,
        }
    }

    fn from_index(index: usize) -> Self {
        match index {
            0 => Action::Stand,
            1 => Action::Hit,
            _ => panic!("No action with index {}", index),
        }
    }
}

impl Hand {
    #[cfg(test)]
    fn from_cards(cards: &[Card]) -> Hand {
        let mut hand = Hand::default();
        for c in cards {
            hand = hand.add_card(*c);
        }
        hand
    }

    fn add_card(&self, card: Card) -> Hand {
        let mut hand = *self;
        match card {
            Card::Ace => {
                if !hand.usable_ace && hand.value <= 10 {
                    hand.usable_ace = true;
                    hand.value += 11;
                } else {
                    hand.value += 1;
                }
            }
            Card::Value(v) => hand.value += v,
            Card::Face => hand.value += 10,
        }

        if hand.value > 21 && hand.usable_ace {
            hand.value -= 10;
            hand.usable_ace = false;
        }
        hand
    }

    fn is_bust(&self) -> bool {
        self.value > 21
    }
}

// Infinite deck: every rank is equally likely on every draw.
fn random_card<R: Rng>(rng: &mut R) -> Card {
    match rng.gen_range(1..=13) {
        1 => Card::Ace,
        r @ 2..=10 => Card::Value(r),
        _ => Card::Face,
    }
}

// Blackjack against a dealer who draws to 17 and stands on soft 17.
pub struct BlackjackEnv<R: Rng> {
    rng: R,
    player: Hand,
    dealer: Hand,
    dealer_card: Card,
    // Pay 1.5 for a winning two-card 21.
    natural: bool,
    player_natural: bool,
    in_progress: bool,
}

impl<R: Rng> BlackjackEnv<R> {
    pub fn new(rng: R) -> Self {
        BlackjackEnv {
            rng,
            player: Hand::default(),
            dealer: Hand::default(),
            dealer_card: Card::Ace,
            natural: false,
            player_natural: false,
            in_progress: false,
        }
    }

    pub fn with_natural(mut self, natural: bool) -> Self {
        self.natural = natural;
        self
    }

    fn observe(&self) -> State {
        State {
            player_total: self.player.value,
            dealer_card: self.dealer_card.value(),
            usable_ace: self.player.usable_ace,
        }
    }

    fn draw(&mut self, hand: Hand) -> Hand {
        hand.add_card(random_card(&mut self.rng))
    }

    // Plays out the dealer's hand and scores it against the player's.
    fn settle(&mut self) -> f64 {
        while self.dealer.value < 17 {
            self.dealer = self.draw(self.dealer);
        }

        let reward = if self.dealer.is_bust() || self.player.value > self.dealer.value {
            1.0
        } else if self.player.value < self.dealer.value {
            -1.0
        } else {
            0.0
        };

        if self.natural && self.player_natural && reward > 0.0 {
            NATURAL_REWARD
        } else {
            reward
        }
    }
}

impl<R: Rng> Environment for BlackjackEnv<R> {
    type State = State;
    type Action = Action;

    fn reset(&mut self) -> State {
        self.dealer_card = random_card(&mut self.rng);
        let dealer = Hand::default().add_card(self.dealer_card);
        // Hidden card.
        self.dealer = self.draw(dealer);

        let player = self.draw(Hand::default());
        self.player = self.draw(player);
        self.player_natural = self.player.value == 21;
        self.in_progress = true;
        self.observe()
    }

    fn step(&mut self, action: Action) -> Result<Step<State>> {
        if !self.in_progress {
            return Err(Error::Environment(
                "step called with no episode in progress".to_string(),
            ));
        }

        match action {
            Action::Hit => {
                self.player = self.draw(self.player);
                self.player_natural = false;
                if self.player.is_bust() {
                    // Player has gone bust.
                    self.in_progress = false;
                    return Ok(Step {
                        state: self.observe(),
                        reward: -1.0,
                        terminated: true,
                    });
                }
                Ok(Step {
                    state: self.observe(),
                    reward: 0.0,
                    terminated: false,
                })
            }
            Action::Stand => {
                self.in_progress = false;
                let reward = self.settle();
                Ok(Step {
                    state: self.observe(),
                    reward,
                    terminated: true,
                })
            }
        }
    }

    fn close(&mut self) {
        self.in_progress = false;
        debug!("Blackjack environment closed");
    }

    fn valid_rewards(&self) -> &[f64] {
        if self.natural {
            &NATURAL_REWARDS[..]
        } else {
            &REWARDS[..]
        }
    }
}

// All states a player can observe before the episode ends.
pub fn state_space() -> Vec<State> {
    let mut states = Vec::new();
    for player_total in 4..=21 {
        // An ace can only be counted as 11 in a total of at least 12.
        for &usable_ace in [false, true].iter().take(if player_total >= 12 { 2 } else { 1 }) {
            for dealer_card in 1..=10 {
                states.push(State {
                    player_total,
                    dealer_card,
                    usable_ace,
                });
            }
        }
    }
    states
}

// Hard 21: hitting can only lose, so standing is fixed instead of learned.
fn is_hard_21(state: &State) -> bool {
    state.player_total == 21 && !state.usable_ace
}

// Tables over the whole state space with a random initial policy.
pub fn initial_tables<R: Rng>(rng: &mut R) -> Tables<State, Action> {
    let mut tables = Tables::new();
    for state in state_space() {
        let inserted = if is_hard_21(&state) {
            tables.insert_fixed(state, Action::Stand, [0.0, -1.0])
        } else {
            tables.insert(state, Action::from_index(rng.gen_range(0..ACTION_COUNT)))
        };
        debug_assert!(inserted, "State {:?} enumerated twice", state);
    }
    debug!("Enumerated {} states", tables.len());
    tables
}

pub fn random_action<R: Rng>(_state: &State, rng: &mut R) -> Action {
    if rng.gen_bool(0.5) {
        Action::Hit
    } else {
        Action::Stand
    }
}

// Hits below 17, the same rule the dealer plays.
pub fn dealer_policy(state: &State) -> Action {
    if state.player_total < 17 {
        Action::Hit
    } else {
        Action::Stand
    }
}

fn action_symbol(action: Action) -> &'static str {
    match action {
        Action::Hit => "H",
        Action::Stand => "S",
    }
}

pub fn print_action_values(tables: &Tables<State, Action>) -> Result<()> {
    let mut states: Vec<State> = tables.states().copied().collect();
    states.sort();

    for usable_ace in &[false, true] {
        println!(
            "=== Action values {} usable ace ===",
            if *usable_ace { "with" } else { "without" }
        );
        let mut table = Table::new();
        table.add_row(Row::new(
            ["Player", "Ace?", "Dealer", "Stand", "Hit", "N stand", "N hit", "Best"]
                .iter()
                .map(|h| Cell::new(h))
                .collect(),
        ));

        for state in states.iter().filter(|s| s.usable_ace == *usable_ace) {
            let values = tables.values(state)?;
            let counts = tables.counts(state)?;
            let best = Action::from_index(greedy_index(&values));
            table.add_row(Row::new(vec![
                Cell::new(&format!("{}", state.player_total)),
                Cell::new(if state.usable_ace { "Y" } else { "N" }),
                Cell::new(&format!("{}", state.dealer_card)),
                Cell::new(&format!("{:+.2}", values[Action::Stand.index()])),
                Cell::new(&format!("{:+.2}", values[Action::Hit.index()])),
                Cell::new(&format!("{}", counts[Action::Stand.index()])),
                Cell::new(&format!("{}", counts[Action::Hit.index()])),
                Cell::new(action_symbol(best)),
            ]));
        }
        table.printstd();
    }
    Ok(())
}

pub fn print_policy(tables: &Tables<State, Action>) -> Result<()> {
    let mut table = Table::new();

    // Print header.
    let mut header = Vec::new();
    header.push(Cell::new(""));
    header.push(Cell::new("Ace?"));
    for dealer_card in 1..=10 {
        header.push(match dealer_card {
            1 => Cell::new("A"),
            v => Cell::new(&format!("{}", v)),
        });
    }
    table.add_row(Row::new(header));

    for usable_ace in &[false, true] {
        for player_total in 12..=21 {
            let mut cells = Vec::new();
            cells.push(Cell::new(&format!("{}", player_total)));
            cells.push(Cell::new(match usable_ace {
                true => "Y",
                false => "N",
            }));
            for dealer_card in 1..=10 {
                let state = State {
                    player_total,
                    dealer_card,
                    usable_ace: *usable_ace,
                };
                cells.push(Cell::new(action_symbol(tables.policy(&state)?)));
            }
            table.add_row(Row::new(cells));
        }
    }
    table.printstd();
    Ok(())
}

pub fn plot_average_reward(evaluation: &Evaluation) -> Result<()> {
    if evaluation.samples.is_empty() {
        info!("Not enough episodes to plot the average reward");
        return Ok(());
    }

    let interval = evaluation.sample_interval as f64;
    let points: Vec<(f64, f64)> = evaluation
        .samples
        .iter()
        .enumerate()
        .map(|(i, avg)| ((i + 1) as f64 * interval, *avg))
        .collect();
    let end = points.len() as f64 * interval;

    let s1 = Plot::new(points).point_style(PointStyle::new().marker(PointMarker::Circle));
    let v = ContinuousView::new()
        .add(s1)
        .x_range(0.0, end)
        .x_label("Episodes")
        .y_label("Average reward");
    let text = Page::single(&v)
        .dimensions(100, 30)
        .to_text()
        .map_err(|e| Error::Report(format!("{:?}", e)))?;
    println!("{}", text);
    Ok(())
}

fn new_env(rng: &mut StdRng) -> BlackjackEnv<StdRng> {
    BlackjackEnv::new(StdRng::seed_from_u64(rng.gen())).with_natural(NATURAL)
}

pub fn run() -> Result<()> {
    let training = Config::default()
        .episode_count(TRAINING_EPISODES)
        .discount_factor(DISCOUNT)
        .seed(SEED);
    let evaluation = Config::default()
        .episode_count(EVALUATION_EPISODES)
        .sample_interval(SAMPLE_INTERVAL);
    training.validate()?;
    evaluation.validate()?;

    let mut rng = match training.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let tables = initial_tables(&mut rng);
    let mut env = new_env(&mut rng);
    let tables = monte_carlo::train(&mut env, tables, &training, &mut rng)?;
    print_action_values(&tables)?;
    print_policy(&tables)?;

    let mut policy_rng = StdRng::seed_from_u64(rng.gen());
    let random = monte_carlo::evaluate_policy(
        &mut new_env(&mut rng),
        |s| Ok(random_action(s, &mut policy_rng)),
        &evaluation,
    )?;
    let dealer = monte_carlo::evaluate_policy(
        &mut new_env(&mut rng),
        |s| Ok(dealer_policy(s)),
        &evaluation,
    )?;
    let learned = monte_carlo::evaluate_policy(
        &mut new_env(&mut rng),
        |s| tables.policy(s),
        &evaluation,
    )?;

    for (name, result) in [
        ("random", &random),
        ("dealer", &dealer),
        ("learned", &learned),
    ]
    .iter()
    {
        println!("Average reward of the {} policy: {:.4}", name, result.average_reward);
    }
    plot_average_reward(&learned)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use Card as C;

    #[test]
    fn hand_value_test() {
        assert_eq!(Hand::from_cards(&[C::Ace]).value, 11);
        assert_eq!(Hand::from_cards(&[C::Ace, C::Ace]).value, 12);
        assert_eq!(Hand::from_cards(&[C::Ace, C::Ace, C::Ace]).value, 13);
        assert_eq!(Hand::from_cards(&[C::Ace, C::Ace, C::Ace, C::Ace]).value, 14);

        for i in 2..=10 {
            assert_eq!(Hand::from_cards(&[C::Value(i)]).value, i);
        }

        assert_eq!(Hand::from_cards(&[C::Face]).value, 10);

        assert_eq!(Hand::from_cards(&[C::Face, C::Face, C::Ace]).value, 21);
        assert!(!Hand::from_cards(&[C::Face, C::Face, C::Ace]).usable_ace);
        assert!(Hand::from_cards(&[C::Ace, C::Value(6)]).usable_ace);
        assert!(Hand::from_cards(&[C::Face, C::Value(5), C::Face]).is_bust());
    }

    #[test]
    fn state_space_test() {
        let states = state_space();
        assert_eq!(states.len(), 18 * 10 + 10 * 10);

        let unique: HashSet<State> = states.iter().copied().collect();
        assert_eq!(unique.len(), states.len());

        for s in states.iter() {
            assert!(s.player_total >= 4 && s.player_total <= 21);
            assert!(s.dealer_card >= 1 && s.dealer_card <= 10);
            assert!(!s.usable_ace || s.player_total >= 12);
        }
    }

    #[test]
    fn initial_tables_test() {
        let mut rng = StdRng::seed_from_u64(1);
        let tables = initial_tables(&mut rng);
        assert_eq!(tables.len(), state_space().len());

        for state in state_space() {
            assert_eq!(tables.counts(&state).unwrap(), [0, 0]);
            if is_hard_21(&state) {
                assert_eq!(tables.policy(&state).unwrap(), Action::Stand);
                assert_eq!(tables.values(&state).unwrap(), [0.0, -1.0]);
            } else {
                assert_eq!(tables.values(&state).unwrap(), [0.0, 0.0]);
            }
        }
    }

    #[test]
    fn episodes_stay_in_state_space_test() {
        let states: HashSet<State> = state_space().into_iter().collect();
        let mut env = BlackjackEnv::new(StdRng::seed_from_u64(2));
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..20_000 {
            let mut state = env.reset();
            loop {
                assert!(states.contains(&state), "{:?} not enumerated", state);
                let step = env.step(random_action(&state, &mut rng)).unwrap();
                assert!(check_reward(&env, step.reward).is_ok());
                if step.terminated {
                    break;
                }
                assert_eq!(step.reward, 0.0);
                state = step.state;
            }
        }
    }

    #[test]
    fn step_without_episode_test() {
        let mut env = BlackjackEnv::new(StdRng::seed_from_u64(2));
        match env.step(Action::Stand) {
            Err(Error::Environment(_)) => {}
            other => panic!("Unexpected result {:?}", other),
        }

        env.reset();
        assert!(env.step(Action::Stand).unwrap().terminated);
        assert!(env.step(Action::Hit).is_err());
    }

    #[test]
    fn natural_rule_test() {
        let env = BlackjackEnv::new(StdRng::seed_from_u64(2));
        assert!(check_reward(&env, NATURAL_REWARD).is_err());

        let mut env = env.with_natural(true);
        assert!(check_reward(&env, NATURAL_REWARD).is_ok());

        // Standing on a two-card 21 never loses; it pays 1.5 unless the dealer has one too.
        let mut naturals = 0;
        for _ in 0..20_000 {
            let state = env.reset();
            let step = env.step(Action::Stand).unwrap();
            if state.player_total == 21 {
                naturals += 1;
                assert!(step.reward == NATURAL_REWARD || step.reward == 0.0);
            } else {
                assert!(step.reward <= 1.0);
            }
        }
        assert!(naturals > 0);
    }

    #[test]
    fn dealer_policy_test() {
        let state = |player_total| State {
            player_total,
            dealer_card: 10,
            usable_ace: false,
        };
        assert_eq!(dealer_policy(&state(4)), Action::Hit);
        assert_eq!(dealer_policy(&state(16)), Action::Hit);
        assert_eq!(dealer_policy(&state(17)), Action::Stand);
        assert_eq!(dealer_policy(&state(21)), Action::Stand);
    }

    #[test]
    fn training_invariants_test() {
        let discount = 0.9;
        let bound = 1.0 / (1.0 - discount);
        let mut rng = StdRng::seed_from_u64(4);
        let mut env = BlackjackEnv::new(StdRng::seed_from_u64(5));
        let mut tables = initial_tables(&mut rng);

        for _ in 0..20_000 {
            let before = tables.clone();
            let episode = monte_carlo::generate_episode(&mut env, &tables, &mut rng).unwrap();
            monte_carlo::update_action_values(&mut tables, &episode, discount).unwrap();

            for (state, action, _) in episode.iter() {
                let taken = episode
                    .iter()
                    .filter(|(s, a, _)| s == state && a == action)
                    .count() as u64;
                let a = action.index();
                assert_eq!(
                    tables.counts(state).unwrap()[a],
                    before.counts(state).unwrap()[a] + taken
                );

                let values = tables.values(state).unwrap();
                assert_eq!(
                    tables.policy(state).unwrap(),
                    Action::from_index(greedy_index(&values))
                );
                for v in values.iter() {
                    assert!(v.abs() <= bound, "{:?}: {:?}", state, values);
                }
                if is_hard_21(state) {
                    assert_eq!(values, [0.0, -1.0]);
                }
            }
        }

        for state in state_space() {
            let values = tables.values(&state).unwrap();
            assert_eq!(
                tables.policy(&state).unwrap(),
                Action::from_index(greedy_index(&values))
            );
            for v in values.iter() {
                assert!(v.abs() <= bound, "{:?}: {:?}", state, values);
            }
            if is_hard_21(&state) {
                assert_eq!(values, [0.0, -1.0]);
                assert_eq!(tables.policy(&state).unwrap(), Action::Stand);
            }
        }
    }

    #[test]
    fn reports_cover_every_state_test() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut env = new_env(&mut rng);
        let training = Config::default().episode_count(1_000);
        let tables =
            monte_carlo::train(&mut env, initial_tables(&mut rng), &training, &mut rng).unwrap();
        assert!(print_action_values(&tables).is_ok());
        assert!(print_policy(&tables).is_ok());

        let missing: Tables<State, Action> = Tables::new();
        assert!(print_action_values(&missing).is_ok());
        match print_policy(&missing) {
            Err(Error::UnknownState(_)) => {}
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn learned_policy_beats_random_test() {
        let mut rng = StdRng::seed_from_u64(6);
        let training = Config::default().episode_count(200_000).discount_factor(1.0);
        let tables = monte_carlo::train(
            &mut BlackjackEnv::new(StdRng::seed_from_u64(7)),
            initial_tables(&mut rng),
            &training,
            &mut rng,
        )
        .unwrap();

        // Hitting on 20 is almost always a mistake.
        let state = State {
            player_total: 20,
            dealer_card: 7,
            usable_ace: false,
        };
        assert_eq!(tables.policy(&state).unwrap(), Action::Stand);

        let evaluation = Config::default().episode_count(20_000).sample_interval(100);
        let learned = monte_carlo::evaluate_policy(
            &mut BlackjackEnv::new(StdRng::seed_from_u64(8)),
            |s| tables.policy(s),
            &evaluation,
        )
        .unwrap();
        let random = monte_carlo::evaluate_policy(
            &mut BlackjackEnv::new(StdRng::seed_from_u64(8)),
            |s| Ok(random_action(s, &mut rng)),
            &evaluation,
        )
        .unwrap();
        assert_eq!(learned.samples.len(), 200);
        assert!(learned.average_reward > random.average_reward);
    }
}
