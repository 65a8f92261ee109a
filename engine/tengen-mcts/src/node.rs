//! The search tree node.
//!
//! A node coordinates at-most-once expansion through a three-state atomic,
//! accumulates visit and eval statistics under racing updates, maintains
//! running quantiles of the sigmoidal winrate for the SAI agent, and
//! implements PUCT child selection with virtual loss. All statistics are
//! Black-perspective; perspective flips happen in the accessors.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU8, AtomicUsize, Ordering};

use rand::Rng;
use rand_chacha::ChaCha20Rng;
use tracing::trace;

use tengen_core::{Color, GameState, Vertex, NUM_SYMMETRIES, PASS};
use tengen_net::{sigmoid, AgentEval, EvalError};

use crate::atomics::{AtomicF32, AtomicF64};
use crate::config::SearchConfig;
use crate::evaluator::LeafEvaluator;
use crate::pointer::UctNodePointer;
use crate::stats::{median, t_quantile};

/// Expansion progress. INITIAL -> EXPANDING is won by exactly one thread
/// through compare-exchange; the winner either completes (EXPANDED) or
/// cancels (back to INITIAL).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExpandState {
    Initial = 0,
    Expanding = 1,
    Expanded = 2,
}

/// Pruning status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeStatus {
    Active = 0,
    Pruned = 1,
    Invalid = 2,
}

/// The neural outputs backed up through the tree for one leaf.
#[derive(Debug, Clone, Copy)]
pub struct LeafEval {
    /// Black-perspective winrate pi.
    pub value: f32,
    /// Black-perspective, komi-adjusted score advantage.
    pub alpkt: f32,
    pub beta: f32,
    pub beta2: f32,
    pub is_sai: bool,
}

/// Aggregate subtree statistics for reporting.
#[derive(Debug, Clone, Copy)]
pub struct UctStats {
    pub alpkt_tree: f32,
    pub beta_median: f32,
    pub azwinrate_avg: f32,
}

/// A node of the search tree. Owns its children exclusively; the tree is
/// strictly a DAG rooted at the search root.
pub struct UctNode {
    mv: Vertex,
    policy: AtomicF32,

    visits: AtomicU32,
    virtual_loss: AtomicI32,
    forced: AtomicU32,

    black_evals: AtomicF64,
    pi_sum: AtomicF64,
    squared_eval_diff: AtomicF64,

    // Leaf network outputs, cached on first expansion (or inherited from
    // the parent on inflation).
    net_pi: AtomicF32,
    net_alpkt: AtomicF32,
    net_beta: AtomicF32,
    net_beta2: AtomicF32,

    // Running quantile estimators and their Newton-step accumulators.
    quantile_lambda: AtomicF32,
    quantile_mu: AtomicF32,
    quantile_one: AtomicF32,
    gxgp_sum_lambda: AtomicF32,
    gp_sum_lambda: AtomicF32,
    gxgp_sum_mu: AtomicF32,
    gp_sum_mu: AtomicF32,
    gxgp_sum_one: AtomicF32,
    gp_sum_one: AtomicF32,
    quantile_updates: AtomicU32,

    // Policy-blending weights and the parent's quantiles at descent time.
    lambda: AtomicF32,
    mu: AtomicF32,
    father_quantile_lambda: AtomicF32,
    father_quantile_mu: AtomicF32,

    // 2.0 = never expanded, 0.0 = fully expanded, in between = partially
    // expanded with that policy ratio cutoff. Monotone non-increasing.
    min_psa_ratio_children: AtomicF32,

    status: AtomicU8,
    expand_state: AtomicU8,

    // Written only by the thread holding EXPANDING; read after EXPANDED.
    children: UnsafeCell<Vec<UctNodePointer>>,
}

// Safety: `children` is mutated only between a successful
// INITIAL->EXPANDING compare-exchange (AcqRel) and the EXPANDED release
// store, so there is exactly one writer and no concurrent reader; readers
// go through `wait_expanded` (acquire) first. Everything else is atomic.
unsafe impl Send for UctNode {}
unsafe impl Sync for UctNode {}

/// Sentinel meaning "no expansion has linked children yet".
const PSA_RATIO_UNEXPANDED: f32 = 2.0;

impl UctNode {
    pub fn new(mv: Vertex, policy: f32) -> Self {
        Self {
            mv,
            policy: AtomicF32::new(policy),
            visits: AtomicU32::new(0),
            virtual_loss: AtomicI32::new(0),
            forced: AtomicU32::new(0),
            black_evals: AtomicF64::new(0.0),
            pi_sum: AtomicF64::new(0.0),
            squared_eval_diff: AtomicF64::new(0.0),
            net_pi: AtomicF32::new(0.5),
            net_alpkt: AtomicF32::new(0.0),
            net_beta: AtomicF32::new(1.0),
            net_beta2: AtomicF32::new(-1.0),
            quantile_lambda: AtomicF32::new(0.0),
            quantile_mu: AtomicF32::new(0.0),
            quantile_one: AtomicF32::new(0.0),
            gxgp_sum_lambda: AtomicF32::new(0.0),
            gp_sum_lambda: AtomicF32::new(0.0),
            gxgp_sum_mu: AtomicF32::new(0.0),
            gp_sum_mu: AtomicF32::new(0.0),
            gxgp_sum_one: AtomicF32::new(0.0),
            gp_sum_one: AtomicF32::new(0.0),
            quantile_updates: AtomicU32::new(0),
            lambda: AtomicF32::new(0.0),
            mu: AtomicF32::new(0.0),
            father_quantile_lambda: AtomicF32::new(0.0),
            father_quantile_mu: AtomicF32::new(0.0),
            min_psa_ratio_children: AtomicF32::new(PSA_RATIO_UNEXPANDED),
            status: AtomicU8::new(NodeStatus::Active as u8),
            expand_state: AtomicU8::new(ExpandState::Initial as u8),
            children: UnsafeCell::new(Vec::new()),
        }
    }

    // ------------------------------------------------------------------
    // Plain accessors
    // ------------------------------------------------------------------

    #[inline]
    pub fn mv(&self) -> Vertex {
        self.mv
    }

    #[inline]
    pub fn policy(&self) -> f32 {
        self.policy.load()
    }

    #[inline]
    pub fn set_policy(&self, policy: f32) {
        self.policy.store(policy);
    }

    #[inline]
    pub fn visits(&self) -> u32 {
        self.visits.load(Ordering::Acquire)
    }

    #[inline]
    pub fn first_visit(&self) -> bool {
        self.visits() == 0
    }

    #[inline]
    pub fn net_pi(&self, color: Color) -> f32 {
        color.from_black(self.net_pi.load())
    }

    #[inline]
    pub fn net_alpkt(&self) -> f32 {
        self.net_alpkt.load()
    }

    #[inline]
    pub fn net_beta(&self) -> f32 {
        self.net_beta.load()
    }

    #[inline]
    pub fn net_beta2(&self) -> f32 {
        self.net_beta2.load()
    }

    /// Seed the leaf outputs, e.g. from the parent on first selection.
    pub fn set_net_values(&self, pi: f32, alpkt: f32, beta: f32, beta2: f32) {
        self.net_pi.store(pi);
        self.net_alpkt.store(alpkt);
        self.net_beta.store(beta);
        self.net_beta2.store(beta2);
    }

    #[inline]
    pub fn lambda(&self) -> f32 {
        self.lambda.load()
    }

    #[inline]
    pub fn mu(&self) -> f32 {
        self.mu.load()
    }

    pub fn quantile_lambda(&self, color: Color) -> f32 {
        match color {
            Color::Black => self.quantile_lambda.load(),
            Color::White => -self.quantile_lambda.load(),
        }
    }

    pub fn quantile_mu(&self, color: Color) -> f32 {
        match color {
            Color::Black => self.quantile_mu.load(),
            Color::White => -self.quantile_mu.load(),
        }
    }

    #[inline]
    pub fn quantile_one(&self) -> f32 {
        self.quantile_one.load()
    }

    pub(crate) fn set_father_quantiles(&self, quantile_lambda: f32, quantile_mu: f32) {
        self.father_quantile_lambda.store(quantile_lambda);
        self.father_quantile_mu.store(quantile_mu);
    }

    /// Observable partial-expansion ratio: 1.0 means unexpanded, 0.0 fully
    /// expanded.
    #[inline]
    pub fn min_psa_ratio_children(&self) -> f32 {
        self.min_psa_ratio_children.load().min(1.0)
    }

    #[inline]
    pub fn has_children(&self) -> bool {
        self.min_psa_ratio_children.load() <= 1.0
    }

    /// Whether an expansion pass at this ratio could still link children.
    #[inline]
    pub fn expandable(&self, min_psa_ratio: f32) -> bool {
        min_psa_ratio < self.min_psa_ratio_children.load()
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    pub fn invalidate(&self) {
        self.status.store(NodeStatus::Invalid as u8, Ordering::Release);
    }

    pub fn set_active(&self, active: bool) {
        if self.valid() {
            let status = if active {
                NodeStatus::Active
            } else {
                NodeStatus::Pruned
            };
            self.status.store(status as u8, Ordering::Release);
        }
    }

    #[inline]
    pub fn valid(&self) -> bool {
        self.status.load(Ordering::Acquire) != NodeStatus::Invalid as u8
    }

    #[inline]
    pub fn active(&self) -> bool {
        self.status.load(Ordering::Acquire) == NodeStatus::Active as u8
    }

    // ------------------------------------------------------------------
    // Expansion state machine
    // ------------------------------------------------------------------

    #[inline]
    pub fn expand_state(&self) -> ExpandState {
        match self.expand_state.load(Ordering::Acquire) {
            0 => ExpandState::Initial,
            1 => ExpandState::Expanding,
            _ => ExpandState::Expanded,
        }
    }

    /// Try to become the expanding thread. At most one caller ever sees
    /// `true` per INITIAL state.
    pub fn acquire_expanding(&self) -> bool {
        self.expand_state
            .compare_exchange(
                ExpandState::Initial as u8,
                ExpandState::Expanding as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Publish the linked children.
    pub fn expand_done(&self) {
        let prev = self
            .expand_state
            .swap(ExpandState::Expanded as u8, Ordering::AcqRel);
        debug_assert_eq!(prev, ExpandState::Expanding as u8);
    }

    /// Abort expansion (evaluation was halted); others may retry.
    pub fn expand_cancel(&self) {
        let prev = self
            .expand_state
            .swap(ExpandState::Initial as u8, Ordering::AcqRel);
        debug_assert_eq!(prev, ExpandState::Expanding as u8);
    }

    /// Spin until no expansion is in flight. Expansion is short and rarely
    /// contended; a condition variable would cost more than it saves.
    pub fn wait_expanded(&self) {
        while self.expand_state.load(Ordering::Acquire) == ExpandState::Expanding as u8 {
            std::hint::spin_loop();
        }
        debug_assert_eq!(
            self.expand_state.load(Ordering::Acquire),
            ExpandState::Expanded as u8
        );
    }

    /// The linked children. Callers must not be racing an expansion of
    /// this node (either `wait_expanded` first, or be past the search).
    #[inline]
    pub fn children(&self) -> &[UctNodePointer] {
        unsafe { &*self.children.get() }
    }

    // ------------------------------------------------------------------
    // Expansion
    // ------------------------------------------------------------------

    /// Evaluate the position and link children, if this thread wins the
    /// expansion race. Returns the leaf evaluation on success, `None` when
    /// nothing was expanded (terminal position, lost race, or nothing left
    /// to link), and `Err(Halted)` when a drain interrupted the forward
    /// call (the expansion is cancelled and may be retried).
    pub fn create_children<S, E>(
        &self,
        node_count: &AtomicUsize,
        state: &S,
        network: &E,
        cfg: &SearchConfig,
        rng: &mut ChaCha20Rng,
        min_psa_ratio: f32,
        nopass: bool,
    ) -> Result<Option<LeafEval>, EvalError>
    where
        S: GameState,
        E: LeafEvaluator<S>,
    {
        // No successors in a finished game.
        if state.passes() >= 2 {
            return Ok(None);
        }

        if !self.acquire_expanding() {
            return Ok(None);
        }

        if !self.expandable(min_psa_ratio) {
            self.expand_done();
            return Ok(None);
        }

        let raw = match network.evaluate(state, rng) {
            Ok(raw) => raw,
            Err(err) => {
                self.expand_cancel();
                return Err(err);
            }
        };

        let board_size = state.board_size();
        let num_intersections = board_size * board_size;
        let to_move = state.to_move();
        let stm_eval = raw.value;
        // Tree statistics are Black-perspective.
        let value = match to_move {
            Color::Black => stm_eval,
            Color::White => 1.0 - stm_eval,
        };

        let result = if raw.is_sai {
            LeafEval {
                value,
                alpkt: state.alpkt(raw.alpha),
                beta: raw.beta,
                beta2: raw.beta2,
                is_sai: true,
            }
        } else {
            // LZ nets: alpha holds winrate logits.
            let alpkt = match to_move {
                Color::Black => raw.alpha,
                Color::White => -raw.alpha,
            };
            LeafEval {
                value,
                alpkt,
                beta: 1.0,
                beta2: 1.0,
                is_sai: false,
            }
        };
        self.set_net_values(value, result.alpkt, result.beta, result.beta2);

        // Moves equivalent under the position's stabilizer subgroup are
        // merged: their policies sum onto one representative vertex.
        let table = network.symmetries();
        let mut stabilizer = Vec::with_capacity(1);
        for symmetry in 0..NUM_SYMMETRIES {
            if symmetry == 0
                || (cfg.exploit_symmetries && state.is_symmetry_invariant(symmetry))
            {
                stabilizer.push(symmetry);
            }
        }

        let mut nodelist: Vec<(f32, Vertex)> = Vec::new();
        let mut taken = vec![false; num_intersections];
        let mut legal_sum = 0.0f32;

        for idx in 0..num_intersections {
            let vertex = idx as Vertex;
            if !state.is_move_legal(to_move, vertex) || taken[idx] {
                continue;
            }
            let mut taken_policy = 0.0f32;
            let mut max_u = 0.0f32;
            let mut chosen = vertex;
            for &symmetry in &stabilizer {
                let j = table.index(symmetry, idx);
                if taken[j] {
                    continue;
                }
                taken[j] = true;
                taken_policy += raw.policy[j];

                let u = if cfg.symm_nonrandom {
                    let x = j % board_size;
                    let y = j / board_size;
                    x as f32 + 2.001 * y as f32
                } else {
                    rng.gen::<f32>()
                };
                if u > max_u {
                    max_u = u;
                    chosen = j as Vertex;
                }
            }
            let warm_policy = taken_policy.powf(1.0 / cfg.policy_temp);
            nodelist.push((warm_policy, chosen));
            legal_sum += warm_policy;
        }

        // Pass gating: always when configured dumb, always when few
        // intersections remain, otherwise only when clearly winning on
        // both the net eval and the board count.
        let mut allow_pass = cfg.dumb_pass;
        if nodelist.len() <= board_size.max(5) {
            allow_pass = true;
        }
        if !allow_pass && stm_eval > 0.8 {
            let relative_score = match to_move {
                Color::Black => state.final_score(),
                Color::White => -state.final_score(),
            };
            if relative_score >= 0.0 {
                allow_pass = true;
            }
        }
        if nopass {
            allow_pass = false;
        }

        if allow_pass {
            let warm_pass = raw.policy_pass.powf(1.0 / cfg.policy_temp);
            nodelist.push((warm_pass, PASS));
            legal_sum += warm_pass;
        }

        if legal_sum > f32::MIN_POSITIVE {
            for entry in &mut nodelist {
                entry.0 /= legal_sum;
            }
        } else {
            // Freshly randomized nets can zero out every legal move.
            let uniform = 1.0 / nodelist.len() as f32;
            for entry in &mut nodelist {
                entry.0 = uniform;
            }
        }

        self.link_children(node_count, nodelist, min_psa_ratio);

        self.update(&result, false);
        if result.is_sai {
            self.set_lambda_mu(state, cfg);
            self.update_all_quantiles(result.alpkt, result.beta, result.beta2);
        }
        self.expand_done();

        trace!(
            mv = i32::from(self.mv),
            children = self.children().len(),
            value = result.value,
            "expanded node"
        );
        Ok(Some(result))
    }

    /// Link (more of) the candidate children, best policy first. Called
    /// only by the thread holding EXPANDING.
    fn link_children(
        &self,
        node_count: &AtomicUsize,
        mut nodelist: Vec<(f32, Vertex)>,
        min_psa_ratio: f32,
    ) {
        debug_assert!(min_psa_ratio < self.min_psa_ratio_children.load());
        if nodelist.is_empty() {
            return;
        }

        nodelist.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

        let max_psa = nodelist[0].0;
        let old_min_psa = max_psa * self.min_psa_ratio_children.load();
        let new_min_psa = max_psa * min_psa_ratio;

        // Safety: we hold EXPANDING (see type invariant).
        let children = unsafe { &mut *self.children.get() };
        if new_min_psa > 0.0 {
            children.reserve(nodelist.iter().filter(|n| n.0 >= new_min_psa).count());
        } else {
            children.reserve(nodelist.len());
        }

        let mut skipped = false;
        for (policy, vertex) in nodelist {
            if policy < new_min_psa {
                skipped = true;
            } else if policy < old_min_psa {
                children.push(UctNodePointer::new(vertex, policy));
                node_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.min_psa_ratio_children
            .store(if skipped { min_psa_ratio } else { 0.0 });
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    /// Per-simulation virtual loss while a worker is below this node.
    pub fn add_virtual_loss(&self, cfg: &SearchConfig) {
        self.virtual_loss.fetch_add(cfg.virtual_loss, Ordering::AcqRel);
    }

    pub fn undo_virtual_loss(&self, cfg: &SearchConfig) {
        self.virtual_loss.fetch_sub(cfg.virtual_loss, Ordering::AcqRel);
    }

    #[inline]
    pub fn virtual_loss(&self) -> i32 {
        self.virtual_loss.load(Ordering::Acquire)
    }

    /// Record one backed-up evaluation. For SAI results the accumulated
    /// value is the bonus sigmoid evaluated at the blend of the parent's
    /// lambda/mu quantiles; the raw pi is accumulated separately. Returns
    /// the value that entered the eval sum.
    pub fn update(&self, result: &LeafEval, forced: bool) -> f32 {
        let eval = if result.is_sai {
            let lambda = self.lambda.load();
            let bonus = (1.0 - lambda) * self.father_quantile_lambda.load()
                + lambda * self.father_quantile_mu.load();
            sigmoid(result.alpkt, result.beta, bonus, result.beta2).0
        } else {
            result.value
        };

        // Snapshot before bumping so the Welford deltas stay consistent
        // under races (a stale sibling read is fine, a torn one is not).
        let old_eval_sum = self.black_evals.load();
        let old_visits = self.visits.load(Ordering::Acquire);
        let old_delta = if old_visits > 0 {
            eval as f64 - old_eval_sum / old_visits as f64
        } else {
            0.0
        };
        self.visits.fetch_add(1, Ordering::AcqRel);
        self.black_evals.fetch_add(eval as f64);
        let new_delta = eval as f64 - (old_eval_sum + eval as f64) / (old_visits + 1) as f64;
        self.squared_eval_diff.fetch_add(old_delta * new_delta);
        if forced {
            self.forced.fetch_add(1, Ordering::Relaxed);
        }
        self.pi_sum.fetch_add(result.value as f64);
        eval
    }

    /// Mean eval with `virtual_loss` phantom visits scored as losses for
    /// the side to move.
    pub fn raw_eval(&self, color: Color, virtual_loss: i64) -> f32 {
        let visits = self.visits() as i64 + virtual_loss;
        debug_assert!(visits > 0);
        let mut black_evals = self.black_evals.load();
        if color == Color::White {
            black_evals += virtual_loss as f64;
        }
        let eval = (black_evals / visits as f64) as f32;
        color.from_black(eval)
    }

    /// Mean eval including this node's current virtual losses.
    pub fn eval(&self, color: Color) -> f32 {
        self.raw_eval(color, self.virtual_loss() as i64)
    }

    /// Sample variance of the backed-up evals (Welford).
    pub fn eval_variance(&self, default_var: f32) -> f32 {
        let visits = self.visits();
        if visits > 1 {
            (self.squared_eval_diff.load() / (visits - 1) as f64) as f32
        } else {
            default_var
        }
    }

    /// Lower confidence bound of the winrate for root move ordering.
    pub fn eval_lcb(&self, color: Color) -> f32 {
        let visits = self.visits();
        if visits < 2 {
            // Large negative, still ordered by visits.
            return -1e6 + visits as f32;
        }
        let mean = self.raw_eval(color, 0);
        let stddev = (self.eval_variance(1.0) / visits as f32).sqrt();
        mean - t_quantile(visits - 1) * stddev
    }

    /// Mean of the raw (pre-bonus) pi values.
    pub fn avg_pi(&self, color: Color) -> f32 {
        let visits = self.visits();
        let avg = if visits > 0 {
            (self.pi_sum.load() / visits as f64) as f32
        } else {
            0.5
        };
        color.from_black(avg)
    }

    /// PUCT denominator; forced playouts are excluded when the ladder
    /// workaround is on.
    pub fn denom(&self, cfg: &SearchConfig) -> u32 {
        if cfg.ladder_code {
            1 + self.visits() - self.forced.load(Ordering::Relaxed)
        } else {
            1 + self.visits()
        }
    }

    /// Heuristic: is this child's visit count too low to be trusted
    /// relative to its parent?
    pub fn low_visits_child(&self, child: &UctNode) -> bool {
        let father = self.visits() as i64;
        let child_visits = child.visits() as i64;
        child_visits * (child_visits - 3) < father - 2
    }

    // ------------------------------------------------------------------
    // Quantile estimation
    // ------------------------------------------------------------------

    fn update_gxx_sums(
        gxgp_sum: &AtomicF32,
        gp_sum: &AtomicF32,
        old_quantile: f32,
        alpkt: f32,
        beta: f32,
        beta2: f32,
    ) {
        let g = sigmoid(alpkt, beta, old_quantile, beta2);
        let right_beta = if beta2 > 0.0 && alpkt + old_quantile > 0.0 {
            beta2
        } else {
            beta
        };
        let gp_term = right_beta * g.0 * g.1;
        let gxgp_term = g.0 - old_quantile * gp_term;
        gxgp_sum.fetch_add(gxgp_term);
        gp_sum.fetch_add(gp_term);
    }

    #[allow(clippy::too_many_arguments)]
    fn update_quantile(
        quantile: &AtomicF32,
        gxgp_sum: f32,
        gp_sum: f32,
        parameter: f32,
        new_visits: u32,
        avg_pi: f32,
        alpkt: f32,
        beta: f32,
        beta2: f32,
    ) {
        if parameter.abs() < 1e-5 {
            quantile.store(0.0);
            return;
        }
        if new_visits == 0 {
            return;
        }
        let avg_p = 0.5 * parameter + (1.0 - parameter) * avg_pi;

        if new_visits <= 8 && quantile.load() == 0.0 {
            // avg_p is away from 0 and 1, so the logit is tame.
            let right_beta = if beta2 > 0.0 && avg_p > 0.5 { beta2 } else { beta };
            let logit = avg_p.ln() - (-avg_p).ln_1p();
            quantile.store(logit / right_beta.max(0.01) - alpkt);
        } else {
            let avg_f_prime = gp_sum / new_visits as f32;
            let avg_f = gxgp_sum / new_visits as f32 + quantile.load() * avg_f_prime;
            let delta = (avg_p - avg_f) / avg_f_prime.max(0.1);
            quantile.fetch_add(delta);
        }
    }

    /// One stochastic Newton step on each of the three quantiles, using
    /// this leaf's `(alpkt, beta, beta2)`.
    pub fn update_all_quantiles(&self, alpkt: f32, beta: f32, beta2: f32) {
        let avg_pi = self.avg_pi(Color::Black);
        let old_lambda = self.quantile_lambda.load();
        let old_mu = self.quantile_mu.load();
        let old_one = self.quantile_one.load();
        let new_visits = self.quantile_updates.fetch_add(1, Ordering::AcqRel) + 1;

        Self::update_gxx_sums(
            &self.gxgp_sum_lambda,
            &self.gp_sum_lambda,
            old_lambda,
            alpkt,
            beta,
            beta2,
        );
        Self::update_gxx_sums(&self.gxgp_sum_mu, &self.gp_sum_mu, old_mu, alpkt, beta, beta2);
        Self::update_gxx_sums(
            &self.gxgp_sum_one,
            &self.gp_sum_one,
            old_one,
            alpkt,
            beta,
            beta2,
        );

        Self::update_quantile(
            &self.quantile_lambda,
            self.gxgp_sum_lambda.load(),
            self.gp_sum_lambda.load(),
            self.lambda.load(),
            new_visits,
            avg_pi,
            alpkt,
            beta,
            beta2,
        );
        Self::update_quantile(
            &self.quantile_mu,
            self.gxgp_sum_mu.load(),
            self.gp_sum_mu.load(),
            self.mu.load(),
            new_visits,
            avg_pi,
            alpkt,
            beta,
            beta2,
        );
        Self::update_quantile(
            &self.quantile_one,
            self.gxgp_sum_one.load(),
            self.gp_sum_one.load(),
            1.0,
            new_visits,
            avg_pi,
            alpkt,
            beta,
            beta2,
        );
    }

    /// Pick the lambda/mu pair for this node from the agent situation:
    /// whether the engine plays this color, and whether the position looks
    /// lost for the side to move.
    pub fn set_lambda_mu<S: GameState>(&self, state: &S, cfg: &SearchConfig) {
        let mut i = 0;
        if !state.is_cpu_color() {
            i = 2;
        }
        if self.raw_eval(state.to_move(), 0) < 0.5 {
            i += 1;
        }
        self.lambda.store(cfg.lambda[i]);
        self.mu.store(cfg.mu[i]);
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    /// First-play urgency for unvisited children, plus the effective
    /// parent visit count (summed over visited children, which survives
    /// transpositions).
    pub fn fpu_eval(&self, color: Color, is_root: bool, cfg: &SearchConfig) -> (f32, usize) {
        let mut total_visited_policy = 0.0f32;
        let mut max_eval = 0.0f32;
        let mut parent_visits = 0usize;
        let mut n = 0u32;
        let mut avg_eval = 0.0f32;

        for child in self.children() {
            if !child.valid() {
                continue;
            }
            let visits = child.visits();
            if visits > 0 {
                let child_eval = child.raw_eval(color);
                max_eval = max_eval.max(child_eval);
                parent_visits += visits as usize;
                total_visited_policy += child.policy();
                n += 1;
                avg_eval += (child_eval - avg_eval) / n as f32;
            }
        }

        if cfg.fpu_average {
            // Average of the visited children excluding the best one.
            if n > 1 {
                avg_eval -= (max_eval - avg_eval) / (n - 1) as f32;
            }
            return (avg_eval, parent_visits);
        }

        let reduction = if is_root {
            cfg.fpu_root_reduction
        } else {
            cfg.fpu_reduction
        };
        let fpu = if cfg.fpu_zero {
            0.0
        } else {
            max_eval - reduction * total_visited_policy.sqrt()
        };
        (fpu, parent_visits)
    }

    /// PUCT exploration numerator.
    pub fn numerator(parent_visits: usize, cfg: &SearchConfig) -> f64 {
        let pv = parent_visits as f64;
        (pv * (cfg.logpuct as f64 * pv + cfg.logconst as f64).ln()).sqrt()
    }

    /// PUCT child selection. Ties break on insertion (policy) order. The
    /// chosen child is inflated and inherits this node's leaf outputs and
    /// quantiles.
    pub fn select_child<S: GameState>(
        &self,
        state: &S,
        is_root: bool,
        max_visits: Option<u32>,
        move_list: &[Vertex],
        nopass: bool,
        cfg: &SearchConfig,
    ) -> Option<&UctNode> {
        self.wait_expanded();

        let color = state.to_move();
        let (fpu_eval, parent_visits) = self.fpu_eval(color, is_root, cfg);
        let numerator = Self::numerator(parent_visits, cfg);

        let mut best: Option<&UctNodePointer> = None;
        let mut best_value = f64::MIN;

        for child in self.children() {
            if !child.active() {
                continue;
            }
            if !move_list.is_empty() && !move_list.contains(&child.mv()) {
                continue;
            }

            let visits = child.visits();
            // Capping visits keeps endgame roll-outs wide instead of deep.
            if let Some(cap) = max_visits {
                if visits >= cap {
                    continue;
                }
            }

            let mut winrate = fpu_eval;
            if child.is_expanding() {
                // Never follow a node someone else is expanding; we would
                // only block on it.
                winrate = -1.0;
            } else if visits > 0 {
                winrate = child.eval(color);
            }
            let mut psa = child.policy();

            if nopass && child.mv() == PASS {
                psa = 0.0;
                winrate -= 0.05;
            }
            if state.passes() >= 1 && child.mv() == PASS {
                psa += 0.2;
            }
            if cfg.stdev_uct {
                psa *= 2.0 * child.eval_variance(0.25).sqrt();
            }

            let value = winrate as f64
                + cfg.puct as f64 * psa as f64 * numerator / child.denom(cfg) as f64;
            debug_assert!(value > f64::MIN);

            if value > best_value {
                best_value = value;
                best = Some(child);
            }
        }

        let best = best?;
        let inherit = best.visits() == 0 && !best.is_inflated();
        let node = best.inflate();
        if inherit {
            node.set_net_values(
                self.net_pi.load(),
                self.net_alpkt.load(),
                self.net_beta.load(),
                self.net_beta2.load(),
            );
        }
        node.set_father_quantiles(self.quantile_lambda.load(), self.quantile_mu.load());
        Some(node)
    }

    /// Find the child playing `mv`, inflating it.
    pub fn find_child(&self, mv: Vertex) -> Option<&UctNode> {
        self.children()
            .iter()
            .find(|child| child.mv() == mv)
            .map(|child| child.inflate())
    }

    // ------------------------------------------------------------------
    // Root move ordering
    // ------------------------------------------------------------------

    fn node_order(
        a: &UctNodePointer,
        b: &UctNodePointer,
        color: Color,
        lcb_min_visits: f32,
        use_lcb: bool,
    ) -> std::cmp::Ordering {
        use std::cmp::Ordering::*;
        let a_visits = a.visits();
        let b_visits = b.visits();
        let lcb_min_visits = lcb_min_visits.max(2.0);

        if use_lcb && a_visits as f32 > lcb_min_visits && b_visits as f32 > lcb_min_visits {
            let a_lcb = a.eval_lcb(color);
            let b_lcb = b.eval_lcb(color);
            if a_lcb != b_lcb {
                return a_lcb.partial_cmp(&b_lcb).unwrap_or(Equal);
            }
        }
        if a_visits != b_visits {
            return a_visits.cmp(&b_visits);
        }
        if a_visits == 0 {
            return a.policy().partial_cmp(&b.policy()).unwrap_or(Equal);
        }
        a.eval(color).partial_cmp(&b.eval(color)).unwrap_or(Equal)
    }

    /// Order children best first. Single-threaded maintenance between
    /// searches.
    pub fn sort_children(&mut self, color: Color, lcb_min_visits: f32, use_lcb: bool) {
        self.children
            .get_mut()
            .sort_by(|a, b| Self::node_order(b, a, color, lcb_min_visits, use_lcb));
    }

    /// Best root child under the LCB/visits ordering.
    pub fn best_root_child(&self, color: Color, cfg: &SearchConfig) -> Option<&UctNode> {
        self.wait_expanded();
        let children = self.children();
        if children.is_empty() {
            return None;
        }

        let max_visits = children.iter().map(|c| c.visits()).max().unwrap_or(0);
        let lcb_min_visits = cfg.lcb_min_visit_ratio * max_visits as f32;

        let best = children
            .iter()
            .max_by(|a, b| Self::node_order(a, b, color, lcb_min_visits, cfg.use_lcb))?;
        Some(best.inflate())
    }

    // ------------------------------------------------------------------
    // Subtree statistics and maintenance
    // ------------------------------------------------------------------

    fn subtree_alpkts(&self, out: &mut Vec<f32>, passes: i32, tromp_taylor_scoring: bool) {
        let mut children_visits = 0u64;
        out.push(self.net_alpkt());
        for child in self.children() {
            let child_visits = child.visits();
            if child_visits > 0 {
                if let Some(node) = child.node() {
                    let pass = i32::from(node.mv() == PASS);
                    node.subtree_alpkts(out, (passes + 1) * pass, tromp_taylor_scoring);
                    children_visits += child_visits as u64;
                }
            }
        }
        // Visits that went straight through (e.g. second-pass leaves)
        // carry this node's own estimate.
        let missing = self.visits() as i64 - children_visits as i64 - 1;
        if missing > 0 && tromp_taylor_scoring {
            out.extend(std::iter::repeat(self.net_alpkt()).take(missing as usize));
        }
    }

    /// Median komi-adjusted score advantage over the visited subtree.
    pub fn estimate_alpkt(&self, passes: i32, tromp_taylor_scoring: bool) -> f32 {
        let mut values = Vec::new();
        self.subtree_alpkts(&mut values, passes, tromp_taylor_scoring);
        median(values)
    }

    fn subtree_betas(&self, out: &mut Vec<f32>) {
        out.push(self.net_beta());
        for child in self.children() {
            if child.visits() > 0 {
                if let Some(node) = child.node() {
                    node.subtree_betas(out);
                }
            }
        }
    }

    pub fn beta_median(&self) -> f32 {
        let mut values = Vec::new();
        self.subtree_betas(&mut values);
        median(values)
    }

    fn az_sum(&self, sum: &mut f64, count: &mut usize) {
        *sum += self.net_pi.load() as f64;
        *count += 1;
        for child in self.children() {
            if child.visits() > 0 {
                if let Some(node) = child.node() {
                    node.az_sum(sum, count);
                }
            }
        }
    }

    /// Mean raw network winrate over the visited subtree.
    pub fn azwinrate_avg(&self) -> f32 {
        let mut sum = 0.0f64;
        let mut count = 0usize;
        self.az_sum(&mut sum, &mut count);
        (sum / count as f64) as f32
    }

    pub fn uct_stats(&self) -> UctStats {
        UctStats {
            alpkt_tree: -self.quantile_one.load(),
            beta_median: self.beta_median(),
            azwinrate_avg: self.azwinrate_avg(),
        }
    }

    /// Agent-level summary for reporting (heatmaps, GTP extensions).
    pub fn agent_eval(&self) -> AgentEval {
        AgentEval {
            lambda: self.lambda.load(),
            mu: self.mu.load(),
            quantile_lambda: self.quantile_lambda.load(),
            quantile_mu: self.quantile_mu.load(),
            alpkt_tree: -self.quantile_one.load(),
        }
    }

    /// Count pointers in the subtree and reset partially-expanded nodes to
    /// INITIAL so the next search may extend them. Single-threaded
    /// maintenance between searches.
    pub fn count_nodes_and_clear_expand_state(&self) -> usize {
        let mut count = self.children().len();
        if self.expandable(0.0) {
            self.expand_state
                .store(ExpandState::Initial as u8, Ordering::Release);
        }
        for child in self.children() {
            if let Some(node) = child.node() {
                count += node.count_nodes_and_clear_expand_state();
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::UniformEvaluator;
    use rand::SeedableRng;
    use std::sync::Arc;
    use tengen_core::SymmetryTable;
    use tengen_minigo::MiniGoban;
    use tengen_net::Netresult;

    fn lz_leaf(value: f32) -> LeafEval {
        LeafEval {
            value,
            alpkt: 0.0,
            beta: 1.0,
            beta2: 1.0,
            is_sai: false,
        }
    }

    #[test]
    fn test_update_accumulates_welford() {
        let node = UctNode::new(0, 0.5);
        for value in [0.4f32, 0.6, 0.5] {
            node.update(&lz_leaf(value), false);
        }
        assert_eq!(node.visits(), 3);
        assert!((node.raw_eval(Color::Black, 0) - 0.5).abs() < 1e-6);
        assert!((node.raw_eval(Color::White, 0) - 0.5).abs() < 1e-6);
        // Sample variance of {0.4, 0.6, 0.5} is 0.01.
        assert!((node.eval_variance(0.0) - 0.01).abs() < 1e-4);
        // Eval-sum and pi-sum invariants.
        let visits = node.visits() as f64;
        assert!(node.black_evals.load().abs() < visits);
        let pi_sum = node.pi_sum.load();
        assert!((0.0..=visits).contains(&pi_sum));
    }

    #[test]
    fn test_virtual_loss_is_pessimistic_for_both_colors() {
        let cfg = SearchConfig::default();
        let node = UctNode::new(0, 0.5);
        for _ in 0..5 {
            node.update(&lz_leaf(0.7), false);
        }
        let black_before = node.eval(Color::Black);
        let white_before = node.eval(Color::White);
        node.add_virtual_loss(&cfg);
        assert!(node.eval(Color::Black) < black_before);
        assert!(node.eval(Color::White) < white_before);
        node.undo_virtual_loss(&cfg);
        assert!((node.eval(Color::Black) - black_before).abs() < 1e-6);
        assert_eq!(node.virtual_loss(), 0);
    }

    #[test]
    fn test_expansion_acquire_is_exclusive() {
        // Invariant: at most one thread wins the INITIAL -> EXPANDING race.
        for _ in 0..100 {
            let node = Arc::new(UctNode::new(0, 0.5));
            let winners: usize = (0..8)
                .map(|_| {
                    let node = Arc::clone(&node);
                    std::thread::spawn(move || usize::from(node.acquire_expanding()))
                })
                .collect::<Vec<_>>()
                .into_iter()
                .map(|h| h.join().unwrap())
                .sum();
            assert_eq!(winners, 1);
            assert_eq!(node.expand_state(), ExpandState::Expanding);
        }
    }

    #[test]
    fn test_expand_cancel_allows_retry() {
        let node = UctNode::new(0, 0.5);
        assert!(node.acquire_expanding());
        node.expand_cancel();
        assert_eq!(node.expand_state(), ExpandState::Initial);
        assert!(node.acquire_expanding());
        node.expand_done();
        assert_eq!(node.expand_state(), ExpandState::Expanded);
        assert!(!node.acquire_expanding());
    }

    #[test]
    fn test_create_children_merges_symmetric_moves() {
        // An empty 5x5 board is invariant under the full dihedral group:
        // the 25 intersections collapse to 6 orbit representatives. Six
        // candidates exceed the pass-gating threshold, so no pass child.
        let cfg = SearchConfig::default();
        let node = UctNode::new(PASS, 1.0);
        let board = MiniGoban::new(5, 0.0);
        let eval = UniformEvaluator::new(5);
        let count = AtomicUsize::new(0);
        let mut rng = ChaCha20Rng::seed_from_u64(11);

        let result = node
            .create_children(&count, &board, &eval, &cfg, &mut rng, 0.0, false)
            .unwrap()
            .expect("expansion should happen");
        assert!(!result.is_sai);
        assert_eq!(node.children().len(), 6);
        assert_eq!(count.load(Ordering::Relaxed), 6);

        // Renormalization preserves a total policy of one.
        let total: f32 = node.children().iter().map(|c| c.policy()).sum();
        assert!((total - 1.0).abs() < 1e-5);

        // Orbit sizes survive in the merged policies: the center orbit has
        // a single member, the corner orbit four.
        let center = node.find_child(12).expect("center child");
        let corner_mv = node
            .children()
            .iter()
            .map(|c| c.mv())
            .find(|m| [0, 4, 20, 24].contains(m))
            .expect("corner child");
        let corner = node.find_child(corner_mv).unwrap();
        assert!(corner.policy() > center.policy());
    }

    #[test]
    fn test_create_children_without_symmetries() {
        let cfg = SearchConfig {
            exploit_symmetries: false,
            ..SearchConfig::default()
        };
        let node = UctNode::new(PASS, 1.0);
        let board = MiniGoban::new(5, 0.0);
        let eval = UniformEvaluator::new(5);
        let count = AtomicUsize::new(0);
        let mut rng = ChaCha20Rng::seed_from_u64(12);

        node.create_children(&count, &board, &eval, &cfg, &mut rng, 0.0, false)
            .unwrap()
            .expect("expansion should happen");
        // All 25 moves; pass is gated off with this many candidates.
        assert_eq!(node.children().len(), 25);
        let total: f32 = node.children().iter().map(|c| c.policy()).sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_expansion_updates_once() {
        let cfg = SearchConfig::default();
        let node = UctNode::new(PASS, 1.0);
        let board = MiniGoban::new(5, 0.0);
        let eval = UniformEvaluator::new(5).with_value(0.7);
        let count = AtomicUsize::new(0);
        let mut rng = ChaCha20Rng::seed_from_u64(13);

        node.create_children(&count, &board, &eval, &cfg, &mut rng, 0.0, false)
            .unwrap()
            .expect("expansion should happen");
        assert_eq!(node.visits(), 1);
        // Black to move: the black-perspective eval equals the stm value.
        assert!((node.raw_eval(Color::Black, 0) - 0.7).abs() < 1e-6);

        // A second expansion attempt is a no-op.
        let again = node
            .create_children(&count, &board, &eval, &cfg, &mut rng, 0.0, false)
            .unwrap();
        assert!(again.is_none());
        assert_eq!(node.visits(), 1);
    }

    #[test]
    fn test_sai_expansion_sets_quantiles() {
        let mut cfg = SearchConfig::default();
        cfg.lambda = [0.5; 4];
        cfg.mu = [0.25; 4];
        let node = UctNode::new(PASS, 1.0);
        let board = MiniGoban::new(5, 0.0);
        // alpha = 2.0 stm; black to move, komi 0 => alpkt = 2.0.
        let eval = UniformEvaluator::new(5).with_value(0.6).with_sai(2.0, 0.5);
        let count = AtomicUsize::new(0);
        let mut rng = ChaCha20Rng::seed_from_u64(14);

        let result = node
            .create_children(&count, &board, &eval, &cfg, &mut rng, 0.0, false)
            .unwrap()
            .expect("expansion should happen");
        assert!(result.is_sai);
        assert!((result.alpkt - 2.0).abs() < 1e-6);
        assert!((node.lambda() - 0.5).abs() < 1e-6);

        // First quantile update takes the logit initialisation:
        // avg_p = 0.5*lambda + (1 - lambda)*avg_pi with avg_pi = 0.6.
        let avg_p = 0.5f32 * 0.5 + 0.5 * 0.6;
        let expected = (avg_p.ln() - (-avg_p).ln_1p()) / 0.5 - 2.0;
        assert!((node.quantile_lambda(Color::Black) - expected).abs() < 1e-4);
        assert!((node.quantile_lambda(Color::White) + expected).abs() < 1e-4);

        // The score quantile uses parameter 1: avg_p = 0.5 exactly, so
        // q_one = -alpkt and the reported tree score is alpkt itself.
        assert!((node.agent_eval().alpkt_tree - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_zero_lambda_forces_zero_quantile() {
        let cfg = SearchConfig::default(); // lambda = mu = 0
        let node = UctNode::new(PASS, 1.0);
        let board = MiniGoban::new(5, 0.0);
        let eval = UniformEvaluator::new(5).with_sai(1.0, 0.4);
        let count = AtomicUsize::new(0);
        let mut rng = ChaCha20Rng::seed_from_u64(15);

        node.create_children(&count, &board, &eval, &cfg, &mut rng, 0.0, false)
            .unwrap()
            .expect("expansion should happen");
        assert_eq!(node.quantile_lambda(Color::Black), 0.0);
        assert_eq!(node.quantile_mu(Color::Black), 0.0);
        // The "one" quantile is always live.
        assert!(node.quantile_one() != 0.0);
    }

    #[test]
    fn test_selection_is_stable_on_ties() {
        let cfg = SearchConfig {
            exploit_symmetries: false,
            ..SearchConfig::default()
        };
        let node = UctNode::new(PASS, 1.0);
        let board = MiniGoban::new(5, 0.0);
        let eval = UniformEvaluator::new(5);
        let count = AtomicUsize::new(0);
        let mut rng = ChaCha20Rng::seed_from_u64(16);

        node.create_children(&count, &board, &eval, &cfg, &mut rng, 0.0, false)
            .unwrap()
            .expect("expansion should happen");

        // All children tie on policy and visits; selection must keep
        // returning the same (first) child.
        let first = node
            .select_child(&board, true, None, &[], false, &cfg)
            .unwrap() as *const UctNode;
        for _ in 0..5 {
            let again = node
                .select_child(&board, true, None, &[], false, &cfg)
                .unwrap() as *const UctNode;
            assert_eq!(first, again);
        }
    }

    #[test]
    fn test_selection_respects_move_list_and_max_visits() {
        let cfg = SearchConfig {
            exploit_symmetries: false,
            ..SearchConfig::default()
        };
        let node = UctNode::new(PASS, 1.0);
        let board = MiniGoban::new(5, 0.0);
        let eval = UniformEvaluator::new(5);
        let count = AtomicUsize::new(0);
        let mut rng = ChaCha20Rng::seed_from_u64(17);

        node.create_children(&count, &board, &eval, &cfg, &mut rng, 0.0, false)
            .unwrap()
            .expect("expansion should happen");

        let chosen = node
            .select_child(&board, true, None, &[3], false, &cfg)
            .unwrap();
        assert_eq!(chosen.mv(), 3);

        // Give that child visits beyond the cap; the restriction then
        // yields no candidate.
        chosen.update(&lz_leaf(0.5), false);
        let capped = node.select_child(&board, true, Some(1), &[3], false, &cfg);
        assert!(capped.is_none());
    }

    #[test]
    fn test_selection_penalizes_pass_when_nopass() {
        let cfg = SearchConfig {
            exploit_symmetries: false,
            dumb_pass: true,
            ..SearchConfig::default()
        };
        let node = UctNode::new(PASS, 1.0);
        let board = MiniGoban::new(5, 0.0);
        let eval = UniformEvaluator::new(5);
        let count = AtomicUsize::new(0);
        let mut rng = ChaCha20Rng::seed_from_u64(18);

        node.create_children(&count, &board, &eval, &cfg, &mut rng, 0.0, false)
            .unwrap()
            .expect("expansion should happen");
        let chosen = node
            .select_child(&board, true, None, &[], true, &cfg)
            .unwrap();
        assert_ne!(chosen.mv(), PASS);
    }

    #[test]
    fn test_best_root_child_prefers_visits_and_eval() {
        let cfg = SearchConfig {
            exploit_symmetries: false,
            ..SearchConfig::default()
        };
        let node = UctNode::new(PASS, 1.0);
        let board = MiniGoban::new(5, 0.0);
        let eval = UniformEvaluator::new(5);
        let count = AtomicUsize::new(0);
        let mut rng = ChaCha20Rng::seed_from_u64(19);

        node.create_children(&count, &board, &eval, &cfg, &mut rng, 0.0, false)
            .unwrap()
            .expect("expansion should happen");

        let strong = node.find_child(12).unwrap();
        for _ in 0..20 {
            strong.update(&lz_leaf(0.8), false);
        }
        let weak = node.find_child(0).unwrap();
        for _ in 0..3 {
            weak.update(&lz_leaf(0.2), false);
        }

        let best = node.best_root_child(Color::Black, &cfg).unwrap();
        assert_eq!(best.mv(), 12);
    }

    #[test]
    fn test_partial_expansion_extends_without_duplicates() {
        // A skewed policy: index 0 dominates, the tail is tiny.
        struct Skewed(SymmetryTable);
        impl<S: GameState> crate::evaluator::LeafEvaluator<S> for Skewed {
            fn evaluate(
                &self,
                state: &S,
                _rng: &mut ChaCha20Rng,
            ) -> Result<Netresult, EvalError> {
                let n = state.board_size() * state.board_size();
                let mut result = Netresult::new(n);
                result.policy[0] = 1.0;
                for p in result.policy[1..].iter_mut() {
                    *p = 0.01;
                }
                result.policy_pass = 0.01;
                result.value = 0.5;
                Ok(result)
            }
            fn symmetries(&self) -> &SymmetryTable {
                &self.0
            }
        }

        let cfg = SearchConfig {
            exploit_symmetries: false,
            ..SearchConfig::default()
        };
        let node = UctNode::new(PASS, 1.0);
        let board = MiniGoban::new(5, 0.0);
        let eval = Skewed(SymmetryTable::new(5));
        let count = AtomicUsize::new(0);
        let mut rng = ChaCha20Rng::seed_from_u64(20);

        // First pass keeps only the dominant move.
        node.create_children(&count, &board, &eval, &cfg, &mut rng, 0.5, false)
            .unwrap()
            .expect("expansion should happen");
        assert_eq!(node.children().len(), 1);
        assert!((node.min_psa_ratio_children() - 0.5).abs() < 1e-6);
        assert!(node.expandable(0.0));

        // Between searches the expand state is cleared, allowing a second
        // pass to link the tail.
        node.count_nodes_and_clear_expand_state();
        node.create_children(&count, &board, &eval, &cfg, &mut rng, 0.0, false)
            .unwrap()
            .expect("second expansion should happen");
        assert_eq!(node.children().len(), 25);
        assert_eq!(node.min_psa_ratio_children(), 0.0);

        let mut moves: Vec<Vertex> = node.children().iter().map(|c| c.mv()).collect();
        moves.sort_unstable();
        moves.dedup();
        assert_eq!(moves.len(), 25, "no duplicate children after extension");
    }

    #[test]
    fn test_subtree_statistics() {
        let node = UctNode::new(PASS, 1.0);
        node.set_net_values(0.6, 1.5, 0.4, -1.0);
        node.update(&lz_leaf(0.6), false);
        assert!((node.estimate_alpkt(0, false) - 1.5).abs() < 1e-6);
        assert!((node.beta_median() - 0.4).abs() < 1e-6);
        assert!((node.azwinrate_avg() - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_status_transitions() {
        let node = UctNode::new(0, 0.5);
        assert!(node.active() && node.valid());
        node.set_active(false);
        assert!(!node.active() && node.valid());
        node.invalidate();
        assert!(!node.valid());
        // Pruning an invalid node is a no-op.
        node.set_active(true);
        assert!(!node.valid());
    }
}
