//! Textual policy heatmap.
//!
//! Renders the per-intersection policy in permille, normalized over the
//! legal moves, with a summary block underneath. For SAI nets the summary
//! includes the alpha/beta parameters and the agent's quantile interval.

use tengen_core::{vertex_to_text, GameState, Vertex, PASS};

use crate::cache::Netresult;

/// Tree-level agent statistics accompanying a SAI evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentEval {
    pub lambda: f32,
    pub mu: f32,
    pub quantile_lambda: f32,
    pub quantile_mu: f32,
    /// Expected score from the search tree (`-quantile_one`).
    pub alpkt_tree: f32,
}

/// Render the heatmap for a position. When `topmoves` is set, the highest
/// policy moves are listed until 85% cumulative mass or a 1% floor.
pub fn heatmap_string<S: GameState>(
    state: &S,
    result: &Netresult,
    topmoves: bool,
    agent: &AgentEval,
) -> String {
    let board_size = state.board_size();
    let color = state.to_move();

    let mut legal_policy = result.policy_pass;
    let mut illegal_policy = 0.0f32;
    let mut policies = vec![0.0f32; board_size * board_size];

    for y in 0..board_size {
        for x in 0..board_size {
            let idx = y * board_size + x;
            let policy = result.policy[idx];
            if state.is_move_legal(color, idx as Vertex) {
                legal_policy += policy;
                policies[idx] = policy;
            } else {
                illegal_policy += policy;
            }
        }
    }

    let mut out = String::new();
    // Top row last in memory, first on screen.
    for y in (0..board_size).rev() {
        for x in 0..board_size {
            let clean = (policies[y * board_size + x] * 1000.0 / legal_policy) as i32;
            out.push_str(&format!("{clean:3} "));
        }
        out.push('\n');
    }

    let pass_policy = (result.policy_pass * 1000.0 / legal_policy) as i32;
    let illegal_millis = (illegal_policy * 1000.0) as i32;
    out.push_str(&format!("pass: {pass_policy}, illegal: {illegal_millis}\n"));

    if result.is_sai {
        let (lo, hi) = if agent.quantile_mu < agent.quantile_lambda {
            (agent.quantile_mu, agent.quantile_lambda)
        } else {
            (agent.quantile_lambda, agent.quantile_mu)
        };
        out.push_str(&format!("alpha: {:5.2}    ", result.alpha));
        if result.beta2 > 0.0 {
            out.push_str(&format!("betas: {:.2} {:.2} ", result.beta, result.beta2));
        } else {
            out.push_str(&format!("beta: {:.2}     ", result.beta));
        }
        out.push_str(&format!("winrate: {:2.1}%\n", result.value * 100.0));
        out.push_str(&format!(
            "komi: {:2.1}       handicap: {}    alpkt tree: {:3.2}\n",
            state.komi(),
            state.handicap(),
            agent.alpkt_tree
        ));
        out.push_str(&format!(
            "lambda: {:.2}    mu: {:.2}       interval: [{lo:.1}, {hi:.1}]\n",
            agent.lambda, agent.mu
        ));
    } else {
        out.push_str(&format!("value: {:.1}%\n", result.value * 100.0));
    }

    if topmoves {
        let mut moves: Vec<(f32, Vertex)> = Vec::new();
        for (idx, &policy) in result.policy.iter().enumerate() {
            let x = idx % board_size;
            let y = idx / board_size;
            if state.stone_at(x, y).is_none() {
                moves.push((policy, idx as Vertex));
            }
        }
        moves.push((result.policy_pass, PASS));
        moves.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

        let mut cum = 0.0f32;
        for (policy, vertex) in moves {
            if cum > 0.85 || policy < 0.01 {
                break;
            }
            out.push_str(&format!(
                "{policy:1.3} ({})\n",
                vertex_to_text(board_size, vertex)
            ));
            cum += policy;
        }
    }

    out
}
