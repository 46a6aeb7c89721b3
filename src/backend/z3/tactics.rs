//! The boolean simplification pipeline: the solver's own simplifier plus
//! the propagation passes that fold chained inequalities into their
//! strongest member.

use z3::ast::Bool;
use z3::{Goal, Tactic};

/// Run a boolean through `simplify`, `propagate-ineqs`, `propagate-values`,
/// and `unit-subsume-simplify`, conjoining whatever formulas remain.
pub(crate) fn simplify_bool(b: &Bool) -> Result<Bool, String> {
    let goal = Goal::new(false, false, false);
    goal.assert(b);
    let chain = Tactic::new("simplify")
        .and_then(&Tactic::new("propagate-ineqs"))
        .and_then(&Tactic::new("propagate-values"))
        .and_then(&Tactic::new("unit-subsume-simplify"));
    let result = chain.apply(&goal, None)?;
    let formulas: Vec<Bool> = result
        .list_subgoals()
        .flat_map(|g| g.get_formulas::<Bool>())
        .collect();
    Ok(match formulas.as_slice() {
        [] => Bool::from_bool(true),
        [one] => one.clone(),
        many => Bool::and(many),
    })
}
