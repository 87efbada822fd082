use std::sync::Arc;

use crate::beliefs::BeliefContext;

type QueryFn = Arc<dyn Fn(&BeliefContext) -> bool + Send + Sync>;
type HeuristicFn = Arc<dyn Fn(&BeliefContext) -> f32 + Send + Sync>;

/// A boolean predicate over a belief context. Goal and plan conditions
/// (precondition, satisfied, drop-when) are all belief queries; an unset
/// query evaluates to the caller-supplied default.
#[derive(Clone, Default)]
pub struct BeliefQuery {
    func: Option<QueryFn>,
    label: String,
}

impl BeliefQuery {
    pub fn new(func: impl Fn(&BeliefContext) -> bool + Send + Sync + 'static) -> Self {
        Self {
            func: Some(Arc::new(func)),
            label: String::new(),
        }
    }

    pub fn labeled(
        label: impl Into<String>,
        func: impl Fn(&BeliefContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            func: Some(Arc::new(func)),
            label: label.into(),
        }
    }

    pub fn is_set(&self) -> bool {
        self.func.is_some()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn evaluate_or(&self, context: &BeliefContext, default: bool) -> bool {
        match &self.func {
            Some(func) => func(context),
            None => default,
        }
    }
}

impl std::fmt::Debug for BeliefQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_set() {
            write!(f, "BeliefQuery({:?})", self.label)
        } else {
            write!(f, "BeliefQuery(unset)")
        }
    }
}

/// Estimated cost of completing a goal from a given context. Ideally
/// admissible; the planner clamps negative estimates to zero.
#[derive(Clone, Default)]
pub struct Heuristic {
    func: Option<HeuristicFn>,
}

impl Heuristic {
    pub fn new(func: impl Fn(&BeliefContext) -> f32 + Send + Sync + 'static) -> Self {
        Self {
            func: Some(Arc::new(func)),
        }
    }

    pub fn is_set(&self) -> bool {
        self.func.is_some()
    }

    pub fn evaluate(&self, context: &BeliefContext) -> Option<f32> {
        self.func.as_ref().map(|func| func(context).max(0.0))
    }
}

impl std::fmt::Debug for Heuristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Heuristic(set={})", self.is_set())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_query_uses_default() {
        let ctx = BeliefContext::new();
        let query = BeliefQuery::default();
        assert!(query.evaluate_or(&ctx, true));
        assert!(!query.evaluate_or(&ctx, false));
    }

    #[test]
    fn test_set_query_ignores_default() {
        let ctx = BeliefContext::new();
        let query = BeliefQuery::new(|_| false);
        assert!(!query.evaluate_or(&ctx, true));
    }

    #[test]
    fn test_heuristic_clamped() {
        let ctx = BeliefContext::new();
        let heuristic = Heuristic::new(|_| -3.0);
        assert_eq!(heuristic.evaluate(&ctx), Some(0.0));
        assert_eq!(Heuristic::default().evaluate(&ctx), None);
    }
}
