use std::fmt;
use std::sync::Arc;

use pipewright_core::state::RunState;

use super::node::NodeKey;

/// Outcome of a routing function: the next node, or the terminal marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route<K> {
    To(K),
    End,
}

impl<K: fmt::Display> fmt::Display for Route<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::To(k) => write!(f, "{}", k),
            Route::End => write!(f, "END"),
        }
    }
}

/// A routing function. Must be total and must only read the state.
pub type RouteFn<K> = dyn Fn(&RunState) -> Route<K> + Send + Sync;

/// A conditional transition: a routing function plus the closed set of
/// outcomes it is allowed to return.
pub struct Branch<K> {
    router: Arc<RouteFn<K>>,
    targets: Vec<Route<K>>,
}

impl<K: NodeKey> Branch<K> {
    pub fn new<F>(router: F, targets: impl IntoIterator<Item = Route<K>>) -> Self
    where
        F: Fn(&RunState) -> Route<K> + Send + Sync + 'static,
    {
        let mut declared: Vec<Route<K>> = Vec::new();
        for t in targets {
            if !declared.contains(&t) {
                declared.push(t);
            }
        }
        Self {
            router: Arc::new(router),
            targets: declared,
        }
    }

    /// Declared outcomes, in declaration order.
    pub fn targets(&self) -> &[Route<K>] {
        &self.targets
    }

    /// Declared node targets, excluding the terminal marker.
    pub fn node_targets(&self) -> impl Iterator<Item = K> + '_ {
        self.targets.iter().filter_map(|t| match t {
            Route::To(k) => Some(*k),
            Route::End => None,
        })
    }

    pub fn can_end(&self) -> bool {
        self.targets.contains(&Route::End)
    }

    pub fn allows(&self, route: &Route<K>) -> bool {
        self.targets.contains(route)
    }

    pub fn route(&self, state: &RunState) -> Route<K> {
        (self.router)(state)
    }
}
