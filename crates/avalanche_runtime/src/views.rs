//! View manager.
//!
//! When a view maker finishes and its view node becomes eligible, one
//! sub-traversal is opened per seed of the `ViewSet` the maker wrote. Each
//! sub-traversal runs the node's children against its own child partition.
//! Once every view has finished, the per-view decisions are combined into
//! the decision of the view node in the parent traversal.

use std::sync::Arc;

use avalanche_core::{CoreError, CoreResult, Decision, EventId, NodeIndex};
use avalanche_plan::{PrecedenceGraph, ViewCombine};
use avalanche_store::{ViewSet, Whiteboard};

use crate::slot::{EventSlot, Traversal};

/// Open views of one view node
#[derive(Debug, Clone)]
pub(crate) struct ViewGroup {
    pub combine: ViewCombine,
    /// Traversal of every view, by view position
    pub children: Vec<usize>,
    /// Root decision of every finished view
    pub decisions: Vec<Option<Decision>>,
    /// Views not finished yet
    pub open: usize,
    /// The node was deactivated; the group decides nothing
    pub cancelled: bool,
}

impl ViewGroup {
    /// Combined decision; views that never decided count as FALSE
    pub fn combined(&self) -> Decision {
        Decision::from_bool(combine_views(
            self.combine,
            self.decisions
                .iter()
                .map(|d| d.and_then(|d| d.as_bool()).unwrap_or(false)),
        ))
    }
}

/// Combine per-view decisions
///
/// With zero views the result is the combination's identity: FALSE for
/// OR, TRUE for AND.
pub fn combine_views(combine: ViewCombine, decisions: impl IntoIterator<Item = bool>) -> bool {
    let mut decisions = decisions.into_iter();
    match combine {
        ViewCombine::Or => decisions.any(|d| d),
        ViewCombine::And => decisions.all(|d| d),
    }
}

/// Result of closing a finished view
pub(crate) struct ClosedGroup {
    pub parent: usize,
    pub node: NodeIndex,
    /// `None` when the group was cancelled
    pub decision: Option<Decision>,
}

/// Opens, closes and cancels views within one slot
pub(crate) struct ViewManager<'a> {
    graph: &'a PrecedenceGraph,
}

impl<'a> ViewManager<'a> {
    pub fn new(graph: &'a PrecedenceGraph) -> Self {
        Self { graph }
    }

    /// Open the views of `node` below traversal `parent`
    ///
    /// Returns the node's decision right away when there is nothing to
    /// open; the maker writing no collection counts as zero views.
    pub fn create_views(
        &self,
        slot: &mut EventSlot,
        parent: usize,
        node: NodeIndex,
        event: EventId,
    ) -> CoreResult<Option<Decision>> {
        let maker = self
            .graph
            .view_maker(node)
            .ok_or_else(|| CoreError::internal(format!("{} has no view maker", node)))?;
        let desc = self.graph.algorithm(maker);
        let spec = desc
            .views
            .as_ref()
            .ok_or_else(|| CoreError::internal(format!("{} declares no views", desc.name)))?;
        let parent_store = Arc::clone(&slot.traversals[parent].store);

        let set = match parent_store.get(&spec.collection)? {
            None => Arc::new(ViewSet::new()),
            Some(object) => object.downcast::<ViewSet>().ok_or_else(|| CoreError::DataFault {
                alg: desc.name.clone(),
                event,
                path: spec.collection.to_string(),
                reason: format!("holds {} instead of a view set", object.type_name()),
            })?,
        };
        if set.is_empty() {
            tracing::debug!(node = %self.graph.node(node).name, event = %event, "no views");
            return Ok(Some(Decision::from_bool(spec.combine.identity())));
        }

        let mut children = Vec::with_capacity(set.len());
        for (i, seed) in set.seeds().iter().enumerate() {
            let store = Whiteboard::create_sub_slot(&parent_store, node, i);
            seed.populate(&store).map_err(|e| CoreError::IsolationViolation {
                path: seed.paths().map(ToString::to_string).collect::<Vec<_>>().join(","),
                reason: format!("{} seeding view {} on event {}: {}", desc.name, i, event, e),
            })?;
            for path in &spec.outputs {
                store.mark_done(path.clone())?;
            }
            children.push(slot.traversals.len());
            slot.traversals
                .push(Traversal::new(self.graph, node, Some(parent), Some(i), store));
        }
        tracing::debug!(
            node = %self.graph.node(node).name,
            event = %event,
            views = children.len(),
            "views opened"
        );
        slot.traversals[parent].groups.insert(
            node,
            ViewGroup {
                combine: spec.combine,
                decisions: vec![None; children.len()],
                open: children.len(),
                children,
                cancelled: false,
            },
        );
        Ok(None)
    }

    /// Record a finished view traversal
    ///
    /// Returns the closed group once its last view has finished.
    pub fn view_finished(&self, slot: &mut EventSlot, child: usize) -> Option<ClosedGroup> {
        let traversal = &slot.traversals[child];
        let (parent, view, node) = (traversal.parent?, traversal.view?, traversal.scope);
        let decision = traversal.cf.root_decision();
        let groups = &mut slot.traversals[parent].groups;
        let group = groups.get_mut(&node)?;
        if let Some(d) = group.decisions.get_mut(view) {
            *d = Some(decision);
        }
        group.open = group.open.saturating_sub(1);
        if group.open > 0 {
            return None;
        }
        let group = groups.swap_remove(&node)?;
        Some(ClosedGroup {
            parent,
            node,
            decision: (!group.cancelled).then(|| group.combined()),
        })
    }

    /// Cancel every view of `node` opened below `parent`
    ///
    /// Returns the number of algorithms skipped.
    pub fn cancel(&self, slot: &mut EventSlot, parent: usize, node: NodeIndex) -> usize {
        let Some(group) = slot.traversals[parent].groups.get_mut(&node) else {
            return 0;
        };
        group.cancelled = true;
        let children = group.children.clone();
        let doomed: Vec<usize> = children.into_iter().flat_map(|child| slot.subtree(child)).collect();
        doomed.into_iter().map(|t| self.cancel_traversal(slot, t)).sum()
    }

    /// Skip everything not yet submitted in one traversal
    pub fn cancel_traversal(&self, slot: &mut EventSlot, t: usize) -> usize {
        let traversal = &mut slot.traversals[t];
        traversal.cancelled = true;
        traversal.pending_views.clear();
        traversal.groups.values_mut().for_each(|g| g.cancelled = true);
        let mut skipped = 0;
        for alg in self.graph.scope_algorithms(traversal.scope) {
            if traversal.skip(self.graph, *alg) {
                skipped += 1;
            }
        }
        skipped
    }
}
