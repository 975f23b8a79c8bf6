use super::error::IndexError;
use crate::core::models::ids::EntityId;
use tracing::{debug, instrument, trace};

/// One entity moved to a lower global index by compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Renumbering {
    pub entity: EntityId,
    pub old_index: usize,
    pub new_index: usize,
}

/// Outcome of a compaction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compaction {
    /// Live entities moved below the cutoff, in ascending order of old index.
    pub renumbered: Vec<Renumbering>,
    /// Reservoir entries above the cutoff, dropped without reuse.
    pub discarded: Vec<usize>,
    /// Number of index slots in use after compaction (`next_index + 1`).
    pub bound: usize,
}

/// Issues global indices, recycles freed ones through a bounded reservoir and
/// compacts the index space when the reservoir fills.
///
/// The allocator keeps its own index → entity table so that compaction can
/// renumber live entities without walking the tree.
#[derive(Debug, Clone)]
pub struct IndexAllocator {
    reservoir_capacity: usize,
    /// Number of index slots handed out so far; `next_index + 1`.
    bound: usize,
    reservoir: Vec<usize>,
    owners: Vec<Option<EntityId>>,
}

impl IndexAllocator {
    pub fn new(reservoir_capacity: usize) -> Self {
        Self {
            reservoir_capacity,
            bound: 0,
            reservoir: Vec::with_capacity(reservoir_capacity.max(1)),
            owners: Vec::new(),
        }
    }

    pub fn reservoir_capacity(&self) -> usize {
        self.reservoir_capacity
    }

    /// Highest index issued and not reclaimed by compaction, or `None` before the
    /// first allocation.
    pub fn next_index(&self) -> Option<usize> {
        self.bound.checked_sub(1)
    }

    /// Size of the index space in use: every live index is below this bound.
    pub fn bound(&self) -> usize {
        self.bound
    }

    /// Freed indices waiting for reuse.
    pub fn reservoir(&self) -> &[usize] {
        &self.reservoir
    }

    pub fn live_count(&self) -> usize {
        self.bound - self.reservoir.len()
    }

    /// Entity currently holding `index`, if any.
    pub fn owner(&self, index: usize) -> Option<EntityId> {
        self.owners.get(index).copied().flatten()
    }

    /// Issues an index to `owner`, preferring recycled indices over growing the
    /// index space.
    pub fn allocate(&mut self, owner: EntityId) -> usize {
        if let Some(index) = self.reservoir.pop() {
            self.owners[index] = Some(owner);
            trace!(index, "reused global index");
            return index;
        }
        let index = self.bound;
        self.owners.push(Some(owner));
        self.bound += 1;
        index
    }

    /// Returns `index` to the reservoir.
    ///
    /// When this fills the reservoir a compaction runs before returning, and its
    /// outcome is handed back so the caller can renumber entities and notify
    /// listeners. A capacity of zero compacts on every free.
    ///
    /// # Errors
    ///
    /// [`IndexError::IndexNotLive`] if no live entity holds `index`.
    pub fn free(&mut self, index: usize) -> Result<Option<Compaction>, IndexError> {
        match self.owners.get_mut(index) {
            Some(slot @ Some(_)) => *slot = None,
            _ => return Err(IndexError::IndexNotLive(index)),
        }
        self.reservoir.push(index);

        if self.reservoir.len() >= self.reservoir_capacity.max(1) {
            self.compact().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Shrinks the index space by the number of reservoir entries.
    ///
    /// With `n` entries in the reservoir, every index at or above `bound - n` is
    /// vacated: free entries there are discarded, and live entities there take the
    /// remaining reservoir entries, lowest old index to lowest free index. Both
    /// sets have the same size because exactly `n` indices in the index space are
    /// free. The reservoir is empty afterwards.
    #[instrument(skip_all, name = "index_compaction", fields(bound = self.bound, reservoir = self.reservoir.len()))]
    pub fn compact(&mut self) -> Result<Compaction, IndexError> {
        let span = self.reservoir.len();
        if span == 0 {
            return Ok(Compaction {
                bound: self.bound,
                ..Compaction::default()
            });
        }

        let cutoff = self.bound.checked_sub(span).ok_or_else(|| {
            IndexError::Internal(format!(
                "reservoir holds {} entries but only {} indices were issued",
                span, self.bound
            ))
        })?;

        let (discarded, mut retained): (Vec<usize>, Vec<usize>) = std::mem::take(&mut self.reservoir)
            .into_iter()
            .partition(|&index| index >= cutoff);
        retained.sort_unstable();

        let movers: Vec<(usize, EntityId)> = (cutoff..self.bound)
            .filter_map(|index| self.owners[index].map(|entity| (index, entity)))
            .collect();
        if movers.len() != retained.len() {
            return Err(IndexError::Internal(format!(
                "compaction found {} live entities above index {} but {} free slots below it",
                movers.len(),
                cutoff,
                retained.len()
            )));
        }

        let renumbered: Vec<Renumbering> = movers
            .into_iter()
            .zip(retained)
            .map(|((old_index, entity), new_index)| {
                self.owners[new_index] = Some(entity);
                Renumbering {
                    entity,
                    old_index,
                    new_index,
                }
            })
            .collect();

        self.owners.truncate(cutoff);
        self.bound = cutoff;

        if !self.reservoir.is_empty() {
            return Err(IndexError::Internal(
                "reservoir not empty after compaction".to_string(),
            ));
        }

        debug!(
            renumbered = renumbered.len(),
            discarded = discarded.len(),
            bound = self.bound,
            "Compacted global index space"
        );

        Ok(Compaction {
            renumbered,
            discarded,
            bound: self.bound,
        })
    }

    /// Bound the index space will reach after `additional` more allocations,
    /// accounting for indices that will be served from the reservoir.
    pub fn preallocate(&self, additional: usize) -> usize {
        self.bound + additional.saturating_sub(self.reservoir.len())
    }
}
