use crate::core::address::AddressError;
use crate::core::models::ids::EntityId;
use crate::engine::error::IndexError;
use crate::engine::events::IndexSpace;
use crate::engine::system::EntitySystem;
use tracing::{debug, info, instrument};

/// Shape of every molecule of a species.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoleculeTemplate {
    pub leaves: usize,
}

impl MoleculeTemplate {
    pub fn with_leaves(leaves: usize) -> Self {
        Self { leaves }
    }
}

/// One species of a population: how many molecules and what each looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeciesLayout {
    pub template: MoleculeTemplate,
    pub molecules: usize,
}

impl SpeciesLayout {
    pub fn new(template: MoleculeTemplate, molecules: usize) -> Self {
        Self {
            template,
            molecules,
        }
    }
}

/// Adds one species group under the root per layout entry and fills it.
///
/// Returns the species groups in layout order.
#[instrument(skip_all, name = "populate_workflow")]
pub fn populate(
    system: &mut EntitySystem,
    layout: &[SpeciesLayout],
) -> Result<Vec<EntityId>, IndexError> {
    info!("Populating {} species.", layout.len());
    let root = system.root();

    let mut species_ids = Vec::with_capacity(layout.len());
    for species in layout {
        let id = system.add_group(root)?;
        set_molecule_count(system, id, species.molecules, species.template)?;
        species_ids.push(id);
    }

    info!(
        entities = system.entity_count(),
        leaves = system.leaf_count(),
        "Population complete."
    );
    Ok(species_ids)
}

/// Grows or shrinks `species` to exactly `count` molecules.
///
/// Growth announces the final global and leaf bounds before the first molecule is
/// added, so listeners resize once. Shrinking removes the last molecules, so the
/// survivors keep their ordinals.
///
/// # Errors
///
/// Growth is checked against the address layout before anything is announced or
/// attached: a count or template that does not fit the bits of its depth fails
/// with [`AddressError::OrdinalOverflow`] and leaves the species untouched.
#[instrument(skip_all, name = "set_molecule_count", fields(target = count))]
pub fn set_molecule_count(
    system: &mut EntitySystem,
    species: EntityId,
    count: usize,
    template: MoleculeTemplate,
) -> Result<(), IndexError> {
    let node = system
        .node(species)
        .ok_or(IndexError::EntityNotFound(species))?;
    if node.is_leaf() {
        return Err(IndexError::NotAGroup(species));
    }
    let molecule_depth = node.depth() + 1;
    let current = node.child_count();

    if count > current {
        check_fits(system, molecule_depth, count)?;
        if template.leaves > 0 {
            check_fits(system, molecule_depth + 1, template.leaves)?;
        }

        let added = count - current;
        let global = template
            .leaves
            .checked_add(1)
            .and_then(|per_molecule| added.checked_mul(per_molecule))
            .ok_or_else(|| overflow(system, molecule_depth, count))?;
        let leaf = added
            .checked_mul(template.leaves)
            .ok_or_else(|| overflow(system, molecule_depth + 1, template.leaves))?;
        system.preallocate(IndexSpace::Global, global);
        system.preallocate(IndexSpace::Leaf, leaf);

        for _ in 0..added {
            let molecule = system.add_group(species)?;
            for _ in 0..template.leaves {
                system.add_leaf(molecule)?;
            }
        }
        debug!(from = current, to = count, "Added molecules");
    } else if count < current {
        for _ in count..current {
            let last = system
                .children(species)?
                .last()
                .copied()
                .ok_or_else(|| IndexError::Internal("species lost its molecules".to_string()))?;
            system.detach_child(species, last)?;
        }
        debug!(from = current, to = count, "Removed molecules");
    }

    Ok(())
}

/// Fails unless `requested` children fit the ordinal bits of `depth`.
fn check_fits(system: &EntitySystem, depth: usize, requested: usize) -> Result<(), IndexError> {
    let max = system.codec().max_ordinal(depth)?;
    if requested > max as usize {
        return Err(overflow(system, depth, requested));
    }
    Ok(())
}

fn overflow(system: &EntitySystem, depth: usize, requested: usize) -> IndexError {
    AddressError::OrdinalOverflow {
        depth,
        ordinal: u32::try_from(requested).unwrap_or(u32::MAX),
        bits: system.codec().bit_widths().get(depth).copied().unwrap_or(0),
    }
    .into()
}
