use slotmap::new_key_type;

new_key_type! {
    /// Arena key of an entity node. Stable for the node's lifetime, unlike the
    /// global and leaf indices, which are renumbered as the tree changes.
    pub struct EntityId;
}
