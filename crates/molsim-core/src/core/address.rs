use crate::engine::config::ConfigError;
use thiserror::Error;

/// Width in bits of a packed entity address.
pub const WORD_BITS: u32 = 32;

/// A packed hierarchical address: each tree depth owns a contiguous run of bits,
/// shallowest depth in the most significant bits.
pub type Address = u32;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum AddressError {
    #[error("Ordinal {ordinal} does not fit in the {bits} bits reserved for depth {depth}")]
    OrdinalOverflow { depth: usize, ordinal: u32, bits: u32 },

    #[error("Depth {depth} exceeds the configured address depth (max {max_depth})")]
    DepthOutOfRange { depth: usize, max_depth: usize },
}

/// Packs and unpacks per-depth ordinals into a fixed-width address.
///
/// The codec is immutable once built and is shared by every entity of a tree.
/// Its configuration is validated eagerly: a width table that does not cover
/// exactly [`WORD_BITS`] bits is rejected at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressCodec {
    bit_widths: Vec<u32>,
    cumulative_widths: Vec<u32>,
    shifts: Vec<u32>,
}

impl AddressCodec {
    /// Builds a codec from a per-depth bit-width table.
    ///
    /// # Arguments
    ///
    /// * `bit_widths` - Number of bits reserved for the ordinal at each depth, root first.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroBitWidth`] if any depth is given no bits, and
    /// [`ConfigError::BitWidthSum`] if the widths do not add up to [`WORD_BITS`].
    pub fn new(bit_widths: &[u32]) -> Result<Self, ConfigError> {
        if let Some(depth) = bit_widths.iter().position(|&w| w == 0) {
            return Err(ConfigError::ZeroBitWidth { depth });
        }

        let total: u64 = bit_widths.iter().map(|&w| u64::from(w)).sum();
        if total != u64::from(WORD_BITS) {
            return Err(ConfigError::BitWidthSum {
                expected: WORD_BITS,
                actual: total,
            });
        }

        let mut cumulative_widths = Vec::with_capacity(bit_widths.len());
        let mut running = 0;
        for &width in bit_widths {
            running += width;
            cumulative_widths.push(running);
        }
        let shifts = cumulative_widths.iter().map(|&c| WORD_BITS - c).collect();

        Ok(Self {
            bit_widths: bit_widths.to_vec(),
            cumulative_widths,
            shifts,
        })
    }

    /// Number of depths the codec can address.
    pub fn max_depth(&self) -> usize {
        self.bit_widths.len()
    }

    pub fn bit_widths(&self) -> &[u32] {
        &self.bit_widths
    }

    pub fn cumulative_width(&self, depth: usize) -> Option<u32> {
        self.cumulative_widths.get(depth).copied()
    }

    pub fn shift(&self, depth: usize) -> Option<u32> {
        self.shifts.get(depth).copied()
    }

    /// Largest ordinal that can be encoded at `depth`.
    pub fn max_ordinal(&self, depth: usize) -> Result<u32, AddressError> {
        let bits = self.width_at(depth)?;
        Ok(low_mask(bits))
    }

    /// Encodes `ordinal` into the bit range owned by `depth`.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::OrdinalOverflow`] when the ordinal needs more bits
    /// than the depth owns, and [`AddressError::DepthOutOfRange`] for depths past
    /// the end of the width table.
    pub fn encode(&self, depth: usize, ordinal: u32) -> Result<Address, AddressError> {
        let bits = self.width_at(depth)?;
        let shift = self.shifts[depth];

        let fragment = ordinal.checked_shl(shift).unwrap_or(0);
        if ordinal > low_mask(bits) || fragment >> shift != ordinal {
            return Err(AddressError::OrdinalOverflow {
                depth,
                ordinal,
                bits,
            });
        }
        Ok(fragment)
    }

    /// Recovers the ordinal stored at `depth` within `address`.
    pub fn decode_ordinal(&self, depth: usize, address: Address) -> Result<u32, AddressError> {
        let bits = self.width_at(depth)?;
        let shift = self.shifts[depth];
        Ok((address >> shift) & low_mask(bits))
    }

    /// Mask covering every bit from the root down to and including `depth`.
    ///
    /// Depths beyond the table clamp to the deepest level, whose mask covers the
    /// whole word.
    pub fn ancestry_mask(&self, depth: usize) -> Address {
        let depth = depth.min(self.max_depth() - 1);
        let shift = self.shifts[depth];
        u32::MAX.checked_shl(shift).unwrap_or(0)
    }

    /// Returns true when both addresses share the same lineage down to `depth`.
    #[inline]
    pub fn same_ancestry(&self, a: Address, b: Address, depth: usize) -> bool {
        (a ^ b) & self.ancestry_mask(depth) == 0
    }

    /// Truncates `address` to its ancestor at `depth`.
    #[inline]
    pub fn ancestor_address(&self, address: Address, depth: usize) -> Address {
        address & self.ancestry_mask(depth)
    }

    /// Depth of the entity an address belongs to: the deepest level holding a
    /// non-zero ordinal. Ordinals start at 1, so an empty level marks the end of
    /// the lineage. Returns `None` for the zero address.
    pub fn depth_of(&self, address: Address) -> Option<usize> {
        (0..self.max_depth())
            .rev()
            .find(|&depth| (address >> self.shifts[depth]) & low_mask(self.bit_widths[depth]) != 0)
    }

    fn width_at(&self, depth: usize) -> Result<u32, AddressError> {
        self.bit_widths
            .get(depth)
            .copied()
            .ok_or(AddressError::DepthOutOfRange {
                depth,
                max_depth: self.max_depth(),
            })
    }
}

#[inline]
fn low_mask(bits: u32) -> u32 {
    if bits >= WORD_BITS {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> AddressCodec {
        AddressCodec::new(&[1, 7, 8, 16]).unwrap()
    }

    mod construction {
        use super::*;

        #[test]
        fn derived_tables_follow_widths() {
            let codec = codec();
            assert_eq!(codec.max_depth(), 4);
            assert_eq!(codec.cumulative_width(0), Some(1));
            assert_eq!(codec.cumulative_width(3), Some(32));
            assert_eq!(codec.shift(0), Some(31));
            assert_eq!(codec.shift(1), Some(24));
            assert_eq!(codec.shift(2), Some(16));
            assert_eq!(codec.shift(3), Some(0));
        }

        #[test]
        fn rejects_widths_not_summing_to_word() {
            let err = AddressCodec::new(&[1, 7, 8, 15]).unwrap_err();
            assert_eq!(
                err,
                ConfigError::BitWidthSum {
                    expected: 32,
                    actual: 31
                }
            );
            assert!(AddressCodec::new(&[16, 16, 1]).is_err());
            assert!(AddressCodec::new(&[]).is_err());
        }

        #[test]
        fn rejects_zero_width_depth() {
            let err = AddressCodec::new(&[1, 0, 15, 16]).unwrap_err();
            assert_eq!(err, ConfigError::ZeroBitWidth { depth: 1 });
        }

        #[test]
        fn single_depth_table_uses_whole_word() {
            let codec = AddressCodec::new(&[32]).unwrap();
            assert_eq!(codec.encode(0, u32::MAX).unwrap(), u32::MAX);
            assert_eq!(codec.ancestry_mask(0), u32::MAX);
        }
    }

    mod encoding {
        use super::*;

        #[test]
        fn encode_places_ordinal_in_depth_bits() {
            let codec = codec();
            assert_eq!(codec.encode(0, 1).unwrap(), 0x8000_0000);
            assert_eq!(codec.encode(1, 3).unwrap(), 0x0300_0000);
            assert_eq!(codec.encode(2, 0xAB).unwrap(), 0x00AB_0000);
            assert_eq!(codec.encode(3, 0xFFFF).unwrap(), 0x0000_FFFF);
        }

        #[test]
        fn decode_recovers_every_encodable_ordinal() {
            let codec = codec();
            for depth in 0..codec.max_depth() {
                let max = codec.max_ordinal(depth).unwrap();
                let step = (max / 97).max(1);
                let mut ordinal = 1;
                while ordinal <= max {
                    let fragment = codec.encode(depth, ordinal).unwrap();
                    assert_eq!(codec.decode_ordinal(depth, fragment).unwrap(), ordinal);
                    ordinal = match ordinal.checked_add(step) {
                        Some(next) => next,
                        None => break,
                    };
                }
                let fragment = codec.encode(depth, max).unwrap();
                assert_eq!(codec.decode_ordinal(depth, fragment).unwrap(), max);
            }
        }

        #[test]
        fn decode_ignores_other_depths() {
            let codec = codec();
            let address = codec.encode(0, 1).unwrap()
                | codec.encode(1, 5).unwrap()
                | codec.encode(2, 9).unwrap()
                | codec.encode(3, 300).unwrap();
            assert_eq!(codec.decode_ordinal(0, address).unwrap(), 1);
            assert_eq!(codec.decode_ordinal(1, address).unwrap(), 5);
            assert_eq!(codec.decode_ordinal(2, address).unwrap(), 9);
            assert_eq!(codec.decode_ordinal(3, address).unwrap(), 300);
        }

        #[test]
        fn ordinal_wider_than_depth_overflows() {
            let codec = codec();
            assert_eq!(
                codec.encode(1, 128).unwrap_err(),
                AddressError::OrdinalOverflow {
                    depth: 1,
                    ordinal: 128,
                    bits: 7
                }
            );
            assert!(codec.encode(1, 127).is_ok());
            assert!(codec.encode(0, 2).is_err());
            assert!(codec.encode(3, 1 << 16).is_err());
        }

        #[test]
        fn depth_past_table_is_rejected() {
            let codec = codec();
            assert_eq!(
                codec.encode(4, 1).unwrap_err(),
                AddressError::DepthOutOfRange {
                    depth: 4,
                    max_depth: 4
                }
            );
            assert!(codec.decode_ordinal(7, 0).is_err());
        }
    }

    mod ancestry {
        use super::*;

        #[test]
        fn mask_covers_root_through_depth() {
            let codec = codec();
            assert_eq!(codec.ancestry_mask(0), 0x8000_0000);
            assert_eq!(codec.ancestry_mask(1), 0xFF00_0000);
            assert_eq!(codec.ancestry_mask(2), 0xFFFF_0000);
            assert_eq!(codec.ancestry_mask(3), 0xFFFF_FFFF);
            assert_eq!(codec.ancestry_mask(10), 0xFFFF_FFFF);
        }

        #[test]
        fn siblings_share_parent_lineage_only() {
            let codec = codec();
            let parent = codec.encode(0, 1).unwrap() | codec.encode(1, 2).unwrap();
            let a = parent | codec.encode(2, 1).unwrap();
            let b = parent | codec.encode(2, 2).unwrap();
            assert!(codec.same_ancestry(a, b, 1));
            assert!(!codec.same_ancestry(a, b, 2));
        }

        #[test]
        fn cousins_differ_at_grandparent_depth() {
            let codec = codec();
            let root = codec.encode(0, 1).unwrap();
            let a = root | codec.encode(1, 1).unwrap() | codec.encode(2, 1).unwrap();
            let b = root | codec.encode(1, 2).unwrap() | codec.encode(2, 1).unwrap();
            assert!(codec.same_ancestry(a, b, 0));
            assert!(!codec.same_ancestry(a, b, 1));
        }

        #[test]
        fn depth_of_finds_deepest_populated_level() {
            let codec = codec();
            let root = codec.encode(0, 1).unwrap();
            let molecule = root | codec.encode(1, 3).unwrap() | codec.encode(2, 4).unwrap();
            let atom = molecule | codec.encode(3, 2).unwrap();
            assert_eq!(codec.depth_of(0), None);
            assert_eq!(codec.depth_of(root), Some(0));
            assert_eq!(codec.depth_of(molecule), Some(2));
            assert_eq!(codec.depth_of(atom), Some(3));
            assert_eq!(codec.ancestor_address(atom, 2), molecule);
        }
    }
}
