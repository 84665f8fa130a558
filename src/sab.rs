//! The slot allocation bitmap (`macDSMESAB`) and the SAB specification that
//! travels inside the GTS command frames.
//!
//! One sub-block covers a single superframe of the multi-superframe: bit
//! `slot * num_channels + channel` stands for the guaranteed time slot `slot`
//! on channel `channel`.

use byte::{check_len, BytesExt, TryRead, TryWrite};

use crate::{
    consts::{MAX_SUPERFRAMES_PER_MULTI_SUPERFRAME, SUB_BLOCK_LENGTH_BITS, SUB_BLOCK_LENGTH_BYTES},
    pib::DsmeSuperframeGeometry,
};

/// A fixed-capacity bitmap over the (slot, channel) pairs of one superframe.
///
/// The backing store is sized for the maximum geometry; bits beyond the
/// configured geometry are simply never set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct SabSubBlock {
    bits: [u8; SUB_BLOCK_LENGTH_BYTES],
}

impl SabSubBlock {
    pub const fn new() -> Self {
        Self {
            bits: [0; SUB_BLOCK_LENGTH_BYTES],
        }
    }

    pub fn get(&self, bit: usize) -> bool {
        debug_assert!(bit < SUB_BLOCK_LENGTH_BITS);
        self.bits[bit / 8] & (1 << (bit % 8)) != 0
    }

    pub fn set(&mut self, bit: usize, value: bool) {
        debug_assert!(bit < SUB_BLOCK_LENGTH_BITS);
        if value {
            self.bits[bit / 8] |= 1 << (bit % 8);
        } else {
            self.bits[bit / 8] &= !(1 << (bit % 8));
        }
    }

    pub fn count_set(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|b| *b == 0)
    }

    pub fn iter_set_bits(&self) -> impl Iterator<Item = usize> + '_ {
        (0..SUB_BLOCK_LENGTH_BITS).filter(move |bit| self.get(*bit))
    }

    fn union_with(&mut self, other: &SabSubBlock) {
        for (byte, other_byte) in self.bits.iter_mut().zip(other.bits.iter()) {
            *byte |= other_byte;
        }
    }

    fn clear_bits_of(&mut self, other: &SabSubBlock) {
        for (byte, other_byte) in self.bits.iter_mut().zip(other.bits.iter()) {
            *byte &= !other_byte;
        }
    }
}

impl Default for SabSubBlock {
    fn default() -> Self {
        Self::new()
    }
}

/// The DSME SAB specification of 7.5.11.1: one sub-block plus the index of
/// the superframe it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct SabSpecification {
    /// Index of the described superframe within the multi-superframe.
    pub sub_block_index: u8,
    /// Number of octets of the sub-block that are meaningful for the
    /// configured geometry. This is what goes on the wire.
    sub_block_length_bytes: u8,
    pub sub_block: SabSubBlock,
}

impl SabSpecification {
    pub fn new(sub_block_index: u8, sub_block_length_bytes: u8) -> Self {
        debug_assert!(usize::from(sub_block_length_bytes) <= SUB_BLOCK_LENGTH_BYTES);
        Self {
            sub_block_index,
            sub_block_length_bytes,
            sub_block: SabSubBlock::new(),
        }
    }

    /// A specification carrying exactly one (slot, channel) bit.
    pub fn for_slot(
        geometry: &DsmeSuperframeGeometry,
        superframe_id: u8,
        slot_id: u8,
        channel: u8,
    ) -> Self {
        let mut spec = Self::new(superframe_id, geometry.sub_block_length_bytes());
        spec.sub_block.set(
            usize::from(slot_id) * usize::from(geometry.num_channels) + usize::from(channel),
            true,
        );
        spec
    }

    pub fn sub_block_length_bytes(&self) -> u8 {
        self.sub_block_length_bytes
    }

    /// Number of meaningful bits, given the length this specification was
    /// created with.
    pub fn sub_block_length_bits(&self) -> usize {
        usize::from(self.sub_block_length_bytes) * 8
    }
}

impl TryRead<'_> for SabSpecification {
    fn try_read(bytes: &[u8], _ctx: ()) -> byte::Result<(Self, usize)> {
        let offset = &mut 0;
        check_len(bytes, 2)?;
        let sub_block_index: u8 = bytes.read(offset)?;
        let sub_block_length_bytes: u8 = bytes.read(offset)?;
        if usize::from(sub_block_length_bytes) > SUB_BLOCK_LENGTH_BYTES {
            return Err(byte::Error::BadInput {
                err: "SAB sub-block too long",
            });
        }
        check_len(&bytes[*offset..], usize::from(sub_block_length_bytes))?;
        let mut sub_block = SabSubBlock::new();
        for i in 0..usize::from(sub_block_length_bytes) {
            sub_block.bits[i] = bytes.read(offset)?;
        }
        Ok((
            Self {
                sub_block_index,
                sub_block_length_bytes,
                sub_block,
            },
            *offset,
        ))
    }
}

impl TryWrite for SabSpecification {
    fn try_write(self, bytes: &mut [u8], _ctx: ()) -> byte::Result<usize> {
        let offset = &mut 0;
        bytes.write(offset, self.sub_block_index)?;
        bytes.write(offset, self.sub_block_length_bytes)?;
        for i in 0..usize::from(self.sub_block_length_bytes) {
            bytes.write(offset, self.sub_block.bits[i])?;
        }
        Ok(*offset)
    }
}

/// The device's view of the occupied guaranteed time slots of the whole
/// multi-superframe, one sub-block per superframe.
///
/// Updated when this device allocates or deallocates slots and when
/// allocations of one-hop neighbors are overheard.
#[doc(alias = "macDSMESAB")]
#[derive(Debug, Clone)]
pub struct SlotAllocationBitmap {
    num_superframes: u8,
    num_channels: u8,
    blocks: [SabSubBlock; MAX_SUPERFRAMES_PER_MULTI_SUPERFRAME],
}

impl SlotAllocationBitmap {
    pub fn new(geometry: &DsmeSuperframeGeometry) -> Self {
        debug_assert!(
            usize::from(geometry.num_superframes_per_multi_superframe)
                <= MAX_SUPERFRAMES_PER_MULTI_SUPERFRAME
        );
        Self {
            num_superframes: geometry.num_superframes_per_multi_superframe,
            num_channels: geometry.num_channels,
            blocks: [SabSubBlock::new(); MAX_SUPERFRAMES_PER_MULTI_SUPERFRAME],
        }
    }

    /// Mark the slots of the specification as occupied.
    pub fn add_occupied(&mut self, spec: &SabSpecification) {
        let Some(block) = self.block_mut(spec.sub_block_index) else {
            return;
        };
        block.union_with(&spec.sub_block);
    }

    /// Clear the slots of the specification.
    pub fn remove_occupied(&mut self, spec: &SabSpecification) {
        let Some(block) = self.block_mut(spec.sub_block_index) else {
            return;
        };
        block.clear_bits_of(&spec.sub_block);
    }

    pub fn is_occupied(&self, superframe_id: u8, slot_id: u8, channel: u8) -> bool {
        let Some(block) = self.blocks.get(usize::from(superframe_id)) else {
            return false;
        };
        block.get(usize::from(slot_id) * usize::from(self.num_channels) + usize::from(channel))
    }

    fn block_mut(&mut self, superframe_id: u8) -> Option<&mut SabSubBlock> {
        if superframe_id >= self.num_superframes {
            warn!(
                "SAB update for superframe {} outside of the multi-superframe",
                superframe_id
            );
            return None;
        }
        self.blocks.get_mut(usize::from(superframe_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> DsmeSuperframeGeometry {
        DsmeSuperframeGeometry {
            num_superframes_per_multi_superframe: 4,
            num_gtslots: 7,
            num_channels: 16,
            final_cap_slot: 8,
        }
    }

    #[test]
    fn sub_block_set_and_count() {
        let mut block = SabSubBlock::new();
        assert!(block.is_empty());

        block.set(0, true);
        block.set(53, true);
        block.set(111, true);
        assert_eq!(block.count_set(), 3);
        assert!(block.get(53));

        block.set(53, false);
        assert!(!block.get(53));
        assert_eq!(block.iter_set_bits().collect::<Vec<_>>(), vec![0, 111]);
    }

    #[test]
    fn specification_round_trips_with_partial_length() {
        let mut spec = SabSpecification::new(2, 4);
        spec.sub_block.set(7, true);
        spec.sub_block.set(30, true);

        let mut buffer = [0u8; 32];
        let mut len = 0usize;
        buffer.write(&mut len, spec.clone()).unwrap();
        assert_eq!(len, 2 + 4);

        let mut offset = 0usize;
        let decoded: SabSpecification = buffer.read(&mut offset).unwrap();
        assert_eq!(decoded, spec);
    }

    #[test]
    fn bitmap_add_and_remove() {
        let geometry = geometry();
        let mut sab = SlotAllocationBitmap::new(&geometry);

        let spec = SabSpecification::for_slot(&geometry, 1, 3, 5);
        sab.add_occupied(&spec);
        assert!(sab.is_occupied(1, 3, 5));
        assert!(!sab.is_occupied(1, 3, 6));
        assert!(!sab.is_occupied(0, 3, 5));

        sab.remove_occupied(&spec);
        assert!(!sab.is_occupied(1, 3, 5));
    }

    #[test]
    fn bitmap_ignores_out_of_range_superframe() {
        let geometry = geometry();
        let mut sab = SlotAllocationBitmap::new(&geometry);

        let spec = SabSpecification::for_slot(&geometry, 9, 0, 0);
        sab.add_occupied(&spec);
        assert!(!sab.is_occupied(9, 0, 0));
    }
}
