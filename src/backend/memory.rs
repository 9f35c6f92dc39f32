// Memory type table
//
// Queried once per device. Selection is a plain linear scan: the first type
// allowed by the resource's requirement bits whose flags contain the request
// wins. No best-fit heuristics.

use ash::vk;

use crate::error::{GfxError, GfxResult};

#[derive(Debug, Clone)]
pub struct MemoryTypeTable {
    types: Vec<vk::MemoryPropertyFlags>,
}

impl MemoryTypeTable {
    pub fn from_properties(props: &vk::PhysicalDeviceMemoryProperties) -> Self {
        let count = (props.memory_type_count as usize).min(props.memory_types.len());
        Self {
            types: props.memory_types[..count]
                .iter()
                .map(|t| t.property_flags)
                .collect(),
        }
    }

    /// Build a table directly from property flags, index order preserved.
    pub fn from_flags(types: impl IntoIterator<Item = vk::MemoryPropertyFlags>) -> Self {
        Self {
            types: types.into_iter().take(vk::MAX_MEMORY_TYPES).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn flags(&self, index: u32) -> Option<vk::MemoryPropertyFlags> {
        self.types.get(index as usize).copied()
    }

    /// Lowest-indexed memory type allowed by `type_bits` that has every flag in `required`.
    pub fn find(&self, type_bits: u32, required: vk::MemoryPropertyFlags) -> GfxResult<u32> {
        self.types
            .iter()
            .enumerate()
            .find(|&(i, flags)| type_bits & (1u32 << i) != 0 && flags.contains(required))
            .map(|(i, _)| i as u32)
            .ok_or(GfxError::NoMemoryType {
                type_bits,
                required,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const DEVICE_LOCAL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    const HOST_VISIBLE: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_VISIBLE;
    const HOST_COHERENT: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_COHERENT;

    fn desktop_table() -> MemoryTypeTable {
        MemoryTypeTable::from_flags([
            DEVICE_LOCAL,
            HOST_VISIBLE | HOST_COHERENT,
            DEVICE_LOCAL | HOST_VISIBLE | HOST_COHERENT,
            HOST_VISIBLE | HOST_COHERENT | vk::MemoryPropertyFlags::HOST_CACHED,
        ])
    }

    #[test]
    fn lowest_matching_index_wins() {
        let table = desktop_table();
        assert_eq!(table.find(u32::MAX, HOST_VISIBLE).unwrap(), 1);
        assert_eq!(table.find(u32::MAX, DEVICE_LOCAL).unwrap(), 0);
        assert_eq!(table.find(u32::MAX, vk::MemoryPropertyFlags::empty()).unwrap(), 0);
    }

    #[test]
    fn type_bits_exclude_types() {
        let table = desktop_table();
        // Type 1 not allowed: next host-visible candidate is 2.
        assert_eq!(table.find(0b1100, HOST_VISIBLE).unwrap(), 2);
        assert_eq!(table.find(0b1000, HOST_VISIBLE).unwrap(), 3);
    }

    #[test]
    fn unsatisfiable_request_is_a_configuration_error() {
        let table = desktop_table();
        let err = table
            .find(0b0001, HOST_VISIBLE)
            .unwrap_err();
        assert!(matches!(err, GfxError::NoMemoryType { type_bits: 0b0001, .. }));
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let lazily = vk::MemoryPropertyFlags::LAZILY_ALLOCATED;
        assert!(table.find(u32::MAX, lazily).is_err());
    }

    #[test]
    fn reads_only_the_reported_types() {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = 2;
        props.memory_types[0].property_flags = DEVICE_LOCAL;
        props.memory_types[1].property_flags = HOST_VISIBLE;
        props.memory_types[2].property_flags = HOST_VISIBLE | HOST_COHERENT;

        let table = MemoryTypeTable::from_properties(&props);
        assert_eq!(table.len(), 2);
        assert!(table.find(u32::MAX, HOST_COHERENT).is_err());
        assert_eq!(table.flags(1), Some(HOST_VISIBLE));
    }
}
