//! HIP device properties

use std::ffi::CStr;

use crate::backend::driver::DeviceProps;

// Opaque buffer for hipDeviceProp_t (R0600 layout). Must be exactly
// sizeof(hipDeviceProp_t) = 1472 bytes since the runtime writes all of it.
//
// Fields are read at fixed offsets:
//           name[256]: 0-255
//           uuid: 256-271
//           luid[8]: 272-279
//           luidDeviceNodeMask: 280-283
//           [PADDING]: 284-287
//           totalGlobalMem: 288-295
//           sharedMemPerBlock: 296-303
//           regsPerBlock: 304-307
//           warpSize: 308-311
//           memPitch: 312-319
//           maxThreadsPerBlock: 320-323
//           maxThreadsDim[3]: 324-335
//           maxGridSize[3]: 336-347
//           clockRate: 348-351
//           totalConstMem: 352-359
//           major: 360-363
//           minor: 364-367
//           ...
//           multiProcessorCount: 388-391
#[repr(C)]
#[derive(Debug, Clone)]
pub struct HipDeviceProp {
    _buffer: [u8; 1472],
}

impl HipDeviceProp {
    const NAME_OFFSET: usize = 0;
    const TOTAL_GLOBAL_MEM_OFFSET: usize = 288;
    const SHARED_MEM_PER_BLOCK_OFFSET: usize = 296;
    const WARP_SIZE_OFFSET: usize = 308;
    const MAX_THREADS_PER_BLOCK_OFFSET: usize = 320;
    const MAJOR_OFFSET: usize = 360;
    const MINOR_OFFSET: usize = 364;
    const MULTI_PROCESSOR_COUNT_OFFSET: usize = 388;

    /// Device name (null-terminated C string)
    pub fn name(&self) -> String {
        let name_bytes = &self._buffer[Self::NAME_OFFSET..Self::NAME_OFFSET + 256];
        let len = name_bytes.iter().position(|&c| c == 0).unwrap_or(256);
        String::from_utf8_lossy(&name_bytes[..len]).into_owned()
    }

    fn read_i32(&self, offset: usize, fallback: i32) -> i32 {
        self._buffer[offset..offset + 4]
            .try_into()
            .ok()
            .map(i32::from_ne_bytes)
            .unwrap_or(fallback)
    }

    fn read_u64(&self, offset: usize, fallback: u64) -> u64 {
        self._buffer[offset..offset + 8]
            .try_into()
            .ok()
            .map(u64::from_ne_bytes)
            .unwrap_or(fallback)
    }

    pub fn total_global_mem(&self) -> u64 {
        self.read_u64(Self::TOTAL_GLOBAL_MEM_OFFSET, 0)
    }

    pub fn shared_mem_per_block(&self) -> usize {
        self.read_u64(Self::SHARED_MEM_PER_BLOCK_OFFSET, 65536) as usize
    }

    /// Wavefront size: 32 for RDNA, 64 for CDNA
    pub fn warp_size(&self) -> i32 {
        self.read_i32(Self::WARP_SIZE_OFFSET, 32)
    }

    pub fn max_threads_per_block(&self) -> i32 {
        self.read_i32(Self::MAX_THREADS_PER_BLOCK_OFFSET, 1024)
    }

    pub fn multi_processor_count(&self) -> i32 {
        self.read_i32(Self::MULTI_PROCESSOR_COUNT_OFFSET, 0)
    }

    /// Compute capability as `major * 10 + minor`
    pub fn isa_version(&self) -> i32 {
        let major = self.read_i32(Self::MAJOR_OFFSET, 0);
        let minor = self.read_i32(Self::MINOR_OFFSET, 0);
        major * 10 + minor
    }

    /// Backend-neutral snapshot
    pub fn to_props(&self) -> DeviceProps {
        DeviceProps {
            name: self.name(),
            total_global_mem: self.total_global_mem(),
            multi_processor_count: self.multi_processor_count(),
            warp_size: self.warp_size(),
            max_threads_per_block: self.max_threads_per_block(),
            shared_mem_per_block: self.shared_mem_per_block(),
            isa_version: self.isa_version(),
        }
    }
}

impl Default for HipDeviceProp {
    fn default() -> Self {
        HipDeviceProp {
            _buffer: [0u8; 1472],
        }
    }
}

/// HIP error string for an error code
pub fn get_error_string(error: i32) -> String {
    unsafe {
        let error_ptr = super::ffi::hipGetErrorString(error);
        if error_ptr.is_null() {
            "Unknown error".to_string()
        } else {
            CStr::from_ptr(error_ptr).to_string_lossy().into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prop_buffer_size() {
        assert_eq!(std::mem::size_of::<HipDeviceProp>(), 1472);
    }

    #[test]
    fn test_field_decoding() {
        let mut prop = HipDeviceProp::default();
        prop._buffer[..6].copy_from_slice(b"gfx942");
        prop._buffer[308..312].copy_from_slice(&64i32.to_ne_bytes());
        prop._buffer[360..364].copy_from_slice(&9i32.to_ne_bytes());
        prop._buffer[364..368].copy_from_slice(&4i32.to_ne_bytes());

        let props = prop.to_props();
        assert_eq!(props.name, "gfx942");
        assert_eq!(props.warp_size, 64);
        assert_eq!(props.isa_version, 94);
    }
}
