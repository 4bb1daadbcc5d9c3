use rv_types::{Exception, Width};

use crate::Device;

/// Plain little-endian DRAM. Reads
/// and writes are always little-endian regardless of host byte order.
pub struct Ram {
    bytes: Vec<u8>,
}

impl Ram {
    pub fn new(size: usize) -> Self {
        Ram {
            bytes: vec![0u8; size],
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Copy `data` into RAM starting at device-relative offset `at`. Used
    /// by the boot-loading glue (kernel image, DTB) that lives outside the
    /// core.
    pub fn write_bytes(&mut self, at: usize, data: &[u8]) {
        self.bytes[at..at + data.len()].copy_from_slice(data);
    }
}

impl Device for Ram {
    fn load(&mut self, addr: u64, width: Width) -> Result<u64, Exception> {
        let offset = addr as usize;
        let n = width.bytes();
        let bytes = self
            .bytes
            .get(offset..offset + n)
            .ok_or(Exception::LoadAccessFault)?;
        let mut buf = [0u8; 8];
        buf[..n].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    fn store(&mut self, addr: u64, width: Width, value: u64) -> Result<(), Exception> {
        let offset = addr as usize;
        let n = width.bytes();
        let dst = self
            .bytes
            .get_mut(offset..offset + n)
            .ok_or(Exception::StoreAccessFault)?;
        dst.copy_from_slice(&value.to_le_bytes()[..n]);
        Ok(())
    }
}
