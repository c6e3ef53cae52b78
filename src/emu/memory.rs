use std::collections::BTreeMap;

use super::{ConfigError, EmuError, EmuResult};

const PAGE_SHIFT: u32 = 12;
const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// First address handed out by the allocator. Page zero stays unmapped.
const HEAP_BASE: u64 = PAGE_SIZE as u64;

/// Byte-addressed device memory shared by every wavefront of a launch.
pub trait GlobalMemory {
    fn read(&self, addr: u32, buf: &mut [u8]) -> EmuResult<()>;
    fn write(&mut self, addr: u32, data: &[u8]) -> EmuResult<()>;

    fn read_u32(&self, addr: u32) -> EmuResult<u32> {
        let mut buf = [0u8; 4];
        self.read(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> EmuResult<()> {
        self.write(addr, &value.to_le_bytes())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DevicePointer(u32);

impl DevicePointer {
    pub fn addr(self) -> u32 {
        self.0
    }

    pub fn offset(self, bytes: u32) -> DevicePointer {
        DevicePointer(self.0.wrapping_add(bytes))
    }
}

/// Sparse paged memory. Pages must be mapped before they are touched;
/// accessing an unmapped page is a fatal memory error.
#[derive(Debug)]
pub struct Memory {
    pages: BTreeMap<u32, Box<[u8]>>,
    heap_top: u64,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    pub fn new() -> Self {
        Memory {
            pages: BTreeMap::new(),
            heap_top: HEAP_BASE,
        }
    }

    /// Maps every page overlapping `[addr, addr + size)`, zero-filled.
    pub fn map(&mut self, addr: u32, size: u32) {
        if size == 0 {
            return;
        }
        let first = addr >> PAGE_SHIFT;
        let last = (addr as u64 + size as u64 - 1) >> PAGE_SHIFT;
        for page in first as u64..=last {
            self.pages
                .entry(page as u32)
                .or_insert_with(|| vec![0u8; PAGE_SIZE].into_boxed_slice());
        }
    }

    /// Zeroes the mapped bytes of `[addr, addr + size)`. Unmapped pages are
    /// skipped.
    pub fn clear(&mut self, addr: u32, size: u32) {
        let end = addr as u64 + size as u64;
        let mut cursor = addr as u64;
        while cursor < end {
            let offset = (cursor as usize) & (PAGE_SIZE - 1);
            let n = ((PAGE_SIZE - offset) as u64).min(end - cursor) as usize;
            if let Some(page) = self.pages.get_mut(&((cursor >> PAGE_SHIFT) as u32)) {
                page[offset..offset + n].fill(0);
            }
            cursor += n as u64;
        }
    }

    pub fn is_mapped(&self, addr: u32) -> bool {
        self.pages.contains_key(&(addr >> PAGE_SHIFT))
    }

    /// Bump allocation of a mapped, zeroed region.
    pub fn alloc(&mut self, size: usize, align: usize) -> Result<DevicePointer, ConfigError> {
        let align = align.max(1) as u64;
        if !align.is_power_of_two() {
            return Err(ConfigError::InvalidAlignment(align as usize));
        }
        let aligned = (self.heap_top + align - 1) & !(align - 1);
        let end = aligned + size as u64;
        if end > u32::MAX as u64 {
            return Err(ConfigError::OutOfMemory(size));
        }
        self.heap_top = end;
        self.map(aligned as u32, size as u32);
        Ok(DevicePointer(aligned as u32))
    }

    fn check(&self, addr: u32, size: usize) -> EmuResult<()> {
        let end = addr as u64 + size as u64;
        if size == 0 {
            return Ok(());
        }
        if end > u32::MAX as u64 + 1 {
            return Err(EmuError::MemoryAccess { addr, size });
        }
        let first = addr >> PAGE_SHIFT;
        let last = ((end - 1) >> PAGE_SHIFT) as u32;
        if (first..=last).all(|page| self.pages.contains_key(&page)) {
            Ok(())
        } else {
            Err(EmuError::MemoryAccess { addr, size })
        }
    }
}

impl GlobalMemory for Memory {
    fn read(&self, addr: u32, buf: &mut [u8]) -> EmuResult<()> {
        self.check(addr, buf.len())?;
        let mut cursor = addr as usize;
        let mut done = 0;
        while done < buf.len() {
            let page = &self.pages[&((cursor >> PAGE_SHIFT) as u32)];
            let offset = cursor & (PAGE_SIZE - 1);
            let n = (PAGE_SIZE - offset).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&page[offset..offset + n]);
            done += n;
            cursor += n;
        }
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> EmuResult<()> {
        self.check(addr, data.len())?;
        let mut cursor = addr as usize;
        let mut done = 0;
        while done < data.len() {
            let Some(page) = self.pages.get_mut(&((cursor >> PAGE_SHIFT) as u32)) else {
                return Err(EmuError::MemoryAccess {
                    addr,
                    size: data.len(),
                });
            };
            let offset = cursor & (PAGE_SIZE - 1);
            let n = (PAGE_SIZE - offset).min(data.len() - done);
            page[offset..offset + n].copy_from_slice(&data[done..done + n]);
            done += n;
            cursor += n;
        }
        Ok(())
    }
}

/// Work-group shared memory.
#[derive(Debug, Clone)]
pub struct LocalMemory {
    data: Vec<u8>,
}

impl LocalMemory {
    pub fn new(size: usize) -> Self {
        LocalMemory {
            data: vec![0; size],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn range(&self, addr: u32, size: usize) -> EmuResult<std::ops::Range<usize>> {
        let begin = addr as usize;
        let end = begin + size;
        if end > self.data.len() {
            return Err(EmuError::LocalMemoryAccess { addr, size });
        }
        Ok(begin..end)
    }

    pub fn read(&self, addr: u32, buf: &mut [u8]) -> EmuResult<()> {
        let range = self.range(addr, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    pub fn write(&mut self, addr: u32, data: &[u8]) -> EmuResult<()> {
        let range = self.range(addr, data.len())?;
        self.data[range].copy_from_slice(data);
        Ok(())
    }

    pub fn read_u32(&self, addr: u32) -> EmuResult<u32> {
        let mut buf = [0u8; 4];
        self.read(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write_u32(&mut self, addr: u32, value: u32) -> EmuResult<()> {
        self.write(addr, &value.to_le_bytes())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn alloc_is_aligned_and_mapped() {
        let mut mem = Memory::new();
        let a = mem.alloc(10, 4).unwrap();
        let b = mem.alloc(16, 256).unwrap();
        assert_eq!(a.addr(), HEAP_BASE as u32);
        assert_eq!(b.addr() % 256, 0);
        assert!(b.addr() >= a.addr() + 10);
        assert!(mem.is_mapped(b.addr()));
    }

    #[test]
    fn access_across_pages() {
        let mut mem = Memory::new();
        mem.map(0x1ffe, 4);
        mem.write_u32(0x1ffe, 0xdeadbeef).unwrap();
        assert_eq!(mem.read_u32(0x1ffe).unwrap(), 0xdeadbeef);
    }

    #[test]
    fn clear_zeroes_only_the_range() {
        let mut mem = Memory::new();
        mem.map(0x1000, 0x2000);
        mem.write(0x1ff8, &[0xff; 16]).unwrap();
        mem.clear(0x1ffc, 8);
        let mut buf = [0u8; 16];
        mem.read(0x1ff8, &mut buf).unwrap();
        assert_eq!(buf, [0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff, 0xff, 0xff]);
        // unmapped tail is ignored
        mem.clear(0x2ff0, 0x100);
        assert!(!mem.is_mapped(0x3000));
    }

    #[test]
    fn unmapped_access_reports_address_and_size() {
        let mut mem = Memory::new();
        let err = mem.write(0x40, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, EmuError::MemoryAccess { addr: 0x40, size: 3 }));
        let mut buf = [0u8; 8];
        assert!(mem.read(0, &mut buf).is_err());
    }

    #[test]
    fn local_memory_bounds() {
        let mut lds = LocalMemory::new(16);
        lds.write_u32(12, 5).unwrap();
        assert_eq!(lds.read_u32(12).unwrap(), 5);
        assert!(matches!(
            lds.write_u32(13, 0),
            Err(EmuError::LocalMemoryAccess { addr: 13, size: 4 })
        ));
    }
}
