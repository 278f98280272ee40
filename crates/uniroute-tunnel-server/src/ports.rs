//! Dynamic port allocation for TCP/TLS/UDP tunnels (spec §4.4, §5 "Resource
//! model"). Ports are handed out from a configurable range and tracked so
//! releasing one makes it immediately reusable.

use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
#[error("no ports available in the configured dynamic range")]
pub struct NoPortAvailable;

pub struct PortAllocator {
    range: (u16, u16),
    in_use: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new(range: (u16, u16)) -> Self {
        Self { range, in_use: Mutex::new(HashSet::new()) }
    }

    /// Hands out the lowest free port in range, so allocation is
    /// deterministic and easy to reason about under test.
    pub fn allocate(&self) -> Result<u16, NoPortAvailable> {
        let mut in_use = self.in_use.lock().expect("port allocator mutex poisoned");
        for port in self.range.0..=self.range.1 {
            if in_use.insert(port) {
                return Ok(port);
            }
        }
        Err(NoPortAvailable)
    }

    pub fn release(&self, port: u16) {
        self.in_use.lock().expect("port allocator mutex poisoned").remove(&port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_lowest_free_port_and_releases() {
        let allocator = PortAllocator::new((20000, 20002));
        let a = allocator.allocate().unwrap();
        let b = allocator.allocate().unwrap();
        let c = allocator.allocate().unwrap();
        assert_eq!([a, b, c], [20000, 20001, 20002]);
        assert!(allocator.allocate().is_err());

        allocator.release(b);
        assert_eq!(allocator.allocate().unwrap(), b);
    }
}
