//! Tests for guest memory range handling under untrusted addresses

use op_memory::{GuestMemory, MemoryRegion, RAM_BASE, RAM_SIZE, VRAM_BASE};
use std::thread;

#[test]
fn test_gap_between_regions_is_unmapped() {
    let mem = GuestMemory::with_regions(&[
        MemoryRegion {
            base: 0x1000,
            size: 0x100,
            name: "A",
        },
        MemoryRegion {
            base: 0x1100,
            size: 0x100,
            name: "B",
        },
    ]);

    // Adjacent regions are still separate: a range may not straddle them
    assert_eq!(mem.valid_size(0x10F0, 0x20), 0x10);
    assert!(!mem.is_valid_range(0x10F0, 0x20));
    assert!(mem.read_bytes(0x10F0, 0x20).is_err());
}

#[test]
fn test_huge_sizes_do_not_overflow() {
    let mem = GuestMemory::new();
    let last = RAM_BASE + RAM_SIZE - 1;
    assert_eq!(mem.valid_size(last, u32::MAX), 1);
    assert!(mem.read_bytes(last, u32::MAX).is_err());
}

#[test]
fn test_concurrent_readers_and_writer() {
    let mem = GuestMemory::new();
    mem.fill(VRAM_BASE, 0x11, 0x1000).unwrap();

    let writer = {
        let mem = mem.clone();
        thread::spawn(move || {
            for i in 0..100u32 {
                mem.write::<u32>(VRAM_BASE + 0x2000 + i * 4, i).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let mem = mem.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    let data = mem.read_bytes(VRAM_BASE, 0x1000).unwrap();
                    assert!(data.iter().all(|&b| b == 0x11));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(mem.read::<u32>(VRAM_BASE + 0x2000 + 99 * 4).unwrap(), 99);
}
