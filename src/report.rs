use std::ops::Range;

use colorful::{Color, Colorful as _};

/// One live allocation inside a memory block.
#[derive(Clone, Debug)]
pub struct AllocationReport {
    /// Name passed at allocation (or rename) time.
    pub name: String,
    /// Offset of the backing chunk within its block.
    pub offset: u64,
    /// Size of the backing chunk in bytes, including alignment padding
    /// absorbed by the chunk.
    pub size: u64,
}

/// One memory block and the slice of [`HeapsReport::allocations`] living in it.
#[derive(Clone, Debug)]
pub struct MemoryBlockReport {
    /// Block size in bytes.
    pub size: u64,
    /// Indices of this block's allocations in the flat report list.
    pub allocations: Range<usize>,
}

/// Snapshot of every live allocation across all memory types.
#[derive(Clone, Debug)]
pub struct HeapsReport {
    /// All live allocations, grouped by block.
    pub allocations: Vec<AllocationReport>,
    /// All present memory blocks.
    pub blocks: Vec<MemoryBlockReport>,
    /// Sum of the live allocation sizes.
    pub total_allocated_bytes: u64,
    /// Sum of the block sizes.
    pub total_reserved_bytes: u64,
}

impl std::fmt::Display for HeapsReport {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const MB: u64 = 1024 * 1024;
        const BAR_WIDTH: u64 = 50;

        let reserved = self.total_reserved_bytes.max(1);
        let percent = (self.total_allocated_bytes * 100 / reserved).min(100);
        let fill = (percent * BAR_WIDTH / 100) as usize;
        let bar = ("|".repeat(fill) + &" ".repeat(BAR_WIDTH as usize - fill))
            .gradient_with_color(Color::Green, Color::Red);
        // The label follows the color the bar has reached.
        let label = format!("{:>3}%", percent);
        let label = match percent {
            0..=33 => label.green(),
            34..=66 => label.yellow(),
            _ => label.red(),
        };

        writeln!(
            fmt,
            "{} allocations in {} blocks",
            self.allocations.len(),
            self.blocks.len()
        )?;
        writeln!(
            fmt,
            "{:>6} / {:<6} or {} [{}]",
            format!("{}MB", self.total_allocated_bytes / MB),
            format!("{}MB", self.total_reserved_bytes / MB),
            label,
            bar,
        )?;

        let mut largest: Vec<&AllocationReport> = self.allocations.iter().collect();
        largest.sort_by_key(|report| std::cmp::Reverse(report.size));
        for report in largest.iter().take(16) {
            writeln!(
                fmt,
                "    {:>12} @ 0x{:<10x} {}",
                format!("{} B", report.size),
                report.offset,
                report.name,
            )?;
        }

        Ok(())
    }
}
